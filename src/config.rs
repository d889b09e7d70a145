//! Configuration management with environment variable support.
//!
//! Centralized configuration for restore-verify, supporting:
//! - Environment variables for all deployment-specific values
//! - Sensible defaults matching the reference deployment
//! - Named pacing delays for every fixed wait in the protocols
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RESTORE_VERIFY_PROVIDER_ENDPOINT` | Restore provider API base URL | `https://api.slide.tech` |
//! | `RESTORE_VERIFY_PROVIDER_API_KEY` | Restore provider API key | (none) |
//! | `RESTORE_VERIFY_ORACLE_ENDPOINT` | Oracle chat-completions URL | `https://api.openai.com/v1/chat/completions` |
//! | `RESTORE_VERIFY_ORACLE_API_KEY` | Oracle API key | (none) |
//! | `RESTORE_VERIFY_ORACLE_MODEL` | Oracle model name | `gpt-4-turbo-preview` |
//! | `RESTORE_VERIFY_ORACLE_MAX_TOKENS` | Max tokens per oracle reply | `500` |
//! | `RESTORE_VERIFY_ORACLE_TIMEOUT` | Oracle activity timeout (seconds) | `60` |
//! | `RESTORE_VERIFY_ORACLE_CONNECT_TIMEOUT` | Oracle connection timeout (seconds) | `10` |
//! | `RESTORE_VERIFY_USERNAME` | Guest OS username | `Administrator` |
//! | `RESTORE_VERIFY_PASSWORD` | Guest OS password | (none) |
//! | `RESTORE_VERIFY_BOOT_TIMEOUT` | VM boot timeout (seconds) | `300` |
//! | `RESTORE_VERIFY_LOGIN_SCREEN_TIMEOUT` | Login screen wait (seconds) | `120` |
//! | `RESTORE_VERIFY_OPERATION_TIMEOUT` | Per-operation timeout (seconds) | `60` |
//! | `RESTORE_VERIFY_MAX_RETRIES` | Attempt cap for verified operations | `2` |
//! | `RESTORE_VERIFY_SCREENSHOT_DIR` | Screenshot output directory | `screenshots` |
//! | `RESTORE_VERIFY_REPORT_DIR` | Report output directory | `reports` |
//! | `RESTORE_VERIFY_OPTIMISTIC_VERDICTS` | Treat ambiguous login verdicts as success | `true` |

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default restore provider API base URL
pub const DEFAULT_PROVIDER_ENDPOINT: &str = "https://api.slide.tech";

/// Default oracle chat-completions endpoint
pub const DEFAULT_ORACLE_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default oracle model name
pub const DEFAULT_ORACLE_MODEL: &str = "gpt-4-turbo-preview";

/// Default max tokens for oracle replies
pub const DEFAULT_ORACLE_MAX_TOKENS: u32 = 500;

/// Default oracle connection timeout (seconds)
pub const DEFAULT_ORACLE_CONNECT_TIMEOUT: u64 = 10;

/// Default oracle activity timeout (seconds)
pub const DEFAULT_ORACLE_ACTIVITY_TIMEOUT: u64 = 60;

/// Default guest OS username
pub const DEFAULT_USERNAME: &str = "Administrator";

/// Default VM boot timeout (seconds)
pub const DEFAULT_BOOT_TIMEOUT: u64 = 300;

/// Default login screen wait (seconds)
pub const DEFAULT_LOGIN_SCREEN_TIMEOUT: u64 = 120;

/// Default per-operation timeout (seconds)
pub const DEFAULT_OPERATION_TIMEOUT: u64 = 60;

/// Default attempt cap for oracle-verified operations
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default screenshot directory
pub const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";

/// Default report directory
pub const DEFAULT_REPORT_DIR: &str = "reports";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_PROVIDER_ENDPOINT: &str = "RESTORE_VERIFY_PROVIDER_ENDPOINT";
pub const ENV_PROVIDER_API_KEY: &str = "RESTORE_VERIFY_PROVIDER_API_KEY";
pub const ENV_ORACLE_ENDPOINT: &str = "RESTORE_VERIFY_ORACLE_ENDPOINT";
pub const ENV_ORACLE_API_KEY: &str = "RESTORE_VERIFY_ORACLE_API_KEY";
pub const ENV_ORACLE_MODEL: &str = "RESTORE_VERIFY_ORACLE_MODEL";
pub const ENV_ORACLE_MAX_TOKENS: &str = "RESTORE_VERIFY_ORACLE_MAX_TOKENS";
pub const ENV_ORACLE_ACTIVITY_TIMEOUT: &str = "RESTORE_VERIFY_ORACLE_TIMEOUT";
pub const ENV_ORACLE_CONNECT_TIMEOUT: &str = "RESTORE_VERIFY_ORACLE_CONNECT_TIMEOUT";
pub const ENV_USERNAME: &str = "RESTORE_VERIFY_USERNAME";
pub const ENV_PASSWORD: &str = "RESTORE_VERIFY_PASSWORD";
pub const ENV_BOOT_TIMEOUT: &str = "RESTORE_VERIFY_BOOT_TIMEOUT";
pub const ENV_LOGIN_SCREEN_TIMEOUT: &str = "RESTORE_VERIFY_LOGIN_SCREEN_TIMEOUT";
pub const ENV_OPERATION_TIMEOUT: &str = "RESTORE_VERIFY_OPERATION_TIMEOUT";
pub const ENV_MAX_RETRIES: &str = "RESTORE_VERIFY_MAX_RETRIES";
pub const ENV_SCREENSHOT_DIR: &str = "RESTORE_VERIFY_SCREENSHOT_DIR";
pub const ENV_REPORT_DIR: &str = "RESTORE_VERIFY_REPORT_DIR";
pub const ENV_OPTIMISTIC_VERDICTS: &str = "RESTORE_VERIFY_OPTIMISTIC_VERDICTS";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for restore-verify
#[derive(Debug, Clone)]
pub struct Config {
    /// Restore provider API settings
    pub provider: ProviderSettings,
    /// Oracle API settings
    pub oracle: OracleSettings,
    /// Guest OS credentials
    pub credentials: CredentialSettings,
    /// Run timeouts and retry policy
    pub run: RunSettings,
    /// Output directories
    pub output: OutputSettings,
}

/// Restore provider API settings
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// API base URL
    pub endpoint: String,
    /// Bearer token for the provider API
    pub api_key: String,
}

/// Oracle API settings
#[derive(Debug, Clone)]
pub struct OracleSettings {
    /// Chat-completions endpoint URL
    pub endpoint: String,
    /// Bearer token for the oracle API (empty for unauthenticated endpoints)
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in a reply
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
}

/// Guest OS credentials
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    /// Target username (may carry a `DOMAIN\` prefix)
    pub username: String,
    /// Password, typed character by character at the console
    pub password: String,
}

/// Run timeouts and retry policy
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// VM boot timeout (seconds)
    pub boot_timeout: u64,
    /// Maximum wait for the guest login screen (seconds)
    pub login_screen_timeout: u64,
    /// Per-operation timeout (seconds)
    pub operation_timeout: u64,
    /// Attempt cap for oracle-verified operations
    pub max_retries: u32,
    /// Treat ambiguous/low-confidence login verdicts as success.
    /// This bias can hide a real failure behind a vague oracle reply; it is a
    /// product decision carried over from the reference deployment, so it is
    /// a named switch rather than baked-in behavior.
    pub optimistic_on_ambiguous: bool,
}

/// Output directories
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Screenshot directory
    pub screenshot_dir: String,
    /// Report directory
    pub report_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            provider: ProviderSettings::from_env(),
            oracle: OracleSettings::from_env(),
            credentials: CredentialSettings::from_env(),
            run: RunSettings::from_env(),
            output: OutputSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            provider: ProviderSettings::defaults(),
            oracle: OracleSettings::defaults(),
            credentials: CredentialSettings::defaults(),
            run: RunSettings::defaults(),
            output: OutputSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_PROVIDER_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_PROVIDER_ENDPOINT.to_string()),
            api_key: env::var(ENV_PROVIDER_API_KEY).unwrap_or_default(),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_PROVIDER_ENDPOINT.to_string(),
            api_key: String::new(),
        }
    }
}

impl OracleSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_ORACLE_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_ORACLE_ENDPOINT.to_string()),
            api_key: env::var(ENV_ORACLE_API_KEY).unwrap_or_default(),
            model: env::var(ENV_ORACLE_MODEL).unwrap_or_else(|_| DEFAULT_ORACLE_MODEL.to_string()),
            max_tokens: parse_env(ENV_ORACLE_MAX_TOKENS, DEFAULT_ORACLE_MAX_TOKENS),
            connect_timeout: parse_env(ENV_ORACLE_CONNECT_TIMEOUT, DEFAULT_ORACLE_CONNECT_TIMEOUT),
            activity_timeout: parse_env(ENV_ORACLE_ACTIVITY_TIMEOUT, DEFAULT_ORACLE_ACTIVITY_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_ORACLE_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_ORACLE_MODEL.to_string(),
            max_tokens: DEFAULT_ORACLE_MAX_TOKENS,
            connect_timeout: DEFAULT_ORACLE_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_ORACLE_ACTIVITY_TIMEOUT,
        }
    }
}

impl CredentialSettings {
    pub fn from_env() -> Self {
        Self {
            username: env::var(ENV_USERNAME).unwrap_or_else(|_| DEFAULT_USERNAME.to_string()),
            password: env::var(ENV_PASSWORD).unwrap_or_default(),
        }
    }

    pub fn defaults() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
        }
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            boot_timeout: parse_env(ENV_BOOT_TIMEOUT, DEFAULT_BOOT_TIMEOUT),
            login_screen_timeout: parse_env(ENV_LOGIN_SCREEN_TIMEOUT, DEFAULT_LOGIN_SCREEN_TIMEOUT),
            operation_timeout: parse_env(ENV_OPERATION_TIMEOUT, DEFAULT_OPERATION_TIMEOUT),
            max_retries: parse_env(ENV_MAX_RETRIES, DEFAULT_MAX_RETRIES),
            optimistic_on_ambiguous: env::var(ENV_OPTIMISTIC_VERDICTS)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    pub fn defaults() -> Self {
        Self {
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            login_screen_timeout: DEFAULT_LOGIN_SCREEN_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            optimistic_on_ambiguous: true,
        }
    }
}

impl OutputSettings {
    pub fn from_env() -> Self {
        Self {
            screenshot_dir: env::var(ENV_SCREENSHOT_DIR)
                .unwrap_or_else(|_| DEFAULT_SCREENSHOT_DIR.to_string()),
            report_dir: env::var(ENV_REPORT_DIR).unwrap_or_else(|_| DEFAULT_REPORT_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            screenshot_dir: DEFAULT_SCREENSHOT_DIR.to_string(),
            report_dir: DEFAULT_REPORT_DIR.to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

// ============================================================================
// Pacing
// ============================================================================

/// Named delays for every fixed wait in the protocols.
///
/// The guest gives no positive completion signal for most console actions, so
/// the protocols pace themselves with these settle times. Each wait is a
/// named field so a positive readiness check can replace it without touching
/// protocol structure.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Wait after the display connection is established
    pub connect_settle: Duration,
    /// Blanket wait for the guest OS to boot to a usable console
    pub desktop_boot_wait: Duration,
    /// Interval between login screen polls
    pub login_poll_interval: Duration,
    /// Wait after a wake gesture before re-checking the screen
    pub wake_settle: Duration,
    /// Wait after a focus click
    pub focus_settle: Duration,
    /// Wait after Escape when backing out to user selection
    pub escape_settle: Duration,
    /// Interval between candidate "other user" clicks
    pub user_switch_click_interval: Duration,
    /// Wait for the user-selection screen to change after the click sweep
    pub user_switch_wait: Duration,
    /// Wait after clearing an input field
    pub clear_settle: Duration,
    /// Wait when moving between input fields
    pub field_transition_settle: Duration,
    /// Per-character delay while typing credentials
    pub credential_char_delay: Duration,
    /// Per-character delay while typing commands
    pub command_char_delay: Duration,
    /// Brief pause before pressing the submit key
    pub pre_submit_settle: Duration,
    /// Wait after submitting credentials before verifying the desktop
    pub post_submit_wait: Duration,
    /// Wait for the run dialog to appear
    pub run_dialog_settle: Duration,
    /// Wait for the primary shell window to open
    pub shell_launch_wait: Duration,
    /// Wait for the secondary shell to start inside the primary
    pub inner_shell_wait: Duration,
    /// Wait for a submitted command to produce output
    pub command_output_wait: Duration,
    /// Wait after closing a window
    pub window_close_settle: Duration,
    /// Pause between custom steps
    pub step_delay: Duration,
    /// Pause between independent per-agent runs in a batch
    pub inter_run_pause: Duration,
    /// Interval between VM readiness polls
    pub vm_poll_interval: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            connect_settle: Duration::from_secs(10),
            desktop_boot_wait: Duration::from_secs(120),
            login_poll_interval: Duration::from_secs(10),
            wake_settle: Duration::from_secs(5),
            focus_settle: Duration::from_secs(1),
            escape_settle: Duration::from_secs(3),
            user_switch_click_interval: Duration::from_secs(1),
            user_switch_wait: Duration::from_secs(10),
            clear_settle: Duration::from_millis(500),
            field_transition_settle: Duration::from_secs(2),
            credential_char_delay: Duration::from_millis(150),
            command_char_delay: Duration::from_millis(50),
            pre_submit_settle: Duration::from_secs(1),
            post_submit_wait: Duration::from_secs(15),
            run_dialog_settle: Duration::from_secs(3),
            shell_launch_wait: Duration::from_secs(20),
            inner_shell_wait: Duration::from_secs(10),
            command_output_wait: Duration::from_secs(4),
            window_close_settle: Duration::from_secs(2),
            step_delay: Duration::from_secs(3),
            inter_run_pause: Duration::from_secs(5),
            vm_poll_interval: Duration::from_secs(5),
        }
    }
}

impl Pacing {
    /// Pacing with all delays collapsed to zero, for tests and dry runs.
    pub fn instant() -> Self {
        Self {
            connect_settle: Duration::ZERO,
            desktop_boot_wait: Duration::ZERO,
            login_poll_interval: Duration::ZERO,
            wake_settle: Duration::ZERO,
            focus_settle: Duration::ZERO,
            escape_settle: Duration::ZERO,
            user_switch_click_interval: Duration::ZERO,
            user_switch_wait: Duration::ZERO,
            clear_settle: Duration::ZERO,
            field_transition_settle: Duration::ZERO,
            credential_char_delay: Duration::ZERO,
            command_char_delay: Duration::ZERO,
            pre_submit_settle: Duration::ZERO,
            post_submit_wait: Duration::ZERO,
            run_dialog_settle: Duration::ZERO,
            shell_launch_wait: Duration::ZERO,
            inner_shell_wait: Duration::ZERO,
            command_output_wait: Duration::ZERO,
            window_close_settle: Duration::ZERO,
            step_delay: Duration::ZERO,
            inter_run_pause: Duration::ZERO,
            vm_poll_interval: Duration::ZERO,
        }
    }
}
