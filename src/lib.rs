//! restore-verify - unattended disaster-recovery restore verification.
//!
//! This crate provides:
//! - A restore provider client to boot an isolated VM from the latest snapshot
//! - A remote-console abstraction over a pixel-only display transport
//! - A vision-oracle adapter turning model prose into structured verdicts
//! - Login and interactive command protocols with bounded, verified retries
//! - An orchestrator producing a full audit trail (steps, actions, screenshots)
//!
//! # Example
//!
//! ```rust,no_run
//! use restore_verify::config::Config;
//! use restore_verify::display::SyntheticConnector;
//! use restore_verify::oracle::{HttpOracle, OracleAdapter};
//! use restore_verify::orchestrator::{RunOptions, Runner};
//! use restore_verify::provider::HttpProvider;
//!
//! let config = Config::from_env();
//! let provider = HttpProvider::new(&config.provider.endpoint, &config.provider.api_key);
//! let oracle = OracleAdapter::new(Box::new(HttpOracle::default()));
//! let connector = SyntheticConnector::new(1280, 720);
//!
//! let runner = Runner::new(&provider, &oracle, &connector, config);
//! let outcome = runner.run_verification(&RunOptions::default());
//! println!("success: {}", outcome.success);
//! ```

pub mod config;
pub mod display;
pub mod geometry;
pub mod logger;
pub mod oracle;
pub mod orchestrator;
pub mod protocol;
pub mod provider;
pub mod report;
pub mod session;

// Re-export orchestrator types
pub use orchestrator::{RunOptions, RunOutcome, Runner};

// Re-export protocol types
pub use protocol::{CancelToken, DebugOptions, ProtocolError, StepResult};

// Re-export capability seams
pub use display::{DisplayConnector, DisplayDriver, RemoteConsole};
pub use oracle::{OracleAdapter, OracleTransport, Verdict};
pub use provider::{RestoreProvider, SnapshotInfo, VmHandle};

// Re-export session records
pub use session::{ActionLogEntry, RunSession, ScreenshotRecord};
