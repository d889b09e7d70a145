use std::time::Duration;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use restore_verify::config::Config;
use restore_verify::display::{
    DisplayConnector, DisplayDriver, DisplayError, DisplayResult, SyntheticConnector,
};
use restore_verify::logger;
use restore_verify::oracle::client::OracleConfig;
use restore_verify::oracle::{HttpOracle, OracleAdapter, check_health};
use restore_verify::orchestrator::{RunOptions, RunOutcome, Runner};
use restore_verify::protocol::DebugOptions;
use restore_verify::provider::{HttpProvider, RestoreProvider};
use restore_verify::report::{ReportGenerator, quick_summary};

/// restore-verify - automated disaster-recovery restore verification
#[derive(Parser, Debug)]
#[command(
    name = "restore-verify",
    about = "Boot a restore VM from the latest snapshot and verify it end to end through its console",
    after_help = "ENVIRONMENT VARIABLES:\n\
        RESTORE_VERIFY_PROVIDER_ENDPOINT   Restore provider API base URL\n\
        RESTORE_VERIFY_PROVIDER_API_KEY    Restore provider API key\n\
        RESTORE_VERIFY_ORACLE_ENDPOINT     Oracle chat-completions URL\n\
        RESTORE_VERIFY_ORACLE_API_KEY      Oracle API key\n\
        RESTORE_VERIFY_ORACLE_MODEL        Oracle model name\n\
        RESTORE_VERIFY_USERNAME            Guest OS username\n\
        RESTORE_VERIFY_PASSWORD            Guest OS password\n\
        RESTORE_VERIFY_SCREENSHOT_DIR      Screenshot output directory\n\
        RESTORE_VERIFY_REPORT_DIR          Report output directory"
)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run verification for one agent (or the latest snapshot overall)
    Run {
        /// Agent ID to filter snapshots (omit to use the latest snapshot)
        #[arg(long, env = "RESTORE_VERIFY_AGENT_ID")]
        agent_id: Option<String>,

        /// Guest username (overrides RESTORE_VERIFY_USERNAME)
        #[arg(long)]
        username: Option<String>,

        /// Guest password (overrides RESTORE_VERIFY_PASSWORD)
        #[arg(long)]
        password: Option<String>,

        /// Shell command to run after login (repeatable)
        #[arg(long = "command")]
        commands: Vec<String>,

        /// Custom verification steps, comma-separated free text
        #[arg(long)]
        steps: Option<String>,

        /// Log password characters as they are typed (debugging)
        #[arg(long)]
        show_password: bool,

        /// Pause after typing the password for manual inspection
        #[arg(long)]
        pause: bool,

        /// Duration of that pause in seconds
        #[arg(long, default_value = "30")]
        pause_duration: u64,

        /// Drive the built-in synthetic console instead of a real VM
        /// (smoke-tests the whole pipeline, oracle included)
        #[arg(long)]
        synthetic: bool,

        /// Print the outcome as JSON instead of the text summary
        #[arg(long)]
        json: bool,
    },

    /// Run verification for the most recent snapshot of every agent
    Batch {
        /// Shell command to run after login (repeatable)
        #[arg(long = "command")]
        commands: Vec<String>,

        /// Custom verification steps, comma-separated free text
        #[arg(long)]
        steps: Option<String>,
    },

    /// Check provider and oracle connectivity and list available resources
    Probe,

    /// List the most recent snapshot for each agent
    Snapshots,
}

/// Placeholder connector for deployments without a display transport
/// compiled in. Fails with a message naming the gap; the VM lifecycle and
/// teardown still run so the wiring can be exercised.
struct NoTransport;

impl DisplayConnector for NoTransport {
    fn connect(
        &self,
        _url: &str,
        _settle: Duration,
        _is_cancelled: &dyn Fn() -> bool,
    ) -> DisplayResult<Box<dyn DisplayDriver>> {
        Err(DisplayError::Connection(
            "no remote-display transport configured; implement DisplayDriver for your viewer \
             or use --synthetic"
                .to_string(),
        ))
    }
}

fn main() {
    let args = Args::parse();
    logger::init(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });

    let mut config = Config::from_env();

    let exit_code = match args.command {
        Commands::Run {
            agent_id,
            username,
            password,
            commands,
            steps,
            show_password,
            pause,
            pause_duration,
            synthetic,
            json,
        } => {
            if let Some(username) = username {
                log::info!("Using username from command line: {}", username);
                config.credentials.username = username;
            }
            if let Some(password) = password {
                log::info!("Using password from command line");
                config.credentials.password = password;
            }
            if config.credentials.password.is_empty() {
                log::warn!("No guest password configured (RESTORE_VERIFY_PASSWORD)");
            }

            let options = RunOptions {
                agent_id,
                commands,
                custom_steps: parse_steps(steps.as_deref()),
                debug: DebugOptions {
                    show_password,
                    pause_before_submit: pause,
                    pause_duration: Duration::from_secs(pause_duration),
                },
            };

            let oracle = build_oracle(&config);
            let provider = HttpProvider::new(&config.provider.endpoint, &config.provider.api_key);

            let outcome = if synthetic {
                let connector = SyntheticConnector::new(1280, 720);
                let runner = Runner::new(&provider, &oracle, &connector, config.clone());
                runner.run_without_vm(&options)
            } else {
                let connector = NoTransport;
                let runner = Runner::new(&provider, &oracle, &connector, config.clone());
                runner.run_verification(&options)
            };

            finish_run(&config, &oracle, &outcome, json);
            if outcome.success { 0 } else { 1 }
        }

        Commands::Batch { commands, steps } => {
            if config.credentials.password.is_empty() {
                log::warn!("No guest password configured (RESTORE_VERIFY_PASSWORD)");
            }
            let options = RunOptions {
                agent_id: None,
                commands,
                custom_steps: parse_steps(steps.as_deref()),
                debug: DebugOptions::default(),
            };

            let oracle = build_oracle(&config);
            let provider = HttpProvider::new(&config.provider.endpoint, &config.provider.api_key);
            let connector = NoTransport;
            let runner = Runner::new(&provider, &oracle, &connector, config.clone());

            let outcomes = runner.run_all_agents(&options);
            for outcome in &outcomes {
                finish_run(&config, &oracle, outcome, false);
            }
            // The batch counts as a success if at least one agent verified
            if outcomes.iter().any(|o| o.success) { 0 } else { 1 }
        }

        Commands::Probe => probe(&config),

        Commands::Snapshots => {
            let provider = HttpProvider::new(&config.provider.endpoint, &config.provider.api_key);
            match provider.latest_snapshots_by_agent() {
                Ok(snapshots) => {
                    println!("Latest snapshot per agent:");
                    for snapshot in snapshots {
                        println!(
                            "  {}  agent={}  ended={}",
                            snapshot.snapshot_id,
                            snapshot.agent_id.as_deref().unwrap_or("unknown"),
                            snapshot.backup_ended_at.as_deref().unwrap_or("unknown"),
                        );
                    }
                    0
                }
                Err(e) => {
                    eprintln!("Failed to list snapshots: {}", e);
                    1
                }
            }
        }
    };

    std::process::exit(exit_code);
}

fn build_oracle(config: &Config) -> OracleAdapter {
    let oracle_config = OracleConfig::new(&config.oracle.endpoint)
        .api_key(&config.oracle.api_key)
        .model(&config.oracle.model)
        .max_tokens(config.oracle.max_tokens)
        .activity_timeout(config.oracle.activity_timeout);
    OracleAdapter::new(Box::new(HttpOracle::new(oracle_config)))
}

fn parse_steps(steps: Option<&str>) -> Vec<String> {
    steps
        .map(|s| {
            s.split(',')
                .map(|step| step.trim().to_string())
                .filter(|step| !step.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Generate reports and print the closing summary for one outcome
fn finish_run(config: &Config, oracle: &OracleAdapter, outcome: &RunOutcome, json: bool) {
    let summary = oracle.summarize_run(&outcome.steps, outcome.screenshots.len());

    let generator = ReportGenerator::new(&config.output.report_dir);
    match generator.generate(outcome, summary.as_deref()) {
        Ok(paths) => {
            log::info!("HTML report: {}", paths.html.display());
            log::info!("JSON report: {}", paths.json.display());
        }
        Err(e) => log::error!("Failed to generate reports: {}", e),
    }

    if json {
        match serde_json::to_string_pretty(outcome) {
            Ok(text) => println!("{}", text),
            Err(e) => log::error!("Failed to serialize outcome: {}", e),
        }
    } else {
        println!("{}", quick_summary(&outcome.steps, Some(outcome.ended_at - outcome.started_at)));
    }
}

/// Connectivity diagnostics for the provider and the oracle
fn probe(config: &Config) -> i32 {
    println!("{}", "=".repeat(70));
    println!("restore-verify connectivity probe");
    println!("{}", "=".repeat(70));
    println!("Provider endpoint: {}", config.provider.endpoint);
    println!(
        "Provider API key:  {}",
        if config.provider.api_key.is_empty() { "NOT SET" } else { "set" }
    );
    println!("Oracle endpoint:   {}", config.oracle.endpoint);
    println!("Oracle model:      {}", config.oracle.model);
    println!();

    match check_health(&config.oracle.endpoint, 5) {
        Ok(true) => println!("[OK] Oracle endpoint is reachable"),
        Ok(false) | Err(_) => println!("[WARN] Oracle endpoint is not responding"),
    }

    let provider = HttpProvider::new(&config.provider.endpoint, &config.provider.api_key);

    match provider.list_agents() {
        Ok(agents) => {
            println!("[OK] Found {} agents", agents.len());
            for agent in &agents {
                println!(
                    "  {}  host={}  os={}",
                    agent.agent_id,
                    agent.hostname.as_deref().unwrap_or("N/A"),
                    agent.os.as_deref().unwrap_or("N/A"),
                );
            }
        }
        Err(e) => {
            println!("[FAIL] Could not list agents: {}", e);
            println!("Check the API key and endpoint configuration.");
            return 1;
        }
    }

    match provider.latest_snapshots_by_agent() {
        Ok(snapshots) if snapshots.is_empty() => {
            println!("[WARN] No snapshots found; nothing to verify yet");
        }
        Ok(snapshots) => {
            println!("[OK] Latest snapshots:");
            for snapshot in &snapshots {
                println!(
                    "  {}  agent={}  ended={}",
                    snapshot.snapshot_id,
                    snapshot.agent_id.as_deref().unwrap_or("unknown"),
                    snapshot.backup_ended_at.as_deref().unwrap_or("unknown"),
                );
            }
        }
        Err(e) => {
            println!("[FAIL] Could not list snapshots: {}", e);
            return 1;
        }
    }

    println!();
    println!("Probe complete. Use `restore-verify run --agent-id <id>` to verify one agent,");
    println!("or `restore-verify batch` for all agents.");
    0
}
