//! Step orchestrator: the full verification run lifecycle.
//!
//! Sequences snapshot lookup, VM provisioning, display connection, the login
//! protocol and the command/custom steps, then tears the VM down — always,
//! exactly once, on every exit path. Whatever was gathered before a failure
//! (steps, screenshots, action log) is returned for reporting; a login
//! failure is distinguished from other failures so callers can branch on it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Config, Pacing};
use crate::display::{DisplayConnector, RemoteConsole};
use crate::geometry::CoordinateProfile;
use crate::oracle::OracleAdapter;
use crate::protocol::command::{run_custom_step, run_shell_command};
use crate::protocol::login::LoginProtocol;
use crate::protocol::{CancelToken, DebugOptions, ProtocolError, RunContext, StepResult};
use crate::provider::{AgentInfo, RestoreProvider, SnapshotInfo, VmHandle};
use crate::session::{ActionLogEntry, RunSession, ScreenshotRecord};

/// Per-run options beyond the static configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict snapshot lookup to one agent
    pub agent_id: Option<String>,
    /// Literal shell commands to execute after login
    pub commands: Vec<String>,
    /// Free-text custom steps, translated by the text oracle
    pub custom_steps: Vec<String>,
    /// Debug affordances
    pub debug: DebugOptions,
}

/// Everything one verification run produced
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub login_failed: bool,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmHandle>,
    pub steps: Vec<StepResult>,
    pub screenshots: Vec<ScreenshotRecord>,
    pub action_log: Vec<ActionLogEntry>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunOutcome {
    fn failed_early(started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            success: false,
            login_failed: false,
            cancelled: false,
            error: Some(error),
            agent_id: None,
            snapshot: None,
            agent: None,
            vm: None,
            steps: Vec::new(),
            screenshots: Vec::new(),
            action_log: Vec::new(),
            started_at,
            ended_at: Utc::now(),
        }
    }
}

/// What driving the connected session produced (inner portion of a run)
struct DriveResult {
    steps: Vec<StepResult>,
    screenshots: Vec<ScreenshotRecord>,
    action_log: Vec<ActionLogEntry>,
    login_failed: bool,
    cancelled: bool,
    error: Option<String>,
}

/// Owns the capabilities and sequences verification runs
pub struct Runner<'a> {
    provider: &'a dyn RestoreProvider,
    oracle: &'a OracleAdapter,
    connector: &'a dyn DisplayConnector,
    config: Config,
    pacing: Pacing,
    profile: CoordinateProfile,
    cancel: CancelToken,
}

impl<'a> Runner<'a> {
    pub fn new(
        provider: &'a dyn RestoreProvider,
        oracle: &'a OracleAdapter,
        connector: &'a dyn DisplayConnector,
        config: Config,
    ) -> Self {
        Self {
            provider,
            oracle,
            connector,
            config,
            pacing: Pacing::default(),
            profile: CoordinateProfile::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn profile(mut self, profile: CoordinateProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Install a shared cancellation token; cancelling it aborts the current
    /// attempt, tears down and yields a cancelled outcome.
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the complete verification workflow for one snapshot.
    pub fn run_verification(&self, options: &RunOptions) -> RunOutcome {
        let started_at = Utc::now();
        log::info!("Starting VM verification workflow");

        // Step 1: latest snapshot
        let snapshot = match self.provider.latest_snapshot(options.agent_id.as_deref()) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return RunOutcome::failed_early(started_at, "No snapshots available".into()),
            Err(e) => return RunOutcome::failed_early(started_at, e.to_string()),
        };
        log::info!(
            "Using snapshot: {} from {}",
            snapshot.snapshot_id,
            snapshot.backup_ended_at.as_deref().unwrap_or("unknown time")
        );

        // Agent details are for reporting only; a miss is not fatal
        let agent = snapshot.agent_id.as_deref().and_then(|agent_id| {
            match self.provider.agent_details(agent_id) {
                Ok(agent) => {
                    log::info!(
                        "Agent: {} ({})",
                        agent.hostname.as_deref().unwrap_or("Unknown"),
                        agent.os.as_deref().unwrap_or("Unknown OS")
                    );
                    Some(agent)
                }
                Err(e) => {
                    log::warn!("Could not fetch agent details: {}", e);
                    None
                }
            }
        });

        // Step 2: create the VM (network-isolated; it starts automatically)
        let device_id = match snapshot.pick_device() {
            Ok(device_id) => device_id.to_string(),
            Err(e) => return RunOutcome::failed_early(started_at, e.to_string()),
        };
        let vm_name = format!(
            "verify_{}_{}",
            snapshot.snapshot_id,
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let vm = match self
            .provider
            .create_vm(&snapshot.snapshot_id, &device_id, "network-none", &vm_name)
        {
            Ok(vm) => vm,
            Err(e) => return RunOutcome::failed_early(started_at, e.to_string()),
        };

        // Steps 3-5 run against the live VM; teardown happens regardless
        let drive = self.drive(&vm, options);

        log::info!("Cleaning up - destroying VM {}", vm.virt_id);
        if !self.provider.destroy_vm(&vm) {
            log::warn!("Failed to destroy VM {}", vm.virt_id);
        }

        let success = !drive.login_failed && !drive.cancelled && drive.error.is_none();
        if success {
            log::info!("Verification completed successfully");
        } else if drive.login_failed {
            log::error!("Verification FAILED - login unsuccessful");
        }

        RunOutcome {
            success,
            login_failed: drive.login_failed,
            cancelled: drive.cancelled,
            error: drive.error,
            agent_id: options
                .agent_id
                .clone()
                .or_else(|| snapshot.agent_id.clone()),
            snapshot: Some(snapshot),
            agent,
            vm: Some(vm),
            steps: drive.steps,
            screenshots: drive.screenshots,
            action_log: drive.action_log,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Drive the protocols directly against the configured connector,
    /// without provisioning a VM. Used for smoke runs against the synthetic
    /// console to exercise the full pipeline (oracle included) offline.
    pub fn run_without_vm(&self, options: &RunOptions) -> RunOutcome {
        let started_at = Utc::now();
        log::info!("Starting verification against a pre-connected display (no VM lifecycle)");

        let result = DriveResult {
            steps: Vec::new(),
            screenshots: Vec::new(),
            action_log: Vec::new(),
            login_failed: false,
            cancelled: false,
            error: None,
        };
        let drive = self.drive_display("synthetic://console", options, result);

        RunOutcome {
            success: !drive.login_failed && !drive.cancelled && drive.error.is_none(),
            login_failed: drive.login_failed,
            cancelled: drive.cancelled,
            error: drive.error,
            agent_id: options.agent_id.clone(),
            snapshot: None,
            agent: None,
            vm: None,
            steps: drive.steps,
            screenshots: drive.screenshots,
            action_log: drive.action_log,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Wait for the VM, connect the display and run the protocols.
    /// Never panics past this point; partial artifacts always come back.
    fn drive(&self, vm: &VmHandle, options: &RunOptions) -> DriveResult {
        let mut result = DriveResult {
            steps: Vec::new(),
            screenshots: Vec::new(),
            action_log: Vec::new(),
            login_failed: false,
            cancelled: false,
            error: None,
        };

        let cancel = self.cancel.clone();
        let is_cancelled = move || cancel.is_cancelled();

        log::info!("Waiting for VM to be ready (starts automatically)...");
        match self.provider.wait_until_ready(
            vm,
            std::time::Duration::from_secs(self.config.run.boot_timeout),
            self.pacing.vm_poll_interval,
            &is_cancelled,
        ) {
            Ok(true) => {}
            Ok(false) => {
                if self.cancel.is_cancelled() {
                    result.cancelled = true;
                } else {
                    result.error = Some("VM failed to become ready within timeout".into());
                }
                return result;
            }
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        }

        let url = match self.provider.display_url(vm) {
            Ok(url) => url,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };

        self.drive_display(&url, options, result)
    }

    /// Connect the display at `url` and run the protocols, accumulating
    /// artifacts into `result`.
    fn drive_display(&self, url: &str, options: &RunOptions, mut result: DriveResult) -> DriveResult {
        let cancel = self.cancel.clone();
        let is_cancelled = move || cancel.is_cancelled();

        let session = match RunSession::new(&self.config.output.screenshot_dir) {
            Ok(session) => session,
            Err(e) => {
                result.error = Some(format!("Failed to create session directory: {}", e));
                return result;
            }
        };

        log::info!("Connecting to VM display");
        let driver = match self
            .connector
            .connect(url, self.pacing.connect_settle, &is_cancelled)
        {
            Ok(driver) => driver,
            Err(e) => {
                result.error = Some(e.to_string());
                let (screenshots, action_log) = session.into_records();
                result.screenshots = screenshots;
                result.action_log = action_log;
                return result;
            }
        };
        let console = match RemoteConsole::new(driver) {
            Ok(console) => console,
            Err(e) => {
                result.error = Some(e.to_string());
                let (screenshots, action_log) = session.into_records();
                result.screenshots = screenshots;
                result.action_log = action_log;
                return result;
            }
        };

        let mut ctx = RunContext {
            console,
            oracle: self.oracle,
            session,
            pacing: self.pacing.clone(),
            profile: self.profile.clone(),
            credentials: self.config.credentials.clone(),
            run: self.config.run.clone(),
            debug: options.debug.clone(),
            cancel: self.cancel.clone(),
        };

        self.run_protocols(&mut ctx, options, &mut result);

        let (screenshots, action_log) = ctx.session.into_records();
        result.screenshots = screenshots;
        result.action_log = action_log;
        result
    }

    fn run_protocols(&self, ctx: &mut RunContext, options: &RunOptions, result: &mut DriveResult) {
        let _ = ctx.capture("01_connected");
        result.steps.push(StepResult::ok(1, "Connected to VM via remote display"));

        // Blanket settle for guest boot; a positive readiness check can
        // replace this wait without touching the sequence
        log::info!("Waiting for the guest desktop to settle");
        if ctx.pause(ctx.pacing.desktop_boot_wait).is_err() {
            result.cancelled = true;
            return;
        }
        let _ = ctx.capture("02_desktop");
        result.steps.push(StepResult::ok(2, "Guest console settle wait complete"));

        // Login
        let username = self.config.credentials.username.clone();
        let mut login = LoginProtocol::new();
        match login.run(ctx) {
            Ok(()) => {
                result.steps.push(StepResult::ok(
                    3,
                    format!("Login as {} (verified by oracle)", username),
                ));
            }
            Err(ProtocolError::Cancelled) => {
                result.cancelled = true;
                result
                    .steps
                    .push(StepResult::failed(3, format!("Login as {}", username), "run cancelled"));
                return;
            }
            Err(e) => {
                result.login_failed = true;
                result.error = Some(e.to_string());
                result.steps.push(StepResult::failed(
                    3,
                    format!("Login as {} FAILED", username),
                    e.to_string(),
                ));
                log::error!(
                    "Login failed - a failure report will carry {} screenshots",
                    ctx.session.screenshots().len()
                );
                return;
            }
        }

        // Shell commands
        let mut step_number = result.steps.len();
        for (i, command) in options.commands.iter().enumerate() {
            step_number += 1;
            log::info!("Running shell command {}/{}: {}", i + 1, options.commands.len(), command);
            match run_shell_command(ctx, command) {
                Ok(true) => {
                    result
                        .steps
                        .push(StepResult::ok(step_number, format!("Execute command: {}", command)));
                }
                Ok(false) => {
                    result.steps.push(StepResult::failed(
                        step_number,
                        format!("Execute command: {}", command),
                        "command reported errors after all attempts",
                    ));
                }
                Err(e) => {
                    self.record_hard_failure(result, step_number, command, e);
                    return;
                }
            }
        }

        // Custom steps
        for (i, task) in options.custom_steps.iter().enumerate() {
            step_number += 1;
            match run_custom_step(ctx, step_number, i + 1, task) {
                Ok(step) => result.steps.push(step),
                Err(e) => {
                    self.record_hard_failure(result, step_number, task, e);
                    return;
                }
            }
            if ctx.pause(ctx.pacing.step_delay).is_err() {
                result.cancelled = true;
                return;
            }
        }
    }

    fn record_hard_failure(
        &self,
        result: &mut DriveResult,
        step_number: usize,
        what: &str,
        error: ProtocolError,
    ) {
        match error {
            ProtocolError::Cancelled => {
                result.cancelled = true;
                result.steps.push(StepResult::failed(
                    step_number,
                    what.to_string(),
                    "run cancelled",
                ));
            }
            e => {
                result.error = Some(e.to_string());
                result
                    .steps
                    .push(StepResult::failed(step_number, what.to_string(), e.to_string()));
                log::error!("Aborting remaining steps: {}", e);
            }
        }
    }

    /// Verify the most recent snapshot of every agent, sequentially, with a
    /// short pause between runs. A failed run never stops the batch.
    pub fn run_all_agents(&self, base_options: &RunOptions) -> Vec<RunOutcome> {
        log::info!("Running verification for all agents");

        let snapshots = match self.provider.latest_snapshots_by_agent() {
            Ok(snapshots) => snapshots,
            Err(e) => {
                log::error!("Could not enumerate snapshots: {}", e);
                return Vec::new();
            }
        };
        if snapshots.is_empty() {
            log::error!("No snapshots found for any agents");
            return Vec::new();
        }
        log::info!("Found {} agents to verify", snapshots.len());

        let mut outcomes = Vec::new();
        let total = snapshots.len();
        for (i, snapshot) in snapshots.into_iter().enumerate() {
            let Some(agent_id) = snapshot.agent_id.clone() else {
                continue;
            };
            log::info!("Starting verification for agent: {}", agent_id);
            log::info!("Snapshot: {}", snapshot.snapshot_id);

            let mut options = base_options.clone();
            options.agent_id = Some(agent_id);
            outcomes.push(self.run_verification(&options));

            if self.cancel.is_cancelled() {
                log::warn!("Batch cancelled after {} of {} agents", i + 1, total);
                break;
            }
            if i + 1 < total {
                log::info!("Pausing briefly before next agent...");
                std::thread::sleep(self.pacing.inter_run_pause);
            }
        }

        let successful = outcomes.iter().filter(|o| o.success).count();
        log::info!("All agent verifications complete");
        log::info!("Results: {}/{} agents verified successfully", successful, outcomes.len());
        for outcome in &outcomes {
            log::info!(
                "  [{}] Agent {}: {}",
                if outcome.success { "OK" } else { "FAIL" },
                outcome.agent_id.as_deref().unwrap_or("unknown"),
                outcome
                    .snapshot
                    .as_ref()
                    .map(|s| s.snapshot_id.as_str())
                    .unwrap_or("N/A"),
            );
        }
        outcomes
    }
}
