//! End-to-end orchestrator runs with scripted capabilities: provider,
//! oracle and the synthetic console.

mod common;

use common::{ScriptedOracle, ScriptedProvider, fields_reply, verdict_reply};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use restore_verify::config::{Config, Pacing};
use restore_verify::display::SyntheticConnector;
use restore_verify::oracle::OracleAdapter;
use restore_verify::orchestrator::{RunOptions, Runner};
use restore_verify::protocol::CancelToken;
use restore_verify::report::ReportGenerator;

const LOGIN_SCREEN_PATTERN: &str = "login screen showing username and password";
const FIELDS_PATTERN: &str = "CURRENTLY EDITABLE";

fn test_config(screenshot_dir: &std::path::Path) -> Config {
    let mut config = Config::defaults();
    config.credentials.username = "Administrator".to_string();
    config.credentials.password = "Secr3t!".to_string();
    config.output.screenshot_dir = screenshot_dir.to_string_lossy().into_owned();
    config
}

#[test]
fn test_full_run_succeeds_and_tears_down_exactly_once() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let oracle = OracleAdapter::new(Box::new(
        ScriptedOracle::new()
            .on(FIELDS_PATTERN, &fields_reply(false, true, None, "Password prompt."))
            .on("Convert the following task description", "Get-Date"),
    ));
    let connector = SyntheticConnector::new(1280, 720);

    let runner = Runner::new(&provider, &oracle, &connector, test_config(dir.path()))
        .pacing(Pacing::instant());

    let options = RunOptions {
        commands: vec!["Get-Service | Select-Object -First 5".to_string()],
        custom_steps: vec!["check the current time".to_string()],
        ..Default::default()
    };
    let outcome = runner.run_verification(&options);

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert!(!outcome.login_failed);
    assert_eq!(provider.destroy_count(), 1);

    // Steps: connected, settle, login, one command, one custom step
    assert_eq!(outcome.steps.len(), 5);
    assert!(outcome.steps.iter().all(|s| s.success));
    assert!(outcome.steps[2].description.contains("Login as Administrator"));

    // The audit trail is populated and ordered
    assert!(!outcome.screenshots.is_empty());
    assert!(!outcome.action_log.is_empty());
    let ids: Vec<usize> = outcome.screenshots.iter().map(|s| s.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_login_timeout_yields_login_failed_with_the_audit_trail() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let oracle = OracleAdapter::new(Box::new(ScriptedOracle::new().on(
        LOGIN_SCREEN_PATTERN,
        &verdict_reply(false, "high", "A black screen, nothing visible."),
    )));
    let connector = SyntheticConnector::new(1280, 720);

    let runner = Runner::new(&provider, &oracle, &connector, test_config(dir.path()))
        .pacing(Pacing::instant());

    let outcome = runner.run_verification(&RunOptions {
        commands: vec!["Get-Date".to_string()],
        ..Default::default()
    });

    assert!(!outcome.success);
    assert!(outcome.login_failed);
    assert!(outcome.error.is_some());
    // Teardown still ran, exactly once
    assert_eq!(provider.destroy_count(), 1);
    // Partial artifacts survive for failure diagnosis
    assert!(!outcome.action_log.is_empty());
    assert!(!outcome.screenshots.is_empty());
    // The command step never ran after the failed login
    assert_eq!(outcome.steps.len(), 3);
    assert!(!outcome.steps[2].success);
    assert!(outcome.steps[2].error.is_some());
}

#[test]
fn test_failed_command_is_a_failed_step_not_a_failed_run() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let oracle = OracleAdapter::new(Box::new(
        ScriptedOracle::new()
            .on(FIELDS_PATTERN, &fields_reply(false, true, None, "Password prompt."))
            .on(
                "PowerShell output after executing",
                &verdict_reply(false, "high", "Red text indicating a failure."),
            ),
    ));
    let connector = SyntheticConnector::new(1280, 720);

    let runner = Runner::new(&provider, &oracle, &connector, test_config(dir.path()))
        .pacing(Pacing::instant());

    let outcome = runner.run_verification(&RunOptions {
        commands: vec!["Get-BrokenThing".to_string()],
        ..Default::default()
    });

    // The run itself completed; the failed command is a failed step
    assert!(outcome.success);
    let command_step = outcome.steps.last().unwrap();
    assert!(!command_step.success);
    assert!(command_step.error.as_deref().unwrap_or("").contains("errors"));
    assert_eq!(provider.destroy_count(), 1);
}

#[test]
fn test_cancelled_run_surfaces_cancelled_and_still_tears_down() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let oracle = OracleAdapter::new(Box::new(ScriptedOracle::new()));
    let connector = SyntheticConnector::new(1280, 720);

    let cancel = CancelToken::new();
    cancel.cancel();
    let runner = Runner::new(&provider, &oracle, &connector, test_config(dir.path()))
        .pacing(Pacing::instant())
        .cancel_token(cancel);

    let outcome = runner.run_verification(&RunOptions::default());

    assert!(!outcome.success);
    assert!(outcome.cancelled);
    assert!(!outcome.login_failed);
    assert_eq!(provider.destroy_count(), 1);
}

#[test]
fn test_synthetic_smoke_run_skips_the_vm_lifecycle() {
    let dir = tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let oracle = OracleAdapter::new(Box::new(
        ScriptedOracle::new().on(FIELDS_PATTERN, &fields_reply(false, true, None, "Password prompt.")),
    ));
    let connector = SyntheticConnector::new(1280, 720);

    let runner = Runner::new(&provider, &oracle, &connector, test_config(dir.path()))
        .pacing(Pacing::instant());

    let outcome = runner.run_without_vm(&RunOptions::default());

    assert!(outcome.success);
    assert!(outcome.vm.is_none());
    assert_eq!(provider.destroy_count(), 0);
}

#[test]
fn test_reports_render_from_an_outcome() {
    let screenshot_dir = tempdir().unwrap();
    let report_dir = tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let oracle = OracleAdapter::new(Box::new(
        ScriptedOracle::new().on(FIELDS_PATTERN, &fields_reply(false, true, None, "Password prompt.")),
    ));
    let connector = SyntheticConnector::new(1280, 720);

    let runner = Runner::new(&provider, &oracle, &connector, test_config(screenshot_dir.path()))
        .pacing(Pacing::instant());
    let outcome = runner.run_verification(&RunOptions::default());

    let generator = ReportGenerator::new(report_dir.path());
    let paths = generator.generate(&outcome, Some("All steps completed.")).unwrap();

    assert!(paths.json.exists());
    assert!(paths.html.exists());

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.json).unwrap()).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["login_failed"], false);
    assert!(json["steps"].as_array().unwrap().len() >= 3);

    let html = std::fs::read_to_string(&paths.html).unwrap();
    assert!(html.contains("Restore verification report"));
    assert!(html.contains("data:image/png;base64,"));
}
