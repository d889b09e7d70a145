//! Integration tests for the interactive command protocol.

mod common;

use std::path::Path;

use common::{ScriptedOracle, verdict_reply};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use restore_verify::config::{CredentialSettings, Pacing, RunSettings};
use restore_verify::display::synthetic::{GuestStage, InputEvent, SyntheticConsole};
use restore_verify::display::RemoteConsole;
use restore_verify::oracle::OracleAdapter;
use restore_verify::protocol::command::{run_custom_step, run_shell_command};
use restore_verify::protocol::{CancelToken, DebugOptions, ProtocolError, RunContext};
use restore_verify::session::RunSession;

const RUN_DIALOG_PATTERN: &str = "Run dialog box is open";
const OUTPUT_PATTERN: &str = "PowerShell output after executing";
const TRANSLATE_PATTERN: &str = "Convert the following task description";

fn context<'a>(adapter: &'a OracleAdapter, console: SyntheticConsole, dir: &Path) -> RunContext<'a> {
    RunContext {
        console: RemoteConsole::new(Box::new(console)).expect("console"),
        oracle: adapter,
        session: RunSession::new(dir).expect("session"),
        pacing: Pacing::instant(),
        profile: Default::default(),
        credentials: CredentialSettings {
            username: "Administrator".to_string(),
            password: "pw".to_string(),
        },
        run: RunSettings::defaults(),
        debug: DebugOptions::default(),
        cancel: CancelToken::new(),
    }
}

#[test]
fn test_negated_error_phrase_is_not_a_failure() {
    let dir = tempdir().unwrap();
    // The description contains the substring "error" but only inside a
    // negation; the command must classify as clean
    let oracle = ScriptedOracle::new().on(
        OUTPUT_PATTERN,
        &verdict_reply(false, "medium", "Output is visible with no errors detected."),
    );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::Desktop);
    let mut ctx = context(&adapter, console, dir.path());

    let clean = run_shell_command(&mut ctx, "Get-Service | Select-Object -First 5").unwrap();
    assert!(clean, "negated error phrase must not consume retries");
}

#[test]
fn test_persistent_error_exhausts_exactly_max_retries_attempts() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new().on(
        OUTPUT_PATTERN,
        &verdict_reply(false, "high", "Red text indicating a failure fills the window."),
    );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::Desktop);
    let recorder = console.recorder();
    let mut ctx = context(&adapter, console, dir.path());
    ctx.run.max_retries = 2;

    let clean = run_shell_command(&mut ctx, "Get-BrokenThing").unwrap();
    assert!(!clean);

    // Attempted exactly twice, then reported as failed
    let output_checks = ctx
        .session
        .screenshots()
        .iter()
        .filter(|s| s.label.contains("10_command_output"))
        .count();
    assert_eq!(output_checks, 2);

    // The failing shell window was closed before each retry
    let closes = recorder
        .events()
        .iter()
        .filter(|e| matches!(e, InputEvent::Key(k) if k == "Alt+F4"))
        .count();
    assert_eq!(closes, 2);
}

#[test]
fn test_command_types_shifted_characters_through_the_modifier() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new();
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::Desktop);
    let recorder = console.recorder();
    let mut ctx = context(&adapter, console, dir.path());

    run_shell_command(&mut ctx, "Get-PSDrive C | Select-Object Used,Free").unwrap();

    // The pipe requires Shift over the raw-key transport
    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(e, InputEvent::KeyDown(k) if k == "Shift")));
    // The base key for '|' is the backslash
    assert!(events.contains(&InputEvent::Text("\\".to_string())));
}

#[test]
fn test_lock_screen_short_circuits_as_a_hard_failure() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new().on(
        RUN_DIALOG_PATTERN,
        &verdict_reply(false, "high", "A lock screen asking to press Ctrl+Alt+Delete."),
    );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::Desktop);
    let mut ctx = context(&adapter, console, dir.path());
    ctx.run.max_retries = 2;

    let result = run_shell_command(&mut ctx, "Get-Date");
    assert!(matches!(result, Err(ProtocolError::ScreenLocked(_))));

    // A hard failure never consumes retries
    let dialog_checks = ctx
        .session
        .screenshots()
        .iter()
        .filter(|s| s.label.contains("09_run_dialog_opened"))
        .count();
    assert_eq!(dialog_checks, 1);
}

#[test]
fn test_unopenable_run_dialog_is_retried_then_fails_soft() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new().on(
        RUN_DIALOG_PATTERN,
        &verdict_reply(false, "high", "Just the plain desktop, no dialog."),
    );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::Desktop);
    let mut ctx = context(&adapter, console, dir.path());
    ctx.run.max_retries = 2;

    let clean = run_shell_command(&mut ctx, "Get-Date").unwrap();
    assert!(!clean);
    let dialog_checks = ctx
        .session
        .screenshots()
        .iter()
        .filter(|s| s.label.contains("09_run_dialog_opened"))
        .count();
    assert_eq!(dialog_checks, 2);
}

#[test]
fn test_custom_step_executes_the_translated_command() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new().on(TRANSLATE_PATTERN, "```powershell\nGet-Date\n```");
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::Desktop);
    let recorder = console.recorder();
    let mut ctx = context(&adapter, console, dir.path());

    let step = run_custom_step(&mut ctx, 4, 1, "check the current time").unwrap();
    assert!(step.success);
    assert!(step.description.contains("executed: Get-Date"));
    // The fenced reply was stripped before typing
    assert!(!recorder.typed_text().contains("```"));
}

#[test]
fn test_untranslatable_step_degrades_to_an_observation() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new().on(TRANSLATE_PATTERN, "");
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::Desktop);
    let mut ctx = context(&adapter, console, dir.path());

    let step = run_custom_step(&mut ctx, 4, 1, "inspect the wallpaper").unwrap();
    assert!(step.success);
    assert!(step.description.contains("screenshot only"));
    assert!(ctx.session.screenshots().iter().any(|s| s.label.starts_with("custom_step_")));
}
