//! Integration tests for the login protocol against the synthetic console
//! and a scripted oracle.

mod common;

use std::path::Path;

use common::{ScriptedOracle, fields_reply, verdict_reply};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use restore_verify::config::{CredentialSettings, Pacing, RunSettings};
use restore_verify::display::synthetic::{GuestStage, InputEvent, SyntheticConsole};
use restore_verify::display::RemoteConsole;
use restore_verify::oracle::OracleAdapter;
use restore_verify::protocol::login::LoginProtocol;
use restore_verify::protocol::types::LoginState;
use restore_verify::protocol::{CancelToken, DebugOptions, ProtocolError, RunContext};
use restore_verify::session::RunSession;

const LOGIN_SCREEN_PATTERN: &str = "login screen showing username and password";
const FIELDS_PATTERN: &str = "CURRENTLY EDITABLE";
const DESKTOP_PATTERN: &str = "Desktop with taskbar visible";

fn context<'a>(
    adapter: &'a OracleAdapter,
    console: SyntheticConsole,
    dir: &Path,
    username: &str,
    password: &str,
) -> RunContext<'a> {
    RunContext {
        console: RemoteConsole::new(Box::new(console)).expect("console"),
        oracle: adapter,
        session: RunSession::new(dir).expect("session"),
        pacing: Pacing::instant(),
        profile: Default::default(),
        credentials: CredentialSettings {
            username: username.to_string(),
            password: password.to_string(),
        },
        run: RunSettings::defaults(),
        debug: DebugOptions::default(),
        cancel: CancelToken::new(),
    }
}

#[test]
fn test_wake_gesture_follows_the_poll_cadence() {
    let dir = tempdir().unwrap();
    // Login screen confirmed on the 6th poll
    let oracle = ScriptedOracle::new()
        .on_sequence(
            LOGIN_SCREEN_PATTERN,
            vec![
                verdict_reply(false, "high", "Still booting."),
                verdict_reply(false, "high", "Still booting."),
                verdict_reply(false, "high", "Still booting."),
                verdict_reply(false, "high", "Still booting."),
                verdict_reply(false, "high", "Still booting."),
                verdict_reply(true, "high", "Login screen with a password field."),
            ],
        )
        .on(FIELDS_PATTERN, &fields_reply(false, true, None, "Password prompt only."));
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::new(1280, 720);
    let recorder = console.recorder();
    let mut ctx = context(&adapter, console, dir.path(), "Administrator", "Secr3t!");

    let mut protocol = LoginProtocol::new();
    protocol.run(&mut ctx).expect("login should succeed");

    assert_eq!(protocol.state(), LoginState::LoggedIn);
    // Wake gestures go out on polls 1, 3 and 6 only
    assert_eq!(recorder.wake_count(), 3);
}

#[test]
fn test_login_screen_timeout_is_terminal() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new().on(
        LOGIN_SCREEN_PATTERN,
        &verdict_reply(false, "high", "A black screen."),
    );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::new(1280, 720);
    let mut ctx = context(&adapter, console, dir.path(), "Administrator", "pw");
    // 120s timeout at a 10s poll interval = 12 polls
    ctx.run.login_screen_timeout = 120;

    let mut protocol = LoginProtocol::new();
    let result = protocol.run(&mut ctx);

    assert!(matches!(result, Err(ProtocolError::LoginScreenTimeout)));
    assert_eq!(protocol.state(), LoginState::LoginFailed);
    // Every poll captured a frame and asked the oracle
    assert_eq!(ctx.session.screenshots().iter().filter(|s| s.label.contains("login_screen_check")).count(), 12);
}

#[test]
fn test_domain_prefixed_cached_user_matches_and_logs_in_password_only() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new()
        .on(LOGIN_SCREEN_PATTERN, &verdict_reply(true, "high", "Login screen."))
        .on(
            FIELDS_PATTERN,
            &fields_reply(
                false,
                true,
                Some("CORP\\Administrator"),
                "Password prompt under a fixed username.",
            ),
        );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::LoginScreen);
    let recorder = console.recorder();
    // Target configured without the domain prefix, different case
    let mut ctx = context(&adapter, console, dir.path(), "administrator", "Secr3t!");

    LoginProtocol::new().run(&mut ctx).expect("login should succeed");

    let typed = recorder.typed_text();
    // Password-only: the account name is never typed
    assert!(!typed.to_lowercase().contains("administrator"));
    // No user switch happened
    assert!(!recorder.events().contains(&InputEvent::Key("Escape".to_string())));

    // The password went through shift routing: 'S' and '!' need the modifier
    let shift_downs = recorder
        .events()
        .iter()
        .filter(|e| matches!(e, InputEvent::KeyDown(k) if k == "Shift"))
        .count();
    assert_eq!(shift_downs, 2);

    // The password-field anchor click was rescaled from 1920x1080 to 1280x720
    let clicks = recorder.clicks();
    assert!(
        clicks.iter().any(|(x, y)| (x - 640.0).abs() < 0.01 && (y - 373.33).abs() < 0.01),
        "expected a scaled password-field click, got {:?}",
        clicks
    );
}

#[test]
fn test_username_mismatch_triggers_the_other_user_sweep() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new()
        .on(LOGIN_SCREEN_PATTERN, &verdict_reply(true, "high", "Login screen."))
        .on_sequence(
            FIELDS_PATTERN,
            vec![
                fields_reply(false, true, Some("LocalAdmin"), "Cached account shown."),
                fields_reply(true, true, None, "Both fields editable."),
            ],
        );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::LoginScreen);
    let recorder = console.recorder();
    let mut ctx = context(&adapter, console, dir.path(), "Administrator", "pw1");

    LoginProtocol::new().run(&mut ctx).expect("login should succeed");

    let events = recorder.events();
    assert!(events.contains(&InputEvent::Key("Escape".to_string())));
    // All five candidate locations were tried, plus the focus/field clicks
    assert!(recorder.clicks().len() >= 5);
    // Both fields path: username typed, Tab pressed, password typed
    assert!(recorder.typed_text().contains("Administrator"));
    assert!(events.contains(&InputEvent::Key("Tab".to_string())));
}

#[test]
fn test_wrong_password_verdict_fails_the_login() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new()
        .on(LOGIN_SCREEN_PATTERN, &verdict_reply(true, "high", "Login screen."))
        .on(FIELDS_PATTERN, &fields_reply(false, true, None, "Password prompt."))
        .on(
            DESKTOP_PATTERN,
            &verdict_reply(false, "high", "The screen says incorrect password."),
        );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::at_stage(1280, 720, GuestStage::LoginScreen);
    let mut ctx = context(&adapter, console, dir.path(), "Administrator", "wrong");

    let mut protocol = LoginProtocol::new();
    let result = protocol.run(&mut ctx);

    match result {
        Err(ProtocolError::LoginVerificationFailed(reason)) => {
            assert!(reason.contains("password rejected"), "reason: {}", reason);
        }
        other => panic!("expected LoginVerificationFailed, got {:?}", other.err()),
    }
    // The failure frame was still collected for the report
    assert!(ctx.session.screenshots().iter().any(|s| s.label == "04_login_failed"));
}

#[test]
fn test_cancellation_aborts_the_poll_loop() {
    let dir = tempdir().unwrap();
    let oracle = ScriptedOracle::new().on(
        LOGIN_SCREEN_PATTERN,
        &verdict_reply(false, "high", "Still booting."),
    );
    let adapter = OracleAdapter::new(Box::new(oracle));

    let console = SyntheticConsole::new(1280, 720);
    let mut ctx = context(&adapter, console, dir.path(), "Administrator", "pw");
    ctx.pacing.login_poll_interval = std::time::Duration::from_secs(10);
    ctx.cancel.cancel();

    let result = LoginProtocol::new().run(&mut ctx);
    assert!(matches!(result, Err(ProtocolError::Cancelled)));
}
