//! Per-run context threaded through the protocols.
//!
//! One `RunContext` exists per verification run. It owns the console for the
//! session's lifetime and carries the oracle, the artifact store, pacing and
//! settings — explicit state passed by reference, no long-lived globals.

use std::time::Duration;

use crate::config::{CredentialSettings, Pacing, RunSettings};
use crate::display::RemoteConsole;
use crate::geometry::{CoordinateProfile, Point};
use crate::oracle::{OracleAdapter, Verdict};
use crate::session::{RunSession, ScreenshotRecord};

use super::types::{CancelToken, ProtocolResult};

/// Debugging affordances, off by default
#[derive(Debug, Clone, Default)]
pub struct DebugOptions {
    /// Log password characters as they are typed
    pub show_password: bool,
    /// Pause before submitting credentials so a human can inspect the screen
    pub pause_before_submit: bool,
    /// Duration of that pause
    pub pause_duration: Duration,
}

/// Everything one run's protocols need, owned for the session lifetime
pub struct RunContext<'a> {
    pub console: RemoteConsole,
    pub oracle: &'a OracleAdapter,
    pub session: RunSession,
    pub pacing: Pacing,
    pub profile: CoordinateProfile,
    pub credentials: CredentialSettings,
    pub run: RunSettings,
    pub debug: DebugOptions,
    pub cancel: CancelToken,
}

impl<'a> RunContext<'a> {
    /// Wait, honoring cancellation
    pub fn pause(&self, duration: Duration) -> ProtocolResult<()> {
        self.cancel.sleep(duration)
    }

    /// Append to the run's action log
    pub fn log_action(&mut self, action: &str, details: &str) {
        self.session.log_action(action, details);
    }

    /// Capture a labeled screenshot.
    ///
    /// A capture failure is logged and yields `None`; the run continues with
    /// a missing screenshot rather than aborting.
    pub fn capture(&mut self, label: &str) -> Option<(ScreenshotRecord, Vec<u8>)> {
        match self.console.screenshot() {
            Ok(png) => match self.session.store_screenshot(label, &png) {
                Ok(record) => Some((record, png)),
                Err(e) => {
                    log::error!("Failed to store screenshot {}: {}", label, e);
                    None
                }
            },
            Err(e) => {
                log::error!("Failed to capture screenshot {}: {}", label, e);
                None
            }
        }
    }

    /// Ask the oracle whether the frame shows the expected state, recording
    /// the verdict in the action log so every later decision is explainable.
    pub fn verify(&mut self, png: &[u8], label: &str, expected_state: &str) -> Verdict {
        log::info!("Verifying UI state: {}", expected_state);
        let verdict = self.oracle.verify_state(png, expected_state);
        if verdict.verified {
            log::info!("[OK] Verified: {} ({:?} confidence)", label, verdict.confidence);
        } else {
            log::warn!("[FAIL] NOT verified: {}", label);
            log::warn!("  Oracle saw: {}", verdict.description);
        }
        self.session.log_action(
            "Verify state",
            &format!(
                "{}: verified={} confidence={:?} saw: {}",
                label, verdict.verified, verdict.confidence, verdict.description
            ),
        );
        verdict
    }

    /// Capture and verify in one motion. Returns `None` for the verdict when
    /// the screenshot itself could not be taken.
    pub fn capture_and_verify(&mut self, label: &str, expected_state: &str) -> Option<Verdict> {
        let (_, png) = self.capture(label)?;
        Some(self.verify(&png, label, expected_state))
    }

    /// Click a reference-frame point
    pub fn click(&mut self, point: Point) -> ProtocolResult<()> {
        self.console.click_at(point)?;
        Ok(())
    }

    /// Click the console center to take keyboard focus
    pub fn focus(&mut self) -> ProtocolResult<()> {
        let center = self.profile.canvas_center;
        self.click(center)?;
        self.pause(self.pacing.focus_settle)
    }

    /// Press and release a key or chord
    pub fn send_key(&mut self, key: &str) -> ProtocolResult<()> {
        self.console.send_key(key)?;
        Ok(())
    }

    /// Type text one character at a time with shift handling and pacing.
    /// `reveal` logs each character (password debugging only).
    pub fn type_shifted(
        &mut self,
        text: &str,
        per_char_delay: Duration,
        reveal: bool,
    ) -> ProtocolResult<()> {
        let total = text.chars().count();
        for (i, c) in text.chars().enumerate() {
            if reveal {
                log::warn!("[DEBUG] Typing char {}/{}: {:?} (U+{:04X})", i + 1, total, c, c as u32);
            }
            if let Err(e) = self.console.type_char(c) {
                log::warn!("Failed to type {:?}: {}", c, e);
            }
            self.pause(per_char_delay)?;
        }
        Ok(())
    }

    /// Type plain text character by character without shift routing
    pub fn type_plain(&mut self, text: &str, per_char_delay: Duration) -> ProtocolResult<()> {
        for c in text.chars() {
            if let Err(e) = self.console.type_text(&c.to_string()) {
                log::warn!("Failed to type {:?}: {}", c, e);
            }
            self.pause(per_char_delay)?;
        }
        Ok(())
    }
}
