//! Shared protocol types: step results, states, errors and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::display::DisplayError;

/// Result of one logical verification step (login, one command, one custom
/// step). Ordered sequence consumed by reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_number: usize,
    pub description: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn ok(step_number: usize, description: impl Into<String>) -> Self {
        Self {
            step_number,
            description: description.into(),
            success: true,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(
        step_number: usize,
        description: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            step_number,
            description: description.into(),
            success: false,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// States of the login protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Disconnected,
    AwaitingLoginScreen,
    LoginScreenConfirmed,
    FieldsKnown,
    UsernameMismatch,
    SwitchingUser,
    CredentialsEntered,
    Submitted,
    LoggedIn,
    LoginFailed,
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that abort a protocol (recoverable conditions are handled
/// internally and never surface here)
#[derive(Debug)]
pub enum ProtocolError {
    /// The display transport failed; fatal to the run
    Connection(String),
    /// The login screen never appeared within the configured wait
    LoginScreenTimeout,
    /// Post-submit verification concluded the login failed
    LoginVerificationFailed(String),
    /// The session locked mid-run; fatal, not retryable
    ScreenLocked(String),
    /// The run was cancelled from outside
    Cancelled,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ProtocolError::LoginScreenTimeout => {
                write!(f, "Login screen did not appear within the timeout")
            }
            ProtocolError::LoginVerificationFailed(reason) => {
                write!(f, "Login verification failed: {}", reason)
            }
            ProtocolError::ScreenLocked(detail) => write!(f, "Screen is locked: {}", detail),
            ProtocolError::Cancelled => write!(f, "Run cancelled"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<DisplayError> for ProtocolError {
    fn from(e: DisplayError) -> Self {
        ProtocolError::Connection(e.to_string())
    }
}

/// Cooperative cancellation signal shared between a run and its owner.
///
/// Every wait and poll in the protocols observes the token; cancelling
/// aborts the current attempt, tears the session down and surfaces a
/// `Cancelled` outcome instead of hanging.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if cancelled. Errors with
    /// `Cancelled` when the token fires before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> ProtocolResult<()> {
        const SLICE: Duration = Duration::from_millis(100);
        let mut remaining = duration;
        if self.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }
        while remaining > Duration::ZERO {
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
            if self.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_result_constructors() {
        let ok = StepResult::ok(1, "Connected to VM");
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = StepResult::failed(2, "Login", "still on login screen");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("still on login screen"));
    }

    #[test]
    fn test_cancel_token_sleep_aborts() {
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(token.sleep(Duration::from_secs(5)), Err(ProtocolError::Cancelled)));
    }

    #[test]
    fn test_cancel_token_sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
