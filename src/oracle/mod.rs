//! Vision/text oracle: transport, structured verdicts, and the adapter.
//!
//! The oracle is a vision-capable language model. Its replies are free text
//! and unreliable, so everything downstream of this module sees only typed
//! results: [`Verdict`], [`FieldDetection`], and the classifier enums in
//! [`adapter`]. No protocol code ever string-matches model prose.

pub mod adapter;
pub mod client;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use adapter::{LoginCheck, OracleAdapter};
pub use client::{HttpOracle, check_health};

/// Result type for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors that can occur during oracle operations
#[derive(Debug)]
pub enum OracleError {
    /// Failed to connect to the oracle endpoint
    ConnectionFailed(String),
    /// No activity for too long during streaming
    ActivityTimeout(Duration),
    /// Invalid response from the oracle
    InvalidResponse(String),
    /// IO error
    Io(std::io::Error),
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            OracleError::ActivityTimeout(d) => write!(f, "No response for {:?}", d),
            OracleError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            OracleError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for OracleError {}

impl From<std::io::Error> for OracleError {
    fn from(e: std::io::Error) -> Self {
        OracleError::Io(e)
    }
}

/// Raw query capability: an image plus a prompt in, free text out.
///
/// Implementations must tolerate being asked text-only questions (no image).
/// Callers must tolerate arbitrary free text coming back.
pub trait OracleTransport {
    fn query(
        &self,
        image: Option<&[u8]>,
        system: Option<&str>,
        prompt: &str,
    ) -> OracleResult<String>;
}

/// Confidence attached to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

/// Structured answer to one state-verification query. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the oracle confirmed the expected state
    pub verified: bool,
    /// How sure the oracle said it was
    pub confidence: Confidence,
    /// What the oracle said it saw
    pub description: String,
    /// The unparsed reply, kept for diagnostics
    pub raw: String,
}

impl Verdict {
    /// The fail-soft verdict used when a reply cannot be parsed: unverified,
    /// low confidence, with the raw text surfaced as the description.
    pub fn unparsed(raw: &str) -> Self {
        Self {
            verified: false,
            confidence: Confidence::Low,
            description: raw.to_string(),
            raw: raw.to_string(),
        }
    }
}

/// Which login inputs are currently editable, per the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDetection {
    /// An editable username input is present
    pub has_username_field: bool,
    /// An editable password input is present
    pub has_password_field: bool,
    /// Username shown on screen, if any (may be a non-editable label)
    pub displayed_username: Option<String>,
    /// What the oracle said it saw
    pub description: String,
}

impl FieldDetection {
    /// The conservative default when detection fails to parse: assume a
    /// previously-logged-in account with the username pre-filled, so only a
    /// password is needed.
    pub fn password_only_fallback(raw: &str) -> Self {
        Self {
            has_username_field: false,
            has_password_field: true,
            displayed_username: None,
            description: format!("Fallback: password only ({})", truncate(raw, 120)),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
