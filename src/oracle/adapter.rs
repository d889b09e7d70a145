//! The adapter between free-text oracle replies and typed protocol decisions.
//!
//! The oracle answers in prose. The adapter imposes the fixed labeled-field
//! reply format, parses it positionally and case-insensitively, and applies
//! the documented defaults when parsing fails. All keyword scanning of model
//! prose happens here, behind typed classifier functions; protocol code only
//! ever sees [`Verdict`], [`FieldDetection`] and [`LoginCheck`].

use super::{Confidence, FieldDetection, OracleTransport, Verdict};
use crate::protocol::StepResult;

const VERIFY_SYSTEM_PROMPT: &str =
    "You are a UI verification assistant. Analyze screenshots accurately and honestly.";

const FIELD_SYSTEM_PROMPT: &str =
    "You are a UI analysis assistant. Identify which login fields need user input.";

const TRANSLATE_SYSTEM_PROMPT: &str = "You are a PowerShell expert. Generate safe, simple \
     PowerShell commands for given tasks. Return only the command, no explanations.";

const SUMMARY_SYSTEM_PROMPT: &str = "You are a disaster-recovery specialist analyzing automated \
     restore verification results. Provide clear, professional assessments focused on system \
     availability and recovery validation. Do not perform security audits or criticize account \
     naming. Focus on whether the system recovered successfully.";

/// Outcome of the post-submit login verification, after the ordered rule set
/// has been applied. Ambiguity is resolved here (per the optimistic policy
/// flag) so the protocol never has to interpret prose.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginCheck {
    /// Desktop confirmed (detail says on what grounds)
    Confirmed(String),
    /// Login definitively failed
    Rejected(String),
}

/// Wraps the oracle transport and exposes only structured answers
pub struct OracleAdapter {
    transport: Box<dyn OracleTransport>,
}

impl OracleAdapter {
    pub fn new(transport: Box<dyn OracleTransport>) -> Self {
        Self { transport }
    }

    /// Ask whether the screenshot shows the expected state.
    ///
    /// Transport failures degrade to an unverified low-confidence verdict
    /// carrying the error text; verification never raises.
    pub fn verify_state(&self, screenshot: &[u8], expected_state: &str) -> Verdict {
        let prompt = format!(
            "Analyze this screenshot and determine if it shows: {}\n\n\
             Respond in this EXACT format:\n\
             VERIFIED: yes/no\n\
             CONFIDENCE: high/medium/low\n\
             DESCRIPTION: Brief description of what you actually see\n\n\
             Be precise and honest. If you're not sure, say so.",
            expected_state
        );

        match self.transport.query(Some(screenshot), Some(VERIFY_SYSTEM_PROMPT), &prompt) {
            Ok(reply) => parse_verdict(&reply),
            Err(e) => {
                log::error!("State verification query failed: {}", e);
                Verdict::unparsed(&format!("Error during verification: {}", e))
            }
        }
    }

    /// Ask which login inputs are editable and what username is displayed.
    ///
    /// Any parse or transport failure falls back to the conservative
    /// password-only assumption (username pre-filled), never an error.
    pub fn detect_login_fields(&self, screenshot: &[u8]) -> FieldDetection {
        let prompt = "Analyze this login screen and tell me which input fields are CURRENTLY \
             EDITABLE and what username (if any) is displayed.\n\n\
             Important distinctions:\n\
             - USERNAME FIELD: An EDITABLE text input where you can TYPE a different username. \
             If you see a username displayed but it's NOT an editable field (just text/label), \
             answer NO.\n\
             - PASSWORD FIELD: An EMPTY input field where you need to type the password.\n\
             - DISPLAYED USERNAME: The username shown on screen (even if not editable)\n\n\
             Respond in this EXACT format:\n\
             USERNAME_FIELD: yes/no\n\
             PASSWORD_FIELD: yes/no\n\
             DISPLAYED_USERNAME: [username shown or \"none\"]\n\
             DESCRIPTION: What you see on the login screen\n\n\
             Be precise about what is EDITABLE vs just displayed.";

        match self.transport.query(Some(screenshot), Some(FIELD_SYSTEM_PROMPT), prompt) {
            Ok(reply) => parse_field_detection(&reply),
            Err(e) => {
                log::error!("Login field detection query failed: {}", e);
                FieldDetection::password_only_fallback(&e.to_string())
            }
        }
    }

    /// Translate a free-text task into a single shell command.
    ///
    /// Returns `None` when translation fails; the caller degrades to a
    /// screenshot-only observation step.
    pub fn translate_task(&self, task: &str) -> Option<String> {
        let prompt = format!(
            "Convert the following task description into a single PowerShell command that can \
             be executed in a Windows terminal.\n\n\
             Task: {}\n\n\
             Requirements:\n\
             - Return ONLY the PowerShell command, no explanations\n\
             - Command should be safe to execute\n\
             - Command should produce visible output\n\
             - Keep it simple and direct\n\n\
             Example:\n\
             Task: ping localhost\n\
             Response: ping 127.0.0.1 -n 4\n\n\
             Task: check disk space\n\
             Response: Get-PSDrive C | Select-Object Used,Free\n\n\
             Now generate the command for the task above:",
            task
        );

        match self.transport.query(None, Some(TRANSLATE_SYSTEM_PROMPT), &prompt) {
            Ok(reply) => {
                let command = strip_code_fences(reply.trim());
                if command.is_empty() { None } else { Some(command) }
            }
            Err(e) => {
                log::warn!("Task translation failed for {:?}: {}", task, e);
                None
            }
        }
    }

    /// Write a short professional summary of the run for the report.
    /// Best-effort; `None` on any failure.
    pub fn summarize_run(&self, steps: &[StepResult], screenshot_count: usize) -> Option<String> {
        let steps_summary: String = steps
            .iter()
            .map(|s| {
                format!(
                    "{}. {}: {}\n",
                    s.step_number,
                    s.description,
                    if s.success { "Success" } else { "Failed" }
                )
            })
            .collect();

        let today = chrono::Local::now().format("%B %d, %Y");
        let prompt = format!(
            "Analyze the following disaster-recovery restore verification results and provide \
             a professional summary.\n\n\
             Today's Date: {}\n\n\
             Steps Completed:\n{}\n\
             Total Screenshots: {}\n\n\
             IMPORTANT GUIDELINES:\n\
             - Do NOT comment on usernames, credentials, or account naming conventions\n\
             - Do NOT criticize the number of screenshots\n\
             - Focus ONLY on technical success/failure of the verification steps\n\
             - Include the actual current date ({}) in your summary\n\n\
             Provide:\n\
             1. Overall success status\n\
             2. Key findings (what was verified and confirmed working)\n\
             3. Any TECHNICAL issues or concerns\n\
             4. Brief recommendations (if any)\n\n\
             Keep it concise and focused on restore validation.",
            today, steps_summary, screenshot_count, today
        );

        match self.transport.query(None, Some(SUMMARY_SYSTEM_PROMPT), &prompt) {
            Ok(summary) if !summary.trim().is_empty() => Some(summary),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Run summary generation failed: {}", e);
                None
            }
        }
    }
}

// ============================================================================
// Reply parsing
// ============================================================================

/// Parse the fixed VERIFIED/CONFIDENCE/DESCRIPTION reply format.
///
/// Fields are matched per line, case-insensitively. Missing fields keep the
/// fail-soft defaults: unverified, low confidence, raw text as description.
pub fn parse_verdict(reply: &str) -> Verdict {
    let mut verdict = Verdict::unparsed(reply);

    for line in reply.lines() {
        let upper = line.to_uppercase();
        if upper.contains("VERIFIED:") {
            verdict.verified = upper.contains("YES");
        } else if upper.contains("CONFIDENCE:") {
            if let Some(value) = line.splitn(2, ':').nth(1) {
                if let Some(confidence) = Confidence::parse(value) {
                    verdict.confidence = confidence;
                }
            }
        } else if upper.contains("DESCRIPTION:") {
            if let Some(value) = line.splitn(2, ':').nth(1) {
                verdict.description = value.trim().to_string();
            }
        }
    }

    verdict
}

/// Parse the four-field login detection reply.
///
/// A reply with no description, or one claiming neither field exists, is
/// treated as a failed parse and replaced with the password-only fallback.
pub fn parse_field_detection(reply: &str) -> FieldDetection {
    let mut detection = FieldDetection {
        has_username_field: false,
        has_password_field: false,
        displayed_username: None,
        description: String::new(),
    };

    for line in reply.lines() {
        let upper = line.to_uppercase();
        if upper.contains("USERNAME_FIELD:") || upper.contains("USERNAME FIELD:") {
            detection.has_username_field = upper.contains("YES");
        } else if upper.contains("PASSWORD_FIELD:") || upper.contains("PASSWORD FIELD:") {
            detection.has_password_field = upper.contains("YES");
        } else if upper.contains("DISPLAYED_USERNAME:") || upper.contains("DISPLAYED USERNAME:") {
            if let Some(value) = line.splitn(2, ':').nth(1) {
                let value = value.trim();
                if !value.is_empty() && value.to_lowercase() != "none" {
                    detection.displayed_username = Some(value.to_string());
                }
            }
        } else if upper.contains("DESCRIPTION:") {
            if let Some(value) = line.splitn(2, ':').nth(1) {
                detection.description = value.trim().to_string();
            }
        }
    }

    if detection.description.is_empty()
        || (!detection.has_username_field && !detection.has_password_field)
    {
        log::warn!("Field detection reply did not parse; assuming password-only login");
        return FieldDetection::password_only_fallback(reply);
    }

    detection
}

// ============================================================================
// Verdict classifiers (the only place model prose is keyword-scanned)
// ============================================================================

/// Apply the ordered rule set for post-submit login verification.
///
/// Order matters: an explicit positive verdict wins, known-benign dialog
/// phrases count as success, known failure phrases hard-fail, and only then
/// does the ambiguity policy apply. The check must never hang on a vague
/// answer but must hard-fail on an unambiguous negative one.
pub fn classify_login(verdict: &Verdict, optimistic_on_ambiguous: bool) -> LoginCheck {
    let description = verdict.description.to_uppercase();

    if verdict.verified {
        return LoginCheck::Confirmed("desktop verified by oracle".to_string());
    }
    if description.contains("SHUTDOWN EVENT TRACKER") || description.contains("SHUTDOWN") {
        // The shutdown-event dialog is expected after a snapshot restore
        return LoginCheck::Confirmed(format!(
            "desktop with expected post-restore dialog: {}",
            verdict.description
        ));
    }
    if description.contains("DESKTOP") && description.contains("TASKBAR") {
        return LoginCheck::Confirmed(format!(
            "desktop and taskbar described: {}",
            verdict.description
        ));
    }
    if description.contains("STILL ON LOGIN")
        || description.contains("SHOWING LOGIN")
        || description.contains("AT LOGIN SCREEN")
    {
        return LoginCheck::Rejected(format!("still on login screen: {}", verdict.description));
    }
    if description.contains("INCORRECT PASSWORD")
        || description.contains("PASSWORD INCORRECT")
        || description.contains("WRONG PASSWORD")
    {
        return LoginCheck::Rejected(format!("password rejected: {}", verdict.description));
    }
    if description.contains("LOCKED") && description.contains("SCREEN") {
        return LoginCheck::Rejected(format!("screen is locked: {}", verdict.description));
    }
    if verdict.confidence == Confidence::Low || verdict.description.is_empty() {
        if optimistic_on_ambiguous {
            return LoginCheck::Confirmed(format!(
                "inconclusive verdict treated as success (optimistic policy): {}",
                verdict.description
            ));
        }
        return LoginCheck::Rejected(format!("inconclusive verdict: {}", verdict.description));
    }
    LoginCheck::Rejected(format!("desktop not detected: {}", verdict.description))
}

/// Whether the verdict's description indicates a locked session
pub fn lock_screen_detected(verdict: &Verdict) -> bool {
    let description = verdict.description.to_uppercase();
    description.contains("CTRL+ALT+DELETE")
        || description.contains("UNLOCK")
        || description.contains("LOCK SCREEN")
}

/// Whether the verdict's description reports an error in command output.
///
/// Negation phrases are checked first so the oracle restating the question
/// ("no errors detected") cannot trip the "error" substring. Returns the
/// matched indicator phrase.
pub fn command_error(verdict: &Verdict) -> Option<&'static str> {
    let description = verdict.description.to_uppercase();

    const NEGATION_PHRASES: [&str; 5] =
        ["NO RED", "NO ERROR", "NO ERRORS", "WITHOUT ERROR", "WITHOUT RED"];
    if NEGATION_PHRASES.iter().any(|neg| description.contains(neg)) {
        return None;
    }

    const ERROR_INDICATORS: [&str; 10] = [
        "RED TEXT",
        "RED ERROR",
        "ERROR TEXT IN RED",
        "ERROR MESSAGE IS DISPLAYED",
        "ERROR MESSAGE IS VISIBLE",
        "DISPLAYS AN ERROR MESSAGE",
        "SHOWS AN ERROR MESSAGE",
        "ACCESS IS DENIED",
        "PERMISSION IS DENIED",
        "THE TERMINAL SHOWS THE ERROR OUTPUT",
    ];
    ERROR_INDICATORS
        .iter()
        .find(|ind| description.contains(**ind))
        .copied()
}

/// Strip a surrounding markdown code fence from a model reply
fn strip_code_fences(reply: &str) -> String {
    let mut lines: Vec<&str> = reply.lines().collect();
    if lines.first().map(|l| l.trim_start().starts_with("```")).unwrap_or(false) {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim_start().starts_with("```")).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}
