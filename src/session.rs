//! Run session management: screenshot storage and the action log.
//!
//! Each verification run owns one `RunSession`: a unique directory for
//! screenshots plus two append-only sequences — the screenshot records and
//! the action log. Nothing is ever removed from either sequence during a
//! run; report presentation filters downstream.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One captured screenshot. Immutable once created; ordering is capture order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    /// Sequence number within the run (capture order)
    pub id: usize,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
    /// Where the PNG was written
    pub file_path: PathBuf,
    /// Phase + attempt label, e.g. "03_login_screen_check_2"
    pub label: String,
}

/// One entry in the canonical record of what the automation did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: String,
}

/// A verification run's artifact store
#[derive(Debug)]
pub struct RunSession {
    /// Unique run ID
    pub id: String,
    /// Directory screenshots are written to
    pub dir: PathBuf,
    screenshots: Vec<ScreenshotRecord>,
    action_log: Vec<ActionLogEntry>,
}

impl RunSession {
    /// Create a session under `base_dir` with a timestamped unique ID
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let id = format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"));
        Self::with_id(base_dir, &id)
    }

    /// Create a session with an explicit ID (batch runs use the agent ID)
    pub fn with_id(base_dir: impl Into<PathBuf>, id: &str) -> std::io::Result<Self> {
        let dir = base_dir.into().join(sanitize_label(id));
        fs::create_dir_all(&dir)?;
        Ok(Self {
            id: id.to_string(),
            dir,
            screenshots: Vec::new(),
            action_log: Vec::new(),
        })
    }

    /// Store PNG bytes under a labeled, timestamped filename and record it.
    /// Returns the appended record.
    pub fn store_screenshot(&mut self, label: &str, png: &[u8]) -> std::io::Result<ScreenshotRecord> {
        let captured_at = Utc::now();
        let filename = format!(
            "{}_{}.png",
            captured_at.format("%Y%m%d_%H%M%S"),
            sanitize_label(label)
        );
        let file_path = self.dir.join(filename);
        fs::write(&file_path, png)?;

        let record = ScreenshotRecord {
            id: self.screenshots.len(),
            captured_at,
            file_path,
            label: label.to_string(),
        };
        self.screenshots.push(record.clone());
        Ok(record)
    }

    /// Append to the action log
    pub fn log_action(&mut self, action: &str, details: &str) {
        log::debug!("Action: {} - {}", action, details);
        self.action_log.push(ActionLogEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            details: details.to_string(),
        });
    }

    /// Screenshot records in capture order
    pub fn screenshots(&self) -> &[ScreenshotRecord] {
        &self.screenshots
    }

    /// Action log in chronological order
    pub fn action_log(&self) -> &[ActionLogEntry] {
        &self.action_log
    }

    /// Consume the session, yielding both sequences for reporting
    pub fn into_records(self) -> (Vec<ScreenshotRecord>, Vec<ActionLogEntry>) {
        (self.screenshots, self.action_log)
    }
}

/// Sanitize a label for use in filenames
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
