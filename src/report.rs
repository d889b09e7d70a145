//! Verification report rendering: JSON, self-contained HTML and a quick
//! text summary. Pure formatting over the orchestrator's outputs.

use std::fs;
use std::path::PathBuf;

use base64::Engine;
use chrono::Utc;

use crate::orchestrator::RunOutcome;
use crate::protocol::StepResult;

/// Paths to the generated report files
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub html: PathBuf,
}

/// Writes verification reports to an output directory
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Generate the JSON and HTML reports for one run
    pub fn generate(
        &self,
        outcome: &RunOutcome,
        summary: Option<&str>,
    ) -> std::io::Result<ReportPaths> {
        fs::create_dir_all(&self.output_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();

        let success_count = outcome.steps.iter().filter(|s| s.success).count();
        let duration = outcome.ended_at - outcome.started_at;

        let report_data = serde_json::json!({
            "timestamp": timestamp,
            "start_time": outcome.started_at.to_rfc3339(),
            "end_time": outcome.ended_at.to_rfc3339(),
            "duration_seconds": duration.num_seconds(),
            "success": outcome.success,
            "login_failed": outcome.login_failed,
            "cancelled": outcome.cancelled,
            "error": outcome.error,
            "agent": outcome.agent,
            "snapshot": outcome.snapshot,
            "vm": outcome.vm,
            "steps": outcome.steps,
            "actions": outcome.action_log,
            "screenshots": outcome.screenshots,
            "summary": summary,
            "success_count": success_count,
            "total_steps": outcome.steps.len(),
        });

        let json_path = self.output_dir.join(format!("verification_report_{}.json", timestamp));
        fs::write(&json_path, serde_json::to_string_pretty(&report_data)?)?;
        log::info!("JSON report saved: {}", json_path.display());

        let html_path = self.output_dir.join(format!("verification_report_{}.html", timestamp));
        fs::write(&html_path, self.render_html(outcome, summary))?;
        log::info!("HTML report saved: {}", html_path.display());

        Ok(ReportPaths {
            json: json_path,
            html: html_path,
        })
    }

    /// Self-contained HTML with the screenshots embedded as data URIs
    fn render_html(&self, outcome: &RunOutcome, summary: Option<&str>) -> String {
        let status = if outcome.success {
            r#"<span class="ok">PASSED</span>"#
        } else {
            r#"<span class="fail">FAILED</span>"#
        };

        let mut steps_html = String::new();
        for step in &outcome.steps {
            let class = if step.success { "ok" } else { "fail" };
            let marker = if step.success { "OK" } else { "FAIL" };
            steps_html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td></tr>\n",
                step.step_number,
                escape_html(&step.description),
                class,
                marker,
                escape_html(step.error.as_deref().unwrap_or("")),
            ));
        }

        let mut actions_html = String::new();
        for entry in &outcome.action_log {
            actions_html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                entry.timestamp.format("%H:%M:%S"),
                escape_html(&entry.action),
                escape_html(&entry.details),
            ));
        }

        let mut shots_html = String::new();
        for record in &outcome.screenshots {
            match fs::read(&record.file_path) {
                Ok(bytes) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    shots_html.push_str(&format!(
                        "<figure><img src=\"data:image/png;base64,{}\" alt=\"{}\"/>\
                         <figcaption>{}</figcaption></figure>\n",
                        encoded,
                        escape_html(&record.label),
                        escape_html(&record.label),
                    ));
                }
                Err(e) => {
                    log::warn!("Failed to embed screenshot {}: {}", record.file_path.display(), e);
                }
            }
        }

        let summary_html = summary
            .map(|s| format!("<h2>Summary</h2><pre>{}</pre>", escape_html(s)))
            .unwrap_or_default();

        let subject = outcome
            .agent
            .as_ref()
            .and_then(|a| a.hostname.clone())
            .or_else(|| outcome.snapshot.as_ref().map(|s| s.snapshot_id.clone()))
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<title>Restore verification - {subject}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; color: #222; }}
table {{ border-collapse: collapse; margin-bottom: 2em; }}
td, th {{ border: 1px solid #ccc; padding: 4px 10px; text-align: left; }}
.ok {{ color: #0a7d28; font-weight: bold; }}
.fail {{ color: #b01111; font-weight: bold; }}
figure {{ margin: 1em 0; }}
img {{ max-width: 100%; border: 1px solid #ccc; }}
figcaption {{ font-size: 0.85em; color: #666; }}
</style>
</head>
<body>
<h1>Restore verification report: {subject} {status}</h1>
<p>Started {start} &middot; finished {end}</p>
{summary_html}
<h2>Steps</h2>
<table><tr><th>#</th><th>Step</th><th>Result</th><th>Error</th></tr>
{steps_html}</table>
<h2>Action log</h2>
<table><tr><th>Time</th><th>Action</th><th>Details</th></tr>
{actions_html}</table>
<h2>Screenshots</h2>
{shots_html}
</body>
</html>
"#,
            subject = escape_html(&subject),
            status = status,
            start = outcome.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            end = outcome.ended_at.format("%Y-%m-%d %H:%M:%S UTC"),
            summary_html = summary_html,
            steps_html = steps_html,
            actions_html = actions_html,
            shots_html = shots_html,
        )
    }
}

/// Short text summary printed after a run
pub fn quick_summary(steps: &[StepResult], duration: Option<chrono::Duration>) -> String {
    let total = steps.len();
    let success = steps.iter().filter(|s| s.success).count();
    let rate = if total > 0 {
        success as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let mut summary = format!(
        "\nVerification Complete\n{}\nTotal Steps: {}\nSuccessful: {}\nFailed: {}\nSuccess Rate: {:.1}%\n",
        "=".repeat(50),
        total,
        success,
        total - success,
        rate
    );
    if let Some(d) = duration {
        summary.push_str(&format!("Duration: {}s\n", d.num_seconds()));
    }
    summary.push_str("\nStep Results:\n");
    for step in steps {
        let marker = if step.success { "[OK]" } else { "[FAIL]" };
        summary.push_str(&format!(
            "  {} Step {}: {}\n",
            marker, step.step_number, step.description
        ));
    }
    summary
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"x\" & y</b>"), "&lt;b&gt;&quot;x&quot; &amp; y&lt;/b&gt;");
    }

    #[test]
    fn test_quick_summary_counts() {
        let steps = vec![
            StepResult::ok(1, "Connected to VM"),
            StepResult::failed(2, "Login", "still on login screen"),
        ];
        let summary = quick_summary(&steps, Some(chrono::Duration::seconds(90)));
        assert!(summary.contains("Total Steps: 2"));
        assert!(summary.contains("Successful: 1"));
        assert!(summary.contains("Success Rate: 50.0%"));
        assert!(summary.contains("Duration: 90s"));
        assert!(summary.contains("[FAIL] Step 2: Login"));
    }
}
