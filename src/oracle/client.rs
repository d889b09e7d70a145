//! Oracle HTTP client with streaming support.
//!
//! Talks to any OpenAI-compatible chat-completions endpoint with:
//! - Streaming responses (no total timeout, activity-based timeout)
//! - Connection health checks
//! - Non-streaming fallback for endpoints that do not stream
//!
//! Oracle queries over large screenshots routinely take 30+ seconds, so the
//! client never applies a total deadline; it only gives up when the stream
//! goes quiet for longer than the activity timeout.

use base64::Engine;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use super::{OracleError, OracleResult, OracleTransport};
use crate::config;

/// Configuration for the oracle client
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Chat-completions endpoint URL
    pub endpoint: String,
    /// Bearer token (empty for unauthenticated endpoints)
    pub api_key: String,
    /// Model name to use
    pub model: String,
    /// Maximum tokens in a reply
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for inactivity during streaming (seconds)
    pub activity_timeout: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.oracle.endpoint.clone(),
            api_key: cfg.oracle.api_key.clone(),
            model: cfg.oracle.model.clone(),
            max_tokens: cfg.oracle.max_tokens,
            connection_timeout: cfg.oracle.connect_timeout,
            activity_timeout: cfg.oracle.activity_timeout,
        }
    }
}

impl OracleConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }
}

/// Check if an oracle endpoint is reachable (connection-only check).
///
/// This only verifies the server accepts connections - it doesn't wait for a
/// full completion since oracle requests can take 30+ seconds.
pub fn check_health(endpoint: &str, timeout_secs: u64) -> OracleResult<bool> {
    let url = endpoint.trim_start_matches("http://").trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1:8080");

    let output = Command::new("curl")
        .args([
            "-s",
            "-o", "/dev/null",
            "-w", "%{http_code}",
            "--connect-timeout", &timeout_secs.to_string(),
            "--max-time", &timeout_secs.to_string(),
            "-I",
            &format!("https://{}", host_port),
        ])
        .output()?;

    let status = String::from_utf8_lossy(&output.stdout);
    // Any response (even 4xx/5xx) means the server is reachable; 000 means
    // the connection failed entirely
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

/// Oracle client over an OpenAI-compatible HTTP endpoint
#[derive(Debug, Clone, Default)]
pub struct HttpOracle {
    config: OracleConfig,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn build_request(
        &self,
        image: Option<&[u8]>,
        system: Option<&str>,
        prompt: &str,
        stream: bool,
    ) -> OracleResult<String> {
        let mut content = Vec::new();
        if let Some(image_data) = image {
            let img_base64 = base64::engine::general_purpose::STANDARD.encode(image_data);
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:image/png;base64,{}", img_base64)
                }
            }));
        }
        content.push(serde_json::json!({
            "type": "text",
            "text": prompt
        }));

        let mut messages = Vec::new();
        if let Some(system_prompt) = system {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system_prompt
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": content
        }));

        let request = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "stream": stream
        });

        serde_json::to_string(&request).map_err(|e| OracleError::InvalidResponse(e.to_string()))
    }

    fn curl_args(&self, request_json: &str, streaming: bool) -> Vec<String> {
        let mut args = vec!["-s".to_string()];
        if streaming {
            args.push("-N".to_string()); // Disable buffering for streaming
        }
        args.extend([
            "-X".to_string(),
            "POST".to_string(),
            self.config.endpoint.clone(),
            "-H".to_string(),
            "Content-Type: application/json".to_string(),
        ]);
        if !self.config.api_key.is_empty() {
            args.push("-H".to_string());
            args.push(format!("Authorization: Bearer {}", self.config.api_key));
        }
        args.extend([
            "-d".to_string(),
            request_json.to_string(),
            "--connect-timeout".to_string(),
            self.config.connection_timeout.to_string(),
        ]);
        args
    }

    /// Streaming query with an activity timeout on the SSE stream
    fn query_streaming(
        &self,
        image: Option<&[u8]>,
        system: Option<&str>,
        prompt: &str,
    ) -> OracleResult<String> {
        let request_json = self.build_request(image, system, prompt, true)?;

        let mut child = Command::new("curl")
            .args(self.curl_args(&request_json, true))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::Io(std::io::Error::other("Failed to capture stdout")))?;

        let (tx, rx) = mpsc::channel();
        let activity_timeout = Duration::from_secs(self.config.activity_timeout);

        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        let mut full_content = String::new();
        let mut last_activity = Instant::now();

        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(line)) => {
                    last_activity = Instant::now();

                    if let Some(data) = line.strip_prefix("data: ") {
                        if data == "[DONE]" {
                            break;
                        }
                        if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
                            if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                                full_content.push_str(content);
                            }
                            // Thinking models put text in reasoning_content
                            if let Some(content) =
                                json["choices"][0]["delta"]["reasoning_content"].as_str()
                            {
                                full_content.push_str(content);
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    return Err(OracleError::Io(e));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if last_activity.elapsed() > activity_timeout {
                        let _ = child.kill();
                        return Err(OracleError::ActivityTimeout(activity_timeout));
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }

        let status = child.wait()?;

        if !status.success() && full_content.is_empty() {
            return Err(OracleError::ConnectionFailed("curl process failed".to_string()));
        }

        // If streaming produced nothing, retry without streaming
        if full_content.is_empty() {
            return self.query_non_streaming(image, system, prompt);
        }

        Ok(full_content)
    }

    /// Fallback non-streaming query (for endpoints that don't stream)
    fn query_non_streaming(
        &self,
        image: Option<&[u8]>,
        system: Option<&str>,
        prompt: &str,
    ) -> OracleResult<String> {
        let request_json = self.build_request(image, system, prompt, false)?;

        // No --max-time for non-streaming - activity can't be observed, so
        // let the request run
        let output = Command::new("curl")
            .args(self.curl_args(&request_json, false))
            .output()?;

        if !output.status.success() {
            return Err(OracleError::ConnectionFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let response: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");

        let result = if content.is_empty() {
            response["choices"][0]["message"]["reasoning_content"]
                .as_str()
                .unwrap_or("")
        } else {
            content
        };

        Ok(result.to_string())
    }
}

impl OracleTransport for HttpOracle {
    fn query(
        &self,
        image: Option<&[u8]>,
        system: Option<&str>,
        prompt: &str,
    ) -> OracleResult<String> {
        self.query_streaming(image, system, prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_config_builder() {
        let config = OracleConfig::new("http://localhost:8080/v1/chat/completions")
            .model("llava")
            .max_tokens(200)
            .activity_timeout(30)
            .api_key("sk-test");

        assert_eq!(config.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.model, "llava");
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.activity_timeout, 30);
        assert_eq!(config.api_key, "sk-test");
    }

    #[test]
    fn test_build_request_includes_image_and_system() {
        let oracle = HttpOracle::new(OracleConfig::new("http://x/v1").model("m"));
        let json = oracle
            .build_request(Some(b"png"), Some("You are a UI checker."), "What is shown?", true)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"][0]["type"], "image_url");
        assert_eq!(value["messages"][1]["content"][1]["text"], "What is shown?");
        assert_eq!(value["stream"], true);
    }

    #[test]
    fn test_build_request_text_only() {
        let oracle = HttpOracle::new(OracleConfig::new("http://x/v1").model("m"));
        let json = oracle.build_request(None, None, "Translate this task", false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn test_curl_args_carry_auth_header_only_when_set() {
        let with_key = HttpOracle::new(OracleConfig::new("http://x/v1").api_key("sk-1"));
        assert!(with_key.curl_args("{}", true).iter().any(|a| a.starts_with("Authorization")));

        let without = HttpOracle::new(OracleConfig::new("http://x/v1").api_key(""));
        assert!(!without.curl_args("{}", true).iter().any(|a| a.starts_with("Authorization")));
    }
}
