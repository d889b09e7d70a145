//! Restore provider client: snapshots, restore VMs and display access.
//!
//! Thin REST client for the backup provider's API. The engine consumes it
//! through the [`RestoreProvider`] trait; provider failures are fatal to one
//! verification run but never to a batch.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors from the restore provider API
#[derive(Debug)]
pub enum ProviderError {
    /// The API answered with a non-success status
    Api { status: u16, message: String },
    /// Transport-level HTTP failure
    Http(reqwest::Error),
    /// The API answered 2xx but the body was not the expected shape
    InvalidResponse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Api { status, message } => {
                write!(f, "API request failed ({}): {}", status, message)
            }
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProviderError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e)
    }
}

/// A protected machine known to the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Where a snapshot is stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLocation {
    pub device_id: String,
    #[serde(rename = "type", default)]
    pub location_type: String,
}

/// One backup snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub backup_started_at: Option<String>,
    #[serde(default)]
    pub backup_ended_at: Option<String>,
    #[serde(default)]
    pub locations: Vec<SnapshotLocation>,
}

impl SnapshotInfo {
    /// Sort key: prefer the backup end time, fall back to the start time
    fn backup_time(&self) -> &str {
        self.backup_ended_at
            .as_deref()
            .or(self.backup_started_at.as_deref())
            .unwrap_or("")
    }

    /// Pick the device to restore on. Cloud devices are preferred for
    /// compute availability; otherwise the first listed location.
    pub fn pick_device(&self) -> ProviderResult<&str> {
        if self.locations.is_empty() {
            return Err(ProviderError::InvalidResponse(format!(
                "Snapshot {} has no locations/devices",
                self.snapshot_id
            )));
        }
        for loc in &self.locations {
            if loc.location_type == "cloud" {
                return Ok(&loc.device_id);
            }
        }
        Ok(&self.locations[0].device_id)
    }
}

/// Handle to a restore VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmHandle {
    pub virt_id: String,
}

/// A remote-display access entry on a VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayEntry {
    #[serde(rename = "type", default)]
    pub entry_type: String,
    #[serde(default)]
    pub websocket_uri: Option<String>,
}

/// Restore VM details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub virt_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub vnc: Vec<DisplayEntry>,
    #[serde(default)]
    pub vnc_password: Option<String>,
}

/// The restore capability the engine consumes.
///
/// All methods block. Failures are fatal to the run that hit them, not to a
/// batch of runs.
pub trait RestoreProvider {
    /// Most recent snapshot, optionally filtered by agent
    fn latest_snapshot(&self, agent_id: Option<&str>) -> ProviderResult<Option<SnapshotInfo>>;

    /// Most recent snapshot for every agent that has one
    fn latest_snapshots_by_agent(&self) -> ProviderResult<Vec<SnapshotInfo>>;

    /// Details for one agent
    fn agent_details(&self, agent_id: &str) -> ProviderResult<AgentInfo>;

    /// All known agents
    fn list_agents(&self) -> ProviderResult<Vec<AgentInfo>>;

    /// Create (and implicitly start) a restore VM from a snapshot
    fn create_vm(
        &self,
        snapshot_id: &str,
        device_id: &str,
        network: &str,
        name: &str,
    ) -> ProviderResult<VmHandle>;

    /// Current VM details
    fn vm_details(&self, vm: &VmHandle) -> ProviderResult<VmInfo>;

    /// Poll until the VM reports running. Returns false on timeout or when
    /// `is_cancelled` reports true.
    fn wait_until_ready(
        &self,
        vm: &VmHandle,
        timeout: Duration,
        poll_interval: Duration,
        is_cancelled: &dyn Fn() -> bool,
    ) -> ProviderResult<bool>;

    /// Browser-viewable remote-display URL for the VM console
    fn display_url(&self, vm: &VmHandle) -> ProviderResult<String>;

    /// Destroy the VM. Idempotent: destroying a VM that is already gone
    /// returns false, never an error.
    fn destroy_vm(&self, vm: &VmHandle) -> bool;
}

/// Default browser viewer the display URL is built for
pub const DEFAULT_VIEWER_BASE: &str = "https://slide.recipes/mcpTools/vncViewer.php";

/// REST implementation of [`RestoreProvider`]
pub struct HttpProvider {
    base_url: String,
    viewer_base: String,
    client: reqwest::blocking::Client,
    api_key: String,
}

impl HttpProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            viewer_base: DEFAULT_VIEWER_BASE.to_string(),
            client: reqwest::blocking::Client::new(),
            api_key: api_key.to_string(),
        }
    }

    /// Override the viewer URL the display link is built against
    pub fn viewer_base(mut self, viewer_base: &str) -> Self {
        self.viewer_base = viewer_base.to_string();
        self
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ProviderResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .query(query);
        if let Some(json) = body {
            req = req.json(&json);
        }

        let response = req.send()?;
        let status = response.status();
        let text = response.text()?;

        if !status.is_success() {
            log::error!("Provider API request failed: {} {} -> {}", status, url, text);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> ProviderResult<serde_json::Value> {
        self.request(reqwest::Method::GET, path, query, None)
    }

    /// Unwrap the `{"data": [..]}` envelope some endpoints use for a single
    /// resource
    fn unwrap_single<T: serde::de::DeserializeOwned>(
        value: serde_json::Value,
        what: &str,
    ) -> ProviderResult<T> {
        let inner = match value.get("data") {
            Some(serde_json::Value::Array(items)) => items
                .first()
                .cloned()
                .ok_or_else(|| ProviderError::InvalidResponse(format!("No {} data found", what)))?,
            _ => value,
        };
        serde_json::from_value(inner).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn list_snapshots(&self, agent_id: Option<&str>, limit: u32) -> ProviderResult<Vec<SnapshotInfo>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(agent_id) = agent_id {
            query.push(("agent_id", agent_id.to_string()));
        }
        let response = self.get("/v1/snapshot", &query)?;
        let data = response.get("data").cloned().unwrap_or(serde_json::json!([]));
        serde_json::from_value(data).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

impl RestoreProvider for HttpProvider {
    fn latest_snapshot(&self, agent_id: Option<&str>) -> ProviderResult<Option<SnapshotInfo>> {
        let mut snapshots = self.list_snapshots(agent_id, 50)?;
        snapshots.sort_by(|a, b| b.backup_time().cmp(a.backup_time()));
        let latest = snapshots.into_iter().next();
        if let Some(snapshot) = &latest {
            log::info!(
                "Found latest snapshot: {} from {}",
                snapshot.snapshot_id,
                snapshot.backup_time()
            );
        } else {
            log::warn!("No snapshots found");
        }
        Ok(latest)
    }

    fn latest_snapshots_by_agent(&self) -> ProviderResult<Vec<SnapshotInfo>> {
        let snapshots = self.list_snapshots(None, 50)?;

        let mut latest: Vec<SnapshotInfo> = Vec::new();
        for snapshot in snapshots {
            let Some(agent_id) = snapshot.agent_id.clone() else {
                continue;
            };
            match latest.iter_mut().find(|s| s.agent_id.as_deref() == Some(&agent_id)) {
                Some(existing) => {
                    if snapshot.backup_time() > existing.backup_time() {
                        *existing = snapshot;
                    }
                }
                None => latest.push(snapshot),
            }
        }
        log::info!("Found latest snapshots for {} agents", latest.len());
        Ok(latest)
    }

    fn agent_details(&self, agent_id: &str) -> ProviderResult<AgentInfo> {
        let response = self.get(&format!("/v1/agent/{}", agent_id), &[])?;
        Self::unwrap_single(response, "agent")
    }

    fn list_agents(&self) -> ProviderResult<Vec<AgentInfo>> {
        let response = self.get("/v1/agent", &[("limit", "50".to_string())])?;
        let data = response.get("data").cloned().unwrap_or(serde_json::json!([]));
        serde_json::from_value(data).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn create_vm(
        &self,
        snapshot_id: &str,
        device_id: &str,
        network: &str,
        name: &str,
    ) -> ProviderResult<VmHandle> {
        log::info!("Creating VM from snapshot {} with network={}", snapshot_id, network);
        let payload = serde_json::json!({
            "snapshot_id": snapshot_id,
            "device_id": device_id,
            "network_type": network,
            "name": name,
        });
        let response =
            self.request(reqwest::Method::POST, "/v1/restore/virt", &[], Some(payload))?;
        let virt_id = response["virt_id"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("missing virt_id".to_string()))?
            .to_string();
        log::info!("VM created successfully: {}", virt_id);
        Ok(VmHandle { virt_id })
    }

    fn vm_details(&self, vm: &VmHandle) -> ProviderResult<VmInfo> {
        let response = self.get(&format!("/v1/restore/virt/{}", vm.virt_id), &[])?;
        Self::unwrap_single(response, "VM")
    }

    fn wait_until_ready(
        &self,
        vm: &VmHandle,
        timeout: Duration,
        poll_interval: Duration,
        is_cancelled: &dyn Fn() -> bool,
    ) -> ProviderResult<bool> {
        log::info!("Waiting for VM {} to be ready (timeout: {:?})", vm.virt_id, timeout);
        let start = Instant::now();

        while start.elapsed() < timeout {
            if is_cancelled() {
                log::warn!("Cancelled while waiting for VM {}", vm.virt_id);
                return Ok(false);
            }
            match self.vm_details(vm) {
                Ok(details) => {
                    let state = details.state.unwrap_or_default().to_lowercase();
                    log::debug!("VM {} state: {}", vm.virt_id, state);
                    if state == "running" {
                        log::info!("VM {} is ready", vm.virt_id);
                        return Ok(true);
                    }
                }
                Err(e) => {
                    log::warn!("Error checking VM status: {}", e);
                }
            }
            std::thread::sleep(poll_interval);
        }

        log::error!("Timeout waiting for VM {} to be ready", vm.virt_id);
        Ok(false)
    }

    fn display_url(&self, vm: &VmHandle) -> ProviderResult<String> {
        let details = self.vm_details(vm)?;
        let password = details.vnc_password.unwrap_or_default();

        let websocket_uri = details
            .vnc
            .iter()
            .find(|entry| entry.entry_type == "cloud")
            .and_then(|entry| entry.websocket_uri.clone())
            .ok_or_else(|| {
                ProviderError::InvalidResponse(format!(
                    "No display websocket available for VM {}",
                    vm.virt_id
                ))
            })?;

        // The password query parameter needs a trailing '=' per the viewer's
        // URL format
        let url = format!(
            "{}?id={}&ws={}&password={}=",
            self.viewer_base,
            vm.virt_id,
            urlencoding::encode(&websocket_uri),
            password
        );
        log::info!("Constructed display URL for VM {}", vm.virt_id);
        Ok(url)
    }

    fn destroy_vm(&self, vm: &VmHandle) -> bool {
        log::info!("Destroying VM: {}", vm.virt_id);
        match self.request(
            reqwest::Method::DELETE,
            &format!("/v1/restore/virt/{}", vm.virt_id),
            &[],
            None,
        ) {
            Ok(_) => {
                log::info!("VM {} destroyed successfully", vm.virt_id);
                true
            }
            Err(e) => {
                log::error!("Failed to destroy VM {}: {}", vm.virt_id, e);
                false
            }
        }
    }
}
