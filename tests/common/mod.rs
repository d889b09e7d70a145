//! Shared scaffolding for the integration suites: a rule-based scripted
//! oracle and a scripted restore provider.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use restore_verify::oracle::{OracleResult, OracleTransport};
use restore_verify::provider::{
    AgentInfo, ProviderError, ProviderResult, RestoreProvider, SnapshotInfo, SnapshotLocation,
    VmHandle, VmInfo,
};

/// Build a canonical three-field verdict reply
pub fn verdict_reply(verified: bool, confidence: &str, description: &str) -> String {
    format!(
        "VERIFIED: {}\nCONFIDENCE: {}\nDESCRIPTION: {}",
        if verified { "yes" } else { "no" },
        confidence,
        description
    )
}

/// Build a canonical field-detection reply
pub fn fields_reply(
    username_field: bool,
    password_field: bool,
    displayed: Option<&str>,
    description: &str,
) -> String {
    format!(
        "USERNAME_FIELD: {}\nPASSWORD_FIELD: {}\nDISPLAYED_USERNAME: {}\nDESCRIPTION: {}",
        if username_field { "yes" } else { "no" },
        if password_field { "yes" } else { "no" },
        displayed.unwrap_or("none"),
        description
    )
}

enum Script {
    Always(String),
    /// Replies consumed in order; the last one repeats
    Sequence(Mutex<Vec<String>>),
}

/// Oracle transport that answers by matching prompt substrings against
/// configured rules. Unmatched prompts get a passing verdict so tests only
/// script the checks they care about.
pub struct ScriptedOracle {
    rules: Vec<(String, Script)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `reply` for prompts containing `pattern`
    pub fn on(mut self, pattern: &str, reply: &str) -> Self {
        self.rules.push((pattern.to_string(), Script::Always(reply.to_string())));
        self
    }

    /// Answer prompts containing `pattern` with `replies` in order; the last
    /// reply repeats once the sequence is exhausted
    pub fn on_sequence(mut self, pattern: &str, replies: Vec<String>) -> Self {
        let mut ordered = replies;
        ordered.reverse(); // pop from the back
        self.rules
            .push((pattern.to_string(), Script::Sequence(Mutex::new(ordered))));
        self
    }

    /// Number of queries whose prompt contained `pattern`
    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(pattern))
            .count()
    }
}

impl OracleTransport for ScriptedOracle {
    fn query(
        &self,
        _image: Option<&[u8]>,
        _system: Option<&str>,
        prompt: &str,
    ) -> OracleResult<String> {
        self.calls.lock().unwrap().push(prompt.to_string());

        for (pattern, script) in &self.rules {
            if prompt.contains(pattern.as_str()) {
                return Ok(match script {
                    Script::Always(reply) => reply.clone(),
                    Script::Sequence(replies) => {
                        let mut replies = replies.lock().unwrap();
                        if replies.len() > 1 {
                            replies.pop().unwrap()
                        } else {
                            replies.last().cloned().unwrap_or_default()
                        }
                    }
                });
            }
        }
        Ok(verdict_reply(true, "high", "As expected."))
    }
}

/// Provider returning one canned snapshot and VM, counting teardowns.
/// Destroy is idempotent: the first call succeeds, later calls return false.
pub struct ScriptedProvider {
    destroy_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            destroy_calls: AtomicUsize::new(0),
        }
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    fn snapshot() -> SnapshotInfo {
        SnapshotInfo {
            snapshot_id: "s_test01".to_string(),
            agent_id: Some("a_test01".to_string()),
            backup_started_at: Some("2026-08-06T01:00:00Z".to_string()),
            backup_ended_at: Some("2026-08-06T01:30:00Z".to_string()),
            locations: vec![SnapshotLocation {
                device_id: "d_cloud01".to_string(),
                location_type: "cloud".to_string(),
            }],
        }
    }
}

impl RestoreProvider for ScriptedProvider {
    fn latest_snapshot(&self, _agent_id: Option<&str>) -> ProviderResult<Option<SnapshotInfo>> {
        Ok(Some(Self::snapshot()))
    }

    fn latest_snapshots_by_agent(&self) -> ProviderResult<Vec<SnapshotInfo>> {
        Ok(vec![Self::snapshot()])
    }

    fn agent_details(&self, agent_id: &str) -> ProviderResult<AgentInfo> {
        Ok(AgentInfo {
            agent_id: agent_id.to_string(),
            hostname: Some("db01".to_string()),
            os: Some("Windows Server 2022".to_string()),
            os_version: None,
            ip_address: None,
        })
    }

    fn list_agents(&self) -> ProviderResult<Vec<AgentInfo>> {
        Ok(vec![self.agent_details("a_test01")?])
    }

    fn create_vm(
        &self,
        snapshot_id: &str,
        _device_id: &str,
        _network: &str,
        _name: &str,
    ) -> ProviderResult<VmHandle> {
        if snapshot_id != "s_test01" {
            return Err(ProviderError::InvalidResponse("unknown snapshot".to_string()));
        }
        Ok(VmHandle {
            virt_id: "vm_test01".to_string(),
        })
    }

    fn vm_details(&self, vm: &VmHandle) -> ProviderResult<VmInfo> {
        Ok(VmInfo {
            virt_id: vm.virt_id.clone(),
            state: Some("running".to_string()),
            snapshot_id: Some("s_test01".to_string()),
            vnc: vec![],
            vnc_password: None,
        })
    }

    fn wait_until_ready(
        &self,
        _vm: &VmHandle,
        _timeout: Duration,
        _poll_interval: Duration,
        _is_cancelled: &dyn Fn() -> bool,
    ) -> ProviderResult<bool> {
        Ok(true)
    }

    fn display_url(&self, vm: &VmHandle) -> ProviderResult<String> {
        Ok(format!("synthetic://{}", vm.virt_id))
    }

    fn destroy_vm(&self, _vm: &VmHandle) -> bool {
        // First teardown succeeds; a VM that is already gone reports false
        self.destroy_calls.fetch_add(1, Ordering::SeqCst) == 0
    }
}
