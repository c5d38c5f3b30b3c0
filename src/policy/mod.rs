//! Policy & Approval Gate.
//!
//! A pure, deterministic mapping from `(PolicyConfig, tool_name)` to a
//! [`Decision`], plus a file-backed store of [`ApprovalRequest`] records for
//! tools that require a human to sign off before they run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::utils::atomic_write;

/// Enforcement mode for the policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Default deny unless the tool is explicitly allow-listed.
    Strict,
    /// Default allow unless the tool is explicitly deny-listed.
    #[default]
    Relaxed,
    /// Skip policy evaluation entirely. Only valid with a TTL or explicit opt-in.
    Off,
}

impl std::fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyMode::Strict => write!(f, "strict"),
            PolicyMode::Relaxed => write!(f, "relaxed"),
            PolicyMode::Off => write!(f, "off"),
        }
    }
}

/// Per-call decision produced by the gate. Not an error — a typed result fed
/// back into the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    RequireApproval,
}

/// Policy configuration, normally sourced from `config.json`'s `policy` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Tools allowed in `strict` mode (ignored otherwise).
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tools denied in `relaxed` mode (ignored otherwise).
    #[serde(default)]
    pub deny: Vec<String>,
    /// Tools that must go through the `ApprovalStore` regardless of mode.
    #[serde(default, rename = "requireApproval")]
    pub require_approval: Vec<String>,
    /// TTL, in seconds, for which `mode = off` is permitted before it must
    /// revert. `None` means no automatic expiry was configured.
    #[serde(default, rename = "offTtlSeconds")]
    pub off_ttl_seconds: Option<u64>,
    /// Explicit opt-in to run `mode = off` with no TTL at all.
    #[serde(default, rename = "allowPersistentOff")]
    pub allow_persistent_off: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Relaxed,
            allow: Vec::new(),
            deny: Vec::new(),
            require_approval: Vec::new(),
            off_ttl_seconds: None,
            allow_persistent_off: false,
        }
    }
}

impl PolicyConfig {
    /// `mode = off` is only valid with a positive TTL or explicit persistent opt-in.
    pub fn validate(&self) -> Result<(), crate::errors::GolemError> {
        if self.mode == PolicyMode::Off
            && self.off_ttl_seconds.is_none_or(|ttl| ttl == 0)
            && !self.allow_persistent_off
        {
            return Err(crate::errors::GolemError::Config(
                "policy.mode = \"off\" requires policy.offTtlSeconds > 0 or policy.allowPersistentOff = true".into(),
            ));
        }
        Ok(())
    }

    /// Emit the startup HIGH-RISK warning this configuration calls for, if any.
    pub fn startup_warning(&self) -> Option<String> {
        if self.mode == PolicyMode::Off && self.off_ttl_seconds.is_none() {
            Some(
                "HIGH-RISK: policy.mode = \"off\" with no offTtlSeconds — every tool call \
                 runs unchecked until the policy is changed"
                    .to_string(),
            )
        } else {
            None
        }
    }
}

/// Pure function: identical `(config, tool_name)` always yields the same
/// decision. `require_approval` takes precedence over mode-derived allow/deny
/// so a tool can be allow-listed for the gate yet still stop for a human.
pub fn decide(config: &PolicyConfig, tool_name: &str) -> Decision {
    if config.require_approval.iter().any(|t| t == tool_name) {
        return Decision::RequireApproval;
    }

    match config.mode {
        PolicyMode::Off => Decision::Allow,
        PolicyMode::Strict => {
            if config.allow.iter().any(|t| t == tool_name) {
                Decision::Allow
            } else {
                Decision::Deny
            }
        }
        PolicyMode::Relaxed => {
            if config.deny.iter().any(|t| t == tool_name) {
                Decision::Deny
            } else {
                Decision::Allow
            }
        }
    }
}

/// Status of a pending/decided tool-call approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A single tool invocation suspended pending human sign-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Monotonically increasing across the store; never reused.
    pub id: u64,
    pub tool_name: String,
    pub args_json: String,
    pub status: ApprovalStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub decided_by: Option<String>,
    pub decision_note: Option<String>,
    pub decided_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ApprovalRequest {
    /// The placeholder text fed back to the LLM while a call is suspended.
    pub fn placeholder(&self) -> String {
        format!("awaiting approval for {}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApprovalFile {
    version: u32,
    next_id: u64,
    requests: Vec<ApprovalRequest>,
}

impl Default for ApprovalFile {
    fn default() -> Self {
        Self {
            version: 1,
            next_id: 1,
            requests: Vec::new(),
        }
    }
}

/// File-backed store of [`ApprovalRequest`]s, persisted at
/// `<workspace>/state/approvals.json` via temp-file + rename.
pub struct ApprovalStore {
    path: PathBuf,
    inner: Mutex<ApprovalFile>,
}

impl ApprovalStore {
    /// Load the store from `path`, tolerating a missing file (starts empty).
    /// A malformed file is a fatal error, matching the cron store's contract.
    pub fn load(path: PathBuf) -> Result<Self> {
        let inner = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading approval store {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing approval store {}", path.display()))?
        } else {
            ApprovalFile::default()
        };
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    fn save_locked(&self, file: &ApprovalFile) -> Result<()> {
        let content = serde_json::to_string_pretty(file)?;
        atomic_write(&self.path, &content)
    }

    /// Create a new pending request and persist it. Returns the assigned id.
    pub async fn create(&self, tool_name: &str, args_json: &str) -> Result<ApprovalRequest> {
        let mut file = self.inner.lock().await;
        let id = file.next_id;
        file.next_id += 1;
        let request = ApprovalRequest {
            id,
            tool_name: tool_name.to_string(),
            args_json: args_json.to_string(),
            status: ApprovalStatus::Pending,
            created_at: chrono::Utc::now(),
            decided_by: None,
            decision_note: None,
            decided_at: None,
        };
        file.requests.push(request.clone());
        self.save_locked(&file)?;
        Ok(request)
    }

    pub async fn list(&self) -> Vec<ApprovalRequest> {
        self.inner.lock().await.requests.clone()
    }

    pub async fn get(&self, id: u64) -> Option<ApprovalRequest> {
        self.inner
            .lock()
            .await
            .requests
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Terminal transitions are one-way: approving/rejecting an already-decided
    /// request is rejected.
    async fn decide(
        &self,
        id: u64,
        status: ApprovalStatus,
        decided_by: Option<String>,
        decision_note: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut file = self.inner.lock().await;
        let request = file
            .requests
            .iter_mut()
            .find(|r| r.id == id)
            .with_context(|| format!("no approval request with id {}", id))?;
        if request.status != ApprovalStatus::Pending {
            anyhow::bail!(
                "approval request {} already decided ({:?})",
                id,
                request.status
            );
        }
        request.status = status;
        request.decided_by = decided_by;
        request.decision_note = decision_note;
        request.decided_at = Some(chrono::Utc::now());
        let updated = request.clone();
        self.save_locked(&file)?;
        Ok(updated)
    }

    pub async fn approve(&self, id: u64, decided_by: Option<String>) -> Result<ApprovalRequest> {
        self.decide(id, ApprovalStatus::Approved, decided_by, None)
            .await
    }

    pub async fn reject(
        &self,
        id: u64,
        decided_by: Option<String>,
        note: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.decide(id, ApprovalStatus::Rejected, decided_by, note)
            .await
    }
}

/// Locate the approval store under the standard workspace state directory.
pub fn default_approval_store_path(workspace: &Path) -> PathBuf {
    workspace.join("state").join("approvals.json")
}

impl ApprovalStore {
    /// An empty store backed by a throwaway path. Used for tests and other
    /// callers that don't need persistence across restarts.
    #[doc(hidden)]
    pub fn in_memory() -> Self {
        let path = std::env::temp_dir().join(format!("golem-approvals-{}.json", uuid::Uuid::new_v4()));
        Self {
            path,
            inner: Mutex::new(ApprovalFile::default()),
        }
    }
}

/// Shared handle used by the agent loop and the CLI/gateway to evaluate and
/// act on policy decisions.
#[derive(Clone)]
pub struct PolicyGate {
    config: Arc<Mutex<PolicyConfig>>,
    pub approvals: Arc<ApprovalStore>,
}

impl PolicyGate {
    pub fn new(config: PolicyConfig, approvals: Arc<ApprovalStore>) -> Self {
        if let Some(warning) = config.startup_warning() {
            warn!("{}", warning);
        }
        Self {
            config: Arc::new(Mutex::new(config)),
            approvals,
        }
    }

    pub async fn decide(&self, tool_name: &str) -> Decision {
        decide(&*self.config.lock().await, tool_name)
    }

    pub async fn set_mode(&self, mode: PolicyMode) {
        self.config.lock().await.mode = mode;
    }

    pub async fn mode(&self) -> PolicyMode {
        self.config.lock().await.mode
    }

    pub async fn snapshot(&self) -> PolicyConfig {
        self.config.lock().await.clone()
    }
}
