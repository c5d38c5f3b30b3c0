pub mod proxy;

use crate::agent::tools::Tool;
use crate::config::{McpConfig, McpServerConfig};
use anyhow::Result;
use rmcp::ServiceExt;
use rmcp::transport::TokioChildProcess;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use proxy::McpProxyTool;

/// Reconnect attempts per spec §4.4 before a server is given up on for this call.
const RECONNECT_MAX_ATTEMPTS: u32 = 3;
/// `retry_index * RECONNECT_BACKOFF_MS` between reconnect attempts.
const RECONNECT_BACKOFF_MS: u64 = 250;

/// A running MCP server connection.
struct RunningMcpServer {
    client: rmcp::service::RunningService<rmcp::RoleClient, ()>,
    trust_level: String,
    tool_count: AtomicUsize,
}

/// Per-server state the manager tracks: either a live connection or the
/// reason it's degraded. `degraded ⇒ tool_count = 0` always holds because a
/// degraded server has no `RunningMcpServer` to report a count from.
enum ServerEntry {
    Connected(RunningMcpServer),
    Degraded { message: String },
}

/// Connection status for a single configured MCP server, connected or not.
#[derive(Debug, Clone)]
pub struct McpServerStatus {
    pub server_name: String,
    pub connected: bool,
    /// Always 0 when `connected` is false — a degraded server contributes no
    /// tools to the registry.
    pub tool_count: usize,
    pub message: Option<String>,
}

/// Manages connections to MCP servers, discovers their tools, and reconnects
/// a degraded server transparently the next time one of its tools is called.
pub struct McpManager {
    /// Config for every enabled server, kept around so a degraded or
    /// first-error server can be reconnected without the original config.
    configs: HashMap<String, McpServerConfig>,
    entries: Mutex<HashMap<String, ServerEntry>>,
}

impl McpManager {
    /// Connect to all enabled MCP servers defined in config. Servers that
    /// fail to connect are recorded as degraded rather than dropped silently,
    /// so `statuses()` can still report on them and a later `call_tool` can
    /// reconnect them.
    pub async fn new(config: &McpConfig) -> Result<Self> {
        let mut configs = HashMap::new();
        let mut entries = HashMap::new();

        for (name, server_cfg) in &config.servers {
            if !server_cfg.enabled {
                info!("MCP server '{}' is disabled, skipping", name);
                continue;
            }
            configs.insert(name.clone(), server_cfg.clone());

            let entry = match Self::connect_and_discover(name, server_cfg).await {
                Ok(server) => {
                    info!(
                        "MCP server '{}' connected (trust: {})",
                        name, server.trust_level
                    );
                    ServerEntry::Connected(server)
                }
                Err(e) => {
                    warn!("Failed to connect MCP server '{}': {}", name, e);
                    ServerEntry::Degraded {
                        message: e.to_string(),
                    }
                }
            };
            entries.insert(name.clone(), entry);
        }

        Ok(Self {
            configs,
            entries: Mutex::new(entries),
        })
    }

    async fn connect_server(name: &str, cfg: &McpServerConfig) -> Result<RunningMcpServer> {
        let mut cmd = Command::new(&cfg.command);
        cmd.args(&cfg.args);
        for (k, v) in &cfg.env {
            cmd.env(k, v);
        }
        // Pipe stdin/stdout for MCP communication, inherit stderr for logging
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::inherit());

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| anyhow::anyhow!("connect failed: spawning '{}': {}", name, e))?;
        let client = ()
            .serve(transport)
            .await
            .map_err(|e| anyhow::anyhow!("connect failed: MCP handshake for '{}': {}", name, e))?;

        Ok(RunningMcpServer {
            client,
            trust_level: cfg.trust.clone(),
            tool_count: AtomicUsize::new(0),
        })
    }

    /// Connect then immediately discover tool count, matching the manager's
    /// connect-then-list-tools startup contract (spec §4.4).
    async fn connect_and_discover(name: &str, cfg: &McpServerConfig) -> Result<RunningMcpServer> {
        let server = Self::connect_server(name, cfg).await?;
        let count = server
            .client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| anyhow::anyhow!("list tools failed: server '{}': {}", name, e))?
            .len();
        server.tool_count.store(count, Ordering::Relaxed);
        Ok(server)
    }

    /// Retry connect+discover up to [`RECONNECT_MAX_ATTEMPTS`] times with
    /// `retry_index * RECONNECT_BACKOFF_MS` backoff between attempts. On
    /// success the server is marked connected again; on exhaustion it stays
    /// degraded and the last error is returned.
    async fn reconnect_server(&self, name: &str) -> Result<()> {
        let cfg = self
            .configs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("no config for MCP server '{}'", name))?
            .clone();

        let mut last_err = None;
        for retry_index in 0..RECONNECT_MAX_ATTEMPTS {
            if retry_index > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    u64::from(retry_index) * RECONNECT_BACKOFF_MS,
                ))
                .await;
            }

            match Self::connect_and_discover(name, &cfg).await {
                Ok(server) => {
                    info!(
                        "MCP server '{}' recovered after {} attempt(s)",
                        name,
                        retry_index + 1
                    );
                    let mut entries = self.entries.lock().await;
                    entries.insert(name.to_string(), ServerEntry::Connected(server));
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "MCP server '{}' reconnect attempt {} failed: {}",
                        name,
                        retry_index + 1,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        let message = last_err
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "reconnect exhausted with no recorded error".to_string());
        self.entries.lock().await.insert(
            name.to_string(),
            ServerEntry::Degraded {
                message: message.clone(),
            },
        );
        Err(anyhow::anyhow!(
            "MCP server '{}' still degraded after {} attempt(s): {}",
            name,
            RECONNECT_MAX_ATTEMPTS,
            message
        ))
    }

    /// Invoke `tool_name` on `server_name`. If the server is currently
    /// degraded, or the call fails against a connected server, transparently
    /// reconnects (spec §4.4) and retries the call once before giving up.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<rmcp::model::CallToolResult> {
        let needs_reconnect = {
            let entries = self.entries.lock().await;
            !matches!(entries.get(server_name), Some(ServerEntry::Connected(_)))
        };

        if needs_reconnect {
            self.reconnect_server(server_name).await?;
        }

        let request = rmcp::model::CallToolRequestParams {
            meta: None,
            name: std::borrow::Cow::Owned(tool_name.to_string()),
            arguments: arguments.clone(),
            task: None,
        };

        let first_attempt = {
            let entries = self.entries.lock().await;
            match entries.get(server_name) {
                Some(ServerEntry::Connected(server)) => server.client.peer().call_tool(request).await,
                _ => return Err(anyhow::anyhow!("MCP server '{}' is not connected", server_name)),
            }
        };

        match first_attempt {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(
                    "MCP tool call to '{}.{}' failed, attempting reconnect: {}",
                    server_name, tool_name, e
                );
                self.reconnect_server(server_name).await?;
                let retry_request = rmcp::model::CallToolRequestParams {
                    meta: None,
                    name: std::borrow::Cow::Owned(tool_name.to_string()),
                    arguments,
                    task: None,
                };
                let entries = self.entries.lock().await;
                match entries.get(server_name) {
                    Some(ServerEntry::Connected(server)) => Ok(server
                        .client
                        .peer()
                        .call_tool(retry_request)
                        .await
                        .map_err(|e| anyhow::anyhow!("MCP tool call failed after reconnect: {}", e))?),
                    _ => Err(anyhow::anyhow!("MCP server '{}' is not connected", server_name)),
                }
            }
        }
    }

    /// Discover all tools across all connected MCP servers and wrap them as
    /// `impl Tool`. Returns `(trust_level, tool)` tuples so callers can apply
    /// trust-based filtering. Must be called on an `Arc<McpManager>` so the
    /// resulting proxies can route calls back through the manager (and thus
    /// transparently survive a reconnect) rather than holding a raw `Peer`.
    pub async fn discover_tools(self: &Arc<Self>) -> Vec<(String, Arc<dyn Tool>)> {
        let mut tools: Vec<(String, Arc<dyn Tool>)> = Vec::new();
        let names: Vec<String> = self.entries.lock().await.keys().cloned().collect();

        for name in names {
            let (trust_level, mcp_tools) = {
                let entries = self.entries.lock().await;
                let Some(ServerEntry::Connected(server)) = entries.get(&name) else {
                    continue;
                };
                match server.client.peer().list_all_tools().await {
                    Ok(mcp_tools) => {
                        server.tool_count.store(mcp_tools.len(), Ordering::Relaxed);
                        (server.trust_level.clone(), mcp_tools)
                    }
                    Err(e) => {
                        warn!("Failed to list tools from MCP server '{}': {}", name, e);
                        server.tool_count.store(0, Ordering::Relaxed);
                        continue;
                    }
                }
            };

            for mcp_tool in mcp_tools {
                let description = mcp_tool.description.as_deref().unwrap_or("").to_string();
                let input_schema = serde_json::Value::Object((*mcp_tool.input_schema).clone());

                let proxy = McpProxyTool::new(
                    Arc::clone(self),
                    name.clone(),
                    mcp_tool.name.to_string(),
                    description,
                    input_schema,
                );
                tools.push((trust_level.clone(), Arc::new(proxy)));
                info!(
                    "Discovered MCP tool '{}' from server '{}' (trust: {})",
                    mcp_tool.name, name, trust_level
                );
            }
        }

        tools
    }

    /// Connection status for every configured, enabled MCP server — both
    /// currently connected servers and ones that are degraded.
    pub async fn statuses(&self) -> Vec<McpServerStatus> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|(name, entry)| match entry {
                ServerEntry::Connected(server) => McpServerStatus {
                    server_name: name.clone(),
                    connected: true,
                    tool_count: server.tool_count.load(Ordering::Relaxed),
                    message: None,
                },
                ServerEntry::Degraded { message } => McpServerStatus {
                    server_name: name.clone(),
                    connected: false,
                    tool_count: 0,
                    message: Some(message.clone()),
                },
            })
            .collect()
    }

    /// Gracefully shut down all currently connected MCP server connections.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (name, entry) in entries.drain() {
            if let ServerEntry::Connected(server) = entry
                && let Err(e) = server.client.cancel().await
            {
                warn!("Error shutting down MCP server '{}': {}", name, e);
            }
        }
    }
}
