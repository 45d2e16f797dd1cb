use std::collections::HashMap;
use std::process::Stdio as ProcStdio;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hypertool_error::ProxyError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPC_VERSION;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::Connection;
use super::ConnectionState;
use crate::pending::PendingRequests;

/// Spawn instructions for a downstream server reached over stdio.
#[derive(Debug, Clone)]
pub struct StdioTarget {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

struct ChildHandle {
    child: Child,
    stdin: tokio::process::ChildStdin,
}

/// One stdio transport: a spawned child process, framed newline-delimited
/// JSON-RPC on its stdin/stdout. The proxy plays the client role here,
/// the reverse of the framing the upstream stdio transport does.
pub struct StdioConnection {
    target: StdioTarget,
    pending: Arc<PendingRequests>,
    child: Mutex<Option<ChildHandle>>,
    connected: AtomicBool,
}

impl StdioConnection {
    pub fn new(target: StdioTarget) -> Self {
        Self {
            target,
            pending: Arc::new(PendingRequests::new()),
            child: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn spawn(&self) -> Result<(Child, tokio::process::ChildStdin), ProxyError> {
        let mut command = Command::new(&self.target.command);
        command
            .args(&self.target.args)
            .envs(&self.target.env)
            .stdin(ProcStdio::piped())
            .stdout(ProcStdio::piped())
            .stderr(ProcStdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ProxyError::connection(format!("failed to spawn '{}': {e}", self.target.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProxyError::connection("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProxyError::connection("child stdout not captured"))?;

        let pending = self.pending.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JSONRPCMessage>(&line) {
                            Ok(JSONRPCMessage::Response(resp)) => {
                                pending.resolve(resp.id, Ok(resp.result)).await;
                            }
                            Ok(JSONRPCMessage::Error(err)) => {
                                pending.resolve(err.id, Err(err.error)).await;
                            }
                            Ok(_) => {
                                debug!("ignoring non-response message from downstream stdio server");
                            }
                            Err(e) => error!("failed to parse downstream JSON-RPC line: {e}"),
                        }
                    }
                    Ok(None) => {
                        debug!("downstream stdio server closed stdout (EOF)");
                        break;
                    }
                    Err(e) => {
                        error!("error reading downstream stdio server stdout: {e}");
                        break;
                    }
                }
            }
            pending
                .fail_all(mcp_types::JSONRPCErrorError {
                    code: mcp_types::error_codes::INTERNAL_ERROR,
                    message: "downstream stdio transport closed".to_string(),
                    data: None,
                })
                .await;
        });

        Ok((child, stdin))
    }

    async fn write_request(
        &self,
        stdin: &mut tokio::process::ChildStdin,
        request: &JSONRPCRequest,
    ) -> Result<(), ProxyError> {
        let mut line =
            serde_json::to_string(request).map_err(|e| ProxyError::Internal(e.to_string()))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProxyError::connection(format!("write to child stdin failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ProxyError::connection(format!("flush child stdin failed: {e}")))
    }
}

#[async_trait]
impl Connection for StdioConnection {
    async fn connect(&self) -> Result<(), ProxyError> {
        let (child, stdin) = self.spawn()?;
        *self.child.lock().await = Some(ChildHandle { child, stdin });

        let init_params = serde_json::json!({
            "protocolVersion": mcp_types::MCP_SCHEMA_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "hypertool-mcp-proxy", "version": env!("CARGO_PKG_VERSION") },
        });
        self.call("initialize", Some(init_params), Duration::from_secs(10))
            .await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProxyError> {
        let id = self.pending.next_request_id();
        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        let rx = self.pending.register(id).await;

        {
            let mut guard = self.child.lock().await;
            let handle = guard
                .as_mut()
                .ok_or_else(|| ProxyError::connection_fatal("stdio connection not established"))?;
            self.write_request(&mut handle.stdin, &request).await?;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(ProxyError::connection(err.message)),
            Ok(Err(_)) => Err(ProxyError::connection("downstream transport closed mid-call")),
            Err(_) => Err(ProxyError::Timeout(timeout)),
        }
    }

    async fn close(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut handle) = guard.take() {
            let shutdown = JSONRPCMessage::Notification(mcp_types::JSONRPCNotification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: "notifications/cancelled".to_string(),
                params: None,
            });
            if let Ok(mut line) = serde_json::to_string(&shutdown) {
                line.push('\n');
                let _ = handle.stdin.write_all(line.as_bytes()).await;
                let _ = handle.stdin.flush().await;
            }
            match tokio::time::timeout(Duration::from_secs(2), handle.child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("downstream process did not exit in time, killing");
                    let _ = handle.child.kill().await;
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_healthy(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_fast_for_nonexistent_command() {
        let target = StdioTarget {
            command: "definitely-not-a-real-binary-xyz".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let conn = StdioConnection::new(target);
        let err = conn.connect().await.unwrap_err();
        // A failed spawn is a transient `ConnectionError`, retryable by
        // default — not the binary's fault, the downstream command's.
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn is_healthy_false_before_connect() {
        let target = StdioTarget {
            command: "true".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let conn = StdioConnection::new(target);
        assert!(!conn.is_healthy().await);
    }
}
