//! Bridge server process lifecycle.
//!
//! Each bridge server runs as a child process speaking JSON-RPC over stdio.
//! Spawning performs the MCP handshake (`initialize` followed by the
//! `notifications/initialized` notification).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::JsonRpcTransport;
use super::types::{BridgeServerConfig, PROTOCOL_VERSION};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period after the shutdown notification and stdin EOF before the
/// process is killed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stderr captured on a failed start is cut to this many bytes.
const STDERR_CAPTURE_LIMIT: usize = 2000;

pub type StdioTransport = JsonRpcTransport<ChildStdin, ChildStdout>;

// ─── ManagedServer ───────────────────────────────────────────────────────────

/// A running bridge server.
pub struct ManagedServer {
    pub name: String,
    pub transport: StdioTransport,
    process: Mutex<Child>,
}

impl ManagedServer {
    /// Ask the server to exit, killing it if it does not within the grace period.
    ///
    /// The server is sent a `shutdown` notification and then its stdin is
    /// closed, so a well-behaved server exits without waiting out the timeout.
    pub async fn shutdown(&self) {
        if let Err(e) = self.transport.notify("shutdown", None).await {
            tracing::debug!(server = %self.name, error = %e, "shutdown notification not delivered");
        }
        self.transport.close().await;

        let mut process = self.process.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "bridge server exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "bridge server ignored shutdown, killing");
                if let Err(e) = process.kill().await {
                    tracing::warn!(server = %self.name, error = %e, "failed to kill bridge server");
                }
            }
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn one server and complete the handshake.
pub async fn spawn_server(
    name: &str,
    config: &BridgeServerConfig,
) -> Result<ManagedServer, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.cwd {
        cmd.current_dir(dir);
    }

    let spawn_failed = |reason: String| McpError::SpawnFailed {
        name: name.to_string(),
        reason,
    };

    let mut child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_failed("failed to capture stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_failed("failed to capture stdout".into()))?;
    let stderr = child.stderr.take();

    let transport = JsonRpcTransport::new(name, stdin, stdout);

    match tokio::time::timeout(INIT_TIMEOUT, handshake(&transport)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = child.kill().await;
            return Err(McpError::InitFailed {
                name: name.to_string(),
                reason: format!("{e}{}", stderr_suffix(stderr).await),
            });
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(McpError::InitFailed {
                name: name.to_string(),
                reason: format!(
                    "initialization timed out after {}s{}",
                    INIT_TIMEOUT.as_secs(),
                    stderr_suffix(stderr).await
                ),
            });
        }
    }

    tracing::info!(server = %name, command = %config.command, "bridge server started");

    Ok(ManagedServer {
        name: name.to_string(),
        transport,
        process: Mutex::new(child),
    })
}

async fn handshake(transport: &StdioTransport) -> Result<(), McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    transport.request("initialize", Some(params)).await?;
    transport.notify("notifications/initialized", None).await
}

/// Whatever the process wrote to stderr, formatted as an error suffix.
async fn stderr_suffix(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut buf = String::new();
    let read = tokio::time::timeout(
        Duration::from_millis(500),
        stderr.read_to_string(&mut buf),
    )
    .await;
    if !matches!(read, Ok(Ok(_))) || buf.trim().is_empty() {
        return String::new();
    }
    let mut text = buf.trim().to_string();
    if text.len() > STDERR_CAPTURE_LIMIT {
        let mut cut = STDERR_CAPTURE_LIMIT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...(truncated)");
    }
    format!(" | stderr: {text}")
}

/// Spawn every configured server concurrently.
///
/// Servers that fail to start are returned separately; partial startup is
/// acceptable.
pub async fn spawn_all(
    configs: &HashMap<String, BridgeServerConfig>,
) -> (Vec<ManagedServer>, Vec<(String, McpError)>) {
    let attempts = configs.iter().map(|(name, config)| async move {
        (name.clone(), spawn_server(name, config).await)
    });

    let mut servers = Vec::new();
    let mut errors = Vec::new();
    for (name, result) in futures::future::join_all(attempts).await {
        match result {
            Ok(server) => servers.push(server),
            Err(e) => errors.push((name, e)),
        }
    }
    servers.sort_by(|a, b| a.name.cmp(&b.name));
    (servers, errors)
}
