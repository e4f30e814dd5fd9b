//! Line-delimited JSON-RPC transport.
//!
//! One JSON object per line in each direction. A request holds the exchange
//! lock from write until its matching response has been read, so concurrent
//! callers on one server never consume each other's responses.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

struct Io<W, R> {
    /// `None` once the transport has been closed.
    writer: Option<W>,
    reader: BufReader<R>,
}

/// JSON-RPC transport over a writer/reader pair (a child's stdin/stdout in
/// production).
pub struct JsonRpcTransport<W, R> {
    server_name: String,
    io: Mutex<Io<W, R>>,
}

impl<W, R> JsonRpcTransport<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    pub fn new(server_name: &str, writer: W, reader: R) -> Self {
        Self {
            server_name: server_name.to_string(),
            io: Mutex::new(Io {
                writer: Some(writer),
                reader: BufReader::new(reader),
            }),
        }
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn write_line<T: Serialize>(
        &self,
        writer: &mut Option<W>,
        message: &T,
    ) -> Result<(), McpError> {
        let writer = writer
            .as_mut()
            .ok_or_else(|| self.transport_error("transport is closed".into()))?;
        let mut line = serde_json::to_string(message)
            .map_err(|e| self.transport_error(format!("failed to serialize message: {e}")))?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("flush failed: {e}")))
    }

    /// Send a request and return its `result`.
    ///
    /// Lines that are not JSON-RPC responses (server logs, notifications,
    /// stale ids) are skipped.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = next_request_id();
        let mut io = self.io.lock().await;
        let Io { writer, reader } = &mut *io;

        self.write_line(writer, &JsonRpcRequest::new(id, method, params))
            .await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| self.transport_error(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(self.transport_error("server closed its output".into()));
            }

            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(line.trim()) else {
                continue;
            };
            if response.id == Some(id) {
                return into_result(response);
            }
        }
    }

    /// Send a notification. No response is read.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut io = self.io.lock().await;
        self.write_line(&mut io.writer, &JsonRpcNotification::new(method, params))
            .await
    }

    /// Drop the writer, signalling end of input to the server. Later
    /// requests fail with a transport error.
    pub async fn close(&self) {
        self.io.lock().await.writer.take();
    }
}

fn into_result(response: JsonRpcResponse) -> Result<Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Fake server: answers each request with `{"echo": method}` after
    /// emitting a log line and an unrelated notification.
    fn spawn_echo_server(
        requests: tokio::io::DuplexStream,
        mut responses: tokio::io::DuplexStream,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(requests).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };
                let reply = if msg["method"] == "fail" {
                    serde_json::json!({"jsonrpc":"2.0","id":id,"error":{"code":-32601,"message":"no such method"}})
                } else {
                    serde_json::json!({"jsonrpc":"2.0","id":id,"result":{"echo":msg["method"]}})
                };
                let out = format!(
                    "server log line\n{}\n{}\n",
                    serde_json::json!({"jsonrpc":"2.0","method":"notifications/message"}),
                    reply
                );
                responses.write_all(out.as_bytes()).await.unwrap();
            }
        })
    }

    fn transport() -> JsonRpcTransport<tokio::io::DuplexStream, tokio::io::DuplexStream> {
        let (client_w, server_r) = duplex(4096);
        let (server_w, client_r) = duplex(4096);
        spawn_echo_server(server_r, server_w);
        JsonRpcTransport::new("echo", client_w, client_r)
    }

    #[tokio::test]
    async fn test_request_skips_noise_and_matches_id() {
        let t = transport();
        let result = t.request("tools/list", None).await.unwrap();
        assert_eq!(result["echo"], "tools/list");
        let result = t.request("tools/call", None).await.unwrap();
        assert_eq!(result["echo"], "tools/call");
    }

    #[tokio::test]
    async fn test_error_response_maps_to_server_error() {
        let t = transport();
        match t.request("fail", None).await {
            Err(McpError::ServerError { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "no such method");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_their_own_responses() {
        let t = std::sync::Arc::new(transport());
        let calls = ["a", "b", "c", "d"].map(|m| {
            let t = t.clone();
            tokio::spawn(async move { (m, t.request(m, None).await.unwrap()) })
        });
        for call in calls {
            let (method, result) = call.await.unwrap();
            assert_eq!(result["echo"], method);
        }
    }

    #[tokio::test]
    async fn test_closed_output_is_transport_error() {
        let (client_w, _server_r) = duplex(1024);
        let (server_w, client_r) = duplex(1024);
        drop(server_w);
        let t = JsonRpcTransport::new("gone", client_w, client_r);
        let err = t.request("ping", None).await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_close_ends_server_input() {
        let (client_w, server_r) = duplex(1024);
        let (_server_w, client_r) = duplex(1024);
        let t = JsonRpcTransport::new("closing", client_w, client_r);
        t.notify("shutdown", None).await.unwrap();
        t.close().await;

        let mut lines = BufReader::new(server_r).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(first.contains("\"shutdown\""));
        assert!(lines.next_line().await.unwrap().is_none());

        let err = t.notify("late", None).await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }
}
