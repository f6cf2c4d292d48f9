//! Line-delimited transports for [`Session`]: process stdio and TCP.
//!
//! Each connection handles one request at a time. The query itself runs on
//! the blocking pool so a slow impact walk never stalls other connections.

use crate::error::GraphError;
use crate::mcp::{self, Session};
use crate::service::IndexService;
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const INTERNAL_ERROR: i64 = -32603;

/// Serves one client until its input closes.
pub async fn serve_connection<R, W>(session: Session, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("read request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<Value>(line) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!("unparseable frame: {err}");
                write_frame(&mut writer, &mcp::parse_error_response(&err)).await?;
                continue;
            }
        };
        if let Some(response) = handle(&session, message).await {
            write_frame(&mut writer, &response).await?;
        }
    }
    Ok(())
}

async fn handle(session: &Session, message: Value) -> Option<Value> {
    let id = message.get("id").cloned().unwrap_or(Value::Null);
    let worker = session.clone();
    run_with_timeout(id, session.request_timeout(), move || {
        worker.handle_message(message)
    })
    .await
}

/// Runs `work` on the blocking pool and answers for it when it panics or
/// outlives `timeout`. A timed-out task is abandoned, not cancelled.
async fn run_with_timeout<F>(id: Value, timeout: Duration, work: F) -> Option<Value>
where
    F: FnOnce() -> Option<Value> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::error!("request task failed: {err}");
            Some(mcp::jsonrpc_error(
                id,
                INTERNAL_ERROR,
                "internal error",
                json!({ "kind": "internal" }),
            ))
        }
        Err(_) => {
            let millis = timeout.as_millis() as u64;
            tracing::warn!(timeout_ms = millis, "request timed out");
            Some(mcp::graph_error_response(id, &GraphError::Timeout(millis)))
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Value) -> Result<()> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await.context("write response")?;
    writer.flush().await.context("flush response")?;
    Ok(())
}

pub async fn serve_stdio(service: Arc<IndexService>) -> Result<()> {
    tracing::info!("serving on stdio");
    let session = Session::new(service);
    serve_connection(session, tokio::io::stdin(), tokio::io::stdout()).await
}

pub async fn serve_tcp(addr: &str, service: Arc<IndexService>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    serve_listener(listener, service).await
}

/// Accepts connections until ctrl-c. Every connection gets its own session
/// and therefore its own handshake.
pub async fn serve_listener(listener: TcpListener, service: Arc<IndexService>) -> Result<()> {
    let local = listener.local_addr().context("listener address")?;
    tracing::info!("listening on {local}");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!("accept failed: {err}");
                        continue;
                    }
                };
                tracing::debug!(%peer, "connection opened");
                let session = Session::new(service.clone());
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    if let Err(err) = serve_connection(session, reader, writer).await {
                        tracing::debug!(%peer, "connection closed: {err:#}");
                    } else {
                        tracing::debug!(%peer, "connection closed");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use std::fs;
    use std::sync::mpsc;

    fn service(dir: &std::path::Path) -> Arc<IndexService> {
        fs::write(dir.join("m.py"), "def a():\n    pass\n\ndef b():\n    a()\n").unwrap();
        let indexer = Indexer::new(dir.to_path_buf()).unwrap();
        let (graph, _) = indexer.build().unwrap();
        let index_path = crate::db::default_index_path(dir);
        Arc::new(IndexService::from_graph(indexer, index_path, graph))
    }

    async fn exchange(session: Session, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve_connection(session, input.as_bytes(), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn answers_each_line_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(service(dir.path()));
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{}}\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "not json\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"impact\",",
            "\"params\":{\"function\":\"a\"}}\n",
        );
        let responses = exchange(session, input).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], -32700);
        assert_eq!(responses[2]["id"], 2);
        assert_eq!(responses[2]["result"]["risk_level"], "low");
    }

    #[tokio::test]
    async fn slow_request_reports_timeout_error() {
        let (release, blocked) = mpsc::channel::<()>();
        let response = run_with_timeout(json!(7), Duration::from_millis(10), move || {
            let _ = blocked.recv();
            Some(json!({ "late": true }))
        })
        .await
        .unwrap();
        release.send(()).unwrap();
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], -32003);
        assert_eq!(response["error"]["data"]["kind"], "timeout");
    }

    #[tokio::test]
    async fn panicking_request_reports_internal_error() {
        let response = run_with_timeout(json!(8), Duration::from_secs(30), || {
            panic!("query blew up");
        })
        .await
        .unwrap();
        assert_eq!(response["id"], 8);
        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(response["error"]["data"]["kind"], "internal");
    }

    #[tokio::test]
    async fn fast_request_passes_its_response_through() {
        let response = run_with_timeout(json!(9), Duration::from_secs(30), || {
            Some(json!({ "id": 9, "result": {} }))
        })
        .await
        .unwrap();
        assert_eq!(response["result"], json!({}));
    }
}
