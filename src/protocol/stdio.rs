//! Stdio serve loop: one JSON document per line, single writer task

use crate::protocol::{InboundMessage, OutboundMessage, RequestRouter, WireError};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long in-flight runs get to finish after stdin closes
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Serve the agent protocol over the process's stdin/stdout.
///
/// Logs go to stderr; stdout carries protocol lines only.
pub async fn serve(router: Arc<RequestRouter>) -> Result<()> {
    serve_on(router, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve over arbitrary streams (tests drive this with in-memory pipes).
///
/// Each run request gets its own task; responses funnel through a
/// single writer task so concurrent runs never interleave partial
/// lines. Malformed input produces a protocol error response, never a
/// crash.
pub async fn serve_on<R, W>(router: Arc<RequestRouter>, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufReadExt + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(64);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => {
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    if writer.write_all(b"\n").await.is_err() {
                        break;
                    }
                    let _ = writer.flush().await;
                }
                Err(err) => warn!(error = %err, "response failed to serialize"),
            }
        }
    });

    let active: Arc<Mutex<HashMap<String, CancellationToken>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let mut runs: JoinSet<()> = JoinSet::new();

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(&line) {
            Ok(InboundMessage::Run(request)) => {
                debug!(id = %request.id, kind = %request.kind, "run request received");
                let token = CancellationToken::new();
                active.lock().await.insert(request.id.clone(), token.clone());

                let router = router.clone();
                let active = active.clone();
                let tx = tx.clone();
                runs.spawn(async move {
                    let id = request.id.clone();
                    let response = router.handle(request, token).await;
                    active.lock().await.remove(&id);
                    let _ = tx.send(response).await;
                });
            }
            Ok(InboundMessage::Cancel { id, run }) => {
                let found = {
                    let active = active.lock().await;
                    match active.get(&run) {
                        Some(token) => {
                            token.cancel();
                            true
                        }
                        None => false,
                    }
                };
                info!(run = %run, found, "cancel request");
                let _ = tx.send(OutboundMessage::Cancelled { id, run, found }).await;
            }
            Err(err) => {
                warn!(error = %err, "malformed protocol line");
                let id = recover_id(&line);
                let _ = tx
                    .send(OutboundMessage::Error {
                        id,
                        error: WireError {
                            kind: "protocol".to_string(),
                            message: format!("malformed message: {}", err),
                        },
                    })
                    .await;
            }
        }
    }

    // EOF: let in-flight runs finish within the grace period, then
    // cancel whatever remains and collect best-effort reports.
    info!("stdin closed, draining runs");
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        while runs.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("drain grace expired, cancelling remaining runs");
        for token in active.lock().await.values() {
            token.cancel();
        }
        while runs.join_next().await.is_some() {}
    }

    drop(tx);
    writer_task.await?;
    Ok(())
}

/// Best-effort extraction of an `id` from a line that failed to decode.
fn recover_id(line: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_str()
        .map(|s| s.to_string())
}
