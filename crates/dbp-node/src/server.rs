//! # Request Server
//!
//! Newline-delimited JSON over TCP. Each line is one request:
//!
//! ```text
//! {"id": 7, "method": "iQuery", "args": {"hintIds": [1, 2], "sql": "select ..."}}
//! ```
//!
//! and gets exactly one line back, `{"id": 7, "ok": ...}` or
//! `{"id": 7, "error": {"code": ..., "ex": ..., "raiser": ...}}`.
//! Requests on one connection are answered in order.

use std::sync::Arc;

use dbp_routing::{AnswerChannel, AnswerError, ErrorCode, RouterApi};
use dbp_telemetry::{encode_metrics, RequestTimer, CLIENT_CONNECTIONS};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Method served by the node itself rather than the router.
pub const METRICS_METHOD: &str = "metrics";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    args: Value,
}

fn error_line(id: Value, error: &AnswerError) -> Value {
    json!({ "id": id, "error": error.to_json() })
}

/// Answer one request line.
pub async fn handle_line(router: &Arc<dyn RouterApi>, line: &str) -> Value {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("[dbp] Undecodable request: {}", e);
            let error = AnswerError::new(ErrorCode::InvalidParameters, "Invalid parameters.");
            return error_line(Value::Null, &error);
        }
    };
    let Envelope { id, method, args } = envelope;
    let _timer = RequestTimer::start(&method);

    if method == METRICS_METHOD {
        return match encode_metrics() {
            Ok(text) => json!({ "id": id, "ok": text }),
            Err(e) => error_line(id, &AnswerError::new(ErrorCode::InternalError, e.to_string())),
        };
    }

    let (channel, receiver) = AnswerChannel::oneshot();
    // Dispatch may release a retired map and join its pool threads.
    let dispatcher = Arc::clone(router);
    let name = method.clone();
    if let Err(e) =
        tokio::task::spawn_blocking(move || dispatcher.dispatch(&name, args, channel)).await
    {
        warn!("[dbp] Dispatch of {} failed: {}", method, e);
        let error = AnswerError::new(ErrorCode::InternalError, "Request dropped.");
        return error_line(id, &error);
    }
    match receiver.await {
        Ok(Ok(value)) => json!({ "id": id, "ok": value }),
        Ok(Err(error)) => error_line(id, &error),
        Err(_) => {
            warn!("[dbp] Request {} dropped without an answer", method);
            let error = AnswerError::new(ErrorCode::InternalError, "Request dropped.");
            error_line(id, &error)
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    router: Arc<dyn RouterApi>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.changed() => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let span = info_span!("request", id = %Uuid::new_v4());
        let response = handle_line(&router, &line).instrument(span).await;

        let mut bytes = serde_json::to_vec(&response)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
    }
    writer.shutdown().await
}

/// Accept connections until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    router: Arc<dyn RouterApi>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("[dbp] Listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.changed() => break,
        };
        debug!("[dbp] Client connected: {}", peer);

        let router = Arc::clone(&router);
        let shutdown = shutdown.clone();
        tokio::spawn(
            async move {
                CLIENT_CONNECTIONS.inc();
                if let Err(e) = handle_connection(stream, router, shutdown).await {
                    debug!("[dbp] Connection closed with error: {}", e);
                }
                CLIENT_CONNECTIONS.dec();
            }
            .instrument(info_span!("connection", %peer)),
        );
    }

    info!("[dbp] Listener stopped");
    Ok(())
}
