//! Update intake and dispatch.
//!
//! Connections send one JSON update request per line and receive one JSON
//! result per request. Updates queue into a single-writer dispatcher so only
//! one is in flight at a time.

use std::sync::Arc;

use paradrop_chute::{AgentContext, Update, UpdateRequest, UpdateResult};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

pub async fn serve(listener: UnixListener, tx: mpsc::Sender<Update>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                tokio::spawn(handle_connection(stream, tx.clone()));
            }
            Err(e) => {
                tracing::warn!("Failed to accept intake connection: {e}");
            }
        }
    }
}

/// Processes queued updates one at a time.
pub async fn dispatch(mut rx: mpsc::Receiver<Update>, ctx: Arc<AgentContext>) {
    while let Some(mut update) = rx.recv().await {
        tracing::info!(%update, "Processing update");
        update.execute(&ctx).await;
    }
}

async fn handle_connection(stream: UnixStream, tx: mpsc::Sender<Update>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Intake read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = process_request(&line, &tx).await;

        let mut response = match serde_json::to_string(&result) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Could not serialize update result: {e}");
                continue;
            }
        };
        response.push('\n');

        if let Err(e) = writer.write_all(response.as_bytes()).await {
            tracing::warn!("Intake write failed: {e}");
            break;
        }
    }
}

async fn process_request(line: &str, tx: &mpsc::Sender<Update>) -> UpdateResult {
    let request: UpdateRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return failure(format!("invalid update request: {e}")),
    };

    let (done_tx, done_rx) = oneshot::channel();
    let update = match Update::from_request(request, done_tx) {
        Ok(update) => update,
        Err(e) => return failure(e.to_string()),
    };

    if tx.send(update).await.is_err() {
        return failure("agent is shutting down".to_owned());
    }

    match done_rx.await {
        Ok(result) => result,
        Err(_) => failure("update was dropped before completing".to_owned()),
    }
}

fn failure(message: String) -> UpdateResult {
    UpdateResult {
        success: false,
        message,
        responses: None,
    }
}
