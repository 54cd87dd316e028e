use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use dependify_common::JobId;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use super::api::{ApiError, SharedState};
use super::hub::JobHub;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// `GET /ws/jobs/{id}`: replay the job snapshot, then stream live events.
pub async fn job_feed(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(state): State<SharedState>,
) -> Result<Response, ApiError> {
    let job_id = JobId::new(id);
    let (replay, rx) = state.hub.attach(&job_id)?;
    tracing::debug!(%job_id, replayed = replay.len(), "feed subscriber attached");
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, job_id, replay, rx))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: SharedState,
    job_id: JobId,
    replay: Vec<String>,
    rx: broadcast::Receiver<String>,
) {
    let (mut sender, receiver) = socket.split();
    for msg in replay {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            return;
        }
    }
    run_socket_loop(sender, receiver, &state.hub, &job_id, rx).await;
    tracing::debug!(%job_id, "feed subscriber detached");
}

/// Forward broadcast messages until the client goes away.
///
/// A Ping goes out every [`PING_INTERVAL`]; if no Pong has arrived within
/// [`PONG_TIMEOUT`] of the last one, the connection is dropped.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    hub: &JobHub,
    job_id: &JobId,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("pong timeout; closing feed socket");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                let Some(batch) = outgoing(result, hub, job_id, &mut rx) else {
                    break;
                };
                let mut failed = false;
                for msg in batch {
                    if sender.send(Message::Text(msg.into())).await.is_err() {
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Subscribers have nothing to say.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Messages to forward for one broadcast receive, or `None` to close.
///
/// A lagged receiver has lost events, so it is replaced by a fresh
/// attachment and the subscriber gets the full snapshot replay. Replayed
/// events the subscriber already holds fold to no-ops on its side.
fn outgoing(
    result: Result<String, RecvError>,
    hub: &JobHub,
    job_id: &JobId,
    rx: &mut broadcast::Receiver<String>,
) -> Option<Vec<String>> {
    match result {
        Ok(msg) => Some(vec![msg]),
        Err(RecvError::Closed) => None,
        Err(RecvError::Lagged(skipped)) => match hub.attach(job_id) {
            Ok((replay, fresh)) => {
                tracing::warn!(
                    %job_id,
                    skipped,
                    replayed = replay.len(),
                    "feed subscriber lagged; resynced from snapshot"
                );
                *rx = fresh;
                Some(replay)
            }
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "feed subscriber lagged and job is gone");
                None
            }
        },
    }
}
