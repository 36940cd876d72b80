use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    services::session_service::load_session,
    state::SharedState,
};

const HANDSHAKE_EVENT: &str = "handshake";

/// Identifies the stream a client is attached to, for teardown logging.
#[derive(Clone, Copy, Debug)]
pub enum StreamKind {
    Session(Uuid),
    Admin,
}

/// Join the room of an existing session.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<(broadcast::Receiver<ServerEvent>, ServerEvent), ServiceError> {
    load_session(state, session_id).await?;
    let receiver = state.rooms().subscribe(session_id);
    let handshake = handshake(StreamKind::Session(session_id), state.is_degraded());
    Ok((receiver, handshake))
}

/// Subscribe to the operator stream.
pub fn subscribe_admin(state: &SharedState) -> (broadcast::Receiver<ServerEvent>, ServerEvent) {
    let receiver = state.rooms().admin().subscribe();
    (receiver, handshake(StreamKind::Admin, state.is_degraded()))
}

fn handshake(kind: StreamKind, degraded: bool) -> ServerEvent {
    let (stream, session_id) = match kind {
        StreamKind::Session(id) => ("session", Some(id)),
        StreamKind::Admin => ("admin", None),
    };
    ServerEvent::json(
        Some(HANDSHAKE_EVENT.to_string()),
        &Handshake {
            stream: stream.to_string(),
            session_id,
            degraded,
        },
    )
    .unwrap_or_else(|err| {
        warn!(error = %err, "failed to encode SSE handshake");
        ServerEvent::new(Some(HANDSHAKE_EVENT.to_string()), String::new())
    })
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a broadcast receiver into an SSE response.
///
/// `first` is delivered before any broadcast event. A forwarder task pushes
/// events into a small bounded channel and stops once the client is gone.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    first: ServerEvent,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if tx.send(Ok(to_event(first))).await.is_ok() {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    recv_result = receiver.recv() => {
                        match recv_result {
                            Ok(payload) => {
                                if tx.send(Ok(to_event(payload))).await.is_err() {
                                    break;
                                }
                            }
                            Err(RecvError::Closed) => break,
                            Err(RecvError::Lagged(skipped)) => {
                                // clients recover missed phases by polling the status route
                                warn!(?kind, skipped, "SSE client lagged behind");
                                continue;
                            }
                        }
                    }
                }
            }
        }

        match kind {
            StreamKind::Session(session_id) => info!(%session_id, "session SSE stream disconnected"),
            StreamKind::Admin => info!("admin SSE stream disconnected"),
        }
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use super::*;
    use crate::{
        clock::ManualClock, config::AppConfig, dao::quiz_store::memory::MemoryQuizStore,
        state::AppState,
    };

    #[tokio::test]
    async fn unknown_sessions_have_no_room() {
        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH)),
            Arc::new(MemoryQuizStore::new()),
        )
        .await;

        let result = subscribe_session(&state, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn admin_handshake_reports_degraded_mode() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH)),
        );
        let (_receiver, handshake) = subscribe_admin(&state);
        assert_eq!(handshake.event.as_deref(), Some(HANDSHAKE_EVENT));
        let payload: serde_json::Value = serde_json::from_str(&handshake.data).unwrap();
        assert_eq!(payload["stream"], "admin");
        assert_eq!(payload["degraded"], true);
        assert!(payload.get("session_id").is_none());
    }
}
