//! Live notification stream route.
//!
//! Serves a text event-stream for one folder: a `connected` event, the
//! current snapshot as the first `notification` event, then one
//! `notification` event per store change for that folder, with keepalive
//! comment frames in between. Slot release and store unsubscription ride on
//! the stream's drop, so client disconnect at any point of establishment
//! tears everything down exactly once.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::manager::StreamSlot;
use crate::notifications::{now_ms, NotificationRecord, NotificationStatus, StoreEvent, Subscription};
use crate::server::state::ServerState;

/// Events buffered per connection before slow consumers start losing them.
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub folder: String,
}

#[derive(Serialize)]
struct ConnectedPayload {
    timestamp: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationPayload {
    has_notification: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    status: Option<NotificationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl NotificationPayload {
    fn from_record(record: Option<&NotificationRecord>) -> Self {
        match record {
            Some(r) => Self {
                has_notification: true,
                status: Some(r.status),
                timestamp: Some(r.timestamp),
                message: Some(r.message.clone()),
            },
            None => Self {
                has_notification: false,
                status: None,
                timestamp: None,
                message: None,
            },
        }
    }
}

/// Per-connection state. The guards move with the stream: when the client
/// disconnects and axum drops the response body, the slot and the store
/// subscription are released via drop.
struct LiveStream {
    rx: mpsc::Receiver<StoreEvent>,
    _slot: StreamSlot,
    _subscription: Subscription,
}

/// Route handler for `GET /v1/notifications/stream?folder=`.
pub async fn stream_notifications(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<ServerState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let folder = query.folder;

    // Admission control happens before any per-connection state exists, so
    // a rejection has no side effects to undo.
    let slot = match state.stream_manager.try_open(addr.ip()) {
        Ok(slot) => slot,
        Err(err) => return err.into_response(),
    };

    debug!("Stream opened for {} by {}", folder, addr.ip());

    // Subscribe before taking the snapshot: a change landing in between is
    // then delivered twice (snapshot + event) instead of not at all.
    let (tx, rx) = mpsc::channel::<StoreEvent>(EVENT_CHANNEL_CAPACITY);
    let subscription = {
        let folder = folder.clone();
        state.store.subscribe(move |event| {
            if event.folder == folder {
                // A full buffer drops the event rather than block the store.
                let _ = tx.try_send(event.clone());
            }
        })
    };

    let snapshot = state.store.get(&folder);

    let initial = vec![
        sse_event("connected", &ConnectedPayload { timestamp: now_ms() }),
        sse_event(
            "notification",
            &NotificationPayload::from_record(snapshot.as_ref()),
        ),
    ];

    let live = stream::unfold(
        LiveStream {
            rx,
            _slot: slot,
            _subscription: subscription,
        },
        |mut live| async move {
            live.rx.recv().await.map(|event| {
                let payload = NotificationPayload::from_record(event.record.as_ref());
                (sse_event("notification", &payload), live)
            })
        },
    );

    let events = stream::iter(initial).chain(live).map(Ok::<Event, Infallible>);

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.config.keepalive_interval))
        .into_response()
}

fn sse_event<T: Serialize>(name: &str, payload: &T) -> Event {
    let data = match serde_json::to_string(payload) {
        Ok(data) => data,
        Err(err) => {
            error!("Failed to serialize {} event payload: {}", name, err);
            "{}".to_string()
        }
    };
    Event::default().event(name).data(data)
}
