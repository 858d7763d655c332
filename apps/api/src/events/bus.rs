//! Broadcast bus fanning stage events out to SSE clients.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use super::{EventSink, Notification, StageEvent};

/// Wire shape of one SSE `data:` payload.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(flatten)]
    pub event: StageEvent,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// `capacity` is the number of events buffered per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        info!("Event bus initialized with capacity {}", capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// SSE response for `GET /api/v1/events`.
    pub fn sse(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        info!("New SSE client connected, total clients: {}", self.client_count() + 1);

        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| async move {
            match result {
                Ok(envelope) => Event::default()
                    .event(envelope.event.name())
                    .json_data(&envelope)
                    .map_err(|e| warn!("Failed to serialize stage event: {e}"))
                    .ok()
                    .map(Ok),
                Err(e) => {
                    // Lagged receivers skip ahead; the next snapshot fetch resyncs them.
                    warn!("SSE client error: {:?}", e);
                    None
                }
            }
        });

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: StageEvent) {
        let notification = event.notification();
        if let Some(n) = &notification {
            info!(
                event = event.name(),
                turn_id = event.turn_id().unwrap_or("-"),
                "{}",
                n.message
            );
        } else {
            debug!(event = event.name(), "stage event");
        }

        let envelope = EventEnvelope {
            at: Utc::now(),
            notification,
            event,
        };
        // No subscribers is not an error.
        let _ = self.tx.send(envelope);
    }
}
