//! Push-notification channel for connected gallery clients.
//!
//! A thin pub/sub broadcaster backed by `tokio::sync::broadcast`, exposed
//! over HTTP as an SSE stream. Slow subscribers that fall behind the
//! channel capacity skip missed events rather than blocking publishers.

use std::convert::Infallible;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Channel capacity per broadcaster.
const CHANNEL_CAPACITY: usize = 256;

/// Event emitted when the watched output tree changes.
pub const FILE_CHANGE_EVENT: &str = "Gallery.file_change";

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event_name: &str, payload: Value) {
        let event = json!({
            "type": event_name,
            "data": payload,
            "timestamp": Utc::now().to_rfc3339()
        });
        // No subscribers is not an error.
        let _ = self.tx.send(event.to_string());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// SSE-compatible stream for axum.
    pub fn sse_stream(
        &self,
    ) -> impl futures_core::Stream<Item = Result<axum::response::sse::Event, Infallible>> {
        let mut rx = self.subscribe();

        async_stream::stream! {
            let connected = json!({"type": "connected", "timestamp": Utc::now().to_rfc3339()});
            yield Ok(axum::response::sse::Event::default().data(connected.to_string()));

            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        yield Ok(axum::response::sse::Event::default().data(msg));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[Events] SSE subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Approximate number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_subscribers() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        events.publish(FILE_CHANGE_EVENT, json!({"folders": {}}));

        let msg = rx.recv().await.unwrap();
        let parsed: Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"].as_str(), Some(FILE_CHANGE_EVENT));
        assert!(parsed["data"]["folders"].is_object());
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_no_op() {
        let events = EventBroadcaster::new();
        events.publish(FILE_CHANGE_EVENT, json!({}));
        assert_eq!(events.subscriber_count(), 0);
    }
}
