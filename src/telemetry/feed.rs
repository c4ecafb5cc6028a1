//! Process-wide client for the telemetry service WebSocket

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;

use super::{TelemetryEvent, TelemetrySnapshot};
use crate::config::TelemetryConfig;
use crate::retry::{Backoff, RetryPolicy};
use crate::transport::{self, WsStream};

/// Events buffered per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedMessage {
    Snapshot {
        data: TelemetrySnapshot,
    },
    Event {
        event: TelemetryEvent,
    },
    Disconnected {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Read side of the feed: latest snapshot plus an event stream
#[derive(Clone)]
pub struct TelemetryFeed {
    snapshot: watch::Receiver<Option<TelemetrySnapshot>>,
    events: broadcast::Sender<TelemetryEvent>,
}

/// Write side of the feed
pub struct TelemetryPublisher {
    snapshot: watch::Sender<Option<TelemetrySnapshot>>,
    events: broadcast::Sender<TelemetryEvent>,
}

impl TelemetryFeed {
    /// A feed whose values are pushed by hand
    #[must_use]
    pub fn channel() -> (Self, TelemetryPublisher) {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        (
            Self {
                snapshot: snapshot_rx,
                events: events.clone(),
            },
            TelemetryPublisher {
                snapshot: snapshot_tx,
                events,
            },
        )
    }

    /// Connect to the configured service and keep reconnecting forever
    ///
    /// Returns a feed that never produces anything when telemetry is disabled.
    #[must_use]
    pub fn spawn(config: &TelemetryConfig) -> Self {
        let (feed, publisher) = Self::channel();
        if config.enabled {
            tokio::spawn(run(config.url.clone(), publisher));
        } else {
            tracing::info!("telemetry feed disabled");
        }
        feed
    }

    /// Latest snapshot, `None` while the sim is disconnected
    #[must_use]
    pub fn current(&self) -> Option<TelemetrySnapshot> {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.snapshot.borrow().is_some()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.events.subscribe()
    }
}

impl TelemetryPublisher {
    pub fn publish_snapshot(&self, snapshot: TelemetrySnapshot) {
        self.snapshot.send_replace(Some(snapshot));
    }

    pub fn publish_event(&self, event: TelemetryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Forget the current snapshot so nobody acts on stale state
    pub fn clear(&self) {
        self.snapshot.send_replace(None);
    }

    fn apply(&self, text: &str) {
        match serde_json::from_str::<FeedMessage>(text) {
            Ok(FeedMessage::Snapshot { data }) => self.publish_snapshot(data),
            Ok(FeedMessage::Event { event }) => {
                tracing::debug!(kind = ?event.kind, "telemetry event");
                self.publish_event(event);
            }
            Ok(FeedMessage::Disconnected { message }) => {
                tracing::info!(?message, "sim disconnected");
                self.clear();
            }
            Ok(FeedMessage::Other) => {}
            Err(e) => tracing::warn!(error = %e, "malformed telemetry message"),
        }
    }

    async fn pump(&self, mut ws: WsStream) {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Text(text)) => self.apply(text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "telemetry read failed");
                    break;
                }
            }
        }
    }
}

async fn run(url: String, publisher: TelemetryPublisher) {
    let mut backoff = Backoff::new(RetryPolicy::unbounded());

    loop {
        match transport::connect(&url, &[]).await {
            Ok(ws) => {
                tracing::info!(url = %url, "telemetry connected");
                backoff.reset();
                publisher.pump(ws).await;
                publisher.clear();
                tracing::info!("telemetry connection lost");
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "telemetry connect failed");
            }
        }

        let Some(delay) = backoff.next_delay() else {
            break;
        };
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryEventKind;

    #[test]
    fn snapshot_messages_update_the_watch() {
        let (feed, publisher) = TelemetryFeed::channel();
        assert!(!feed.is_live());

        publisher.apply(
            r#"{"type":"snapshot","timestamp":1,"data":{"position":{"overall":3}}}"#,
        );
        assert_eq!(feed.current().map(|s| s.position.overall), Some(3));

        publisher.apply(r#"{"type":"disconnected","timestamp":2,"message":"sim gone"}"#);
        assert!(!feed.is_live());
    }

    #[test]
    fn events_reach_subscribers() {
        let (feed, publisher) = TelemetryFeed::channel();
        let mut events = feed.subscribe();

        publisher.apply(
            r#"{"type":"event","timestamp":1,"event":{"type":"flag_change","data":{"flags":["yellow"]}},"data":{}}"#,
        );
        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, TelemetryEventKind::FlagChange);
    }

    #[test]
    fn junk_is_ignored() {
        let (feed, publisher) = TelemetryFeed::channel();
        publisher.apply("not json");
        publisher.apply(r#"{"type":"lap_data","laps":[]}"#);
        assert!(!feed.is_live());
    }
}
