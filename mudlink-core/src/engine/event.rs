//! Session events handed to logging collaborators.

use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::connection::unix_millis;

pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Connection,
    Disconnection,
    Command,
    Response,
    Error,
    Timeout,
    ModeChange,
    ConfigChange,
    SslHandshake,
    SslCertificate,
    SslError,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connection => "CONNECTION",
            Self::Disconnection => "DISCONNECTION",
            Self::Command => "COMMAND",
            Self::Response => "RESPONSE",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ModeChange => "MODE_CHANGE",
            Self::ConfigChange => "CONFIG_CHANGE",
            Self::SslHandshake => "SSL_HANDSHAKE",
            Self::SslCertificate => "SSL_CERTIFICATE",
            Self::SslError => "SSL_ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub text: String,
}

impl SessionEvent {
    pub fn now(kind: EventKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: unix_millis(SystemTime::now()),
            text: text.into(),
        }
    }
}

/// Fan-out of session events. Slow subscribers lose the oldest events;
/// publishing never waits.
#[derive(Debug, Clone)]
pub struct EventFeed {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, kind: EventKind, text: impl Into<String>) {
        let event = SessionEvent::now(kind, text);
        tracing::trace!("event {}: {}", event.kind, event.text);
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_in_upper_snake_case() {
        let json = serde_json::to_string(&EventKind::SslCertificate).unwrap();
        assert_eq!(json, "\"SSL_CERTIFICATE\"");
        assert_eq!(EventKind::ModeChange.to_string(), "MODE_CHANGE");
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let feed = EventFeed::default();
        let mut rx = feed.subscribe();
        feed.emit(EventKind::Command, "look");
        feed.emit(EventKind::Response, "You see a room.");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Command);
        assert_eq!(second.text, "You see a room.");
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        EventFeed::new(4).emit(EventKind::Error, "nobody listening");
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest() {
        let feed = EventFeed::new(2);
        let mut rx = feed.subscribe();
        for i in 0..4 {
            feed.emit(EventKind::Command, i.to_string());
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(rx.recv().await.unwrap().text, "2");
    }
}
