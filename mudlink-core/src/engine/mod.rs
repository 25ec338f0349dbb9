//! The connection engine and its controller-facing handle.
//!
//! [`Engine`] is a cheap, cloneable handle; all work happens on a single
//! background task that owns the transport, the [`ConnectionState`] and
//! the response buffer. Callers only ever see snapshots.

mod actor;
pub mod command;
pub mod event;
pub mod recovery;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::identity::IdentityGate;
use crate::network::ConnectTarget;
use crate::state::ConnectionState;

use actor::{EngineActor, Request};
pub use command::{CommandResponse, ConnectOutcome, READY_MARKER};
pub use event::{EventFeed, EventKind, SessionEvent};
pub use recovery::{BackoffPolicy, ReconnectAttempt};

const REQUEST_CAPACITY: usize = 64;

/// Handle to a running engine. Cloning shares the same session.
#[derive(Debug, Clone)]
pub struct Engine {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    events: EventFeed,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Request::Connect { .. } => "Connect",
            Request::Disconnect { .. } => "Disconnect",
            Request::Send { .. } => "Send",
            Request::SetContinuousMode { .. } => "SetContinuousMode",
            Request::SetDefaultDelay { .. } => "SetDefaultDelay",
            Request::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl Engine {
    /// Start the engine task. Must be called from within a Tokio runtime.
    pub fn new(config: EngineConfig, gate: Arc<dyn IdentityGate>) -> Self {
        let (requests, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let initial = ConnectionState::new(Duration::from_millis(config.timing.default_delay_ms));
        let (state_tx, state) = watch::channel(initial);
        let events = EventFeed::default();
        EngineActor::spawn(config, gate, state_tx, events.clone(), request_rx);
        Self {
            requests,
            state,
            events,
        }
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(make(tx)).await?;
        Ok(rx.await?)
    }

    /// Open a session. Any existing session is torn down first.
    ///
    /// Resolves once the transport is up and the first settle window has
    /// passed, returning whatever the host sent in that time.
    pub async fn connect(&self, target: ConnectTarget) -> Result<ConnectOutcome, EngineError> {
        self.call(|reply| Request::Connect { target, reply }).await?
    }

    /// Drop the session and cancel every pending timer and recovery attempt.
    pub async fn disconnect(&self) -> Result<String, EngineError> {
        self.call(|reply| Request::Disconnect { reply }).await?
    }

    /// Write `command` and collect the text that follows it.
    ///
    /// `timeout` is clamped to the configured range; `None` uses the
    /// configured default. A hard timeout is not an error: the partial
    /// text comes back with a notice prefixed.
    pub async fn send(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResponse, EngineError> {
        let command = command.to_string();
        self.call(|reply| Request::Send {
            command,
            timeout,
            reply,
        })
        .await?
    }

    pub async fn set_continuous_mode(&self, enabled: bool) -> Result<(), EngineError> {
        self.call(|reply| Request::SetContinuousMode { enabled, reply })
            .await
    }

    pub async fn set_default_delay(&self, delay: Duration) -> Result<(), EngineError> {
        self.call(|reply| Request::SetDefaultDelay { delay, reply })
            .await
    }

    /// Disconnect and stop the engine task. Later calls fail with
    /// [`EngineError::EngineStopped`].
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.call(|reply| Request::Shutdown { reply }).await
    }

    /// Latest published snapshot.
    pub fn status(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
