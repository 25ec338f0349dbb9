//! The task that owns the session.
//!
//! Controller requests, link events and timer firings all arrive as
//! messages and are applied one at a time, so state updates never
//! interleave. Everything time-based is spawned through the
//! [`TimerRegistry`] and tagged with the session epoch; explicit teardown
//! aborts the registry and bumps the epoch, so anything already in flight
//! is dropped on arrival.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::Outbound;
use crate::config::EngineConfig;
use crate::engine::command::{CommandResponse, ConnectOutcome, sanitize};
use crate::engine::event::{EventFeed, EventKind};
use crate::engine::recovery::ReconnectAttempt;
use crate::error::{EngineError, TransportError};
use crate::identity::IdentityGate;
use crate::network::{
    ConnectTarget, LinkEvent, LinkFault, SessionLink, Transport, keepalive,
};
use crate::protocol::{IdentificationSequencer, TelnetDecoder};
use crate::state::connection::unix_millis;
use crate::state::{ConnectionPhase, ConnectionState, ResponseBuffer};
use crate::task::{TimerId, TimerKind, TimerRegistry};

pub(crate) const LINK_EVENT_CAPACITY: usize = 256;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

pub(crate) enum Request {
    Connect {
        target: ConnectTarget,
        reply: Reply<ConnectOutcome>,
    },
    Disconnect {
        reply: Reply<String>,
    },
    Send {
        command: String,
        timeout: Option<Duration>,
        reply: Reply<CommandResponse>,
    },
    SetContinuousMode {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    SetDefaultDelay {
        delay: Duration,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Messages from tasks the actor spawned itself.
enum Internal {
    Opened {
        epoch: u64,
        result: Result<Transport, TransportError>,
    },
    BannerDue {
        epoch: u64,
    },
    ReconnectDue {
        epoch: u64,
    },
    SettleDue {
        cycle: u64,
    },
    HardTimeoutDue {
        cycle: u64,
    },
}

struct QueuedSend {
    command: String,
    timeout: Duration,
    reply: Reply<CommandResponse>,
}

struct ActiveCycle {
    id: u64,
    command: String,
    timeout: Duration,
    settle_timer: TimerId,
    hard_timer: TimerId,
    reply: Reply<CommandResponse>,
}

pub(crate) struct EngineActor {
    config: EngineConfig,
    gate: Arc<dyn IdentityGate>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: EventFeed,
    buffer: ResponseBuffer,
    timers: TimerRegistry,

    link: Option<SessionLink>,
    link_tx: mpsc::Sender<LinkEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,

    /// The logical connection; reused verbatim by recovery.
    target: Option<ConnectTarget>,
    recovery: Option<ReconnectAttempt>,
    pending_connect: Option<Reply<ConnectOutcome>>,
    banner_pending: bool,

    epoch: u64,
    next_cycle: u64,
    cycle: Option<ActiveCycle>,
    queue: VecDeque<QueuedSend>,
}

impl EngineActor {
    pub(crate) fn spawn(
        config: EngineConfig,
        gate: Arc<dyn IdentityGate>,
        state_tx: watch::Sender<ConnectionState>,
        events: EventFeed,
        requests: mpsc::Receiver<Request>,
    ) {
        let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let state = state_tx.borrow().clone();
        let actor = Self {
            buffer: ResponseBuffer::new(config.buffer.ceiling_bytes),
            config,
            gate,
            state,
            state_tx,
            events,
            timers: TimerRegistry::new(),
            link: None,
            link_tx,
            internal_tx,
            target: None,
            recovery: None,
            pending_connect: None,
            banner_pending: false,
            epoch: 0,
            next_cycle: 0,
            cycle: None,
            queue: VecDeque::new(),
        };
        tokio::spawn(actor.run(requests, link_rx, internal_rx));
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut link_rx: mpsc::Receiver<LinkEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        tracing::debug!("engine started");
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown { reply }) => {
                        requests.close();
                        self.end_session();
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle_request(request),
                    // Every handle dropped
                    None => {
                        self.end_session();
                        break;
                    }
                },
                Some(event) = link_rx.recv() => self.handle_link(event),
                Some(msg) = internal_rx.recv() => self.handle_internal(msg),
            }
        }
        tracing::info!("engine stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { target, reply } => self.connect(target, reply),
            Request::Disconnect { reply } => self.disconnect(reply),
            Request::Send {
                command,
                timeout,
                reply,
            } => self.enqueue_send(command, timeout, reply),
            Request::SetContinuousMode { enabled, reply } => {
                self.state.continuous_mode = enabled;
                let mode = if enabled { "on" } else { "off" };
                self.events
                    .emit(EventKind::ModeChange, format!("continuous mode {mode}"));
                self.publish();
                let _ = reply.send(());
            }
            Request::SetDefaultDelay { delay, reply } => {
                self.state.default_delay = delay;
                self.events.emit(
                    EventKind::ConfigChange,
                    format!("default delay set to {} ms", delay.as_millis()),
                );
                self.publish();
                let _ = reply.send(());
            }
            // Handled by the run loop.
            Request::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Data { epoch, text } if epoch == self.epoch && self.link.is_some() => {
                self.buffer.append(&text);
                self.state.bytes_received += text.len() as u64;
                let total = self.state.bytes_received;
                self.state_tx.send_modify(|s| s.bytes_received = total);
            }
            LinkEvent::Closed { epoch, fault } if epoch == self.epoch && self.link.is_some() => {
                self.on_link_lost(fault);
            }
            _ => tracing::trace!("dropping event from a stale link"),
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Opened { epoch, result } if epoch == self.epoch => match result {
                Ok(transport) => self.attach(transport),
                Err(err) => self.on_open_failed(err),
            },
            Internal::BannerDue { epoch } if epoch == self.epoch => self.finish_banner(),
            Internal::ReconnectDue { epoch } if epoch == self.epoch => {
                if let Some(attempt) = &self.recovery {
                    tracing::info!(
                        "reconnect attempt {} to {}",
                        attempt.attempt,
                        attempt.target.display_name()
                    );
                    let target = attempt.target.clone();
                    self.spawn_open(target);
                }
            }
            Internal::SettleDue { cycle } => self.finish_cycle(cycle, false),
            Internal::HardTimeoutDue { cycle } => self.finish_cycle(cycle, true),
            _ => tracing::trace!("dropping message from a previous session"),
        }
    }

    // ── Connect ──────────────────────────────────────────────────

    fn connect(&mut self, target: ConnectTarget, reply: Reply<ConnectOutcome>) {
        if !self.gate.is_identified() {
            let _ = reply.send(Err(EngineError::IdentityNotSet));
            return;
        }
        if self.has_session() {
            tracing::info!("replacing session with {}", self.state.name);
            self.end_session();
            self.events.emit(
                EventKind::Disconnection,
                format!("Disconnected from {} for a new connection", self.state.name),
            );
        }

        self.buffer.clear();
        self.state.host = target.host.clone();
        self.state.port = target.port;
        self.state.name = target.display_name();
        self.state.use_tls = target.uses_tls();
        self.state.tls_info = None;
        self.state.last_error = None;
        self.state.active = true;
        self.transition(ConnectionPhase::begin_connect);
        self.publish();

        tracing::info!("connecting to {}:{}", target.host, target.port);
        self.target = Some(target.clone());
        self.pending_connect = Some(reply);
        self.spawn_open(target);
    }

    fn spawn_open(&mut self, target: ConnectTarget) {
        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        let timeout = self.config.connect_timeout();
        self.timers.spawn(TimerKind::Connect, async move {
            let result = Transport::open(&target, timeout).await;
            let _ = tx.send(Internal::Opened { epoch, result });
        });
    }

    fn attach(&mut self, transport: Transport) {
        let identity = self.gate.identity();
        let client = &self.config.client;
        let sequencer = IdentificationSequencer::new(
            &client.product,
            &client.version,
            &client.terminal_type,
            identity.as_ref(),
        );
        let decoder = TelnetDecoder::with_limits(
            sequencer,
            self.config.buffer.decoder_chunk_cap,
            self.config.buffer.subnegotiation_cap,
        );
        let link = SessionLink::spawn(
            transport.stream,
            decoder,
            self.epoch,
            self.config.idle_timeout(),
            self.link_tx.clone(),
        );
        self.timers.spawn(
            TimerKind::KeepAlive,
            keepalive(link.sender(), self.config.keepalive_interval()),
        );
        self.link = Some(link);

        self.transition(ConnectionPhase::complete_connect);
        self.state.tls_info = transport.tls_info.clone();
        self.state.connected_since = Some(unix_millis(SystemTime::now()));
        self.state.last_error = None;

        let name = self.state.name.clone();
        if let Some(info) = &transport.tls_info {
            self.events.emit(
                EventKind::SslHandshake,
                format!("{} {} with {name}", info.protocol, info.cipher),
            );
            if !info.authorized {
                let why = info
                    .authorization_error
                    .clone()
                    .unwrap_or_else(|| "peer not authorized".into());
                tracing::warn!("{name}: certificate not authorized: {why}");
                self.events.emit(EventKind::SslCertificate, why);
            }
        }

        match self.recovery.take() {
            Some(attempt) => {
                tracing::info!("reconnected to {name} on attempt {}", attempt.attempt);
                self.events.emit(
                    EventKind::Connection,
                    format!("Reconnected to {name} after {} attempt(s)", attempt.attempt),
                );
            }
            None => self.events.emit(
                EventKind::Connection,
                format!("Connected to {name} ({})", transport.peer),
            ),
        }
        self.publish();

        if self.pending_connect.is_some() {
            self.banner_pending = true;
            self.timers.schedule(
                TimerKind::Banner,
                self.config.settle(),
                self.internal_tx.clone(),
                Internal::BannerDue { epoch: self.epoch },
            );
        } else {
            self.pump_queue();
        }
    }

    fn finish_banner(&mut self) {
        if !self.banner_pending {
            return;
        }
        self.banner_pending = false;
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Ok(self.connect_outcome()));
        }
        self.pump_queue();
    }

    fn connect_outcome(&self) -> ConnectOutcome {
        let security = if self.state.use_tls { " over TLS" } else { "" };
        ConnectOutcome {
            message: format!(
                "Connected to {} ({}:{}){security}",
                self.state.name, self.state.host, self.state.port
            ),
            banner: self.buffer.text(),
            tls_info: self.state.tls_info.clone(),
        }
    }

    fn on_open_failed(&mut self, err: TransportError) {
        let message = err.to_string();
        let kind = match err {
            TransportError::Handshake { .. }
            | TransportError::Certificate(_)
            | TransportError::TlsConfig(_) => EventKind::SslError,
            _ => EventKind::Error,
        };
        self.events.emit(kind, &message);
        self.state.last_error = Some(message.clone());

        if let Some(attempt) = self.recovery.take() {
            tracing::warn!("reconnect attempt {} failed: {message}", attempt.attempt);
            self.schedule_reconnect(attempt.next());
            return;
        }

        tracing::warn!("connect to {} failed: {message}", self.state.name);
        self.transition_to_disconnected();
        self.target = None;
        self.publish();
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(EngineError::Transport(err)));
        }
    }

    // ── Recovery ─────────────────────────────────────────────────

    fn on_link_lost(&mut self, fault: LinkFault) {
        let name = self.state.name.clone();
        tracing::warn!("lost connection to {name}: {fault}");
        self.epoch += 1;
        self.state.last_error = Some(fault.to_string());
        self.state.connected_since = None;
        self.events
            .emit(EventKind::Disconnection, format!("Lost connection to {name}: {fault}"));
        self.interrupt_cycle(&fault);

        // `connected` goes false before the handle is released.
        let recover = self.config.recovery.enabled && self.config.recovery.max_attempts > 0;
        match self.target.clone().filter(|_| recover && self.state.active) {
            Some(target) => self.schedule_reconnect(ReconnectAttempt::first(target)),
            None => {
                self.target = None;
                self.transition_to_disconnected();
                self.publish();
            }
        }
        self.timers.cancel_kind(TimerKind::KeepAlive);
        if let Some(link) = self.link.take() {
            link.shutdown();
        }

        self.fail_queue();
        if self.banner_pending {
            self.banner_pending = false;
            self.timers.cancel_kind(TimerKind::Banner);
            if let Some(reply) = self.pending_connect.take() {
                let _ = reply.send(Ok(self.connect_outcome()));
            }
        }
    }

    /// Answer the in-flight command with what arrived before the link
    /// dropped. Text from a later session never reaches it.
    fn interrupt_cycle(&mut self, fault: &LinkFault) {
        let Some(cycle) = self.cycle.take() else {
            return;
        };
        self.timers.cancel(cycle.settle_timer);
        self.timers.cancel(cycle.hard_timer);

        let buffered = self.buffer.text();
        self.buffer.clear();
        tracing::debug!("cycle {}: interrupted by {fault}", cycle.id);
        self.state.last_response = Some(buffered.clone());
        let response = CommandResponse::interrupted(
            buffered,
            &fault.to_string(),
            self.state.continuous_mode,
        );
        self.events.emit(EventKind::Response, &response.text);
        let _ = cycle.reply.send(Ok(response));
    }

    fn schedule_reconnect(&mut self, attempt: ReconnectAttempt) {
        let policy = self.config.backoff();
        if !policy.allows(attempt.attempt) {
            let tried = attempt.attempt.saturating_sub(1);
            let mut message = format!(
                "gave up reconnecting to {} after {tried} attempt(s)",
                attempt.target.display_name()
            );
            if let Some(last) = &self.state.last_error {
                message.push_str(&format!("; last error: {last}"));
            }
            tracing::warn!("{message}");
            self.state.last_error = Some(message);
            self.recovery = None;
            self.target = None;
            self.transition_to_disconnected();
            self.publish();
            return;
        }

        let delay = policy.jittered(attempt.attempt, &mut rand::thread_rng());
        let n = attempt.attempt;
        self.transition(|p| p.begin_reconnect(n));
        tracing::info!(
            "reconnecting to {} in {} ms (attempt {n}/{})",
            attempt.target.display_name(),
            delay.as_millis(),
            policy.max_attempts
        );
        self.recovery = Some(attempt);
        self.publish();
        self.timers.schedule(
            TimerKind::Reconnect,
            delay,
            self.internal_tx.clone(),
            Internal::ReconnectDue { epoch: self.epoch },
        );
    }

    // ── Disconnect ───────────────────────────────────────────────

    fn has_session(&self) -> bool {
        self.state.active
            || self.link.is_some()
            || self.pending_connect.is_some()
            || self.recovery.is_some()
    }

    fn disconnect(&mut self, reply: Reply<String>) {
        if !self.has_session() {
            let _ = reply.send(Err(EngineError::NotConnected));
            return;
        }
        let message = format!("Disconnected from {}", self.state.name);
        self.end_session();
        tracing::info!("{message}");
        self.events.emit(EventKind::Disconnection, &message);
        let _ = reply.send(Ok(message));
    }

    /// Tear down everything belonging to the current session. Nothing
    /// scheduled before this call can act afterwards.
    fn end_session(&mut self) {
        self.epoch += 1;
        self.timers.cancel_all();

        self.transition_to_disconnected();
        self.state.tls_info = None;
        self.state.connected_since = None;
        if let Some(link) = self.link.take() {
            link.shutdown();
        }
        self.recovery = None;
        self.target = None;
        self.banner_pending = false;

        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(EngineError::Cancelled));
        }
        if let Some(cycle) = self.cycle.take() {
            let _ = cycle.reply.send(Err(EngineError::NotConnected));
        }
        self.fail_queue();
        self.buffer.clear();
        self.publish();
    }

    // ── Command cycles ───────────────────────────────────────────

    fn enqueue_send(
        &mut self,
        command: String,
        timeout: Option<Duration>,
        reply: Reply<CommandResponse>,
    ) {
        if !self.state.connected || self.link.is_none() {
            let _ = reply.send(Err(EngineError::NotConnected));
            return;
        }
        let command = match sanitize(&command) {
            Ok(command) => command,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        self.queue.push_back(QueuedSend {
            command,
            timeout: self.config.command_timeout(timeout),
            reply,
        });
        self.pump_queue();
    }

    /// Start the next queued command if the correlator is free.
    fn pump_queue(&mut self) {
        if self.cycle.is_some() || self.banner_pending {
            return;
        }
        while let Some(next) = self.queue.pop_front() {
            if !self.state.connected || self.link.is_none() {
                let _ = next.reply.send(Err(EngineError::NotConnected));
                continue;
            }

            // Clear, then write.
            self.buffer.clear();
            let written = self
                .link
                .as_ref()
                .is_some_and(|link| link.send(Outbound::Command(next.command.clone())).is_ok());
            if !written {
                let _ = next.reply.send(Err(EngineError::NotConnected));
                continue;
            }

            self.next_cycle += 1;
            let id = self.next_cycle;
            self.state.last_command = Some(next.command.clone());
            self.state.commands_sent += 1;
            self.events.emit(EventKind::Command, &next.command);
            tracing::debug!("cycle {id}: sent {:?}", next.command);

            let settle_timer = self.timers.schedule(
                TimerKind::Settle,
                self.config.settle(),
                self.internal_tx.clone(),
                Internal::SettleDue { cycle: id },
            );
            let hard_timer = self.timers.schedule(
                TimerKind::HardTimeout,
                next.timeout,
                self.internal_tx.clone(),
                Internal::HardTimeoutDue { cycle: id },
            );
            self.cycle = Some(ActiveCycle {
                id,
                command: next.command,
                timeout: next.timeout,
                settle_timer,
                hard_timer,
                reply: next.reply,
            });
            self.publish();
            return;
        }
    }

    fn finish_cycle(&mut self, id: u64, timed_out: bool) {
        // Timers of a cycle that already finished, or was torn down.
        let Some(cycle) = self.cycle.take_if(|c| c.id == id) else {
            return;
        };
        self.timers.cancel(if timed_out {
            cycle.settle_timer
        } else {
            cycle.hard_timer
        });

        let buffered = self.buffer.text();
        self.state.last_response = Some(buffered.clone());
        let response = CommandResponse::compose(
            buffered,
            timed_out.then_some(cycle.timeout),
            self.state.continuous_mode,
        );
        if timed_out {
            tracing::debug!("cycle {id}: hard timeout after {:?}", cycle.timeout);
            self.events.emit(
                EventKind::Timeout,
                format!(
                    "{} timed out after {} ms",
                    cycle.command,
                    cycle.timeout.as_millis()
                ),
            );
        }
        self.events.emit(EventKind::Response, &response.text);
        self.publish();
        let _ = cycle.reply.send(Ok(response));
        self.pump_queue();
    }

    fn fail_queue(&mut self) {
        for queued in self.queue.drain(..) {
            let _ = queued.reply.send(Err(EngineError::NotConnected));
        }
    }

    // ── State ────────────────────────────────────────────────────

    fn transition(&mut self, step: impl FnOnce(&mut ConnectionPhase) -> Result<(), &'static str>) {
        let mut phase = self.state.phase;
        match step(&mut phase) {
            Ok(()) => self.state.sync_phase(phase),
            Err(e) => tracing::warn!("ignored phase transition from {}: {e}", self.state.phase),
        }
    }

    fn transition_to_disconnected(&mut self) {
        let mut phase = self.state.phase;
        phase.force_disconnect();
        self.state.sync_phase(phase);
        self.state.active = false;
        self.state.reconnect_attempt = 0;
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}
