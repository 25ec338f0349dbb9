//! Session lifecycle and the status record handed to collaborators.
//!
//! The engine mutates a [`ConnectionState`] from its single task and
//! publishes clones; nobody else ever holds a mutable reference.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

// ── ConnectionPhase ──────────────────────────────────────────────

/// Where the engine's single session currently is.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected ──► Reconnecting ─┐
///       ▲               │              │              │  ▲      │
///       │               ▼              ▼              │  └──────┘
///       └───────────────┴──────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for, or running, recovery attempt `attempt`.
    Reconnecting { attempt: u32 },
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {attempt})"),
        }
    }
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), &'static str> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err("cannot connect: not in Disconnected state"),
        }
    }

    /// Valid from: `Connecting`, `Reconnecting`.
    pub fn complete_connect(&mut self) -> Result<(), &'static str> {
        match self {
            Self::Connecting | Self::Reconnecting { .. } => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err("cannot complete connect: no attempt in progress"),
        }
    }

    /// Valid from: `Connected` (first attempt) and `Reconnecting`
    /// (next attempt).
    pub fn begin_reconnect(&mut self, attempt: u32) -> Result<(), &'static str> {
        match self {
            Self::Connected | Self::Reconnecting { .. } => {
                *self = Self::Reconnecting { attempt };
                Ok(())
            }
            _ => Err("cannot reconnect: session was not established"),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── TLS details ──────────────────────────────────────────────────

/// Summary of the certificate the server presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerCertificate {
    pub subject: String,
    pub issuer: String,
    pub valid_from: String,
    pub valid_to: String,
}

/// Negotiated security properties of a TLS session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsInfo {
    /// Whether the peer passed the configured trust policy.
    pub authorized: bool,
    pub authorization_error: Option<String>,
    pub protocol: String,
    pub cipher: String,
    pub peer_certificate: Option<PeerCertificate>,
}

// ── ConnectionState ──────────────────────────────────────────────

/// Snapshot of the engine's single session.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub connected: bool,
    /// The logical connection is still wanted (not explicitly dropped and
    /// recovery not exhausted).
    pub active: bool,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub last_error: Option<String>,
    pub last_command: Option<String>,
    pub last_response: Option<String>,
    pub continuous_mode: bool,
    #[serde(with = "duration_ms")]
    pub default_delay: Duration,
    pub use_tls: bool,
    pub tls_info: Option<TlsInfo>,
    pub reconnect_attempt: u32,
    /// Unix milliseconds when the current transport came up.
    pub connected_since: Option<u64>,
    pub bytes_received: u64,
    pub commands_sent: u64,
}

impl ConnectionState {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            connected: false,
            active: false,
            host: String::new(),
            port: 23,
            name: String::new(),
            last_error: None,
            last_command: None,
            last_response: None,
            continuous_mode: false,
            default_delay,
            use_tls: false,
            tls_info: None,
            reconnect_attempt: 0,
            connected_since: None,
            bytes_received: 0,
            commands_sent: 0,
        }
    }

    /// Copy for display with `last_response` cut to `max_chars`.
    pub fn elided(&self, max_chars: usize) -> Self {
        let mut copy = self.clone();
        if let Some(resp) = &copy.last_response {
            if resp.chars().count() > max_chars {
                let cut: String = resp.chars().take(max_chars).collect();
                copy.last_response = Some(format!("{cut}…"));
            }
        }
        copy
    }

    /// Apply a phase transition result, keeping `connected` in step.
    pub(crate) fn sync_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.connected = phase.is_connected();
        if let ConnectionPhase::Reconnecting { attempt } = phase {
            self.reconnect_attempt = attempt;
        } else if phase.is_connected() {
            self.reconnect_attempt = 0;
        }
    }
}

pub(crate) fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

mod duration_ms {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

// ── Tests ────────────────────────────────────────────────────────
