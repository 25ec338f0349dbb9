//! # mudlink-core
//!
//! Client-side telnet (optionally TLS) engine that lets a controller drive
//! line-oriented remote hosts one command at a time.
//!
//! This crate contains:
//! - **Protocol**: `TelnetDecoder` and the TTYPE/MTTS `IdentificationSequencer`
//! - **Codec**: `TelnetCodec` for framed socket I/O via `tokio_util`
//! - **Network**: `Transport` (plain or TLS) and `SessionLink` reader/writer tasks
//! - **State**: `ConnectionState` snapshots and the bounded `ResponseBuffer`
//! - **Engine**: the single-owner actor behind the cloneable `Engine` handle,
//!   with command/response correlation, keep-alive and reconnection
//! - **Task**: `TimerRegistry` for tracking and cancelling session timers
//! - **Error**: `EngineError` / `TransportError`, `thiserror`-based

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod identity;
pub mod network;
pub mod protocol;
pub mod state;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{Inbound, Outbound, TelnetCodec};
pub use config::EngineConfig;
pub use engine::{
    BackoffPolicy, CommandResponse, ConnectOutcome, Engine, EventKind, READY_MARKER,
    SessionEvent,
};
pub use error::{CertificateFailure, EngineError, TransportError};
pub use flags::MttsFlags;
pub use identity::{ClientIdentity, IdentityGate, StaticIdentity};
pub use network::{ConnectTarget, DEFAULT_TELNET_PORT, TlsParams};
pub use protocol::{IdentState, IdentificationSequencer, TelnetDecoder};
pub use state::{ConnectionPhase, ConnectionState, PeerCertificate, ResponseBuffer, TlsInfo};
pub use task::{TimerKind, TimerRegistry};
