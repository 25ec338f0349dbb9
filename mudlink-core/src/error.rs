//! Domain-specific error types for the mudlink engine.
//!
//! Transport faults are recovered inside the engine and only ever surface
//! as state; command-level faults are returned to the caller as
//! [`EngineError`]. Every variant renders a plain-text diagnostic.

use std::time::Duration;
use thiserror::Error;

// ── CertificateFailure ───────────────────────────────────────────

/// Why a peer certificate was not authorized under the trust policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateFailure {
    /// The server presented a certificate signed by itself.
    #[error("server presented a self-signed certificate")]
    SelfSigned,

    /// The chain does not lead to a trusted root (missing intermediate
    /// or unknown authority).
    #[error("certificate chain is incomplete or issued by an untrusted authority")]
    IncompleteChain,

    /// The certificate does not cover the requested server name.
    #[error("certificate is not valid for the requested host name")]
    HostnameMismatch,

    /// The certificate is outside its validity window.
    #[error("certificate has expired or is not yet valid")]
    Expired,

    /// Anything the verifier rejected for another reason.
    #[error("certificate rejected: {0}")]
    Other(String),
}

// ── TransportError ───────────────────────────────────────────────

/// Failures while opening a plain or TLS byte stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// DNS failure, refused connection, unreachable network.
    #[error("could not connect to {addr}: {cause}")]
    Connect { addr: String, cause: String },

    /// Protocol/cipher mismatch or closure during the TLS handshake.
    #[error("TLS handshake with {addr} failed: {cause}")]
    Handshake { addr: String, cause: String },

    /// The handshake aborted because the peer certificate was rejected.
    #[error("TLS certificate verification failed: {0}")]
    Certificate(#[from] CertificateFailure),

    /// Client-side TLS parameters could not be turned into a config.
    #[error("invalid TLS parameters: {0}")]
    TlsConfig(String),

    /// The TCP connect or TLS handshake exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

// ── EngineError ──────────────────────────────────────────────────

/// The canonical error type returned to callers of [`crate::Engine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// There is no live transport to talk to.
    #[error("not connected")]
    NotConnected,

    /// The identity gate refused the connection before any socket opened.
    #[error("client identity has not been set; identify before connecting")]
    IdentityNotSet,

    /// Opening the transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The operation was superseded by an explicit disconnect.
    #[error("operation cancelled by disconnect")]
    Cancelled,

    /// A command was empty after sanitization.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The engine task is no longer running.
    #[error("engine has shut down")]
    EngineStopped,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EngineError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        EngineError::EngineStopped
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for EngineError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        EngineError::EngineStopped
    }
}

/// Describe a socket-level failure in plain words.
pub(crate) fn describe_io(err: &std::io::Error) -> String {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused => "connection refused".into(),
        ErrorKind::NetworkUnreachable => "network unreachable".into(),
        ErrorKind::HostUnreachable => "host unreachable".into(),
        ErrorKind::TimedOut => "connection timed out".into(),
        ErrorKind::ConnectionReset => "connection reset by peer".into(),
        ErrorKind::ConnectionAborted => "connection aborted".into(),
        ErrorKind::AddrNotAvailable => "address not available".into(),
        ErrorKind::UnexpectedEof => "connection closed by peer".into(),
        _ => err.to_string(),
    }
}
