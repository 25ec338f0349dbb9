//! Plain or TLS byte stream to a remote host.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{TransportError, describe_io};
use crate::network::tls::{TlsParams, TlsSetup, summarize_certificate};
use crate::state::TlsInfo;

pub const DEFAULT_TELNET_PORT: u16 = 23;

// ── ConnectTarget ────────────────────────────────────────────────

/// Where to connect and how: the logical connection, reused verbatim by
/// every reconnection attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logical label; defaults to `host:port`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsParams>,
}

fn default_port() -> u16 {
    DEFAULT_TELNET_PORT
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            name: None,
            tls: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsParams) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── TransportStream ──────────────────────────────────────────────

/// The byte stream underneath the telnet codec.
pub enum TransportStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

/// An opened connection, ready to be handed to a session link.
pub struct Transport {
    pub stream: TransportStream,
    pub peer: SocketAddr,
    pub tls_info: Option<TlsInfo>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("tls_info", &self.tls_info)
            .finish()
    }
}

impl Transport {
    /// Resolve, connect and (optionally) run the TLS handshake. Each of
    /// the three steps is bounded by `connect_timeout`.
    pub async fn open(
        target: &ConnectTarget,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let addr = target.addr();

        let addrs: Vec<SocketAddr> = timeout(connect_timeout, tokio::net::lookup_host(&addr))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "DNS lookup",
                after: connect_timeout,
            })?
            .map_err(|e| TransportError::Connect {
                addr: addr.clone(),
                cause: format!("could not resolve host: {e}"),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Connect {
                addr,
                cause: "host resolved to no addresses".into(),
            });
        }

        let tcp = timeout(connect_timeout, TcpStream::connect(&addrs[..]))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "TCP connect",
                after: connect_timeout,
            })?
            .map_err(|e| TransportError::Connect {
                addr: addr.clone(),
                cause: describe_io(&e),
            })?;
        tcp.set_nodelay(true).map_err(|e| TransportError::Connect {
            addr: addr.clone(),
            cause: describe_io(&e),
        })?;
        let peer = tcp.peer_addr().map_err(|e| TransportError::Connect {
            addr: addr.clone(),
            cause: describe_io(&e),
        })?;

        let Some(params) = target.tls.as_ref().filter(|t| t.enabled) else {
            tracing::info!("connected to {addr} ({peer})");
            return Ok(Self {
                stream: TransportStream::Plain(tcp),
                peer,
                tls_info: None,
            });
        };

        let setup = TlsSetup::build(params, &target.host)?;
        let handshake = timeout(
            connect_timeout,
            setup.connector.connect(setup.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "TLS handshake",
            after: connect_timeout,
        })?;

        let tls = match handshake {
            Ok(tls) => tls,
            Err(e) => {
                if params.verify_peer {
                    if let Some(failure) = setup.verifier.verdict() {
                        return Err(TransportError::Certificate(failure));
                    }
                }
                return Err(TransportError::Handshake {
                    addr,
                    cause: describe_io(&e),
                });
            }
        };

        let info = {
            let (_, conn) = tls.get_ref();
            let verdict = setup.verifier.verdict();
            TlsInfo {
                authorized: verdict.is_none(),
                authorization_error: verdict.map(|f| f.to_string()),
                protocol: conn
                    .protocol_version()
                    .map(protocol_name)
                    .unwrap_or_else(|| "unknown".into()),
                cipher: conn
                    .negotiated_cipher_suite()
                    .map(|s| format!("{:?}", s.suite()))
                    .unwrap_or_else(|| "unknown".into()),
                peer_certificate: conn
                    .peer_certificates()
                    .and_then(|chain| chain.first())
                    .and_then(summarize_certificate),
            }
        };
        tracing::info!(
            "TLS to {addr} ({peer}): {} {} authorized={}",
            info.protocol,
            info.cipher,
            info.authorized
        );

        Ok(Self {
            stream: TransportStream::Tls(Box::new(tls)),
            peer,
            tls_info: Some(info),
        })
    }
}

fn protocol_name(version: rustls::ProtocolVersion) -> String {
    match version {
        rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3".into(),
        rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2".into(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn target_defaults() {
        let target = ConnectTarget::new("mud.example.org", DEFAULT_TELNET_PORT);
        assert_eq!(target.display_name(), "mud.example.org:23");
        assert!(!target.uses_tls());
        let named = target.with_name("home");
        assert_eq!(named.display_name(), "home");
    }

    #[test]
    fn target_deserializes_with_default_port() {
        let target: ConnectTarget = serde_json::from_str(r#"{"host":"h"}"#).unwrap();
        assert_eq!(target.port, 23);
    }

    #[tokio::test]
    async fn plain_open_reports_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let target = ConnectTarget::new("127.0.0.1", port);
        let transport = Transport::open(&target, Duration::from_secs(5)).await.unwrap();
        assert_eq!(transport.peer.port(), port);
        assert!(transport.tls_info.is_none());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn refused_is_a_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = ConnectTarget::new("127.0.0.1", port);
        let err = Transport::open(&target, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "{err}");
    }
}
