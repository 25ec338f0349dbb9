pub mod connection;
pub mod tls;
pub mod transport;

pub use connection::{LinkEvent, LinkFault, LinkSender, SessionLink, keepalive};
pub use tls::TlsParams;
pub use transport::{ConnectTarget, DEFAULT_TELNET_PORT, Transport, TransportStream};
