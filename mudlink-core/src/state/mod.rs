pub mod buffer;
pub mod connection;

pub use buffer::{DEFAULT_BUFFER_CEILING, ResponseBuffer};
pub use connection::{ConnectionPhase, ConnectionState, PeerCertificate, TlsInfo};
