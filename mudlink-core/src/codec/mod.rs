//! `tokio_util` codec for a telnet client stream.
//!
//! Decoding runs raw socket bytes through [`TelnetDecoder`] and yields the
//! visible text together with any negotiation replies. Encoding turns
//! [`Outbound`] items into wire bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{IAC, TelnetDecoder};

/// One decoded read: application text plus replies owed to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub text: Bytes,
    pub replies: Bytes,
}

/// Anything the engine writes to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A sanitized command line; CRLF is appended on encode.
    Command(String),
    /// Pre-framed negotiation bytes, written verbatim.
    Negotiation(Bytes),
    /// The single zero byte sent to keep idle intermediaries happy.
    KeepAlive,
}

pub struct TelnetCodec {
    decoder: TelnetDecoder,
}

impl TelnetCodec {
    pub fn new(decoder: TelnetDecoder) -> Self {
        Self { decoder }
    }
}

impl tokio_util::codec::Decoder for TelnetCodec {
    type Item = Inbound;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let chunk = src.split();
        let decoded = self.decoder.feed(&chunk);
        if decoded.text.is_empty() && decoded.replies.is_empty() {
            // Only partial negotiation so far; state carries over.
            return Ok(None);
        }

        Ok(Some(Inbound {
            text: Bytes::from(decoded.text),
            replies: Bytes::from(decoded.replies),
        }))
    }
}

impl tokio_util::codec::Encoder<Outbound> for TelnetCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Outbound::Command(line) => {
                dst.reserve(line.len() + 2);
                for &b in line.as_bytes() {
                    if b == IAC {
                        dst.put_u8(IAC);
                    }
                    dst.put_u8(b);
                }
                dst.put_slice(b"\r\n");
            }
            Outbound::Negotiation(bytes) => dst.put_slice(&bytes),
            Outbound::KeepAlive => dst.put_u8(0),
        }
        Ok(())
    }
}
