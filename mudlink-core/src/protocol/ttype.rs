//! Terminal-type identification cycle (MTTS).
//!
//! Remote services that follow the MTTS convention send
//! `IAC SB TTYPE SEND IAC SE` repeatedly and classify the client by the
//! ordered answers:
//!
//! ```text
//!  ClientName ──► TerminalType ──► CapabilityBits ──► CapabilityRepeat ─┐
//!                                                            ▲          │
//!                                                            └──────────┘
//! ```
//!
//! The cycle is linear; the last state re-answers the capability token
//! forever so the server can detect the end of the list.

use crate::flags::MttsFlags;
use crate::identity::ClientIdentity;
use crate::protocol::{TTYPE_IS, option, subnegotiation};

/// Position in the identification cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentState {
    #[default]
    ClientName,
    TerminalType,
    CapabilityBits,
    CapabilityRepeat,
}

/// Produces the successive TTYPE answers for one connection.
#[derive(Debug, Clone)]
pub struct IdentificationSequencer {
    state: IdentState,
    client_name: String,
    terminal_type: String,
    capabilities: MttsFlags,
}

impl IdentificationSequencer {
    /// `product` and `version` form the client name (`MUDLINK-0.1.0`);
    /// a registered identity is appended as `/<name>/<version> (<provider>)`.
    pub fn new(
        product: &str,
        version: &str,
        terminal_type: &str,
        identity: Option<&ClientIdentity>,
    ) -> Self {
        let mut client_name = format!("{product}-{version}");
        if let Some(id) = identity {
            client_name.push_str(&format!("/{}/{} ({})", id.name, id.version, id.provider));
        }
        Self {
            state: IdentState::ClientName,
            client_name,
            terminal_type: terminal_type.to_string(),
            capabilities: MttsFlags::ADVERTISED,
        }
    }

    pub fn state(&self) -> IdentState {
        self.state
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Back to `ClientName`; called on `DO TTYPE`, `DONT TTYPE` and new
    /// connections.
    pub fn reset(&mut self) {
        self.state = IdentState::ClientName;
    }

    /// The payload for the current state, advancing the cycle.
    pub fn next_payload(&mut self) -> String {
        match self.state {
            IdentState::ClientName => {
                self.state = IdentState::TerminalType;
                self.client_name.clone()
            }
            IdentState::TerminalType => {
                self.state = IdentState::CapabilityBits;
                self.terminal_type.clone()
            }
            IdentState::CapabilityBits => {
                self.state = IdentState::CapabilityRepeat;
                self.capabilities.token()
            }
            IdentState::CapabilityRepeat => self.capabilities.token(),
        }
    }

    /// The next answer framed as `IAC SB TTYPE IS <payload> IAC SE`.
    pub fn next_reply(&mut self) -> Vec<u8> {
        let payload = self.next_payload();
        tracing::debug!("TTYPE IS {payload}");
        let mut data = Vec::with_capacity(payload.len() + 1);
        data.push(TTYPE_IS);
        data.extend_from_slice(payload.as_bytes());
        subnegotiation(option::TTYPE, &data)
    }
}
