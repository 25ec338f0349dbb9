//! Telnet wire constants and the in-band negotiation machinery.
//!
//! | Module    | Purpose                                             |
//! |-----------|-----------------------------------------------------|
//! | `decoder` | Byte scanner that strips IAC sequences and answers  |
//! | `ttype`   | Terminal-type / MTTS identification cycle           |

pub mod decoder;
pub mod ttype;

pub use decoder::{Decoded, TelnetDecoder};
pub use ttype::{IdentState, IdentificationSequencer};

/// Interpret As Command.
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
/// Subnegotiation begin.
pub const SB: u8 = 250;
pub const GA: u8 = 249;
pub const NOP: u8 = 241;
/// Subnegotiation end.
pub const SE: u8 = 240;

/// Telnet option numbers this client knows about.
pub mod option {
    pub const TTYPE: u8 = 24;
}

/// TTYPE subnegotiation verbs (RFC 1091).
pub const TTYPE_IS: u8 = 0;
pub const TTYPE_SEND: u8 = 1;

/// Three-byte negotiation reply, e.g. `IAC WILL TTYPE`.
pub fn negotiation(command: u8, opt: u8) -> [u8; 3] {
    [IAC, command, opt]
}

/// Build `IAC SB <opt> <data> IAC SE`, doubling any IAC inside `data`.
pub fn subnegotiation(opt: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 6);
    out.extend_from_slice(&[IAC, SB, opt]);
    for &b in data {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out.extend_from_slice(&[IAC, SE]);
    out
}
