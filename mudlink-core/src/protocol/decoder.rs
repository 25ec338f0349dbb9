//! Inbound telnet byte scanner.
//!
//! Strips IAC sequences from the stream, leaving application text, and
//! queues the negotiation replies this client owes the peer. Only the
//! terminal-type option is ever agreed to; everything else is refused.
//!
//! The scanner keeps its state between calls, so a sequence split across
//! two socket reads decodes the same as one delivered whole.

use crate::protocol::ttype::IdentificationSequencer;
use crate::protocol::{DO, DONT, IAC, SB, SE, TTYPE_SEND, WILL, WONT, negotiation, option};

/// Default limit on bytes examined per [`TelnetDecoder::feed`] call.
pub const DEFAULT_CHUNK_CAP: usize = 64 * 1024;

/// Default limit on a single subnegotiation payload.
pub const DEFAULT_SUBNEG_CAP: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    /// Saw `IAC <WILL|WONT|DO|DONT>`, waiting for the option byte.
    Negotiate(u8),
    /// Saw `IAC SB`, waiting for the option byte.
    SubOption,
    SubData,
    SubIac,
}

/// Output of one [`TelnetDecoder::feed`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Application-visible bytes.
    pub text: Vec<u8>,
    /// Bytes to write back to the peer, already framed.
    pub replies: Vec<u8>,
}

/// Stateful telnet scanner bound to one connection.
#[derive(Debug)]
pub struct TelnetDecoder {
    state: State,
    sub_option: u8,
    sub_buf: Vec<u8>,
    sub_overflow: usize,
    sequencer: IdentificationSequencer,
    chunk_cap: usize,
    subneg_cap: usize,
}

impl TelnetDecoder {
    pub fn new(sequencer: IdentificationSequencer) -> Self {
        Self::with_limits(sequencer, DEFAULT_CHUNK_CAP, DEFAULT_SUBNEG_CAP)
    }

    pub fn with_limits(
        sequencer: IdentificationSequencer,
        chunk_cap: usize,
        subneg_cap: usize,
    ) -> Self {
        Self {
            state: State::Data,
            sub_option: 0,
            sub_buf: Vec::new(),
            sub_overflow: 0,
            sequencer,
            chunk_cap: chunk_cap.max(1),
            subneg_cap,
        }
    }

    pub fn sequencer(&self) -> &IdentificationSequencer {
        &self.sequencer
    }

    /// Scan a chunk of raw inbound bytes.
    ///
    /// At most `chunk_cap` bytes are examined; the remainder is dropped
    /// with a warning.
    pub fn feed(&mut self, input: &[u8]) -> Decoded {
        let mut out = Decoded {
            text: Vec::with_capacity(input.len().min(self.chunk_cap)),
            replies: Vec::new(),
        };

        let input = if input.len() > self.chunk_cap {
            tracing::warn!(
                "inbound chunk of {} bytes exceeds decoder cap {}; dropping {} bytes",
                input.len(),
                self.chunk_cap,
                input.len() - self.chunk_cap
            );
            &input[..self.chunk_cap]
        } else {
            input
        };

        for &b in input {
            self.step(b, &mut out);
        }
        out
    }

    fn step(&mut self, b: u8, out: &mut Decoded) {
        match self.state {
            State::Data => {
                if b == IAC {
                    self.state = State::Iac;
                } else {
                    out.text.push(b);
                }
            }
            State::Iac => {
                self.state = match b {
                    // IAC IAC is a literal 0xFF.
                    IAC => {
                        out.text.push(IAC);
                        State::Data
                    }
                    WILL | WONT | DO | DONT => State::Negotiate(b),
                    SB => State::SubOption,
                    // NOP, GA and the other two-byte commands carry nothing.
                    _ => State::Data,
                };
            }
            State::Negotiate(cmd) => {
                self.negotiate(cmd, b, out);
                self.state = State::Data;
            }
            State::SubOption => {
                self.sub_option = b;
                self.sub_buf.clear();
                self.sub_overflow = 0;
                self.state = State::SubData;
            }
            State::SubData => {
                if b == IAC {
                    self.state = State::SubIac;
                } else {
                    self.push_sub(b);
                }
            }
            State::SubIac => match b {
                SE => {
                    self.finish_subnegotiation(out);
                    self.state = State::Data;
                }
                IAC => {
                    self.push_sub(IAC);
                    self.state = State::SubData;
                }
                _ => {
                    tracing::debug!(
                        "malformed subnegotiation for option {}; discarding",
                        self.sub_option
                    );
                    self.sub_buf.clear();
                    self.state = State::Data;
                }
            },
        }
    }

    fn push_sub(&mut self, b: u8) {
        if self.sub_buf.len() < self.subneg_cap {
            self.sub_buf.push(b);
        } else {
            if self.sub_overflow == 0 {
                tracing::warn!(
                    "subnegotiation for option {} exceeds {} bytes; dropping excess",
                    self.sub_option,
                    self.subneg_cap
                );
            }
            self.sub_overflow += 1;
        }
    }

    fn negotiate(&mut self, cmd: u8, opt: u8, out: &mut Decoded) {
        match cmd {
            DO if opt == option::TTYPE => {
                tracing::debug!("DO TTYPE; agreeing");
                self.sequencer.reset();
                out.replies.extend_from_slice(&negotiation(WILL, opt));
            }
            DO => {
                tracing::trace!("DO {opt}; refusing");
                out.replies.extend_from_slice(&negotiation(WONT, opt));
            }
            DONT => {
                if opt == option::TTYPE {
                    self.sequencer.reset();
                }
                out.replies.extend_from_slice(&negotiation(WONT, opt));
            }
            // WILL / WONT from the peer need no answer.
            _ => tracing::trace!("peer {} {opt}", if cmd == WILL { "WILL" } else { "WONT" }),
        }
    }

    fn finish_subnegotiation(&mut self, out: &mut Decoded) {
        if self.sub_option == option::TTYPE && self.sub_buf.first() == Some(&TTYPE_SEND) {
            out.replies.extend_from_slice(&self.sequencer.next_reply());
        }
        self.sub_buf.clear();
        self.sub_overflow = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ttype::IdentState;
    use crate::protocol::{GA, NOP, TTYPE_IS};

    const TTYPE: u8 = option::TTYPE;

    fn decoder() -> TelnetDecoder {
        TelnetDecoder::new(IdentificationSequencer::new(
            "MUDLINK",
            "0.1.0",
            "XTERM-256COLOR",
            None,
        ))
    }

    fn send_request() -> Vec<u8> {
        vec![IAC, SB, TTYPE, TTYPE_SEND, IAC, SE]
    }

    /// Payload of an `IAC SB TTYPE IS ... IAC SE` reply.
    fn ttype_payload(reply: &[u8]) -> String {
        assert_eq!(&reply[..4], &[IAC, SB, TTYPE, TTYPE_IS]);
        String::from_utf8(reply[4..reply.len() - 2].to_vec()).unwrap()
    }

    #[test]
    fn plain_text_passes_through() {
        let mut dec = decoder();
        let input = b"Welcome to the Realm!\r\nBy what name are you known? ";
        let out = dec.feed(input);
        assert_eq!(out.text, input.to_vec());
        assert!(out.replies.is_empty());
    }

    #[test]
    fn arbitrary_non_iac_bytes_pass_through() {
        let mut dec = decoder();
        let input: Vec<u8> = (0u8..255).collect();
        let out = dec.feed(&input);
        assert_eq!(out.text, input);
    }

    #[test]
    fn do_ttype_answers_will_once() {
        let mut dec = decoder();
        let out = dec.feed(&[b'a', IAC, DO, TTYPE, b'b']);
        assert_eq!(out.text, b"ab");
        assert_eq!(out.replies, vec![IAC, WILL, TTYPE]);
        assert_eq!(dec.sequencer().state(), IdentState::ClientName);
    }

    #[test]
    fn do_other_option_is_refused() {
        let mut dec = decoder();
        let out = dec.feed(&[IAC, DO, 31]);
        assert_eq!(out.replies, vec![IAC, WONT, 31]);
    }

    #[test]
    fn dont_is_acknowledged_and_resets_cycle() {
        let mut dec = decoder();
        dec.feed(&send_request());
        dec.feed(&send_request());
        assert_eq!(dec.sequencer().state(), IdentState::CapabilityBits);

        let out = dec.feed(&[IAC, DONT, TTYPE]);
        assert_eq!(out.replies, vec![IAC, WONT, TTYPE]);
        assert_eq!(dec.sequencer().state(), IdentState::ClientName);
    }

    #[test]
    fn will_and_wont_are_consumed_silently() {
        let mut dec = decoder();
        let out = dec.feed(&[IAC, WILL, 1, b'x', IAC, WONT, 3]);
        assert_eq!(out.text, b"x");
        assert!(out.replies.is_empty());
    }

    #[test]
    fn mtts_cycle_through_decoder() {
        let mut dec = decoder();
        dec.feed(&[IAC, DO, TTYPE]);
        let answers: Vec<String> = (0..5)
            .map(|_| ttype_payload(&dec.feed(&send_request()).replies))
            .collect();
        assert_eq!(
            answers,
            vec![
                "MUDLINK-0.1.0",
                "XTERM-256COLOR",
                "MTTS 13",
                "MTTS 13",
                "MTTS 13"
            ]
        );
    }

    #[test]
    fn sequence_split_across_chunks() {
        let mut dec = decoder();
        let first = dec.feed(&[b'h', b'i', IAC]);
        let second = dec.feed(&[DO]);
        let third = dec.feed(&[TTYPE, b'!']);
        assert_eq!(first.text, b"hi");
        assert!(second.text.is_empty() && second.replies.is_empty());
        assert_eq!(third.text, b"!");
        assert_eq!(third.replies, vec![IAC, WILL, TTYPE]);
    }

    #[test]
    fn escaped_iac_is_data() {
        let mut dec = decoder();
        let out = dec.feed(&[b'a', IAC, IAC, b'b']);
        assert_eq!(out.text, vec![b'a', 0xFF, b'b']);
    }

    #[test]
    fn two_byte_commands_are_dropped() {
        let mut dec = decoder();
        let out = dec.feed(&[b'>', IAC, GA, b' ', IAC, NOP]);
        assert_eq!(out.text, b"> ");
    }

    #[test]
    fn other_subnegotiations_are_stripped() {
        let mut dec = decoder();
        let mut input = b"hp: 10".to_vec();
        input.extend_from_slice(&[IAC, SB, 201]);
        input.extend_from_slice(b"Char.Vitals {\"hp\":10}");
        input.extend_from_slice(&[IAC, SE]);
        input.extend_from_slice(b"\r\n");
        let out = dec.feed(&input);
        assert_eq!(out.text, b"hp: 10\r\n");
        assert!(out.replies.is_empty());
    }

    #[test]
    fn unterminated_subnegotiation_stays_bounded() {
        let mut dec = TelnetDecoder::with_limits(
            IdentificationSequencer::new("MUDLINK", "0.1.0", "XTERM-256COLOR", None),
            DEFAULT_CHUNK_CAP,
            16,
        );
        dec.feed(&[IAC, SB, 201]);
        for _ in 0..100 {
            let out = dec.feed(&[b'z'; 1000]);
            assert!(out.text.is_empty());
        }
        assert!(dec.sub_buf.len() <= 16);

        // Terminating the sequence resynchronises the stream.
        let out = dec.feed(&[IAC, SE, b'o', b'k']);
        assert_eq!(out.text, b"ok");
    }

    #[test]
    fn oversized_chunk_is_truncated() {
        let mut dec = TelnetDecoder::with_limits(
            IdentificationSequencer::new("MUDLINK", "0.1.0", "XTERM-256COLOR", None),
            8,
            DEFAULT_SUBNEG_CAP,
        );
        let out = dec.feed(b"0123456789abcdef");
        assert_eq!(out.text, b"01234567");
    }

    #[test]
    fn malformed_subnegotiation_recovers() {
        let mut dec = decoder();
        let out = dec.feed(&[IAC, SB, TTYPE, TTYPE_SEND, IAC, b'x', b'y']);
        assert!(out.replies.is_empty());
        assert_eq!(out.text, b"y");
    }
}
