//! Command sanitizing and the results handed back to callers.

use std::time::Duration;

use serde::Serialize;

use crate::error::EngineError;
use crate::state::TlsInfo;

/// Appended to responses while continuous mode is on.
pub const READY_MARKER: &str = "\n[Ready for next input]";

/// Strip control bytes except tab, CR and LF.
///
/// A command that was non-empty but consisted only of stripped bytes is
/// rejected; an empty command is allowed and sends a bare CRLF.
pub fn sanitize(command: &str) -> Result<String, EngineError> {
    let clean: String = command
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\r' | '\n'))
        .collect();
    if clean.is_empty() && !command.is_empty() {
        return Err(EngineError::InvalidCommand(
            "command contained only control characters".into(),
        ));
    }
    Ok(clean)
}

pub fn timeout_notice(after: Duration) -> String {
    format!(
        "[Timed out after {} ms; partial response follows]\n",
        after.as_millis()
    )
}

pub fn interrupted_notice(cause: &str) -> String {
    format!("[Connection lost: {cause}; partial response follows]\n")
}

/// The text collected for one command cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    pub text: String,
    /// The hard timeout fired before the settle window; `text` is partial.
    pub timed_out: bool,
    /// The link dropped mid-cycle; `text` is what arrived before it did.
    pub interrupted: bool,
}

impl CommandResponse {
    pub(crate) fn compose(
        buffered: String,
        timed_out: Option<Duration>,
        continuous: bool,
    ) -> Self {
        let mut text = match timed_out {
            Some(after) => timeout_notice(after) + &buffered,
            None => buffered,
        };
        if continuous {
            text.push_str(READY_MARKER);
        }
        Self {
            text,
            timed_out: timed_out.is_some(),
            interrupted: false,
        }
    }

    pub(crate) fn interrupted(buffered: String, cause: &str, continuous: bool) -> Self {
        let mut text = interrupted_notice(cause) + &buffered;
        if continuous {
            text.push_str(READY_MARKER);
        }
        Self {
            text,
            timed_out: false,
            interrupted: true,
        }
    }
}

/// Result of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectOutcome {
    pub message: String,
    /// Text received during the first settle window.
    pub banner: String,
    pub tls_info: Option<TlsInfo>,
}
