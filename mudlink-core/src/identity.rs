//! Identity precondition for opening connections.
//!
//! The engine never decides who the controller is; it asks an
//! [`IdentityGate`] and refuses to connect while the gate says no.

use serde::{Deserialize, Serialize};

/// Who is driving the client, reported in the first TTYPE round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
    pub provider: String,
}

/// External collaborator consulted before every connect.
pub trait IdentityGate: Send + Sync {
    fn is_identified(&self) -> bool;

    /// Identity to advertise, if one was registered.
    fn identity(&self) -> Option<ClientIdentity> {
        None
    }
}

/// A fixed answer, set up front.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    identified: bool,
    identity: Option<ClientIdentity>,
}

impl StaticIdentity {
    /// Identified, with an identity to advertise.
    pub fn identified(identity: ClientIdentity) -> Self {
        Self {
            identified: true,
            identity: Some(identity),
        }
    }

    /// Identified, but without a name suffix in the TTYPE answer.
    pub fn anonymous() -> Self {
        Self {
            identified: true,
            identity: None,
        }
    }

    /// Gate closed: every connect fails with `IdentityNotSet`.
    pub fn unidentified() -> Self {
        Self::default()
    }
}

impl IdentityGate for StaticIdentity {
    fn is_identified(&self) -> bool {
        self.identified
    }

    fn identity(&self) -> Option<ClientIdentity> {
        self.identity.clone()
    }
}
