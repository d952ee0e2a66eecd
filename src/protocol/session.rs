//! Per-connection session states, server side.
//!
//! ```text
//! Listening -> Accepted -> Negotiating -> Active -> Terminated
//!                               |           |
//!                               +-----------+----> Vagrant
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Listening,
    /// TCP accepted, nothing exchanged yet.
    Accepted,
    Negotiating,
    /// Answering requests and receiving pushes.
    Active,
    /// Either side sent DISCONNECT, or the socket reported EOF.
    Terminated,
    /// Found dead during a pass, waiting for the next expel sweep.
    Vagrant,
}

impl SessionState {
    /// Whether moving to `next` is a legal step.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Listening, Accepted)
                | (Accepted, Negotiating)
                | (Accepted, Terminated)
                | (Negotiating, Active)
                | (Negotiating, Vagrant)
                | (Negotiating, Terminated)
                | (Active, Terminated)
                | (Active, Vagrant)
                | (Vagrant, Terminated)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Listening => "listening",
            SessionState::Accepted => "accepted",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Terminated => "terminated",
            SessionState::Vagrant => "vagrant",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
