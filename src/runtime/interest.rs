//! Readiness interest computed by the connection state machine.
//!
//! The state machine says what it wants next; the event loop translates
//! that into a registration update. `None` is the only close signal.

/// Readiness a connection wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    /// Nothing left to do; deregister and close.
    None,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl IoInterest {
    pub fn from_wants(read: bool, write: bool) -> Self {
        match (read, write) {
            (false, false) => IoInterest::None,
            (true, false) => IoInterest::ReadOnly,
            (false, true) => IoInterest::WriteOnly,
            (true, true) => IoInterest::ReadWrite,
        }
    }

    /// Native mio interest, or `None` when the connection should be closed.
    pub fn to_mio(self) -> Option<mio::Interest> {
        match self {
            IoInterest::None => None,
            IoInterest::ReadOnly => Some(mio::Interest::READABLE),
            IoInterest::WriteOnly => Some(mio::Interest::WRITABLE),
            IoInterest::ReadWrite => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
        }
    }
}
