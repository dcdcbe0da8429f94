/// Errors that tear an [`crate::interface::Interface`] down.
///
/// Every other drop reason - informational drop, warned drop, postponed, allocation failure - is
/// represented by [`crate::Outcome`] instead, since those are expected, per-packet results rather
/// than invariant violations.
#[derive(Debug)]
pub enum Error {
    Wire(edge_router_wire::Error),
    Dhcp(edge_router_dhcp::Error),
    /// The frame dispatch classified an EtherType this build claims to support but has no
    /// handler for - an invariant violation, not a malformed packet (those are `Drop-warn`).
    Unsupported,
}

impl From<edge_router_wire::Error> for Error {
    fn from(value: edge_router_wire::Error) -> Self {
        Self::Wire(value)
    }
}

impl From<edge_router_dhcp::Error> for Error {
    fn from(value: edge_router_dhcp::Error) -> Self {
        Self::Dhcp(value)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Wire(e) => write!(f, "wire format error: {e}"),
            Self::Dhcp(_) => write!(f, "DHCP format error"),
            Self::Unsupported => write!(f, "unsupported protocol reached the dispatch core"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// The per-packet outcome of a parse/forward step.
///
/// An explicit sum type every dispatch step returns rather than throwing. `Postponed` carries no
/// payload: by the time it is returned, the postponed bytes have already been copied into the
/// [`crate::arp::ArpWaiter`] that will resume them, because the `RawReceive` contract hands
/// packet data to the caller by copy into a caller-owned buffer rather than via a descriptor pool
/// the waiter could just hold a handle to.
#[derive(Debug)]
pub enum Outcome {
    Accept,
    DropInform(&'static str),
    DropWarn(&'static str),
    Postponed,
}

impl Outcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// Logs this outcome and returns it, for use at the tail of a dispatch function:
    /// `return Outcome::DropWarn("...").log("context");`.
    pub fn log(self, context: &str) -> Self {
        match &self {
            Self::Accept | Self::Postponed => {}
            Self::DropInform(msg) => log::info!("{context}: {msg}"),
            Self::DropWarn(msg) => log::warn!("{context}: {msg}"),
        }

        self
    }
}
