//! Event identity.

use std::fmt;

/// Handle to a kernel event.
///
/// Ids are slab indices paired with a generation counter. Releasing an
/// event bumps the slot's generation, so a stale handle held after
/// release can never alias a recycled slot: the kernel rejects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ev{}.g{}", self.index, self.generation)
    }
}

/// How an event concluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The event succeeded.
    Ok,
    /// The event failed; subscribers decide how to react.
    Failed,
}

impl Outcome {
    /// True for [`Outcome::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}
