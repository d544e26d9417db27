//! Wake tokens routed by the event kernel.

use girder_core::CraneId;

/// What to drive when a kernel entry fires.
///
/// Agent tokens carry the epoch of the wait they belong to. An agent
/// bumps its epoch whenever it is interrupted, so a token from an
/// abandoned wait no longer matches and is dropped on delivery. Stale
/// resumption is a no-op, never an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// Resume a crane agent's state machine.
    Agent {
        /// The crane to drive.
        crane: CraneId,
        /// Epoch of the wait this wake belongs to.
        epoch: u64,
    },
    /// An observer event armed by the host; surfaces as
    /// [`Notification::Observer`](crate::Notification::Observer).
    Observer(u64),
}
