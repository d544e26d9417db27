//! Strongly-typed identifiers.
//!
//! Every entity in the yard is addressed by a stable integer id rather
//! than a long-lived reference; subsystems hold ids and resolve them
//! against the world model when they act.

use std::fmt;

/// Identifies a block (slab, coil, or other unit load).
///
/// A block lives in exactly one container at any instant: a location
/// stack or a crane load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BlockId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a storage location (a stack slot at a fixed girder position).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(pub u32);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LocationId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a crane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CraneId(pub u32);

impl fmt::Display for CraneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CraneId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a crane move.
///
/// External planners submit moves with non-negative ids; the move
/// generator allocates negative transient ids for relocations it
/// creates itself. The two ranges never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MoveId(pub i32);

impl MoveId {
    /// True for generator-created moves (negative id range).
    pub fn is_transient(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for MoveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for MoveId {
    fn from(v: i32) -> Self {
        Self(v)
    }
}

/// Handle for a granted or pending zone lock.
///
/// Allocated from a monotonic counter per zone controller; never reused
/// within a run, so a stale handle can be detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(pub u64);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for a queued resource request (pickup, dropoff, or schedule get).
///
/// Monotonic per queue owner; used to claim results and to cancel a
/// request that is still waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(pub u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
