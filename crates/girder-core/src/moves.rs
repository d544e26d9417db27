//! Crane moves and move requests.

use indexmap::IndexSet;

use crate::id::{BlockId, CraneId, LocationId, MoveId};
use crate::time::SimTime;

/// What a crane move does.
///
/// Closed set, matched exhaustively; there is no open-ended move
/// polymorphism.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveKind {
    /// Travel to the pickup position and stop; no manipulation.
    MoveToPickup,
    /// Travel to pickup, grab `amount` blocks, carry them to dropoff.
    PickupAndDropoff,
}

/// How a move ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveTermination {
    /// Completed as planned.
    Success,
    /// Physically infeasible at execution time (short stack at pickup,
    /// no space at dropoff); only this move fails, the run continues.
    Failed,
    /// Abandoned before completion because the crane was cancelled.
    Interrupted,
}

/// A concrete crane task: which blocks to take from where to where.
#[derive(Clone, Debug)]
pub struct CraneMove {
    /// Stable identifier; negative for generator-transient moves.
    pub id: MoveId,
    /// What the move does.
    pub kind: MoveKind,
    /// Location to pick up from.
    pub pickup_location: LocationId,
    /// Girder position of the pickup location.
    pub pickup_position: f64,
    /// Location to drop off at. Equal to `pickup_location` for
    /// [`MoveKind::MoveToPickup`].
    pub dropoff_location: LocationId,
    /// Girder position of the dropoff location.
    pub dropoff_position: f64,
    /// Number of blocks to transfer.
    pub amount: usize,
    /// Earliest instant the move may start.
    pub release_time: SimTime,
    /// Deadline for KPI accounting; late completion is tardy, not fatal.
    pub due_date: SimTime,
    /// When set, only this crane may execute the move.
    pub required_crane: Option<CraneId>,
    /// Moves that must finish before this one may start. Insertion
    /// order is preserved for deterministic iteration.
    pub predecessors: IndexSet<MoveId>,
    /// The block ids this move transfers, bottom-to-top.
    pub moved_blocks: Vec<BlockId>,
}

impl CraneMove {
    /// Number of unmet predecessors.
    pub fn predecessor_count(&self) -> usize {
        self.predecessors.len()
    }

    /// Drop `finished` from the predecessor set, if listed.
    pub fn remove_predecessor(&mut self, finished: MoveId) {
        self.predecessors.shift_remove(&finished);
    }
}

/// An open request from the outside world: bring `block` to
/// `target_location` by `due_date`.
///
/// The move generator turns open requests into concrete [`CraneMove`]s
/// with correct predecessor chains.
#[derive(Clone, Copy, Debug)]
pub struct MoveRequest {
    /// Stable identifier.
    pub id: u32,
    /// The block to relocate.
    pub block: BlockId,
    /// Destination location.
    pub target_location: LocationId,
    /// Deadline for KPI accounting.
    pub due_date: SimTime,
}
