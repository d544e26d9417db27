//! Locations and cranes: the spatial entities of the yard.

use crate::error::StackError;
use crate::id::{CraneId, LocationId};
use crate::stack::{Block, Stack};

/// Role of a location within the yard.
///
/// The move generator treats these differently: handover locations are
/// final destinations and never chain as relocation targets, arrival
/// locations are never chosen as relocation targets either.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationKind {
    /// Blocks arrive here from upstream.
    Arrival,
    /// General-purpose storage.
    Buffer,
    /// Blocks leave the system here.
    Handover,
}

/// A fixed stacking position along the girder.
#[derive(Clone, Debug)]
pub struct Location {
    /// Stable identifier.
    pub id: LocationId,
    /// Position on the girder axis.
    pub girder_position: f64,
    /// Height limit of the stack.
    pub max_height: usize,
    /// Role within the yard.
    pub kind: LocationKind,
    /// The blocks stored here, bottom-to-top.
    pub stack: Stack,
}

impl Location {
    /// Construct an empty location.
    pub fn new(id: LocationId, girder_position: f64, max_height: usize, kind: LocationKind) -> Self {
        Self {
            id,
            girder_position,
            max_height,
            kind,
            stack: Stack::new(),
        }
    }

    /// Current stack height.
    pub fn height(&self) -> usize {
        self.stack.size()
    }

    /// Remaining capacity: `max_height - height`, never negative.
    pub fn free_height(&self) -> usize {
        self.max_height.saturating_sub(self.stack.size())
    }

    /// The topmost block, if any.
    pub fn topmost(&self) -> Option<Block> {
        self.stack.topmost()
    }

    /// Place a single block on top; fails without mutation when full.
    pub fn dropoff(&mut self, block: Block) -> Result<(), StackError> {
        if self.free_height() < 1 {
            return Err(StackError::Full {
                requested: 1,
                free: 0,
            });
        }
        self.stack.add_on_top(block);
        Ok(())
    }

    /// Place an entire stack on top; fails without mutation when it
    /// would not fit.
    pub fn dropoff_stack(&mut self, stack: Stack) -> Result<(), StackError> {
        if self.free_height() < stack.size() {
            return Err(StackError::Full {
                requested: stack.size(),
                free: self.free_height(),
            });
        }
        self.stack.add_stack_on_top(stack);
        Ok(())
    }

    /// Remove the topmost block.
    pub fn pickup(&mut self) -> Result<Block, StackError> {
        self.stack.remove_from_top()
    }

    /// Remove the top `amount` blocks, order preserved.
    pub fn pickup_n(&mut self, amount: usize) -> Result<Stack, StackError> {
        self.stack.remove_n_from_top(amount)
    }
}

/// A gantry crane travelling along the shared girder.
///
/// Kinematic state (speeds, stop times, distance counters) lives in the
/// simulation's agent, not here; this is the entity an external planner
/// sees in the world snapshot.
#[derive(Clone, Debug)]
pub struct Crane {
    /// Stable identifier.
    pub id: CraneId,
    /// Maximum number of blocks the crane can carry.
    pub capacity: usize,
    /// Physical width along the girder; half of it on each side of the
    /// girder position acts as the safety envelope.
    pub width: f64,
    /// Lowest reachable girder position.
    pub min_position: f64,
    /// Highest reachable girder position.
    pub max_position: f64,
    /// Current position on the girder axis.
    pub girder_position: f64,
    /// Current hoist height above ground, in stack levels.
    pub hoist_level: f64,
    /// The blocks the crane carries, bottom-to-top.
    pub load: Stack,
}

impl Crane {
    /// Construct an unloaded crane at the given position.
    pub fn new(
        id: CraneId,
        capacity: usize,
        width: f64,
        min_position: f64,
        max_position: f64,
        girder_position: f64,
    ) -> Self {
        Self {
            id,
            capacity,
            width,
            min_position,
            max_position,
            girder_position,
            hoist_level: 0.0,
            load: Stack::new(),
        }
    }

    /// True when the girder position lies in the crane's reachable range.
    pub fn can_reach(&self, girder_position: f64) -> bool {
        self.min_position <= girder_position && girder_position <= self.max_position
    }
}
