//! Canned yards, locations, cranes, and moves.

use girder_core::{
    Block, BlockId, Crane, CraneId, CraneMove, Location, LocationId, LocationKind, MoveId,
    MoveKind, MoveRequest, SimTime, Stack,
};
use girder_sim::{Sampler, Yard, YardSettings};
use indexmap::IndexSet;

/// Girder length used by all fixtures.
pub const YARD_WIDTH: f64 = 100.0;

/// Constant-speed settings: every duration is exactly reproducible by
/// hand, which keeps scenario assertions simple.
pub fn fast_settings() -> YardSettings {
    YardSettings {
        width: YARD_WIDTH,
        height: 6,
        reaction_time: 0.2,
        girder_speed: Sampler::Constant(2.0),
        hoist_speed: Sampler::Constant(1.0),
        manipulation_time: Sampler::Constant(1.0),
        seed: 7,
    }
}

/// A buffer location pre-loaded with the given blocks, bottom-to-top.
pub fn buffer(id: u32, position: f64, blocks: &[u32]) -> Location {
    let mut loc = Location::new(LocationId(id), position, 4, LocationKind::Buffer);
    loc.stack = Stack::from_blocks(blocks.iter().map(|b| Block::new(BlockId(*b))).collect());
    loc
}

/// An empty handover location.
pub fn handover(id: u32, position: f64) -> Location {
    Location::new(LocationId(id), position, 4, LocationKind::Handover)
}

/// A single-block crane spanning the whole girder.
pub fn crane(id: u32, position: f64) -> Crane {
    Crane::new(CraneId(id), 1, 4.0, 0.0, YARD_WIDTH, position)
}

/// A crane with the given carrying capacity, spanning the whole girder.
pub fn crane_with_capacity(id: u32, capacity: usize, position: f64) -> Crane {
    Crane::new(CraneId(id), capacity, 4.0, 0.0, YARD_WIDTH, position)
}

/// A yard from the given geometry under [`fast_settings`].
pub fn yard(locations: Vec<Location>, cranes: Vec<Crane>) -> Yard {
    Yard::new(fast_settings(), locations, cranes)
        .unwrap_or_else(|e| panic!("fixture settings must validate: {e}"))
}

/// A single-block delivery move. Positions are left at zero; the yard
/// resolves them from the location table on admission.
pub fn delivery(id: i32, pickup: u32, dropoff: u32, block: u32) -> CraneMove {
    CraneMove {
        id: MoveId(id),
        kind: MoveKind::PickupAndDropoff,
        pickup_location: LocationId(pickup),
        pickup_position: 0.0,
        dropoff_location: LocationId(dropoff),
        dropoff_position: 0.0,
        amount: 1,
        release_time: SimTime::ZERO,
        due_date: SimTime::MAX,
        required_crane: None,
        predecessors: IndexSet::new(),
        moved_blocks: vec![BlockId(block)],
    }
}

/// A multi-block delivery move; `blocks` are listed bottom-to-top.
pub fn bulk_delivery(id: i32, pickup: u32, dropoff: u32, blocks: &[u32]) -> CraneMove {
    let mut mv = delivery(id, pickup, dropoff, 0);
    mv.amount = blocks.len();
    mv.moved_blocks = blocks.iter().map(|b| BlockId(*b)).collect();
    mv
}

/// A positioning move: travel to the location, no manipulation.
pub fn reposition(id: i32, location: u32) -> CraneMove {
    let mut mv = delivery(id, location, location, 0);
    mv.kind = MoveKind::MoveToPickup;
    mv.amount = 0;
    mv.moved_blocks = Vec::new();
    mv
}

/// An open request to bring `block` to `target`.
pub fn request(id: u32, block: u32, target: u32) -> MoveRequest {
    MoveRequest {
        id,
        block: BlockId(block),
        target_location: LocationId(target),
        due_date: SimTime::MAX,
    }
}
