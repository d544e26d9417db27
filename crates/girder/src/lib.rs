//! Girder: a crane scheduling simulation for block yards.
//!
//! This is the top-level facade crate that re-exports the public API
//! from the Girder sub-crates. For most users, adding `girder` as a
//! single dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use girder::prelude::*;
//!
//! // Two locations on a 100-unit girder, one block waiting at the
//! // first, and a single crane.
//! let mut source = Location::new(LocationId(1), 10.0, 4, LocationKind::Buffer);
//! source.stack = Stack::from_blocks(vec![Block::new(BlockId(1))]);
//! let target = Location::new(LocationId(2), 50.0, 4, LocationKind::Buffer);
//! let crane = Crane::new(CraneId(0), 1, 4.0, 0.0, 100.0, 0.0);
//!
//! let settings = YardSettings {
//!     girder_speed: Sampler::Constant(2.0),
//!     hoist_speed: Sampler::Constant(1.0),
//!     manipulation_time: Sampler::Constant(1.0),
//!     ..YardSettings::default()
//! };
//! let mut yard = Yard::new(settings, vec![source, target], vec![crane]).unwrap();
//!
//! // Tell the crane to carry the block over, then let the yard run.
//! let mv = CraneMove {
//!     id: MoveId(1),
//!     kind: MoveKind::PickupAndDropoff,
//!     pickup_location: LocationId(1),
//!     pickup_position: 0.0,
//!     dropoff_location: LocationId(2),
//!     dropoff_position: 0.0,
//!     amount: 1,
//!     release_time: SimTime::ZERO,
//!     due_date: SimTime::MAX,
//!     required_crane: None,
//!     predecessors: Default::default(),
//!     moved_blocks: vec![BlockId(1)],
//! };
//! yard.add_move(mv).unwrap();
//! yard.assign_move(MoveId(1), CraneId(0), 0).unwrap();
//! yard.run_to_completion();
//!
//! assert_eq!(yard.kpis().finished_moves, 1);
//! assert!(yard.location(LocationId(2)).unwrap().stack.contains(BlockId(1)));
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in
//! the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`model`] | `girder-core` | Ids, time, blocks, locations, cranes, moves, schedule, world snapshot |
//! | [`kernel`] | `girder-kernel` | The discrete-event kernel: events, timeouts, composite waits |
//! | [`sim`] | `girder-sim` | The yard: agents, zone control, schedule store, move generator |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Ids, time, and the block-yard data model (`girder-core`).
///
/// Contains [`model::Stack`], [`model::Location`], [`model::Crane`],
/// [`model::CraneMove`], [`model::CraneSchedule`], and the
/// [`model::World`] snapshot.
pub use girder_core as model;

/// The discrete-event kernel (`girder-kernel`).
///
/// A [`kernel::Kernel`] orders wakeups by `(time, class, sequence)`
/// and supports one-shot events, timeouts, and `any_of` / `all_of`
/// composite waits.
pub use girder_kernel as kernel;

/// The simulated yard (`girder-sim`).
///
/// [`sim::Yard`] owns the kernel, the locations, the crane agents,
/// zone control, the schedule store, and the move generator.
pub use girder_sim as sim;

/// Common imports for typical Girder usage.
///
/// ```rust
/// use girder::prelude::*;
/// ```
pub mod prelude {
    pub use girder_core::{
        Block, BlockId, Crane, CraneId, CraneMove, CraneSchedule, CraneSchedulingSolution, Kpis,
        Location, LocationId, LocationKind, MoveId, MoveKind, MoveRequest, MoveTermination,
        ScheduleError, SimTime, Stack, World, ZoneId,
    };

    pub use girder_sim::{
        AgentState, AgentStatus, Mode, Notification, RejectReason, Rejection, Sampler,
        SettingsError, Yard, YardSettings,
    };
}
