//! Core types for the Girder crane-yard simulation.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental abstractions shared across the Girder workspace:
//! strongly-typed ids, simulated time, the block/stack/location/crane
//! data model, crane moves, the crane schedule, and the world snapshot
//! exchanged with external planning policies.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod model;
pub mod moves;
pub mod schedule;
pub mod stack;
pub mod time;
pub mod world;

pub use error::{ScheduleError, StackError};
pub use id::{BlockId, CraneId, LocationId, MoveId, TicketId, ZoneId};
pub use model::{Crane, Location, LocationKind};
pub use moves::{CraneMove, MoveKind, MoveRequest, MoveTermination};
pub use schedule::{Activity, ActivityState, CraneSchedule};
pub use stack::{Block, Stack};
pub use time::SimTime;
pub use world::{CraneSchedulingSolution, Kpis, World};
