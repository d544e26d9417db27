//! The Girder crane-yard simulation.
//!
//! A [`Yard`] owns the whole simulated world: the event kernel, the
//! locations with their pickup/dropoff queues, the crane agents, zone
//! control, the schedule store, and the move generator. Hosts drive it
//! through [`Yard::step`] / [`Yard::run_until`] and exchange data
//! through world snapshots, [`CraneSchedulingSolution`] submissions,
//! and the [`Notification`] outbox.
//!
//! Everything is single-threaded and deterministic: all randomness
//! flows from the seed in [`YardSettings`], and events at the same
//! simulated instant fire in insertion order.
//!
//! [`CraneSchedulingSolution`]: girder_core::CraneSchedulingSolution

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod generator;
pub mod location;
pub mod notify;
pub mod sampler;
pub mod solution;
pub mod store;
pub mod wake;
pub mod yard;
pub mod zone;

pub use agent::{AgentState, AgentStatus, Direction, Mode};
pub use config::{SettingsError, YardSettings};
pub use generator::MoveGenerator;
pub use location::LocationQueue;
pub use notify::Notification;
pub use sampler::Sampler;
pub use solution::{RejectReason, Rejection};
pub use store::ScheduleStore;
pub use wake::Wake;
pub use yard::Yard;
pub use zone::ZoneControl;
