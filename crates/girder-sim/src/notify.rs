//! The notification outbox: raw completion and change signals for an
//! external metrics collector or host.

use girder_core::{CraneId, LocationId, MoveId, MoveTermination, SimTime, ZoneId};

/// One outbox entry. The yard only emits raw values; aggregation is the
/// host's business.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// A move concluded, exactly once per move.
    MoveFinished {
        /// The move that concluded.
        move_id: MoveId,
        /// The crane that executed it.
        crane: CraneId,
        /// When the crane received the assignment.
        started: SimTime,
        /// The crane's cumulative girder distance at completion.
        girder_distance: f64,
        /// The crane's cumulative hoist distance at completion.
        hoist_distance: f64,
        /// How the move ended.
        termination: MoveTermination,
    },
    /// A zone request was granted.
    ZoneGranted {
        /// The granted request.
        zone: ZoneId,
        /// Lower bound of the interval.
        lower: f64,
        /// Upper bound of the interval.
        upper: f64,
    },
    /// An active zone was released.
    ZoneReleased {
        /// The released request.
        zone: ZoneId,
    },
    /// The crane schedule was mutated.
    ScheduleChanged,
    /// A location's stack changed (completed pickup or dropoff).
    LocationChanged {
        /// The location that changed.
        location: LocationId,
    },
    /// An observer event armed via a [`Wake::Observer`] token fired.
    ///
    /// [`Wake::Observer`]: crate::Wake::Observer
    Observer(u64),
}
