//! The world snapshot and planner solution exchanged with external
//! policies.

use crate::model::{Crane, Location};
use crate::moves::{CraneMove, MoveRequest};
use crate::schedule::CraneSchedule;
use crate::time::SimTime;

/// Aggregate performance counters, updated as the run progresses.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Kpis {
    /// Pickup and dropoff operations performed.
    pub crane_manipulations: u64,
    /// Total girder distance travelled by all cranes.
    pub total_girder_distance: f64,
    /// Total vertical hoist distance travelled by all cranes.
    pub total_hoist_distance: f64,
    /// Moves that completed successfully.
    pub finished_moves: u64,
    /// Moves that failed at execution time.
    pub failed_moves: u64,
    /// Moves that finished after their due date.
    pub tardy_moves: u64,
}

/// A consistent view of the yard at one simulated instant.
///
/// Snapshots are plain data, safe to hand to an external planner while
/// the simulation continues; nothing in a snapshot aliases live state.
#[derive(Clone, Debug)]
pub struct World {
    /// The instant the snapshot was taken.
    pub now: SimTime,
    /// Height limit that applies where no location overrides it.
    pub height: usize,
    /// Length of the girder axis.
    pub width: f64,
    /// All locations, in id order.
    pub locations: Vec<Location>,
    /// All cranes, in id order.
    pub cranes: Vec<Crane>,
    /// Concrete moves known to the yard, scheduled or not.
    pub crane_moves: Vec<CraneMove>,
    /// Open requests not yet turned into concrete moves.
    pub move_requests: Vec<MoveRequest>,
    /// The current crane schedule.
    pub schedule: CraneSchedule,
    /// Performance counters at `now`.
    pub kpis: Kpis,
}

/// A planner's answer: concrete moves plus the schedule that sequences
/// them.
///
/// Every activity in `schedule` must reference a move that is either
/// already known to the yard or listed in `custom_moves`.
#[derive(Clone, Debug, Default)]
pub struct CraneSchedulingSolution {
    /// Planner-authored moves not yet known to the yard.
    pub custom_moves: Vec<CraneMove>,
    /// The full replacement schedule.
    pub schedule: CraneSchedule,
}

impl CraneSchedulingSolution {
    /// A solution that clears the schedule and adds nothing.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CraneId, MoveId};

    #[test]
    fn kpis_start_at_zero() {
        let k = Kpis::default();
        assert_eq!(k.crane_manipulations, 0);
        assert_eq!(k.total_girder_distance, 0.0);
        assert_eq!(k.finished_moves, 0);
    }

    #[test]
    fn empty_solution_has_no_activities() {
        let s = CraneSchedulingSolution::empty();
        assert!(s.custom_moves.is_empty());
        assert!(s.schedule.is_empty());
    }

    #[test]
    fn solution_carries_custom_moves_and_schedule() {
        let mut sol = CraneSchedulingSolution::empty();
        sol.schedule.add(MoveId(3), CraneId(1), 0).unwrap();
        assert!(sol.schedule.contains(MoveId(3)));
    }
}
