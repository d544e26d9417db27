//! Admission of externally planned solutions.
//!
//! A host submits a [`CraneSchedulingSolution`]: custom moves plus a
//! full replacement schedule. Validation is per entry: a bad move or
//! activity is rejected with a reason and the rest of the solution
//! still applies. In-flight activities survive a schedule replacement
//! untouched.

use std::fmt;

use girder_core::{
    CraneId, CraneMove, CraneSchedule, CraneSchedulingSolution, LocationId, MoveId,
};
use girder_kernel::Kernel;
use indexmap::IndexMap;

use crate::agent::AgentStatus;
use crate::location::LocationQueue;
use crate::notify::Notification;
use crate::store::ScheduleStore;
use crate::wake::Wake;

/// Why a solution entry was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Custom moves must carry non-negative ids; negative ids belong
    /// to the generator.
    TransientId,
    /// A move with this id already exists.
    DuplicateMove,
    /// The move names a location the yard does not have.
    UnknownLocation(LocationId),
    /// `amount` does not match the number of listed blocks.
    AmountMismatch {
        /// Declared amount.
        amount: usize,
        /// Number of listed blocks.
        blocks: usize,
    },
    /// The required crane does not exist.
    UnknownCrane(CraneId),
    /// The required or assigned crane cannot reach both endpoints.
    Unreachable(CraneId),
    /// A schedule activity references a move the yard does not know.
    UnknownMove,
    /// The activity assigns a different crane than the move requires.
    WrongCrane {
        /// Crane the move requires.
        required: CraneId,
        /// Crane the activity assigns.
        assigned: CraneId,
    },
    /// The move appears twice in the schedule.
    DuplicateActivity,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientId => write!(f, "custom moves must have non-negative ids"),
            Self::DuplicateMove => write!(f, "a move with this id already exists"),
            Self::UnknownLocation(loc) => write!(f, "unknown location {loc}"),
            Self::AmountMismatch { amount, blocks } => {
                write!(f, "amount {amount} does not match {blocks} listed block(s)")
            }
            Self::UnknownCrane(crane) => write!(f, "unknown crane {crane}"),
            Self::Unreachable(crane) => write!(f, "crane {crane} cannot reach both endpoints"),
            Self::UnknownMove => write!(f, "schedule references an unknown move"),
            Self::WrongCrane { required, assigned } => {
                write!(f, "move requires crane {required} but is assigned to {assigned}")
            }
            Self::DuplicateActivity => write!(f, "move is scheduled twice"),
        }
    }
}

/// One refused solution entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    /// The move the entry concerned.
    pub move_id: MoveId,
    /// Why it was refused.
    pub reason: RejectReason,
}

/// Validate and apply a solution. Accepted custom moves join the move
/// set with their girder positions resolved from the location table
/// and their predecessor sets pruned to live moves; the schedule is
/// replaced, keeping active entries in front.
#[allow(clippy::too_many_arguments)]
pub fn apply_solution(
    solution: CraneSchedulingSolution,
    moves: &mut IndexMap<MoveId, CraneMove>,
    locations: &[LocationQueue],
    statuses: &[AgentStatus],
    store: &mut ScheduleStore,
    kernel: &mut Kernel<Wake>,
    outbox: &mut Vec<Notification>,
) -> Vec<Rejection> {
    let mut rejections = Vec::new();

    for mut mv in solution.custom_moves {
        match vet_move(&mv, moves, locations, statuses) {
            Ok((pickup_position, dropoff_position)) => {
                mv.pickup_position = pickup_position;
                mv.dropoff_position = dropoff_position;
                moves.insert(mv.id, mv);
            }
            Err(reason) => {
                tracing::warn!(move_id = %mv.id, %reason, "rejecting custom move");
                rejections.push(Rejection {
                    move_id: mv.id,
                    reason,
                });
            }
        }
    }

    // Predecessors may only reference moves that exist now.
    let live: Vec<MoveId> = moves.keys().copied().collect();
    for mv in moves.values_mut() {
        mv.predecessors.retain(|p| live.contains(p));
    }

    let mut replacement = CraneSchedule::new();
    for act in solution.schedule.activities() {
        let reason = if !moves.contains_key(&act.move_id) {
            Some(RejectReason::UnknownMove)
        } else if !statuses.iter().any(|s| s.crane.id == act.crane) {
            Some(RejectReason::UnknownCrane(act.crane))
        } else if let Some(required) = moves.get(&act.move_id).and_then(|m| m.required_crane) {
            (required != act.crane).then_some(RejectReason::WrongCrane {
                required,
                assigned: act.crane,
            })
        } else {
            None
        };
        let reason = reason.or_else(|| {
            // The assigned crane must be able to execute the move.
            let mv = moves.get(&act.move_id)?;
            let reachable = statuses.iter().any(|s| {
                s.crane.id == act.crane
                    && s.crane.can_reach(mv.pickup_position)
                    && s.crane.can_reach(mv.dropoff_position)
            });
            (!reachable).then_some(RejectReason::Unreachable(act.crane))
        });
        if let Some(reason) = reason {
            tracing::warn!(move_id = %act.move_id, %reason, "rejecting schedule activity");
            rejections.push(Rejection {
                move_id: act.move_id,
                reason,
            });
            continue;
        }
        if replacement.add(act.move_id, act.crane, act.priority).is_err() {
            tracing::warn!(move_id = %act.move_id, "rejecting duplicate schedule activity");
            rejections.push(Rejection {
                move_id: act.move_id,
                reason: RejectReason::DuplicateActivity,
            });
        }
    }

    store.notify_schedule_changed(replacement, moves, statuses, locations, kernel);
    outbox.push(Notification::ScheduleChanged);
    rejections
}

pub(crate) fn vet_move(
    mv: &CraneMove,
    moves: &IndexMap<MoveId, CraneMove>,
    locations: &[LocationQueue],
    statuses: &[AgentStatus],
) -> Result<(f64, f64), RejectReason> {
    if mv.id.is_transient() {
        return Err(RejectReason::TransientId);
    }
    if moves.contains_key(&mv.id) {
        return Err(RejectReason::DuplicateMove);
    }
    let position = |id: LocationId| {
        locations
            .iter()
            .find(|l| l.location.id == id)
            .map(|l| l.location.girder_position)
            .ok_or(RejectReason::UnknownLocation(id))
    };
    let pickup_position = position(mv.pickup_location)?;
    let dropoff_position = position(mv.dropoff_location)?;
    if mv.amount != mv.moved_blocks.len() {
        return Err(RejectReason::AmountMismatch {
            amount: mv.amount,
            blocks: mv.moved_blocks.len(),
        });
    }
    if let Some(crane) = mv.required_crane {
        let Some(status) = statuses.iter().find(|s| s.crane.id == crane) else {
            return Err(RejectReason::UnknownCrane(crane));
        };
        if !status.crane.can_reach(pickup_position) || !status.crane.can_reach(dropoff_position) {
            return Err(RejectReason::Unreachable(crane));
        }
    }
    Ok((pickup_position, dropoff_position))
}
