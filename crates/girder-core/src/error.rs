//! Error types for the core data model.

use std::error::Error;
use std::fmt;

use crate::id::MoveId;

/// Errors from stack and location block transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackError {
    /// A dropoff would exceed the container's height limit. The stack
    /// is left unchanged.
    Full {
        /// Blocks the dropoff tried to place.
        requested: usize,
        /// Remaining free height.
        free: usize,
    },
    /// A pickup asked for more blocks than are present. The stack is
    /// left unchanged.
    Insufficient {
        /// Blocks the pickup asked for.
        requested: usize,
        /// Blocks actually present.
        available: usize,
    },
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full { requested, free } => {
                write!(f, "cannot place {requested} block(s), only {free} free")
            }
            Self::Insufficient {
                requested,
                available,
            } => {
                write!(
                    f,
                    "cannot remove {requested} block(s), only {available} present"
                )
            }
        }
    }
}

impl Error for StackError {}

/// Errors from crane schedule mutations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    /// The move already has an activity in the schedule; at most one
    /// activity may exist per move id.
    DuplicateMove(MoveId),
    /// The move id has no activity in the schedule.
    UnknownMove(MoveId),
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateMove(id) => write!(f, "move {id} already scheduled"),
            Self::UnknownMove(id) => write!(f, "move {id} not in schedule"),
        }
    }
}

impl Error for ScheduleError {}
