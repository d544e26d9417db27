//! The crane schedule: ordered (move, crane, priority) assignments.

use crate::error::ScheduleError;
use crate::id::{CraneId, MoveId};

/// Derived dispatch state of a scheduled activity.
///
/// Never set freely: `Active` iff a crane is currently executing the
/// move; `Activatable` iff the activity holds the minimum pending
/// priority, has no unmet predecessor, and is conflict-free; otherwise
/// `Created`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActivityState {
    /// Scheduled but not yet dispatchable.
    #[default]
    Created,
    /// Dispatchable right now.
    Activatable,
    /// A crane is executing the move.
    Active,
}

/// One schedule entry: a move assigned to a crane at a priority.
#[derive(Clone, Copy, Debug)]
pub struct Activity {
    /// The move to perform.
    pub move_id: MoveId,
    /// The crane that is to perform it.
    pub crane: CraneId,
    /// Dispatch priority; smaller values dispatch first. Ties are
    /// broken by insertion order.
    pub priority: i32,
    /// Derived dispatch state.
    pub state: ActivityState,
}

/// An ordered list of [`Activity`] entries with at most one entry per
/// move id.
#[derive(Clone, Debug, Default)]
pub struct CraneSchedule {
    activities: Vec<Activity>,
}

impl CraneSchedule {
    /// An empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled activities.
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// True when no activity is scheduled.
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Activities in insertion order.
    pub fn activities(&self) -> &[Activity] {
        &self.activities
    }

    /// True when the move has an activity here.
    pub fn contains(&self, move_id: MoveId) -> bool {
        self.activities.iter().any(|a| a.move_id == move_id)
    }

    /// Look up the activity for a move.
    pub fn get(&self, move_id: MoveId) -> Option<&Activity> {
        self.activities.iter().find(|a| a.move_id == move_id)
    }

    /// Append an activity. Fails when the move is already scheduled.
    pub fn add(
        &mut self,
        move_id: MoveId,
        crane: CraneId,
        priority: i32,
    ) -> Result<usize, ScheduleError> {
        if self.contains(move_id) {
            return Err(ScheduleError::DuplicateMove(move_id));
        }
        self.activities.push(Activity {
            move_id,
            crane,
            priority,
            state: ActivityState::Created,
        });
        Ok(self.activities.len() - 1)
    }

    /// Insert an activity at `index` in the insertion order. Fails when
    /// the move is already scheduled.
    pub fn insert(
        &mut self,
        index: usize,
        move_id: MoveId,
        crane: CraneId,
        priority: i32,
        state: ActivityState,
    ) -> Result<(), ScheduleError> {
        if self.contains(move_id) {
            return Err(ScheduleError::DuplicateMove(move_id));
        }
        let index = index.min(self.activities.len());
        self.activities.insert(
            index,
            Activity {
                move_id,
                crane,
                priority,
                state,
            },
        );
        Ok(())
    }

    /// Remove the activity for a move; no-op when absent.
    pub fn remove(&mut self, move_id: MoveId) {
        self.activities.retain(|a| a.move_id != move_id);
    }

    /// Remove all activities.
    pub fn clear(&mut self) {
        self.activities.clear();
    }

    /// Set the derived state of a move's activity.
    pub fn update_state(&mut self, move_id: MoveId, state: ActivityState) -> Result<(), ScheduleError> {
        let a = self
            .activities
            .iter_mut()
            .find(|a| a.move_id == move_id)
            .ok_or(ScheduleError::UnknownMove(move_id))?;
        a.state = state;
        Ok(())
    }

    /// Indices into [`activities`](Self::activities) ordered by
    /// dispatch priority, ties broken by insertion index.
    pub fn task_sequence(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.activities.len()).collect();
        order.sort_by_key(|&i| self.activities[i].priority);
        order
    }
}
