//! The crane schedule store: admission of moves to cranes under the
//! conflict-graph discipline.
//!
//! A move is handed to its crane only when no other scheduled activity
//! blocks it. The blocking relation is directed and recomputed after
//! every schedule mutation; with the crane counts this system targets,
//! the O(n²) recomputation is deliberate simplicity, not an oversight.

use girder_core::{
    Activity, ActivityState, CraneId, CraneMove, CraneSchedule, MoveId, MoveKind, ScheduleError,
};
use girder_kernel::{EventId, Kernel};
use indexmap::IndexMap;

use crate::agent::AgentStatus;
use crate::location::LocationQueue;
use crate::wake::Wake;

/// A crane waiting for its next dispatchable move.
#[derive(Clone, Copy, Debug)]
struct GetWaiter {
    crane: CraneId,
    epoch: u64,
}

/// The schedule store. Holds the live [`CraneSchedule`] plus the
/// queues of cranes waiting for work.
pub struct ScheduleStore {
    schedule: CraneSchedule,
    get_queue: Vec<GetWaiter>,
    /// Dispatched assignments parked until the crane picks them up.
    mailbox: IndexMap<CraneId, (MoveId, i32)>,
    when_any: Vec<EventId>,
    when_empty: Vec<EventId>,
    when_change: Vec<EventId>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            schedule: CraneSchedule::new(),
            get_queue: Vec::new(),
            mailbox: IndexMap::new(),
            when_any: Vec::new(),
            when_empty: Vec::new(),
            when_change: Vec::new(),
        }
    }

    /// The current schedule.
    pub fn schedule(&self) -> &CraneSchedule {
        &self.schedule
    }

    /// True when the schedule lists work for the crane.
    pub fn has_moves_waiting(&self, crane: CraneId) -> bool {
        self.schedule.activities().iter().any(|a| a.crane == crane)
    }

    /// True when the move has a schedule entry.
    pub fn is_assigned(&self, move_id: MoveId) -> bool {
        self.schedule.contains(move_id)
    }

    // ── Schedule mutation ────────────────────────────────────────

    /// Append an assignment and retry waiting cranes.
    pub fn assign_move(
        &mut self,
        move_id: MoveId,
        crane: CraneId,
        priority: i32,
        moves: &IndexMap<MoveId, CraneMove>,
        statuses: &[AgentStatus],
        locations: &[LocationQueue],
        kernel: &mut Kernel<Wake>,
    ) -> Result<(), ScheduleError> {
        self.schedule.add(move_id, crane, priority)?;
        self.fire_when_change(kernel);
        self.trigger_get(moves, statuses, locations, kernel);
        self.fire_when_any(kernel);
        Ok(())
    }

    /// Replace the whole schedule, keeping in-flight activities alive:
    /// currently Active entries are re-inserted at the front in their
    /// existing order.
    pub fn notify_schedule_changed(
        &mut self,
        replacement: CraneSchedule,
        moves: &IndexMap<MoveId, CraneMove>,
        statuses: &[AgentStatus],
        locations: &[LocationQueue],
        kernel: &mut Kernel<Wake>,
    ) {
        let mut merged = CraneSchedule::new();
        for a in self.schedule.activities() {
            if a.state == ActivityState::Active {
                let index = merged.len();
                // Duplicates cannot occur: source is a valid schedule.
                let _ = merged.insert(index, a.move_id, a.crane, a.priority, a.state);
            }
        }
        for a in replacement.activities() {
            if !merged.contains(a.move_id) {
                let _ = merged.add(a.move_id, a.crane, a.priority);
            }
        }
        self.schedule = merged;
        self.fire_when_change(kernel);
        self.trigger_get(moves, statuses, locations, kernel);
        self.fire_when_any(kernel);
    }

    /// Drop the schedule entry of a concluded move and clear it from
    /// every other move's predecessor set. The caller re-triggers
    /// dispatch afterwards.
    pub fn remove_finished(
        &mut self,
        move_id: MoveId,
        moves: &mut IndexMap<MoveId, CraneMove>,
        kernel: &mut Kernel<Wake>,
    ) {
        self.schedule.remove(move_id);
        moves.shift_remove(&move_id);
        for mv in moves.values_mut() {
            mv.remove_predecessor(move_id);
        }
        self.fire_when_change(kernel);
        if self.schedule.is_empty() {
            self.fire_when_empty(kernel);
        }
    }

    // ── Crane-facing queue ───────────────────────────────────────

    /// Register a crane's request for its next move and retry
    /// dispatch. When a move is admitted, it is parked in the mailbox
    /// and the crane is woken with the given epoch.
    pub fn get(
        &mut self,
        crane: CraneId,
        epoch: u64,
        moves: &IndexMap<MoveId, CraneMove>,
        statuses: &[AgentStatus],
        locations: &[LocationQueue],
        kernel: &mut Kernel<Wake>,
    ) {
        self.get_queue.push(GetWaiter { crane, epoch });
        self.trigger_get(moves, statuses, locations, kernel);
    }

    /// Abandon a crane's pending request.
    pub fn cancel_get(&mut self, crane: CraneId) {
        self.get_queue.retain(|w| w.crane != crane);
    }

    /// Collect a dispatched assignment.
    pub fn take_assignment(&mut self, crane: CraneId) -> Option<(MoveId, i32)> {
        self.mailbox.shift_remove(&crane)
    }

    // ── Observer events ──────────────────────────────────────────

    /// Fires when the schedule is non-empty (immediately if it is).
    pub fn when_any(&mut self, kernel: &mut Kernel<Wake>) -> EventId {
        let ev = kernel.event();
        self.when_any.push(ev);
        self.fire_when_any(kernel);
        ev
    }

    /// Fires when the schedule drains empty (immediately if it is).
    pub fn when_empty(&mut self, kernel: &mut Kernel<Wake>) -> EventId {
        let ev = kernel.event();
        self.when_empty.push(ev);
        if self.schedule.is_empty() {
            self.fire_when_empty(kernel);
        }
        ev
    }

    /// Fires at the next schedule mutation.
    pub fn when_change(&mut self, kernel: &mut Kernel<Wake>) -> EventId {
        let ev = kernel.event();
        self.when_change.push(ev);
        ev
    }

    fn fire_when_any(&mut self, kernel: &mut Kernel<Wake>) {
        if !self.schedule.is_empty() {
            for ev in self.when_any.drain(..) {
                let _ = kernel.succeed(ev);
            }
        }
    }

    fn fire_when_empty(&mut self, kernel: &mut Kernel<Wake>) {
        for ev in self.when_empty.drain(..) {
            let _ = kernel.succeed(ev);
        }
    }

    fn fire_when_change(&mut self, kernel: &mut Kernel<Wake>) {
        for ev in self.when_change.drain(..) {
            let _ = kernel.succeed(ev);
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────

    /// Sweep stale entries, recompute states, and try to satisfy
    /// waiting cranes in FIFO order. At most one dispatch per trigger;
    /// the dispatched crane's own re-request re-triggers.
    pub fn trigger_get(
        &mut self,
        moves: &IndexMap<MoveId, CraneMove>,
        statuses: &[AgentStatus],
        locations: &[LocationQueue],
        kernel: &mut Kernel<Wake>,
    ) {
        self.sweep_stale(moves, kernel);
        self.update_states(moves, statuses);

        let mut dispatched = None;
        for (i, waiter) in self.get_queue.iter().enumerate() {
            if self.schedule.is_empty() {
                break;
            }
            if let Some((move_id, priority)) = self.find_dispatchable(waiter.crane, moves, locations)
            {
                dispatched = Some((i, *waiter, move_id, priority));
                break;
            }
        }

        if let Some((i, waiter, move_id, priority)) = dispatched {
            self.get_queue.remove(i);
            // State was Activatable; the crane is executing it now.
            let _ = self.schedule.update_state(move_id, ActivityState::Active);
            self.mailbox.insert(waiter.crane, (move_id, priority));
            kernel.schedule(
                0.0,
                Wake::Agent {
                    crane: waiter.crane,
                    epoch: waiter.epoch,
                },
            );
            self.fire_when_change(kernel);
        }
    }

    /// Remove activities whose move no longer exists in the live move
    /// set. A stale id is an unconditional conflict, never a silent
    /// pass.
    fn sweep_stale(&mut self, moves: &IndexMap<MoveId, CraneMove>, kernel: &mut Kernel<Wake>) {
        let stale: Vec<MoveId> = self
            .schedule
            .activities()
            .iter()
            .filter(|a| !moves.contains_key(&a.move_id))
            .map(|a| a.move_id)
            .collect();
        if stale.is_empty() {
            return;
        }
        for id in stale {
            tracing::warn!(move_id = %id, "sweeping schedule entry for unknown move");
            self.schedule.remove(id);
        }
        self.fire_when_change(kernel);
        if self.schedule.is_empty() {
            self.fire_when_empty(kernel);
        }
    }

    fn update_states(&mut self, moves: &IndexMap<MoveId, CraneMove>, statuses: &[AgentStatus]) {
        let executing: Vec<MoveId> = statuses.iter().filter_map(|s| s.current_move).collect();
        let acts: Vec<Activity> = self.schedule.activities().to_vec();
        for (bi, b) in acts.iter().enumerate() {
            if b.state == ActivityState::Active {
                continue;
            }
            let dispatchable = match moves.get(&b.move_id) {
                None => false,
                Some(mv) => {
                    let preds_met = mv.predecessors.iter().all(|p| executing.contains(p));
                    preds_met
                        && !acts
                            .iter()
                            .enumerate()
                            .any(|(ai, a)| ai != bi && blocks(a, ai, b, bi, moves, statuses))
                }
            };
            let state = if dispatchable {
                ActivityState::Activatable
            } else {
                ActivityState::Created
            };
            let _ = self.schedule.update_state(b.move_id, state);
        }
    }

    fn find_dispatchable(
        &self,
        crane: CraneId,
        moves: &IndexMap<MoveId, CraneMove>,
        locations: &[LocationQueue],
    ) -> Option<(MoveId, i32)> {
        for &i in &self.schedule.task_sequence() {
            let act = &self.schedule.activities()[i];
            if act.state != ActivityState::Activatable || act.crane != crane {
                continue;
            }
            let mv = match moves.get(&act.move_id) {
                Some(m) => m,
                None => continue,
            };
            // Declined, not failed: a short or mis-topped source stack
            // is retried after the next manipulation, because another
            // move may still deliver or clear the missing blocks.
            if mv.kind == MoveKind::PickupAndDropoff {
                let source = locations.iter().find(|l| l.location.id == mv.pickup_location);
                let height = source.map(|l| l.location.height()).unwrap_or(0);
                if height < mv.amount {
                    continue;
                }
                if mv.moved_blocks.len() == 1 {
                    let on_top = source
                        .and_then(|l| l.location.topmost())
                        .is_some_and(|b| b.id == mv.moved_blocks[0]);
                    if !on_top {
                        continue;
                    }
                }
            }
            return Some((act.move_id, act.priority));
        }
        None
    }

    /// Search the blocking relation among pending activities for a
    /// cycle, for diagnostics. The dispatch rules themselves cannot
    /// produce equal-priority cycles (older activities win ties), but
    /// predecessor edges supplied from outside can.
    pub fn conflict_cycle(
        &self,
        moves: &IndexMap<MoveId, CraneMove>,
        statuses: &[AgentStatus],
    ) -> Option<Vec<MoveId>> {
        let acts = self.schedule.activities();
        let n = acts.len();
        // 0 = unvisited, 1 = on stack, 2 = done.
        let mut mark = vec![0u8; n];
        let mut trail = Vec::new();

        fn visit(
            v: usize,
            acts: &[Activity],
            moves: &IndexMap<MoveId, CraneMove>,
            statuses: &[AgentStatus],
            mark: &mut [u8],
            trail: &mut Vec<usize>,
        ) -> Option<Vec<MoveId>> {
            mark[v] = 1;
            trail.push(v);
            for u in 0..acts.len() {
                if u == v || !blocks(&acts[u], u, &acts[v], v, moves, statuses) {
                    continue;
                }
                match mark[u] {
                    0 => {
                        if let Some(cycle) = visit(u, acts, moves, statuses, mark, trail) {
                            return Some(cycle);
                        }
                    }
                    1 => {
                        let start = trail.iter().position(|&x| x == u).unwrap_or(0);
                        return Some(trail[start..].iter().map(|&i| acts[i].move_id).collect());
                    }
                    _ => {}
                }
            }
            trail.pop();
            mark[v] = 2;
            None
        }

        for v in 0..n {
            if mark[v] == 0 {
                if let Some(cycle) = visit(v, acts, moves, statuses, &mut mark, &mut trail) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

// ── Blocking relation ────────────────────────────────────────────

/// Directed blocking: does activity `a` prevent dispatching `b`?
///
/// A stale move blocks everything until swept. A strictly smaller
/// priority number blocks while `a` is still pending; once `a` is
/// executing it blocks only through physical span overlap (its
/// envelope already covers the crane's position). A declared
/// predecessor and same-crane insertion order block unconditionally.
/// At equal priority, overlap blocks with the older activity winning
/// (deadlock-breaking tie).
fn blocks(
    a: &Activity,
    a_index: usize,
    b: &Activity,
    b_index: usize,
    moves: &IndexMap<MoveId, CraneMove>,
    statuses: &[AgentStatus],
) -> bool {
    let ma = match moves.get(&a.move_id) {
        Some(m) => m,
        None => return true,
    };
    if a.state != ActivityState::Active && a.priority < b.priority {
        return true;
    }
    if let Some(mb) = moves.get(&b.move_id) {
        if mb.predecessors.contains(&a.move_id) {
            return true;
        }
    }
    if a.crane == b.crane && a_index < b_index {
        return true;
    }
    let overlap = match moves.get(&b.move_id) {
        Some(mb) => spans_overlap(span(a, ma, statuses), span(b, mb, statuses)),
        None => true,
    };
    if a.state == ActivityState::Active && overlap {
        return true;
    }
    a.priority == b.priority && overlap && a_index < b_index
}

/// The girder interval an activity's execution sweeps, widened by the
/// crane's half-width. Active moves additionally cover the crane's
/// current position ("already started" extends the envelope).
fn span(act: &Activity, mv: &CraneMove, statuses: &[AgentStatus]) -> (f64, f64) {
    let mut lo = mv.pickup_position.min(mv.dropoff_position);
    let mut hi = mv.pickup_position.max(mv.dropoff_position);
    let mut half_width = 0.0;
    if let Some(st) = statuses.iter().find(|s| s.crane.id == act.crane) {
        half_width = st.crane.width / 2.0;
        if act.state == ActivityState::Active {
            lo = lo.min(st.crane.girder_position);
            hi = hi.max(st.crane.girder_position);
        }
    }
    (lo - half_width, hi + half_width)
}

fn spans_overlap(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_core::{BlockId, Crane, LocationId, SimTime};
    use indexmap::IndexSet;

    #[test]
    fn spans_overlap_is_inclusive() {
        assert!(spans_overlap((0.0, 10.0), (10.0, 20.0)));
        assert!(spans_overlap((5.0, 6.0), (0.0, 20.0)));
        assert!(!spans_overlap((0.0, 4.9), (5.0, 20.0)));
    }

    fn delivery(id: i32, pickup: f64, dropoff: f64) -> CraneMove {
        CraneMove {
            id: MoveId(id),
            kind: MoveKind::PickupAndDropoff,
            pickup_location: LocationId(id as u32),
            pickup_position: pickup,
            dropoff_location: LocationId(id as u32 + 10),
            dropoff_position: dropoff,
            amount: 1,
            release_time: SimTime::ZERO,
            due_date: SimTime::MAX,
            required_crane: None,
            predecessors: IndexSet::new(),
            moved_blocks: vec![BlockId(id as u32)],
        }
    }

    #[test]
    fn executing_activity_blocks_only_through_overlap() {
        let mut moves: IndexMap<MoveId, CraneMove> = IndexMap::new();
        moves.insert(MoveId(1), delivery(1, 5.0, 20.0));
        moves.insert(MoveId(2), delivery(2, 60.0, 80.0));
        let statuses = vec![
            AgentStatus::new(Crane::new(CraneId(0), 1, 4.0, 0.0, 100.0, 10.0), SimTime::ZERO),
            AgentStatus::new(Crane::new(CraneId(1), 1, 4.0, 0.0, 100.0, 70.0), SimTime::ZERO),
        ];
        let a = Activity {
            move_id: MoveId(1),
            crane: CraneId(0),
            priority: 0,
            state: ActivityState::Active,
        };
        let b = Activity {
            move_id: MoveId(2),
            crane: CraneId(1),
            priority: 1,
            state: ActivityState::Created,
        };
        // Disjoint spans: the executing move releases its priority hold.
        assert!(!blocks(&a, 0, &b, 1, &moves, &statuses));
        // While still pending, the smaller priority number blocks.
        let pending = Activity {
            state: ActivityState::Created,
            ..a
        };
        assert!(blocks(&pending, 0, &b, 1, &moves, &statuses));
        // An executing move with an overlapping span keeps blocking.
        moves.insert(MoveId(2), delivery(2, 15.0, 80.0));
        assert!(blocks(&a, 0, &b, 1, &moves, &statuses));
    }
}
