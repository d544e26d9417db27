//! Crane agents: kinematics, command surface, and the execution state
//! machine.
//!
//! Each crane is split in two. [`AgentStatus`] is the peer-visible part
//! that other cranes, the zone controller, and the schedule store read
//! when deciding around this crane. [`AgentDriver`] is the private
//! state machine that advances the crane on every wakeup.
//!
//! Positions are integrated lazily: a travelling crane stores its speed
//! and the instant it will stop, and `update_position` folds elapsed
//! time into the position on demand. Between wakeups nothing moves.

use girder_core::{Crane, MoveId, MoveKind, MoveTermination, SimTime, TicketId};
use girder_kernel::Kernel;

use crate::notify::Notification;
use crate::wake::Wake;
use crate::yard::{height_between, YardCtx};
use crate::zone;

/// Position match tolerance for ending a travel leg.
const ARRIVAL_EPS: f64 = 0.01;
/// Tolerance below which an evasion target counts as "already there".
const EVADE_EPS: f64 = 1e-5;
/// Margin added past an evasion point so the comparison stays strict.
const EVADE_MARGIN: f64 = 1e-7;

/// What a crane is currently told to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Parked by an explicit cancel; will not take work until resumed.
    Idle,
    /// Clearing out of another crane's way.
    Dodge,
    /// Pulling moves from the schedule store.
    Work,
}

/// What a crane is physically doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    /// Standing still, available for dodge commands.
    Waiting,
    /// Travelling along the girder.
    Moving,
    /// Manipulating blocks at a pickup location.
    Picking,
    /// Manipulating blocks at a dropoff location.
    Dropping,
}

/// Travel direction along the girder as of the last kinematic update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Not travelling.
    Standing,
    /// Towards smaller girder positions.
    ToLower,
    /// Towards larger girder positions.
    ToUpper,
}

/// A scheduled kinematic stop: at `at`, the axis is exactly at
/// `position` and the speed drops to zero.
#[derive(Clone, Copy, Debug)]
struct Stop {
    at: SimTime,
    position: f64,
}

/// The peer-visible state of one crane.
pub struct AgentStatus {
    /// The crane entity: position, hoist level, load, reach.
    pub crane: Crane,
    /// Current mode.
    pub mode: Mode,
    /// Current physical state.
    pub state: AgentState,
    /// Evasion precedence. `None` outside of conflicts; a crane with no
    /// priority never outranks one that has one.
    pub priority: Option<f64>,
    /// Where the current travel leg ends.
    pub target_position: f64,
    /// Position of the current errand (pickup, or dodge point).
    pub goal1: f64,
    /// Final position of the current errand (dropoff).
    pub goal2: f64,
    /// The move this crane is executing, if any.
    pub current_move: Option<MoveId>,
    pub(crate) pending_mode: Mode,
    pub(crate) pending_priority: Option<f64>,
    pub(crate) dodge_position: f64,
    pub(crate) interruptible: bool,
    pub(crate) fault: bool,
    pub(crate) epoch: u64,
    girder_speed: f64,
    hoist_speed: f64,
    girder_stop: Option<Stop>,
    hoist_stop: Option<Stop>,
    last_update: SimTime,
    girder_distance: f64,
    hoist_distance: f64,
}

impl AgentStatus {
    /// A freshly booted agent in work mode, standing where its crane is.
    pub fn new(crane: Crane, now: SimTime) -> Self {
        let pos = crane.girder_position;
        Self {
            crane,
            mode: Mode::Work,
            state: AgentState::Waiting,
            priority: None,
            target_position: pos,
            goal1: pos,
            goal2: pos,
            current_move: None,
            pending_mode: Mode::Work,
            pending_priority: None,
            dodge_position: pos,
            interruptible: true,
            fault: false,
            epoch: 0,
            girder_speed: 0.0,
            hoist_speed: 0.0,
            girder_stop: None,
            hoist_stop: None,
            last_update: now,
            girder_distance: 0.0,
            hoist_distance: 0.0,
        }
    }

    /// Half the crane's physical width, the safety envelope on each
    /// side of the girder position.
    pub fn half_width(&self) -> f64 {
        self.crane.width / 2.0
    }

    /// Cumulative girder travel distance as of the last update.
    pub fn girder_distance(&self) -> f64 {
        self.girder_distance
    }

    /// Cumulative hoist travel distance as of the last update.
    pub fn hoist_distance(&self) -> f64 {
        self.hoist_distance
    }

    /// Travel direction as of the last update.
    pub fn direction(&self) -> Direction {
        if self.girder_speed == 0.0 {
            Direction::Standing
        } else if self.girder_speed < 0.0 {
            Direction::ToLower
        } else {
            Direction::ToUpper
        }
    }

    // ── Kinematics ───────────────────────────────────────────────

    /// Fold elapsed time into position and hoist level. Stops that
    /// lie at or before `now` snap the axis exactly onto the stored
    /// stop position, so no drift accumulates across legs.
    pub fn update_position(&mut self, now: SimTime) {
        if now <= self.last_update {
            return;
        }
        if self.girder_speed != 0.0 {
            let end = match self.girder_stop {
                Some(stop) => now.min(stop.at),
                None => now,
            };
            let dt = end - self.last_update;
            if dt > 0.0 {
                let delta = self.girder_speed * dt;
                self.crane.girder_position += delta;
                self.girder_distance += delta.abs();
            }
        }
        if let Some(stop) = self.girder_stop {
            if now >= stop.at {
                self.crane.girder_position = stop.position;
                self.girder_speed = 0.0;
                self.girder_stop = None;
            }
        }
        if self.hoist_speed != 0.0 {
            let end = match self.hoist_stop {
                Some(stop) => now.min(stop.at),
                None => now,
            };
            let dt = end - self.last_update;
            if dt > 0.0 {
                let delta = self.hoist_speed * dt;
                self.crane.hoist_level += delta;
                self.hoist_distance += delta.abs();
            }
        }
        if let Some(stop) = self.hoist_stop {
            if now >= stop.at {
                self.crane.hoist_level = stop.position;
                self.hoist_speed = 0.0;
                self.hoist_stop = None;
            }
        }
        self.last_update = now;
    }

    /// Begin gliding towards `target` at `speed`. Returns the leg
    /// duration.
    pub(crate) fn start_glide(&mut self, now: SimTime, target: f64, speed: f64) -> f64 {
        self.update_position(now);
        let distance = (target - self.crane.girder_position).abs();
        let duration = if speed > 0.0 { distance / speed } else { 0.0 };
        self.girder_speed = if target < self.crane.girder_position {
            -speed
        } else {
            speed
        };
        self.girder_stop = Some(Stop {
            at: now + duration,
            position: target,
        });
        self.target_position = target;
        duration
    }

    /// Begin hoisting towards `level`. Returns the duration.
    pub(crate) fn start_hoist(&mut self, now: SimTime, level: f64, speed: f64) -> f64 {
        self.update_position(now);
        let distance = (level - self.crane.hoist_level).abs();
        let duration = if speed > 0.0 { distance / speed } else { 0.0 };
        self.hoist_speed = if level < self.crane.hoist_level {
            -speed
        } else {
            speed
        };
        self.hoist_stop = Some(Stop {
            at: now + duration,
            position: level,
        });
        duration
    }

    pub(crate) fn stop_girder(&mut self, now: SimTime) {
        self.update_position(now);
        self.girder_speed = 0.0;
        self.girder_stop = None;
        self.target_position = self.crane.girder_position;
    }

    pub(crate) fn stop_hoist(&mut self, now: SimTime) {
        self.update_position(now);
        self.hoist_speed = 0.0;
        self.hoist_stop = None;
    }

    // ── Command surface ──────────────────────────────────────────

    /// Park the crane. Interrupts even a travel in progress; a crane
    /// busy manipulating finishes its move first and then idles.
    pub fn cancel(&mut self, kernel: &mut Kernel<Wake>) {
        if self.pending_mode == Mode::Idle {
            return;
        }
        self.pending_mode = Mode::Idle;
        self.pending_priority = None;
        if self.interruptible {
            self.interrupt(kernel);
        } else {
            tracing::debug!(crane = %self.crane.id, "cancel deferred, crane not interruptible");
        }
    }

    /// Put a parked crane back to work. Takes effect immediately when
    /// idling, otherwise at the next decision point.
    pub fn resume(&mut self, kernel: &mut Kernel<Wake>) {
        if self.pending_mode == Mode::Work {
            return;
        }
        self.pending_mode = Mode::Work;
        self.pending_priority = None;
        if self.mode == Mode::Idle && self.interruptible {
            self.interrupt(kernel);
        } else {
            tracing::debug!(crane = %self.crane.id, "resume deferred, crane not idle");
        }
    }

    /// Order the crane out of the way, to `position`. The dodger gets
    /// a priority strictly between the requester's and the next whole
    /// number, so a chain of dodges ranks each dodger above the crane
    /// it dodges for (0 -> 0.5 -> 0.75 -> ...).
    pub fn dodge(&mut self, kernel: &mut Kernel<Wake>, position: f64, others_priority: Option<f64>) {
        if self.pending_mode == Mode::Dodge {
            return;
        }
        self.pending_mode = Mode::Dodge;
        self.pending_priority = others_priority.map(|p| (p + (p + EVADE_MARGIN).ceil()) / 2.0);
        self.dodge_position = position;
        if self.state == AgentState::Waiting && self.interruptible {
            self.interrupt(kernel);
        } else {
            tracing::debug!(crane = %self.crane.id, "dodge deferred, crane not waiting");
        }
    }

    /// Invalidate all outstanding wakeups and force an immediate
    /// re-decision.
    fn interrupt(&mut self, kernel: &mut Kernel<Wake>) {
        self.fault = true;
        self.epoch += 1;
        kernel.schedule_urgent(
            0.0,
            Wake::Agent {
                crane: self.crane.id,
                epoch: self.epoch,
            },
        );
    }
}

// ── Driver ───────────────────────────────────────────────────────

/// Where the agent's state machine stands between wakeups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Pick the next activity from the pending mode.
    Decide,
    /// Parked until resumed or told to dodge.
    IdleWait,
    /// Waiting for the schedule store to hand out a move.
    AwaitAssignment,
    /// Move received but its release time is in the future.
    AwaitRelease,
    /// Travelling; the goal says what happens on arrival.
    Travel(TravelGoal),
    /// Manipulating blocks at a location.
    Manip { site: ManipSite, stage: ManipStage },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TravelGoal {
    Dodge,
    Pickup,
    Dropoff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ManipSite {
    Pickup,
    Dropoff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ManipStage {
    /// Hoist down to the top of the stack.
    HoistToStack,
    /// Manipulation delay before releasing the carried load.
    DropTimer,
    /// Waiting for the location to accept the dropped load.
    DropTicket,
    /// Hoist down to grab height (stack top minus pickup amount).
    HoistToGrab,
    /// Waiting for the pickup and the manipulation delay, in parallel.
    Grab,
    /// Hoist back up to cruise level.
    HoistUp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TravelState {
    /// Evaluate arrival, collisions, and zones; start the next leg.
    Deciding,
    /// Raising the hoist above the stacks on the path.
    Hoisting,
    /// Gliding towards the leg target.
    Gliding,
}

/// One travel activation. Evasive manoeuvres push a nested frame with
/// a temporarily raised priority; popping it restores the outer goals.
#[derive(Clone, Copy, Debug)]
struct TravelFrame {
    target: f64,
    goal2: f64,
    speed: f64,
    leg_target: f64,
    state: TravelState,
    restore_priority: bool,
    old_priority: Option<f64>,
}

/// Private per-crane execution state.
pub(crate) struct AgentDriver {
    pub(crate) phase: Phase,
    frames: Vec<TravelFrame>,
    move_started: SimTime,
    site_loc: usize,
    ticket: Option<(usize, TicketId)>,
    pending_waits: u8,
}

impl Default for AgentDriver {
    fn default() -> Self {
        Self {
            phase: Phase::Decide,
            frames: Vec::new(),
            move_started: SimTime::ZERO,
            site_loc: 0,
            ticket: None,
            pending_waits: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    /// A wakeup is scheduled; leave the state machine.
    Wait,
    /// Keep advancing within this wakeup.
    Continue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LegOutcome {
    Wait,
    /// A frame was pushed or popped; re-run the decision loop.
    Loop,
}

/// Advance one crane's state machine for a single wakeup. Every path
/// either schedules the next wakeup or parks the crane in a phase that
/// only external commands leave.
pub(crate) fn drive(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) {
    let now = ctx.kernel.now();
    for status in ctx.statuses.iter_mut() {
        status.update_position(now);
    }
    if ctx.statuses[idx].fault {
        ctx.statuses[idx].fault = false;
        unwind(ctx, idx, driver);
    }
    loop {
        let flow = match driver.phase {
            Phase::Decide => decide(ctx, idx, driver),
            Phase::IdleWait => Flow::Wait,
            Phase::AwaitAssignment => on_assignment(ctx, idx, driver),
            Phase::AwaitRelease => {
                start_move_travel(ctx, idx, driver);
                Flow::Continue
            }
            Phase::Travel(goal) => match resume_travel(ctx, idx, driver) {
                Flow::Wait => Flow::Wait,
                Flow::Continue => on_arrival(ctx, idx, driver, goal),
            },
            Phase::Manip { site, stage } => on_manip_wake(ctx, idx, driver, site, stage),
        };
        if flow == Flow::Wait {
            return;
        }
    }
}

/// Abort whatever the crane was doing after an interrupt.
fn unwind(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) {
    let now = ctx.kernel.now();
    match driver.phase {
        Phase::Decide | Phase::IdleWait => {
            driver.phase = Phase::Decide;
        }
        Phase::AwaitAssignment => {
            let crane = ctx.statuses[idx].crane.id;
            // A dispatch may already sit in the mailbox; taking the
            // assignment and concluding it keeps the schedule clean.
            if let Some((move_id, _)) = ctx.store.take_assignment(crane) {
                ctx.statuses[idx].current_move = Some(move_id);
                finish_move(ctx, idx, driver, MoveTermination::Interrupted);
            } else {
                ctx.store.cancel_get(crane);
            }
            driver.phase = Phase::Decide;
        }
        Phase::AwaitRelease => {
            finish_move(ctx, idx, driver, MoveTermination::Interrupted);
            driver.phase = Phase::Decide;
        }
        Phase::Travel(goal) => {
            ctx.statuses[idx].stop_girder(now);
            ctx.statuses[idx].stop_hoist(now);
            driver.frames.clear();
            if goal != TravelGoal::Dodge {
                finish_move(ctx, idx, driver, MoveTermination::Interrupted);
            }
            driver.phase = Phase::Decide;
        }
        Phase::Manip { .. } => {
            // Commands never interrupt a manipulation; they only flip
            // the pending mode, which Decide picks up afterwards.
            tracing::warn!(
                crane = %ctx.statuses[idx].crane.id,
                "interrupt during manipulation ignored"
            );
        }
    }
}

/// Enter the pending mode and start its activity.
fn decide(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) -> Flow {
    let status = &mut ctx.statuses[idx];
    status.priority = status.pending_priority;
    status.mode = status.pending_mode;
    match status.mode {
        Mode::Idle => {
            status.state = AgentState::Waiting;
            status.interruptible = true;
            driver.phase = Phase::IdleWait;
            Flow::Wait
        }
        Mode::Dodge => {
            status.state = AgentState::Moving;
            status.interruptible = true;
            let dodge = status.dodge_position;
            push_travel(ctx, idx, driver, dodge, dodge, false);
            driver.phase = Phase::Travel(TravelGoal::Dodge);
            Flow::Continue
        }
        Mode::Work => {
            status.state = AgentState::Waiting;
            status.priority = None;
            status.interruptible = true;
            let crane = status.crane.id;
            let epoch = status.epoch;
            driver.phase = Phase::AwaitAssignment;
            ctx.store.get(
                crane,
                epoch,
                ctx.moves,
                ctx.statuses,
                ctx.locations,
                ctx.kernel,
            );
            Flow::Wait
        }
    }
}

/// A dispatch arrived from the schedule store; vet it and start.
fn on_assignment(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) -> Flow {
    let crane = ctx.statuses[idx].crane.id;
    let Some((move_id, priority)) = ctx.store.take_assignment(crane) else {
        // Spurious wakeup; the store will wake us again.
        return Flow::Wait;
    };
    ctx.statuses[idx].current_move = Some(move_id);
    driver.move_started = ctx.kernel.now();

    if ctx.statuses[idx].pending_mode != Mode::Work {
        finish_move(ctx, idx, driver, MoveTermination::Interrupted);
        driver.phase = Phase::Decide;
        return Flow::Continue;
    }

    let (amount, kind, release_time) = match ctx.moves.get(&move_id) {
        Some(mv) => (mv.amount, mv.kind, mv.release_time),
        None => {
            tracing::warn!(crane = %crane, move_id = %move_id, "assigned move vanished");
            finish_move(ctx, idx, driver, MoveTermination::Failed);
            driver.phase = Phase::Decide;
            return Flow::Continue;
        }
    };
    if kind == MoveKind::PickupAndDropoff && amount > ctx.statuses[idx].crane.capacity {
        tracing::warn!(
            crane = %crane, move_id = %move_id, amount,
            capacity = ctx.statuses[idx].crane.capacity,
            "move exceeds crane capacity"
        );
        finish_move(ctx, idx, driver, MoveTermination::Failed);
        driver.phase = Phase::Decide;
        return Flow::Continue;
    }
    if kind == MoveKind::PickupAndDropoff && amount == 0 && ctx.statuses[idx].crane.load.is_empty()
    {
        tracing::warn!(
            crane = %crane, move_id = %move_id,
            "dropoff-only move but the crane carries nothing"
        );
        finish_move(ctx, idx, driver, MoveTermination::Failed);
        driver.phase = Phase::Decide;
        return Flow::Continue;
    }

    tracing::debug!(crane = %crane, move_id = %move_id, "move assigned");
    ctx.statuses[idx].priority = Some(priority as f64);

    let now = ctx.kernel.now();
    if release_time > now {
        driver.phase = Phase::AwaitRelease;
        wake_in(ctx, idx, release_time - now);
        return Flow::Wait;
    }
    start_move_travel(ctx, idx, driver);
    Flow::Continue
}

/// Begin travelling towards the assigned move's pickup position.
fn start_move_travel(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) {
    let Some(move_id) = ctx.statuses[idx].current_move else {
        driver.phase = Phase::Decide;
        return;
    };
    let Some(mv) = ctx.moves.get(&move_id) else {
        driver.phase = Phase::Decide;
        return;
    };
    let pickup = mv.pickup_position;
    let goal2 = if mv.kind == MoveKind::PickupAndDropoff && mv.amount > 0 {
        mv.dropoff_position
    } else {
        pickup
    };
    ctx.statuses[idx].state = AgentState::Moving;
    push_travel(ctx, idx, driver, pickup, goal2, false);
    driver.phase = Phase::Travel(TravelGoal::Pickup);
}

/// Push a travel activation and expose its goals to peers.
fn push_travel(
    ctx: &mut YardCtx<'_>,
    idx: usize,
    driver: &mut AgentDriver,
    target: f64,
    goal2: f64,
    restore_priority: bool,
) {
    let now = ctx.kernel.now();
    let status = &mut ctx.statuses[idx];
    status.update_position(now);
    let old_priority = status.priority;
    status.goal1 = target;
    status.goal2 = goal2;
    // Speed is drawn once per travel activation, not per leg.
    let speed = ctx.settings.girder_speed.sample(ctx.rng);
    driver.frames.push(TravelFrame {
        target,
        goal2,
        speed,
        leg_target: target,
        state: TravelState::Deciding,
        restore_priority,
        old_priority,
    });
}

/// Advance the travel frame stack. Returns `Continue` once every frame
/// has arrived at its target.
fn resume_travel(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) -> Flow {
    loop {
        let Some(frame) = driver.frames.last() else {
            return Flow::Continue;
        };
        match frame.state {
            TravelState::Hoisting => {
                // The hoist snapped to its level in update_position.
                start_glide_leg(ctx, idx, driver);
                return Flow::Wait;
            }
            TravelState::Gliding => {
                // Leg done; active zones may have become free.
                zone::trigger(ctx.zones, ctx.statuses, ctx.kernel, ctx.outbox);
                if let Some(frame) = driver.frames.last_mut() {
                    frame.state = TravelState::Deciding;
                }
            }
            TravelState::Deciding => match decide_leg(ctx, idx, driver) {
                LegOutcome::Wait => return Flow::Wait,
                LegOutcome::Loop => {}
            },
        }
    }
}

/// One collision-avoidance decision step. Either starts a leg (or a
/// reaction-time wait) and returns `Wait`, or pushes/pops a frame and
/// asks the caller to loop.
fn decide_leg(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) -> LegOutcome {
    let now = ctx.kernel.now();
    let Some(frame) = driver.frames.last().copied() else {
        return LegOutcome::Loop;
    };

    let pos = ctx.statuses[idx].crane.girder_position;
    if (frame.target - pos).abs() <= ARRIVAL_EPS {
        pop_frame(ctx, idx, driver, now);
        return LegOutcome::Loop;
    }

    let collider = potential_collider(ctx.statuses, idx);
    ctx.statuses[idx].target_position = pos;

    let Some(c) = collider else {
        // Case 1: path is clear up to zone boundaries.
        let tgt = ctx.zones.closest_to_target(&ctx.statuses[idx], frame.target);
        begin_leg(ctx, idx, driver, tgt);
        return LegOutcome::Wait;
    };

    let (c_state, c_mode, c_pos, c_hw, c_prio, c_goal1, c_goal2, c_target) = {
        let o = &ctx.statuses[c];
        (
            o.state,
            o.mode,
            o.crane.girder_position,
            o.half_width(),
            o.priority,
            o.goal1,
            o.goal2,
            o.target_position,
        )
    };
    let hw = ctx.statuses[idx].half_width();
    let my_prio = ctx.statuses[idx].priority;
    let target = frame.target;
    let goal2 = ctx.statuses[idx].goal2;

    if c_state == AgentState::Waiting {
        // Case 2a: the collider stands still. Tell it to dodge past
        // our whole errand, then advance up to its flank.
        if c_mode == Mode::Idle {
            // A cancelled crane may not be moved; poll until the host
            // resumes it or our move is withdrawn.
            wait_reaction(ctx, idx);
            return LegOutcome::Wait;
        }
        let dodge_point = if target < pos {
            target.min(goal2) - hw - c_hw
        } else {
            target.max(goal2) + hw + c_hw
        };
        ctx.statuses[c].dodge(ctx.kernel, dodge_point, my_prio);
        let flank = if target < pos {
            c_pos + c_hw + hw
        } else {
            c_pos - c_hw - hw
        };
        let mut tgt = ctx.zones.closest_to_target(&ctx.statuses[idx], flank);
        if (pos < target && tgt > target) || (pos > target && tgt < target) {
            tgt = target;
        }
        begin_leg(ctx, idx, driver, tgt);
        return LegOutcome::Wait;
    }

    // Case 2b: the collider is moving or servicing.
    let collision_point = if target < pos {
        c_pos.max(c_target) + c_hw + hw
    } else {
        c_pos.min(c_target) - c_hw - hw
    };
    let dodge_point = if target < pos {
        c_pos.max(c_goal1).max(c_goal2).max(c_target) + c_hw + hw
    } else {
        c_pos.min(c_goal1).min(c_goal2).min(c_target) - c_hw - hw
    };

    if prio_gt(my_prio, c_prio) {
        // We outrank the collider: clear out of its whole errand with
        // a nested travel at a raised priority, so that we in turn can
        // push further cranes aside.
        let tgt = if pos < c_pos {
            dodge_point.min(target) - EVADE_MARGIN
        } else {
            dodge_point.max(target) + EVADE_MARGIN
        };
        if (tgt - pos).abs() > EVADE_EPS && (tgt - pos).abs() > ARRIVAL_EPS {
            let cp = c_prio.unwrap_or(0.0);
            ctx.statuses[idx].priority = Some((cp + (cp + 1.0).floor()) / 2.0);
            push_travel(ctx, idx, driver, tgt, tgt, true);
            LegOutcome::Loop
        } else {
            wait_reaction(ctx, idx);
            LegOutcome::Wait
        }
    } else {
        // The collider outranks us: advance only to the point where a
        // collision would occur and re-evaluate from there.
        let stop_short = if pos < c_pos {
            target.min(collision_point)
        } else {
            target.max(collision_point)
        };
        let tgt = ctx.zones.closest_to_target(&ctx.statuses[idx], stop_short);
        begin_leg(ctx, idx, driver, tgt);
        LegOutcome::Wait
    }
}

/// Finish a travel frame: stop, restore priority and outer goals.
fn pop_frame(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver, now: SimTime) {
    ctx.statuses[idx].stop_girder(now);
    if let Some(frame) = driver.frames.pop() {
        if frame.restore_priority {
            ctx.statuses[idx].priority = frame.old_priority;
        }
    }
    if let Some(outer) = driver.frames.last() {
        ctx.statuses[idx].goal1 = outer.target;
        ctx.statuses[idx].goal2 = outer.goal2;
    }
}

/// Start one leg towards `tgt`: raise the hoist above the stacks on
/// the way first, then glide.
fn begin_leg(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver, tgt: f64) {
    let now = ctx.kernel.now();
    let Some(frame) = driver.frames.last_mut() else {
        return;
    };
    frame.leg_target = tgt;
    let status = &mut ctx.statuses[idx];
    status.target_position = tgt;

    let pos = status.crane.girder_position;
    let hw = status.half_width();
    let sft = if pos < tgt { -hw } else { hw };
    let a = pos + sft;
    let b = frame.target - sft;
    let peak = height_between(ctx.locations, a.min(b), a.max(b)) as f64;

    if status.crane.hoist_level < peak + 1.0 {
        let speed = ctx.settings.hoist_speed.sample(ctx.rng);
        let duration = status.start_hoist(now, peak + 1.0, speed);
        frame.state = TravelState::Hoisting;
        wake_in(ctx, idx, duration);
    } else {
        start_glide_leg(ctx, idx, driver);
    }
}

fn start_glide_leg(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver) {
    let now = ctx.kernel.now();
    let Some(frame) = driver.frames.last_mut() else {
        return;
    };
    let duration = ctx.statuses[idx].start_glide(now, frame.leg_target, frame.speed);
    frame.state = TravelState::Gliding;
    // Every leg takes at least the reaction time, even a zero-length
    // one; this is what paces blocked cranes polling for a gap.
    let wait = duration.max(ctx.settings.reaction_time);
    wake_in(ctx, idx, wait);
}

fn wait_reaction(ctx: &mut YardCtx<'_>, idx: usize) {
    let delay = ctx.settings.reaction_time;
    wake_in(ctx, idx, delay);
}

/// Handle arrival of the whole frame stack at its goal.
fn on_arrival(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver, goal: TravelGoal) -> Flow {
    let now = ctx.kernel.now();
    match goal {
        TravelGoal::Dodge => {
            let status = &mut ctx.statuses[idx];
            if status.pending_mode == Mode::Dodge {
                status.pending_mode = Mode::Work;
                status.pending_priority = None;
            }
            driver.phase = Phase::Decide;
            Flow::Continue
        }
        TravelGoal::Pickup => {
            let Some(move_id) = ctx.statuses[idx].current_move else {
                driver.phase = Phase::Decide;
                return Flow::Continue;
            };
            ctx.statuses[idx].goal1 = ctx.statuses[idx].goal2;
            let (kind, amount, pickup_location) = match ctx.moves.get(&move_id) {
                Some(mv) => (mv.kind, mv.amount, mv.pickup_location),
                None => {
                    finish_move(ctx, idx, driver, MoveTermination::Failed);
                    driver.phase = Phase::Decide;
                    return Flow::Continue;
                }
            };
            if kind == MoveKind::MoveToPickup {
                finish_move(ctx, idx, driver, MoveTermination::Success);
                driver.phase = Phase::Decide;
                return Flow::Continue;
            }
            let Some(li) = loc_index(ctx, pickup_location) else {
                tracing::warn!(move_id = %move_id, location = %pickup_location, "unknown pickup location");
                finish_move(ctx, idx, driver, MoveTermination::Failed);
                driver.phase = Phase::Decide;
                return Flow::Continue;
            };
            let height = ctx.locations[li].location.height();
            // Any carried load is dropped here first, so it counts
            // towards what can be picked up.
            if height + ctx.statuses[idx].crane.load.size() < amount {
                tracing::warn!(
                    move_id = %move_id, location = %pickup_location, amount, height,
                    "not enough blocks to pick up"
                );
                finish_move(ctx, idx, driver, MoveTermination::Failed);
                driver.phase = Phase::Decide;
                return Flow::Continue;
            }
            let status = &mut ctx.statuses[idx];
            status.state = AgentState::Picking;
            status.interruptible = false;
            driver.site_loc = li;
            driver.phase = Phase::Manip {
                site: ManipSite::Pickup,
                stage: ManipStage::HoistToStack,
            };
            let speed = ctx.settings.hoist_speed.sample(ctx.rng);
            let duration = ctx.statuses[idx].start_hoist(now, height as f64, speed);
            wake_in(ctx, idx, duration);
            Flow::Wait
        }
        TravelGoal::Dropoff => {
            let Some(move_id) = ctx.statuses[idx].current_move else {
                driver.phase = Phase::Decide;
                return Flow::Continue;
            };
            let (amount, dropoff_location) = match ctx.moves.get(&move_id) {
                Some(mv) => (mv.amount, mv.dropoff_location),
                None => {
                    finish_move(ctx, idx, driver, MoveTermination::Failed);
                    driver.phase = Phase::Decide;
                    return Flow::Continue;
                }
            };
            let Some(li) = loc_index(ctx, dropoff_location) else {
                tracing::warn!(move_id = %move_id, location = %dropoff_location, "unknown dropoff location");
                ctx.statuses[idx].interruptible = true;
                finish_move(ctx, idx, driver, MoveTermination::Failed);
                driver.phase = Phase::Decide;
                return Flow::Continue;
            };
            if ctx.locations[li].location.free_height() < amount {
                tracing::warn!(
                    move_id = %move_id, location = %dropoff_location, amount,
                    free = ctx.locations[li].location.free_height(),
                    "not enough space to drop off"
                );
                ctx.statuses[idx].interruptible = true;
                finish_move(ctx, idx, driver, MoveTermination::Failed);
                driver.phase = Phase::Decide;
                return Flow::Continue;
            }
            let status = &mut ctx.statuses[idx];
            status.state = AgentState::Dropping;
            driver.site_loc = li;
            driver.phase = Phase::Manip {
                site: ManipSite::Dropoff,
                stage: ManipStage::HoistToStack,
            };
            let height = ctx.locations[li].location.height();
            let speed = ctx.settings.hoist_speed.sample(ctx.rng);
            let duration = ctx.statuses[idx].start_hoist(now, height as f64, speed);
            wake_in(ctx, idx, duration);
            Flow::Wait
        }
    }
}

/// Advance the pickup/dropoff manipulation machine by one wakeup.
fn on_manip_wake(
    ctx: &mut YardCtx<'_>,
    idx: usize,
    driver: &mut AgentDriver,
    site: ManipSite,
    stage: ManipStage,
) -> Flow {
    let li = driver.site_loc;
    match stage {
        ManipStage::HoistToStack => {
            if ctx.statuses[idx].crane.load.is_empty() {
                after_drop(ctx, idx, driver, site)
            } else {
                driver.phase = Phase::Manip {
                    site,
                    stage: ManipStage::DropTimer,
                };
                let delay = ctx.settings.manipulation_time.sample(ctx.rng);
                wake_in(ctx, idx, delay);
                Flow::Wait
            }
        }
        ManipStage::DropTimer => {
            let load = ctx.statuses[idx].crane.load.take_all();
            let token = token_of(&ctx.statuses[idx]);
            let (ticket, _) = ctx.locations[li].dropoff_stack(load, token, ctx.kernel);
            driver.ticket = Some((li, ticket));
            driver.phase = Phase::Manip {
                site,
                stage: ManipStage::DropTicket,
            };
            Flow::Wait
        }
        ManipStage::DropTicket => {
            driver.ticket = None;
            ctx.kpis.crane_manipulations += 1;
            ctx.outbox.push(Notification::LocationChanged {
                location: ctx.locations[li].location.id,
            });
            after_drop(ctx, idx, driver, site)
        }
        ManipStage::HoistToGrab => {
            let Some(move_id) = ctx.statuses[idx].current_move else {
                driver.phase = Phase::Decide;
                return Flow::Continue;
            };
            let amount = ctx.moves.get(&move_id).map(|m| m.amount).unwrap_or(0);
            let token = token_of(&ctx.statuses[idx]);
            let (ticket, _) = ctx.locations[li].pickup(amount, token, ctx.kernel);
            driver.ticket = Some((li, ticket));
            driver.pending_waits = 2;
            driver.phase = Phase::Manip {
                site,
                stage: ManipStage::Grab,
            };
            let delay = ctx.settings.manipulation_time.sample(ctx.rng);
            wake_in(ctx, idx, delay);
            Flow::Wait
        }
        ManipStage::Grab => {
            driver.pending_waits = driver.pending_waits.saturating_sub(1);
            if driver.pending_waits > 0 {
                return Flow::Wait;
            }
            let Some((loc, ticket)) = driver.ticket.take() else {
                driver.phase = Phase::Decide;
                return Flow::Continue;
            };
            match ctx.locations[loc].claim(ticket) {
                Some(stack) => {
                    ctx.statuses[idx].crane.load.add_stack_to_bottom(stack);
                    ctx.kpis.crane_manipulations += 1;
                    ctx.outbox.push(Notification::LocationChanged {
                        location: ctx.locations[loc].location.id,
                    });
                    hoist_to_cruise(ctx, idx, driver, site)
                }
                None => {
                    tracing::warn!(
                        crane = %ctx.statuses[idx].crane.id,
                        "pickup did not complete, failing move"
                    );
                    ctx.locations[loc].cancel(ticket);
                    ctx.statuses[idx].interruptible = true;
                    finish_move(ctx, idx, driver, MoveTermination::Failed);
                    driver.phase = Phase::Decide;
                    Flow::Continue
                }
            }
        }
        ManipStage::HoistUp => {
            let grabbed = site == ManipSite::Pickup
                && ctx.statuses[idx]
                    .current_move
                    .and_then(|id| ctx.moves.get(&id))
                    .map(|m| m.amount > 0)
                    .unwrap_or(false);
            if grabbed {
                // Carry the load to the dropoff position.
                let Some(move_id) = ctx.statuses[idx].current_move else {
                    driver.phase = Phase::Decide;
                    return Flow::Continue;
                };
                let dropoff = match ctx.moves.get(&move_id) {
                    Some(mv) => mv.dropoff_position,
                    None => {
                        finish_move(ctx, idx, driver, MoveTermination::Failed);
                        driver.phase = Phase::Decide;
                        return Flow::Continue;
                    }
                };
                ctx.statuses[idx].state = AgentState::Moving;
                push_travel(ctx, idx, driver, dropoff, dropoff, false);
                driver.phase = Phase::Travel(TravelGoal::Dropoff);
                Flow::Continue
            } else {
                ctx.statuses[idx].interruptible = true;
                driver.phase = Phase::Decide;
                Flow::Continue
            }
        }
    }
}

/// Continue after the carried load (if any) hit the stack.
fn after_drop(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver, site: ManipSite) -> Flow {
    let now = ctx.kernel.now();
    let li = driver.site_loc;
    let amount = ctx.statuses[idx]
        .current_move
        .and_then(|id| ctx.moves.get(&id))
        .map(|m| m.amount)
        .unwrap_or(0);
    if site == ManipSite::Pickup && amount > 0 {
        driver.phase = Phase::Manip {
            site,
            stage: ManipStage::HoistToGrab,
        };
        let level = ctx.locations[li].location.height().saturating_sub(amount);
        let speed = ctx.settings.hoist_speed.sample(ctx.rng);
        let duration = ctx.statuses[idx].start_hoist(now, level as f64, speed);
        wake_in(ctx, idx, duration);
        Flow::Wait
    } else {
        // The drop was the move's last manipulation.
        finish_move(ctx, idx, driver, MoveTermination::Success);
        hoist_to_cruise(ctx, idx, driver, site)
    }
}

/// Raise the hoist to the travel level, then continue per site.
fn hoist_to_cruise(
    ctx: &mut YardCtx<'_>,
    idx: usize,
    driver: &mut AgentDriver,
    site: ManipSite,
) -> Flow {
    let now = ctx.kernel.now();
    let level = ctx
        .settings
        .height
        .saturating_sub(ctx.statuses[idx].crane.capacity) as f64;
    driver.phase = Phase::Manip {
        site,
        stage: ManipStage::HoistUp,
    };
    let speed = ctx.settings.hoist_speed.sample(ctx.rng);
    let duration = ctx.statuses[idx].start_hoist(now, level, speed);
    wake_in(ctx, idx, duration);
    Flow::Wait
}

/// Conclude the crane's current move: KPIs, notification, schedule
/// cleanup, and re-triggering of waiting cranes.
fn finish_move(ctx: &mut YardCtx<'_>, idx: usize, driver: &mut AgentDriver, termination: MoveTermination) {
    let Some(move_id) = ctx.statuses[idx].current_move.take() else {
        return;
    };
    let now = ctx.kernel.now();
    let due_date = ctx.moves.get(&move_id).map(|m| m.due_date);
    {
        let status = &mut ctx.statuses[idx];
        let pos = status.crane.girder_position;
        status.goal1 = pos;
        status.goal2 = pos;
        status.priority = None;
    }
    match termination {
        MoveTermination::Success => {
            ctx.kpis.finished_moves += 1;
            if due_date.is_some_and(|due| now > due) {
                ctx.kpis.tardy_moves += 1;
            }
        }
        MoveTermination::Failed | MoveTermination::Interrupted => {
            ctx.kpis.failed_moves += 1;
        }
    }
    tracing::debug!(
        crane = %ctx.statuses[idx].crane.id, move_id = %move_id, ?termination,
        "move concluded"
    );
    ctx.outbox.push(Notification::MoveFinished {
        move_id,
        crane: ctx.statuses[idx].crane.id,
        started: driver.move_started,
        girder_distance: ctx.statuses[idx].girder_distance,
        hoist_distance: ctx.statuses[idx].hoist_distance,
        termination,
    });
    ctx.store.remove_finished(move_id, ctx.moves, ctx.kernel);
    ctx.outbox.push(Notification::ScheduleChanged);
    ctx.store
        .trigger_get(ctx.moves, ctx.statuses, ctx.locations, ctx.kernel);
    zone::trigger(ctx.zones, ctx.statuses, ctx.kernel, ctx.outbox);
}

// ── Collision geometry ───────────────────────────────────────────

/// The nearest crane this one could collide with on its way to
/// `goal1`, if any. Ties go to the lower-indexed crane.
fn potential_collider(statuses: &[AgentStatus], idx: usize) -> Option<usize> {
    let me = &statuses[idx];
    let pos = me.crane.girder_position;
    let mut best: Option<(usize, f64)> = None;
    for (j, other) in statuses.iter().enumerate() {
        if j == idx || !may_collide(me, other) {
            continue;
        }
        let d = (other.crane.girder_position - pos).abs();
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((j, d)),
        }
    }
    best.map(|(j, _)| j)
}

/// Whether travelling towards `goal1` can bring this crane's envelope
/// into the other's, considering where both intend to go.
fn may_collide(me: &AgentStatus, other: &AgentStatus) -> bool {
    let pos = me.crane.girder_position;
    let opos = other.crane.girder_position;
    let hw = me.half_width();
    let ohw = other.half_width();
    if me.goal1 < pos && opos < pos {
        let my_reach = me.goal1.min(me.goal2).min(me.target_position) - hw;
        if other.goal1 <= opos {
            opos + ohw > my_reach
        } else {
            other.goal1.max(other.goal2).max(other.target_position) + ohw > my_reach
        }
    } else if me.goal1 > pos && opos > pos {
        let my_reach = me.goal1.max(me.goal2).max(me.target_position) + hw;
        if other.goal1 >= opos {
            opos - ohw < my_reach
        } else {
            other.goal1.min(other.goal2).min(other.target_position) - ohw < my_reach
        }
    } else {
        false
    }
}

/// Strict priority comparison where absence never wins: a crane
/// without a priority outranks nobody.
fn prio_gt(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

// ── Small helpers ────────────────────────────────────────────────

fn wake_in(ctx: &mut YardCtx<'_>, idx: usize, delay: f64) {
    let status = &ctx.statuses[idx];
    ctx.kernel.schedule(
        delay,
        Wake::Agent {
            crane: status.crane.id,
            epoch: status.epoch,
        },
    );
}

fn token_of(status: &AgentStatus) -> Wake {
    Wake::Agent {
        crane: status.crane.id,
        epoch: status.epoch,
    }
}

fn loc_index(ctx: &YardCtx<'_>, id: girder_core::LocationId) -> Option<usize> {
    ctx.locations.iter().position(|l| l.location.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_core::CraneId;

    fn status_at(pos: f64) -> AgentStatus {
        AgentStatus::new(
            Crane::new(CraneId(0), 2, 4.0, 0.0, 100.0, pos),
            SimTime::ZERO,
        )
    }

    #[test]
    fn glide_integrates_and_snaps() {
        let mut s = status_at(10.0);
        let duration = s.start_glide(SimTime::ZERO, 20.0, 2.0);
        assert_eq!(duration, 5.0);
        s.update_position(SimTime(2.0));
        assert!((s.crane.girder_position - 14.0).abs() < 1e-12);
        assert_eq!(s.direction(), Direction::ToUpper);
        // Past the stop time the position snaps exactly onto the target.
        s.update_position(SimTime(7.0));
        assert_eq!(s.crane.girder_position, 20.0);
        assert_eq!(s.direction(), Direction::Standing);
        assert!((s.girder_distance() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn hoist_moves_independently_of_girder() {
        let mut s = status_at(10.0);
        s.start_hoist(SimTime::ZERO, 6.0, 3.0);
        s.update_position(SimTime(1.0));
        assert!((s.crane.hoist_level - 3.0).abs() < 1e-12);
        assert_eq!(s.crane.girder_position, 10.0);
        s.update_position(SimTime(10.0));
        assert_eq!(s.crane.hoist_level, 6.0);
        assert!((s.hoist_distance() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn downward_glide_has_negative_speed() {
        let mut s = status_at(30.0);
        s.start_glide(SimTime::ZERO, 10.0, 2.0);
        assert_eq!(s.direction(), Direction::ToLower);
        s.update_position(SimTime(100.0));
        assert_eq!(s.crane.girder_position, 10.0);
        assert!((s.girder_distance() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn dodge_priority_escalates_along_a_chain() {
        let mut kernel = Kernel::new();
        let mut a = status_at(10.0);
        a.dodge(&mut kernel, 5.0, Some(0.0));
        assert_eq!(a.pending_priority, Some(0.5));

        let mut b = status_at(20.0);
        b.dodge(&mut kernel, 25.0, a.pending_priority);
        assert_eq!(b.pending_priority, Some(0.75));

        let mut c = status_at(30.0);
        c.dodge(&mut kernel, 35.0, b.pending_priority);
        assert_eq!(c.pending_priority, Some(0.875));
    }

    #[test]
    fn dodge_without_requester_priority_carries_none() {
        let mut kernel = Kernel::new();
        let mut a = status_at(10.0);
        a.dodge(&mut kernel, 5.0, None);
        assert_eq!(a.pending_priority, None);
        assert_eq!(a.pending_mode, Mode::Dodge);
    }

    #[test]
    fn interrupt_bumps_epoch_and_sets_fault() {
        let mut kernel = Kernel::new();
        let mut a = status_at(10.0);
        a.cancel(&mut kernel);
        assert!(a.fault);
        assert_eq!(a.epoch, 1);
        assert_eq!(a.pending_mode, Mode::Idle);
        // The urgent wakeup carries the new epoch.
        let wake = kernel.advance().unwrap();
        assert_eq!(
            wake.fired[0].token,
            Wake::Agent {
                crane: CraneId(0),
                epoch: 1
            }
        );
    }

    #[test]
    fn cancel_does_not_interrupt_a_manipulating_crane() {
        let mut kernel = Kernel::new();
        let mut a = status_at(10.0);
        a.interruptible = false;
        a.cancel(&mut kernel);
        assert!(!a.fault);
        assert_eq!(a.epoch, 0);
        assert_eq!(a.pending_mode, Mode::Idle);
    }

    #[test]
    fn priority_comparison_treats_none_as_lowest() {
        assert!(prio_gt(Some(1.0), Some(0.5)));
        assert!(!prio_gt(Some(0.5), Some(1.0)));
        assert!(!prio_gt(Some(1.0), None));
        assert!(!prio_gt(None, Some(-5.0)));
        assert!(!prio_gt(None, None));
    }

    #[test]
    fn collision_detected_only_in_travel_direction() {
        let mut me = status_at(50.0);
        me.goal1 = 20.0;
        me.goal2 = 20.0;
        me.target_position = 20.0;

        // A crane standing between us and the goal collides.
        let mut other = status_at(30.0);
        other.goal1 = 30.0;
        other.goal2 = 30.0;
        other.target_position = 30.0;
        assert!(may_collide(&me, &other));

        // A crane behind us does not.
        let behind = status_at(70.0);
        assert!(!may_collide(&me, &behind));

        // A crane beyond the goal plus envelopes does not.
        let mut far = status_at(10.0);
        far.goal1 = 10.0;
        far.goal2 = 10.0;
        far.target_position = 10.0;
        assert!(!may_collide(&me, &far));
    }

    #[test]
    fn collider_moving_towards_us_is_detected_by_its_goals() {
        let mut me = status_at(50.0);
        me.goal1 = 80.0;
        me.goal2 = 80.0;
        me.target_position = 80.0;

        // The other crane stands clear beyond our reach but intends to
        // travel into it.
        let mut other = status_at(90.0);
        other.goal1 = 60.0;
        other.goal2 = 60.0;
        other.target_position = 60.0;
        assert!(may_collide(&me, &other));
    }

    #[test]
    fn nearest_collider_wins() {
        let mut me = status_at(50.0);
        me.goal1 = 0.0;
        me.goal2 = 0.0;
        me.target_position = 0.0;
        let mut near = status_at(40.0);
        near.goal1 = 40.0;
        near.target_position = 40.0;
        let mut far = status_at(20.0);
        far.goal1 = 20.0;
        far.target_position = 20.0;

        let statuses = vec![me, far, near];
        assert_eq!(potential_collider(&statuses, 0), Some(2));
    }
}
