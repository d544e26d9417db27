//! The yard: owner of the whole simulated world and its event loop.
//!
//! A [`Yard`] wires the kernel, the location queues, the crane agents,
//! zone control, the schedule store, and the move generator together
//! and routes kernel wakeups to the right agent. Hosts call the command
//! surface between steps; the simulation itself never blocks on the
//! host.

use girder_core::{
    Crane, CraneId, CraneMove, CraneSchedulingSolution, Kpis, Location, MoveId, MoveRequest,
    ScheduleError, SimTime, World, ZoneId,
};
use girder_kernel::Kernel;
use indexmap::IndexMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::agent::{self, AgentDriver, AgentStatus};
use crate::config::{SettingsError, YardSettings};
use crate::generator::MoveGenerator;
use crate::location::LocationQueue;
use crate::notify::Notification;
use crate::solution::{self, Rejection};
use crate::store::ScheduleStore;
use crate::wake::Wake;
use crate::zone::ZoneControl;

/// Split borrows over the yard's parts, handed to the agent state
/// machine for one wakeup.
pub(crate) struct YardCtx<'a> {
    pub settings: &'a YardSettings,
    pub kernel: &'a mut Kernel<Wake>,
    pub statuses: &'a mut [AgentStatus],
    pub locations: &'a mut [LocationQueue],
    pub zones: &'a mut ZoneControl,
    pub store: &'a mut ScheduleStore,
    pub moves: &'a mut IndexMap<MoveId, CraneMove>,
    pub kpis: &'a mut Kpis,
    pub outbox: &'a mut Vec<Notification>,
    pub rng: &'a mut ChaCha8Rng,
}

/// Tallest stack among locations whose girder position lies in
/// `[lower, upper]`.
pub(crate) fn height_between(locations: &[LocationQueue], lower: f64, upper: f64) -> usize {
    locations
        .iter()
        .filter(|l| lower <= l.location.girder_position && l.location.girder_position <= upper)
        .map(|l| l.location.height())
        .max()
        .unwrap_or(0)
}

/// One simulated crane yard.
pub struct Yard {
    settings: YardSettings,
    kernel: Kernel<Wake>,
    locations: Vec<LocationQueue>,
    statuses: Vec<AgentStatus>,
    drivers: Vec<AgentDriver>,
    zones: ZoneControl,
    store: ScheduleStore,
    moves: IndexMap<MoveId, CraneMove>,
    requests: Vec<MoveRequest>,
    generator: MoveGenerator,
    kpis: Kpis,
    outbox: Vec<Notification>,
    rng: ChaCha8Rng,
}

impl Yard {
    /// Build a yard and boot one agent per crane at `t = 0`.
    pub fn new(
        settings: YardSettings,
        locations: Vec<Location>,
        cranes: Vec<Crane>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let mut kernel = Kernel::new();
        let now = kernel.now();
        let statuses: Vec<AgentStatus> = cranes
            .into_iter()
            .map(|c| AgentStatus::new(c, now))
            .collect();
        let drivers = statuses.iter().map(|_| AgentDriver::default()).collect();
        for status in &statuses {
            kernel.schedule(
                0.0,
                Wake::Agent {
                    crane: status.crane.id,
                    epoch: 0,
                },
            );
        }
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);
        // The generator draws from its own stream so that planning does
        // not perturb execution timing under the same seed.
        let generator =
            MoveGenerator::new(ChaCha8Rng::seed_from_u64(settings.seed ^ 0x9E37_79B9_7F4A_7C15));
        let zones = ZoneControl::new(settings.width);
        Ok(Self {
            settings,
            kernel,
            locations: locations.into_iter().map(LocationQueue::new).collect(),
            statuses,
            drivers,
            zones,
            store: ScheduleStore::new(),
            moves: IndexMap::new(),
            requests: Vec::new(),
            generator,
            kpis: Kpis::default(),
            outbox: Vec::new(),
            rng,
        })
    }

    // ── Event loop ───────────────────────────────────────────────

    /// Advance to the next event instant and drive everything that
    /// fires there. Returns the new simulated time, or `None` when no
    /// events remain.
    pub fn step(&mut self) -> Option<SimTime> {
        let wakeup = self.kernel.advance()?;
        for fired in wakeup.fired {
            match fired.token {
                Wake::Agent { crane, epoch } => self.drive_agent(crane, epoch),
                Wake::Observer(tag) => self.outbox.push(Notification::Observer(tag)),
            }
        }
        self.prune_requests();
        Some(wakeup.time)
    }

    /// Run every event up to and including `until`. Later events stay
    /// queued.
    pub fn run_until(&mut self, until: SimTime) {
        while let Some(t) = self.kernel.peek_next_time() {
            if t > until {
                break;
            }
            self.step();
        }
    }

    /// Run until no events remain.
    pub fn run_to_completion(&mut self) {
        while self.step().is_some() {}
    }

    fn drive_agent(&mut self, crane: CraneId, epoch: u64) {
        let Some(idx) = self.statuses.iter().position(|s| s.crane.id == crane) else {
            tracing::warn!(crane = %crane, "wakeup for unknown crane");
            return;
        };
        if self.statuses[idx].epoch != epoch {
            // A wait that was interrupted; its wakeup is void.
            tracing::trace!(crane = %crane, epoch, "dropping stale wakeup");
            return;
        }
        let mut driver = std::mem::take(&mut self.drivers[idx]);
        let mut ctx = YardCtx {
            settings: &self.settings,
            kernel: &mut self.kernel,
            statuses: &mut self.statuses,
            locations: &mut self.locations,
            zones: &mut self.zones,
            store: &mut self.store,
            moves: &mut self.moves,
            kpis: &mut self.kpis,
            outbox: &mut self.outbox,
            rng: &mut self.rng,
        };
        agent::drive(&mut ctx, idx, &mut driver);
        self.drivers[idx] = driver;
    }

    /// A request is fulfilled once its block physically rests at the
    /// target location, however it got there.
    fn prune_requests(&mut self) {
        let locations = &self.locations;
        self.requests.retain(|r| {
            !locations
                .iter()
                .any(|l| l.location.id == r.target_location && l.location.stack.contains(r.block))
        });
    }

    // ── Host commands ────────────────────────────────────────────

    /// Register a move. Girder positions are resolved from the
    /// location table; an invalid move is refused with a reason.
    pub fn add_move(&mut self, mut mv: CraneMove) -> Result<(), Rejection> {
        match solution::vet_move(&mv, &self.moves, &self.locations, &self.statuses) {
            Ok((pickup_position, dropoff_position)) => {
                mv.pickup_position = pickup_position;
                mv.dropoff_position = dropoff_position;
                self.moves.insert(mv.id, mv);
                Ok(())
            }
            Err(reason) => Err(Rejection {
                move_id: mv.id,
                reason,
            }),
        }
    }

    /// Append a schedule entry for a registered move and retry waiting
    /// cranes.
    pub fn assign_move(
        &mut self,
        move_id: MoveId,
        crane: CraneId,
        priority: i32,
    ) -> Result<(), ScheduleError> {
        self.store.assign_move(
            move_id,
            crane,
            priority,
            &self.moves,
            &self.statuses,
            &self.locations,
            &mut self.kernel,
        )
    }

    /// Register an open move request for the generator.
    pub fn add_move_request(&mut self, request: MoveRequest) {
        self.requests.push(request);
    }

    /// Re-plan: refresh generated moves from the open requests, then
    /// retry waiting cranes.
    pub fn generate_moves(&mut self) {
        let now = self.kernel.now();
        self.generator.update(
            &mut self.moves,
            &mut self.requests,
            &self.locations,
            &self.statuses,
            now,
        );
        self.store
            .trigger_get(&self.moves, &self.statuses, &self.locations, &mut self.kernel);
    }

    /// Validate and apply an externally planned solution; returns the
    /// refused entries.
    pub fn apply_solution(&mut self, solution: CraneSchedulingSolution) -> Vec<Rejection> {
        let rejections = solution::apply_solution(
            solution,
            &mut self.moves,
            &self.locations,
            &self.statuses,
            &mut self.store,
            &mut self.kernel,
            &mut self.outbox,
        );
        self.store
            .trigger_get(&self.moves, &self.statuses, &self.locations, &mut self.kernel);
        rejections
    }

    /// Request exclusive use of the girder interval `[lower, upper]`.
    /// The grant arrives through the notification outbox.
    pub fn request_zone(&mut self, lower: f64, upper: f64) -> ZoneId {
        self.zones.request(
            lower,
            upper,
            &mut self.statuses,
            &mut self.kernel,
            &mut self.outbox,
        )
    }

    /// Release a zone, granted or still pending.
    pub fn release_zone(&mut self, zone: ZoneId) {
        self.zones.release(
            zone,
            &mut self.statuses,
            &mut self.kernel,
            &mut self.outbox,
        );
    }

    /// Park a crane: it finishes nothing new and yields its current
    /// move if it can be interrupted.
    pub fn cancel_crane(&mut self, crane: CraneId) {
        if let Some(idx) = self.index_of(crane) {
            self.statuses[idx].cancel(&mut self.kernel);
        }
    }

    /// Put a parked crane back to work.
    pub fn resume_crane(&mut self, crane: CraneId) {
        if let Some(idx) = self.index_of(crane) {
            self.statuses[idx].resume(&mut self.kernel);
        }
    }

    /// Order a waiting crane out of the way.
    pub fn dodge_crane(&mut self, crane: CraneId, position: f64, others_priority: Option<f64>) {
        if let Some(idx) = self.index_of(crane) {
            self.statuses[idx].dodge(&mut self.kernel, position, others_priority);
        }
    }

    /// Arm a host observer event after `delay`; it surfaces as
    /// [`Notification::Observer`] with the given tag.
    pub fn notify_after(&mut self, delay: f64, tag: u64) {
        self.kernel.schedule(delay, Wake::Observer(tag));
    }

    /// Take all pending notifications, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    // ── Inspection ───────────────────────────────────────────────

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.kernel.now()
    }

    /// The yard's settings.
    pub fn settings(&self) -> &YardSettings {
        &self.settings
    }

    /// The peer-visible state of one crane.
    pub fn agent(&self, crane: CraneId) -> Option<&AgentStatus> {
        self.statuses.iter().find(|s| s.crane.id == crane)
    }

    /// The location with the given id.
    pub fn location(&self, id: girder_core::LocationId) -> Option<&Location> {
        self.locations
            .iter()
            .find(|l| l.location.id == id)
            .map(|l| &l.location)
    }

    /// Performance counters as of now. Crane positions are brought up
    /// to date so distance totals include travel still in progress.
    pub fn kpis(&mut self) -> Kpis {
        let now = self.kernel.now();
        let mut kpis = self.kpis;
        kpis.total_girder_distance = 0.0;
        kpis.total_hoist_distance = 0.0;
        for status in &mut self.statuses {
            status.update_position(now);
            kpis.total_girder_distance += status.girder_distance();
            kpis.total_hoist_distance += status.hoist_distance();
        }
        kpis
    }

    /// A consistent snapshot of the yard, safe to hand to a planner.
    pub fn world(&mut self) -> World {
        let now = self.kernel.now();
        let kpis = self.kpis();
        World {
            now,
            height: self.settings.height,
            width: self.settings.width,
            locations: self.locations.iter().map(|l| l.location.clone()).collect(),
            cranes: self.statuses.iter().map(|s| s.crane.clone()).collect(),
            crane_moves: self.moves.values().cloned().collect(),
            move_requests: self.requests.clone(),
            schedule: self.store.schedule().clone(),
            kpis,
        }
    }

    fn index_of(&self, crane: CraneId) -> Option<usize> {
        self.statuses.iter().position(|s| s.crane.id == crane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Mode;
    use crate::sampler::Sampler;
    use girder_core::{
        Block, BlockId, LocationId, LocationKind, MoveKind, MoveTermination, Stack,
    };
    use indexmap::IndexSet;

    fn settings() -> YardSettings {
        YardSettings {
            width: 100.0,
            height: 5,
            reaction_time: 0.2,
            girder_speed: Sampler::Constant(2.0),
            hoist_speed: Sampler::Constant(1.0),
            manipulation_time: Sampler::Constant(1.0),
            seed: 7,
        }
    }

    fn yard_with_one_block() -> Yard {
        let mut source = Location::new(LocationId(1), 10.0, 4, LocationKind::Buffer);
        source.stack = Stack::from_blocks(vec![Block::new(BlockId(1))]);
        let target = Location::new(LocationId(2), 50.0, 4, LocationKind::Buffer);
        let crane = Crane::new(CraneId(0), 1, 4.0, 0.0, 100.0, 0.0);
        Yard::new(settings(), vec![source, target], vec![crane]).unwrap()
    }

    fn delivery_move() -> CraneMove {
        CraneMove {
            id: MoveId(1),
            kind: MoveKind::PickupAndDropoff,
            pickup_location: LocationId(1),
            pickup_position: 0.0,
            dropoff_location: LocationId(2),
            dropoff_position: 0.0,
            amount: 1,
            release_time: SimTime::ZERO,
            due_date: SimTime::MAX,
            required_crane: None,
            predecessors: IndexSet::new(),
            moved_blocks: vec![BlockId(1)],
        }
    }

    #[test]
    fn single_move_is_delivered_end_to_end() {
        let mut yard = yard_with_one_block();
        yard.add_move(delivery_move()).unwrap();
        yard.assign_move(MoveId(1), CraneId(0), 0).unwrap();
        yard.run_to_completion();

        let target = yard.location(LocationId(2)).unwrap();
        assert!(target.stack.contains(BlockId(1)));
        assert!(yard.location(LocationId(1)).unwrap().stack.is_empty());

        let kpis = yard.kpis();
        assert_eq!(kpis.finished_moves, 1);
        assert_eq!(kpis.failed_moves, 0);
        assert_eq!(kpis.crane_manipulations, 2);
        assert!(kpis.total_girder_distance >= 50.0);

        let finished = yard
            .drain_notifications()
            .into_iter()
            .find(|n| matches!(n, Notification::MoveFinished { .. }));
        match finished {
            Some(Notification::MoveFinished {
                move_id,
                termination,
                ..
            }) => {
                assert_eq!(move_id, MoveId(1));
                assert_eq!(termination, MoveTermination::Success);
            }
            other => panic!("expected a MoveFinished notification, got {other:?}"),
        }
    }

    #[test]
    fn satisfied_request_is_pruned() {
        let mut yard = yard_with_one_block();
        yard.add_move_request(MoveRequest {
            id: 1,
            block: BlockId(1),
            target_location: LocationId(2),
            due_date: SimTime::MAX,
        });
        yard.add_move(delivery_move()).unwrap();
        yard.assign_move(MoveId(1), CraneId(0), 0).unwrap();
        yard.run_to_completion();
        assert!(yard.world().move_requests.is_empty());
    }

    #[test]
    fn cancelled_crane_leaves_the_schedule_untouched() {
        let mut yard = yard_with_one_block();
        yard.cancel_crane(CraneId(0));
        yard.add_move(delivery_move()).unwrap();
        yard.assign_move(MoveId(1), CraneId(0), 0).unwrap();
        yard.run_to_completion();

        let agent = yard.agent(CraneId(0)).unwrap();
        assert_eq!(agent.mode, Mode::Idle);
        assert!(agent.current_move.is_none());
        assert!(yard.world().schedule.contains(MoveId(1)));
        assert!(yard.location(LocationId(1)).unwrap().stack.contains(BlockId(1)));
    }

    #[test]
    fn resumed_crane_picks_up_the_pending_work() {
        let mut yard = yard_with_one_block();
        yard.cancel_crane(CraneId(0));
        yard.add_move(delivery_move()).unwrap();
        yard.assign_move(MoveId(1), CraneId(0), 0).unwrap();
        yard.run_to_completion();
        yard.resume_crane(CraneId(0));
        yard.run_to_completion();
        assert!(yard.location(LocationId(2)).unwrap().stack.contains(BlockId(1)));
        assert_eq!(yard.kpis().finished_moves, 1);
    }

    #[test]
    fn observer_event_surfaces_with_its_tag() {
        let mut yard = yard_with_one_block();
        yard.notify_after(5.0, 42);
        yard.run_until(SimTime(10.0));
        assert!(yard
            .drain_notifications()
            .contains(&Notification::Observer(42)));
        assert_eq!(yard.now(), SimTime(5.0));
    }

    #[test]
    fn run_until_leaves_later_events_queued() {
        let mut yard = yard_with_one_block();
        yard.notify_after(5.0, 1);
        yard.notify_after(20.0, 2);
        yard.run_until(SimTime(10.0));
        let seen = yard.drain_notifications();
        assert!(seen.contains(&Notification::Observer(1)));
        assert!(!seen.contains(&Notification::Observer(2)));
    }

    #[test]
    fn generated_plan_delivers_a_buried_block() {
        let mut source = Location::new(LocationId(1), 10.0, 4, LocationKind::Buffer);
        source.stack = Stack::from_blocks(vec![Block::new(BlockId(1)), Block::new(BlockId(2))]);
        let buffer = Location::new(LocationId(2), 30.0, 4, LocationKind::Buffer);
        let target = Location::new(LocationId(3), 50.0, 4, LocationKind::Buffer);
        let crane = Crane::new(CraneId(0), 1, 4.0, 0.0, 100.0, 0.0);
        let mut yard =
            Yard::new(settings(), vec![source, buffer, target], vec![crane]).unwrap();

        // Block 1 sits under block 2; the generator must plan the
        // relocation itself.
        yard.add_move_request(MoveRequest {
            id: 1,
            block: BlockId(1),
            target_location: LocationId(3),
            due_date: SimTime::MAX,
        });
        yard.generate_moves();

        let world = yard.world();
        assert_eq!(world.crane_moves.len(), 2);
        assert!(world.crane_moves.iter().all(|m| m.id.is_transient()));
        let relocation = world
            .crane_moves
            .iter()
            .find(|m| m.moved_blocks == vec![BlockId(2)])
            .unwrap();
        let delivery = world
            .crane_moves
            .iter()
            .find(|m| m.moved_blocks == vec![BlockId(1)])
            .unwrap();
        assert!(delivery.predecessors.contains(&relocation.id));

        yard.assign_move(relocation.id, CraneId(0), 0).unwrap();
        yard.assign_move(delivery.id, CraneId(0), 1).unwrap();
        yard.run_to_completion();
        assert!(yard.location(LocationId(3)).unwrap().stack.contains(BlockId(1)));
        assert!(yard.world().move_requests.is_empty());
        assert_eq!(yard.kpis().finished_moves, 2);
    }

    #[test]
    fn zone_grant_flows_through_the_outbox() {
        let mut yard = yard_with_one_block();
        // The crane stands at 0.0; ask for a far interval so the grant
        // is immediate.
        let zone = yard.request_zone(60.0, 80.0);
        let seen = yard.drain_notifications();
        assert!(seen.iter().any(|n| matches!(
            n,
            Notification::ZoneGranted { zone: z, .. } if *z == zone
        )));
        yard.release_zone(zone);
        assert!(yard
            .drain_notifications()
            .contains(&Notification::ZoneReleased { zone }));
    }
}
