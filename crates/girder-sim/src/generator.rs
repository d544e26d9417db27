//! The move generator: turns open block requests into executable crane
//! moves, including the relocations needed to unbury blocks.
//!
//! The generator plans against an image of the yard: a copy of every
//! stack onto which pending moves are applied in order. Moves that no
//! longer apply (their block is not where the plan assumed) are
//! discarded; everything that survives, plus the freshly generated
//! moves, gets a consistent predecessor chaining and girder positions
//! resolved from the location table.
//!
//! Generated moves carry negative ids so they are distinguishable from
//! host-submitted moves and can be regenerated wholesale.

use girder_core::{
    BlockId, CraneMove, LocationId, LocationKind, MoveId, MoveKind, MoveRequest, SimTime,
};
use indexmap::{IndexMap, IndexSet};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::agent::AgentStatus;
use crate::location::LocationQueue;

/// A location's stack as the planning image sees it.
struct LocImage {
    blocks: Vec<BlockId>,
    max_height: usize,
}

/// Stateful generator; owns its RNG so relocation target choices are
/// reproducible for a given seed.
pub struct MoveGenerator {
    rng: ChaCha8Rng,
    next_transient: i32,
}

impl MoveGenerator {
    /// A generator drawing relocation targets from the given seed.
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            next_transient: 0,
        }
    }

    fn fresh_id(&mut self) -> MoveId {
        self.next_transient -= 1;
        MoveId(self.next_transient)
    }

    /// Re-plan all generated moves against the current yard state.
    ///
    /// Executing moves are replayed first (in crane priority order),
    /// then the surviving generated moves, then new moves for open
    /// requests. Invalid moves are removed from `moves`; requests whose
    /// block has left the system are removed from `requests`.
    pub fn update(
        &mut self,
        moves: &mut IndexMap<MoveId, CraneMove>,
        requests: &mut Vec<MoveRequest>,
        locations: &[LocationQueue],
        statuses: &[AgentStatus],
        now: SimTime,
    ) {
        let executing = executing_ids(statuses, moves);
        let mut generated: Vec<MoveId> = moves
            .values()
            .filter(|m| m.id.is_transient() && !executing.contains(&m.id))
            .map(|m| m.id)
            .collect();
        // Descending id order is creation order for negative ids.
        generated.sort_by(|a, b| b.0.cmp(&a.0));

        let mut image: IndexMap<LocationId, LocImage> = locations
            .iter()
            .map(|l| {
                (
                    l.location.id,
                    LocImage {
                        blocks: l.location.stack.bottom_to_top().map(|b| b.id).collect(),
                        max_height: l.location.max_height,
                    },
                )
            })
            .collect();

        let mut open: IndexMap<BlockId, MoveRequest> =
            requests.iter().map(|r| (r.block, *r)).collect();

        // Replay pending moves onto the image; collect survivors.
        let mut working: Vec<CraneMove> = Vec::new();
        let mut invalid: Vec<MoveId> = Vec::new();
        for id in executing.iter().chain(generated.iter()) {
            let Some(mv) = moves.get(id) else { continue };
            if apply_move(mv, &mut image, &executing, Some(&mut open)) {
                working.push(mv.clone());
            } else {
                invalid.push(*id);
            }
        }

        // Locate each requested block in the image; requests for blocks
        // that are neither stored nor on a crane have left the system.
        let mut vanished: Vec<BlockId> = Vec::new();
        let mut stored_at: IndexMap<BlockId, (LocationId, usize)> = IndexMap::new();
        for req in open.values() {
            let found = image.iter().find_map(|(loc, img)| {
                img.blocks
                    .iter()
                    .position(|&b| b == req.block)
                    .map(|depth| (*loc, depth))
            });
            match found {
                Some(at) => {
                    stored_at.insert(req.block, at);
                }
                None => {
                    let carried = executing
                        .iter()
                        .filter_map(|id| moves.get(id))
                        .any(|m| m.moved_blocks.contains(&req.block));
                    if !carried {
                        tracing::warn!(block = %req.block, "requested block left the system, dropping request");
                        vanished.push(req.block);
                    }
                    // A carried block needs no generated move; its
                    // executing move already delivers it.
                }
            }
        }
        for block in &vanished {
            open.shift_remove(block);
        }
        requests.retain(|r| !vanished.contains(&r.block));

        // Group open requests per source location, topmost block first.
        let mut per_location: IndexMap<LocationId, Vec<MoveRequest>> = IndexMap::new();
        for req in open.values() {
            if let Some(&(loc, _)) = stored_at.get(&req.block) {
                per_location.entry(loc).or_default().push(*req);
            }
        }
        for group in per_location.values_mut() {
            group.sort_by(|a, b| {
                let da = stored_at.get(&a.block).map(|&(_, d)| d).unwrap_or(0);
                let db = stored_at.get(&b.block).map(|&(_, d)| d).unwrap_or(0);
                db.cmp(&da)
            });
        }

        for (loc, group) in &per_location {
            for req in group {
                self.generate_for_request(
                    req, *loc, &mut image, &mut working, locations, statuses, now,
                );
            }
        }

        fix_precedences(&mut working, locations);
        fix_positions(&mut working, locations);

        for id in invalid {
            moves.shift_remove(&id);
        }
        for mv in working {
            moves.insert(mv.id, mv);
        }
    }

    /// Generate the relocations plus the delivery move for one request.
    #[allow(clippy::too_many_arguments)]
    fn generate_for_request(
        &mut self,
        req: &MoveRequest,
        src: LocationId,
        image: &mut IndexMap<LocationId, LocImage>,
        working: &mut Vec<CraneMove>,
        locations: &[LocationQueue],
        statuses: &[AgentStatus],
        now: SimTime,
    ) {
        let src_kind = locations
            .iter()
            .find(|l| l.location.id == src)
            .map(|l| l.location.kind);
        if src_kind == Some(LocationKind::Handover) || req.target_location == src {
            return;
        }

        let buried_under: Vec<BlockId> = match image.get(&src) {
            Some(img) => img
                .blocks
                .iter()
                .rev()
                .take_while(|&&b| b != req.block)
                .copied()
                .collect(),
            None => return,
        };

        let mut chain: Vec<MoveId> = working
            .iter()
            .filter(|m| m.pickup_location == src)
            .map(|m| m.id)
            .collect();

        for block in buried_under {
            let Some(target) = self.pick_relocation_target(src, working, locations, statuses)
            else {
                tracing::warn!(
                    block = %block, location = %src,
                    "no relocation target available, leaving request unplanned"
                );
                return;
            };
            let relocation = CraneMove {
                id: self.fresh_id(),
                kind: MoveKind::PickupAndDropoff,
                pickup_location: src,
                pickup_position: 0.0,
                dropoff_location: target,
                dropoff_position: 0.0,
                amount: 1,
                release_time: now,
                due_date: req.due_date,
                required_crane: None,
                predecessors: chain.iter().copied().collect(),
                moved_blocks: vec![block],
            };
            if !apply_move(&relocation, image, &[], None) {
                tracing::warn!(move_id = %relocation.id, "generated relocation does not apply");
                return;
            }
            chain.push(relocation.id);
            working.push(relocation);
        }

        let delivery = CraneMove {
            id: self.fresh_id(),
            kind: MoveKind::PickupAndDropoff,
            pickup_location: src,
            pickup_position: 0.0,
            dropoff_location: req.target_location,
            dropoff_position: 0.0,
            amount: 1,
            release_time: now,
            due_date: req.due_date,
            required_crane: None,
            predecessors: chain.iter().copied().collect(),
            moved_blocks: vec![req.block],
        };
        if apply_move(&delivery, image, &[], None) {
            working.push(delivery);
        } else {
            tracing::warn!(move_id = %delivery.id, block = %req.block, "generated delivery does not apply");
        }
    }

    /// A random buffer location with free space that shares a crane
    /// with the source and is not already part of the plan.
    fn pick_relocation_target(
        &mut self,
        src: LocationId,
        working: &[CraneMove],
        locations: &[LocationQueue],
        statuses: &[AgentStatus],
    ) -> Option<LocationId> {
        let mut used: IndexSet<LocationId> = IndexSet::new();
        used.insert(src);
        for m in working {
            used.insert(m.pickup_location);
            used.insert(m.dropoff_location);
        }
        let src_pos = locations
            .iter()
            .find(|l| l.location.id == src)
            .map(|l| l.location.girder_position)?;
        let choices: Vec<LocationId> = locations
            .iter()
            .filter(|l| {
                l.location.kind == LocationKind::Buffer
                    && l.location.free_height() > 0
                    && !used.contains(&l.location.id)
            })
            .filter(|l| {
                // Some crane must reach both ends of the relocation.
                statuses.iter().any(|s| {
                    s.crane.can_reach(src_pos) && s.crane.can_reach(l.location.girder_position)
                })
            })
            .map(|l| l.location.id)
            .collect();
        if choices.is_empty() {
            return None;
        }
        let i = self.rng.random_range(0..choices.len());
        Some(choices[i])
    }
}

/// Ids of moves currently on a crane, ordered by crane priority
/// (unprioritized cranes first).
fn executing_ids(statuses: &[AgentStatus], moves: &IndexMap<MoveId, CraneMove>) -> Vec<MoveId> {
    let mut with_prio: Vec<(Option<f64>, MoveId)> = statuses
        .iter()
        .filter_map(|s| s.current_move.map(|m| (s.priority, m)))
        .filter(|(_, m)| moves.contains_key(m))
        .collect();
    with_prio.sort_by(|a, b| match (a.0, b.0) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.total_cmp(&y),
    });
    with_prio.into_iter().map(|(_, m)| m).collect()
}

/// Apply one move to the planning image. Returns false when the move
/// no longer fits the image; executing moves tolerate a missing source
/// (their blocks are already on the crane).
fn apply_move(
    mv: &CraneMove,
    image: &mut IndexMap<LocationId, LocImage>,
    executing: &[MoveId],
    mut open: Option<&mut IndexMap<BlockId, MoveRequest>>,
) -> bool {
    if mv.moved_blocks.is_empty() {
        return true;
    }
    let k = mv.moved_blocks.len();

    let available = match image.get(&mv.pickup_location) {
        Some(src) => {
            src.blocks.len() >= k && src.blocks[src.blocks.len() - k..] == mv.moved_blocks[..]
        }
        None => false,
    };
    let is_executing = executing.contains(&mv.id);
    if available {
        if let Some(src) = image.get_mut(&mv.pickup_location) {
            src.blocks.truncate(src.blocks.len() - k);
        }
    } else if !is_executing {
        return false;
    }

    let Some(tgt) = image.get_mut(&mv.dropoff_location) else {
        return false;
    };
    let already_there =
        tgt.blocks.len() >= k && tgt.blocks[tgt.blocks.len() - k..] == mv.moved_blocks[..];
    if !already_there {
        if tgt.blocks.len() + k > tgt.max_height {
            return false;
        }
        tgt.blocks.extend_from_slice(&mv.moved_blocks);
    }

    if let Some(open) = open.as_deref_mut() {
        for block in &mv.moved_blocks {
            let satisfied = open
                .get(block)
                .is_some_and(|r| r.target_location == mv.dropoff_location);
            if satisfied {
                open.shift_remove(block);
            }
        }
    }
    true
}

/// Rebuild every move's predecessor set from scratch: per-block move
/// chains and per-location access chains, in plan order. Dropoffs at
/// handover locations do not chain (blocks leave the system there).
fn fix_precedences(working: &mut [CraneMove], locations: &[LocationQueue]) {
    let handover: IndexSet<LocationId> = locations
        .iter()
        .filter(|l| l.location.kind == LocationKind::Handover)
        .map(|l| l.location.id)
        .collect();
    let mut by_block: IndexMap<BlockId, MoveId> = IndexMap::new();
    let mut by_location: IndexMap<LocationId, MoveId> = IndexMap::new();

    for mv in working.iter_mut() {
        mv.predecessors.clear();

        for block in mv.moved_blocks.clone() {
            if let Some(&pred) = by_block.get(&block) {
                mv.predecessors.insert(pred);
            }
            by_block.insert(block, mv.id);
        }

        if let Some(&pred) = by_location.get(&mv.pickup_location) {
            mv.predecessors.insert(pred);
        }
        by_location.insert(mv.pickup_location, mv.id);

        if !handover.contains(&mv.dropoff_location) {
            if let Some(&pred) = by_location.get(&mv.dropoff_location) {
                mv.predecessors.insert(pred);
            }
            by_location.insert(mv.dropoff_location, mv.id);
        }
    }
}

/// Resolve girder positions from the location table.
fn fix_positions(working: &mut [CraneMove], locations: &[LocationQueue]) {
    let positions: IndexMap<LocationId, f64> = locations
        .iter()
        .map(|l| (l.location.id, l.location.girder_position))
        .collect();
    for mv in working.iter_mut() {
        match positions.get(&mv.pickup_location) {
            Some(&p) => mv.pickup_position = p,
            None => tracing::warn!(move_id = %mv.id, location = %mv.pickup_location, "unknown pickup location"),
        }
        match positions.get(&mv.dropoff_location) {
            Some(&p) => mv.dropoff_position = p,
            None => tracing::warn!(move_id = %mv.id, location = %mv.dropoff_location, "unknown dropoff location"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_core::{Block, Crane, CraneId, Location, Stack};
    use rand::SeedableRng;

    fn generator(seed: u64) -> MoveGenerator {
        MoveGenerator::new(ChaCha8Rng::seed_from_u64(seed))
    }

    fn loc(id: u32, pos: f64, max: usize, kind: LocationKind, blocks: &[u32]) -> LocationQueue {
        let mut location = Location::new(LocationId(id), pos, max, kind);
        location.stack =
            Stack::from_blocks(blocks.iter().map(|&b| Block::new(BlockId(b))).collect());
        LocationQueue::new(location)
    }

    fn crane_statuses() -> Vec<AgentStatus> {
        vec![AgentStatus::new(
            Crane::new(CraneId(0), 1, 4.0, 0.0, 100.0, 0.0),
            SimTime::ZERO,
        )]
    }

    fn request(id: u32, block: u32, target: u32) -> MoveRequest {
        MoveRequest {
            id,
            block: BlockId(block),
            target_location: LocationId(target),
            due_date: SimTime(1000.0),
        }
    }

    #[test]
    fn top_block_needs_a_single_move() {
        let locations = vec![
            loc(1, 10.0, 4, LocationKind::Buffer, &[7]),
            loc(2, 20.0, 4, LocationKind::Buffer, &[]),
        ];
        let statuses = crane_statuses();
        let mut moves = IndexMap::new();
        let mut requests = vec![request(1, 7, 2)];
        generator(1).update(
            &mut moves,
            &mut requests,
            &locations,
            &statuses,
            SimTime::ZERO,
        );
        assert_eq!(moves.len(), 1);
        let mv = moves.values().next().unwrap();
        assert!(mv.id.is_transient());
        assert_eq!(mv.pickup_location, LocationId(1));
        assert_eq!(mv.dropoff_location, LocationId(2));
        assert_eq!(mv.pickup_position, 10.0);
        assert_eq!(mv.dropoff_position, 20.0);
        assert_eq!(mv.moved_blocks, vec![BlockId(7)]);
        assert!(mv.predecessors.is_empty());
    }

    #[test]
    fn buried_block_gets_relocations_with_chained_predecessors() {
        // Block 7 lies under 8 and 9; both need relocating first.
        let locations = vec![
            loc(1, 10.0, 4, LocationKind::Buffer, &[7, 8, 9]),
            loc(2, 20.0, 4, LocationKind::Buffer, &[]),
            loc(3, 30.0, 4, LocationKind::Buffer, &[]),
            loc(4, 40.0, 4, LocationKind::Handover, &[]),
        ];
        let statuses = crane_statuses();
        let mut moves = IndexMap::new();
        let mut requests = vec![request(1, 7, 4)];
        generator(1).update(
            &mut moves,
            &mut requests,
            &locations,
            &statuses,
            SimTime::ZERO,
        );

        assert_eq!(moves.len(), 3);
        let by_block = |b: u32| {
            moves
                .values()
                .find(|m| m.moved_blocks == vec![BlockId(b)])
                .unwrap()
        };
        let first = by_block(9);
        let second = by_block(8);
        let delivery = by_block(7);
        // Relocations never target arrival or handover locations.
        assert_ne!(first.dropoff_location, LocationId(4));
        assert_ne!(second.dropoff_location, LocationId(4));
        assert_eq!(delivery.dropoff_location, LocationId(4));
        // The source location chains all three in order.
        assert!(first.predecessors.is_empty());
        assert!(second.predecessors.contains(&first.id));
        assert!(delivery.predecessors.contains(&second.id));
    }

    #[test]
    fn request_for_vanished_block_is_dropped() {
        let locations = vec![
            loc(1, 10.0, 4, LocationKind::Buffer, &[]),
            loc(2, 20.0, 4, LocationKind::Buffer, &[]),
        ];
        let statuses = crane_statuses();
        let mut moves = IndexMap::new();
        let mut requests = vec![request(1, 99, 2)];
        generator(1).update(
            &mut moves,
            &mut requests,
            &locations,
            &statuses,
            SimTime::ZERO,
        );
        assert!(requests.is_empty());
        assert!(moves.is_empty());
    }

    #[test]
    fn stale_generated_move_is_replaced() {
        let locations = vec![
            loc(1, 10.0, 4, LocationKind::Buffer, &[7]),
            loc(2, 20.0, 4, LocationKind::Buffer, &[]),
        ];
        let statuses = crane_statuses();
        let mut gen = generator(1);
        let mut moves = IndexMap::new();
        let mut requests = vec![request(1, 7, 2)];
        gen.update(
            &mut moves,
            &mut requests,
            &locations,
            &statuses,
            SimTime::ZERO,
        );
        let old_id = *moves.keys().next().unwrap();

        // The yard changed: block 7 is now buried at location 1.
        let locations = vec![
            loc(1, 10.0, 4, LocationKind::Buffer, &[7, 8]),
            loc(2, 20.0, 4, LocationKind::Buffer, &[]),
            loc(3, 30.0, 4, LocationKind::Buffer, &[]),
        ];
        gen.update(
            &mut moves,
            &mut requests,
            &locations,
            &statuses,
            SimTime::ZERO,
        );
        // Block 7 is no longer on top, so the old move is invalid and
        // the plan is rebuilt: a relocation for 8 plus a fresh delivery.
        assert!(!moves.contains_key(&old_id));
        assert_eq!(moves.len(), 2);
        let reloc = moves
            .values()
            .find(|m| m.moved_blocks == vec![BlockId(8)])
            .unwrap();
        let delivery = moves
            .values()
            .find(|m| m.moved_blocks == vec![BlockId(7)])
            .unwrap();
        assert_eq!(delivery.dropoff_location, LocationId(2));
        assert!(delivery.predecessors.contains(&reloc.id));
    }

    #[test]
    fn same_seed_generates_the_same_plan() {
        let locations = vec![
            loc(1, 10.0, 6, LocationKind::Buffer, &[1, 2, 3, 4]),
            loc(2, 20.0, 6, LocationKind::Buffer, &[]),
            loc(3, 30.0, 6, LocationKind::Buffer, &[]),
            loc(4, 40.0, 6, LocationKind::Buffer, &[]),
            loc(5, 50.0, 6, LocationKind::Handover, &[]),
        ];
        let statuses = crane_statuses();
        let requests_init = vec![request(1, 1, 5)];

        let mut plan = |seed: u64| {
            let mut moves = IndexMap::new();
            let mut requests = requests_init.clone();
            generator(seed).update(
                &mut moves,
                &mut requests,
                &locations,
                &statuses,
                SimTime::ZERO,
            );
            moves
                .values()
                .map(|m| (m.id, m.pickup_location, m.dropoff_location))
                .collect::<Vec<_>>()
        };
        assert_eq!(plan(42), plan(42));
    }

    #[test]
    fn image_apply_rejects_wrong_top_block() {
        let mut image: IndexMap<LocationId, LocImage> = IndexMap::new();
        image.insert(
            LocationId(1),
            LocImage {
                blocks: vec![BlockId(1), BlockId(2)],
                max_height: 4,
            },
        );
        image.insert(
            LocationId(2),
            LocImage {
                blocks: vec![],
                max_height: 4,
            },
        );
        let mv = CraneMove {
            id: MoveId(-1),
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
        };
        assert!(!apply_move(&mv, &mut image, &[], None));
        // The image is such that block 2 on top applies fine.
        let mv = CraneMove {
            moved_blocks: vec![BlockId(2)],
            ..mv
        };
        assert!(apply_move(&mv, &mut image, &[], None));
        assert_eq!(image.get(&LocationId(1)).unwrap().blocks, vec![BlockId(1)]);
        assert_eq!(image.get(&LocationId(2)).unwrap().blocks, vec![BlockId(2)]);
    }
}
