//! Mutual-exclusion zones on the girder.
//!
//! A granted zone is an interval no crane envelope may enter until it
//! is released. Grants are strictly FIFO with head-of-line blocking:
//! the oldest pending request is granted first or nothing is. When
//! only waiting cranes occupy a requested interval, the controller
//! orders them to dodge out of it, splitting them left and right of
//! the interval where the free space allows.

use girder_core::ZoneId;
use girder_kernel::Kernel;

use crate::agent::{AgentState, AgentStatus};
use crate::notify::Notification;
use crate::wake::Wake;

#[derive(Clone, Copy, Debug)]
struct Zone {
    id: ZoneId,
    lower: f64,
    upper: f64,
}

/// The zone controller: pending queue plus the set of active zones.
pub struct ZoneControl {
    width: f64,
    queue: Vec<Zone>,
    active: Vec<Zone>,
    next_id: u64,
}

impl ZoneControl {
    /// A controller for a girder of the given length.
    pub fn new(width: f64) -> Self {
        Self {
            width,
            queue: Vec::new(),
            active: Vec::new(),
            next_id: 0,
        }
    }

    /// Number of requests waiting for a grant.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The currently granted intervals as `(id, lower, upper)`.
    pub fn active(&self) -> impl Iterator<Item = (ZoneId, f64, f64)> + '_ {
        self.active.iter().map(|z| (z.id, z.lower, z.upper))
    }

    /// Queue a request for exclusive use of `[lower, upper]`. The
    /// grant is announced through the notification outbox.
    pub fn request(
        &mut self,
        lower: f64,
        upper: f64,
        statuses: &mut [AgentStatus],
        kernel: &mut Kernel<Wake>,
        outbox: &mut Vec<Notification>,
    ) -> ZoneId {
        self.next_id += 1;
        let id = ZoneId(self.next_id);
        self.queue.push(Zone { id, lower, upper });
        trigger(self, statuses, kernel, outbox);
        id
    }

    /// Release an active zone, or withdraw a still-pending request.
    /// Unknown ids are logged and ignored.
    pub fn release(
        &mut self,
        id: ZoneId,
        statuses: &mut [AgentStatus],
        kernel: &mut Kernel<Wake>,
        outbox: &mut Vec<Notification>,
    ) {
        if let Some(i) = self.queue.iter().position(|z| z.id == id) {
            self.queue.remove(i);
            outbox.push(Notification::ZoneReleased { zone: id });
        } else if let Some(i) = self.active.iter().position(|z| z.id == id) {
            self.active.remove(i);
            outbox.push(Notification::ZoneReleased { zone: id });
        } else {
            tracing::warn!(zone = %id, "released zone is neither active nor pending");
            return;
        }
        trigger(self, statuses, kernel, outbox);
    }

    /// Clamp a travel target so the path from the agent's position to
    /// it does not cross an active zone. An agent that already stands
    /// inside a zone stays put (and should not be there).
    pub fn closest_to_target(&self, agent: &AgentStatus, to: f64) -> f64 {
        let pos = agent.crane.girder_position;
        let mut to = to;
        for z in &self.active {
            if overlap(z.lower, z.upper, pos.min(to), pos.max(to)) {
                if z.lower < pos && pos < z.upper {
                    tracing::warn!(
                        crane = %agent.crane.id, pos, lower = z.lower, upper = z.upper,
                        "crane is inside an active zone"
                    );
                    return pos;
                }
                to = if to > pos { z.lower } else { z.upper };
            }
        }
        to
    }

    /// Whether granting the head request is possible right now; orders
    /// waiting cranes out of the interval as a side effect.
    fn try_grant(
        &self,
        req: Zone,
        statuses: &mut [AgentStatus],
        kernel: &mut Kernel<Wake>,
    ) -> bool {
        if self
            .active
            .iter()
            .any(|u| overlap(u.lower, u.upper, req.lower, req.upper))
        {
            return false;
        }
        // A crane counts as inside when its current sweep (position to
        // leg target) touches the interval.
        let mut inside: Vec<usize> = (0..statuses.len())
            .filter(|&i| {
                let s = &statuses[i];
                let pos = s.crane.girder_position;
                let tgt = s.target_position;
                overlap(pos.min(tgt), pos.max(tgt), req.lower, req.upper)
            })
            .collect();
        if inside.is_empty() {
            return true;
        }
        if !inside
            .iter()
            .all(|&i| statuses[i].state == AgentState::Waiting)
        {
            return false;
        }
        // All occupants stand still; clear them out. Space on either
        // side is bounded by the nearest active zone and discounted by
        // the cranes already parked there.
        inside.sort_by(|&a, &b| {
            statuses[a]
                .crane
                .girder_position
                .total_cmp(&statuses[b].crane.girder_position)
        });
        let zoc_left = self
            .active
            .iter()
            .filter(|z| z.upper <= req.lower)
            .max_by(|a, b| a.upper.total_cmp(&b.upper));
        let zoc_right = self
            .active
            .iter()
            .filter(|z| z.lower >= req.upper)
            .min_by(|a, b| a.lower.total_cmp(&b.lower));
        let left_inner = zoc_left.map(|z| z.lower).unwrap_or(0.0);
        let right_inner = zoc_right.map(|z| z.upper).unwrap_or(self.width);
        let cranes_left: f64 = statuses
            .iter()
            .filter(|s| {
                s.crane.girder_position > left_inner && s.crane.girder_position <= req.lower
            })
            .map(|s| s.crane.width)
            .sum();
        let cranes_right: f64 = statuses
            .iter()
            .filter(|s| {
                s.crane.girder_position < right_inner && s.crane.girder_position >= req.upper
            })
            .map(|s| s.crane.width)
            .sum();
        let space_left = req.lower - zoc_left.map(|z| z.upper).unwrap_or(0.0) - cranes_left;
        let space_right = zoc_right.map(|z| z.lower).unwrap_or(self.width) - req.upper - cranes_right;

        if enough_space_for_dodge(&inside, statuses, space_left, space_right) {
            // Walk occupants left to right. Cranes go left while they
            // fit; the first crane for which going right is shorter
            // (and everything after it fits there) leads the rest out
            // to the right.
            let mut sum_width: f64 = inside.iter().map(|&i| statuses[i].crane.width).sum();
            let mut go_left = None;
            let mut go_right = None;
            for &i in &inside {
                let pos = statuses[i].crane.girder_position;
                if sum_width <= space_right && pos - req.lower > req.upper - pos {
                    go_right = Some(i);
                    break;
                }
                sum_width -= statuses[i].crane.width;
                go_left = Some(i);
            }
            if let Some(i) = go_left {
                let point = req.lower - statuses[i].half_width();
                statuses[i].dodge(kernel, point, Some(0.0));
            }
            if let Some(i) = go_right {
                let point = req.upper + statuses[i].half_width();
                statuses[i].dodge(kernel, point, Some(0.0));
            }
        }
        false
    }
}

/// Grant pending requests FIFO until the head request cannot proceed.
pub(crate) fn trigger(
    zc: &mut ZoneControl,
    statuses: &mut [AgentStatus],
    kernel: &mut Kernel<Wake>,
    outbox: &mut Vec<Notification>,
) {
    while let Some(req) = zc.queue.first().copied() {
        if !zc.try_grant(req, statuses, kernel) {
            break;
        }
        zc.queue.remove(0);
        zc.active.push(req);
        outbox.push(Notification::ZoneGranted {
            zone: req.id,
            lower: req.lower,
            upper: req.upper,
        });
    }
}

/// Interval overlap as the zone discipline defines it: touching the
/// requested interval from outside counts as overlapping, so a zone
/// boundary still keeps envelopes a full stop apart.
fn overlap(user_lower: f64, user_upper: f64, req_lower: f64, req_upper: f64) -> bool {
    user_lower < req_lower && user_upper >= req_lower
        || user_lower >= req_lower && user_upper <= req_upper
        || user_lower < req_lower && user_upper > req_upper
        || user_lower <= req_upper && user_upper > req_upper
}

/// Can the occupants be parked beside the interval? Cranes fill the
/// left space first; once one goes right, the rest must too.
fn enough_space_for_dodge(
    inside: &[usize],
    statuses: &[AgentStatus],
    mut space_left: f64,
    mut space_right: f64,
) -> bool {
    let mut left = true;
    for &i in inside {
        let w = statuses[i].crane.width;
        if left && space_left >= w {
            space_left -= w;
            continue;
        }
        left = false;
        if space_right >= w {
            space_right -= w;
        } else {
            return false;
        }
    }
    true
}
