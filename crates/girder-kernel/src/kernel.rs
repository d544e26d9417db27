//! The event kernel: clock, queue, and event slab.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt;

use girder_core::SimTime;
use smallvec::SmallVec;

use crate::event::{EventId, Outcome};

// ── Errors ───────────────────────────────────────────────────────

/// Errors from kernel event operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// The handle's slot was released or recycled.
    StaleEvent(EventId),
    /// The event was already triggered or has fired; it cannot be
    /// triggered again.
    AlreadyTriggered(EventId),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleEvent(id) => write!(f, "stale event handle {id}"),
            Self::AlreadyTriggered(id) => write!(f, "event {id} already triggered"),
        }
    }
}

impl Error for KernelError {}

// ── Queue entries ────────────────────────────────────────────────

/// Same-instant urgency. Urgent entries fire before normal entries
/// scheduled for the same time, regardless of insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Class {
    Urgent,
    Normal,
}

#[derive(Debug)]
enum Entry<T> {
    /// Deliver an event's outcome to its subscribers.
    Deliver(EventId, Outcome),
    /// Wake a token directly, no event object involved.
    Wake(T, Outcome),
}

struct QueueItem<T> {
    time: SimTime,
    class: Class,
    seq: u64,
    entry: Entry<T>,
}

impl<T> PartialEq for QueueItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for QueueItem<T> {}

impl<T> PartialOrd for QueueItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueItem<T> {
    // Reversed: BinaryHeap is a max-heap, we want the earliest entry
    // on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.class.cmp(&self.class))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ── Event slab ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EventState {
    Pending,
    Triggered,
    Fired(Outcome),
}

enum Composite {
    /// Fires when the first watched child fires, with that child's
    /// outcome.
    AnyOf,
    /// Fires `Ok` when all watched children have fired `Ok`; fires
    /// `Failed` as soon as any child fails.
    AllOf { remaining: usize },
}

struct Slot<T> {
    generation: u32,
    state: EventState,
    subscribers: Vec<T>,
    /// Composite parents watching this event.
    watchers: SmallVec<[EventId; 2]>,
    composite: Option<Composite>,
    /// Release the slot once delivered and unwatched.
    auto_release: bool,
    live: bool,
}

// ── Wakeups ──────────────────────────────────────────────────────

/// A single delivered wake token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fired<T> {
    /// The token that was subscribed or scheduled.
    pub token: T,
    /// Outcome of the event that woke it; direct wakes are always
    /// [`Outcome::Ok`].
    pub outcome: Outcome,
}

/// Everything that fired at one queue entry.
#[derive(Debug)]
pub struct Wakeup<T> {
    /// The instant the clock advanced to.
    pub time: SimTime,
    /// Tokens to drive, in subscription order. May be empty when an
    /// event fired with no subscribers.
    pub fired: SmallVec<[Fired<T>; 4]>,
}

// ── Kernel ───────────────────────────────────────────────────────

/// The discrete-event kernel.
///
/// Single-threaded and callback-free: all side effects happen in the
/// caller's loop around [`advance`](Self::advance).
pub struct Kernel<T> {
    now: SimTime,
    queue: BinaryHeap<QueueItem<T>>,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    next_seq: u64,
}

impl<T: Clone> Default for Kernel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Kernel<T> {
    /// A kernel with the clock at zero and an empty queue.
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            queue: BinaryHeap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            next_seq: 0,
        }
    }

    /// The current simulated instant.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of queued entries, stale ones included.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn push(&mut self, time: SimTime, class: Class, entry: Entry<T>) {
        let seq = self.next_seq();
        self.queue.push(QueueItem {
            time,
            class,
            seq,
            entry,
        });
    }

    fn alloc(&mut self, auto_release: bool) -> EventId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.state = EventState::Pending;
            slot.subscribers.clear();
            slot.watchers.clear();
            slot.composite = None;
            slot.auto_release = auto_release;
            slot.live = true;
            EventId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                state: EventState::Pending,
                subscribers: Vec::new(),
                watchers: SmallVec::new(),
                composite: None,
                auto_release,
                live: true,
            });
            EventId {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, id: EventId) -> Result<&Slot<T>, KernelError> {
        match self.slots.get(id.index as usize) {
            Some(s) if s.live && s.generation == id.generation => Ok(s),
            _ => Err(KernelError::StaleEvent(id)),
        }
    }

    fn slot_mut(&mut self, id: EventId) -> Result<&mut Slot<T>, KernelError> {
        match self.slots.get_mut(id.index as usize) {
            Some(s) if s.live && s.generation == id.generation => Ok(s),
            _ => Err(KernelError::StaleEvent(id)),
        }
    }

    // ── Event creation and triggering ────────────────────────────

    /// Create a pending event. The caller triggers it later with
    /// [`succeed`](Self::succeed) or [`fail`](Self::fail) and releases
    /// it with [`release`](Self::release) when done.
    pub fn event(&mut self) -> EventId {
        self.alloc(false)
    }

    /// Create an event that fires `Ok` after `delay` seconds and
    /// releases itself on delivery.
    pub fn timeout(&mut self, delay: f64) -> EventId {
        let id = self.alloc(true);
        // Triggered now so a double succeed() is caught.
        // Delivery happens at now + delay.
        if let Ok(slot) = self.slot_mut(id) {
            slot.state = EventState::Triggered;
        }
        let at = self.now + delay;
        self.push(at, Class::Normal, Entry::Deliver(id, Outcome::Ok));
        id
    }

    /// Trigger the event `Ok`. Delivery is queued at the current
    /// instant, after entries already queued for this instant.
    pub fn succeed(&mut self, id: EventId) -> Result<(), KernelError> {
        self.trigger(id, Outcome::Ok)
    }

    /// Trigger the event `Failed`.
    pub fn fail(&mut self, id: EventId) -> Result<(), KernelError> {
        self.trigger(id, Outcome::Failed)
    }

    fn trigger(&mut self, id: EventId, outcome: Outcome) -> Result<(), KernelError> {
        let slot = self.slot_mut(id)?;
        if slot.state != EventState::Pending {
            return Err(KernelError::AlreadyTriggered(id));
        }
        slot.state = EventState::Triggered;
        let now = self.now;
        self.push(now, Class::Normal, Entry::Deliver(id, outcome));
        Ok(())
    }

    /// Subscribe a token to the event. If the event already fired, the
    /// token is queued for immediate delivery with the recorded
    /// outcome.
    pub fn subscribe(&mut self, id: EventId, token: T) -> Result<(), KernelError> {
        let now = self.now;
        let slot = self.slot_mut(id)?;
        match slot.state {
            EventState::Fired(outcome) => {
                self.push(now, Class::Normal, Entry::Wake(token, outcome));
                Ok(())
            }
            _ => {
                slot.subscribers.push(token);
                Ok(())
            }
        }
    }

    /// True when the event has fired.
    pub fn is_fired(&self, id: EventId) -> bool {
        matches!(self.slot(id), Ok(s) if matches!(s.state, EventState::Fired(_)))
    }

    /// The fired outcome, if the event has fired.
    pub fn outcome_of(&self, id: EventId) -> Option<Outcome> {
        match self.slot(id) {
            Ok(s) => match s.state {
                EventState::Fired(o) => Some(o),
                _ => None,
            },
            Err(_) => None,
        }
    }

    /// Release the event's slot. Queued deliveries for it become
    /// stale and are skipped. No-op for already-stale handles.
    pub fn release(&mut self, id: EventId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.live && slot.generation == id.generation {
                slot.live = false;
                slot.generation = slot.generation.wrapping_add(1);
                slot.subscribers.clear();
                slot.watchers.clear();
                slot.composite = None;
                self.free.push(id.index);
            }
        }
    }

    // ── Direct wakes ─────────────────────────────────────────────

    /// Wake `token` after `delay` seconds.
    pub fn schedule(&mut self, delay: f64, token: T) {
        let at = self.now + delay;
        self.push(at, Class::Normal, Entry::Wake(token, Outcome::Ok));
    }

    /// Wake `token` after `delay` seconds, ahead of normal entries at
    /// the same instant.
    pub fn schedule_urgent(&mut self, delay: f64, token: T) {
        let at = self.now + delay;
        self.push(at, Class::Urgent, Entry::Wake(token, Outcome::Ok));
    }

    // ── Composite events ─────────────────────────────────────────

    /// An event that fires when the first of `children` fires, with
    /// that child's outcome. Fires `Ok` immediately when `children` is
    /// empty. Auto-releases on delivery.
    pub fn any_of(&mut self, children: &[EventId]) -> Result<EventId, KernelError> {
        let id = self.alloc(true);
        if let Ok(slot) = self.slot_mut(id) {
            slot.composite = Some(Composite::AnyOf);
        }
        let mut fired: Option<Outcome> = None;
        for &child in children {
            match self.slot(child)?.state {
                EventState::Fired(o) => {
                    fired = Some(o);
                    break;
                }
                _ => {}
            }
        }
        if children.is_empty() {
            fired = Some(Outcome::Ok);
        }
        if let Some(outcome) = fired {
            let slot = self.slot_mut(id)?;
            slot.state = EventState::Triggered;
            let now = self.now;
            self.push(now, Class::Normal, Entry::Deliver(id, outcome));
            return Ok(id);
        }
        for &child in children {
            self.slot_mut(child)?.watchers.push(id);
        }
        Ok(id)
    }

    /// An event that fires `Ok` once all `children` have fired `Ok`,
    /// or `Failed` as soon as any child fails. Fires `Ok` immediately
    /// when `children` is empty. Auto-releases on delivery.
    pub fn all_of(&mut self, children: &[EventId]) -> Result<EventId, KernelError> {
        let id = self.alloc(true);
        let mut remaining = 0usize;
        let mut failed = false;
        for &child in children {
            match self.slot(child)?.state {
                EventState::Fired(Outcome::Ok) => {}
                EventState::Fired(Outcome::Failed) => failed = true,
                _ => remaining += 1,
            }
        }
        if failed || remaining == 0 {
            let outcome = if failed { Outcome::Failed } else { Outcome::Ok };
            let slot = self.slot_mut(id)?;
            slot.state = EventState::Triggered;
            let now = self.now;
            self.push(now, Class::Normal, Entry::Deliver(id, outcome));
            return Ok(id);
        }
        if let Ok(slot) = self.slot_mut(id) {
            slot.composite = Some(Composite::AllOf { remaining });
        }
        for &child in children {
            match self.slot_mut(child) {
                Ok(s) if !matches!(s.state, EventState::Fired(_)) => s.watchers.push(id),
                _ => {}
            }
        }
        Ok(id)
    }

    // ── Advancing ────────────────────────────────────────────────

    /// The instant of the next live queue entry, discarding stale
    /// entries along the way. `None` when the queue is exhausted.
    pub fn peek_next_time(&mut self) -> Option<SimTime> {
        loop {
            let stale = match self.queue.peek() {
                None => return None,
                Some(item) => match &item.entry {
                    Entry::Wake(..) => return Some(item.time),
                    Entry::Deliver(id, _) => {
                        if self.slot(*id).is_ok() {
                            return Some(item.time);
                        }
                        true
                    }
                },
            };
            if stale {
                self.queue.pop();
            }
        }
    }

    /// Pop the next live queue entry, advance the clock to it, and
    /// return the tokens it wakes. `None` when the queue is exhausted.
    pub fn advance(&mut self) -> Option<Wakeup<T>> {
        loop {
            let item = self.queue.pop()?;
            debug_assert!(item.time >= self.now, "queue entry in the past");
            match item.entry {
                Entry::Wake(token, outcome) => {
                    self.now = item.time;
                    let mut fired = SmallVec::new();
                    fired.push(Fired { token, outcome });
                    return Some(Wakeup {
                        time: item.time,
                        fired,
                    });
                }
                Entry::Deliver(id, outcome) => {
                    if self.slot(id).is_err() {
                        // Released while queued.
                        continue;
                    }
                    self.now = item.time;
                    let fired = self.deliver(id, outcome);
                    return Some(Wakeup {
                        time: item.time,
                        fired,
                    });
                }
            }
        }
    }

    fn deliver(&mut self, id: EventId, outcome: Outcome) -> SmallVec<[Fired<T>; 4]> {
        let now = self.now;
        let (tokens, watchers, auto_release) = {
            let slot = match self.slot_mut(id) {
                Ok(s) => s,
                Err(_) => return SmallVec::new(),
            };
            slot.state = EventState::Fired(outcome);
            (
                std::mem::take(&mut slot.subscribers),
                std::mem::take(&mut slot.watchers),
                slot.auto_release,
            )
        };

        // Composite parents observe the child at delivery time; their
        // own delivery queues behind this one at the same instant.
        for watcher in watchers {
            let trigger = {
                let slot = match self.slot_mut(watcher) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if slot.state != EventState::Pending {
                    None
                } else {
                    match &mut slot.composite {
                        Some(Composite::AnyOf) => Some(outcome),
                        Some(Composite::AllOf { remaining }) => {
                            if outcome == Outcome::Failed {
                                Some(Outcome::Failed)
                            } else {
                                *remaining -= 1;
                                if *remaining == 0 {
                                    Some(Outcome::Ok)
                                } else {
                                    None
                                }
                            }
                        }
                        None => None,
                    }
                }
            };
            if let Some(parent_outcome) = trigger {
                if let Ok(slot) = self.slot_mut(watcher) {
                    slot.state = EventState::Triggered;
                }
                self.push(now, Class::Normal, Entry::Deliver(watcher, parent_outcome));
            }
        }

        if auto_release {
            self.release(id);
        }

        tokens
            .into_iter()
            .map(|token| Fired { token, outcome })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(kernel: &mut Kernel<u32>) -> Vec<(f64, u32, Outcome)> {
        let mut out = Vec::new();
        while let Some(wake) = kernel.advance() {
            for f in wake.fired {
                out.push((wake.time.0, f.token, f.outcome));
            }
        }
        out
    }

    #[test]
    fn timeouts_fire_in_time_order() {
        let mut k = Kernel::new();
        let a = k.timeout(5.0);
        let b = k.timeout(2.0);
        k.subscribe(a, 1).unwrap();
        k.subscribe(b, 2).unwrap();
        let fired = drain(&mut k);
        assert_eq!(
            fired,
            vec![(2.0, 2, Outcome::Ok), (5.0, 1, Outcome::Ok)]
        );
        assert_eq!(k.now(), girder_core::SimTime(5.0));
    }

    #[test]
    fn same_instant_fifo_order() {
        let mut k = Kernel::new();
        let a = k.timeout(1.0);
        let b = k.timeout(1.0);
        let c = k.timeout(1.0);
        k.subscribe(a, 1).unwrap();
        k.subscribe(b, 2).unwrap();
        k.subscribe(c, 3).unwrap();
        let order: Vec<u32> = drain(&mut k).into_iter().map(|(_, t, _)| t).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn urgent_beats_normal_at_same_instant() {
        let mut k = Kernel::new();
        k.schedule(1.0, 1);
        k.schedule_urgent(1.0, 2);
        let order: Vec<u32> = drain(&mut k).into_iter().map(|(_, t, _)| t).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn succeed_delivers_at_current_instant() {
        let mut k = Kernel::new();
        k.schedule(3.0, 99);
        let ev = k.event();
        k.subscribe(ev, 7).unwrap();
        k.succeed(ev).unwrap();
        // Delivery is queued, not synchronous.
        let first = k.advance().unwrap();
        assert_eq!(first.time, girder_core::SimTime(0.0));
        assert_eq!(first.fired[0].token, 7);
    }

    #[test]
    fn double_trigger_is_an_error() {
        let mut k: Kernel<u32> = Kernel::new();
        let ev = k.event();
        k.succeed(ev).unwrap();
        assert_eq!(k.fail(ev).unwrap_err(), KernelError::AlreadyTriggered(ev));
    }

    #[test]
    fn released_event_handle_goes_stale() {
        let mut k: Kernel<u32> = Kernel::new();
        let ev = k.event();
        k.release(ev);
        assert_eq!(k.succeed(ev).unwrap_err(), KernelError::StaleEvent(ev));
        // Slot recycling must not resurrect the old handle.
        let ev2 = k.event();
        assert_ne!(ev, ev2);
        assert_eq!(k.succeed(ev), Err(KernelError::StaleEvent(ev)));
    }

    #[test]
    fn released_delivery_is_skipped() {
        let mut k = Kernel::new();
        let ev = k.timeout(1.0);
        k.subscribe(ev, 1).unwrap();
        k.release(ev);
        k.schedule(2.0, 2);
        let fired = drain(&mut k);
        assert_eq!(fired, vec![(2.0, 2, Outcome::Ok)]);
    }

    #[test]
    fn subscribe_after_fire_wakes_immediately() {
        let mut k = Kernel::new();
        let ev = k.event();
        k.succeed(ev).unwrap();
        // Empty delivery (no subscribers yet).
        let first = k.advance().unwrap();
        assert!(first.fired.is_empty());
        k.subscribe(ev, 5).unwrap();
        let second = k.advance().unwrap();
        assert_eq!(second.fired[0].token, 5);
        assert_eq!(second.time, girder_core::SimTime(0.0));
    }

    #[test]
    fn any_of_fires_on_first_child() {
        let mut k = Kernel::new();
        let a = k.timeout(4.0);
        let b = k.timeout(2.0);
        let any = k.any_of(&[a, b]).unwrap();
        k.subscribe(any, 9).unwrap();
        let fired = drain(&mut k);
        let any_fire = fired.iter().find(|(_, t, _)| *t == 9).unwrap();
        assert_eq!(any_fire.0, 2.0);
        assert_eq!(any_fire.2, Outcome::Ok);
    }

    #[test]
    fn all_of_waits_for_every_child() {
        let mut k = Kernel::new();
        let a = k.timeout(4.0);
        let b = k.timeout(2.0);
        let all = k.all_of(&[a, b]).unwrap();
        k.subscribe(all, 9).unwrap();
        let fired = drain(&mut k);
        let all_fire = fired.iter().find(|(_, t, _)| *t == 9).unwrap();
        assert_eq!(all_fire.0, 4.0);
    }

    #[test]
    fn all_of_fails_fast() {
        let mut k = Kernel::new();
        let a = k.event();
        let b = k.timeout(10.0);
        let all = k.all_of(&[a, b]).unwrap();
        k.subscribe(all, 9).unwrap();
        k.fail(a).unwrap();
        let fired = drain(&mut k);
        let all_fire = fired.iter().find(|(_, t, _)| *t == 9).unwrap();
        assert_eq!(all_fire.0, 0.0);
        assert_eq!(all_fire.2, Outcome::Failed);
    }

    #[test]
    fn empty_composites_fire_immediately() {
        let mut k = Kernel::new();
        let any = k.any_of(&[]).unwrap();
        let all = k.all_of(&[]).unwrap();
        k.subscribe(any, 1).unwrap();
        k.subscribe(all, 2).unwrap();
        let order: Vec<u32> = drain(&mut k).into_iter().map(|(_, t, _)| t).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn peek_skips_stale_entries() {
        let mut k: Kernel<u32> = Kernel::new();
        let ev = k.timeout(1.0);
        k.release(ev);
        k.schedule(3.0, 1);
        assert_eq!(k.peek_next_time(), Some(girder_core::SimTime(3.0)));
    }

    #[test]
    fn clock_never_runs_backwards() {
        let mut k = Kernel::new();
        k.schedule(5.0, 1);
        k.schedule(1.0, 2);
        k.schedule(3.0, 3);
        let mut last = 0.0f64;
        while let Some(w) = k.advance() {
            assert!(w.time.0 >= last);
            last = w.time.0;
        }
    }

    proptest::proptest! {
        #[test]
        fn wakes_are_time_ordered_and_replayable(
            delays in proptest::collection::vec(0.0f64..100.0, 1..40)
        ) {
            let run = |delays: &[f64]| {
                let mut k = Kernel::new();
                for (i, &d) in delays.iter().enumerate() {
                    k.schedule(d, i as u32);
                }
                drain(&mut k)
            };
            let fired = run(&delays);
            proptest::prop_assert_eq!(fired.len(), delays.len());
            for pair in fired.windows(2) {
                proptest::prop_assert!(pair[0].0 <= pair[1].0);
                // Ties break by insertion order.
                if pair[0].0 == pair[1].0 {
                    proptest::prop_assert!(pair[0].1 < pair[1].1);
                }
            }
            proptest::prop_assert_eq!(fired, run(&delays));
        }
    }
}
