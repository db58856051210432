//! Core simulation world and coordination logic.
//!
//! `SimWorld` owns the virtual clock and the pending-wake queue and provides
//! the two suspension primitives node processes are allowed to use: an
//! unconditional delay ([`SimWorld::sleep`]) and an interruptible observation
//! countdown ([`SimWorld::sense`]). All mutable state lives behind a single
//! `Rc<RefCell<_>>`; nodes hold [`WeakSimWorld`] handles so the world can be
//! dropped without reference cycles.
//!
//! Time only moves inside [`SimWorld::step`], which executes the earliest
//! pending wake. Wakes scheduled for the same instant fire in scheduling
//! order, so a run is fully determined by its seed and construction order.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::{Rc, Weak},
    task::Waker,
    time::Duration,
};

use crate::{
    error::{SimError, SimResult},
    events::{EventQueue, ScheduledWake},
    rng::{reset_sim_rng, set_sim_seed},
    sleep::{SenseFuture, SleepFuture},
};

#[derive(Debug)]
struct SimInner {
    current_time: Duration,
    queue: EventQueue,
    next_sequence: u64,

    // Task management for the sleep/sense futures
    next_task_id: u64,
    task_wakers: HashMap<u64, Waker>,
    awakened_tasks: HashSet<u64>,

    // Tasks currently suspended on an interruptible wait, and the subset
    // whose interruption has been delivered but not yet observed.
    interruptible_tasks: HashSet<u64>,
    interrupted_tasks: HashSet<u64>,

    wakes_delivered: u64,
    waker_registrations: u64,
    events_processed: u64,
}

impl SimInner {
    fn new() -> Self {
        Self {
            current_time: Duration::ZERO,
            queue: EventQueue::new(),
            next_sequence: 0,
            next_task_id: 0,
            task_wakers: HashMap::new(),
            awakened_tasks: HashSet::new(),
            interruptible_tasks: HashSet::new(),
            interrupted_tasks: HashSet::new(),
            wakes_delivered: 0,
            waker_registrations: 0,
            events_processed: 0,
        }
    }
}

/// The central simulation coordinator managing virtual time and wake
/// processing.
#[derive(Debug)]
pub struct SimWorld {
    inner: Rc<RefCell<SimInner>>,
}

impl SimWorld {
    /// Creates a simulation world seeded with 0.
    pub fn new() -> Self {
        Self::new_with_seed(0)
    }

    /// Creates a simulation world with a specific seed.
    ///
    /// Resets the thread-local RNG before seeding so consecutive runs on the
    /// same thread do not leak state into each other.
    pub fn new_with_seed(seed: u64) -> Self {
        reset_sim_rng();
        set_sim_seed(seed);

        Self {
            inner: Rc::new(RefCell::new(SimInner::new())),
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.inner.borrow().current_time
    }

    /// Creates a weak handle to this world for nodes and futures to hold.
    pub fn downgrade(&self) -> WeakSimWorld {
        WeakSimWorld {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Executes the earliest pending wake and advances time to it.
    ///
    /// Returns `true` if more wakes remain afterwards.
    pub fn step(&mut self) -> bool {
        let mut inner = self.inner.borrow_mut();

        if let Some(wake) = inner.queue.pop_earliest() {
            inner.current_time = wake.time();
            inner.events_processed += 1;

            let task_id = wake.task_id();
            inner.awakened_tasks.insert(task_id);
            if let Some(waker) = inner.task_wakers.remove(&task_id) {
                inner.wakes_delivered += 1;
                waker.wake();
            }

            !inner.queue.is_empty()
        } else {
            false
        }
    }

    /// Processes wakes until the queue would advance past `horizon`.
    ///
    /// Wakes scheduled at exactly `horizon` are not executed, matching the
    /// campaign-driver contract of running *to* a time horizon. Only usable
    /// when no cooperative tasks are involved; the campaign driver interleaves
    /// [`SimWorld::step`] with task yields instead.
    pub fn run_until(&mut self, horizon: Duration) {
        while matches!(self.next_wake_time(), Some(t) if t < horizon) {
            self.step();
        }
    }

    /// Time of the earliest pending wake, if any.
    pub fn next_wake_time(&self) -> Option<Duration> {
        self.inner.borrow().queue.peek_time()
    }

    /// Returns `true` if wakes are waiting to be processed.
    pub fn has_pending_events(&self) -> bool {
        !self.inner.borrow().queue.is_empty()
    }

    /// Number of wakes waiting to be processed.
    pub fn pending_event_count(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Number of wakes executed since the world was created.
    pub fn events_processed(&self) -> u64 {
        self.inner.borrow().events_processed
    }

    /// Monotone counter of scheduler activity: wakes delivered, wakes
    /// scheduled and wakers registered.
    ///
    /// The campaign driver uses this to detect quiescence: when a yield round
    /// leaves the token unchanged, every runnable task has reached its next
    /// suspension point and it is safe to advance time.
    pub fn progress_token(&self) -> u64 {
        let inner = self.inner.borrow();
        inner.wakes_delivered + inner.next_sequence + inner.waker_registrations
    }

    /// Suspends the calling task for `duration` of virtual time.
    pub fn sleep(&self, duration: Duration) -> SleepFuture {
        let task_id = {
            let mut inner = self.inner.borrow_mut();
            let task_id = inner.next_task_id;
            inner.next_task_id += 1;
            task_id
        };
        self.schedule_wake(task_id, duration);
        SleepFuture::new(self.downgrade(), task_id)
    }

    /// Starts an interruptible countdown of `slots` observation slots of
    /// `slot_duration` each.
    ///
    /// The returned future resolves to [`crate::sleep::SenseOutcome::Elapsed`]
    /// once every slot has been counted down, or to
    /// [`crate::sleep::SenseOutcome::Interrupted`] carrying the number of
    /// slots not yet consumed (a partially elapsed slot counts as not
    /// consumed). A zero-slot countdown completes immediately.
    pub fn sense(&self, slots: u32, slot_duration: Duration) -> SenseFuture {
        let task_id = {
            let mut inner = self.inner.borrow_mut();
            let task_id = inner.next_task_id;
            inner.next_task_id += 1;
            inner.interruptible_tasks.insert(task_id);
            task_id
        };
        if slots > 0 {
            self.schedule_wake(task_id, slot_duration);
        }
        SenseFuture::new(self.downgrade(), task_id, slots, slot_duration)
    }

    /// Interrupts the task `task_id` if it is suspended on an interruptible
    /// wait; otherwise this is a no-op.
    ///
    /// Idempotent: interrupting an already interrupted or completed wait has
    /// no further effect.
    pub fn interrupt(&self, task_id: u64) {
        let mut inner = self.inner.borrow_mut();
        if !inner.interruptible_tasks.contains(&task_id) {
            return;
        }
        inner.interrupted_tasks.insert(task_id);
        if let Some(waker) = inner.task_wakers.remove(&task_id) {
            inner.wakes_delivered += 1;
            waker.wake();
        }
    }

    fn schedule_wake(&self, task_id: u64, delay: Duration) {
        let mut inner = self.inner.borrow_mut();
        let time = inner.current_time + delay;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.queue.schedule(ScheduledWake::new(time, task_id, sequence));
    }

    pub(crate) fn schedule_next_slot(&self, task_id: u64, slot_duration: Duration) {
        self.schedule_wake(task_id, slot_duration);
    }

    pub(crate) fn register_task_waker(&self, task_id: u64, waker: Waker) {
        let mut inner = self.inner.borrow_mut();
        inner.waker_registrations += 1;
        inner.task_wakers.insert(task_id, waker);
    }

    /// Consumes the awake flag for `task_id`, returning whether it was set.
    pub(crate) fn take_awake(&self, task_id: u64) -> bool {
        self.inner.borrow_mut().awakened_tasks.remove(&task_id)
    }

    /// Consumes the interrupted flag for `task_id`, returning whether it was
    /// set.
    pub(crate) fn take_interrupted(&self, task_id: u64) -> bool {
        self.inner.borrow_mut().interrupted_tasks.remove(&task_id)
    }

    pub(crate) fn end_interruptible(&self, task_id: u64) {
        let mut inner = self.inner.borrow_mut();
        inner.interruptible_tasks.remove(&task_id);
        inner.task_wakers.remove(&task_id);
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Weak handle to a [`SimWorld`].
///
/// Held by node processes and suspension futures; upgrading fails with
/// [`SimError::WorldDropped`] once the world is gone.
#[derive(Debug, Clone)]
pub struct WeakSimWorld {
    inner: Weak<RefCell<SimInner>>,
}

impl WeakSimWorld {
    /// Upgrades to a strong handle.
    pub fn upgrade(&self) -> SimResult<SimWorld> {
        self.inner
            .upgrade()
            .map(|inner| SimWorld { inner })
            .ok_or(SimError::WorldDropped)
    }

    /// Current simulation time, or an error if the world is gone.
    pub fn now(&self) -> SimResult<Duration> {
        Ok(self.upgrade()?.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_starts_at_zero_and_advances_per_wake() {
        let mut sim = SimWorld::new();
        assert_eq!(sim.now(), Duration::ZERO);

        let _ = sim.sleep(Duration::from_micros(100));
        let _ = sim.sleep(Duration::from_micros(50));

        assert!(sim.step());
        assert_eq!(sim.now(), Duration::from_micros(50));
        assert!(!sim.step());
        assert_eq!(sim.now(), Duration::from_micros(100));
    }

    #[test]
    fn run_until_stops_before_horizon() {
        let mut sim = SimWorld::new();
        let _ = sim.sleep(Duration::from_micros(10));
        let _ = sim.sleep(Duration::from_micros(20));
        let _ = sim.sleep(Duration::from_micros(30));

        sim.run_until(Duration::from_micros(30));
        assert_eq!(sim.now(), Duration::from_micros(20));
        assert_eq!(sim.pending_event_count(), 1);
    }

    #[test]
    fn interrupt_unknown_task_is_noop() {
        let sim = SimWorld::new();
        sim.interrupt(12345);
        assert_eq!(sim.pending_event_count(), 0);
    }

    #[test]
    fn upgrade_after_drop_fails() {
        let weak = SimWorld::new().downgrade();
        assert!(matches!(weak.upgrade(), Err(SimError::WorldDropped)));
    }
}
