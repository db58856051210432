//! Suspension primitives: plain sleeps and interruptible sensing waits.
//!
//! Both futures integrate with the wake queue owned by
//! [`SimWorld`](crate::SimWorld): the world schedules a wake, the future
//! registers its waker and returns `Poll::Pending` until the wake (or an
//! interruption) is delivered.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::{SimResult, WeakSimWorld};

/// Future that completes after a fixed amount of virtual time.
///
/// Created by [`SimWorld::sleep`](crate::SimWorld::sleep); resumes exactly at
/// the scheduled instant.
pub struct SleepFuture {
    sim: WeakSimWorld,
    task_id: u64,
    completed: bool,
}

impl SleepFuture {
    pub(crate) fn new(sim: WeakSimWorld, task_id: u64) -> Self {
        Self {
            sim,
            task_id,
            completed: false,
        }
    }
}

impl Future for SleepFuture {
    type Output = SimResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(()));
        }

        let sim = match self.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        if sim.take_awake(self.task_id) {
            self.completed = true;
            Poll::Ready(Ok(()))
        } else {
            sim.register_task_waker(self.task_id, cx.waker().clone());
            Poll::Pending
        }
    }
}

/// How an interruptible sensing wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseOutcome {
    /// Every observation slot was counted down with the medium quiet.
    Elapsed,
    /// A transmission or reservation signal started mid-countdown; carries
    /// the number of slots not yet consumed.
    Interrupted {
        /// Slots that had not fully elapsed when the interruption arrived.
        remaining: u32,
    },
}

/// Future counting down observation slots until elapse or interruption.
///
/// Created by [`SimWorld::sense`](crate::SimWorld::sense). The countdown is
/// slot-granular: an interruption arriving partway through a slot reports
/// that slot as not consumed.
pub struct SenseFuture {
    sim: WeakSimWorld,
    task_id: u64,
    slots_remaining: u32,
    slot_duration: Duration,
    completed: bool,
}

impl SenseFuture {
    pub(crate) fn new(
        sim: WeakSimWorld,
        task_id: u64,
        slots: u32,
        slot_duration: Duration,
    ) -> Self {
        Self {
            sim,
            task_id,
            slots_remaining: slots,
            slot_duration,
            completed: false,
        }
    }

    /// Identifier under which this wait can be interrupted.
    pub fn id(&self) -> u64 {
        self.task_id
    }
}

impl Future for SenseFuture {
    type Output = SimResult<SenseOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed {
            return Poll::Ready(Ok(if self.slots_remaining == 0 {
                SenseOutcome::Elapsed
            } else {
                SenseOutcome::Interrupted {
                    remaining: self.slots_remaining,
                }
            }));
        }

        let sim = match self.sim.upgrade() {
            Ok(sim) => sim,
            Err(e) => return Poll::Ready(Err(e)),
        };

        if sim.take_interrupted(self.task_id) {
            // Consume a simultaneous elapse, if any; interruption wins.
            let _ = sim.take_awake(self.task_id);
            sim.end_interruptible(self.task_id);
            self.completed = true;
            return Poll::Ready(Ok(SenseOutcome::Interrupted {
                remaining: self.slots_remaining,
            }));
        }

        if self.slots_remaining == 0 {
            sim.end_interruptible(self.task_id);
            self.completed = true;
            return Poll::Ready(Ok(SenseOutcome::Elapsed));
        }

        if sim.take_awake(self.task_id) {
            self.slots_remaining -= 1;
            if self.slots_remaining == 0 {
                sim.end_interruptible(self.task_id);
                self.completed = true;
                return Poll::Ready(Ok(SenseOutcome::Elapsed));
            }
            sim.schedule_next_slot(self.task_id, self.slot_duration);
        }

        sim.register_task_waker(self.task_id, cx.waker().clone());
        Poll::Pending
    }
}
