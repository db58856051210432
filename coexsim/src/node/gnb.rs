//! Cellular (gNB) node process implementing the six LBT strategies.
//!
//! A gNB runs two perpetual tasks: the synchronization-slot counter, which
//! keeps the next boundary timestamp after an initial desynchronization
//! delay, and the contention loop, which cycles through prioritization,
//! gap/backoff/CR phases and transmission until the driver stops stepping.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::{
    SimResult, WeakSimWorld,
    channel::{Channel, Family},
    config::{BackoffSplit, GapMode, GnbConfig, LbtStrategy, SimConfig},
    contention::{BackoffPolicy, NodeStats, StatsHandle, draw_backoff},
    node::node_log,
    rng::{sim_random_bool, sim_random_choice, sim_random_exp},
    sleep::SenseOutcome,
};

/// Ending sub-frame choices for partial-ending transmissions.
const LAST_SUBFRAME_SLOTS: [u32; 7] = [3, 6, 9, 10, 11, 12, 14];

/// A cellular unlicensed-band base station contending for the medium.
pub struct Gnb {
    id: u32,
    sim: WeakSimWorld,
    channel: Channel,
    global: SimConfig,
    config: GnbConfig,
    stats: StatsHandle,
    /// Next synchronization-slot boundary, shared with the counter task.
    boundary: Rc<Cell<Duration>>,
    desync: Duration,
    n: u32,
    failures_in_row: u32,
    backoff_interrupts: u32,
    retransmissions: u32,
    /// Boundary marked for skipping after a successful transmission.
    skip: Option<Duration>,
    /// Set when a CR phase ran out of slots and the attempt is postponed.
    cr_postponed: bool,
    traced: bool,
}

impl Gnb {
    /// Builds a gNB, validating its configuration.
    pub fn new(
        id: u32,
        sim: WeakSimWorld,
        channel: Channel,
        global: SimConfig,
        config: GnbConfig,
        desync: Duration,
    ) -> SimResult<Self> {
        config.validate()?;
        let traced = global.is_traced(id);
        Ok(Self {
            id,
            sim,
            channel,
            global,
            config,
            stats: Rc::new(std::cell::RefCell::new(NodeStats::default())),
            boundary: Rc::new(Cell::new(desync)),
            desync,
            n: 0,
            failures_in_row: 0,
            backoff_interrupts: 0,
            retransmissions: 0,
            skip: None,
            cr_postponed: false,
            traced,
        })
    }

    /// Shared handle to this node's counters.
    pub fn stats(&self) -> StatsHandle {
        Rc::clone(&self.stats)
    }

    /// Spawns the node's tasks on the current `LocalSet`.
    pub fn spawn(self) {
        tokio::task::spawn_local(self.run());
    }

    async fn run(mut self) {
        self.spawn_sync_slot_counter();
        if let Err(error) = self.contention_loop().await {
            tracing::error!(node = self.id, %error, "gNB process terminated");
        }
    }

    fn spawn_sync_slot_counter(&self) {
        let sim = self.sim.clone();
        let boundary = Rc::clone(&self.boundary);
        let desync = self.desync;
        let sync_slot = self.config.sync_slot;
        let id = self.id;
        tokio::task::spawn_local(async move {
            if let Err(error) = sync_slot_counter(sim, boundary, desync, sync_slot).await {
                tracing::error!(node = id, %error, "sync slot counter terminated");
            }
        });
    }

    async fn sleep(&self, duration: Duration) -> SimResult<()> {
        self.sim.upgrade()?.sleep(duration).await
    }

    fn now(&self) -> SimResult<Duration> {
        self.sim.now()
    }

    fn medium_busy(&self) -> SimResult<bool> {
        Ok(!self.channel.time_until_idle()?.is_zero())
    }

    fn draw_backoff(&mut self) -> SimResult<u32> {
        let policy = match &self.config.strategy {
            LbtStrategy::DeterministicBackoff(params) => BackoffPolicy::Deterministic(*params),
            _ => BackoffPolicy::Exponential {
                cw_min: self.config.priority_class.cw_min,
                cw_max: self.config.priority_class.cw_max,
            },
        };
        let now = self.now()?;
        Ok(draw_backoff(
            policy,
            self.failures_in_row,
            &mut self.backoff_interrupts,
            now,
        ))
    }

    async fn contention_loop(&mut self) -> SimResult<()> {
        loop {
            node_log!(self, "begins new transmission procedure");
            if let Some(rate) = self.config.arrival_rate {
                let gap = Duration::from_secs_f64(sim_random_exp(rate) * 1e-3);
                self.sleep(gap).await?;
            }

            let mut was_sent = false;
            while !was_sent {
                self.n = self.draw_backoff()?;
                node_log!(self, n = self.n, "drew a backoff counter");

                // Backoff + LBT: repeat the prioritization/gap/backoff phase
                // until the counter reaches zero.
                loop {
                    self.wait_prioritization_period().await?;
                    node_log!(self, "prioritization period finished");

                    if matches!(
                        self.config.strategy,
                        LbtStrategy::Gap(GapMode::Before) | LbtStrategy::Gap(GapMode::Inside)
                    ) {
                        self.wait_gap_period().await?;
                    }

                    // Inside-gap already served the backoff in the gap middle.
                    if !matches!(self.config.strategy, LbtStrategy::Gap(GapMode::Inside)) {
                        if self.n == 0
                            && matches!(self.config.strategy, LbtStrategy::Gap(GapMode::Before))
                            && self.medium_busy()?
                        {
                            node_log!(self, "no backoff left but medium busy, restarting");
                            continue;
                        }
                        self.wait_random_backoff().await?;
                    }

                    if self.n == 0 {
                        break;
                    }
                    node_log!(self, remaining = self.n, "backoff frozen, medium busy");
                }

                if self.config.strategy.cr_params().is_some() {
                    let remaining_cr = self.wait_cr_slots().await?;
                    if remaining_cr > 0 {
                        self.failures_in_row += 1;
                        self.cr_postponed = true;
                    }
                } else {
                    if matches!(
                        self.config.strategy,
                        LbtStrategy::Gap(GapMode::After) | LbtStrategy::Gap(GapMode::AfterWithCca)
                    ) {
                        self.wait_gap_period().await?;
                    }
                    if matches!(
                        self.config.strategy,
                        LbtStrategy::Gap(GapMode::AfterWithCca) | LbtStrategy::Gap(GapMode::Inside)
                    ) && self.medium_busy()?
                    {
                        node_log!(self, "medium busy after gap period, aborting attempt");
                        continue;
                    }
                }

                if self.cr_postponed {
                    self.cr_postponed = false;
                    node_log!(self, "CR phase exhausted, postponing to next boundary");
                    let wait = self.boundary.get().saturating_sub(self.now()?);
                    self.sleep(wait).await?;
                    continue;
                }

                let now = self.now()?;
                if (self.config.skip_next_slot_boundary && self.skip == Some(now))
                    || (self.config.skip_next_txop && self.skip.is_some())
                {
                    self.skip = None;
                    node_log!(self, "skipping this transmission opportunity");
                    self.sleep(self.config.sync_slot).await?;
                    continue;
                }

                self.sleep(self.global.cca_tx_switch).await?;

                let (reservation, airtime) = self.next_transmission()?;
                self.stats.borrow_mut().note_tx_start(self.now()?);
                node_log!(
                    self,
                    ?reservation,
                    ?airtime,
                    "occupying the medium"
                );
                let record = self
                    .channel
                    .occupy(Family::Gnb, reservation, airtime, self.retransmissions)
                    .await?;
                was_sent = !record.collided;

                if was_sent {
                    node_log!(self, "transmission successful");
                    self.stats
                        .borrow_mut()
                        .record_success(record.start, record.end, record.airtime);
                    self.failures_in_row = 0;
                    self.retransmissions = 0;
                    if self.config.skip_next_slot_boundary || self.config.skip_next_txop {
                        self.skip = Some(self.boundary.get());
                    }
                } else {
                    node_log!(self, "transmission collided");
                    self.failures_in_row += 1;
                    self.retransmissions += 1;
                    if self.retransmissions > self.config.retry_limit {
                        // Frame discarded; the next attempt carries a fresh one.
                        self.retransmissions = 0;
                        self.failures_in_row = 0;
                    }
                }
                self.stats.borrow_mut().record_attempt(record.airtime);
            }
        }
    }

    /// Prioritization period: deter wait plus `m` sensed slots, restarted
    /// from the idle wait whenever the medium turns busy.
    async fn wait_prioritization_period(&mut self) -> SimResult<()> {
        let m = self.config.priority_class.m;
        let mut remaining = m;
        while remaining > 0 {
            self.channel.wait_until_idle().await?;
            self.sleep(self.config.deter_period).await?;

            if self.medium_busy()? {
                node_log!(self, "medium busy after deter period, starting over");
                continue;
            }

            remaining = match self
                .channel
                .sense_slots(Family::Gnb, m, self.global.observation_slot)
                .await?
            {
                SenseOutcome::Elapsed => 0,
                SenseOutcome::Interrupted { remaining } => {
                    node_log!(self, remaining, "prioritization sensing interrupted");
                    remaining
                }
            };
        }
        Ok(())
    }

    /// Length of the gap aligning the transmission with the next
    /// synchronization boundary, grown by whole slots while the remaining
    /// backoff would overrun it.
    fn gap_length(&self) -> SimResult<Duration> {
        let slot_ns = self.global.observation_slot.as_nanos() as i128;
        let backoff_ns = i128::from(self.n) * slot_ns;
        let to_boundary_ns =
            self.boundary.get().as_nanos() as i128 - self.now()?.as_nanos() as i128;

        let mut gap_ns = to_boundary_ns - backoff_ns;
        while gap_ns < 0 {
            // Backoff too long for the next slot; aim one slot later.
            gap_ns += slot_ns;
        }
        Ok(Duration::from_nanos(gap_ns as u64))
    }

    /// Waits the gap period; the INSIDE variant halves it and performs the
    /// backoff in the middle, consuming the second half only when the
    /// backoff fully completed.
    async fn wait_gap_period(&mut self) -> SimResult<()> {
        let gap = self.gap_length()?;
        node_log!(self, ?gap, "waiting the gap period");

        if !matches!(self.config.strategy, LbtStrategy::Gap(GapMode::Inside)) {
            self.sleep(gap).await?;
        } else {
            self.sleep(gap / 2).await?;
            node_log!(self, n = self.n, "backoff in the middle of the gap");
            self.wait_random_backoff().await?;
            if self.n == 0 {
                self.sleep(gap / 2).await?;
            }
        }
        Ok(())
    }

    /// Counts down the backoff as an interruptible sensing operation; for the
    /// DURING gap variant, part of the counter is served after the gap.
    async fn wait_random_backoff(&mut self) -> SimResult<()> {
        if self.medium_busy()? {
            return Ok(());
        }

        let during_split = match &self.config.strategy {
            LbtStrategy::Gap(GapMode::During { split }) => Some(*split),
            _ => None,
        };
        let slots_to_wait = match during_split {
            Some(BackoffSplit::Fixed(leave)) => self.n.saturating_sub(leave),
            Some(BackoffSplit::Proportional(fraction)) => {
                let leave = (fraction * f64::from(self.n)).ceil() as u32;
                self.n.saturating_sub(leave)
            }
            None => self.n,
        };

        let outcome = self.sense_backoff(slots_to_wait).await?;
        match (during_split, outcome) {
            (Some(_), SenseOutcome::Elapsed) => {
                node_log!(self, "first backoff part done, inserting gap");
                let gap = self.gap_length()?;
                self.sleep(gap).await?;
                let left = self.n - slots_to_wait;
                node_log!(self, left, "serving remaining backoff after the gap");
                if self.medium_busy()? {
                    self.n = left;
                    return Ok(());
                }
                self.n = match self.sense_backoff(left).await? {
                    SenseOutcome::Elapsed => 0,
                    SenseOutcome::Interrupted { remaining } => remaining,
                };
            }
            (Some(_), SenseOutcome::Interrupted { remaining }) => {
                self.n = remaining + self.n - slots_to_wait;
            }
            (None, SenseOutcome::Elapsed) => self.n = 0,
            (None, SenseOutcome::Interrupted { remaining }) => self.n = remaining,
        }
        Ok(())
    }

    async fn sense_backoff(&mut self, slots: u32) -> SimResult<SenseOutcome> {
        let outcome = self
            .channel
            .sense_slots(Family::Gnb, slots, self.global.observation_slot)
            .await?;
        if matches!(outcome, SenseOutcome::Interrupted { .. }) {
            self.backoff_interrupts += 1;
        }
        Ok(outcome)
    }

    /// Runs the cognitive-radio slots; returns how many were left unserved.
    ///
    /// Each CR slot opens with a short mandatory reservation signal, then
    /// either transmits a longer reservation signal (with the configured
    /// probability) or senses the slot remainder; a busy sense aborts the
    /// phase. When every slot completes clear, the medium is held by a
    /// reservation signal until the next boundary.
    async fn wait_cr_slots(&mut self) -> SimResult<u32> {
        let (params, forced_slots, rs_in_first_slot) = match &self.config.strategy {
            LbtStrategy::CrLbt(p) => (*p, None, false),
            LbtStrategy::ExtendedCrLbt(p) => (*p, None, true),
            LbtStrategy::GeneralizedCrLbt {
                params,
                num_cr_slots,
            } => (*params, Some(*num_cr_slots), true),
            _ => return Ok(0),
        };

        let to_boundary = self.boundary.get().saturating_sub(self.now()?);
        let mut k = match forced_slots {
            Some(n) => n,
            None => (to_boundary.as_nanos() / params.slot.as_nanos()) as u32,
        };
        node_log!(self, k, "starting CR slots");

        let first_slot_rs_prob = if rs_in_first_slot {
            params.prob_rs_first_slot
        } else {
            0.0
        };
        let mut first = true;
        let mut sensed_idle = true;

        while k > 0 {
            self.channel
                .hold_reservation(Family::Gnb, params.reserve)
                .await?;

            let p = if first {
                first_slot_rs_prob
            } else {
                params.prob_rs_next_slots
            };
            let remainder = params.slot - params.reserve;

            if sim_random_bool(p) {
                node_log!(self, k, "transmitting RS for the CR slot remainder");
                self.channel
                    .hold_reservation(Family::Gnb, remainder)
                    .await?;
            } else {
                node_log!(self, k, "sensing the CR slot remainder");
                sensed_idle = self.channel.sense_clear(Family::Gnb, remainder).await?;
                if !sensed_idle {
                    node_log!(self, k, "CR sense found the medium busy");
                    break;
                }
            }

            k -= 1;
            first = false;
        }

        if sensed_idle {
            let hold = self.boundary.get().saturating_sub(self.now()?);
            node_log!(self, ?hold, "holding the medium until the boundary");
            self.channel.hold_reservation(Family::Gnb, hold).await?;
        }
        Ok(k)
    }

    /// Sizes the next data transmission and its reservation portion.
    fn next_transmission(&self) -> SimResult<(Duration, Duration)> {
        let mcot = self.config.priority_class.mcot;
        let airtime = if self.config.partial_ending_subframes {
            let last_slot = sim_random_choice(&LAST_SUBFRAME_SLOTS);
            mcot - self.config.sync_slot + self.config.sync_slot / 14 * last_slot
        } else {
            mcot
        };

        if self.config.strategy.uses_reservation() {
            let reservation = self.boundary.get().saturating_sub(self.now()?);
            Ok((reservation, airtime.saturating_sub(reservation)))
        } else {
            Ok((Duration::ZERO, airtime))
        }
    }
}

/// Perpetual per-gNB process advancing the next-boundary timestamp.
async fn sync_slot_counter(
    sim: WeakSimWorld,
    boundary: Rc<Cell<Duration>>,
    desync: Duration,
    sync_slot: Duration,
) -> SimResult<()> {
    tracing::trace!(?desync, "sync slot counter desynchronizing");
    sim.upgrade()?.sleep(desync).await?;
    loop {
        boundary.set(boundary.get() + sync_slot);
        sim.upgrade()?.sleep(sync_slot).await?;
    }
}
