//! WiFi access-point node process: DIFS-paced CSMA/CA with an optional
//! deterministic-backoff mode.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::{
    SimResult, WeakSimWorld,
    channel::{Channel, Family},
    config::{ApConfig, SimConfig},
    contention::{BackoffPolicy, NodeStats, StatsHandle, draw_backoff},
    node::node_log,
    rng::sim_random_exp,
    sleep::SenseOutcome,
    times::FrameTimes,
};

/// A WiFi access point contending for the medium with CSMA/CA.
pub struct Ap {
    id: u32,
    sim: WeakSimWorld,
    channel: Channel,
    global: SimConfig,
    config: ApConfig,
    times: FrameTimes,
    stats: StatsHandle,
    n: u32,
    failures_in_row: u32,
    backoff_interrupts: u32,
    retransmissions: u32,
    traced: bool,
}

impl Ap {
    /// Builds an AP, validating its configuration and PHY parameters.
    pub fn new(
        id: u32,
        sim: WeakSimWorld,
        channel: Channel,
        global: SimConfig,
        config: ApConfig,
    ) -> SimResult<Self> {
        config.validate()?;
        let times = FrameTimes::new(
            global.data_size,
            config.mcs,
            config.aifsn,
            config.standard,
            config.nss,
        )?;
        let traced = global.is_traced(id);
        Ok(Self {
            id,
            sim,
            channel,
            global,
            config,
            times,
            stats: Rc::new(RefCell::new(NodeStats::default())),
            n: 0,
            failures_in_row: 0,
            backoff_interrupts: 0,
            retransmissions: 0,
            traced,
        })
    }

    /// Shared handle to this node's counters.
    pub fn stats(&self) -> StatsHandle {
        Rc::clone(&self.stats)
    }

    /// Spawns the node's task on the current `LocalSet`.
    pub fn spawn(self) {
        tokio::task::spawn_local(self.run());
    }

    async fn run(mut self) {
        if let Err(error) = self.contention_loop().await {
            tracing::error!(node = self.id, %error, "AP process terminated");
        }
    }

    async fn sleep(&self, duration: Duration) -> SimResult<()> {
        self.sim.upgrade()?.sleep(duration).await
    }

    fn draw_backoff(&mut self) -> SimResult<u32> {
        let policy = match &self.config.deterministic_backoff {
            Some(params) => BackoffPolicy::Deterministic(*params),
            None => BackoffPolicy::Exponential {
                cw_min: self.config.cw_min,
                cw_max: self.config.cw_max,
            },
        };
        Ok(draw_backoff(
            policy,
            self.failures_in_row,
            &mut self.backoff_interrupts,
            self.sim.now()?,
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

                // CSMA/CA: DIFS before every (re)start of the backoff, until
                // the counter reaches zero.
                loop {
                    self.sleep(self.times.difs()).await?;
                    self.wait_random_backoff().await?;

                    if self.n == 0 {
                        self.sleep(self.global.cca_tx_switch).await?;
                        break;
                    }
                    node_log!(self, remaining = self.n, "backoff frozen, medium busy");
                }

                let airtime = self.times.ppdu_frame_time(self.config.n_ampdu);
                self.stats.borrow_mut().note_tx_start(self.sim.now()?);
                node_log!(self, ?airtime, "occupying the medium");
                let record = self
                    .channel
                    .occupy(Family::Ap, Duration::ZERO, airtime, self.retransmissions)
                    .await?;
                was_sent = !record.collided;

                if was_sent {
                    self.sleep(self.times.ack_frame_time()).await?;
                    node_log!(self, "transmission successful");
                    self.stats
                        .borrow_mut()
                        .record_success(record.start, record.end, record.airtime);
                    self.failures_in_row = 0;
                    self.retransmissions = 0;
                    self.channel.add_bytes_sent(self.global.data_size as u64);
                } else {
                    node_log!(self, "transmission collided");
                    self.failures_in_row += 1;
                    self.retransmissions += 1;
                    self.sleep(FrameTimes::ACK_TIMEOUT).await?;
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

    /// Counts down the backoff as an interruptible sensing operation,
    /// leaving the counter untouched when the medium is already busy.
    async fn wait_random_backoff(&mut self) -> SimResult<()> {
        if !self.channel.time_until_idle()?.is_zero() {
            return Ok(());
        }

        let outcome = self
            .channel
            .sense_slots(Family::Ap, self.n, self.global.observation_slot)
            .await?;
        self.n = match outcome {
            SenseOutcome::Elapsed => 0,
            SenseOutcome::Interrupted { remaining } => {
                self.backoff_interrupts += 1;
                remaining
            }
        };
        Ok(())
    }
}
