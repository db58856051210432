//! Shared contention-cycle utilities: backoff-counter draws and per-node
//! result counters, used by both node families.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;

use crate::{config::DetBackoffParams, rng::sim_random_range};

/// How a node draws its backoff counter.
#[derive(Debug, Clone, Copy)]
pub enum BackoffPolicy {
    /// Contention-window draw with binary-exponential growth on failure.
    Exponential {
        /// Minimum contention window.
        cw_min: u32,
        /// Maximum contention window.
        cw_max: u32,
    },
    /// Deterministic draw compensated by accumulated sensing interruptions.
    Deterministic(DetBackoffParams),
}

/// Draws a fresh backoff counter.
///
/// For the exponential policy the draw is uniform over
/// `[0, min(cw_max, 2^failures * (cw_min + 1) - 1)]`.
///
/// For the deterministic policy, while `failures % periodicity < threshold`
/// (and not at simulation time zero) the draw is exactly
/// `initial + accumulated interrupts`, consuming the interrupt count;
/// otherwise it is uniform over `[0, periodicity)`.
pub fn draw_backoff(
    policy: BackoffPolicy,
    failures_in_row: u32,
    interrupt_counter: &mut u32,
    now: Duration,
) -> u32 {
    match policy {
        BackoffPolicy::Exponential { cw_min, cw_max } => {
            // Long failure streaks saturate at cw_max well before the shift
            // could overflow.
            let shift = failures_in_row.min(31);
            let upper = ((u64::from(cw_min) + 1) << shift)
                .saturating_sub(1)
                .min(u64::from(cw_max)) as u32;
            sim_random_range(0..upper + 1)
        }
        BackoffPolicy::Deterministic(p) => {
            if failures_in_row % p.periodicity < p.threshold && now != Duration::ZERO {
                let value = p.initial + *interrupt_counter;
                *interrupt_counter = 0;
                value
            } else {
                sim_random_range(0..p.periodicity)
            }
        }
    }
}

/// Cumulative per-node counters harvested by the campaign driver after the
/// horizon is reached.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    /// Attempts that ended without a collision.
    pub successful_trans: u64,
    /// All attempts, successful or not.
    pub total_trans: u64,
    /// Airtime spent transmitting data, failed attempts included.
    pub total_airtime: Duration,
    /// Airtime of successful attempts only.
    pub successful_airtime: Duration,
    /// Sum of channel-access delays of successful attempts.
    pub transmission_delay: Duration,
    /// End of the most recent successful transmission.
    pub last_successful_end: Duration,
    /// Start of the node's first data transmission, if any.
    pub first_tx_start: Option<Duration>,
}

impl NodeStats {
    /// Records the outcome of one attempt; every attempt passes through here
    /// exactly once.
    pub fn record_attempt(&mut self, airtime: Duration) {
        self.total_trans += 1;
        self.total_airtime += airtime;
    }

    /// Records a successful attempt's counters and access delay.
    pub fn record_success(&mut self, start: Duration, end: Duration, airtime: Duration) {
        self.successful_trans += 1;
        self.successful_airtime += airtime;
        self.transmission_delay += start.saturating_sub(self.last_successful_end);
        self.last_successful_end = end;
    }

    /// Notes the start of a data transmission, keeping the first.
    pub fn note_tx_start(&mut self, start: Duration) {
        self.first_tx_start.get_or_insert(start);
    }

    /// Attempts that ended in a collision.
    pub fn failed_trans(&self) -> u64 {
        self.total_trans - self.successful_trans
    }
}

/// Shared handle to a node's counters, read by the driver while the node
/// task owns the other clone.
pub type StatsHandle = Rc<RefCell<NodeStats>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::set_sim_seed;

    fn exponential(cw_min: u32, cw_max: u32) -> BackoffPolicy {
        BackoffPolicy::Exponential { cw_min, cw_max }
    }

    #[test]
    fn contention_window_grows_and_caps() {
        set_sim_seed(11);
        let mut unused = 0;
        let now = Duration::from_micros(100);

        for _ in 0..200 {
            let n = draw_backoff(exponential(15, 63), 0, &mut unused, now);
            assert!(n <= 15);
        }
        for _ in 0..200 {
            let n = draw_backoff(exponential(15, 63), 1, &mut unused, now);
            assert!(n <= 31);
        }
        // Three failures would give 127 uncapped; cw_max caps it at 63.
        for _ in 0..200 {
            let n = draw_backoff(exponential(15, 63), 3, &mut unused, now);
            assert!(n <= 63);
        }
    }

    #[test]
    fn contention_window_covers_full_range() {
        set_sim_seed(5);
        let mut unused = 0;
        let now = Duration::from_micros(1);
        let draws: Vec<u32> = (0..2000)
            .map(|_| draw_backoff(exponential(15, 63), 0, &mut unused, now))
            .collect();
        assert!(draws.contains(&0));
        assert!(draws.contains(&15));
        assert!(draws.iter().all(|&n| n <= 15));
    }

    #[test]
    fn huge_failure_streak_does_not_overflow() {
        set_sim_seed(1);
        let mut unused = 0;
        let n = draw_backoff(exponential(15, 63), 40, &mut unused, Duration::from_micros(1));
        assert!(n <= 63);
    }

    #[test]
    fn deterministic_draw_is_exact_below_threshold() {
        set_sim_seed(3);
        let policy = BackoffPolicy::Deterministic(DetBackoffParams {
            initial: 20,
            periodicity: 11,
            threshold: 6,
        });
        let now = Duration::from_micros(500);

        // streak % 11 == 4 < 6: deterministic value plus interrupts.
        let mut interrupts = 3;
        assert_eq!(draw_backoff(policy, 4, &mut interrupts, now), 23);
        // The interrupt count is consumed by the draw.
        assert_eq!(interrupts, 0);
        assert_eq!(draw_backoff(policy, 4, &mut interrupts, now), 20);
    }

    #[test]
    fn deterministic_draw_randomizes_above_threshold_and_at_time_zero() {
        set_sim_seed(3);
        let policy = BackoffPolicy::Deterministic(DetBackoffParams {
            initial: 20,
            periodicity: 11,
            threshold: 6,
        });

        // streak % 11 == 7 >= 6: uniform draw below the periodicity.
        let mut interrupts = 5;
        for _ in 0..100 {
            let n = draw_backoff(policy, 7, &mut interrupts, Duration::from_micros(500));
            assert!(n < 11);
        }
        // Interrupt count untouched by random draws.
        assert_eq!(interrupts, 5);

        // Simulation time zero always randomizes.
        for _ in 0..100 {
            let n = draw_backoff(policy, 0, &mut interrupts, Duration::ZERO);
            assert!(n < 11);
        }
    }

    #[test]
    fn stats_accumulate() {
        let mut stats = NodeStats::default();
        let us = Duration::from_micros;

        stats.record_attempt(us(100));
        stats.note_tx_start(us(50));
        stats.record_success(us(50), us(150), us(100));

        stats.record_attempt(us(100));

        assert_eq!(stats.total_trans, 2);
        assert_eq!(stats.successful_trans, 1);
        assert_eq!(stats.failed_trans(), 1);
        assert_eq!(stats.total_airtime, us(200));
        assert_eq!(stats.successful_airtime, us(100));
        assert_eq!(stats.transmission_delay, us(50));
        assert_eq!(stats.last_successful_end, us(150));
        assert_eq!(stats.first_tx_start, Some(us(50)));
    }
}
