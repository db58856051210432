//! Campaign driver: builds the channel and node populations, drives the
//! cooperative scheduler to the horizon, and aggregates per-node counters
//! into campaign metrics and CSV rows.
//!
//! Node tasks are spawned on a tokio `LocalSet` over a current-thread
//! runtime. The driver interleaves yield rounds (letting every runnable task
//! reach its next suspension point) with single [`SimWorld::step`] calls, so
//! same-instant resumptions happen in scheduling order and runs are
//! reproducible for a fixed seed.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::{
    SimResult, SimWorld,
    channel::{Channel, Family},
    config::{ApConfig, GnbConfig, SimConfig},
    contention::{NodeStats, StatsHandle},
    node::{Ap, Gnb},
    rng::sim_random_range,
};

/// A full description of one simulation run.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Global configuration shared by all nodes.
    pub sim: SimConfig,
    /// Per-gNB configuration.
    pub gnb: GnbConfig,
    /// Per-AP configuration.
    pub ap: ApConfig,
    /// Number of gNB nodes.
    pub num_gnb: usize,
    /// Number of AP nodes.
    pub num_ap: usize,
    /// RNG seed; fixes the run bit-exactly.
    pub seed: u64,
    /// Explicit desynchronization offsets; drawn randomly when `None`.
    pub desyncs: Option<Vec<Duration>>,
}

/// Snapshot of one node's counters after the horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeResults {
    /// Node id within its family.
    pub id: u32,
    /// Owning family.
    pub family: Family,
    /// Attempts that ended without a collision.
    pub successful_trans: u64,
    /// Attempts that ended in a collision.
    pub failed_trans: u64,
    /// All attempts.
    pub total_trans: u64,
    /// `failed / total`, `None` when the node never transmitted.
    pub collision_ratio: Option<f64>,
    /// Airtime spent transmitting, microseconds.
    pub total_airtime_us: u64,
    /// Airtime of successful attempts, microseconds.
    pub successful_airtime_us: u64,
    /// Mean channel-access delay of successful attempts, microseconds.
    pub mean_access_delay_us: Option<f64>,
    /// Start of the node's first transmission, microseconds.
    pub first_tx_start_us: Option<u64>,
}

impl NodeResults {
    fn from_stats(id: u32, family: Family, stats: &NodeStats) -> Self {
        let collision_ratio = (stats.total_trans > 0)
            .then(|| stats.failed_trans() as f64 / stats.total_trans as f64);
        let mean_access_delay_us = (stats.successful_trans > 0).then(|| {
            stats.transmission_delay.as_micros() as f64 / stats.successful_trans as f64
        });
        Self {
            id,
            family,
            successful_trans: stats.successful_trans,
            failed_trans: stats.failed_trans(),
            total_trans: stats.total_trans,
            collision_ratio,
            total_airtime_us: stats.total_airtime.as_micros() as u64,
            successful_airtime_us: stats.successful_airtime.as_micros() as u64,
            mean_access_delay_us,
            first_tx_start_us: stats.first_tx_start.map(|t| t.as_micros() as u64),
        }
    }
}

/// Result surface of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Per-node counter snapshots, gNBs first.
    pub nodes: Vec<NodeResults>,
    /// Bytes delivered by successful AP transmissions.
    pub bytes_sent: u64,
}

/// Aggregate metrics for one node family.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyAggregate {
    /// All attempts across the family.
    pub total_trans: u64,
    /// Collided attempts across the family.
    pub failed_trans: u64,
    /// Successful attempts across the family.
    pub successful_trans: u64,
    /// Airtime spent transmitting, microseconds.
    pub total_airtime_us: u64,
    /// Airtime of successful attempts, microseconds.
    pub successful_airtime_us: u64,
    /// Successful payload bits per microsecond (Mb/s).
    pub throughput_mbps: f64,
    /// `failed / total`, zero when the family never transmitted.
    pub collision_probability: f64,
    /// Successful airtime as a share of the horizon.
    pub efficiency: f64,
    /// Jain's fairness index over per-node successful airtime; zero for an
    /// empty family.
    pub jains_fairness: f64,
}

/// Aggregate metrics of one run, both families.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignSummary {
    /// Cellular aggregate.
    pub gnb: FamilyAggregate,
    /// WiFi aggregate.
    pub ap: FamilyAggregate,
    /// Jain's fairness index across the two family airtime totals.
    pub jains_fairness_total: f64,
    /// Bytes delivered by successful AP transmissions.
    pub bytes_sent: u64,
}

/// Runs one simulation to its horizon and snapshots every node's counters.
pub fn run_simulation(scenario: &Scenario) -> SimResult<RunOutcome> {
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let local = tokio::task::LocalSet::new();
    let horizon = scenario.sim.horizon;

    let (gnb_stats, ap_stats, bytes_sent) =
        local.block_on(&runtime, async {
            let mut sim = SimWorld::new_with_seed(scenario.seed);
            let channel = Channel::new(sim.downgrade());

            let desyncs = match &scenario.desyncs {
                Some(offsets) => offsets.clone(),
                None => desync_offsets(
                    scenario.num_gnb,
                    scenario.gnb.min_desync,
                    scenario.gnb.max_desync,
                ),
            };
            if desyncs.len() < scenario.num_gnb {
                return Err(crate::SimError::Config(format!(
                    "{} desync offsets provided for {} gNBs",
                    desyncs.len(),
                    scenario.num_gnb
                )));
            }

            let mut gnb_stats: Vec<StatsHandle> = Vec::with_capacity(scenario.num_gnb);
            for i in 0..scenario.num_gnb {
                let gnb = Gnb::new(
                    i as u32,
                    sim.downgrade(),
                    channel.clone(),
                    scenario.sim.clone(),
                    scenario.gnb.clone(),
                    desyncs[i],
                )?;
                gnb_stats.push(gnb.stats());
                gnb.spawn();
            }

            let mut ap_stats: Vec<StatsHandle> = Vec::with_capacity(scenario.num_ap);
            for j in 0..scenario.num_ap {
                let ap = Ap::new(
                    j as u32,
                    sim.downgrade(),
                    channel.clone(),
                    scenario.sim.clone(),
                    scenario.ap.clone(),
                )?;
                ap_stats.push(ap.stats());
                ap.spawn();
            }

            drive(&mut sim, horizon).await;
            Ok((gnb_stats, ap_stats, channel.bytes_sent()))
        })?;

    let mut nodes = Vec::with_capacity(gnb_stats.len() + ap_stats.len());
    for (i, stats) in gnb_stats.iter().enumerate() {
        nodes.push(NodeResults::from_stats(
            i as u32,
            Family::Gnb,
            &stats.borrow(),
        ));
    }
    for (j, stats) in ap_stats.iter().enumerate() {
        nodes.push(NodeResults::from_stats(
            j as u32,
            Family::Ap,
            &stats.borrow(),
        ));
    }

    Ok(RunOutcome { nodes, bytes_sent })
}

/// Interleaves yield rounds with single event steps until the next event
/// would land at or past the horizon.
async fn drive(sim: &mut SimWorld, horizon: Duration) {
    loop {
        // Let every runnable task reach its next suspension point before
        // advancing time; interruption chains may take several rounds.
        loop {
            let before = sim.progress_token();
            tokio::task::yield_now().await;
            if sim.progress_token() == before {
                break;
            }
        }

        match sim.next_wake_time() {
            Some(t) if t < horizon => {
                sim.step();
            }
            _ => break,
        }
    }
    tracing::debug!(now = ?sim.now(), "horizon reached, abandoning node tasks");
}

/// Draws `count` desynchronization offsets, each at least `min_spacing`
/// apart, spread over `[0, max_desync)`.
pub fn desync_offsets(count: usize, min_spacing: Duration, max_desync: Duration) -> Vec<Duration> {
    if count == 0 {
        return Vec::new();
    }
    let min_us = min_spacing.as_micros() as i64;
    let max_us = (max_desync.as_micros() as i64 - min_us).max(0);

    let span = (max_us - (count as i64 - 1) * (min_us - 1)).max(count as i64) as u64;
    let mut samples: Vec<u64> = Vec::with_capacity(count);
    while samples.len() < count {
        let v = sim_random_range(0..span);
        if !samples.contains(&v) {
            samples.push(v);
        }
    }

    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by_key(|&i| samples[i]);
    let mut ranks = vec![0usize; count];
    for (rank, &i) in order.iter().enumerate() {
        ranks[i] = rank;
    }

    samples
        .iter()
        .zip(&ranks)
        .map(|(&sample, &rank)| {
            let us = sample as i64 + (min_us - 1) * rank as i64;
            Duration::from_micros(us.max(0) as u64)
        })
        .collect()
}

/// Aggregates a run's per-node counters into campaign metrics.
pub fn summarize(scenario: &Scenario, outcome: &RunOutcome) -> CampaignSummary {
    let horizon_us = scenario.sim.horizon.as_micros() as f64;
    let payload_bits = (scenario.sim.data_size * 8) as f64;

    let aggregate = |family: Family| -> FamilyAggregate {
        let nodes: Vec<&NodeResults> = outcome
            .nodes
            .iter()
            .filter(|n| n.family == family)
            .collect();

        let total_trans: u64 = nodes.iter().map(|n| n.total_trans).sum();
        let failed_trans: u64 = nodes.iter().map(|n| n.failed_trans).sum();
        let successful_trans: u64 = nodes.iter().map(|n| n.successful_trans).sum();
        let total_airtime_us: u64 = nodes.iter().map(|n| n.total_airtime_us).sum();
        let successful_airtime_us: u64 =
            nodes.iter().map(|n| n.successful_airtime_us).sum();

        let collision_probability = if total_trans > 0 {
            failed_trans as f64 / total_trans as f64
        } else {
            0.0
        };

        let sum_airtime = successful_airtime_us as f64;
        let sum_sq: f64 = nodes
            .iter()
            .map(|n| (n.successful_airtime_us as f64).powi(2))
            .sum();
        let jains_fairness = if nodes.is_empty() || sum_sq == 0.0 {
            0.0
        } else {
            sum_airtime.powi(2) / (nodes.len() as f64 * sum_sq)
        };

        FamilyAggregate {
            total_trans,
            failed_trans,
            successful_trans,
            total_airtime_us,
            successful_airtime_us,
            throughput_mbps: successful_trans as f64 * payload_bits / horizon_us,
            collision_probability,
            efficiency: successful_airtime_us as f64 / horizon_us,
            jains_fairness,
        }
    };

    let gnb = aggregate(Family::Gnb);
    let ap = aggregate(Family::Ap);

    let g = gnb.successful_airtime_us as f64;
    let a = ap.successful_airtime_us as f64;
    let denom = 2.0 * (g.powi(2) + a.powi(2));
    let jains_fairness_total = if denom == 0.0 {
        0.0
    } else {
        (g + a).powi(2) / denom
    };

    CampaignSummary {
        gnb,
        ap,
        jains_fairness_total,
        bytes_sent: outcome.bytes_sent,
    }
}

/// Appends one CSV row of parameters and metrics, writing the header first
/// when the file does not exist yet.
pub fn append_csv_row(
    path: &Path,
    scenario: &Scenario,
    summary: &CampaignSummary,
) -> SimResult<()> {
    let write_header = !path.exists();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    if write_header {
        writeln!(
            file,
            "seed,num_gnb,num_ap,strategy,sync_slot_us,cw_min,cw_max,mcot_us,horizon_us,\
             succ_total_gnb,fail_total_gnb,trans_total_gnb,throughput_gnb,coll_prob_gnb,\
             efficiency_gnb,jfi_gnb,succ_total_ap,fail_total_ap,trans_total_ap,\
             throughput_ap,coll_prob_ap,efficiency_ap,jfi_ap,jfi_total,bytes_sent"
        )?;
    }
    writeln!(
        file,
        "{},{},{},{},{},{},{},{},{},{},{},{},{:.6},{:.6},{:.6},{:.6},{},{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
        scenario.seed,
        scenario.num_gnb,
        scenario.num_ap,
        scenario.gnb.strategy.label(),
        scenario.gnb.sync_slot.as_micros(),
        scenario.gnb.priority_class.cw_min,
        scenario.gnb.priority_class.cw_max,
        scenario.gnb.priority_class.mcot.as_micros(),
        scenario.sim.horizon.as_micros(),
        summary.gnb.successful_trans,
        summary.gnb.failed_trans,
        summary.gnb.total_trans,
        summary.gnb.throughput_mbps,
        summary.gnb.collision_probability,
        summary.gnb.efficiency,
        summary.gnb.jains_fairness,
        summary.ap.successful_trans,
        summary.ap.failed_trans,
        summary.ap.total_trans,
        summary.ap.throughput_mbps,
        summary.ap.collision_probability,
        summary.ap.efficiency,
        summary.ap.jains_fairness,
        summary.jains_fairness_total,
        summary.bytes_sent,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::set_sim_seed;

    #[test]
    fn desync_offsets_respect_count_and_bounds() {
        set_sim_seed(9);
        let offsets = desync_offsets(5, Duration::ZERO, Duration::from_micros(500));
        assert_eq!(offsets.len(), 5);
        for offset in &offsets {
            assert!(*offset < Duration::from_micros(500) + Duration::from_micros(5));
        }
    }

    #[test]
    fn desync_offsets_empty_population() {
        assert!(desync_offsets(0, Duration::ZERO, Duration::from_micros(500)).is_empty());
    }

    #[test]
    fn summary_with_zero_aps_is_defined() {
        let scenario = Scenario {
            sim: SimConfig::default(),
            gnb: GnbConfig::default(),
            ap: ApConfig::default(),
            num_gnb: 1,
            num_ap: 0,
            seed: 1,
            desyncs: None,
        };
        let outcome = RunOutcome {
            nodes: vec![NodeResults {
                id: 0,
                family: Family::Gnb,
                successful_trans: 4,
                failed_trans: 1,
                total_trans: 5,
                collision_ratio: Some(0.2),
                total_airtime_us: 10_000,
                successful_airtime_us: 8_000,
                mean_access_delay_us: Some(500.0),
                first_tx_start_us: Some(43),
            }],
            bytes_sent: 0,
        };

        let summary = summarize(&scenario, &outcome);
        assert_eq!(summary.ap.total_trans, 0);
        assert_eq!(summary.ap.collision_probability, 0.0);
        assert_eq!(summary.ap.throughput_mbps, 0.0);
        assert_eq!(summary.ap.jains_fairness, 0.0);
        assert!(summary.gnb.collision_probability > 0.0);
        assert!(summary.jains_fairness_total > 0.0);
    }
}
