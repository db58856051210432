//! Campaign CLI: runs coexistence simulations over seeds and node
//! populations and reports per-node and aggregate metrics.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use coexsim::{
    ApConfig, CrParams, DetBackoffParams, GapMode, GnbConfig, LbtStrategy, Scenario, SimConfig,
    SimResult, WifiStandard, append_csv_row, run_simulation, summarize,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Gap period before the backoff.
    GapBefore,
    /// Gap period after the backoff.
    GapAfter,
    /// Backoff split around the gap period.
    GapDuring,
    /// Gap period after the backoff with a CCA re-check.
    GapAfterCca,
    /// Backoff inside the halved gap period.
    GapInside,
    /// Reservation signal up to the slot boundary.
    Rs,
    /// Cognitive-radio LBT.
    Cr,
    /// Extended cognitive-radio LBT.
    Ecr,
    /// Generalized cognitive-radio LBT on mini-slots.
    Gcr,
    /// Deterministic backoff.
    Db,
}

impl StrategyArg {
    fn to_strategy(self, num_cr_slots: u32) -> LbtStrategy {
        match self {
            StrategyArg::GapBefore => LbtStrategy::Gap(GapMode::Before),
            StrategyArg::GapAfter => LbtStrategy::Gap(GapMode::After),
            StrategyArg::GapDuring => LbtStrategy::Gap(GapMode::During {
                split: coexsim::BackoffSplit::Fixed(7),
            }),
            StrategyArg::GapAfterCca => LbtStrategy::Gap(GapMode::AfterWithCca),
            StrategyArg::GapInside => LbtStrategy::Gap(GapMode::Inside),
            StrategyArg::Rs => LbtStrategy::ReservationSignal,
            StrategyArg::Cr => LbtStrategy::CrLbt(CrParams::default()),
            StrategyArg::Ecr => LbtStrategy::ExtendedCrLbt(CrParams::default()),
            StrategyArg::Gcr => LbtStrategy::GeneralizedCrLbt {
                params: CrParams::default(),
                num_cr_slots,
            },
            StrategyArg::Db => LbtStrategy::DeterministicBackoff(DetBackoffParams::default()),
        }
    }
}

/// NR-U / WiFi coexistence campaign runner.
#[derive(Debug, Parser)]
#[command(name = "coexsim", version, about)]
struct Cli {
    /// Number of gNB nodes.
    #[arg(long, default_value_t = 1)]
    gnbs: usize,

    /// Number of AP nodes.
    #[arg(long, default_value_t = 1)]
    aps: usize,

    /// Base RNG seed; run i uses seed + i.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of runs.
    #[arg(long, default_value_t = 1)]
    runs: u64,

    /// Simulated seconds per run.
    #[arg(long, default_value_t = 10.0)]
    sim_time: f64,

    /// Cellular channel-access strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::GapAfterCca)]
    strategy: StrategyArg,

    /// CR slots for the generalized CR variant.
    #[arg(long, default_value_t = 6)]
    num_cr_slots: u32,

    /// Use deterministic backoff on the WiFi side as well.
    #[arg(long)]
    db_wifi: bool,

    /// WiFi PHY standard for the APs.
    #[arg(long, value_enum, default_value = "dot11a")]
    wifi_standard: WifiStandard,

    /// Node id to log verbosely.
    #[arg(long)]
    trace_node: Option<u32>,

    /// CSV file to append one row per run to.
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn main() -> SimResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let sim = SimConfig {
        horizon: Duration::from_secs_f64(cli.sim_time),
        trace_node: cli.trace_node,
        ..SimConfig::default()
    };
    let gnb = GnbConfig::for_strategy(cli.strategy.to_strategy(cli.num_cr_slots));
    let ap = ApConfig {
        deterministic_backoff: cli.db_wifi.then(DetBackoffParams::default),
        standard: cli.wifi_standard,
        ..ApConfig::default()
    };

    for run in 0..cli.runs {
        let scenario = Scenario {
            sim: sim.clone(),
            gnb: gnb.clone(),
            ap: ap.clone(),
            num_gnb: cli.gnbs,
            num_ap: cli.aps,
            seed: cli.seed + run,
            desyncs: None,
        };

        tracing::info!(
            seed = scenario.seed,
            gnbs = scenario.num_gnb,
            aps = scenario.num_ap,
            strategy = scenario.gnb.strategy.label(),
            "starting run"
        );
        let outcome = run_simulation(&scenario)?;
        let summary = summarize(&scenario, &outcome);

        for node in &outcome.nodes {
            println!(
                "{}-{}: {}/{} collided, airtime {} ms, mean delay {} us",
                node.family,
                node.id,
                node.failed_trans,
                node.total_trans,
                node.total_airtime_us / 1000,
                node.mean_access_delay_us
                    .map_or_else(|| "n/a".into(), |d| format!("{d:.0}")),
            );
        }
        println!("====================================");
        println!(
            "gNB: throughput {:.3} Mb/s, collision prob {:.4}, efficiency {:.4}, JFI {:.4}",
            summary.gnb.throughput_mbps,
            summary.gnb.collision_probability,
            summary.gnb.efficiency,
            summary.gnb.jains_fairness,
        );
        println!(
            "AP : throughput {:.3} Mb/s, collision prob {:.4}, efficiency {:.4}, JFI {:.4}",
            summary.ap.throughput_mbps,
            summary.ap.collision_probability,
            summary.ap.efficiency,
            summary.ap.jains_fairness,
        );
        println!("JFI total: {:.4}", summary.jains_fairness_total);

        if let Some(path) = &cli.csv {
            append_csv_row(path, &scenario, &summary)?;
        }
    }

    Ok(())
}
