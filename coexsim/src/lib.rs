//! # Coexsim
//!
//! A deterministic discrete-event simulator for coexistence between cellular
//! unlicensed-band base stations (gNB) and WiFi access points (AP) sharing
//! one wireless medium under listen-before-talk channel access.
//!
//! The engine is single-threaded and cooperative: node processes are plain
//! futures spawned on a tokio `LocalSet`, suspended only on virtual-time
//! delays ([`SimWorld::sleep`]) or interruptible sensing countdowns
//! ([`SimWorld::sense`]). The scheduler advances time one wake at a time,
//! breaking same-instant ties in scheduling order, so a run is reproduced
//! bit-exactly by its seed.
//!
//! Seven channel-access strategies are modeled: WiFi CSMA/CA (optionally
//! with deterministic backoff) on the AP side, and six cellular strategies —
//! five gap-period placements, a reservation signal, three cognitive-radio
//! LBT variants and deterministic backoff — on the gNB side.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Shared-medium channel with collision detection and sensing interruption.
pub mod channel;
/// Simulation and per-family node configuration.
pub mod config;
/// Backoff draws and per-node counters shared by both families.
pub mod contention;
/// Error types and utilities for simulation operations.
pub mod error;
/// Event scheduling for the simulation engine.
mod events;
/// Node contention state machines.
pub mod node;
/// Thread-local deterministic random number generation.
pub mod rng;
/// Campaign driver, aggregation and CSV output.
pub mod runner;
/// Core simulation world and coordination logic.
pub mod sim;
/// Sleep and interruptible-sense futures.
pub mod sleep;
/// Frame-airtime calculation for WiFi PPDU, ACK and RTS/CTS frames.
pub mod times;

pub use channel::{Channel, Family, Transmission};
pub use config::{
    ApConfig, BackoffSplit, CrParams, DetBackoffParams, GapMode, GnbConfig, LbtStrategy,
    PriorityClass, SimConfig,
};
pub use contention::{BackoffPolicy, NodeStats, StatsHandle, draw_backoff};
pub use error::{SimError, SimResult};
pub use node::{Ap, Gnb};
pub use rng::{get_current_sim_seed, reset_sim_rng, set_sim_seed, sim_random_range};
pub use runner::{
    CampaignSummary, NodeResults, RunOutcome, Scenario, append_csv_row, run_simulation,
    summarize,
};
pub use sim::{SimWorld, WeakSimWorld};
pub use sleep::{SenseFuture, SenseOutcome, SleepFuture};
pub use times::{FrameTimes, WifiStandard};
