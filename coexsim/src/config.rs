//! Simulation and per-family node configuration.
//!
//! The cellular channel-access strategy is a tagged sum type: each variant
//! carries exactly the parameters that strategy consumes, so illegal
//! combinations (a gap split outside the DURING gap, CR probabilities on a
//! gap strategy, ...) are unrepresentable.

use std::time::Duration;

use serde::Serialize;

use crate::{
    error::{SimError, SimResult},
    times::WifiStandard,
};

/// Global knobs shared by every node in a run.
#[derive(Debug, Clone, Serialize)]
pub struct SimConfig {
    /// Virtual-time horizon the campaign driver runs to.
    pub horizon: Duration,
    /// Fixed observation (CCA) slot duration.
    pub observation_slot: Duration,
    /// Switch time from sensing to transmitting.
    pub cca_tx_switch: Duration,
    /// Payload size per data frame in bytes.
    pub data_size: usize,
    /// Node id whose activity is logged at debug rather than trace level.
    pub trace_node: Option<u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(10),
            observation_slot: Duration::from_micros(9),
            cca_tx_switch: Duration::ZERO,
            data_size: 1472,
            trace_node: None,
        }
    }
}

impl SimConfig {
    /// Whether `node_id` was selected for verbose tracing.
    pub fn is_traced(&self, node_id: u32) -> bool {
        self.trace_node == Some(node_id)
    }
}

/// LAA/NR-U channel-access priority class parameters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PriorityClass {
    /// Observation slots sensed during the prioritization period.
    pub m: u32,
    /// Minimum contention window.
    pub cw_min: u32,
    /// Maximum contention window.
    pub cw_max: u32,
    /// Maximum channel occupancy time.
    pub mcot: Duration,
}

impl PriorityClass {
    /// Priority class 1.
    pub fn class_1() -> Self {
        Self {
            m: 1,
            cw_min: 3,
            cw_max: 7,
            mcot: Duration::from_millis(2),
        }
    }

    /// Priority class 2.
    pub fn class_2() -> Self {
        Self {
            m: 1,
            cw_min: 7,
            cw_max: 15,
            mcot: Duration::from_millis(3),
        }
    }

    /// Priority class 3 with the reference 8 ms occupancy limit.
    pub fn class_3() -> Self {
        Self {
            m: 3,
            cw_min: 15,
            cw_max: 63,
            mcot: Duration::from_millis(8),
        }
    }

    /// Priority class 3 as used by the deterministic-backoff experiments,
    /// which cap occupancy at 2 ms instead of the reference 8 ms.
    pub fn class_3_db_lbt() -> Self {
        Self {
            mcot: Duration::from_millis(2),
            ..Self::class_3()
        }
    }

    /// Priority class 4.
    pub fn class_4() -> Self {
        Self {
            m: 7,
            cw_min: 15,
            cw_max: 1023,
            mcot: Duration::from_millis(8),
        }
    }
}

/// How the DURING gap variant splits the backoff around the gap.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum BackoffSplit {
    /// Leave a fixed number of slots to be served after the gap.
    Fixed(u32),
    /// Leave `ceil(fraction * N)` slots to be served after the gap.
    Proportional(f64),
}

/// Placement of the gap period relative to the backoff procedure.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum GapMode {
    /// Gap before the backoff.
    Before,
    /// Gap after the backoff, no re-check.
    After,
    /// Backoff split around the gap.
    During {
        /// Portion of the backoff served after the gap.
        split: BackoffSplit,
    },
    /// Gap after the backoff with a clear-channel re-check before TX.
    AfterWithCca,
    /// Backoff performed in the middle of the halved gap.
    Inside,
}

/// Cognitive-radio LBT slot parameters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CrParams {
    /// Full CR slot duration.
    pub slot: Duration,
    /// Mandatory short reservation at the start of each CR slot.
    pub reserve: Duration,
    /// Probability of transmitting RS (rather than sensing) in the first slot.
    pub prob_rs_first_slot: f64,
    /// Probability of transmitting RS in subsequent slots.
    pub prob_rs_next_slots: f64,
}

impl Default for CrParams {
    fn default() -> Self {
        Self {
            slot: Duration::from_micros(30),
            reserve: Duration::from_micros(8),
            prob_rs_first_slot: 0.5,
            prob_rs_next_slots: 0.5,
        }
    }
}

/// Deterministic-backoff parameters (alpha, m and beta of the DB-LBT
/// formulation).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DetBackoffParams {
    /// Fixed deterministic draw (alpha).
    pub initial: u32,
    /// Mode-switch periodicity (m).
    pub periodicity: u32,
    /// Mode-switch threshold (beta).
    pub threshold: u32,
}

impl Default for DetBackoffParams {
    fn default() -> Self {
        Self {
            initial: 20,
            periodicity: 11,
            threshold: 6,
        }
    }
}

/// The six cellular channel-access strategies.
#[derive(Debug, Clone, Serialize)]
pub enum LbtStrategy {
    /// Gap-period alignment to the synchronization slot.
    Gap(GapMode),
    /// Reservation signal from backoff completion to the next boundary.
    ReservationSignal,
    /// Cognitive-radio LBT: CR slots until the next boundary.
    CrLbt(CrParams),
    /// Extended CR-LBT: RS allowed already in the first CR slot.
    ExtendedCrLbt(CrParams),
    /// Generalized CR-LBT: a configured number of mini-slot CR slots.
    GeneralizedCrLbt {
        /// CR slot parameters.
        params: CrParams,
        /// Number of CR slots to run.
        num_cr_slots: u32,
    },
    /// Deterministic backoff on mini-slot boundaries.
    DeterministicBackoff(DetBackoffParams),
}

impl LbtStrategy {
    /// Whether a reservation signal precedes the data portion, shortening it.
    pub fn uses_reservation(&self) -> bool {
        matches!(
            self,
            LbtStrategy::ReservationSignal | LbtStrategy::DeterministicBackoff(_)
        )
    }

    /// Short label used in campaign output.
    pub fn label(&self) -> &'static str {
        match self {
            LbtStrategy::Gap(GapMode::Before) => "gap_before",
            LbtStrategy::Gap(GapMode::After) => "gap_after",
            LbtStrategy::Gap(GapMode::During { .. }) => "gap_during",
            LbtStrategy::Gap(GapMode::AfterWithCca) => "gap_after_cca",
            LbtStrategy::Gap(GapMode::Inside) => "gap_inside",
            LbtStrategy::ReservationSignal => "rs_signal",
            LbtStrategy::CrLbt(_) => "cr_lbt",
            LbtStrategy::ExtendedCrLbt(_) => "ecr_lbt",
            LbtStrategy::GeneralizedCrLbt { .. } => "gcr_lbt",
            LbtStrategy::DeterministicBackoff(_) => "db_lbt",
        }
    }

    /// CR slot parameters when this is a cognitive-radio variant.
    pub fn cr_params(&self) -> Option<&CrParams> {
        match self {
            LbtStrategy::CrLbt(p)
            | LbtStrategy::ExtendedCrLbt(p)
            | LbtStrategy::GeneralizedCrLbt { params: p, .. } => Some(p),
            _ => None,
        }
    }

    fn validate(&self) -> SimResult<()> {
        if let Some(p) = self.cr_params() {
            if p.reserve >= p.slot {
                return Err(SimError::Config(
                    "CR reserve time must be shorter than the CR slot".into(),
                ));
            }
            for prob in [p.prob_rs_first_slot, p.prob_rs_next_slots] {
                if !(0.0..=1.0).contains(&prob) {
                    return Err(SimError::Config(format!(
                        "RS probability {prob} outside [0, 1]"
                    )));
                }
            }
        }
        if let LbtStrategy::DeterministicBackoff(p) = self {
            if p.periodicity == 0 {
                return Err(SimError::Config(
                    "deterministic backoff periodicity must be positive".into(),
                ));
            }
            if p.threshold > p.periodicity {
                return Err(SimError::Config(
                    "deterministic backoff threshold exceeds periodicity".into(),
                ));
            }
        }
        if let LbtStrategy::Gap(GapMode::During {
            split: BackoffSplit::Proportional(f),
        }) = self
        {
            if !(0.0..=1.0).contains(f) {
                return Err(SimError::Config(format!(
                    "backoff split fraction {f} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Per-gNB configuration.
#[derive(Debug, Clone, Serialize)]
pub struct GnbConfig {
    /// Channel-access strategy with its parameters.
    pub strategy: LbtStrategy,
    /// Priority-class parameter set.
    pub priority_class: PriorityClass,
    /// Initial wait of each prioritization period.
    pub deter_period: Duration,
    /// Synchronization-slot duration (theta).
    pub sync_slot: Duration,
    /// Upper bound for random desynchronization offsets.
    pub max_desync: Duration,
    /// Minimum spacing between two nodes' desynchronization offsets.
    pub min_desync: Duration,
    /// Shorten the data portion to a random last ending sub-frame.
    pub partial_ending_subframes: bool,
    /// After a success, skip the next synchronization-slot boundary.
    pub skip_next_slot_boundary: bool,
    /// After a success, skip the next transmission opportunity.
    pub skip_next_txop: bool,
    /// Retransmissions allowed before the pending frame is discarded.
    pub retry_limit: u32,
    /// Frame arrival rate per millisecond; `None` means saturated traffic.
    pub arrival_rate: Option<f64>,
}

impl Default for GnbConfig {
    fn default() -> Self {
        Self {
            strategy: LbtStrategy::Gap(GapMode::AfterWithCca),
            priority_class: PriorityClass::class_3_db_lbt(),
            deter_period: Duration::from_micros(16),
            sync_slot: Duration::from_micros(500),
            max_desync: Duration::from_micros(500),
            min_desync: Duration::ZERO,
            partial_ending_subframes: false,
            skip_next_slot_boundary: false,
            skip_next_txop: false,
            retry_limit: 7,
            arrival_rate: None,
        }
    }
}

impl GnbConfig {
    /// Mini-slot duration used as the synchronization slot by the
    /// generalized CR variant.
    pub const MINI_SLOT: Duration = Duration::from_micros(36);

    /// Builds a config for `strategy`, applying the strategy's
    /// synchronization-slot convention (mini-slots for generalized CR-LBT).
    pub fn for_strategy(strategy: LbtStrategy) -> Self {
        let sync_slot = match &strategy {
            LbtStrategy::GeneralizedCrLbt { .. } => Self::MINI_SLOT,
            _ => Duration::from_micros(500),
        };
        Self {
            strategy,
            sync_slot,
            max_desync: sync_slot,
            ..Self::default()
        }
    }

    /// Fail-fast validation performed at node construction.
    pub fn validate(&self) -> SimResult<()> {
        self.strategy.validate()?;
        if self.sync_slot.is_zero() {
            return Err(SimError::Config(
                "synchronization slot duration must be positive".into(),
            ));
        }
        if let Some(rate) = self.arrival_rate {
            if rate <= 0.0 {
                return Err(SimError::Config(format!(
                    "arrival rate must be positive, got {rate}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-AP configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ApConfig {
    /// Minimum contention window.
    pub cw_min: u32,
    /// Maximum contention window.
    pub cw_max: u32,
    /// Retransmissions allowed before the pending frame is discarded.
    pub retry_limit: u32,
    /// Modulation and coding scheme index.
    pub mcs: usize,
    /// Arbitration inter-frame space number.
    pub aifsn: u32,
    /// PHY standard.
    pub standard: WifiStandard,
    /// MPDU sub-frames aggregated under one PHY header.
    pub n_ampdu: u32,
    /// Spatial streams (802.11ac only).
    pub nss: u32,
    /// Deterministic backoff instead of the contention-window draw.
    pub deterministic_backoff: Option<DetBackoffParams>,
    /// Frame arrival rate per millisecond; `None` means saturated traffic.
    pub arrival_rate: Option<f64>,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            cw_min: 15,
            cw_max: 63,
            retry_limit: 7,
            mcs: 7,
            aifsn: 3,
            standard: WifiStandard::Dot11a,
            n_ampdu: 1,
            nss: 1,
            deterministic_backoff: None,
            arrival_rate: None,
        }
    }
}

impl ApConfig {
    /// Fail-fast validation performed at node construction; PHY parameters
    /// are validated by [`crate::times::FrameTimes::new`].
    pub fn validate(&self) -> SimResult<()> {
        if let Some(p) = &self.deterministic_backoff {
            if p.periodicity == 0 {
                return Err(SimError::Config(
                    "deterministic backoff periodicity must be positive".into(),
                ));
            }
        }
        if let Some(rate) = self.arrival_rate {
            if rate <= 0.0 {
                return Err(SimError::Config(format!(
                    "arrival rate must be positive, got {rate}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generalized_cr_uses_mini_slots() {
        let config = GnbConfig::for_strategy(LbtStrategy::GeneralizedCrLbt {
            params: CrParams::default(),
            num_cr_slots: 6,
        });
        assert_eq!(config.sync_slot, GnbConfig::MINI_SLOT);

        let config = GnbConfig::for_strategy(LbtStrategy::ReservationSignal);
        assert_eq!(config.sync_slot, Duration::from_micros(500));
    }

    #[test]
    fn reservation_strategies_flagged() {
        assert!(LbtStrategy::ReservationSignal.uses_reservation());
        assert!(LbtStrategy::DeterministicBackoff(DetBackoffParams::default())
            .uses_reservation());
        assert!(!LbtStrategy::Gap(GapMode::After).uses_reservation());
        assert!(!LbtStrategy::CrLbt(CrParams::default()).uses_reservation());
    }

    #[test]
    fn invalid_cr_params_rejected() {
        let mut params = CrParams::default();
        params.prob_rs_next_slots = 1.5;
        let config = GnbConfig::for_strategy(LbtStrategy::CrLbt(params));
        assert!(config.validate().is_err());

        let mut params = CrParams::default();
        params.reserve = params.slot;
        let config = GnbConfig::for_strategy(LbtStrategy::CrLbt(params));
        assert!(config.validate().is_err());
    }

    #[test]
    fn deviating_mcot_presets_are_distinct() {
        assert_eq!(PriorityClass::class_3().mcot, Duration::from_millis(8));
        assert_eq!(
            PriorityClass::class_3_db_lbt().mcot,
            Duration::from_millis(2)
        );
        assert_eq!(
            PriorityClass::class_3().cw_max,
            PriorityClass::class_3_db_lbt().cw_max
        );
    }
}
