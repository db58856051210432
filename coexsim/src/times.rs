//! Frame-airtime calculation for WiFi PPDU, ACK and RTS/CTS frames.
//!
//! Pure functions of payload size, MCS index, standard and spatial-stream
//! count; no state beyond the rates fixed at construction. Data and ACK
//! airtimes are ceiling-rounded to integer microseconds.

use std::time::Duration;

use crate::error::{SimError, SimResult};

/// Supported 802.11 PHY standards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WifiStandard {
    /// 802.11a single-stream OFDM.
    Dot11a,
    /// 802.11ac with up to 8 spatial streams.
    Dot11ac,
}

// MCS tables: [data rate, control rate] in bits per microsecond.
const MCS_11A: [[f64; 2]; 8] = [
    [6.0, 6.0],
    [9.0, 6.0],
    [12.0, 12.0],
    [18.0, 12.0],
    [24.0, 24.0],
    [36.0, 24.0],
    [48.0, 24.0],
    [54.0, 24.0],
];
const MCS_11AC: [[f64; 2]; 9] = [
    [6.5, 6.0],
    [13.0, 12.0],
    [19.5, 12.0],
    [26.0, 24.0],
    [39.0, 24.0],
    [52.0, 24.0],
    [58.5, 24.0],
    [65.0, 24.0],
    [78.0, 24.0],
];

const MAC_OVERHEAD_BITS: f64 = 40.0 * 8.0;
const ACK_BITS: f64 = 14.0 * 8.0;
// OFDM service (16 bits) + tail (6 bits).
const SERVICE_TAIL_BITS: f64 = 22.0;
const OFDM_PREAMBLE_US: f64 = 16.0;
// Legacy DIFS used by the RTS/CTS exchange regardless of AIFSN.
const LEGACY_DIFS_US: f64 = 16.0 + 3.0 * 9.0;

/// Airtime calculator for one node's fixed PHY configuration.
#[derive(Debug, Clone)]
pub struct FrameTimes {
    payload_bytes: usize,
    data_rate: f64,
    ctr_rate: f64,
    phy_data_rate: f64,
    ofdm_signal_us: f64,
    difs: Duration,
}

impl FrameTimes {
    /// Observation slot duration (aSlotTime).
    pub const SLOT: Duration = Duration::from_micros(9);
    /// Short inter-frame space (aSIFSTime).
    pub const SIFS: Duration = Duration::from_micros(16);
    /// Time a transmitter waits for a missing ACK before giving up.
    pub const ACK_TIMEOUT: Duration = Duration::from_micros(44);

    /// Builds the calculator, failing fast on an unsupported MCS index or
    /// spatial-stream count.
    pub fn new(
        payload_bytes: usize,
        mcs: usize,
        aifsn: u32,
        standard: WifiStandard,
        nss: u32,
    ) -> SimResult<Self> {
        let (data_rate, ctr_rate) = match standard {
            WifiStandard::Dot11a => {
                let row = MCS_11A.get(mcs).ok_or_else(|| {
                    SimError::Config(format!("802.11a has no MCS index {mcs}"))
                })?;
                (row[0], row[1])
            }
            WifiStandard::Dot11ac => {
                if !(1..=8).contains(&nss) {
                    return Err(SimError::Config(format!(
                        "802.11ac supports 1 to 8 spatial streams, got {nss}"
                    )));
                }
                let row = MCS_11AC.get(mcs).ok_or_else(|| {
                    SimError::Config(format!("802.11ac has no MCS index {mcs}"))
                })?;
                (f64::from(nss) * row[0], row[1])
            }
        };

        Ok(Self {
            payload_bytes,
            data_rate,
            ctr_rate,
            phy_data_rate: data_rate * 1e-6,
            ofdm_signal_us: 24.0 / ctr_rate,
            difs: Duration::from_micros(u64::from(aifsn) * 9 + 16),
        })
    }

    /// DIFS for this node's AIFSN.
    pub fn difs(&self) -> Duration {
        self.difs
    }

    /// PPDU data-frame airtime for `n_ampdu` aggregated MPDU sub-frames,
    /// ceiling-rounded to whole microseconds.
    pub fn ppdu_frame_time(&self, n_ampdu: u32) -> Duration {
        let msdu = self.payload_bytes as f64 * 8.0;
        let mac_frame = f64::from(n_ampdu) * MAC_OVERHEAD_BITS + msdu;
        // Pad the PSDU up to symbol granularity.
        let n_data = 4.0 * self.phy_data_rate;
        let padding =
            ((SERVICE_TAIL_BITS + mac_frame) / n_data).ceil() * n_data
                - (SERVICE_TAIL_BITS + mac_frame);
        let cpsdu = SERVICE_TAIL_BITS + mac_frame + padding;
        let ppdu_us = OFDM_PREAMBLE_US + self.ofdm_signal_us + cpsdu / self.data_rate;
        Duration::from_micros(ppdu_us.ceil() as u64)
    }

    /// ACK airtime including the preceding SIFS, ceiling-rounded.
    pub fn ack_frame_time(&self) -> Duration {
        let ack_bits = SERVICE_TAIL_BITS + ACK_BITS;
        let ack_us =
            OFDM_PREAMBLE_US + self.ofdm_signal_us + ack_bits / self.ctr_rate + 16.0;
        Duration::from_micros(ack_us.ceil() as u64)
    }

    /// Total RTS/CTS exchange time (RTS 14 bytes, CTS 20 bytes).
    pub fn rts_cts_time(&self) -> Duration {
        let us = 2.0 * 16.0
            + (14.0 * 8.0) / self.ctr_rate
            + LEGACY_DIFS_US
            + (20.0 * 8.0) / self.ctr_rate;
        Duration::from_nanos((us * 1e3).round() as u64)
    }
}
