//! Regional parameters
//!
//! Every regional constant the MAC needs is answered by [`Region`]. The
//! mutable channel/band state built from these tables lives in
//! [`ChannelPlan`](super::channels::ChannelPlan).

use core::time::Duration;

use super::channels::ChannelMask;
use crate::radio::traits::{Bandwidth, Modulation};

/// Datarate index
pub type DataRate = u8;

/// Upper bound on the channel table across all regions
pub const MAX_CHANNELS: usize = 72;

/// Upper bound on the band table across all regions
pub const MAX_BANDS: usize = 5;

/// Channels that are always present in EU-like plans
pub const DEFAULT_CHANNELS: usize = 3;

const EU_DATARATES: [u8; 8] = [12, 11, 10, 9, 8, 7, 7, 50];
const US_DATARATES: [u8; 16] = [10, 9, 8, 7, 8, 0, 0, 0, 12, 11, 10, 9, 8, 7, 0, 0];

const EU868_MAX_PAYLOAD: [u8; 8] = [51, 51, 51, 115, 242, 242, 242, 242];
const EU868_MAX_PAYLOAD_REPEATER: [u8; 8] = [51, 51, 51, 115, 222, 222, 222, 222];
const EU433_MAX_PAYLOAD: [u8; 8] = [59, 59, 59, 123, 250, 250, 250, 250];
const EU433_MAX_PAYLOAD_REPEATER: [u8; 8] = [59, 59, 59, 123, 230, 230, 230, 230];
const US_MAX_PAYLOAD: [u8; 16] = [11, 53, 125, 242, 242, 0, 0, 0, 53, 129, 242, 242, 242, 242, 0, 0];
const US_MAX_PAYLOAD_REPEATER: [u8; 16] =
    [11, 53, 125, 242, 242, 0, 0, 0, 33, 109, 222, 222, 222, 222, 0, 0];

const EU_TX_POWER: [i8; 6] = [20, 14, 11, 8, 5, 2];
const US_TX_POWER: [i8; 11] = [30, 28, 26, 24, 22, 20, 18, 16, 14, 12, 10];

/// RX1 downlink datarate for US uplink DR0..DR4 and RX1 offset 0..3
const US_RX1_DATARATE: [[u8; 4]; 5] = [
    [10, 9, 8, 8],
    [11, 10, 9, 8],
    [12, 11, 10, 9],
    [13, 12, 11, 10],
    [13, 13, 12, 11],
];

const US_FIRST_RX1_CHANNEL: u32 = 923_300_000;
const US_LAST_RX1_CHANNEL: u32 = 927_500_000;
const US_RX1_STEP: u32 = 600_000;

const US_BW125_BASE: u32 = 902_300_000;
const US_BW125_STEP: u32 = 200_000;
const US_BW500_BASE: u32 = 903_000_000;
const US_BW500_STEP: u32 = 1_600_000;

/// TX power index for 26 dBm in the US power table
pub(crate) const US_TX_POWER_26_DBM: u8 = 2;
/// TX power index for 20 dBm in the US power table
pub(crate) const US_TX_POWER_20_DBM: u8 = 5;

/// Join retransmission duty cycles, by elapsed time since boot
const BACKOFF_DC_1_HOUR: u16 = 100;
const BACKOFF_DC_10_HOURS: u16 = 1000;
const BACKOFF_DC_24_HOURS: u16 = 10000;

/// An uplink channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel {
    /// Channel frequency in Hz, zero when the slot is undefined
    pub frequency: u32,
    /// Minimum data rate
    pub min_dr: DataRate,
    /// Maximum data rate
    pub max_dr: DataRate,
    /// Index into the band table
    pub band: u8,
}

impl Channel {
    /// Build a channel
    pub const fn new(frequency: u32, min_dr: DataRate, max_dr: DataRate, band: u8) -> Self {
        Self {
            frequency,
            min_dr,
            max_dr,
            band,
        }
    }

    /// Whether the slot holds a channel
    pub fn is_defined(&self) -> bool {
        self.frequency != 0
    }

    /// Whether `dr` lies within the channel's datarate range
    pub fn supports(&self, dr: DataRate) -> bool {
        self.min_dr <= dr && dr <= self.max_dr
    }
}

/// Static description of a sub-band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandDef {
    /// Inverse duty cycle (100 means 1 %)
    pub duty_cycle: u16,
    /// Lowest frequency in the band, inclusive
    pub min_freq: u32,
    /// Highest frequency in the band, inclusive
    pub max_freq: u32,
}

const EU868_BANDS: [BandDef; 5] = [
    BandDef { duty_cycle: 100, min_freq: 865_000_000, max_freq: 868_000_000 },
    BandDef { duty_cycle: 100, min_freq: 868_000_001, max_freq: 868_600_000 },
    BandDef { duty_cycle: 1000, min_freq: 868_700_000, max_freq: 869_200_000 },
    BandDef { duty_cycle: 10, min_freq: 869_400_000, max_freq: 869_650_000 },
    BandDef { duty_cycle: 100, min_freq: 869_700_000, max_freq: 870_000_000 },
];
const EU433_BANDS: [BandDef; 1] =
    [BandDef { duty_cycle: 100, min_freq: 433_050_000, max_freq: 434_790_000 }];
const CN780_BANDS: [BandDef; 1] =
    [BandDef { duty_cycle: 100, min_freq: 779_000_000, max_freq: 787_000_000 }];
const US_BANDS: [BandDef; 1] =
    [BandDef { duty_cycle: 1, min_freq: 902_000_000, max_freq: 928_000_000 }];

const EU868_CHANNELS: [Channel; 3] = [
    Channel::new(868_100_000, 0, 5, 1),
    Channel::new(868_300_000, 0, 5, 1),
    Channel::new(868_500_000, 0, 5, 1),
];
const EU433_CHANNELS: [Channel; 3] = [
    Channel::new(433_175_000, 0, 5, 0),
    Channel::new(433_375_000, 0, 5, 0),
    Channel::new(433_575_000, 0, 5, 0),
];
const CN780_CHANNELS: [Channel; 3] = [
    Channel::new(779_500_000, 0, 5, 0),
    Channel::new(779_700_000, 0, 5, 0),
    Channel::new(779_900_000, 0, 5, 0),
];

/// Supported regional channel plans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    /// EU 863-870 MHz
    Eu868,
    /// EU 433 MHz
    Eu433,
    /// CN 779-787 MHz
    Cn780,
    /// US 902-928 MHz, all 72 channels
    Us915,
    /// US 902-928 MHz restricted to one 8-channel sub-band
    Us915Hybrid,
}

impl Region {
    /// Whether the plan is a fixed US-style 64+8 channel plan
    pub fn is_us(&self) -> bool {
        matches!(self, Region::Us915 | Region::Us915Hybrid)
    }

    /// Size of the channel table
    pub fn max_channels(&self) -> usize {
        if self.is_us() {
            MAX_CHANNELS
        } else {
            16
        }
    }

    /// Whether band duty-cycle limits apply by default
    pub fn duty_cycle_default(&self) -> bool {
        matches!(self, Region::Eu868)
    }

    /// Lowest uplink datarate
    pub fn tx_min_datarate(&self) -> DataRate {
        0
    }

    /// Highest uplink datarate
    pub fn tx_max_datarate(&self) -> DataRate {
        if self.is_us() {
            4
        } else {
            7
        }
    }

    /// Lowest downlink datarate
    pub fn rx_min_datarate(&self) -> DataRate {
        if self.is_us() {
            8
        } else {
            0
        }
    }

    /// Highest downlink datarate
    pub fn rx_max_datarate(&self) -> DataRate {
        if self.is_us() {
            13
        } else {
            7
        }
    }

    /// Largest RX1 datarate offset
    pub fn max_rx1_dr_offset(&self) -> u8 {
        if self.is_us() {
            3
        } else {
            5
        }
    }

    /// Datarate used after reset
    pub fn default_datarate(&self) -> DataRate {
        0
    }

    /// TX power index used after reset
    pub fn default_tx_power(&self) -> u8 {
        if self.is_us() {
            US_TX_POWER_20_DBM
        } else {
            1
        }
    }

    /// Lowest power index, i.e. the highest output power
    pub fn max_tx_power(&self) -> u8 {
        0
    }

    /// Highest power index, i.e. the lowest output power
    pub fn min_tx_power(&self) -> u8 {
        if self.is_us() {
            (US_TX_POWER.len() - 1) as u8
        } else {
            (EU_TX_POWER.len() - 1) as u8
        }
    }

    /// Output power in dBm for a power index
    pub fn tx_power_dbm(&self, index: u8) -> Option<i8> {
        let table: &[i8] = if self.is_us() { &US_TX_POWER } else { &EU_TX_POWER };
        table.get(index as usize).copied()
    }

    /// Radio modulation for a datarate
    pub fn modulation(&self, dr: DataRate) -> Option<Modulation> {
        if self.is_us() {
            let sf = *US_DATARATES.get(dr as usize)?;
            if sf == 0 {
                return None;
            }
            let bandwidth = if dr >= 4 { Bandwidth::Khz500 } else { Bandwidth::Khz125 };
            return Some(Modulation::LoRa {
                spreading_factor: sf,
                bandwidth,
                coding_rate: 5,
            });
        }

        match dr {
            0..=5 => Some(Modulation::LoRa {
                spreading_factor: EU_DATARATES[dr as usize],
                bandwidth: Bandwidth::Khz125,
                coding_rate: 5,
            }),
            6 => Some(Modulation::LoRa {
                spreading_factor: 7,
                bandwidth: Bandwidth::Khz250,
                coding_rate: 5,
            }),
            7 => Some(Modulation::Fsk {
                bitrate: EU_DATARATES[7] as u32 * 1000,
                deviation: 25_000,
            }),
            _ => None,
        }
    }

    /// Maximum MACPayload size (FOpts + FRMPayload) for a datarate
    pub fn max_payload(&self, dr: DataRate, repeater: bool) -> u8 {
        let table: &[u8] = match (self, repeater) {
            (Region::Eu868, false) => &EU868_MAX_PAYLOAD,
            (Region::Eu868, true) => &EU868_MAX_PAYLOAD_REPEATER,
            (Region::Eu433 | Region::Cn780, false) => &EU433_MAX_PAYLOAD,
            (Region::Eu433 | Region::Cn780, true) => &EU433_MAX_PAYLOAD_REPEATER,
            (_, false) => &US_MAX_PAYLOAD,
            (_, true) => &US_MAX_PAYLOAD_REPEATER,
        };
        table.get(dr as usize).copied().unwrap_or(0)
    }

    /// Preamble timeout in symbols for a downlink datarate
    pub fn symbol_timeout(&self, dr: DataRate) -> u16 {
        if self.is_us() {
            match dr {
                0 => 5,
                1 | 2 | 8 | 9 | 10 => 8,
                3 | 11 => 10,
                4 | 12 => 14,
                13 => 16,
                _ => 5,
            }
        } else {
            match dr {
                3 | 4 => 8,
                5 => 10,
                6 => 14,
                _ => 5,
            }
        }
    }

    /// Downlink datarate of the first receive window
    pub fn rx1_datarate(&self, uplink_dr: DataRate, offset: u8) -> DataRate {
        if self.is_us() {
            let row = US_RX1_DATARATE[(uplink_dr as usize).min(US_RX1_DATARATE.len() - 1)];
            row[(offset as usize).min(row.len() - 1)]
        } else {
            uplink_dr.saturating_sub(offset)
        }
    }

    /// Frequency of the first receive window for an uplink on `channel`
    pub fn rx1_frequency(&self, channel: usize, uplink_freq: u32) -> u32 {
        if self.is_us() {
            US_FIRST_RX1_CHANNEL + (channel % 8) as u32 * US_RX1_STEP
        } else {
            uplink_freq
        }
    }

    /// Default second receive window `(frequency, datarate)`
    pub fn rx2_default(&self) -> (u32, DataRate) {
        match self {
            Region::Eu868 => (869_525_000, 0),
            Region::Eu433 => (434_665_000, 0),
            Region::Cn780 => (786_000_000, 0),
            Region::Us915 | Region::Us915Hybrid => (US_FIRST_RX1_CHANNEL, 8),
        }
    }

    /// Whether a frequency is within the radio's legal range for the region
    pub fn frequency_valid(&self, freq: u32) -> bool {
        self.legal_range().contains(&freq)
    }

    fn legal_range(&self) -> core::ops::RangeInclusive<u32> {
        match self {
            Region::Eu868 => 863_000_000..=870_000_000,
            Region::Eu433 => 433_050_000..=434_790_000,
            Region::Cn780 => 779_000_000..=787_000_000,
            Region::Us915 | Region::Us915Hybrid => 902_000_000..=928_000_000,
        }
    }

    /// Whether `freq` is acceptable as the RX2 frequency
    pub fn rx2_frequency_valid(&self, freq: u32) -> bool {
        if self.is_us() {
            (US_FIRST_RX1_CHANNEL..=US_LAST_RX1_CHANNEL).contains(&freq)
                && (freq - US_FIRST_RX1_CHANNEL) % US_RX1_STEP == 0
        } else {
            self.legal_range().contains(&freq)
        }
    }

    /// Sub-band definitions
    pub fn bands(&self) -> &'static [BandDef] {
        match self {
            Region::Eu868 => &EU868_BANDS,
            Region::Eu433 => &EU433_BANDS,
            Region::Cn780 => &CN780_BANDS,
            Region::Us915 | Region::Us915Hybrid => &US_BANDS,
        }
    }

    /// Band index for a frequency
    pub fn band_for(&self, freq: u32) -> Option<u8> {
        if *self != Region::Eu868 {
            return self.legal_range().contains(&freq).then_some(0);
        }
        self.bands()
            .iter()
            .position(|band| freq >= band.min_freq && freq <= band.max_freq)
            .map(|idx| idx as u8)
    }

    /// Channel definition at `index` in a freshly reset plan
    pub fn default_channel(&self, index: usize) -> Channel {
        if self.is_us() {
            return match index {
                0..=63 => Channel::new(US_BW125_BASE + index as u32 * US_BW125_STEP, 0, 3, 0),
                64..=71 => {
                    Channel::new(US_BW500_BASE + (index as u32 - 64) * US_BW500_STEP, 4, 4, 0)
                }
                _ => Channel::default(),
            };
        }

        let defaults = match self {
            Region::Eu433 => &EU433_CHANNELS,
            Region::Cn780 => &CN780_CHANNELS,
            _ => &EU868_CHANNELS,
        };
        defaults.get(index).copied().unwrap_or_default()
    }

    /// Channel mask enabling the default channels
    pub fn default_channel_mask(&self) -> ChannelMask {
        match self {
            Region::Us915 => ChannelMask::new([0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF, 0x00FF, 0x0000]),
            Region::Us915Hybrid => {
                ChannelMask::new([0x00FF, 0x0000, 0x0000, 0x0000, 0x0001, 0x0000])
            }
            _ => ChannelMask::new([0x0007, 0, 0, 0, 0, 0]),
        }
    }

    /// Datarate for the join attempt number `trials` (starting at 1)
    pub fn join_datarate(&self, trials: u16) -> DataRate {
        if self.is_us() {
            return if trials & 1 == 1 { 4 } else { 1 };
        }

        if trials % 48 == 0 {
            0
        } else if trials % 32 == 0 {
            1
        } else if trials % 24 == 0 {
            2
        } else if trials % 16 == 0 {
            3
        } else if trials % 8 == 0 {
            4
        } else {
            5
        }
    }

    /// Duty cycle imposed on join retransmissions, `None` where it does not apply
    pub fn join_backoff_duty_cycle(&self, since_boot: Duration) -> Option<u16> {
        if self.is_us() {
            return None;
        }
        let hours = since_boot.as_secs() / 3600;
        Some(if hours < 1 {
            BACKOFF_DC_1_HOUR
        } else if hours < 11 {
            BACKOFF_DC_10_HOURS
        } else {
            BACKOFF_DC_24_HOURS
        })
    }
}
