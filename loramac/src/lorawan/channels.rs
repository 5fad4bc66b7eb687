//! Channel and band state
//!
//! The [`ChannelPlan`] owns the channel table, the channel masks and the
//! per-band duty-cycle bookkeeping for one [`Region`].

use core::time::Duration;

use heapless::Vec;

use super::region::{BandDef, Channel, DataRate, Region, DEFAULT_CHANNELS, MAX_BANDS, MAX_CHANNELS};

/// Number of 16-bit words in a channel mask
pub const MASK_WORDS: usize = 6;

/// Number of 125 kHz channels in US-style plans
const US_BW125_CHANNELS: usize = 64;

/// Errors returned when editing the channel table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelError {
    /// Index outside the table or one of the fixed default channels
    InvalidIndex,
    /// Frequency is zero, outside the legal range, or outside every band
    FrequencyInvalid,
    /// Datarate range is inverted or outside the region's uplink range
    DatarateInvalid,
    /// Both frequency and datarate range are invalid
    FrequencyAndDatarateInvalid,
    /// The region has a fixed channel plan
    FixedPlan,
}

/// Bit mask of enabled channels, 16 channels per word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMask([u16; MASK_WORDS]);

impl ChannelMask {
    /// Build from raw words
    pub const fn new(words: [u16; MASK_WORDS]) -> Self {
        Self(words)
    }

    /// Raw words
    pub fn words(&self) -> &[u16; MASK_WORDS] {
        &self.0
    }

    /// A single word
    pub fn word(&self, index: usize) -> u16 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Replace a single word
    pub fn set_word(&mut self, index: usize, value: u16) {
        if let Some(word) = self.0.get_mut(index) {
            *word = value;
        }
    }

    /// Whether channel `index` is enabled
    pub fn is_enabled(&self, index: usize) -> bool {
        self.word(index / 16) & (1 << (index % 16)) != 0
    }

    /// Enable channel `index`
    pub fn enable(&mut self, index: usize) {
        if let Some(word) = self.0.get_mut(index / 16) {
            *word |= 1 << (index % 16);
        }
    }

    /// Disable channel `index`, returns false if out of range
    pub fn disable(&mut self, index: usize) -> bool {
        if index >= MAX_CHANNELS {
            return false;
        }
        self.0[index / 16] &= !(1 << (index % 16));
        true
    }

    /// Number of enabled 125 kHz channels (US-style plans)
    pub fn count_bw125(&self) -> u32 {
        self.0[..US_BW125_CHANNELS / 16]
            .iter()
            .map(|word| word.count_ones())
            .sum()
    }

    /// Whether no channel is enabled
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    fn intersect(&mut self, other: &ChannelMask) {
        for (word, other) in self.0.iter_mut().zip(other.0.iter()) {
            *word &= other;
        }
    }

    /// Reduce a hybrid mask to its first 8-channel block holding more than
    /// five enabled channels, returns false if there is none
    pub fn validate_hybrid(&mut self) -> bool {
        let mut found = None;
        for i in 0..4 {
            let low = self.0[i] & 0x00FF;
            let high = self.0[i] & 0xFF00;
            if low.count_ones() > 5 {
                self.0[i] = low;
                self.0[4] = 1 << (i * 2);
                found = Some(i);
                break;
            } else if high.count_ones() > 5 {
                self.0[i] = high;
                self.0[4] = 1 << (i * 2 + 1);
                found = Some(i);
                break;
            }
        }

        match found {
            Some(block) => {
                for i in (0..4).filter(|i| *i != block) {
                    self.0[i] = 0;
                }
                true
            }
            None => false,
        }
    }

    /// Rebuild the 125 kHz words from a block mask (bit n enables block n)
    pub fn reenable_blocks(&mut self, block_mask: u16) {
        for i in 0..4 {
            let mut word = 0;
            if block_mask & (1 << (i * 2)) != 0 {
                word |= 0x00FF;
            }
            if block_mask & (1 << (i * 2 + 1)) != 0 {
                word |= 0xFF00;
            }
            self.0[i] = word;
        }
        self.0[4] = block_mask;
        self.0[5] = 0;
    }
}

/// Duty-cycle state of one band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    /// Inverse duty cycle (100 means 1 %)
    pub duty_cycle: u16,
    /// Silence imposed after the last transmission
    pub time_off: Duration,
    /// When the last transmission in this band finished
    pub last_tx_done: Duration,
}

impl Band {
    fn new(def: &BandDef) -> Self {
        Self {
            duty_cycle: def.duty_cycle,
            time_off: Duration::ZERO,
            last_tx_done: Duration::ZERO,
        }
    }

    /// Clear the time-off once it has elapsed, returns the remaining wait
    pub fn refresh(&mut self, now: Duration) -> Duration {
        let elapsed = now.saturating_sub(self.last_tx_done);
        if self.time_off <= elapsed {
            self.time_off = Duration::ZERO;
        }
        self.time_off.saturating_sub(elapsed)
    }
}

/// Channel table, masks and bands of a region
#[derive(Debug, Clone)]
pub struct ChannelPlan {
    region: Region,
    channels: Vec<Channel, MAX_CHANNELS>,
    bands: Vec<Band, MAX_BANDS>,
    mask: ChannelMask,
    remaining: ChannelMask,
}

impl ChannelPlan {
    /// Plan in its reset state
    pub fn new(region: Region) -> Self {
        let mut plan = Self {
            region,
            channels: Vec::new(),
            bands: Vec::new(),
            mask: region.default_channel_mask(),
            remaining: region.default_channel_mask(),
        };
        plan.reset();
        plan
    }

    /// Restore default channels and masks
    ///
    /// Band time-off survives a reset.
    pub fn reset(&mut self) {
        self.channels.clear();
        for index in 0..self.region.max_channels().min(MAX_CHANNELS) {
            // Capacity equals the largest region table.
            let _ = self.channels.push(self.region.default_channel(index));
        }
        if self.bands.is_empty() {
            for def in self.region.bands().iter().take(MAX_BANDS) {
                let _ = self.bands.push(Band::new(def));
            }
        }
        self.mask = self.region.default_channel_mask();
        self.remaining = self.mask;
    }

    /// Region of the plan
    pub fn region(&self) -> Region {
        self.region
    }

    /// Channel at `index`, if defined
    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index).filter(|ch| ch.is_defined())
    }

    /// All channel slots, including undefined ones
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Active channel mask
    pub fn mask(&self) -> &ChannelMask {
        &self.mask
    }

    /// Channels not yet used in the current hopping cycle (US-style plans)
    pub fn remaining(&self) -> &ChannelMask {
        &self.remaining
    }

    /// Band table
    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub(crate) fn bands_mut(&mut self) -> &mut [Band] {
        &mut self.bands
    }

    pub(crate) fn band_of_mut(&mut self, channel: usize) -> Option<&mut Band> {
        let band = self.channels.get(channel)?.band as usize;
        self.bands.get_mut(band)
    }

    /// Install a new active mask
    ///
    /// US-style plans also drop the removed channels from the current
    /// hopping cycle.
    pub fn set_mask(&mut self, mask: ChannelMask) {
        self.mask = mask;
        if self.region.is_us() {
            self.remaining.intersect(&mask);
        }
    }

    /// Re-enable the default channels without touching additional ones
    pub fn enable_default_channels(&mut self) {
        match self.region {
            Region::Us915 => self.mask = self.region.default_channel_mask(),
            Region::Us915Hybrid => {
                let default = self.region.default_channel_mask();
                self.mask.reenable_blocks(default.word(4));
            }
            _ => self.mask.set_word(0, self.mask.word(0) | 0x0007),
        }
    }

    /// Re-enable the default 500 kHz channels (US-style plans)
    pub fn enable_default_bw500(&mut self) {
        if self.region.is_us() {
            let default = self.region.default_channel_mask();
            self.mask.set_word(4, default.word(4));
        }
    }

    /// Make sure a hopping cycle has channels to pick from
    pub(crate) fn refill(&mut self, datarate: DataRate) {
        if self.region.is_us() {
            if self.remaining.count_bw125() == 0 {
                for i in 0..4 {
                    self.remaining.set_word(i, self.mask.word(i));
                }
            }
            if datarate >= 4 && self.remaining.word(4) & 0x00FF == 0 {
                self.remaining.set_word(4, self.mask.word(4));
            }
        } else if self.mask.word(0) == 0 {
            self.enable_default_channels();
        }
    }

    /// Whether channel `index` can be picked in the current cycle
    pub(crate) fn is_selectable(&self, index: usize) -> bool {
        if self.region.is_us() {
            self.remaining.is_enabled(index)
        } else {
            self.mask.is_enabled(index)
        }
    }

    /// Remove a 125 kHz channel from the current hopping cycle
    pub(crate) fn consume(&mut self, index: usize) {
        if self.region.is_us() && index < US_BW125_CHANNELS {
            self.remaining.disable(index);
        }
    }

    /// Add or replace a channel
    pub fn add_channel(
        &mut self,
        index: usize,
        frequency: u32,
        min_dr: DataRate,
        max_dr: DataRate,
    ) -> Result<(), ChannelError> {
        if self.region.is_us() {
            return Err(ChannelError::FixedPlan);
        }
        if index >= self.channels.len() {
            return Err(ChannelError::InvalidIndex);
        }

        let mut dr_invalid = min_dr > max_dr
            || min_dr < self.region.tx_min_datarate()
            || max_dr > self.region.tx_max_datarate();
        let mut freq_invalid = false;

        if index < DEFAULT_CHANNELS {
            let default = self.region.default_channel(index);
            if frequency != default.frequency {
                freq_invalid = true;
            }
            if min_dr > self.region.default_datarate() || !(5..=self.region.tx_max_datarate()).contains(&max_dr) {
                dr_invalid = true;
            }
        }

        let band = if frequency != 0 && self.region.frequency_valid(frequency) && !freq_invalid {
            self.region.band_for(frequency)
        } else {
            None
        };
        if band.is_none() {
            freq_invalid = true;
        }

        match (freq_invalid, dr_invalid, band) {
            (true, true, _) => Err(ChannelError::FrequencyAndDatarateInvalid),
            (true, false, _) => Err(ChannelError::FrequencyInvalid),
            (false, true, _) => Err(ChannelError::DatarateInvalid),
            (false, false, Some(band)) => {
                self.channels[index] = Channel::new(frequency, min_dr, max_dr, band);
                self.mask.enable(index);
                Ok(())
            }
            (false, false, None) => Err(ChannelError::FrequencyInvalid),
        }
    }

    /// Remove a channel; the default channels cannot be removed
    pub fn remove_channel(&mut self, index: usize) -> Result<(), ChannelError> {
        if self.region.is_us() {
            return Err(ChannelError::FixedPlan);
        }
        if index < DEFAULT_CHANNELS || index >= self.channels.len() {
            return Err(ChannelError::InvalidIndex);
        }
        self.channels[index] = Channel::default();
        self.mask.disable(index);
        Ok(())
    }
}
