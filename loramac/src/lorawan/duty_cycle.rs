//! Channel selection under regional duty-cycle limits
//!
//! Every transmission silences its band for `airtime * (duty_cycle - 1)` and
//! the whole device for `airtime * (aggregated - 1)`. Before joining, EU-like
//! plans add a retransmission back-off with random jitter.

use core::time::Duration;

use heapless::Vec;
use rand_core::RngCore;

use super::channels::ChannelPlan;
use super::region::{DataRate, DEFAULT_CHANNELS, MAX_CHANNELS, US_TX_POWER_20_DBM, US_TX_POWER_26_DBM};

/// Upper bound of the random jitter added to join back-offs
pub const BACKOFF_RND_OFFSET: Duration = Duration::from_millis(600_000);

/// `MaxDCycle` value that switches the device off
pub const DEVICE_OFF: u8 = 255;

/// Outcome of a channel search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Transmit now on this channel
    Channel(usize),
    /// Every usable band is silenced for at least this long
    Wait(Duration),
}

/// Uniform value in `[min, max)`
pub(crate) fn random_range<G: RngCore>(rng: &mut G, min: u32, max: u32) -> u32 {
    if max <= min {
        return min;
    }
    min + rng.next_u32() % (max - min)
}

/// Device-wide duty-cycle state
#[derive(Debug, Clone)]
pub struct DutyCycle {
    /// Band limits enforced
    pub enabled: bool,
    /// Last `MaxDCycle` received from the network
    pub max_dcycle: u8,
    /// Aggregated inverse duty cycle, `1 << max_dcycle`
    pub aggregated_dcycle: u16,
    /// Device-wide silence after the last transmission
    pub aggregated_time_off: Duration,
    /// When the last transmission finished
    pub aggregated_last_tx: Duration,
}

impl DutyCycle {
    /// Fresh state
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            max_dcycle: 0,
            aggregated_dcycle: 1,
            aggregated_time_off: Duration::ZERO,
            aggregated_last_tx: Duration::ZERO,
        }
    }

    /// Forget network-imposed limits
    pub fn reset(&mut self) {
        self.max_dcycle = 0;
        self.aggregated_dcycle = 1;
    }

    /// Apply a DutyCycleReq
    pub fn set_max_dcycle(&mut self, value: u8) {
        self.max_dcycle = value;
        if value != DEVICE_OFF {
            self.aggregated_dcycle = 1 << (value & 0x0F);
        }
    }

    /// Whether the network switched the device off
    pub fn is_device_off(&self) -> bool {
        self.max_dcycle == DEVICE_OFF
    }

    /// Pick a random usable channel for `datarate`
    ///
    /// Returns `None` when no enabled channel supports the datarate at all.
    pub fn select_channel<G: RngCore>(
        &mut self,
        plan: &mut ChannelPlan,
        datarate: DataRate,
        joined: bool,
        now: Duration,
        rng: &mut G,
    ) -> Option<Selection> {
        if self.max_dcycle == 0 {
            self.aggregated_time_off = Duration::ZERO;
        }
        plan.refill(datarate);

        let elapsed = now.saturating_sub(self.aggregated_last_tx);
        if self.aggregated_time_off > elapsed {
            return Some(Selection::Wait(self.aggregated_time_off - elapsed));
        }
        self.aggregated_time_off = Duration::ZERO;

        let mut next_tx_delay: Option<Duration> = None;
        for band in plan.bands_mut() {
            if self.enabled {
                let wait = band.refresh(now);
                if !wait.is_zero() {
                    next_tx_delay = Some(next_tx_delay.map_or(wait, |d| d.min(wait)));
                }
            } else {
                band.time_off = Duration::ZERO;
            }
        }

        let mut candidates: Vec<u8, MAX_CHANNELS> = Vec::new();
        let mut delayed = false;
        let only_join_channels = !joined && !plan.region().is_us();
        for (index, channel) in plan.channels().iter().enumerate() {
            if !plan.is_selectable(index) || !channel.is_defined() {
                continue;
            }
            if only_join_channels && index >= DEFAULT_CHANNELS {
                continue;
            }
            if !channel.supports(datarate) {
                continue;
            }
            let band_silenced = plan
                .bands()
                .get(channel.band as usize)
                .map_or(false, |band| !band.time_off.is_zero());
            if band_silenced {
                delayed = true;
                continue;
            }
            // Bounded by the channel table size.
            let _ = candidates.push(index as u8);
        }

        if !candidates.is_empty() {
            let pick = random_range(rng, 0, candidates.len() as u32) as usize;
            let channel = candidates[pick] as usize;
            plan.consume(channel);
            return Some(Selection::Channel(channel));
        }

        if delayed {
            return Some(Selection::Wait(next_tx_delay.unwrap_or(Duration::ZERO)));
        }
        None
    }

    /// Account a finished transmission on `channel`
    ///
    /// `first_tx` suppresses the join back-off jitter for the very first
    /// transmission after boot.
    pub fn on_tx_done<G: RngCore>(
        &mut self,
        plan: &mut ChannelPlan,
        channel: usize,
        time_on_air: Duration,
        joined: bool,
        first_tx: bool,
        now: Duration,
        rng: &mut G,
    ) {
        let region = plan.region();
        let enabled = self.enabled;
        if let Some(band) = plan.band_of_mut(channel) {
            let mut duty_cycle = band.duty_cycle;
            let mut jitter = false;
            if !joined {
                if let Some(join_dc) = region.join_backoff_duty_cycle(now) {
                    duty_cycle = duty_cycle.max(join_dc);
                }
                jitter = !first_tx;
            }

            band.last_tx_done = now;
            band.time_off = if enabled {
                time_on_air * (duty_cycle.saturating_sub(1) as u32)
            } else {
                Duration::ZERO
            };
            if enabled && jitter {
                let extra = random_range(rng, 0, BACKOFF_RND_OFFSET.as_millis() as u32 + 1);
                band.time_off += Duration::from_millis(extra as u64);
            }
        }

        self.aggregated_last_tx = now;
        self.aggregated_time_off += time_on_air * (self.aggregated_dcycle.saturating_sub(1) as u32);
    }
}

/// Apply regional output power caps to a power index
///
/// Higher indexes mean lower output power, so capping takes the maximum.
pub fn limit_tx_power(plan: &ChannelPlan, datarate: DataRate, tx_power: u8) -> u8 {
    if !plan.region().is_us() {
        return tx_power;
    }
    if datarate == 4 || (8..=13).contains(&datarate) {
        tx_power.max(US_TX_POWER_26_DBM)
    } else if plan.mask().count_bw125() < 50 {
        tx_power.max(US_TX_POWER_20_DBM)
    } else {
        tx_power
    }
}
