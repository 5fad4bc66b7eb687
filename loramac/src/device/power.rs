//! Power monitoring
//!
//! This module tracks:
//! - Battery level, reported to the network in DevStatusAns
//! - Radio airtime spent transmitting and listening

use core::time::Duration;

/// Battery level reported when the device runs on external power
pub const BATTERY_EXTERNAL: u8 = 0;

/// Battery level reported when the level cannot be measured
pub const BATTERY_UNKNOWN: u8 = 255;

/// Power states derived from the battery level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Normal operation
    Normal,
    /// Battery below the low threshold
    PowerSaving,
    /// Battery below the critical threshold
    Critical,
}

/// Power consumption metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerMetrics {
    /// Battery level (0 = external power, 1-254 = level, 255 = unknown)
    pub battery_level: u8,
    /// Time spent transmitting
    pub tx_time: Duration,
    /// Time spent in bounded receive windows
    pub rx_time: Duration,
    /// Number of transmissions
    pub tx_count: u32,
}

impl PowerMetrics {
    /// Create new power metrics
    pub fn new() -> Self {
        Self {
            battery_level: BATTERY_UNKNOWN,
            tx_time: Duration::ZERO,
            rx_time: Duration::ZERO,
            tx_count: 0,
        }
    }

    /// Get total active time
    pub fn get_active_time(&self) -> Duration {
        self.tx_time + self.rx_time
    }
}

impl Default for PowerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Power management configuration
#[derive(Debug, Clone)]
pub struct PowerConfig {
    /// Critical battery threshold (1-254)
    pub critical_threshold: u8,
    /// Low battery threshold (1-254)
    pub low_threshold: u8,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 10,
            low_threshold: 30,
        }
    }
}

/// Power manager for LoRaWAN devices
#[derive(Debug, Clone)]
pub struct PowerManager {
    config: PowerConfig,
    metrics: PowerMetrics,
    state: PowerState,
}

impl PowerManager {
    /// Create new power manager
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            metrics: PowerMetrics::new(),
            state: PowerState::Normal,
        }
    }

    /// Update battery level and check thresholds
    ///
    /// External power and unknown levels never leave the normal state.
    pub fn update_battery(&mut self, level: u8) -> PowerState {
        self.metrics.battery_level = level;

        self.state = match level {
            BATTERY_EXTERNAL | BATTERY_UNKNOWN => PowerState::Normal,
            l if l <= self.config.critical_threshold => PowerState::Critical,
            l if l <= self.config.low_threshold => PowerState::PowerSaving,
            _ => PowerState::Normal,
        };

        self.state
    }

    /// Battery level as reported in DevStatusAns
    pub fn battery_level(&self) -> u8 {
        self.metrics.battery_level
    }

    /// Record a transmission
    pub fn record_tx(&mut self, duration: Duration) {
        self.metrics.tx_time += duration;
        self.metrics.tx_count = self.metrics.tx_count.wrapping_add(1);
    }

    /// Record a closed receive window
    pub fn record_rx(&mut self, duration: Duration) {
        self.metrics.rx_time += duration;
    }

    /// Get current power metrics
    pub fn get_metrics(&self) -> &PowerMetrics {
        &self.metrics
    }

    /// Get current power state
    pub fn get_state(&self) -> PowerState {
        self.state
    }
}

impl Default for PowerManager {
    fn default() -> Self {
        Self::new(PowerConfig::default())
    }
}
