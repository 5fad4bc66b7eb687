use core::time::Duration;

use super::device::DeviceClass;
use crate::lorawan::region::Region;

/// Default number of retransmissions for an unacknowledged confirmed uplink
pub const DEFAULT_ACK_TIMEOUT_RETRIES: u8 = 5;

/// Default cap on consecutive join attempts before giving up
pub const DEFAULT_MAX_JOIN_TRIALS: u16 = 48;

/// Maximum length of a single receive window
pub const MAX_RX_WINDOW: Duration = Duration::from_millis(3000);

/// MAC engine configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Regional channel plan
    pub region: Region,
    /// Device class after activation
    pub class: DeviceClass,
    /// Adaptive data rate enabled
    pub adr: bool,
    /// Public network (sync word 0x34) or private (0x12)
    pub public_network: bool,
    /// Retransmissions of a confirmed uplink before it is abandoned
    pub ack_timeout_retries: u8,
    /// Use the repeater-compatible payload limits
    pub repeater_support: bool,
    /// Override the region's duty-cycle enforcement
    pub duty_cycle: Option<bool>,
    /// Consecutive join attempts before the join is reported failed
    pub max_join_trials: u16,
    /// Upper bound on a receive window
    pub max_rx_window: Duration,
}

impl MacConfig {
    /// Default configuration for a region
    pub fn new(region: Region) -> Self {
        Self {
            region,
            class: DeviceClass::A,
            adr: true,
            public_network: true,
            ack_timeout_retries: DEFAULT_ACK_TIMEOUT_RETRIES,
            repeater_support: false,
            duty_cycle: None,
            max_join_trials: DEFAULT_MAX_JOIN_TRIALS,
            max_rx_window: MAX_RX_WINDOW,
        }
    }

    /// Whether duty-cycle limits are enforced
    pub fn duty_cycle_enabled(&self) -> bool {
        self.duty_cycle.unwrap_or(self.region.duty_cycle_default())
    }
}

impl Default for MacConfig {
    fn default() -> Self {
        Self::new(Region::Eu868)
    }
}
