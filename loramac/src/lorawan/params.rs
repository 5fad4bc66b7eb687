use core::time::Duration;

use super::phy::TimingParams;
use super::region::{DataRate, Region};

/// Radio and timing parameters negotiated with the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacParams {
    /// Uplink datarate
    pub datarate: DataRate,
    /// Uplink TX power index
    pub tx_power: u8,
    /// Transmissions per unconfirmed uplink
    pub nb_rep: u8,
    /// Offset between uplink and RX1 datarate
    pub rx1_dr_offset: u8,
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// RX2 datarate
    pub rx2_datarate: DataRate,
    /// Receive window delays
    pub timing: TimingParams,
    /// Upper bound on a receive window
    pub max_rx_window: Duration,
}

impl MacParams {
    /// Regional defaults
    pub fn new(region: Region, max_rx_window: Duration) -> Self {
        let (rx2_frequency, rx2_datarate) = region.rx2_default();
        Self {
            datarate: region.default_datarate(),
            tx_power: region.default_tx_power(),
            nb_rep: 1,
            rx1_dr_offset: 0,
            rx2_frequency,
            rx2_datarate,
            timing: TimingParams::default(),
            max_rx_window,
        }
    }

    /// Set RX1 delay from the 4-bit `Del` field (0 means one second); RX2 follows one second later
    pub fn set_rx_delay(&mut self, delay: u8) {
        let seconds = match delay & 0x0F {
            0 => 1,
            d => d as u64,
        };
        self.timing.rx1_delay = Duration::from_secs(seconds);
        self.timing.rx2_delay = Duration::from_secs(seconds + 1);
    }
}
