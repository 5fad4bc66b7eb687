use core::time::Duration;

use super::region::{DataRate, Region};
use crate::radio::traits::{Modulation, Radio, RadioParam, RxConfig, TxConfig};

/// Time the radio needs to be ready before a receive window opens
pub const RADIO_WAKEUP_TIME: Duration = Duration::from_millis(3);

/// Largest PHY payload
pub const PHY_MAX_PAYLOAD: usize = 255;

/// MHDR + FHDR without options + FPort + MIC
pub const FRMPAYLOAD_OVERHEAD: u8 = 13;

/// Sync word of public networks
pub const SYNC_WORD_PUBLIC: u8 = 0x34;
/// Sync word of private networks
pub const SYNC_WORD_PRIVATE: u8 = 0x12;

const LORA_PREAMBLE: u16 = 8;
const FSK_PREAMBLE: u16 = 5;

/// Receive window timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingParams {
    /// RX1 delay after a data uplink
    pub rx1_delay: Duration,
    /// RX2 delay after a data uplink
    pub rx2_delay: Duration,
    /// RX1 delay after a join request
    pub join_accept_delay1: Duration,
    /// RX2 delay after a join request
    pub join_accept_delay2: Duration,
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            rx1_delay: Duration::from_millis(1000),
            rx2_delay: Duration::from_millis(2000),
            join_accept_delay1: Duration::from_millis(5000),
            join_accept_delay2: Duration::from_millis(6000),
        }
    }
}

/// Parameters of one receive window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxWindow {
    /// Frequency in Hz
    pub frequency: u32,
    /// Downlink datarate
    pub datarate: DataRate,
    /// Keep listening until told otherwise
    pub continuous: bool,
}

/// PHY layer
///
/// Translates datarates and power indexes into radio configurations.
pub struct PhyLayer<R: Radio> {
    /// Radio driver
    pub radio: R,
    region: Region,
}

impl<R: Radio> PhyLayer<R> {
    /// Create new PHY layer
    pub fn new(radio: R, region: Region) -> Self {
        Self { radio, region }
    }

    /// Initialize radio and select the network sync word
    pub fn init(&mut self, public_network: bool) -> Result<(), R::Error> {
        self.radio.init()?;
        self.set_public_network(public_network)?;
        self.radio.sleep()
    }

    /// Select public or private sync word
    pub fn set_public_network(&mut self, public: bool) -> Result<(), R::Error> {
        let word = if public { SYNC_WORD_PUBLIC } else { SYNC_WORD_PRIVATE };
        self.radio.set(RadioParam::SyncWord, word as u32)
    }

    /// Build the TX configuration for a datarate and power index
    pub fn tx_config(&self, frequency: u32, datarate: DataRate, power_index: u8) -> Option<TxConfig> {
        let modulation = self.region.modulation(datarate)?;
        let power = self.region.tx_power_dbm(power_index)?;
        let preamble_len = match modulation {
            Modulation::Fsk { .. } => FSK_PREAMBLE,
            Modulation::LoRa { .. } => LORA_PREAMBLE,
        };
        Some(TxConfig {
            power,
            frequency,
            modulation,
            preamble_len,
            iq_inverted: false,
        })
    }

    /// Configure and start a transmission, returning its airtime
    pub fn transmit(&mut self, config: TxConfig, data: &[u8]) -> Result<Duration, R::Error> {
        let time_on_air = self.radio.time_on_air(&config, data.len())?;
        self.radio.configure_tx(config)?;
        self.radio.transmit(data)?;
        Ok(time_on_air)
    }

    /// Open a receive window
    ///
    /// Returns `Ok(false)` when the datarate has no modulation in this region.
    pub fn open_rx(
        &mut self,
        window: RxWindow,
        max_window: Duration,
        max_payload: u8,
    ) -> Result<bool, R::Error> {
        let Some(modulation) = self.region.modulation(window.datarate) else {
            return Ok(false);
        };
        let config = RxConfig {
            frequency: window.frequency,
            modulation,
            symbol_timeout: self.region.symbol_timeout(window.datarate),
            window: if window.continuous { None } else { Some(max_window) },
            max_payload,
            iq_inverted: true,
        };
        self.radio.configure_rx(config)?;
        Ok(true)
    }

    /// Receive data
    pub fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, R::Error> {
        self.radio.receive(buffer)
    }

    /// RSSI and SNR of the last received frame
    pub fn link_quality(&mut self) -> Result<(i16, i8), R::Error> {
        Ok((self.radio.get_rssi()?, self.radio.get_snr()?))
    }

    /// Put the radio to sleep
    pub fn sleep(&mut self) -> Result<(), R::Error> {
        self.radio.sleep()
    }

    /// Put the radio in standby
    pub fn standby(&mut self) -> Result<(), R::Error> {
        self.radio.standby()
    }
}
