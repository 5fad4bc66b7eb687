use core::time::Duration;

/// LoRa channel bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bandwidth {
    /// 125 kHz
    Khz125,
    /// 250 kHz
    Khz250,
    /// 500 kHz
    Khz500,
}

impl Bandwidth {
    /// Bandwidth in Hz
    pub fn hz(&self) -> u32 {
        match self {
            Bandwidth::Khz125 => 125_000,
            Bandwidth::Khz250 => 250_000,
            Bandwidth::Khz500 => 500_000,
        }
    }
}

/// Radio modulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    /// LoRa chirp spread spectrum
    LoRa {
        /// Spreading factor (SF7-SF12)
        spreading_factor: u8,
        /// Channel bandwidth
        bandwidth: Bandwidth,
        /// Coding rate denominator (5..=8 for 4/5..4/8)
        coding_rate: u8,
    },
    /// GFSK
    Fsk {
        /// Bitrate in bits per second
        bitrate: u32,
        /// Frequency deviation in Hz
        deviation: u32,
    },
}

/// Radio transmission parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxConfig {
    /// Transmission power in dBm
    pub power: i8,
    /// Frequency in Hz
    pub frequency: u32,
    /// Modulation parameters
    pub modulation: Modulation,
    /// Preamble length in symbols
    pub preamble_len: u16,
    /// Inverted IQ (always false for uplinks)
    pub iq_inverted: bool,
}

/// Radio receive parameters
///
/// Applying an `RxConfig` puts the radio into receive mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxConfig {
    /// Frequency in Hz
    pub frequency: u32,
    /// Modulation parameters
    pub modulation: Modulation,
    /// Preamble detection timeout in symbols
    pub symbol_timeout: u16,
    /// Window length, `None` for continuous reception
    pub window: Option<Duration>,
    /// Largest PHY payload accepted
    pub max_payload: u8,
    /// Inverted IQ (true for downlinks)
    pub iq_inverted: bool,
}

/// Events reported by the radio after an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    /// Transmission finished
    TxDone,
    /// Transmission did not finish in time
    TxTimeout,
    /// A frame was received and can be read with [`Radio::receive`]
    RxDone,
    /// Receive window closed without a preamble
    RxTimeout,
    /// A frame was received with a bad CRC
    CrcError,
}

/// Driver-level parameters exposed through [`Radio::set`] and [`Radio::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioParam {
    /// LoRa sync word
    SyncWord,
    /// Preamble length in symbols
    PreambleLength,
    /// Current channel frequency in Hz
    Frequency,
    /// Driver specific parameter
    Other(u16),
}

/// Generic radio interface trait
pub trait Radio {
    /// Error type for radio operations
    type Error;

    /// Initialize the radio
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Service a pending interrupt, reporting what happened
    ///
    /// Called from the MAC context after the interrupt handler posted
    /// [`Event::RadioIrq`](crate::lorawan::event::Event::RadioIrq).
    fn isr(&mut self) -> Result<Option<RadioEvent>, Self::Error>;

    /// Configure the radio for transmission
    fn configure_tx(&mut self, config: TxConfig) -> Result<(), Self::Error>;

    /// Transmit data using the last TX configuration
    fn transmit(&mut self, buffer: &[u8]) -> Result<(), Self::Error>;

    /// Configure the radio for reception and start listening
    fn configure_rx(&mut self, config: RxConfig) -> Result<(), Self::Error>;

    /// Read the received frame into the provided buffer
    /// Returns the number of bytes received
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;

    /// Get the last packet's RSSI (Received Signal Strength Indicator)
    fn get_rssi(&mut self) -> Result<i16, Self::Error>;

    /// Get the last packet's SNR (Signal to Noise Ratio)
    fn get_snr(&mut self) -> Result<i8, Self::Error>;

    /// Put the radio into sleep mode
    fn sleep(&mut self) -> Result<(), Self::Error>;

    /// Put the radio into standby mode
    fn standby(&mut self) -> Result<(), Self::Error>;

    /// Set a driver parameter
    fn set(&mut self, param: RadioParam, value: u32) -> Result<(), Self::Error>;

    /// Read a driver parameter
    fn get(&mut self, param: RadioParam) -> Result<u32, Self::Error>;

    /// Airtime of a frame of `len` bytes with the given configuration
    ///
    /// The default implementation uses the LoRa/FSK airtime formulas with an
    /// explicit header and CRC enabled.
    fn time_on_air(&mut self, config: &TxConfig, len: usize) -> Result<Duration, Self::Error> {
        Ok(time_on_air(config, len))
    }
}

/// Airtime of a frame with explicit header and payload CRC
pub fn time_on_air(config: &TxConfig, len: usize) -> Duration {
    match config.modulation {
        Modulation::LoRa {
            spreading_factor,
            bandwidth,
            coding_rate,
        } => {
            let sf = spreading_factor as i64;
            let bw = bandwidth.hz() as u64;
            let low_dr_optimize = match bandwidth {
                Bandwidth::Khz125 => sf >= 11,
                Bandwidth::Khz250 => sf == 12,
                Bandwidth::Khz500 => false,
            };
            let de = if low_dr_optimize { 1 } else { 0 };
            let cr = (coding_rate.clamp(5, 8) - 4) as i64;

            let num = 8 * len as i64 - 4 * sf + 28 + 16;
            let den = 4 * (sf - 2 * de);
            let extra = if num > 0 { (num + den - 1) / den * (cr + 4) } else { 0 };
            let payload_symbols = 8 + extra;

            // Quarter symbols keep the 4.25 preamble tail exact.
            let quarter_symbols = 4 * config.preamble_len as u64 + 17 + 4 * payload_symbols as u64;
            let symbol_us = (1u64 << sf) * 1_000_000 / bw;
            Duration::from_micros(symbol_us * quarter_symbols / 4)
        }
        Modulation::Fsk { bitrate, .. } => {
            let bits = (config.preamble_len as u64 + 3 + 1 + len as u64 + 2) * 8;
            Duration::from_micros(bits * 1_000_000 / bitrate.max(1) as u64)
        }
    }
}
