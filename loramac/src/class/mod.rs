//! LoRaWAN device class behavior
//!
//! The MAC state machine is shared by both supported classes; this module
//! answers the questions where they differ:
//! - Class A: two receive windows after each uplink, radio asleep otherwise
//! - Class C: RX2 open continuously except while transmitting or in RX1

pub use crate::config::device::DeviceClass;

/// What the radio does between windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdleRadio {
    /// Sleep until the next timer
    Sleep,
    /// Listen on RX2 until told otherwise
    ListenRx2,
}

impl DeviceClass {
    /// Radio behavior outside receive windows
    pub fn idle_radio(&self) -> IdleRadio {
        match self {
            DeviceClass::A => IdleRadio::Sleep,
            DeviceClass::C => IdleRadio::ListenRx2,
        }
    }

    /// Whether RX2 is a timed window
    pub fn arms_rx2_timer(&self) -> bool {
        matches!(self, DeviceClass::A)
    }

    /// Whether the exchange is closed by the acknowledgement timer
    ///
    /// Class C never sees RX2 close, so the timer also ends unconfirmed
    /// exchanges.
    pub fn arms_ack_timer(&self, confirmed: bool) -> bool {
        confirmed || matches!(self, DeviceClass::C)
    }
}
