//! High-level LoRaWAN device interface
//!
//! This module provides the main device interface for LoRaWAN communication.
//! It handles device configuration, activation, and message handling.
//!
//! Radio interrupts and timer callbacks enqueue [`Event`]s on an
//! [`EventQueue`](crate::lorawan::event::EventQueue); [`Device::process`]
//! drains the consumer end and the application polls
//! [`Indication`]s afterwards.

/// Power monitoring
pub mod power;

use rand_core::RngCore;

use crate::{
    class::DeviceClass,
    config::{device::{DevAddr, DeviceConfig, SessionState}, mac::MacConfig},
    lorawan::{
        event::{Event, EventConsumer},
        mac::{ExchangeState, Indication, MacError, MacLayer, MacOption, MacOptionId},
        multicast::MulticastChannel,
        timer::Timers,
    },
    radio::traits::Radio,
};

use self::power::{PowerManager, PowerState};

/// LoRaWAN device error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError<E> {
    /// MAC layer error
    Mac(MacError<E>),
    /// Invalid configuration
    InvalidConfig,
    /// Invalid state for operation
    InvalidState,
}

impl<E> From<MacError<E>> for DeviceError<E> {
    fn from(error: MacError<E>) -> Self {
        DeviceError::Mac(error)
    }
}

/// LoRaWAN device implementation
pub struct Device<R: Radio, T: Timers, G: RngCore> {
    mac: MacLayer<R, T, G>,
    config: DeviceConfig,
}

impl<R: Radio, T: Timers, G: RngCore> Device<R, T, G> {
    /// Create new LoRaWAN device
    pub fn new(radio: R, timers: T, rng: G, config: DeviceConfig, mac_config: MacConfig) -> Self {
        Self {
            mac: MacLayer::new(radio, timers, rng, config.clone(), mac_config),
            config,
        }
    }

    /// Initialize the radio
    ///
    /// A device provisioned for ABP is activated right away.
    pub fn init(&mut self) -> Result<(), DeviceError<R::Error>> {
        self.mac.init()?;
        if self.config.is_abp() {
            self.activate_abp()?;
        }
        Ok(())
    }

    /// Join network using OTAA
    pub fn join_otaa(&mut self) -> Result<(), DeviceError<R::Error>> {
        if self.config.is_abp() {
            return Err(DeviceError::InvalidConfig);
        }
        Ok(self.mac.join_otaa()?)
    }

    /// Activate with the provisioned ABP session
    pub fn activate_abp(&mut self) -> Result<(), DeviceError<R::Error>> {
        match (self.config.dev_addr, self.config.nwk_skey, self.config.app_skey) {
            (Some(addr), Some(nwk_skey), Some(app_skey)) => Ok(self.mac.activate_abp(addr, nwk_skey, app_skey)?),
            _ => Err(DeviceError::InvalidConfig),
        }
    }

    /// Send data
    pub fn send_data(&mut self, port: u8, data: &[u8], confirmed: bool) -> Result<(), DeviceError<R::Error>> {
        Ok(self.mac.send_data(port, data, confirmed)?)
    }

    /// Send unconfirmed data
    pub fn send_unconfirmed(&mut self, port: u8, data: &[u8]) -> Result<(), DeviceError<R::Error>> {
        self.send_data(port, data, false)
    }

    /// Send confirmed data
    pub fn send_confirmed(&mut self, port: u8, data: &[u8]) -> Result<(), DeviceError<R::Error>> {
        self.send_data(port, data, true)
    }

    /// Request a link check with the next uplink
    pub fn link_check(&mut self) -> Result<(), DeviceError<R::Error>> {
        Ok(self.mac.link_check()?)
    }

    /// Change a runtime option
    pub fn set(&mut self, option: MacOption) -> Result<(), DeviceError<R::Error>> {
        Ok(self.mac.set(option)?)
    }

    /// Read a runtime option
    pub fn get(&mut self, id: MacOptionId) -> Result<MacOption, DeviceError<R::Error>> {
        Ok(self.mac.get(id)?)
    }

    /// Get current device class
    pub fn device_class(&self) -> DeviceClass {
        self.mac.config().class
    }

    /// Set device class
    pub fn set_device_class(&mut self, class: DeviceClass) -> Result<(), DeviceError<R::Error>> {
        Ok(self.mac.set_device_class(class)?)
    }

    /// Listen to a multicast group
    pub fn add_multicast(&mut self, channel: MulticastChannel) -> Result<(), DeviceError<R::Error>> {
        Ok(self.mac.add_multicast(channel)?)
    }

    /// Leave a multicast group
    pub fn remove_multicast(&mut self, address: DevAddr) -> Result<(), DeviceError<R::Error>> {
        if self.mac.remove_multicast(address) {
            Ok(())
        } else {
            Err(DeviceError::InvalidState)
        }
    }

    /// Handle a single event
    pub fn handle_event(&mut self, event: Event) -> Result<(), DeviceError<R::Error>> {
        Ok(self.mac.handle_event(event)?)
    }

    /// Process device operations
    ///
    /// Drains every queued event. The first error stops the drain and is
    /// returned; the remaining events stay queued.
    pub fn process<const N: usize>(&mut self, events: &mut EventConsumer<'_, N>) -> Result<(), DeviceError<R::Error>> {
        while let Some(event) = events.dequeue() {
            self.mac.handle_event(event)?;
        }
        Ok(())
    }

    /// Next notification for the application
    pub fn poll_indication(&mut self) -> Option<Indication> {
        self.mac.poll_indication()
    }

    /// Whether an uplink exchange is in flight
    pub fn is_busy(&self) -> bool {
        self.mac.state() != ExchangeState::Idle
    }

    /// Get current session state
    pub fn get_session_state(&self) -> &SessionState {
        self.mac.session()
    }

    /// Update the battery level reported to the network
    pub fn update_battery(&mut self, level: u8) -> PowerState {
        self.mac.power_mut().update_battery(level)
    }

    /// Get power manager
    pub fn power(&self) -> &PowerManager {
        self.mac.power()
    }

    /// Get MAC layer
    pub fn mac(&self) -> &MacLayer<R, T, G> {
        &self.mac
    }

    /// Get mutable MAC layer
    pub fn mac_mut(&mut self) -> &mut MacLayer<R, T, G> {
        &mut self.mac
    }
}
