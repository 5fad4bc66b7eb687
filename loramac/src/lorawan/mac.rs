//! MAC engine
//!
//! [`MacLayer`] owns the session, the channel plan and the radio. It is driven
//! by [`Event`]s and by synchronous requests from the device layer. One uplink
//! exchange is in flight at a time:
//!
//! ```text
//! Idle -> [Delayed ->] Transmitting -> Rx1Wait -> Rx2Wait [-> AckWait] -> Idle
//! ```

use core::time::Duration;

use heapless::spsc::Queue;
use heapless::Vec;
use rand_core::RngCore;

use super::adr;
use super::channels::{ChannelError, ChannelMask, ChannelPlan};
use super::commands::{self, CommandContext, MacCommandBuffer, UplinkCommand};
use super::duty_cycle::{self, random_range, DutyCycle, Selection};
use super::event::Event;
use super::frame::{self, DataDownlink, DataUplink, DropReason, FCtrl, MType, PhyPayload};
use super::join::{self, JoinState};
use super::multicast::{MulticastChannel, MulticastList};
use super::params::MacParams;
use super::phy::{PhyLayer, RxWindow, FRMPAYLOAD_OVERHEAD, PHY_MAX_PAYLOAD, RADIO_WAKEUP_TIME};
use super::region::{DataRate, DEFAULT_CHANNELS};
use super::timer::{TimerId, Timers};
use crate::class::IdleRadio;
use crate::config::device::{AESKey, ActivationState, DevAddr, DeviceClass, DeviceConfig, SessionState};
use crate::config::mac::MacConfig;
use crate::device::power::PowerManager;
use crate::radio::traits::{Radio, RadioEvent, RadioParam};

/// Upper bound on confirmed uplink retransmissions
pub const MAX_ACK_RETRIES: u8 = 8;

/// Acknowledgement timeout after RX2 opens
pub const ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Random spread applied to [`ACK_TIMEOUT`] in both directions
pub const ACK_TIMEOUT_RND: Duration = Duration::from_millis(1000);

/// Largest application payload delivered to the upper layer
pub const MAX_APP_PAYLOAD: usize = 242;

/// Pending indications kept for the upper layer
pub const INDICATION_QUEUE_LEN: usize = 8;

/// Lowest application port
pub const MIN_APP_PORT: u8 = 1;

/// Highest application port
pub const MAX_APP_PORT: u8 = 223;

/// MAC layer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacError<E> {
    /// Radio error
    Radio(E),
    /// The device has not joined a network
    NoNetworkJoined,
    /// Payload too long for the current datarate
    LengthError,
    /// The network switched the device off
    DeviceOff,
    /// An exchange is already in progress
    Busy,
    /// Port outside the application range
    InvalidPort,
    /// No channel can carry the current datarate
    NoChannel,
    /// MAC command or multicast storage is full
    BufferFull,
    /// Option value out of range
    ParameterInvalid,
    /// Channel table edit rejected
    Channel(ChannelError),
}

impl<E> From<ChannelError> for MacError<E> {
    fn from(error: ChannelError) -> Self {
        MacError::Channel(error)
    }
}

/// Notification for the upper layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    /// Application data received
    Data {
        /// Application port
        port: u8,
        /// Decrypted payload
        payload: Vec<u8, MAX_APP_PAYLOAD>,
        /// Received on a multicast group
        multicast: bool,
        /// Signal strength in dBm
        rssi: i16,
        /// Signal to noise ratio in dB
        snr: i8,
    },
    /// Answer to a link check request
    LinkCheck {
        /// Demodulation margin in dB
        margin: u8,
        /// Gateways that heard the request
        gateways: u8,
    },
    /// OTAA join completed
    Joined {
        /// Assigned device address
        dev_addr: DevAddr,
    },
    /// Join trial budget exhausted
    JoinFailed,
    /// Confirmed uplink acknowledged
    Delivered,
    /// Confirmed uplink abandoned
    DeliveryFailed,
}

/// Progress of the current uplink exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExchangeState {
    /// Nothing in flight
    Idle,
    /// Waiting for the duty cycle to allow a transmission
    Delayed,
    /// Radio is transmitting
    Transmitting,
    /// Waiting for or listening in RX1
    Rx1Wait,
    /// Waiting for or listening in RX2
    Rx2Wait,
    /// Receive windows closed, waiting for the acknowledgement timer
    AckWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxSlot {
    Rx1,
    Rx2,
}

#[derive(Debug, Clone)]
struct PendingFrame {
    bytes: PhyPayload,
    confirmed: bool,
    join: bool,
}

/// Runtime option, set through [`MacLayer::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacOption {
    /// Adaptive data rate
    Adr(bool),
    /// Uplink datarate
    DataRate(DataRate),
    /// Uplink TX power index
    TxPower(u8),
    /// Transmissions per unconfirmed uplink
    NbRep(u8),
    /// RX1 datarate offset
    Rx1DrOffset(u8),
    /// RX2 frequency and datarate
    Rx2 {
        /// Frequency in Hz
        frequency: u32,
        /// Datarate
        datarate: DataRate,
    },
    /// RX1 delay in seconds, RX2 follows one second later
    RxDelay(u8),
    /// Join accept window delays
    JoinAcceptDelays {
        /// First window
        rx1: Duration,
        /// Second window
        rx2: Duration,
    },
    /// Confirmed uplink retransmissions
    AckTimeoutRetries(u8),
    /// Public network sync word
    PublicNetwork(bool),
    /// Duty-cycle enforcement
    DutyCycle(bool),
    /// Repeater-compatible payload limits
    RepeaterSupport(bool),
    /// Active channel mask
    ChannelMask(ChannelMask),
    /// Device address
    DevAddr(DevAddr),
    /// Uplink counter
    UplinkCounter(u32),
    /// Last accepted downlink counter, 0 when none was received
    DownlinkCounter(u32),
    /// Device class
    Class(DeviceClass),
    /// Driver parameter
    Radio(RadioParam, u32),
}

/// Key of a [`MacOption`], used with [`MacLayer::get`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacOptionId {
    /// See [`MacOption::Adr`]
    Adr,
    /// See [`MacOption::DataRate`]
    DataRate,
    /// See [`MacOption::TxPower`]
    TxPower,
    /// See [`MacOption::NbRep`]
    NbRep,
    /// See [`MacOption::Rx1DrOffset`]
    Rx1DrOffset,
    /// See [`MacOption::Rx2`]
    Rx2,
    /// See [`MacOption::RxDelay`]
    RxDelay,
    /// See [`MacOption::JoinAcceptDelays`]
    JoinAcceptDelays,
    /// See [`MacOption::AckTimeoutRetries`]
    AckTimeoutRetries,
    /// See [`MacOption::PublicNetwork`]
    PublicNetwork,
    /// See [`MacOption::DutyCycle`]
    DutyCycle,
    /// See [`MacOption::RepeaterSupport`]
    RepeaterSupport,
    /// See [`MacOption::ChannelMask`]
    ChannelMask,
    /// See [`MacOption::DevAddr`]
    DevAddr,
    /// See [`MacOption::UplinkCounter`]
    UplinkCounter,
    /// See [`MacOption::DownlinkCounter`]
    DownlinkCounter,
    /// See [`MacOption::Class`]
    Class,
    /// See [`MacOption::Radio`]
    Radio(RadioParam),
}

/// MAC layer state
pub struct MacLayer<R: Radio, T: Timers, G: RngCore> {
    phy: PhyLayer<R>,
    timers: T,
    rng: G,
    config: MacConfig,
    device: DeviceConfig,
    session: SessionState,
    params: MacParams,
    plan: ChannelPlan,
    duty_cycle: DutyCycle,
    commands: MacCommandBuffer,
    multicast: MulticastList,
    power: PowerManager,
    join: JoinState,
    state: ExchangeState,
    rx_slot: RxSlot,
    pending: Option<PendingFrame>,
    channel: usize,
    time_on_air: Duration,
    rx_opened_at: Option<Duration>,
    adr_ack_counter: u32,
    nb_rep_counter: u8,
    ack_attempts: u8,
    srv_ack_requested: bool,
    first_tx_done: bool,
    last_snr: i8,
    indications: Queue<Indication, INDICATION_QUEUE_LEN>,
}

impl<R: Radio, T: Timers, G: RngCore> MacLayer<R, T, G> {
    /// Create a new MAC layer
    pub fn new(radio: R, timers: T, rng: G, device: DeviceConfig, config: MacConfig) -> Self {
        let region = config.region;
        let mut session = SessionState::new();
        session.fcnt_up = 1;
        Self {
            phy: PhyLayer::new(radio, region),
            timers,
            rng,
            params: MacParams::new(region, config.max_rx_window),
            plan: ChannelPlan::new(region),
            duty_cycle: DutyCycle::new(config.duty_cycle_enabled()),
            config,
            device,
            session,
            commands: MacCommandBuffer::new(),
            multicast: MulticastList::new(),
            power: PowerManager::default(),
            join: JoinState::default(),
            state: ExchangeState::Idle,
            rx_slot: RxSlot::Rx2,
            pending: None,
            channel: 0,
            time_on_air: Duration::ZERO,
            rx_opened_at: None,
            adr_ack_counter: 0,
            nb_rep_counter: 0,
            ack_attempts: 1,
            srv_ack_requested: false,
            first_tx_done: false,
            last_snr: 0,
            indications: Queue::new(),
        }
    }

    /// Initialize the radio and reset the MAC
    pub fn init(&mut self) -> Result<(), MacError<R::Error>> {
        self.phy.init(self.config.public_network).map_err(MacError::Radio)?;
        self.reset();
        info!("MAC initialized");
        Ok(())
    }

    /// Forget the session and every negotiated parameter
    ///
    /// Multicast groups stay registered with their counters zeroed.
    pub fn reset(&mut self) {
        self.cancel_rx_timers();
        self.timers.cancel(TimerId::TxDelayed);
        self.session = SessionState::new();
        self.session.fcnt_up = 1;
        self.params = MacParams::new(self.config.region, self.config.max_rx_window);
        self.plan.reset();
        self.duty_cycle.reset();
        self.commands.reset();
        self.multicast.reset_counters();
        self.adr_ack_counter = 0;
        self.nb_rep_counter = 0;
        self.ack_attempts = 1;
        self.srv_ack_requested = false;
        self.pending = None;
        self.state = ExchangeState::Idle;
    }

    /// Start an over-the-air activation
    pub fn join_otaa(&mut self) -> Result<(), MacError<R::Error>> {
        if self.state != ExchangeState::Idle {
            return Err(MacError::Busy);
        }
        self.reset();
        self.join.start();
        self.session.activation_state = ActivationState::Joining;
        if let Err(e) = self.send_join_request() {
            self.abort_join();
            return Err(e);
        }
        Ok(())
    }

    /// Activate with pre-provisioned session keys
    pub fn activate_abp(
        &mut self,
        dev_addr: DevAddr,
        nwk_skey: AESKey,
        app_skey: AESKey,
    ) -> Result<(), MacError<R::Error>> {
        if self.state != ExchangeState::Idle {
            return Err(MacError::Busy);
        }
        self.reset();
        self.join.finish();
        self.session = SessionState::new_abp(dev_addr, nwk_skey, app_skey);
        self.session.fcnt_up = 1;
        info!("ABP session, dev addr {}", dev_addr.as_u32());
        self.idle_radio()
    }

    /// Queue an application uplink
    ///
    /// An empty payload still flushes pending MAC commands on port 0.
    pub fn send_data(&mut self, port: u8, payload: &[u8], confirmed: bool) -> Result<(), MacError<R::Error>> {
        if !self.session.is_joined() {
            return Err(MacError::NoNetworkJoined);
        }
        if self.state != ExchangeState::Idle {
            return Err(MacError::Busy);
        }
        if !(MIN_APP_PORT..=MAX_APP_PORT).contains(&port) {
            return Err(MacError::InvalidPort);
        }
        if self.duty_cycle.is_device_off() {
            return Err(MacError::DeviceOff);
        }

        let step = adr::next_datarate(
            &mut self.plan,
            self.config.adr,
            true,
            &mut self.adr_ack_counter,
            self.params.datarate,
        );
        self.params.datarate = step.datarate;

        let command_len = if self.commands.in_next_tx() { self.commands.len() } else { 0 };
        let max_payload = self
            .config
            .region
            .max_payload(self.params.datarate, self.config.repeater_support) as usize;
        let mac_payload = payload.len() + command_len;
        if mac_payload > max_payload || mac_payload + FRMPAYLOAD_OVERHEAD as usize > PHY_MAX_PAYLOAD {
            return Err(MacError::LengthError);
        }

        // Restored if the frame is never sent
        let commands = self.commands.clone();
        let ack = core::mem::take(&mut self.srv_ack_requested);
        let prepared = self.commands.prepare_uplink();
        let queued: &[u8] = prepared.as_deref().unwrap_or(&[]);
        let (fopts, port, body) = if !payload.is_empty() {
            (queued, Some(port), payload)
        } else if !queued.is_empty() {
            (&[][..], Some(0), queued)
        } else {
            (&[][..], None, &[][..])
        };

        let uplink = DataUplink {
            confirmed,
            dev_addr: self.session.dev_addr,
            fctrl: FCtrl {
                adr: self.config.adr,
                adr_ack_req: step.ack_req,
                ack,
                ..FCtrl::default()
            },
            fcnt: self.session.fcnt_up,
            fopts,
            port,
            payload: body,
        };
        let bytes = match frame::build_data_uplink(&uplink, &self.session.nwk_skey, &self.session.app_skey) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.commands = commands;
                self.srv_ack_requested = ack;
                return Err(MacError::LengthError);
            }
        };
        debug!(
            "uplink fcnt {} len {} confirmed {}",
            self.session.fcnt_up,
            bytes.len() as u32,
            confirmed
        );

        self.pending = Some(PendingFrame {
            bytes,
            confirmed,
            join: false,
        });
        self.ack_attempts = 1;
        self.nb_rep_counter = 0;
        if let Err(e) = self.schedule_next_tx() {
            self.pending = None;
            self.state = ExchangeState::Idle;
            self.commands = commands;
            self.srv_ack_requested = ack;
            return Err(e);
        }
        Ok(())
    }

    /// Ask the network for link quality on the next uplink
    pub fn link_check(&mut self) -> Result<(), MacError<R::Error>> {
        self.commands
            .push(UplinkCommand::LinkCheckReq)
            .map_err(|_| MacError::BufferFull)
    }

    /// Switch device class
    pub fn set_device_class(&mut self, class: DeviceClass) -> Result<(), MacError<R::Error>> {
        if self.config.class == class {
            return Ok(());
        }
        self.config.class = class;
        if self.state == ExchangeState::Idle && self.session.is_joined() {
            self.idle_radio()?;
        }
        Ok(())
    }

    /// Listen to a multicast group
    pub fn add_multicast(&mut self, channel: MulticastChannel) -> Result<(), MacError<R::Error>> {
        self.multicast.add(channel).map_err(|_| MacError::BufferFull)
    }

    /// Stop listening to a multicast group, returns whether it was registered
    pub fn remove_multicast(&mut self, address: DevAddr) -> bool {
        self.multicast.remove(address)
    }

    /// Next notification for the upper layer
    pub fn poll_indication(&mut self) -> Option<Indication> {
        self.indications.dequeue()
    }

    /// Process one mailbox event
    pub fn handle_event(&mut self, event: Event) -> Result<(), MacError<R::Error>> {
        match event {
            Event::RadioIrq => match self.phy.radio.isr().map_err(MacError::Radio)? {
                Some(radio_event) => self.on_radio_event(radio_event),
                None => Ok(()),
            },
            Event::Radio(radio_event) => self.on_radio_event(radio_event),
            Event::Timer(id) => self.on_timer(id),
        }
    }

    /// Change a runtime option
    pub fn set(&mut self, option: MacOption) -> Result<(), MacError<R::Error>> {
        let region = self.config.region;
        match option {
            MacOption::Adr(enabled) => self.config.adr = enabled,
            MacOption::DataRate(dr) => {
                if !(region.tx_min_datarate()..=region.tx_max_datarate()).contains(&dr) {
                    return Err(MacError::ParameterInvalid);
                }
                self.params.datarate = dr;
            }
            MacOption::TxPower(power) => {
                if !(region.max_tx_power()..=region.min_tx_power()).contains(&power) {
                    return Err(MacError::ParameterInvalid);
                }
                self.params.tx_power = power;
            }
            MacOption::NbRep(nb_rep) => {
                if !(1..=15).contains(&nb_rep) {
                    return Err(MacError::ParameterInvalid);
                }
                self.params.nb_rep = nb_rep;
            }
            MacOption::Rx1DrOffset(offset) => {
                if offset > region.max_rx1_dr_offset() {
                    return Err(MacError::ParameterInvalid);
                }
                self.params.rx1_dr_offset = offset;
            }
            MacOption::Rx2 { frequency, datarate } => {
                if !region.rx2_frequency_valid(frequency)
                    || !(region.rx_min_datarate()..=region.rx_max_datarate()).contains(&datarate)
                {
                    return Err(MacError::ParameterInvalid);
                }
                self.params.rx2_frequency = frequency;
                self.params.rx2_datarate = datarate;
            }
            MacOption::RxDelay(seconds) => self.params.set_rx_delay(seconds),
            MacOption::JoinAcceptDelays { rx1, rx2 } => {
                if rx2 <= rx1 {
                    return Err(MacError::ParameterInvalid);
                }
                self.params.timing.join_accept_delay1 = rx1;
                self.params.timing.join_accept_delay2 = rx2;
            }
            MacOption::AckTimeoutRetries(retries) => {
                if retries > MAX_ACK_RETRIES {
                    return Err(MacError::ParameterInvalid);
                }
                self.config.ack_timeout_retries = retries;
            }
            MacOption::PublicNetwork(public) => {
                self.phy.set_public_network(public).map_err(MacError::Radio)?;
                self.config.public_network = public;
            }
            MacOption::DutyCycle(enabled) => {
                self.config.duty_cycle = Some(enabled);
                self.duty_cycle.enabled = enabled;
            }
            MacOption::RepeaterSupport(enabled) => self.config.repeater_support = enabled,
            MacOption::ChannelMask(mask) => {
                if mask.is_empty() {
                    return Err(MacError::ParameterInvalid);
                }
                self.plan.set_mask(mask);
            }
            MacOption::DevAddr(addr) => self.session.dev_addr = addr,
            MacOption::UplinkCounter(fcnt) => self.session.fcnt_up = fcnt,
            MacOption::DownlinkCounter(fcnt) => {
                self.session.fcnt_down = fcnt;
                self.session.fcnt_down_valid = fcnt != 0;
            }
            MacOption::Class(class) => self.set_device_class(class)?,
            MacOption::Radio(param, value) => self.phy.radio.set(param, value).map_err(MacError::Radio)?,
        }
        Ok(())
    }

    /// Read a runtime option
    pub fn get(&mut self, id: MacOptionId) -> Result<MacOption, MacError<R::Error>> {
        let timing = self.params.timing;
        Ok(match id {
            MacOptionId::Adr => MacOption::Adr(self.config.adr),
            MacOptionId::DataRate => MacOption::DataRate(self.params.datarate),
            MacOptionId::TxPower => MacOption::TxPower(self.params.tx_power),
            MacOptionId::NbRep => MacOption::NbRep(self.params.nb_rep),
            MacOptionId::Rx1DrOffset => MacOption::Rx1DrOffset(self.params.rx1_dr_offset),
            MacOptionId::Rx2 => MacOption::Rx2 {
                frequency: self.params.rx2_frequency,
                datarate: self.params.rx2_datarate,
            },
            MacOptionId::RxDelay => MacOption::RxDelay(timing.rx1_delay.as_secs() as u8),
            MacOptionId::JoinAcceptDelays => MacOption::JoinAcceptDelays {
                rx1: timing.join_accept_delay1,
                rx2: timing.join_accept_delay2,
            },
            MacOptionId::AckTimeoutRetries => MacOption::AckTimeoutRetries(self.config.ack_timeout_retries),
            MacOptionId::PublicNetwork => MacOption::PublicNetwork(self.config.public_network),
            MacOptionId::DutyCycle => MacOption::DutyCycle(self.duty_cycle.enabled),
            MacOptionId::RepeaterSupport => MacOption::RepeaterSupport(self.config.repeater_support),
            MacOptionId::ChannelMask => MacOption::ChannelMask(*self.plan.mask()),
            MacOptionId::DevAddr => MacOption::DevAddr(self.session.dev_addr),
            MacOptionId::UplinkCounter => MacOption::UplinkCounter(self.session.fcnt_up),
            MacOptionId::DownlinkCounter => MacOption::DownlinkCounter(self.session.fcnt_down),
            MacOptionId::Class => MacOption::Class(self.config.class),
            MacOptionId::Radio(param) => {
                MacOption::Radio(param, self.phy.radio.get(param).map_err(MacError::Radio)?)
            }
        })
    }

    /// Session state
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Negotiated parameters
    pub fn params(&self) -> &MacParams {
        &self.params
    }

    /// Channel plan
    pub fn plan(&self) -> &ChannelPlan {
        &self.plan
    }

    /// Mutable channel plan, for provisioning extra channels
    pub fn plan_mut(&mut self) -> &mut ChannelPlan {
        &mut self.plan
    }

    /// Duty-cycle state
    pub fn duty_cycle(&self) -> &DutyCycle {
        &self.duty_cycle
    }

    /// Outgoing MAC commands
    pub fn mac_commands(&self) -> &MacCommandBuffer {
        &self.commands
    }

    /// Engine configuration
    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    /// Exchange progress
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Uplinks since the last downlink
    pub fn adr_ack_counter(&self) -> u32 {
        self.adr_ack_counter
    }

    /// Join attempts in the current procedure
    pub fn join_trials(&self) -> u16 {
        self.join.trials
    }

    /// Registered multicast groups
    pub fn multicast(&self) -> &MulticastList {
        &self.multicast
    }

    /// Power manager
    pub fn power(&self) -> &PowerManager {
        &self.power
    }

    /// Mutable power manager
    pub fn power_mut(&mut self) -> &mut PowerManager {
        &mut self.power
    }

    /// Radio driver
    pub fn radio(&self) -> &R {
        &self.phy.radio
    }

    /// Mutable radio driver
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.phy.radio
    }

    /// Timer backend
    pub fn timers(&self) -> &T {
        &self.timers
    }

    /// Mutable timer backend
    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    fn send_join_request(&mut self) -> Result<(), MacError<R::Error>> {
        let Some(trial) = self.join.next_attempt(self.config.max_join_trials) else {
            warn!("join abandoned after {} trials", self.join.trials);
            self.abort_join();
            return Ok(());
        };

        let region = self.config.region;
        self.params.datarate = region.join_datarate(trial);
        if region.is_us() {
            self.plan.enable_default_bw500();
        }
        let dev_nonce = self.rng.next_u32() as u16;
        self.session.dev_nonce = dev_nonce;
        let bytes = frame::build_join_request(
            &self.device.app_eui,
            &self.device.dev_eui,
            dev_nonce,
            &self.device.app_key,
        )
        .map_err(|_| MacError::LengthError)?;
        info!("join request {} at DR{}", trial, self.params.datarate);

        self.pending = Some(PendingFrame {
            bytes,
            confirmed: false,
            join: true,
        });
        self.nb_rep_counter = 0;
        self.schedule_next_tx()
    }

    fn retry_join(&mut self) {
        self.cancel_rx_timers();
        if self.send_join_request().is_err() {
            warn!("join retransmission failed");
            self.abort_join();
        }
    }

    fn abort_join(&mut self) {
        let was_pending = self.join.pending;
        self.join.finish();
        self.cancel_rx_timers();
        self.timers.cancel(TimerId::TxDelayed);
        self.session.activation_state = ActivationState::Idle;
        self.pending = None;
        self.state = ExchangeState::Idle;
        if was_pending {
            self.indicate(Indication::JoinFailed);
        }
    }

    fn schedule_next_tx(&mut self) -> Result<(), MacError<R::Error>> {
        if self.duty_cycle.is_device_off() {
            return Err(MacError::DeviceOff);
        }

        let joined = self.session.is_joined();
        let mut selection = None;
        for attempt in 0..2 {
            let now = self.timers.now();
            selection = self.duty_cycle.select_channel(
                &mut self.plan,
                self.params.datarate,
                joined,
                now,
                &mut self.rng,
            );
            if selection.is_some() {
                break;
            }
            if attempt == 0 {
                warn!("no channel for DR{}, restoring default channels", self.params.datarate);
                self.params.datarate = self.config.region.default_datarate();
                self.plan.enable_default_channels();
            }
        }

        match selection {
            Some(Selection::Channel(index)) => self.send_on_channel(index),
            Some(Selection::Wait(delay)) => {
                debug!("duty cycle defers TX by {} ms", delay.as_millis() as u32);
                self.timers.arm(TimerId::TxDelayed, delay);
                self.state = ExchangeState::Delayed;
                Ok(())
            }
            None => Err(MacError::NoChannel),
        }
    }

    fn send_on_channel(&mut self, index: usize) -> Result<(), MacError<R::Error>> {
        let frequency = self
            .plan
            .channel(index)
            .map(|ch| ch.frequency)
            .ok_or(MacError::NoChannel)?;
        let power = duty_cycle::limit_tx_power(&self.plan, self.params.datarate, self.params.tx_power);
        let config = self
            .phy
            .tx_config(frequency, self.params.datarate, power)
            .ok_or(MacError::ParameterInvalid)?;
        let frame = self.pending.as_ref().ok_or(MacError::ParameterInvalid)?;

        if self.config.class == DeviceClass::C {
            self.phy.standby().map_err(MacError::Radio)?;
        }
        self.time_on_air = self.phy.transmit(config, &frame.bytes).map_err(MacError::Radio)?;
        self.channel = index;
        self.state = ExchangeState::Transmitting;
        debug!("TX channel {} at {} Hz DR{}", index as u32, frequency, self.params.datarate);
        Ok(())
    }

    fn on_radio_event(&mut self, event: RadioEvent) -> Result<(), MacError<R::Error>> {
        match event {
            RadioEvent::TxDone => self.on_tx_done(),
            RadioEvent::TxTimeout => self.on_tx_timeout(),
            RadioEvent::RxDone => self.on_rx_done(),
            RadioEvent::RxTimeout | RadioEvent::CrcError => self.on_rx_error(),
        }
    }

    fn on_tx_done(&mut self) -> Result<(), MacError<R::Error>> {
        if self.state != ExchangeState::Transmitting {
            return Ok(());
        }
        let now = self.timers.now();
        let first_tx = !self.first_tx_done;
        self.first_tx_done = true;
        self.duty_cycle.on_tx_done(
            &mut self.plan,
            self.channel,
            self.time_on_air,
            self.session.is_joined(),
            first_tx,
            now,
            &mut self.rng,
        );
        self.power.record_tx(self.time_on_air);

        let Some(frame) = self.pending.as_ref() else {
            self.state = ExchangeState::Idle;
            return Ok(());
        };
        let (confirmed, join) = (frame.confirmed, frame.join);
        let timing = self.params.timing;
        let (delay1, delay2) = if join {
            (timing.join_accept_delay1, timing.join_accept_delay2)
        } else {
            (timing.rx1_delay, timing.rx2_delay)
        };

        self.state = ExchangeState::Rx1Wait;
        self.idle_radio()?;

        let class = self.config.class;
        self.timers.arm(TimerId::Rx1, delay1.saturating_sub(RADIO_WAKEUP_TIME));
        if class.arms_rx2_timer() {
            self.timers.arm(TimerId::Rx2, delay2.saturating_sub(RADIO_WAKEUP_TIME));
        }
        if class.arms_ack_timer(confirmed) {
            let spread = ACK_TIMEOUT_RND.as_millis() as u32;
            let jitter = random_range(&mut self.rng, 0, 2 * spread + 1);
            let delay = delay2 + ACK_TIMEOUT - ACK_TIMEOUT_RND + Duration::from_millis(jitter as u64);
            self.timers.arm(TimerId::AckTimeout, delay);
        }
        if !confirmed {
            self.nb_rep_counter = self.nb_rep_counter.saturating_add(1);
        }
        Ok(())
    }

    fn on_tx_timeout(&mut self) -> Result<(), MacError<R::Error>> {
        if self.state != ExchangeState::Transmitting {
            return Ok(());
        }
        warn!("TX timeout");
        self.state = ExchangeState::AckWait;
        match self.pending.as_ref().map(|f| (f.join, f.confirmed)) {
            Some((true, _)) => self.retry_join(),
            Some((false, true)) => self.on_ack_timeout(),
            _ => self.finish_exchange(),
        }
        self.idle_radio()
    }

    fn on_timer(&mut self, id: TimerId) -> Result<(), MacError<R::Error>> {
        match id {
            TimerId::Rx1 => {
                if self.state == ExchangeState::Rx1Wait {
                    self.open_rx1()?;
                }
            }
            TimerId::Rx2 => {
                if self.state == ExchangeState::Rx1Wait {
                    self.state = ExchangeState::Rx2Wait;
                    self.open_rx2()?;
                }
            }
            TimerId::AckTimeout => {
                let waiting = matches!(
                    self.state,
                    ExchangeState::Rx1Wait | ExchangeState::Rx2Wait | ExchangeState::AckWait
                );
                match self.pending.as_ref().map(|f| f.confirmed) {
                    Some(true) if waiting => self.on_ack_timeout(),
                    Some(false) if waiting => self.on_windows_closed(),
                    _ => {}
                }
            }
            TimerId::TxDelayed => {
                if self.state == ExchangeState::Delayed {
                    if let Err(e) = self.schedule_next_tx() {
                        self.fail_exchange();
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn open_rx1(&mut self) -> Result<(), MacError<R::Error>> {
        let region = self.config.region;
        if self.config.class == DeviceClass::C {
            self.phy.standby().map_err(MacError::Radio)?;
        }
        self.rx_slot = RxSlot::Rx1;
        let uplink_freq = self.plan.channels().get(self.channel).map_or(0, |ch| ch.frequency);
        let window = RxWindow {
            frequency: region.rx1_frequency(self.channel, uplink_freq),
            datarate: region.rx1_datarate(self.params.datarate, self.params.rx1_dr_offset),
            continuous: false,
        };
        self.open_window(window)
    }

    fn open_rx2(&mut self) -> Result<(), MacError<R::Error>> {
        self.rx_slot = RxSlot::Rx2;
        let window = RxWindow {
            frequency: self.params.rx2_frequency,
            datarate: self.params.rx2_datarate,
            continuous: self.config.class == DeviceClass::C,
        };
        self.open_window(window)
    }

    fn open_window(&mut self, window: RxWindow) -> Result<(), MacError<R::Error>> {
        let limit = self
            .config
            .region
            .max_payload(window.datarate, self.config.repeater_support) as usize
            + FRMPAYLOAD_OVERHEAD as usize;
        let max_payload = limit.min(PHY_MAX_PAYLOAD) as u8;
        let opened = self
            .phy
            .open_rx(window, self.params.max_rx_window, max_payload)
            .map_err(MacError::Radio)?;
        if !opened {
            warn!("no modulation for RX DR{}", window.datarate);
        }
        self.rx_opened_at = if window.continuous { None } else { Some(self.timers.now()) };
        Ok(())
    }

    fn close_rx_window(&mut self) {
        if let Some(opened) = self.rx_opened_at.take() {
            let now = self.timers.now();
            self.power.record_rx(now.saturating_sub(opened));
        }
    }

    /// Park the radio between windows according to the device class
    fn idle_radio(&mut self) -> Result<(), MacError<R::Error>> {
        if self.state == ExchangeState::Transmitting {
            return Ok(());
        }
        match self.config.class.idle_radio() {
            IdleRadio::Sleep => self.phy.sleep().map_err(MacError::Radio),
            IdleRadio::ListenRx2 => self.open_rx2(),
        }
    }

    fn on_rx_error(&mut self) -> Result<(), MacError<R::Error>> {
        self.close_rx_window();
        match self.config.class {
            DeviceClass::A => {
                self.idle_radio()?;
                if self.rx_slot == RxSlot::Rx2 && self.state == ExchangeState::Rx2Wait {
                    self.on_windows_closed();
                }
            }
            DeviceClass::C => {
                if self.rx_slot == RxSlot::Rx1 && self.state == ExchangeState::Rx1Wait {
                    self.state = ExchangeState::Rx2Wait;
                }
                self.idle_radio()?;
            }
        }
        Ok(())
    }

    fn on_rx_done(&mut self) -> Result<(), MacError<R::Error>> {
        self.close_rx_window();
        let mut buf = [0u8; PHY_MAX_PAYLOAD];
        let len = self.phy.receive(&mut buf).map_err(MacError::Radio)?.min(PHY_MAX_PAYLOAD);
        let (rssi, snr) = self.phy.link_quality().map_err(MacError::Radio)?;
        self.last_snr = snr;
        if self.config.class == DeviceClass::A {
            self.phy.sleep().map_err(MacError::Radio)?;
        }

        let frame = &buf[..len];
        let outcome = match frame.first().map(|mhdr| MType::from_mhdr(*mhdr)) {
            Some(MType::JoinAccept) => self.on_join_accept(frame),
            Some(MType::UnconfirmedDataDown | MType::ConfirmedDataDown) => self.on_data_down(frame, rssi, snr),
            _ => Err(DropReason::UnexpectedType),
        };

        match outcome {
            Ok(()) => {
                if self.config.class == DeviceClass::C {
                    if self.rx_slot == RxSlot::Rx1 && self.state == ExchangeState::Rx1Wait {
                        self.state = ExchangeState::Rx2Wait;
                    }
                    self.idle_radio()?;
                }
                Ok(())
            }
            Err(reason) => {
                debug!("downlink dropped: {}", reason as u8);
                self.on_rx_error()
            }
        }
    }

    fn on_join_accept(&mut self, frame: &[u8]) -> Result<(), DropReason> {
        if self.session.is_joined() || !self.join.pending {
            return Err(DropReason::UnexpectedType);
        }
        let region = self.config.region;
        let accept = match frame::parse_join_accept(frame, &self.device.app_key) {
            Ok(accept) => accept,
            Err(DropReason::Mic) if self.nb_rep_counter >= self.params.nb_rep => {
                debug!("join accept MIC mismatch, retrying join");
                self.retry_join();
                return Ok(());
            }
            Err(reason) => return Err(reason),
        };

        join::apply_accept(&accept, &self.device.app_key, region, &mut self.session, &mut self.params);
        if let (Some(freqs), false) = (accept.cf_list, region.is_us()) {
            for (i, freq) in freqs.iter().enumerate().filter(|(_, f)| **f != 0) {
                let index = DEFAULT_CHANNELS + i;
                if self.plan.add_channel(index, *freq, 0, 5).is_err() {
                    warn!("CFList channel {} rejected", index as u32);
                }
            }
        }

        self.adr_ack_counter = 0;
        self.join.finish();
        self.cancel_rx_timers();
        self.timers.cancel(TimerId::TxDelayed);
        self.pending = None;
        self.state = ExchangeState::Idle;
        self.nb_rep_counter = 0;
        info!("joined, dev addr {}", accept.dev_addr.as_u32());
        self.indicate(Indication::Joined {
            dev_addr: accept.dev_addr,
        });
        Ok(())
    }

    fn on_data_down(&mut self, frame: &[u8], rssi: i16, snr: i8) -> Result<(), DropReason> {
        if !self.session.is_joined() {
            return Err(DropReason::UnexpectedType);
        }
        let down = DataDownlink::parse(frame)?;
        if down.dev_addr == self.session.dev_addr {
            self.on_unicast(&down, rssi, snr)
        } else {
            self.on_multicast(&down, rssi, snr)
        }
    }

    fn on_unicast(&mut self, down: &DataDownlink<'_>, rssi: i16, snr: i8) -> Result<(), DropReason> {
        let prev = self.session.fcnt_down;
        let (fcnt, _) = frame::downlink_counter(prev, down.fcnt)?;
        if !down.verify(&self.session.nwk_skey, fcnt) {
            return Err(DropReason::Mic);
        }
        let duplicate = self.session.fcnt_down_valid && fcnt == prev;
        if duplicate && !down.confirmed {
            return Err(DropReason::Duplicate);
        }

        self.timers.cancel(TimerId::Rx2);
        self.commands.clear_repeat();
        self.srv_ack_requested = down.confirmed;
        self.session.fcnt_down = fcnt;
        self.session.fcnt_down_valid = true;

        if !duplicate {
            let (nwk_skey, app_skey) = (self.session.nwk_skey, self.session.app_skey);
            self.deliver(down, fcnt, &nwk_skey, &app_skey, false, rssi, snr)?;
        }

        let in_windows = matches!(
            self.state,
            ExchangeState::Rx1Wait | ExchangeState::Rx2Wait | ExchangeState::AckWait
        );
        // Class C still listens while a retransmission waits for the duty cycle
        let retry_delayed = self.state == ExchangeState::Delayed
            && self.config.class == DeviceClass::C
            && self.ack_attempts > 1;
        match self.pending.as_ref().map(|f| (f.join, f.confirmed)) {
            Some((false, true)) if (in_windows || retry_delayed) && down.fctrl.ack => {
                info!("uplink {} acknowledged", self.session.fcnt_up);
                self.finish_exchange();
                self.indicate(Indication::Delivered);
            }
            Some((false, true)) if in_windows => self.state = ExchangeState::AckWait,
            Some((false, false)) if in_windows => self.finish_exchange(),
            _ => {}
        }
        // After finish_exchange, which counts the uplink
        self.adr_ack_counter = 0;
        Ok(())
    }

    fn on_multicast(&mut self, down: &DataDownlink<'_>, rssi: i16, snr: i8) -> Result<(), DropReason> {
        let group = self
            .multicast
            .find_mut(down.dev_addr)
            .ok_or(DropReason::ForeignAddress)?;
        let prev = group.fcnt_down;
        let (fcnt, _) = frame::downlink_counter(prev, down.fcnt)?;
        if !down.verify(&group.nwk_skey, fcnt) {
            return Err(DropReason::Mic);
        }
        if group.fcnt_down_valid && fcnt == prev {
            return Err(DropReason::Duplicate);
        }
        group.fcnt_down = fcnt;
        group.fcnt_down_valid = true;
        let (nwk_skey, app_skey) = (group.nwk_skey, group.app_skey);
        self.deliver(down, fcnt, &nwk_skey, &app_skey, true, rssi, snr)
    }

    #[allow(clippy::too_many_arguments)]
    fn deliver(
        &mut self,
        down: &DataDownlink<'_>,
        fcnt: u32,
        nwk_skey: &AESKey,
        app_skey: &AESKey,
        multicast: bool,
        rssi: i16,
        snr: i8,
    ) -> Result<(), DropReason> {
        match down.port {
            Some(0) if multicast => {}
            Some(0) => {
                if !down.fopts.is_empty() {
                    warn!("port 0 frame with FOpts ignored");
                    return Ok(());
                }
                let commands = down.decrypt_payload::<PHY_MAX_PAYLOAD>(nwk_skey, app_skey, fcnt)?;
                self.process_commands(&commands, snr);
            }
            Some(port) => {
                if !multicast {
                    self.process_commands(down.fopts, snr);
                }
                let payload = down.decrypt_payload::<MAX_APP_PAYLOAD>(nwk_skey, app_skey, fcnt)?;
                self.indicate(Indication::Data {
                    port,
                    payload,
                    multicast,
                    rssi,
                    snr,
                });
            }
            None if !multicast => self.process_commands(down.fopts, snr),
            None => {}
        }
        Ok(())
    }

    fn process_commands(&mut self, data: &[u8], snr: i8) {
        if data.is_empty() {
            return;
        }
        let mut ctx = CommandContext {
            plan: &mut self.plan,
            params: &mut self.params,
            duty_cycle: &mut self.duty_cycle,
            adr: self.config.adr,
            battery: self.power.battery_level(),
            snr,
        };
        if let Some(check) = commands::process(&mut ctx, data, &mut self.commands) {
            self.indicate(Indication::LinkCheck {
                margin: check.margin,
                gateways: check.gateways,
            });
        }
    }

    /// Receive windows are over without a usable downlink
    fn on_windows_closed(&mut self) {
        let Some((join, confirmed)) = self.pending.as_ref().map(|f| (f.join, f.confirmed)) else {
            self.state = ExchangeState::Idle;
            return;
        };
        if join {
            self.retry_join();
            return;
        }
        if confirmed {
            self.state = ExchangeState::AckWait;
            return;
        }
        if self.nb_rep_counter < self.params.nb_rep {
            self.resend();
        } else {
            self.finish_exchange();
        }
    }

    fn on_ack_timeout(&mut self) {
        let retries = self.config.ack_timeout_retries.min(MAX_ACK_RETRIES);
        if self.ack_attempts <= retries {
            self.ack_attempts += 1;
            if self.ack_attempts % 2 == 1 {
                let floor = self.config.region.tx_min_datarate();
                self.params.datarate = self.params.datarate.saturating_sub(1).max(floor);
            }
            info!(
                "ack timeout, retransmission {} at DR{}",
                self.ack_attempts - 1,
                self.params.datarate
            );
            self.resend();
        } else {
            warn!("confirmed uplink abandoned after {} attempts", self.ack_attempts);
            self.finish_exchange();
            self.indicate(Indication::DeliveryFailed);
        }
    }

    /// Transmit the pending frame again, unchanged
    fn resend(&mut self) {
        self.cancel_rx_timers();
        if self.schedule_next_tx().is_err() {
            warn!("retransmission failed");
            self.fail_exchange();
        }
    }

    fn fail_exchange(&mut self) {
        match self.pending.as_ref().map(|f| (f.join, f.confirmed)) {
            Some((true, _)) => self.abort_join(),
            Some((false, confirmed)) => {
                self.finish_exchange();
                if confirmed {
                    self.indicate(Indication::DeliveryFailed);
                }
            }
            None => self.state = ExchangeState::Idle,
        }
    }

    /// Close the exchange and advance the uplink counter
    fn finish_exchange(&mut self) {
        self.cancel_rx_timers();
        self.timers.cancel(TimerId::TxDelayed);
        self.session.increment_fcnt_up();
        self.adr_ack_counter = self.adr_ack_counter.saturating_add(1);
        self.pending = None;
        self.state = ExchangeState::Idle;
        self.nb_rep_counter = 0;
        self.ack_attempts = 1;
    }

    fn cancel_rx_timers(&mut self) {
        self.timers.cancel(TimerId::Rx1);
        self.timers.cancel(TimerId::Rx2);
        self.timers.cancel(TimerId::AckTimeout);
    }

    fn indicate(&mut self, indication: Indication) {
        if self.indications.enqueue(indication).is_err() {
            warn!("indication queue full, dropping");
        }
    }
}
