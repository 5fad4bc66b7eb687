//! MAC commands
//!
//! - [`DownlinkCommand`]: requests and answers sent by the network
//! - [`UplinkCommand`]: answers and requests sent by the device
//! - [`MacCommandBuffer`]: bounded outgoing queue, including the answers that
//!   are repeated on every uplink until a downlink arrives
//! - [`process`]: validates and applies network requests, queueing one answer
//!   per request

use heapless::Vec;

use super::adr::{self, LinkAdrReq};
use super::channels::{ChannelError, ChannelPlan};
use super::duty_cycle::DutyCycle;
use super::frame::Reader;
use super::params::MacParams;
use super::region::DataRate;

/// Largest amount of buffered MAC command bytes
pub const MAC_COMMAND_MAX_LENGTH: usize = 15;

/// Serialized MAC commands
pub type CommandBytes = Vec<u8, MAC_COMMAND_MAX_LENGTH>;

/// MAC command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandIdentifier {
    /// LinkCheckReq / LinkCheckAns
    LinkCheck = 0x02,
    /// LinkADRReq / LinkADRAns
    LinkAdr = 0x03,
    /// DutyCycleReq / DutyCycleAns
    DutyCycle = 0x04,
    /// RXParamSetupReq / RXParamSetupAns
    RxParamSetup = 0x05,
    /// DevStatusReq / DevStatusAns
    DevStatus = 0x06,
    /// NewChannelReq / NewChannelAns
    NewChannel = 0x07,
    /// RXTimingSetupReq / RXTimingSetupAns
    RxTimingSetup = 0x08,
}

impl CommandIdentifier {
    /// Look up a CID
    pub fn from_u8(cid: u8) -> Option<Self> {
        match cid {
            0x02 => Some(Self::LinkCheck),
            0x03 => Some(Self::LinkAdr),
            0x04 => Some(Self::DutyCycle),
            0x05 => Some(Self::RxParamSetup),
            0x06 => Some(Self::DevStatus),
            0x07 => Some(Self::NewChannel),
            0x08 => Some(Self::RxTimingSetup),
            _ => None,
        }
    }
}

/// Command sent by the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DownlinkCommand {
    /// Link check answer
    LinkCheckAns {
        /// Link margin in dB
        margin: u8,
        /// Number of gateways that received the request
        gateways: u8,
    },
    /// Link ADR request
    LinkAdrReq(LinkAdrReq),
    /// Duty cycle request
    DutyCycleReq {
        /// Aggregated duty cycle exponent, 255 switches the device off
        max_dcycle: u8,
    },
    /// RX parameter setup request
    RxParamSetupReq {
        /// RX1 datarate offset
        rx1_dr_offset: u8,
        /// RX2 datarate
        rx2_datarate: DataRate,
        /// RX2 frequency in Hz
        frequency: u32,
    },
    /// Device status request
    DevStatusReq,
    /// New channel request
    NewChannelReq {
        /// Channel index
        index: u8,
        /// Frequency in Hz, zero removes the channel
        frequency: u32,
        /// Minimum datarate
        min_dr: DataRate,
        /// Maximum datarate
        max_dr: DataRate,
    },
    /// RX timing setup request
    RxTimingSetupReq {
        /// RX1 delay in seconds, zero means one
        delay: u8,
    },
}

impl DownlinkCommand {
    /// Parse the next command, `None` on an unknown CID or truncated payload
    pub fn parse(r: &mut Reader<'_>) -> Option<Self> {
        let cid = CommandIdentifier::from_u8(r.u8()?)?;
        let cmd = match cid {
            CommandIdentifier::LinkCheck => DownlinkCommand::LinkCheckAns {
                margin: r.u8()?,
                gateways: r.u8()?,
            },
            CommandIdentifier::LinkAdr => {
                let dr_power = r.u8()?;
                let ch_mask = r.u16_le()?;
                let redundancy = r.u8()?;
                DownlinkCommand::LinkAdrReq(LinkAdrReq {
                    datarate: dr_power >> 4,
                    tx_power: dr_power & 0x0F,
                    ch_mask,
                    ch_mask_cntl: (redundancy >> 4) & 0x07,
                    nb_rep: redundancy & 0x0F,
                })
            }
            CommandIdentifier::DutyCycle => DownlinkCommand::DutyCycleReq { max_dcycle: r.u8()? },
            CommandIdentifier::RxParamSetup => {
                let dl_settings = r.u8()?;
                DownlinkCommand::RxParamSetupReq {
                    rx1_dr_offset: (dl_settings >> 4) & 0x07,
                    rx2_datarate: dl_settings & 0x0F,
                    frequency: r.u24_le()? * 100,
                }
            }
            CommandIdentifier::DevStatus => DownlinkCommand::DevStatusReq,
            CommandIdentifier::NewChannel => {
                let index = r.u8()?;
                let frequency = r.u24_le()? * 100;
                let dr_range = r.u8()?;
                DownlinkCommand::NewChannelReq {
                    index,
                    frequency,
                    min_dr: dr_range & 0x0F,
                    max_dr: dr_range >> 4,
                }
            }
            CommandIdentifier::RxTimingSetup => DownlinkCommand::RxTimingSetupReq {
                delay: r.u8()? & 0x0F,
            },
        };
        Some(cmd)
    }
}

/// Iterator over a MAC command stream
///
/// Stops at the first unknown or truncated command.
pub struct Commands<'a> {
    reader: Reader<'a>,
}

impl<'a> Commands<'a> {
    /// Iterate over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: Reader::new(data),
        }
    }
}

impl Iterator for Commands<'_> {
    type Item = DownlinkCommand;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.remaining() == 0 {
            return None;
        }
        let cmd = DownlinkCommand::parse(&mut self.reader);
        if cmd.is_none() {
            warn!("aborting MAC command stream at offset {}", self.reader.position());
            // Drain so iteration stays finished.
            let _ = self.reader.bytes(self.reader.remaining());
        }
        cmd
    }
}

/// Command sent by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UplinkCommand {
    /// Ask the network for link quality
    LinkCheckReq,
    /// Answer to LinkADRReq
    LinkAdrAns {
        /// Power/datarate/channel mask ack bits
        status: u8,
    },
    /// Answer to DutyCycleReq
    DutyCycleAns,
    /// Answer to RXParamSetupReq
    RxParamSetupAns {
        /// RX1 offset/RX2 datarate/channel ack bits
        status: u8,
    },
    /// Answer to DevStatusReq
    DevStatusAns {
        /// Battery level (0 = external power, 1-254 = level, 255 = unknown)
        battery: u8,
        /// 6-bit signed demodulation margin
        margin: u8,
    },
    /// Answer to NewChannelReq
    NewChannelAns {
        /// Datarate range/frequency ack bits
        status: u8,
    },
    /// Answer to RXTimingSetupReq
    RxTimingSetupAns,
}

impl UplinkCommand {
    /// Command identifier
    pub fn cid(&self) -> CommandIdentifier {
        match self {
            UplinkCommand::LinkCheckReq => CommandIdentifier::LinkCheck,
            UplinkCommand::LinkAdrAns { .. } => CommandIdentifier::LinkAdr,
            UplinkCommand::DutyCycleAns => CommandIdentifier::DutyCycle,
            UplinkCommand::RxParamSetupAns { .. } => CommandIdentifier::RxParamSetup,
            UplinkCommand::DevStatusAns { .. } => CommandIdentifier::DevStatus,
            UplinkCommand::NewChannelAns { .. } => CommandIdentifier::NewChannel,
            UplinkCommand::RxTimingSetupAns => CommandIdentifier::RxTimingSetup,
        }
    }

    /// Serialized length including the CID
    pub fn len(&self) -> usize {
        match self {
            UplinkCommand::LinkCheckReq
            | UplinkCommand::DutyCycleAns
            | UplinkCommand::RxTimingSetupAns => 1,
            UplinkCommand::LinkAdrAns { .. }
            | UplinkCommand::RxParamSetupAns { .. }
            | UplinkCommand::NewChannelAns { .. } => 2,
            UplinkCommand::DevStatusAns { .. } => 3,
        }
    }

    /// Whether the answer must be repeated until a downlink arrives
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            UplinkCommand::RxParamSetupAns { .. } | UplinkCommand::RxTimingSetupAns
        )
    }

    fn write(&self, out: &mut CommandBytes) -> Result<(), BufferFull> {
        out.push(self.cid() as u8).map_err(|_| BufferFull)?;
        match *self {
            UplinkCommand::LinkAdrAns { status }
            | UplinkCommand::RxParamSetupAns { status }
            | UplinkCommand::NewChannelAns { status } => {
                out.push(status).map_err(|_| BufferFull)?;
            }
            UplinkCommand::DevStatusAns { battery, margin } => {
                out.extend_from_slice(&[battery, margin]).map_err(|_| BufferFull)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// The outgoing MAC command buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferFull;

/// Length of an uplink command starting with `cid`
fn uplink_len(cid: u8) -> Option<usize> {
    match cid {
        0x02 | 0x04 | 0x08 => Some(1),
        0x03 | 0x05 | 0x07 => Some(2),
        0x06 => Some(3),
        _ => None,
    }
}

/// Outgoing MAC commands
///
/// `pending` holds commands queued since the last uplink; `to_repeat` holds
/// sticky answers already sent once. Together they never exceed
/// [`MAC_COMMAND_MAX_LENGTH`] bytes.
#[derive(Debug, Clone, Default)]
pub struct MacCommandBuffer {
    pending: CommandBytes,
    to_repeat: CommandBytes,
    in_next_tx: bool,
}

impl MacCommandBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything
    pub fn reset(&mut self) {
        self.pending.clear();
        self.to_repeat.clear();
        self.in_next_tx = false;
    }

    /// Queue a command for the next uplink
    pub fn push(&mut self, cmd: UplinkCommand) -> Result<(), BufferFull> {
        let budget = MAC_COMMAND_MAX_LENGTH - self.to_repeat.len();
        if self.pending.len() + cmd.len() > budget {
            return Err(BufferFull);
        }
        cmd.write(&mut self.pending)?;
        self.in_next_tx = true;
        Ok(())
    }

    /// Bytes the next uplink would carry
    pub fn len(&self) -> usize {
        self.pending.len() + self.to_repeat.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the next uplink should carry commands
    pub fn in_next_tx(&self) -> bool {
        self.in_next_tx
    }

    /// Commands already sent once and repeated until a downlink
    pub fn to_repeat(&self) -> &[u8] {
        &self.to_repeat
    }

    /// A downlink was received, stop repeating sticky answers
    pub fn clear_repeat(&mut self) {
        self.to_repeat.clear();
        self.in_next_tx = !self.pending.is_empty();
    }

    /// Take the bytes for the next uplink
    ///
    /// Returns `None` when no commands are due. Sticky answers stay queued
    /// for repetition.
    pub fn prepare_uplink(&mut self) -> Option<CommandBytes> {
        let due = self.in_next_tx;
        let mut combined = self.pending.clone();
        // Both parts together stay within capacity.
        let _ = combined.extend_from_slice(&self.to_repeat);

        self.to_repeat.clear();
        let mut pos = 0;
        while pos < combined.len() {
            let Some(len) = uplink_len(combined[pos]) else {
                break;
            };
            let end = (pos + len).min(combined.len());
            if matches!(combined[pos], 0x05 | 0x08) {
                let _ = self.to_repeat.extend_from_slice(&combined[pos..end]);
            }
            pos = end;
        }
        self.pending.clear();
        self.in_next_tx = !self.to_repeat.is_empty();

        (due && !combined.is_empty()).then_some(combined)
    }
}

/// State touched by network requests
pub struct CommandContext<'a> {
    /// Channel table and masks
    pub plan: &'a mut ChannelPlan,
    /// Negotiated parameters
    pub params: &'a mut MacParams,
    /// Device-wide duty cycle
    pub duty_cycle: &'a mut DutyCycle,
    /// ADR enabled locally
    pub adr: bool,
    /// Battery level for DevStatusAns
    pub battery: u8,
    /// SNR of the frame carrying the commands
    pub snr: i8,
}

/// Link check result carried by a LinkCheckAns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkCheck {
    /// Demodulation margin in dB
    pub margin: u8,
    /// Gateways that heard the request
    pub gateways: u8,
}

/// Apply a stream of network commands and queue their answers
///
/// Returns the last LinkCheckAns found in the stream.
pub fn process(ctx: &mut CommandContext<'_>, data: &[u8], out: &mut MacCommandBuffer) -> Option<LinkCheck> {
    let mut link_check = None;
    for cmd in Commands::new(data) {
        debug!("MAC command {}", cmd_id(&cmd));
        let answer = match cmd {
            DownlinkCommand::LinkCheckAns { margin, gateways } => {
                link_check = Some(LinkCheck { margin, gateways });
                None
            }
            DownlinkCommand::LinkAdrReq(req) => Some(link_adr(ctx, &req)),
            DownlinkCommand::DutyCycleReq { max_dcycle } => {
                ctx.duty_cycle.set_max_dcycle(max_dcycle);
                Some(UplinkCommand::DutyCycleAns)
            }
            DownlinkCommand::RxParamSetupReq {
                rx1_dr_offset,
                rx2_datarate,
                frequency,
            } => Some(rx_param_setup(ctx, rx1_dr_offset, rx2_datarate, frequency)),
            DownlinkCommand::DevStatusReq => Some(UplinkCommand::DevStatusAns {
                battery: ctx.battery,
                margin: (ctx.snr.clamp(-32, 31) as u8) & 0x3F,
            }),
            DownlinkCommand::NewChannelReq {
                index,
                frequency,
                min_dr,
                max_dr,
            } => Some(new_channel(ctx, index, frequency, min_dr, max_dr)),
            DownlinkCommand::RxTimingSetupReq { delay } => {
                ctx.params.set_rx_delay(delay);
                Some(UplinkCommand::RxTimingSetupAns)
            }
        };

        if let Some(answer) = answer {
            if out.push(answer).is_err() {
                warn!("MAC command buffer full, answer {} dropped", answer.cid() as u8);
            }
        }
    }
    link_check
}

fn cmd_id(cmd: &DownlinkCommand) -> u8 {
    match cmd {
        DownlinkCommand::LinkCheckAns { .. } => CommandIdentifier::LinkCheck as u8,
        DownlinkCommand::LinkAdrReq(_) => CommandIdentifier::LinkAdr as u8,
        DownlinkCommand::DutyCycleReq { .. } => CommandIdentifier::DutyCycle as u8,
        DownlinkCommand::RxParamSetupReq { .. } => CommandIdentifier::RxParamSetup as u8,
        DownlinkCommand::DevStatusReq => CommandIdentifier::DevStatus as u8,
        DownlinkCommand::NewChannelReq { .. } => CommandIdentifier::NewChannel as u8,
        DownlinkCommand::RxTimingSetupReq { .. } => CommandIdentifier::RxTimingSetup as u8,
    }
}

fn link_adr(ctx: &mut CommandContext<'_>, req: &LinkAdrReq) -> UplinkCommand {
    let (status, change) = adr::link_adr_request(
        ctx.plan,
        ctx.adr,
        ctx.params.datarate,
        ctx.params.tx_power,
        req,
    );
    match change {
        Some(change) => {
            ctx.params.datarate = change.datarate;
            ctx.params.tx_power = change.tx_power;
            ctx.params.nb_rep = change.nb_rep;
            ctx.plan.set_mask(change.mask);
        }
        None => warn!("LinkADRReq rejected, status {}", status),
    }
    UplinkCommand::LinkAdrAns { status }
}

fn rx_param_setup(ctx: &mut CommandContext<'_>, offset: u8, datarate: DataRate, frequency: u32) -> UplinkCommand {
    const CHANNEL_OK: u8 = 0x01;
    const DATARATE_OK: u8 = 0x02;
    const OFFSET_OK: u8 = 0x04;

    let region = ctx.plan.region();
    let mut status = CHANNEL_OK | DATARATE_OK | OFFSET_OK;
    if !region.rx2_frequency_valid(frequency) {
        status &= !CHANNEL_OK;
    }
    if !(region.rx_min_datarate()..=region.rx_max_datarate()).contains(&datarate) {
        status &= !DATARATE_OK;
    }
    if region.is_us() && ((5..=7).contains(&datarate) || datarate > 13) {
        status &= !DATARATE_OK;
    }
    if offset > region.max_rx1_dr_offset() {
        status &= !OFFSET_OK;
    }

    if status == CHANNEL_OK | DATARATE_OK | OFFSET_OK {
        ctx.params.rx2_datarate = datarate;
        ctx.params.rx2_frequency = frequency;
        ctx.params.rx1_dr_offset = offset;
    } else {
        warn!("RXParamSetupReq rejected, status {}", status);
    }
    UplinkCommand::RxParamSetupAns { status }
}

fn new_channel(
    ctx: &mut CommandContext<'_>,
    index: u8,
    frequency: u32,
    min_dr: DataRate,
    max_dr: DataRate,
) -> UplinkCommand {
    let result = if frequency == 0 {
        ctx.plan.remove_channel(index as usize)
    } else {
        ctx.plan.add_channel(index as usize, frequency, min_dr, max_dr)
    };
    let status = match result {
        Ok(()) => 0x03,
        Err(ChannelError::FrequencyInvalid) => 0x02,
        Err(ChannelError::DatarateInvalid) => 0x01,
        Err(_) => 0x00,
    };
    UplinkCommand::NewChannelAns { status }
}
