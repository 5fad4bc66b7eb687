//! PHY payload codec
//!
//! All byte-level work on LoRaWAN frames happens here:
//! - join request construction and join accept decryption/parsing
//! - data uplink construction with FRMPayload encryption and MIC
//! - data downlink header parsing, counter reconstruction and MIC check
//!
//! Multi-byte fields are little endian on the wire, EUIs are stored most
//! significant byte first and reversed when written.

use heapless::Vec;

use super::phy::PHY_MAX_PAYLOAD;
use crate::config::device::{AESKey, DevAddr, EUI64};
use crate::crypto::{self, Direction, MIC_SIZE};

/// Largest accepted gap between two downlink counters
pub const MAX_FCNT_GAP: u32 = 16384;

/// Largest FOpts field
pub const MAX_FOPTS_LEN: usize = 15;

/// Join request length including MIC
pub const JOIN_REQUEST_LEN: usize = 23;

const JOIN_ACCEPT_LEN: usize = 17;
const JOIN_ACCEPT_CFLIST_LEN: usize = 33;

/// MHDR + FHDR without options
const FHDR_END: usize = 8;

/// Raw PHY payload
pub type PhyPayload = Vec<u8, PHY_MAX_PAYLOAD>;

/// MAC header types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MType {
    /// Join request
    JoinRequest = 0x00,
    /// Join accept
    JoinAccept = 0x20,
    /// Unconfirmed uplink
    UnconfirmedDataUp = 0x40,
    /// Unconfirmed downlink
    UnconfirmedDataDown = 0x60,
    /// Confirmed uplink
    ConfirmedDataUp = 0x80,
    /// Confirmed downlink
    ConfirmedDataDown = 0xA0,
    /// Reserved
    Rfu = 0xC0,
    /// Proprietary
    Proprietary = 0xE0,
}

impl MType {
    /// Extract the message type from an MHDR byte
    pub fn from_mhdr(mhdr: u8) -> Self {
        match mhdr & 0xE0 {
            0x00 => MType::JoinRequest,
            0x20 => MType::JoinAccept,
            0x40 => MType::UnconfirmedDataUp,
            0x60 => MType::UnconfirmedDataDown,
            0x80 => MType::ConfirmedDataUp,
            0xA0 => MType::ConfirmedDataDown,
            0xC0 => MType::Rfu,
            _ => MType::Proprietary,
        }
    }
}

/// Frame header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FCtrl {
    /// ADR enabled
    pub adr: bool,
    /// ADR acknowledgement requested (uplink only)
    pub adr_ack_req: bool,
    /// Acknowledges the last confirmed frame
    pub ack: bool,
    /// More downlink data pending
    pub f_pending: bool,
    /// Length of FOpts
    pub f_opts_len: u8,
}

impl FCtrl {
    /// Pack into the wire byte
    pub fn to_byte(&self) -> u8 {
        let mut byte = self.f_opts_len & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    /// Unpack the wire byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            adr_ack_req: (byte & 0x40) != 0,
            ack: (byte & 0x20) != 0,
            f_pending: (byte & 0x10) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Why a received frame was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DropReason {
    /// Shorter than any valid frame or inconsistent lengths
    Malformed,
    /// Message type the device does not handle
    UnexpectedType,
    /// Addressed to another device
    ForeignAddress,
    /// MIC mismatch
    Mic,
    /// Counter jumped too far ahead
    CounterGap,
    /// Counter already seen
    Duplicate,
}

/// Bounded little-endian reader
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Read from the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take `len` bytes
    pub fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let out = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    /// Take one byte
    pub fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    /// Take a little-endian u16
    pub fn u16_le(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Take a little-endian 24-bit value
    pub fn u24_le(&mut self) -> Option<u32> {
        self.bytes(3).map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    /// Take a little-endian u32
    pub fn u32_le(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Take a fixed-size array
    pub fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Some(out)
    }
}

/// The frame does not fit in a PHY payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Overflow;

/// Bounded little-endian writer over a PHY payload buffer
pub struct Writer<'a> {
    buf: &'a mut PhyPayload,
}

impl<'a> Writer<'a> {
    /// Append to `buf`
    pub fn new(buf: &'a mut PhyPayload) -> Self {
        Self { buf }
    }

    /// Append bytes
    pub fn bytes(&mut self, data: &[u8]) -> Result<(), Overflow> {
        self.buf.extend_from_slice(data).map_err(|_| Overflow)
    }

    /// Append one byte
    pub fn u8(&mut self, value: u8) -> Result<(), Overflow> {
        self.buf.push(value).map_err(|_| Overflow)
    }

    /// Append a little-endian u16
    pub fn u16_le(&mut self, value: u16) -> Result<(), Overflow> {
        self.bytes(&value.to_le_bytes())
    }

    /// Append a little-endian u32
    pub fn u32_le(&mut self, value: u32) -> Result<(), Overflow> {
        self.bytes(&value.to_le_bytes())
    }

    /// Append an EUI, least significant byte first
    pub fn eui(&mut self, eui: &EUI64) -> Result<(), Overflow> {
        for byte in eui.iter().rev() {
            self.u8(*byte)?;
        }
        Ok(())
    }
}

/// Build a signed join request
pub fn build_join_request(
    app_eui: &EUI64,
    dev_eui: &EUI64,
    dev_nonce: u16,
    app_key: &AESKey,
) -> Result<PhyPayload, Overflow> {
    let mut frame = PhyPayload::new();
    let mut w = Writer::new(&mut frame);
    w.u8(MType::JoinRequest as u8)?;
    w.eui(app_eui)?;
    w.eui(dev_eui)?;
    w.u16_le(dev_nonce)?;
    let mic = crypto::compute_join_mic(app_key, &frame);
    frame.extend_from_slice(&mic).map_err(|_| Overflow)?;
    Ok(frame)
}

/// Contents of a valid join accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JoinAccept {
    /// Network nonce
    pub app_nonce: [u8; 3],
    /// Network identifier
    pub net_id: [u8; 3],
    /// Assigned device address
    pub dev_addr: DevAddr,
    /// RX1 datarate offset
    pub rx1_dr_offset: u8,
    /// RX2 datarate
    pub rx2_datarate: u8,
    /// Raw RxDelay field
    pub rx_delay: u8,
    /// Frequencies of channels 3..=7, zero for unused entries
    pub cf_list: Option<[u32; 5]>,
}

/// Decrypt, authenticate and parse a join accept
pub fn parse_join_accept(frame: &[u8], app_key: &AESKey) -> Result<JoinAccept, DropReason> {
    if frame.len() != JOIN_ACCEPT_LEN && frame.len() != JOIN_ACCEPT_CFLIST_LEN {
        return Err(DropReason::Malformed);
    }
    if MType::from_mhdr(frame[0]) != MType::JoinAccept {
        return Err(DropReason::UnexpectedType);
    }

    let mut plain = [0u8; JOIN_ACCEPT_CFLIST_LEN];
    let plain = &mut plain[..frame.len()];
    plain.copy_from_slice(frame);
    crypto::decrypt_join_accept(app_key, &mut plain[1..]);

    let body_end = plain.len() - MIC_SIZE;
    let mic = crypto::compute_join_mic(app_key, &plain[..body_end]);
    if mic[..] != plain[body_end..] {
        return Err(DropReason::Mic);
    }

    let mut r = Reader::new(&plain[1..body_end]);
    let app_nonce = r.array::<3>().ok_or(DropReason::Malformed)?;
    let net_id = r.array::<3>().ok_or(DropReason::Malformed)?;
    let dev_addr = DevAddr::new(r.u32_le().ok_or(DropReason::Malformed)?);
    let dl_settings = r.u8().ok_or(DropReason::Malformed)?;
    let rx_delay = r.u8().ok_or(DropReason::Malformed)?;

    let cf_list = if r.remaining() == 16 {
        let mut freqs = [0u32; 5];
        for freq in freqs.iter_mut() {
            *freq = r.u24_le().ok_or(DropReason::Malformed)? * 100;
        }
        Some(freqs)
    } else {
        None
    };

    Ok(JoinAccept {
        app_nonce,
        net_id,
        dev_addr,
        rx1_dr_offset: (dl_settings >> 4) & 0x07,
        rx2_datarate: dl_settings & 0x0F,
        rx_delay,
        cf_list,
    })
}

/// Fields of a data uplink
#[derive(Debug, Clone, Copy)]
pub struct DataUplink<'a> {
    /// Request an acknowledgement
    pub confirmed: bool,
    /// Sender address
    pub dev_addr: DevAddr,
    /// Frame control flags; `f_opts_len` is taken from `fopts`
    pub fctrl: FCtrl,
    /// 32-bit uplink counter
    pub fcnt: u32,
    /// Piggy-backed MAC commands
    pub fopts: &'a [u8],
    /// Port, `None` for frames without FRMPayload
    pub port: Option<u8>,
    /// Plaintext FRMPayload
    pub payload: &'a [u8],
}

/// Encrypt and sign a data uplink
///
/// Port 0 payloads are encrypted with `nwk_skey`, all others with `app_skey`.
pub fn build_data_uplink(
    up: &DataUplink<'_>,
    nwk_skey: &AESKey,
    app_skey: &AESKey,
) -> Result<PhyPayload, Overflow> {
    if up.fopts.len() > MAX_FOPTS_LEN {
        return Err(Overflow);
    }
    let mtype = if up.confirmed {
        MType::ConfirmedDataUp
    } else {
        MType::UnconfirmedDataUp
    };
    let fctrl = FCtrl {
        f_opts_len: up.fopts.len() as u8,
        ..up.fctrl
    };

    let mut frame = PhyPayload::new();
    let mut w = Writer::new(&mut frame);
    w.u8(mtype as u8)?;
    w.u32_le(up.dev_addr.as_u32())?;
    w.u8(fctrl.to_byte())?;
    w.u16_le(up.fcnt as u16)?;
    w.bytes(up.fopts)?;

    if let Some(port) = up.port {
        w.u8(port)?;
        let start = frame.len();
        frame.extend_from_slice(up.payload).map_err(|_| Overflow)?;
        let key = if port == 0 { nwk_skey } else { app_skey };
        crypto::encrypt_payload(key, up.dev_addr, up.fcnt, Direction::Up, &mut frame[start..]);
    }

    let mic = crypto::compute_mic(nwk_skey, &frame, up.dev_addr, up.fcnt, Direction::Up);
    frame.extend_from_slice(&mic).map_err(|_| Overflow)?;
    Ok(frame)
}

/// A parsed but not yet authenticated data downlink
#[derive(Debug, Clone, Copy)]
pub struct DataDownlink<'a> {
    /// Sender asks for an acknowledgement
    pub confirmed: bool,
    /// Destination address
    pub dev_addr: DevAddr,
    /// Frame control flags
    pub fctrl: FCtrl,
    /// Low 16 bits of the downlink counter
    pub fcnt: u16,
    /// MAC commands in FOpts
    pub fopts: &'a [u8],
    /// Port, `None` when the frame has no FRMPayload
    pub port: Option<u8>,
    /// Encrypted FRMPayload
    pub payload: &'a [u8],
    signed: &'a [u8],
    mic: &'a [u8],
}

impl<'a> DataDownlink<'a> {
    /// Parse the header of a data downlink
    pub fn parse(frame: &'a [u8]) -> Result<Self, DropReason> {
        if frame.len() < FHDR_END + MIC_SIZE {
            return Err(DropReason::Malformed);
        }
        let confirmed = match MType::from_mhdr(frame[0]) {
            MType::UnconfirmedDataDown => false,
            MType::ConfirmedDataDown => true,
            _ => return Err(DropReason::UnexpectedType),
        };

        let (signed, mic) = frame.split_at(frame.len() - MIC_SIZE);
        let mut r = Reader::new(&signed[1..]);
        let dev_addr = DevAddr::new(r.u32_le().ok_or(DropReason::Malformed)?);
        let fctrl = FCtrl::from_byte(r.u8().ok_or(DropReason::Malformed)?);
        let fcnt = r.u16_le().ok_or(DropReason::Malformed)?;
        let fopts = r
            .bytes(fctrl.f_opts_len as usize)
            .ok_or(DropReason::Malformed)?;
        let (port, payload) = match r.u8() {
            Some(port) => (Some(port), r.bytes(r.remaining()).unwrap_or(&[])),
            None => (None, &[][..]),
        };

        Ok(Self {
            confirmed,
            dev_addr,
            fctrl,
            fcnt,
            fopts,
            port,
            payload,
            signed,
            mic,
        })
    }

    /// Check the MIC against a reconstructed 32-bit counter
    pub fn verify(&self, nwk_skey: &AESKey, fcnt: u32) -> bool {
        let mic = crypto::compute_mic(nwk_skey, self.signed, self.dev_addr, fcnt, Direction::Down);
        mic[..] == *self.mic
    }

    /// Decrypt the FRMPayload with the key its port selects
    pub fn decrypt_payload<const N: usize>(
        &self,
        nwk_skey: &AESKey,
        app_skey: &AESKey,
        fcnt: u32,
    ) -> Result<Vec<u8, N>, DropReason> {
        let mut out: Vec<u8, N> = Vec::from_slice(self.payload).map_err(|_| DropReason::Malformed)?;
        let key = if self.port == Some(0) { nwk_skey } else { app_skey };
        crypto::encrypt_payload(key, self.dev_addr, fcnt, Direction::Down, &mut out);
        Ok(out)
    }
}

/// Reconstruct the 32-bit downlink counter from its low 16 bits
///
/// Returns the candidate counter and the 16-bit distance from `prev`. A
/// distance of `MAX_FCNT_GAP` or more is rejected.
pub fn downlink_counter(prev: u32, fcnt: u16) -> Result<(u32, u16), DropReason> {
    let diff = fcnt.wrapping_sub(prev as u16);
    if diff as u32 >= MAX_FCNT_GAP {
        return Err(DropReason::CounterGap);
    }
    Ok((prev.wrapping_add(diff as u32), diff))
}
