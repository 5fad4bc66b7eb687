//! Adaptive data rate
//!
//! Device-side ADR back-off and validation of network `LinkADRReq` commands.

use super::channels::{ChannelMask, ChannelPlan};
use super::region::{DataRate, Region};

/// Uplinks without a downlink before the device requests an ADR answer
pub const ADR_ACK_LIMIT: u32 = 64;

/// Uplinks between datarate steps once the limit was crossed
pub const ADR_ACK_DELAY: u32 = 32;

/// LinkADRAns status bits
pub const STATUS_CHANNEL_MASK_OK: u8 = 0x01;
/// Datarate accepted
pub const STATUS_DATARATE_OK: u8 = 0x02;
/// TX power accepted
pub const STATUS_POWER_OK: u8 = 0x04;

/// Result of the ADR back-off for the next uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdrStep {
    /// Datarate to use
    pub datarate: DataRate,
    /// Set ADRACKReq in the uplink
    pub ack_req: bool,
}

/// Compute the datarate for the next uplink
///
/// `ack_counter` counts uplinks since the last downlink and is reset when the
/// datarate is already at the floor. When the floor is reached through a step
/// and `update_mask` is set, the default channels are re-enabled.
pub fn next_datarate(
    plan: &mut ChannelPlan,
    enabled: bool,
    update_mask: bool,
    ack_counter: &mut u32,
    datarate: DataRate,
) -> AdrStep {
    let region = plan.region();
    let floor = region.tx_min_datarate();
    if !enabled {
        return AdrStep { datarate, ack_req: false };
    }
    if datarate == floor {
        *ack_counter = 0;
        return AdrStep { datarate, ack_req: false };
    }

    let ack_req = *ack_counter >= ADR_ACK_LIMIT;
    let mut next = datarate;
    if *ack_counter >= ADR_ACK_LIMIT + ADR_ACK_DELAY && *ack_counter % ADR_ACK_DELAY == 0 {
        next = if region.is_us() && datarate == 8 {
            4
        } else {
            datarate.saturating_sub(1).max(floor)
        };
        if next == floor && update_mask {
            plan.enable_default_channels();
        }
    }

    AdrStep { datarate: next, ack_req }
}

/// Fields of a LinkADRReq
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkAdrReq {
    /// Requested datarate
    pub datarate: DataRate,
    /// Requested TX power index
    pub tx_power: u8,
    /// Channel mask word
    pub ch_mask: u16,
    /// Channel mask control
    pub ch_mask_cntl: u8,
    /// Number of transmissions, zero means one
    pub nb_rep: u8,
}

/// Settings accepted from a LinkADRReq
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAdrChange {
    /// New datarate
    pub datarate: DataRate,
    /// New TX power index
    pub tx_power: u8,
    /// New channel mask
    pub mask: ChannelMask,
    /// New repetition count
    pub nb_rep: u8,
}

/// Validate a LinkADRReq against the current plan
///
/// Returns the LinkADRAns status byte and, only when all three bits are set,
/// the settings to apply.
pub fn link_adr_request(
    plan: &ChannelPlan,
    adr_enabled: bool,
    current_datarate: DataRate,
    current_power: u8,
    req: &LinkAdrReq,
) -> (u8, Option<LinkAdrChange>) {
    let region = plan.region();
    if !adr_enabled && (req.datarate != current_datarate || req.tx_power != current_power) {
        return (0, None);
    }

    let mut status = STATUS_CHANNEL_MASK_OK | STATUS_DATARATE_OK | STATUS_POWER_OK;
    let nb_rep = if req.nb_rep == 0 { 1 } else { req.nb_rep };
    let mut mask = *plan.mask();

    if region.is_us() {
        if !apply_us_mask(plan, region, req, &mut mask) {
            status &= !STATUS_CHANNEL_MASK_OK;
        }
    } else if !apply_eu_mask(plan, req, &mut mask) {
        status &= !STATUS_CHANNEL_MASK_OK;
    }

    if !(region.tx_min_datarate()..=region.tx_max_datarate()).contains(&req.datarate) {
        status &= !STATUS_DATARATE_OK;
    }
    if !(region.max_tx_power()..=region.min_tx_power()).contains(&req.tx_power) {
        status &= !STATUS_POWER_OK;
    }

    if status != STATUS_CHANNEL_MASK_OK | STATUS_DATARATE_OK | STATUS_POWER_OK {
        return (status, None);
    }
    (
        status,
        Some(LinkAdrChange {
            datarate: req.datarate,
            tx_power: req.tx_power,
            mask,
            nb_rep,
        }),
    )
}

fn apply_eu_mask(plan: &ChannelPlan, req: &LinkAdrReq, mask: &mut ChannelMask) -> bool {
    match req.ch_mask_cntl {
        0 if req.ch_mask == 0 => false,
        0 => {
            let undefined = (0..16).any(|i| {
                req.ch_mask & (1 << i) != 0 && plan.channel(i).is_none()
            });
            mask.set_word(0, req.ch_mask);
            !undefined
        }
        6 => {
            let mut word = req.ch_mask;
            for i in 0..16 {
                if plan.channel(i).is_some() {
                    word |= 1 << i;
                }
            }
            mask.set_word(0, word);
            true
        }
        _ => false,
    }
}

fn apply_us_mask(plan: &ChannelPlan, region: Region, req: &LinkAdrReq, mask: &mut ChannelMask) -> bool {
    match req.ch_mask_cntl {
        6 | 7 => {
            let word = if req.ch_mask_cntl == 6 { 0xFFFF } else { 0x0000 };
            for i in 0..4 {
                mask.set_word(i, word);
            }
            mask.set_word(4, req.ch_mask & 0x00FF);
            !mask.is_empty()
        }
        5 => false,
        cntl => {
            let base = cntl as usize * 16;
            let undefined = (0..16).any(|i| {
                req.ch_mask & (1 << i) != 0 && plan.channel(base + i).is_none()
            });
            mask.set_word(cntl as usize, req.ch_mask);
            let mut ok = !undefined && mask.count_bw125() >= 6;
            if region == Region::Us915Hybrid && !mask.validate_hybrid() {
                ok = false;
            }
            ok
        }
    }
}
