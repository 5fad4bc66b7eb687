use heapless::Vec;

use crate::config::device::{AESKey, DevAddr};

/// Maximum number of multicast groups
pub const MAX_MULTICAST_CHANNELS: usize = 4;

/// A multicast group the device listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastChannel {
    /// Group address
    pub address: DevAddr,
    /// Group network session key
    pub nwk_skey: AESKey,
    /// Group application session key
    pub app_skey: AESKey,
    /// Last accepted downlink counter
    pub fcnt_down: u32,
    /// Whether the group has accepted a downlink yet
    pub fcnt_down_valid: bool,
}

impl MulticastChannel {
    /// New group with a zero downlink counter
    pub fn new(address: DevAddr, nwk_skey: AESKey, app_skey: AESKey) -> Self {
        Self {
            address,
            nwk_skey,
            app_skey,
            fcnt_down: 0,
            fcnt_down_valid: false,
        }
    }
}

/// Multicast groups owned by the session
#[derive(Debug, Clone, Default)]
pub struct MulticastList {
    channels: Vec<MulticastChannel, MAX_MULTICAST_CHANNELS>,
}

impl MulticastList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group, replacing any group with the same address
    ///
    /// Gives the channel back when the list is full.
    pub fn add(&mut self, channel: MulticastChannel) -> Result<(), MulticastChannel> {
        if let Some(existing) = self.find_mut(channel.address) {
            *existing = channel;
            return Ok(());
        }
        self.channels.push(channel)
    }

    /// Remove a group, returns whether it existed
    pub fn remove(&mut self, address: DevAddr) -> bool {
        match self.channels.iter().position(|ch| ch.address == address) {
            Some(index) => {
                self.channels.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Group with `address`
    pub fn find_mut(&mut self, address: DevAddr) -> Option<&mut MulticastChannel> {
        self.channels.iter_mut().find(|ch| ch.address == address)
    }

    /// All groups
    pub fn iter(&self) -> impl Iterator<Item = &MulticastChannel> {
        self.channels.iter()
    }

    /// Zero every downlink counter
    pub fn reset_counters(&mut self) {
        for ch in self.channels.iter_mut() {
            ch.fcnt_down = 0;
            ch.fcnt_down_valid = false;
        }
    }
}
