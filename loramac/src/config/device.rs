use core::fmt;

/// EUI-64 (8 bytes, most significant byte first)
pub type EUI64 = [u8; 8];

/// AES-128 key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AESKey([u8; 16]);

impl AESKey {
    /// Wrap raw key bytes
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for AESKey {
    fn default() -> Self {
        Self([0; 16])
    }
}

// Keys never end up in logs.
impl fmt::Debug for AESKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AESKey(..)")
    }
}

/// Device address, as a 32-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DevAddr(u32);

impl DevAddr {
    /// Create from the numeric address
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Numeric address
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Wire representation (little endian)
    pub fn to_le_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Parse the wire representation
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

/// LoRaWAN device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceClass {
    /// Class A: Uplink followed by two receive windows
    #[default]
    A,
    /// Class C: Continuously listening except when transmitting
    C,
}

/// Device activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActivationState {
    /// Device is not activated
    Idle,
    /// Join request sent, waiting for a join accept
    Joining,
    /// Device is activated through OTAA
    OTAAActivated,
    /// Device is activated through ABP
    ABPActivated,
}

/// Device identity and root key
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device EUI (unique device identifier)
    pub dev_eui: EUI64,
    /// Application EUI
    pub app_eui: EUI64,
    /// Application key (used for OTAA)
    pub app_key: AESKey,
    /// Device address (used for ABP)
    pub dev_addr: Option<DevAddr>,
    /// Network session key (used for ABP)
    pub nwk_skey: Option<AESKey>,
    /// Application session key (used for ABP)
    pub app_skey: Option<AESKey>,
}

impl DeviceConfig {
    /// Create a new OTAA device configuration
    pub fn new_otaa(dev_eui: EUI64, app_eui: EUI64, app_key: AESKey) -> Self {
        Self {
            dev_eui,
            app_eui,
            app_key,
            dev_addr: None,
            nwk_skey: None,
            app_skey: None,
        }
    }

    /// Create a new ABP device configuration
    pub fn new_abp(
        dev_eui: EUI64,
        app_eui: EUI64,
        dev_addr: DevAddr,
        nwk_skey: AESKey,
        app_skey: AESKey,
    ) -> Self {
        Self {
            dev_eui,
            app_eui,
            app_key: AESKey::default(),
            dev_addr: Some(dev_addr),
            nwk_skey: Some(nwk_skey),
            app_skey: Some(app_skey),
        }
    }

    /// Whether the configuration carries a complete ABP session
    pub fn is_abp(&self) -> bool {
        self.dev_addr.is_some() && self.nwk_skey.is_some() && self.app_skey.is_some()
    }
}

/// Session state for an activated device
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current activation state
    pub activation_state: ActivationState,
    /// Device address (assigned during activation)
    pub dev_addr: DevAddr,
    /// Network session key
    pub nwk_skey: AESKey,
    /// Application session key
    pub app_skey: AESKey,
    /// Uplink frame counter of the next (or pending) uplink
    pub fcnt_up: u32,
    /// Last accepted downlink frame counter
    pub fcnt_down: u32,
    /// Whether `fcnt_down` belongs to an accepted downlink
    pub fcnt_down_valid: bool,
    /// Last used device nonce (for OTAA)
    pub dev_nonce: u16,
}

impl SessionState {
    /// Create an empty, not yet activated session
    pub fn new() -> Self {
        Self {
            activation_state: ActivationState::Idle,
            dev_addr: DevAddr::default(),
            nwk_skey: AESKey::default(),
            app_skey: AESKey::default(),
            fcnt_up: 0,
            fcnt_down: 0,
            fcnt_down_valid: false,
            dev_nonce: 0,
        }
    }

    /// Create a new session state for ABP activation
    pub fn new_abp(dev_addr: DevAddr, nwk_skey: AESKey, app_skey: AESKey) -> Self {
        Self {
            activation_state: ActivationState::ABPActivated,
            dev_addr,
            nwk_skey,
            app_skey,
            ..Self::new()
        }
    }

    /// Whether uplinks may be sent
    pub fn is_joined(&self) -> bool {
        matches!(
            self.activation_state,
            ActivationState::OTAAActivated | ActivationState::ABPActivated
        )
    }

    /// Increment the uplink frame counter
    pub fn increment_fcnt_up(&mut self) {
        self.fcnt_up = self.fcnt_up.wrapping_add(1);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
