//! LoRaWAN protocol implementation
//!
//! This module contains the core LoRaWAN protocol implementation, including:
//! - MAC state machine and mailbox
//! - Frame codec and MAC commands
//! - Regional parameters, channel plan and duty cycle

/// Adaptive data rate
pub mod adr;

/// Channel table and masks
pub mod channels;

/// MAC command handling
pub mod commands;

/// Duty-cycle enforcement and channel selection
pub mod duty_cycle;

/// Mailbox events
pub mod event;

/// Frame encoding and decoding
pub mod frame;

/// Over-the-air activation
pub mod join;

/// MAC layer implementation
pub mod mac;

/// Multicast groups
pub mod multicast;

/// Negotiated MAC parameters
pub mod params;

/// PHY layer operations
pub mod phy;

/// Regional parameters and configurations
pub mod region;

/// Timer abstraction
pub mod timer;

pub use event::{Event, EventConsumer, EventProducer, EventQueue};
pub use mac::{ExchangeState, Indication, MacError, MacLayer, MacOption, MacOptionId};
pub use phy::{PhyLayer, TimingParams};
pub use region::Region;
pub use timer::{TimerId, Timers};
