//! Device and network configuration
//!
//! This module contains types for configuring LoRaWAN devices and the MAC
//! engine. It includes:
//! - Device identity and keys (DevEUI, AppEUI, AppKey, ABP session)
//! - Session state (addresses, keys, frame counters)
//! - MAC engine behavior (region, class, ADR, retries)

/// Device configuration and session state
pub mod device;

/// MAC engine configuration
pub mod mac;

pub use device::{DeviceClass, DeviceConfig};
pub use mac::MacConfig;
