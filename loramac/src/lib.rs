//! LoRaWAN MAC layer in Rust
//!
//! This crate provides a `no_std` implementation of the LoRaWAN 1.0.x MAC
//! layer for end devices. It supports Class A and Class C operation, OTAA and
//! ABP activation, and the EU868, EU433, CN780 and US915 channel plans.
//!
//! # Features
//! - Frame codec with AES-CMAC integrity and AES-CTR payload encryption
//! - MAC command processing (LinkADR, DutyCycle, RXParamSetup, DevStatus,
//!   NewChannel, RXTimingSetup, LinkCheck)
//! - Regulatory duty cycle with per-band time-off and join back-off
//! - Adaptive data rate and confirmed uplink retransmissions
//! - Multicast groups
//! - Radio and timers behind traits, driven by a single event mailbox
//!
//! # Example
//! ```no_run
//! # fn run<R, T, G>(radio: R, timers: T, rng: G) -> Result<(), loramac::device::DeviceError<R::Error>>
//! # where R: loramac::radio::Radio, T: loramac::lorawan::Timers, G: rand_core::RngCore {
//! use loramac::{
//!     config::{device::{AESKey, DeviceConfig}, mac::MacConfig},
//!     device::Device,
//!     lorawan::{EventQueue, Indication, Region},
//! };
//!
//! let config = DeviceConfig::new_otaa(
//!     [0x00; 8], // DevEUI
//!     [0x00; 8], // AppEUI
//!     AESKey::new([0x00; 16]), // AppKey
//! );
//! let mut device = Device::new(radio, timers, rng, config, MacConfig::new(Region::Eu868));
//! let mut queue: EventQueue<16> = EventQueue::new();
//! let (_producer, mut consumer) = queue.split();
//!
//! device.init()?;
//! device.join_otaa()?;
//!
//! // Interrupts and timers enqueue events through the producer
//! device.process(&mut consumer)?;
//! while let Some(indication) = device.poll_indication() {
//!     if let Indication::Joined { .. } = indication {
//!         device.send_unconfirmed(1, b"Hello, LoRaWAN!")?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![no_std]

#[cfg(feature = "std")]
extern crate std;

#[macro_use]
mod fmt;

/// Device class behavior (A, C)
pub mod class;

/// Device and network configuration
pub mod config;

/// Cryptographic functions
pub mod crypto;

/// High-level device interface
pub mod device;

/// LoRaWAN protocol implementation
pub mod lorawan;

/// Radio hardware abstraction layer
pub mod radio;
