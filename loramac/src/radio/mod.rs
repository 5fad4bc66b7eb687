//! Radio driver contract
//!
//! The MAC talks to the transceiver only through [`Radio`]; drivers live
//! outside this crate.

/// Radio trait and configuration types
pub mod traits;

pub use traits::{Bandwidth, Modulation, Radio, RadioEvent, RadioParam, RxConfig, TxConfig};
