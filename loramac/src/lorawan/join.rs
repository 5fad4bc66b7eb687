//! Over-the-air activation bookkeeping
//!
//! Tracks the join attempt counter and applies an accepted join to the
//! session. Frame encoding lives in [`frame`](super::frame).

use super::frame::JoinAccept;
use super::params::MacParams;
use super::region::{DataRate, Region};
use crate::config::device::{AESKey, ActivationState, SessionState};
use crate::crypto;

/// State of the join procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinState {
    /// Join requests sent in the current procedure
    pub trials: u16,
    /// A join request is outstanding
    pub pending: bool,
}

impl JoinState {
    /// Start a new procedure
    pub fn start(&mut self) {
        self.trials = 0;
        self.pending = true;
    }

    /// Count the next attempt, `None` once `max_trials` were used
    pub fn next_attempt(&mut self, max_trials: u16) -> Option<u16> {
        if self.trials >= max_trials {
            return None;
        }
        self.trials += 1;
        Some(self.trials)
    }

    /// Stop the procedure
    pub fn finish(&mut self) {
        self.pending = false;
        self.trials = 0;
    }
}

/// RX2 datarate announced in DLSettings
///
/// US-style networks that still announce DR3 are mapped to DR8.
pub fn rx2_datarate(region: Region, announced: DataRate) -> DataRate {
    if region.is_us() && announced == 3 {
        8
    } else {
        announced
    }
}

/// Install the session negotiated by a join accept
///
/// The uplink counter restarts at 1 and the downlink counter at 0.
pub fn apply_accept(
    accept: &JoinAccept,
    app_key: &AESKey,
    region: Region,
    session: &mut SessionState,
    params: &mut MacParams,
) {
    let (nwk_skey, app_skey) =
        crypto::derive_session_keys(app_key, &accept.app_nonce, &accept.net_id, session.dev_nonce);
    session.nwk_skey = nwk_skey;
    session.app_skey = app_skey;
    session.dev_addr = accept.dev_addr;
    session.activation_state = ActivationState::OTAAActivated;
    session.fcnt_up = 1;
    session.fcnt_down = 0;
    session.fcnt_down_valid = false;

    params.rx1_dr_offset = accept.rx1_dr_offset;
    params.rx2_datarate = rx2_datarate(region, accept.rx2_datarate);
    params.set_rx_delay(accept.rx_delay);
    params.datarate = region.default_datarate();
}
