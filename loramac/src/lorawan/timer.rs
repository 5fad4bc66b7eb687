use core::time::Duration;

/// Software timers driven by the MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Open the first receive window
    Rx1,
    /// Open the second receive window
    Rx2,
    /// Give up waiting for an acknowledgement
    AckTimeout,
    /// Retry a transmission deferred by the duty cycle
    TxDelayed,
}

/// Monotonic clock and one-shot timers
///
/// Expired timers are reported back as
/// [`Event::Timer`](super::event::Event::Timer). Arming an armed timer
/// restarts it.
pub trait Timers {
    /// Time since boot
    fn now(&mut self) -> Duration;

    /// Fire `id` after `delay`
    fn arm(&mut self, id: TimerId, delay: Duration);

    /// Stop `id` if it is armed
    fn cancel(&mut self, id: TimerId);
}
