//! MAC mailbox
//!
//! Interrupt handlers and timer callbacks only enqueue [`Event`]s; the device
//! drains them one at a time from a single context, which is the only place
//! MAC state is mutated.

use heapless::spsc::{Consumer, Producer, Queue};

use super::timer::TimerId;
use crate::radio::traits::RadioEvent;

/// Something the MAC must react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The radio raised its interrupt line; ask the driver what happened
    RadioIrq,
    /// A radio event already decoded by the driver
    Radio(RadioEvent),
    /// A MAC timer expired
    Timer(TimerId),
}

/// Mailbox holding up to `N - 1` events
pub type EventQueue<const N: usize> = Queue<Event, N>;

/// Producer end, owned by interrupt and timer contexts
pub type EventProducer<'a, const N: usize> = Producer<'a, Event, N>;

/// Consumer end, owned by the MAC context
pub type EventConsumer<'a, const N: usize> = Consumer<'a, Event, N>;
