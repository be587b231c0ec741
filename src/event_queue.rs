//! Deferred-event FIFO.
//!
//! Commands that arrive while motion is in flight are parked here by the
//! state machine and replayed one at a time once the controller is ready
//! for its next action.

use crate::machine::{Event, EventData};
use proto::Status;

/// Capacity in events. A power of two so the wrap reduces to a mask; one
/// slot is sacrificed to distinguish full from empty.
const EVENT_QUEUE_LENGTH: usize = 16;

#[derive(Default)]
pub struct EventQueue {
    head: u8,
    tail: u8,
    slots: [Option<(Event, EventData)>; EVENT_QUEUE_LENGTH],
}

impl EventQueue {
    /// Appends an event, failing when the queue is out of room; the caller
    /// promotes that to a controller error, since dropping a deferred
    /// command would desynchronize the host.
    pub fn add(&mut self, event: Event, data: EventData) -> Result<(), Status> {
        let next_head = (self.head + 1) % EVENT_QUEUE_LENGTH as u8;
        if next_head == self.tail {
            return Err(Status::EventQueueFull);
        }
        self.slots[self.head as usize] = Some((event, data));
        self.head = next_head;
        Ok(())
    }

    /// Removes the oldest event, if any.
    pub fn remove(&mut self) -> Option<(Event, EventData)> {
        if self.head == self.tail {
            return None;
        }
        let entry = self.slots[self.tail as usize].take();
        self.tail = (self.tail + 1) % EVENT_QUEUE_LENGTH as u8;
        entry
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.slots = Default::default();
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }
}
