//! Command intake buffer.
//!
//! The transport interrupt feeds received bytes in here one at a time; the
//! mainline takes out whole six-byte frames. The buffer is aware of the
//! protocol's two frame-boundary special cases: a status-register address is
//! a read setup and is dropped, and a byte in the general-command range is
//! expanded into a synthetic full frame so that everything downstream deals
//! in frames only.
//!
//! Fullness is accounted in frames, not bytes: a byte is only accepted if
//! the buffer has room for the complete frame it belongs to, and a frame
//! that cannot fit is dropped in its entirety. The overflow itself is
//! reported by the mainline when it notices the buffer is full.

use proto::{Frame, FRAME_SIZE};
use smart_default::SmartDefault;

/// Ring capacity in bytes. A power of two so the compiler can reduce the
/// wrap to a mask.
pub const COMMAND_BUFFER_SIZE: usize = 128;

const FRAME_CAPACITY: u8 = (COMMAND_BUFFER_SIZE / FRAME_SIZE) as u8;

/// FIFO of received command bytes with frame-granular accounting.
///
/// Counters are single bytes: the transport ISR publishes a completed frame
/// by incrementing `completed_frames`, and the mainline consumes frames by
/// advancing `tail`, so each side writes its own fields and reads of the
/// other side's are single-byte atomic.
#[derive(SmartDefault)]
pub struct CommandBuffer {
    #[default([0; COMMAND_BUFFER_SIZE])]
    buffer: [u8; COMMAND_BUFFER_SIZE],
    head: u8,
    tail: u8,
    #[default(FRAME_SIZE as u8)]
    bytes_remaining: u8,
    completed_frames: u8,
}

impl CommandBuffer {
    /// Whether any complete frames are waiting.
    pub fn is_empty(&self) -> bool {
        self.completed_frames == 0
    }

    /// Whether the buffer can accept another complete frame.
    pub fn is_full(&self) -> bool {
        self.completed_frames == FRAME_CAPACITY
    }

    /// Accepts one byte from the transport.
    ///
    /// At a frame boundary, a status-register address is ignored and a
    /// general-command byte becomes a whole synthetic frame. Anything else
    /// is the next byte of the frame in progress.
    pub fn add_command_byte(&mut self, data: u8) {
        let at_boundary = self.bytes_remaining == FRAME_SIZE as u8;

        if data == proto::STATUS_REG && at_boundary {
            // Read setup for the status register, not a command byte.
            return;
        }

        if proto::is_general_command(data) && at_boundary {
            for &byte in &Frame::general(data).encode() {
                self.add_byte(byte);
            }
        } else {
            self.add_byte(data);
        }
    }

    /// Removes the oldest complete frame.
    pub fn take_frame(&mut self) -> Option<Frame> {
        if self.is_empty() {
            return None;
        }

        let mut bytes = [0; FRAME_SIZE];
        for byte in bytes.iter_mut() {
            *byte = self.remove_byte();
        }
        self.completed_frames -= 1;
        Some(Frame::decode(bytes))
    }

    fn add_byte(&mut self, data: u8) {
        // Admission is checked per byte: once the buffer fills, the rest of
        // the in-flight frame is dropped along with this byte, keeping the
        // frame count honest at the cost of losing the whole frame.
        if self.is_full() {
            return;
        }

        self.buffer[self.head as usize] = data;
        self.head = (self.head + 1) % COMMAND_BUFFER_SIZE as u8;

        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 {
            self.completed_frames += 1;
            self.bytes_remaining = FRAME_SIZE as u8;
        }
    }

    fn remove_byte(&mut self) -> u8 {
        let byte = self.buffer[self.tail as usize];
        self.tail = (self.tail + 1) % COMMAND_BUFFER_SIZE as u8;
        byte
    }
}
