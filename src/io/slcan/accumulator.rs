// src/io/slcan/accumulator.rs
//
// Reassembles slcan lines from an arbitrarily chunked byte stream.
//
// Bytes are copied into a linear buffer of SLCAN_MTU bytes until a carriage
// return arrives, then the line is classified and decoded. A line that would
// grow past the buffer is abandoned: the count resets and the rest of it is
// skipped up to the next terminator.

use crate::io::error::IoError;
use crate::io::FrameMessage;

use super::codec::constants::{SLCAN_BELL, SLCAN_EOL, SLCAN_MTU};
use super::codec::decode_line;

/// Outcome of one completed (or abandoned) line
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// A CAN frame was decoded
    Frame(FrameMessage),
    /// Adapter acknowledged a command (`\r`, `z\r`, `Z\r`)
    Ack,
    /// Adapter rejected a command (BEL)
    Nack,
    /// The line was not a valid frame
    Invalid(IoError),
    /// The line exceeded the buffer and was discarded
    Overflow(IoError),
}

/// Linear working buffer for the line currently being received
pub struct LineAccumulator {
    device: String,
    interface_id: u32,
    buf: [u8; SLCAN_MTU],
    len: usize,
    /// Set after an overflow, cleared by the next terminator
    discarding: bool,
}

impl LineAccumulator {
    pub fn new(device: impl Into<String>, interface_id: u32) -> Self {
        Self {
            device: device.into(),
            interface_id,
            buf: [0u8; SLCAN_MTU],
            len: 0,
            discarding: false,
        }
    }

    /// Bytes of the in-progress line
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Abandon the in-progress line
    pub fn reset(&mut self) {
        self.len = 0;
        self.discarding = false;
    }

    /// Feed one byte. Returns an event when it completes or abandons a line.
    pub fn push(&mut self, byte: u8) -> Option<LineEvent> {
        match byte {
            SLCAN_EOL => {
                if self.discarding {
                    self.reset();
                    return None;
                }
                let event = self.finish_line();
                self.reset();
                Some(event)
            }
            SLCAN_BELL => {
                self.reset();
                Some(LineEvent::Nack)
            }
            _ if self.discarding => None,
            // Some adapters terminate with CRLF
            b'\n' if self.len == 0 => None,
            _ if self.len >= SLCAN_MTU => {
                self.len = 0;
                self.discarding = true;
                Some(LineEvent::Overflow(IoError::line_overflow(
                    &self.device,
                    SLCAN_MTU,
                )))
            }
            _ => {
                self.buf[self.len] = byte;
                self.len += 1;
                None
            }
        }
    }

    /// Feed a chunk, collecting every event it produces in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<LineEvent> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn finish_line(&self) -> LineEvent {
        let line = &self.buf[..self.len];
        match line {
            [] | [b'z'] | [b'Z'] => LineEvent::Ack,
            _ => match decode_line(line, self.interface_id) {
                Ok(frame) => LineEvent::Frame(frame),
                Err(IoError::Protocol { message, .. }) => {
                    LineEvent::Invalid(IoError::protocol(&self.device, message))
                }
                Err(e) => LineEvent::Invalid(e),
            },
        }
    }
}
