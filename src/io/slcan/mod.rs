// src/io/slcan/mod.rs
//
// slcan (Serial Line CAN) protocol driver for CANable, CANable Pro, and other
// USB-CAN adapters using the Lawicel/slcan ASCII protocol.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf

pub mod accumulator;
pub mod bitrate;
pub mod codec;
pub mod hex;
pub mod interface;
pub mod reader;
pub mod ring;

// Re-export public items
// Note: SlcanCodec is also available via io::codec::SlcanCodec
pub use accumulator::{LineAccumulator, LineEvent};
pub use bitrate::{available_timings, bitrate_command, find_bitrate_command, CanTiming};
pub use codec::{decode_line, encode_frame, SlcanCodec};
pub use interface::{InterfaceStats, SlcanInterface};
pub use reader::{run_interface, run_source, SlcanConfig};
pub use ring::{RingBuffer, RxQueue};
