// src/io/slcan/codec.rs
//
// slcan (Serial Line CAN) ASCII protocol codec.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf
//
// Frame formats:
//   Standard: t<ID:3hex><DLC:1hex><DATA:2hex*DLC>[TS:4hex]\r
//   Extended: T<ID:8hex><DLC:1hex><DATA:2hex*DLC>[TS:4hex]\r
//   RTR:      r<ID:3hex><DLC:1hex>[TS:4hex]\r / R<ID:8hex><DLC:1hex>[TS:4hex]\r
//
// TS is the optional millisecond timestamp appended by adapters in Z1 mode.

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::{now_us, FrameMessage};

use super::hex::{ascii_to_nibble, parse_hex_field, push_hex_byte, push_hex_field};

/// slcan protocol constants
pub mod constants {
    /// Longest line the receive path buffers
    pub const SLCAN_MTU: usize = 138;
    /// Hex digits in a standard identifier
    pub const SLCAN_STD_ID_LEN: usize = 3;
    /// Hex digits in an extended identifier
    pub const SLCAN_EXT_ID_LEN: usize = 8;
    /// Hex digits in the optional adapter timestamp
    pub const SLCAN_TIMESTAMP_LEN: usize = 4;
    /// Line terminator
    pub const SLCAN_EOL: u8 = b'\r';
    /// Adapter error reply
    pub const SLCAN_BELL: u8 = 0x07;
    /// Classic CAN payload limit
    pub const CAN_MAX_DLC: u8 = 8;
    /// Mask for standard (11-bit) CAN ID
    pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
    /// Mask for extended (29-bit) CAN ID
    pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
}

use constants::*;

const DEVICE: &str = "slcan";

/// slcan (Serial Line CAN) ASCII protocol codec.
pub struct SlcanCodec;

impl FrameCodec for SlcanCodec {
    /// Raw frame is one line, with or without the trailing \r
    type RawFrame = [u8];
    /// Encoded frame is a Vec<u8> (ASCII bytes with trailing \r)
    type EncodedFrame = Vec<u8>;

    fn decode(line: &[u8]) -> Result<FrameMessage, IoError> {
        decode_line(line, 0)
    }

    /// Never fails: oversized payloads are truncated, see `encode_frame`.
    fn encode(frame: &FrameMessage) -> Result<Vec<u8>, IoError> {
        Ok(encode_frame(frame))
    }
}

/// Number of payload bytes that go on the wire for `frame`.
///
/// Data frames use the payload length, remote frames their DLC. Both are capped
/// at 8; anything beyond is dropped.
pub fn wire_dlc(frame: &FrameMessage) -> u8 {
    if frame.is_rtr {
        frame.dlc.min(CAN_MAX_DLC)
    } else {
        frame.bytes.len().min(CAN_MAX_DLC as usize) as u8
    }
}

/// Whether encoding `frame` loses payload bytes
pub fn is_truncated(frame: &FrameMessage) -> bool {
    if frame.is_rtr {
        frame.dlc > CAN_MAX_DLC
    } else {
        frame.bytes.len() > CAN_MAX_DLC as usize
    }
}

/// Encode a CAN frame to slcan format for transmission
///
/// Returns the ASCII command including trailing \r. Identifiers are masked to
/// 11 or 29 bits.
pub fn encode_frame(frame: &FrameMessage) -> Vec<u8> {
    let mut line = Vec::with_capacity(1 + SLCAN_EXT_ID_LEN + 1 + 2 * CAN_MAX_DLC as usize + 1);

    let command = if frame.is_rtr { b'r' } else { b't' };
    if frame.is_extended {
        line.push(command.to_ascii_uppercase());
        push_hex_field(&mut line, frame.frame_id & CAN_EFF_MASK, SLCAN_EXT_ID_LEN);
    } else {
        line.push(command);
        push_hex_field(&mut line, frame.frame_id & CAN_SFF_MASK, SLCAN_STD_ID_LEN);
    }

    let dlc = wire_dlc(frame);
    push_hex_field(&mut line, dlc as u32, 1);

    if !frame.is_rtr {
        for &byte in frame.bytes.iter().take(dlc as usize) {
            push_hex_byte(&mut line, byte);
        }
    }

    line.push(SLCAN_EOL);
    line
}

/// Parse a single slcan frame line
///
/// Format examples:
///   t1234AABBCCDD  -> Standard frame, ID=0x123, DLC=4, data=AA BB CC DD
///   T123456788AABBCCDD112233445566 -> Extended frame, ID=0x12345678, DLC=8
///   r1230          -> Standard RTR, ID=0x123, DLC=0
///   R123456780     -> Extended RTR, ID=0x12345678, DLC=0
///   t1231112EA5    -> Standard frame, ID=0x123, DLC=1, data=11, adapter timestamp=0x2EA5
pub fn decode_line(line: &[u8], interface_id: u32) -> Result<FrameMessage, IoError> {
    let timestamp_us = now_us();

    let line = line.strip_suffix(&[SLCAN_EOL]).unwrap_or(line);
    let Some(&command) = line.first() else {
        return Err(IoError::protocol(DEVICE, "empty frame"));
    };

    // Determine frame type from first character
    let (is_extended, is_rtr) = match command {
        b't' => (false, false), // Standard data frame
        b'T' => (true, false),  // Extended data frame
        b'r' => (false, true),  // Standard RTR
        b'R' => (true, true),   // Extended RTR
        c => {
            return Err(IoError::protocol(
                DEVICE,
                format!("invalid frame prefix: {:?}", c as char),
            ))
        }
    };

    let id_len = if is_extended { SLCAN_EXT_ID_LEN } else { SLCAN_STD_ID_LEN };
    let header_len = 1 + id_len + 1; // prefix + ID + DLC

    if line.len() < header_len {
        return Err(IoError::protocol(
            DEVICE,
            format!(
                "frame too short: {} bytes, need at least {}",
                line.len(),
                header_len
            ),
        ));
    }

    let id_digits = &line[1..1 + id_len];
    let frame_id = parse_hex_field(id_digits).ok_or_else(|| {
        IoError::protocol(
            DEVICE,
            format!("invalid hex ID: {}", String::from_utf8_lossy(id_digits)),
        )
    })?;

    let id_limit = if is_extended { CAN_EFF_MASK } else { CAN_SFF_MASK };
    if frame_id > id_limit {
        return Err(IoError::protocol(
            DEVICE,
            format!("ID 0x{:X} out of range (max 0x{:X})", frame_id, id_limit),
        ));
    }

    let dlc_char = line[1 + id_len];
    let dlc = ascii_to_nibble(dlc_char).ok_or_else(|| {
        IoError::protocol(
            DEVICE,
            format!("invalid DLC character: {:?}", dlc_char as char),
        )
    })?;

    // Validate DLC (max 8 for classic CAN)
    if dlc > CAN_MAX_DLC {
        return Err(IoError::protocol(
            DEVICE,
            format!("invalid DLC: {} (max {})", dlc, CAN_MAX_DLC),
        ));
    }

    let payload_digits = if is_rtr { 0 } else { dlc as usize * 2 };
    let data_end = header_len + payload_digits;

    if line.len() < data_end {
        return Err(IoError::protocol(
            DEVICE,
            format!("incomplete data: {} bytes, need {}", line.len(), data_end),
        ));
    }

    let mut bytes = Vec::with_capacity(payload_digits / 2);
    for pair in line[header_len..data_end].chunks_exact(2) {
        let byte = parse_hex_field(pair).ok_or_else(|| {
            IoError::protocol(
                DEVICE,
                format!("invalid hex byte: {}", String::from_utf8_lossy(pair)),
            )
        })?;
        bytes.push(byte as u8);
    }

    let trailer = &line[data_end..];
    let adapter_timestamp_ms = match trailer.len() {
        0 => None,
        SLCAN_TIMESTAMP_LEN => Some(parse_hex_field(trailer).ok_or_else(|| {
            IoError::protocol(
                DEVICE,
                format!("invalid timestamp: {}", String::from_utf8_lossy(trailer)),
            )
        })? as u16),
        n => {
            return Err(IoError::protocol(
                DEVICE,
                format!("{} unexpected characters after payload", n),
            ))
        }
    };

    Ok(FrameMessage {
        timestamp_us,
        frame_id,
        interface_id,
        dlc,
        bytes,
        is_extended,
        is_rtr,
        is_error: false,
        adapter_timestamp_ms,
    })
}
