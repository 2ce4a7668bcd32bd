// src/io/mod.rs
//
// IO layer for SLCAN adapters: the shared frame type, capability and state
// descriptions, the transport abstraction and the slcan driver itself.

// Core modules
pub mod codec; // Frame codec trait and implementations
mod error;
pub mod transport;
mod types;

// Drivers
pub mod serial; // serialport-backed transport
pub mod slcan;

pub use codec::FrameCodec;
pub use codec::SlcanCodec;
pub use error::IoError;
pub use serial::{list_ports, Parity, SerialPortInfo, SerialPortTransport};
pub use slcan::{InterfaceStats, SlcanConfig, SlcanInterface};
pub use transport::Transport;
pub use types::{SourceMessage, TransmitRequest, TransmitSender};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Shared Types
// ============================================================================

/// CAN frame as handed to `send` and produced by the decoder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Host UNIX timestamp in microseconds.
    pub timestamp_us: u64,
    /// 11-bit standard or 29-bit extended identifier
    pub frame_id: u32,
    /// Index of the interface the frame was received on (or is sent through)
    pub interface_id: u32,
    pub dlc: u8,
    /// Payload (empty for remote frames)
    pub bytes: Vec<u8>,
    pub is_extended: bool,
    /// Remote Transmission Request
    pub is_rtr: bool,
    /// Error frame flag, never set by the slcan decoder
    pub is_error: bool,
    /// Adapter timestamp in milliseconds (only when the adapter runs with timestamps enabled)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub adapter_timestamp_ms: Option<u16>,
}

impl FrameMessage {
    /// Build a data frame. DLC follows the payload length.
    pub fn data(frame_id: u32, is_extended: bool, bytes: &[u8]) -> Self {
        Self {
            timestamp_us: now_us(),
            frame_id,
            interface_id: 0,
            dlc: bytes.len().min(u8::MAX as usize) as u8,
            bytes: bytes.to_vec(),
            is_extended,
            is_rtr: false,
            is_error: false,
            adapter_timestamp_ms: None,
        }
    }

    /// Build a remote (RTR) frame requesting `dlc` bytes.
    pub fn remote(frame_id: u32, is_extended: bool, dlc: u8) -> Self {
        Self {
            timestamp_us: now_us(),
            frame_id,
            interface_id: 0,
            dlc,
            bytes: Vec::new(),
            is_extended,
            is_rtr: true,
            is_error: false,
            adapter_timestamp_ms: None,
        }
    }
}

/// candump-style rendering: `123#DEADBEEF`, `1ABCDE00#R2`
impl fmt::Display for FrameMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "{:08X}#", self.frame_id)?;
        } else {
            write!(f, "{:03X}#", self.frame_id)?;
        }
        if self.is_rtr {
            write!(f, "R{}", self.dlc)
        } else {
            write!(f, "{}", hex::encode_upper(&self.bytes))
        }
    }
}

/// Parses candump notation: `<id>#<hex data>` or `<id>#R[<dlc>]`.
/// Identifiers longer than three digits are extended. Data may be split with `.`.
impl FromStr for FrameMessage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, rest) = s
            .trim()
            .split_once('#')
            .ok_or_else(|| format!("'{}': expected <id>#<data>", s))?;

        if id.is_empty() || id.len() > 8 {
            return Err(format!("'{}': identifier must be 1-8 hex digits", s));
        }
        let frame_id = u32::from_str_radix(id, 16)
            .map_err(|_| format!("'{}': invalid identifier '{}'", s, id))?;
        let is_extended = id.len() > 3;
        let max_id = if is_extended { 0x1FFF_FFFF } else { 0x7FF };
        if frame_id > max_id {
            return Err(format!("'{}': identifier 0x{:X} out of range", s, frame_id));
        }

        if let Some(dlc) = rest.strip_prefix('R').or_else(|| rest.strip_prefix('r')) {
            let dlc = if dlc.is_empty() {
                0
            } else {
                dlc.parse::<u8>()
                    .ok()
                    .filter(|d| *d <= 8)
                    .ok_or_else(|| format!("'{}': invalid remote DLC '{}'", s, dlc))?
            };
            return Ok(FrameMessage::remote(frame_id, is_extended, dlc));
        }

        let digits: String = rest.chars().filter(|c| *c != '.').collect();
        let bytes = hex::decode(&digits).map_err(|e| format!("'{}': invalid data: {}", s, e))?;
        Ok(FrameMessage::data(frame_id, is_extended, &bytes))
    }
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Result of a transmit operation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransmitResult {
    /// Timestamp when the frame was written (microseconds since UNIX epoch)
    pub timestamp_us: u64,
    /// Number of bytes put on the wire, including the terminator
    pub bytes_written: usize,
    /// Whether the payload had to be cut down to 8 bytes
    pub truncated: bool,
}

// ============================================================================
// Capabilities and State
// ============================================================================

/// IO device capabilities - what this device type supports
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IOCapabilities {
    /// Is realtime data
    pub is_realtime: bool,
    /// Can transmit CAN frames
    #[serde(default)]
    pub can_transmit: bool,
    /// Supports CAN FD (64 bytes, BRS)
    #[serde(default)]
    pub supports_canfd: bool,
    /// Supports extended (29-bit) CAN IDs
    #[serde(default)]
    pub supports_extended_id: bool,
    /// Supports Remote Transmission Request frames
    #[serde(default)]
    pub supports_rtr: bool,
    /// Bit timing (segments, sample point) can be configured, not just the bitrate
    #[serde(default)]
    pub supports_timing_config: bool,
    /// Available bus numbers (empty = single bus)
    #[serde(default)]
    pub available_buses: Vec<u8>,
}

impl IOCapabilities {
    /// Create capabilities for a realtime CAN source.
    ///
    /// Defaults:
    /// - Supports extended IDs and RTR
    /// - Single bus
    /// - No transmit (override with `with_transmit`)
    pub fn realtime_can() -> Self {
        Self {
            is_realtime: true,
            can_transmit: false,
            supports_canfd: false,
            supports_extended_id: true,
            supports_rtr: true,
            supports_timing_config: false,
            available_buses: vec![0],
        }
    }

    /// Set CAN transmit capability
    pub fn with_transmit(mut self, can_transmit: bool) -> Self {
        self.can_transmit = can_transmit;
        self
    }

    /// Set CAN FD support
    pub fn with_canfd(mut self, supports_canfd: bool) -> Self {
        self.supports_canfd = supports_canfd;
        self
    }
}

/// Current state of an interface
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum IOState {
    Stopped,
    Running,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_candump_style() {
        let frame = FrameMessage::data(0x123, false, &[0xDE, 0xAD]);
        assert_eq!(frame.to_string(), "123#DEAD");

        let frame = FrameMessage::remote(0x1ABCDE, true, 2);
        assert_eq!(frame.to_string(), "001ABCDE#R2");
    }

    #[test]
    fn test_parse_candump_notation() {
        let frame: FrameMessage = "123#DEAD".parse().unwrap();
        assert_eq!(frame.frame_id, 0x123);
        assert!(!frame.is_extended);
        assert_eq!(frame.bytes, vec![0xDE, 0xAD]);
        assert_eq!(frame.dlc, 2);

        let frame: FrameMessage = "001ABCDE#11.22.33".parse().unwrap();
        assert!(frame.is_extended);
        assert_eq!(frame.bytes, vec![0x11, 0x22, 0x33]);

        let frame: FrameMessage = "7FF#R3".parse().unwrap();
        assert!(frame.is_rtr);
        assert_eq!(frame.dlc, 3);

        let frame: FrameMessage = "7FF#".parse().unwrap();
        assert!(frame.bytes.is_empty());

        assert!("123".parse::<FrameMessage>().is_err());
        assert!("800#00".parse::<FrameMessage>().is_err());
        assert!("123#ABC".parse::<FrameMessage>().is_err());
        assert!("123#R9".parse::<FrameMessage>().is_err());
        assert!("123456789#00".parse::<FrameMessage>().is_err());
    }

    #[test]
    fn test_realtime_can_capabilities() {
        let caps = IOCapabilities::realtime_can().with_transmit(true);
        assert!(caps.is_realtime);
        assert!(caps.can_transmit);
        assert!(!caps.supports_canfd);
        assert!(caps.supports_extended_id);
        assert!(caps.supports_rtr);
        assert_eq!(caps.available_buses, vec![0]);
    }

    #[test]
    fn test_frame_serde_skips_missing_adapter_timestamp() {
        let frame = FrameMessage::data(0x100, false, &[1]);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("adapter_timestamp_ms"));
        let back: FrameMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
