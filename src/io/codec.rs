// src/io/codec.rs
//
// Frame codec trait and re-export of the slcan implementation.
//
// The FrameCodec trait is designed for single-frame operations. Streaming
// receive (reassembling lines from arbitrary serial chunks) lives in the slcan
// accumulator alongside the trait implementation.

use crate::io::error::IoError;
use crate::io::FrameMessage;

// ============================================================================
// Frame Codec Trait
// ============================================================================

/// Trait for CAN frame codecs.
///
/// The associated types define the protocol-specific raw frame formats.
pub trait FrameCodec {
    /// The raw frame type for decoding (e.g., byte slice, ASCII string)
    type RawFrame: ?Sized;

    /// The encoded frame type for transmission
    type EncodedFrame;

    /// Decode a raw frame into a FrameMessage.
    ///
    /// Returns `Err(IoError)` if the frame is malformed or cannot be parsed.
    fn decode(raw: &Self::RawFrame) -> Result<FrameMessage, IoError>;

    /// Encode a frame for transmission.
    fn encode(frame: &FrameMessage) -> Result<Self::EncodedFrame, IoError>;
}

// ============================================================================
// Re-exports from driver modules
// ============================================================================

pub use super::slcan::codec::SlcanCodec;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame() -> FrameMessage {
        FrameMessage::data(0x123, false, &[0x11, 0x22, 0x33, 0x44])
    }

    /// Generic helper: anything implementing the trait with byte-slice input
    /// and Vec output should accept its own encoding.
    fn roundtrip<C>(frame: &FrameMessage) -> FrameMessage
    where
        C: FrameCodec<RawFrame = [u8], EncodedFrame = Vec<u8>>,
    {
        let encoded = C::encode(frame).expect("encode failed");
        C::decode(&encoded).expect("decode failed")
    }

    #[test]
    fn test_slcan_through_trait() {
        let frame = make_test_frame();
        let encoded = SlcanCodec::encode(&frame).expect("encode failed");
        assert!(encoded.starts_with(b"t"));
        assert!(encoded.ends_with(b"\r"));

        let decoded = roundtrip::<SlcanCodec>(&frame);
        assert_eq!(decoded.frame_id, 0x123);
        assert_eq!(decoded.bytes, frame.bytes);
    }
}
