// src/io/types.rs
//
// Messages exchanged between a streaming slcan source and whoever consumes it.

use std::sync::mpsc as std_mpsc;

use super::{FrameMessage, TransmitResult};

// ============================================================================
// Source Messages
// ============================================================================

/// Message from a running source to its consumer
#[derive(Debug)]
pub enum SourceMessage {
    /// Frames from a source (source_index, frames)
    Frames(usize, Vec<FrameMessage>),
    /// Source ended (source_index, reason)
    Ended(usize, String),
    /// Source error (source_index, error)
    Error(usize, String),
    /// Transmit channel is ready (source_index, transmit_sender)
    TransmitReady(usize, TransmitSender),
    /// Source connected successfully (source_index, device, bitrate)
    Connected(usize, String, u32),
}

// ============================================================================
// Transmit Types
// ============================================================================

/// Transmit request sent through the channel
#[derive(Debug)]
pub struct TransmitRequest {
    /// Frame to encode and send
    pub frame: FrameMessage,
    /// Sync oneshot channel to send the result back
    pub result_tx: std_mpsc::SyncSender<Result<TransmitResult, String>>,
}

impl TransmitRequest {
    /// Build a request plus the receiver its result will arrive on
    pub fn new(
        frame: FrameMessage,
    ) -> (Self, std_mpsc::Receiver<Result<TransmitResult, String>>) {
        let (result_tx, result_rx) = std_mpsc::sync_channel(1);
        (Self { frame, result_tx }, result_rx)
    }
}

/// Sender type for transmit requests (sync-safe)
pub type TransmitSender = std_mpsc::SyncSender<TransmitRequest>;
