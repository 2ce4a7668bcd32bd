// src/io/slcan/reader.rs
//
// slcan source configuration and the streaming loop that feeds decoded frames
// to an async consumer.
//
// The loop runs on a blocking thread: it services transmit requests, waits for
// received frames and forwards them in batches until the stop flag is set.

use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::io::error::IoError;
use crate::io::serial::SerialPortTransport;
use crate::io::transport::Transport;
use crate::io::types::{SourceMessage, TransmitRequest};

use super::bitrate::{find_bitrate_command, supported_bitrates};
use super::codec::constants::SLCAN_MTU;
use super::interface::SlcanInterface;

/// How long one receive wait may block before transmit requests and the stop
/// flag are checked again
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bounded depth of the transmit request channel
const TRANSMIT_QUEUE_DEPTH: usize = 32;

// ============================================================================
// Types and Configuration
// ============================================================================

/// slcan interface configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlcanConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Serial baud rate. USB adapters mostly ignore it.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// CAN bus bitrate in bits/second (e.g., 500000 for 500 Kbit/s)
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Display name for the interface
    #[serde(default)]
    pub display_name: Option<String>,
    /// Data bits (5, 6, 7, 8) - defaults to 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1, 2) - defaults to 1
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity ("none", "odd", "even") - defaults to "none"
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Index stamped onto every frame received through this interface
    #[serde(default)]
    pub interface_index: u32,
    /// Receive ring capacity in bytes (at least one full line)
    #[serde(default = "default_rx_buffer_size")]
    pub rx_buffer_size: usize,
}

fn default_baud_rate() -> u32 { 1_000_000 }
fn default_bitrate() -> u32 { 500_000 }
fn default_data_bits() -> u8 { 8 }
fn default_stop_bits() -> u8 { 1 }
fn default_parity() -> String { "none".to_string() }
fn default_rx_buffer_size() -> usize { 2048 }

impl Default for SlcanConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            bitrate: default_bitrate(),
            display_name: None,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            interface_index: 0,
            rx_buffer_size: default_rx_buffer_size(),
        }
    }
}

impl SlcanConfig {
    /// Config for `port` with every other setting at its default
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Device string used in logs and errors, e.g. `slcan(/dev/ttyACM0)`
    pub fn device_name(&self) -> String {
        format!("slcan({})", self.port)
    }

    /// Reject settings that cannot work. An unknown bitrate is only logged:
    /// the interface falls back to 10 Kbit/s.
    pub fn validate(&self) -> Result<(), IoError> {
        if self.port.trim().is_empty() {
            return Err(IoError::configuration("port name is empty"));
        }
        if self.baud_rate == 0 {
            return Err(IoError::configuration(format!(
                "{}: baud rate must be non-zero",
                self.device_name()
            )));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(IoError::configuration(format!(
                "{}: invalid data bits {} (5-8)",
                self.device_name(),
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(IoError::configuration(format!(
                "{}: invalid stop bits {} (1 or 2)",
                self.device_name(),
                self.stop_bits
            )));
        }
        if !matches!(self.parity.to_lowercase().as_str(), "none" | "odd" | "even") {
            return Err(IoError::configuration(format!(
                "{}: invalid parity '{}' (none, odd, even)",
                self.device_name(),
                self.parity
            )));
        }
        if self.rx_buffer_size < SLCAN_MTU {
            return Err(IoError::configuration(format!(
                "{}: rx_buffer_size {} is smaller than one line ({} bytes)",
                self.device_name(),
                self.rx_buffer_size,
                SLCAN_MTU
            )));
        }
        if find_bitrate_command(self.bitrate).is_none() {
            tlog!(
                "[slcan] {}: bitrate {} not supported (valid: {}), 10000 will be used",
                self.device_name(),
                self.bitrate,
                supported_bitrates()
            );
        }
        Ok(())
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Open the serial port named by `config` and stream frames from it until
/// `stop_flag` is set.
pub async fn run_source(
    source_idx: usize,
    config: SlcanConfig,
    stop_flag: Arc<AtomicBool>,
    tx: mpsc::Sender<SourceMessage>,
) {
    if let Err(e) = config.validate() {
        let _ = tx.send(SourceMessage::Error(source_idx, e.into())).await;
        return;
    }

    let transport = match SerialPortTransport::open(&config) {
        Ok(t) => t,
        Err(e) => {
            tlog!("[slcan] {}", e);
            let _ = tx.send(SourceMessage::Error(source_idx, e.into())).await;
            return;
        }
    };

    let iface = Arc::new(SlcanInterface::new(config, transport));
    run_interface(source_idx, iface, stop_flag, tx).await;
}

/// Stream frames from an already constructed interface. Opens it first and
/// closes it when the loop ends.
pub async fn run_interface<T: Transport + 'static>(
    source_idx: usize,
    iface: Arc<SlcanInterface<T>>,
    stop_flag: Arc<AtomicBool>,
    tx: mpsc::Sender<SourceMessage>,
) {
    if let Err(e) = iface.open() {
        let _ = tx.send(SourceMessage::Error(source_idx, e.into())).await;
        return;
    }

    let (transmit_tx, transmit_rx) =
        std::sync::mpsc::sync_channel::<TransmitRequest>(TRANSMIT_QUEUE_DEPTH);
    let _ = tx
        .send(SourceMessage::TransmitReady(source_idx, transmit_tx))
        .await;
    let _ = tx
        .send(SourceMessage::Connected(
            source_idx,
            iface.device().to_string(),
            iface.bitrate(),
        ))
        .await;

    tlog!(
        "[slcan] Source {} connected to {} (bitrate: {})",
        source_idx,
        iface.device(),
        iface.bitrate()
    );

    let tx_clone = tx.clone();
    let blocking_handle = tokio::task::spawn_blocking(move || {
        let reason = loop {
            if stop_flag.load(Ordering::SeqCst) {
                break "stopped".to_string();
            }

            // Transmit requests (non-blocking)
            while let Ok(req) = transmit_rx.try_recv() {
                let result = iface.send(&req.frame).map_err(String::from);
                let _ = req.result_tx.send(result);
            }

            let frames = iface.receive_batch(POLL_INTERVAL);
            if !frames.is_empty()
                && tx_clone
                    .blocking_send(SourceMessage::Frames(source_idx, frames))
                    .is_err()
            {
                break "consumer closed".to_string();
            }

            if let Some(e) = iface.take_error() {
                tlog!("[slcan] {}", e);
                let _ = tx_clone.blocking_send(SourceMessage::Error(source_idx, e.into()));
                break "transport failed".to_string();
            }
        };

        if let Err(e) = iface.close() {
            let _ = tx_clone.blocking_send(SourceMessage::Error(source_idx, e.into()));
        }
        let _ = tx_clone.blocking_send(SourceMessage::Ended(source_idx, reason));
    });

    let _ = blocking_handle.await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::mock::MockTransport;
    use crate::io::FrameMessage;

    #[test]
    fn test_config_defaults() {
        let config: SlcanConfig = serde_json::from_str(r#"{"port": "/dev/ttyACM0"}"#).unwrap();
        assert_eq!(config, SlcanConfig::for_port("/dev/ttyACM0"));
        assert_eq!(config.baud_rate, 1_000_000);
        assert_eq!(config.bitrate, 500_000);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.stop_bits, 1);
        assert_eq!(config.parity, "none");
        assert_eq!(config.rx_buffer_size, 2048);
        assert_eq!(config.device_name(), "slcan(/dev/ttyACM0)");
    }

    #[test]
    fn test_validate() {
        assert!(SlcanConfig::for_port("COM3").validate().is_ok());

        // Unknown bitrates are accepted with a warning
        let config = SlcanConfig {
            bitrate: 123_456,
            ..SlcanConfig::for_port("COM3")
        };
        assert!(config.validate().is_ok());

        let bad = [
            SlcanConfig::for_port("  "),
            SlcanConfig { baud_rate: 0, ..SlcanConfig::for_port("COM3") },
            SlcanConfig { data_bits: 9, ..SlcanConfig::for_port("COM3") },
            SlcanConfig { stop_bits: 0, ..SlcanConfig::for_port("COM3") },
            SlcanConfig { parity: "mark".into(), ..SlcanConfig::for_port("COM3") },
            SlcanConfig { rx_buffer_size: 64, ..SlcanConfig::for_port("COM3") },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(IoError::Configuration { .. })),
                "{:?}",
                config
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_interface_streams_and_transmits() {
        let mock = MockTransport::new();
        let iface = Arc::new(SlcanInterface::new(SlcanConfig::for_port("mock"), mock.clone()));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(16);

        let handle = tokio::spawn(run_interface(3, iface, stop_flag.clone(), tx));

        let transmit = match rx.recv().await {
            Some(SourceMessage::TransmitReady(3, sender)) => sender,
            other => panic!("expected TransmitReady, got {:?}", other),
        };
        match rx.recv().await {
            Some(SourceMessage::Connected(3, device, 500_000)) => {
                assert_eq!(device, "slcan(mock)")
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        assert_eq!(mock.written_str(), "S6\rO\r");

        mock.inject(b"t1230\rt4561AA\r").unwrap();
        let mut frames = Vec::new();
        while frames.len() < 2 {
            match rx.recv().await {
                Some(SourceMessage::Frames(3, batch)) => frames.extend(batch),
                other => panic!("expected Frames, got {:?}", other),
            }
        }
        assert_eq!(frames[0].frame_id, 0x123);
        assert_eq!(frames[1].bytes, vec![0xAA]);

        let result = tokio::task::spawn_blocking(move || {
            let (req, result_rx) = TransmitRequest::new(FrameMessage::data(0x7FF, false, &[1, 2]));
            transmit.send(req).unwrap();
            result_rx.recv().unwrap()
        })
        .await
        .unwrap();
        assert_eq!(result.unwrap().bytes_written, 10);
        assert!(mock.written_str().ends_with("t7FF20102\r"));

        stop_flag.store(true, Ordering::SeqCst);
        match rx.recv().await {
            Some(SourceMessage::Ended(3, reason)) => assert_eq!(reason, "stopped"),
            other => panic!("expected Ended, got {:?}", other),
        }
        handle.await.unwrap();
        assert!(mock.written_str().ends_with("C\r"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_interface_reports_transport_failure() {
        let mock = MockTransport::new();
        let iface = Arc::new(SlcanInterface::new(SlcanConfig::for_port("mock"), mock.clone()));
        let (tx, mut rx) = mpsc::channel(16);

        let handle = tokio::spawn(run_interface(0, iface, Arc::new(AtomicBool::new(false)), tx));
        assert!(matches!(rx.recv().await, Some(SourceMessage::TransmitReady(0, _))));
        assert!(matches!(rx.recv().await, Some(SourceMessage::Connected(0, _, _))));

        mock.fail_rx("device unplugged");
        match rx.recv().await {
            Some(SourceMessage::Error(0, message)) => assert!(message.contains("device unplugged")),
            other => panic!("expected Error, got {:?}", other),
        }
        match rx.recv().await {
            Some(SourceMessage::Ended(0, reason)) => assert_eq!(reason, "transport failed"),
            other => panic!("expected Ended, got {:?}", other),
        }
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_interface_open_failure() {
        let mock = MockTransport::new();
        mock.set_fail_writes(true);
        let iface = Arc::new(SlcanInterface::new(SlcanConfig::for_port("mock"), mock));
        let (tx, mut rx) = mpsc::channel(4);

        run_interface(1, iface, Arc::new(AtomicBool::new(false)), tx).await;
        match rx.recv().await {
            Some(SourceMessage::Error(1, message)) => assert!(message.contains("set bitrate")),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_source_rejects_invalid_config() {
        let (tx, mut rx) = mpsc::channel(4);
        run_source(0, SlcanConfig::default(), Arc::new(AtomicBool::new(false)), tx).await;
        match rx.recv().await {
            Some(SourceMessage::Error(0, message)) => assert!(message.contains("port name is empty")),
            other => panic!("expected Error, got {:?}", other),
        }
    }
}
