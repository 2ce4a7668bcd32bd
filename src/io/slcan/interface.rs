// src/io/slcan/interface.rs
//
// One slcan adapter: issues the configuration commands, encodes outgoing
// frames, and turns the received byte stream into frames.
//
// Locks:
//   transport - serialises open/close/send so commands never interleave
//   rx ring   - inside RxQueue, shared with the transport's reader
//   consumer  - line accumulator + decoded FIFO; taken before the ring lock,
//               never by the producer
// The transport lock and the ring lock are never held together.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::io::error::IoError;
use crate::io::transport::Transport;
use crate::io::{now_us, FrameMessage, IOCapabilities, IOState, TransmitResult};

use super::accumulator::{LineAccumulator, LineEvent};
use super::bitrate::{available_timings, bitrate_command, supported_bitrates, CanTiming};
use super::codec::{encode_frame, is_truncated};
use super::reader::SlcanConfig;
use super::ring::RxQueue;

/// Open the CAN channel
const CMD_OPEN: &[u8] = b"O\r";
/// Close the CAN channel
const CMD_CLOSE: &[u8] = b"C\r";

// ============================================================================
// Statistics
// ============================================================================

#[derive(Default)]
struct StatsCounters {
    rx_count: AtomicU64,
    rx_errors: AtomicU64,
    tx_count: AtomicU64,
    tx_errors: AtomicU64,
    tx_dropped: AtomicU64,
    nacks: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of an interface's counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceStats {
    /// Frames decoded
    pub rx_count: u64,
    /// Lines that were not valid frames, or overflowed the line buffer
    pub rx_errors: u64,
    /// Frames written to the adapter
    pub tx_count: u64,
    /// Frame writes that failed on the transport
    pub tx_errors: u64,
    /// Chunks that did not fit the receive ring
    pub rx_overruns: u64,
    /// Frames refused because the interface was not open
    pub tx_dropped: u64,
    /// Error replies (BEL) from the adapter
    pub nacks: u64,
}

// ============================================================================
// Interface
// ============================================================================

struct RxConsumer {
    accumulator: LineAccumulator,
    decoded: VecDeque<FrameMessage>,
    scratch: Vec<u8>,
}

/// An slcan adapter on top of a byte transport
pub struct SlcanInterface<T: Transport> {
    device: String,
    config: SlcanConfig,
    transport: Mutex<T>,
    state: Mutex<IOState>,
    rx: RxQueue,
    consumer: Mutex<RxConsumer>,
    stats: StatsCounters,
}

fn relock<G>(result: Result<G, PoisonError<G>>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> SlcanInterface<T> {
    pub fn new(config: SlcanConfig, transport: T) -> Self {
        let device = transport.device();
        let rx = RxQueue::new(device.clone(), config.rx_buffer_size);
        let accumulator = LineAccumulator::new(device.clone(), config.interface_index);
        Self {
            device,
            config,
            transport: Mutex::new(transport),
            state: Mutex::new(IOState::Stopped),
            rx,
            consumer: Mutex::new(RxConsumer {
                accumulator,
                decoded: VecDeque::new(),
                scratch: Vec::new(),
            }),
            stats: StatsCounters::default(),
        }
    }

    fn lock_transport(&self) -> MutexGuard<'_, T> {
        relock(self.transport.lock())
    }

    fn lock_consumer(&self) -> MutexGuard<'_, RxConsumer> {
        relock(self.consumer.lock())
    }

    fn set_state(&self, state: IOState) {
        *relock(self.state.lock()) = state;
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Display name, falling back to the device string
    pub fn name(&self) -> &str {
        self.config.display_name.as_deref().unwrap_or(&self.device)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Interface index stamped onto received frames
    pub fn index(&self) -> u32 {
        self.config.interface_index
    }

    pub fn bitrate(&self) -> u32 {
        self.config.bitrate
    }

    pub fn config(&self) -> &SlcanConfig {
        &self.config
    }

    pub fn state(&self) -> IOState {
        relock(self.state.lock()).clone()
    }

    pub fn is_open(&self) -> bool {
        self.state() == IOState::Running
    }

    pub fn capabilities(&self) -> IOCapabilities {
        IOCapabilities::realtime_can()
            .with_transmit(true)
            .with_canfd(false)
    }

    pub fn available_timings(&self) -> Vec<CanTiming> {
        available_timings()
    }

    pub fn stats(&self) -> InterfaceStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        InterfaceStats {
            rx_count: load(&self.stats.rx_count),
            rx_errors: load(&self.stats.rx_errors),
            tx_count: load(&self.stats.tx_count),
            tx_errors: load(&self.stats.tx_errors),
            rx_overruns: self.rx.overruns(),
            tx_dropped: load(&self.stats.tx_dropped),
            nacks: load(&self.stats.nacks),
        }
    }

    /// Error reported by the transport's receive side, if it has stopped.
    /// Taking it clears it.
    pub fn take_error(&self) -> Option<IoError> {
        self.rx.take_error()
    }

    // ------------------------------------------------------------------------
    // Open / Close
    // ------------------------------------------------------------------------

    /// Start receiving, select the bitrate (`Sx\r`) and open the channel (`O\r`).
    pub fn open(&self) -> Result<(), IoError> {
        let already_open = || {
            IoError::configuration(format!("{} is already open", self.device))
        };
        if self.is_open() {
            return Err(already_open());
        }

        // Drop anything left from a previous session. Must happen outside the
        // transport lock.
        self.rx.clear();
        {
            let mut consumer = self.lock_consumer();
            consumer.accumulator.reset();
            consumer.decoded.clear();
        }

        let mut transport = self.lock_transport();
        if self.is_open() {
            return Err(already_open());
        }

        transport
            .start_rx(self.rx.clone())
            .map_err(|e| IoError::connection(&self.device, e.to_string()))?;

        let (bitrate_cmd, matched) = bitrate_command(self.config.bitrate);
        if !matched {
            tlog!(
                "[slcan] {}: bitrate {} not supported (valid: {}), using 10000",
                self.device,
                self.config.bitrate,
                supported_bitrates()
            );
        }

        let result = Self::write_command(&mut *transport, &self.device, &bitrate_cmd, "set bitrate")
            .and_then(|_| Self::write_command(&mut *transport, &self.device, CMD_OPEN, "open channel"));

        match result {
            Ok(()) => {
                self.set_state(IOState::Running);
                tlog!(
                    "[slcan] {} opened (bitrate: {}, interface: {})",
                    self.device,
                    self.config.bitrate,
                    self.config.interface_index
                );
                Ok(())
            }
            Err(e) => {
                transport.stop_rx();
                self.set_state(IOState::Error(e.to_string()));
                tlog!("[slcan] {}", e);
                Err(e)
            }
        }
    }

    /// Close the channel (`C\r`) and stop receiving. No-op when not open.
    pub fn close(&self) -> Result<(), IoError> {
        let mut transport = self.lock_transport();

        if !self.is_open() {
            transport.stop_rx();
            return Ok(());
        }

        let result = Self::write_command(&mut *transport, &self.device, CMD_CLOSE, "close channel");
        transport.stop_rx();
        self.set_state(IOState::Stopped);

        match &result {
            Ok(()) => tlog!("[slcan] {} closed", self.device),
            Err(e) => tlog!("[slcan] {}", e),
        }
        result
    }

    fn write_command(
        transport: &mut T,
        device: &str,
        command: &[u8],
        what: &str,
    ) -> Result<(), IoError> {
        transport
            .write_all(command)
            .and_then(|_| transport.flush())
            .map_err(|e| IoError::write(device, format!("{}: {}", what, e)))
    }

    // ------------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------------

    /// Encode and write one frame. Payloads over 8 bytes are truncated.
    pub fn send(&self, frame: &FrameMessage) -> Result<TransmitResult, IoError> {
        let line = encode_frame(frame);
        let truncated = is_truncated(frame);
        if truncated {
            tlog!(
                "[slcan] {}: frame 0x{:X} truncated to 8 bytes",
                self.device,
                frame.frame_id
            );
        }

        let mut transport = self.lock_transport();

        if !self.is_open() {
            StatsCounters::bump(&self.stats.tx_dropped);
            return Err(IoError::connection(&self.device, "interface is not open"));
        }

        match Self::write_command(&mut *transport, &self.device, &line, "transmit") {
            Ok(()) => {
                StatsCounters::bump(&self.stats.tx_count);
                Ok(TransmitResult {
                    timestamp_us: now_us(),
                    bytes_written: line.len(),
                    truncated,
                })
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.tx_errors);
                tlog!("[slcan] {}", e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------------

    /// Drain the ring into the accumulator, queueing decoded frames.
    /// Returns the number of frames decoded by this call.
    fn drain(&self, consumer: &mut RxConsumer) -> usize {
        let RxConsumer {
            accumulator,
            decoded,
            scratch,
        } = consumer;

        scratch.clear();
        self.rx.drain_into(scratch);

        let mut count = 0;
        for &byte in scratch.iter() {
            match accumulator.push(byte) {
                None | Some(LineEvent::Ack) => {}
                Some(LineEvent::Frame(frame)) => {
                    StatsCounters::bump(&self.stats.rx_count);
                    decoded.push_back(frame);
                    count += 1;
                }
                Some(LineEvent::Nack) => {
                    StatsCounters::bump(&self.stats.nacks);
                    tlog!("[slcan] {}: adapter reported an error", self.device);
                }
                Some(LineEvent::Invalid(_)) => {
                    StatsCounters::bump(&self.stats.rx_errors);
                }
                Some(LineEvent::Overflow(e)) => {
                    StatsCounters::bump(&self.stats.rx_errors);
                    tlog!("[slcan] {}", e);
                }
            }
        }
        count
    }

    /// Non-blocking: process whatever has arrived and return the oldest
    /// decoded frame, if any.
    pub fn read_message(&self) -> Option<FrameMessage> {
        let mut consumer = self.lock_consumer();
        self.drain(&mut consumer);
        consumer.decoded.pop_front()
    }

    /// Non-blocking: process whatever has arrived and return every decoded frame.
    pub fn read_frames(&self) -> Vec<FrameMessage> {
        let mut consumer = self.lock_consumer();
        self.drain(&mut consumer);
        consumer.decoded.drain(..).collect()
    }

    /// Wait up to `timeout` for a frame.
    pub fn receive(&self, timeout: Duration) -> Option<FrameMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.read_message() {
                return Some(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.rx.wait_for_data(remaining) {
                return None;
            }
        }
    }

    /// Wait up to `timeout` for at least one frame, then return all decoded frames.
    pub fn receive_batch(&self, timeout: Duration) -> Vec<FrameMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let frames = self.read_frames();
            if !frames.is_empty() {
                return frames;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.rx.wait_for_data(remaining) {
                return frames;
            }
        }
    }
}

impl<T: Transport> Drop for SlcanInterface<T> {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::mock::MockTransport;
    use std::sync::Arc;
    use std::thread;

    fn config(bitrate: u32) -> SlcanConfig {
        SlcanConfig {
            port: "mock".to_string(),
            bitrate,
            interface_index: 7,
            ..SlcanConfig::default()
        }
    }

    fn open_interface(bitrate: u32) -> (SlcanInterface<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let iface = SlcanInterface::new(config(bitrate), mock.clone());
        iface.open().unwrap();
        (iface, mock)
    }

    #[test]
    fn test_open_sends_bitrate_then_open() {
        let (iface, mock) = open_interface(500_000);
        assert_eq!(mock.written_str(), "S6\rO\r");
        assert!(iface.is_open());
        assert_eq!(mock.rx_started(), 1);
    }

    #[test]
    fn test_open_unknown_bitrate_defaults_to_10k() {
        let (_iface, mock) = open_interface(123_456);
        assert_eq!(mock.written_str(), "S0\rO\r");
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let (iface, mock) = open_interface(250_000);
        assert!(matches!(iface.open(), Err(IoError::Configuration { .. })));
        assert_eq!(mock.written_str(), "S5\rO\r");
    }

    #[test]
    fn test_open_write_failure_is_reported() {
        let mock = MockTransport::new();
        mock.set_fail_writes(true);
        let iface = SlcanInterface::new(config(500_000), mock.clone());

        let err = iface.open().unwrap_err();
        assert!(err.is_transport());
        assert!(!iface.is_open());
        assert!(matches!(iface.state(), IOState::Error(_)));
        assert_eq!(mock.rx_stopped(), 1);
    }

    #[test]
    fn test_close_sends_close_and_stops_rx() {
        let (iface, mock) = open_interface(500_000);
        mock.clear_written();
        iface.close().unwrap();
        assert_eq!(mock.written_str(), "C\r");
        assert_eq!(mock.rx_stopped(), 1);
        assert_eq!(iface.state(), IOState::Stopped);

        // Closing again writes nothing
        mock.clear_written();
        iface.close().unwrap();
        assert_eq!(mock.written_str(), "");
    }

    #[test]
    fn test_drop_closes_open_interface() {
        let (iface, mock) = open_interface(500_000);
        mock.clear_written();
        drop(iface);
        assert_eq!(mock.written_str(), "C\r");
    }

    #[test]
    fn test_send_writes_encoded_frame() {
        let (iface, mock) = open_interface(500_000);
        mock.clear_written();

        let result = iface
            .send(&FrameMessage::data(0x123, false, &[0xDE, 0xAD]))
            .unwrap();
        assert_eq!(mock.written_str(), "t1232DEAD\r");
        assert_eq!(result.bytes_written, 10);
        assert!(!result.truncated);
        assert_eq!(iface.stats().tx_count, 1);
    }

    #[test]
    fn test_send_truncates_long_payload() {
        let (iface, mock) = open_interface(500_000);
        mock.clear_written();

        let result = iface
            .send(&FrameMessage::data(0x1ABCDE, true, &[0x11; 10]))
            .unwrap();
        assert!(result.truncated);
        assert_eq!(mock.written_str(), "T001ABCDE81111111111111111\r");
    }

    #[test]
    fn test_send_when_closed_is_dropped() {
        let mock = MockTransport::new();
        let iface = SlcanInterface::new(config(500_000), mock.clone());
        assert!(iface.send(&FrameMessage::data(0x1, false, &[])).is_err());
        assert_eq!(mock.written_str(), "");
        assert_eq!(iface.stats().tx_dropped, 1);
    }

    #[test]
    fn test_send_failure_counts_tx_error() {
        let (iface, mock) = open_interface(500_000);
        mock.set_fail_writes(true);
        let err = iface.send(&FrameMessage::data(0x1, false, &[])).unwrap_err();
        assert!(matches!(err, IoError::Write { .. }));
        assert_eq!(iface.stats().tx_errors, 1);
        assert_eq!(iface.stats().tx_count, 0);
    }

    #[test]
    fn test_read_message_returns_frames_in_order() {
        let (iface, mock) = open_interface(500_000);
        assert!(iface.read_message().is_none());

        mock.inject(b"t1001AA\rt2000\rT00000300").unwrap();
        let first = iface.read_message().unwrap();
        assert_eq!(first.frame_id, 0x100);
        assert_eq!(first.interface_id, 7);
        assert_eq!(iface.read_message().unwrap().frame_id, 0x200);
        // Third line still incomplete
        assert!(iface.read_message().is_none());

        mock.inject(b"0\r").unwrap();
        let third = iface.read_message().unwrap();
        assert_eq!(third.frame_id, 0x300);
        assert!(third.is_extended);
    }

    #[test]
    fn test_read_frames_returns_whole_burst() {
        let (iface, mock) = open_interface(500_000);
        mock.inject(b"t1230\rr4562\rT1FFFFFFF1FF\r").unwrap();
        let frames = iface.read_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(iface.stats().rx_count, 3);
        assert!(iface.read_frames().is_empty());
    }

    #[test]
    fn test_receive_path_counts_errors_and_nacks() {
        let (iface, mock) = open_interface(500_000);
        mock.inject(b"\rz\r\x07x123\rt1238\rt1230\r").unwrap();
        let frames = iface.read_frames();
        assert_eq!(frames.len(), 1);

        let stats = iface.stats();
        assert_eq!(stats.rx_count, 1);
        assert_eq!(stats.rx_errors, 2);
        assert_eq!(stats.nacks, 1);
    }

    #[test]
    fn test_rx_overrun_is_counted_and_recovers() {
        let mock = MockTransport::new();
        let cfg = SlcanConfig {
            rx_buffer_size: 16,
            ..config(500_000)
        };
        let iface = SlcanInterface::new(cfg, mock.clone());
        iface.open().unwrap();

        // 20 bytes into a 16 byte ring: the tail of the second line is lost
        assert!(mock.inject(b"t1001AA\rt2002BBCCDD\r").is_err());
        let frames = iface.read_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_id, 0x100);
        assert_eq!(iface.stats().rx_overruns, 1);

        // Once drained, the next complete line decodes again: the truncated
        // "t2002BBC" prefix fails and the fresh line succeeds
        mock.inject(b"\rt3000\r").unwrap();
        let frames = iface.read_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_id, 0x300);
    }

    #[test]
    fn test_reopen_discards_stale_bytes() {
        let (iface, mock) = open_interface(500_000);
        mock.inject(b"t1230\rt45").unwrap();
        iface.close().unwrap();
        iface.open().unwrap();
        mock.inject(b"60\r").unwrap();
        // "60" alone is not a frame, and the complete frame from before is gone
        assert!(iface.read_frames().is_empty());
    }

    #[test]
    fn test_transport_failure_is_surfaced() {
        let (iface, mock) = open_interface(500_000);
        mock.fail_rx("device unplugged");
        assert!(iface.receive(Duration::from_secs(5)).is_none());
        assert!(matches!(iface.take_error(), Some(IoError::Read { .. })));
    }

    #[test]
    fn test_receive_times_out() {
        let (iface, _mock) = open_interface(500_000);
        let start = Instant::now();
        assert!(iface.receive(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_receive_waits_for_producer_thread() {
        let (iface, mock) = open_interface(500_000);
        let iface = Arc::new(iface);

        let chunks: [&[u8]; 5] = [b"t7", b"FF2", b"DE", b"AD", b"\r"];
        let producer = thread::spawn(move || {
            for chunk in chunks {
                thread::sleep(Duration::from_millis(5));
                mock.inject(chunk).unwrap();
            }
        });

        let frame = iface.receive(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        assert_eq!(frame.frame_id, 0x7FF);
        assert_eq!(frame.bytes, vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_send_and_receive_concurrently() {
        let (iface, mock) = open_interface(500_000);
        let iface = Arc::new(iface);

        let sender = {
            let iface = iface.clone();
            thread::spawn(move || {
                for i in 0..50u32 {
                    iface.send(&FrameMessage::data(i, false, &[i as u8])).unwrap();
                }
            })
        };
        let producer = {
            let mock = mock.clone();
            thread::spawn(move || {
                for i in 0..50u32 {
                    let line = encode_frame(&FrameMessage::data(0x400 + i, false, &[]));
                    mock.inject(&line).unwrap();
                }
            })
        };

        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while received.len() < 50 && Instant::now() < deadline {
            received.extend(iface.receive_batch(Duration::from_millis(20)));
        }
        sender.join().unwrap();
        producer.join().unwrap();

        let ids: Vec<u32> = received.iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, (0x400..0x400 + 50).collect::<Vec<_>>());

        // Every transmitted line is intact on the wire
        let written = mock.written_str();
        let lines: Vec<&str> = written.split('\r').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 2 + 50); // S6, O, then frames
        assert_eq!(iface.stats().tx_count, 50);
    }

    #[test]
    fn test_capabilities_and_timings() {
        let (iface, _mock) = open_interface(500_000);
        let caps = iface.capabilities();
        assert!(caps.can_transmit);
        assert!(!caps.supports_canfd);
        assert_eq!(iface.available_timings().len(), 10);
        assert_eq!(iface.index(), 7);
        assert_eq!(iface.bitrate(), 500_000);
        assert_eq!(iface.name(), "slcan(mock)");
    }
}
