// src/io/slcan/ring.rs
//
// Receive-side hand-off between the transport and the slcan consumer.
//
// The transport pushes byte chunks into an RxQueue from its own thread; the
// interface drains it from the caller's thread. The ring lock is held only for
// one append or one drain. When the ring is full the incoming bytes are dropped
// (unread data is never overwritten) and the push reports an RxOverrun.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::io::error::IoError;

// ============================================================================
// Ring Buffer
// ============================================================================

/// Fixed-capacity circular byte buffer.
///
/// `head` is the next write position, `tail` the next read position. A separate
/// fill count tells "full" apart from "empty" when the cursors meet.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl RingBuffer {
    /// Create a ring holding up to `capacity` bytes (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Free space in bytes
    pub fn available(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Append as much of `data` as fits. Returns the number of bytes stored;
    /// the rest is dropped.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        let accepted = data.len().min(self.available());
        for &byte in &data[..accepted] {
            self.buf[self.head] = byte;
            self.head = (self.head + 1) % self.buf.len();
        }
        self.len += accepted;
        accepted
    }

    /// Take the oldest byte
    pub fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % self.buf.len();
        self.len -= 1;
        Some(byte)
    }

    /// Move every buffered byte into `out`, oldest first.
    pub fn drain_into(&mut self, out: &mut Vec<u8>) {
        out.reserve(self.len);
        while let Some(byte) = self.pop() {
            out.push(byte);
        }
    }

    /// Discard everything and rewind the cursors
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

// ============================================================================
// Rx Queue
// ============================================================================

struct RxShared {
    device: String,
    ring: Mutex<RingBuffer>,
    ready: Condvar,
    overruns: AtomicU64,
    dropped_bytes: AtomicU64,
    /// Set by the producer when the transport can no longer deliver bytes
    failed: AtomicBool,
    error: Mutex<Option<IoError>>,
}

/// Thread-safe producer/consumer handle around a RingBuffer.
///
/// Cloning shares the same ring; the interface keeps one clone and hands
/// another to the transport.
#[derive(Clone)]
pub struct RxQueue {
    shared: Arc<RxShared>,
}

impl RxQueue {
    pub fn new(device: impl Into<String>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(RxShared {
                device: device.into(),
                ring: Mutex::new(RingBuffer::new(capacity)),
                ready: Condvar::new(),
                overruns: AtomicU64::new(0),
                dropped_bytes: AtomicU64::new(0),
                failed: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
        }
    }

    // Bytes in the ring stay valid even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, RingBuffer> {
        self.shared.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer side: append a chunk delivered by the transport.
    ///
    /// Never blocks on the consumer. Bytes that do not fit are dropped and
    /// reported as `IoError::RxOverrun`.
    pub fn push(&self, chunk: &[u8]) -> Result<(), IoError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let accepted = self.lock().push_slice(chunk);
        self.shared.ready.notify_all();

        let dropped = chunk.len() - accepted;
        if dropped > 0 {
            self.shared.overruns.fetch_add(1, Ordering::Relaxed);
            self.shared
                .dropped_bytes
                .fetch_add(dropped as u64, Ordering::Relaxed);
            return Err(IoError::rx_overrun(&self.shared.device, dropped));
        }
        Ok(())
    }

    /// Consumer side: move everything currently buffered into `out`.
    pub fn drain_into(&self, out: &mut Vec<u8>) {
        self.lock().drain_into(out);
    }

    /// Producer side: the transport stopped delivering because of `err`.
    /// Wakes any waiting consumer.
    pub fn fail(&self, err: IoError) {
        *self
            .shared
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
        self.shared.failed.store(true, Ordering::SeqCst);
        let _guard = self.lock();
        self.shared.ready.notify_all();
    }

    /// Take the error reported by the producer, if any
    pub fn take_error(&self) -> Option<IoError> {
        self.shared
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Block until bytes are available or `timeout` elapses.
    /// Returns true when the ring holds data. Returns early once the
    /// producer has failed.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ring = self.lock();
        while ring.is_empty() && !self.has_failed() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            ring = match self.shared.ready.wait_timeout(ring, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        !ring.is_empty()
    }

    /// Drop everything buffered and forget any failure (used when the
    /// interface is reopened)
    pub fn clear(&self) {
        self.lock().clear();
        self.shared.failed.store(false, Ordering::SeqCst);
        self.take_error();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Number of pushes that lost data
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Total bytes lost to overruns
    pub fn dropped_bytes(&self) -> u64 {
        self.shared.dropped_bytes.load(Ordering::Relaxed)
    }
}
