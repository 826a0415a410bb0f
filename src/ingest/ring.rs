//! Bounded byte ring between one producer and one consumer.
//!
//! # Design
//!
//! - Head and tail are absolute byte counters (`u64`), so `tail <= head` holds
//!   without modular comparisons and `head - tail` is the unread length
//! - The ring is split into an [`IngestProducer`] and an [`IngestConsumer`];
//!   neither is `Clone`, which enforces the single-producer/single-consumer
//!   discipline at compile time
//! - The two sides meet only at the handoff: the mutex is held for the copy,
//!   and a side that must wait parks on a condition variable until the other
//!   side signals progress
//! - Dropping either handle closes the ring; the consumer still drains every
//!   byte written before the close

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::{Error, Result};
use crate::ingest::config::{IngestConfig, OverflowPolicy};

/// Counters describing ring traffic since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Bytes accepted by `append`.
    pub appended: u64,
    /// Bytes handed to the consumer and released.
    pub consumed: u64,
    /// Bytes lost to overwrite or discarded after a blocking timeout.
    pub dropped: u64,
    /// Number of overflow events.
    pub overflows: u64,
    /// Number of times the buffer grew.
    pub grown: u64,
    /// Current capacity in bytes.
    pub capacity: usize,
}

struct Ring {
    buf: Vec<u8>,
    head: u64,
    tail: u64,
    producer_closed: bool,
    consumer_closed: bool,
    stalls: u32,
    stats: IngestStats,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn len(&self) -> usize {
        (self.head - self.tail) as usize
    }

    fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Caller guarantees `data.len() <= self.free()`.
    fn write(&mut self, data: &[u8]) {
        let cap = self.capacity();
        let start = (self.head % cap as u64) as usize;
        let first = data.len().min(cap - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&data[first..]);
        }
        self.head += data.len() as u64;
    }

    fn copy_out(&self, from: u64, len: usize, out: &mut Vec<u8>) {
        if len == 0 {
            return;
        }
        let cap = self.capacity();
        let start = (from % cap as u64) as usize;
        let first = len.min(cap - start);
        out.extend_from_slice(&self.buf[start..start + first]);
        let rest = len - first;
        if rest > 0 {
            out.extend_from_slice(&self.buf[..rest]);
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut unread = Vec::with_capacity(self.len());
        self.copy_out(self.tail, self.len(), &mut unread);
        self.buf = vec![0u8; new_capacity];
        self.head = self.tail;
        self.write(&unread);
        self.stats.grown += 1;
        self.stats.capacity = new_capacity;
        self.stalls = 0;
    }

    fn closed(&self) -> bool {
        self.producer_closed || self.consumer_closed
    }
}

struct Shared {
    ring: Mutex<Ring>,
    readable: Condvar,
    writable: Condvar,
    config: IngestConfig,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Ring>> {
        self.ring
            .lock()
            .map_err(|_| Error::Corrupt("ingest buffer lock poisoned"))
    }
}

/// Constructor for a producer/consumer pair sharing one byte ring.
pub struct IngestBuffer;

impl IngestBuffer {
    /// Create a ring from a validated configuration.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig`: zero capacity or inconsistent growth settings
    pub fn new(config: IngestConfig) -> Result<(IngestProducer, IngestConsumer)> {
        config.validate()?;
        let ring = Ring {
            buf: vec![0u8; config.capacity],
            head: 0,
            tail: 0,
            producer_closed: false,
            consumer_closed: false,
            stalls: 0,
            stats: IngestStats {
                capacity: config.capacity,
                ..IngestStats::default()
            },
        };
        let shared = Arc::new(Shared {
            ring: Mutex::new(ring),
            readable: Condvar::new(),
            writable: Condvar::new(),
            config,
        });
        Ok((
            IngestProducer {
                shared: Arc::clone(&shared),
            },
            IngestConsumer {
                shared,
                peek_base: 0,
            },
        ))
    }

    /// Shorthand for a ring with the given capacity and policy, without growth.
    pub fn with_capacity(
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Result<(IngestProducer, IngestConsumer)> {
        Self::new(IngestConfig {
            capacity,
            policy,
            growth: None,
        })
    }
}

/// Writing half of the ring. Owned by exactly one thread.
pub struct IngestProducer {
    shared: Arc<Shared>,
}

impl IngestProducer {
    /// Append bytes, applying the configured overflow policy.
    ///
    /// # Errors
    ///
    /// - `Error::Closed`: the consumer is gone or `close()` was called
    /// - `Error::BufferOverflow`: blocking policy timed out; the unwritten
    ///   remainder of `bytes` is discarded (a prefix may have been accepted)
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut ring = self.shared.lock()?;
        if ring.closed() {
            return Err(Error::Closed);
        }
        match self.shared.config.policy {
            OverflowPolicy::Overwrite => {
                Self::append_overwrite(&mut ring, bytes);
                drop(ring);
                self.shared.readable.notify_one();
                Ok(())
            }
            OverflowPolicy::Block { timeout_ms } => self.append_blocking(ring, bytes, timeout_ms),
        }
    }

    fn append_overwrite(ring: &mut Ring, bytes: &[u8]) {
        let cap = ring.capacity();
        let data = if bytes.len() > cap {
            let skip = bytes.len() - cap;
            ring.stats.dropped += skip as u64;
            &bytes[skip..]
        } else {
            bytes
        };
        let free = ring.free();
        if data.len() > free {
            let lost = data.len() - free;
            ring.tail += lost as u64;
            ring.stats.dropped += lost as u64;
            ring.stats.overflows += 1;
            log::warn!("ingest buffer full: overwrote {lost} unread bytes");
        }
        ring.write(data);
        ring.stats.appended += bytes.len() as u64;
    }

    fn append_blocking(
        &self,
        mut ring: MutexGuard<'_, Ring>,
        bytes: &[u8],
        timeout_ms: Option<u64>,
    ) -> Result<()> {
        let stall_interval = self.shared.config.stall_interval();
        let growth = self.shared.config.growth;
        let mut remaining = bytes;
        let mut stalled = false;

        while !remaining.is_empty() {
            if ring.closed() {
                return Err(Error::Closed);
            }

            let free = ring.free();
            if free > 0 {
                let n = free.min(remaining.len());
                ring.write(&remaining[..n]);
                ring.stats.appended += n as u64;
                remaining = &remaining[n..];
                self.shared.readable.notify_one();
                continue;
            }

            let interval = match stall_interval {
                Some(interval) => interval,
                None => {
                    ring = self
                        .shared
                        .writable
                        .wait(ring)
                        .map_err(|_| Error::Corrupt("ingest buffer lock poisoned"))?;
                    continue;
                }
            };

            let (guard, wait) = self
                .shared
                .writable
                .wait_timeout(ring, interval)
                .map_err(|_| Error::Corrupt("ingest buffer lock poisoned"))?;
            ring = guard;
            if !wait.timed_out() || ring.free() > 0 {
                continue;
            }

            stalled = true;
            ring.stalls += 1;
            if let Some(growth) = growth {
                let cap = ring.capacity();
                if ring.stalls >= growth.after_stalls && cap < growth.max_capacity {
                    let wanted = (cap * 2).max(ring.len() + remaining.len());
                    let new_capacity = wanted.min(growth.max_capacity);
                    log::info!("ingest buffer growing from {cap} to {new_capacity} bytes");
                    ring.grow(new_capacity);
                    continue;
                }
                if timeout_ms.is_none() {
                    continue;
                }
            }

            let lost = remaining.len() as u64;
            ring.stats.overflows += 1;
            ring.stats.dropped += lost;
            log::warn!(
                "ingest buffer overflow: discarded {lost} bytes after waiting {interval:?}"
            );
            return Err(Error::BufferOverflow);
        }

        if !stalled {
            ring.stalls = 0;
        }
        Ok(())
    }

    /// Mark end of stream. The consumer drains remaining bytes, then sees `Closed`.
    pub fn close(&mut self) {
        if let Ok(mut ring) = self.shared.lock() {
            ring.producer_closed = true;
        }
        self.shared.readable.notify_all();
        self.shared.writable.notify_all();
    }

    pub fn stats(&self) -> IngestStats {
        self.shared
            .lock()
            .map(|ring| ring.stats)
            .unwrap_or_default()
    }
}

impl Drop for IngestProducer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading half of the ring. Owned by the decoder thread.
pub struct IngestConsumer {
    shared: Arc<Shared>,
    peek_base: u64,
}

impl IngestConsumer {
    /// Number of unread bytes.
    pub fn available(&self) -> usize {
        self.shared.lock().map(|ring| ring.len()).unwrap_or(0)
    }

    /// Move every unread byte into `out` (cleared first) and release it.
    ///
    /// Returns `Ok(0)` when nothing is buffered yet.
    ///
    /// # Errors
    ///
    /// - `Error::Closed`: the producer closed and every byte was drained
    pub fn read_available(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        out.clear();
        let mut ring = self.shared.lock()?;
        let len = ring.len();
        if len == 0 {
            return if ring.producer_closed {
                Err(Error::Closed)
            } else {
                Ok(0)
            };
        }
        ring.copy_out(ring.tail, len, out);
        ring.tail += len as u64;
        ring.stats.consumed += len as u64;
        self.peek_base = ring.tail;
        drop(ring);
        self.shared.writable.notify_one();
        Ok(len)
    }

    /// Copy up to `max` unread bytes into `out` (cleared first) without
    /// releasing them. Follow with [`consume`](Self::consume).
    ///
    /// # Errors
    ///
    /// - `Error::Closed`: the producer closed and every byte was drained
    pub fn peek_sync_window(&mut self, out: &mut Vec<u8>, max: usize) -> Result<usize> {
        out.clear();
        let ring = self.shared.lock()?;
        let unread = ring.len();
        if unread == 0 && ring.producer_closed {
            return Err(Error::Closed);
        }
        let len = unread.min(max);
        ring.copy_out(ring.tail, len, out);
        self.peek_base = ring.tail;
        Ok(len)
    }

    /// Release `n` bytes counted from the start of the last peeked window.
    ///
    /// Bytes already overwritten by the producer are not released twice.
    pub fn consume(&mut self, n: usize) {
        if let Ok(mut ring) = self.shared.lock() {
            let target = (self.peek_base + n as u64).min(ring.head);
            if target > ring.tail {
                ring.stats.consumed += target - ring.tail;
                ring.tail = target;
            }
            self.peek_base = ring.tail;
        }
        self.shared.writable.notify_one();
    }

    /// Block until at least `min` bytes are unread.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// - `Error::Closed`: the producer closed with fewer than `min` bytes left
    pub fn wait_readable(&mut self, min: usize, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ring = self.shared.lock()?;
        loop {
            if ring.len() >= min.max(1) {
                return Ok(true);
            }
            if ring.producer_closed {
                return Err(Error::Closed);
            }
            ring = match deadline {
                None => self
                    .shared
                    .readable
                    .wait(ring)
                    .map_err(|_| Error::Corrupt("ingest buffer lock poisoned"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.shared
                        .readable
                        .wait_timeout(ring, deadline - now)
                        .map_err(|_| Error::Corrupt("ingest buffer lock poisoned"))?
                        .0
                }
            };
        }
    }

    /// True once the producer closed and nothing is left to read.
    pub fn is_finished(&self) -> bool {
        self.shared
            .lock()
            .map(|ring| ring.producer_closed && ring.len() == 0)
            .unwrap_or(true)
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().map(|ring| ring.capacity()).unwrap_or(0)
    }

    pub fn stats(&self) -> IngestStats {
        self.shared
            .lock()
            .map(|ring| ring.stats)
            .unwrap_or_default()
    }
}

impl Drop for IngestConsumer {
    fn drop(&mut self) {
        if let Ok(mut ring) = self.shared.lock() {
            ring.consumer_closed = true;
        }
        self.shared.writable.notify_all();
    }
}
