//! Background flush threads.
//!
//! Series submit full blocks here once the lag policy allows it; a small pool
//! of named workers writes them with bounded retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::{Error, Result};
use crate::store::block::Block;
use crate::store::block_file::BlockImage;
use crate::store::series::Series;
use crate::store::storage::BlockStorage;

pub(crate) struct FlushJob {
    pub series: Arc<Series>,
    pub block: Arc<Block>,
}

pub(crate) enum FlushMessage {
    Job(FlushJob),
    Stop,
}

/// Submission side of a [`FlushPool`], held by every series.
#[derive(Clone)]
pub(crate) struct FlushQueue {
    tx: Sender<FlushMessage>,
}

impl FlushQueue {
    /// False when the pool is gone.
    pub fn submit(&self, job: FlushJob) -> bool {
        self.tx.send(FlushMessage::Job(job)).is_ok()
    }
}

pub struct FlushPool {
    queue: FlushQueue,
    rx: Option<Arc<Mutex<Receiver<FlushMessage>>>>,
    workers: Vec<JoinHandle<()>>,
}

impl FlushPool {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidConfig("flush pool needs at least one thread".into()));
        }
        let (tx, rx) = mpsc::channel();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("block-flush-{id}"))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }
        Ok(Self {
            queue: FlushQueue { tx },
            rx: Some(rx),
            workers,
        })
    }

    pub(crate) fn queue(&self) -> FlushQueue {
        self.queue.clone()
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Stop the workers after the jobs already queued ahead of the stop
    /// markers. Jobs that never ran are handed back to their series.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for _ in 0..self.workers.len() {
            let _ = self.queue.tx.send(FlushMessage::Stop);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("flush worker panicked");
            }
        }
        // Dropping the last receiver makes later submissions fail fast.
        if let Some(rx) = self.rx.take() {
            if let Ok(rx) = rx.lock() {
                while let Ok(message) = rx.try_recv() {
                    if let FlushMessage::Job(job) = message {
                        job.series.abandon_flush(&job.block);
                    }
                }
            }
        }
    }
}

impl Drop for FlushPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Mutex<Receiver<FlushMessage>>) {
    loop {
        let message = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        match message {
            Ok(FlushMessage::Job(job)) => job.series.run_flush(&job.block),
            Ok(FlushMessage::Stop) | Err(_) => return,
        }
    }
}

/// Bounded retry with doubling backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << retry.min(16))
    }
}

/// Write one block, retrying transient failures.
///
/// # Errors
///
/// - `Error::StorageWrite`: every attempt failed
/// - `Error::Cancelled`: `cancelled` was raised between attempts
pub(crate) fn write_with_retry(
    storage: &dyn BlockStorage,
    series: &str,
    index: u64,
    block: &BlockImage,
    policy: RetryPolicy,
    cancelled: &AtomicBool,
) -> Result<()> {
    let attempts = policy.retries + 1;
    for attempt in 0..attempts {
        match storage.write_block(series, index, block) {
            Ok(()) => return Ok(()),
            Err(err) if attempt + 1 < attempts => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "flush of {series} block {index} failed (attempt {}/{attempts}): {err}; retrying in {delay:?}",
                    attempt + 1
                );
                thread::sleep(delay);
                if cancelled.load(Ordering::Acquire) {
                    return Err(Error::Cancelled);
                }
            }
            Err(err) => {
                log::error!("flush of {series} block {index} failed after {attempts} attempts: {err}");
            }
        }
    }
    Err(Error::StorageWrite {
        block: index,
        attempts,
    })
}
