//! Byte sources and the producer thread that feeds the ingest ring.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::{Error, Result};
use crate::ingest::ring::IngestProducer;

const READ_CHUNK: usize = 64 * 1024;
const CHANNEL_POLL: Duration = Duration::from_millis(50);
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Supplier of raw bytes (serial port, socket, file replay).
///
/// Transport mechanics live behind this trait.
pub trait ByteSource: Send {
    /// Block until bytes are available.
    ///
    /// `Ok(None)` marks end of stream. An empty vector means "nothing yet",
    /// letting the pump observe cancellation.
    fn next_bytes(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Adapts any `Read` (file, stdin, TCP stream) into a `ByteSource`.
pub struct ReadSource<R> {
    reader: R,
    chunk: usize,
}

impl<R: Read + Send> ReadSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            chunk: READ_CHUNK,
        }
    }

    pub fn with_chunk(reader: R, chunk: usize) -> Self {
        Self {
            reader,
            chunk: chunk.max(1),
        }
    }
}

impl<R: Read + Send> ByteSource for ReadSource<R> {
    fn next_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.chunk];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }
}

/// Byte source fed through a channel. The stream ends when every sender is dropped.
pub struct ChannelSource {
    rx: Receiver<Vec<u8>>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }
}

impl ByteSource for ChannelSource {
    fn next_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        match self.rx.recv_timeout(CHANNEL_POLL) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(Some(Vec::new())),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

/// Counters from one pump run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PumpStats {
    pub chunks: u64,
    pub bytes: u64,
    pub overflows: u64,
}

/// Producer thread moving bytes from a [`ByteSource`] into the ring.
///
/// Overflow is logged by the ring and counted here; it never stops the pump.
/// The pump ends on end of stream, on a source error, on cancellation, or
/// when the consumer goes away. The producer is closed on exit.
pub struct SourcePump {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<PumpStats>>,
}

impl SourcePump {
    pub fn spawn<S>(mut source: S, mut producer: IngestProducer) -> Result<Self>
    where
        S: ByteSource + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("ingest-pump".to_string())
            .spawn(move || {
                let mut stats = PumpStats::default();
                while !thread_cancel.load(Ordering::Acquire) {
                    let bytes = match source.next_bytes() {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => {
                            log::info!("byte source reached end of stream");
                            break;
                        }
                        Err(err) => {
                            log::error!("byte source failed: {err}");
                            break;
                        }
                    };
                    if bytes.is_empty() {
                        continue;
                    }
                    stats.chunks += 1;
                    stats.bytes += bytes.len() as u64;
                    match producer.append(&bytes) {
                        Ok(()) => {}
                        Err(Error::BufferOverflow) => stats.overflows += 1,
                        Err(Error::Closed) => break,
                        Err(err) => {
                            log::error!("ingest append failed: {err}");
                            break;
                        }
                    }
                }
                producer.close();
                stats
            })?;
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Request the pump to stop after the current chunk.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Wait for the pump thread to exit.
    pub fn join(mut self) -> Result<PumpStats> {
        match self.handle.take() {
            Some(handle) => join_pump(handle),
            None => Ok(PumpStats::default()),
        }
    }

    /// Wait up to `timeout` for the pump thread.
    ///
    /// `Ok(None)` when the thread is still blocked inside its source. It is
    /// then detached; it exits once the source returns and finds the ring
    /// closed.
    pub fn join_timeout(mut self, timeout: Duration) -> Result<Option<PumpStats>> {
        let Some(handle) = self.handle.take() else {
            return Ok(Some(PumpStats::default()));
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("ingest pump still blocked in its source after {timeout:?}, detaching");
                return Ok(None);
            }
            thread::sleep(JOIN_POLL);
        }
        join_pump(handle).map(Some)
    }
}

fn join_pump(handle: JoinHandle<PumpStats>) -> Result<PumpStats> {
    handle
        .join()
        .map_err(|_| Error::Corrupt("ingest pump panicked"))
}

impl Drop for SourcePump {
    /// Cancels and reaps a finished thread; a thread still blocked in its
    /// source is detached.
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}
