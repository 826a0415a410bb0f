use std::time::Duration;

use crate::core::{Error, Result};
use crate::decode::{DecodeStep, FrameDecoder, ParallelFieldDecoder};
use crate::ingest::IngestConsumer;

const DEFAULT_POLL: Duration = Duration::from_millis(50);

/// Counters kept by a [`FrameReader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    /// Bytes released without producing a frame.
    pub skipped_bytes: u64,
    pub checksum_failures: u64,
    pub malformed_lines: u64,
    /// Non-finite values replaced downstream; filled in by the pipeline.
    pub substitutions: u64,
}

/// Drives a [`FrameDecoder`] over the consumer half of an ingest buffer.
///
/// Decode faults are logged and counted here and never surface as errors.
pub struct FrameReader {
    consumer: IngestConsumer,
    decoder: FrameDecoder,
    parallel: Option<ParallelFieldDecoder>,
    window: Vec<u8>,
    stats: DecodeStats,
    poll: Duration,
}

impl FrameReader {
    pub fn new(consumer: IngestConsumer, decoder: FrameDecoder) -> Self {
        Self {
            consumer,
            decoder,
            parallel: None,
            window: Vec::new(),
            stats: DecodeStats::default(),
            poll: DEFAULT_POLL,
        }
    }

    /// Spread binary field extraction over `workers` threads. A single worker,
    /// or a text schema, keeps decoding on the calling thread.
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        if workers > 1 {
            if let FrameDecoder::Binary(binary) = &self.decoder {
                self.parallel = Some(ParallelFieldDecoder::new(binary.fields(), workers)?);
            }
        }
        Ok(self)
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn consumer(&self) -> &IngestConsumer {
        &self.consumer
    }

    /// Decode the next frame, appending one value per field to `out`.
    ///
    /// Returns `Ok(false)` when no complete frame arrived within the poll
    /// interval, so the caller can check for cancellation.
    ///
    /// # Errors
    ///
    /// - `Error::Closed`: the producer closed and every complete frame was returned
    pub fn next_frame(&mut self, out: &mut Vec<f64>) -> Result<bool> {
        let max = self.decoder.window_hint();
        loop {
            match self.consumer.peek_sync_window(&mut self.window, max) {
                Ok(_) => {}
                Err(Error::Closed) => return Err(Error::Closed),
                Err(err) => return Err(err),
            }

            match self.decoder.locate(&self.window) {
                DecodeStep::Frame { start, end } => {
                    self.stats.skipped_bytes += start as u64;
                    let decoded = self.decode_located(start, end, out);
                    self.consumer.consume(end);
                    if decoded? {
                        self.stats.frames += 1;
                        return Ok(true);
                    }
                }
                DecodeStep::Skip { consumed } => self.consumer.consume(consumed),
                DecodeStep::Rejected { consumed, fault } => {
                    log::warn!("discarding {consumed} bytes: {fault}");
                    self.count_fault(fault);
                    self.stats.skipped_bytes += consumed as u64;
                    self.consumer.consume(consumed);
                }
                DecodeStep::NeedMore { consumed, .. } => {
                    self.stats.skipped_bytes += consumed as u64;
                    self.consumer.consume(consumed);
                    let remaining = self.window.len() - consumed;
                    if remaining >= self.consumer.capacity() {
                        // The ring cannot hold more; no frame fits in it.
                        log::warn!("discarding {remaining} bytes: no frame fits in the ingest buffer");
                        self.stats.skipped_bytes += remaining as u64;
                        self.consumer.consume(self.window.len());
                        continue;
                    }
                    match self.consumer.wait_readable(remaining + 1, Some(self.poll)) {
                        Ok(true) => {}
                        Ok(false) => return Ok(false),
                        Err(Error::Closed) => return self.drain_tail(out),
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// Returns `Ok(false)` when the frame was rejected and counted.
    fn decode_located(&mut self, start: usize, end: usize, out: &mut Vec<f64>) -> Result<bool> {
        let frame = &self.window[start..end];
        if let (Some(parallel), FrameDecoder::Binary(binary)) = (&mut self.parallel, &self.decoder) {
            parallel.decode(binary.payload(frame), out)?;
            return Ok(true);
        }
        match self.decoder.decode_fields(frame, out) {
            Ok(()) => Ok(true),
            Err(fault) => {
                log::warn!("discarding line: {fault}");
                self.count_fault(fault);
                self.stats.skipped_bytes += (end - start) as u64;
                Ok(false)
            }
        }
    }

    /// End of stream: a final unterminated text line still counts as a frame.
    fn drain_tail(&mut self, out: &mut Vec<f64>) -> Result<bool> {
        match self.consumer.peek_sync_window(&mut self.window, usize::MAX) {
            Ok(_) => {}
            Err(Error::Closed) => return Err(Error::Closed),
            Err(err) => return Err(err),
        }
        let tail = self.window.len();
        if tail == 0 {
            return Err(Error::Closed);
        }
        let mut decoded = false;
        if let FrameDecoder::Text(_) = self.decoder {
            self.window.push(b'\n');
            if let DecodeStep::Frame { start, end } = self.decoder.locate(&self.window) {
                if end == self.window.len() {
                    decoded = self.decode_located(start, end, out)?;
                }
            }
        }
        if decoded {
            self.stats.frames += 1;
        } else {
            log::debug!("dropping {tail} trailing bytes at end of stream");
            self.stats.skipped_bytes += tail as u64;
        }
        self.consumer.consume(tail);
        if decoded {
            Ok(true)
        } else {
            Err(Error::Closed)
        }
    }

    fn count_fault(&mut self, fault: crate::core::DecodeFault) {
        use crate::core::DecodeFault;
        match fault {
            DecodeFault::ChecksumMismatch { .. } => self.stats.checksum_failures += 1,
            DecodeFault::MalformedLine | DecodeFault::BadToken => self.stats.malformed_lines += 1,
            DecodeFault::SyncNotFound | DecodeFault::Truncated => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::schema::{BinarySchema, ByteOrder, FieldSpec, FieldType, FrameSchema, TextSchema};
    use crate::decode::ChecksumKind;
    use crate::ingest::{IngestBuffer, OverflowPolicy};

    fn binary_schema() -> FrameSchema {
        FrameSchema::Binary(BinarySchema {
            sync: vec![0xAA, 0xAA],
            fields: vec![
                FieldSpec::new("u", FieldType::U16, ByteOrder::Little),
                FieldSpec::new("i", FieldType::I16, ByteOrder::Big),
            ],
            checksum: ChecksumKind::Xor8,
        })
    }

    fn collect(reader: &mut FrameReader) -> Vec<Vec<f64>> {
        let mut frames = Vec::new();
        loop {
            let mut out = Vec::new();
            match reader.next_frame(&mut out) {
                Ok(true) => frames.push(out),
                Ok(false) => {}
                Err(Error::Closed) => return frames,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
    }

    #[test]
    fn binary_frames_split_across_appends() {
        let (mut producer, consumer) =
            IngestBuffer::with_capacity(64, OverflowPolicy::default()).unwrap();
        let decoder = FrameDecoder::from_schema(&binary_schema()).unwrap();
        let mut reader = FrameReader::new(consumer, decoder);

        producer.append(&[0x00, 0xAA]).unwrap();
        producer.append(&[0xAA, 0x34, 0x12, 0x7F]).unwrap();
        producer.append(&[0xFF, 0x34 ^ 0x12 ^ 0x7F ^ 0xFF]).unwrap();
        // Bad checksum, then a good frame.
        producer.append(&[0xAA, 0xAA, 0x01, 0x00, 0x00, 0x01, 0x55]).unwrap();
        producer.append(&[0xAA, 0xAA, 0x02, 0x00, 0x00, 0x02, 0x00]).unwrap();
        producer.close();

        let frames = collect(&mut reader);
        assert_eq!(frames, vec![vec![4660.0, 32767.0], vec![2.0, 2.0]]);
        let stats = reader.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.checksum_failures, 1);
        assert!(stats.skipped_bytes >= 1);
    }

    #[test]
    fn parallel_workers_give_same_values() {
        let (mut producer, consumer) =
            IngestBuffer::with_capacity(1024, OverflowPolicy::default()).unwrap();
        let decoder = FrameDecoder::from_schema(&binary_schema()).unwrap();
        let mut reader = FrameReader::new(consumer, decoder).with_workers(2).unwrap();

        for n in 0..20u16 {
            let lo = n.to_le_bytes();
            let hi = (n as i16).to_be_bytes();
            let sum = lo[0] ^ lo[1] ^ hi[0] ^ hi[1];
            producer
                .append(&[0xAA, 0xAA, lo[0], lo[1], hi[0], hi[1], sum])
                .unwrap();
        }
        producer.close();

        let frames = collect(&mut reader);
        assert_eq!(frames.len(), 20);
        assert_eq!(frames[19], vec![19.0, 19.0]);
    }

    #[test]
    fn text_lines_with_bad_line_and_unterminated_tail() {
        let (mut producer, consumer) =
            IngestBuffer::with_capacity(256, OverflowPolicy::default()).unwrap();
        let schema = FrameSchema::Text(TextSchema {
            delimiter: ';',
            fields: vec!["a".into(), "b".into()],
        });
        let mut reader = FrameReader::new(consumer, FrameDecoder::from_schema(&schema).unwrap());

        producer.append(b"1;2\r\n\nx;3\n4;nan\n5;6").unwrap();
        producer.close();

        let frames = collect(&mut reader);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], vec![1.0, 2.0]);
        assert!(frames[1][1].is_nan());
        assert_eq!(frames[2], vec![5.0, 6.0]);
        assert_eq!(reader.stats().malformed_lines, 1);
    }
}
