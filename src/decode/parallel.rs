//! Frame field extraction spread across worker threads.
//!
//! Each worker owns a contiguous run of fields sorted by offset, so the byte
//! ranges they read never overlap. Two barriers bracket every frame: `start`
//! releases the workers onto the new payload, `done` holds the caller until
//! every field of that payload is decoded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, RwLock};
use std::thread::{self, JoinHandle};

use crate::core::{Error, Result};
use crate::decode::schema::ResolvedField;

struct FrameSlot {
    payload: RwLock<Vec<u8>>,
    /// Decoded values as `f64` bits, indexed by schema position.
    results: Vec<AtomicU64>,
    start: Barrier,
    done: Barrier,
    shutdown: AtomicBool,
}

pub struct ParallelFieldDecoder {
    slot: Arc<FrameSlot>,
    workers: Vec<JoinHandle<()>>,
}

impl ParallelFieldDecoder {
    /// Spawn up to `workers` threads; never more than there are fields.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig`: `workers` is zero or there are no fields
    /// - `Error::Io`: a worker thread failed to spawn
    pub fn new(fields: &[ResolvedField], workers: usize) -> Result<Self> {
        if workers == 0 || fields.is_empty() {
            return Err(Error::InvalidConfig(
                "parallel decode needs at least one worker and one field".into(),
            ));
        }
        let workers = workers.min(fields.len());

        let mut order: Vec<usize> = (0..fields.len()).collect();
        order.sort_by_key(|&i| fields[i].offset);
        let per_worker = order.len().div_ceil(workers);
        let assignments: Vec<Vec<(usize, ResolvedField)>> = order
            .chunks(per_worker)
            .map(|chunk| chunk.iter().map(|&i| (i, fields[i])).collect())
            .collect();

        let slot = Arc::new(FrameSlot {
            payload: RwLock::new(Vec::new()),
            results: (0..fields.len()).map(|_| AtomicU64::new(0)).collect(),
            start: Barrier::new(assignments.len() + 1),
            done: Barrier::new(assignments.len() + 1),
            shutdown: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(assignments.len());
        for (id, owned) in assignments.into_iter().enumerate() {
            let slot = Arc::clone(&slot);
            let handle = thread::Builder::new()
                .name(format!("field-decode-{id}"))
                .spawn(move || worker_loop(&slot, &owned))?;
            handles.push(handle);
        }

        Ok(Self {
            slot,
            workers: handles,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Decode `payload` on the workers and append the values to `out` in
    /// schema order. Returns once every worker has finished this frame.
    ///
    /// # Errors
    ///
    /// - `Error::Corrupt`: the payload lock was poisoned by a panicking worker
    pub fn decode(&mut self, payload: &[u8], out: &mut Vec<f64>) -> Result<()> {
        {
            let mut shared = self
                .slot
                .payload
                .write()
                .map_err(|_| Error::Corrupt("decode payload lock poisoned"))?;
            shared.clear();
            shared.extend_from_slice(payload);
        }
        self.slot.start.wait();
        self.slot.done.wait();
        out.extend(
            self.slot
                .results
                .iter()
                .map(|bits| f64::from_bits(bits.load(Ordering::Acquire))),
        );
        Ok(())
    }
}

fn worker_loop(slot: &FrameSlot, owned: &[(usize, ResolvedField)]) {
    loop {
        slot.start.wait();
        if slot.shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Ok(payload) = slot.payload.read() {
            for (index, field) in owned {
                let value = if field.end() <= payload.len() {
                    field.decode(&payload)
                } else {
                    f64::NAN
                };
                slot.results[*index].store(value.to_bits(), Ordering::Release);
            }
        }
        slot.done.wait();
    }
}

impl Drop for ParallelFieldDecoder {
    fn drop(&mut self) {
        self.slot.shutdown.store(true, Ordering::Release);
        self.slot.start.wait();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::schema::{encode_value, ByteOrder, FieldType};

    fn fields() -> Vec<ResolvedField> {
        let types = [
            FieldType::U16,
            FieldType::I32,
            FieldType::F64,
            FieldType::I8,
            FieldType::F32,
        ];
        let mut offset = 0;
        types
            .iter()
            .map(|&field_type| {
                let field = ResolvedField {
                    offset,
                    field_type,
                    order: ByteOrder::Big,
                };
                offset += field_type.width();
                field
            })
            .collect()
    }

    fn payload(fields: &[ResolvedField], values: &[f64]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (field, value) in fields.iter().zip(values) {
            bytes.extend(encode_value(field.field_type, field.order, *value));
        }
        bytes
    }

    #[test]
    fn matches_sequential_decode() {
        let fields = fields();
        let mut decoder = ParallelFieldDecoder::new(&fields, 3).unwrap();
        assert_eq!(decoder.worker_count(), 3);

        for frame in 0..200 {
            let values = [
                frame as f64,
                -(frame as f64) * 1000.0,
                frame as f64 / 3.0,
                -(frame % 100) as f64,
                0.5 * frame as f64,
            ];
            let bytes = payload(&fields, &values);
            let mut expected = Vec::new();
            for field in &fields {
                expected.push(field.decode(&bytes));
            }
            let mut out = Vec::new();
            decoder.decode(&bytes, &mut out).unwrap();
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn caps_workers_at_field_count() {
        let fields = fields();
        let decoder = ParallelFieldDecoder::new(&fields[..2], 8).unwrap();
        assert_eq!(decoder.worker_count(), 2);
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(ParallelFieldDecoder::new(&fields(), 0).is_err());
    }
}
