//! Overwrite-oldest SPSC ring buffer
//!
//! A fixed-capacity byte queue holding the most recent window of a continuous
//! signal. Unlike [`rtrb`], a full buffer never rejects a write: the producer
//! discards exactly enough of the oldest unread bytes to make room.
//!
//! Both cursors are monotonically increasing byte counts; a byte at absolute
//! position `p` lives in slot `p % capacity`. The producer advances the read
//! cursor *before* overwriting a slot, and the consumer re-checks the read cursor
//! after copying, so a copy that raced with an overwrite is detected and retried.
//! Storage is plain `AtomicU8`s, so the race is never undefined behaviour, only a
//! retry.

use std::sync::atomic::{fence, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{ConfigError, ConfigResult};

const SAMPLE_SIZE: usize = core::mem::size_of::<f32>();

struct Shared {
    storage: Box<[AtomicU8]>,
    /// Bytes ever produced
    head: AtomicU64,
    /// Bytes ever consumed or discarded
    tail: AtomicU64,
}

impl Shared {
    #[inline]
    fn capacity(&self) -> u64 {
        self.storage.len() as u64
    }

    #[inline]
    fn slot(&self, position: u64) -> &AtomicU8 {
        &self.storage[(position % self.capacity()) as usize]
    }

    /// Start position and length of the unread window as seen right now
    #[inline]
    fn window(&self) -> (u64, u64) {
        // tail first: head only grows, so the head we read is never older than the tail
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        let start = tail.max(head.saturating_sub(self.capacity()));
        (start, head.saturating_sub(start))
    }
}

/// Constructor namespace, mirroring `rtrb::RingBuffer`.
pub struct RingBuffer;

impl RingBuffer {
    /// Allocate a zero-filled ring of `capacity` bytes and split it into its two halves.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> ConfigResult<(RingProducer, RingConsumer)> {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity(1));
        }

        let storage = (0..capacity).map(|_| AtomicU8::new(0)).collect();
        let shared = Arc::new(Shared {
            storage,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
        });

        Ok((
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        ))
    }

    /// Allocate a ring holding `depth` `f32` samples
    pub fn with_samples(depth: usize) -> ConfigResult<(RingProducer, RingConsumer)> {
        if depth == 0 {
            return Err(ConfigError::ZeroBufferDepth);
        }
        Self::new(depth * SAMPLE_SIZE)
    }
}

/// Write half of a [`RingBuffer`]. Exactly one exists per ring.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.storage.len()
    }

    /// Append `data`, discarding the oldest unread bytes if there is not enough room.
    ///
    /// If `data` is longer than the ring, only its last `capacity` bytes survive.
    pub fn produce_bytes(&mut self, data: &[u8]) {
        self.produce_iter(data.len(), data.iter().copied());
    }

    /// Append samples in native byte order, overwriting the oldest if needed
    pub fn produce_samples(&mut self, samples: &[f32]) {
        self.produce_iter(
            samples.len() * SAMPLE_SIZE,
            samples.iter().flat_map(|s| s.to_ne_bytes()),
        );
    }

    fn produce_iter(&mut self, len: usize, bytes: impl Iterator<Item = u8>) {
        if len == 0 {
            return;
        }

        let shared = &*self.shared;
        let capacity = shared.capacity();
        let len = len as u64;

        // We are the only writer of head
        let head = shared.head.load(Ordering::Relaxed);
        let new_head = head + len;
        let skip = len.saturating_sub(capacity);

        let tail = shared.tail.load(Ordering::Acquire);
        if new_head - tail > capacity {
            // Discard the oldest bytes before touching their slots, then fence so a
            // consumer that observes any of the stores below also observes the discard.
            shared.tail.fetch_max(new_head - capacity, Ordering::AcqRel);
            fence(Ordering::Release);
        }

        let first = head + skip;
        for (i, byte) in bytes.skip(skip as usize).enumerate() {
            shared.slot(first + i as u64).store(byte, Ordering::Relaxed);
        }

        shared.head.store(new_head, Ordering::Release);
    }
}

/// Read half of a [`RingBuffer`]. Exactly one exists per ring.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.storage.len()
    }

    /// Unread bytes
    #[inline]
    pub fn available(&self) -> usize {
        self.shared.window().1 as usize
    }

    /// Unread whole samples
    #[inline]
    pub fn available_samples(&self) -> usize {
        self.available() / SAMPLE_SIZE
    }

    /// Copy up to `dest.len()` of the oldest unread bytes without consuming them.
    /// Returns how many bytes were copied.
    pub fn peek(&self, dest: &mut [u8]) -> usize {
        let max = dest.len();
        self.peek_with(max, |i, byte| dest[i] = byte).1
    }

    /// Advance the read cursor by up to `len` bytes, returning how many were consumed
    pub fn consume(&mut self, len: usize) -> usize {
        let (start, available) = self.shared.window();
        let len = (len as u64).min(available);
        self.shared.tail.fetch_max(start + len, Ordering::AcqRel);
        len as usize
    }

    /// Copy up to `dest.len()` of the oldest unread samples without consuming them
    pub fn peek_samples(&self, dest: &mut [f32]) -> usize {
        let max = dest.len() * SAMPLE_SIZE;
        self.peek_samples_with(max, dest).1 / SAMPLE_SIZE
    }

    /// Copy up to `dest.len()` of the oldest unread samples and consume them
    pub fn read_samples(&mut self, dest: &mut [f32]) -> usize {
        let max = dest.len() * SAMPLE_SIZE;
        let (start, copied) = self.peek_samples_with(max, dest);
        let copied = copied - copied % SAMPLE_SIZE;
        self.shared
            .tail
            .fetch_max(start + copied as u64, Ordering::AcqRel);
        copied / SAMPLE_SIZE
    }

    /// Every unread sample, oldest first. Allocates; keep it off the audio thread.
    pub fn snapshot_samples(&self) -> Vec<f32> {
        let mut samples = vec![0.0; self.available_samples()];
        let copied = self.peek_samples(&mut samples);
        samples.truncate(copied);
        samples
    }

    fn peek_samples_with(&self, max: usize, dest: &mut [f32]) -> (u64, usize) {
        let mut bytes = [0u8; SAMPLE_SIZE];
        self.peek_with(max, |i, byte| {
            bytes[i % SAMPLE_SIZE] = byte;
            if i % SAMPLE_SIZE == SAMPLE_SIZE - 1 {
                dest[i / SAMPLE_SIZE] = f32::from_ne_bytes(bytes);
            }
        })
    }

    /// Copy the unread window into `sink` and validate it against concurrent overwrites
    fn peek_with(&self, max: usize, mut sink: impl FnMut(usize, u8)) -> (u64, usize) {
        let shared = &*self.shared;
        loop {
            let (start, available) = shared.window();
            let len = (available as usize).min(max);

            for i in 0..len {
                sink(i, shared.slot(start + i as u64).load(Ordering::Relaxed));
            }

            fence(Ordering::Acquire);
            // Only the producer moves tail while we are reading. If it moved past our
            // start, some of what we copied may already be newer data.
            if shared.tail.load(Ordering::Relaxed) <= start {
                return (start, len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(range: core::ops::Range<u32>) -> Vec<f32> {
        range.map(|i| i as f32).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            RingBuffer::new(0),
            Err(ConfigError::InvalidCapacity(_))
        ));
        assert!(matches!(
            RingBuffer::with_samples(0),
            Err(ConfigError::ZeroBufferDepth)
        ));
    }

    #[test]
    fn test_starts_zeroed_and_empty() {
        let (producer, consumer) = RingBuffer::new(64).unwrap();
        assert_eq!(producer.capacity(), 64);
        assert_eq!(consumer.available(), 0);
        assert!(consumer.snapshot_samples().is_empty());
    }

    #[test]
    fn test_produce_then_consume_empties() {
        for k in [1usize, 7, 32, 64] {
            let (mut producer, mut consumer) = RingBuffer::new(64).unwrap();
            let data: Vec<u8> = (0..k as u8).collect();

            producer.produce_bytes(&data);
            assert_eq!(consumer.available(), k);
            assert_eq!(consumer.consume(k), k);
            assert_eq!(consumer.available(), 0);
        }
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let (mut producer, consumer) = RingBuffer::new(8).unwrap();
        producer.produce_bytes(&[1, 2, 3]);

        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        assert_eq!(consumer.peek(&mut first), 3);
        assert_eq!(consumer.peek(&mut second), 3);
        assert_eq!(first[..3], [1, 2, 3]);
        assert_eq!(first, second);
        assert_eq!(consumer.available(), 3);
    }

    #[test]
    fn test_consume_clamps_to_available() {
        let (mut producer, mut consumer) = RingBuffer::new(16).unwrap();
        producer.produce_bytes(&[0; 5]);
        assert_eq!(consumer.consume(100), 5);
        assert_eq!(consumer.available(), 0);
    }

    #[test]
    fn test_overwrite_oldest_keeps_last_capacity_bytes() {
        let capacity = 16;
        let extra = 5;
        let (mut producer, consumer) = RingBuffer::new(capacity).unwrap();
        let data: Vec<u8> = (0..(capacity + extra) as u8).collect();

        producer.produce_bytes(&data);

        let mut tail = vec![0u8; capacity];
        assert_eq!(consumer.available(), capacity);
        assert_eq!(consumer.peek(&mut tail), capacity);
        assert_eq!(tail, data[extra..]);
    }

    #[test]
    fn test_overwrite_across_writes_and_wrap() {
        let (mut producer, mut consumer) = RingBuffer::new(8).unwrap();
        producer.produce_bytes(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(consumer.consume(2), 2);
        producer.produce_bytes(&[7, 8, 9, 10, 11]);

        // 4 unread + 5 new = 9 > 8, so byte 3 is dropped
        let mut tail = [0u8; 8];
        assert_eq!(consumer.peek(&mut tail), 8);
        assert_eq!(tail, [4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_sample_window_scenario() {
        let (mut producer, consumer) = RingBuffer::with_samples(1024).unwrap();
        let written = sequence(0..1200);

        producer.produce_samples(&written[..600]);
        producer.produce_samples(&written[600..]);

        let tail = consumer.snapshot_samples();
        assert_eq!(tail.len(), 1024);
        assert_eq!(tail, written[176..]);
    }

    #[test]
    fn test_read_samples_consumes() {
        let (mut producer, mut consumer) = RingBuffer::with_samples(16).unwrap();
        producer.produce_samples(&sequence(0..10));

        let mut out = [0.0f32; 4];
        assert_eq!(consumer.read_samples(&mut out), 4);
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(consumer.available_samples(), 6);

        let mut rest = [0.0f32; 16];
        assert_eq!(consumer.read_samples(&mut rest), 6);
        assert_eq!(rest[..6], sequence(4..10)[..]);
    }

    #[test]
    fn test_concurrent_reads_stay_contiguous() {
        let (mut producer, mut consumer) = RingBuffer::with_samples(256).unwrap();
        let total = 200_000u32;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                let mut next = 0u32;
                while next < total {
                    let end = (next + 37).min(total);
                    producer.produce_samples(&sequence(next..end));
                    next = end;
                }
            });

            let mut last_seen = -1.0f32;
            let mut out = [0.0f32; 64];
            while last_seen < (total - 1) as f32 {
                let n = consumer.read_samples(&mut out);
                for pair in out[..n].windows(2) {
                    assert_eq!(pair[1], pair[0] + 1.0);
                }
                if n > 0 {
                    assert!(out[0] > last_seen);
                    last_seen = out[n - 1];
                }
            }
        });
    }
}
