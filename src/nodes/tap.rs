//! Capture tap - forwards audio unchanged while keeping a copy for observers

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::AudioBuffers;
use crate::error::{ConfigError, ConfigResult};
use crate::node::NodeId;
use crate::ring_buffer::{RingBuffer, RingConsumer, RingProducer};

/// Samples kept per channel when no depth is given
pub const DEFAULT_TAP_DEPTH: usize = 2048;

/// Write halves, one overwrite-oldest ring per channel
pub(crate) struct CaptureBuffers {
    depth: usize,
    producers: Vec<RingProducer>,
}

/// Read halves matching a [`CaptureBuffers`]
struct ReadBuffers {
    depth: usize,
    consumers: Vec<RingConsumer>,
}

fn allocate(channels: usize, depth: usize) -> ConfigResult<(CaptureBuffers, ReadBuffers)> {
    if depth == 0 {
        return Err(ConfigError::ZeroBufferDepth);
    }

    let mut producers = Vec::with_capacity(channels);
    let mut consumers = Vec::with_capacity(channels);
    for _ in 0..channels {
        let (producer, consumer) = RingBuffer::with_samples(depth)?;
        producers.push(producer);
        consumers.push(consumer);
    }

    Ok((
        CaptureBuffers { depth, producers },
        ReadBuffers { depth, consumers },
    ))
}

impl CaptureBuffers {
    #[inline]
    fn channels(&self) -> usize {
        self.producers.len()
    }

    /// Copy each live channel of `block` into its ring
    fn capture(&mut self, block: &AudioBuffers) {
        for (samples, producer) in block.iter().zip(self.producers.iter_mut()) {
            producer.produce_samples(samples);
        }
    }
}

impl ReadBuffers {
    fn snapshot(&self, channel: usize) -> Vec<f32> {
        self.consumers
            .get(channel)
            .map(RingConsumer::snapshot_samples)
            .unwrap_or_default()
    }
}

/// State shared by a tap node and its handles.
///
/// The render side only ever touches `capture`. Observers clone the current
/// read set out of `readers` and copy from it unlocked, so reading never makes
/// a capture miss. Both sets are swapped together, `capture` first.
pub(crate) struct TapShared {
    capture: Mutex<CaptureBuffers>,
    readers: Mutex<Arc<ReadBuffers>>,
}

impl TapShared {
    pub(crate) fn new(channels: usize, depth: usize) -> ConfigResult<Self> {
        let (capture, readers) = allocate(channels, depth)?;
        Ok(Self {
            capture: Mutex::new(capture),
            readers: Mutex::new(Arc::new(readers)),
        })
    }

    fn readers(&self) -> Arc<ReadBuffers> {
        Arc::clone(&self.readers.lock())
    }

    pub(crate) fn channels(&self) -> usize {
        self.readers().consumers.len()
    }

    pub(crate) fn depth(&self) -> usize {
        self.readers().depth
    }

    /// Capture from the audio thread. Skips the block if the buffers are being swapped.
    #[inline]
    pub(crate) fn try_capture(&self, block: &AudioBuffers) -> bool {
        match self.capture.try_lock() {
            Some(mut buffers) => {
                buffers.capture(block);
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self, channel: usize) -> Vec<f32> {
        self.readers().snapshot(channel)
    }

    /// Replace the buffer set with one of the given shape.
    ///
    /// The new rings are allocated without holding either lock; the swap itself
    /// is the only thing done under them.
    pub(crate) fn reshape(&self, channels: Option<usize>, depth: Option<usize>) -> ConfigResult<()> {
        loop {
            let (current_channels, current_depth) = {
                let buffers = self.capture.lock();
                (buffers.channels(), buffers.depth)
            };
            let channels = channels.unwrap_or(current_channels);
            let depth = depth.unwrap_or(current_depth);

            let (capture, readers) = allocate(channels, depth)?;

            let mut buffers = self.capture.lock();
            // Someone else reshaped in between; go again against their shape
            if buffers.channels() != current_channels || buffers.depth != current_depth {
                continue;
            }
            let old_capture = core::mem::replace(&mut *buffers, capture);
            let old_readers = core::mem::replace(&mut *self.readers.lock(), Arc::new(readers));
            drop(buffers);
            drop(old_capture);
            drop(old_readers);
            return Ok(());
        }
    }

    /// Block the render side's capture, as a concurrent reshape would
    #[cfg(test)]
    pub(crate) fn hold(&self) -> parking_lot::MutexGuard<'_, CaptureBuffers> {
        self.capture.lock()
    }
}

/// Render-side half of a tap
pub(crate) struct TapNode {
    shared: Arc<TapShared>,
}

impl TapNode {
    pub(crate) fn new(shared: Arc<TapShared>) -> Self {
        Self { shared }
    }

    #[inline]
    pub(crate) fn capture(&self, block: &AudioBuffers) {
        self.shared.try_capture(block);
    }
}

/// Observer handle onto a tap's capture buffers.
///
/// Cloneable and usable from any non-real-time thread.
#[derive(Clone)]
pub struct TapHandle {
    pub(crate) id: NodeId,
    pub(crate) shared: Arc<TapShared>,
}

impl TapHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The buffered tail window of `channel`, oldest first.
    ///
    /// Reading does not consume; calling twice without an intervening render
    /// returns the same samples. Unknown channels yield an empty vector.
    pub fn get_samples(&self, channel: usize) -> Vec<f32> {
        self.shared.snapshot(channel)
    }

    /// Reallocate every channel's ring with room for `depth` samples.
    ///
    /// Previously captured samples are dropped.
    pub fn set_buffer_depth(&self, depth: usize) -> ConfigResult<()> {
        if depth == 0 {
            return Err(ConfigError::ZeroBufferDepth);
        }
        self.shared.reshape(None, Some(depth))?;
        debug!(tap = %self.id, depth, "Tap buffer depth changed");
        Ok(())
    }

    /// Samples kept per channel
    pub fn buffer_depth(&self) -> usize {
        self.shared.depth()
    }

    /// Channels being captured
    pub fn channel_count(&self) -> usize {
        self.shared.channels()
    }
}

impl core::fmt::Debug for TapHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TapHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(channels: usize, depth: usize) -> TapHandle {
        TapHandle {
            id: NodeId {
                index: 0,
                generation: 1,
            },
            shared: Arc::new(TapShared::new(channels, depth).unwrap()),
        }
    }

    fn block(channels: &[&[f32]]) -> AudioBuffers {
        let mut buffers = AudioBuffers::new(channels.len(), channels[0].len());
        for (i, samples) in channels.iter().enumerate() {
            buffers.channel_mut(i).copy_from_slice(samples);
        }
        buffers
    }

    #[test]
    fn test_capture_keeps_tail_window() {
        let tap = handle(2, 4);
        let node = TapNode::new(Arc::clone(&tap.shared));

        node.capture(&block(&[&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]]));
        node.capture(&block(&[&[4.0, 5.0, 6.0], &[-4.0, -5.0, -6.0]]));

        assert_eq!(tap.get_samples(0), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(tap.get_samples(1), vec![-3.0, -4.0, -5.0, -6.0]);
        // non-destructive
        assert_eq!(tap.get_samples(0), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_unknown_channel_is_empty() {
        let tap = handle(1, 16);
        assert!(tap.get_samples(5).is_empty());
    }

    #[test]
    fn test_contended_capture_is_skipped() {
        let tap = handle(1, 8);
        let node = TapNode::new(Arc::clone(&tap.shared));

        let guard = tap.shared.hold();
        assert!(!tap.shared.try_capture(&block(&[&[1.0, 2.0]])));
        drop(guard);

        assert!(tap.get_samples(0).is_empty());
        node.capture(&block(&[&[3.0]]));
        assert_eq!(tap.get_samples(0), vec![3.0]);
    }

    #[test]
    fn test_reading_does_not_block_capture() {
        let tap = handle(1, 8);

        // an observer mid-read
        let readers = tap.shared.readers.lock();
        assert!(tap.shared.try_capture(&block(&[&[1.0, 2.0]])));
        drop(readers);

        assert_eq!(tap.get_samples(0), vec![1.0, 2.0]);
    }

    #[test]
    fn test_read_set_outlives_reshape() {
        let tap = handle(1, 8);
        tap.shared.try_capture(&block(&[&[1.0, 2.0, 3.0]]));

        let held = tap.shared.readers();
        tap.set_buffer_depth(4).unwrap();

        assert_eq!(held.snapshot(0), vec![1.0, 2.0, 3.0]);
        assert!(tap.get_samples(0).is_empty());
        assert_eq!(tap.buffer_depth(), 4);
    }

    #[test]
    fn test_set_buffer_depth() {
        let tap = handle(2, 8);
        let node = TapNode::new(Arc::clone(&tap.shared));
        node.capture(&block(&[&[1.0; 4], &[1.0; 4]]));

        tap.set_buffer_depth(32).unwrap();
        assert_eq!(tap.buffer_depth(), 32);
        assert_eq!(tap.channel_count(), 2);
        assert!(tap.get_samples(0).is_empty());

        assert_eq!(tap.set_buffer_depth(0), Err(ConfigError::ZeroBufferDepth));
        assert_eq!(tap.buffer_depth(), 32);
    }

    #[test]
    fn test_reshape_channels() {
        let tap = handle(1, 8);
        tap.shared.reshape(Some(3), None).unwrap();
        assert_eq!(tap.channel_count(), 3);
        assert_eq!(tap.buffer_depth(), 8);
    }

    #[test]
    fn test_concurrent_resize_and_capture() {
        let tap = handle(2, 64);
        let node = TapNode::new(Arc::clone(&tap.shared));
        let data = block(&[&[0.5; 32], &[0.25; 32]]);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..2000 {
                    node.capture(&data);
                }
            });
            for depth in (1..50).map(|i| i * 16) {
                tap.set_buffer_depth(depth).unwrap();
                let samples = tap.get_samples(0);
                assert!(samples.len() <= depth);
                assert!(samples.iter().all(|&s| s == 0.5));
            }
        });
    }
}
