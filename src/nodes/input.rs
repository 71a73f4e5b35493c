//! Input bridge - couples a hardware capture callback to the render pull path
//!
//! The capture side and the render side never share anything but one ring per
//! channel. Capture overwrites the oldest samples when render falls behind;
//! render pads with leading silence when capture falls behind.

use crate::buffer::{AudioBuffers, RenderFlags};
use crate::error::{ConfigError, ConfigResult};
use crate::ring_buffer::{RingBuffer, RingConsumer, RingProducer};

/// Frames deinterleaved per pass when pushing interleaved data
const SCRATCH_FRAMES: usize = 512;

/// Create a bridge for `channels` channels buffering `depth` samples each
pub fn input_bridge(channels: usize, depth: usize) -> ConfigResult<(CaptureSide, InputBridge)> {
    if channels == 0 {
        return Err(ConfigError::InvalidConfig(
            "input bridge needs at least one channel".into(),
        ));
    }
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
        CaptureSide {
            producers,
            scratch: vec![0.0; SCRATCH_FRAMES],
        },
        InputBridge { consumers },
    ))
}

/// Producer half, owned by the capture callback. Never allocates after creation.
pub struct CaptureSide {
    producers: Vec<RingProducer>,
    scratch: Vec<f32>,
}

impl CaptureSide {
    #[inline]
    pub fn channels(&self) -> usize {
        self.producers.len()
    }

    /// Append one channel's samples. Unknown channels are ignored.
    pub fn push_channel(&mut self, channel: usize, samples: &[f32]) {
        if let Some(producer) = self.producers.get_mut(channel) {
            producer.produce_samples(samples);
        }
    }

    /// Append interleaved `f32` frames with `stride` channels per frame
    pub fn push_interleaved(&mut self, data: &[f32], stride: usize) {
        self.push_interleaved_map(data, stride, |s| s);
    }

    /// Append interleaved frames of any sample type, converting each sample with `to_f32`.
    ///
    /// Source channels beyond the bridge's channel count are dropped; bridge
    /// channels the source lacks receive nothing.
    pub fn push_interleaved_map<T: Copy>(
        &mut self,
        data: &[T],
        stride: usize,
        to_f32: impl Fn(T) -> f32,
    ) {
        if stride == 0 {
            return;
        }

        let channels = self.producers.len().min(stride);
        for chunk in data.chunks(stride * self.scratch.len()) {
            let frames = chunk.len() / stride;
            for ch in 0..channels {
                let scratch = &mut self.scratch[..frames];
                for (frame, sample) in scratch.iter_mut().enumerate() {
                    *sample = to_f32(chunk[frame * stride + ch]);
                }
                self.producers[ch].produce_samples(scratch);
            }
        }
    }
}

/// Consumer half, rendered as the graph's `Input` node
pub struct InputBridge {
    consumers: Vec<RingConsumer>,
}

impl InputBridge {
    #[inline]
    pub fn channels(&self) -> usize {
        self.consumers.len()
    }

    /// Fill `out` with the oldest captured samples.
    ///
    /// When a channel has fewer samples than requested the shortfall is zeroed at
    /// the front of the block and the available samples follow in order.
    pub fn render(&mut self, out: &mut AudioBuffers, flags: &mut RenderFlags) {
        let frames = out.frames();
        let mut got_any = false;

        for (ch, samples) in out.iter_mut().enumerate() {
            let Some(consumer) = self.consumers.get_mut(ch) else {
                samples.fill(0.0);
                continue;
            };

            let available = consumer.available_samples().min(frames);
            let (gap, tail) = samples.split_at_mut(frames - available);
            gap.fill(0.0);

            let read = consumer.read_samples(tail);
            tail[read..].fill(0.0);
            got_any |= read > 0;
        }

        flags.output_is_silence = !got_any;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(bridge: &mut InputBridge, channels: usize, frames: usize) -> (AudioBuffers, RenderFlags) {
        let mut out = AudioBuffers::new(channels, frames);
        let mut flags = RenderFlags::default();
        bridge.render(&mut out, &mut flags);
        (out, flags)
    }

    #[test]
    fn test_rejects_empty_shapes() {
        assert!(input_bridge(0, 16).is_err());
        assert!(matches!(input_bridge(2, 0), Err(ConfigError::ZeroBufferDepth)));
    }

    #[test]
    fn test_underrun_pads_front_with_silence() {
        let (mut capture, mut bridge) = input_bridge(1, 64).unwrap();
        capture.push_channel(0, &[1.0, 2.0, 3.0]);

        let (out, flags) = render(&mut bridge, 1, 8);

        assert_eq!(out.channel(0), &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert!(!flags.output_is_silence);
    }

    #[test]
    fn test_full_block_consumes_oldest() {
        let (mut capture, mut bridge) = input_bridge(1, 64).unwrap();
        let written: Vec<f32> = (0..10).map(|i| i as f32).collect();
        capture.push_channel(0, &written);

        let (first, _) = render(&mut bridge, 1, 4);
        assert_eq!(first.channel(0), &written[..4]);

        let (second, _) = render(&mut bridge, 1, 4);
        assert_eq!(second.channel(0), &written[4..8]);
    }

    #[test]
    fn test_empty_render_is_silent() {
        let (_capture, mut bridge) = input_bridge(2, 16).unwrap();
        let (out, flags) = render(&mut bridge, 2, 16);
        assert!(out.is_silent());
        assert!(flags.output_is_silence);
    }

    #[test]
    fn test_extra_output_channels_are_zero() {
        let (mut capture, mut bridge) = input_bridge(1, 16).unwrap();
        capture.push_channel(0, &[0.5; 4]);

        let mut out = AudioBuffers::new(2, 4);
        out.channel_mut(1).fill(9.0);
        let mut flags = RenderFlags::default();
        bridge.render(&mut out, &mut flags);

        assert_eq!(out.channel(0), &[0.5; 4]);
        assert_eq!(out.channel(1), &[0.0; 4]);
    }

    #[test]
    fn test_push_interleaved_splits_channels() {
        let (mut capture, mut bridge) = input_bridge(2, 2048).unwrap();
        // three source channels, the third is dropped
        let frames = 1000;
        let data: Vec<f32> = (0..frames)
            .flat_map(|i| [i as f32, -(i as f32), 99.0])
            .collect();
        capture.push_interleaved(&data, 3);

        let (out, _) = render(&mut bridge, 2, frames);
        assert_eq!(out.channel(0)[999], 999.0);
        assert_eq!(out.channel(1)[512], -512.0);
        assert!(out.channel(0).windows(2).all(|w| w[1] == w[0] + 1.0));
    }

    #[test]
    fn test_push_interleaved_converts() {
        let (mut capture, mut bridge) = input_bridge(1, 16).unwrap();
        capture.push_interleaved_map(&[i16::MAX, 0, i16::MIN / 2], 1, |s| {
            s as f32 / i16::MAX as f32
        });

        let (out, _) = render(&mut bridge, 1, 3);
        assert_eq!(out.channel(0)[0], 1.0);
        assert_eq!(out.channel(0)[1], 0.0);
        assert!(out.channel(0)[2] < -0.49);
    }

    #[test]
    fn test_overrun_keeps_newest() {
        let (mut capture, mut bridge) = input_bridge(1, 1024).unwrap();
        let written: Vec<f32> = (0..1200).map(|i| i as f32).collect();
        capture.push_channel(0, &written[..600]);
        capture.push_channel(0, &written[600..]);

        let (out, _) = render(&mut bridge, 1, 1024);
        assert_eq!(out.channel(0), &written[176..]);
    }
}
