//! Render buffers and flags

use crate::error::{RenderError, RenderResult};

/// Flags passed down a render pull and reported back up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderFlags {
    /// The rendered block is known to be digital silence
    pub output_is_silence: bool,
}

/// Non-interleaved sample storage for one render block.
///
/// Allocated once with a channel and frame capacity. A render sets how many
/// frames (and, for scratch buses, how many channels) are live without touching
/// the allocation, so these can be reused on the audio thread.
#[derive(Clone, Debug)]
pub struct AudioBuffers {
    samples: Vec<f32>,
    capacity: usize,
    max_channels: usize,
    channels: usize,
    frames: usize,
}

impl AudioBuffers {
    /// Allocate zeroed storage for `channels` channels of `capacity` frames each
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            samples: vec![0.0; channels * capacity],
            capacity,
            max_channels: channels,
            channels,
            frames: capacity,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Frames per channel the allocation can hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Set the number of live frames for the next render
    pub fn set_frames(&mut self, frames: usize) -> RenderResult {
        if frames > self.capacity {
            return Err(RenderError::BufferTooSmall {
                requested: frames,
                capacity: self.capacity,
            });
        }
        self.frames = frames;
        Ok(())
    }

    /// Set the number of live channels, clamped to what was allocated
    pub fn set_channels(&mut self, channels: usize) {
        self.channels = channels.min(self.max_channels);
    }

    /// Live frames of one channel
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        let start = channel * self.capacity;
        &self.samples[start..start + self.frames]
    }

    /// Live frames of one channel, mutably
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let start = channel * self.capacity;
        &mut self.samples[start..start + self.frames]
    }

    /// Copy the live frames of channel `from` over channel `to`
    pub fn copy_channel(&mut self, from: usize, to: usize) {
        let src = from * self.capacity;
        self.samples
            .copy_within(src..src + self.frames, to * self.capacity);
    }

    /// Iterate over the live channels
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        let frames = self.frames;
        self.samples
            .chunks(self.capacity.max(1))
            .take(self.channels)
            .map(move |ch| &ch[..frames])
    }

    /// Iterate mutably over the live channels
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let frames = self.frames;
        self.samples
            .chunks_mut(self.capacity.max(1))
            .take(self.channels)
            .map(move |ch| &mut ch[..frames])
    }

    /// Zero every live sample
    pub fn fill_silence(&mut self) {
        for ch in self.iter_mut() {
            ch.fill(0.0);
        }
    }

    /// Copy the live region of `other` into `self`, channel by channel.
    /// Channels missing from `other` are zeroed.
    pub fn copy_from(&mut self, other: &AudioBuffers) {
        let frames = self.frames.min(other.frames);
        for (ch, out) in self.iter_mut().enumerate() {
            if ch < other.channels {
                out[..frames].copy_from_slice(&other.channel(ch)[..frames]);
                out[frames..].fill(0.0);
            } else {
                out.fill(0.0);
            }
        }
    }

    /// Whether every live sample is exactly zero
    pub fn is_silent(&self) -> bool {
        self.iter().all(|ch| ch.iter().all(|&s| s == 0.0))
    }
}

/// Render digital silence into `out`.
///
/// Depends on nothing but its arguments, so any thread can call it.
pub fn render_silence(out: &mut AudioBuffers, flags: &mut RenderFlags) {
    out.fill_silence();
    flags.output_is_silence = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_frames_within_capacity() {
        let mut buffers = AudioBuffers::new(2, 256);
        assert!(buffers.set_frames(128).is_ok());
        assert_eq!(buffers.channel(1).len(), 128);

        assert_eq!(
            buffers.set_frames(512),
            Err(RenderError::BufferTooSmall {
                requested: 512,
                capacity: 256
            })
        );
        assert_eq!(buffers.frames(), 128);
    }

    #[test]
    fn test_set_channels_clamps() {
        let mut buffers = AudioBuffers::new(2, 64);
        buffers.set_channels(1);
        assert_eq!(buffers.iter().count(), 1);
        buffers.set_channels(6);
        assert_eq!(buffers.channels(), 2);
    }

    #[test]
    fn test_silence() {
        let mut buffers = AudioBuffers::new(2, 64);
        buffers.channel_mut(0).fill(0.5);
        let mut flags = RenderFlags::default();

        render_silence(&mut buffers, &mut flags);

        assert!(buffers.is_silent());
        assert!(flags.output_is_silence);
    }

    #[test]
    fn test_copy_from_zeroes_missing_channels() {
        let mut mono = AudioBuffers::new(1, 4);
        mono.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

        let mut stereo = AudioBuffers::new(2, 4);
        stereo.channel_mut(1).fill(9.0);
        stereo.copy_from(&mono);

        assert_eq!(stereo.channel(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stereo.channel(1), &[0.0; 4]);
    }
}
