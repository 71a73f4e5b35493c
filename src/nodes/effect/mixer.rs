//! Mixer effect - sums multiple input buses together

use crate::buffer::{AudioBuffers, RenderFlags};
use crate::error::RenderResult;
use crate::node::{AudioUnit, RenderContext};

/// Messages to control a mixer
#[derive(Clone, Copy, Debug)]
pub enum MixerMessage {
    /// Set the level of one input bus
    SetLevel { bus: usize, level: f32 },
}

/// A mixer that sums its input buses together
///
/// Each bus has its own level, unity by default. The output has `channels`
/// channels. A mono input is copied to every output channel; a wider input's
/// extra channels are ignored.
pub struct Mixer {
    channels: usize,
    levels: Vec<f32>,
}

impl Mixer {
    /// Create a mixer with `buses` input buses and `channels` output channels
    pub fn new(buses: usize, channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            levels: vec![1.0; buses],
        }
    }

    /// Create a stereo mixer
    pub fn stereo(buses: usize) -> Self {
        Self::new(buses, 2)
    }

    /// Create a mono mixer
    pub fn mono(buses: usize) -> Self {
        Self::new(buses, 1)
    }

    pub fn level(&self, bus: usize) -> Option<f32> {
        self.levels.get(bus).copied()
    }
}

impl AudioUnit for Mixer {
    type Message = MixerMessage;

    fn render(
        &mut self,
        _ctx: &RenderContext,
        messages: impl Iterator<Item = MixerMessage>,
        inputs: &[AudioBuffers],
        output: &mut AudioBuffers,
        _bus: u32,
        flags: &mut RenderFlags,
    ) -> RenderResult {
        for msg in messages {
            match msg {
                MixerMessage::SetLevel { bus, level } => {
                    if let Some(l) = self.levels.get_mut(bus) {
                        *l = level;
                    }
                }
            }
        }

        output.fill_silence();

        let mut silent = true;
        for (input, &level) in inputs.iter().zip(self.levels.iter()) {
            let input_channels = input.channels();
            if input_channels == 0 || level == 0.0 {
                continue;
            }

            for (out_ch, out) in output.iter_mut().enumerate() {
                let in_ch = if input_channels == 1 {
                    0
                } else {
                    out_ch.min(input_channels - 1)
                };

                for (out_sample, in_sample) in out.iter_mut().zip(input.channel(in_ch)) {
                    *out_sample += *in_sample * level;
                }
            }
            silent = false;
        }

        flags.output_is_silence = silent;
        Ok(())
    }

    fn num_input_buses(&self) -> usize {
        self.levels.len()
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: RenderContext = RenderContext {
        sample_rate: 48000,
        max_frames: 8,
    };

    fn constant(channels: usize, value: f32) -> AudioBuffers {
        let mut buffers = AudioBuffers::new(channels, 8);
        for ch in buffers.iter_mut() {
            ch.fill(value);
        }
        buffers
    }

    #[test]
    fn test_sums_buses() {
        let mut mixer = Mixer::stereo(2);
        let inputs = [constant(1, 0.25), constant(2, 0.5)];
        let mut out = AudioBuffers::new(2, 8);
        let mut flags = RenderFlags::default();

        mixer
            .render(&CTX, core::iter::empty(), &inputs, &mut out, 0, &mut flags)
            .unwrap();

        assert_eq!(out.channel(0), &[0.75; 8]);
        assert_eq!(out.channel(1), &[0.75; 8]);
        assert!(!flags.output_is_silence);
    }

    #[test]
    fn test_levels() {
        let mut mixer = Mixer::mono(2);
        let inputs = [constant(1, 1.0), constant(1, 1.0)];
        let mut out = AudioBuffers::new(1, 8);
        let mut flags = RenderFlags::default();

        mixer
            .render(
                &CTX,
                [
                    MixerMessage::SetLevel { bus: 1, level: 0.0 },
                    MixerMessage::SetLevel { bus: 9, level: 0.5 },
                ]
                .into_iter(),
                &inputs,
                &mut out,
                0,
                &mut flags,
            )
            .unwrap();

        assert_eq!(out.channel(0), &[1.0; 8]);
        assert_eq!(mixer.level(1), Some(0.0));
        assert_eq!(mixer.level(9), None);
        assert_eq!(mixer.num_input_buses(), 2);
    }
}
