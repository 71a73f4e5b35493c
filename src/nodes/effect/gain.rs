//! Gain/volume control effect

use crate::buffer::{AudioBuffers, RenderFlags};
use crate::error::RenderResult;
use crate::node::{AudioUnit, RenderContext};

/// Messages to control gain
#[derive(Clone, Copy, Debug)]
pub enum GainMessage {
    /// Set the gain multiplier (1.0 = unity, 0.0 = silence)
    SetGain(f32),
}

/// A gain (volume) control that passes audio through with amplitude scaling
///
/// One input bus. Each output channel reads the matching input channel, or the
/// last input channel when the input is narrower.
pub struct Gain {
    gain: f32,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
    channels: usize,
}

impl Gain {
    /// Create a new stereo gain node with the specified gain value
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~7ms at 48kHz
            channels: 2,
        }
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32, sample_rate: u32) -> Self {
        // Time constant: after `ms` milliseconds, we've reached ~63% of target
        let samples = (ms / 1000.0) * sample_rate as f32;
        self.smooth_coeff = (-1.0 / samples).exp();
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioUnit for Gain {
    type Message = GainMessage;

    fn render(
        &mut self,
        _ctx: &RenderContext,
        messages: impl Iterator<Item = GainMessage>,
        inputs: &[AudioBuffers],
        output: &mut AudioBuffers,
        _bus: u32,
        flags: &mut RenderFlags,
    ) -> RenderResult {
        for msg in messages {
            match msg {
                GainMessage::SetGain(g) => self.gain = g,
            }
        }

        let Some(input) = inputs.first().filter(|input| input.channels() > 0) else {
            output.fill_silence();
            flags.output_is_silence = true;
            return Ok(());
        };

        let smooth_coeff = self.smooth_coeff;
        let target_gain = self.gain;
        let mut current_gain = self.smoothed_gain;
        let last_input = input.channels() - 1;

        for (ch, out) in output.iter_mut().enumerate() {
            let samples = input.channel(ch.min(last_input));

            // Every channel starts from the same smoothed value so they track together
            let mut gain = current_gain;
            for (out_sample, &in_sample) in out.iter_mut().zip(samples.iter()) {
                gain = target_gain + smooth_coeff * (gain - target_gain);
                *out_sample = in_sample * gain;
            }

            if ch == 0 {
                current_gain = gain;
            }
        }

        self.smoothed_gain = current_gain;
        Ok(())
    }

    #[inline]
    fn num_input_buses(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }

    fn reset(&mut self) {
        self.smoothed_gain = self.gain;
    }
}
