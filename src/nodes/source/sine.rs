//! Sine wave oscillator

use crate::buffer::{AudioBuffers, RenderFlags};
use crate::error::RenderResult;
use crate::node::{AudioUnit, RenderContext};

/// Messages to control a Sine oscillator
#[derive(Clone, Copy, Debug)]
pub enum SineMessage {
    SetFrequency(f32),
    SetAmplitude(f32),
}

/// A sine wave oscillator.
///
/// Generator with no input buses; the same signal is written to every output channel.
pub struct Sine {
    frequency: f32,
    phase: f32,
    amplitude: f32,
    channels: usize,
}

impl Sine {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            phase: 0.0,
            amplitude: 0.25, // -12dB, safe default
            channels: 1,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

impl AudioUnit for Sine {
    type Message = SineMessage;

    fn render(
        &mut self,
        ctx: &RenderContext,
        messages: impl Iterator<Item = SineMessage>,
        _inputs: &[AudioBuffers],
        output: &mut AudioBuffers,
        _bus: u32,
        _flags: &mut RenderFlags,
    ) -> RenderResult {
        for msg in messages {
            match msg {
                SineMessage::SetFrequency(f) => self.frequency = f.max(0.0),
                SineMessage::SetAmplitude(a) => self.amplitude = a.clamp(0.0, 1.0),
            }
        }

        if output.channels() == 0 {
            return Ok(());
        }

        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let amplitude = self.amplitude;

        for sample in output.channel_mut(0).iter_mut() {
            *sample = (self.phase * core::f32::consts::TAU).sin() * amplitude;

            self.phase += phase_inc;
            // Branchless phase wrap (phase is always positive)
            self.phase -= (self.phase >= 1.0) as u32 as f32;
        }

        // Copy to remaining output channels (if any)
        for ch in 1..output.channels() {
            output.copy_channel(0, ch);
        }

        Ok(())
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        RenderContext {
            sample_rate: 48000,
            max_frames: 480,
        }
    }

    #[test]
    fn test_sine_starts_at_zero_and_peaks() {
        let mut sine = Sine::new(100.0).with_amplitude(1.0);
        let mut out = AudioBuffers::new(1, 480);
        let mut flags = RenderFlags::default();

        sine.render(&ctx(), core::iter::empty(), &[], &mut out, 0, &mut flags)
            .unwrap();

        // 480 samples at 100 Hz is exactly one cycle
        assert_eq!(out.channel(0)[0], 0.0);
        assert!((out.channel(0)[120] - 1.0).abs() < 1e-4);
        assert!((out.channel(0)[360] + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_reset_restarts_phase() {
        let mut sine = Sine::new(440.0).with_amplitude(1.0);
        let mut first = AudioBuffers::new(1, 64);
        let mut again = AudioBuffers::new(1, 64);
        let mut flags = RenderFlags::default();

        sine.render(&ctx(), core::iter::empty(), &[], &mut first, 0, &mut flags)
            .unwrap();
        sine.reset();
        sine.render(&ctx(), core::iter::empty(), &[], &mut again, 0, &mut flags)
            .unwrap();

        assert_eq!(first.channel(0), again.channel(0));
    }

    #[test]
    fn test_sine_fills_every_channel() {
        let mut sine = Sine::new(440.0).with_channels(2);
        let mut out = AudioBuffers::new(2, 64);
        let mut flags = RenderFlags::default();

        sine.render(&ctx(), core::iter::empty(), &[], &mut out, 0, &mut flags)
            .unwrap();

        assert_eq!(out.channel(0), out.channel(1));
        assert!(!out.is_silent());
        assert_eq!(sine.num_outputs(), 2);
    }

    #[test]
    fn test_messages_applied_before_render() {
        let mut sine = Sine::new(440.0);
        let mut out = AudioBuffers::new(1, 64);
        let mut flags = RenderFlags::default();

        sine.render(
            &ctx(),
            [SineMessage::SetAmplitude(0.0), SineMessage::SetFrequency(-5.0)].into_iter(),
            &[],
            &mut out,
            0,
            &mut flags,
        )
        .unwrap();

        assert!(out.is_silent());
        assert_eq!(sine.frequency(), 0.0);
    }
}
