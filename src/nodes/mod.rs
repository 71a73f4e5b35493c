//! Built-in nodes.
//!
//! ## Sources ([`source`])
//!
//! Units with no input buses:
//! - [`Sine`] - Sine wave oscillator with frequency/amplitude control
//!
//! ## Effects ([`effect`])
//!
//! Units that process their input buses:
//! - [`Gain`] - Volume control with smoothing
//! - [`Mixer`] - Sum several input buses with per-bus levels
//!
//! ## Graph nodes
//!
//! Built into the graph rather than written against [`AudioUnit`](crate::AudioUnit):
//! - [`tap`] - forwards audio unchanged and keeps a copy for observers
//! - [`input`] - renders what a hardware capture callback pushed
//!
//! # Message Types
//!
//! - [`SineMessage`] - Control [`Sine`] frequency and amplitude
//! - [`GainMessage`] - Control [`Gain`] level
//! - [`MixerMessage`] - Control [`Mixer`] bus levels

pub mod effect;
pub mod input;
pub mod source;
pub mod tap;

// Re-export common types at the top level for convenience
pub use effect::{Gain, GainMessage, Mixer, MixerMessage};
pub use input::{input_bridge, CaptureSide, InputBridge};
pub use source::{Sine, SineMessage};
pub use tap::{TapHandle, DEFAULT_TAP_DEPTH};
