//! Audio effect units (processors with input buses)

mod gain;
mod mixer;

pub use gain::{Gain, GainMessage};
pub use mixer::{Mixer, MixerMessage};
