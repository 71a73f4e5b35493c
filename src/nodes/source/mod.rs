//! Audio source units (generators with no input buses)

mod sine;

pub use sine::{Sine, SineMessage};
