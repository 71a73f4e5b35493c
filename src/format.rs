//! Stream format descriptors

use core::fmt;

use serde::{Deserialize, Serialize};

/// How samples are encoded on a bus.
///
/// The graph renders non-interleaved `f32` only; other encodings show up when
/// describing hardware formats and are rejected at connection time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    F32,
    I16,
    U16,
}

impl SampleEncoding {
    /// Size of one sample in bytes
    pub const fn sample_size(self) -> usize {
        match self {
            SampleEncoding::F32 => 4,
            SampleEncoding::I16 | SampleEncoding::U16 => 2,
        }
    }
}

/// Sample rate, channel count and encoding for one bus
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub sample_rate: u32,
    pub channels: usize,
    pub encoding: SampleEncoding,
}

impl FormatDescriptor {
    /// Non-interleaved `f32`, the format the graph renders in
    pub const fn f32(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            encoding: SampleEncoding::F32,
        }
    }

    /// Bytes needed to hold `frames` frames of a single channel
    pub const fn bytes_per_channel(&self, frames: usize) -> usize {
        frames * self.encoding.sample_size()
    }

    /// Whether a graph running at `sample_rate` with at most `max_channels`
    /// channels per bus can render this format
    pub fn is_renderable(&self, sample_rate: u32, max_channels: usize) -> bool {
        self.encoding == SampleEncoding::F32
            && self.sample_rate == sample_rate
            && self.channels > 0
            && self.channels <= max_channels
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz, {} ch, {:?}", self.sample_rate, self.channels, self.encoding)
    }
}
