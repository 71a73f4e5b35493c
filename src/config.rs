//! Graph configuration

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::nodes::tap::DEFAULT_TAP_DEPTH;

/// Sizing and timing for an [`AudioGraph`](crate::AudioGraph) / [`Patchbay`](crate::Patchbay) pair.
///
/// Everything the render thread will ever need is allocated up front from these
/// numbers, so pick them for the worst case the driver can hand you.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Sample rate of the graph in Hz
    pub sample_rate: u32,

    /// Largest frame count a single render call may request
    pub max_frames: usize,

    /// Largest channel count a bus may carry
    pub max_channels: usize,

    /// Size of the node table
    pub max_nodes: usize,

    /// Capacity of the control -> render command queue
    pub command_queue_size: usize,

    /// Samples kept per channel by a tap
    pub tap_buffer_depth: usize,

    /// Samples buffered per channel between capture and render in an input bridge
    pub input_buffer_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            max_frames: 1024,
            max_channels: 8,
            max_nodes: 256,
            command_queue_size: 256,
            tap_buffer_depth: DEFAULT_TAP_DEPTH,
            input_buffer_depth: 2048,
        }
    }
}

impl GraphConfig {
    /// Create a config at the given sample rate with default sizing
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Default::default()
        }
    }

    /// Latency of one full render block in milliseconds
    pub fn block_latency_ms(&self) -> f32 {
        (self.max_frames as f32 / self.sample_rate as f32) * 1000.0
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(ConfigError::InvalidConfig(format!(
                "sample rate {} out of range",
                self.sample_rate
            )));
        }
        if self.max_frames == 0 {
            return Err(ConfigError::InvalidConfig("max_frames must be non-zero".into()));
        }
        if self.max_channels == 0 {
            return Err(ConfigError::InvalidConfig("max_channels must be non-zero".into()));
        }
        if self.max_nodes == 0 || self.max_nodes > u32::MAX as usize {
            return Err(ConfigError::InvalidConfig(format!(
                "max_nodes {} out of range",
                self.max_nodes
            )));
        }
        if self.command_queue_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "command_queue_size must be non-zero".into(),
            ));
        }
        if self.tap_buffer_depth == 0 || self.input_buffer_depth == 0 {
            return Err(ConfigError::ZeroBufferDepth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.tap_buffer_depth, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_latency() {
        let config = GraphConfig {
            max_frames: 480,
            ..Default::default()
        };
        assert!((config.block_latency_ms() - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_validation() {
        let bad_rate = GraphConfig::with_sample_rate(100);
        assert!(bad_rate.validate().is_err());

        let no_frames = GraphConfig {
            max_frames: 0,
            ..Default::default()
        };
        assert!(no_frames.validate().is_err());

        let no_depth = GraphConfig {
            tap_buffer_depth: 0,
            ..Default::default()
        };
        assert_eq!(no_depth.validate(), Err(ConfigError::ZeroBufferDepth));
    }

    #[test]
    fn test_partial_config_from_json() {
        let config: GraphConfig =
            serde_json::from_str(r#"{ "sample_rate": 44100, "max_frames": 256 }"#).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.max_frames, 256);
        assert_eq!(config.max_channels, GraphConfig::default().max_channels);
    }
}
