//! Error types for the control and render paths.

use thiserror::Error;

use crate::format::FormatDescriptor;
use crate::node::NodeId;

/// Errors surfaced on the control thread while building or reconfiguring the graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Node not found: {0}")]
    NoSuchNode(NodeId),

    #[error("Node {0} is not a processing unit")]
    NotAUnit(NodeId),

    #[error("Node {node} has no bus {bus}")]
    NoSuchBus { node: NodeId, bus: u32 },

    #[error("Connecting {upstream} to {downstream} would create a cycle")]
    WouldCycle { upstream: NodeId, downstream: NodeId },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(FormatDescriptor),

    #[error("Unit runs at {native} Hz but the graph runs at {graph} Hz")]
    SampleRateMismatch { native: u32, graph: u32 },

    #[error("Command queue full - render thread is not draining")]
    QueueFull,

    #[error("Graph full ({0} nodes)")]
    GraphFull(usize),

    #[error("Ring buffer capacity must be a non-zero multiple of {0} bytes")]
    InvalidCapacity(usize),

    #[error("Buffer depth must be greater than zero")]
    ZeroBufferDepth,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Input device not configured")]
    NotConfigured,
}

/// Errors returned from a render pull.
///
/// These never allocate, so they can be created and propagated on the audio thread.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderError {
    /// Non-zero status reported by a unit or render callback.
    #[error("Render failed with status {0}")]
    Status(i32),

    #[error("Output buffer holds {capacity} frames but {requested} were requested")]
    BufferTooSmall { requested: usize, capacity: usize },

    #[error("Node not found: {0}")]
    NoSuchNode(NodeId),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub type RenderResult = Result<(), RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::DeviceNotFound("Built-in Microphone".into());
        assert!(err.to_string().contains("Built-in Microphone"));

        let err = RenderError::BufferTooSmall { requested: 512, capacity: 256 };
        assert!(err.to_string().contains("512"));
        assert!(err.to_string().contains("256"));
    }

    #[test]
    fn test_render_error_is_copy() {
        let err = RenderError::Status(-50);
        let forwarded = err;
        assert_eq!(err, forwarded);
    }
}
