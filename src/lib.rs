//! Lauscher - pull-based real-time audio graph with capture taps
//!
//! Design principles:
//! - One [`AudioGraph`] per render thread, owning every node; a [`Patchbay`]
//!   edits it from the control thread through lock-free command queues
//! - Nodes pull their inputs depth-first when rendered; unbound inputs render silence
//! - Units receive parameters via message ring buffers, not shared state
//! - Taps copy the signal for observers and skip the copy rather than wait
//! - Hardware capture reaches the graph only through per-channel ring buffers
//!
//! ```
//! use lauscher::{GraphConfig, AudioBuffers, RenderFlags, nodes::Sine};
//!
//! let (mut patchbay, mut graph) = lauscher::new(GraphConfig::default()).unwrap();
//! let sine = patchbay.add_unit(Sine::new(440.0)).unwrap();
//! let tap = patchbay.add_tap(1).unwrap();
//! patchbay.connect(sine.id(), tap.id(), 0, 0).unwrap();
//!
//! let mut out = AudioBuffers::new(1, 256);
//! let mut flags = RenderFlags::default();
//! graph.render(tap.id(), 0, 256, &mut out, &mut flags).unwrap();
//!
//! assert_eq!(tap.get_samples(0), out.channel(0));
//! ```

mod buffer;
mod command;
mod config;
mod device;
mod error;
mod format;
pub mod graph;
mod node;
pub mod nodes;
mod patchbay;
pub mod ring_buffer;

pub use buffer::{render_silence, AudioBuffers, RenderFlags};
pub use config::GraphConfig;
pub use device::{find_device, DeviceInfo, DeviceRegistry};
pub use error::{ConfigError, ConfigResult, RenderError, RenderResult};
pub use format::{FormatDescriptor, SampleEncoding};
pub use graph::{new, AudioGraph};
pub use node::{
    AudioUnit, BindingInfo, NodeId, ProcessCallback, RenderCallback, RenderContext, SourceBinding,
};
pub use nodes::{CaptureSide, InputBridge, TapHandle};
pub use patchbay::{Patchbay, UnitHandle, DEFAULT_MESSAGE_QUEUE_SIZE};
pub use ring_buffer::{RingBuffer, RingConsumer, RingProducer};

#[cfg(feature = "cpal_io")]
pub use device::{CpalInput, CpalOutput, CpalRegistry};
