//! Core unit trait, node ids and source bindings.

use core::fmt;

use rtrb::Consumer;

use crate::buffer::{AudioBuffers, RenderFlags};
use crate::error::RenderResult;

/// Information available during rendering.
///
/// Passed to every [`AudioUnit::render`] call.
#[derive(Clone, Copy, Debug)]
pub struct RenderContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Largest frame count any render call will ask for
    pub max_frames: usize,
}

/// Unique identifier for a node within a graph.
///
/// A slot index plus the generation the slot had when the node was inserted.
/// Once a node is removed its id never resolves again, even after the slot is
/// reused, so a stale binding simply renders silence.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// A processing unit that lives inside the graph.
///
/// Units can be:
/// - **Generators**: no input buses - oscillators, players
/// - **Effects**: one input bus - gain, filters
/// - **Mixers**: several input buses summed or combined
///
/// The graph pulls every input bus into a preallocated buffer before calling
/// [`render`](Self::render), so a unit only ever sees finished input blocks.
///
/// # Message-Based Parameters
///
/// Parameters are changed by messages rather than shared state. Define a message
/// type and drain it at the start of `render()`:
///
/// ```
/// use lauscher::{AudioBuffers, AudioUnit, RenderContext, RenderFlags, RenderResult};
///
/// enum ToneMessage {
///     SetFrequency(f32),
/// }
///
/// struct Tone {
///     frequency: f32,
///     phase: f32,
/// }
///
/// impl AudioUnit for Tone {
///     type Message = ToneMessage;
///
///     fn render(
///         &mut self,
///         ctx: &RenderContext,
///         messages: impl Iterator<Item = ToneMessage>,
///         _inputs: &[AudioBuffers],
///         output: &mut AudioBuffers,
///         _bus: u32,
///         _flags: &mut RenderFlags,
///     ) -> RenderResult {
///         for msg in messages {
///             match msg {
///                 ToneMessage::SetFrequency(f) => self.frequency = f,
///             }
///         }
///
///         let inc = self.frequency / ctx.sample_rate as f32;
///         for ch in output.iter_mut() {
///             let mut phase = self.phase;
///             for sample in ch.iter_mut() {
///                 *sample = (phase * core::f32::consts::TAU).sin();
///                 phase = (phase + inc) % 1.0;
///             }
///         }
///         self.phase = (self.phase + inc * output.frames() as f32) % 1.0;
///         Ok(())
///     }
/// }
/// ```
pub trait AudioUnit: Send + 'static {
    /// Message type for parameter updates.
    ///
    /// Use a custom enum for units with parameters, or `()` for units without.
    type Message: Send + 'static;

    /// Render one block for output `bus`.
    ///
    /// `inputs` holds one buffer per input bus, already rendered for this block.
    /// `output` has the frame count of the request and the channel count of the
    /// bus it feeds. Return `Err(RenderError::Status(..))` to report a failure;
    /// it is passed to the caller unchanged.
    fn render(
        &mut self,
        ctx: &RenderContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[AudioBuffers],
        output: &mut AudioBuffers,
        bus: u32,
        flags: &mut RenderFlags,
    ) -> RenderResult;

    /// Number of input buses (0 for generators).
    fn num_input_buses(&self) -> usize {
        0
    }

    /// Number of output buses.
    fn num_output_buses(&self) -> usize {
        1
    }

    /// Channels produced on each output bus.
    fn num_outputs(&self) -> usize {
        1
    }

    /// Native sample rate of this unit, if it has one.
    ///
    /// Units with a fixed rate should return `Some(rate)`; adding one to a graph
    /// running at a different rate is refused.
    fn native_sample_rate(&self) -> Option<u32> {
        None
    }

    /// Clear internal state (phase, smoothing, delay lines) without touching
    /// parameters.
    ///
    /// Called on the audio thread between renders, so it must not allocate or block.
    fn reset(&mut self) {}
}

/// Source bound to a node's input bus by [`Patchbay::connect_callback`](crate::Patchbay::connect_callback).
///
/// Called with the source bus fixed at bind time, the output to fill and the flags.
pub type RenderCallback =
    Box<dyn FnMut(u32, &mut AudioBuffers, &mut RenderFlags) -> RenderResult + Send>;

/// In-place transformation applied to a node's rendered block, before any capture.
pub type ProcessCallback = Box<dyn FnMut(&mut AudioBuffers) + Send>;

/// Where an input bus gets its audio from.
///
/// Exactly one variant is active per (node, bus).
pub enum SourceBinding {
    None,
    Unit {
        node: NodeId,
        bus: u32,
    },
    Callback {
        callback: RenderCallback,
        bus: u32,
        channels: usize,
    },
}

impl SourceBinding {
    /// Control-side summary of this binding
    pub(crate) fn info(&self) -> BindingInfo {
        match self {
            SourceBinding::None => BindingInfo::None,
            SourceBinding::Unit { node, bus } => BindingInfo::Unit {
                node: *node,
                bus: *bus,
            },
            SourceBinding::Callback { bus, channels, .. } => BindingInfo::Callback {
                bus: *bus,
                channels: *channels,
            },
        }
    }
}

impl fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.info().fmt(f)
    }
}

/// What a bus is bound to, as reported by [`Patchbay::source`](crate::Patchbay::source).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingInfo {
    None,
    Unit { node: NodeId, bus: u32 },
    Callback { bus: u32, channels: usize },
    /// Substituted for a source that had nothing bound itself
    Silence { channels: usize },
}

// Type-erased wrapper so the graph can store heterogeneous units
pub(crate) trait ErasedUnit: Send {
    fn render_erased(
        &mut self,
        ctx: &RenderContext,
        inputs: &[AudioBuffers],
        output: &mut AudioBuffers,
        bus: u32,
        flags: &mut RenderFlags,
    ) -> RenderResult;

    fn reset_erased(&mut self);
}

pub(crate) struct UnitWrapper<U: AudioUnit> {
    pub(crate) unit: U,
    pub(crate) receiver: Consumer<U::Message>,
}

impl<U: AudioUnit> ErasedUnit for UnitWrapper<U> {
    fn render_erased(
        &mut self,
        ctx: &RenderContext,
        inputs: &[AudioBuffers],
        output: &mut AudioBuffers,
        bus: u32,
        flags: &mut RenderFlags,
    ) -> RenderResult {
        // Split borrow: the message iterator holds the receiver while the unit renders
        let receiver = &mut self.receiver;
        let unit = &mut self.unit;

        let messages = core::iter::from_fn(|| receiver.pop().ok());
        unit.render(ctx, messages, inputs, output, bus, flags)
    }

    fn reset_erased(&mut self) {
        self.unit.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let id = NodeId {
            index: 3,
            generation: 7,
        };
        assert_eq!(id.to_string(), "#3v7");
    }

    #[test]
    fn test_binding_info() {
        let binding = SourceBinding::Callback {
            callback: Box::new(|_, _, _| Ok(())),
            bus: 2,
            channels: 1,
        };
        assert_eq!(
            binding.info(),
            BindingInfo::Callback {
                bus: 2,
                channels: 1
            }
        );
        assert_eq!(SourceBinding::None.info(), BindingInfo::None);
    }
}
