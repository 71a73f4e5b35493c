//! Audio graph - owns nodes and renders them on the audio thread

use rtrb::{Consumer, Producer, PushError};
use tracing::info;

use crate::buffer::{render_silence, AudioBuffers, RenderFlags};
use crate::command::{Command, Garbage};
use crate::config::GraphConfig;
use crate::error::{ConfigResult, RenderError, RenderResult};
use crate::node::{ErasedUnit, NodeId, ProcessCallback, RenderContext, SourceBinding};
use crate::nodes::input::InputBridge;
use crate::nodes::tap::TapNode;
use crate::patchbay::Patchbay;

/// Create a connected control/render pair.
///
/// The [`Patchbay`] stays on the control thread; the [`AudioGraph`] moves to
/// whatever thread drives rendering.
pub fn new(config: GraphConfig) -> ConfigResult<(Patchbay, AudioGraph)> {
    config.validate()?;

    let (command_tx, command_rx) = rtrb::RingBuffer::new(config.command_queue_size);
    // Each applied command displaces at most one thing
    let (garbage_tx, garbage_rx) = rtrb::RingBuffer::new(config.command_queue_size * 2);

    let graph = AudioGraph {
        slots: (0..config.max_nodes).map(|_| Slot::default()).collect(),
        commands: command_rx,
        garbage: garbage_tx,
        ctx: RenderContext {
            sample_rate: config.sample_rate,
            max_frames: config.max_frames,
        },
        epoch: 0,
    };

    info!(
        sample_rate = config.sample_rate,
        max_frames = config.max_frames,
        max_nodes = config.max_nodes,
        "Audio graph created"
    );

    Ok((Patchbay::new(config, command_tx, garbage_rx), graph))
}

pub(crate) enum NodeKind {
    Unit(UnitNode),
    Tap(TapNode),
    Input(InputBridge),
}

pub(crate) struct UnitNode {
    unit: Box<dyn ErasedUnit>,
    /// One preallocated block per input bus
    inputs: Vec<AudioBuffers>,
}

impl UnitNode {
    fn render(
        &mut self,
        graph: &mut AudioGraph,
        bindings: &mut [SourceBinding],
        bus: u32,
        out: &mut AudioBuffers,
        flags: &mut RenderFlags,
    ) -> RenderResult {
        let frames = out.frames();
        for (binding, input) in bindings.iter_mut().zip(self.inputs.iter_mut()) {
            input.set_frames(frames)?;
            let mut input_flags = RenderFlags::default();
            pull(graph, binding, input, &mut input_flags)?;
        }

        flags.output_is_silence = false;
        self.unit
            .render_erased(&graph.ctx, &self.inputs, out, bus, flags)
    }
}

/// What a node produced the last time it rendered
#[derive(Clone, Copy)]
struct Rendered {
    epoch: u64,
    bus: u32,
    flags: RenderFlags,
    status: RenderResult,
}

/// A node as stored in the graph: what it is, where its inputs come from and
/// an optional post-render transformation.
pub(crate) struct Node {
    kind: NodeKind,
    bindings: Vec<SourceBinding>,
    process: Option<ProcessCallback>,
    bypassed: bool,
    /// Copy of the last rendered block, replayed to every further consumer in
    /// the same cycle
    cache: AudioBuffers,
    last: Option<Rendered>,
}

impl Node {
    fn new(kind: NodeKind, bindings: Vec<SourceBinding>, max_channels: usize, max_frames: usize) -> Self {
        Self {
            kind,
            bindings,
            process: None,
            bypassed: false,
            cache: AudioBuffers::new(max_channels, max_frames),
            last: None,
        }
    }

    pub(crate) fn unit(
        unit: Box<dyn ErasedUnit>,
        input_buses: usize,
        input_channels: usize,
        max_channels: usize,
        max_frames: usize,
    ) -> Self {
        let inputs = (0..input_buses)
            .map(|_| {
                let mut buffers = AudioBuffers::new(max_channels, max_frames);
                buffers.set_channels(input_channels);
                buffers
            })
            .collect();

        Self::new(
            NodeKind::Unit(UnitNode { unit, inputs }),
            (0..input_buses).map(|_| SourceBinding::None).collect(),
            max_channels,
            max_frames,
        )
    }

    pub(crate) fn tap(tap: TapNode, max_channels: usize, max_frames: usize) -> Self {
        Self::new(
            NodeKind::Tap(tap),
            vec![SourceBinding::None],
            max_channels,
            max_frames,
        )
    }

    pub(crate) fn input(bridge: InputBridge, max_channels: usize, max_frames: usize) -> Self {
        Self::new(NodeKind::Input(bridge), Vec::new(), max_channels, max_frames)
    }

    /// Copy out this cycle's block if `bus` was already rendered in the same shape
    fn replay(&self, epoch: u64, bus: u32, out: &mut AudioBuffers, flags: &mut RenderFlags) -> Option<RenderResult> {
        let last = self.last.filter(|last| {
            last.epoch == epoch
                && last.bus == bus
                && self.cache.channels() == out.channels()
                && self.cache.frames() == out.frames()
        })?;
        out.copy_from(&self.cache);
        *flags = last.flags;
        Some(last.status)
    }

    fn remember(&mut self, epoch: u64, bus: u32, out: &AudioBuffers, flags: RenderFlags, status: RenderResult) {
        self.cache.set_channels(out.channels());
        if self.cache.channels() != out.channels() || self.cache.set_frames(out.frames()).is_err() {
            self.last = None;
            return;
        }
        self.cache.copy_from(out);
        self.last = Some(Rendered {
            epoch,
            bus,
            flags,
            status,
        });
    }

    fn render(
        &mut self,
        graph: &mut AudioGraph,
        bus: u32,
        out: &mut AudioBuffers,
        flags: &mut RenderFlags,
    ) -> RenderResult {
        let status = match &mut self.kind {
            NodeKind::Unit(unit) if !self.bypassed => {
                unit.render(graph, &mut self.bindings, bus, out, flags)
            }
            // Taps are transparent and a bypassed unit behaves like one: whatever
            // bus is asked for, forward the source of input bus 0
            NodeKind::Unit(_) | NodeKind::Tap(_) => match self.bindings.first_mut() {
                Some(binding) => pull(graph, binding, out, flags),
                None => {
                    render_silence(out, flags);
                    Ok(())
                }
            },
            NodeKind::Input(bridge) => {
                bridge.render(out, flags);
                Ok(())
            }
        };

        if let Some(process) = self.process.as_mut() {
            process(out);
        }

        if let (NodeKind::Tap(tap), Ok(())) = (&self.kind, &status) {
            tap.capture(out);
        }

        status
    }
}

/// Render whatever `binding` points at into `out`
fn pull(
    graph: &mut AudioGraph,
    binding: &mut SourceBinding,
    out: &mut AudioBuffers,
    flags: &mut RenderFlags,
) -> RenderResult {
    flags.output_is_silence = false;
    match binding {
        SourceBinding::None => {
            render_silence(out, flags);
            Ok(())
        }
        SourceBinding::Unit { node, bus } => graph.render_node(*node, *bus, out, flags),
        SourceBinding::Callback { callback, bus, .. } => callback(*bus, out, flags),
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    node: Option<Box<Node>>,
}

/// The render side of a graph.
///
/// Owns every node. Created by [`new`] together with its [`Patchbay`]; all
/// changes arrive as commands and are applied at the top of the next
/// [`render`](Self::render), so a render never sees a half-made edit.
pub struct AudioGraph {
    slots: Vec<Slot>,
    commands: Consumer<Command>,
    garbage: Producer<Garbage>,
    ctx: RenderContext,
    /// Counts top-level renders; a node renders at most once per bus per epoch
    epoch: u64,
}

impl AudioGraph {
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.ctx.sample_rate
    }

    #[inline]
    pub fn max_frames(&self) -> usize {
        self.ctx.max_frames
    }

    /// Render `frames` frames of `bus` of `node` into `out`.
    ///
    /// This is the real-time entry point. It never blocks or allocates. Pending
    /// commands from the patchbay are applied first. Upstream failures come back
    /// unchanged; unbound inputs and removed sources render silence.
    pub fn render(
        &mut self,
        node: NodeId,
        bus: u32,
        frames: usize,
        out: &mut AudioBuffers,
        flags: &mut RenderFlags,
    ) -> RenderResult {
        self.process_commands();

        if frames > self.ctx.max_frames {
            return Err(RenderError::BufferTooSmall {
                requested: frames,
                capacity: self.ctx.max_frames,
            });
        }
        out.set_frames(frames)?;

        if self.node_mut(node).is_none() {
            return Err(RenderError::NoSuchNode(node));
        }

        *flags = RenderFlags::default();
        self.epoch = self.epoch.wrapping_add(1);
        self.render_node(node, bus, out, flags)
    }

    /// Apply every queued command. [`render`](Self::render) does this itself.
    pub fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            if let Some(garbage) = self.apply(command) {
                self.dispose(garbage);
            }
        }
    }

    fn apply(&mut self, command: Command) -> Option<Garbage> {
        match command {
            Command::Insert { id, node } => match self.slots.get_mut(id.index as usize) {
                Some(slot) => {
                    slot.generation = id.generation;
                    slot.node.replace(node).map(Garbage::Node)
                }
                None => Some(Garbage::Node(node)),
            },
            Command::Remove(id) => self.take(id).map(Garbage::Node),
            Command::Bind { node, bus, binding } => {
                match self
                    .node_mut(node)
                    .and_then(|n| n.bindings.get_mut(bus as usize))
                {
                    Some(slot) => Some(Garbage::Binding(core::mem::replace(slot, binding))),
                    None => Some(Garbage::Binding(binding)),
                }
            }
            Command::SetInputChannels {
                node,
                bus,
                channels,
            } => {
                if let Some(Node {
                    kind: NodeKind::Unit(unit),
                    ..
                }) = self.node_mut(node)
                {
                    if let Some(input) = unit.inputs.get_mut(bus as usize) {
                        input.set_channels(channels);
                    }
                }
                None
            }
            Command::SetProcessCallback { node, callback } => match self.node_mut(node) {
                Some(n) => core::mem::replace(&mut n.process, callback).map(Garbage::ProcessCallback),
                None => callback.map(Garbage::ProcessCallback),
            },
            Command::SetBypass { node, bypass } => {
                if let Some(n) = self.node_mut(node) {
                    n.bypassed = bypass;
                }
                None
            }
            Command::Reset(node) => {
                if let Some(Node {
                    kind: NodeKind::Unit(unit),
                    ..
                }) = self.node_mut(node)
                {
                    unit.unit.reset_erased();
                }
                None
            }
        }
    }

    /// Hand displaced state back to the control thread
    fn dispose(&mut self, garbage: Garbage) {
        if let Err(PushError::Full(garbage)) = self.garbage.push(garbage) {
            // Control side is not collecting; free it here
            drop(garbage);
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_deref_mut())
    }

    fn take(&mut self, id: NodeId) -> Option<Box<Node>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.take())
    }

    /// Render one node, resolving a dead or busy id to silence.
    ///
    /// The node is moved out of its slot while it renders, so a node that ends up
    /// pulling from itself sees an empty slot and gets silence. A node feeding
    /// several consumers renders once per cycle; later pulls get a copy.
    fn render_node(
        &mut self,
        id: NodeId,
        bus: u32,
        out: &mut AudioBuffers,
        flags: &mut RenderFlags,
    ) -> RenderResult {
        let Some(mut node) = self.take(id) else {
            render_silence(out, flags);
            return Ok(());
        };

        let epoch = self.epoch;
        let status = match node.replay(epoch, bus, out, flags) {
            Some(status) => status,
            None => {
                let status = node.render(self, bus, out, flags);
                node.remember(epoch, bus, out, *flags, status);
                status
            }
        };

        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            slot.node = Some(node);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Gain, Sine};
    use crate::FormatDescriptor;

    fn config() -> GraphConfig {
        GraphConfig {
            max_frames: 64,
            max_nodes: 8,
            command_queue_size: 16,
            ..Default::default()
        }
    }

    fn render(graph: &mut AudioGraph, node: NodeId, channels: usize, frames: usize) -> (AudioBuffers, RenderFlags) {
        let mut out = AudioBuffers::new(channels, 64);
        let mut flags = RenderFlags::default();
        graph.render(node, 0, frames, &mut out, &mut flags).unwrap();
        (out, flags)
    }

    #[test]
    fn test_rejects_oversized_request() {
        let (mut patchbay, mut graph) = new(config()).unwrap();
        let sine = patchbay.add_unit(Sine::new(440.0)).unwrap();

        let mut out = AudioBuffers::new(1, 128);
        let mut flags = RenderFlags::default();
        assert_eq!(
            graph.render(sine.id(), 0, 128, &mut out, &mut flags),
            Err(RenderError::BufferTooSmall {
                requested: 128,
                capacity: 64
            })
        );
    }

    #[test]
    fn test_unknown_terminal() {
        let (mut patchbay, mut graph) = new(config()).unwrap();
        let sine = patchbay.add_unit(Sine::new(440.0)).unwrap();
        patchbay.remove(sine.id()).unwrap();

        let mut out = AudioBuffers::new(1, 64);
        let mut flags = RenderFlags::default();
        assert_eq!(
            graph.render(sine.id(), 0, 64, &mut out, &mut flags),
            Err(RenderError::NoSuchNode(sine.id()))
        );
    }

    #[test]
    fn test_removed_node_returns_as_garbage() {
        let (mut patchbay, mut graph) = new(config()).unwrap();
        let sine = patchbay.add_unit(Sine::new(440.0)).unwrap();
        graph.process_commands();

        patchbay.remove(sine.id()).unwrap();
        graph.process_commands();

        assert_eq!(patchbay.collect_garbage(), 1);
    }

    #[test]
    fn test_slot_reuse_does_not_revive_old_id() {
        let (mut patchbay, mut graph) = new(GraphConfig {
            max_nodes: 1,
            ..config()
        })
        .unwrap();

        let old = patchbay.add_unit(Sine::new(440.0)).unwrap().id();
        patchbay.remove(old).unwrap();
        let new = patchbay.add_unit(Sine::new(440.0)).unwrap().id();

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);

        let (out, _) = render(&mut graph, new, 1, 64);
        assert!(!out.is_silent());

        let mut out = AudioBuffers::new(1, 64);
        let mut flags = RenderFlags::default();
        assert!(graph.render(old, 0, 64, &mut out, &mut flags).is_err());
    }

    #[test]
    fn test_held_tap_lock_keeps_primary_path() {
        let (mut patchbay, mut graph) = new(config()).unwrap();
        let sine = patchbay
            .add_unit(Sine::new(1000.0).with_amplitude(1.0))
            .unwrap();
        let tap = patchbay.add_tap(1).unwrap();
        patchbay.connect(sine.id(), tap.id(), 0, 0).unwrap();

        // Reference rendering straight from a twin oscillator
        let (mut twin_bay, mut twin_graph) = new(config()).unwrap();
        let twin = twin_bay
            .add_unit(Sine::new(1000.0).with_amplitude(1.0))
            .unwrap();
        let (expected, _) = render(&mut twin_graph, twin.id(), 1, 64);

        let guard = tap.shared.hold();
        let (out, _) = render(&mut graph, tap.id(), 1, 64);
        drop(guard);

        assert_eq!(out.channel(0), expected.channel(0));
        assert!(tap.get_samples(0).is_empty());

        render(&mut graph, tap.id(), 1, 64);
        assert_eq!(tap.get_samples(0).len(), 64);
    }

    #[test]
    fn test_input_channels_follow_source_format() {
        let (mut patchbay, mut graph) = new(config()).unwrap();
        let sine = patchbay
            .add_unit(Sine::new(440.0).with_channels(1))
            .unwrap();
        let gain = patchbay.add_unit(Gain::new(1.0).without_smoothing()).unwrap();
        patchbay.connect(sine.id(), gain.id(), 0, 0).unwrap();

        assert_eq!(
            patchbay.input_format(gain.id(), 0).unwrap(),
            Some(FormatDescriptor::f32(48000, 1))
        );

        // mono source fans out to both gain channels
        let (out, _) = render(&mut graph, gain.id(), 2, 64);
        assert_eq!(out.channel(0), out.channel(1));
        assert!(!out.is_silent());
    }
}
