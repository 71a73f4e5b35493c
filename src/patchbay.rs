//! Control-side graph editor
//!
//! The [`Patchbay`] owns nothing the audio thread touches. It keeps a mirror of
//! the topology (formats, bindings, a `petgraph` map for cycle checks) and turns
//! every edit into [`Command`]s for the [`AudioGraph`](crate::AudioGraph).

use std::sync::Arc;

use hashbrown::HashMap;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use rtrb::{Consumer, Producer};
use tracing::{debug, info, warn};

use crate::buffer::{render_silence, AudioBuffers, RenderFlags};
use crate::command::{Command, Garbage};
use crate::config::GraphConfig;
use crate::error::{ConfigError, ConfigResult, RenderResult};
use crate::format::FormatDescriptor;
use crate::graph::Node;
use crate::node::{AudioUnit, BindingInfo, NodeId, SourceBinding, UnitWrapper};
use crate::nodes::input::{input_bridge, CaptureSide};
use crate::nodes::tap::{TapHandle, TapNode, TapShared};

/// Message queue size for units added with [`Patchbay::add_unit`]
pub const DEFAULT_MESSAGE_QUEUE_SIZE: usize = 64;

/// A handle for sending messages to a unit in the graph.
///
/// Messages are buffered in a lock-free ring buffer and drained at the start of
/// the unit's next render. If the buffer is full, [`UnitHandle::send`] returns
/// `Err(msg)` with the message that couldn't be sent.
///
/// ```
/// # use lauscher::{GraphConfig, nodes::{Sine, SineMessage}};
/// let (mut patchbay, _graph) = lauscher::new(GraphConfig::default()).unwrap();
/// let mut sine = patchbay.add_unit(Sine::new(440.0)).unwrap();
///
/// // Change frequency (applied next render)
/// sine.send(SineMessage::SetFrequency(880.0)).ok();
/// ```
pub struct UnitHandle<M: Send + 'static> {
    id: NodeId,
    sender: Producer<M>,
}

impl<M: Send + 'static> UnitHandle<M> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Queue a message for the unit.
    ///
    /// Lock-free; returns the message back if the queue is full.
    pub fn send(&mut self, msg: M) -> Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }
}

enum RecordKind {
    Unit,
    Tap(Arc<TapShared>),
    Input,
}

struct InputRecord {
    binding: BindingInfo,
    format: Option<FormatDescriptor>,
}

/// What the control side knows about a node
struct NodeRecord {
    kind: RecordKind,
    name: Option<String>,
    bypassed: bool,
    output_buses: usize,
    output_format: FormatDescriptor,
    inputs: Vec<InputRecord>,
}

impl NodeRecord {
    fn new(kind: RecordKind, input_buses: usize, output_buses: usize, output_format: FormatDescriptor) -> Self {
        Self {
            kind,
            name: None,
            bypassed: false,
            output_buses,
            output_format,
            inputs: (0..input_buses)
                .map(|_| InputRecord {
                    binding: BindingInfo::None,
                    format: None,
                })
                .collect(),
        }
    }
}

/// Builds and rewires the graph from the control thread.
///
/// Every method returns as soon as its commands are queued; the audio thread
/// applies them, in order, at the start of its next render. Rewiring a bus
/// replaces its previous source outright.
///
/// ```
/// use lauscher::{GraphConfig, AudioBuffers, RenderFlags, nodes::{Sine, Gain}};
///
/// let (mut patchbay, mut graph) = lauscher::new(GraphConfig::default()).unwrap();
/// let sine = patchbay.add_unit(Sine::new(440.0)).unwrap();
/// let gain = patchbay.add_unit(Gain::new(0.5)).unwrap();
/// let tap = patchbay.add_tap(2).unwrap();
///
/// patchbay.connect(sine.id(), gain.id(), 0, 0).unwrap();
/// patchbay.connect(gain.id(), tap.id(), 0, 0).unwrap();
///
/// // On the audio thread:
/// let mut out = AudioBuffers::new(2, 512);
/// let mut flags = RenderFlags::default();
/// graph.render(tap.id(), 0, 512, &mut out, &mut flags).unwrap();
///
/// // Anywhere else:
/// assert_eq!(tap.get_samples(0).len(), 512);
/// ```
pub struct Patchbay {
    config: GraphConfig,
    commands: Producer<Command>,
    garbage: Consumer<Garbage>,

    records: HashMap<NodeId, NodeRecord>,
    /// Source -> destination, weighted by how many buses that pair is bound on
    topology: DiGraphMap<NodeId, usize>,

    generations: Vec<u32>,
    free: Vec<u32>,
}

impl Patchbay {
    pub(crate) fn new(config: GraphConfig, commands: Producer<Command>, garbage: Consumer<Garbage>) -> Self {
        let max_nodes = config.max_nodes;
        Self {
            commands,
            garbage,
            records: HashMap::with_capacity(max_nodes),
            topology: DiGraphMap::new(),
            generations: vec![0; max_nodes],
            free: (0..max_nodes as u32).rev().collect(),
            config,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.records.contains_key(&node)
    }

    /// Add a processing unit.
    ///
    /// Returns a [`UnitHandle`] for wiring the unit and sending it messages.
    pub fn add_unit<U: AudioUnit>(&mut self, unit: U) -> ConfigResult<UnitHandle<U::Message>> {
        self.add_unit_with_queue_size(unit, DEFAULT_MESSAGE_QUEUE_SIZE)
    }

    /// Add a processing unit with a custom message queue size
    pub fn add_unit_with_queue_size<U: AudioUnit>(
        &mut self,
        unit: U,
        queue_size: usize,
    ) -> ConfigResult<UnitHandle<U::Message>> {
        if let Some(native) = unit.native_sample_rate() {
            if native != self.config.sample_rate {
                return Err(ConfigError::SampleRateMismatch {
                    native,
                    graph: self.config.sample_rate,
                });
            }
        }

        let format = FormatDescriptor::f32(self.config.sample_rate, unit.num_outputs());
        self.check_format(&format)?;

        let input_buses = unit.num_input_buses();
        let output_buses = unit.num_output_buses();
        let id = self.allocate()?;

        let (sender, receiver) = rtrb::RingBuffer::new(queue_size.max(1));
        let node = Node::unit(
            Box::new(UnitWrapper { unit, receiver }),
            input_buses,
            format.channels,
            self.config.max_channels,
            self.config.max_frames,
        );

        self.insert(
            id,
            node,
            NodeRecord::new(RecordKind::Unit, input_buses, output_buses, format),
        )?;
        debug!(node = %id, input_buses, channels = format.channels, "Unit added");

        Ok(UnitHandle { id, sender })
    }

    /// Add a capture tap with the configured default depth
    pub fn add_tap(&mut self, channels: usize) -> ConfigResult<TapHandle> {
        self.add_tap_with_depth(channels, self.config.tap_buffer_depth)
    }

    /// Add a capture tap keeping `depth` samples per channel.
    ///
    /// `channels` is the initial width; connecting a source adopts the source's.
    pub fn add_tap_with_depth(&mut self, channels: usize, depth: usize) -> ConfigResult<TapHandle> {
        let format = FormatDescriptor::f32(self.config.sample_rate, channels);
        self.check_format(&format)?;

        let shared = Arc::new(TapShared::new(channels, depth)?);
        let id = self.allocate()?;

        self.insert(
            id,
            Node::tap(
                TapNode::new(Arc::clone(&shared)),
                self.config.max_channels,
                self.config.max_frames,
            ),
            NodeRecord::new(RecordKind::Tap(Arc::clone(&shared)), 1, 1, format),
        )?;
        debug!(node = %id, channels, depth, "Tap added");

        Ok(TapHandle { id, shared })
    }

    /// Add a hardware input node.
    ///
    /// The returned [`CaptureSide`] belongs to the capture callback; the node
    /// renders whatever it pushes.
    pub fn add_input(&mut self, channels: usize) -> ConfigResult<(NodeId, CaptureSide)> {
        let format = FormatDescriptor::f32(self.config.sample_rate, channels);
        self.check_format(&format)?;

        let (capture, bridge) = input_bridge(channels, self.config.input_buffer_depth)?;
        let id = self.allocate()?;

        self.insert(
            id,
            Node::input(bridge, self.config.max_channels, self.config.max_frames),
            NodeRecord::new(RecordKind::Input, 0, 1, format),
        )?;
        debug!(node = %id, channels, "Input added");

        Ok((id, capture))
    }

    /// Remove a node.
    ///
    /// Buses bound to it render silence from then on.
    pub fn remove(&mut self, node: NodeId) -> ConfigResult<()> {
        self.record(node)?;
        self.send(Command::Remove(node))?;

        self.records.remove(&node);
        self.topology.remove_node(node);
        self.free.push(node.index);

        // The graph renders silence for these; report them as unbound
        for record in self.records.values_mut() {
            for input in &mut record.inputs {
                if matches!(input.binding, BindingInfo::Unit { node: bound, .. } if bound == node) {
                    input.binding = BindingInfo::None;
                    input.format = None;
                }
            }
        }
        info!(node = %node, "Node removed");
        Ok(())
    }

    /// Bind `source`'s output bus `source_bus` to `destination`'s input bus
    /// `destination_bus`, replacing whatever was bound there.
    ///
    /// The source's format becomes the bus's input format. If the source takes
    /// input itself but nothing live is bound to any of its buses, the bus is
    /// bound to silence instead.
    pub fn connect(
        &mut self,
        source: NodeId,
        destination: NodeId,
        destination_bus: u32,
        source_bus: u32,
    ) -> ConfigResult<()> {
        let src = self.record(source)?;
        if source_bus as usize >= src.output_buses {
            return Err(ConfigError::NoSuchBus {
                node: source,
                bus: source_bus,
            });
        }
        let format = src.output_format;
        let sourceless = !src.inputs.is_empty()
            && src.inputs.iter().all(|input| !self.is_live(&input.binding));

        self.check_input(destination, destination_bus)?;

        if source == destination
            || has_path_connecting(&self.topology, destination, source, None)
        {
            return Err(ConfigError::WouldCycle {
                upstream: source,
                downstream: destination,
            });
        }
        self.check_format(&format)?;

        if sourceless {
            warn!(
                source = %source,
                destination = %destination,
                "Source has nothing bound on any input, binding silence instead"
            );
            let channels = format.channels;
            let silence = SourceBinding::Callback {
                callback: Box::new(|_, out: &mut AudioBuffers, flags: &mut RenderFlags| {
                    render_silence(out, flags);
                    Ok(())
                }),
                bus: 0,
                channels,
            };
            return self.bind(
                destination,
                destination_bus,
                silence,
                BindingInfo::Silence { channels },
                Some(format),
            );
        }

        self.bind(
            destination,
            destination_bus,
            SourceBinding::Unit {
                node: source,
                bus: source_bus,
            },
            BindingInfo::Unit {
                node: source,
                bus: source_bus,
            },
            Some(format),
        )?;
        debug!(
            source = %source,
            source_bus,
            destination = %destination,
            destination_bus,
            "Connected"
        );
        Ok(())
    }

    /// Bind a render callback to `destination`'s input bus.
    ///
    /// The callback always receives `source_bus`, whatever bus the destination
    /// is rendered on. It produces `channels` channels at the graph's rate.
    pub fn connect_callback<F>(
        &mut self,
        callback: F,
        channels: usize,
        destination: NodeId,
        destination_bus: u32,
        source_bus: u32,
    ) -> ConfigResult<()>
    where
        F: FnMut(u32, &mut AudioBuffers, &mut RenderFlags) -> RenderResult + Send + 'static,
    {
        self.check_input(destination, destination_bus)?;
        let format = FormatDescriptor::f32(self.config.sample_rate, channels);
        self.check_format(&format)?;

        self.bind(
            destination,
            destination_bus,
            SourceBinding::Callback {
                callback: Box::new(callback),
                bus: source_bus,
                channels,
            },
            BindingInfo::Callback {
                bus: source_bus,
                channels,
            },
            Some(format),
        )?;
        debug!(destination = %destination, destination_bus, channels, "Callback connected");
        Ok(())
    }

    /// Unbind `destination`'s input bus; it renders silence until bound again
    pub fn disconnect(&mut self, destination: NodeId, bus: u32) -> ConfigResult<()> {
        self.check_input(destination, bus)?;
        self.bind(destination, bus, SourceBinding::None, BindingInfo::None, None)?;
        debug!(destination = %destination, bus, "Disconnected");
        Ok(())
    }

    /// Run `callback` on every block `node` renders, before any capture
    pub fn set_process_callback<F>(&mut self, node: NodeId, callback: F) -> ConfigResult<()>
    where
        F: FnMut(&mut AudioBuffers) + Send + 'static,
    {
        self.record(node)?;
        self.send(Command::SetProcessCallback {
            node,
            callback: Some(Box::new(callback)),
        })
    }

    pub fn clear_process_callback(&mut self, node: NodeId) -> ConfigResult<()> {
        self.record(node)?;
        self.send(Command::SetProcessCallback {
            node,
            callback: None,
        })
    }

    /// Bypass a unit: while set, it forwards whatever feeds its input bus 0
    /// instead of rendering. A unit without inputs renders silence.
    pub fn set_bypass(&mut self, node: NodeId, bypass: bool) -> ConfigResult<()> {
        self.unit_record(node)?;
        self.send(Command::SetBypass { node, bypass })?;
        if let Some(record) = self.records.get_mut(&node) {
            record.bypassed = bypass;
        }
        debug!(node = %node, bypass, "Bypass changed");
        Ok(())
    }

    pub fn is_bypassed(&self, node: NodeId) -> ConfigResult<bool> {
        Ok(self.record(node)?.bypassed)
    }

    /// Clear a unit's internal state (see [`AudioUnit::reset`]) before its next render
    pub fn reset(&mut self, node: NodeId) -> ConfigResult<()> {
        self.unit_record(node)?;
        self.send(Command::Reset(node))
    }

    pub fn set_name(&mut self, node: NodeId, name: impl Into<String>) -> ConfigResult<()> {
        let record = self
            .records
            .get_mut(&node)
            .ok_or(ConfigError::NoSuchNode(node))?;
        record.name = Some(name.into());
        Ok(())
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.records.get(&node)?.name.as_deref()
    }

    /// What `node`'s input `bus` is bound to
    pub fn source(&self, node: NodeId, bus: u32) -> ConfigResult<BindingInfo> {
        Ok(self.input(node, bus)?.binding)
    }

    /// Format last propagated onto `node`'s input `bus`, if anything is bound
    pub fn input_format(&self, node: NodeId, bus: u32) -> ConfigResult<Option<FormatDescriptor>> {
        Ok(self.input(node, bus)?.format)
    }

    /// Format `node` produces on its output buses
    pub fn output_format(&self, node: NodeId) -> ConfigResult<FormatDescriptor> {
        Ok(self.record(node)?.output_format)
    }

    /// Free everything the audio thread has handed back. Returns how many items
    /// were dropped.
    ///
    /// Call this periodically; replaced bindings and removed nodes wait here.
    pub fn collect_garbage(&mut self) -> usize {
        let mut collected = 0;
        while let Ok(garbage) = self.garbage.pop() {
            drop(garbage);
            collected += 1;
        }
        collected
    }

    fn record(&self, node: NodeId) -> ConfigResult<&NodeRecord> {
        self.records.get(&node).ok_or(ConfigError::NoSuchNode(node))
    }

    fn unit_record(&self, node: NodeId) -> ConfigResult<&NodeRecord> {
        let record = self.record(node)?;
        match record.kind {
            RecordKind::Unit => Ok(record),
            _ => Err(ConfigError::NotAUnit(node)),
        }
    }

    fn input(&self, node: NodeId, bus: u32) -> ConfigResult<&InputRecord> {
        self.record(node)?
            .inputs
            .get(bus as usize)
            .ok_or(ConfigError::NoSuchBus { node, bus })
    }

    fn check_input(&self, node: NodeId, bus: u32) -> ConfigResult<()> {
        self.input(node, bus).map(|_| ())
    }

    fn check_format(&self, format: &FormatDescriptor) -> ConfigResult<()> {
        if format.is_renderable(self.config.sample_rate, self.config.max_channels) {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedFormat(*format))
        }
    }

    /// Whether a binding will produce anything but silence for want of a source
    fn is_live(&self, binding: &BindingInfo) -> bool {
        match binding {
            BindingInfo::None => false,
            BindingInfo::Unit { node, .. } => self.records.contains_key(node),
            BindingInfo::Callback { .. } | BindingInfo::Silence { .. } => true,
        }
    }

    fn allocate(&mut self) -> ConfigResult<NodeId> {
        let index = self
            .free
            .pop()
            .ok_or(ConfigError::GraphFull(self.config.max_nodes))?;
        let generation = &mut self.generations[index as usize];
        *generation = generation.wrapping_add(1).max(1);
        Ok(NodeId {
            index,
            generation: *generation,
        })
    }

    fn insert(&mut self, id: NodeId, node: Node, record: NodeRecord) -> ConfigResult<()> {
        if let Err(err) = self.send(Command::Insert {
            id,
            node: Box::new(node),
        }) {
            self.free.push(id.index);
            return Err(err);
        }
        self.records.insert(id, record);
        self.topology.add_node(id);
        Ok(())
    }

    fn send(&mut self, command: Command) -> ConfigResult<()> {
        self.commands
            .push(command)
            .map_err(|_| ConfigError::QueueFull)
    }

    /// Queue a binding change and bring the mirror in line with it
    fn bind(
        &mut self,
        destination: NodeId,
        bus: u32,
        binding: SourceBinding,
        info: BindingInfo,
        format: Option<FormatDescriptor>,
    ) -> ConfigResult<()> {
        let record = self.record(destination)?;
        let set_channels = match (&record.kind, format) {
            (RecordKind::Unit, Some(format)) => Some(format.channels),
            _ => None,
        };

        // All or nothing
        let needed = 1 + set_channels.is_some() as usize;
        if self.commands.slots() < needed {
            return Err(ConfigError::QueueFull);
        }

        self.send(Command::Bind {
            node: destination,
            bus,
            binding,
        })?;
        if let Some(channels) = set_channels {
            self.send(Command::SetInputChannels {
                node: destination,
                bus,
                channels,
            })?;
        }

        let record = self
            .records
            .get_mut(&destination)
            .ok_or(ConfigError::NoSuchNode(destination))?;
        let input = record
            .inputs
            .get_mut(bus as usize)
            .ok_or(ConfigError::NoSuchBus {
                node: destination,
                bus,
            })?;
        let previous = core::mem::replace(&mut input.binding, info);
        input.format = format;

        let mut reshape = None;
        if let (RecordKind::Tap(shared), Some(format)) = (&record.kind, format) {
            record.output_format = format;
            if shared.channels() != format.channels {
                reshape = Some((Arc::clone(shared), format.channels));
            }
        }

        self.unlink(&previous, destination);
        self.link(&info, destination);

        if let Some((shared, channels)) = reshape {
            shared.reshape(Some(channels), None)?;
            debug!(tap = %destination, channels, "Tap capture resized to source format");
        }
        Ok(())
    }

    fn link(&mut self, binding: &BindingInfo, destination: NodeId) {
        if let BindingInfo::Unit { node, .. } = *binding {
            if !self.records.contains_key(&node) {
                return;
            }
            match self.topology.edge_weight_mut(node, destination) {
                Some(count) => *count += 1,
                None => {
                    self.topology.add_edge(node, destination, 1);
                }
            }
        }
    }

    fn unlink(&mut self, binding: &BindingInfo, destination: NodeId) {
        if let BindingInfo::Unit { node, .. } = *binding {
            let remaining = match self.topology.edge_weight_mut(node, destination) {
                Some(count) => {
                    *count -= 1;
                    *count
                }
                None => return,
            };
            if remaining == 0 {
                self.topology.remove_edge(node, destination);
            }
        }
    }
}
