//! Messages between the patchbay and the audio graph

use crate::graph::Node;
use crate::node::{NodeId, ProcessCallback, SourceBinding};

/// Control -> render. Applied at the top of the next render, in order.
pub(crate) enum Command {
    Insert {
        id: NodeId,
        node: Box<Node>,
    },
    Remove(NodeId),
    Bind {
        node: NodeId,
        bus: u32,
        binding: SourceBinding,
    },
    SetInputChannels {
        node: NodeId,
        bus: u32,
        channels: usize,
    },
    SetProcessCallback {
        node: NodeId,
        callback: Option<ProcessCallback>,
    },
    SetBypass {
        node: NodeId,
        bypass: bool,
    },
    Reset(NodeId),
}

/// Render -> control. Whatever a command displaced, so it is freed off the audio thread.
pub(crate) enum Garbage {
    Node(Box<Node>),
    Binding(SourceBinding),
    ProcessCallback(ProcessCallback),
}
