//! Event bus: graph mutation notifications.
//!
//! Every mutation of an [`Environment`](crate::environment::Environment)
//! raises an [`Event`] that is dispatched synchronously, in FIFO order, to
//! all subscribed handlers. Subscribing replays the current environment
//! state as a synthetic sequence of add events; unsubscribing replays the
//! reverse sequence so the handler observes an empty environment.

pub mod binary;

use crate::core::TransformWithUncertainty;
use crate::item::{Item, ItemId};

pub use binary::{BinaryEvent, BinaryEventRecorder};

/// Side of an operator edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortRole {
    /// The layer is consumed by the operator.
    Input,
    /// The layer is produced by the operator.
    Output,
}

impl PortRole {
    /// Lower-case name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            PortRole::Input => "input",
            PortRole::Output => "output",
        }
    }
}

/// A graph mutation notification.
#[derive(Debug)]
pub enum Event {
    /// An item was attached. Carries a snapshot of the item at attach time
    /// so handlers (and replay) can reconstruct it.
    ItemAdded { item: Item },
    /// An item was detached.
    ItemRemoved { id: ItemId, class_name: String },
    /// An item's content was modified in place.
    ItemModified { id: ItemId },
    /// A frame became the child of another frame.
    FrameTreeEdgeAdded { parent: ItemId, child: ItemId },
    /// A frame tree edge was removed; the child is rootless afterwards.
    FrameTreeEdgeRemoved { parent: ItemId, child: ItemId },
    /// A layer became the child of another layer.
    LayerEdgeAdded { parent: ItemId, child: ItemId },
    /// A layer parenthood edge was removed.
    LayerEdgeRemoved { parent: ItemId, child: ItemId },
    /// A layer was wired as input or output of an operator.
    OperatorEdgeAdded {
        op: ItemId,
        layer: ItemId,
        role: PortRole,
    },
    /// An operator edge was removed.
    OperatorEdgeRemoved {
        op: ItemId,
        layer: ItemId,
        role: PortRole,
    },
    /// A cartesian map was attached to a frame (`Some`) or detached from
    /// its frame (`None`).
    FrameAttachmentChanged {
        map: ItemId,
        frame: Option<ItemId>,
    },
    /// A frame's transform was replaced.
    TransformChanged {
        frame: ItemId,
        transform: TransformWithUncertainty,
    },
}

/// Observer of environment mutations.
pub trait EventHandler {
    /// Receive one event. Delivery is synchronous; the environment is
    /// mid-mutation, so handlers must not call back into it.
    fn on_event(&mut self, event: &Event);
}

/// Handle identifying a subscription, returned by
/// [`Environment::add_event_handler`](crate::environment::Environment::add_event_handler).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Handler collecting every event as a compact one-line summary.
///
/// Clones share the same store, so a clone kept by the caller still sees
/// everything delivered to the clone subscribed to the environment.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// One compact line per received event.
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

impl EventHandler for EventLog {
    fn on_event(&mut self, event: &Event) {
        let line = match event {
            Event::ItemAdded { item } => format!("add {}", item.id()),
            Event::ItemRemoved { id, .. } => format!("remove {}", id),
            Event::ItemModified { id } => format!("modify {}", id),
            Event::FrameTreeEdgeAdded { parent, child } => {
                format!("frame-edge {} -> {}", parent, child)
            }
            Event::FrameTreeEdgeRemoved { parent, child } => {
                format!("frame-unedge {} -> {}", parent, child)
            }
            Event::LayerEdgeAdded { parent, child } => {
                format!("layer-edge {} -> {}", parent, child)
            }
            Event::LayerEdgeRemoved { parent, child } => {
                format!("layer-unedge {} -> {}", parent, child)
            }
            Event::OperatorEdgeAdded { op, layer, role } => {
                format!("op-{} {} -> {}", role.name(), op, layer)
            }
            Event::OperatorEdgeRemoved { op, layer, role } => {
                format!("op-un{} {} -> {}", role.name(), op, layer)
            }
            Event::FrameAttachmentChanged { map, frame } => match frame {
                Some(frame) => format!("attach {} @ {}", map, frame),
                None => format!("unattach {}", map),
            },
            Event::TransformChanged { frame, .. } => format!("transform {}", frame),
        };
        self.entries.borrow_mut().push(line);
    }
}
