//! The environment: owner of all items and keeper of the graph invariants.
//!
//! The environment owns items by value in an id-indexed table. All
//! relations between items (frame parenthood, layer parenthood, operator
//! wiring, map-to-frame attachment) live in environment-level tables, never
//! on the items themselves. Mutations raise events and drive dirty
//! propagation so derived maps can be recomputed on demand.
//!
//! A single environment is not safe for concurrent mutation; callers that
//! need parallelism partition work by environment.

mod frame_tree;
mod layer_graph;
pub(crate) mod operator_graph;

pub use operator_graph::{OperatorContext, UpdateReport};

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::event::{Event, EventHandler, HandlerId, PortRole};
use crate::frame::FrameNode;
use crate::item::{Item, ItemId};
use crate::layer::{Layer, MapData};
use crate::operator::OperatorNode;

/// The environment graph: typed item store, frame tree, layer DAG,
/// operator graph and event source.
pub struct Environment {
    prefix: String,
    last_id: u64,
    items: HashMap<ItemId, Item>,
    /// Attach order of all item ids; the basis of every deterministic
    /// iteration.
    order: Vec<ItemId>,
    root: ItemId,
    /// child frame -> parent frame
    frame_parent: HashMap<ItemId, ItemId>,
    /// (parent layer, child layer), in insertion order
    layer_edges: Vec<(ItemId, ItemId)>,
    /// (operator, input layer), in insertion order
    op_inputs: Vec<(ItemId, ItemId)>,
    /// (operator, output layer), in insertion order
    op_outputs: Vec<(ItemId, ItemId)>,
    /// cartesian map -> frame
    map_frame: HashMap<ItemId, ItemId>,
    handlers: Vec<(HandlerId, Box<dyn EventHandler>)>,
    next_handler: u64,
}

impl Environment {
    /// Create an empty environment with prefix `/` and a root frame at
    /// `/root`.
    pub fn new() -> Self {
        let root_id = ItemId::new("/root");
        let mut root = FrameNode::new("/root");
        root.meta.id = root_id.clone();

        let mut items = HashMap::new();
        items.insert(root_id.clone(), Item::Frame(root));
        Self {
            prefix: "/".to_string(),
            last_id: 0,
            items,
            order: vec![root_id.clone()],
            root: root_id,
            frame_parent: HashMap::new(),
            layer_edges: Vec::new(),
            op_inputs: Vec::new(),
            op_outputs: Vec::new(),
            map_frame: HashMap::new(),
            handlers: Vec::new(),
            next_handler: 0,
        }
    }

    // --- ids and prefix --------------------------------------------------

    /// The id prefix used when minting unique ids. Always begins and ends
    /// with `/`.
    pub fn environment_prefix(&self) -> &str {
        &self.prefix
    }

    /// Set the prefix for id generation. The prefix is normalized to begin
    /// and end with `/`. Existing ids keep their prefix.
    pub fn set_environment_prefix(&mut self, prefix: &str) {
        self.prefix = normalize_prefix(prefix);
    }

    /// Compute the final unique id for a requested id, consuming a numeric
    /// suffix when the request ends with `/`.
    fn mint_id(&mut self, requested: &str) -> Result<ItemId> {
        let base = if requested.starts_with(&self.prefix) {
            requested.to_string()
        } else {
            format!("{}{}", self.prefix, requested.trim_start_matches('/'))
        };
        if base.ends_with('/') {
            loop {
                self.last_id += 1;
                let candidate = format!("{}{}", base, self.last_id);
                if !self.items.contains_key(candidate.as_str()) {
                    return Ok(ItemId::new(candidate));
                }
            }
        }
        if self.items.contains_key(base.as_str()) {
            return Err(Error::IdCollision { id: base });
        }
        Ok(ItemId::new(base))
    }

    // --- attach / detach -------------------------------------------------

    /// Attach an item, transferring ownership to the environment.
    ///
    /// The item's requested id is turned into the final unique id: ids
    /// ending in `/` receive a fresh numeric suffix, all others are taken
    /// verbatim and collide with `IdCollision`. Cartesian map layers are
    /// bound to the root frame; use
    /// [`attach_map`](Environment::attach_map) or
    /// [`set_frame_node`](Environment::set_frame_node) to choose another
    /// frame.
    pub fn attach(&mut self, mut item: Item) -> Result<ItemId> {
        let id = self.mint_id(item.id().as_str())?;
        item.meta_mut().id = id.clone();
        let is_map = matches!(&item, Item::Layer(l) if l.map().is_some());
        let snapshot = item.clone();
        self.items.insert(id.clone(), item);
        self.order.push(id.clone());
        self.emit(Event::ItemAdded { item: snapshot });
        log::debug!("attached `{}`", id);
        if is_map {
            let root = self.root.clone();
            self.set_frame_node(&id, &root)?;
        }
        Ok(id)
    }

    /// Attach a cartesian map layer and bind it to `frame`, or to the root
    /// frame when `frame` is `None`.
    pub fn attach_map(&mut self, layer: Layer, frame: Option<&ItemId>) -> Result<ItemId> {
        if layer.map().is_none() {
            return Err(Error::TypeMismatch {
                context: format!("attach_map(`{}`)", layer.meta().id()),
                expected: "a layer with a cartesian map payload".to_string(),
                found: layer.class_name().to_string(),
            });
        }
        let frame = match frame {
            Some(f) => {
                self.frame(f)?;
                Some(f.clone())
            }
            None => None,
        };
        let id = self.attach(Item::Layer(layer))?;
        if let Some(frame) = frame {
            self.set_frame_node(&id, &frame)?;
        }
        Ok(id)
    }

    /// Attach an item under its recorded id, verbatim. Used by snapshot
    /// loading and event replay.
    pub(crate) fn attach_recorded(&mut self, item: Item) -> Result<ItemId> {
        let id = item.id().clone();
        if id.as_str().is_empty() || id.as_str().ends_with('/') {
            return Err(Error::Format(format!("invalid recorded id `{}`", id)));
        }
        if self.items.contains_key(&id) {
            return Err(Error::IdCollision {
                id: id.to_string(),
            });
        }
        let is_map = matches!(&item, Item::Layer(l) if l.map().is_some());
        let snapshot = item.clone();
        self.items.insert(id.clone(), item);
        self.order.push(id.clone());
        self.emit(Event::ItemAdded { item: snapshot });
        if is_map {
            let root = self.root.clone();
            self.set_frame_node(&id, &root)?;
        }
        Ok(id)
    }

    /// Detach an item, returning ownership to the caller. All edges
    /// touching the item are removed.
    ///
    /// Fails with `NotAttached` when the item is not in this environment,
    /// and with `HasDependents` for the root frame or a frame that still
    /// has child frames or attached maps (use
    /// [`detach_deep`](Environment::detach_deep) for those).
    pub fn detach(&mut self, id: &ItemId) -> Result<Item> {
        if !self.items.contains_key(id) {
            return Err(Error::NotAttached { id: id.to_string() });
        }
        if *id == self.root {
            return Err(Error::HasDependents {
                id: id.to_string(),
                detail: "the root frame cannot be detached".to_string(),
            });
        }
        if matches!(self.items.get(id), Some(Item::Frame(_))) {
            let children = self.frame_children(id);
            let maps = self.maps_of_frame(id);
            if !children.is_empty() || !maps.is_empty() {
                return Err(Error::HasDependents {
                    id: id.to_string(),
                    detail: format!(
                        "{} child frame(s), {} attached map(s)",
                        children.len(),
                        maps.len()
                    ),
                });
            }
        }

        // frame tree edge
        if let Some(parent) = self.frame_parent.remove(id) {
            self.emit(Event::FrameTreeEdgeRemoved {
                parent,
                child: id.clone(),
            });
        }
        // map attachment
        if self.map_frame.remove(id).is_some() {
            self.emit(Event::FrameAttachmentChanged {
                map: id.clone(),
                frame: None,
            });
        }
        // layer parenthood, both sides
        let gone: Vec<_> = self
            .layer_edges
            .iter()
            .filter(|(p, c)| p == id || c == id)
            .cloned()
            .collect();
        self.layer_edges.retain(|(p, c)| p != id && c != id);
        for (parent, child) in gone {
            self.emit(Event::LayerEdgeRemoved { parent, child });
        }
        // operator wiring, as operator or as layer
        for role in [PortRole::Input, PortRole::Output] {
            let table = match role {
                PortRole::Input => &mut self.op_inputs,
                PortRole::Output => &mut self.op_outputs,
            };
            let gone: Vec<_> = table
                .iter()
                .filter(|(op, layer)| op == id || layer == id)
                .cloned()
                .collect();
            table.retain(|(op, layer)| op != id && layer != id);
            for (op, layer) in gone {
                self.emit(Event::OperatorEdgeRemoved { op, layer, role });
            }
        }

        let item = match self.items.remove(id) {
            Some(item) => item,
            None => return Err(Error::NotAttached { id: id.to_string() }),
        };
        self.order.retain(|x| x != id);
        self.emit(Event::ItemRemoved {
            id: id.clone(),
            class_name: item.class_name().to_string(),
        });
        log::debug!("detached `{}`", id);
        Ok(item)
    }

    /// Detach an item together with everything depending on it: child
    /// frames recursively, maps attached to those frames, layer children,
    /// and the outputs generated by a detached operator.
    ///
    /// Returns the detached items with dependents first and the requested
    /// item last.
    pub fn detach_deep(&mut self, id: &ItemId) -> Result<Vec<Item>> {
        if !self.items.contains_key(id) {
            return Err(Error::NotAttached { id: id.to_string() });
        }
        if *id == self.root {
            return Err(Error::HasDependents {
                id: id.to_string(),
                detail: "the root frame cannot be detached".to_string(),
            });
        }
        let mut plan = Vec::new();
        let mut seen = HashSet::new();
        self.gather_dependents(id, &mut plan, &mut seen);
        let mut out = Vec::with_capacity(plan.len());
        for dep in plan {
            if self.items.contains_key(&dep) {
                out.push(self.detach(&dep)?);
            }
        }
        Ok(out)
    }

    fn gather_dependents(&self, id: &ItemId, plan: &mut Vec<ItemId>, seen: &mut HashSet<ItemId>) {
        if !seen.insert(id.clone()) {
            return;
        }
        let deps = match self.items.get(id) {
            Some(Item::Frame(_)) => {
                let mut deps = self.frame_children(id);
                deps.extend(self.maps_of_frame(id));
                deps
            }
            Some(Item::Layer(_)) => self.layer_children(id),
            Some(Item::Operator(_)) => self.operator_outputs(id),
            None => Vec::new(),
        };
        for dep in deps {
            self.gather_dependents(&dep, plan, seen);
        }
        plan.push(id.clone());
    }

    // --- lookup ----------------------------------------------------------

    /// The id of the root frame.
    pub fn root_frame(&self) -> &ItemId {
        &self.root
    }

    /// True when an item with this id is attached.
    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    /// Look up an item by id.
    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    /// Typed lookup of a frame node.
    pub fn frame(&self, id: &ItemId) -> Result<&FrameNode> {
        match self.items.get(id) {
            None => Err(Error::NotFound {
                what: format!("item `{}`", id),
            }),
            Some(Item::Frame(f)) => Ok(f),
            Some(other) => Err(self.kind_mismatch(id, "frame", other)),
        }
    }

    pub(crate) fn frame_mut(&mut self, id: &ItemId) -> Result<&mut FrameNode> {
        match self.items.get_mut(id) {
            None => Err(Error::NotFound {
                what: format!("item `{}`", id),
            }),
            Some(Item::Frame(f)) => Ok(f),
            Some(other) => {
                let err = Error::TypeMismatch {
                    context: format!("item `{}`", id),
                    expected: "frame".to_string(),
                    found: other.kind_name().to_string(),
                };
                Err(err)
            }
        }
    }

    /// Typed lookup of a layer.
    pub fn layer(&self, id: &ItemId) -> Result<&Layer> {
        match self.items.get(id) {
            None => Err(Error::NotFound {
                what: format!("item `{}`", id),
            }),
            Some(Item::Layer(l)) => Ok(l),
            Some(other) => Err(self.kind_mismatch(id, "layer", other)),
        }
    }

    /// Mutable typed lookup of a layer. Call
    /// [`item_modified`](Environment::item_modified) after changing map
    /// content so derived layers get marked dirty.
    pub fn layer_mut(&mut self, id: &ItemId) -> Result<&mut Layer> {
        match self.items.get_mut(id) {
            None => Err(Error::NotFound {
                what: format!("item `{}`", id),
            }),
            Some(Item::Layer(l)) => Ok(l),
            Some(other) => {
                let err = Error::TypeMismatch {
                    context: format!("item `{}`", id),
                    expected: "layer".to_string(),
                    found: other.kind_name().to_string(),
                };
                Err(err)
            }
        }
    }

    /// Typed lookup of an operator.
    pub fn operator(&self, id: &ItemId) -> Result<&OperatorNode> {
        match self.items.get(id) {
            None => Err(Error::NotFound {
                what: format!("item `{}`", id),
            }),
            Some(Item::Operator(o)) => Ok(o),
            Some(other) => Err(self.kind_mismatch(id, "operator", other)),
        }
    }

    /// Set the free-form label of an attached item.
    pub fn set_label(&mut self, id: &ItemId, label: impl Into<String>) -> Result<()> {
        match self.items.get_mut(id) {
            Some(item) => {
                item.meta_mut().set_label(label);
                Ok(())
            }
            None => Err(Error::NotAttached { id: id.to_string() }),
        }
    }

    fn kind_mismatch(&self, id: &ItemId, expected: &str, found: &Item) -> Error {
        Error::TypeMismatch {
            context: format!("item `{}`", id),
            expected: expected.to_string(),
            found: found.kind_name().to_string(),
        }
    }

    /// All item ids in attach order.
    pub fn item_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.order.iter()
    }

    /// All items in attach order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// All frame nodes in attach order.
    pub fn frames(&self) -> impl Iterator<Item = &FrameNode> {
        self.items().filter_map(Item::as_frame)
    }

    /// All layers in attach order.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.items().filter_map(Item::as_layer)
    }

    /// All operators in attach order.
    pub fn operators(&self) -> impl Iterator<Item = &OperatorNode> {
        self.items().filter_map(Item::as_operator)
    }

    /// All items carrying the given class-name tag, in attach order.
    pub fn items_of_class<'a, 'b>(&'a self, class_name: &'b str) -> impl Iterator<Item = &'a Item> + 'a
    where
        'b: 'a,
    {
        self.items().filter(move |i| i.class_name() == class_name)
    }

    /// The unique item of the given class. Fails with `NotFound` when there
    /// is none and `Ambiguous` when there are several.
    pub fn sole_item_of_class<'a>(&'a self, class_name: &'a str) -> Result<&'a Item> {
        let mut it = self.items_of_class(class_name);
        let first = it.next().ok_or_else(|| Error::NotFound {
            what: format!("item of class `{}`", class_name),
        })?;
        if it.next().is_some() {
            return Err(Error::Ambiguous {
                what: format!("class `{}`", class_name),
            });
        }
        Ok(first)
    }

    /// All layers whose payload is of type `T`, in attach order.
    pub fn layers_with<T: MapData>(&self) -> impl Iterator<Item = &Layer> {
        self.layers().filter(|l| l.map_as::<T>().is_some())
    }

    /// The unique layer whose payload is of type `T`.
    pub fn sole_layer_with<T: MapData>(&self) -> Result<&Layer> {
        let mut it = self.layers_with::<T>();
        let first = it.next().ok_or_else(|| Error::NotFound {
            what: format!("layer with payload `{}`", std::any::type_name::<T>()),
        })?;
        if it.next().is_some() {
            return Err(Error::Ambiguous {
                what: format!("layer payload `{}`", std::any::type_name::<T>()),
            });
        }
        Ok(first)
    }

    // --- events ----------------------------------------------------------

    /// Dispatch an event to all subscribed handlers, synchronously and in
    /// subscription order.
    pub(crate) fn emit(&mut self, event: Event) {
        for (_, handler) in self.handlers.iter_mut() {
            handler.on_event(&event);
        }
    }

    /// Inject an externally constructed event into the bus.
    pub fn handle(&mut self, event: Event) {
        self.emit(event);
    }

    /// Subscribe a handler. The current environment state is replayed to it
    /// first as a synthetic sequence of add events: items in delivery order
    /// (parents before children, frames before the maps attached to them,
    /// layers before the operators referencing them), then all edges.
    pub fn add_event_handler(&mut self, mut handler: Box<dyn EventHandler>) -> HandlerId {
        for event in self.synthetic_additions() {
            handler.on_event(&event);
        }
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers.push((id, handler));
        id
    }

    /// Unsubscribe a handler. The reverse synthetic sequence of remove
    /// events is delivered first, so the handler observes an empty
    /// environment. Returns the handler, or `None` for an unknown id.
    pub fn remove_event_handler(&mut self, id: HandlerId) -> Option<Box<dyn EventHandler>> {
        let pos = self.handlers.iter().position(|(h, _)| *h == id)?;
        let (_, mut handler) = self.handlers.remove(pos);
        for event in self.synthetic_removals() {
            handler.on_event(&event);
        }
        Some(handler)
    }

    /// Item ids in delivery order: frames in tree order (root first,
    /// children by attach order), rootless frames, then layers parents
    /// first, then operators. Serialization writes the manifest in this
    /// same order.
    pub(crate) fn delivery_order(&self) -> Vec<ItemId> {
        let mut out = Vec::with_capacity(self.order.len());
        let mut placed: HashSet<ItemId> = HashSet::new();

        let mut queue = VecDeque::new();
        queue.push_back(self.root.clone());
        while let Some(frame) = queue.pop_front() {
            if !placed.insert(frame.clone()) {
                continue;
            }
            for child in self.frame_children(&frame) {
                queue.push_back(child);
            }
            out.push(frame);
        }
        for id in &self.order {
            if matches!(self.items.get(id), Some(Item::Frame(_))) && !placed.contains(id) {
                placed.insert(id.clone());
                out.push(id.clone());
            }
        }

        loop {
            let mut progressed = false;
            for id in &self.order {
                if !matches!(self.items.get(id), Some(Item::Layer(_))) || placed.contains(id) {
                    continue;
                }
                let parents = self.layer_parents(id);
                if parents
                    .iter()
                    .all(|p| placed.contains(p) || !self.items.contains_key(p))
                {
                    placed.insert(id.clone());
                    out.push(id.clone());
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        for id in &self.order {
            if matches!(self.items.get(id), Some(Item::Layer(_))) && !placed.contains(id) {
                placed.insert(id.clone());
                out.push(id.clone());
            }
        }

        for id in &self.order {
            if matches!(self.items.get(id), Some(Item::Operator(_))) {
                out.push(id.clone());
            }
        }
        out
    }

    fn synthetic_additions(&self) -> Vec<Event> {
        let order = self.delivery_order();
        let mut out = Vec::new();
        for id in &order {
            if let Some(item) = self.items.get(id) {
                out.push(Event::ItemAdded { item: item.clone() });
            }
        }
        for id in &order {
            if let Some(parent) = self.frame_parent.get(id) {
                out.push(Event::FrameTreeEdgeAdded {
                    parent: parent.clone(),
                    child: id.clone(),
                });
            }
        }
        for (parent, child) in &self.layer_edges {
            out.push(Event::LayerEdgeAdded {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        for id in &order {
            if let Some(frame) = self.map_frame.get(id) {
                out.push(Event::FrameAttachmentChanged {
                    map: id.clone(),
                    frame: Some(frame.clone()),
                });
            }
        }
        for (op, layer) in &self.op_inputs {
            out.push(Event::OperatorEdgeAdded {
                op: op.clone(),
                layer: layer.clone(),
                role: PortRole::Input,
            });
        }
        for (op, layer) in &self.op_outputs {
            out.push(Event::OperatorEdgeAdded {
                op: op.clone(),
                layer: layer.clone(),
                role: PortRole::Output,
            });
        }
        out
    }

    fn synthetic_removals(&self) -> Vec<Event> {
        let mut out = Vec::new();
        for event in self.synthetic_additions().into_iter().rev() {
            out.push(match event {
                Event::ItemAdded { item } => Event::ItemRemoved {
                    id: item.id().clone(),
                    class_name: item.class_name().to_string(),
                },
                Event::FrameTreeEdgeAdded { parent, child } => {
                    Event::FrameTreeEdgeRemoved { parent, child }
                }
                Event::LayerEdgeAdded { parent, child } => {
                    Event::LayerEdgeRemoved { parent, child }
                }
                Event::FrameAttachmentChanged { map, .. } => {
                    Event::FrameAttachmentChanged { map, frame: None }
                }
                Event::OperatorEdgeAdded { op, layer, role } => {
                    Event::OperatorEdgeRemoved { op, layer, role }
                }
                other => other,
            });
        }
        out
    }

    // --- snapshot support ------------------------------------------------

    /// Rebind the root frame to a recorded id. Only valid while the root
    /// has no edges, i.e. right after construction during snapshot loading.
    pub(crate) fn rename_root(&mut self, new_id: &ItemId) -> Result<()> {
        if *new_id == self.root {
            return Ok(());
        }
        if self.items.contains_key(new_id) {
            return Err(Error::IdCollision {
                id: new_id.to_string(),
            });
        }
        let mut item = match self.items.remove(&self.root) {
            Some(item) => item,
            None => {
                return Err(Error::NotAttached {
                    id: self.root.to_string(),
                })
            }
        };
        item.meta_mut().id = new_id.clone();
        let old = std::mem::replace(&mut self.root, new_id.clone());
        self.items.insert(new_id.clone(), item);
        for slot in self.order.iter_mut() {
            if *slot == old {
                *slot = new_id.clone();
            }
        }
        Ok(())
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("prefix", &self.prefix)
            .field("items", &self.order.len())
            .field("root", &self.root)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let mut p = prefix.to_string();
    if !p.starts_with('/') {
        p.insert(0, '/');
    }
    if !p.ends_with('/') {
        p.push('/');
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameNode;

    #[test]
    fn test_new_has_root() {
        let env = Environment::new();
        assert_eq!(env.root_frame().as_str(), "/root");
        assert!(env.frame(&ItemId::new("/root")).is_ok());
        assert_eq!(env.items().count(), 1);
    }

    #[test]
    fn test_trailing_slash_mints_suffixes() {
        let mut env = Environment::new();
        let a = env.attach(FrameNode::new("foo/").into()).unwrap();
        let b = env.attach(FrameNode::new("foo/").into()).unwrap();
        assert_eq!(a.as_str(), "/foo/1");
        assert_eq!(b.as_str(), "/foo/2");
    }

    #[test]
    fn test_verbatim_id_collision() {
        let mut env = Environment::new();
        env.attach(FrameNode::new("foo").into()).unwrap();
        let err = env.attach(FrameNode::new("foo").into()).unwrap_err();
        assert!(matches!(err, Error::IdCollision { .. }));
    }

    #[test]
    fn test_prefix_normalization() {
        let mut env = Environment::new();
        env.set_environment_prefix("slam");
        assert_eq!(env.environment_prefix(), "/slam/");
        let id = env.attach(FrameNode::new("scan/").into()).unwrap();
        assert_eq!(id.as_str(), "/slam/scan/1");
    }

    #[test]
    fn test_detach_returns_item_with_final_id() {
        let mut env = Environment::new();
        let id = env.attach(FrameNode::new("f").into()).unwrap();
        let item = env.detach(&id).unwrap();
        assert_eq!(item.id(), &id);
        assert!(!env.contains(&id));

        // reattaching keeps the id: it is verbatim now
        let re = env.attach(item).unwrap();
        assert_eq!(re, id);
    }

    #[test]
    fn test_detach_missing_is_not_attached() {
        let mut env = Environment::new();
        let err = env.detach(&ItemId::new("/nope")).unwrap_err();
        assert!(matches!(err, Error::NotAttached { .. }));
    }

    #[test]
    fn test_root_cannot_be_detached() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        assert!(env.detach(&root).is_err());
        assert!(env.detach_deep(&root).is_err());
    }

    #[test]
    fn test_sole_item_of_class() {
        let mut env = Environment::new();
        // the root frame is the only frame
        assert!(env.sole_item_of_class(FrameNode::CLASS_NAME).is_ok());
        env.attach(FrameNode::new("f").into()).unwrap();
        let err = env.sole_item_of_class(FrameNode::CLASS_NAME).unwrap_err();
        assert!(matches!(err, Error::Ambiguous { .. }));
        let err = env.sole_item_of_class("kshetra::Missing").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
