//! Layer DAG and map-to-frame attachment.

use std::collections::HashSet;

use super::Environment;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::item::{Item, ItemId};

impl Environment {
    /// Parent layers of a layer, in edge insertion order.
    pub fn layer_parents(&self, child: &ItemId) -> Vec<ItemId> {
        self.layer_edges
            .iter()
            .filter(|(_, c)| c == child)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Child layers of a layer, in edge insertion order.
    pub fn layer_children(&self, parent: &ItemId) -> Vec<ItemId> {
        self.layer_edges
            .iter()
            .filter(|(p, _)| p == parent)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Add a parenthood edge to the layer DAG. Layers may have several
    /// parents; edges that would close a cycle are rejected.
    pub fn add_layer_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<()> {
        self.layer(parent)?;
        self.layer(child)?;
        if self.layer_edges.iter().any(|(p, c)| p == parent && c == child) {
            return Ok(());
        }
        if parent == child || self.layer_reaches(child, parent) {
            return Err(Error::GraphCycle {
                detail: format!("`{}` is reachable from `{}`", parent, child),
            });
        }
        self.layer_edges.push((parent.clone(), child.clone()));
        self.emit(Event::LayerEdgeAdded {
            parent: parent.clone(),
            child: child.clone(),
        });
        Ok(())
    }

    /// Remove a layer parenthood edge.
    pub fn remove_layer_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<()> {
        let before = self.layer_edges.len();
        self.layer_edges.retain(|(p, c)| !(p == parent && c == child));
        if self.layer_edges.len() == before {
            return Err(Error::NotFound {
                what: format!("layer edge `{}` -> `{}`", parent, child),
            });
        }
        self.emit(Event::LayerEdgeRemoved {
            parent: parent.clone(),
            child: child.clone(),
        });
        Ok(())
    }

    /// True when `to` is reachable from `from` through layer parenthood
    /// edges (parent to child direction).
    fn layer_reaches(&self, from: &ItemId, to: &ItemId) -> bool {
        let mut frontier = vec![from.clone()];
        let mut seen: HashSet<ItemId> = HashSet::new();
        while let Some(layer) = frontier.pop() {
            for child in self.layer_children(&layer) {
                if child == *to {
                    return true;
                }
                if seen.insert(child.clone()) {
                    frontier.push(child);
                }
            }
        }
        false
    }

    /// All layer parenthood edges as (parent, child), in insertion order.
    pub fn layer_edge_table(&self) -> impl Iterator<Item = (&ItemId, &ItemId)> {
        self.layer_edges.iter().map(|(p, c)| (p, c))
    }

    /// The frame a cartesian map is attached to.
    pub fn frame_of_map(&self, map: &ItemId) -> Option<&ItemId> {
        self.map_frame.get(map)
    }

    /// Drop a map's frame attachment. Emits `FrameAttachmentChanged` with
    /// no frame. Used by event replay; regular code keeps invariant 4 by
    /// replacing attachments instead.
    pub(crate) fn clear_frame_attachment(&mut self, map: &ItemId) -> Result<()> {
        if self.map_frame.remove(map).is_none() {
            return Err(Error::NotFound {
                what: format!("frame attachment of map `{}`", map),
            });
        }
        self.emit(Event::FrameAttachmentChanged {
            map: map.clone(),
            frame: None,
        });
        Ok(())
    }

    /// The maps attached to a frame, in attach order.
    pub fn maps_of_frame(&self, frame: &ItemId) -> Vec<ItemId> {
        self.order
            .iter()
            .filter(|id| self.map_frame.get(*id) == Some(frame))
            .cloned()
            .collect()
    }

    /// Attach a cartesian map to a frame, replacing any previous
    /// attachment. Emits `FrameAttachmentChanged`.
    pub fn set_frame_node(&mut self, map: &ItemId, frame: &ItemId) -> Result<()> {
        match self.items.get(map) {
            None => {
                return Err(Error::NotAttached {
                    id: map.to_string(),
                })
            }
            Some(Item::Layer(l)) if l.map().is_some() => {}
            Some(other) => {
                return Err(Error::TypeMismatch {
                    context: format!("item `{}`", map),
                    expected: "a layer with a cartesian map payload".to_string(),
                    found: other.class_name().to_string(),
                })
            }
        }
        self.frame(frame)?;
        self.map_frame.insert(map.clone(), frame.clone());
        self.emit(Event::FrameAttachmentChanged {
            map: map.clone(),
            frame: Some(frame.clone()),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;

    #[test]
    fn test_layer_dag_multiple_parents() {
        let mut env = Environment::new();
        let a = env.attach(Layer::new("a").into()).unwrap();
        let b = env.attach(Layer::new("b").into()).unwrap();
        let c = env.attach(Layer::new("c").into()).unwrap();
        env.add_layer_child(&a, &c).unwrap();
        env.add_layer_child(&b, &c).unwrap();
        assert_eq!(env.layer_parents(&c), vec![a.clone(), b.clone()]);
        assert_eq!(env.layer_children(&a), vec![c.clone()]);
    }

    #[test]
    fn test_layer_cycle_rejected() {
        let mut env = Environment::new();
        let a = env.attach(Layer::new("a").into()).unwrap();
        let b = env.attach(Layer::new("b").into()).unwrap();
        let c = env.attach(Layer::new("c").into()).unwrap();
        env.add_layer_child(&a, &b).unwrap();
        env.add_layer_child(&b, &c).unwrap();
        let err = env.add_layer_child(&c, &a).unwrap_err();
        assert!(matches!(err, Error::GraphCycle { .. }));
        assert!(env.add_layer_child(&a, &a).is_err());
    }

    #[test]
    fn test_duplicate_layer_edge_is_noop() {
        let mut env = Environment::new();
        let a = env.attach(Layer::new("a").into()).unwrap();
        let b = env.attach(Layer::new("b").into()).unwrap();
        env.add_layer_child(&a, &b).unwrap();
        env.add_layer_child(&a, &b).unwrap();
        assert_eq!(env.layer_children(&a).len(), 1);
    }

    #[test]
    fn test_remove_missing_layer_edge() {
        let mut env = Environment::new();
        let a = env.attach(Layer::new("a").into()).unwrap();
        let b = env.attach(Layer::new("b").into()).unwrap();
        assert!(env.remove_layer_child(&a, &b).is_err());
    }

    #[test]
    fn test_plain_layer_cannot_attach_to_frame() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let a = env.attach(Layer::new("a").into()).unwrap();
        let err = env.set_frame_node(&a, &root).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }
}
