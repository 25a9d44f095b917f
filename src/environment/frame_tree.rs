//! Frame tree: parenthood edges and relative-transform queries.

use std::collections::HashSet;

use super::Environment;
use crate::core::{Transform, TransformWithUncertainty};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::item::{Item, ItemId};

impl Environment {
    /// Parent of a frame, or `None` for the root and rootless frames.
    pub fn frame_parent_of(&self, child: &ItemId) -> Option<&ItemId> {
        self.frame_parent.get(child)
    }

    /// Child frames of a frame, in attach order.
    pub fn frame_children(&self, parent: &ItemId) -> Vec<ItemId> {
        self.order
            .iter()
            .filter(|id| self.frame_parent.get(*id) == Some(parent))
            .cloned()
            .collect()
    }

    /// Make `child` a child frame of `parent`.
    ///
    /// Both frames must be attached; the child must currently have no
    /// parent. An edge that would close a cycle is rejected.
    pub fn add_frame_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<()> {
        self.frame(parent)?;
        self.frame(child)?;
        if let Some(existing) = self.frame_parent.get(child) {
            return Err(Error::AlreadyAttached {
                id: child.to_string(),
                detail: format!("already a child of `{}`", existing),
            });
        }
        if *child == self.root {
            return Err(Error::GraphCycle {
                detail: "the root frame cannot become a child".to_string(),
            });
        }
        if parent == child || self.frame_ancestors(parent).contains(child) {
            return Err(Error::GraphCycle {
                detail: format!("`{}` is an ancestor of `{}`", child, parent),
            });
        }
        self.frame_parent.insert(child.clone(), parent.clone());
        self.emit(Event::FrameTreeEdgeAdded {
            parent: parent.clone(),
            child: child.clone(),
        });
        Ok(())
    }

    /// Remove the edge between `parent` and `child`, leaving the child
    /// rootless. The caller must reattach or detach it.
    pub fn remove_frame_child(&mut self, parent: &ItemId, child: &ItemId) -> Result<()> {
        if self.frame_parent.get(child) != Some(parent) {
            return Err(Error::NotFound {
                what: format!("frame tree edge `{}` -> `{}`", parent, child),
            });
        }
        self.frame_parent.remove(child);
        self.emit(Event::FrameTreeEdgeRemoved {
            parent: parent.clone(),
            child: child.clone(),
        });
        Ok(())
    }

    fn frame_ancestors(&self, id: &ItemId) -> HashSet<ItemId> {
        let mut out = HashSet::new();
        let mut cur = id.clone();
        while let Some(parent) = self.frame_parent.get(&cur) {
            if !out.insert(parent.clone()) {
                break;
            }
            cur = parent.clone();
        }
        out
    }

    /// The stored child-to-parent transform of a frame.
    pub fn transform_of(&self, frame: &ItemId) -> Result<&TransformWithUncertainty> {
        Ok(self.frame(frame)?.transform())
    }

    /// Replace a frame's transform.
    ///
    /// Emits `TransformChanged` and marks every layer derived from a map
    /// attached to this frame as dirty.
    pub fn set_transform(
        &mut self,
        frame: &ItemId,
        transform: impl Into<TransformWithUncertainty>,
    ) -> Result<()> {
        let transform = transform.into();
        self.frame_mut(frame)?.set_transform_raw(transform);
        self.emit(Event::TransformChanged {
            frame: frame.clone(),
            transform,
        });
        let seeds = self.maps_of_frame(frame);
        self.mark_derived_dirty(seeds);
        Ok(())
    }

    /// Transform mapping coordinates in `from` to coordinates in `to`.
    ///
    /// Walks both frames to their lowest common ancestor and composes
    /// child-to-parent transforms up from `from`, then inverse-composes
    /// down to `to`. When one frame lies on the other's path to the root it
    /// is the common ancestor itself.
    pub fn relative_transform(&self, from: &ItemId, to: &ItemId) -> Result<Transform> {
        let (up, down) = self.lca_chains(from, to)?;
        let mut u = Transform::identity();
        for id in &up {
            u = self.frame(id)?.transform().transform.compose(&u);
        }
        let mut d = Transform::identity();
        for id in &down {
            d = self.frame(id)?.transform().transform.compose(&d);
        }
        Ok(d.inverse().compose(&u))
    }

    /// Like [`relative_transform`](Environment::relative_transform), but
    /// propagating uncertainty linearized at each composition.
    pub fn relative_transform_with_uncertainty(
        &self,
        from: &ItemId,
        to: &ItemId,
    ) -> Result<TransformWithUncertainty> {
        let (up, down) = self.lca_chains(from, to)?;
        let mut u = TransformWithUncertainty::identity();
        for id in &up {
            u = self.frame(id)?.transform().compose(&u);
        }
        let mut d = TransformWithUncertainty::identity();
        for id in &down {
            d = self.frame(id)?.transform().compose(&d);
        }
        Ok(d.inverse().compose(&u))
    }

    /// Relative transform between the frames of two cartesian maps.
    pub fn relative_transform_between_maps(
        &self,
        from_map: &ItemId,
        to_map: &ItemId,
    ) -> Result<Transform> {
        let from = self.attached_frame(from_map)?;
        let to = self.attached_frame(to_map)?;
        self.relative_transform(&from, &to)
    }

    fn attached_frame(&self, map: &ItemId) -> Result<ItemId> {
        match self.items.get(map) {
            None => Err(Error::NotFound {
                what: format!("item `{}`", map),
            }),
            Some(Item::Layer(_)) => {
                self.frame_of_map(map)
                    .cloned()
                    .ok_or_else(|| Error::NotFound {
                        what: format!("frame attachment of map `{}`", map),
                    })
            }
            Some(other) => Err(Error::TypeMismatch {
                context: format!("item `{}`", map),
                expected: "layer".to_string(),
                found: other.kind_name().to_string(),
            }),
        }
    }

    /// Chains `[from .. lca)` and `[to .. lca)`, exclusive of the common
    /// ancestor.
    fn lca_chains(&self, from: &ItemId, to: &ItemId) -> Result<(Vec<ItemId>, Vec<ItemId>)> {
        self.frame(from)?;
        self.frame(to)?;
        let mut from_chain = vec![from.clone()];
        let mut cur = from.clone();
        while let Some(parent) = self.frame_parent.get(&cur) {
            from_chain.push(parent.clone());
            cur = parent.clone();
        }
        let from_set: HashSet<&ItemId> = from_chain.iter().collect();

        let mut down = Vec::new();
        let mut cur = to.clone();
        while !from_set.contains(&cur) {
            down.push(cur.clone());
            match self.frame_parent.get(&cur) {
                Some(parent) => cur = parent.clone(),
                None => {
                    return Err(Error::NotFound {
                        what: format!("common ancestor of `{}` and `{}`", from, to),
                    })
                }
            }
        }
        let lca = cur;
        let up = from_chain
            .into_iter()
            .take_while(|id| *id != lca)
            .collect();
        Ok((up, down))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameNode;

    fn frame_with_translation(id: &str, t: [f64; 3]) -> FrameNode {
        FrameNode::with_transform(id, Transform::from_translation(t))
    }

    #[test]
    fn test_child_to_parent_transform() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let f1 = env
            .attach(frame_with_translation("f1", [1.0, 0.0, 0.0]).into())
            .unwrap();
        env.add_frame_child(&root, &f1).unwrap();

        let t = env.relative_transform(&f1, &root).unwrap();
        assert!((t.translation[0] - 1.0).abs() < 1e-12);
        assert!((t.translation[1]).abs() < 1e-12);
    }

    #[test]
    fn test_relative_transform_self_is_identity() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let f1 = env
            .attach(frame_with_translation("f1", [3.0, -2.0, 1.0]).into())
            .unwrap();
        env.add_frame_child(&root, &f1).unwrap();
        let t = env.relative_transform(&f1, &f1).unwrap();
        assert!(t.is_approx(&Transform::identity(), 1e-12));
    }

    #[test]
    fn test_relative_transform_across_siblings() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let a = env
            .attach(frame_with_translation("a", [1.0, 0.0, 0.0]).into())
            .unwrap();
        let b = env
            .attach(frame_with_translation("b", [0.0, 2.0, 0.0]).into())
            .unwrap();
        env.add_frame_child(&root, &a).unwrap();
        env.add_frame_child(&root, &b).unwrap();

        // a -> root -> b: point at a's origin sits at (1, -2) in b
        let t = env.relative_transform(&a, &b).unwrap();
        let p = t.apply([0.0, 0.0, 0.0]);
        assert!((p[0] - 1.0).abs() < 1e-12);
        assert!((p[1] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_relative_transform_composes() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let a = env
            .attach(frame_with_translation("a", [1.0, 0.0, 0.0]).into())
            .unwrap();
        let b = env
            .attach(frame_with_translation("b", [0.0, 1.0, 0.0]).into())
            .unwrap();
        let c = env
            .attach(frame_with_translation("c", [0.0, 0.0, 1.0]).into())
            .unwrap();
        env.add_frame_child(&root, &a).unwrap();
        env.add_frame_child(&a, &b).unwrap();
        env.add_frame_child(&b, &c).unwrap();

        let ab = env.relative_transform(&a, &b).unwrap();
        let bc = env.relative_transform(&b, &c).unwrap();
        let ac = env.relative_transform(&a, &c).unwrap();
        assert!(bc.compose(&ab).is_approx(&ac, 1e-10));
    }

    #[test]
    fn test_second_parent_rejected() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let a = env.attach(FrameNode::new("a").into()).unwrap();
        let b = env.attach(FrameNode::new("b").into()).unwrap();
        env.add_frame_child(&root, &a).unwrap();
        env.add_frame_child(&root, &b).unwrap();
        let err = env.add_frame_child(&a, &b).unwrap_err();
        assert!(matches!(err, Error::AlreadyAttached { .. }));
    }

    #[test]
    fn test_frame_cycle_rejected() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let a = env.attach(FrameNode::new("a").into()).unwrap();
        let b = env.attach(FrameNode::new("b").into()).unwrap();
        env.add_frame_child(&root, &a).unwrap();
        env.add_frame_child(&a, &b).unwrap();
        // b is a descendant of a; a can no longer become b's child
        env.remove_frame_child(&root, &a).unwrap();
        let err = env.add_frame_child(&b, &a).unwrap_err();
        assert!(matches!(err, Error::GraphCycle { .. }));
    }

    #[test]
    fn test_rootless_frame_has_no_relative_transform() {
        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let a = env.attach(FrameNode::new("a").into()).unwrap();
        let err = env.relative_transform(&a, &root).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_uncertainty_grows_along_chain() {
        use crate::core::Covariance;

        let mut env = Environment::new();
        let root = env.root_frame().clone();
        let cov = Covariance::diagonal([0.0; 3], [0.01, 0.01, 0.01]);
        let a = env
            .attach(
                FrameNode::with_transform(
                    "a",
                    TransformWithUncertainty::with_covariance(
                        Transform::from_translation([1.0, 0.0, 0.0]),
                        cov,
                    ),
                )
                .into(),
            )
            .unwrap();
        let b = env
            .attach(
                FrameNode::with_transform(
                    "b",
                    TransformWithUncertainty::with_covariance(
                        Transform::from_translation([1.0, 0.0, 0.0]),
                        cov,
                    ),
                )
                .into(),
            )
            .unwrap();
        env.add_frame_child(&root, &a).unwrap();
        env.add_frame_child(&a, &b).unwrap();

        let t = env.relative_transform_with_uncertainty(&b, &root).unwrap();
        let p = t.covariance.expect("uncertainty must propagate");
        // two independent translations along x: variances add
        assert!((p.as_array()[3 * 6 + 3] - 0.02).abs() < 1e-12);
    }
}
