//! Frame nodes of the coordinate frame tree.

use crate::core::TransformWithUncertainty;
use crate::item::ItemMeta;

/// A node of the frame tree.
///
/// Holds the transform from its own frame into its parent frame, optionally
/// with uncertainty. Parentage is maintained exclusively by the environment's
/// frame tree; a node never stores its parent.
#[derive(Clone, Debug)]
pub struct FrameNode {
    pub(crate) meta: ItemMeta,
    transform: TransformWithUncertainty,
}

impl FrameNode {
    /// Class-name tag of frame nodes.
    pub const CLASS_NAME: &'static str = "kshetra::FrameNode";

    /// Create a frame with the identity transform.
    ///
    /// `id` is the requested id; the final unique id is minted when the
    /// frame is attached to an environment.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            meta: ItemMeta::new(id.into()),
            transform: TransformWithUncertainty::identity(),
        }
    }

    /// Create a frame with the given child-to-parent transform.
    pub fn with_transform(
        id: impl Into<String>,
        transform: impl Into<TransformWithUncertainty>,
    ) -> Self {
        Self {
            meta: ItemMeta::new(id.into()),
            transform: transform.into(),
        }
    }

    /// Shared item state.
    #[inline]
    pub fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    /// Set the free-form label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.meta.set_label(label);
    }

    /// The transform from this frame into its parent frame.
    #[inline]
    pub fn transform(&self) -> &TransformWithUncertainty {
        &self.transform
    }

    /// Replace the stored transform without notifying anyone. Attached
    /// frames must be updated through
    /// [`Environment::set_transform`](crate::environment::Environment::set_transform)
    /// so that dependent layers are marked dirty.
    pub(crate) fn set_transform_raw(&mut self, transform: TransformWithUncertainty) {
        self.transform = transform;
    }
}
