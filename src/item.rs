//! Item identity and the tagged item variant stored by the environment.
//!
//! Every node of the environment graph (frame, layer, operator) is an
//! [`Item`]. Ownership is by value: the environment holds items in its own
//! table, and external handles are [`ItemId`]s resolved through the
//! environment. Detaching hands the item back to the caller by value.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::FrameNode;
use crate::layer::Layer;
use crate::operator::OperatorNode;

/// Environment-scoped string handle of an item.
///
/// Shape: `<prefix><local>[<numeric-suffix>]`, e.g. `/slam/grid/3`. Ids are
/// minted at attach time; see
/// [`Environment::attach`](crate::environment::Environment::attach).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wrap a string id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything up to and including the last `/`.
    pub fn prefix(&self) -> &str {
        match self.0.rfind('/') {
            Some(pos) => &self.0[..=pos],
            None => "",
        }
    }

    /// The last path segment.
    pub fn suffix(&self) -> &str {
        match self.0.rfind('/') {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }

    /// The last path segment parsed as a number.
    ///
    /// Fails when the item was attached with a verbatim (non trailing-slash)
    /// id whose last segment is not numeric.
    pub fn numeric_suffix(&self) -> Result<u64> {
        self.suffix().parse().map_err(|_| Error::Format(format!(
            "id `{}` has no numeric suffix",
            self.0
        )))
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ItemId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// State shared by all item kinds: the id and a free-form label.
#[derive(Clone, Debug)]
pub struct ItemMeta {
    pub(crate) id: ItemId,
    pub(crate) label: String,
}

impl ItemMeta {
    pub(crate) fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
        }
    }

    /// The item's id. Before attachment this is the requested id; attaching
    /// replaces it with the minted unique id.
    #[inline]
    pub fn id(&self) -> &ItemId {
        &self.id
    }

    /// Free-form, non-unique label.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Set the free-form label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }
}

/// A node of the environment graph.
#[derive(Clone, Debug)]
pub enum Item {
    /// A coordinate frame.
    Frame(FrameNode),
    /// A map container.
    Layer(Layer),
    /// A computation over layers.
    Operator(OperatorNode),
}

impl Item {
    /// Shared item state.
    pub fn meta(&self) -> &ItemMeta {
        match self {
            Item::Frame(f) => &f.meta,
            Item::Layer(l) => &l.meta,
            Item::Operator(o) => &o.meta,
        }
    }

    pub(crate) fn meta_mut(&mut self) -> &mut ItemMeta {
        match self {
            Item::Frame(f) => &mut f.meta,
            Item::Layer(l) => &mut l.meta,
            Item::Operator(o) => &mut o.meta,
        }
    }

    /// The item's id.
    #[inline]
    pub fn id(&self) -> &ItemId {
        &self.meta().id
    }

    /// The item's label.
    #[inline]
    pub fn label(&self) -> &str {
        self.meta().label()
    }

    /// Class-name tag used by the serialization registry.
    pub fn class_name(&self) -> &str {
        match self {
            Item::Frame(_) => FrameNode::CLASS_NAME,
            Item::Layer(l) => l.class_name(),
            Item::Operator(o) => o.class_name(),
        }
    }

    /// Coarse kind name, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Item::Frame(_) => "frame",
            Item::Layer(_) => "layer",
            Item::Operator(_) => "operator",
        }
    }

    /// View as a frame node.
    pub fn as_frame(&self) -> Option<&FrameNode> {
        match self {
            Item::Frame(f) => Some(f),
            _ => None,
        }
    }

    /// View as a layer.
    pub fn as_layer(&self) -> Option<&Layer> {
        match self {
            Item::Layer(l) => Some(l),
            _ => None,
        }
    }

    /// View as an operator.
    pub fn as_operator(&self) -> Option<&OperatorNode> {
        match self {
            Item::Operator(o) => Some(o),
            _ => None,
        }
    }

    /// Polymorphic assignment: replace this item's state with a copy of
    /// `other`, keeping the own id. Fails with `TypeMismatch` when the class
    /// names differ.
    pub fn assign_from(&mut self, other: &Item) -> Result<()> {
        if self.class_name() != other.class_name() {
            return Err(Error::TypeMismatch {
                context: format!("assign to `{}`", self.id()),
                expected: self.class_name().to_string(),
                found: other.class_name().to_string(),
            });
        }
        let id = self.meta().id.clone();
        *self = other.clone();
        self.meta_mut().id = id;
        Ok(())
    }
}

impl From<FrameNode> for Item {
    fn from(f: FrameNode) -> Self {
        Item::Frame(f)
    }
}

impl From<Layer> for Item {
    fn from(l: Layer) -> Self {
        Item::Layer(l)
    }
}

impl From<OperatorNode> for Item {
    fn from(o: OperatorNode) -> Self {
        Item::Operator(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transform;

    #[test]
    fn test_id_parts() {
        let id = ItemId::new("/slam/grid/3");
        assert_eq!(id.prefix(), "/slam/grid/");
        assert_eq!(id.suffix(), "3");
        assert_eq!(id.numeric_suffix().unwrap(), 3);
    }

    #[test]
    fn test_non_numeric_suffix_fails() {
        let id = ItemId::new("/slam/grid");
        assert!(id.numeric_suffix().is_err());
    }

    #[test]
    fn test_assign_keeps_id() {
        let mut a: Item = FrameNode::new("a").into();
        let mut b = FrameNode::new("b");
        b.set_transform_raw(Transform::from_translation([1.0, 0.0, 0.0]).into());
        b.meta.set_label("moved");
        let b: Item = b.into();

        a.assign_from(&b).unwrap();
        assert_eq!(a.id().as_str(), "a");
        assert_eq!(a.label(), "moved");
        let t = a.as_frame().unwrap().transform().transform;
        assert_eq!(t.translation[0], 1.0);
    }

    #[test]
    fn test_assign_rejects_kind_mismatch() {
        let mut a: Item = FrameNode::new("a").into();
        let b: Item = Layer::new("b").into();
        assert!(a.assign_from(&b).is_err());
    }
}
