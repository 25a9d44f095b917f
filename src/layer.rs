//! Layers: map containers with metadata and update state.
//!
//! A [`Layer`] is the unit the operator graph works on. It carries an
//! `immutable` flag (write-once), a `dirty` flag driven by change
//! propagation, a heterogeneous metadata dictionary, and an optional
//! cartesian map payload implementing [`MapData`].

use std::any::Any;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::Extents;
use crate::error::{Error, Result};
use crate::item::ItemMeta;

/// Payload contract for cartesian map data stored inside a layer.
///
/// Map types live outside the engine; they plug in through this trait plus a
/// factory registered with the
/// [`ClassRegistry`](crate::io::registry::ClassRegistry). The engine itself
/// only needs the class name, the spatial queries, and the payload codec.
pub trait MapData: Any {
    /// Class-name tag, e.g. `kshetra::ElevationGrid`.
    fn class_name(&self) -> &'static str;

    /// Dimension of the cartesian space (2 or 3).
    fn dimension(&self) -> u32;

    /// Axis-aligned extents in map coordinates.
    fn extents(&self) -> Extents;

    /// Extension of the payload file, e.g. `grid.bin`.
    fn file_extension(&self) -> &'static str;

    /// Extensions accepted when reading snapshots written under an earlier
    /// class name.
    fn legacy_file_extensions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Write the payload to a binary-or-text stream, as defined by the map
    /// type's own codec.
    fn write_payload(&self, w: &mut dyn Write) -> Result<()>;

    /// Replace this payload with data read from a stream.
    fn read_payload(&mut self, r: &mut dyn Read) -> Result<()>;

    /// Class-specific header data stored in the manifest next to the id.
    fn manifest_data(&self) -> serde_yaml::Value {
        serde_yaml::Value::Null
    }

    /// Clone into a fresh box.
    fn clone_box(&self) -> Box<dyn MapData>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn MapData> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A value type storable in the layer metadata dictionary.
///
/// The label is the runtime type tag: it travels with the value into
/// snapshots, and the registry maps it back to a decoder on load. Labels
/// must therefore be stable across builds.
pub trait MetaEntry: Any + Clone + Default + Serialize + DeserializeOwned {
    /// Stable runtime type tag.
    const TYPE_LABEL: &'static str;
}

impl MetaEntry for bool {
    const TYPE_LABEL: &'static str = "bool";
}
impl MetaEntry for i64 {
    const TYPE_LABEL: &'static str = "i64";
}
impl MetaEntry for u64 {
    const TYPE_LABEL: &'static str = "u64";
}
impl MetaEntry for f64 {
    const TYPE_LABEL: &'static str = "f64";
}
impl MetaEntry for String {
    const TYPE_LABEL: &'static str = "string";
}
impl MetaEntry for Vec<f64> {
    const TYPE_LABEL: &'static str = "f64_list";
}
impl MetaEntry for Vec<String> {
    const TYPE_LABEL: &'static str = "string_list";
}
impl MetaEntry for Vec<[f64; 3]> {
    const TYPE_LABEL: &'static str = "vec3_list";
}

/// Type-erased metadata holder.
pub(crate) trait MetaHolder: Any {
    fn type_label(&self) -> &'static str;
    fn clone_box(&self) -> Box<dyn MetaHolder>;
    fn to_yaml(&self) -> Option<serde_yaml::Value>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct Holder<T: MetaEntry>(pub T);

impl<T: MetaEntry> MetaHolder for Holder<T> {
    fn type_label(&self) -> &'static str {
        T::TYPE_LABEL
    }

    fn clone_box(&self) -> Box<dyn MetaHolder> {
        Box::new(Holder(self.0.clone()))
    }

    fn to_yaml(&self) -> Option<serde_yaml::Value> {
        serde_yaml::to_value(&self.0).ok()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Decode a metadata value of type `T` from its manifest form. Registered
/// per type label in the class registry.
pub(crate) fn decode_holder<T: MetaEntry>(value: &serde_yaml::Value) -> Result<Box<dyn MetaHolder>> {
    let v: T = serde_yaml::from_value(value.clone())?;
    Ok(Box::new(Holder(v)))
}

/// Replace `/` so an id can be used as a file stem.
pub(crate) fn sanitize_id(id: &str) -> String {
    id.replace('/', "_")
}

/// A map container in the environment graph.
pub struct Layer {
    pub(crate) meta: ItemMeta,
    immutable: bool,
    dirty: bool,
    metadata: BTreeMap<String, Box<dyn MetaHolder>>,
    map: Option<Box<dyn MapData>>,
}

impl Layer {
    /// Class-name tag of plain container layers (no payload).
    pub const CLASS_NAME: &'static str = "kshetra::Layer";

    /// Create a plain layer with no map payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            meta: ItemMeta::new(id.into()),
            immutable: false,
            dirty: false,
            metadata: BTreeMap::new(),
            map: None,
        }
    }

    /// Create a cartesian map layer around a payload.
    pub fn with_map(id: impl Into<String>, map: Box<dyn MapData>) -> Self {
        Self {
            meta: ItemMeta::new(id.into()),
            immutable: false,
            dirty: false,
            metadata: BTreeMap::new(),
            map: Some(map),
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

    /// Class-name tag: the payload's class, or [`Layer::CLASS_NAME`] for
    /// plain containers.
    pub fn class_name(&self) -> &str {
        match &self.map {
            Some(m) => m.class_name(),
            None => Self::CLASS_NAME,
        }
    }

    /// True if this layer cannot be changed by any means.
    #[inline]
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Mark this layer immutable. Write-once: there is no way back, as
    /// operators may depend on it.
    pub fn set_immutable(&mut self) {
        self.immutable = true;
    }

    /// True when this layer is generated and its sources have changed since
    /// the last regeneration.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark this layer dirty.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty flag.
    pub fn reset_dirty(&mut self) {
        self.dirty = false;
    }

    // --- map payload -----------------------------------------------------

    /// The map payload, if this layer is a cartesian map.
    pub fn map(&self) -> Option<&dyn MapData> {
        self.map.as_deref()
    }

    /// Mutable payload access. Call
    /// [`Environment::item_modified`](crate::environment::Environment::item_modified)
    /// after content changes so derived layers get marked dirty.
    pub fn map_mut(&mut self) -> Option<&mut dyn MapData> {
        match &mut self.map {
            Some(m) => Some(m.as_mut()),
            None => None,
        }
    }

    /// Typed payload view.
    pub fn map_as<T: MapData>(&self) -> Option<&T> {
        self.map.as_ref().and_then(|m| m.as_any().downcast_ref())
    }

    /// Typed mutable payload view.
    pub fn map_as_mut<T: MapData>(&mut self) -> Option<&mut T> {
        self.map
            .as_mut()
            .and_then(|m| m.as_any_mut().downcast_mut())
    }

    /// Dimension of the payload's cartesian space, if any.
    pub fn dimension(&self) -> Option<u32> {
        self.map.as_ref().map(|m| m.dimension())
    }

    /// Extents of the payload, if any.
    pub fn extents(&self) -> Option<Extents> {
        self.map.as_ref().map(|m| m.extents())
    }

    /// Suggested payload file path when persisting this layer under `dir`.
    ///
    /// The file stem is the unique id with `/` replaced by `_`; the
    /// extension comes from the payload, or from `class_override` for
    /// snapshots written under a legacy class name.
    pub fn map_file_name(&self, dir: &Path, class_override: Option<&str>) -> Option<PathBuf> {
        let map = self.map.as_ref()?;
        let stem = sanitize_id(self.meta.id.as_str());
        let ext = class_override.unwrap_or_else(|| map.file_extension());
        Some(dir.join(format!("{}.{}", stem, ext)))
    }

    /// Resolve the payload file to read under `dir`, accepting legacy
    /// extensions for compatibility.
    pub(crate) fn existing_map_file(&self, dir: &Path) -> Option<PathBuf> {
        let map = self.map.as_ref()?;
        let primary = self.map_file_name(dir, None)?;
        if primary.exists() {
            return Some(primary);
        }
        for ext in map.legacy_file_extensions() {
            let candidate = self.map_file_name(dir, Some(ext))?;
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    // --- metadata --------------------------------------------------------

    /// True when metadata exists under `key` with the type `T`.
    pub fn has_data<T: MetaEntry>(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .map(|h| h.as_any().is::<Holder<T>>())
            .unwrap_or(false)
    }

    /// True when any metadata exists under `key`.
    pub fn has_data_key(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    /// Metadata under `key`. Fails with `NotFound` on miss and
    /// `TypeMismatch` when the stored value has a different type.
    pub fn data<T: MetaEntry>(&self, key: &str) -> Result<&T> {
        let holder = self.metadata.get(key).ok_or_else(|| Error::NotFound {
            what: format!("metadata `{}` on layer `{}`", key, self.meta.id),
        })?;
        match holder.as_any().downcast_ref::<Holder<T>>() {
            Some(h) => Ok(&h.0),
            None => Err(self.meta_mismatch::<T>(key, holder.type_label())),
        }
    }

    /// Mutable metadata under `key`, created with `T::default()` on miss.
    /// Fails with `TypeMismatch` when an existing value has a different
    /// type.
    pub fn data_mut<T: MetaEntry>(&mut self, key: &str) -> Result<&mut T> {
        if let Some(existing) = self.metadata.get(key) {
            if !existing.as_any().is::<Holder<T>>() {
                return Err(self.meta_mismatch::<T>(key, existing.type_label()));
            }
        }
        let holder = self
            .metadata
            .entry(key.to_string())
            .or_insert_with(|| Box::new(Holder(T::default())));
        match holder.as_any_mut().downcast_mut::<Holder<T>>() {
            Some(h) => Ok(&mut h.0),
            None => Err(Error::TypeMismatch {
                context: format!("metadata `{}`", key),
                expected: T::TYPE_LABEL.to_string(),
                found: "an unexpected holder".to_string(),
            }),
        }
    }

    fn meta_mismatch<T: MetaEntry>(&self, key: &str, found: &str) -> Error {
        Error::TypeMismatch {
            context: format!("metadata `{}` on layer `{}`", key, self.meta.id),
            expected: T::TYPE_LABEL.to_string(),
            found: found.to_string(),
        }
    }

    /// Remove metadata under `key`. Returns whether an entry existed.
    pub fn remove_data(&mut self, key: &str) -> bool {
        self.metadata.remove(key).is_some()
    }

    /// Remove all metadata.
    pub fn clear_data(&mut self) {
        self.metadata.clear();
    }

    /// Metadata keys in lexical order.
    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.metadata.keys().map(|k| k.as_str())
    }

    /// (key, type label, manifest value) triples for snapshotting.
    pub(crate) fn metadata_entries(
        &self,
    ) -> impl Iterator<Item = (&str, &'static str, Option<serde_yaml::Value>)> {
        self.metadata
            .iter()
            .map(|(k, h)| (k.as_str(), h.type_label(), h.to_yaml()))
    }

    pub(crate) fn insert_metadata_raw(&mut self, key: String, holder: Box<dyn MetaHolder>) {
        self.metadata.insert(key, holder);
    }
}

impl Clone for Layer {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            immutable: self.immutable,
            dirty: self.dirty,
            metadata: self
                .metadata
                .iter()
                .map(|(k, h)| (k.clone(), h.clone_box()))
                .collect(),
            map: self.map.clone(),
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.meta.id)
            .field("class", &self.class_name())
            .field("immutable", &self.immutable)
            .field("dirty", &self.dirty)
            .field("metadata_keys", &self.metadata.keys().collect::<Vec<_>>())
            .finish()
    }
}
