//! Process-wide class registry for item factories and metadata codecs.
//!
//! Every item type that appears in snapshots or event streams registers a
//! factory under its class-name tag. Registration is idempotent: the same
//! name with the same factory is a no-op; the same name with a different
//! factory fails with `FactoryConflict`. Built-in classes register on first
//! registry access.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::core::TransformWithUncertainty;
use crate::error::{Error, Result};
use crate::frame::FrameNode;
use crate::item::{Item, ItemId};
use crate::layer::{decode_holder, Layer, MetaEntry, MetaHolder};

/// One metadata entry in an item record: key, runtime type tag, value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRecord {
    pub key: String,
    #[serde(rename = "type")]
    pub type_label: String,
    pub value: serde_yaml::Value,
}

/// Serialized form of an item: the manifest entry and the `ItemAdded`
/// payload of binary event streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub class: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub immutable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetaRecord>,
    #[serde(default, skip_serializing_if = "serde_yaml::Value::is_null")]
    pub data: serde_yaml::Value,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Serialized form of a transform with optional covariance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TransformRecord {
    pub rotation: [f64; 4],
    pub translation: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<crate::core::Covariance>,
}

impl TransformRecord {
    pub fn from_transform(t: &TransformWithUncertainty) -> Self {
        let q = t.transform.rotation;
        Self {
            rotation: [q.w, q.x, q.y, q.z],
            translation: t.transform.translation,
            covariance: t.covariance,
        }
    }

    pub fn to_transform(&self) -> TransformWithUncertainty {
        let [w, x, y, z] = self.rotation;
        let transform = crate::core::Transform::new(
            crate::core::Quaternion { w, x, y, z }.normalized(),
            self.translation,
        );
        TransformWithUncertainty {
            transform,
            covariance: self.covariance,
        }
    }
}

/// Factory producing a fresh item from its record. The engine fills in the
/// id, label, immutability and metadata afterwards; the factory only needs
/// to build the class-specific skeleton from `record.data`.
pub type ItemFactory = fn(&ItemRecord) -> Result<Item>;

type MetaDecoder = fn(&serde_yaml::Value) -> Result<Box<dyn MetaHolder>>;

/// Class-name to factory map, plus metadata type codecs.
pub struct ClassRegistry {
    items: BTreeMap<String, ItemFactory>,
    metadata: BTreeMap<&'static str, MetaDecoder>,
}

static GLOBAL: OnceLock<Mutex<ClassRegistry>> = OnceLock::new();

impl ClassRegistry {
    fn with_builtins() -> Self {
        let mut r = Self {
            items: BTreeMap::new(),
            metadata: BTreeMap::new(),
        };
        r.items
            .insert(FrameNode::CLASS_NAME.to_string(), frame_factory);
        r.items
            .insert(Layer::CLASS_NAME.to_string(), layer_factory);
        r.items.insert(
            crate::maps::ElevationGrid::CLASS_NAME.to_string(),
            crate::maps::elevation::factory,
        );
        r.items.insert(
            crate::maps::MlsGrid::CLASS_NAME.to_string(),
            crate::maps::mls::factory,
        );
        r.items.insert(
            crate::maps::Pointcloud::CLASS_NAME.to_string(),
            crate::maps::pointcloud::factory,
        );
        r.items.insert(
            crate::operators::GridToMls::CLASS_NAME.to_string(),
            crate::operators::grid_to_mls::factory,
        );
        r.items.insert(
            crate::operators::MlsSlope::CLASS_NAME.to_string(),
            crate::operators::mls_slope::factory,
        );

        r.metadata.insert(bool::TYPE_LABEL, decode_holder::<bool>);
        r.metadata.insert(i64::TYPE_LABEL, decode_holder::<i64>);
        r.metadata.insert(u64::TYPE_LABEL, decode_holder::<u64>);
        r.metadata.insert(f64::TYPE_LABEL, decode_holder::<f64>);
        r.metadata
            .insert(String::TYPE_LABEL, decode_holder::<String>);
        r.metadata
            .insert(Vec::<f64>::TYPE_LABEL, decode_holder::<Vec<f64>>);
        r.metadata
            .insert(Vec::<String>::TYPE_LABEL, decode_holder::<Vec<String>>);
        r.metadata
            .insert(Vec::<[f64; 3]>::TYPE_LABEL, decode_holder::<Vec<[f64; 3]>>);
        r
    }

    /// Run `f` with the process-wide registry locked.
    pub fn with_global<R>(f: impl FnOnce(&mut ClassRegistry) -> R) -> R {
        let mutex = GLOBAL.get_or_init(|| Mutex::new(Self::with_builtins()));
        let mut guard = mutex.lock().unwrap_or_else(|poison| poison.into_inner());
        f(&mut guard)
    }

    /// Register an item factory under a class name. Idempotent for the same
    /// factory; a different factory under an existing name fails with
    /// `FactoryConflict`.
    pub fn register_class(&mut self, class_name: &str, factory: ItemFactory) -> Result<()> {
        match self.items.get(class_name) {
            Some(existing) if *existing == factory => Ok(()),
            Some(_) => Err(Error::FactoryConflict {
                class_name: class_name.to_string(),
            }),
            None => {
                self.items.insert(class_name.to_string(), factory);
                Ok(())
            }
        }
    }

    /// Register a metadata value type so snapshots can restore it. Same
    /// idempotence rule as [`register_class`](ClassRegistry::register_class).
    pub fn register_metadata<T: MetaEntry>(&mut self) -> Result<()> {
        let decoder: MetaDecoder = decode_holder::<T>;
        match self.metadata.get(T::TYPE_LABEL) {
            Some(existing) if *existing == decoder => Ok(()),
            Some(_) => Err(Error::FactoryConflict {
                class_name: T::TYPE_LABEL.to_string(),
            }),
            None => {
                self.metadata.insert(T::TYPE_LABEL, decoder);
                Ok(())
            }
        }
    }

    /// Registered class names.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(|k| k.as_str())
    }

    fn create(&self, record: &ItemRecord) -> Result<Item> {
        let factory = self.items.get(&record.class).ok_or_else(|| Error::NotFound {
            what: format!("factory for class `{}`", record.class),
        })?;
        factory(record)
    }

    fn decode_metadata(
        &self,
        label: &str,
        value: &serde_yaml::Value,
    ) -> Option<Result<Box<dyn MetaHolder>>> {
        self.metadata.get(label).map(|decode| decode(value))
    }
}

fn frame_factory(record: &ItemRecord) -> Result<Item> {
    let mut frame = FrameNode::new(record.id.clone());
    if !record.data.is_null() {
        let tr: TransformRecord = serde_yaml::from_value(record.data.clone())?;
        frame.set_transform_raw(tr.to_transform());
    }
    Ok(frame.into())
}

fn layer_factory(record: &ItemRecord) -> Result<Item> {
    Ok(Layer::new(record.id.clone()).into())
}

/// Build the serialized record of an item.
pub(crate) fn item_to_record(item: &Item) -> ItemRecord {
    let mut record = ItemRecord {
        id: item.id().to_string(),
        class: item.class_name().to_string(),
        label: item.label().to_string(),
        immutable: false,
        metadata: Vec::new(),
        data: serde_yaml::Value::Null,
    };
    match item {
        Item::Frame(frame) => {
            let tr = TransformRecord::from_transform(frame.transform());
            match serde_yaml::to_value(tr) {
                Ok(data) => record.data = data,
                Err(err) => log::warn!("transform of `{}` not serializable: {}", item.id(), err),
            }
        }
        Item::Layer(layer) => {
            record.immutable = layer.is_immutable();
            for (key, type_label, value) in layer.metadata_entries() {
                match value {
                    Some(value) => record.metadata.push(MetaRecord {
                        key: key.to_string(),
                        type_label: type_label.to_string(),
                        value,
                    }),
                    None => log::warn!(
                        "metadata `{}` on `{}` is not serializable, skipping",
                        key,
                        item.id()
                    ),
                }
            }
            if let Some(map) = layer.map() {
                record.data = map.manifest_data();
            }
        }
        Item::Operator(op) => {
            record.data = op.kernel().manifest_data();
        }
    }
    record
}

/// Rebuild an item from its record. With `payload_dir` set, map payloads
/// are read from their payload files next to the manifest.
pub(crate) fn item_from_record(record: &ItemRecord, payload_dir: Option<&Path>) -> Result<Item> {
    let mut item = ClassRegistry::with_global(|r| r.create(record))?;
    item.meta_mut().id = ItemId::new(record.id.clone());
    item.meta_mut().label = record.label.clone();
    if let Item::Layer(layer) = &mut item {
        if record.immutable {
            layer.set_immutable();
        }
        for m in &record.metadata {
            match ClassRegistry::with_global(|r| r.decode_metadata(&m.type_label, &m.value)) {
                Some(Ok(holder)) => layer.insert_metadata_raw(m.key.clone(), holder),
                Some(Err(err)) => return Err(err),
                None => log::warn!(
                    "metadata `{}` has unregistered type `{}`, skipping",
                    m.key,
                    m.type_label
                ),
            }
        }
        if let Some(dir) = payload_dir {
            if layer.map().is_some() {
                let path = layer
                    .existing_map_file(dir)
                    .ok_or_else(|| Error::NotFound {
                        what: format!("payload file for `{}`", record.id),
                    })?;
                let mut file = std::fs::File::open(&path)?;
                if let Some(map) = layer.map_mut() {
                    map.read_payload(&mut file)?;
                }
            }
        }
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Covariance, Transform};

    #[test]
    fn test_frame_record_roundtrip() {
        let frame = FrameNode::with_transform(
            "/f",
            TransformWithUncertainty::with_covariance(
                Transform::from_translation([1.0, 2.0, 3.0]),
                Covariance::diagonal([0.1; 3], [0.2; 3]),
            ),
        );
        let item: Item = frame.into();
        let record = item_to_record(&item);
        assert_eq!(record.class, FrameNode::CLASS_NAME);

        let restored = item_from_record(&record, None).unwrap();
        let f = restored.as_frame().unwrap();
        assert!(f.transform().has_uncertainty());
        assert_eq!(f.transform().transform.translation, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_layer_record_keeps_metadata_and_flags() {
        let mut layer = Layer::new("/l");
        layer.set_immutable();
        *layer.data_mut::<f64>("resolution").unwrap() = 0.05;
        layer
            .data_mut::<Vec<String>>("tags")
            .unwrap()
            .push("keep".to_string());
        let record = item_to_record(&Item::Layer(layer));
        assert!(record.immutable);
        assert_eq!(record.metadata.len(), 2);

        let restored = item_from_record(&record, None).unwrap();
        let l = restored.as_layer().unwrap();
        assert!(l.is_immutable());
        assert_eq!(*l.data::<f64>("resolution").unwrap(), 0.05);
        assert_eq!(l.data::<Vec<String>>("tags").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_class_fails() {
        let record = ItemRecord {
            id: "/x".to_string(),
            class: "kshetra::Unknown".to_string(),
            label: String::new(),
            immutable: false,
            metadata: Vec::new(),
            data: serde_yaml::Value::Null,
        };
        assert!(item_from_record(&record, None).is_err());
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        fn dummy(record: &ItemRecord) -> Result<Item> {
            Ok(Layer::new(record.id.clone()).into())
        }
        fn other(record: &ItemRecord) -> Result<Item> {
            Ok(Layer::new(record.id.clone()).into())
        }
        ClassRegistry::with_global(|r| {
            r.register_class("kshetra::test::Dummy", dummy).unwrap();
            r.register_class("kshetra::test::Dummy", dummy).unwrap();
            assert!(matches!(
                r.register_class("kshetra::test::Dummy", other),
                Err(Error::FactoryConflict { .. })
            ));
        });
    }
}
