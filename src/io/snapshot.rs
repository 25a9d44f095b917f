//! Directory snapshots of an environment.
//!
//! A snapshot is a directory containing `scene.yml`, the manifest listing
//! every item (in delivery order, so parents precede children) and all edge
//! tables, plus one payload file per cartesian map, named after the
//! sanitized unique id with a class-specific extension.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::registry::{item_from_record, item_to_record, ItemRecord};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::item::{Item, ItemId};

/// Manifest file name inside a snapshot directory.
pub const SCENE_FILE: &str = "scene.yml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SceneManifest {
    prefix: String,
    root: String,
    items: Vec<ItemRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    frame_edges: Vec<EdgeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    layer_edges: Vec<EdgeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    frame_attachments: Vec<EdgeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    operator_inputs: Vec<EdgeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    operator_outputs: Vec<EdgeRecord>,
}

/// One edge. `from`/`to` are parent/child for tree tables, operator/layer
/// for wiring tables, and map/frame for attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRecord {
    from: String,
    to: String,
}

impl EdgeRecord {
    fn new(from: &ItemId, to: &ItemId) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl Environment {
    /// Write this environment to a directory snapshot. The directory is
    /// created when missing; an existing `scene.yml` is overwritten.
    pub fn serialize(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let order = self.delivery_order();

        let mut manifest = SceneManifest {
            prefix: self.environment_prefix().to_string(),
            root: self.root_frame().to_string(),
            ..Default::default()
        };
        for id in &order {
            let item = match self.get(id) {
                Some(item) => item,
                None => continue,
            };
            manifest.items.push(item_to_record(item));
            if let Item::Layer(layer) = item {
                if let Some(path) = layer.map_file_name(dir, None) {
                    let mut file = std::fs::File::create(&path)?;
                    if let Some(map) = layer.map() {
                        map.write_payload(&mut file)?;
                    }
                }
            }
        }
        for id in &order {
            if let Some(parent) = self.frame_parent_of(id) {
                manifest.frame_edges.push(EdgeRecord::new(parent, id));
            }
        }
        for (parent, child) in self.layer_edge_table() {
            manifest.layer_edges.push(EdgeRecord::new(parent, child));
        }
        for id in &order {
            if let Some(frame) = self.frame_of_map(id) {
                manifest.frame_attachments.push(EdgeRecord::new(id, frame));
            }
        }
        for (op, layer) in self.operator_input_table() {
            manifest.operator_inputs.push(EdgeRecord::new(op, layer));
        }
        for (op, layer) in self.operator_output_table() {
            manifest.operator_outputs.push(EdgeRecord::new(op, layer));
        }

        std::fs::write(dir.join(SCENE_FILE), serde_yaml::to_string(&manifest)?)?;
        log::info!(
            "serialized {} item(s) to {}",
            manifest.items.len(),
            dir.display()
        );
        Ok(())
    }

    /// Load an environment from a directory snapshot.
    ///
    /// Items are rebuilt through the class registry preserving their
    /// recorded ids, edges are replayed, and every generated layer is left
    /// dirty; call
    /// [`update_operators`](Environment::update_operators) to regenerate.
    pub fn unserialize(dir: &Path) -> Result<Environment> {
        let text = std::fs::read_to_string(dir.join(SCENE_FILE))?;
        let manifest: SceneManifest = serde_yaml::from_str(&text)?;

        let mut env = Environment::new();
        env.set_environment_prefix(&manifest.prefix);
        let root = ItemId::new(manifest.root.clone());
        env.rename_root(&root)?;

        for record in &manifest.items {
            let item = item_from_record(record, Some(dir))?;
            if record.id == manifest.root {
                match item {
                    Item::Frame(frame) => {
                        let transform = *frame.transform();
                        let label = frame.meta().label().to_string();
                        let node = env.frame_mut(&root)?;
                        node.set_transform_raw(transform);
                        node.meta.label = label;
                    }
                    other => {
                        return Err(Error::Format(format!(
                            "root `{}` is recorded as a {}",
                            manifest.root,
                            other.kind_name()
                        )))
                    }
                }
                continue;
            }
            env.attach_recorded(item)?;
        }

        for e in &manifest.frame_edges {
            env.add_frame_child(&ItemId::new(e.from.clone()), &ItemId::new(e.to.clone()))?;
        }
        for e in &manifest.layer_edges {
            env.add_layer_child(&ItemId::new(e.from.clone()), &ItemId::new(e.to.clone()))?;
        }
        for e in &manifest.frame_attachments {
            env.set_frame_node(&ItemId::new(e.from.clone()), &ItemId::new(e.to.clone()))?;
        }
        for e in &manifest.operator_inputs {
            env.add_input(&ItemId::new(e.from.clone()), &ItemId::new(e.to.clone()))?;
        }
        for e in &manifest.operator_outputs {
            env.add_output(&ItemId::new(e.from.clone()), &ItemId::new(e.to.clone()))?;
        }
        log::info!(
            "unserialized {} item(s) from {}",
            manifest.items.len(),
            dir.display()
        );
        Ok(env)
    }
}
