//! Persistence: the class registry and directory snapshots.

pub mod registry;
pub mod snapshot;

pub use registry::{ClassRegistry, ItemFactory, ItemRecord, MetaRecord};
pub use snapshot::SCENE_FILE;
