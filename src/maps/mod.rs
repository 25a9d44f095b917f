//! Reference map payloads shipped with the engine.
//!
//! These exercise the full registration protocol (class registry, payload
//! codecs, manifest headers) and back the bundled operators and tools.
//! Applications register their own map types the same way.

pub mod elevation;
pub mod mls;
pub mod pointcloud;

pub use elevation::ElevationGrid;
pub use mls::{MlsGrid, MlsPatch};
pub use pointcloud::{Pointcloud, TextFormat, VERTEX_COLOR, VERTEX_VARIANCE};
