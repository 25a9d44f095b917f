//! # Kshetra-Env: Environment Graph Engine for Spatial Maps
//!
//! A library for managing a heterogeneous environment of spatial data:
//! maps (elevation grids, multi-level surface grids, point clouds) related
//! through a tree of coordinate frames with uncertainty, and chained
//! operators that derive new maps from existing ones. The engine keeps the
//! graph consistent under edits, propagates change information so derived
//! maps can be recomputed on demand, and serializes the whole environment
//! to a directory snapshot.
//!
//! ## Quick Start
//!
//! ```rust
//! use kshetra_env::{Environment, FrameNode, Layer};
//! use kshetra_env::core::Transform;
//! use kshetra_env::maps::{ElevationGrid, MlsGrid};
//! use kshetra_env::operators::GridToMls;
//!
//! let mut env = Environment::new();
//!
//! // a frame 1m ahead of the root
//! let root = env.root_frame().clone();
//! let scan = env
//!     .attach(FrameNode::with_transform("scan/", Transform::from_translation([1.0, 0.0, 0.0])).into())
//!     .unwrap();
//! env.add_frame_child(&root, &scan).unwrap();
//!
//! // a grid observed in that frame, lifted into an MLS map
//! let grid = env
//!     .attach_map(Layer::with_map("grid/", Box::new(ElevationGrid::centered(32, 32, 0.1))), Some(&scan))
//!     .unwrap();
//! let mls = env
//!     .attach_map(Layer::with_map("mls/", Box::new(MlsGrid::new(0, 0, 0.1, [0.0, 0.0]))), None)
//!     .unwrap();
//! let op = env.attach(GridToMls::default().into_node("to_mls/").into()).unwrap();
//! env.set_input(&op, &grid).unwrap();
//! env.set_output(&op, &mls).unwrap();
//!
//! assert!(env.layer(&mls).unwrap().is_dirty());
//! let report = env.update_operators();
//! assert!(report.is_clean());
//! assert!(!env.layer(&mls).unwrap().is_dirty());
//! ```
//!
//! ## Architecture
//!
//! The crate is organized into layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      io/                            │  ← Persistence
//! │          (class registry, snapshots)                │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    event/                           │  ← Notification
//! │        (event bus, binary event streams)            │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                 environment/                        │  ← The engine
//! │   (item store, frame tree, layer DAG, operators)    │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │          item / frame / layer / operator            │  ← Graph nodes
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │        (transform algebra, uncertainty)             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! [`maps`] and [`operators`] are reference collaborators: small but
//! complete map payloads and operator kernels that exercise the
//! registration protocol the same way application-defined types do.
//!
//! ## Ownership
//!
//! Items are user-owned until [`Environment::attach`] and environment-owned
//! afterwards; handles are ids resolved through the environment.
//! [`Environment::detach`] hands the item back by value. A single
//! environment must not be mutated concurrently.

pub mod core;
pub mod environment;
pub mod error;
pub mod event;
pub mod frame;
pub mod io;
pub mod item;
pub mod layer;
pub mod maps;
pub mod operator;
pub mod operators;

// Re-export the main types at the crate root
pub use crate::environment::{Environment, OperatorContext, UpdateReport};
pub use crate::error::{Error, Result};
pub use crate::event::{BinaryEvent, BinaryEventRecorder, Event, EventHandler, HandlerId};
pub use crate::frame::FrameNode;
pub use crate::io::ClassRegistry;
pub use crate::item::{Item, ItemId};
pub use crate::layer::{Layer, MapData, MetaEntry};
pub use crate::operator::{OperatorKernel, OperatorNode};
