//! Reference operator kernels shipped with the engine.

pub mod grid_to_mls;
pub mod mls_slope;

pub use grid_to_mls::GridToMls;
pub use mls_slope::MlsSlope;
