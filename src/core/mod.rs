//! Foundation types: transform algebra and spatial extents.

pub mod extents;
pub mod math;
pub mod transform;
pub mod uncertainty;

pub use extents::Extents;
pub use math::{Mat3, Mat6, Quaternion, Vec3};
pub use transform::Transform;
pub use uncertainty::{Covariance, TransformWithUncertainty};
