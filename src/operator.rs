//! Operators: computations deriving output layers from input layers.

use std::any::Any;

use crate::error::Result;
use crate::item::ItemMeta;

pub use crate::environment::OperatorContext;

/// Implementation contract of an operator.
///
/// Kernels live outside the engine and plug in through this trait. The
/// engine records the input/output wiring, enforces the declared arities,
/// and drives [`OperatorKernel::update`] when outputs are dirty.
pub trait OperatorKernel: Any {
    /// Class-name tag, e.g. `kshetra::GridToMls`.
    fn class_name(&self) -> &'static str;

    /// Number of inputs this operator requires; 0 means unlimited.
    fn input_arity(&self) -> usize {
        0
    }

    /// Number of outputs this operator requires; 0 means unlimited.
    fn output_arity(&self) -> usize {
        0
    }

    /// Recompute all output layers from the inputs.
    ///
    /// A failing kernel must leave its outputs in a valid (possibly
    /// unchanged) state; the driver keeps them dirty and reports the
    /// failure.
    fn update(&mut self, ctx: &mut OperatorContext<'_>) -> Result<()>;

    /// Whether output layers may detach themselves from this operator.
    fn supports_detach(&self) -> bool {
        false
    }

    /// Class-specific configuration stored in the manifest.
    fn manifest_data(&self) -> serde_yaml::Value {
        serde_yaml::Value::Null
    }

    /// Clone into a fresh box.
    fn clone_box(&self) -> Box<dyn OperatorKernel>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn OperatorKernel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An operator item in the environment graph.
pub struct OperatorNode {
    pub(crate) meta: ItemMeta,
    kernel: Box<dyn OperatorKernel>,
}

impl OperatorNode {
    /// Create an operator around a kernel.
    pub fn new(id: impl Into<String>, kernel: Box<dyn OperatorKernel>) -> Self {
        Self {
            meta: ItemMeta::new(id.into()),
            kernel,
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

    /// Class-name tag of the kernel.
    #[inline]
    pub fn class_name(&self) -> &'static str {
        self.kernel.class_name()
    }

    /// Declared input arity; 0 means unlimited.
    #[inline]
    pub fn input_arity(&self) -> usize {
        self.kernel.input_arity()
    }

    /// Declared output arity; 0 means unlimited.
    #[inline]
    pub fn output_arity(&self) -> usize {
        self.kernel.output_arity()
    }

    /// Whether outputs may detach from this operator.
    #[inline]
    pub fn supports_detach(&self) -> bool {
        self.kernel.supports_detach()
    }

    /// The kernel.
    pub fn kernel(&self) -> &dyn OperatorKernel {
        self.kernel.as_ref()
    }

    pub(crate) fn kernel_mut(&mut self) -> &mut dyn OperatorKernel {
        self.kernel.as_mut()
    }

    /// Typed kernel view.
    pub fn kernel_as<T: OperatorKernel>(&self) -> Option<&T> {
        self.kernel.as_any().downcast_ref()
    }
}

impl Clone for OperatorNode {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            kernel: self.kernel.clone(),
        }
    }
}

impl std::fmt::Debug for OperatorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorNode")
            .field("id", &self.meta.id)
            .field("class", &self.class_name())
            .field("input_arity", &self.input_arity())
            .field("output_arity", &self.output_arity())
            .finish()
    }
}
