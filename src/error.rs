//! Error types for the environment graph engine.
//!
//! # Error Recovery Strategies
//!
//! Different error kinds call for different handling:
//!
//! ## Caller Errors (Fix the Call Site)
//!
//! - **`NotAttached`** / **`AlreadyAttached`**: the item is not (or already)
//!   part of the environment the operation assumes. Attach or detach first.
//!
//! - **`IdCollision`**: the requested id is taken. Use a trailing-slash id to
//!   let the environment mint a unique numeric suffix.
//!
//! - **`ArityExceeded`** / **`AlreadyGenerated`** / **`GraphCycle`** /
//!   **`ImmutableViolation`**: the requested edge would break a graph
//!   invariant. The environment state is unchanged; rewire and retry.
//!
//! - **`HasDependents`**: a shallow detach would orphan child frames or
//!   attached maps. Detach the dependents first or use a deep detach.
//!
//! ## Lookup Errors (Log and Continue)
//!
//! - **`NotFound`** / **`Ambiguous`** / **`TypeMismatch`**: a query did not
//!   resolve to exactly one item of the expected shape.
//!
//! ## Startup Errors (Fatal)
//!
//! - **`FactoryConflict`**: two different factories registered under the same
//!   class name. This indicates a build-level problem and should abort.
//!
//! ## Persistence Errors (Surface to the Operator)
//!
//! - **`Io`** / **`Manifest`** / **`Format`**: a snapshot directory or payload
//!   file could not be read or written. The environment being loaded is
//!   incomplete and must be discarded.
//!
//! - **`ReplayConflict`**: a recorded event stream does not apply cleanly to
//!   the target environment (id collision, dangling reference). The target
//!   may have been partially mutated by earlier records.
//!
//! ## Update Errors (Collected)
//!
//! - **`OperatorFailure`**: an operator kernel reported failure during
//!   `update_operators`. The driver does not abort; failures are collected in
//!   the [`UpdateReport`](crate::environment::UpdateReport) with the
//!   operator's outputs left dirty.

use thiserror::Error;

/// Errors raised by the environment graph engine.
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("item `{id}` is not attached to this environment")]
    NotAttached { id: String },

    #[error("item `{id}` is already attached: {detail}")]
    AlreadyAttached { id: String, detail: String },

    #[error("id `{id}` collides with an item already in the environment")]
    IdCollision { id: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("more than one item matches `{what}`")]
    Ambiguous { what: String },

    #[error("type mismatch for {context}: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("operator `{id}` accepts at most {arity} {role} layer(s)")]
    ArityExceeded {
        id: String,
        role: &'static str,
        arity: usize,
    },

    #[error("layer `{id}` is already generated by operator `{generator}`")]
    AlreadyGenerated { id: String, generator: String },

    #[error("edge would create a cycle: {detail}")]
    GraphCycle { detail: String },

    #[error("layer `{id}` is immutable and cannot become an operator output")]
    ImmutableViolation { id: String },

    #[error("item `{id}` still has dependents: {detail}")]
    HasDependents { id: String, detail: String },

    #[error("conflicting registration for class `{class_name}`")]
    FactoryConflict { class_name: String },

    #[error("event replay conflict: {detail}")]
    ReplayConflict { detail: String },

    #[error("operator `{id}` failed to update: {detail}")]
    OperatorFailure { id: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),

    #[error("format error: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, Error>;
