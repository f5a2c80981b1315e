//! Conductors perform the operation of an instruction
//!
//! A [`Conductor`] is an external collaborator: it declares what it offers
//! and needs, and is dispatched by the scheduler with an
//! [`ExecutionContext`] through which it reads inputs and records outputs.

use crate::context::ExecutionContext;
use crate::error::ConductError;
use assay_declaration::Declaration;
use async_trait::async_trait;
use std::fmt;

/// Executor bound to instructions
#[async_trait]
pub trait Conductor: Send + Sync + fmt::Debug {
    /// Registry id of this conductor
    fn id(&self) -> &str;

    /// Productions offered and requirements needed
    ///
    /// Must not change over the lifetime of the conductor.
    fn declaration(&self) -> &Declaration;

    /// Perform the instruction
    ///
    /// # Errors
    /// Returns [`ConductError`] if the operation fails. Outputs recorded
    /// before the failure are discarded by the scheduler.
    async fn conduct(&self, context: &dyn ExecutionContext) -> Result<(), ConductError>;
}

/// Check if two conductors are the same conductor identity
#[must_use]
pub fn same_conductor(a: &dyn Conductor, b: &dyn Conductor) -> bool {
    a.id() == b.id()
}
