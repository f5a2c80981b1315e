//! Assay Procedure - immutable experiment procedure trees
//!
//! Provides:
//! - [`Conductor`] and [`ExecutionContext`] - the executor seam
//! - [`ConductorRegistry`] / [`ConductorCatalog`] - id to conductor lookup
//! - [`Instruction`] and [`Procedure`] - copy-on-write procedure trees
//! - [`ProcedureDocument`] - the persisted logical form
//! - [`ProcedureDependencies`] - dependency graph and execution order

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod conductor;
pub mod context;
pub mod dependencies;
pub mod document;
pub mod error;
pub mod instruction;
pub mod procedure;
pub mod registry;

pub use conductor::{same_conductor, Conductor};
pub use context::{ExecutionContext, ProductValue};
pub use dependencies::{Dependency, DependencyKind, ProcedureDependencies};
pub use document::{InstructionDocument, ProcedureDocument};
pub use error::{ConductError, ProcedureError};
pub use instruction::Instruction;
pub use procedure::Procedure;
pub use registry::{ConductorCatalog, ConductorRegistry};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
