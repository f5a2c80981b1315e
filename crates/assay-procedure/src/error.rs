//! Error types for procedures and conductors
//!
//! Provides:
//! - [`ProcedureError`] - building, editing and analysing procedure trees
//! - [`ConductError`] - failures while a conductor runs an instruction

use assay_declaration::{DeclarationError, ExperimentPath, PathError};
use assay_environment::EnvironmentError;

/// Procedure construction and analysis error
#[derive(Debug, thiserror::Error)]
pub enum ProcedureError {
    /// Invalid id or path
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Inconsistent conductor declaration
    #[error("declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    /// Two siblings share an id
    #[error("duplicate id '{id}' under '{parent}'")]
    DuplicateId { parent: ExperimentPath, id: String },

    /// No instruction at a path
    #[error("no instruction at '{0}'")]
    NoSuchInstruction(ExperimentPath),

    /// Document references a conductor the registry does not know
    #[error("unknown conductor '{conductor}' at '{path}'")]
    UnknownConductor { path: ExperimentPath, conductor: String },

    /// Requirement not satisfied by the procedure
    #[error("unresolved requirement '{production}' of '{path}': {reason}")]
    UnresolvedRequirement {
        path: ExperimentPath,
        production: String,
        reason: String,
    },

    /// Dependencies form a cycle
    #[error("dependency cycle through '{0}'")]
    DependencyCycle(ExperimentPath),
}

/// Failure while conducting an instruction
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConductError {
    /// Resource could not be provided
    #[error("environment: {0}")]
    Environment(#[from] EnvironmentError),

    /// Production is not offered or required by this conductor
    #[error("production '{0}' is not declared by this conductor")]
    Undeclared(String),

    /// Required production has no value
    #[error("production '{0}' has not been produced")]
    Unproduced(String),

    /// Value does not have the production's type
    #[error("production '{id}' does not hold a {expected}")]
    TypeMismatch { id: String, expected: &'static str },

    /// Single-valued production produced twice
    #[error("production '{0}' was already produced")]
    AlreadyProduced(String),

    /// Schedule was terminated
    #[error("terminated")]
    Terminated,

    /// Conductor-specific failure
    #[error("{0}")]
    Failed(String),
}

impl ConductError {
    /// Create a conductor-specific failure
    #[inline]
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Check if conducting again may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Environment(error) => error.is_retryable(),
            _ => false,
        }
    }
}
