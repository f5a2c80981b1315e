//! Error types for scheduling

use crate::config::ConfigError;
use assay_procedure::ProcedureError;

/// Scheduling error
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Procedure cannot be scheduled
    #[error("procedure error: {0}")]
    Procedure(#[from] ProcedureError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schedule was already conducted
    #[error("schedule {0} has already been conducted")]
    AlreadyConducted(ulid::Ulid),

    /// Step task ended abnormally
    #[error("step task failed: {0}")]
    Runtime(String),
}

impl ScheduleError {
    /// Check if the error comes from the procedure itself
    #[inline]
    #[must_use]
    pub fn is_procedure_error(&self) -> bool {
        matches!(self, Self::Procedure(_))
    }
}
