//! Conductor registry for resolving conductor ids
//!
//! Provides the [`ConductorRegistry`] lookup trait owned by the host
//! application, and [`ConductorCatalog`], a concurrent implementation.

use crate::conductor::Conductor;
use crate::error::ProcedureError;
use dashmap::DashMap;
use std::sync::Arc;

/// Lookup of conductors by id
pub trait ConductorRegistry: Send + Sync {
    /// Conductor registered under an id
    fn conductor(&self, id: &str) -> Option<Arc<dyn Conductor>>;
}

/// Concurrent id to conductor map
#[derive(Debug, Default)]
pub struct ConductorCatalog {
    conductors: DashMap<String, Arc<dyn Conductor>>,
}

impl ConductorCatalog {
    /// Create empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conductor under its own id
    ///
    /// Returns the conductor previously registered under that id.
    ///
    /// # Errors
    /// Returns [`ProcedureError::Declaration`] if the conductor's declaration
    /// is inconsistent
    pub fn register(&self, conductor: Arc<dyn Conductor>) -> Result<Option<Arc<dyn Conductor>>, ProcedureError> {
        conductor.declaration().validate()?;
        tracing::trace!(conductor = conductor.id(), "registered conductor");
        Ok(self.conductors.insert(conductor.id().to_string(), conductor))
    }

    /// Check if an id is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.conductors.contains_key(id)
    }

    /// Remove a conductor
    pub fn remove(&self, id: &str) -> Option<Arc<dyn Conductor>> {
        self.conductors.remove(id).map(|(_, conductor)| conductor)
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conductors.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered conductors
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.conductors.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conductors.is_empty()
    }
}

impl ConductorRegistry for ConductorCatalog {
    fn conductor(&self, id: &str) -> Option<Arc<dyn Conductor>> {
        self.conductors.get(id).map(|entry| Arc::clone(entry.value()))
    }
}
