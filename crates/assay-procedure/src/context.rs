//! Execution context handed to a conductor
//!
//! [`ExecutionContext`] is object-safe and works with type-erased values.
//! Typed access goes through the inherent methods on
//! `dyn ExecutionContext`, which check value types against productions.

use crate::error::ConductError;
use assay_declaration::{
    AnyProduction, ExperimentPath, Observation, Preparation, Production, Provision, Variables,
};
use std::any::Any;
use std::sync::Arc;

/// Type-erased value of a production
pub type ProductValue = Arc<dyn Any + Send + Sync>;

/// View of the running instruction offered to its conductor
pub trait ExecutionContext: Send + Sync {
    /// Absolute path of the instruction
    fn path(&self) -> &ExperimentPath;

    /// Configuration state of the instruction
    fn variables(&self) -> &Variables;

    /// Environment resource declared by the conductor
    ///
    /// # Errors
    /// Fails if the resource is not declared or not held
    fn resource_value(&self, provision: &AnyProduction) -> Result<ProductValue, ConductError>;

    /// Condition prepared by the parent
    ///
    /// # Errors
    /// Fails if the condition is not the required one or was not prepared
    fn condition_value(&self, production: &AnyProduction) -> Result<ProductValue, ConductError>;

    /// Result values observed by the parent
    ///
    /// # Errors
    /// Fails if the result is not the required one
    fn result_values(&self, production: &AnyProduction) -> Result<Vec<ProductValue>, ConductError>;

    /// Result values observed by the instructions at the additional
    /// dependency paths, keyed by path
    ///
    /// # Errors
    /// Fails if no additional requirement targets the production
    fn additional_result_values(
        &self,
        production: &AnyProduction,
    ) -> Result<Vec<(ExperimentPath, ProductValue)>, ConductError>;

    /// Record a prepared condition for the children
    ///
    /// # Errors
    /// Fails if the condition is not offered or was already prepared
    fn prepare_value(&self, production: &AnyProduction, value: ProductValue) -> Result<(), ConductError>;

    /// Record an observed result
    ///
    /// # Errors
    /// Fails if the result is not offered, or is single-valued and already
    /// observed
    fn observe_value(&self, production: &AnyProduction, value: ProductValue) -> Result<(), ConductError>;

    /// Report progress
    fn proceed(&self);

    /// Check if the schedule was terminated
    fn is_terminated(&self) -> bool;
}

fn typed<T: Send + Sync + 'static>(production: &AnyProduction, value: ProductValue) -> Result<Arc<T>, ConductError> {
    value.downcast::<T>().map_err(|_| ConductError::TypeMismatch {
        id: production.id().to_string(),
        expected: std::any::type_name::<T>(),
    })
}

impl dyn ExecutionContext + '_ {
    /// Typed environment resource
    ///
    /// # Errors
    /// See [`ExecutionContext::resource_value`]
    pub fn resource<T: Send + Sync + 'static>(&self, provision: &Provision<T>) -> Result<Arc<T>, ConductError> {
        typed(provision.erased(), self.resource_value(provision.erased())?)
    }

    /// Typed condition from the parent
    ///
    /// # Errors
    /// See [`ExecutionContext::condition_value`]
    pub fn condition<T: Send + Sync + 'static>(&self, preparation: &Preparation<T>) -> Result<Arc<T>, ConductError> {
        typed(preparation.erased(), self.condition_value(preparation.erased())?)
    }

    /// Single typed result from the parent
    ///
    /// # Errors
    /// Fails with [`ConductError::Unproduced`] if no value was observed
    pub fn result<T: Send + Sync + 'static>(&self, observation: &Observation<T>) -> Result<Arc<T>, ConductError> {
        let value = self
            .result_values(observation.erased())?
            .pop()
            .ok_or_else(|| ConductError::Unproduced(observation.id().to_string()))?;
        typed(observation.erased(), value)
    }

    /// Every typed result from the parent
    ///
    /// # Errors
    /// See [`ExecutionContext::result_values`]
    pub fn results<T: Send + Sync + 'static>(&self, observation: &Observation<T>) -> Result<Vec<Arc<T>>, ConductError> {
        self.result_values(observation.erased())?
            .into_iter()
            .map(|value| typed(observation.erased(), value))
            .collect()
    }

    /// Typed results from the additional dependency paths
    ///
    /// # Errors
    /// See [`ExecutionContext::additional_result_values`]
    pub fn additional_results<T: Send + Sync + 'static>(
        &self,
        observation: &Observation<T>,
    ) -> Result<Vec<(ExperimentPath, Arc<T>)>, ConductError> {
        self.additional_result_values(observation.erased())?
            .into_iter()
            .map(|(path, value)| Ok((path, typed(observation.erased(), value)?)))
            .collect()
    }

    /// Prepare a typed condition
    ///
    /// # Errors
    /// See [`ExecutionContext::prepare_value`]
    pub fn prepare<T: Send + Sync + 'static>(&self, preparation: &Preparation<T>, value: T) -> Result<(), ConductError> {
        self.prepare_value(preparation.erased(), Arc::new(value))
    }

    /// Observe a typed result
    ///
    /// # Errors
    /// See [`ExecutionContext::observe_value`]
    pub fn observe<T: Send + Sync + 'static>(&self, observation: &Observation<T>, value: T) -> Result<(), ConductError> {
        self.observe_value(observation.erased(), Arc::new(value))
    }

    /// Fail with [`ConductError::Terminated`] once the schedule is terminated
    ///
    /// # Errors
    /// Returns [`ConductError::Terminated`] if terminated
    pub fn check_terminated(&self) -> Result<(), ConductError> {
        if self.is_terminated() {
            Err(ConductError::Terminated)
        } else {
            Ok(())
        }
    }
}
