//! Execution context of a scheduled step
//!
//! Conductors only see what their declaration names: the declared
//! resources, the parent production they require, the results of their
//! additional dependencies, and the productions they offer. Outputs are
//! buffered here and committed to the schedule when the conductor succeeds.

use crate::event::SchedulingEvent;
use crate::products::StepOutputs;
use crate::scheduler::ScheduleInner;
use assay_declaration::{
    AdditionalRequirement, AnyProduction, Cardinality, Declaration, ExperimentPath, ProductionKind, Requirement,
    Variables,
};
use assay_environment::LocalEnvironment;
use assay_procedure::{ConductError, ExecutionContext, Instruction, ProductValue};
use parking_lot::Mutex;

pub(crate) struct StepContext<'a> {
    schedule: &'a ScheduleInner,
    path: &'a ExperimentPath,
    instruction: &'a Instruction,
    lease: &'a LocalEnvironment,
    outputs: Mutex<StepOutputs>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        schedule: &'a ScheduleInner,
        path: &'a ExperimentPath,
        instruction: &'a Instruction,
        lease: &'a LocalEnvironment,
    ) -> Self {
        Self {
            schedule,
            path,
            instruction,
            lease,
            outputs: Mutex::new(StepOutputs::default()),
        }
    }

    pub(crate) fn into_outputs(self) -> StepOutputs {
        self.outputs.into_inner()
    }

    fn declaration(&self) -> &Declaration {
        self.instruction.conductor().declaration()
    }

    fn undeclared(production: &AnyProduction) -> ConductError {
        ConductError::Undeclared(production.id().to_string())
    }

    fn parent_outputs(&self) -> Option<std::sync::Arc<StepOutputs>> {
        self.path.parent().and_then(|parent| self.schedule.outputs_at(&parent))
    }

    /// Offered production of the expected kind, with a value of its type
    fn check_offered(
        &self,
        production: &AnyProduction,
        value: &ProductValue,
        kind: fn(&AnyProduction) -> bool,
    ) -> Result<(), ConductError> {
        if !kind(production) || !self.declaration().offers(production) {
            return Err(Self::undeclared(production));
        }
        if (**value).type_id() != production.type_id() {
            return Err(ConductError::TypeMismatch {
                id: production.id().to_string(),
                expected: production.type_name(),
            });
        }
        Ok(())
    }
}

/// Values satisfying a requirement; `Single` keeps the last observed value
fn select(mut values: Vec<ProductValue>, cardinality: Cardinality) -> Vec<ProductValue> {
    match cardinality {
        Cardinality::Multiple => values,
        Cardinality::Single => values.pop().into_iter().collect(),
    }
}

impl ExecutionContext for StepContext<'_> {
    fn path(&self) -> &ExperimentPath {
        self.path
    }

    fn variables(&self) -> &Variables {
        self.instruction.variables()
    }

    fn resource_value(&self, provision: &AnyProduction) -> Result<ProductValue, ConductError> {
        let declared = self
            .declaration()
            .resources()
            .iter()
            .any(|resource| resource.provision() == provision);
        if !declared {
            return Err(Self::undeclared(provision));
        }
        Ok(self.lease.provide_value(provision)?)
    }

    fn condition_value(&self, production: &AnyProduction) -> Result<ProductValue, ConductError> {
        match self.declaration().requirement() {
            Requirement::Condition(condition) if condition.production() == production => {}
            _ => return Err(Self::undeclared(production)),
        }
        self.parent_outputs()
            .and_then(|outputs| outputs.condition(production).cloned())
            .ok_or_else(|| ConductError::Unproduced(production.id().to_string()))
    }

    fn result_values(&self, production: &AnyProduction) -> Result<Vec<ProductValue>, ConductError> {
        let cardinality = match self.declaration().requirement() {
            Requirement::Result(result) if result.production() == production => result.cardinality(),
            _ => return Err(Self::undeclared(production)),
        };
        let values = self
            .parent_outputs()
            .map(|outputs| outputs.results(production).to_vec())
            .unwrap_or_default();
        Ok(select(values, cardinality))
    }

    fn additional_result_values(
        &self,
        production: &AnyProduction,
    ) -> Result<Vec<(ExperimentPath, ProductValue)>, ConductError> {
        let requirements: Vec<&AdditionalRequirement> = self
            .declaration()
            .additional_requirements()
            .iter()
            .filter(|requirement| requirement.production() == production)
            .collect();
        if requirements.is_empty() {
            return Err(Self::undeclared(production));
        }

        let mut values = Vec::new();
        for requirement in requirements {
            for dependency in requirement.resolved_dependencies(self.path, self.variables()) {
                let Some(outputs) = self.schedule.outputs_at(&dependency) else {
                    continue;
                };
                let selected = select(outputs.results(production).to_vec(), requirement.cardinality());
                values.extend(selected.into_iter().map(|value| (dependency.clone(), value)));
            }
        }
        Ok(values)
    }

    fn prepare_value(&self, production: &AnyProduction, value: ProductValue) -> Result<(), ConductError> {
        self.check_offered(production, &value, AnyProduction::is_condition)?;
        let mut outputs = self.outputs.lock();
        if outputs.has_condition(production) {
            return Err(ConductError::AlreadyProduced(production.id().to_string()));
        }
        outputs.insert_condition(production, value);
        Ok(())
    }

    fn observe_value(&self, production: &AnyProduction, value: ProductValue) -> Result<(), ConductError> {
        self.check_offered(production, &value, AnyProduction::is_result)?;
        let multiple = matches!(production.kind(), ProductionKind::Observation { multiple: true });
        let mut outputs = self.outputs.lock();
        if !multiple && !outputs.results(production).is_empty() {
            return Err(ConductError::AlreadyProduced(production.id().to_string()));
        }
        outputs.push_result(production, value);
        Ok(())
    }

    fn proceed(&self) {
        tracing::trace!(path = %self.path, "proceed");
        self.schedule.publish(&SchedulingEvent::Proceed {
            schedule: self.schedule.id(),
            path: self.path.clone(),
        });
    }

    fn is_terminated(&self) -> bool {
        self.schedule.is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn values(numbers: &[u32]) -> Vec<ProductValue> {
        numbers.iter().map(|&number| Arc::new(number) as ProductValue).collect()
    }

    fn numbers(values: &[ProductValue]) -> Vec<u32> {
        values.iter().filter_map(|value| value.downcast_ref::<u32>().copied()).collect()
    }

    #[test]
    fn single_keeps_last_value() {
        assert_eq!(numbers(&select(values(&[1, 2, 3]), Cardinality::Single)), vec![3]);
        assert!(select(Vec::new(), Cardinality::Single).is_empty());
    }

    #[test]
    fn multiple_keeps_every_value() {
        assert_eq!(numbers(&select(values(&[1, 2]), Cardinality::Multiple)), vec![1, 2]);
    }
}
