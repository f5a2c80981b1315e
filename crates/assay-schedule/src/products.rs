//! Materialized schedules
//!
//! [`Products`] maps each scheduled path to the instruction selected for it.
//! [`StepOutputs`] holds what a completed instruction prepared and observed.

use assay_declaration::{AnyProduction, ExperimentPath, IdentityMap};
use assay_procedure::{Conductor, Instruction, ProductValue, Procedure};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Instruction selected for execution at a path
#[derive(Debug, Clone)]
pub struct ScheduledInstruction {
    path: ExperimentPath,
    instruction: Instruction,
}

impl ScheduledInstruction {
    /// Absolute path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &ExperimentPath {
        &self.path
    }

    /// Selected instruction
    #[inline]
    #[must_use]
    pub fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    /// Bound conductor
    #[inline]
    #[must_use]
    pub fn conductor(&self) -> &Arc<dyn Conductor> {
        self.instruction.conductor()
    }
}

/// Path to scheduled instruction mapping
#[derive(Debug, Clone, Default)]
pub struct Products {
    procedure: String,
    scheduled: BTreeMap<ExperimentPath, ScheduledInstruction>,
}

impl Products {
    /// Schedule every instruction of a procedure
    #[must_use]
    pub fn from_procedure(procedure: &Procedure) -> Self {
        let scheduled = procedure
            .instructions()
            .into_iter()
            .map(|(path, instruction)| {
                let scheduled = ScheduledInstruction {
                    path: path.clone(),
                    instruction: instruction.clone(),
                };
                (path, scheduled)
            })
            .collect();
        Self {
            procedure: procedure.id().to_string(),
            scheduled,
        }
    }

    /// Id of the scheduled procedure
    #[inline]
    #[must_use]
    pub fn procedure_id(&self) -> &str {
        &self.procedure
    }

    /// Scheduled instruction at a path
    #[must_use]
    pub fn get(&self, path: &ExperimentPath) -> Option<&ScheduledInstruction> {
        self.scheduled.get(path)
    }

    /// Check if a path is scheduled
    #[must_use]
    pub fn contains(&self, path: &ExperimentPath) -> bool {
        self.scheduled.contains_key(path)
    }

    /// Scheduled paths in path order
    pub fn paths(&self) -> impl Iterator<Item = &ExperimentPath> {
        self.scheduled.keys()
    }

    /// Scheduled instructions in path order
    pub fn iter(&self) -> impl Iterator<Item = &ScheduledInstruction> {
        self.scheduled.values()
    }

    /// Number of scheduled instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    /// Check if nothing is scheduled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub(crate) fn remove(&mut self, path: &ExperimentPath) -> Option<ScheduledInstruction> {
        self.scheduled.remove(path)
    }
}

/// State of one scheduled instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum StepState {
    /// Not started
    Pending,
    /// Being conducted
    Running,
    /// Conducted successfully
    Completed,
    /// Carried over from a previous schedule
    Reused,
    /// Conductor or environment failure
    Failed(String),
    /// Not started because a dependency did not complete
    Skipped(ExperimentPath),
    /// Removed before it started
    Unscheduled,
    /// Not started because the schedule was interrupted or terminated
    Cancelled,
}

impl StepState {
    /// Check if the state is final
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Check if outputs are available
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Reused)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Reused => f.write_str("reused"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            Self::Skipped(dependency) => write!(f, "skipped (dependency {dependency} did not complete)"),
            Self::Unscheduled => f.write_str("unscheduled"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Conditions and results produced by one instruction
#[derive(Debug, Clone, Default)]
pub struct StepOutputs {
    conditions: IdentityMap<ProductValue>,
    results: IdentityMap<Vec<ProductValue>>,
}

impl StepOutputs {
    /// Prepared condition value
    #[must_use]
    pub fn condition(&self, production: &AnyProduction) -> Option<&ProductValue> {
        self.conditions.get(production)
    }

    /// Observed result values
    #[must_use]
    pub fn results(&self, production: &AnyProduction) -> &[ProductValue] {
        self.results.get(production).map_or(&[], Vec::as_slice)
    }

    /// Ids of every produced production
    #[must_use]
    pub fn production_ids(&self) -> Vec<&str> {
        let conditions = self.conditions.iter().map(|(production, _)| production.id());
        let results = self.results.iter().map(|(production, _)| production.id());
        conditions.chain(results).collect()
    }

    pub(crate) fn has_condition(&self, production: &AnyProduction) -> bool {
        self.conditions.contains(production)
    }

    pub(crate) fn insert_condition(&mut self, production: &AnyProduction, value: ProductValue) {
        self.conditions.insert(production, value);
    }

    pub(crate) fn push_result(&mut self, production: &AnyProduction, value: ProductValue) {
        match self.results.get_mut(production) {
            Some(values) => values.push(value),
            None => {
                self.results.insert(production, vec![value]);
            }
        }
    }
}

/// Final record of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub state: StepState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of conducting a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub schedule: ulid::Ulid,
    pub procedure: String,
    pub terminated: bool,
    pub steps: BTreeMap<ExperimentPath, StepRecord>,
}

impl ScheduleReport {
    /// Paths in a given state
    #[must_use]
    pub fn paths_where(&self, predicate: impl Fn(&StepState) -> bool) -> Vec<&ExperimentPath> {
        self.steps
            .iter()
            .filter(|(_, record)| predicate(&record.state))
            .map(|(path, _)| path)
            .collect()
    }

    /// Check if every step completed or was reused
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.terminated && self.steps.values().all(|record| record.state.is_success())
    }

    /// State of a step
    #[must_use]
    pub fn state(&self, path: &ExperimentPath) -> Option<&StepState> {
        self.steps.get(path).map(|record| &record.state)
    }
}
