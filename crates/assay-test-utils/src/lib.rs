//! Testing utilities for the Assay workspace
//!
//! Shared conductors, timelines, storages and procedure fixtures.

#![allow(missing_docs)]

use assay_declaration::{
    AdditionalRequirement, Declaration, Evaluation, ExperimentPath, Observation, Preparation, Provision,
    Requirement, VariablePaths,
};
use assay_environment::Environment;
use assay_procedure::{ConductError, Conductor, ExecutionContext, Instruction, Procedure, ProductValue};
use assay_schedule::{Location, PersistedResource, Scheduler, SchedulerConfig, StorageLocator};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Start,
    End,
}

/// Ordered record of conductor starts and ends
#[derive(Debug, Default)]
pub struct Timeline {
    marks: Mutex<Vec<(ExperimentPath, Mark)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn start(&self, path: &ExperimentPath) {
        self.marks.lock().push((path.clone(), Mark::Start));
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
    }

    fn end(&self, path: &ExperimentPath) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.marks.lock().push((path.clone(), Mark::End));
    }

    pub fn marks(&self) -> Vec<(ExperimentPath, Mark)> {
        self.marks.lock().clone()
    }

    fn position(&self, path: &ExperimentPath, mark: Mark) -> Option<usize> {
        self.marks
            .lock()
            .iter()
            .position(|(marked, kind)| marked == path && *kind == mark)
    }

    pub fn started(&self, path: &ExperimentPath) -> Option<usize> {
        self.position(path, Mark::Start)
    }

    pub fn ended(&self, path: &ExperimentPath) -> Option<usize> {
        self.position(path, Mark::End)
    }

    /// Paths in the order they started
    pub fn conducted(&self) -> Vec<ExperimentPath> {
        self.marks
            .lock()
            .iter()
            .filter(|(_, mark)| *mark == Mark::Start)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Check that `first` ended before `second` started
    pub fn finished_before(&self, first: &ExperimentPath, second: &ExperimentPath) -> bool {
        match (self.ended(first), self.started(second)) {
            (Some(end), Some(start)) => end < start,
            _ => false,
        }
    }

    pub fn overlapped(&self, a: &ExperimentPath, b: &ExperimentPath) -> bool {
        match (self.started(a), self.ended(a), self.started(b), self.ended(b)) {
            (Some(start_a), Some(end_a), Some(start_b), Some(end_b)) => start_a < end_b && start_b < end_a,
            _ => false,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

/// Conductor recording its runs on a [`Timeline`]
///
/// Reads every declared input, then prepares and observes its productions
/// with the instruction variable of the same id, or its path as a string.
#[derive(Debug)]
pub struct RecordingConductor {
    id: String,
    declaration: Declaration,
    timeline: Arc<Timeline>,
    delay: Duration,
    failing: bool,
    inputs: Mutex<BTreeMap<ExperimentPath, Vec<Value>>>,
}

impl RecordingConductor {
    pub fn new(id: impl Into<String>, declaration: Declaration, timeline: &Arc<Timeline>) -> Self {
        Self {
            id: id.into(),
            declaration,
            timeline: Arc::clone(timeline),
            delay: Duration::ZERO,
            failing: false,
            inputs: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Input values read when conducting `path`
    pub fn inputs(&self, path: &ExperimentPath) -> Vec<Value> {
        self.inputs.lock().get(path).cloned().unwrap_or_default()
    }

    fn read(&self, context: &dyn ExecutionContext) -> Result<Vec<Value>, ConductError> {
        let mut values: Vec<ProductValue> = Vec::new();
        for resource in self.declaration.resources() {
            values.push(context.resource_value(resource.provision())?);
        }
        match self.declaration.requirement() {
            Requirement::None => {}
            Requirement::Condition(condition) => values.push(context.condition_value(condition.production())?),
            Requirement::Result(result) => values.extend(context.result_values(result.production())?),
        }
        for additional in self.declaration.additional_requirements() {
            let results = context.additional_result_values(additional.production())?;
            values.extend(results.into_iter().map(|(_, value)| value));
        }
        Ok(values
            .iter()
            .filter_map(|value| value.downcast_ref::<Value>().cloned())
            .collect())
    }
}

#[async_trait]
impl Conductor for RecordingConductor {
    fn id(&self) -> &str {
        &self.id
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    async fn conduct(&self, context: &dyn ExecutionContext) -> Result<(), ConductError> {
        let path = context.path().clone();
        self.timeline.start(&path);
        let outcome = self.perform(context).await;
        self.timeline.end(&path);
        outcome
    }
}

impl RecordingConductor {
    async fn perform(&self, context: &dyn ExecutionContext) -> Result<(), ConductError> {
        let inputs = self.read(context)?;
        self.inputs.lock().insert(context.path().clone(), inputs);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        context.proceed();
        context.check_terminated()?;
        if self.failing {
            return Err(ConductError::failed(format!("{} failed at {}", self.id, context.path())));
        }

        for production in self.declaration.productions() {
            let value = context
                .variables()
                .value(production.id())
                .cloned()
                .unwrap_or_else(|| Value::String(context.path().to_string()));
            let value: ProductValue = Arc::new(value);
            if production.is_condition() {
                context.prepare_value(production, value)?;
            } else if production.is_result() {
                context.observe_value(production, value)?;
            }
        }
        Ok(())
    }
}

/// Storage backed by a path to resource names map
#[derive(Debug, Default)]
pub struct MemoryStorage {
    resources: Mutex<BTreeMap<ExperimentPath, Vec<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist(&self, path: &ExperimentPath, name: &str) {
        self.resources
            .lock()
            .entry(path.clone())
            .or_default()
            .push(name.to_string());
    }
}

impl StorageLocator for MemoryStorage {
    fn location(&self, path: &ExperimentPath) -> io::Result<Location<'_>> {
        let names = self.resources.lock().get(path).cloned().unwrap_or_default();
        let path = path.clone();
        Ok(Box::new(names.into_iter().map(move |name| {
            Ok(PersistedResource {
                path: path.clone(),
                name,
                file: None,
            })
        })))
    }
}

/// Storage failing for selected paths
#[derive(Debug, Default)]
pub struct FailingStorage {
    failing: Vec<ExperimentPath>,
    failing_entries: Vec<ExperimentPath>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail opening the location of `path`
    #[must_use]
    pub fn failing_at(mut self, path: ExperimentPath) -> Self {
        self.failing.push(path);
        self
    }

    /// Open the location of `path`, then fail reading its first entry
    #[must_use]
    pub fn failing_entries_at(mut self, path: ExperimentPath) -> Self {
        self.failing_entries.push(path);
        self
    }
}

impl StorageLocator for FailingStorage {
    fn location(&self, path: &ExperimentPath) -> io::Result<Location<'_>> {
        if self.failing.contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, format!("cannot open {path}")));
        }
        if self.failing_entries.contains(path) {
            let error = io::Error::new(io::ErrorKind::Other, format!("cannot read entry of {path}"));
            return Ok(Box::new(std::iter::once(Err(error))));
        }
        Ok(Box::new(std::iter::empty()))
    }
}

pub fn path(s: &str) -> ExperimentPath {
    s.parse().unwrap()
}

pub fn instruction(id: &str, conductor: Arc<dyn Conductor>) -> Instruction {
    Instruction::define(id, conductor).unwrap()
}

pub fn scheduler(max_concurrency: usize) -> Scheduler {
    scheduler_with(Environment::builder().build(), max_concurrency)
}

pub fn scheduler_with(environment: Environment, max_concurrency: usize) -> Scheduler {
    let config = SchedulerConfig::new()
        .with_max_concurrency(max_concurrency)
        .with_resource_timeout(Duration::from_millis(200));
    Scheduler::new(Arc::new(environment), config)
}

/// Productions and recording conductors of a vacuum chamber experiment
///
/// - `chamber` prepares `vacuum`
/// - `measure` runs under `vacuum`, holds the `stage`, observes `spectrum`
///   and `reference`
/// - `analyse` consumes its parent's `spectrum` and the `reference`s found at
///   the paths listed in its `references` variable
pub struct Lab {
    pub timeline: Arc<Timeline>,
    pub vacuum: Preparation<Value>,
    pub spectrum: Observation<Value>,
    pub reference: Observation<Value>,
    pub stage: Provision<Value>,
    pub chamber: Arc<RecordingConductor>,
    pub measure: Arc<RecordingConductor>,
    pub analyse: Arc<RecordingConductor>,
}

impl Lab {
    pub fn new(evaluation: Evaluation, delay: Duration) -> Self {
        let timeline = Timeline::new();
        let vacuum = Preparation::<Value>::define("vacuum", evaluation);
        let spectrum = Observation::<Value>::define("spectrum");
        let reference = Observation::<Value>::define("reference");
        let stage = Provision::<Value>::define("stage");

        let chamber = RecordingConductor::new("chamber", Declaration::new().with_production(&vacuum), &timeline)
            .with_delay(delay);
        let measure = RecordingConductor::new(
            "measure",
            Declaration::new()
                .with_requirement(Requirement::condition(&vacuum))
                .with_resource(&stage)
                .with_production(&spectrum)
                .with_production(&reference),
            &timeline,
        )
        .with_delay(delay);
        let analyse = RecordingConductor::new(
            "analyse",
            Declaration::new()
                .with_requirement(Requirement::result(&spectrum))
                .with_additional(AdditionalRequirement::new(&reference, VariablePaths::new("references"))),
            &timeline,
        )
        .with_delay(delay);

        Self {
            timeline,
            vacuum,
            spectrum,
            reference,
            stage,
            chamber: Arc::new(chamber),
            measure: Arc::new(measure),
            analyse: Arc::new(analyse),
        }
    }

    /// Environment holding the exclusive `stage`
    pub fn environment(&self) -> Environment {
        Environment::builder()
            .with_exclusive(&self.stage, Value::from("stage-1"))
            .build()
    }

    /// `/chamber` with measurements `b1` and `b2`, and `/chamber/b2/fit`
    /// analysing `b2` against the reference of `b1`
    pub fn procedure(&self) -> Procedure {
        Procedure::define("run").unwrap().with_instruction(
            instruction("chamber", self.chamber.clone())
                .with_child(instruction("b1", self.measure.clone()))
                .with_child(
                    instruction("b2", self.measure.clone()).with_child(
                        instruction("fit", self.analyse.clone())
                            .with_variable("references", Value::from(vec!["../../b1"])),
                    ),
                ),
        )
    }
}
