//! Scheduler and live schedules
//!
//! [`Scheduler::schedule`] analyses a procedure and returns a [`Schedule`].
//! Conducting a schedule spawns one task per instruction. Each task:
//! 1. waits until every dependency reached a final state
//! 2. takes the gate of a serialized condition, then a concurrency permit
//! 3. acquires its exclusive resources from a fresh lease
//! 4. dispatches to the bound conductor and commits its outputs
//!
//! Interrupt stops steps that have not started; terminate also signals the
//! running conductors. Neither undoes work in flight.

use crate::conflicts::Conflicts;
use crate::config::SchedulerConfig;
use crate::context::StepContext;
use crate::error::ScheduleError;
use crate::event::{EventBus, SchedulingEvent, Subscription};
use crate::products::{Products, ScheduleReport, StepOutputs, StepRecord, StepState};
use crate::storage::StorageLocator;
use assay_declaration::{AnyProduction, ExperimentPath, Identity, Requirement, ResourceRequirement};
use assay_environment::Environment;
use assay_procedure::{ConductError, Procedure, ProcedureDependencies};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;
use ulid::Ulid;

/// Lifecycle of a schedule as seen by its steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Interrupted,
    Terminated,
}

/// Turns procedures into schedules over one environment
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    environment: Arc<Environment>,
    events: Arc<EventBus>,
}

impl Scheduler {
    /// Create scheduler
    #[must_use]
    pub fn new(environment: Arc<Environment>, config: SchedulerConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer));
        Self {
            config,
            environment,
            events,
        }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Environment every schedule draws resources from
    #[inline]
    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Event bus shared by every schedule
    #[inline]
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Subscribe to the events of every schedule
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Schedule every instruction of a procedure
    ///
    /// # Errors
    /// - [`ScheduleError::Config`] for an invalid configuration
    /// - [`ScheduleError::Procedure`] if dependencies cannot be resolved
    pub fn schedule(&self, procedure: &Procedure) -> Result<Schedule, ScheduleError> {
        self.config.validate()?;
        let dependencies = ProcedureDependencies::analyze(procedure)?;
        Ok(self.materialize(procedure, dependencies, BTreeMap::new()))
    }

    /// Schedule a procedure, reusing the outputs of a previous schedule
    ///
    /// A step is carried over when its change against the previous products
    /// does not conflict, it completed or was reused before, and every step
    /// whose outputs it consumes is carried over too.
    ///
    /// # Errors
    /// See [`Scheduler::schedule`]
    pub fn reschedule(
        &self,
        previous: &Schedule,
        procedure: &Procedure,
        storage: &dyn StorageLocator,
    ) -> Result<Schedule, ScheduleError> {
        self.config.validate()?;
        let dependencies = ProcedureDependencies::analyze(procedure)?;
        let conflicts = previous.compare(procedure, storage);

        let mut reused: BTreeMap<ExperimentPath, Arc<StepOutputs>> = BTreeMap::new();
        for path in dependencies.order() {
            let unchanged = conflicts.change(path).is_some_and(|change| !change.is_conflicting());
            let succeeded = previous.step_state(path).is_some_and(|state| state.is_success());
            let inputs_reused = dependencies
                .dependencies_of(path)
                .iter()
                .filter(|dependency| dependency.kind.consumes_output())
                .all(|dependency| reused.contains_key(&dependency.dependency));
            if unchanged && succeeded && inputs_reused {
                if let Some(outputs) = previous.outputs(path) {
                    reused.insert(path.clone(), outputs);
                }
            }
        }

        tracing::debug!(
            previous = %previous.id(),
            procedure = procedure.id(),
            reused = reused.len(),
            "rescheduled procedure"
        );
        Ok(self.materialize(procedure, dependencies, reused))
    }

    fn materialize(
        &self,
        procedure: &Procedure,
        dependencies: ProcedureDependencies,
        reused: BTreeMap<ExperimentPath, Arc<StepOutputs>>,
    ) -> Schedule {
        let states = dependencies
            .order()
            .iter()
            .map(|path| {
                let initial = if reused.contains_key(path) {
                    StepState::Reused
                } else {
                    StepState::Pending
                };
                (path.clone(), watch::channel(initial).0)
            })
            .collect();

        let gates = condition_gates(procedure);
        let outputs: DashMap<ExperimentPath, Arc<StepOutputs>> = reused.into_iter().collect();

        let inner = ScheduleInner {
            id: Ulid::new(),
            procedure: procedure.clone(),
            products: RwLock::new(Products::from_procedure(procedure)),
            dependencies,
            config: self.config.clone(),
            environment: Arc::clone(&self.environment),
            events: Arc::clone(&self.events),
            control: watch::channel(Control::Running).0,
            states,
            outputs,
            timings: DashMap::new(),
            gates,
            concurrency: Arc::new(Semaphore::new(self.config.max_concurrency)),
            conducted: AtomicBool::new(false),
        };
        tracing::debug!(schedule = %inner.id, procedure = procedure.id(), steps = inner.states.len(), "scheduled procedure");
        Schedule { inner: Arc::new(inner) }
    }
}

/// One gate per (parent, condition) for conditions whose dependents must not
/// overlap
fn condition_gates(procedure: &Procedure) -> BTreeMap<(ExperimentPath, Identity), Arc<Semaphore>> {
    let mut gates = BTreeMap::new();
    for (path, instruction) in procedure.instructions() {
        let Requirement::Condition(condition) = instruction.conductor().declaration().requirement() else {
            continue;
        };
        let production = condition.production();
        let serialized = production.evaluation().is_some_and(|evaluation| evaluation.is_serialized());
        if let (true, Some(parent)) = (serialized, path.parent()) {
            gates
                .entry((parent, production.identity()))
                .or_insert_with(|| Arc::new(Semaphore::new(1)));
        }
    }
    gates
}

#[derive(Debug, Clone, Copy, Default)]
struct Timing {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

pub(crate) struct ScheduleInner {
    id: Ulid,
    procedure: Procedure,
    products: RwLock<Products>,
    dependencies: ProcedureDependencies,
    config: SchedulerConfig,
    environment: Arc<Environment>,
    events: Arc<EventBus>,
    control: watch::Sender<Control>,
    states: BTreeMap<ExperimentPath, watch::Sender<StepState>>,
    outputs: DashMap<ExperimentPath, Arc<StepOutputs>>,
    timings: DashMap<ExperimentPath, Timing>,
    gates: BTreeMap<(ExperimentPath, Identity), Arc<Semaphore>>,
    concurrency: Arc<Semaphore>,
    conducted: AtomicBool,
}

impl ScheduleInner {
    pub(crate) fn id(&self) -> Ulid {
        self.id
    }

    pub(crate) fn outputs_at(&self, path: &ExperimentPath) -> Option<Arc<StepOutputs>> {
        self.outputs.get(path).map(|outputs| Arc::clone(outputs.value()))
    }

    pub(crate) fn publish(&self, event: &SchedulingEvent) {
        self.events.publish(event);
    }

    pub(crate) fn is_terminated(&self) -> bool {
        *self.control.borrow() == Control::Terminated
    }

    fn is_running(&self) -> bool {
        *self.control.borrow() == Control::Running
    }

    /// Run a future unless the schedule is interrupted or terminated first
    async fn unless_stopped<F: Future>(&self, future: F) -> Option<F::Output> {
        let mut control = self.control.subscribe();
        let stopped = async move {
            let _ = control.wait_for(|control| *control != Control::Running).await;
        };
        tokio::select! {
            biased;
            () = stopped => None,
            output = future => Some(output),
        }
    }

    /// Move a step out of `Pending` or `Running`; final states are kept
    fn settle(&self, path: &ExperimentPath, next: StepState) -> bool {
        let Some(state) = self.states.get(path) else {
            return false;
        };
        state.send_if_modified(|state| {
            if state.is_final() {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    fn gate(&self, path: &ExperimentPath) -> Option<Arc<Semaphore>> {
        let instruction = self.procedure.instruction(path)?;
        let Requirement::Condition(condition) = instruction.conductor().declaration().requirement() else {
            return None;
        };
        let key = (path.parent()?, condition.production().identity());
        self.gates.get(&key).cloned()
    }

    /// First dependency that did not leave outputs behind, once every
    /// dependency is final; `None` from the outer option means stopped
    async fn await_dependencies(&self, path: &ExperimentPath) -> Option<Option<ExperimentPath>> {
        let mut unsatisfied = None;
        for dependency in self.dependencies.dependencies_of(path) {
            let Some(upstream) = self.states.get(&dependency.dependency) else {
                continue;
            };
            let mut receiver = upstream.subscribe();
            let finished = async move { receiver.wait_for(StepState::is_final).await.ok().map(|state| (*state).clone()) };
            let state = self.unless_stopped(finished).await??;
            if unsatisfied.is_none() && dependency.kind.consumes_output() && !state.is_success() {
                unsatisfied = Some(dependency.dependency.clone());
            }
        }
        Some(unsatisfied)
    }

    async fn run_step(self: Arc<Self>, path: ExperimentPath) {
        let span = tracing::debug_span!("step", schedule = %self.id, path = %path);
        self.step(&path).instrument(span).await;
    }

    async fn step(&self, path: &ExperimentPath) {
        let Some(state) = self.states.get(path) else {
            return;
        };
        if state.borrow().is_final() {
            return;
        }

        let Some(unsatisfied) = self.await_dependencies(path).await else {
            self.settle(path, StepState::Cancelled);
            return;
        };
        if let Some(dependency) = unsatisfied {
            tracing::debug!(dependency = %dependency, "dependency did not complete, skipping");
            self.settle(path, StepState::Skipped(dependency));
            return;
        }

        let gate = match self.gate(path) {
            Some(gate) => match self.unless_stopped(gate.acquire_owned()).await {
                Some(Ok(permit)) => Some(permit),
                _ => {
                    self.settle(path, StepState::Cancelled);
                    return;
                }
            },
            None => None,
        };
        let Some(Ok(_permit)) = self.unless_stopped(Arc::clone(&self.concurrency).acquire_owned()).await else {
            self.settle(path, StepState::Cancelled);
            return;
        };

        let started = state.send_if_modified(|state| {
            if *state == StepState::Pending {
                *state = StepState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }
        if !self.is_running() {
            self.settle(path, StepState::Cancelled);
            return;
        }

        self.timings.insert(
            path.clone(),
            Timing {
                started_at: Some(Utc::now()),
                finished_at: None,
            },
        );
        self.publish(&SchedulingEvent::BeginStep {
            schedule: self.id,
            path: path.clone(),
        });

        let outcome = self.conduct_step(path).await;
        let next = match outcome {
            Ok(outputs) => {
                self.outputs.insert(path.clone(), Arc::new(outputs));
                StepState::Completed
            }
            Err(ConductError::Terminated) => StepState::Cancelled,
            Err(error) => {
                tracing::debug!(%error, "step failed");
                StepState::Failed(error.to_string())
            }
        };

        if let Some(mut timing) = self.timings.get_mut(path) {
            timing.finished_at = Some(Utc::now());
        }
        self.settle(path, next.clone());
        self.publish(&SchedulingEvent::CompleteStep {
            schedule: self.id,
            path: path.clone(),
            state: next,
        });
        drop(gate);
    }

    async fn conduct_step(&self, path: &ExperimentPath) -> Result<StepOutputs, ConductError> {
        let instruction = self
            .procedure
            .instruction(path)
            .ok_or_else(|| ConductError::failed(format!("no instruction at {path}")))?;
        let conductor = instruction.conductor();

        let mut lease = self.environment.open_local();
        let provisions: Vec<&AnyProduction> = conductor
            .declaration()
            .resources()
            .iter()
            .map(ResourceRequirement::provision)
            .collect();
        lease.acquire_resources(provisions, self.config.resource_timeout()).await?;

        let outcome = {
            let context = StepContext::new(self, path, instruction, &lease);
            match AssertUnwindSafe(conductor.conduct(&context)).catch_unwind().await {
                Ok(Ok(())) => Ok(context.into_outputs()),
                Ok(Err(error)) => Err(error),
                Err(panic) => Err(ConductError::failed(panic_message(panic.as_ref()))),
            }
        };
        lease.close();
        outcome
    }

    fn report(&self) -> ScheduleReport {
        let steps = self
            .states
            .iter()
            .map(|(path, state)| {
                let timing = self.timings.get(path).map(|timing| *timing).unwrap_or_default();
                let record = StepRecord {
                    state: state.borrow().clone(),
                    started_at: timing.started_at,
                    finished_at: timing.finished_at,
                };
                (path.clone(), record)
            })
            .collect();
        ScheduleReport {
            schedule: self.id,
            procedure: self.procedure.id().to_string(),
            terminated: self.is_terminated(),
            steps,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("conductor panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("conductor panicked: {message}")
    } else {
        "conductor panicked".to_string()
    }
}

/// Materialized procedure being conducted
///
/// Cloning shares the schedule, so one clone can interrupt or terminate
/// while another conducts.
#[derive(Clone)]
pub struct Schedule {
    inner: Arc<ScheduleInner>,
}

impl Schedule {
    /// Schedule id
    #[inline]
    #[must_use]
    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    /// Scheduled procedure
    #[inline]
    #[must_use]
    pub fn procedure(&self) -> &Procedure {
        &self.inner.procedure
    }

    /// Dependency graph the schedule follows
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &ProcedureDependencies {
        &self.inner.dependencies
    }

    /// Snapshot of the scheduled instructions
    #[must_use]
    pub fn products(&self) -> Products {
        self.inner.products.read().clone()
    }

    /// Current state of a step
    #[must_use]
    pub fn step_state(&self, path: &ExperimentPath) -> Option<StepState> {
        self.inner.states.get(path).map(|state| state.borrow().clone())
    }

    /// Outputs of a completed or reused step
    #[must_use]
    pub fn outputs(&self, path: &ExperimentPath) -> Option<Arc<StepOutputs>> {
        self.inner.outputs_at(path)
    }

    /// Subscribe to scheduling events
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    /// Conduct every scheduled step
    ///
    /// Returns once every step reached a final state.
    ///
    /// # Errors
    /// - [`ScheduleError::AlreadyConducted`] on a second call
    /// - [`ScheduleError::Runtime`] if a step task ended abnormally
    pub async fn conduct(&self) -> Result<ScheduleReport, ScheduleError> {
        let inner = &self.inner;
        if inner.conducted.swap(true, Ordering::SeqCst) {
            return Err(ScheduleError::AlreadyConducted(inner.id));
        }

        let span = tracing::info_span!("schedule", schedule = %inner.id, procedure = inner.procedure.id());
        async {
            tracing::info!(steps = inner.states.len(), "conducting procedure");
            inner.publish(&SchedulingEvent::BeginProcedure {
                schedule: inner.id,
                procedure: inner.procedure.id().to_string(),
            });

            let mut tasks = JoinSet::new();
            for path in inner.dependencies.order() {
                tasks.spawn(Arc::clone(inner).run_step(path.clone()));
            }
            while let Some(joined) = tasks.join_next().await {
                joined.map_err(|error| ScheduleError::Runtime(error.to_string()))?;
            }

            let report = inner.report();
            if !report.terminated {
                inner.publish(&SchedulingEvent::CompleteProcedure {
                    schedule: inner.id,
                    procedure: inner.procedure.id().to_string(),
                });
            }
            tracing::info!(success = report.is_success(), "procedure finished");
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Stop starting new steps
    ///
    /// Running steps finish normally. Returns `false` if already interrupted
    /// or terminated.
    pub fn interrupt(&self) -> bool {
        let changed = self.inner.control.send_if_modified(|control| {
            if *control == Control::Running {
                *control = Control::Interrupted;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(schedule = %self.inner.id, "schedule interrupted");
            self.inner.publish(&SchedulingEvent::Interrupt { schedule: self.inner.id });
        }
        changed
    }

    /// End the schedule
    ///
    /// No new steps start and running conductors observe termination through
    /// their context. Returns `false` if already terminated.
    pub fn terminate(&self) -> bool {
        let changed = self.inner.control.send_if_modified(|control| {
            if *control == Control::Terminated {
                false
            } else {
                *control = Control::Terminated;
                true
            }
        });
        if changed {
            tracing::info!(schedule = %self.inner.id, "schedule terminated");
            self.inner.publish(&SchedulingEvent::Terminate { schedule: self.inner.id });
        }
        changed
    }

    /// Check if the schedule was terminated
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Remove steps that have not started
    ///
    /// Returns the paths actually removed; running and finished steps are
    /// left alone. Steps consuming a removed step's outputs are skipped.
    pub fn unschedule_steps<'a>(&self, paths: impl IntoIterator<Item = &'a ExperimentPath>) -> Vec<ExperimentPath> {
        let mut removed = Vec::new();
        for path in paths {
            let Some(state) = self.inner.states.get(path) else {
                continue;
            };
            let unscheduled = state.send_if_modified(|state| {
                if *state == StepState::Pending {
                    *state = StepState::Unscheduled;
                    true
                } else {
                    false
                }
            });
            if unscheduled {
                self.inner.products.write().remove(path);
                removed.push(path.clone());
            }
        }
        tracing::debug!(schedule = %self.inner.id, removed = removed.len(), "unscheduled steps");
        removed
    }

    /// Compare a target procedure against this schedule's products
    #[must_use]
    pub fn compare(&self, target: &Procedure, storage: &dyn StorageLocator) -> Conflicts {
        Conflicts::compare(&self.products(), target, storage)
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("id", &self.inner.id)
            .field("procedure", &self.inner.procedure.id())
            .field("steps", &self.inner.states.len())
            .field("control", &*self.inner.control.borrow())
            .finish()
    }
}
