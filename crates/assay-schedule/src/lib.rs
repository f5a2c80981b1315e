//! Assay Schedule - conducting procedures and detecting conflicts
//!
//! Provides:
//! - [`Scheduler`] / [`Schedule`] - dependency-ordered, bounded-concurrency
//!   execution with lifecycle events
//! - [`EventBus`] - subscribe/unsubscribe fan-out of [`SchedulingEvent`]s
//! - [`Products`] - the materialized path to instruction mapping
//! - [`Conflicts`] - per-path comparison of products and a new procedure
//! - [`StorageLocator`] / [`FileSystemStore`] - persisted resources
//! - [`AssayConfig`] / [`ManifestCatalog`] - configuration-declared conductors
//!
//! # Example
//!
//! ```
//! use assay_environment::Environment;
//! use assay_procedure::Procedure;
//! use assay_schedule::{NoStorage, Scheduler, SchedulerConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scheduler = Scheduler::new(Arc::new(Environment::builder().build()), SchedulerConfig::default());
//! let procedure = Procedure::define("empty").unwrap();
//!
//! let schedule = scheduler.schedule(&procedure).unwrap();
//! let report = schedule.conduct().await.unwrap();
//! assert!(report.is_success());
//! assert!(schedule.compare(&procedure, &NoStorage).is_conflict_free());
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod catalog;
pub mod config;
pub mod conflicts;
mod context;
pub mod error;
pub mod event;
pub mod products;
pub mod scheduler;
pub mod storage;

pub use catalog::{ManifestCatalog, ManifestConductor};
pub use config::{
    AdditionalManifest, AssayConfig, ConductorManifest, ConfigError, EnvironmentConfig, ObservedResult,
    ParentRequirement, PreparedCondition, SchedulerConfig,
};
pub use conflicts::{Change, Conflicts};
pub use error::ScheduleError;
pub use event::{EventBus, SchedulingEvent, Subscription, SubscriptionId};
pub use products::{Products, ScheduleReport, ScheduledInstruction, StepOutputs, StepRecord, StepState};
pub use scheduler::{Schedule, Scheduler};
pub use storage::{FileSystemStore, Location, NoStorage, PersistedResource, StorageLocator};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
