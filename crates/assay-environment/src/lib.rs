//! Assay Environment - resource provisioning for instructions
//!
//! Resources come in two kinds:
//! - shared resources, obtainable at any time and never blocking
//! - exclusive resources, held by at most one [`LocalEnvironment`] lease
//!
//! # Example
//!
//! ```rust
//! use assay_declaration::{Production, Provision};
//! use assay_environment::Environment;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stage = Provision::<String>::define("stage");
//! let environment = Arc::new(Environment::builder().with_exclusive(&stage, "xy".into()).build());
//!
//! let mut lease = environment.open_local();
//! lease.acquire_resources([stage.erased()], Duration::from_secs(1)).await?;
//! assert_eq!(*lease.provide_resource(&stage)?, "xy");
//! lease.close();
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod environment;
pub mod error;
pub mod local;

pub use environment::{Environment, EnvironmentBuilder, ResourceValue, SharedEnvironment};
pub use error::{EnvironmentError, Unavailability};
pub use local::{LocalEnvironment, Resource};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
