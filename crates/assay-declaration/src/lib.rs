//! Assay Declaration - addressing and typed production model
//!
//! Provides the vocabulary shared by every other assay crate:
//! - [`ExperimentPath`] / [`ProductPath`] for addressing procedure nodes
//! - [`Preparation`], [`Observation`], [`Provision`] productions
//! - [`Requirement`], [`ResourceRequirement`], [`AdditionalRequirement`]
//! - [`Variables`] configuration state
//! - [`Declaration`] of what a conductor offers and needs
//!
//! # Example
//!
//! ```rust
//! use assay_declaration::{Declaration, Evaluation, ExperimentPath, Observation, Preparation, Requirement};
//!
//! let vacuum = Preparation::<()>::define("vacuum", Evaluation::Ordered);
//! let spectrum = Observation::<Vec<f64>>::define("spectrum");
//!
//! let declaration = Declaration::new()
//!     .with_requirement(Requirement::condition(&vacuum))
//!     .with_production(&spectrum);
//! assert!(declaration.validate().is_ok());
//!
//! let path: ExperimentPath = "/sample/acquire".parse().unwrap();
//! assert_eq!(path.parent().unwrap().to_string(), "/sample");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod declaration;
pub mod path;
pub mod production;
pub mod requirement;
pub mod variables;

pub use declaration::Declaration;
pub use path::{validate_id, ExperimentPath, PathError, ProductPath};
pub use production::{
    AnyProduction, Evaluation, Identity, IdentityMap, Observation, Preparation, Production,
    ProductionKind, Provision,
};
pub use requirement::{
    AdditionalRequirement, Cardinality, ConditionRequirement, DependencyResolver, FnResolver,
    Requirement, ResourceRequirement, ResultRequirement, VariablePaths,
};
pub use variables::{Variable, Variables};

/// Errors in conductor declarations and configuration state
#[derive(Debug, thiserror::Error)]
pub enum DeclarationError {
    /// Two offered productions share an id
    #[error("duplicate production id: {0}")]
    DuplicateProduction(String),

    /// Environment resources cannot be offered by a conductor
    #[error("production '{0}' is an environment resource and cannot be offered")]
    NotOfferable(String),

    /// Resource requirement on something the environment does not provide
    #[error("resource requirement on '{0}' does not target an environment resource")]
    NotProvision(String),

    /// Variable value has the wrong shape
    #[error("variable '{id}': {source}")]
    Variable {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid path or id
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
