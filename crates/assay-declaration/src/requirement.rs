//! Consumer-side requirements on productions
//!
//! An instruction has at most one [`Requirement`] on its parent, any number
//! of [`ResourceRequirement`]s on the environment, and any number of
//! [`AdditionalRequirement`]s whose dependency paths are computed lazily from
//! the instruction's path and variables.

use crate::path::ExperimentPath;
use crate::production::{AnyProduction, Observation, Preparation, Production, Provision};
use crate::variables::Variables;
use std::fmt;
use std::sync::Arc;

/// How many upstream results satisfy a result requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cardinality {
    /// One value; when the upstream observed several, the last one wins
    #[default]
    Single,
    /// Every value observed
    Multiple,
}

/// Requirement on a condition prepared by the parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionRequirement {
    production: AnyProduction,
}

impl ConditionRequirement {
    /// Required condition
    #[inline]
    #[must_use]
    pub fn production(&self) -> &AnyProduction {
        &self.production
    }
}

/// Requirement on a result observed by the parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRequirement {
    production: AnyProduction,
    cardinality: Cardinality,
}

impl ResultRequirement {
    /// Required result
    #[inline]
    #[must_use]
    pub fn production(&self) -> &AnyProduction {
        &self.production
    }

    /// Cardinality
    #[inline]
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

/// Requirement of an instruction on its parent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Requirement {
    /// Independent of the parent
    #[default]
    None,
    /// Runs while the parent holds a condition
    Condition(ConditionRequirement),
    /// Consumes a result of the parent
    Result(ResultRequirement),
}

impl Requirement {
    /// Require a condition
    #[must_use]
    pub fn condition<T>(preparation: &Preparation<T>) -> Self {
        Self::Condition(ConditionRequirement {
            production: preparation.erased().clone(),
        })
    }

    /// Require a single result
    #[must_use]
    pub fn result<T>(observation: &Observation<T>) -> Self {
        Self::Result(ResultRequirement {
            production: observation.erased().clone(),
            cardinality: Cardinality::Single,
        })
    }

    /// Require every value of a result
    #[must_use]
    pub fn results<T>(observation: &Observation<T>) -> Self {
        Self::Result(ResultRequirement {
            production: observation.erased().clone(),
            cardinality: Cardinality::Multiple,
        })
    }

    /// Build from an erased production
    ///
    /// Returns `None` if the production is an environment resource.
    #[must_use]
    pub fn on(production: &AnyProduction, cardinality: Cardinality) -> Option<Self> {
        if production.is_condition() {
            Some(Self::Condition(ConditionRequirement {
                production: production.clone(),
            }))
        } else if production.is_result() {
            Some(Self::Result(ResultRequirement {
                production: production.clone(),
                cardinality,
            }))
        } else {
            None
        }
    }

    /// Targeted production (if any)
    #[must_use]
    pub fn production(&self) -> Option<&AnyProduction> {
        match self {
            Self::None => None,
            Self::Condition(requirement) => Some(requirement.production()),
            Self::Result(requirement) => Some(requirement.production()),
        }
    }

    /// Check if this is the empty requirement
    #[inline]
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Requirement on a resource from the environment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRequirement {
    provision: AnyProduction,
}

impl ResourceRequirement {
    /// Require a resource
    #[must_use]
    pub fn on<T>(provision: &Provision<T>) -> Self {
        Self {
            provision: provision.erased().clone(),
        }
    }

    /// Build from an erased production
    ///
    /// Returns `None` unless the production is an environment resource.
    #[must_use]
    pub fn on_any(production: &AnyProduction) -> Option<Self> {
        production.is_resource().then(|| Self {
            provision: production.clone(),
        })
    }

    /// Required resource
    #[inline]
    #[must_use]
    pub fn provision(&self) -> &AnyProduction {
        &self.provision
    }
}

/// Computes dependency paths from an instruction's path and variables
///
/// Implementations must be pure: the same inputs always yield the same
/// paths. Relative paths are resolved against the instruction's path.
pub trait DependencyResolver: Send + Sync {
    /// Dependency paths for an instruction
    fn resolve<'a>(
        &'a self,
        path: &'a ExperimentPath,
        variables: &'a Variables,
    ) -> Box<dyn Iterator<Item = ExperimentPath> + 'a>;
}

/// Resolver backed by a closure
pub struct FnResolver<F>(F);

impl<F> DependencyResolver for FnResolver<F>
where
    F: Fn(&ExperimentPath, &Variables) -> Vec<ExperimentPath> + Send + Sync,
{
    fn resolve<'a>(
        &'a self,
        path: &'a ExperimentPath,
        variables: &'a Variables,
    ) -> Box<dyn Iterator<Item = ExperimentPath> + 'a> {
        Box::new((self.0)(path, variables).into_iter())
    }
}

/// Resolver reading relative paths from a variable
///
/// The variable holds a path string or an array of path strings. Entries
/// that are not valid paths are skipped.
#[derive(Debug, Clone)]
pub struct VariablePaths {
    variable: String,
}

impl VariablePaths {
    /// Read paths from the named variable
    #[inline]
    #[must_use]
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }

    /// Variable id
    #[inline]
    #[must_use]
    pub fn variable(&self) -> &str {
        &self.variable
    }
}

impl DependencyResolver for VariablePaths {
    fn resolve<'a>(
        &'a self,
        _path: &'a ExperimentPath,
        variables: &'a Variables,
    ) -> Box<dyn Iterator<Item = ExperimentPath> + 'a> {
        let values: Vec<&serde_json::Value> = match variables.value(&self.variable) {
            Some(serde_json::Value::Array(values)) => values.iter().collect(),
            Some(value) => vec![value],
            None => Vec::new(),
        };
        Box::new(
            values
                .into_iter()
                .filter_map(serde_json::Value::as_str)
                .filter_map(|path| path.parse().ok()),
        )
    }
}

/// Requirement whose dependency paths depend on runtime configuration
///
/// The targeted production is looked up on the instruction at each resolved
/// path. Resolution happens at scheduling and comparison time, never at
/// declaration time.
#[derive(Clone)]
pub struct AdditionalRequirement {
    production: AnyProduction,
    cardinality: Cardinality,
    resolver: Arc<dyn DependencyResolver>,
}

impl AdditionalRequirement {
    /// Create with a resolver
    #[must_use]
    pub fn new<T>(observation: &Observation<T>, resolver: impl DependencyResolver + 'static) -> Self {
        Self::on_any(observation.erased(), resolver)
    }

    /// Create with a closure resolver
    #[must_use]
    pub fn from_fn<T, F>(observation: &Observation<T>, resolve: F) -> Self
    where
        F: Fn(&ExperimentPath, &Variables) -> Vec<ExperimentPath> + Send + Sync + 'static,
    {
        Self::new(observation, FnResolver(resolve))
    }

    /// Create from an erased production
    #[must_use]
    pub fn on_any(production: &AnyProduction, resolver: impl DependencyResolver + 'static) -> Self {
        Self {
            production: production.clone(),
            cardinality: Cardinality::Multiple,
            resolver: Arc::new(resolver),
        }
    }

    /// Set cardinality
    #[inline]
    #[must_use]
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Targeted production
    #[inline]
    #[must_use]
    pub fn production(&self) -> &AnyProduction {
        &self.production
    }

    /// Cardinality
    #[inline]
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Dependency paths as written by the resolver
    pub fn dependencies<'a>(
        &'a self,
        path: &'a ExperimentPath,
        variables: &'a Variables,
    ) -> impl Iterator<Item = ExperimentPath> + 'a {
        self.resolver.resolve(path, variables)
    }

    /// Dependency paths resolved against an absolute instruction path
    ///
    /// Paths climbing past the root are dropped.
    pub fn resolved_dependencies<'a>(
        &'a self,
        path: &'a ExperimentPath,
        variables: &'a Variables,
    ) -> impl Iterator<Item = ExperimentPath> + 'a {
        self.dependencies(path, variables)
            .filter_map(move |dependency| dependency.resolve_against(path).ok())
    }
}

impl fmt::Debug for AdditionalRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdditionalRequirement")
            .field("production", &self.production)
            .field("cardinality", &self.cardinality)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::production::Evaluation;
    use serde_json::json;

    #[test]
    fn requirement_targets() {
        let condition = Preparation::<()>::define("vacuum", Evaluation::Parallel);
        let requirement = Requirement::condition(&condition);
        assert_eq!(requirement.production(), Some(condition.erased()));
        assert!(Requirement::None.production().is_none());
    }

    #[test]
    fn result_cardinality() {
        let spectrum = Observation::<Vec<f64>>::define_multiple("spectrum");
        match Requirement::results(&spectrum) {
            Requirement::Result(result) => assert_eq!(result.cardinality(), Cardinality::Multiple),
            other => panic!("unexpected requirement {other:?}"),
        }
    }

    #[test]
    fn erased_requirement_rejects_resources() {
        let provision = Provision::<u8>::define("laser");
        assert!(Requirement::on(provision.erased(), Cardinality::Single).is_none());
        assert!(ResourceRequirement::on_any(provision.erased()).is_some());
    }

    #[test]
    fn variable_paths_resolver() {
        let calibration = Observation::<f64>::define("calibration");
        let requirement = AdditionalRequirement::new(&calibration, VariablePaths::new("calibrations"));

        let path: ExperimentPath = "/sample/measure".parse().unwrap();
        let variables = Variables::new().with_value("calibrations", json!(["../reference", 7, "/other"]));

        let resolved: Vec<String> = requirement
            .resolved_dependencies(&path, &variables)
            .map(|path| path.to_string())
            .collect();
        assert_eq!(resolved, vec!["/sample/reference", "/other"]);
    }

    #[test]
    fn closure_resolver_is_lazy_per_call() {
        let calibration = Observation::<f64>::define("calibration");
        let requirement = AdditionalRequirement::from_fn(&calibration, |path, variables| {
            variables
                .value("sibling")
                .and_then(serde_json::Value::as_str)
                .map(|id| vec![path.parent().unwrap_or_else(ExperimentPath::define_absolute).resolve(id)])
                .unwrap_or_default()
        });

        let path: ExperimentPath = "/a/b".parse().unwrap();
        assert_eq!(requirement.dependencies(&path, &Variables::new()).count(), 0);

        let variables = Variables::new().with_value("sibling", json!("c"));
        let dependencies: Vec<_> = requirement.dependencies(&path, &variables).collect();
        assert_eq!(dependencies, vec!["/a/c".parse().unwrap()]);
    }
}
