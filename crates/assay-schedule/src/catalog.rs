//! Conductors declared in configuration
//!
//! [`ManifestCatalog`] turns the `[[conductors]]` and `[environment]`
//! sections of an [`AssayConfig`] into [`ManifestConductor`]s and a matching
//! [`Environment`]. Productions are JSON values and are shared by id: every
//! manifest naming `vacuum` refers to the same production.

use crate::config::{AssayConfig, ConductorManifest, ConfigError};
use assay_declaration::{
    AdditionalRequirement, AnyProduction, Cardinality, Declaration, Observation, Preparation, Provision,
    Requirement, ResourceRequirement, VariablePaths,
};
use assay_environment::Environment;
use assay_procedure::{ConductError, Conductor, ConductorCatalog, ExecutionContext, ProductValue};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Conductor whose declaration comes from a manifest
///
/// Conducting reads every declared input, then prepares or observes each
/// offered production with the instruction variable of the same id, or
/// `null` when unset.
#[derive(Debug)]
pub struct ManifestConductor {
    id: String,
    declaration: Declaration,
}

impl ManifestConductor {
    /// Create from a declaration
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, declaration: Declaration) -> Self {
        Self {
            id: id.into(),
            declaration,
        }
    }
}

#[async_trait]
impl Conductor for ManifestConductor {
    fn id(&self) -> &str {
        &self.id
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    async fn conduct(&self, context: &dyn ExecutionContext) -> Result<(), ConductError> {
        for resource in self.declaration.resources() {
            context.resource_value(resource.provision())?;
        }
        match self.declaration.requirement() {
            Requirement::None => {}
            Requirement::Condition(condition) => {
                context.condition_value(condition.production())?;
            }
            Requirement::Result(result) => {
                context.result_values(result.production())?;
            }
        }
        for additional in self.declaration.additional_requirements() {
            context.additional_result_values(additional.production())?;
        }

        context.proceed();
        context.check_terminated()?;

        for production in self.declaration.productions() {
            let value = context.variables().value(production.id()).cloned().unwrap_or(Value::Null);
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

/// Productions, provisions and conductors built from configuration
#[derive(Debug)]
pub struct ManifestCatalog {
    productions: BTreeMap<String, AnyProduction>,
    provisions: BTreeMap<String, Provision<Value>>,
    shared: BTreeMap<String, Value>,
    exclusive: BTreeMap<String, Value>,
    registry: ConductorCatalog,
}

impl ManifestCatalog {
    /// Build the catalog
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if a production id is declared with
    /// different kinds, a requirement names an undeclared production, or a
    /// conductor declaration is inconsistent
    pub fn from_config(config: &AssayConfig) -> Result<Self, ConfigError> {
        let productions = productions(&config.conductors)?;

        let mut provisions = BTreeMap::new();
        let environment_ids = config.environment.shared.keys().chain(config.environment.exclusive.keys());
        let resource_ids = config.conductors.iter().flat_map(|manifest| manifest.resources.iter());
        for id in environment_ids.chain(resource_ids) {
            provisions
                .entry(id.clone())
                .or_insert_with(|| Provision::<Value>::define(id.clone()));
        }

        let registry = ConductorCatalog::new();
        for manifest in &config.conductors {
            let declaration = declaration(manifest, &productions, &provisions)?;
            let conductor = Arc::new(ManifestConductor::new(manifest.id.clone(), declaration));
            let previous = registry
                .register(conductor)
                .map_err(|error| ConfigError::Invalid(format!("conductor '{}': {error}", manifest.id)))?;
            if previous.is_some() {
                return Err(ConfigError::Invalid(format!("conductor '{}' declared twice", manifest.id)));
            }
        }

        tracing::debug!(
            conductors = registry.len(),
            productions = productions.len(),
            provisions = provisions.len(),
            "built manifest catalog"
        );
        Ok(Self {
            productions,
            provisions,
            shared: config.environment.shared.clone(),
            exclusive: config.environment.exclusive.clone(),
            registry,
        })
    }

    /// Registry of the manifest conductors
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ConductorCatalog {
        &self.registry
    }

    /// Production by id
    #[must_use]
    pub fn production(&self, id: &str) -> Option<&AnyProduction> {
        self.productions.get(id)
    }

    /// Provision by id
    #[must_use]
    pub fn provision(&self, id: &str) -> Option<&Provision<Value>> {
        self.provisions.get(id)
    }

    /// Environment offering the configured resources
    #[must_use]
    pub fn environment(&self) -> Environment {
        let builder = Environment::builder();
        let builder = self.shared.iter().fold(builder, |builder, (id, value)| match self.provisions.get(id) {
            Some(provision) => builder.with_shared(provision, value.clone()),
            None => builder,
        });
        let builder = self.exclusive.iter().fold(builder, |builder, (id, value)| match self.provisions.get(id) {
            Some(provision) => builder.with_exclusive(provision, value.clone()),
            None => builder,
        });
        builder.build()
    }
}

fn productions(manifests: &[ConductorManifest]) -> Result<BTreeMap<String, AnyProduction>, ConfigError> {
    let mut productions: BTreeMap<String, AnyProduction> = BTreeMap::new();
    let mut define = |id: &str, production: AnyProduction| -> Result<(), ConfigError> {
        match productions.get(id) {
            Some(existing) if existing.kind() != production.kind() => Err(ConfigError::Invalid(format!(
                "production '{id}' declared as both {:?} and {:?}",
                existing.kind(),
                production.kind()
            ))),
            Some(_) => Ok(()),
            None => {
                productions.insert(id.to_string(), production);
                Ok(())
            }
        }
    };

    for manifest in manifests {
        for prepared in &manifest.prepares {
            define(&prepared.id, Preparation::<Value>::define(prepared.id.clone(), prepared.evaluation).into())?;
        }
        for observed in &manifest.observes {
            let observation = if observed.multiple {
                Observation::<Value>::define_multiple(observed.id.clone())
            } else {
                Observation::<Value>::define(observed.id.clone())
            };
            define(&observed.id, observation.into())?;
        }
    }
    Ok(productions)
}

fn declaration(
    manifest: &ConductorManifest,
    productions: &BTreeMap<String, AnyProduction>,
    provisions: &BTreeMap<String, Provision<Value>>,
) -> Result<Declaration, ConfigError> {
    let lookup = |id: &str| {
        productions.get(id).ok_or_else(|| {
            ConfigError::Invalid(format!("conductor '{}' requires undeclared production '{id}'", manifest.id))
        })
    };

    let mut declaration = Declaration::new();
    let offered = manifest
        .prepares
        .iter()
        .map(|prepared| prepared.id.as_str())
        .chain(manifest.observes.iter().map(|observed| observed.id.as_str()));
    for id in offered {
        declaration = declaration.with_production(lookup(id)?);
    }

    if let Some(requires) = &manifest.requires {
        let cardinality = if requires.multiple {
            Cardinality::Multiple
        } else {
            Cardinality::Single
        };
        let requirement = Requirement::on(lookup(&requires.production)?, cardinality).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "conductor '{}' cannot require resource production '{}'",
                manifest.id, requires.production
            ))
        })?;
        declaration = declaration.with_requirement(requirement);
    }

    for id in &manifest.resources {
        let provision = provisions
            .get(id)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown resource '{id}'")))?;
        declaration = declaration.with_resource_requirement(ResourceRequirement::on(provision));
    }

    for additional in &manifest.additional {
        let production = lookup(&additional.production)?;
        if !production.is_result() {
            return Err(ConfigError::Invalid(format!(
                "conductor '{}' additional requirement '{}' is not a result",
                manifest.id, additional.production
            )));
        }
        declaration = declaration.with_additional(AdditionalRequirement::on_any(
            production,
            VariablePaths::new(additional.variable.clone()),
        ));
    }

    Ok(declaration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_declaration::Evaluation;
    use assay_procedure::ConductorRegistry;

    const CONFIG: &str = r#"
        [environment.shared]
        clock = "utc"

        [environment.exclusive]
        stage = { axes = 2 }

        [[conductors]]
        id = "chamber"
        prepares = [{ id = "vacuum", evaluation = "ordered" }]

        [[conductors]]
        id = "acquire"
        requires = { production = "vacuum" }
        resources = ["stage", "clock"]
        observes = [{ id = "spectrum" }]

        [[conductors]]
        id = "compare"
        additional = [{ production = "spectrum", variable = "references" }]
    "#;

    fn catalog(text: &str) -> Result<ManifestCatalog, ConfigError> {
        ManifestCatalog::from_config(&AssayConfig::from_toml_str(text)?)
    }

    #[test]
    fn builds_registry_and_productions() {
        let catalog = catalog(CONFIG).unwrap();

        assert_eq!(catalog.registry().ids(), vec!["acquire", "chamber", "compare"]);
        let vacuum = catalog.production("vacuum").unwrap();
        assert_eq!(vacuum.evaluation(), Some(Evaluation::Ordered));

        let chamber = catalog.registry().conductor("chamber").unwrap();
        let acquire = catalog.registry().conductor("acquire").unwrap();
        assert!(chamber.declaration().offers(vacuum));
        assert_eq!(acquire.declaration().requirement().production(), Some(vacuum));
        assert_eq!(acquire.declaration().resources().len(), 2);
    }

    #[test]
    fn environment_offers_configured_resources() {
        let catalog = catalog(CONFIG).unwrap();
        let environment = catalog.environment();

        let clock = catalog.provision("clock").unwrap();
        let stage = catalog.provision("stage").unwrap();
        assert!(environment.shared().is_shared(clock));
        assert!(!environment.shared().is_shared(stage));
        assert!(environment.offers(stage));
        assert_eq!(*environment.provide_shared_resource(clock).unwrap(), Value::from("utc"));
    }

    #[test]
    fn undeclared_requirement_rejected() {
        let result = catalog(
            r#"
            [[conductors]]
            id = "orphan"
            requires = { production = "nothing" }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn conflicting_kinds_rejected() {
        let result = catalog(
            r#"
            [[conductors]]
            id = "a"
            prepares = [{ id = "x" }]

            [[conductors]]
            id = "b"
            observes = [{ id = "x" }]
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_conductor_rejected() {
        let result = catalog("[[conductors]]\nid = \"a\"\n\n[[conductors]]\nid = \"a\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn shared_production_identity() {
        let catalog = catalog(
            r#"
            [[conductors]]
            id = "a"
            observes = [{ id = "x" }]

            [[conductors]]
            id = "b"
            observes = [{ id = "x" }]
            "#,
        )
        .unwrap();
        let a = catalog.registry().conductor("a").unwrap();
        let b = catalog.registry().conductor("b").unwrap();
        assert_eq!(
            a.declaration().productions()[0].identity(),
            b.declaration().productions()[0].identity()
        );
    }
}
