//! What a conductor offers and what it needs

use crate::production::{AnyProduction, Production, Provision};
use crate::requirement::{AdditionalRequirement, Requirement, ResourceRequirement};
use crate::DeclarationError;
use std::collections::HashSet;

/// Productions offered and requirements needed by a conductor
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    productions: Vec<AnyProduction>,
    requirement: Requirement,
    resources: Vec<ResourceRequirement>,
    additional: Vec<AdditionalRequirement>,
}

impl Declaration {
    /// Empty declaration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a production
    #[inline]
    #[must_use]
    pub fn with_production(mut self, production: &impl Production) -> Self {
        self.productions.push(production.erased().clone());
        self
    }

    /// Set the requirement on the parent
    #[inline]
    #[must_use]
    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirement = requirement;
        self
    }

    /// Require an environment resource
    #[inline]
    #[must_use]
    pub fn with_resource<T>(mut self, provision: &Provision<T>) -> Self {
        self.resources.push(ResourceRequirement::on(provision));
        self
    }

    /// Require an environment resource from an erased requirement
    #[inline]
    #[must_use]
    pub fn with_resource_requirement(mut self, requirement: ResourceRequirement) -> Self {
        self.resources.push(requirement);
        self
    }

    /// Add a lazily resolved requirement
    #[inline]
    #[must_use]
    pub fn with_additional(mut self, requirement: AdditionalRequirement) -> Self {
        self.additional.push(requirement);
        self
    }

    /// Offered productions in declaration order
    #[inline]
    #[must_use]
    pub fn productions(&self) -> &[AnyProduction] {
        &self.productions
    }

    /// Find an offered production by id
    #[must_use]
    pub fn production(&self, id: &str) -> Option<&AnyProduction> {
        self.productions.iter().find(|p| p.id() == id)
    }

    /// Check if a production is offered (by identity)
    #[must_use]
    pub fn offers(&self, production: &impl Production) -> bool {
        let identity = production.identity();
        self.productions.iter().any(|p| p.identity() == identity)
    }

    /// Requirement on the parent
    #[inline]
    #[must_use]
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// Environment resource requirements
    #[inline]
    #[must_use]
    pub fn resources(&self) -> &[ResourceRequirement] {
        &self.resources
    }

    /// Lazily resolved requirements
    #[inline]
    #[must_use]
    pub fn additional_requirements(&self) -> &[AdditionalRequirement] {
        &self.additional
    }

    /// Check internal consistency
    ///
    /// # Errors
    /// - [`DeclarationError::DuplicateProduction`] if two offered productions
    ///   share an id
    /// - [`DeclarationError::NotOfferable`] if an environment resource is
    ///   offered as a production
    /// - [`DeclarationError::NotProvision`] if a resource requirement targets
    ///   something other than an environment resource
    pub fn validate(&self) -> Result<(), DeclarationError> {
        let mut seen = HashSet::new();
        for production in &self.productions {
            if production.is_resource() {
                return Err(DeclarationError::NotOfferable(production.id().to_string()));
            }
            if !seen.insert(production.id()) {
                return Err(DeclarationError::DuplicateProduction(production.id().to_string()));
            }
        }

        if let Some(resource) = self.resources.iter().find(|r| !r.provision().is_resource()) {
            return Err(DeclarationError::NotProvision(resource.provision().id().to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::production::{Evaluation, Observation, Preparation};

    #[test]
    fn offers_by_identity() {
        let offered = Observation::<f64>::define("mass");
        let lookalike = Observation::<f64>::define("mass");
        let declaration = Declaration::new().with_production(&offered);

        assert!(declaration.offers(&offered));
        assert!(!declaration.offers(&lookalike));
        assert_eq!(declaration.production("mass"), Some(offered.erased()));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let declaration = Declaration::new()
            .with_production(&Observation::<f64>::define("mass"))
            .with_production(&Preparation::<()>::define("mass", Evaluation::Parallel));

        assert!(matches!(
            declaration.validate(),
            Err(DeclarationError::DuplicateProduction(id)) if id == "mass"
        ));
    }

    #[test]
    fn validate_rejects_offered_provision() {
        let declaration = Declaration::new().with_production(&Provision::<u8>::define("laser"));
        assert!(matches!(declaration.validate(), Err(DeclarationError::NotOfferable(_))));
    }

    #[test]
    fn builder_collects_requirements() {
        let vacuum = Preparation::<()>::define("vacuum", Evaluation::Ordered);
        let laser = Provision::<u8>::define("laser");
        let declaration = Declaration::new()
            .with_requirement(Requirement::condition(&vacuum))
            .with_resource(&laser);

        assert!(declaration.validate().is_ok());
        assert_eq!(declaration.requirement().production(), Some(vacuum.erased()));
        assert_eq!(declaration.resources().len(), 1);
        assert!(declaration.additional_requirements().is_empty());
    }
}
