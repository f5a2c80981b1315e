//! Shared and exclusive resource environments
//!
//! Provides:
//! - [`SharedEnvironment`] - always-available resources, never blocking
//! - [`Environment`] - shared resources plus exclusive resources handed out
//!   through [`LocalEnvironment`](crate::LocalEnvironment) leases

use crate::error::EnvironmentError;
use crate::local::LocalEnvironment;
use assay_declaration::{AnyProduction, IdentityMap, Production, Provision};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Type-erased resource value
pub type ResourceValue = Arc<dyn Any + Send + Sync>;

pub(crate) fn downcast<T: Send + Sync + 'static>(
    provision: &AnyProduction,
    value: ResourceValue,
) -> Result<Arc<T>, EnvironmentError> {
    value
        .downcast::<T>()
        .map_err(|_| EnvironmentError::Missing(provision.id().to_string()))
}

/// Resources obtainable at any time without a lease
#[derive(Debug, Default)]
pub struct SharedEnvironment {
    resources: IdentityMap<ResourceValue>,
}

impl SharedEnvironment {
    /// Offered shared resources
    pub fn shared_resources(&self) -> impl Iterator<Item = &AnyProduction> {
        self.resources.iter().map(|(provision, _)| provision)
    }

    /// Check if a resource is shared
    #[must_use]
    pub fn is_shared(&self, provision: &impl Production) -> bool {
        self.resources.contains(provision)
    }

    /// Provide a shared resource
    ///
    /// Never blocks.
    ///
    /// # Errors
    /// Returns [`EnvironmentError::Missing`] if the resource is not shared
    pub fn provide_shared_resource<T: Send + Sync + 'static>(
        &self,
        provision: &Provision<T>,
    ) -> Result<Arc<T>, EnvironmentError> {
        let value = self.provide_shared_value(provision.erased())?;
        downcast(provision.erased(), value)
    }

    /// Provide a shared resource without its static type
    ///
    /// # Errors
    /// Returns [`EnvironmentError::Missing`] if the resource is not shared
    pub fn provide_shared_value(&self, provision: &AnyProduction) -> Result<ResourceValue, EnvironmentError> {
        self.resources
            .get(provision)
            .cloned()
            .ok_or_else(|| EnvironmentError::Missing(provision.id().to_string()))
    }
}

/// Exclusive resource with its single-holder gate
#[derive(Debug, Clone)]
pub(crate) struct ExclusiveSlot {
    pub(crate) value: ResourceValue,
    pub(crate) gate: Arc<Semaphore>,
}

/// Shared resources plus leased exclusive resources
#[derive(Debug, Default)]
pub struct Environment {
    shared: SharedEnvironment,
    exclusive: IdentityMap<ExclusiveSlot>,
}

impl Environment {
    /// Start building an environment
    #[inline]
    #[must_use]
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Shared part of this environment
    #[inline]
    #[must_use]
    pub fn shared(&self) -> &SharedEnvironment {
        &self.shared
    }

    /// Offered shared resources
    pub fn shared_resources(&self) -> impl Iterator<Item = &AnyProduction> {
        self.shared.shared_resources()
    }

    /// Offered exclusive resources
    pub fn exclusive_resources(&self) -> impl Iterator<Item = &AnyProduction> {
        self.exclusive.iter().map(|(provision, _)| provision)
    }

    /// Check if a resource is offered at all
    #[must_use]
    pub fn offers(&self, provision: &impl Production) -> bool {
        self.shared.is_shared(provision) || self.exclusive.contains(provision)
    }

    /// Provide a shared resource
    ///
    /// # Errors
    /// See [`SharedEnvironment::provide_shared_resource`]
    pub fn provide_shared_resource<T: Send + Sync + 'static>(
        &self,
        provision: &Provision<T>,
    ) -> Result<Arc<T>, EnvironmentError> {
        self.shared.provide_shared_resource(provision)
    }

    /// Open a new lease on this environment
    #[must_use]
    pub fn open_local(self: &Arc<Self>) -> LocalEnvironment {
        LocalEnvironment::open(Arc::clone(self))
    }

    pub(crate) fn exclusive_slot(&self, provision: &AnyProduction) -> Option<&ExclusiveSlot> {
        self.exclusive.get(provision)
    }

    /// Stop handing out exclusive resources
    ///
    /// Pending and future acquisitions fail with
    /// [`Unavailability::Closed`](crate::Unavailability::Closed). Resources
    /// already held stay held until released.
    pub fn shutdown(&self) {
        for (provision, slot) in self.exclusive.iter() {
            tracing::debug!(resource = provision.id(), "closing exclusive resource");
            slot.gate.close();
        }
    }
}

/// Builder for [`Environment`]
#[derive(Debug, Default)]
pub struct EnvironmentBuilder {
    shared: IdentityMap<ResourceValue>,
    exclusive: IdentityMap<ExclusiveSlot>,
}

impl EnvironmentBuilder {
    /// Offer a shared resource
    #[must_use]
    pub fn with_shared<T: Send + Sync + 'static>(mut self, provision: &Provision<T>, value: T) -> Self {
        self.exclusive.remove(provision);
        self.shared.insert(provision, Arc::new(value));
        self
    }

    /// Offer an exclusive resource
    #[must_use]
    pub fn with_exclusive<T: Send + Sync + 'static>(mut self, provision: &Provision<T>, value: T) -> Self {
        self.shared.remove(provision);
        self.exclusive.insert(
            provision,
            ExclusiveSlot {
                value: Arc::new(value),
                gate: Arc::new(Semaphore::new(1)),
            },
        );
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> Environment {
        Environment {
            shared: SharedEnvironment {
                resources: self.shared,
            },
            exclusive: self.exclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_resource_provided() {
        let clock = Provision::<String>::define("clock");
        let environment = Environment::builder()
            .with_shared(&clock, "utc".to_string())
            .build();

        assert_eq!(*environment.provide_shared_resource(&clock).unwrap(), "utc");
        assert_eq!(environment.shared_resources().count(), 1);
        assert_eq!(environment.exclusive_resources().count(), 0);
    }

    #[test]
    fn missing_shared_resource() {
        let clock = Provision::<String>::define("clock");
        let environment = Environment::builder().build();

        let error = environment.provide_shared_resource(&clock).unwrap_err();
        assert_eq!(error, EnvironmentError::Missing("clock".into()));
        assert!(!error.is_retryable());
    }

    #[test]
    fn exclusive_is_not_shared() {
        let laser = Provision::<u32>::define("laser");
        let environment = Environment::builder().with_exclusive(&laser, 532).build();

        assert!(environment.offers(&laser));
        assert!(matches!(
            environment.provide_shared_resource(&laser),
            Err(EnvironmentError::Missing(_))
        ));
    }

    #[test]
    fn later_offer_replaces_earlier() {
        let laser = Provision::<u32>::define("laser");
        let environment = Environment::builder()
            .with_exclusive(&laser, 532)
            .with_shared(&laser, 633)
            .build();

        assert_eq!(*environment.provide_shared_resource(&laser).unwrap(), 633);
        assert_eq!(environment.exclusive_resources().count(), 0);
    }
}
