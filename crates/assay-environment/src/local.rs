//! Leases on exclusive resources
//!
//! A [`LocalEnvironment`] is owned by one execution context. It acquires
//! exclusive resources into itself and releases them when closed or dropped.
//! A failed acquisition keeps whatever was acquired before it; releasing is
//! left to the caller.

use crate::environment::{downcast, Environment, ResourceValue};
use crate::error::{EnvironmentError, Unavailability};
use assay_declaration::{AnyProduction, IdentityMap, Production, Provision};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

/// Exclusive resource held by a lease
#[derive(Debug)]
pub struct Resource {
    provision: AnyProduction,
    value: ResourceValue,
    _permit: OwnedSemaphorePermit,
}

impl Resource {
    /// Provision this resource satisfies
    #[inline]
    #[must_use]
    pub fn provision(&self) -> &AnyProduction {
        &self.provision
    }

    /// Resource value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &ResourceValue {
        &self.value
    }

    /// Give the resource back to the environment
    pub fn release(self) {
        tracing::debug!(resource = self.provision.id(), "released exclusive resource");
    }
}

/// Caller-owned lease on an [`Environment`]
#[derive(Debug)]
pub struct LocalEnvironment {
    environment: Arc<Environment>,
    held: IdentityMap<Resource>,
}

impl LocalEnvironment {
    pub(crate) fn open(environment: Arc<Environment>) -> Self {
        Self {
            environment,
            held: IdentityMap::new(),
        }
    }

    /// Environment this lease was opened on
    #[inline]
    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Acquire every requested exclusive resource
    ///
    /// Shared resources and resources already held are skipped. The timeout
    /// bounds the whole call, not each resource.
    ///
    /// # Errors
    /// - [`EnvironmentError::Missing`] if any requested resource is not
    ///   offered; nothing is acquired in this case
    /// - [`EnvironmentError::Unavailable`] if a resource is not acquired
    ///   before the deadline; resources acquired earlier, by this call or
    ///   previous ones, remain held
    pub async fn acquire_resources<'a, I>(&mut self, provisions: I, timeout: Duration) -> Result<(), EnvironmentError>
    where
        I: IntoIterator<Item = &'a AnyProduction>,
    {
        let deadline = Instant::now() + timeout;

        let mut pending = Vec::new();
        for provision in provisions {
            if self.environment.shared().is_shared(provision) || self.held.contains(provision) {
                continue;
            }
            let slot = self
                .environment
                .exclusive_slot(provision)
                .ok_or_else(|| EnvironmentError::Missing(provision.id().to_string()))?;
            pending.push((provision, slot.clone()));
        }

        for (provision, slot) in pending {
            if self.held.contains(provision) {
                continue;
            }

            let permit = match tokio::time::timeout_at(deadline, slot.gate.acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(unavailable(provision, Unavailability::Closed)),
                Err(_) => {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    tracing::debug!(resource = provision.id(), timeout_ms, "exclusive resource acquisition timed out");
                    return Err(unavailable(provision, Unavailability::Timeout { timeout_ms }));
                }
            };

            tracing::debug!(resource = provision.id(), "acquired exclusive resource");
            self.held.insert(
                provision,
                Resource {
                    provision: provision.clone(),
                    value: slot.value,
                    _permit: permit,
                },
            );
        }

        Ok(())
    }

    /// Provide a resource through this lease
    ///
    /// Shared resources are always provided; exclusive resources only while
    /// held.
    ///
    /// # Errors
    /// - [`EnvironmentError::Missing`] if the environment does not offer it
    /// - [`EnvironmentError::Unavailable`] if it is exclusive and not held
    pub fn provide_resource<T: Send + Sync + 'static>(
        &self,
        provision: &Provision<T>,
    ) -> Result<Arc<T>, EnvironmentError> {
        let value = self.provide_value(provision.erased())?;
        downcast(provision.erased(), value)
    }

    /// Provide a resource without its static type
    ///
    /// # Errors
    /// See [`LocalEnvironment::provide_resource`]
    pub fn provide_value(&self, provision: &AnyProduction) -> Result<ResourceValue, EnvironmentError> {
        if let Ok(value) = self.environment.shared().provide_shared_value(provision) {
            return Ok(value);
        }
        if let Some(resource) = self.held.get(provision) {
            return Ok(Arc::clone(resource.value()));
        }
        if self.environment.exclusive_slot(provision).is_some() {
            return Err(unavailable(provision, Unavailability::NotHeld));
        }
        Err(EnvironmentError::Missing(provision.id().to_string()))
    }

    /// Check if an exclusive resource is held
    #[must_use]
    pub fn holds(&self, provision: &impl Production) -> bool {
        self.held.contains(provision)
    }

    /// Exclusive resources currently held
    pub fn held_resources(&self) -> impl Iterator<Item = &AnyProduction> {
        self.held.iter().map(|(provision, _)| provision)
    }

    /// Release one held resource
    ///
    /// Returns `false` if it was not held.
    pub fn release(&mut self, provision: &impl Production) -> bool {
        self.held.remove(provision).map(Resource::release).is_some()
    }

    /// Release everything held by this lease
    pub fn close(&mut self) {
        let held: Vec<AnyProduction> = self.held_resources().cloned().collect();
        for provision in &held {
            self.release(provision);
        }
    }
}

impl Drop for LocalEnvironment {
    fn drop(&mut self) {
        self.close();
    }
}

fn unavailable(provision: &AnyProduction, reason: Unavailability) -> EnvironmentError {
    EnvironmentError::Unavailable {
        id: provision.id().to_string(),
        reason,
    }
}
