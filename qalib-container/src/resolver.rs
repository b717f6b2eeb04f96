//! Read-only resolution handle given to factory bindings.

use std::sync::Arc;

use tracing::trace;

use crate::accessor::{Factory, Lazy, downcast_factory, downcast_lazy};
use crate::compiler::{ServiceValue, downcast_service};
use crate::error::Result;
use crate::key::TypeDescriptor;
use crate::registry::Registry;
use crate::scope::LifeScope;

/// Trait for resolving dependencies.
///
/// This is what factory bindings receive to resolve their own dependencies.
/// Everything resolved through it is owned by the life scope of the
/// resolution that invoked the factory.
pub trait Resolver: Send + Sync {
    /// Resolves `key` to an erased service value.
    fn resolve_key(&self, key: &TypeDescriptor) -> Result<ServiceValue>;

    /// The life scope new instances are tracked in.
    fn scope(&self) -> &LifeScope;
}

impl dyn Resolver + '_ {
    /// Resolves `S` as an `Arc<S>`.
    ///
    /// ```rust,ignore
    /// let clock: Arc<dyn Clock> = resolver.resolve::<dyn Clock>()?;
    /// ```
    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>> {
        resolve(self)
    }

    /// Resolves a deferred accessor of `S`.
    pub fn resolve_lazy<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Lazy<S>> {
        let key = TypeDescriptor::lazy::<S>();
        downcast_lazy(self.resolve_key(&key)?, &key)
    }

    /// Resolves a zero-argument factory of `S`.
    pub fn resolve_factory<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Factory<S>> {
        let key = TypeDescriptor::factory::<S>();
        downcast_factory(self.resolve_key(&key)?, &key)
    }

    /// Resolves the service registered under `descriptor`, whose values
    /// are `Arc<S>`.
    pub fn resolve_as<S: ?Sized + Send + Sync + 'static>(&self, descriptor: &TypeDescriptor) -> Result<Arc<S>> {
        downcast_service(self.resolve_key(descriptor)?, descriptor)
    }
}

/// Resolves `S` through any resolver.
pub fn resolve<S: ?Sized + Send + Sync + 'static>(resolver: &dyn Resolver) -> Result<Arc<S>> {
    let key = TypeDescriptor::of::<S>();
    downcast_service(resolver.resolve_key(&key)?, &key)
}

/// Resolver bound to one life scope of a frozen registry.
pub(crate) struct ScopedResolver {
    registry: Arc<Registry>,
    scope: LifeScope,
}

impl ScopedResolver {
    pub(crate) fn new(registry: Arc<Registry>, scope: LifeScope) -> Self {
        Self { registry, scope }
    }
}

impl Resolver for ScopedResolver {
    fn resolve_key(&self, key: &TypeDescriptor) -> Result<ServiceValue> {
        trace!(key = %key, scope = self.scope.id(), "Resolving from factory");
        let factory = self
            .registry
            .plan_for(key)
            .map_err(|err| self.registry.service_error(key, err))?;
        factory(&self.scope)
    }

    fn scope(&self) -> &LifeScope {
        &self.scope
    }
}
