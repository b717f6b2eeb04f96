//! # The Container — heart of Qalib
//!
//! The dependency injection container that builds object graphs from
//! registered bindings and owns the lifetime of what it builds.
//!
//! # Architecture
//! ```text
//! ContainerBuilder ──build()──> Container ──resolve::<S>()──> Resolved<Arc<S>>
//!   providers, settings            │                              │
//!                                  │ root scope                   │ transient scope
//!                                  ▼                              ▼
//!                             singleton scopes              per-call disposables
//! ```
//!
//! # Examples
//! ```rust
//! use qalib_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, msg: &str) -> String;
//! }
//!
//! struct ConsoleLogger;
//! impl Logger for ConsoleLogger {
//!     fn log(&self, msg: &str) -> String { format!("[console] {msg}") }
//! }
//!
//! struct UserService {
//!     logger: Arc<dyn Logger>,
//! }
//!
//! let container = Container::new(|registrar| {
//!     registrar.register_implementation(
//!         TypeInfo::of::<ConsoleLogger>()
//!             .constructor([], |_| Ok(ConsoleLogger))
//!             .implements::<dyn Logger>(|this| this),
//!         [TypeDescriptor::of::<dyn Logger>()],
//!         Lifestyle::Singleton,
//!     )?;
//!     registrar.register_implementation(
//!         TypeInfo::of::<UserService>()
//!             .constructor([Param::of::<dyn Logger>()], |args| {
//!                 Ok(UserService { logger: args.service::<dyn Logger>()? })
//!             }),
//!         [TypeDescriptor::of::<UserService>()],
//!         Lifestyle::Transient,
//!     )
//! })
//! .expect("Failed to build container");
//!
//! let service = container.resolve::<UserService>().expect("Failed to resolve");
//! assert_eq!(service.logger.log("hi"), "[console] hi");
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};

use crate::accessor::{Factory, Lazy, downcast_factory, downcast_lazy};
use crate::compiler::{ServiceValue, downcast_service};
use crate::error::{QalibError, Result};
use crate::key::TypeDescriptor;
use crate::provider::{FnProvider, Provider};
use crate::registrar::{self, Registrar};
use crate::registry::Registry;
use crate::scope::LifeScope;
use crate::settings::ContainerSettings;

// ============================================================
// ContainerBuilder
// ============================================================

/// Builds a [`Container`] from providers.
///
/// Providers run in the order they were added, against one shared
/// [`Registrar`]. [`build()`](ContainerBuilder::build) then executes every
/// staged registration and freezes the result.
///
/// # Examples
/// ```rust,ignore
/// let container = Container::builder()
///     .settings(ContainerSettings::default().with_name("billing"))
///     .add_provider(StorageProvider)
///     .register(|registrar| registrar.register::<InvoiceService>([TypeDescriptor::of::<InvoiceService>()], Lifestyle::Transient))
///     .build()?;
/// ```
pub struct ContainerBuilder {
    settings: ContainerSettings,
    providers: Vec<Box<dyn Provider>>,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            settings: ContainerSettings::default(),
            providers: Vec::new(),
        }
    }

    pub fn settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = settings;
        self
    }

    // ── Provider modules ──

    /// Add a [`Provider`] module.
    pub fn add_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Add a registration callback.
    pub fn register<F>(self, callback: F) -> Self
    where
        F: Fn(&Registrar) -> Result<()> + Send + Sync + 'static,
    {
        self.add_provider(FnProvider(callback))
    }

    // ── Build ──

    /// Build the container, binding every staged registration in order.
    ///
    /// Any registration error aborts the build; no container is produced
    /// and every singleton created along the way is disposed.
    #[instrument(skip_all, name = "container_build")]
    pub fn build(self) -> Result<Container> {
        let registrar = Registrar::new();
        let staged = self
            .providers
            .iter()
            .try_for_each(|provider| {
                debug!(provider = provider.name(), "Running provider");
                provider.register(&registrar)
            });
        let pending = registrar.freeze();
        staged?;

        info!(
            container = %self.settings.name,
            registrations = pending.len(),
            "Building container"
        );

        let mut registry = Registry::new(LifeScope::with_policy(self.settings.disposal_policy));
        if let Err(err) = registrar::apply(&mut registry, pending) {
            warn!(container = %self.settings.name, error = %err, "Container build failed");
            if let Err(cleanup) = registry.root().dispose() {
                warn!(error = %cleanup, "Disposing partially built container failed");
            }
            return Err(err);
        }

        let registry = registry.freeze();
        info!(container = %self.settings.name, services = registry.len(), "Container built successfully ✓");
        Ok(Container {
            registry,
            settings: self.settings,
        })
    }
}

impl fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ContainerBuilder")
            .field("settings", &self.settings)
            .field("providers", &providers)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Resolved
// ═══════════════════════════════════════════

/// A resolved value together with the life scope that owns its
/// non-singleton disposables.
///
/// Dropping a `Resolved` does not dispose anything; call
/// [`dispose`](Resolved::dispose) when the value is no longer needed.
pub struct Resolved<T> {
    value: T,
    scope: LifeScope,
}

impl<T> Resolved<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The disposal handle of this resolution.
    pub fn scope(&self) -> &LifeScope {
        &self.scope
    }

    /// Disposes every transient disposable built for this resolution.
    pub fn dispose(&self) -> Result<()> {
        self.scope.dispose()
    }

    pub fn into_parts(self) -> (LifeScope, T) {
        (self.scope, self.value)
    }

    /// Drops the disposal handle and keeps the value.
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> Deref for Resolved<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolved<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("value", &self.value)
            .field("scope", &self.scope)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Container
// ═══════════════════════════════════════════

/// Immutable, thread-safe dependency injection container.
///
/// Created by [`Container::new`] or [`ContainerBuilder::build()`].
pub struct Container {
    registry: Arc<Registry>,
    settings: ContainerSettings,
}

impl Container {
    /// Create a new builder.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    /// Builds a container from one registration callback.
    pub fn new<F>(register: F) -> Result<Self>
    where
        F: Fn(&Registrar) -> Result<()> + Send + Sync + 'static,
    {
        Self::builder().register(register).build()
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Resolve a service.
    ///
    /// ```rust,ignore
    /// let db: Resolved<Arc<dyn Database>> = container.resolve::<dyn Database>()?;
    /// ```
    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Resolved<Arc<S>>> {
        self.resolve_as::<S>(&TypeDescriptor::of::<S>())
    }

    /// Resolve the service registered under `descriptor`, whose values are
    /// `Arc<S>`. Used for closed generics, sequences and other descriptors
    /// that are not the Rust type of the value.
    pub fn resolve_as<S: ?Sized + Send + Sync + 'static>(
        &self,
        descriptor: &TypeDescriptor,
    ) -> Result<Resolved<Arc<S>>> {
        self.resolve_typed(descriptor, downcast_service::<S>)
    }

    /// Resolve a deferred accessor; nothing is built until it is read.
    pub fn resolve_lazy<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Resolved<Lazy<S>>> {
        self.resolve_typed(&TypeDescriptor::lazy::<S>(), downcast_lazy::<S>)
    }

    /// Resolve a zero-argument factory.
    pub fn resolve_factory<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Resolved<Factory<S>>> {
        self.resolve_typed(&TypeDescriptor::factory::<S>(), downcast_factory::<S>)
    }

    /// Resolve `descriptor` without any typed view.
    pub fn resolve_descriptor(&self, descriptor: &TypeDescriptor) -> Result<Resolved<ServiceValue>> {
        let (scope, value) = self.resolve_internal(descriptor)?;
        Ok(Resolved { value, scope })
    }

    /// Whether `descriptor` has an explicit binding.
    pub fn is_registered(&self, descriptor: &TypeDescriptor) -> bool {
        self.registry.get(descriptor).is_some()
    }

    /// Disposes every singleton, newest first. Later resolutions fail with
    /// [`QalibError::ObjectDisposed`].
    pub fn dispose(&self) -> Result<()> {
        info!(container = %self.settings.name, "Disposing container");
        self.registry.root().dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.registry.root().is_disposed()
    }

    fn resolve_typed<T>(
        &self,
        descriptor: &TypeDescriptor,
        view: impl FnOnce(ServiceValue, &TypeDescriptor) -> Result<T>,
    ) -> Result<Resolved<T>> {
        let (scope, value) = self.resolve_internal(descriptor)?;
        match view(value, descriptor) {
            Ok(value) => Ok(Resolved { value, scope }),
            Err(err) => {
                discard(&scope);
                Err(err)
            }
        }
    }

    /// Internal resolve — returns the type-erased value and its scope.
    fn resolve_internal(&self, descriptor: &TypeDescriptor) -> Result<(LifeScope, ServiceValue)> {
        trace!(key = %descriptor, "Resolving");
        if self.is_disposed() {
            return Err(QalibError::disposed(format!("container '{}'", self.settings.name)));
        }

        let factory = self
            .registry
            .plan_for(descriptor)
            .map_err(|err| self.registry.service_error(descriptor, err))?;

        let scope = LifeScope::with_policy(self.settings.disposal_policy);
        match factory(&scope) {
            Ok(value) => Ok((scope, value)),
            Err(err) => {
                warn!(key = %descriptor, error = %err, "Resolution failed; disposing its scope");
                discard(&scope);
                Err(err)
            }
        }
    }
}

fn discard(scope: &LifeScope) {
    if let Err(err) = scope.dispose() {
        warn!(scope = scope.id(), error = %err, "Disposing abandoned scope failed");
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.settings.name)
            .field("registered", &self.registry.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Everything needed to register and resolve services.
pub mod prelude {
    pub use super::{Container, ContainerBuilder, Resolved};
    pub use crate::accessor::{Factory, Lazy};
    pub use crate::dispose::Dispose;
    pub use crate::error::{BoxError, QalibError, Result};
    pub use crate::key::{TypeDescriptor, TypeIdentity};
    pub use crate::lifestyle::Lifestyle;
    pub use crate::metadata::{GenericTypeInfo, Injectable, Param, TypeArg, TypeInfo};
    pub use crate::provider::Provider;
    pub use crate::registrar::Registrar;
    pub use crate::resolver::Resolver;
    pub use crate::scope::LifeScope;
    pub use crate::settings::{ContainerSettings, DisposalPolicy};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use crate::testing::{DisposalLog, Probe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    #[derive(Debug)]
    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    fn hello() -> TypeInfo {
        TypeInfo::of::<Hello>()
            .constructor([], |_| Ok(Hello))
            .implements::<dyn Greeter>(|this| this)
            .into()
    }

    #[test]
    fn resolves_registered_service() {
        let container = Container::new(|r| {
            r.register_implementation(hello(), [TypeDescriptor::of::<dyn Greeter>()], Lifestyle::Transient)
        })
        .unwrap();

        let greeter = container.resolve::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert!(container.is_registered(&TypeDescriptor::of::<dyn Greeter>()));
        assert!(!container.is_registered(&TypeDescriptor::of::<Hello>()));
    }

    #[test]
    fn unknown_service_suggests_alternatives() {
        let container = Container::new(|r| {
            r.register_implementation(hello(), [TypeDescriptor::of::<dyn Greeter>()], Lifestyle::Transient)
        })
        .unwrap();

        match container.resolve::<Hello>() {
            Err(QalibError::NotRegisteredService(err)) => {
                assert_eq!(err.requested, TypeDescriptor::of::<Hello>());
            }
            other => panic!("Expected NotRegisteredService, got: {other:?}"),
        }
        match container.resolve_lazy::<Hello>() {
            Err(QalibError::NotRegisteredService(err)) => {
                assert_eq!(err.requested, TypeDescriptor::lazy::<Hello>());
            }
            other => panic!("Expected NotRegisteredService, got: {other:?}"),
        }
    }

    #[test]
    fn build_failure_produces_no_container() {
        let result = Container::new(|r| {
            r.register_implementation(
                TypeInfo::contract::<dyn Greeter>(),
                [TypeDescriptor::of::<dyn Greeter>()],
                Lifestyle::Transient,
            )
        });
        assert!(matches!(result, Err(QalibError::NonConcreteType { .. })));
    }

    #[test]
    fn provider_errors_abort_build() {
        let result = Container::builder()
            .register(|_| Err(QalibError::ContainerFrozen))
            .build();
        assert!(matches!(result, Err(QalibError::ContainerFrozen)));
    }

    #[test]
    fn registration_after_build_is_frozen() {
        let leaked: Arc<parking_lot::Mutex<Option<Registrar>>> = Arc::default();
        let slot = leaked.clone();
        let _container = Container::new(move |r| {
            *slot.lock() = Some(r.clone());
            Ok(())
        })
        .unwrap();

        let registrar = leaked.lock().take().unwrap();
        assert!(matches!(
            registrar.register_implementation(hello(), [TypeDescriptor::of::<dyn Greeter>()], Lifestyle::Transient),
            Err(QalibError::ContainerFrozen)
        ));
    }

    #[test]
    fn failed_resolution_disposes_partial_work() {
        let log = DisposalLog::default();
        let probe_log = log.clone();

        struct Fragile;

        let container = Container::new(move |r| {
            let probe_log = probe_log.clone();
            r.register_implementation(
                TypeInfo::of::<Probe>()
                    .constructor([], move |_| Ok(Probe::unshared("partial", &probe_log)))
                    .disposable(),
                [TypeDescriptor::of::<Probe>()],
                Lifestyle::Transient,
            )?;
            r.register_implementation(
                TypeInfo::of::<Fragile>().constructor([Param::of::<Probe>()], |args| {
                    args.service::<Probe>()?;
                    Err(QalibError::construction(&TypeDescriptor::of::<Fragile>(), "boom"))
                }),
                [TypeDescriptor::of::<Fragile>()],
                Lifestyle::Transient,
            )
        })
        .unwrap();

        assert!(container.resolve::<Fragile>().is_err());
        assert_eq!(log.entries(), vec!["partial"]);
    }

    #[test]
    fn disposed_container_refuses_resolution() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let container = Container::new(move |r| {
            let counter = counter.clone();
            r.register_implementation(
                TypeInfo::of::<Hello>()
                    .constructor([], move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Hello)
                    })
                    .implements::<dyn Greeter>(|this| this),
                [TypeDescriptor::of::<dyn Greeter>()],
                Lifestyle::Singleton,
            )
        })
        .unwrap();

        container.resolve::<dyn Greeter>().unwrap();
        container.dispose().unwrap();
        container.dispose().unwrap();
        assert!(container.is_disposed());
        assert!(matches!(
            container.resolve::<dyn Greeter>(),
            Err(QalibError::ObjectDisposed { .. })
        ));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolve_descriptor_is_erased() {
        let container = Container::new(|r| {
            r.register_implementation(hello(), [TypeDescriptor::of::<dyn Greeter>()], Lifestyle::Transient)
        })
        .unwrap();

        let resolved = container
            .resolve_descriptor(&TypeDescriptor::of::<dyn Greeter>())
            .unwrap();
        let (_scope, value) = resolved.into_parts();
        assert!(value.downcast::<Arc<dyn Greeter>>().is_ok());
    }
}
