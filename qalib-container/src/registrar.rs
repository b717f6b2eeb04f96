//! Registration staging and execution.
//!
//! A [`Registrar`] collects registrations from any number of threads into
//! one ordered list. When the container is built the list is frozen and
//! executed against a fresh registry, in submission order, exactly once.
//! Any registration attempted after that fails with
//! [`QalibError::ContainerFrozen`].
//!
//! ```text
//! thread A ─ register_implementation ─┐
//! thread B ─ register_factory ────────┼─> [pending, in order] ─freeze─> apply ─> Registry
//! thread C ─ register_generic ────────┘
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::analyzer;
use crate::compiler::{self, Instance};
use crate::error::{AlreadyRegisteredError, QalibError, Result};
use crate::guard::BindingKey;
use crate::key::TypeDescriptor;
use crate::lifecycle;
use crate::lifestyle::Lifestyle;
use crate::metadata::{GenericTypeInfo, ImplementationInfo, Injectable, TypeInfo};
use crate::registry::{FactoryFn, Registry, ServiceEntry};
use crate::resolver::Resolver;

/// One staged registration.
pub(crate) enum PendingRegistration {
    Implementation {
        info: TypeInfo,
        services: Vec<TypeDescriptor>,
        lifestyle: Lifestyle,
    },
    Factory {
        info: TypeInfo,
        factory: FactoryFn,
        services: Vec<TypeDescriptor>,
        lifestyle: Lifestyle,
    },
    Generic {
        implementation: GenericTypeInfo,
        services: Vec<TypeDescriptor>,
    },
}

impl fmt::Debug for PendingRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implementation { info, services, lifestyle } => f
                .debug_struct("Implementation")
                .field("implementation", info.descriptor())
                .field("services", services)
                .field("lifestyle", lifestyle)
                .finish(),
            Self::Factory { info, services, lifestyle, .. } => f
                .debug_struct("Factory")
                .field("implementation", info.descriptor())
                .field("services", services)
                .field("lifestyle", lifestyle)
                .finish(),
            Self::Generic { implementation, services } => f
                .debug_struct("Generic")
                .field("implementation", implementation.definition())
                .field("services", services)
                .finish(),
        }
    }
}

#[derive(Default)]
struct Staging {
    pending: Vec<PendingRegistration>,
    frozen: bool,
}

/// Thread-safe registration API handed to the build callback.
///
/// Clones share the same staging list.
#[derive(Clone, Default)]
pub struct Registrar {
    staging: Arc<Mutex<Staging>>,
}

impl Registrar {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Binds the implementation described by `implementation` to every
    /// descriptor in `services`.
    ///
    /// # Errors
    /// [`QalibError::ContainerFrozen`] once the container is built. Every
    /// other problem is reported when the container is built.
    pub fn register_implementation(
        &self,
        implementation: impl Into<TypeInfo>,
        services: impl IntoIterator<Item = TypeDescriptor>,
        lifestyle: Lifestyle,
    ) -> Result<()> {
        self.stage(PendingRegistration::Implementation {
            info: implementation.into(),
            services: services.into_iter().collect(),
            lifestyle,
        })
    }

    /// [`register_implementation`](Self::register_implementation) for a
    /// type that describes itself.
    pub fn register<I: Injectable>(
        &self,
        services: impl IntoIterator<Item = TypeDescriptor>,
        lifestyle: Lifestyle,
    ) -> Result<()> {
        self.register_implementation(I::type_info(), services, lifestyle)
    }

    /// Binds a caller-supplied construction function.
    ///
    /// `product` describes what the function returns: the contracts it can
    /// be viewed as, and whether it is disposable. Its constructors, if
    /// any, are ignored.
    pub fn register_factory<T, R>(
        &self,
        product: ImplementationInfo<T>,
        services: impl IntoIterator<Item = TypeDescriptor>,
        lifestyle: Lifestyle,
        factory: impl Fn() -> Result<R> + Send + Sync + 'static,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        R: Into<Arc<T>>,
    {
        self.register_factory_with(product, services, lifestyle, move |_: &dyn Resolver| factory())
    }

    /// Like [`register_factory`](Self::register_factory), but the function
    /// receives a [`Resolver`] for further services.
    pub fn register_factory_with<T, R>(
        &self,
        product: ImplementationInfo<T>,
        services: impl IntoIterator<Item = TypeDescriptor>,
        lifestyle: Lifestyle,
        factory: impl Fn(&dyn Resolver) -> Result<R> + Send + Sync + 'static,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        R: Into<Arc<T>>,
    {
        let factory: FactoryFn = Arc::new(move |resolver: &dyn Resolver| {
            let product: Arc<T> = factory(resolver)?.into();
            Ok(product as Instance)
        });
        self.stage(PendingRegistration::Factory {
            info: product.into(),
            factory,
            services: services.into_iter().collect(),
            lifestyle,
        })
    }

    /// Binds an open generic implementation to open generic services.
    pub fn register_generic(
        &self,
        implementation: GenericTypeInfo,
        services: impl IntoIterator<Item = TypeDescriptor>,
    ) -> Result<()> {
        self.stage(PendingRegistration::Generic {
            implementation,
            services: services.into_iter().collect(),
        })
    }

    /// Number of staged registrations.
    pub fn pending(&self) -> usize {
        self.staging.lock().pending.len()
    }

    pub fn is_frozen(&self) -> bool {
        self.staging.lock().frozen
    }

    fn stage(&self, registration: PendingRegistration) -> Result<()> {
        let mut staging = self.staging.lock();
        if staging.frozen {
            return Err(QalibError::ContainerFrozen);
        }
        trace!(registration = ?registration, "Staged registration");
        staging.pending.push(registration);
        Ok(())
    }

    /// Stops accepting registrations and hands over what was staged.
    pub(crate) fn freeze(&self) -> Vec<PendingRegistration> {
        let mut staging = self.staging.lock();
        staging.frozen = true;
        std::mem::take(&mut staging.pending)
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let staging = self.staging.lock();
        f.debug_struct("Registrar")
            .field("pending", &staging.pending.len())
            .field("frozen", &staging.frozen)
            .finish()
    }
}

/// Executes `pending` against `registry`, in order. Stops at the first error.
pub(crate) fn apply(registry: &mut Registry, pending: Vec<PendingRegistration>) -> Result<()> {
    for registration in pending {
        match registration {
            PendingRegistration::Implementation {
                info,
                services,
                lifestyle,
            } => bind_implementation(registry, info, services, lifestyle)?,
            PendingRegistration::Factory {
                info,
                factory,
                services,
                lifestyle,
            } => bind_factory(registry, info, factory, services, lifestyle)?,
            PendingRegistration::Generic {
                implementation,
                services,
            } => bind_generic(registry, implementation, services)?,
        }
    }
    Ok(())
}

/// Rejects an empty service list and services that are already bound or
/// listed twice.
fn check_service_list(registry: &Registry, implementation: &TypeDescriptor, services: &[TypeDescriptor]) -> Result<()> {
    if services.is_empty() {
        return Err(QalibError::NoServiceTypes {
            implementation: implementation.clone(),
        });
    }

    let mut seen = HashSet::with_capacity(services.len());
    for service in services {
        registry.ensure_unbound(service)?;
        if !seen.insert(service) {
            return Err(QalibError::AlreadyRegistered(AlreadyRegisteredError {
                key: service.clone(),
            }));
        }
    }
    Ok(())
}

fn bind_implementation(
    registry: &mut Registry,
    info: TypeInfo,
    services: Vec<TypeDescriptor>,
    lifestyle: Lifestyle,
) -> Result<()> {
    let implementation = info.descriptor().clone();
    check_service_list(registry, &implementation, &services)?;

    let constructor = analyzer::inspect(&info)?;
    let views = analyzer::check_services(&info, &services)?;
    let plan = analyzer::plan(registry, &info, constructor)?;

    let binding = BindingKey::new(implementation.clone());
    let activator = compiler::compile_activator(plan);
    let activator = lifecycle::apply_lifestyle(lifestyle, &binding, registry.root(), activator)?;

    for (service, upcast) in services.into_iter().zip(views) {
        let factory = compiler::compile_service(service.clone(), activator.clone(), upcast);
        registry.insert_service(
            service,
            ServiceEntry {
                implementation: implementation.clone(),
                lifestyle,
                factory,
            },
        )?;
    }
    debug!(implementation = %implementation, lifestyle = %lifestyle, "Bound implementation");
    Ok(())
}

fn bind_factory(
    registry: &mut Registry,
    info: TypeInfo,
    factory: FactoryFn,
    services: Vec<TypeDescriptor>,
    lifestyle: Lifestyle,
) -> Result<()> {
    let implementation = info.descriptor().clone();
    check_service_list(registry, &implementation, &services)?;
    let views = analyzer::check_services(&info, &services)?;

    let binding = BindingKey::new(implementation.clone());
    let activator = compiler::compile_factory_binding(binding.clone(), factory, registry.link(), info.disposer());
    let activator = lifecycle::apply_lifestyle(lifestyle, &binding, registry.root(), activator)?;

    for (service, upcast) in services.into_iter().zip(views) {
        let factory = compiler::compile_service(service.clone(), activator.clone(), upcast);
        registry.insert_service(
            service,
            ServiceEntry {
                implementation: implementation.clone(),
                lifestyle,
                factory,
            },
        )?;
    }
    debug!(implementation = %implementation, lifestyle = %lifestyle, "Bound factory");
    Ok(())
}

fn bind_generic(registry: &mut Registry, implementation: GenericTypeInfo, services: Vec<TypeDescriptor>) -> Result<()> {
    let definition = implementation.definition().clone();
    if !definition.is_open_generic() {
        return Err(QalibError::ImplementationTypeNotOpenGeneric {
            implementation: definition,
        });
    }
    check_service_list(registry, &definition, &services)?;

    for service in &services {
        if !service.is_open_generic() {
            return Err(QalibError::ServiceTypeNotOpenGeneric {
                service: service.clone(),
            });
        }
        if !implementation.implements_generically(service) {
            return Err(QalibError::ImplementationNotImplementingGenericService {
                implementation: definition.clone(),
                service: service.clone(),
            });
        }
    }

    let implementation = Arc::new(implementation);
    for service in services {
        registry.insert_generic(service, implementation.clone())?;
    }
    Ok(())
}
