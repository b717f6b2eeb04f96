//! Turns construction plans into reusable factory closures.
//!
//! A compiled factory is built once, when its binding is registered (or
//! when an unregistered wrapper or generic instance is first requested),
//! and then called for every resolution. Calling it never looks anything
//! up: every dependency is already a compiled factory of its own.
//!
//! An activator returns the implementation instance; a service factory
//! wraps one and converts the instance into the requested contract.

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::accessor::{FactoryCell, LazyCell};
use crate::analyzer::ConstructionPlan;
use crate::error::{QalibError, Result};
use crate::guard::BindingKey;
use crate::key::TypeDescriptor;
use crate::metadata::{Arguments, Disposer, Upcast};
use crate::registry::{FactoryFn, RegistryLink};
use crate::resolver::ScopedResolver;
use crate::scope::LifeScope;

/// A constructed implementation, type-erased.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A resolved value, type-erased.
///
/// Holds an `Arc<S>` for a plain service, or the accessor state behind a
/// [`Lazy`](crate::accessor::Lazy) or [`Factory`](crate::accessor::Factory).
pub type ServiceValue = Box<dyn Any + Send + Sync>;

/// Produces a service value inside the given scope.
pub(crate) type CompiledFactory = Arc<dyn Fn(&LifeScope) -> Result<ServiceValue> + Send + Sync>;

/// Produces an implementation instance inside the given scope.
pub(crate) type Activator = Arc<dyn Fn(&LifeScope) -> Result<Instance> + Send + Sync>;

pub(crate) fn type_mismatch<T: ?Sized>(key: &TypeDescriptor) -> QalibError {
    QalibError::construction(
        key,
        format!("Type mismatch: expected {}", type_name::<T>()),
    )
}

pub(crate) fn downcast_service<S: ?Sized + Send + Sync + 'static>(
    value: ServiceValue,
    key: &TypeDescriptor,
) -> Result<Arc<S>> {
    value
        .downcast::<Arc<S>>()
        .map(|service| *service)
        .map_err(|_| type_mismatch::<Arc<S>>(key))
}

/// Compiles a constructor-based plan.
///
/// Each call checks the scope is open, evaluates the dependency factories
/// against the same scope in parameter order, invokes the constructor, and
/// tracks the instance in the scope when the implementation is disposable.
pub(crate) fn compile_activator(plan: ConstructionPlan) -> Activator {
    let ConstructionPlan {
        implementation,
        constructor,
        dependencies,
        disposer,
    } = plan;

    Arc::new(move |scope: &LifeScope| {
        scope.ensure_open()?;

        let mut values = Vec::with_capacity(dependencies.len());
        for dependency in &dependencies {
            values.push(dependency(scope)?);
        }

        trace!(implementation = %implementation, scope = scope.id(), "Constructing");
        let instance = constructor(Arguments::new(implementation.clone(), values))?;

        if let Some(disposer) = &disposer {
            track_instance(scope, disposer, &instance, &implementation)?;
        }
        Ok(instance)
    })
}

/// Compiles a user factory binding.
///
/// The factory receives a resolver bound to the calling scope.
pub(crate) fn compile_factory_binding(
    binding: BindingKey,
    factory: FactoryFn,
    link: RegistryLink,
    disposer: Option<Disposer>,
) -> Activator {
    Arc::new(move |scope: &LifeScope| {
        scope.ensure_open()?;
        let resolver = ScopedResolver::new(link.upgrade()?, scope.clone());
        trace!(implementation = %binding.implementation(), scope = scope.id(), "Invoking factory");
        let instance = factory(&resolver)?;

        if let Some(disposer) = &disposer {
            track_instance(scope, disposer, &instance, binding.implementation())?;
        }
        Ok(instance)
    })
}

/// Wraps an activator so it yields `service` instead of the instance.
pub(crate) fn compile_service(service: TypeDescriptor, activator: Activator, upcast: Upcast) -> CompiledFactory {
    Arc::new(move |scope: &LifeScope| {
        let instance = activator(scope)?;
        upcast(instance).ok_or_else(|| {
            QalibError::construction(&service, format!("instance cannot be viewed as {service}"))
        })
    })
}

/// A factory yielding a fresh deferred accessor over `inner`.
pub(crate) fn compile_lazy(inner: TypeDescriptor, plan: CompiledFactory) -> CompiledFactory {
    Arc::new(move |scope: &LifeScope| {
        let cell = LazyCell::new(inner.clone(), scope.clone(), plan.clone());
        Ok(Box::new(Arc::new(cell)) as ServiceValue)
    })
}

/// A factory yielding a zero-argument factory over `inner`.
pub(crate) fn compile_factory(inner: TypeDescriptor, plan: CompiledFactory) -> CompiledFactory {
    Arc::new(move |scope: &LifeScope| {
        let cell = FactoryCell::new(inner.clone(), scope.clone(), plan.clone());
        Ok(Box::new(Arc::new(cell)) as ServiceValue)
    })
}

fn track_instance(
    scope: &LifeScope,
    disposer: &Disposer,
    instance: &Instance,
    implementation: &TypeDescriptor,
) -> Result<()> {
    let disposable = disposer
        .view(instance)
        .ok_or_else(|| type_mismatch::<dyn crate::dispose::Dispose>(implementation))?;

    if let Err(err) = scope.track_erased(Cow::Borrowed(disposer.label()), disposable.clone()) {
        // The scope was disposed while the instance was being built; nobody
        // else will ever dispose it.
        if let Err(source) = disposable.dispose() {
            warn!(implementation = %implementation, error = %source, "Disposing orphaned instance failed");
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ImplementationInfo, TypeInfo};
    use crate::testing::{DisposalLog, Probe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn probe_plan(log: &DisposalLog, built: Arc<AtomicUsize>) -> ConstructionPlan {
        let log = log.clone();
        let info: ImplementationInfo<Probe> = TypeInfo::of::<Probe>()
            .constructor([], move |_| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Probe::unshared("probe", &log))
            })
            .disposable();
        let info: TypeInfo = info.into();
        ConstructionPlan {
            implementation: info.descriptor().clone(),
            constructor: info.constructors()[0].invoke().clone(),
            dependencies: Vec::new(),
            disposer: info.disposer(),
        }
    }

    #[test]
    fn activator_tracks_disposables() {
        let log = DisposalLog::default();
        let activator = compile_activator(probe_plan(&log, Arc::new(AtomicUsize::new(0))));
        let scope = LifeScope::new();

        activator(&scope).unwrap();
        activator(&scope).unwrap();
        assert_eq!(scope.tracked_count(), 2);

        scope.dispose().unwrap();
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn activator_refuses_disposed_scope() {
        let log = DisposalLog::default();
        let built = Arc::new(AtomicUsize::new(0));
        let activator = compile_activator(probe_plan(&log, built.clone()));
        let scope = LifeScope::new();
        scope.dispose().unwrap();

        assert!(matches!(activator(&scope), Err(QalibError::ObjectDisposed { .. })));
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn downcast_reports_expected_type() {
        let value: ServiceValue = Box::new(Arc::new(3u16));
        assert_eq!(*downcast_service::<u16>(value, &TypeDescriptor::of::<u16>()).unwrap(), 3);

        let value: ServiceValue = Box::new(Arc::new(3u16));
        let err = downcast_service::<String>(value, &TypeDescriptor::of::<String>()).unwrap_err();
        assert!(err.to_string().contains("Type mismatch: expected"));
    }

    #[test]
    fn lazy_factory_defers_construction() {
        let log = DisposalLog::default();
        let built = Arc::new(AtomicUsize::new(0));
        let activator = compile_activator(probe_plan(&log, built.clone()));
        let info: TypeInfo = TypeInfo::of::<Probe>().into();
        let upcast = info.upcast_for(&TypeDescriptor::of::<Probe>()).unwrap();
        let service = compile_service(TypeDescriptor::of::<Probe>(), activator, upcast);
        let lazy = compile_lazy(TypeDescriptor::of::<Probe>(), service);

        let scope = LifeScope::new();
        let value = lazy(&scope).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let lazy = crate::accessor::downcast_lazy::<Probe>(value, &TypeDescriptor::lazy::<Probe>()).unwrap();
        lazy.get().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(scope.tracked_count(), 1);
    }
}
