//! Deferred accessors and zero-argument factories.
//!
//! Both capture the life scope of the resolution that produced them:
//! instances they build later are owned by that scope, and once the scope
//! is disposed they refuse to build anything.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::compiler::{CompiledFactory, ServiceValue, downcast_service, type_mismatch};
use crate::error::Result;
use crate::key::TypeDescriptor;
use crate::scope::LifeScope;

pub(crate) struct LazyCell {
    key: TypeDescriptor,
    scope: LifeScope,
    plan: CompiledFactory,
    value: OnceCell<ServiceValue>,
}

impl LazyCell {
    pub(crate) fn new(key: TypeDescriptor, scope: LifeScope, plan: CompiledFactory) -> Self {
        Self {
            key,
            scope,
            plan,
            value: OnceCell::new(),
        }
    }

    fn force(&self) -> Result<&ServiceValue> {
        self.value.get_or_try_init(|| {
            self.scope.ensure_open()?;
            (self.plan)(&self.scope)
        })
    }
}

/// A value of `S` built on first [`get`](Lazy::get), then remembered.
///
/// A failed build is not remembered; the next `get` tries again.
pub struct Lazy<S: ?Sized> {
    cell: Arc<LazyCell>,
    _marker: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Lazy<S> {
    pub(crate) fn from_cell(cell: Arc<LazyCell>) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// Builds the value on first call and returns it.
    ///
    /// # Errors
    /// [`QalibError::ObjectDisposed`](crate::error::QalibError::ObjectDisposed)
    /// if the value was never built and its scope is gone, or whatever
    /// building it fails with.
    pub fn get(&self) -> Result<Arc<S>> {
        let value = self.cell.force()?;
        value
            .downcast_ref::<Arc<S>>()
            .cloned()
            .ok_or_else(|| type_mismatch::<Arc<S>>(&self.cell.key))
    }

    /// Whether the value has been built.
    pub fn is_created(&self) -> bool {
        self.cell.value.get().is_some()
    }
}

impl<S: ?Sized> Clone for Lazy<S> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S: ?Sized> fmt::Debug for Lazy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("key", &self.cell.key)
            .field("created", &self.cell.value.get().is_some())
            .finish()
    }
}

pub(crate) struct FactoryCell {
    key: TypeDescriptor,
    scope: LifeScope,
    plan: CompiledFactory,
}

impl FactoryCell {
    pub(crate) fn new(key: TypeDescriptor, scope: LifeScope, plan: CompiledFactory) -> Self {
        Self { key, scope, plan }
    }
}

/// Builds a value of `S` per [`create`](Factory::create) call.
///
/// Every call runs the full construction of the underlying binding, so a
/// singleton binding still yields its one instance.
pub struct Factory<S: ?Sized> {
    cell: Arc<FactoryCell>,
    _marker: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Factory<S> {
    pub(crate) fn from_cell(cell: Arc<FactoryCell>) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// # Errors
    /// [`QalibError::ObjectDisposed`](crate::error::QalibError::ObjectDisposed)
    /// once the captured scope is disposed.
    pub fn create(&self) -> Result<Arc<S>> {
        self.cell.scope.ensure_open()?;
        let value = (self.cell.plan)(&self.cell.scope)?;
        downcast_service::<S>(value, &self.cell.key)
    }

    /// The scope that owns what this factory creates.
    pub fn scope(&self) -> &LifeScope {
        &self.cell.scope
    }
}

impl<S: ?Sized> Clone for Factory<S> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S: ?Sized> fmt::Debug for Factory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").field("key", &self.cell.key).finish()
    }
}

pub(crate) fn downcast_lazy<S: ?Sized + Send + Sync + 'static>(
    value: ServiceValue,
    key: &TypeDescriptor,
) -> Result<Lazy<S>> {
    value
        .downcast::<Arc<LazyCell>>()
        .map(|cell| Lazy::from_cell(*cell))
        .map_err(|_| type_mismatch::<Lazy<S>>(key))
}

pub(crate) fn downcast_factory<S: ?Sized + Send + Sync + 'static>(
    value: ServiceValue,
    key: &TypeDescriptor,
) -> Result<Factory<S>> {
    value
        .downcast::<Arc<FactoryCell>>()
        .map(|cell| Factory::from_cell(*cell))
        .map_err(|_| type_mismatch::<Factory<S>>(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QalibError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_plan(counter: Arc<AtomicUsize>) -> CompiledFactory {
        Arc::new(move |_scope: &LifeScope| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(Arc::new(n)) as ServiceValue)
        })
    }

    fn lazy_over(scope: &LifeScope, plan: CompiledFactory) -> Lazy<usize> {
        let key = TypeDescriptor::of::<usize>();
        Lazy::from_cell(Arc::new(LazyCell::new(key, scope.clone(), plan)))
    }

    #[test]
    fn lazy_builds_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let lazy = lazy_over(&LifeScope::new(), counting_plan(counter.clone()));

        assert!(!lazy.is_created());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(*lazy.get().unwrap(), 1);
        assert_eq!(*lazy.clone().get().unwrap(), 1);
        assert!(lazy.is_created());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_retries_after_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let plan: CompiledFactory = Arc::new(move |_scope: &LifeScope| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(QalibError::construction(&TypeDescriptor::of::<usize>(), "warming up"));
            }
            Ok(Box::new(Arc::new(5usize)) as ServiceValue)
        });
        let lazy = lazy_over(&LifeScope::new(), plan);

        assert!(lazy.get().is_err());
        assert_eq!(*lazy.get().unwrap(), 5);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lazy_refuses_disposed_scope() {
        let scope = LifeScope::new();
        let lazy = lazy_over(&scope, counting_plan(Arc::new(AtomicUsize::new(0))));
        scope.dispose().unwrap();
        assert!(matches!(lazy.get(), Err(QalibError::ObjectDisposed { .. })));
    }

    #[test]
    fn factory_builds_per_call() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = LifeScope::new();
        let factory: Factory<usize> = Factory::from_cell(Arc::new(FactoryCell::new(
            TypeDescriptor::of::<usize>(),
            scope.clone(),
            counting_plan(counter),
        )));

        assert_eq!(*factory.create().unwrap(), 1);
        assert_eq!(*factory.create().unwrap(), 2);

        scope.dispose().unwrap();
        assert!(matches!(factory.create(), Err(QalibError::ObjectDisposed { .. })));
    }

    #[test]
    fn wrong_payload_is_a_mismatch() {
        let value: ServiceValue = Box::new(Arc::new(1u8));
        let err = downcast_lazy::<u8>(value, &TypeDescriptor::lazy::<u8>()).unwrap_err();
        assert!(err.to_string().contains("Type mismatch"));
    }
}
