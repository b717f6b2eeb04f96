//! Registration store: every binding of one container.
//!
//! Explicit bindings map a service descriptor to the compiled factory of
//! the implementation bound to it. Generic bindings map an open service
//! definition to an open implementation. Descriptors with no explicit
//! binding (deferred accessors, zero-argument factories and instances of
//! open generic services) are compiled on first request and cached until
//! the next explicit binding is added.
//!
//! The store is mutated while the container is being built and frozen
//! behind an `Arc` afterwards; the cache is the only part that still
//! changes, and it is safe to fill from many threads.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Condvar, Mutex};
use qalib_support::rendering::suggest_similar;
use tracing::{debug, trace, warn};

use crate::analyzer;
use crate::compiler::{self, CompiledFactory, Instance};
use crate::error::{AlreadyRegisteredError, NotRegisteredError, QalibError, Result};
use crate::key::{Classification, TypeDescriptor};
use crate::lifestyle::Lifestyle;
use crate::metadata::GenericTypeInfo;
use crate::resolver::Resolver;
use crate::scope::LifeScope;

/// User factory for a binding.
///
/// Receives a [`Resolver`] bound to the life scope of the current
/// resolution, so anything it resolves is owned by that scope.
pub type FactoryFn = Arc<dyn Fn(&dyn Resolver) -> Result<Instance> + Send + Sync>;

/// One explicit binding of a service descriptor.
#[derive(Clone)]
pub(crate) struct ServiceEntry {
    pub(crate) implementation: TypeDescriptor,
    pub(crate) lifestyle: Lifestyle,
    pub(crate) factory: CompiledFactory,
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("implementation", &self.implementation)
            .field("lifestyle", &self.lifestyle)
            .finish()
    }
}

/// A compilation one thread is blocked on.
#[derive(Clone, Copy)]
struct Wait {
    owner: ThreadId,
    slot: usize,
}

/// Every thread blocked on a compile slot, and the thread it waits for.
static WAITING: Lazy<Mutex<HashMap<ThreadId, Wait>>> = Lazy::new(Default::default);

/// Records that `me` is about to block on `slot`, owned by `owner`.
///
/// Returns `false` instead when `owner` is itself (transitively) waiting
/// for `me`: blocking would never end.
fn begin_wait(me: ThreadId, owner: ThreadId, slot: usize) -> bool {
    let mut waiting = WAITING.lock();
    let mut current = owner;
    while let Some(wait) = waiting.get(&current) {
        if wait.owner == me {
            return false;
        }
        current = wait.owner;
    }
    waiting.insert(me, Wait { owner, slot });
    true
}

enum SlotState {
    Idle,
    Compiling(ThreadId),
    Ready(CompiledFactory),
}

struct CompileSlot {
    state: Mutex<SlotState>,
    settled: Condvar,
}

impl Default for CompileSlot {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
            settled: Condvar::new(),
        }
    }
}

impl CompileSlot {
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Returns the cached factory, compiling it first if needed.
    ///
    /// A failed compilation is not cached. Asking for a slot that this
    /// thread is compiling, or one whose owner waits on this thread, fails
    /// as not registered.
    fn get_or_compile(
        &self,
        descriptor: &TypeDescriptor,
        compile: impl FnOnce() -> Result<CompiledFactory>,
    ) -> Result<CompiledFactory> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match &*state {
                SlotState::Ready(factory) => {
                    trace!(key = %descriptor, "Compile cache hit");
                    return Ok(factory.clone());
                }
                // Compiling this descriptor requires itself.
                SlotState::Compiling(owner) if *owner == me => return Err(missing(descriptor)),
                SlotState::Compiling(owner) => {
                    let owner = *owner;
                    if !begin_wait(me, owner, self.id()) {
                        debug!(key = %descriptor, "Compilations on two threads wait on each other");
                        return Err(missing(descriptor));
                    }
                    self.settled.wait(&mut state);
                    WAITING.lock().remove(&me);
                }
                SlotState::Idle => break,
            }
        }
        *state = SlotState::Compiling(me);
        drop(state);

        let mut claim = Claim { slot: self, factory: None };
        let compiled = compile();
        if let Ok(factory) = &compiled {
            claim.factory = Some(factory.clone());
        }
        drop(claim);
        compiled
    }

    fn settle(&self, factory: Option<CompiledFactory>) {
        let mut state = self.state.lock();
        *state = match factory {
            Some(factory) => SlotState::Ready(factory),
            None => SlotState::Idle,
        };
        let id = self.id();
        WAITING.lock().retain(|_, wait| wait.slot != id);
        drop(state);
        self.settled.notify_all();
    }
}

/// Releases a slot when its compilation ends, even by unwinding.
struct Claim<'a> {
    slot: &'a CompileSlot,
    factory: Option<CompiledFactory>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.slot.settle(self.factory.take());
    }
}

/// Lets compiled factory bindings reach the frozen registry.
///
/// Bound once, when the registry is frozen. Holds a weak reference so a
/// dropped container is not kept alive by its own factories.
#[derive(Clone, Default)]
pub(crate) struct RegistryLink(Arc<OnceCell<Weak<Registry>>>);

impl RegistryLink {
    fn bind(&self, registry: &Arc<Registry>) {
        if self.0.set(Arc::downgrade(registry)).is_err() {
            warn!("Registry link is already bound; keeping the first registry");
        }
    }

    pub(crate) fn upgrade(&self) -> Result<Arc<Registry>> {
        self.0
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| QalibError::disposed("container"))
    }
}

fn missing(descriptor: &TypeDescriptor) -> QalibError {
    let error = NotRegisteredError::new(descriptor.clone());
    if descriptor.is_sequence() {
        QalibError::NotRegisteredSequenceDependency(error)
    } else {
        QalibError::NotRegisteredDependency(error)
    }
}

/// Stores all bindings of one container.
pub(crate) struct Registry {
    services: HashMap<TypeDescriptor, ServiceEntry>,
    generics: HashMap<TypeDescriptor, Arc<GenericTypeInfo>>,
    compiled: DashMap<TypeDescriptor, Arc<CompileSlot>>,
    root: LifeScope,
    link: RegistryLink,
}

impl Registry {
    pub fn new(root: LifeScope) -> Self {
        Self {
            services: HashMap::new(),
            generics: HashMap::new(),
            compiled: DashMap::new(),
            root,
            link: RegistryLink::default(),
        }
    }

    /// The container's root scope; singletons live in children of it.
    pub fn root(&self) -> &LifeScope {
        &self.root
    }

    pub fn link(&self) -> RegistryLink {
        self.link.clone()
    }

    /// Whether `service` already has an explicit or generic binding.
    pub fn contains(&self, service: &TypeDescriptor) -> bool {
        self.services.contains_key(service) || self.generics.contains_key(service)
    }

    /// # Errors
    /// [`QalibError::AlreadyRegistered`] if `service` is bound.
    pub fn ensure_unbound(&self, service: &TypeDescriptor) -> Result<()> {
        if self.contains(service) {
            return Err(QalibError::AlreadyRegistered(AlreadyRegisteredError {
                key: service.clone(),
            }));
        }
        Ok(())
    }

    /// Adds an explicit binding.
    ///
    /// Drops every cached compilation: a wrapper or generic instance
    /// compiled earlier may have been built without this binding. Bindings
    /// already registered keep the plans they captured.
    pub fn insert_service(&mut self, service: TypeDescriptor, entry: ServiceEntry) -> Result<()> {
        self.ensure_unbound(&service)?;
        debug!(
            service = %service,
            implementation = %entry.implementation,
            lifestyle = %entry.lifestyle,
            "Registered service"
        );
        if !self.compiled.is_empty() {
            trace!(evicted = self.compiled.len(), "Clearing compile cache");
            self.compiled.clear();
        }
        self.services.insert(service, entry);
        Ok(())
    }

    /// Adds a generic binding for the open `service`.
    pub fn insert_generic(&mut self, service: TypeDescriptor, implementation: Arc<GenericTypeInfo>) -> Result<()> {
        self.ensure_unbound(&service)?;
        debug!(service = %service, implementation = %implementation.definition(), "Registered generic service");
        self.generics.insert(service, implementation);
        Ok(())
    }

    pub fn get(&self, service: &TypeDescriptor) -> Option<&ServiceEntry> {
        self.services.get(service)
    }

    /// The compiled factory for `descriptor`.
    ///
    /// Explicit bindings win. Anything else is compiled from what is
    /// registered right now and cached for later requests.
    ///
    /// # Errors
    /// [`QalibError::NotRegisteredDependency`] (or the sequence variant) if
    /// nothing can produce `descriptor`, or whatever compiling it fails with.
    pub fn plan_for(&self, descriptor: &TypeDescriptor) -> Result<CompiledFactory> {
        if let Some(entry) = self.services.get(descriptor) {
            return Ok(entry.factory.clone());
        }

        let slot = self.compiled.entry(descriptor.clone()).or_default().clone();
        slot.get_or_compile(descriptor, || self.compile_unbound(descriptor))
    }

    fn compile_unbound(&self, descriptor: &TypeDescriptor) -> Result<CompiledFactory> {
        match descriptor.classify()? {
            Classification::Plain(plain) => Err(missing(plain)),
            Classification::DeferredAccessor(inner) => {
                trace!(key = %descriptor, "Compiling deferred accessor");
                Ok(compiler::compile_lazy(inner.clone(), self.plan_for(inner)?))
            }
            Classification::ZeroArgFactory(inner) => {
                trace!(key = %descriptor, "Compiling zero-argument factory");
                Ok(compiler::compile_factory(inner.clone(), self.plan_for(inner)?))
            }
            Classification::GenericInstance { arguments, .. } => {
                self.instantiate_generic(descriptor, arguments)
            }
        }
    }

    /// Closes the open binding matching `descriptor` over `arguments`.
    ///
    /// The instantiation is always transient.
    fn instantiate_generic(&self, descriptor: &TypeDescriptor, arguments: &[TypeDescriptor]) -> Result<CompiledFactory> {
        let open = descriptor.open_definition().ok_or_else(|| missing(descriptor))?;
        let Some(generic) = self.generics.get(&open) else {
            return Err(missing(descriptor));
        };

        let info = generic.instantiate(arguments)?;
        let constructor = analyzer::inspect(&info)?;
        let upcast = analyzer::check_services(&info, std::slice::from_ref(descriptor))?
            .pop()
            .ok_or_else(|| missing(descriptor))?;
        let plan = analyzer::plan(self, &info, constructor)?;

        debug!(service = %descriptor, implementation = %info.descriptor(), "Instantiated generic service");
        let activator = compiler::compile_activator(plan);
        Ok(compiler::compile_service(descriptor.clone(), activator, upcast))
    }

    /// Makes the registry shareable and binds its link.
    pub fn freeze(self) -> Arc<Registry> {
        let link = self.link.clone();
        let registry = Arc::new(self);
        link.bind(&registry);
        registry
    }

    /// Maps a lookup failure of a top-level request to
    /// [`QalibError::NotRegisteredService`], with suggestions.
    pub fn service_error(&self, requested: &TypeDescriptor, err: QalibError) -> QalibError {
        match err {
            QalibError::NotRegisteredDependency(_) | QalibError::NotRegisteredSequenceDependency(_) => {
                QalibError::NotRegisteredService(NotRegisteredError {
                    requested: requested.clone(),
                    suggestions: self.suggestions_for(requested),
                })
            }
            other => other,
        }
    }

    fn suggestions_for(&self, requested: &TypeDescriptor) -> Vec<TypeDescriptor> {
        let keys = self.registered_keys();
        let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        suggest_similar(&requested.to_string(), &name_refs, 3)
            .into_iter()
            .filter_map(|name| names.iter().position(|n| *n == name).map(|i| keys[i].clone()))
            .collect()
    }

    /// Number of explicit and generic bindings.
    pub fn len(&self) -> usize {
        self.services.len() + self.generics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registered_keys(&self) -> Vec<TypeDescriptor> {
        let mut keys: Vec<_> = self.services.keys().cloned().collect();
        keys.extend(self.generics.keys().cloned());
        keys
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.services)
            .field("generics", &self.generics.len())
            .field("compiled", &self.compiled.len())
            .field("root", &self.root)
            .finish()
    }
}
