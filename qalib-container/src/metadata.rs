//! Type metadata: what the container knows about an implementation.
//!
//! Rust has no runtime reflection, so every implementation describes
//! itself once through a [`TypeInfo`]: its constructor and the parameter
//! descriptors it takes, the contracts it can be viewed as, and whether
//! it is disposable. The container reads nothing else.
//!
//! ```
//! use qalib_container::metadata::{Param, TypeInfo};
//! use std::sync::Arc;
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! struct FixedClock;
//! impl Clock for FixedClock {
//!     fn now(&self) -> u64 { 42 }
//! }
//!
//! struct Scheduler {
//!     clock: Arc<dyn Clock>,
//! }
//!
//! let clock = TypeInfo::of::<FixedClock>()
//!     .constructor([], |_| Ok(FixedClock))
//!     .implements::<dyn Clock>(|this| this);
//!
//! let scheduler = TypeInfo::of::<Scheduler>()
//!     .constructor([Param::of::<dyn Clock>()], |args| {
//!         Ok(Scheduler { clock: args.service::<dyn Clock>()? })
//!     });
//! # let _ = (clock, scheduler);
//! ```

use std::any::type_name;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::accessor::{Factory, Lazy};
use crate::compiler::{Instance, ServiceValue};
use crate::dispose::{Dispose, dispose_contract};
use crate::error::{QalibError, Result};
use crate::key::TypeDescriptor;

/// Whether a type can be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    Concrete,
    /// A trait object or other contract with no constructor of its own.
    Abstract,
}

/// How a constructor parameter is passed.
///
/// Only [`ParamModifier::None`] can be supplied by the container; the
/// others exist so foreign metadata can be described faithfully and then
/// rejected with a precise error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamModifier {
    #[default]
    None,
    ByRef,
    Out,
    Defaulted,
}

impl ParamModifier {
    pub(crate) fn describe(&self) -> Option<&'static str> {
        match self {
            ParamModifier::None => None,
            ParamModifier::ByRef => Some("by-reference"),
            ParamModifier::Out => Some("output"),
            ParamModifier::Defaulted => Some("defaulted"),
        }
    }
}

/// One constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    descriptor: TypeDescriptor,
    modifier: ParamModifier,
}

impl Param {
    /// A parameter of any descriptor.
    pub fn new(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            modifier: ParamModifier::None,
        }
    }

    /// An `Arc<S>` parameter.
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self::new(TypeDescriptor::of::<S>())
    }

    /// A [`Lazy<S>`] parameter.
    pub fn lazy<S: ?Sized + 'static>() -> Self {
        Self::new(TypeDescriptor::lazy::<S>())
    }

    /// A [`Factory<S>`] parameter.
    pub fn factory<S: ?Sized + 'static>() -> Self {
        Self::new(TypeDescriptor::factory::<S>())
    }

    pub fn by_ref(self) -> Self {
        self.with_modifier(ParamModifier::ByRef)
    }

    pub fn out(self) -> Self {
        self.with_modifier(ParamModifier::Out)
    }

    pub fn with_default(self) -> Self {
        self.with_modifier(ParamModifier::Defaulted)
    }

    pub fn with_modifier(mut self, modifier: ParamModifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn modifier(&self) -> ParamModifier {
        self.modifier
    }
}

pub(crate) type ConstructorFn = Arc<dyn Fn(Arguments) -> Result<Instance> + Send + Sync>;

/// Converts an implementation instance into one of its service views.
pub(crate) type Upcast = Arc<dyn Fn(Instance) -> Option<ServiceValue> + Send + Sync>;

/// A declared constructor: its parameters and how to call it.
#[derive(Clone)]
pub struct ConstructorInfo {
    params: Vec<Param>,
    invoke: ConstructorFn,
}

impl ConstructorInfo {
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub(crate) fn invoke(&self) -> &ConstructorFn {
        &self.invoke
    }
}

impl fmt::Debug for ConstructorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorInfo")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub(crate) struct Supertype {
    pub(crate) descriptor: TypeDescriptor,
    pub(crate) upcast: Upcast,
    pub(crate) disposable: bool,
}

/// Views a constructed instance as `dyn Dispose`.
#[derive(Clone, Copy)]
pub(crate) struct Disposer {
    label: &'static str,
    view: fn(&Instance) -> Option<Arc<dyn Dispose>>,
}

impl Disposer {
    fn of<T: Dispose>() -> Self {
        fn view<T: Dispose>(instance: &Instance) -> Option<Arc<dyn Dispose>> {
            instance
                .clone()
                .downcast::<T>()
                .ok()
                .map(|this| this as Arc<dyn Dispose>)
        }
        Self {
            label: type_name::<T>(),
            view: view::<T>,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn view(&self, instance: &Instance) -> Option<Arc<dyn Dispose>> {
        (self.view)(instance)
    }
}

fn typed_upcast<T, S, F>(upcast: F) -> Upcast
where
    T: Send + Sync + 'static,
    S: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<T>) -> Arc<S> + Send + Sync + 'static,
{
    Arc::new(move |instance: Instance| {
        instance
            .downcast::<T>()
            .ok()
            .map(|this| Box::new(upcast(this)) as ServiceValue)
    })
}

/// Everything the container knows about one type.
#[derive(Clone)]
pub struct TypeInfo {
    descriptor: TypeDescriptor,
    shape: TypeShape,
    constructors: Vec<ConstructorInfo>,
    own_view: Option<Upcast>,
    supertypes: Vec<Supertype>,
    disposer: Option<Disposer>,
}

impl TypeInfo {
    /// Starts describing the concrete type `T`.
    pub fn of<T: Send + Sync + 'static>() -> ImplementationInfo<T> {
        ImplementationInfo {
            info: TypeInfo {
                descriptor: TypeDescriptor::of::<T>(),
                shape: TypeShape::Concrete,
                constructors: Vec::new(),
                own_view: Some(typed_upcast::<T, T, _>(|this| this)),
                supertypes: Vec::new(),
                disposer: None,
            },
            _marker: PhantomData,
        }
    }

    /// Describes an abstract contract such as a trait object.
    pub fn contract<S: ?Sized + 'static>() -> TypeInfo {
        TypeInfo {
            descriptor: TypeDescriptor::of::<S>(),
            shape: TypeShape::Abstract,
            constructors: Vec::new(),
            own_view: None,
            supertypes: Vec::new(),
            disposer: None,
        }
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn shape(&self) -> TypeShape {
        self.shape
    }

    pub fn constructors(&self) -> &[ConstructorInfo] {
        &self.constructors
    }

    pub fn is_disposable(&self) -> bool {
        self.disposer.is_some()
    }

    /// Every contract an instance can be viewed as, itself included.
    pub fn services(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.own_view
            .as_ref()
            .map(|_| &self.descriptor)
            .into_iter()
            .chain(self.supertypes.iter().map(|s| &s.descriptor))
    }

    pub(crate) fn supertype(&self, service: &TypeDescriptor) -> Option<&Supertype> {
        self.supertypes.iter().find(|s| s.descriptor == *service)
    }

    /// Whether `service` is a contract declared disposable.
    pub(crate) fn is_disposable_contract(&self, service: &TypeDescriptor) -> bool {
        *service == dispose_contract() || self.supertype(service).is_some_and(|s| s.disposable)
    }

    /// The conversion from an instance to `service`, if `service` is this
    /// type or one of its declared supertypes.
    pub(crate) fn upcast_for(&self, service: &TypeDescriptor) -> Option<Upcast> {
        if *service == self.descriptor {
            if let Some(own) = &self.own_view {
                return Some(own.clone());
            }
        }
        self.supertype(service).map(|s| s.upcast.clone())
    }

    pub(crate) fn disposer(&self) -> Option<Disposer> {
        self.disposer
    }

    pub(crate) fn with_descriptor(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supertypes: Vec<&TypeDescriptor> =
            self.supertypes.iter().map(|s| &s.descriptor).collect();
        f.debug_struct("TypeInfo")
            .field("descriptor", &self.descriptor)
            .field("shape", &self.shape)
            .field("constructors", &self.constructors)
            .field("supertypes", &supertypes)
            .field("disposable", &self.is_disposable())
            .finish()
    }
}

/// Typed builder for the [`TypeInfo`] of `T`.
///
/// Converts into `TypeInfo` wherever one is expected.
pub struct ImplementationInfo<T> {
    info: TypeInfo,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ImplementationInfo<T> {
    /// Declares a constructor taking `params`, in order.
    ///
    /// `build` reads its arguments from [`Arguments`] in the same order.
    /// Declaring more than one constructor makes the type unregistrable.
    pub fn constructor<F>(mut self, params: impl IntoIterator<Item = Param>, build: F) -> Self
    where
        F: Fn(&mut Arguments) -> Result<T> + Send + Sync + 'static,
    {
        let invoke: ConstructorFn = Arc::new(move |mut args: Arguments| {
            let value = build(&mut args)?;
            Ok(Arc::new(value) as Instance)
        });
        self.info.constructors.push(ConstructorInfo {
            params: params.into_iter().collect(),
            invoke,
        });
        self
    }

    /// Declares that `T` can be used as `S`.
    pub fn implements<S>(self, upcast: impl Fn(Arc<T>) -> Arc<S> + Send + Sync + 'static) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let descriptor = TypeDescriptor::of::<S>();
        let disposable = descriptor == dispose_contract();
        self.push_supertype(descriptor, typed_upcast(upcast), disposable)
    }

    /// Declares that `T` can be used as the service `descriptor`, whose
    /// values are `Arc<S>`.
    ///
    /// Used for closed generic services, where the descriptor is not the
    /// Rust type of the value.
    pub fn implements_as<S>(
        self,
        descriptor: TypeDescriptor,
        upcast: impl Fn(Arc<T>) -> Arc<S> + Send + Sync + 'static,
    ) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let disposable = descriptor == dispose_contract();
        self.push_supertype(descriptor, typed_upcast(upcast), disposable)
    }

    /// Declares a supertype that is itself a disposable contract.
    ///
    /// Such a supertype can never be registered as a service.
    pub fn implements_disposable<S>(self, upcast: impl Fn(Arc<T>) -> Arc<S> + Send + Sync + 'static) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.push_supertype(TypeDescriptor::of::<S>(), typed_upcast(upcast), true)
    }

    /// Overrides the descriptor `T` is known by.
    pub fn described_as(mut self, descriptor: TypeDescriptor) -> Self {
        self.info.descriptor = descriptor;
        self
    }

    pub fn info(&self) -> &TypeInfo {
        &self.info
    }

    fn push_supertype(mut self, descriptor: TypeDescriptor, upcast: Upcast, disposable: bool) -> Self {
        self.info.supertypes.push(Supertype {
            descriptor,
            upcast,
            disposable,
        });
        self
    }
}

impl<T: Dispose> ImplementationInfo<T> {
    /// Marks `T` as disposable: every instance is tracked by the scope it
    /// was constructed in.
    pub fn disposable(mut self) -> Self {
        self.info.disposer = Some(Disposer::of::<T>());
        self
    }
}

impl<T> From<ImplementationInfo<T>> for TypeInfo {
    fn from(info: ImplementationInfo<T>) -> Self {
        info.info
    }
}

impl<T> fmt::Debug for ImplementationInfo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.info.fmt(f)
    }
}

/// Types that describe themselves.
///
/// ```
/// use qalib_container::metadata::{Injectable, TypeInfo};
///
/// struct Settings;
///
/// impl Injectable for Settings {
///     fn type_info() -> TypeInfo {
///         TypeInfo::of::<Settings>().constructor([], |_| Ok(Settings)).into()
///     }
/// }
/// ```
pub trait Injectable: Send + Sync + 'static {
    fn type_info() -> TypeInfo;
}

/// Constructor arguments, in parameter order.
///
/// Each accessor consumes the next argument.
pub struct Arguments {
    implementation: TypeDescriptor,
    values: VecDeque<ServiceValue>,
    position: usize,
}

impl Arguments {
    pub(crate) fn new(implementation: TypeDescriptor, values: Vec<ServiceValue>) -> Self {
        Self {
            implementation,
            values: values.into(),
            position: 0,
        }
    }

    /// Number of arguments not yet read.
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    /// The next argument as `Arc<S>`.
    pub fn service<S: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Arc<S>> {
        let value = self.next_value()?;
        crate::compiler::downcast_service::<S>(value, &self.implementation)
            .map_err(|_| self.mismatch(type_name::<Arc<S>>()))
    }

    /// The next argument as a [`Lazy<S>`].
    pub fn lazy<S: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Lazy<S>> {
        let value = self.next_value()?;
        crate::accessor::downcast_lazy::<S>(value, &self.implementation)
            .map_err(|_| self.mismatch(type_name::<Lazy<S>>()))
    }

    /// The next argument as a [`Factory<S>`].
    pub fn factory<S: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Factory<S>> {
        let value = self.next_value()?;
        crate::accessor::downcast_factory::<S>(value, &self.implementation)
            .map_err(|_| self.mismatch(type_name::<Factory<S>>()))
    }

    fn next_value(&mut self) -> Result<ServiceValue> {
        self.position += 1;
        self.values.pop_front().ok_or_else(|| {
            QalibError::construction(
                &self.implementation,
                format!("constructor read argument #{} but only {} were declared", self.position, self.position - 1),
            )
        })
    }

    fn mismatch(&self, expected: &str) -> QalibError {
        QalibError::construction(
            &self.implementation,
            format!("argument #{} is not {expected}", self.position),
        )
    }
}

/// One type argument of a generic supertype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeArg {
    /// The implementation's own parameter at this index.
    Parameter(usize),
    /// A fixed type.
    Concrete(TypeDescriptor),
}

#[derive(Debug, Clone)]
struct GenericSupertype {
    service: TypeDescriptor,
    arguments: Vec<TypeArg>,
}

type Instantiate = Arc<dyn Fn(&[TypeDescriptor]) -> Result<TypeInfo> + Send + Sync>;

/// Metadata of an open generic implementation.
///
/// `instantiate` receives the type arguments of a requested closed service
/// and returns the info of the matching closed implementation. Its
/// descriptor is replaced by the closed form of `definition`.
///
/// ```
/// use qalib_container::key::{TypeDescriptor, TypeIdentity};
/// use qalib_container::metadata::{GenericTypeInfo, TypeArg, TypeInfo};
///
/// struct RepositoryDef;
/// struct MemoryRepositoryDef;
/// struct MemoryRepository;
///
/// let service = TypeDescriptor::open_generic(TypeIdentity::named::<RepositoryDef>("Repository"), 1);
/// let service_for_closing = service.clone();
///
/// let info = GenericTypeInfo::new(
///     TypeDescriptor::open_generic(TypeIdentity::named::<MemoryRepositoryDef>("MemoryRepository"), 1),
///     move |args| {
///         let closed = service_for_closing.close(args.to_vec()).expect("arity checked by the container");
///         Ok(TypeInfo::of::<MemoryRepository>()
///             .constructor([], |_| Ok(MemoryRepository))
///             .implements_as::<MemoryRepository>(closed, |this| this)
///             .into())
///     },
/// )
/// .implements(service, vec![TypeArg::Parameter(0)]);
/// # let _ = info;
/// ```
#[derive(Clone)]
pub struct GenericTypeInfo {
    definition: TypeDescriptor,
    supertypes: Vec<GenericSupertype>,
    instantiate: Instantiate,
}

impl GenericTypeInfo {
    pub fn new<F>(definition: TypeDescriptor, instantiate: F) -> Self
    where
        F: Fn(&[TypeDescriptor]) -> Result<TypeInfo> + Send + Sync + 'static,
    {
        Self {
            definition,
            supertypes: Vec::new(),
            instantiate: Arc::new(instantiate),
        }
    }

    /// Declares the open `service` as a supertype, applied to `arguments`.
    pub fn implements(mut self, service: TypeDescriptor, arguments: Vec<TypeArg>) -> Self {
        self.supertypes.push(GenericSupertype { service, arguments });
        self
    }

    pub fn definition(&self) -> &TypeDescriptor {
        &self.definition
    }

    /// Whether the implementation is `service` applied to exactly its own
    /// parameters, in order.
    pub(crate) fn implements_generically(&self, service: &TypeDescriptor) -> bool {
        let arity = self.definition.arity();
        service.arity() == arity
            && self.supertypes.iter().any(|supertype| {
                supertype.service == *service
                    && supertype.arguments.len() == arity
                    && supertype
                        .arguments
                        .iter()
                        .enumerate()
                        .all(|(index, arg)| *arg == TypeArg::Parameter(index))
            })
    }

    /// Builds the info of the closed implementation for `arguments`.
    pub(crate) fn instantiate(&self, arguments: &[TypeDescriptor]) -> Result<TypeInfo> {
        let closed = self.definition.close(arguments.to_vec()).ok_or_else(|| {
            QalibError::construction(
                &self.definition,
                format!("expected {} type arguments, got {}", self.definition.arity(), arguments.len()),
            )
        })?;
        let info = (self.instantiate)(arguments)?;
        Ok(info.with_descriptor(closed))
    }
}

impl fmt::Debug for GenericTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericTypeInfo")
            .field("definition", &self.definition)
            .field("supertypes", &self.supertypes)
            .finish_non_exhaustive()
    }
}
