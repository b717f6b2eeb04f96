//! Type descriptors: the keys of every lookup in the container.
//!
//! A [`TypeDescriptor`] identifies a requested contract. Besides plain Rust
//! types it can describe generic definitions and their instantiations, and
//! the two wrapper shapes the container knows how to build on its own:
//! deferred accessors ([`Lazy`](crate::accessor::Lazy)) and zero-argument
//! factories ([`Factory`](crate::accessor::Factory)).
//!
//! Equality is structural, so descriptors are used directly as map keys.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

use qalib_support::rendering::{render_generic, shorten_type_name};

use crate::error::{QalibError, Result};

/// Identity of a Rust type, or of a marker type standing in for a generic
/// definition.
///
/// Two identities are equal when their [`TypeId`]s are. The display name is
/// only used for diagnostics.
///
/// # Examples
/// ```
/// use qalib_container::key::TypeIdentity;
///
/// struct RepositoryDef;
///
/// let id = TypeIdentity::named::<RepositoryDef>("Repository");
/// assert_eq!(id.display_name(), "Repository");
/// assert_eq!(id, TypeIdentity::of::<RepositoryDef>());
/// ```
#[derive(Clone, Copy)]
pub struct TypeIdentity {
    type_id: TypeId,
    type_name: &'static str,
}

impl TypeIdentity {
    /// Identity of `T`, displayed with its Rust type name.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Identity of `T`, displayed as `name`.
    ///
    /// Handy for marker types that name a generic definition.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: name,
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The full name this identity was created with.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The name with every module path removed.
    pub fn display_name(&self) -> String {
        shorten_type_name(self.type_name)
    }
}

impl PartialEq for TypeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeIdentity {}

impl Hash for TypeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIdentity({})", self.type_name)
    }
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Marker for the built-in "collection of T" generic definition.
struct SequenceDefinition;

fn sequence_identity() -> TypeIdentity {
    TypeIdentity::named::<SequenceDefinition>("Vec")
}

/// A callable contract declared by the user, such as a named factory type.
///
/// Only shapes with no parameters and a return type are usable as
/// zero-argument factories.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CallableShape {
    identity: TypeIdentity,
    parameters: Vec<TypeDescriptor>,
    returns: Option<Box<TypeDescriptor>>,
}

impl CallableShape {
    pub fn identity(&self) -> TypeIdentity {
        self.identity
    }

    pub fn parameters(&self) -> &[TypeDescriptor] {
        &self.parameters
    }

    pub fn returns(&self) -> Option<&TypeDescriptor> {
        self.returns.as_deref()
    }

    fn is_zero_arg_factory(&self) -> bool {
        self.parameters.is_empty() && self.returns.is_some()
    }
}

impl fmt::Display for CallableShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.parameters.iter().map(ToString::to_string).collect();
        write!(f, "{}: fn({})", self.identity, params.join(", "))?;
        if let Some(ret) = &self.returns {
            write!(f, " -> {ret}")?;
        }
        Ok(())
    }
}

/// Identifies a requested contract.
///
/// # Examples
/// ```
/// use qalib_container::key::TypeDescriptor;
///
/// trait Clock: Send + Sync {}
///
/// let plain = TypeDescriptor::of::<dyn Clock>();
/// let lazy = TypeDescriptor::lazy::<dyn Clock>();
/// assert_ne!(plain, lazy);
/// assert_eq!(lazy.inner(), Some(&plain));
/// assert_eq!(lazy.to_string(), "Lazy<dyn Clock>");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A concrete Rust type or trait object.
    Plain(TypeIdentity),
    /// A generic definition with unbound parameters.
    OpenGeneric { definition: TypeIdentity, arity: usize },
    /// A generic definition bound to concrete arguments.
    ClosedGeneric {
        definition: TypeIdentity,
        arguments: Vec<TypeDescriptor>,
    },
    /// A value built on first read.
    Deferred(Box<TypeDescriptor>),
    /// A callable producing a value per invocation.
    Factory(Box<TypeDescriptor>),
    /// A user-declared callable shape.
    Callable(CallableShape),
}

/// What a descriptor asks the container to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    /// Look the descriptor up as is.
    Plain(&'a TypeDescriptor),
    /// Build a deferred accessor over the inner descriptor.
    DeferredAccessor(&'a TypeDescriptor),
    /// Build a zero-argument factory over the inner descriptor.
    ZeroArgFactory(&'a TypeDescriptor),
    /// Look up an explicit binding, falling back to an open generic binding.
    GenericInstance {
        definition: TypeIdentity,
        arguments: &'a [TypeDescriptor],
    },
}

impl TypeDescriptor {
    /// Descriptor for the plain type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Plain(TypeIdentity::of::<T>())
    }

    /// Descriptor for a deferred accessor of `T`.
    pub fn lazy<T: ?Sized + 'static>() -> Self {
        Self::of::<T>().deferred()
    }

    /// Descriptor for a zero-argument factory of `T`.
    pub fn factory<T: ?Sized + 'static>() -> Self {
        Self::of::<T>().into_factory()
    }

    /// An open generic definition with `arity` parameters.
    pub fn open_generic(definition: TypeIdentity, arity: usize) -> Self {
        Self::OpenGeneric { definition, arity }
    }

    /// An instantiation of `definition`.
    pub fn closed_generic(definition: TypeIdentity, arguments: Vec<TypeDescriptor>) -> Self {
        Self::ClosedGeneric {
            definition,
            arguments,
        }
    }

    /// A collection of `element`.
    ///
    /// The container never aggregates registrations into a collection;
    /// sequences must be registered explicitly. Prefer this over
    /// `TypeDescriptor::of::<Vec<T>>()` when the sequence shape matters.
    pub fn sequence(element: TypeDescriptor) -> Self {
        Self::closed_generic(sequence_identity(), vec![element])
    }

    /// A user-declared callable shape identified by `M`.
    pub fn callable<M: ?Sized + 'static>(
        parameters: Vec<TypeDescriptor>,
        returns: Option<TypeDescriptor>,
    ) -> Self {
        Self::Callable(CallableShape {
            identity: TypeIdentity::of::<M>(),
            parameters,
            returns: returns.map(Box::new),
        })
    }

    /// Wraps this descriptor in a deferred accessor.
    pub fn deferred(self) -> Self {
        Self::Deferred(Box::new(self))
    }

    /// Wraps this descriptor in a zero-argument factory.
    pub fn into_factory(self) -> Self {
        Self::Factory(Box::new(self))
    }

    /// Binds an open definition to `arguments`.
    ///
    /// Returns `None` when `self` is not an open definition or the argument
    /// count does not match its arity.
    pub fn close(&self, arguments: Vec<TypeDescriptor>) -> Option<Self> {
        match self {
            Self::OpenGeneric { definition, arity } if *arity == arguments.len() => {
                Some(Self::closed_generic(*definition, arguments))
            }
            _ => None,
        }
    }

    /// The open definition this instantiation was closed from.
    pub fn open_definition(&self) -> Option<Self> {
        match self {
            Self::ClosedGeneric {
                definition,
                arguments,
            } => Some(Self::open_generic(*definition, arguments.len())),
            _ => None,
        }
    }

    /// The wrapped descriptor of a deferred accessor or factory.
    pub fn inner(&self) -> Option<&TypeDescriptor> {
        match self {
            Self::Deferred(inner) | Self::Factory(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_open_generic(&self) -> bool {
        matches!(self, Self::OpenGeneric { .. })
    }

    /// Generic arity; zero for non-generic descriptors.
    pub fn arity(&self) -> usize {
        match self {
            Self::OpenGeneric { arity, .. } => *arity,
            Self::ClosedGeneric { arguments, .. } => arguments.len(),
            _ => 0,
        }
    }

    /// Whether this descriptor has the "collection of T" shape.
    ///
    /// Exact for descriptors built with [`TypeDescriptor::sequence`]. For
    /// plain Rust types it is best effort: a [`TypeId`] carries no structure,
    /// so slices, `Vec` and `VecDeque` are recognised by their
    /// [`type_name`], whose format the standard library does not guarantee.
    /// The answer only selects which "not registered" error is reported.
    pub fn is_sequence(&self) -> bool {
        match self {
            Self::ClosedGeneric {
                definition,
                arguments,
            } => *definition == sequence_identity() && arguments.len() == 1,
            Self::Plain(identity) => {
                let name = identity.type_name();
                name.starts_with("alloc::vec::Vec<")
                    || name.starts_with("alloc::collections::vec_deque::VecDeque<")
                    || name.starts_with('[')
                    || name.starts_with("&[")
            }
            _ => false,
        }
    }

    /// Classifies the descriptor before resolution.
    ///
    /// # Errors
    /// [`QalibError::NonFactoryCallable`] for a callable shape that takes
    /// parameters or returns nothing.
    pub fn classify(&self) -> Result<Classification<'_>> {
        match self {
            Self::Deferred(inner) => Ok(Classification::DeferredAccessor(inner)),
            Self::Factory(inner) => Ok(Classification::ZeroArgFactory(inner)),
            Self::Callable(shape) => match shape.returns() {
                Some(returns) if shape.is_zero_arg_factory() => {
                    Ok(Classification::ZeroArgFactory(returns))
                }
                _ => Err(QalibError::NonFactoryCallable {
                    shape: self.clone(),
                }),
            },
            Self::ClosedGeneric {
                definition,
                arguments,
            } => Ok(Classification::GenericInstance {
                definition: *definition,
                arguments,
            }),
            Self::Plain(_) | Self::OpenGeneric { .. } => Ok(Classification::Plain(self)),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDescriptor({self})")
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(identity) => write!(f, "{identity}"),
            Self::OpenGeneric { definition, arity } => {
                let holes = vec!["_"; *arity];
                f.write_str(&render_generic(&definition.display_name(), &holes))
            }
            Self::ClosedGeneric {
                definition,
                arguments,
            } => {
                let args: Vec<String> = arguments.iter().map(ToString::to_string).collect();
                f.write_str(&render_generic(&definition.display_name(), &args))
            }
            Self::Deferred(inner) => write!(f, "Lazy<{inner}>"),
            Self::Factory(inner) => write!(f, "Factory<{inner}>"),
            Self::Callable(shape) => write!(f, "{shape}"),
        }
    }
}
