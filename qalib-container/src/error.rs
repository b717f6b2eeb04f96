//! Error types for Qalib container operations.
//!
//! Every failure names the descriptor or implementation it is about, and
//! dependency failures keep the error that caused them so a report reads
//! from the binding being registered down to the missing piece.

use std::fmt;

use qalib_support::rendering::{indent_continuation, render_chain};

use crate::key::TypeDescriptor;

/// Boxed error returned by user code (constructors, factories, disposers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all Qalib operations.
#[derive(Debug, thiserror::Error)]
pub enum QalibError {
    // ── Shape errors ──
    /// The implementation declares no constructor.
    #[error("{implementation} has no constructor\n  Hint: declare one with .constructor(..) in its type info")]
    NoConstructor { implementation: TypeDescriptor },

    /// The implementation declares more than one constructor.
    #[error("{implementation} declares {count} constructors; exactly one is supported")]
    AmbiguousConstructors {
        implementation: TypeDescriptor,
        count: usize,
    },

    /// The implementation is an abstract contract, not a constructible type.
    #[error("{implementation} is not a concrete type and cannot be constructed")]
    NonConcreteType { implementation: TypeDescriptor },

    /// A constructor parameter carries a modifier the container cannot honor.
    #[error(
        "Constructor parameter #{position} of {implementation} ({parameter}) is declared {modifier}; only plain parameters are supported"
    )]
    UnsupportedConstructorParameter {
        implementation: TypeDescriptor,
        position: usize,
        parameter: TypeDescriptor,
        modifier: &'static str,
    },

    /// A declared service contract is itself disposable.
    #[error(
        "{implementation} cannot be registered as {service}: the contract is disposable\n  Hint: keep Dispose on the implementation only; the container disposes what it creates"
    )]
    DisposableService {
        implementation: TypeDescriptor,
        service: TypeDescriptor,
    },

    /// A declared service is not among the implementation's supertypes.
    #[error(
        "{implementation} does not implement {service}\n  Hint: declare it with .implements::<{service}>(..)"
    )]
    ServiceNotImplemented {
        implementation: TypeDescriptor,
        service: TypeDescriptor,
    },

    /// A binding was submitted without any service type.
    #[error("{implementation} was registered without any service type")]
    NoServiceTypes { implementation: TypeDescriptor },

    // ── Dependency errors ──
    /// A dependency has no binding (yet).
    #[error("{}", .0)]
    NotRegisteredDependency(NotRegisteredError),

    /// A collection dependency has no binding; collections are never aggregated.
    #[error("{}", .0)]
    NotRegisteredSequenceDependency(NotRegisteredError),

    /// A callable contract that is not "no parameters, some return value".
    #[error("{shape} cannot be injected as a factory: factories take no parameters and return a value")]
    NonFactoryCallable { shape: TypeDescriptor },

    /// A constructor parameter of an implementation could not be bound.
    #[error("{}", .0)]
    DependencyRegistration(DependencyRegistrationError),

    // ── Generic-binding errors ──
    /// A generic binding names a service that is not an open definition.
    #[error("{service} is not an open generic definition")]
    ServiceTypeNotOpenGeneric { service: TypeDescriptor },

    /// A generic binding names an implementation that is not an open definition.
    #[error("{implementation} is not an open generic definition")]
    ImplementationTypeNotOpenGeneric { implementation: TypeDescriptor },

    /// The implementation does not implement the service for every argument.
    #[error(
        "{implementation} does not implement {service} generically\n  Hint: the implementation must declare the service with its own parameters, in order"
    )]
    ImplementationNotImplementingGenericService {
        implementation: TypeDescriptor,
        service: TypeDescriptor,
    },

    // ── Duplicate registration ──
    #[error("{}", .0)]
    AlreadyRegistered(AlreadyRegisteredError),

    // ── Resolution errors ──
    /// Requested service has no binding path at all.
    #[error("{}", .0)]
    NotRegisteredService(NotRegisteredError),

    /// A scope or container was used after disposal.
    #[error("Cannot use {object}: it has been disposed")]
    ObjectDisposed { object: String },

    /// A factory binding re-entered itself while resolving through its resolver.
    #[error("{}", .0)]
    CircularResolution(CircularDependencyError),

    /// A constructor or factory returned an error, or produced the wrong type.
    #[error("Failed to construct {key}: {source}")]
    ConstructionFailed {
        key: TypeDescriptor,
        #[source]
        source: BoxError,
    },

    /// A tracked instance failed to dispose.
    #[error("Failed to dispose {instance}: {source}")]
    DisposalFailed {
        instance: String,
        #[source]
        source: BoxError,
    },

    /// Registration attempted after the container was built.
    #[error("Container is already built. Register dependencies inside the build callback")]
    ContainerFrozen,
}

impl QalibError {
    /// The innermost error, looking through dependency wrappers.
    pub fn root_cause(&self) -> &QalibError {
        match self {
            QalibError::DependencyRegistration(err) => err.source.root_cause(),
            other => other,
        }
    }

    /// Implementations whose dependency analysis failed, outermost first,
    /// ending with the dependency that could not be bound.
    pub fn dependency_chain(&self) -> Vec<TypeDescriptor> {
        let mut chain = Vec::new();
        let mut current = self;
        while let QalibError::DependencyRegistration(err) = current {
            chain.push(err.implementation.clone());
            current = &*err.source;
            if !matches!(current, QalibError::DependencyRegistration(_)) {
                chain.push(err.dependency.clone());
            }
        }
        chain
    }

    pub(crate) fn construction(key: &TypeDescriptor, source: impl Into<BoxError>) -> Self {
        QalibError::ConstructionFailed {
            key: key.clone(),
            source: source.into(),
        }
    }

    pub(crate) fn disposed(object: impl fmt::Display) -> Self {
        QalibError::ObjectDisposed {
            object: object.to_string(),
        }
    }
}

/// Error when a descriptor has no binding.
#[derive(Debug)]
pub struct NotRegisteredError {
    /// The descriptor that was requested.
    pub requested: TypeDescriptor,
    /// Registered descriptors with similar names.
    pub suggestions: Vec<TypeDescriptor>,
}

impl NotRegisteredError {
    pub(crate) fn new(requested: TypeDescriptor) -> Self {
        Self {
            requested,
            suggestions: Vec::new(),
        }
    }
}

impl fmt::Display for NotRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Not registered: {}", self.requested)?;

        if self.requested.is_sequence() {
            write!(
                f,
                "\n  Hint: collections are never assembled from separate registrations; register {} explicitly",
                self.requested
            )?;
        } else {
            write!(
                f,
                "\n  Hint: a dependency must be registered before anything that depends on it"
            )?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }
        Ok(())
    }
}

/// Error wrapping a failed constructor parameter of `implementation`.
#[derive(Debug)]
pub struct DependencyRegistrationError {
    /// The implementation being registered.
    pub implementation: TypeDescriptor,
    /// The constructor parameter that failed.
    pub dependency: TypeDescriptor,
    /// Why it failed.
    pub source: Box<QalibError>,
}

impl fmt::Display for DependencyRegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dependency {} of {} is unsupported",
            self.dependency, self.implementation
        )?;
        let cause = indent_continuation(&self.source.to_string(), 1);
        write!(f, "\n  Caused by: {cause}")
    }
}

impl std::error::Error for DependencyRegistrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Error when factory bindings re-enter each other at resolution time.
///
/// Shows the full chain so you can see WHERE the cycle is.
#[derive(Debug)]
pub struct CircularDependencyError {
    /// Example: `[A, B, A]`
    pub chain: Vec<TypeDescriptor>,
}

impl fmt::Display for CircularDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.chain.iter().map(ToString::to_string).collect();
        write!(f, "Circular resolution detected:\n  {}", render_chain(&names))?;
        write!(
            f,
            "\n  Hint: inject a Lazy or Factory instead of resolving eagerly inside the factory"
        )
    }
}

/// Error when trying to register a descriptor that is already bound.
#[derive(Debug)]
pub struct AlreadyRegisteredError {
    pub key: TypeDescriptor,
}

impl fmt::Display for AlreadyRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Already registered: {}", self.key)?;
        write!(
            f,
            "\n  Hint: every service type can be bound at most once per container"
        )
    }
}

/// Convenient Result type for Qalib operations.
pub type Result<T> = std::result::Result<T, QalibError>;
