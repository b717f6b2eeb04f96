//! Core container implementation for Qalib.
//!
//! Registrations are staged through a [`Registrar`], executed in order when
//! the [`Container`] is built, and compiled into factories that the frozen
//! container runs on every resolution.

pub mod accessor;
pub(crate) mod analyzer;
pub mod compiler;
pub mod container;
pub mod dispose;
pub mod error;
pub(crate) mod guard;
pub mod key;
pub(crate) mod lifecycle;
pub mod lifestyle;
pub mod metadata;
pub mod provider;
pub mod registrar;
pub mod registry;
pub mod resolver;
pub mod scope;
pub mod settings;

#[cfg(test)]
mod testing;

pub use accessor::{Factory, Lazy};
pub use compiler::{Instance, ServiceValue};
pub use container::{Container, ContainerBuilder, Resolved, prelude};
pub use dispose::Dispose;
pub use error::{BoxError, QalibError, Result};
pub use key::{Classification, TypeDescriptor, TypeIdentity};
pub use lifestyle::Lifestyle;
pub use metadata::{GenericTypeInfo, ImplementationInfo, Injectable, Param, ParamModifier, TypeArg, TypeInfo};
pub use provider::Provider;
pub use registrar::Registrar;
pub use registry::FactoryFn;
pub use resolver::Resolver;
pub use scope::LifeScope;
pub use settings::{ContainerSettings, DisposalPolicy};
