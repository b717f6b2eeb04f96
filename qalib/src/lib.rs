//! # Qalib — Dependency Injection Container for Rust
//!
//! An order-checked IoC container: every registration is validated and
//! compiled the moment it is executed, dependencies must be registered
//! before their consumers, and every disposable the container builds is
//! tracked by a life scope and disposed newest first.
//!
//! ```rust
//! use qalib::prelude::*;
//!
//! struct Clock;
//!
//! let container = Container::new(|registrar| {
//!     registrar.register_implementation(
//!         TypeInfo::of::<Clock>().constructor([], |_| Ok(Clock)),
//!         [TypeDescriptor::of::<Clock>()],
//!         Lifestyle::Singleton,
//!     )
//! })?;
//!
//! let first = container.resolve::<Clock>()?;
//! let second = container.resolve::<Clock>()?;
//! assert!(std::sync::Arc::ptr_eq(first.value(), second.value()));
//! container.dispose()?;
//! # Ok::<(), QalibError>(())
//! ```

pub use qalib_container::*;
pub use qalib_support::*;
