//! Binding lifestyles.
//!
//! A lifestyle decides how often a binding's implementation is constructed:
//! - [`Lifestyle::Transient`] — a new instance for every resolution
//! - [`Lifestyle::Singleton`] — one instance for the lifetime of the container
//!
//! Open generic bindings carry no lifestyle; each closed instantiation is
//! transient unless the closed form is registered explicitly.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Defines how often a binding constructs its implementation.
///
/// # Examples
/// ```
/// use qalib_container::lifestyle::Lifestyle;
///
/// assert!(Lifestyle::Singleton.is_cached());
/// assert!(!Lifestyle::Transient.is_cached());
/// assert_eq!(Lifestyle::default(), Lifestyle::Transient);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifestyle {
    /// New instance created on every resolution.
    ///
    /// Disposable instances are tracked by the life scope of the resolve
    /// call that created them.
    ///
    /// # When to use
    /// - Lightweight stateless services
    /// - Objects with mutable state that shouldn't be shared
    #[default]
    Transient,

    /// One instance shared for the lifetime of the container.
    ///
    /// Constructed on first use inside its own private life scope, which
    /// the container disposes when it is disposed. A failed construction is
    /// not remembered; the next resolution tries again.
    ///
    /// # When to use
    /// - Connection pools
    /// - Configuration objects
    /// - Shared caches
    Singleton,
}

impl Lifestyle {
    /// Returns `true` if instances are memoized.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, Lifestyle::Singleton)
    }
}

impl fmt::Display for Lifestyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifestyle::Transient => write!(f, "Transient"),
            Lifestyle::Singleton => write!(f, "Singleton"),
        }
    }
}
