//! Provider trait — a module of related registrations.
//!
//! Providers group related bindings together so a container can be
//! assembled from independent parts.
//!
//! # Examples
//! ```rust,ignore
//! struct StorageProvider;
//!
//! impl Provider for StorageProvider {
//!     fn register(&self, registrar: &Registrar) -> Result<()> {
//!         registrar.register_implementation(pool_info(), [TypeDescriptor::of::<Pool>()], Lifestyle::Singleton)?;
//!         registrar.register_implementation(repo_info(), [TypeDescriptor::of::<dyn Repo>()], Lifestyle::Transient)
//!     }
//! }
//! ```

use crate::error::Result;
use crate::registrar::Registrar;

/// A module that registers related bindings into a container.
///
/// Providers run in the order they were added, so a provider may depend
/// on anything registered by the providers before it.
pub trait Provider: Send + Sync {
    /// Stage this module's registrations.
    ///
    /// Called once during container construction.
    fn register(&self, registrar: &Registrar) -> Result<()>;

    /// Optional: human-readable name for log events.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A provider made from a registration callback.
pub(crate) struct FnProvider<F>(pub(crate) F);

impl<F> Provider for FnProvider<F>
where
    F: Fn(&Registrar) -> Result<()> + Send + Sync,
{
    fn register(&self, registrar: &Registrar) -> Result<()> {
        (self.0)(registrar)
    }

    fn name(&self) -> &str {
        "callback"
    }
}
