//! Applies a binding's lifestyle to its activator.
//!
//! Every activator is wrapped so that re-entering its binding on the same
//! thread fails with [`QalibError::CircularResolution`](crate::error::QalibError::CircularResolution)
//! instead of recursing. A singleton activator is additionally wrapped so
//! that the first successful call constructs the instance inside a private
//! child of the container's root scope; every later call, from any scope,
//! returns that same instance.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::compiler::{Activator, Instance};
use crate::error::Result;
use crate::guard::{BindingKey, ResolutionGuard};
use crate::lifestyle::Lifestyle;
use crate::scope::LifeScope;

pub(crate) fn apply_lifestyle(
    lifestyle: Lifestyle,
    binding: &BindingKey,
    root: &LifeScope,
    activator: Activator,
) -> Result<Activator> {
    match lifestyle {
        Lifestyle::Transient => Ok(make_transient(binding.clone(), activator)),
        Lifestyle::Singleton => make_singleton(binding.clone(), root, activator),
    }
}

fn make_transient(binding: BindingKey, activator: Activator) -> Activator {
    Arc::new(move |scope: &LifeScope| {
        let _guard = ResolutionGuard::enter(&binding)?;
        activator(scope)
    })
}

fn make_singleton(binding: BindingKey, root: &LifeScope, activator: Activator) -> Result<Activator> {
    let private = root.create_child()?;
    let cell: OnceCell<Instance> = OnceCell::new();

    Ok(Arc::new(move |_caller: &LifeScope| {
        private.ensure_open()?;
        if let Some(instance) = cell.get() {
            return Ok(instance.clone());
        }

        // Re-entering a cell that is being initialized on this thread
        // would block forever.
        let _guard = ResolutionGuard::enter(&binding)?;

        let instance = cell.get_or_try_init(|| {
            debug!(implementation = %binding.implementation(), scope = private.id(), "Creating singleton");
            activator(&private)
        })?;
        Ok(instance.clone())
    }))
}
