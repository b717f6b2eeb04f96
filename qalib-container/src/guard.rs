//! Per-thread re-entrancy tracking for resolution.
//!
//! Factory bindings resolve through a live [`Resolver`](crate::resolver::Resolver),
//! so nothing at registration time stops a factory from asking for its own
//! service. The guard catches that at run time and reports the chain
//! instead of recursing forever (or deadlocking on a singleton cell).

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CircularDependencyError, QalibError, Result};
use crate::key::TypeDescriptor;

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE: RefCell<Vec<BindingKey>> = const { RefCell::new(Vec::new()) };
}

/// Identifies one binding for the lifetime of the process.
#[derive(Debug, Clone)]
pub(crate) struct BindingKey {
    id: u64,
    implementation: TypeDescriptor,
}

impl BindingKey {
    pub(crate) fn new(implementation: TypeDescriptor) -> Self {
        Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            implementation,
        }
    }

    pub(crate) fn implementation(&self) -> &TypeDescriptor {
        &self.implementation
    }
}

/// Fails if `key` is already being activated on this thread.
pub(crate) fn ensure_not_active(key: &BindingKey) -> Result<()> {
    ACTIVE.with(|active| {
        let active = active.borrow();
        match active.iter().position(|entry| entry.id == key.id) {
            Some(start) => {
                let mut chain: Vec<TypeDescriptor> = active[start..]
                    .iter()
                    .map(|entry| entry.implementation.clone())
                    .collect();
                chain.push(key.implementation.clone());
                Err(QalibError::CircularResolution(CircularDependencyError { chain }))
            }
            None => Ok(()),
        }
    })
}

/// Marks a binding as being activated until dropped.
#[must_use]
pub(crate) struct ResolutionGuard {
    id: u64,
}

impl ResolutionGuard {
    pub(crate) fn enter(key: &BindingKey) -> Result<Self> {
        ensure_not_active(key)?;
        ACTIVE.with(|active| active.borrow_mut().push(key.clone()));
        Ok(Self { id: key.id })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(index) = active.iter().rposition(|entry| entry.id == self.id) {
                active.remove(index);
            }
        });
    }
}
