//! Life scopes: ownership boundaries for disposable instances.
//!
//! A [`LifeScope`] records every disposable instance constructed inside it
//! and disposes them, newest first, when the scope itself is disposed.
//!
//! ```text
//! Open ──dispose()──> Disposed
//!  │                     │
//!  track(..) ok          track(..) -> ObjectDisposed
//!                        dispose() -> no-op
//! ```
//!
//! Consumers are always constructed (and so tracked) after their
//! dependencies, which means reverse order never disposes a dependency
//! while something built on top of it is still alive.

use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::dispose::Dispose;
use crate::error::{BoxError, QalibError, Result};
use crate::settings::DisposalPolicy;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

struct Tracked {
    label: Cow<'static, str>,
    instance: Arc<dyn Dispose>,
}

#[derive(Default)]
struct ScopeState {
    disposed: bool,
    tracked: Vec<Tracked>,
}

struct ScopeInner {
    id: u64,
    policy: DisposalPolicy,
    state: Mutex<ScopeState>,
}

/// A cheap, cloneable handle to one ownership boundary.
///
/// Clones refer to the same scope.
///
/// # Examples
/// ```
/// use qalib_container::dispose::Dispose;
/// use qalib_container::error::BoxError;
/// use qalib_container::scope::LifeScope;
/// use std::sync::Arc;
///
/// struct Socket;
/// impl Dispose for Socket {
///     fn dispose(&self) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// let scope = LifeScope::new();
/// scope.track(Arc::new(Socket)).unwrap();
/// scope.dispose().unwrap();
/// assert!(scope.is_disposed());
/// assert!(scope.track(Arc::new(Socket)).is_err());
/// ```
#[derive(Clone)]
pub struct LifeScope {
    inner: Arc<ScopeInner>,
}

impl LifeScope {
    /// Creates an empty scope that stops disposing at the first failure.
    pub fn new() -> Self {
        Self::with_policy(DisposalPolicy::default())
    }

    /// Creates an empty scope with an explicit disposal policy.
    pub fn with_policy(policy: DisposalPolicy) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                policy,
                state: Mutex::new(ScopeState::default()),
            }),
        }
    }

    /// Process-unique id, used in log events and error messages.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn policy(&self) -> DisposalPolicy {
        self.inner.policy
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Number of instances (and child scopes) waiting for disposal.
    pub fn tracked_count(&self) -> usize {
        self.inner.state.lock().tracked.len()
    }

    /// Fails with [`QalibError::ObjectDisposed`] once the scope is disposed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(QalibError::disposed(self));
        }
        Ok(())
    }

    /// Hands `instance` to this scope for disposal.
    ///
    /// # Errors
    /// [`QalibError::ObjectDisposed`] if the scope is already disposed.
    pub fn track<D: Dispose>(&self, instance: Arc<D>) -> Result<()> {
        self.track_erased(Cow::Borrowed(type_name::<D>()), instance)
    }

    pub(crate) fn track_erased(
        &self,
        label: Cow<'static, str>,
        instance: Arc<dyn Dispose>,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(QalibError::disposed(self));
        }
        trace!(scope = self.inner.id, instance = %label, "Tracking disposable");
        state.tracked.push(Tracked { label, instance });
        Ok(())
    }

    /// Creates a nested scope that is disposed together with this one.
    ///
    /// The child inherits the disposal policy.
    pub fn create_child(&self) -> Result<LifeScope> {
        let child = LifeScope::with_policy(self.inner.policy);
        self.track_erased(Cow::Owned(child.to_string()), Arc::new(child.clone()))?;
        debug!(parent = self.inner.id, child = child.id(), "Created child scope");
        Ok(child)
    }

    /// Disposes every tracked instance in reverse order, each at most once.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    ///
    /// # Errors
    /// [`QalibError::DisposalFailed`] for the first instance that failed.
    /// Under [`DisposalPolicy::StopOnFirstError`] the remaining instances
    /// are released without a disposal attempt.
    pub fn dispose(&self) -> Result<()> {
        let tracked = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                trace!(scope = self.inner.id, "Scope already disposed");
                return Ok(());
            }
            state.disposed = true;
            std::mem::take(&mut state.tracked)
        };

        debug!(scope = self.inner.id, tracked = tracked.len(), "Disposing life scope");

        let mut seen = HashSet::with_capacity(tracked.len());
        let mut first_failure = None;

        for entry in tracked.into_iter().rev() {
            let address = Arc::as_ptr(&entry.instance) as *const () as usize;
            if !seen.insert(address) {
                continue;
            }
            if let Err(source) = entry.instance.dispose() {
                warn!(
                    scope = self.inner.id,
                    instance = %entry.label,
                    error = %source,
                    "Disposal failed"
                );
                let failure = QalibError::DisposalFailed {
                    instance: entry.label.into_owned(),
                    source,
                };
                match self.inner.policy {
                    DisposalPolicy::StopOnFirstError => return Err(failure),
                    DisposalPolicy::ContinueOnError => {
                        first_failure.get_or_insert(failure);
                    }
                }
            }
        }

        first_failure.map_or(Ok(()), Err)
    }
}

impl Default for LifeScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispose for LifeScope {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        LifeScope::dispose(self).map_err(Into::into)
    }
}

impl fmt::Display for LifeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "life scope #{}", self.inner.id)
    }
}

impl fmt::Debug for LifeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LifeScope")
            .field("id", &self.inner.id)
            .field("disposed", &state.disposed)
            .field("tracked", &state.tracked.len())
            .finish()
    }
}
