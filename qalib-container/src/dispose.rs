//! The disposable-resource contract.

use crate::error::BoxError;
use crate::key::TypeDescriptor;

/// Structured teardown for resources the container creates.
///
/// Implementations flagged `.disposable()` in their type info are tracked
/// by the life scope they were constructed in and disposed, newest first,
/// when that scope is disposed. Each instance is disposed at most once.
///
/// `Dispose` belongs on implementations, never on service contracts:
/// registering a binding under `dyn Dispose`, or under a contract declared
/// with `implements_disposable`, is rejected.
///
/// # Examples
/// ```
/// use qalib_container::dispose::Dispose;
/// use qalib_container::error::BoxError;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Connection {
///     closed: AtomicBool,
/// }
///
/// impl Dispose for Connection {
///     fn dispose(&self) -> Result<(), BoxError> {
///         self.closed.store(true, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
pub trait Dispose: Send + Sync + 'static {
    /// Release the resources held by this instance.
    fn dispose(&self) -> Result<(), BoxError>;
}

/// Descriptor of the `Dispose` contract itself.
pub fn dispose_contract() -> TypeDescriptor {
    TypeDescriptor::of::<dyn Dispose>()
}
