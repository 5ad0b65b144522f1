//! Handler capability shared by every event kind.
//!
//! A handler accepts envelopes of exactly one kind. Decorators (namespace
//! adapters, inclusion filters, propagation gates) are handlers too, and
//! each of them answers [`EventHandler::is_wrapping`] so that a handler can
//! be removed by the identity it was registered with, no matter how many
//! layers were stacked on top of it during registration.

use std::fmt;
use std::sync::Arc;

/// Shared, type-erased reference to a handler of events of type `E`.
pub type HandlerRef<E> = Arc<dyn EventHandler<E>>;

/// Accepts events of one kind.
///
/// Handlers have no return channel: a processing failure inside a handler is
/// the handler's own business and is never reported back to the dispatcher.
pub trait EventHandler<E>: Send + Sync {
    /// Processes a single event.
    fn accept(&self, event: &E);

    /// Returns `true` if this handler decorates `handler`, directly or
    /// through a chain of further decorators.
    ///
    /// Plain handlers wrap nothing. Every decorator must override this.
    fn is_wrapping(&self, _handler: &HandlerRef<E>) -> bool {
        false
    }
}

/// Returns `true` if both references point at the same handler allocation.
///
/// Only the data pointer is compared; vtable pointers for the same concrete
/// type may legitimately differ between codegen units.
pub fn same_handler<E>(a: &HandlerRef<E>, b: &HandlerRef<E>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Returns `true` if `candidate` is `target` or wraps it.
///
/// This is the removal predicate used by every handler registry.
pub fn matches_handler<E>(candidate: &HandlerRef<E>, target: &HandlerRef<E>) -> bool {
    same_handler(candidate, target) || candidate.is_wrapping(target)
}

/// Adapts a closure into an [`EventHandler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<E, F> EventHandler<E> for HandlerFn<F>
where
    F: Fn(&E) + Send + Sync,
{
    fn accept(&self, event: &E) {
        (self.f)(event)
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}
