//! Type-erased context slots attached to nodes, links and deliveries.
//!
//! Handlers store their private state in a [`ContextSlot`] as an
//! `Arc<dyn Any + Send + Sync>`, and read it back through typed accessors so
//! the container never needs to know the concrete type.

use std::{
    any::Any,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

/// Opaque handler context shared across threads.
pub type Context = Arc<dyn Any + Send + Sync>;

/// Wrap `value` as a [`Context`].
///
/// # Examples
///
/// ```
/// use amqp_container::context::{ContextSlot, context};
///
/// let slot = ContextSlot::new(Some(context(7u32)));
/// assert_eq!(slot.get_as::<u32>().as_deref(), Some(&7));
/// ```
pub fn context<T>(value: T) -> Context
where
    T: Send + Sync + 'static,
{
    Arc::new(value)
}

/// Replaceable context value.
#[derive(Default)]
pub struct ContextSlot(RwLock<Option<Context>>);

impl ContextSlot {
    /// Create a slot holding `initial`.
    #[must_use]
    pub fn new(initial: Option<Context>) -> Self { Self(RwLock::new(initial)) }

    /// Replace the stored context.
    pub fn set(&self, value: Option<Context>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Return the stored context, if any.
    #[must_use]
    pub fn get(&self) -> Option<Context> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Return the stored context downcast to `T`.
    ///
    /// Returns `None` when the slot is empty or holds a different type.
    #[must_use]
    pub fn get_as<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.get().and_then(|ctx| ctx.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for ContextSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContextSlot")
            .field(&self.get().map(|_| "..."))
            .finish()
    }
}

/// Lock `mutex`, recovering the data if a handler panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
