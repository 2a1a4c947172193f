//! Callback registration with drop-to-unregister handles.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A list of consumer callbacks for one event.
pub(crate) struct CallbackList<T> {
    entries: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T> Default for CallbackList<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T> CallbackList<T> {
    /// Register a callback; the returned handle unregisters it on drop.
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription
    where
        T: 'static,
        Self: Send + Sync,
    {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().push((id, Arc::new(callback)));

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription {
            unregister: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    list.entries.lock().unwrap().retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `value`.
    ///
    /// A panicking callback is logged and skipped; the remaining callbacks
    /// still run.
    pub(crate) fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!("event handler panicked");
            }
        }
    }

    /// Drop every registered callback.
    pub(crate) fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Handle for a registered event callback.
///
/// Dropping the handle unregisters the callback. The handle holds no
/// strong reference to the service.
pub struct Subscription {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Keep the callback registered for the rest of the service's life.
    pub fn forget(mut self) {
        self.unregister = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
