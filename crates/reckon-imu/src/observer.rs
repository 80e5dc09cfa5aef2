use crate::types::StateSnapshot;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Callback receiving state snapshots.
pub type Observer = Arc<dyn Fn(&StateSnapshot) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(ObserverId, Observer)>,
}

/// Ordered list of snapshot observers.
///
/// Observers are called in registration order, outside the registry lock, so
/// an observer may register, unregister or call back into the estimator.
/// A panicking observer is logged and skipped; later observers still run.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Registry>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Observer) -> ObserverId {
        let mut inner = self.inner.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.observers.push((id, observer));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(oid, _)| *oid != id);
        inner.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, snapshot: &StateSnapshot) {
        let observers: Vec<(ObserverId, Observer)> = self.inner.lock().observers.clone();
        for (id, observer) in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(snapshot))).is_err() {
                tracing::error!(?id, "Observer panicked while handling snapshot");
            }
        }
    }
}
