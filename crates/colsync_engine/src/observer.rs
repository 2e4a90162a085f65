//! Notification of sync events.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Something a synchronizer reports to the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncEvent {
    /// Remote login changes were written to local storage.
    RemoteLoginChangesWereApplied,
}

/// Receives sync events.
pub trait SyncObserver: Send + Sync {
    /// Handles an event.
    fn on_sync_event(&self, event: &SyncEvent);
}

/// A list of weakly held observers.
///
/// Observers are not kept alive by the list; dropped ones are pruned on the
/// next notification. Delivery runs without holding the list lock, so an
/// observer may register or unregister from inside its callback.
#[derive(Default)]
pub struct SyncObservers {
    observers: RwLock<Vec<Weak<dyn SyncObserver>>>,
}

impl SyncObservers {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    pub fn register(&self, observer: &Arc<dyn SyncObserver>) {
        self.observers.write().push(Arc::downgrade(observer));
    }

    /// Removes an observer.
    pub fn unregister(&self, observer: &Arc<dyn SyncObserver>) {
        let target = Arc::as_ptr(observer) as *const ();
        self.observers
            .write()
            .retain(|weak| weak.as_ptr() as *const () != target);
    }

    /// Returns the number of observers still alive.
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Returns true if no live observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers an event to every live observer.
    pub fn notify(&self, event: &SyncEvent) {
        let live: Vec<Arc<dyn SyncObserver>> = {
            let mut observers = self.observers.write();
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in live {
            observer.on_sync_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl SyncObserver for Counter {
        fn on_sync_event(&self, _event: &SyncEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SelfRemoving {
        list: Arc<SyncObservers>,
        me: RwLock<Option<Weak<dyn SyncObserver>>>,
    }

    impl SyncObserver for SelfRemoving {
        fn on_sync_event(&self, _event: &SyncEvent) {
            if let Some(me) = self.me.read().as_ref().and_then(Weak::upgrade) {
                self.list.unregister(&me);
            }
        }
    }

    #[test]
    fn notifies_live_observers() {
        let observers = SyncObservers::new();
        let counter = Arc::new(Counter::default());
        let as_observer: Arc<dyn SyncObserver> = counter.clone();
        observers.register(&as_observer);

        observers.notify(&SyncEvent::RemoteLoginChangesWereApplied);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        observers.unregister(&as_observer);
        observers.notify(&SyncEvent::RemoteLoginChangesWereApplied);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let observers = SyncObservers::new();
        {
            let temporary: Arc<dyn SyncObserver> = Arc::new(Counter::default());
            observers.register(&temporary);
            assert_eq!(observers.len(), 1);
        }
        assert!(observers.is_empty());
        observers.notify(&SyncEvent::RemoteLoginChangesWereApplied);
    }

    #[test]
    fn observer_may_unregister_itself() {
        let list = Arc::new(SyncObservers::new());
        let observer = Arc::new(SelfRemoving {
            list: list.clone(),
            me: RwLock::new(None),
        });
        let as_observer: Arc<dyn SyncObserver> = observer.clone();
        *observer.me.write() = Some(Arc::downgrade(&as_observer));
        list.register(&as_observer);

        list.notify(&SyncEvent::RemoteLoginChangesWereApplied);
        assert!(list.is_empty());
    }
}
