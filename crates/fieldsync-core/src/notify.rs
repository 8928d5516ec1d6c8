//! Callback subscriber lists
//!
//! Shared by the connectivity monitor and the orchestrator's status feed.
//! Callbacks run outside the list lock, and a panicking callback is caught
//! and logged so the remaining subscribers are still notified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SubscriberList<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// A list of callbacks notified with values of type `T`
pub struct Subscribers<T> {
    list: Arc<Mutex<SubscriberList<T>>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            list: Arc::new(Mutex::new(SubscriberList {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Register a callback and immediately deliver `current` to it
    pub fn subscribe<F>(&self, current: &T, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let id = {
            let mut list = self.list.lock();
            let id = list.next_id;
            list.next_id += 1;
            list.callbacks.push((id, callback.clone()));
            id
        };

        invoke(&callback, current);

        let weak: Weak<Mutex<SubscriberList<T>>> = Arc::downgrade(&self.list);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    list.lock().callbacks.retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Deliver `value` to every registered callback
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .list
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in &callbacks {
            invoke(callback, value);
        }
    }

    /// Drop every registered callback
    pub fn clear(&self) {
        self.list.lock().callbacks.clear();
    }

    pub fn len(&self) -> usize {
        self.list.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn invoke<T>(callback: &Callback<T>, value: &T) {
    if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
        warn!("Subscriber callback panicked; continuing with remaining subscribers");
    }
}

/// Handle returned by `subscribe`; call `unsubscribe` to stop notifications
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to remove it"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_delivers_current_value() {
        let subscribers = Subscribers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _sub = subscribers.subscribe(&7, move |v: &i32| sink.lock().push(*v));
        subscribers.notify(&8);

        assert_eq!(*seen.lock(), vec![7, 8]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let subscribers = Subscribers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let sub = subscribers.subscribe(&(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        subscribers.notify(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_panicking_callback_does_not_block_others() {
        let subscribers = Subscribers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _bad = subscribers.subscribe(&0, |v: &i32| {
            if *v > 0 {
                panic!("subscriber failure");
            }
        });
        let counter = count.clone();
        let _good = subscribers.subscribe(&0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscribers.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear() {
        let subscribers = Subscribers::new();
        let _a = subscribers.subscribe(&(), |_| {});
        let _b = subscribers.subscribe(&(), |_| {});
        assert_eq!(subscribers.len(), 2);

        subscribers.clear();
        assert!(subscribers.is_empty());
    }
}
