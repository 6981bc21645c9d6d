//! Topic-keyed subscription registry.
//!
//! Both the push channel and the interview engine fan events out through a
//! [`Registry`]. Each topic holds an ordered set of callbacks: delivery
//! follows registration order, and registering the same callback twice on
//! a topic does not produce a second delivery.
//!
//! Dispatch copies the callback list out of the lock before invoking it, so
//! a callback may subscribe or unsubscribe (itself included) without
//! invalidating the iteration in progress. Newly added subscribers see the
//! next event, not the current one.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

/// Shared callback type stored in a [`Registry`].
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: u64,
    callback: Callback<E>,
    /// Live [`Subscription`] handles pointing at this entry.
    holders: usize,
}

struct Buckets<E> {
    next_id: u64,
    topics: HashMap<String, Vec<Entry<E>>>,
}

impl<E> Buckets<E> {
    fn release(&mut self, topic: &str, id: u64) {
        let Some(entries) = self.topics.get_mut(topic) else {
            return;
        };
        if let Some(pos) = entries.iter().position(|entry| entry.id == id) {
            entries[pos].holders -= 1;
            if entries[pos].holders == 0 {
                entries.remove(pos);
            }
        }
        if entries.is_empty() {
            self.topics.remove(topic);
            debug!(topic, "last subscriber released; topic bucket freed");
        }
    }
}

/// Ordered, topic-keyed callback registry.
///
/// Cloning a `Registry` yields another handle to the same buckets.
pub struct Registry<E> {
    inner: Arc<Mutex<Buckets<E>>>,
}

impl<E> Clone for Registry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Registry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Buckets {
                next_id: 0,
                topics: HashMap::new(),
            })),
        }
    }

    /// Register `callback` for `topic`.
    ///
    /// The returned handle releases the registration when dropped or when
    /// [`Subscription::unsubscribe`] is called. Registering a callback that
    /// is already present on the topic (same `Arc`) shares the existing
    /// entry; it stays registered until every handle is released.
    pub fn subscribe(&self, topic: impl Into<String>, callback: Callback<E>) -> Subscription {
        let topic = topic.into();
        let id = {
            let mut buckets = self.lock();
            let next_id = buckets.next_id;
            let entries = buckets.topics.entry(topic.clone()).or_default();
            let shared = entries
                .iter_mut()
                .find(|entry| Arc::ptr_eq(&entry.callback, &callback))
                .map(|entry| {
                    entry.holders += 1;
                    entry.id
                });
            if let Some(id) = shared {
                id
            } else {
                entries.push(Entry {
                    id: next_id,
                    callback,
                    holders: 1,
                });
                buckets.next_id += 1;
                next_id
            }
        };

        let weak: Weak<Mutex<Buckets<E>>> = Arc::downgrade(&self.inner);
        let release_topic = topic.clone();
        Subscription {
            topic,
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .release(&release_topic, id);
                }
            })),
        }
    }

    /// Deliver `event` to every callback registered on `topic`.
    ///
    /// Callbacks run in registration order with the registry unlocked. A
    /// panicking callback is logged and skipped; the remaining callbacks
    /// still run. Returns the number of callbacks that completed normally.
    pub fn dispatch(&self, topic: &str, event: &E) -> usize {
        let callbacks: Vec<Callback<E>> = {
            let buckets = self.lock();
            match buckets.topics.get(topic) {
                Some(entries) => entries.iter().map(|e| Arc::clone(&e.callback)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(topic, "subscriber panicked; continuing delivery"),
            }
        }
        delivered
    }

    /// Number of distinct callbacks registered on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Whether `topic` currently has a bucket.
    #[must_use]
    pub fn has_topic(&self, topic: &str) -> bool {
        self.lock().topics.contains_key(topic)
    }

    /// Number of topics with at least one subscriber.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }

    fn lock(&self) -> MutexGuard<'_, Buckets<E>> {
        // Callbacks never run under this lock, so poisoning cannot leave the
        // buckets half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Release handle for a registry subscription.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    topic: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Topic this subscription listens on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Release the subscription now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.release.is_some())
            .finish()
    }
}
