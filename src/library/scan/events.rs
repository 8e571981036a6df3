use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum IndexerEvent {
    SynchronizeStart,
    SynchronizeEnd,
    /// The set of registered roots was written to the catalog.
    PathsUpdated,
    /// A track that already existed in the catalog was re-indexed or analyzed.
    TrackRefreshed,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(IndexerEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    event: IndexerEvent,
    callback: Callback,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    list: Vec<Subscriber>,
}

/// Observer registry for indexer lifecycle events.
///
/// Callbacks run on the thread that emits, which for the indexer is its worker thread, in the
/// order they were registered. The registry lock is never held while a callback runs, so a
/// callback may subscribe or unsubscribe (itself included).
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.lock().list.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, event: IndexerEvent, callback: F) -> SubscriptionId
    where
        F: Fn(IndexerEvent) + Send + Sync + 'static,
    {
        let mut subscribers = self.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.list.push(Subscriber {
            id,
            event,
            callback: Arc::new(callback),
        });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.list.len();
        subscribers.list.retain(|s| s.id != id);
        subscribers.list.len() != before
    }

    pub fn emit(&self, event: IndexerEvent) {
        let targets: Vec<SubscriptionId> = self
            .lock()
            .list
            .iter()
            .filter(|s| s.event == event)
            .map(|s| s.id)
            .collect();

        for id in targets {
            // an earlier callback in this round may have removed this one
            let callback = self
                .lock()
                .list
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.callback.clone());

            if let Some(callback) = callback {
                callback(event);
            }
        }
    }
}
