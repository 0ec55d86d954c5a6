//! Entry events published by `DistributedMap`.
//!
//! Listeners register a predicate; an event is pushed onto a listener's channel
//! only when the predicate accepts it. Each event is an already-decoded snapshot
//! of the key and value.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent<K, V> {
    Inserted { key: K, value: V },
    Updated { key: K, value: V },
    /// Carries the value as it was before removal.
    Removed { key: K, value: V },
}

impl<K, V> MapEvent<K, V> {
    pub fn key(&self) -> &K {
        match self {
            MapEvent::Inserted { key, .. }
            | MapEvent::Updated { key, .. }
            | MapEvent::Removed { key, .. } => key,
        }
    }

    pub fn value(&self) -> &V {
        match self {
            MapEvent::Inserted { value, .. }
            | MapEvent::Updated { value, .. }
            | MapEvent::Removed { value, .. } => value,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, MapEvent::Removed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type EventFilter<K, V> = Arc<dyn Fn(&MapEvent<K, V>) -> bool + Send + Sync>;

struct Listener<K, V> {
    filter: EventFilter<K, V>,
    sender: mpsc::UnboundedSender<MapEvent<K, V>>,
}

pub struct EventListeners<K, V> {
    listeners: DashMap<ListenerId, Listener<K, V>>,
    next_id: AtomicU64,
}

impl<K: Clone, V: Clone> EventListeners<K, V> {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, filter: F) -> (ListenerId, mpsc::UnboundedReceiver<MapEvent<K, V>>)
    where
        F: Fn(&MapEvent<K, V>) -> bool + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners.insert(
            id,
            Listener {
                filter: Arc::new(filter),
                sender,
            },
        );
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn publish(&self, event: MapEvent<K, V>) {
        let mut closed = Vec::new();

        for entry in self.listeners.iter() {
            let listener = entry.value();
            if !(listener.filter)(&event) {
                continue;
            }
            if listener.sender.send(event.clone()).is_err() {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.listeners.remove(&id);
        }
    }
}

impl<K: Clone, V: Clone> Default for EventListeners<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
