// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, LazyLock, RwLock,
    },
};

use crate::modules::events::payload::{EventType, MailEvent};

pub mod payload;

pub static EVENT_BUS: LazyLock<EventBus> = LazyLock::new(EventBus::new);

pub type EventHandler = Arc<dyn Fn(MailEvent) + Send + Sync + 'static>;

/// Opaque subscription handle. Dropping it does nothing; pass it back to
/// `unsubscribe` to remove exactly the handler it was returned for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    /// `None` subscribes to every kind.
    filter: Option<EventType>,
    handler: EventHandler,
}

/// In-process typed publish/subscribe. Each delivery runs on its own tokio
/// task so `publish` never blocks on handlers. After `unsubscribe` returns,
/// the handler is not invoked for later publishes; deliveries already
/// spawned may still run.
pub struct EventBus {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_handle: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            subscribers: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn subscribe(
        &self,
        filter: Option<EventType>,
        handler: EventHandler,
    ) -> SubscriptionHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .insert(handle, Subscriber { filter, handler });
        SubscriptionHandle(handle)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .remove(&handle.0);
    }

    pub fn publish(&self, event: MailEvent) {
        let handlers: Vec<EventHandler> = {
            let subscribers = self.subscribers.read().expect("event bus lock poisoned");
            subscribers
                .values()
                .filter(|s| s.filter.is_none() || s.filter == Some(event.event_type))
                .map(|s| s.handler.clone())
                .collect()
        };
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                handler(event);
            });
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}
