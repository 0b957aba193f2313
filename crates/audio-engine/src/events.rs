//! In-process event bus for device-level resource notifications.
//!
//! Resources publish [`AudioEvent`]s; the registry's [`EventRouter`] is the listener that
//! hands each event to the channel of the resource that produced it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use audio_engine_types::{AudioEvent, ResourceId};
use crossbeam_channel::{Receiver, Sender};

use crate::resource::ResourceCore;

/// Synchronous observer of bus events.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &AudioEvent);
}

#[derive(Default)]
struct BusInner {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    subscribers: Mutex<Vec<Sender<AudioEvent>>>,
}

/// Cloneable handle to a one-directional event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener invoked synchronously on every publish.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    /// Subscribe to a copy of every event published from now on.
    pub fn subscribe(&self) -> Receiver<AudioEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(tx);
        rx
    }

    /// Deliver `event` to every listener, then to every live subscriber.
    pub fn publish(&self, event: AudioEvent) {
        tracing::trace!(kind = %event.kind, id = %event.source, "audio event");
        let listeners: Vec<Arc<dyn EventListener>> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        for listener in listeners {
            listener.on_event(&event);
        }
        let mut subs = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Routes each event to the channel of the resource whose id matches the event source.
#[derive(Default)]
pub struct EventRouter {
    routes: RwLock<HashMap<ResourceId, Weak<ResourceCore>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, core: &Arc<ResourceCore>) {
        self.routes
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .insert(core.id(), Arc::downgrade(core));
    }

    pub fn remove(&self, id: &ResourceId) -> bool {
        self.routes
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.routes
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventListener for EventRouter {
    fn on_event(&self, event: &AudioEvent) {
        let target = self
            .routes
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(&event.source)
            .and_then(Weak::upgrade);
        let Some(core) = target else {
            return;
        };
        if let Err(err) = core.events().fire_event(event) {
            tracing::error!(
                path = %core.path(),
                id = %event.source,
                error = %err,
                "event dispatch fault"
            );
        }
    }
}
