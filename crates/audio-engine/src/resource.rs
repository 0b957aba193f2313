//! Identity and contract shared by both playback strategies.

use std::sync::{Arc, RwLock};

use audio_engine_types::{AudioEvent, DeviceEventKind, PlaybackState, ResourceId};

use crate::channel::EventChannel;
use crate::error::Result;
use crate::events::EventBus;
use crate::source::SourceLocation;
use crate::state::{StateCell, StateHistory};

/// Id, source, state history, and event channel of one loaded resource.
pub struct ResourceCore {
    id: ResourceId,
    source: SourceLocation,
    path: String,
    state: Arc<StateCell>,
    channel: RwLock<Arc<EventChannel>>,
    bus: EventBus,
}

impl std::fmt::Debug for ResourceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCore")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state.snapshot())
            .finish()
    }
}

impl ResourceCore {
    pub fn new(source: SourceLocation, bus: EventBus) -> Self {
        let state = Arc::new(StateCell::new());
        let channel = Arc::new(EventChannel::new(state.clone()));
        Self {
            id: ResourceId::generate(),
            path: source.display_path(),
            source,
            state,
            channel: RwLock::new(channel),
            bus,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn source(&self) -> &SourceLocation {
        &self.source
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> &Arc<StateCell> {
        &self.state
    }

    /// The live event channel. Replaced (callbacks carried over) on a streaming reset.
    pub fn events(&self) -> Arc<EventChannel> {
        self.channel
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub(crate) fn transition(&self, next: PlaybackState) -> StateHistory {
        let history = self.state.transition(next);
        tracing::debug!(
            path = %self.path,
            previous = %history.previous,
            current = %history.current,
            "state transition"
        );
        history
    }

    /// Publish a raw device event carrying the history of the transition that caused it.
    pub(crate) fn publish(&self, kind: DeviceEventKind, history: StateHistory) {
        let event = AudioEvent::new(kind, self.id, Some(history));
        self.bus.publish(event);
    }

    /// Swap in a fresh channel bound to the same state, keeping every registered callback.
    pub(crate) fn replace_channel(&self) {
        let mut g = self.channel.write().unwrap_or_else(|err| err.into_inner());
        let fresh = Arc::new(g.transfer(self.state.clone()));
        *g = fresh;
    }

    pub(crate) fn warn_noop(&self, op: &'static str, reason: &str) {
        tracing::warn!(path = %self.path, op, reason, "ignored audio operation");
    }
}

/// Operations every loaded resource supports, whichever strategy backs it.
pub trait AudioResource: Send + Sync {
    fn core(&self) -> &Arc<ResourceCore>;

    fn id(&self) -> ResourceId {
        self.core().id()
    }

    fn path(&self) -> &str {
        self.core().path()
    }

    fn state(&self) -> PlaybackState {
        self.core().state().current()
    }

    fn previous_state(&self) -> PlaybackState {
        self.core().state().previous()
    }

    fn events(&self) -> Arc<EventChannel> {
        self.core().events()
    }

    /// `true` while the underlying device resource is open.
    fn is_open(&self) -> bool;

    /// Open the device resource and start playback. Warns and does nothing if already open.
    fn play(&self) -> Result<()>;

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);
}
