//! Per-resource callback registry.
//!
//! The raw device only reports "sound started" / "sound stopped". The channel turns a raw
//! [`DeviceEventKind`] plus the owning resource's state history into the richer set of
//! callbacks:
//!
//! | raw     | history                | callbacks (in order) |
//! |---------|------------------------|----------------------|
//! | `Open`  | any                    | open                 |
//! | `Close` | any                    | close                |
//! | `Start` | previous `Paused`      | resume, start        |
//! | `Start` | previous `Stopped`     | start                |
//! | `Stop`  | current `Paused`       | pause, stop          |
//! | `Stop`  | current `Stopped`      | stop                 |
//!
//! Every other combination is an [`EngineError::InvalidState`] fault.

use std::fmt;
use std::sync::{Arc, Mutex};

use audio_engine_types::{AudioEvent, DeviceEventKind, PlaybackState};

use crate::error::{EngineError, Result};
use crate::state::{StateCell, StateHistory};

/// Single-argument callback invoked with the event that triggered it.
pub type Callback = Arc<dyn Fn(&AudioEvent) + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&AudioEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One of the six callback slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hook {
    Open,
    Close,
    Start,
    Stop,
    Pause,
    Resume,
}

/// Resolve which hooks a raw event fires, in firing order.
pub fn dispatch_hooks(kind: DeviceEventKind, history: StateHistory) -> Result<&'static [Hook]> {
    match kind {
        DeviceEventKind::Open => Ok(&[Hook::Open]),
        DeviceEventKind::Close => Ok(&[Hook::Close]),
        DeviceEventKind::Start => match history.previous {
            PlaybackState::Paused => Ok(&[Hook::Resume, Hook::Start]),
            PlaybackState::Stopped => Ok(&[Hook::Start]),
            PlaybackState::Playing => Err(invalid(kind, history)),
        },
        DeviceEventKind::Stop => match history.current {
            PlaybackState::Paused => Ok(&[Hook::Pause, Hook::Stop]),
            PlaybackState::Stopped => Ok(&[Hook::Stop]),
            PlaybackState::Playing => Err(invalid(kind, history)),
        },
    }
}

fn invalid(kind: DeviceEventKind, history: StateHistory) -> EngineError {
    EngineError::InvalidState {
        kind,
        previous: history.previous,
        current: history.current,
    }
}

#[derive(Clone, Default)]
struct Hooks {
    open: Option<Callback>,
    close: Option<Callback>,
    start: Option<Callback>,
    stop: Option<Callback>,
    pause: Option<Callback>,
    resume: Option<Callback>,
}

impl Hooks {
    fn slot(&mut self, hook: Hook) -> &mut Option<Callback> {
        match hook {
            Hook::Open => &mut self.open,
            Hook::Close => &mut self.close,
            Hook::Start => &mut self.start,
            Hook::Stop => &mut self.stop,
            Hook::Pause => &mut self.pause,
            Hook::Resume => &mut self.resume,
        }
    }

    fn get(&self, hook: Hook) -> Option<Callback> {
        match hook {
            Hook::Open => self.open.clone(),
            Hook::Close => self.close.clone(),
            Hook::Start => self.start.clone(),
            Hook::Stop => self.stop.clone(),
            Hook::Pause => self.pause.clone(),
            Hook::Resume => self.resume.clone(),
        }
    }
}

/// Callback registry bound to one resource's state history.
pub struct EventChannel {
    state: Arc<StateCell>,
    hooks: Mutex<Hooks>,
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.lock().unwrap_or_else(|err| err.into_inner());
        f.debug_struct("EventChannel")
            .field("state", &self.state.snapshot())
            .field("open", &hooks.open.is_some())
            .field("close", &hooks.close.is_some())
            .field("start", &hooks.start.is_some())
            .field("stop", &hooks.stop.is_some())
            .field("pause", &hooks.pause.is_some())
            .field("resume", &hooks.resume.is_some())
            .finish()
    }
}

impl EventChannel {
    pub fn new(state: Arc<StateCell>) -> Self {
        Self {
            state,
            hooks: Mutex::new(Hooks::default()),
        }
    }

    /// Fresh channel bound to `state` carrying every callback registered on `self`.
    pub fn transfer(&self, state: Arc<StateCell>) -> Self {
        let hooks = self
            .hooks
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        Self {
            state,
            hooks: Mutex::new(hooks),
        }
    }

    /// Install (`Some`) or clear (`None`) the callback for `hook`.
    pub fn set(&self, hook: Hook, callback: Option<Callback>) {
        let mut g = self.hooks.lock().unwrap_or_else(|err| err.into_inner());
        *g.slot(hook) = callback;
    }

    pub fn get(&self, hook: Hook) -> Option<Callback> {
        self.hooks
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(hook)
    }

    pub fn set_on_open(&self, callback: Option<Callback>) {
        self.set(Hook::Open, callback);
    }

    pub fn on_open(&self) -> Option<Callback> {
        self.get(Hook::Open)
    }

    pub fn set_on_close(&self, callback: Option<Callback>) {
        self.set(Hook::Close, callback);
    }

    pub fn on_close(&self) -> Option<Callback> {
        self.get(Hook::Close)
    }

    pub fn set_on_start(&self, callback: Option<Callback>) {
        self.set(Hook::Start, callback);
    }

    pub fn on_start(&self) -> Option<Callback> {
        self.get(Hook::Start)
    }

    pub fn set_on_stop(&self, callback: Option<Callback>) {
        self.set(Hook::Stop, callback);
    }

    pub fn on_stop(&self) -> Option<Callback> {
        self.get(Hook::Stop)
    }

    pub fn set_on_pause(&self, callback: Option<Callback>) {
        self.set(Hook::Pause, callback);
    }

    pub fn on_pause(&self) -> Option<Callback> {
        self.get(Hook::Pause)
    }

    pub fn set_on_resume(&self, callback: Option<Callback>) {
        self.set(Hook::Resume, callback);
    }

    pub fn on_resume(&self) -> Option<Callback> {
        self.get(Hook::Resume)
    }

    /// Invoke the callbacks a raw device event maps to.
    ///
    /// Dispatch uses the history the event captured at its transition, so later transitions
    /// (including ones made by callbacks) cannot change its fan-out. Events without a history
    /// fall back to the live state. Callbacks run outside the internal lock so they may
    /// re-register hooks or call back into the resource.
    pub fn fire_event(&self, event: &AudioEvent) -> Result<()> {
        let history = event.history.unwrap_or_else(|| self.state.snapshot());
        let hooks = dispatch_hooks(event.kind, history)?;
        let callbacks: Vec<Callback> = {
            let g = self.hooks.lock().unwrap_or_else(|err| err.into_inner());
            hooks.iter().filter_map(|h| g.get(*h)).collect()
        };
        for cb in callbacks {
            cb(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_engine_types::ResourceId;

    fn history(previous: PlaybackState, current: PlaybackState) -> StateHistory {
        StateHistory { current, previous }
    }

    fn recording_channel(state: Arc<StateCell>) -> (EventChannel, Arc<Mutex<Vec<Hook>>>) {
        let channel = EventChannel::new(state);
        let log = Arc::new(Mutex::new(Vec::new()));
        for hook in [
            Hook::Open,
            Hook::Close,
            Hook::Start,
            Hook::Stop,
            Hook::Pause,
            Hook::Resume,
        ] {
            let log = log.clone();
            channel.set(hook, Some(callback(move |_| log.lock().unwrap().push(hook))));
        }
        (channel, log)
    }

    #[test]
    fn start_after_pause_fires_resume_then_start() {
        let hooks = dispatch_hooks(
            DeviceEventKind::Start,
            history(PlaybackState::Paused, PlaybackState::Playing),
        )
        .unwrap();
        assert_eq!(hooks, &[Hook::Resume, Hook::Start]);
    }

    #[test]
    fn start_after_stop_fires_start_only() {
        let hooks = dispatch_hooks(
            DeviceEventKind::Start,
            history(PlaybackState::Stopped, PlaybackState::Playing),
        )
        .unwrap();
        assert_eq!(hooks, &[Hook::Start]);
    }

    #[test]
    fn stop_while_paused_fires_pause_then_stop() {
        let hooks = dispatch_hooks(
            DeviceEventKind::Stop,
            history(PlaybackState::Playing, PlaybackState::Paused),
        )
        .unwrap();
        assert_eq!(hooks, &[Hook::Pause, Hook::Stop]);
    }

    #[test]
    fn stop_while_stopped_fires_stop_only() {
        let hooks = dispatch_hooks(
            DeviceEventKind::Stop,
            history(PlaybackState::Paused, PlaybackState::Stopped),
        )
        .unwrap();
        assert_eq!(hooks, &[Hook::Stop]);
    }

    #[test]
    fn impossible_histories_are_faults() {
        let start = dispatch_hooks(
            DeviceEventKind::Start,
            history(PlaybackState::Playing, PlaybackState::Playing),
        );
        assert!(matches!(start, Err(EngineError::InvalidState { .. })));
        let stop = dispatch_hooks(
            DeviceEventKind::Stop,
            history(PlaybackState::Stopped, PlaybackState::Playing),
        );
        assert!(matches!(stop, Err(EngineError::InvalidState { .. })));
    }

    #[test]
    fn open_and_close_ignore_history() {
        for h in [
            history(PlaybackState::Playing, PlaybackState::Playing),
            history(PlaybackState::Stopped, PlaybackState::Paused),
        ] {
            assert_eq!(dispatch_hooks(DeviceEventKind::Open, h).unwrap(), &[Hook::Open]);
            assert_eq!(dispatch_hooks(DeviceEventKind::Close, h).unwrap(), &[Hook::Close]);
        }
    }

    #[test]
    fn captured_history_wins_over_live_state() {
        let state = Arc::new(StateCell::new());
        let (channel, log) = recording_channel(state.clone());
        let id = ResourceId::generate();

        let started = state.transition(PlaybackState::Playing);
        state.transition(PlaybackState::Paused);
        channel
            .fire_event(&AudioEvent::new(DeviceEventKind::Start, id, Some(started)))
            .unwrap();
        let paused = history(PlaybackState::Playing, PlaybackState::Paused);
        state.transition(PlaybackState::Stopped);
        channel
            .fire_event(&AudioEvent::new(DeviceEventKind::Stop, id, Some(paused)))
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Hook::Start, Hook::Pause, Hook::Stop]
        );
    }

    #[test]
    fn fire_event_without_history_reads_live_state() {
        let state = Arc::new(StateCell::new());
        let (channel, log) = recording_channel(state.clone());
        let id = ResourceId::generate();

        state.transition(PlaybackState::Playing);
        state.transition(PlaybackState::Paused);
        channel
            .fire_event(&AudioEvent::new(DeviceEventKind::Stop, id, None))
            .unwrap();
        state.transition(PlaybackState::Playing);
        channel
            .fire_event(&AudioEvent::new(DeviceEventKind::Start, id, None))
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Hook::Pause, Hook::Stop, Hook::Resume, Hook::Start]
        );
    }

    #[test]
    fn missing_callbacks_are_skipped() {
        let state = Arc::new(StateCell::new());
        let channel = EventChannel::new(state);
        let id = ResourceId::generate();
        assert!(
            channel
                .fire_event(&AudioEvent::new(DeviceEventKind::Open, id, None))
                .is_ok()
        );
    }

    #[test]
    fn clearing_a_callback_stops_delivery() {
        let state = Arc::new(StateCell::new());
        let (channel, log) = recording_channel(state);
        channel.set_on_open(None);
        assert!(channel.on_open().is_none());
        channel
            .fire_event(&AudioEvent::new(
                DeviceEventKind::Open,
                ResourceId::generate(),
                None,
            ))
            .unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn transfer_keeps_callbacks_and_binds_new_state() {
        let old_state = Arc::new(StateCell::new());
        let (channel, log) = recording_channel(old_state.clone());
        let new_state = Arc::new(StateCell::new());
        let moved = channel.transfer(new_state.clone());

        old_state.transition(PlaybackState::Playing);
        // New channel reads the new state (Stopped/Stopped), so a raw Stop is a plain stop.
        moved
            .fire_event(&AudioEvent::new(
                DeviceEventKind::Stop,
                ResourceId::generate(),
                None,
            ))
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec![Hook::Stop]);
        assert!(moved.on_resume().is_some());
    }
}
