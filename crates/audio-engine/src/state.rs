//! Playback state history shared between a resource, its event channel, and its copy task.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub use audio_engine_types::{PlaybackState, StateHistory};

/// Mutex-protected [`StateHistory`] with a condvar signalled on every transition.
///
/// The condvar lets a paused copy task sleep until the state changes instead of spinning.
#[derive(Debug, Default)]
pub struct StateCell {
    inner: Mutex<StateHistory>,
    changed: Condvar,
}

impl StateCell {
    /// New cell in `Stopped` with `Stopped` history.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StateHistory {
        *self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn current(&self) -> PlaybackState {
        self.snapshot().current
    }

    pub fn previous(&self) -> PlaybackState {
        self.snapshot().previous
    }

    /// Move to `next`, recording the old current state as `previous`.
    ///
    /// Returns the history after the transition.
    pub fn transition(&self, next: PlaybackState) -> StateHistory {
        let mut g = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        g.previous = g.current;
        g.current = next;
        let out = *g;
        drop(g);
        self.changed.notify_all();
        out
    }

    /// Block while the state is `Paused`, for at most `timeout`.
    ///
    /// Returns the current state when the wait ends (which may still be `Paused` on timeout).
    pub fn wait_while_paused(&self, timeout: Duration) -> PlaybackState {
        let g = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let (g, _timeout) = self
            .changed
            .wait_timeout_while(g, timeout, |h| h.current == PlaybackState::Paused)
            .unwrap_or_else(|err| err.into_inner());
        g.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn new_cell_is_stopped_with_stopped_history() {
        let cell = StateCell::new();
        assert_eq!(cell.current(), PlaybackState::Stopped);
        assert_eq!(cell.previous(), PlaybackState::Stopped);
    }

    #[test]
    fn transition_records_previous_before_overwriting() {
        let cell = StateCell::new();
        cell.transition(PlaybackState::Playing);
        let h = cell.transition(PlaybackState::Paused);
        assert_eq!(h.previous, PlaybackState::Playing);
        assert_eq!(h.current, PlaybackState::Paused);
        let h = cell.transition(PlaybackState::Stopped);
        assert_eq!(h.previous, PlaybackState::Paused);
    }

    #[test]
    fn wait_while_paused_returns_immediately_when_playing() {
        let cell = StateCell::new();
        cell.transition(PlaybackState::Playing);
        let start = Instant::now();
        assert_eq!(
            cell.wait_while_paused(Duration::from_secs(5)),
            PlaybackState::Playing
        );
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_while_paused_times_out_when_still_paused() {
        let cell = StateCell::new();
        cell.transition(PlaybackState::Paused);
        assert_eq!(
            cell.wait_while_paused(Duration::from_millis(10)),
            PlaybackState::Paused
        );
    }

    #[test]
    fn wait_while_paused_wakes_on_resume() {
        let cell = Arc::new(StateCell::new());
        cell.transition(PlaybackState::Playing);
        cell.transition(PlaybackState::Paused);
        let waiter = cell.clone();
        let handle = thread::spawn(move || waiter.wait_while_paused(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        cell.transition(PlaybackState::Playing);
        assert_eq!(handle.join().unwrap(), PlaybackState::Playing);
    }
}
