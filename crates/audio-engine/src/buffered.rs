//! Fully decoded playback: loop points, loop counts, seek, and microsecond positions.

use std::sync::{Arc, Mutex, MutexGuard};

use audio_engine_types::{AudioFormat, DeviceEventKind, PlaybackState};

use crate::clip::LoopCount;
use crate::error::{EngineError, Result};
use crate::looping::LoopSettings;
use crate::provider::{AudioProvider, DecodedBuffer, SampleStream};
use crate::resource::{AudioResource, ResourceCore};

/// Resource backed by a decoded buffer held entirely in memory.
pub struct BufferedAudio {
    core: Arc<ResourceCore>,
    provider: Arc<dyn AudioProvider>,
    inner: Mutex<BufferedInner>,
}

struct BufferedInner {
    buffer: Box<dyn DecodedBuffer>,
    /// Source stream for the next open; `None` after a decode until reopened lazily.
    stream: Option<Box<dyn SampleStream>>,
    format: AudioFormat,
    /// `None` until the source reports it or the first decode measures it.
    frame_length: Option<u64>,
    loops: LoopSettings,
    /// Cue used by `play()` and by position queries while the buffer is closed.
    cue_us: u64,
    last_stop_us: u64,
}

impl std::fmt::Debug for BufferedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedAudio")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl BufferedAudio {
    pub(crate) fn new(
        core: Arc<ResourceCore>,
        provider: Arc<dyn AudioProvider>,
        buffer: Box<dyn DecodedBuffer>,
        stream: Box<dyn SampleStream>,
    ) -> Self {
        let format = stream.format();
        let frame_length = stream.frame_length();
        Self {
            core,
            provider,
            inner: Mutex::new(BufferedInner {
                buffer,
                stream: Some(stream),
                format,
                frame_length,
                loops: LoopSettings::default(),
                cue_us: 0,
                last_stop_us: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferedInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn format(&self) -> AudioFormat {
        self.lock().format
    }

    /// Total length in frames (known after the first decode if the source did not report it).
    pub fn frame_length(&self) -> u64 {
        self.lock().frame_length.unwrap_or(0)
    }

    pub fn duration_us(&self) -> u64 {
        let g = self.lock();
        g.format.frames_to_micros(g.frame_length.unwrap_or(0))
    }

    /// `true` while the buffer is producing sound. Turns `false` at the natural end.
    pub fn is_active(&self) -> bool {
        let g = self.lock();
        g.buffer.is_open() && g.buffer.is_running()
    }

    /// Open the buffer, position it at `offset_us`, and start (or loop).
    pub fn play_from(&self, offset_us: u64) -> Result<()> {
        let history = {
            let mut g = self.lock();
            if g.buffer.is_open() {
                self.core.warn_noop("play", "decoded buffer already open");
                return Ok(());
            }
            let mut stream = match g.stream.take() {
                Some(stream) => stream,
                None => self
                    .provider
                    .open_input_stream(self.core.source())
                    .map_err(|err| {
                        EngineError::fatal("reopen input stream", self.core.path(), err)
                    })?,
            };
            if let Err(err) = g.buffer.open(stream.as_mut()) {
                g.buffer.close();
                return Err(EngineError::fatal(
                    "open decoded buffer",
                    self.core.path(),
                    err,
                ));
            }
            if let Some(format) = g.buffer.format() {
                g.format = format;
            }
            let frames = g.buffer.frame_length();
            g.frame_length = Some(frames);
            let offset = offset_us.min(g.format.frames_to_micros(frames));
            g.buffer.set_microsecond_position(offset);
            start_or_loop(&mut g, self.core.path());
            self.core.transition(PlaybackState::Playing)
        };
        self.core.publish(DeviceEventKind::Open, history);
        self.core.publish(DeviceEventKind::Start, history);
        Ok(())
    }

    /// Current position; the cue while closed.
    pub fn playback_position_us(&self) -> u64 {
        let g = self.lock();
        if g.buffer.is_open() {
            g.buffer.microsecond_position()
        } else {
            g.cue_us
        }
    }

    /// Position captured by the most recent `stop()`.
    pub fn last_stop_position_us(&self) -> u64 {
        self.lock().last_stop_us
    }

    /// Move to `position_us` (clamped to the duration). Ignored while playing.
    pub fn set_playback_position_us(&self, position_us: u64) {
        let mut g = self.lock();
        if self.core.state().current() == PlaybackState::Playing {
            self.core
                .warn_noop("set playback position", "resource is playing");
            return;
        }
        reposition(&mut g, position_us);
    }

    /// Move by `delta_us` relative to the current position. Ignored while playing.
    pub fn seek_us(&self, delta_us: i64) {
        let mut g = self.lock();
        if self.core.state().current() == PlaybackState::Playing {
            self.core.warn_noop("seek", "resource is playing");
            return;
        }
        let current = if g.buffer.is_open() {
            g.buffer.microsecond_position()
        } else {
            g.cue_us
        };
        let target = current.saturating_add_signed(delta_us);
        reposition(&mut g, target);
    }

    pub fn rewind_to_beginning(&self) {
        let mut g = self.lock();
        if self.core.state().current() == PlaybackState::Playing {
            self.core.warn_noop("rewind", "resource is playing");
            return;
        }
        reposition(&mut g, 0);
    }

    /// Set loop points as fractions of the total length; enables looping.
    ///
    /// Takes effect at the next start or resume.
    pub fn set_loop_points(&self, start: f64, end: f64) -> Result<()> {
        self.lock().loops.set_points(start, end)
    }

    pub fn loop_points(&self) -> (f64, f64) {
        self.lock().loops.points()
    }

    pub fn set_loop_count(&self, count: i32) -> Result<()> {
        self.lock().loops.set_count(count)
    }

    pub fn loop_count(&self) -> i32 {
        self.lock().loops.count()
    }

    pub fn set_should_loop(&self, should_loop: bool) {
        self.lock().loops.set_enabled(should_loop);
    }

    pub fn should_loop(&self) -> bool {
        self.lock().loops.should_loop()
    }

    /// Disable looping and stop wrapping the pass currently playing.
    pub fn stop_looping_now(&self) {
        let mut g = self.lock();
        g.loops.set_enabled(false);
        if g.buffer.is_open() {
            g.buffer.cancel_loop();
        }
    }
}

fn reposition(g: &mut BufferedInner, position_us: u64) {
    // an unknown length is clamped once the buffer opens
    let clamped = match g.frame_length {
        Some(frames) => position_us.min(g.format.frames_to_micros(frames)),
        None => position_us,
    };
    g.cue_us = clamped;
    if g.buffer.is_open() {
        g.buffer.set_microsecond_position(clamped);
    }
}

fn start_or_loop(g: &mut BufferedInner, path: &str) {
    let count = g.loops.loop_count();
    if g.loops.should_loop() && count != LoopCount::Times(0) {
        let region = g.loops.region(g.frame_length.unwrap_or(0));
        tracing::debug!(path, ?region, ?count, "looping decoded buffer");
        g.buffer.start_looping(region, count);
    } else {
        g.buffer.start();
    }
}

impl AudioResource for BufferedAudio {
    fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }

    fn is_open(&self) -> bool {
        self.lock().buffer.is_open()
    }

    fn play(&self) -> Result<()> {
        let cue = self.lock().cue_us;
        self.play_from(cue)
    }

    fn pause(&self) {
        let history = {
            let mut g = self.lock();
            if !g.buffer.is_open() {
                self.core.warn_noop("pause", "decoded buffer not open");
                return;
            }
            if self.core.state().current() != PlaybackState::Playing {
                self.core.warn_noop("pause", "resource is not playing");
                return;
            }
            g.buffer.stop();
            g.cue_us = g.buffer.microsecond_position();
            self.core.transition(PlaybackState::Paused)
        };
        self.core.publish(DeviceEventKind::Stop, history);
    }

    fn resume(&self) {
        let history = {
            let mut g = self.lock();
            if !g.buffer.is_open() {
                self.core.warn_noop("resume", "decoded buffer not open");
                return;
            }
            if self.core.state().current() != PlaybackState::Paused {
                self.core.warn_noop("resume", "resource is not paused");
                return;
            }
            let cue = g.cue_us;
            g.buffer.set_microsecond_position(cue);
            start_or_loop(&mut g, self.core.path());
            self.core.transition(PlaybackState::Playing)
        };
        self.core.publish(DeviceEventKind::Start, history);
    }

    fn stop(&self) {
        let history = {
            let mut g = self.lock();
            if !g.buffer.is_open() {
                self.core.warn_noop("stop", "decoded buffer not open");
                return;
            }
            g.last_stop_us = g.buffer.microsecond_position();
            g.buffer.stop();
            g.buffer.flush();
            g.buffer.close();
            g.cue_us = 0;
            self.core.transition(PlaybackState::Stopped)
        };
        self.core.publish(DeviceEventKind::Stop, history);
        self.core.publish(DeviceEventKind::Close, history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::looping::LOOP_CONTINUOUSLY;
    use crate::memory::{MemoryProvider, ProviderCall};
    use crate::source::normalize_source;
    use audio_engine_types::AudioEvent;
    use crossbeam_channel::Receiver;

    const PATH: &str = "/mem/loop.wav";

    fn setup(provider: MemoryProvider) -> (Arc<MemoryProvider>, BufferedAudio, Receiver<AudioEvent>) {
        let provider = Arc::new(provider);
        provider.insert_tone(PATH, AudioFormat::new(8_000, 1), 1.0, 440.0);
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let source = normalize_source(PATH).unwrap();
        let core = Arc::new(ResourceCore::new(source.clone(), bus));
        let buffer = provider.allocate_decoded_buffer().unwrap();
        let stream = provider.open_input_stream(&source).unwrap();
        let dyn_provider: Arc<dyn AudioProvider> = provider.clone();
        let audio = BufferedAudio::new(core, dyn_provider, buffer, stream);
        (provider, audio, rx)
    }

    fn kinds(rx: &Receiver<AudioEvent>) -> Vec<DeviceEventKind> {
        rx.try_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn play_then_stop_publishes_open_start_stop_close() {
        let (_p, audio, rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.play().unwrap();
        assert!(audio.is_open());
        audio.stop();
        assert_eq!(audio.state(), PlaybackState::Stopped);
        assert_eq!(
            kinds(&rx),
            vec![
                DeviceEventKind::Open,
                DeviceEventKind::Start,
                DeviceEventKind::Stop,
                DeviceEventKind::Close
            ]
        );
    }

    #[test]
    fn second_play_while_open_is_a_noop() {
        let (_p, audio, rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.play().unwrap();
        audio.play().unwrap();
        assert_eq!(kinds(&rx).len(), 2);
    }

    #[test]
    fn pause_when_not_playing_changes_nothing() {
        let (_p, audio, rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.pause();
        assert_eq!(audio.state(), PlaybackState::Stopped);
        assert!(!audio.is_open());
        audio.play().unwrap();
        audio.pause();
        audio.pause();
        assert_eq!(audio.state(), PlaybackState::Paused);
        assert_eq!(
            kinds(&rx),
            vec![
                DeviceEventKind::Open,
                DeviceEventKind::Start,
                DeviceEventKind::Stop
            ]
        );
    }

    #[test]
    fn seek_is_rejected_while_playing() {
        let (_p, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.play().unwrap();
        audio.set_playback_position_us(500_000);
        assert_eq!(audio.playback_position_us(), 0);
        audio.pause();
        audio.seek_us(250_000);
        assert_eq!(audio.playback_position_us(), 250_000);
    }

    #[test]
    fn stopped_position_round_trips_and_cues_next_play() {
        let (_p, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.set_playback_position_us(250_000);
        assert_eq!(audio.playback_position_us(), 250_000);
        audio.play().unwrap();
        assert_eq!(audio.playback_position_us(), 250_000);
        audio.stop();
        assert_eq!(audio.last_stop_position_us(), 250_000);
        assert_eq!(audio.playback_position_us(), 0);
    }

    #[test]
    fn positions_clamp_to_duration() {
        let (_p, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        assert_eq!(audio.duration_us(), 1_000_000);
        audio.set_playback_position_us(9_000_000);
        assert_eq!(audio.playback_position_us(), 1_000_000);
        audio.seek_us(-5_000_000);
        assert_eq!(audio.playback_position_us(), 0);
    }

    #[test]
    fn unknown_length_keeps_the_cue_until_the_buffer_opens() {
        let (_p, audio, _rx) = setup(
            MemoryProvider::new()
                .with_buffer_clock(0.0)
                .without_stream_lengths(),
        );
        assert_eq!(audio.frame_length(), 0);
        audio.set_playback_position_us(250_000);
        assert_eq!(audio.playback_position_us(), 250_000);
        audio.seek_us(100_000);
        assert_eq!(audio.playback_position_us(), 350_000);

        audio.set_playback_position_us(5_000_000);
        audio.play().unwrap();
        assert_eq!(audio.frame_length(), 8_000);
        assert_eq!(audio.playback_position_us(), 1_000_000);
    }

    #[test]
    fn loop_points_are_denormalized_at_start() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.set_loop_points(0.25, 0.75).unwrap();
        audio.set_loop_count(2).unwrap();
        audio.play().unwrap();
        assert!(provider.calls().contains(&ProviderCall::StartLooping {
            start: 2_000,
            end: Some(6_000),
            count: Some(2),
        }));
    }

    #[test]
    fn points_without_count_play_through_once() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.set_loop_points(0.25, 0.75).unwrap();
        assert!(audio.should_loop());
        assert_eq!(audio.loop_count(), 0);
        audio.play().unwrap();
        let calls = provider.calls();
        assert!(calls.contains(&ProviderCall::Start));
        assert!(
            !calls
                .iter()
                .any(|c| matches!(c, ProviderCall::StartLooping { .. }))
        );
    }

    #[test]
    fn continuous_count_loops_forever() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.set_loop_count(LOOP_CONTINUOUSLY).unwrap();
        audio.play().unwrap();
        assert!(provider.calls().contains(&ProviderCall::StartLooping {
            start: 0,
            end: None,
            count: None,
        }));
    }

    #[test]
    fn stop_looping_now_cancels_the_running_loop() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.set_loop_count(LOOP_CONTINUOUSLY).unwrap();
        audio.play().unwrap();
        audio.stop_looping_now();
        assert!(!audio.should_loop());
        assert!(provider.calls().contains(&ProviderCall::CancelLoop));
        assert!(audio.is_open());
    }

    #[test]
    fn stop_looping_now_while_closed_only_disables() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.set_loop_count(3).unwrap();
        audio.stop_looping_now();
        assert!(!audio.should_loop());
        assert_eq!(audio.loop_count(), 3);
        assert!(!provider.calls().contains(&ProviderCall::CancelLoop));
        audio.play().unwrap();
        assert!(provider.calls().contains(&ProviderCall::Start));
    }

    #[test]
    fn disabled_loop_starts_plainly() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.set_loop_points(0.1, 0.9).unwrap();
        audio.set_should_loop(false);
        audio.play().unwrap();
        assert!(provider.calls().contains(&ProviderCall::Start));
    }

    #[test]
    fn replay_after_stop_reopens_the_source() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(0.0));
        audio.play().unwrap();
        audio.stop();
        audio.play().unwrap();
        assert!(audio.is_open());
        let opens = provider
            .calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::OpenInputStream(_)))
            .count();
        assert_eq!(opens, 2);
    }

    #[test]
    fn natural_end_leaves_buffer_open_but_inactive() {
        let (_p, audio, _rx) = setup(MemoryProvider::new().with_buffer_clock(1_000.0));
        audio.play().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!audio.is_active());
        assert!(audio.is_open());
        assert_eq!(audio.state(), PlaybackState::Playing);
    }
}
