//! Incrementally streamed playback driven by a background copy task.
//!
//! `play()` opens and starts the output line, then submits one copy job to the shared
//! [`WorkerPool`]. The job reads fixed-size chunks from the input stream and writes them to
//! the line; the line's blocking `write` is the backpressure. Pause suspends writes (the job
//! waits on the state condvar) without ending the job. Closing the line is the only
//! cancellation: the job sees the closed line on its next write and exits.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use audio_engine_types::{AudioFormat, DeviceEventKind, PlaybackState};

use crate::config::EngineConfig;
use crate::error::{DeviceError, EngineError, Result};
use crate::pool::{WorkerContext, WorkerPool};
use crate::provider::{AudioProvider, FloatControlKind, LineControls, OutputLine, SampleStream};
use crate::resource::{AudioResource, ResourceCore};
use crate::state::StateCell;

/// Why a copy job ended.
#[derive(Debug)]
pub enum CopyOutcome {
    /// The input stream reported end of data.
    EndOfData,
    /// The resource was stopped or the line closed underneath the job.
    Stopped,
    /// The worker pool shut down while the job was running.
    Interrupted,
    /// Reading the source or writing the line failed.
    Failed(DeviceError),
}

/// Resource that streams its source through an output line.
pub struct StreamingAudio {
    core: Arc<ResourceCore>,
    provider: Arc<dyn AudioProvider>,
    pool: Arc<WorkerPool>,
    config: EngineConfig,
    weak_self: Weak<StreamingAudio>,
    inner: Mutex<StreamingInner>,
}

struct StreamingInner {
    /// `None` while a copy job owns the stream, or after it reached end of data.
    stream: Option<Box<dyn SampleStream>>,
    format: AudioFormat,
    line: Arc<dyn OutputLine>,
    controls: LineControls,
    /// Bumped on every play and reset; a job only acts on the generation it started with.
    generation: u64,
    active: bool,
}

impl std::fmt::Debug for StreamingAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingAudio")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl StreamingAudio {
    pub(crate) fn new(
        core: Arc<ResourceCore>,
        provider: Arc<dyn AudioProvider>,
        pool: Arc<WorkerPool>,
        config: EngineConfig,
        stream: Box<dyn SampleStream>,
        line: Arc<dyn OutputLine>,
    ) -> Arc<Self> {
        let format = stream.format();
        let controls = LineControls::query(line.as_ref());
        Arc::new_cyclic(|weak_self| Self {
            core,
            provider,
            pool,
            config,
            weak_self: weak_self.clone(),
            inner: Mutex::new(StreamingInner {
                stream: Some(stream),
                format,
                line,
                controls,
                generation: 0,
                active: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StreamingInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn format(&self) -> AudioFormat {
        self.lock().format
    }

    /// `true` while a copy job is running for the current line.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Tear down and rebuild the stream, line, and controls for a fresh `play()`.
    ///
    /// A playing or paused resource is fully stopped first. Registered callbacks move to a
    /// new event channel bound to the same resource.
    pub fn reset(&self) -> Result<()> {
        if self.is_open() {
            self.stop();
        }
        let path = self.core.path();
        let stream = self
            .provider
            .open_input_stream(self.core.source())
            .map_err(|err| EngineError::fatal("reopen input stream", path, err))?;
        let format = stream.format();
        if !self.provider.is_format_supported_for_output(&format) {
            return Err(EngineError::fatal(
                "open output line",
                path,
                DeviceError::UnsupportedFormat(format.to_string()),
            ));
        }
        let line = self
            .provider
            .open_output_line(format)
            .map_err(|err| EngineError::fatal("open output line", path, err))?;
        {
            let mut g = self.lock();
            if g.line.is_open() {
                g.line.close();
            }
            g.controls = LineControls::query(line.as_ref());
            g.line = line;
            g.stream = Some(stream);
            g.format = format;
            g.generation += 1;
            g.active = false;
        }
        self.core.replace_channel();
        tracing::debug!(path, "streaming resource reset");
        Ok(())
    }

    pub fn gain_db(&self) -> Option<f32> {
        self.float_value(FloatControlKind::Gain)
    }

    /// Set master gain in dB. Returns `false` (with a warning) when the line has no gain control.
    pub fn set_gain_db(&self, value: f32) -> Result<bool> {
        self.set_float(FloatControlKind::Gain, value, "set gain")
    }

    pub fn pan(&self) -> Option<f32> {
        self.float_value(FloatControlKind::Pan)
    }

    pub fn set_pan(&self, value: f32) -> Result<bool> {
        self.set_float(FloatControlKind::Pan, value, "set pan")
    }

    pub fn balance(&self) -> Option<f32> {
        self.float_value(FloatControlKind::Balance)
    }

    pub fn set_balance(&self, value: f32) -> Result<bool> {
        self.set_float(FloatControlKind::Balance, value, "set balance")
    }

    pub fn is_muted(&self) -> Option<bool> {
        self.lock().controls.mute.as_ref().map(|m| m.value())
    }

    pub fn set_muted(&self, muted: bool) -> bool {
        let control = self.lock().controls.mute.clone();
        match control {
            Some(control) => {
                control.set_value(muted);
                true
            }
            None => {
                self.core.warn_noop("set mute", "line has no mute control");
                false
            }
        }
    }

    fn float_value(&self, kind: FloatControlKind) -> Option<f32> {
        self.lock().controls.float(kind).map(|c| c.value())
    }

    fn set_float(&self, kind: FloatControlKind, value: f32, op: &'static str) -> Result<bool> {
        let control = self.lock().controls.float(kind).cloned();
        let Some(control) = control else {
            self.core.warn_noop(op, "line has no such control");
            return Ok(false);
        };
        let (min, max) = (control.minimum(), control.maximum());
        if !value.is_finite() || value < min || value > max {
            return Err(EngineError::InvalidArgument(format!(
                "{kind} {value} outside [{min}, {max}]"
            )));
        }
        control.set_value(value);
        Ok(true)
    }

    /// Stop and close the line, publishing Stop then Close. `false` if it was not open.
    fn close_line(&self) -> bool {
        let history = {
            let g = self.lock();
            if !g.line.is_open() {
                return false;
            }
            g.line.stop();
            g.line.flush();
            g.line.close();
            self.core.transition(PlaybackState::Stopped)
        };
        self.core.publish(DeviceEventKind::Stop, history);
        self.core.publish(DeviceEventKind::Close, history);
        true
    }

    /// Called by the copy job on every exit path.
    fn finish(
        &self,
        generation: u64,
        outcome: CopyOutcome,
        stream: Option<Box<dyn SampleStream>>,
    ) {
        let path = self.core.path();
        match &outcome {
            CopyOutcome::EndOfData => tracing::info!(path, "stream finished"),
            CopyOutcome::Stopped => tracing::debug!(path, "copy task stopped"),
            CopyOutcome::Interrupted => {
                tracing::warn!(path, "copy task interrupted; stopping resource")
            }
            CopyOutcome::Failed(err) => tracing::error!(path, error = %err, "copy task failed"),
        }
        let line = {
            let mut g = self.lock();
            if g.generation != generation {
                return;
            }
            if !matches!(outcome, CopyOutcome::EndOfData | CopyOutcome::Failed(_)) {
                g.stream = stream;
            }
            g.line.is_open().then(|| g.line.clone())
        };
        if let Some(line) = line {
            if matches!(outcome, CopyOutcome::EndOfData) {
                line.drain();
            }
            let still_current = self.lock().generation == generation;
            if still_current {
                self.close_line();
            }
        }
        let mut g = self.lock();
        if g.generation == generation {
            g.active = false;
        }
    }
}

fn copy_loop(
    stream: &mut dyn SampleStream,
    line: &dyn OutputLine,
    state: &StateCell,
    config: &EngineConfig,
    ctx: &WorkerContext,
) -> CopyOutcome {
    let channels = usize::from(stream.format().channels.max(1));
    let mut chunk = vec![0f32; config.effective_chunk_frames() * channels];
    let poll = config.pause_poll();
    loop {
        if ctx.is_shutting_down() {
            return CopyOutcome::Interrupted;
        }
        match state.wait_while_paused(poll) {
            PlaybackState::Paused => continue,
            PlaybackState::Stopped => return CopyOutcome::Stopped,
            PlaybackState::Playing => {}
        }
        if !line.is_open() {
            return CopyOutcome::Stopped;
        }
        let read = match stream.read(&mut chunk) {
            Ok(0) => return CopyOutcome::EndOfData,
            Ok(n) => n,
            Err(err) => return CopyOutcome::Failed(err),
        };
        match line.write(&chunk[..read]) {
            Ok(_) => {}
            Err(DeviceError::LineClosed) => return CopyOutcome::Stopped,
            Err(err) => return CopyOutcome::Failed(err),
        }
    }
}

impl AudioResource for StreamingAudio {
    fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }

    fn is_open(&self) -> bool {
        self.lock().line.is_open()
    }

    fn play(&self) -> Result<()> {
        let (mut stream, line, generation, history) = {
            let mut g = self.lock();
            if g.line.is_open() {
                self.core.warn_noop("play", "output line already open");
                return Ok(());
            }
            let Some(stream) = g.stream.take() else {
                self.core
                    .warn_noop("play", "input stream consumed or in use; reset first");
                return Ok(());
            };
            if let Err(err) = g.line.open(self.config.line_buffer_frames) {
                g.stream = Some(stream);
                return Err(EngineError::fatal("open output line", self.core.path(), err));
            }
            g.line.start();
            let history = self.core.transition(PlaybackState::Playing);
            g.generation += 1;
            g.active = true;
            (stream, g.line.clone(), g.generation, history)
        };
        self.core.publish(DeviceEventKind::Open, history);
        self.core.publish(DeviceEventKind::Start, history);

        let weak = self.weak_self.clone();
        let state = self.core.state().clone();
        let config = self.config.clone();
        let path = self.core.path().to_string();
        let submitted = self.pool.submit(move |ctx| {
            tracing::debug!(path = %path, "copy task started");
            let outcome = copy_loop(stream.as_mut(), line.as_ref(), &state, &config, ctx);
            if let Some(this) = weak.upgrade() {
                this.finish(generation, outcome, Some(stream));
            }
        });
        if let Err(err) = submitted {
            self.lock().active = false;
            self.close_line();
            return Err(EngineError::fatal("start copy task", self.core.path(), err));
        }
        Ok(())
    }

    fn pause(&self) {
        let history = {
            let g = self.lock();
            if !g.line.is_open() {
                self.core.warn_noop("pause", "output line not open");
                return;
            }
            if self.core.state().current() != PlaybackState::Playing {
                self.core.warn_noop("pause", "resource is not playing");
                return;
            }
            g.line.stop();
            self.core.transition(PlaybackState::Paused)
        };
        self.core.publish(DeviceEventKind::Stop, history);
    }

    fn resume(&self) {
        let history = {
            let g = self.lock();
            if !g.line.is_open() {
                self.core.warn_noop("resume", "output line not open");
                return;
            }
            if self.core.state().current() != PlaybackState::Paused {
                self.core.warn_noop("resume", "resource is not paused");
                return;
            }
            g.line.start();
            self.core.transition(PlaybackState::Playing)
        };
        self.core.publish(DeviceEventKind::Start, history);
    }

    fn stop(&self) {
        if !self.close_line() {
            self.core.warn_noop("stop", "output line not open");
        }
    }
}

impl Drop for StreamingAudio {
    fn drop(&mut self) {
        let g = self.inner.get_mut().unwrap_or_else(|err| err.into_inner());
        if g.line.is_open() {
            g.line.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::memory::MemoryProvider;
    use crate::source::normalize_source;
    use audio_engine_types::AudioEvent;
    use crossbeam_channel::Receiver;
    use std::time::{Duration, Instant};

    const PATH: &str = "/mem/stream.wav";

    fn setup(
        provider: MemoryProvider,
        seconds: f32,
    ) -> (Arc<MemoryProvider>, Arc<StreamingAudio>, Receiver<AudioEvent>) {
        let provider = Arc::new(provider);
        provider.insert_tone(PATH, AudioFormat::new(8_000, 1), seconds, 440.0);
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let source = normalize_source(PATH).unwrap();
        let stream = provider.open_input_stream(&source).unwrap();
        let line = provider.open_output_line(stream.format()).unwrap();
        let core = Arc::new(ResourceCore::new(source, bus));
        let pool = Arc::new(WorkerPool::new(1).unwrap());
        let dyn_provider: Arc<dyn AudioProvider> = provider.clone();
        let config = EngineConfig {
            stream_chunk_frames: 256,
            line_buffer_frames: 1024,
            ..EngineConfig::default()
        };
        let audio = StreamingAudio::new(core, dyn_provider, pool, config, stream, line);
        (provider, audio, rx)
    }

    fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        f()
    }

    fn kinds(rx: &Receiver<AudioEvent>) -> Vec<DeviceEventKind> {
        rx.try_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn natural_end_stops_once_and_closes_the_line() {
        let (provider, audio, rx) = setup(MemoryProvider::new().with_realtime_lines(false), 1.0);
        audio.play().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !audio.is_open()));
        assert!(wait_until(Duration::from_secs(1), || !audio.is_active()));
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
        let line = provider.last_line().unwrap();
        assert!(wait_until(Duration::from_secs(1), || line.consumed_samples() == 8_000));
        audio.stop();
        assert!(kinds(&rx).is_empty());
    }

    #[test]
    fn pause_suspends_consumption_without_ending_the_task() {
        let (provider, audio, _rx) = setup(MemoryProvider::new().with_realtime_lines(true), 5.0);
        audio.play().unwrap();
        let line = provider.last_line().unwrap();
        assert!(wait_until(Duration::from_secs(2), || line.consumed_samples() > 0));
        audio.pause();
        std::thread::sleep(Duration::from_millis(20));
        let paused_at = line.consumed_samples();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(line.consumed_samples(), paused_at);
        assert!(audio.is_active());
        audio.resume();
        assert!(wait_until(Duration::from_secs(2), || line.consumed_samples() > paused_at));
        audio.stop();
        assert!(wait_until(Duration::from_secs(2), || !audio.is_active()));
    }

    #[test]
    fn play_after_end_requires_reset() {
        let (_p, audio, rx) = setup(MemoryProvider::new().with_realtime_lines(false), 0.1);
        audio.play().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !audio.is_active()));
        let _ = kinds(&rx);
        audio.play().unwrap();
        assert!(!audio.is_open());
        assert!(kinds(&rx).is_empty());
        audio.reset().unwrap();
        audio.play().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !audio.is_active()));
        assert_eq!(kinds(&rx).len(), 4);
    }

    #[test]
    fn reset_carries_callbacks_to_the_new_channel() {
        let (_p, audio, _rx) = setup(MemoryProvider::new(), 0.1);
        audio
            .events()
            .set_on_start(Some(crate::channel::callback(|_| {})));
        let before = audio.events();
        audio.reset().unwrap();
        assert!(!Arc::ptr_eq(&before, &audio.events()));
        assert!(audio.events().on_start().is_some());
    }

    #[test]
    fn control_setters_validate_range() {
        let (_p, audio, _rx) = setup(MemoryProvider::new(), 0.1);
        assert!(audio.set_pan(0.5).unwrap());
        assert_eq!(audio.pan(), Some(0.5));
        assert!(matches!(
            audio.set_pan(2.0),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(audio.set_muted(true));
        assert_eq!(audio.is_muted(), Some(true));
    }

    #[test]
    fn missing_controls_warn_and_report_false() {
        let (_p, audio, _rx) = setup(MemoryProvider::new().without_line_controls(), 0.1);
        assert!(!audio.set_gain_db(-6.0).unwrap());
        assert!(!audio.set_muted(true));
        assert_eq!(audio.gain_db(), None);
    }
}
