//! CPAL output streams for decoded buffers and streaming lines.
//!
//! A `cpal::Stream` is not `Send` on every platform, so each open device resource gets a
//! [`StreamHost`] thread that builds and owns its stream and obeys play/pause commands.
//! The real-time callback renders through a [`RenderSource`]:
//! - [`ClipRender`] walks a [`ClipCursor`] over fully decoded samples
//! - [`LineRender`] refills a small local buffer from the line's [`SampleQueue`] without blocking
//!
//! Both apply basic channel mapping and convert `f32` to the device sample format.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use audio_engine_types::AudioFormat;
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::clip::{ClipCursor, LoopCount, LoopRegion};
use crate::device::{find_output_config, pick_buffer_size, pick_device};
use crate::error::DeviceError;
use crate::provider::{
    AtomicBooleanControl, AtomicFloatControl, BooleanControl, DecodedBuffer, FloatControl,
    FloatControlKind, LineControls, OutputLine, SampleStream, channel_gains,
};
use crate::queue::{PopStrategy, SampleQueue};

/// Producer of interleaved `f32` frames for an output callback.
pub(crate) trait RenderSource: Send + 'static {
    fn render(&mut self, out: &mut [f32], dst_channels: usize);
}

enum HostCommand {
    Play,
    Pause,
    Shutdown,
}

/// Size of the device's own buffer, used to let the last callback play out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DeviceBuffer {
    pub frames: u32,
    pub sample_rate: u32,
}

impl DeviceBuffer {
    /// Backends that pick their own size get about 100ms.
    fn from_config(config: &cpal::StreamConfig) -> Self {
        let sample_rate = config.sample_rate.max(1);
        let frames = match config.buffer_size {
            cpal::BufferSize::Fixed(n) => n.max(1),
            cpal::BufferSize::Default => (sample_rate / 10).max(1),
        };
        Self {
            frames,
            sample_rate,
        }
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.frames) / f64::from(self.sample_rate))
    }
}

/// Dedicated thread owning one CPAL output stream.
pub(crate) struct StreamHost {
    tx: Sender<HostCommand>,
    thread: Option<JoinHandle<()>>,
    buffer: DeviceBuffer,
}

impl StreamHost {
    /// Build a paused stream for `format` on the selected device.
    ///
    /// Returns once the stream exists (or failed to build) so errors surface synchronously.
    pub(crate) fn spawn(
        device: Option<String>,
        format: AudioFormat,
        source: Box<dyn RenderSource>,
    ) -> Result<Self, DeviceError> {
        let (tx, rx) = bounded::<HostCommand>(16);
        let (ready_tx, ready_rx) = bounded::<Result<DeviceBuffer, DeviceError>>(1);
        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || host_thread(device, format, source, rx, ready_tx))?;
        match ready_rx.recv() {
            Ok(Ok(buffer)) => Ok(Self {
                tx,
                thread: Some(thread),
                buffer,
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceError::Backend("output thread exited during setup".to_string()))
            }
        }
    }

    pub(crate) fn play(&self) {
        let _ = self.tx.send(HostCommand::Play);
    }

    pub(crate) fn pause(&self) {
        let _ = self.tx.send(HostCommand::Pause);
    }

    pub(crate) fn buffer(&self) -> DeviceBuffer {
        self.buffer
    }
}

impl Drop for StreamHost {
    fn drop(&mut self) {
        let _ = self.tx.send(HostCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn host_thread(
    device: Option<String>,
    format: AudioFormat,
    source: Box<dyn RenderSource>,
    rx: Receiver<HostCommand>,
    ready: Sender<Result<DeviceBuffer, DeviceError>>,
) {
    let (stream, buffer) = match build_output_stream(device.as_deref(), format, source) {
        Ok(built) => built,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    let _ = ready.send(Ok(buffer));
    while let Ok(cmd) = rx.recv() {
        match cmd {
            HostCommand::Play => {
                if let Err(err) = stream.play() {
                    tracing::warn!(error = %err, "output stream play failed");
                }
            }
            HostCommand::Pause => {
                if let Err(err) = stream.pause() {
                    tracing::warn!(error = %err, "output stream pause failed");
                }
            }
            HostCommand::Shutdown => break,
        }
    }
}

fn build_output_stream(
    needle: Option<&str>,
    format: AudioFormat,
    source: Box<dyn RenderSource>,
) -> Result<(cpal::Stream, DeviceBuffer), DeviceError> {
    let host = cpal::default_host();
    let device = pick_device(&host, needle)?;
    let supported = find_output_config(&device, &format)
        .ok_or_else(|| DeviceError::UnsupportedFormat(format.to_string()))?;
    let mut config = supported.config();
    if let Some(size) = pick_buffer_size(&supported) {
        config.buffer_size = size;
    }
    let buffer = DeviceBuffer::from_config(&config);
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, source),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, source),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, source),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, source),
        other => Err(DeviceError::UnsupportedFormat(format!(
            "device sample format {other:?}"
        ))),
    }?;
    // streams may start running on build; keep silent until asked to play
    if let Err(err) = stream.pause() {
        tracing::debug!(error = %err, "output stream could not be paused after build");
    }
    Ok((stream, buffer))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut source: Box<dyn RenderSource>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = usize::from(config.channels).max(1);
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = |err: cpal::StreamError| tracing::warn!("stream error: {err}");
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                scratch.resize(data.len(), 0.0);
                source.render(&mut scratch, channels_out);
                for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
                }
            },
            err_fn,
            None,
        )
        .map_err(|err| DeviceError::Backend(err.to_string()))
}

/// Map one source frame onto one destination frame.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: best-effort "clamp to available channels"
fn map_frame(src: &[f32], dst: &mut [f32], left: f32, right: f32) {
    let src_channels = src.len();
    let dst_channels = dst.len();
    for (ch, out) in dst.iter_mut().enumerate() {
        let sample = match (src_channels, dst_channels) {
            (2, 1) => 0.5 * (src[0] + src[1]),
            (0, _) => 0.0,
            (s, _) => src[ch.min(s - 1)],
        };
        *out = sample * if ch % 2 == 0 { left } else { right };
    }
}

/// Shared state of an open CPAL decoded buffer.
struct ClipShared {
    samples: Arc<Vec<f32>>,
    channels: usize,
    cursor: Mutex<ClipCursor>,
    running: AtomicBool,
}

struct ClipRender {
    shared: Arc<ClipShared>,
}

impl RenderSource for ClipRender {
    fn render(&mut self, out: &mut [f32], dst_channels: usize) {
        if !self.shared.running.load(Ordering::Relaxed) {
            out.fill(0.0);
            return;
        }
        let src_channels = self.shared.channels;
        let mut cursor = self.shared.cursor.lock().unwrap_or_else(|err| err.into_inner());
        for dst in out.chunks_mut(dst_channels) {
            match cursor.next_frame() {
                Some(frame) => {
                    let start = frame as usize * src_channels;
                    let src = self
                        .shared
                        .samples
                        .get(start..start + src_channels)
                        .unwrap_or(&[]);
                    map_frame(src, dst, 1.0, 1.0);
                }
                None => dst.fill(0.0),
            }
        }
    }
}

/// Decoded buffer played through a CPAL stream.
pub struct CpalClip {
    device: Option<String>,
    format: Option<AudioFormat>,
    shared: Option<Arc<ClipShared>>,
    host: Option<StreamHost>,
}

impl CpalClip {
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            format: None,
            shared: None,
            host: None,
        }
    }

    fn with_cursor<R>(&self, f: impl FnOnce(&mut ClipCursor) -> R) -> Option<R> {
        self.shared.as_ref().map(|shared| {
            let mut cursor = shared.cursor.lock().unwrap_or_else(|err| err.into_inner());
            f(&mut cursor)
        })
    }

    fn set_running(&self, running: bool) {
        if let Some(shared) = &self.shared {
            shared.running.store(running, Ordering::Relaxed);
        }
        if let Some(host) = &self.host {
            if running { host.play() } else { host.pause() }
        }
    }
}

impl DecodedBuffer for CpalClip {
    fn open(&mut self, stream: &mut dyn SampleStream) -> Result<(), DeviceError> {
        let format = stream.format();
        let channels = usize::from(format.channels.max(1));
        let mut samples = Vec::new();
        let mut chunk = vec![0f32; 4096 * channels];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            samples.extend_from_slice(&chunk[..n]);
        }
        let frames = (samples.len() / channels) as u64;
        let shared = Arc::new(ClipShared {
            samples: Arc::new(samples),
            channels,
            cursor: Mutex::new(ClipCursor::new(frames)),
            running: AtomicBool::new(false),
        });
        let host = StreamHost::spawn(
            self.device.clone(),
            format,
            Box::new(ClipRender {
                shared: shared.clone(),
            }),
        )?;
        self.format = Some(format);
        self.shared = Some(shared);
        self.host = Some(host);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.host.is_some()
    }

    fn is_running(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.running.load(Ordering::Relaxed))
            && self.with_cursor(|c| !c.is_finished()).unwrap_or(false)
    }

    fn start(&mut self) {
        self.set_running(true);
    }

    fn start_looping(&mut self, region: LoopRegion, count: LoopCount) {
        self.with_cursor(|c| c.set_loop(region, count));
        self.set_running(true);
    }

    fn cancel_loop(&mut self) {
        self.with_cursor(|c| c.cancel_loop());
    }

    fn stop(&mut self) {
        self.set_running(false);
    }

    fn flush(&mut self) {}

    fn close(&mut self) {
        self.set_running(false);
        self.host = None;
        self.shared = None;
    }

    fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn frame_length(&self) -> u64 {
        self.with_cursor(|c| c.length()).unwrap_or(0)
    }

    fn frame_position(&self) -> u64 {
        self.with_cursor(|c| c.position()).unwrap_or(0)
    }

    fn set_frame_position(&mut self, frame: u64) {
        self.with_cursor(|c| c.set_position(frame));
    }
}

/// Progress of a line's callback, shared with [`CpalLine::drain`].
#[derive(Debug, Default)]
struct Playout {
    /// Frames popped from the queue but not yet rendered.
    pending: AtomicUsize,
    /// Frames handed to the device while running, silence included.
    rendered: AtomicU64,
}

/// Block until the callback has rendered everything it popped, then until the device has
/// asked for two more buffers: the one that may be in flight and one to play it out.
///
/// Gives up when `running` turns false or after `timeout`.
fn wait_for_playout(
    playout: &Playout,
    buffer_frames: u64,
    timeout: Duration,
    running: impl Fn() -> bool,
) {
    const POLL: Duration = Duration::from_millis(5);
    let deadline = Instant::now() + timeout;
    while playout.pending.load(Ordering::Acquire) > 0 {
        if !running() || Instant::now() >= deadline {
            return;
        }
        thread::sleep(POLL);
    }
    let target = playout.rendered.load(Ordering::Acquire) + 2 * buffer_frames;
    while playout.rendered.load(Ordering::Acquire) < target {
        if !running() || Instant::now() >= deadline {
            return;
        }
        thread::sleep(POLL);
    }
}

/// Callback side of a [`CpalLine`]: refills a local buffer from the queue.
struct LineRender {
    queue: Arc<SampleQueue>,
    running: Arc<AtomicBool>,
    controls: LineControls,
    src_channels: usize,
    src: Vec<f32>,
    pos: usize,
    underruns: Arc<AtomicUsize>,
    playout: Arc<Playout>,
}

impl RenderSource for LineRender {
    fn render(&mut self, out: &mut [f32], dst_channels: usize) {
        if !self.running.load(Ordering::Relaxed) {
            out.fill(0.0);
            return;
        }
        let (left, right) = channel_gains(&self.controls, self.src_channels as u16);
        let refill_max_frames = (out.len() / dst_channels).max(1);
        for dst in out.chunks_mut(dst_channels) {
            if self.pos >= self.src.len() {
                self.pos = 0;
                self.src.clear();
                match self.queue.pop(PopStrategy::NonBlocking {
                    max_frames: refill_max_frames,
                }) {
                    Some(v) => {
                        self.playout
                            .pending
                            .store(v.len() / self.src_channels, Ordering::Release);
                        self.src = v;
                    }
                    None => {
                        self.underruns.fetch_add(1, Ordering::Relaxed);
                        dst.fill(0.0);
                        continue;
                    }
                }
            }
            let frame = &self.src[self.pos..self.pos + self.src_channels];
            map_frame(frame, dst, left, right);
            self.pos += self.src_channels;
            self.playout.pending.fetch_sub(1, Ordering::AcqRel);
        }
        self.playout
            .rendered
            .fetch_add((out.len() / dst_channels) as u64, Ordering::AcqRel);
    }
}

/// Streaming output line played through a CPAL stream.
pub struct CpalLine {
    device: Option<String>,
    format: AudioFormat,
    queue: RwLock<Arc<SampleQueue>>,
    running: Arc<AtomicBool>,
    open: AtomicBool,
    host: Mutex<Option<StreamHost>>,
    underruns: Arc<AtomicUsize>,
    playout: Arc<Playout>,
    gain: Arc<AtomicFloatControl>,
    pan: Arc<AtomicFloatControl>,
    balance: Arc<AtomicFloatControl>,
    mute: Arc<AtomicBooleanControl>,
}

impl CpalLine {
    pub fn new(device: Option<String>, format: AudioFormat) -> Self {
        let closed = SampleQueue::new(usize::from(format.channels), 1);
        closed.close();
        Self {
            device,
            format,
            queue: RwLock::new(Arc::new(closed)),
            running: Arc::new(AtomicBool::new(false)),
            open: AtomicBool::new(false),
            host: Mutex::new(None),
            underruns: Arc::new(AtomicUsize::new(0)),
            playout: Arc::new(Playout::default()),
            gain: Arc::new(AtomicFloatControl::gain()),
            pan: Arc::new(AtomicFloatControl::pan()),
            balance: Arc::new(AtomicFloatControl::balance()),
            mute: Arc::new(AtomicBooleanControl::default()),
        }
    }

    fn queue(&self) -> Arc<SampleQueue> {
        self.queue
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    fn controls(&self) -> LineControls {
        LineControls {
            gain: Some(self.gain.clone()),
            pan: Some(self.pan.clone()),
            balance: Some(self.balance.clone()),
            mute: Some(self.mute.clone()),
        }
    }

    /// Callbacks that found the line empty while running.
    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    fn with_host(&self, f: impl FnOnce(&StreamHost)) {
        if let Some(host) = self
            .host
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .as_ref()
        {
            f(host);
        }
    }
}

impl OutputLine for CpalLine {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&self, buffer_frames: usize) -> Result<(), DeviceError> {
        let mut host = self.host.lock().unwrap_or_else(|err| err.into_inner());
        if host.is_some() {
            return Ok(());
        }
        let channels = usize::from(self.format.channels.max(1));
        let queue = Arc::new(SampleQueue::new(channels, buffer_frames));
        let render = LineRender {
            queue: queue.clone(),
            running: self.running.clone(),
            controls: self.controls(),
            src_channels: channels,
            src: Vec::new(),
            pos: 0,
            underruns: self.underruns.clone(),
            playout: self.playout.clone(),
        };
        *host = Some(StreamHost::spawn(
            self.device.clone(),
            self.format,
            Box::new(render),
        )?);
        *self.queue.write().unwrap_or_else(|err| err.into_inner()) = queue;
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_running(&self) -> bool {
        self.is_open() && self.running.load(Ordering::Acquire)
    }

    fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.with_host(StreamHost::play);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.with_host(StreamHost::pause);
    }

    fn drain(&self) {
        let running = || self.running.load(Ordering::Acquire);
        if !self.queue().wait_until_drained(|| !running()) {
            return;
        }
        let Some(buffer) = self
            .host
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .as_ref()
            .map(StreamHost::buffer)
        else {
            return;
        };
        let timeout = buffer.period() * 4 + Duration::from_millis(250);
        wait_for_playout(&self.playout, u64::from(buffer.frames), timeout, running);
    }

    fn flush(&self) {
        self.queue().flush();
    }

    fn close(&self) {
        self.running.store(false, Ordering::Release);
        self.open.store(false, Ordering::Release);
        self.queue().close();
        let host = self
            .host
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        drop(host);
    }

    fn write(&self, samples: &[f32]) -> Result<usize, DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::LineClosed);
        }
        let pushed = self.queue().push_blocking(samples);
        if pushed < samples.len() {
            return Err(DeviceError::LineClosed);
        }
        Ok(pushed)
    }

    fn float_control(&self, kind: FloatControlKind) -> Option<Arc<dyn FloatControl>> {
        let control: Arc<dyn FloatControl> = match kind {
            FloatControlKind::Gain => self.gain.clone(),
            FloatControlKind::Pan => self.pan.clone(),
            FloatControlKind::Balance => self.balance.clone(),
        };
        Some(control)
    }

    fn mute_control(&self) -> Option<Arc<dyn BooleanControl>> {
        Some(self.mute.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_frame_duplicates_mono_and_averages_stereo() {
        let mut stereo = [0.0; 2];
        map_frame(&[0.5], &mut stereo, 1.0, 1.0);
        assert_eq!(stereo, [0.5, 0.5]);
        let mut mono = [0.0; 1];
        map_frame(&[0.2, 0.6], &mut mono, 1.0, 1.0);
        assert!((mono[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn map_frame_applies_side_gains() {
        let mut stereo = [0.0; 2];
        map_frame(&[1.0, 1.0], &mut stereo, 0.5, 0.25);
        assert_eq!(stereo, [0.5, 0.25]);
    }

    #[test]
    fn clip_render_follows_cursor_and_silences_at_end() {
        let shared = Arc::new(ClipShared {
            samples: Arc::new(vec![0.1, 0.2, 0.3]),
            channels: 1,
            cursor: Mutex::new(ClipCursor::new(3)),
            running: AtomicBool::new(true),
        });
        let mut render = ClipRender {
            shared: shared.clone(),
        };
        let mut out = [9.0; 8];
        render.render(&mut out, 2);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn line_render_is_silent_when_stopped_and_does_not_drain() {
        let queue = Arc::new(SampleQueue::new(1, 16));
        queue.push_blocking(&[0.5; 4]);
        let running = Arc::new(AtomicBool::new(false));
        let mut render = LineRender {
            queue: queue.clone(),
            running: running.clone(),
            controls: LineControls::default(),
            src_channels: 1,
            src: Vec::new(),
            pos: 0,
            underruns: Arc::new(AtomicUsize::new(0)),
            playout: Arc::new(Playout::default()),
        };
        let mut out = [1.0; 4];
        render.render(&mut out, 1);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(queue.len_frames(), 4);

        running.store(true, Ordering::Relaxed);
        let mut out = [0.0; 6];
        render.render(&mut out, 1);
        assert_eq!(out, [0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(render.underruns.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn line_render_tracks_frames_still_held_locally() {
        let queue = Arc::new(SampleQueue::new(1, 16));
        queue.push_blocking(&[0.5; 6]);
        let playout = Arc::new(Playout::default());
        playout.pending.store(3, Ordering::Release);
        let mut render = LineRender {
            queue: queue.clone(),
            running: Arc::new(AtomicBool::new(true)),
            controls: LineControls::default(),
            src_channels: 1,
            src: vec![0.1, 0.2, 0.3],
            pos: 0,
            underruns: Arc::new(AtomicUsize::new(0)),
            playout: playout.clone(),
        };
        let mut out = [0.0; 2];
        render.render(&mut out, 1);
        assert_eq!(out, [0.1, 0.2]);
        assert_eq!(playout.pending.load(Ordering::Acquire), 1);

        // last local frame, then a refill of four with one left over
        let mut out = [0.0; 4];
        render.render(&mut out, 1);
        assert_eq!(out, [0.3, 0.5, 0.5, 0.5]);
        assert_eq!(queue.len_frames(), 2);
        assert_eq!(playout.pending.load(Ordering::Acquire), 1);
        assert_eq!(playout.rendered.load(Ordering::Acquire), 6);
    }

    #[test]
    fn wait_for_playout_holds_until_device_buffers_pass() {
        let playout = Arc::new(Playout::default());
        playout.pending.store(64, Ordering::Release);
        let callback = {
            let playout = playout.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                playout.pending.store(0, Ordering::Release);
                for _ in 0..4 {
                    thread::sleep(Duration::from_millis(10));
                    playout.rendered.fetch_add(64, Ordering::AcqRel);
                }
            })
        };
        let started = Instant::now();
        wait_for_playout(&playout, 64, Duration::from_secs(5), || true);
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(playout.rendered.load(Ordering::Acquire) >= 128);
        callback.join().unwrap();
    }

    #[test]
    fn wait_for_playout_gives_up_when_stopped_or_stalled() {
        let playout = Playout::default();
        playout.pending.store(10, Ordering::Release);
        let started = Instant::now();
        wait_for_playout(&playout, 64, Duration::from_secs(5), || false);
        assert!(started.elapsed() < Duration::from_secs(1));

        playout.pending.store(0, Ordering::Release);
        let started = Instant::now();
        wait_for_playout(&playout, 64, Duration::from_millis(50), || true);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn default_buffer_size_assumes_a_tenth_of_a_second() {
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: 48_000,
            buffer_size: cpal::BufferSize::Default,
        };
        let buffer = DeviceBuffer::from_config(&config);
        assert_eq!(buffer.frames, 4_800);
        assert_eq!(buffer.period(), Duration::from_millis(100));

        let fixed = cpal::StreamConfig {
            buffer_size: cpal::BufferSize::Fixed(512),
            ..config
        };
        assert_eq!(DeviceBuffer::from_config(&fixed).frames, 512);
    }
}
