//! In-process provider backed by memory.
//!
//! Used by the test suites and by `enginectl --backend memory`. Sources are registered up
//! front as PCM sample vectors. Decoded buffers advance a [`ClipCursor`] from a wall clock
//! (optionally sped up or frozen). Output lines hand written samples to a consumer thread
//! that drains them while the line runs, so `write` keeps its blocking backpressure.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use audio_engine_types::{AudioFormat, MixerInfo};

use crate::clip::{ClipCursor, LoopCount, LoopRegion};
use crate::error::DeviceError;
use crate::provider::{
    AtomicBooleanControl, AtomicFloatControl, AudioProvider, BooleanControl, DecodedBuffer,
    FloatControl, FloatControlKind, OutputLine, SampleStream,
};
use crate::queue::{PopStrategy, SampleQueue};
use crate::source::{SourceLocation, normalize_source};

/// Provider operations recorded for inspection.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderCall {
    AllocateDecodedBuffer,
    OpenInputStream(String),
    OpenOutputLine(AudioFormat),
    Start,
    /// `count` is `None` for a continuous loop.
    StartLooping {
        start: u64,
        end: Option<u64>,
        count: Option<u32>,
    },
    CancelLoop,
}

type CallLog = Arc<Mutex<Vec<ProviderCall>>>;

fn record(log: &CallLog, call: ProviderCall) {
    log.lock().unwrap_or_else(|err| err.into_inner()).push(call);
}

#[derive(Clone)]
struct MemorySource {
    format: AudioFormat,
    samples: Arc<Vec<f32>>,
}

pub struct MemoryProvider {
    mixers: Vec<MixerInfo>,
    sources: RwLock<HashMap<String, MemorySource>>,
    buffer_speed: f64,
    realtime_lines: bool,
    line_controls: bool,
    fail_buffers: bool,
    fail_lines: bool,
    max_channels: u16,
    report_lengths: bool,
    calls: CallLog,
    lines: Mutex<Vec<Arc<MemoryLine>>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// One output mixer (8-192 kHz, up to 8 channels), real-time clocks, all controls.
    pub fn new() -> Self {
        Self {
            mixers: vec![MixerInfo {
                id: "memory".to_string(),
                name: "Memory Output".to_string(),
                min_rate: 8_000,
                max_rate: 192_000,
                supports_output: true,
            }],
            sources: RwLock::new(HashMap::new()),
            buffer_speed: 1.0,
            realtime_lines: true,
            line_controls: true,
            fail_buffers: false,
            fail_lines: false,
            max_channels: 8,
            report_lengths: true,
            calls: Arc::new(Mutex::new(Vec::new())),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mixers(mut self, mixers: Vec<MixerInfo>) -> Self {
        self.mixers = mixers;
        self
    }

    /// Playback speed of decoded buffers relative to real time; `0.0` freezes them.
    pub fn with_buffer_clock(mut self, speed: f64) -> Self {
        self.buffer_speed = speed.max(0.0);
        self
    }

    /// Real-time lines consume about one millisecond of audio per millisecond; otherwise
    /// they drain as fast as samples arrive.
    pub fn with_realtime_lines(mut self, realtime: bool) -> Self {
        self.realtime_lines = realtime;
        self
    }

    pub fn without_line_controls(mut self) -> Self {
        self.line_controls = false;
        self
    }

    pub fn fail_decoded_buffers(mut self) -> Self {
        self.fail_buffers = true;
        self
    }

    pub fn fail_output_lines(mut self) -> Self {
        self.fail_lines = true;
        self
    }

    pub fn with_max_channels(mut self, channels: u16) -> Self {
        self.max_channels = channels;
        self
    }

    /// Input streams report no frame length, like containers without a frame count.
    pub fn without_stream_lengths(mut self) -> Self {
        self.report_lengths = false;
        self
    }

    fn key(path: &str) -> String {
        normalize_source(path)
            .map(|s| s.display_path())
            .unwrap_or_else(|_| path.to_string())
    }

    /// Register interleaved samples under `path`.
    pub fn insert_source(&self, path: &str, format: AudioFormat, samples: Vec<f32>) {
        self.sources
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .insert(
                Self::key(path),
                MemorySource {
                    format,
                    samples: Arc::new(samples),
                },
            );
    }

    /// Register a sine tone of `seconds` at `freq_hz` under `path`.
    pub fn insert_tone(&self, path: &str, format: AudioFormat, seconds: f32, freq_hz: f32) {
        let frames = (seconds * format.sample_rate as f32).round() as usize;
        let channels = usize::from(format.channels.max(1));
        let mut samples = Vec::with_capacity(frames * channels);
        for n in 0..frames {
            let v = 0.25 * (TAU * freq_hz * n as f32 / format.sample_rate as f32).sin();
            samples.extend(std::iter::repeat_n(v, channels));
        }
        self.insert_source(path, format, samples);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Most recently opened output line.
    pub fn last_line(&self) -> Option<Arc<MemoryLine>> {
        self.lines
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .last()
            .cloned()
    }
}

impl AudioProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn mixers(&self) -> Result<Vec<MixerInfo>, DeviceError> {
        Ok(self.mixers.clone())
    }

    fn is_format_supported_for_output(&self, format: &AudioFormat) -> bool {
        format.channels >= 1
            && format.channels <= self.max_channels
            && self.mixers.iter().any(|m| {
                m.supports_output
                    && format.sample_rate >= m.min_rate
                    && format.sample_rate <= m.max_rate
            })
    }

    fn allocate_decoded_buffer(&self) -> Result<Box<dyn DecodedBuffer>, DeviceError> {
        if self.fail_buffers {
            return Err(DeviceError::NoLine(
                "memory provider has no decoded buffer support".to_string(),
            ));
        }
        record(&self.calls, ProviderCall::AllocateDecodedBuffer);
        Ok(Box::new(MemoryBuffer::new(
            self.calls.clone(),
            self.buffer_speed,
        )))
    }

    fn open_input_stream(
        &self,
        source: &SourceLocation,
    ) -> Result<Box<dyn SampleStream>, DeviceError> {
        let key = source.display_path();
        record(&self.calls, ProviderCall::OpenInputStream(key.clone()));
        let found = self
            .sources
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(&key)
            .cloned();
        match (found, source) {
            (Some(src), _) => Ok(Box::new(MemoryStream {
                format: src.format,
                samples: src.samples,
                pos: 0,
                report_length: self.report_lengths,
            })),
            (None, SourceLocation::Url(url)) => Err(DeviceError::UnsupportedSource(url.clone())),
            (None, SourceLocation::File(_)) => Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no memory source registered for {key}"),
            ))),
        }
    }

    fn open_output_line(&self, format: AudioFormat) -> Result<Arc<dyn OutputLine>, DeviceError> {
        if self.fail_lines {
            return Err(DeviceError::NoLine(
                "memory provider has no output lines".to_string(),
            ));
        }
        if !self.is_format_supported_for_output(&format) {
            return Err(DeviceError::UnsupportedFormat(format.to_string()));
        }
        record(&self.calls, ProviderCall::OpenOutputLine(format));
        let line = Arc::new(MemoryLine::new(format, self.realtime_lines, self.line_controls));
        self.lines
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(line.clone());
        Ok(line)
    }
}

struct MemoryStream {
    format: AudioFormat,
    samples: Arc<Vec<f32>>,
    pos: usize,
    report_length: bool,
}

impl SampleStream for MemoryStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frame_length(&self) -> Option<u64> {
        self.report_length
            .then(|| (self.samples.len() / usize::from(self.format.channels.max(1))) as u64)
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize, DeviceError> {
        let channels = usize::from(self.format.channels.max(1));
        let want = out.len() / channels * channels;
        let n = want.min(self.samples.len() - self.pos);
        out[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Decoded buffer whose cursor follows a (scaled) wall clock while running.
struct MemoryBuffer {
    calls: CallLog,
    speed: f64,
    format: Option<AudioFormat>,
    open: bool,
    cursor: ClipCursor,
    started_at: Option<Instant>,
}

impl MemoryBuffer {
    fn new(calls: CallLog, speed: f64) -> Self {
        Self {
            calls,
            speed,
            format: None,
            open: false,
            cursor: ClipCursor::default(),
            started_at: None,
        }
    }

    fn projected(&self) -> ClipCursor {
        let mut cursor = self.cursor.clone();
        if let (Some(started), Some(format)) = (self.started_at, self.format) {
            let frames =
                started.elapsed().as_secs_f64() * f64::from(format.sample_rate) * self.speed;
            cursor.advance(frames as u64);
        }
        cursor
    }

    fn sync(&mut self) {
        self.cursor = self.projected();
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }
}

impl DecodedBuffer for MemoryBuffer {
    fn open(&mut self, stream: &mut dyn SampleStream) -> Result<(), DeviceError> {
        let format = stream.format();
        let channels = usize::from(format.channels.max(1));
        let mut chunk = vec![0f32; 4096 * channels];
        let mut frames = 0u64;
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            frames += (n / channels) as u64;
        }
        self.format = Some(format);
        self.cursor = ClipCursor::new(frames);
        self.started_at = None;
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn is_running(&self) -> bool {
        self.started_at.is_some() && !self.projected().is_finished()
    }

    fn start(&mut self) {
        record(&self.calls, ProviderCall::Start);
        self.sync();
        self.started_at = Some(Instant::now());
    }

    fn start_looping(&mut self, region: LoopRegion, count: LoopCount) {
        record(
            &self.calls,
            ProviderCall::StartLooping {
                start: region.start,
                end: region.end,
                count: match count {
                    LoopCount::Times(n) => Some(n),
                    LoopCount::Continuously => None,
                },
            },
        );
        self.sync();
        self.cursor.set_loop(region, count);
        self.started_at = Some(Instant::now());
    }

    fn cancel_loop(&mut self) {
        record(&self.calls, ProviderCall::CancelLoop);
        self.sync();
        self.cursor.cancel_loop();
    }

    fn stop(&mut self) {
        self.cursor = self.projected();
        self.started_at = None;
    }

    fn flush(&mut self) {}

    fn close(&mut self) {
        self.stop();
        self.cursor = ClipCursor::default();
        self.open = false;
    }

    fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn frame_length(&self) -> u64 {
        self.cursor.length()
    }

    fn frame_position(&self) -> u64 {
        self.projected().position()
    }

    fn set_frame_position(&mut self, frame: u64) {
        self.sync();
        self.cursor.set_position(frame);
    }
}

/// Output line whose "device" is a consumer thread draining a [`SampleQueue`].
pub struct MemoryLine {
    format: AudioFormat,
    realtime: bool,
    queue: RwLock<Arc<SampleQueue>>,
    open: AtomicBool,
    running: Arc<AtomicBool>,
    written: AtomicU64,
    consumed: Arc<AtomicU64>,
    opens: AtomicUsize,
    gain: Option<Arc<AtomicFloatControl>>,
    pan: Option<Arc<AtomicFloatControl>>,
    balance: Option<Arc<AtomicFloatControl>>,
    mute: Option<Arc<AtomicBooleanControl>>,
}

impl MemoryLine {
    fn new(format: AudioFormat, realtime: bool, controls: bool) -> Self {
        let closed = SampleQueue::new(usize::from(format.channels), 1);
        closed.close();
        Self {
            format,
            realtime,
            queue: RwLock::new(Arc::new(closed)),
            open: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            written: AtomicU64::new(0),
            consumed: Arc::new(AtomicU64::new(0)),
            opens: AtomicUsize::new(0),
            gain: controls.then(|| Arc::new(AtomicFloatControl::gain())),
            pan: controls.then(|| Arc::new(AtomicFloatControl::pan())),
            balance: controls.then(|| Arc::new(AtomicFloatControl::balance())),
            mute: controls.then(|| Arc::new(AtomicBooleanControl::default())),
        }
    }

    fn queue(&self) -> Arc<SampleQueue> {
        self.queue
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Samples accepted by `write`.
    pub fn written_samples(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Samples the consumer thread has taken off the queue.
    pub fn consumed_samples(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

fn consume(
    queue: Arc<SampleQueue>,
    running: Arc<AtomicBool>,
    consumed: Arc<AtomicU64>,
    format: AudioFormat,
    realtime: bool,
) {
    let per_ms = (format.sample_rate as usize / 1000).max(1);
    while !queue.is_closed() {
        if !running.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        if !queue.wait_for_any(Duration::from_millis(5)) {
            continue;
        }
        let max_frames = if realtime { per_ms } else { usize::MAX };
        if let Some(chunk) = queue.pop(PopStrategy::NonBlocking { max_frames }) {
            consumed.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
        if realtime {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl OutputLine for MemoryLine {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&self, buffer_frames: usize) -> Result<(), DeviceError> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let queue = Arc::new(SampleQueue::new(
            usize::from(self.format.channels),
            buffer_frames,
        ));
        *self.queue.write().unwrap_or_else(|err| err.into_inner()) = queue.clone();
        self.opens.fetch_add(1, Ordering::Relaxed);
        let running = self.running.clone();
        let consumed = self.consumed.clone();
        let format = self.format;
        let realtime = self.realtime;
        let spawned = thread::Builder::new()
            .name("memory-line".to_string())
            .spawn(move || consume(queue, running, consumed, format, realtime));
        if let Err(err) = spawned {
            self.open.store(false, Ordering::Release);
            return Err(DeviceError::Io(err));
        }
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
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn drain(&self) {
        self.queue()
            .wait_until_drained(|| !self.running.load(Ordering::Acquire));
    }

    fn flush(&self) {
        self.queue().flush();
    }

    fn close(&self) {
        self.running.store(false, Ordering::Release);
        self.open.store(false, Ordering::Release);
        self.queue().close();
    }

    fn write(&self, samples: &[f32]) -> Result<usize, DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::LineClosed);
        }
        let pushed = self.queue().push_blocking(samples);
        self.written.fetch_add(pushed as u64, Ordering::Relaxed);
        if pushed < samples.len() {
            return Err(DeviceError::LineClosed);
        }
        Ok(pushed)
    }

    fn float_control(&self, kind: FloatControlKind) -> Option<Arc<dyn FloatControl>> {
        let control = match kind {
            FloatControlKind::Gain => self.gain.clone(),
            FloatControlKind::Pan => self.pan.clone(),
            FloatControlKind::Balance => self.balance.clone(),
        };
        control.map(|c| c as Arc<dyn FloatControl>)
    }

    fn mute_control(&self) -> Option<Arc<dyn BooleanControl>> {
        self.mute.clone().map(|c| c as Arc<dyn BooleanControl>)
    }
}

impl Drop for MemoryLine {
    fn drop(&mut self) {
        // lets the consumer thread exit
        self.queue().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(path: &str) -> SourceLocation {
        normalize_source(path).unwrap_or_else(|_| SourceLocation::File(PathBuf::from(path)))
    }

    #[test]
    fn streams_registered_samples_in_whole_frames() {
        let p = MemoryProvider::new();
        p.insert_source("/mem/x.wav", AudioFormat::new(8_000, 2), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut s = p.open_input_stream(&file("/mem/x.wav")).unwrap();
        assert_eq!(s.frame_length(), Some(3));
        let mut buf = [0f32; 5];
        assert_eq!(s.read(&mut buf).unwrap(), 4);
        assert_eq!(s.read(&mut buf).unwrap(), 2);
        assert_eq!(s.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn unknown_sources_fail() {
        let p = MemoryProvider::new();
        assert!(matches!(
            p.open_input_stream(&file("/mem/none.wav")),
            Err(DeviceError::Io(_))
        ));
        assert!(matches!(
            p.open_input_stream(&SourceLocation::Url("http://x/y.mp3".to_string())),
            Err(DeviceError::UnsupportedSource(_))
        ));
    }

    #[test]
    fn frozen_buffer_holds_position() {
        let p = MemoryProvider::new().with_buffer_clock(0.0);
        p.insert_tone("/mem/t.wav", AudioFormat::new(1_000, 1), 1.0, 100.0);
        let mut b = p.allocate_decoded_buffer().unwrap();
        let mut s = p.open_input_stream(&file("/mem/t.wav")).unwrap();
        b.open(s.as_mut()).unwrap();
        assert_eq!(b.frame_length(), 1_000);
        b.set_frame_position(500);
        b.start();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(b.frame_position(), 500);
        assert!(b.is_running());
        assert_eq!(b.microsecond_position(), 500_000);
    }

    #[test]
    fn line_write_blocks_until_started() {
        let p = MemoryProvider::new().with_realtime_lines(false);
        let line = p.open_output_line(AudioFormat::new(8_000, 1)).unwrap();
        line.open(4).unwrap();
        assert_eq!(line.write(&[0.1; 4]).unwrap(), 4);
        let writer = line.clone();
        let handle = thread::spawn(move || writer.write(&[0.2; 4]));
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        line.start();
        assert_eq!(handle.join().unwrap().unwrap(), 4);
        line.drain();
        let recorded = p.last_line().unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while recorded.consumed_samples() < 8 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(recorded.consumed_samples(), 8);
    }

    #[test]
    fn close_unblocks_writer_with_line_closed() {
        let p = MemoryProvider::new();
        let line = p.open_output_line(AudioFormat::new(8_000, 1)).unwrap();
        line.open(2).unwrap();
        let writer = line.clone();
        let handle = thread::spawn(move || writer.write(&[0.1; 8]));
        thread::sleep(Duration::from_millis(20));
        line.close();
        assert!(matches!(handle.join().unwrap(), Err(DeviceError::LineClosed)));
        assert!(matches!(line.write(&[0.0]), Err(DeviceError::LineClosed)));
    }

    #[test]
    fn lines_reopen_after_close() {
        let p = MemoryProvider::new();
        let line = p.open_output_line(AudioFormat::new(8_000, 1)).unwrap();
        line.open(16).unwrap();
        line.close();
        line.open(16).unwrap();
        assert!(line.is_open());
        assert_eq!(p.last_line().unwrap().open_count(), 2);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let p = MemoryProvider::new().with_max_channels(2);
        assert!(!p.is_format_supported_for_output(&AudioFormat::new(44_100, 6)));
        assert!(!p.is_format_supported_for_output(&AudioFormat::new(4_000, 1)));
        assert!(matches!(
            p.open_output_line(AudioFormat::new(44_100, 6)),
            Err(DeviceError::UnsupportedFormat(_))
        ));
    }
}
