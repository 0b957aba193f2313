//! Platform audio provider contract.
//!
//! The engine never talks to hardware directly. A provider enumerates mixers, reports format
//! support, opens sample streams for a [`SourceLocation`], and allocates the two kinds of
//! device resources the playback strategies drive:
//! - [`DecodedBuffer`]: whole sound in memory, seekable, loopable.
//! - [`OutputLine`]: incrementally written line whose `write` blocks while the device is full.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use audio_engine_types::{AudioFormat, MixerInfo};

use crate::clip::{LoopCount, LoopRegion};
use crate::error::DeviceError;
use crate::source::SourceLocation;

/// Pull-based source of interleaved `f32` samples.
pub trait SampleStream: Send {
    fn format(&self) -> AudioFormat;

    /// Total frames when the source knows its length up front.
    fn frame_length(&self) -> Option<u64>;

    /// Fill `out` with interleaved samples; returns the number written, `0` at end of data.
    fn read(&mut self, out: &mut [f32]) -> Result<usize, DeviceError>;
}

/// Fully decoded, randomly seekable playback resource.
pub trait DecodedBuffer: Send {
    /// Decode all of `stream` into the buffer and acquire the device.
    fn open(&mut self, stream: &mut dyn SampleStream) -> Result<(), DeviceError>;
    fn is_open(&self) -> bool;
    /// `true` while the buffer is producing sound.
    fn is_running(&self) -> bool;
    fn start(&mut self);
    fn start_looping(&mut self, region: LoopRegion, count: LoopCount);
    /// Let the current pass finish without wrapping again.
    fn cancel_loop(&mut self);
    fn stop(&mut self);
    fn flush(&mut self);
    fn close(&mut self);
    fn format(&self) -> Option<AudioFormat>;
    fn frame_length(&self) -> u64;
    fn frame_position(&self) -> u64;
    fn set_frame_position(&mut self, frame: u64);

    fn microsecond_position(&self) -> u64 {
        self.format()
            .map(|f| f.frames_to_micros(self.frame_position()))
            .unwrap_or(0)
    }

    fn set_microsecond_position(&mut self, micros: u64) {
        if let Some(format) = self.format() {
            let frame = format.micros_to_frames(micros).min(self.frame_length());
            self.set_frame_position(frame);
        }
    }
}

/// Passthrough float controls a line may expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatControlKind {
    /// Master gain in decibels.
    Gain,
    /// Stereo position of a mono signal, `-1.0..=1.0`.
    Pan,
    /// Left/right balance of a stereo signal, `-1.0..=1.0`.
    Balance,
}

impl std::fmt::Display for FloatControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FloatControlKind::Gain => "gain",
            FloatControlKind::Pan => "pan",
            FloatControlKind::Balance => "balance",
        };
        f.write_str(name)
    }
}

pub trait FloatControl: Send + Sync {
    fn kind(&self) -> FloatControlKind;
    fn minimum(&self) -> f32;
    fn maximum(&self) -> f32;
    fn value(&self) -> f32;
    fn set_value(&self, value: f32);
}

pub trait BooleanControl: Send + Sync {
    fn value(&self) -> bool;
    fn set_value(&self, value: bool);
}

/// Float control backed by an atomic, read lock-free by output callbacks.
#[derive(Debug)]
pub struct AtomicFloatControl {
    kind: FloatControlKind,
    min: f32,
    max: f32,
    bits: AtomicU32,
}

impl AtomicFloatControl {
    pub fn new(kind: FloatControlKind, min: f32, max: f32, initial: f32) -> Self {
        Self {
            kind,
            min,
            max,
            bits: AtomicU32::new(initial.clamp(min, max).to_bits()),
        }
    }

    /// Gain control in dB (`-80.0..=6.0`, unity at `0.0`).
    pub fn gain() -> Self {
        Self::new(FloatControlKind::Gain, -80.0, 6.0, 0.0)
    }

    pub fn pan() -> Self {
        Self::new(FloatControlKind::Pan, -1.0, 1.0, 0.0)
    }

    pub fn balance() -> Self {
        Self::new(FloatControlKind::Balance, -1.0, 1.0, 0.0)
    }
}

impl FloatControl for AtomicFloatControl {
    fn kind(&self) -> FloatControlKind {
        self.kind
    }

    fn minimum(&self) -> f32 {
        self.min
    }

    fn maximum(&self) -> f32 {
        self.max
    }

    fn value(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set_value(&self, value: f32) {
        self.bits
            .store(value.clamp(self.min, self.max).to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct AtomicBooleanControl {
    value: AtomicBool,
}

impl BooleanControl for AtomicBooleanControl {
    fn value(&self) -> bool {
        self.value.load(Ordering::Relaxed)
    }

    fn set_value(&self, value: bool) {
        self.value.store(value, Ordering::Relaxed);
    }
}

/// Controls a line exposes, as queried once when a streaming resource initializes.
#[derive(Clone, Default)]
pub struct LineControls {
    pub gain: Option<Arc<dyn FloatControl>>,
    pub pan: Option<Arc<dyn FloatControl>>,
    pub balance: Option<Arc<dyn FloatControl>>,
    pub mute: Option<Arc<dyn BooleanControl>>,
}

impl LineControls {
    pub fn query(line: &dyn OutputLine) -> Self {
        Self {
            gain: line.float_control(FloatControlKind::Gain),
            pan: line.float_control(FloatControlKind::Pan),
            balance: line.float_control(FloatControlKind::Balance),
            mute: line.mute_control(),
        }
    }

    pub fn float(&self, kind: FloatControlKind) -> Option<&Arc<dyn FloatControl>> {
        match kind {
            FloatControlKind::Gain => self.gain.as_ref(),
            FloatControlKind::Pan => self.pan.as_ref(),
            FloatControlKind::Balance => self.balance.as_ref(),
        }
    }
}

/// Linear left/right multipliers for the current gain, mute, pan, and balance values.
///
/// Pan applies to mono sources, balance to stereo ones; both attenuate the opposite side.
pub fn channel_gains(controls: &LineControls, channels: u16) -> (f32, f32) {
    if controls.mute.as_ref().is_some_and(|m| m.value()) {
        return (0.0, 0.0);
    }
    let linear = controls
        .gain
        .as_ref()
        .map(|g| 10f32.powf(g.value() / 20.0))
        .unwrap_or(1.0);
    let position = if channels == 1 {
        controls.pan.as_ref().map(|p| p.value())
    } else {
        controls.balance.as_ref().map(|b| b.value())
    }
    .unwrap_or(0.0);
    let left = if position > 0.0 { 1.0 - position } else { 1.0 };
    let right = if position < 0.0 { 1.0 + position } else { 1.0 };
    (linear * left, linear * right)
}

/// Streaming output line. All methods take `&self`: a copy task writes while the owning
/// resource starts, stops, and closes the line from other threads.
pub trait OutputLine: Send + Sync {
    fn format(&self) -> AudioFormat;
    /// Acquire the device with room for `buffer_frames` frames. Reopening after close is allowed.
    fn open(&self, buffer_frames: usize) -> Result<(), DeviceError>;
    fn is_open(&self) -> bool;
    fn is_running(&self) -> bool;
    fn start(&self);
    fn stop(&self);
    /// Block until every written sample was consumed, or the line stopped or closed.
    fn drain(&self);
    /// Discard samples written but not yet consumed.
    fn flush(&self);
    fn close(&self);
    /// Write interleaved samples, blocking while the line is full.
    ///
    /// Returns [`DeviceError::LineClosed`] once the line is closed.
    fn write(&self, samples: &[f32]) -> Result<usize, DeviceError>;
    fn float_control(&self, kind: FloatControlKind) -> Option<Arc<dyn FloatControl>>;
    fn mute_control(&self) -> Option<Arc<dyn BooleanControl>>;
}

/// The platform audio provider consumed by the registry.
pub trait AudioProvider: Send + Sync {
    fn name(&self) -> &str;
    fn mixers(&self) -> Result<Vec<MixerInfo>, DeviceError>;
    fn is_format_supported_for_output(&self, format: &AudioFormat) -> bool;
    fn allocate_decoded_buffer(&self) -> Result<Box<dyn DecodedBuffer>, DeviceError>;
    fn open_input_stream(
        &self,
        source: &SourceLocation,
    ) -> Result<Box<dyn SampleStream>, DeviceError>;
    fn open_output_line(&self, format: AudioFormat) -> Result<Arc<dyn OutputLine>, DeviceError>;
}
