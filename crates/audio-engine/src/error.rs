//! Engine error types.
//!
//! Two layers:
//! - [`DeviceError`]: what a platform provider reports (no line, bad format, I/O).
//! - [`EngineError`]: what engine callers see. Provider failures are wrapped once, at the
//!   point of construction, into [`EngineError::Fatal`] together with the resource path and
//!   the operation that was being attempted.

use audio_engine_types::{DeviceEventKind, PlaybackState};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure reported by a platform audio provider or one of its handles.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No decoded buffer / output line can be allocated (no hardware or driver support).
    #[error("no output line available: {0}")]
    NoLine(String),

    /// The source or requested output format is not supported.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The provider cannot open this kind of source (for example an `http:` URL).
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// The line was closed while a write was pending or before it started.
    #[error("line is closed")]
    LineClosed,

    /// I/O failure while opening or reading a source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure (stream build/play errors).
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by engine resources and the registry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unrecoverable failure: the operation that triggered it is aborted.
    #[error("{operation} failed for {path}")]
    Fatal {
        operation: &'static str,
        path: String,
        #[source]
        source: DeviceError,
    },

    /// Argument contract violation (loop bounds, loop counts, control ranges).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A raw device event arrived that cannot happen for the resource's state history.
    #[error("invalid state for {kind} event (previous: {previous}, current: {current})")]
    InvalidState {
        kind: DeviceEventKind,
        previous: PlaybackState,
        current: PlaybackState,
    },
}

impl EngineError {
    pub(crate) fn fatal(
        operation: &'static str,
        path: impl Into<String>,
        source: DeviceError,
    ) -> Self {
        EngineError::Fatal {
            operation,
            path: path.into(),
            source,
        }
    }

    /// `true` for load/device failures the host should treat as startup problems.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal { .. })
    }
}
