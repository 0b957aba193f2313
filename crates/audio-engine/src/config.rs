use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine tuning parameters shared by the registry, resources, and the copy workers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames read from a source and written to a streaming line per copy step.
    pub stream_chunk_frames: usize,
    /// Capacity of a streaming output line in frames.
    pub line_buffer_frames: usize,
    /// Upper bound on how long a paused copy task sleeps before re-checking state.
    pub pause_poll_ms: u64,
    /// Copy workers started eagerly; the pool grows past this when all are busy.
    pub worker_threads: usize,
    /// Output device substring (hardware provider only).
    pub device: Option<String>,
}

impl Default for EngineConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            stream_chunk_frames: 1024,
            line_buffer_frames: 8192,
            pause_poll_ms: 10,
            worker_threads: 2,
            device: None,
        }
    }
}

impl EngineConfig {
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    /// Chunk size clamped so it always fits into the line buffer.
    pub fn effective_chunk_frames(&self) -> usize {
        let line = self.line_buffer_frames.max(1);
        self.stream_chunk_frames.clamp(1, line)
    }
}
