//! Thread-safe bounded queue behind every streaming output line.
//!
//! - copy task → [`SampleQueue::push_blocking`] (blocks while full: backpressure)
//! - device side drains with [`SampleQueue::pop`] (non-blocking from a CPAL callback)
//!
//! Closing is the only cancellation mechanism: a closed queue discards what it holds, wakes
//! every waiter, and rejects further pushes until it is reopened.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bounded queue of interleaved `f32` samples.
///
/// A single [`Condvar`] is the "state changed" signal; the `closed` flag lives under the
/// same mutex as the samples so waiters never miss a close.
pub struct SampleQueue {
    channels: usize,
    max_samples: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    low_watermark_ms: AtomicU64,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// Strategy for popping interleaved frames.
pub enum PopStrategy {
    /// Block until at least one frame is available, then return up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Return immediately with up to `max_frames`, or `None` if currently empty.
    NonBlocking { max_frames: usize },
}

impl SampleQueue {
    /// Queue holding at most `max_frames` frames of `channels` interleaved samples.
    pub fn new(channels: usize, max_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            max_samples: max_frames.max(1).saturating_mul(channels),
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_frames(&self) -> usize {
        self.max_samples / self.channels
    }

    /// Buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Discard buffered samples and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        g.samples.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Accept samples again after a close.
    pub fn reopen(&self) {
        let mut g = self.lock();
        g.closed = false;
        g.samples.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Drop buffered samples without closing.
    pub fn flush(&self) {
        self.lock().samples.clear();
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// Returns how many samples were accepted; fewer than `samples.len()` only when the queue
    /// was closed while waiting.
    pub fn push_blocking(&self, samples: &[f32]) -> usize {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.samples.len() >= self.max_samples && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(|err| err.into_inner());
            }
            if g.closed {
                return offset;
            }
            let room = self.max_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        offset
    }

    /// Pop whole interleaved frames. `None` when nothing is available (or closed and empty).
    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let (max_frames, blocking) = match strategy {
            PopStrategy::BlockingUpTo { max_frames } => (max_frames, true),
            PopStrategy::NonBlocking { max_frames } => (max_frames, false),
        };
        let mut g = self.lock();
        if blocking {
            while g.samples.len() < self.channels && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(|err| err.into_inner());
            }
        }
        let take_frames = (g.samples.len() / self.channels).min(max_frames);
        let take = take_frames * self.channels;
        if take == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..take).collect();
        let remaining = g.samples.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(remaining);
        Some(out)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_samples / 8).max(self.channels * 16);
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_samples = queued,
                    threshold_samples = threshold,
                    "line queue low watermark"
                );
            }
        }
    }

    /// Wait up to `timeout` for at least one frame. Returns `true` when data is available.
    pub fn wait_for_any(&self, timeout: Duration) -> bool {
        let g = self.lock();
        let (g, _timeout) = self
            .cv
            .wait_timeout_while(g, timeout, |inner| {
                inner.samples.len() < self.channels && !inner.closed
            })
            .unwrap_or_else(|err| err.into_inner());
        g.samples.len() >= self.channels
    }

    /// Block until the queue is empty, closed, or `cancel` returns `true`.
    ///
    /// Returns `true` when the queue drained to empty.
    pub fn wait_until_drained(&self, cancel: impl Fn() -> bool) -> bool {
        let mut g = self.lock();
        loop {
            if g.samples.is_empty() {
                return true;
            }
            if g.closed || cancel() {
                return false;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, Duration::from_millis(20))
                .unwrap_or_else(|err| err.into_inner());
            g = ng;
        }
    }
}
