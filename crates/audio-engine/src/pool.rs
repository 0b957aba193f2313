//! Shared pool of copy workers for streaming resources.
//!
//! Each streaming `play()` submits one long-running job. Jobs run on named threads fed by a
//! crossbeam queue; when every worker is busy a new one is spawned, so a long stream never
//! starves a later one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::error::DeviceError;

type Job = Box<dyn FnOnce(&WorkerContext) + Send + 'static>;

struct PoolShared {
    shutdown: AtomicBool,
    idle: AtomicUsize,
    spawned: AtomicUsize,
}

/// Handed to every job so it can observe pool shutdown.
pub struct WorkerContext {
    shared: Arc<PoolShared>,
}

impl WorkerContext {
    /// `true` once the pool was dropped; a running job treats this as a stop request.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }
}

pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    rx: Receiver<Job>,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.worker_count())
            .field("idle", &self.shared.idle.load(Ordering::Relaxed))
            .finish()
    }
}

impl WorkerPool {
    /// Pool with `initial` workers started eagerly.
    pub fn new(initial: usize) -> Result<Self, DeviceError> {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let pool = Self {
            tx: Some(tx),
            rx,
            shared: Arc::new(PoolShared {
                shutdown: AtomicBool::new(false),
                idle: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        };
        for _ in 0..initial {
            pool.spawn_worker()?;
        }
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.shared.spawned.load(Ordering::Relaxed)
    }

    /// Queue `job`, growing the pool when no worker is free to pick it up.
    pub fn submit<F>(&self, job: F) -> Result<(), DeviceError>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| DeviceError::Backend("worker pool is shut down".to_string()))?;
        if self.rx.len() >= self.shared.idle.load(Ordering::Acquire) {
            self.spawn_worker()?;
        }
        tx.send(Box::new(job))
            .map_err(|_| DeviceError::Backend("worker pool is shut down".to_string()))
    }

    fn spawn_worker(&self) -> Result<(), DeviceError> {
        let index = self.shared.spawned.fetch_add(1, Ordering::Relaxed);
        let rx = self.rx.clone();
        let ctx = WorkerContext {
            shared: self.shared.clone(),
        };
        // count the worker idle before it exists so back-to-back submits do not over-spawn
        self.shared.idle.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(format!("audio-copy-{index}"))
            .spawn(move || worker_loop(rx, ctx));
        if let Err(err) = spawned {
            self.shared.idle.fetch_sub(1, Ordering::AcqRel);
            self.shared.spawned.fetch_sub(1, Ordering::Relaxed);
            return Err(DeviceError::Io(err));
        }
        tracing::debug!(worker = index, "copy worker started");
        Ok(())
    }
}

fn worker_loop(rx: Receiver<Job>, ctx: WorkerContext) {
    while let Ok(job) = rx.recv() {
        ctx.shared.idle.fetch_sub(1, Ordering::AcqRel);
        job(&ctx);
        ctx.shared.idle.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // Workers exit once the queue disconnects; running jobs see the shutdown flag.
        self.tx.take();
    }
}
