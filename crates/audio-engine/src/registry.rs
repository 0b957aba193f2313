//! Registry of loaded resources.
//!
//! Chooses the playback strategy at load time, wraps every provider failure into a single
//! fatal error naming the operation and the path, and routes bus events back to the channel
//! of the resource that produced them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use audio_engine_types::{AudioFormat, ResourceId};

use crate::buffered::BufferedAudio;
use crate::config::EngineConfig;
use crate::error::{DeviceError, EngineError, Result};
use crate::events::{EventBus, EventRouter};
use crate::pool::WorkerPool;
use crate::provider::{AudioProvider, DecodedBuffer, OutputLine, SampleStream};
use crate::resource::{AudioResource, ResourceCore};
use crate::source::{SourceLocation, normalize_source};
use crate::streaming::StreamingAudio;

/// A loaded resource of either strategy.
#[derive(Clone, Debug)]
pub enum LoadedResource {
    Buffered(Arc<BufferedAudio>),
    Streaming(Arc<StreamingAudio>),
}

impl LoadedResource {
    fn inner(&self) -> &dyn AudioResource {
        match self {
            LoadedResource::Buffered(audio) => audio.as_ref(),
            LoadedResource::Streaming(audio) => audio.as_ref(),
        }
    }

    pub fn as_buffered(&self) -> Option<&Arc<BufferedAudio>> {
        match self {
            LoadedResource::Buffered(audio) => Some(audio),
            LoadedResource::Streaming(_) => None,
        }
    }

    pub fn as_streaming(&self) -> Option<&Arc<StreamingAudio>> {
        match self {
            LoadedResource::Streaming(audio) => Some(audio),
            LoadedResource::Buffered(_) => None,
        }
    }

    /// `true` while sound is being produced (buffered) or a copy task runs (streaming).
    pub fn is_active(&self) -> bool {
        match self {
            LoadedResource::Buffered(audio) => audio.is_active(),
            LoadedResource::Streaming(audio) => audio.is_active(),
        }
    }
}

impl AudioResource for LoadedResource {
    fn core(&self) -> &Arc<ResourceCore> {
        match self {
            LoadedResource::Buffered(audio) => audio.core(),
            LoadedResource::Streaming(audio) => audio.core(),
        }
    }

    fn is_open(&self) -> bool {
        self.inner().is_open()
    }

    fn play(&self) -> Result<()> {
        self.inner().play()
    }

    fn pause(&self) {
        self.inner().pause();
    }

    fn resume(&self) {
        self.inner().resume();
    }

    fn stop(&self) {
        self.inner().stop();
    }
}

/// `true` when any mixer the provider reports accepts sample output.
pub fn is_output_supported(provider: &dyn AudioProvider) -> bool {
    match provider.mixers() {
        Ok(mixers) => mixers.iter().any(|m| m.supports_output),
        Err(err) => {
            tracing::warn!(provider = provider.name(), error = %err, "mixer enumeration failed");
            false
        }
    }
}

pub struct AudioRegistry {
    provider: Arc<dyn AudioProvider>,
    bus: EventBus,
    router: Arc<EventRouter>,
    pool: Arc<WorkerPool>,
    config: EngineConfig,
    buffered: RwLock<HashMap<ResourceId, Arc<BufferedAudio>>>,
    streaming: RwLock<HashMap<ResourceId, Arc<StreamingAudio>>>,
}

impl std::fmt::Debug for AudioRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRegistry")
            .field("provider", &self.provider.name())
            .field("resources", &self.len())
            .finish()
    }
}

impl AudioRegistry {
    pub fn new(provider: Arc<dyn AudioProvider>, config: EngineConfig) -> Result<Self> {
        Self::with_bus(provider, config, EventBus::new())
    }

    /// Registry publishing onto an existing bus.
    pub fn with_bus(
        provider: Arc<dyn AudioProvider>,
        config: EngineConfig,
        bus: EventBus,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads)
            .map_err(|err| EngineError::fatal("start copy workers", "worker pool", err))?;
        let router = Arc::new(EventRouter::new());
        bus.add_listener(router.clone());
        tracing::info!(
            provider = provider.name(),
            workers = config.worker_threads,
            "audio registry ready"
        );
        Ok(Self {
            provider,
            bus,
            router,
            pool: Arc::new(pool),
            config,
            buffered: RwLock::new(HashMap::new()),
            streaming: RwLock::new(HashMap::new()),
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn provider(&self) -> &Arc<dyn AudioProvider> {
        &self.provider
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn output_supported(&self) -> bool {
        is_output_supported(self.provider.as_ref())
    }

    /// Load `source` fully into a decoded buffer.
    pub fn load_buffered(&self, source: &str) -> Result<Arc<BufferedAudio>> {
        let location = normalize_source(source)?;
        let path = location.display_path();
        let buffer = self.safe_allocate_buffer(&path)?;
        let stream = self.safe_open_stream(&location)?;
        let core = Arc::new(ResourceCore::new(location, self.bus.clone()));
        let audio = Arc::new(BufferedAudio::new(
            core.clone(),
            self.provider.clone(),
            buffer,
            stream,
        ));
        self.router.register(&core);
        self.buffered
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .insert(core.id(), audio.clone());
        tracing::info!(path = %path, id = %core.id(), "buffered resource loaded");
        Ok(audio)
    }

    /// Load `source` for streaming through an output line sized to its format.
    pub fn load_streaming(&self, source: &str) -> Result<Arc<StreamingAudio>> {
        let location = normalize_source(source)?;
        let path = location.display_path();
        let stream = self.safe_open_stream(&location)?;
        let line = self.safe_open_line(stream.format(), &path)?;
        let core = Arc::new(ResourceCore::new(location, self.bus.clone()));
        let audio = StreamingAudio::new(
            core.clone(),
            self.provider.clone(),
            self.pool.clone(),
            self.config.clone(),
            stream,
            line,
        );
        self.router.register(&core);
        self.streaming
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .insert(core.id(), audio.clone());
        tracing::info!(path = %path, id = %core.id(), "streaming resource loaded");
        Ok(audio)
    }

    /// Load every source buffered, or none of them.
    pub fn load_buffered_all<S: AsRef<str>>(&self, sources: &[S]) -> Result<Vec<Arc<BufferedAudio>>> {
        let mut loaded = Vec::with_capacity(sources.len());
        for source in sources {
            match self.load_buffered(source.as_ref()) {
                Ok(audio) => loaded.push(audio),
                Err(err) => {
                    for audio in &loaded {
                        self.unload(&audio.id());
                    }
                    return Err(err);
                }
            }
        }
        Ok(loaded)
    }

    /// Load every source for streaming, or none of them.
    pub fn load_streaming_all<S: AsRef<str>>(
        &self,
        sources: &[S],
    ) -> Result<Vec<Arc<StreamingAudio>>> {
        let mut loaded = Vec::with_capacity(sources.len());
        for source in sources {
            match self.load_streaming(source.as_ref()) {
                Ok(audio) => loaded.push(audio),
                Err(err) => {
                    for audio in &loaded {
                        self.unload(&audio.id());
                    }
                    return Err(err);
                }
            }
        }
        Ok(loaded)
    }

    pub fn get(&self, id: &ResourceId) -> Option<LoadedResource> {
        if let Some(audio) = self.buffered(id) {
            return Some(LoadedResource::Buffered(audio));
        }
        self.streaming(id).map(LoadedResource::Streaming)
    }

    pub fn buffered(&self, id: &ResourceId) -> Option<Arc<BufferedAudio>> {
        self.buffered
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(id)
            .cloned()
    }

    pub fn streaming(&self, id: &ResourceId) -> Option<Arc<StreamingAudio>> {
        self.streaming
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(id)
            .cloned()
    }

    /// Stop (if open) and forget a resource. Returns `false` for unknown ids.
    pub fn unload(&self, id: &ResourceId) -> bool {
        let removed = self
            .buffered
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .remove(id)
            .map(LoadedResource::Buffered)
            .or_else(|| {
                self.streaming
                    .write()
                    .unwrap_or_else(|err| err.into_inner())
                    .remove(id)
                    .map(LoadedResource::Streaming)
            });
        let Some(resource) = removed else {
            return false;
        };
        if resource.is_open() {
            resource.stop();
        }
        self.router.remove(id);
        tracing::debug!(path = resource.path(), id = %id, "resource unloaded");
        true
    }

    pub fn len(&self) -> usize {
        let buffered = self.buffered.read().unwrap_or_else(|err| err.into_inner()).len();
        let streaming = self.streaming.read().unwrap_or_else(|err| err.into_inner()).len();
        buffered + streaming
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every loaded resource, sorted.
    pub fn ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .buffered
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .keys()
            .copied()
            .collect();
        ids.extend(
            self.streaming
                .read()
                .unwrap_or_else(|err| err.into_inner())
                .keys()
                .copied(),
        );
        ids.sort();
        ids
    }

    /// Stop every live resource and clear both collections.
    ///
    /// Both maps are emptied while holding both write locks, so no caller ever sees one
    /// collection cleared and the other not.
    pub fn reset(&self) {
        let drained: Vec<LoadedResource> = {
            let mut buffered = self.buffered.write().unwrap_or_else(|err| err.into_inner());
            let mut streaming = self.streaming.write().unwrap_or_else(|err| err.into_inner());
            buffered
                .drain()
                .map(|(_, audio)| LoadedResource::Buffered(audio))
                .chain(
                    streaming
                        .drain()
                        .map(|(_, audio)| LoadedResource::Streaming(audio)),
                )
                .collect()
        };
        for resource in &drained {
            if resource.is_open() {
                resource.stop();
            }
            self.router.remove(&resource.id());
        }
        tracing::info!(resources = drained.len(), "audio registry reset");
    }

    fn safe_allocate_buffer(&self, path: &str) -> Result<Box<dyn DecodedBuffer>> {
        self.provider
            .allocate_decoded_buffer()
            .map_err(|err| EngineError::fatal("allocate decoded buffer", path, err))
    }

    fn safe_open_stream(&self, location: &SourceLocation) -> Result<Box<dyn SampleStream>> {
        self.provider
            .open_input_stream(location)
            .map_err(|err| EngineError::fatal("open input stream", location.display_path(), err))
    }

    fn safe_open_line(&self, format: AudioFormat, path: &str) -> Result<Arc<dyn OutputLine>> {
        if !self.provider.is_format_supported_for_output(&format) {
            return Err(EngineError::fatal(
                "open output line",
                path,
                DeviceError::UnsupportedFormat(format.to_string()),
            ));
        }
        self.provider
            .open_output_line(format)
            .map_err(|err| EngineError::fatal("open output line", path, err))
    }
}

impl Drop for AudioRegistry {
    fn drop(&mut self) {
        self.reset();
    }
}
