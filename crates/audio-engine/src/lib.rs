//! Audio playback engine: buffered and streaming resources over a pluggable provider.
//!
//! Load sources through an [`AudioRegistry`], drive them with the [`AudioResource`]
//! operations, and observe lifecycle events through per-resource callbacks or the shared
//! [`EventBus`].

pub mod buffered;
pub mod channel;
pub mod clip;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod events;
pub mod looping;
pub mod memory;
pub mod platform;
pub mod playback;
pub mod pool;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod source;
pub mod state;
pub mod streaming;

pub use audio_engine_types::{
    AudioEvent, AudioFormat, DeviceEventKind, MixerInfo, PlaybackState, ResourceId,
};
pub use buffered::BufferedAudio;
pub use channel::{Callback, EventChannel, Hook, callback, dispatch_hooks};
pub use config::EngineConfig;
pub use error::{DeviceError, EngineError, Result};
pub use events::{EventBus, EventListener, EventRouter};
pub use looping::{LOOP_CONTINUOUSLY, LOOP_FROM_START, LOOP_THROUGH_END, LoopSettings};
pub use memory::MemoryProvider;
pub use platform::CpalProvider;
pub use provider::{AudioProvider, FloatControlKind};
pub use registry::{AudioRegistry, LoadedResource, is_output_supported};
pub use resource::AudioResource;
pub use source::{SourceLocation, normalize_source};
pub use state::StateHistory;
pub use streaming::StreamingAudio;
