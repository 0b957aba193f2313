use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Playback state shared by every loaded resource.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Not producing sound and not holding an open device resource.
    #[default]
    Stopped,
    /// Device resource is open and producing sound.
    Playing,
    /// Device resource is open but output is halted.
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Current state plus exactly one step of history.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StateHistory {
    pub current: PlaybackState,
    pub previous: PlaybackState,
}

impl StateHistory {
    pub fn new(previous: PlaybackState, current: PlaybackState) -> Self {
        Self { current, previous }
    }
}

/// Raw device transition as reported by a decoded buffer or output line.
///
/// The device only knows "sound started" and "sound stopped"; pause/resume are
/// reconstructed by the event channel from the owning resource's state history.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventKind {
    Open,
    Close,
    Start,
    Stop,
}

impl fmt::Display for DeviceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceEventKind::Open => "open",
            DeviceEventKind::Close => "close",
            DeviceEventKind::Start => "start",
            DeviceEventKind::Stop => "stop",
        };
        f.write_str(label)
    }
}

/// Stable handle for a loaded resource (`res:<uuid>` when displayed).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res:{}", self.0)
    }
}

/// Message published on the event bus for every device transition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioEvent {
    /// Raw device transition.
    pub kind: DeviceEventKind,
    /// Resource that produced the transition.
    pub source: ResourceId,
    /// State history captured by the transition that produced the event, when known.
    pub history: Option<StateHistory>,
}

impl AudioEvent {
    pub fn new(kind: DeviceEventKind, source: ResourceId, history: Option<StateHistory>) -> Self {
        Self {
            kind,
            source,
            history,
        }
    }

    /// Resource state right after the transition, when known.
    pub fn state(&self) -> Option<PlaybackState> {
        self.history.map(|h| h.current)
    }
}

/// Interleaved PCM format description of a sample stream or output line.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Convert a frame count to microseconds (saturating, rounds down).
    pub fn frames_to_micros(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        let micros = u128::from(frames) * 1_000_000 / u128::from(self.sample_rate);
        u64::try_from(micros).unwrap_or(u64::MAX)
    }

    /// Convert microseconds to a frame index (rounds down).
    pub fn micros_to_frames(&self, micros: u64) -> u64 {
        let frames = u128::from(micros) * u128::from(self.sample_rate) / 1_000_000;
        u64::try_from(frames).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz, {} ch, f32", self.sample_rate, self.channels)
    }
}

/// Output mixer (device) metadata reported by a platform provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MixerInfo {
    /// Provider-specific stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Lowest supported output sample rate (Hz).
    pub min_rate: u32,
    /// Highest supported output sample rate (Hz).
    pub max_rate: u32,
    /// Whether the mixer accepts sample output at all.
    pub supports_output: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_state_defaults_to_stopped() {
        assert_eq!(PlaybackState::default(), PlaybackState::Stopped);
    }

    #[test]
    fn playback_state_serializes_snake_case() {
        let json = serde_json::to_string(&PlaybackState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }

    #[test]
    fn resource_id_display_has_prefix() {
        let id = ResourceId::generate();
        assert!(id.to_string().starts_with("res:"));
        assert_ne!(id, ResourceId::generate());
    }

    #[test]
    fn format_converts_frames_and_micros() {
        let fmt = AudioFormat::new(48_000, 2);
        assert_eq!(fmt.frames_to_micros(48_000), 1_000_000);
        assert_eq!(fmt.micros_to_frames(250_000), 12_000);
        assert_eq!(AudioFormat::new(0, 1).frames_to_micros(10), 0);
    }

    #[test]
    fn audio_event_roundtrips_through_json() {
        let event = AudioEvent::new(
            DeviceEventKind::Start,
            ResourceId::generate(),
            Some(StateHistory::new(PlaybackState::Paused, PlaybackState::Playing)),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: AudioEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.state(), Some(PlaybackState::Playing));
    }
}
