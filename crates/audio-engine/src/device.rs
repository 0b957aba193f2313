//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing output devices as [`MixerInfo`]
//! - selecting either the default device or a device by substring match
//! - finding a stream config that plays a given [`AudioFormat`] without resampling

use audio_engine_types::{AudioFormat, MixerInfo};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::DeviceError;

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, DeviceError> {
    if let Some(needle) = needle {
        let mut devices = host
            .output_devices()
            .map_err(|err| DeviceError::NoLine(format!("no output devices: {err}")))?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| DeviceError::NoLine(format!("no output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| DeviceError::NoLine("no default output device".to_string()))
}

/// Best supported output config for `format`: the rate must be in range; an exact channel
/// match is preferred, then stereo (mono sources are duplicated), then the best sample format.
pub fn find_output_config(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Option<cpal::SupportedStreamConfig> {
    let ranges = device.supported_output_configs().ok()?;
    let mut best: Option<(u8, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        if format.sample_rate < range.min_sample_rate() || format.sample_rate > range.max_sample_rate()
        {
            continue;
        }
        let Some(channel_rank) = channel_rank(format.channels, range.channels()) else {
            continue;
        };
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_channel, b_format, _)) => {
                is_better_candidate(channel_rank, format_rank, *b_channel, *b_format)
            }
        };
        if replace {
            best = Some((
                channel_rank,
                format_rank,
                range.with_sample_rate(format.sample_rate),
            ));
        }
    }
    best.map(|(_, _, cfg)| cfg)
}

pub fn supports_format(device: &cpal::Device, format: &AudioFormat) -> bool {
    find_output_config(device, format).is_some()
}

/// Prefer a fixed buffer size if the device advertises one.
///
/// Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 16_384;
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Lower is better; `None` when the device channel count cannot carry the source.
fn channel_rank(source: u16, device: u16) -> Option<u8> {
    match (source, device) {
        (s, d) if s == d => Some(0),
        (1, 2) | (2, 1) => Some(1),
        (s, d) if d > s => Some(2),
        _ => None,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(channel_rank: u8, format_rank: u8, best_channel: u8, best_format: u8) -> bool {
    if channel_rank != best_channel {
        channel_rank < best_channel
    } else {
        format_rank < best_format
    }
}

/// Output devices as mixers. Devices that report no usable rate are skipped.
pub fn list_mixers(host: &cpal::Host) -> Result<Vec<MixerInfo>, DeviceError> {
    let devices = host
        .output_devices()
        .map_err(|err| DeviceError::Backend(format!("no output devices: {err}")))?;
    let mut out = Vec::new();
    for d in devices {
        let Ok(description) = d.description() else {
            continue;
        };
        let name = description.to_string();
        let ranges: Vec<(u32, u32)> = d
            .supported_output_configs()
            .map(|configs| {
                configs
                    .map(|c| (c.min_sample_rate(), c.max_sample_rate()))
                    .collect()
            })
            .unwrap_or_default();
        let fallback = d.default_output_config().ok().map(|c| c.sample_rate());
        let Some((min_rate, max_rate)) = rate_range(&ranges, fallback) else {
            tracing::debug!(device = %name, "skipping device without a sample rate range");
            continue;
        };
        let id = d.id().map(|id| id.to_string()).unwrap_or_else(|_| name.clone());
        out.push(MixerInfo {
            id,
            name,
            min_rate,
            max_rate,
            supports_output: true,
        });
    }
    Ok(out)
}

/// Widest rate span across `ranges`, or the device default rate when none is usable.
fn rate_range(ranges: &[(u32, u32)], fallback: Option<u32>) -> Option<(u32, u32)> {
    let span = ranges
        .iter()
        .filter(|(min, max)| *min > 0 && max >= min)
        .fold(None, |acc: Option<(u32, u32)>, &(min, max)| match acc {
            Some((lo, hi)) => Some((lo.min(min), hi.max(max))),
            None => Some((min, max)),
        });
    span.or_else(|| fallback.filter(|rate| *rate > 0).map(|rate| (rate, rate)))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_range_spans_all_supported_configs() {
        let ranges = [(44_100, 48_000), (8_000, 192_000), (0, 0)];
        assert_eq!(rate_range(&ranges, Some(48_000)), Some((8_000, 192_000)));
    }

    #[test]
    fn rate_range_falls_back_to_default_rate() {
        assert_eq!(rate_range(&[], Some(44_100)), Some((44_100, 44_100)));
        assert_eq!(rate_range(&[(96_000, 48_000)], Some(48_000)), Some((48_000, 48_000)));
        assert_eq!(rate_range(&[], None), None);
        assert_eq!(rate_range(&[(0, 0)], Some(0)), None);
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn channel_rank_prefers_exact_then_mono_stereo() {
        assert_eq!(channel_rank(2, 2), Some(0));
        assert_eq!(channel_rank(1, 2), Some(1));
        assert_eq!(channel_rank(2, 6), Some(2));
        assert_eq!(channel_rank(6, 2), None);
    }

    #[test]
    fn better_candidate_orders_by_channels_then_format() {
        assert!(is_better_candidate(0, 3, 1, 0));
        assert!(is_better_candidate(1, 0, 1, 2));
        assert!(!is_better_candidate(1, 2, 1, 0));
    }
}
