//! Symphonia-backed sample streams.
//!
//! Detects the container and codec once, then decodes packets on demand into interleaved `f32`
//! samples as the caller reads.

use std::fs::File;
use std::path::Path;

use audio_engine_types::AudioFormat;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DeviceError;
use crate::provider::SampleStream;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    /// Duration in milliseconds when the container reports it.
    pub duration_ms: Option<u64>,
}

pub struct SymphoniaStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    frames: Option<u64>,
    info: SourceInfo,
    pending: Vec<f32>,
    pos: usize,
    finished: bool,
}

impl std::fmt::Debug for SymphoniaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymphoniaStream")
            .field("format", &self.format)
            .field("frames", &self.frames)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl SymphoniaStream {
    /// Open a local file, hinting the format reader with its extension.
    pub fn open_file(path: &Path) -> Result<Self, DeviceError> {
        let file = File::open(path)?;
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        Self::from_media_source(Box::new(file), hint)
    }

    /// Open an arbitrary Symphonia [`MediaSource`] and prepare a decoder for its default track.
    pub fn from_media_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self, DeviceError> {
        let mss = MediaSourceStream::new(source, Default::default());
        let detected = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(map_symphonia_error)?;
        let reader = detected.format;

        let track = reader
            .default_track()
            .ok_or_else(|| DeviceError::UnsupportedFormat("no default audio track".to_string()))?;
        let track_id = track.id;
        let params: CodecParameters = track.codec_params.clone();

        let channels = params
            .channels
            .ok_or_else(|| DeviceError::UnsupportedFormat("unknown channel layout".to_string()))?
            .count();
        let rate = params
            .sample_rate
            .ok_or_else(|| DeviceError::UnsupportedFormat("unknown sample rate".to_string()))?;
        let channels = u16::try_from(channels)
            .map_err(|_| DeviceError::UnsupportedFormat(format!("{channels} channels")))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(map_symphonia_error)?;

        let info = SourceInfo {
            codec: codec_name_from_params(&params),
            bit_depth: params
                .bits_per_sample
                .or(params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            duration_ms: duration_ms_from_codec_params(&params),
        };
        tracing::debug!(
            codec = info.codec.as_deref().unwrap_or("unknown"),
            rate,
            channels,
            "opened source"
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            format: AudioFormat::new(rate, channels),
            frames: params.n_frames,
            info,
            pending: Vec::new(),
            pos: 0,
            finished: false,
        })
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Decode packets until one yields samples. Returns `false` at end of stream.
    fn refill(&mut self) -> Result<bool, DeviceError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(err) => return Err(map_symphonia_error(err)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::debug!(error = msg, "skipping undecodable packet");
                    continue;
                }
                Err(err) => return Err(map_symphonia_error(err)),
            };
            if decoded.frames() == 0 {
                continue;
            }
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);
            self.pending.clear();
            self.pending.extend_from_slice(sample_buf.samples());
            self.pos = 0;
            return Ok(true);
        }
    }
}

impl SampleStream for SymphoniaStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frame_length(&self) -> Option<u64> {
        self.frames
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize, DeviceError> {
        let channels = usize::from(self.format.channels.max(1));
        let want = out.len() / channels * channels;
        let mut written = 0;
        while written < want {
            if self.pos >= self.pending.len() {
                if self.finished || !self.refill()? {
                    self.finished = true;
                    break;
                }
            }
            let take = (self.pending.len() - self.pos).min(want - written);
            out[written..written + take].copy_from_slice(&self.pending[self.pos..self.pos + take]);
            self.pos += take;
            written += take;
        }
        Ok(written)
    }
}

fn map_symphonia_error(err: SymphoniaError) -> DeviceError {
    match err {
        SymphoniaError::IoError(err) => DeviceError::Io(err),
        SymphoniaError::Unsupported(what) => DeviceError::UnsupportedFormat(what.to_string()),
        other => DeviceError::UnsupportedFormat(other.to_string()),
    }
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for diagnostics.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
