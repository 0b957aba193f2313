//! Default [`AudioProvider`] backed by CPAL output devices and Symphonia decoding.

use std::sync::Arc;

use audio_engine_types::{AudioFormat, MixerInfo};

use crate::decode::SymphoniaStream;
use crate::device::{list_mixers, pick_device, supports_format};
use crate::error::DeviceError;
use crate::playback::{CpalClip, CpalLine};
use crate::provider::{AudioProvider, DecodedBuffer, OutputLine, SampleStream};
use crate::source::SourceLocation;

/// Provider for the system's default CPAL host.
#[derive(Clone, Debug, Default)]
pub struct CpalProvider {
    device: Option<String>,
}

impl CpalProvider {
    /// `device` is an optional case-insensitive substring of the output device name.
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    fn ensure_device(&self) -> Result<cpal::Device, DeviceError> {
        pick_device(&cpal::default_host(), self.device.as_deref())
    }
}

impl AudioProvider for CpalProvider {
    fn name(&self) -> &str {
        "cpal"
    }

    fn mixers(&self) -> Result<Vec<MixerInfo>, DeviceError> {
        list_mixers(&cpal::default_host())
    }

    fn is_format_supported_for_output(&self, format: &AudioFormat) -> bool {
        match self.ensure_device() {
            Ok(device) => supports_format(&device, format),
            Err(err) => {
                tracing::debug!(error = %err, "no output device for format check");
                false
            }
        }
    }

    fn allocate_decoded_buffer(&self) -> Result<Box<dyn DecodedBuffer>, DeviceError> {
        self.ensure_device()
            .map_err(|err| DeviceError::NoLine(err.to_string()))?;
        Ok(Box::new(CpalClip::new(self.device.clone())))
    }

    fn open_input_stream(
        &self,
        source: &SourceLocation,
    ) -> Result<Box<dyn SampleStream>, DeviceError> {
        match source {
            SourceLocation::File(path) => {
                let stream = SymphoniaStream::open_file(path)?;
                let info = stream.info();
                tracing::debug!(
                    path = %path.display(),
                    codec = ?info.codec,
                    bit_depth = ?info.bit_depth,
                    duration_ms = ?info.duration_ms,
                    "opened input stream"
                );
                Ok(Box::new(stream))
            }
            SourceLocation::Url(url) => Err(DeviceError::UnsupportedSource(url.clone())),
        }
    }

    fn open_output_line(&self, format: AudioFormat) -> Result<Arc<dyn OutputLine>, DeviceError> {
        let device = self.ensure_device()?;
        if !supports_format(&device, &format) {
            return Err(DeviceError::UnsupportedFormat(format.to_string()));
        }
        Ok(Arc::new(CpalLine::new(self.device.clone(), format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_not_supported() {
        let provider = CpalProvider::new(None);
        let err = match provider.open_input_stream(&SourceLocation::Url("http://x/a.wav".into())) {
            Err(err) => err,
            Ok(_) => panic!("url should not open"),
        };
        assert!(matches!(err, DeviceError::UnsupportedSource(_)));
    }

    #[test]
    fn keeps_device_selector() {
        assert_eq!(CpalProvider::new(Some("usb".into())).device(), Some("usb"));
        assert_eq!(CpalProvider::default().device(), None);
        assert_eq!(CpalProvider::default().name(), "cpal");
    }
}
