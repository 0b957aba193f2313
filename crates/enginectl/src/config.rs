use std::path::Path;

use anyhow::{Context, Result};
use audio_engine::EngineConfig;
use serde::Deserialize;

/// Which [`audio_engine::AudioProvider`] backs the registry.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpal,
    Memory,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub backend: Backend,
    pub engine: EngineConfig,
}

impl CliConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<CliConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Command-line flags win over file values.
    pub fn apply_overrides(&mut self, backend: Option<Backend>, device: Option<String>) {
        if let Some(backend) = backend {
            self.backend = backend;
        }
        if let Some(device) = device.filter(|d| !d.trim().is_empty()) {
            self.engine.device = Some(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_engine_table_and_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enginectl.toml");
        std::fs::write(
            &path,
            "backend = \"memory\"\n[engine]\nstream_chunk_frames = 512\nworker_threads = 4\n",
        )
        .unwrap();
        let cfg = CliConfig::load(&path).unwrap();
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.engine.stream_chunk_frames, 512);
        assert_eq!(cfg.engine.worker_threads, 4);
        assert_eq!(cfg.engine.line_buffer_frames, EngineConfig::default().line_buffer_frames);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "backend = [").unwrap();
        let err = CliConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn flags_override_file_values() {
        let mut cfg = CliConfig::resolve(None).unwrap();
        assert_eq!(cfg.backend, Backend::Cpal);
        cfg.apply_overrides(Some(Backend::Memory), Some("  ".to_string()));
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.engine.device, None);
        cfg.apply_overrides(None, Some("usb".to_string()));
        assert_eq!(cfg.engine.device.as_deref(), Some("usb"));
    }
}
