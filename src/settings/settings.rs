// Settings management and persistence
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::audio::format::BYTES_PER_SAMPLE;
use crate::error::{Error, Result};

/// Streaming loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSettings {
    pub chunk_size: usize, // bytes read from the decoder per write
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self { chunk_size: 1024 }
    }
}

/// Output device settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub device: Option<String>, // None = host default output device
    pub ring_buffer_ms: u32,    // device-side buffering, bounds a blocking write
    pub drain_timeout_ms: u32,  // upper bound on waiting for the ring to play out
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            device: None,
            ring_buffer_ms: 250,
            drain_timeout_ms: 2000,
        }
    }
}

/// Where bundled sound resources live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceSettings {
    pub root: PathBuf,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    pub level: String, // "error", "warn", "info", "debug" or "trace"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub version: i32, // Settings schema version for future migrations
    pub playback: PlaybackSettings,
    pub output: OutputSettings,
    pub resources: ResourceSettings,
    pub logging: LogSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: 1,
            playback: PlaybackSettings::default(),
            output: OutputSettings::default(),
            resources: ResourceSettings::default(),
            logging: LogSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Get the settings file path
    pub fn settings_path(dir: &Path) -> PathBuf {
        dir.join("chime.json")
    }

    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::settings_path(dir);

        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read settings file: {}", e)))?;

        let settings: EngineSettings = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse settings: {}", e)))?;

        info!("Loaded settings from {:?}", path);
        settings.validate()
    }

    /// Save settings to file
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("Failed to create settings directory: {}", e)))?;

        let path = Self::settings_path(dir);
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        fs::write(&path, content)
            .map_err(|e| Error::Config(format!("Failed to write settings file: {}", e)))?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject unusable values; the chunk size is rounded down to whole samples
    /// so a write never splits a sample across two chunks.
    pub fn validate(mut self) -> Result<Self> {
        let chunk = self.playback.chunk_size - self.playback.chunk_size % BYTES_PER_SAMPLE;
        if chunk == 0 {
            return Err(Error::Config(format!(
                "playback.chunk_size must be at least {} bytes",
                BYTES_PER_SAMPLE
            )));
        }
        self.playback.chunk_size = chunk;

        if self.output.ring_buffer_ms == 0 {
            return Err(Error::Config("output.ring_buffer_ms must be positive".to_string()));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings::load(dir.path()).unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.playback.chunk_size, 1024);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("config");

        let mut settings = EngineSettings::default();
        settings.output.device = Some("Speakers".to_string());
        settings.playback.chunk_size = 4096;
        settings.save(&nested).unwrap();

        let loaded = EngineSettings::load(&nested).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            EngineSettings::settings_path(dir.path()),
            r#"{ "playback": { "chunk_size": 2050 } }"#,
        )
        .unwrap();

        let loaded = EngineSettings::load(dir.path()).unwrap();
        assert_eq!(loaded.playback.chunk_size, 2048);
        assert_eq!(loaded.output, OutputSettings::default());
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let mut settings = EngineSettings::default();
        settings.playback.chunk_size = 3;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_garbage_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(EngineSettings::settings_path(dir.path()), "not json").unwrap();
        assert!(matches!(EngineSettings::load(dir.path()), Err(Error::Config(_))));
    }
}
