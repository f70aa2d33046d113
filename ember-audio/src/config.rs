//! Engine configuration.
//!
//! Loaded from a TOML file or built in code; every field has a default so
//! partial files work.

use crate::error::{Error, Result};
use crate::types::{Format, SampleType};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Device output rate, Hz.
    pub sample_rate: u32,
    /// Device channel count (1 or 2).
    pub channels: u16,
    /// Device sample type.
    pub sample_type: SampleType,
    /// Per-step slice size in milliseconds.
    pub buffer_size_ms: u32,
    /// Global gate for PCM caching.
    pub enable_pcm_caching: bool,
    /// The engine keeps this much audio queued on the device.
    pub queue_watermark_ms: u32,
    /// Worker threads for deferred decoder opens. Zero disables the pool
    /// and opens run synchronously.
    pub worker_threads: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            sample_type: SampleType::Float32,
            buffer_size_ms: 20,
            enable_pcm_caching: true,
            queue_watermark_ms: 100,
            worker_threads: 2,
        }
    }
}

impl AudioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AudioConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.channels == 1 || self.channels == 2) {
            return Err(Error::Config(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.sample_rate < 8000 || self.sample_rate > 192_000 {
            return Err(Error::Config(format!(
                "sample rate {} out of range",
                self.sample_rate
            )));
        }
        if self.buffer_size_ms == 0 {
            return Err(Error::Config("buffer_size_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// The device output format this configuration describes.
    pub fn format(&self) -> Format {
        Format::new(self.sample_rate, self.channels, self.sample_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AudioConfig::default();
        config.validate().unwrap();
        assert_eq!(config.format(), Format::new(44100, 2, SampleType::Float32));
        assert_eq!(config.buffer_size_ms, 20);
        assert!(config.enable_pcm_caching);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: AudioConfig = toml::from_str(
            r#"
            sample_rate = 48000
            sample_type = "int16"
            "#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.sample_type, SampleType::Int16);
        // Unspecified fields keep their defaults.
        assert_eq!(config.channels, 2);
        assert_eq!(config.queue_watermark_ms, 100);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AudioConfig::default();
        config.channels = 6;
        assert!(config.validate().is_err());

        let mut config = AudioConfig::default();
        config.buffer_size_ms = 0;
        assert!(config.validate().is_err());
    }
}
