//! Core audio data types.
//!
//! A [`Format`] fully describes the PCM layout of a buffer or port: sample
//! rate, channel count and sample type. Two formats compare equal iff all
//! three components are equal.

use serde::{Deserialize, Serialize};

/// PCM sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Int16,
    Int32,
    Float32,
}

impl SampleType {
    /// Size of one sample of this type in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            SampleType::Int16 => 2,
            SampleType::Int32 | SampleType::Float32 => 4,
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleType::Int16 => write!(f, "int16"),
            SampleType::Int32 => write!(f, "int32"),
            SampleType::Float32 => write!(f, "float32"),
        }
    }
}

/// PCM stream format: rate, channels, sample type.
///
/// Frames are interleaved; a stereo frame is stored L,R.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_type: SampleType,
}

impl Format {
    pub fn new(sample_rate: u32, channel_count: u16, sample_type: SampleType) -> Self {
        Self {
            sample_rate,
            channel_count,
            sample_type,
        }
    }

    /// Size of one frame (one sample per channel) in bytes.
    pub fn frame_size(&self) -> usize {
        self.sample_type.byte_size() * self.channel_count as usize
    }

    /// A format is usable when every component has been negotiated.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && (self.channel_count == 1 || self.channel_count == 2)
    }
}

impl Default for Format {
    fn default() -> Self {
        // Zero rate marks a format that has not been negotiated yet.
        Self {
            sample_rate: 0,
            channel_count: 0,
            sample_type: SampleType::Float32,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}",
            self.sample_rate, self.channel_count, self.sample_type
        )
    }
}
