//! # Ember Audio
//!
//! Real-time audio graph engine: a pull-driven DAG of processing elements
//! that decode compressed audio (MP3/OGG/FLAC/WAV), resample, mix, fade
//! and deliver fixed-duration PCM buffers to a device sink.
//!
//! **Architecture:** symphonia decoding + rubato resampling + cpal output.
//! Elements exchange reference-counted pooled buffers through single-slot
//! ports; a [`graph::Graph`] drives one processing pass per device slice,
//! and the [`engine::AudioEngine`] façade owns the music and effect tracks
//! a game talks to.

pub mod buffer;
pub mod command;
pub mod config;
pub mod decoder;
pub mod device;
pub mod elements;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod port;
pub mod source;
pub mod types;

pub use buffer::{Buffer, BufferAllocator, BufferHandle, InfoTag};
pub use command::Command;
pub use config::AudioConfig;
pub use elements::file_source::{clear_caches, probe_file};
pub use engine::AudioEngine;
pub use error::{Error, Result};
pub use events::{AudioEvent, EventQueue};
pub use graph::{Graph, GraphDesc, LinkDesc};
pub use types::{Format, SampleType};
