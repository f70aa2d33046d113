//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use ember_audio::elements::{ElementArg, ElementCreateArgs};
use ember_audio::graph::{GraphDesc, LinkDesc};
use ember_audio::{Format, SampleType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub fn stereo_format() -> Format {
    Format::new(44100, 2, SampleType::Float32)
}

pub fn mono_format() -> Format {
    Format::new(44100, 1, SampleType::Float32)
}

/// Interleaved sine samples, one full-scale tone on every channel.
pub fn sine_samples(sample_rate: u32, channels: u16, frames: usize, frequency: f64) -> Vec<f32> {
    let step = std::f64::consts::PI * 2.0 * frequency / sample_rate as f64;
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for n in 0..frames {
        let value = (n as f64 * step).sin() as f32;
        for _ in 0..channels {
            samples.push(value);
        }
    }
    samples
}

/// Write interleaved f32 samples as a 32-bit float WAV file.
pub fn write_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    samples: &[f32],
) -> PathBuf {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let path = dir.join(name);
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
    for &sample in samples {
        writer.write_sample(sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
    path
}

/// Description of `FileSource -> Gain("out")`.
pub fn file_graph_desc(name: &str, file: &str, source_id: &str, loops: u32) -> GraphDesc {
    let mut file_args = HashMap::new();
    file_args.insert("file".to_string(), ElementArg::Str(file.to_string()));
    file_args.insert(
        "type".to_string(),
        ElementArg::SampleType(SampleType::Float32),
    );
    file_args.insert("loops".to_string(), ElementArg::UInt(loops));

    let mut gain_args = HashMap::new();
    gain_args.insert("gain".to_string(), ElementArg::Float(1.0));

    GraphDesc {
        name: name.to_string(),
        id: String::new(),
        elements: vec![
            ElementCreateArgs {
                kind: "FileSource".to_string(),
                name: "file".to_string(),
                id: source_id.to_string(),
                args: file_args,
                ..Default::default()
            },
            ElementCreateArgs {
                kind: "Gain".to_string(),
                name: "out".to_string(),
                args: gain_args,
                ..Default::default()
            },
        ],
        links: vec![LinkDesc {
            src_element: "file".to_string(),
            src_port: "out".to_string(),
            dst_element: "out".to_string(),
            dst_port: "in".to_string(),
        }],
    }
}

/// Description of `SineSource -> Gain("out")` in the given format.
pub fn sine_graph_desc(name: &str, format: Format, frequency: u32, duration_ms: u32) -> GraphDesc {
    let mut sine_args = HashMap::new();
    sine_args.insert("format".to_string(), ElementArg::Format(format));
    sine_args.insert("frequency".to_string(), ElementArg::UInt(frequency));
    sine_args.insert("duration".to_string(), ElementArg::UInt(duration_ms));

    let mut gain_args = HashMap::new();
    gain_args.insert("gain".to_string(), ElementArg::Float(1.0));

    GraphDesc {
        name: name.to_string(),
        id: String::new(),
        elements: vec![
            ElementCreateArgs {
                kind: "SineSource".to_string(),
                name: "sine".to_string(),
                args: sine_args,
                ..Default::default()
            },
            ElementCreateArgs {
                kind: "Gain".to_string(),
                name: "out".to_string(),
                args: gain_args,
                ..Default::default()
            },
        ],
        links: vec![LinkDesc {
            src_element: "sine".to_string(),
            src_port: "out".to_string(),
            dst_element: "out".to_string(),
            dst_port: "in".to_string(),
        }],
    }
}
