//! Minimal command line player.
//!
//! Plays the given audio files through the default output device using
//! the engine's music track. Useful for smoke-testing decoders, the graph
//! and the device back-end without a game on top.

use anyhow::{Context, Result};
use clap::Parser;
use ember_audio::config::AudioConfig;
use ember_audio::device::CpalDevice;
use ember_audio::elements::{ElementArg, ElementCreateArgs};
use ember_audio::engine::AudioEngine;
use ember_audio::graph::{GraphDesc, LinkDesc};
use ember_audio::source::FileLoader;
use ember_audio::SampleType;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "play")]
#[command(about = "Play audio files through the ember audio engine")]
#[command(version)]
struct Args {
    /// Audio files to play (mp3/ogg/wav/flac), one after another
    files: Vec<PathBuf>,

    /// Path to a configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of playback loops per file
    #[arg(short, long, default_value_t = 1)]
    loops: u32,

    /// Playback gain
    #[arg(short, long, default_value_t = 1.0)]
    gain: f32,
}

/// Graph: FileSource -> Gain("out"). The engine requires the source
/// subgraph to match the device format, so files whose rate or layout
/// differ are routed through StereoMaker/Resampler stages.
fn file_graph(file: &str, loops: u32, config: &AudioConfig) -> Result<GraphDesc> {
    let loader = FileLoader;
    let info = ember_audio::probe_file(&loader, file)
        .with_context(|| format!("cannot probe {}", file))?;
    info!(
        "{}: {} Hz, {} channels, {} frames",
        file, info.sample_rate, info.channel_count, info.total_frames
    );

    let mut elements = Vec::new();
    let mut links = Vec::new();

    let mut file_args = HashMap::new();
    file_args.insert("file".to_string(), ElementArg::Str(file.to_string()));
    file_args.insert(
        "type".to_string(),
        ElementArg::SampleType(SampleType::Float32),
    );
    file_args.insert("loops".to_string(), ElementArg::UInt(loops));
    elements.push(ElementCreateArgs {
        kind: "FileSource".to_string(),
        name: "file".to_string(),
        args: file_args,
        ..Default::default()
    });
    let mut tail = ("file".to_string(), "out".to_string());

    if info.channel_count == 1 && config.channels == 2 {
        let mut args = HashMap::new();
        args.insert(
            "channel".to_string(),
            ElementArg::Channel(ember_audio::elements::Channel::Both),
        );
        elements.push(ElementCreateArgs {
            kind: "StereoMaker".to_string(),
            name: "widen".to_string(),
            args,
            ..Default::default()
        });
        links.push(LinkDesc {
            src_element: tail.0,
            src_port: tail.1,
            dst_element: "widen".to_string(),
            dst_port: "in".to_string(),
        });
        tail = ("widen".to_string(), "out".to_string());
    }

    if info.sample_rate != config.sample_rate {
        let mut args = HashMap::new();
        args.insert(
            "sample_rate".to_string(),
            ElementArg::UInt(config.sample_rate),
        );
        elements.push(ElementCreateArgs {
            kind: "Resampler".to_string(),
            name: "resample".to_string(),
            args,
            ..Default::default()
        });
        links.push(LinkDesc {
            src_element: tail.0,
            src_port: tail.1,
            dst_element: "resample".to_string(),
            dst_port: "in".to_string(),
        });
        tail = ("resample".to_string(), "out".to_string());
    }

    let mut gain_args = HashMap::new();
    gain_args.insert("gain".to_string(), ElementArg::Float(1.0));
    elements.push(ElementCreateArgs {
        kind: "Gain".to_string(),
        name: "out".to_string(),
        args: gain_args,
        ..Default::default()
    });
    links.push(LinkDesc {
        src_element: tail.0,
        src_port: tail.1,
        dst_element: "out".to_string(),
        dst_port: "in".to_string(),
    });

    Ok(GraphDesc {
        name: file.to_string(),
        id: String::new(),
        elements,
        links,
    })
}

fn main() -> Result<()> {
    ember_common::logging::init("info");

    let args = Args::parse();
    if args.files.is_empty() {
        anyhow::bail!("no input files");
    }

    let config = match &args.config {
        Some(path) => AudioConfig::load(path)?,
        None => AudioConfig::default(),
    };

    let device = CpalDevice::open(config.format())?;
    let mut engine = AudioEngine::new(&config, Arc::new(FileLoader), Box::new(device))?;
    engine.set_music_gain(args.gain);

    for file in &args.files {
        let file = file.display().to_string();
        let desc = file_graph(&file, args.loops, &config)?;
        let id = engine.play_music(&desc, 0)?;
        info!("playing {} as {}", file, id);

        let mut done = false;
        let mut events = Vec::new();
        while !done {
            events.clear();
            engine.update(&mut events)?;
            for event in &events {
                if event.event_type() == "SourceDone" {
                    done = true;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // Let the device drain its last buffers before tearing down.
    std::thread::sleep(Duration::from_millis(300));
    engine.stop();
    Ok(())
}
