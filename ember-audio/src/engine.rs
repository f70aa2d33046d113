//! The audio engine façade.
//!
//! Owns two long-lived tracks, `music` and `effects`, each a one-graph
//! pipeline of a never-done [`MixerSource`] feeding a [`Gain`] sink.
//! Playback requests attach prepared source subgraphs under a track;
//! scheduled mutations (pause, kill, delayed starts) ride the command
//! queue of the track mixer and tick on the audio clock.
//!
//! `update` runs processing steps until the device's outbound queues are
//! topped up to the configured watermark, then surfaces the events the
//! graphs produced.

use crate::buffer::BufferAllocator;
use crate::command::Command;
use crate::config::AudioConfig;
use crate::device::{DeviceSink, StreamId};
use crate::elements::effect::{EffectKind, SourceEffect};
use crate::elements::file_source::{self, FileInfo};
use crate::elements::{Element, Gain, MixerSource, PrepareParams};
use crate::error::{Error, Result};
use crate::events::{AudioEvent, EventQueue};
use crate::graph::{Graph, GraphDesc, SINK_NAME};
use crate::source::Loader;
use crate::types::Format;
use ember_common::ThreadPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the music track mixer.
pub const MUSIC_TRACK: &str = "music";
/// Name of the sound effect track mixer.
pub const EFFECTS_TRACK: &str = "effects";

/// Pipeline depth of a track graph plus one step of slack: how many
/// consecutive empty steps we run before concluding a track is idle.
const MAX_IDLE_STEPS: u32 = 3;
/// Upper bound on steps per `update`, whatever the watermark says.
const MAX_STEPS_PER_UPDATE: u32 = 32;

struct Track {
    graph: Graph,
    stream: StreamId,
    audible: bool,
}

pub struct AudioEngine {
    format: Format,
    buffer_size_ms: u32,
    watermark_ms: u32,
    caching_enabled: bool,
    debug_pause: bool,
    allocator: BufferAllocator,
    loader: Arc<dyn Loader>,
    thread_pool: Option<Arc<ThreadPool>>,
    device: Box<dyn DeviceSink>,
    music: Track,
    effects: Track,
    prepared: HashMap<String, Graph>,
    events: EventQueue,
    play_counter: u64,
}

impl AudioEngine {
    pub fn new(
        config: &AudioConfig,
        loader: Arc<dyn Loader>,
        mut device: Box<dyn DeviceSink>,
    ) -> Result<Self> {
        config.validate()?;
        let format = config.format();
        let thread_pool = if config.worker_threads > 0 {
            Some(Arc::new(ThreadPool::new(config.worker_threads)))
        } else {
            None
        };

        let params = PrepareParams {
            enable_pcm_caching: config.enable_pcm_caching,
            thread_pool: thread_pool.clone(),
        };
        let mut music_graph = build_track_graph(MUSIC_TRACK, format);
        music_graph.prepare(loader.as_ref(), &params)?;
        let mut effects_graph = build_track_graph(EFFECTS_TRACK, format);
        effects_graph.prepare(loader.as_ref(), &params)?;

        let music_stream = device.open_stream(MUSIC_TRACK, format)?;
        let effects_stream = device.open_stream(EFFECTS_TRACK, format)?;

        info!(
            "Audio engine started. [format={}, slice={}ms, watermark={}ms]",
            format, config.buffer_size_ms, config.queue_watermark_ms
        );
        Ok(Self {
            format,
            buffer_size_ms: config.buffer_size_ms,
            watermark_ms: config.queue_watermark_ms,
            caching_enabled: config.enable_pcm_caching,
            debug_pause: false,
            allocator: BufferAllocator::new(),
            loader,
            thread_pool,
            device,
            music: Track {
                graph: music_graph,
                stream: music_stream,
                audible: true,
            },
            effects: Track {
                graph: effects_graph,
                stream: effects_stream,
                audible: true,
            },
            prepared: HashMap::new(),
            events: EventQueue::new(),
            play_counter: 0,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    fn prepare_params(&self) -> PrepareParams {
        PrepareParams {
            enable_pcm_caching: self.caching_enabled,
            thread_pool: self.thread_pool.clone(),
        }
    }

    /// Pre-build and validate a playback graph so a later play request
    /// starts without preparation cost.
    pub fn prepare_music_graph(&mut self, desc: &GraphDesc) -> Result<()> {
        if self.prepared.contains_key(&desc.name) {
            return Ok(());
        }
        let mut graph = desc.build()?;
        graph.prepare(self.loader.as_ref(), &self.prepare_params())?;
        self.prepared.insert(desc.name.clone(), graph);
        debug!("Prepared music graph. [graph={}]", desc.name);
        Ok(())
    }

    /// Start playing a graph on the music track. With `when_ms > 0` the
    /// source is attached paused and resumes once the delay has ticked
    /// down on the audio clock. Returns the instance name used by the
    /// scheduled-mutation calls.
    pub fn play_music(&mut self, desc: &GraphDesc, when_ms: u32) -> Result<String> {
        self.play_on_track(MUSIC_TRACK, desc, when_ms)
    }

    /// Start playing a graph on the effect track.
    pub fn play_sound_effect(&mut self, desc: &GraphDesc, when_ms: u32) -> Result<String> {
        self.play_on_track(EFFECTS_TRACK, desc, when_ms)
    }

    fn play_on_track(&mut self, track_name: &str, desc: &GraphDesc, when_ms: u32) -> Result<String> {
        let mut graph = match self.prepared.remove(&desc.name) {
            Some(graph) => graph,
            None => {
                let mut graph = desc.build()?;
                graph.prepare(self.loader.as_ref(), &self.prepare_params())?;
                graph
            }
        };

        let source_format = graph.output_port(0).format();
        if source_format != self.format {
            return Err(Error::UnsupportedFormat(format!(
                "graph '{}' output format {} does not match engine format {}",
                desc.name, source_format, self.format
            )));
        }

        self.play_counter += 1;
        let instance = format!("{}#{}", desc.name, self.play_counter);
        graph.set_name(&instance);

        let track = self.track_mut(track_name);
        track.graph.dispatch_command(
            track_name,
            Command::AddSource {
                source: Box::new(graph),
                paused: when_ms > 0,
            },
        );
        if when_ms > 0 {
            track.graph.dispatch_command(
                track_name,
                Command::PauseSource {
                    name: instance.clone(),
                    paused: false,
                    millis: when_ms,
                },
            );
        }
        debug!(
            "Play request attached. [track={}, source={}, when={}ms]",
            track_name, instance, when_ms
        );
        Ok(instance)
    }

    fn track_mut(&mut self, name: &str) -> &mut Track {
        if name == EFFECTS_TRACK {
            &mut self.effects
        } else {
            &mut self.music
        }
    }

    fn send_to_music(&mut self, dest: &str, cmd: Command) {
        if self.music.graph.dispatch_command(dest, cmd).is_some() {
            warn!("No receiver for music command. [dest={}]", dest);
        }
    }

    /// Pause a named music source after `when_ms` of audio time.
    pub fn pause_music(&mut self, id: &str, when_ms: u32) {
        self.send_to_music(
            MUSIC_TRACK,
            Command::PauseSource {
                name: id.to_string(),
                paused: true,
                millis: when_ms,
            },
        );
    }

    /// Resume a named music source after `when_ms` of audio time.
    pub fn resume_music(&mut self, id: &str, when_ms: u32) {
        self.send_to_music(
            MUSIC_TRACK,
            Command::PauseSource {
                name: id.to_string(),
                paused: false,
                millis: when_ms,
            },
        );
    }

    /// Detach a named music source after `when_ms` of audio time.
    pub fn kill_music(&mut self, id: &str, when_ms: u32) {
        self.send_to_music(
            MUSIC_TRACK,
            Command::DeleteSource {
                name: id.to_string(),
                millis: when_ms,
            },
        );
    }

    /// Detach every music source after `when_ms` of audio time.
    pub fn kill_all_music(&mut self, when_ms: u32) {
        self.send_to_music(MUSIC_TRACK, Command::DeleteAllSources { millis: when_ms });
    }

    /// Drop queued commands targeting a named music source.
    pub fn cancel_music_cmds(&mut self, id: &str) {
        self.send_to_music(
            MUSIC_TRACK,
            Command::CancelSourceCommands {
                name: id.to_string(),
            },
        );
    }

    /// Install a fade on a named music source.
    pub fn set_music_effect(&mut self, id: &str, duration_ms: u32, kind: EffectKind) {
        self.send_to_music(
            MUSIC_TRACK,
            Command::SetSourceEffect {
                src: id.to_string(),
                effect: SourceEffect::new(kind, duration_ms),
            },
        );
    }

    /// Update the music track's terminal gain stage.
    pub fn set_music_gain(&mut self, gain: f32) {
        if self
            .music
            .graph
            .dispatch_command(SINK_NAME, Command::SetGain { gain })
            .is_some()
        {
            warn!("Music track has no gain stage");
        }
    }

    /// Update the effect track's terminal gain stage.
    pub fn set_sound_effect_gain(&mut self, gain: f32) {
        if self
            .effects
            .graph
            .dispatch_command(SINK_NAME, Command::SetGain { gain })
            .is_some()
        {
            warn!("Effect track has no gain stage");
        }
    }

    /// Route the mixed effect track to the device, or silence it.
    pub fn enable_effects(&mut self, enable: bool) {
        self.effects.audible = enable;
    }

    /// Change the per-step device slice size.
    pub fn set_buffer_size(&mut self, milliseconds: u32) {
        if milliseconds > 0 {
            self.buffer_size_ms = milliseconds;
        }
    }

    /// Toggle PCM caching for graphs prepared from now on.
    pub fn enable_caching(&mut self, enable: bool) {
        self.caching_enabled = enable;
    }

    pub fn is_caching_enabled(&self) -> bool {
        self.caching_enabled
    }

    /// Freeze the engine's step loop (the device drains to silence).
    pub fn set_debug_pause(&mut self, paused: bool) {
        self.debug_pause = paused;
    }

    /// Open a decoder eagerly to prime the file-info cache, enabling
    /// deferred decoder opens for later play requests on this file.
    pub fn preload_file_info(&mut self, file: &str) -> Result<FileInfo> {
        file_source::probe_file(self.loader.as_ref(), file)
    }

    /// Run processing steps until the device queues reach the watermark,
    /// then surface the events produced. Call once per frame/tick.
    pub fn update(&mut self, out_events: &mut Vec<AudioEvent>) -> Result<()> {
        if !self.debug_pause {
            let mut idle_steps = 0u32;
            for _ in 0..MAX_STEPS_PER_UPDATE {
                let music_needs = self.device.buffered_ms(self.music.stream) < self.watermark_ms;
                let effects_needs =
                    self.device.buffered_ms(self.effects.stream) < self.watermark_ms;
                if !music_needs && !effects_needs {
                    break;
                }

                let mut produced = false;
                if music_needs {
                    produced |= Self::step_track(
                        &mut self.music,
                        &self.allocator,
                        &mut self.events,
                        self.buffer_size_ms,
                        self.device.as_mut(),
                    )?;
                }
                if effects_needs {
                    produced |= Self::step_track(
                        &mut self.effects,
                        &self.allocator,
                        &mut self.events,
                        self.buffer_size_ms,
                        self.device.as_mut(),
                    )?;
                }

                if produced {
                    idle_steps = 0;
                } else {
                    // Pipelines are short; a few empty steps in a row mean
                    // there is nothing to play right now.
                    idle_steps += 1;
                    if idle_steps >= MAX_IDLE_STEPS {
                        break;
                    }
                }
            }
        }

        out_events.extend(self.events.drain(..));
        Ok(())
    }

    fn step_track(
        track: &mut Track,
        allocator: &BufferAllocator,
        events: &mut EventQueue,
        slice_ms: u32,
        device: &mut dyn DeviceSink,
    ) -> Result<bool> {
        track.graph.process(allocator, events, slice_ms)?;
        track.graph.advance(slice_ms);
        let Some(buffer) = track.graph.output_port(0).pull_buffer() else {
            return Ok(false);
        };
        if track.audible {
            device.queue_buffer(track.stream, buffer)?;
        }
        Ok(true)
    }

    /// Shut down both tracks and release the device streams.
    pub fn stop(&mut self) {
        self.music.graph.shutdown();
        self.effects.graph.shutdown();
        self.device.close_stream(self.music.stream);
        self.device.close_stream(self.effects.stream);
        info!("Audio engine stopped");
    }
}

fn build_track_graph(track: &str, format: Format) -> Graph {
    let mut mixer = MixerSource::new(track, format!("{}-mixer", track), format);
    mixer.set_never_done(true);
    let gain = Gain::new(SINK_NAME, format!("{}-gain", track), 1.0);

    let mut graph = Graph::new(format!("{}-track", track), format!("{}-track", track));
    graph.add_element(Box::new(mixer));
    graph.add_element(Box::new(gain));
    // The track graph is wired statically; a failure here is a programming
    // error caught by the engine tests.
    if let Err(e) = graph.link_elements(track, "out", SINK_NAME, "in") {
        warn!("Track graph wiring failed. [track={}, error={}]", track, e);
    }
    graph
}
