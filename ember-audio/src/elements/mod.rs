//! Processing elements of the audio graph.
//!
//! An element is a node with input ports, output ports and a `process`
//! step. The set of element kinds is closed; [`create_element`] builds any
//! of them from a typed argument map, which is how graph descriptions
//! stored as data become live elements.

pub mod effect;
pub mod file_source;
pub mod generators;
pub mod mixer;
pub mod mixer_source;
pub mod resampler;
pub mod routing;
pub mod stereo;
pub mod stream_source;

pub use effect::{Effect, EffectKind, Gain, SourceEffect};
pub use file_source::FileSource;
pub use generators::{SineSource, ZeroSource};
pub use mixer::Mixer;
pub use mixer_source::MixerSource;
pub use resampler::Resampler;
pub use routing::{Delay, Null, Playlist, Queue, Splitter};
pub use stereo::{Channel, StereoJoiner, StereoMaker, StereoSplitter};
pub use stream_source::StreamSource;

use crate::buffer::BufferAllocator;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use crate::types::{Format, SampleType};
use ember_common::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Context shared by every element's `prepare`.
#[derive(Default, Clone)]
pub struct PrepareParams {
    /// Global gate for PCM caching.
    pub enable_pcm_caching: bool,
    /// Worker pool for deferring slow decoder opens. When absent, opens
    /// run synchronously on the caller.
    pub thread_pool: Option<Arc<ThreadPool>>,
}

/// A node in the audio graph.
///
/// Lifecycle: constructed unprepared, `prepare` negotiates formats,
/// `process` runs once per scheduling step, `shutdown` releases decoder
/// and task state. `advance` carries the audio clock for elements that
/// schedule against time (delays, queued mixer commands).
pub trait Element: Send {
    /// Element class name, e.g. `"FileSource"`.
    fn kind(&self) -> &'static str;
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    /// Format negotiation; must set each output port's format.
    fn prepare(&mut self, loader: &dyn Loader, params: &PrepareParams) -> Result<()>;

    /// One scheduling step: at most one pull per input port, at most one
    /// push per output port.
    fn process(
        &mut self,
        allocator: &BufferAllocator,
        events: &mut EventQueue,
        milliseconds: u32,
    ) -> Result<()>;

    /// Advance the audio clock by `milliseconds`.
    fn advance(&mut self, milliseconds: u32) {
        let _ = milliseconds;
    }

    fn shutdown(&mut self) {}

    fn is_source(&self) -> bool {
        false
    }

    fn is_source_done(&self) -> bool {
        false
    }

    fn receive_command(&mut self, cmd: Command) {
        warn!(
            "Element ignored unexpected command. [elem={}, cmd={:?}]",
            self.name(),
            cmd
        );
    }

    /// Route `cmd` to a descendant named `dest`. Returns the command back
    /// when no element in the subtree accepted it.
    fn dispatch_command(&mut self, dest: &str, cmd: Command) -> Option<Command> {
        let _ = dest;
        Some(cmd)
    }

    fn num_input_ports(&self) -> usize {
        0
    }

    fn input_port(&mut self, index: usize) -> &mut Port {
        panic!("{} has no input port {}", self.name(), index);
    }

    fn num_output_ports(&self) -> usize {
        0
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        panic!("{} has no output port {}", self.name(), index);
    }
}

/// Find an input port index by name.
pub fn find_input_port(element: &mut dyn Element, name: &str) -> Option<usize> {
    (0..element.num_input_ports()).find(|&i| element.input_port(i).name() == name)
}

/// Find an output port index by name.
pub fn find_output_port(element: &mut dyn Element, name: &str) -> Option<usize> {
    (0..element.num_output_ports()).find(|&i| element.output_port(i).name() == name)
}

/// Drain queued control messages on every port; returns true when a
/// shutdown was requested. Elements call this at the top of `process`.
/// Output ports are drained too: sources have no input ports and take
/// their shutdown through the port they feed.
pub fn shutdown_requested(element: &mut dyn Element) -> bool {
    let mut shutdown = false;
    let mut drain = |port: &mut Port, name: &str| {
        for message in port.drain_messages() {
            if message == crate::port::MSG_SHUTDOWN {
                shutdown = true;
            } else {
                warn!(
                    "Element dropped unknown control message. [elem={}, msg={}]",
                    name, message
                );
            }
        }
    };
    for i in 0..element.num_input_ports() {
        let name = element.name().to_string();
        drain(element.input_port(i), &name);
    }
    for i in 0..element.num_output_ports() {
        let name = element.name().to_string();
        drain(element.output_port(i), &name);
    }
    shutdown
}

/// Fresh random element id.
pub fn new_element_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A typed element construction argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementArg {
    Bool(bool),
    UInt(u32),
    Float(f32),
    Str(String),
    Format(Format),
    SampleType(SampleType),
    Channel(Channel),
    Effect(EffectKind),
}

/// Everything needed to construct one element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementCreateArgs {
    /// Element class name.
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub args: HashMap<String, ElementArg>,
    /// Port name lists for the variadic elements (Mixer, Playlist,
    /// Splitter).
    #[serde(default)]
    pub input_ports: Vec<String>,
    #[serde(default)]
    pub output_ports: Vec<String>,
}

macro_rules! typed_arg {
    ($fn_name:ident, $variant:ident, $ty:ty, $what:literal) => {
        fn $fn_name(desc: &ElementCreateArgs, arg: &str) -> Result<$ty> {
            match desc.args.get(arg) {
                Some(ElementArg::$variant(value)) => Ok(value.clone()),
                Some(_) => Err(Error::BadArgument {
                    element: desc.name.clone(),
                    arg: arg.to_string(),
                    reason: concat!("expected ", $what).to_string(),
                }),
                None => Err(Error::BadArgument {
                    element: desc.name.clone(),
                    arg: arg.to_string(),
                    reason: "missing".to_string(),
                }),
            }
        }
    };
}

typed_arg!(uint_arg, UInt, u32, "unsigned integer");
typed_arg!(float_arg, Float, f32, "float");
typed_arg!(str_arg, Str, String, "string");
typed_arg!(format_arg, Format, Format, "format");
typed_arg!(sample_type_arg, SampleType, SampleType, "sample type");
typed_arg!(channel_arg, Channel, Channel, "channel");
typed_arg!(effect_arg, Effect, EffectKind, "effect kind");

fn optional_bool_arg(desc: &ElementCreateArgs, arg: &str) -> Option<bool> {
    match desc.args.get(arg) {
        Some(ElementArg::Bool(value)) => Some(*value),
        Some(_) => {
            warn!(
                "Mismatch in element argument type. [elem={}, arg={}]",
                desc.name, arg
            );
            None
        }
        None => None,
    }
}

/// Construct an element from its description. Missing required arguments
/// or a type mismatch fail construction.
pub fn create_element(desc: &ElementCreateArgs) -> Result<Box<dyn Element>> {
    let id = if desc.id.is_empty() {
        new_element_id()
    } else {
        desc.id.clone()
    };
    let name = desc.name.clone();

    match desc.kind.as_str() {
        "Queue" => Ok(Box::new(Queue::new(name, id))),
        "Null" => Ok(Box::new(Null::new(name, id))),
        "Playlist" => Ok(Box::new(Playlist::new(name, id, desc.input_ports.clone()))),
        "Mixer" => Ok(Box::new(Mixer::new(name, id, desc.input_ports.clone()))),
        "Splitter" => Ok(Box::new(Splitter::new(name, id, desc.output_ports.clone()))),
        "StereoMaker" => Ok(Box::new(StereoMaker::new(
            name,
            id,
            channel_arg(desc, "channel")?,
        ))),
        "StereoJoiner" => Ok(Box::new(StereoJoiner::new(name, id))),
        "StereoSplitter" => Ok(Box::new(StereoSplitter::new(name, id))),
        "Delay" => Ok(Box::new(Delay::new(name, id, uint_arg(desc, "delay")?))),
        "Effect" => Ok(Box::new(Effect::new(
            name,
            id,
            uint_arg(desc, "time")?,
            uint_arg(desc, "duration")?,
            effect_arg(desc, "effect")?,
        ))),
        "Gain" => Ok(Box::new(Gain::new(name, id, float_arg(desc, "gain")?))),
        "Resampler" => Ok(Box::new(Resampler::new(
            name,
            id,
            uint_arg(desc, "sample_rate")?,
        ))),
        "FileSource" => {
            let mut source = FileSource::new(
                name,
                id,
                str_arg(desc, "file")?,
                sample_type_arg(desc, "type")?,
                uint_arg(desc, "loops")?,
            );
            if let Some(enable) = optional_bool_arg(desc, "pcm_caching") {
                source.enable_pcm_caching(enable);
            }
            Ok(Box::new(source))
        }
        "ZeroSource" => Ok(Box::new(ZeroSource::new(name, id, format_arg(desc, "format")?))),
        "SineSource" => Ok(Box::new(SineSource::new(
            name,
            id,
            format_arg(desc, "format")?,
            uint_arg(desc, "frequency")?,
            uint_arg(desc, "duration")?,
        ))),
        other => Err(Error::BadArgument {
            element: desc.name.clone(),
            arg: "kind".to_string(),
            reason: format!("unknown element kind '{}'", other),
        }),
    }
}
