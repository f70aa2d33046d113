//! Commands delivered to elements.
//!
//! Commands are a closed sum type dispatched with a match; elements accept
//! the variants that make sense for them and log the rest. Delivery is
//! either direct (`receive_command`) or routed by element name through the
//! composite tree (`dispatch_command`).

use crate::elements::effect::{EffectKind, SourceEffect};
use crate::elements::Element;

pub enum Command {
    /// Update a gain stage's scalar.
    SetGain { gain: f32 },

    /// Reconfigure a fade effect element's window.
    SetEffect {
        kind: EffectKind,
        time_ms: u32,
        duration_ms: u32,
    },

    /// Install a fade on a named mixer child.
    SetSourceEffect { src: String, effect: SourceEffect },

    /// Attach a prepared source element under a mixer.
    AddSource {
        source: Box<dyn Element>,
        paused: bool,
    },

    /// Detach a named mixer child, optionally after a delay.
    DeleteSource { name: String, millis: u32 },

    /// Detach every mixer child, optionally after a delay.
    DeleteAllSources { millis: u32 },

    /// Pause or resume a named mixer child, optionally after a delay.
    PauseSource {
        name: String,
        paused: bool,
        millis: u32,
    },

    /// Drop any queued commands targeting the named child.
    CancelSourceCommands { name: String },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::SetGain { gain } => write!(f, "SetGain({})", gain),
            Command::SetEffect { kind, time_ms, duration_ms } => {
                write!(f, "SetEffect({:?}, t={}ms, d={}ms)", kind, time_ms, duration_ms)
            }
            Command::SetSourceEffect { src, effect } => {
                write!(f, "SetSourceEffect({}, {:?})", src, effect)
            }
            Command::AddSource { source, paused } => {
                write!(f, "AddSource({}, paused={})", source.name(), paused)
            }
            Command::DeleteSource { name, millis } => {
                write!(f, "DeleteSource({}, {}ms)", name, millis)
            }
            Command::DeleteAllSources { millis } => write!(f, "DeleteAllSources({}ms)", millis),
            Command::PauseSource { name, paused, millis } => {
                write!(f, "PauseSource({}, paused={}, {}ms)", name, paused, millis)
            }
            Command::CancelSourceCommands { name } => write!(f, "CancelSourceCommands({})", name),
        }
    }
}
