//! Events surfaced by the audio graph.
//!
//! Elements push events into the queue that threads through every
//! `process` call; the engine drains the queue and hands the events to the
//! application layer once per update.

use crate::elements::effect::SourceEffect;
use crate::elements::Element;
use std::any::Any;
use std::collections::VecDeque;

/// Queue of events produced during graph processing.
pub type EventQueue = VecDeque<AudioEvent>;

/// An event produced by an element during processing.
pub enum AudioEvent {
    /// A mixer child exhausted its stream and was detached. The element is
    /// carried in the event so the application may inspect or recycle it.
    SourceDone {
        mixer: String,
        source: Box<dyn Element>,
    },

    /// A per-source fade finished and was removed.
    EffectDone {
        mixer: String,
        source: String,
        effect: SourceEffect,
    },

    /// Application-specific event posted by an element.
    Custom(Box<dyn Any + Send>),
}

impl AudioEvent {
    /// Event type as a string, for filtering and logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            AudioEvent::SourceDone { .. } => "SourceDone",
            AudioEvent::EffectDone { .. } => "EffectDone",
            AudioEvent::Custom(_) => "Custom",
        }
    }
}

impl std::fmt::Debug for AudioEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioEvent::SourceDone { mixer, source } => f
                .debug_struct("SourceDone")
                .field("mixer", mixer)
                .field("source", &source.name())
                .finish(),
            AudioEvent::EffectDone { mixer, source, effect } => f
                .debug_struct("EffectDone")
                .field("mixer", mixer)
                .field("source", source)
                .field("effect", effect)
                .finish(),
            AudioEvent::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
