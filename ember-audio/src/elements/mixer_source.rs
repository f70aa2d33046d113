//! Composite source mixing a dynamic set of child sources.
//!
//! To its graph a `MixerSource` is one source element; internally it owns
//! an insertion-ordered set of named children, each optionally paused and
//! optionally wearing a fade effect. Children come and go at runtime
//! through commands; commands carrying a delay are queued and tick down
//! on the audio clock in `advance`.
//!
//! Children are mixed at unit gain, not 1/N: overlap loudness is managed
//! with fades rather than renormalisation, so a crossfade does not dip in
//! the middle.

use super::effect::SourceEffect;
use super::mixer::mix_buffers;
use super::{Element, PrepareParams};
use crate::buffer::{Buffer, BufferAllocator};
use crate::command::Command;
use crate::error::Result;
use crate::events::{AudioEvent, EventQueue};
use crate::port::Port;
use crate::source::Loader;
use crate::types::Format;
use std::sync::Arc;
use tracing::{debug, error, warn};

struct Child {
    element: Box<dyn Element>,
    paused: bool,
    effect: Option<SourceEffect>,
}

pub struct MixerSource {
    name: String,
    id: String,
    format: Format,
    /// Insertion-ordered; a re-added name replaces in place.
    children: Vec<(String, Child)>,
    /// Commands waiting out their delay.
    pending: Vec<Command>,
    never_done: bool,
    output: Port,
}

impl MixerSource {
    pub fn new(name: impl Into<String>, id: impl Into<String>, format: Format) -> Self {
        let mut output = Port::new("out");
        output.set_format(format);
        Self {
            name: name.into(),
            id: id.into(),
            format,
            children: Vec::new(),
            pending: Vec::new(),
            never_done: false,
            output,
        }
    }

    /// Keep reporting not-done even with no live children. Used for the
    /// engine's long-lived tracks so they never wind down by themselves.
    pub fn set_never_done(&mut self, never_done: bool) {
        self.never_done = never_done;
    }

    pub fn num_sources(&self) -> usize {
        self.children.len()
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.children.iter().any(|(key, _)| key == name)
    }

    pub fn is_source_paused(&self, name: &str) -> bool {
        self.children
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, child)| child.paused)
            .unwrap_or(false)
    }

    /// Attach a prepared source element. Its output format must match the
    /// mixer's; a mismatching source is refused.
    pub fn add_source(&mut self, mut element: Box<dyn Element>, paused: bool) {
        if !element.is_source() || element.num_output_ports() == 0 {
            error!(
                "Audio mixer refusing non-source element. [elem={}, source={}]",
                self.name,
                element.name()
            );
            return;
        }
        for i in 0..element.num_output_ports() {
            let format = element.output_port(i).format();
            if format != self.format {
                error!(
                    "Audio mixer refusing source with mismatched format. [elem={}, source={}, format={}, expected={}]",
                    self.name,
                    element.name(),
                    format,
                    self.format
                );
                return;
            }
        }

        let key = element.name().to_string();
        let child = Child {
            element,
            paused,
            effect: None,
        };
        debug!(
            "Add audio mixer source. [elem={}, key={}, paused={}]",
            self.name, key, paused
        );
        if let Some(slot) = self.children.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = child;
        } else {
            self.children.push((key, child));
        }
    }

    pub fn delete_source(&mut self, name: &str) {
        let before = self.children.len();
        self.children.retain(|(key, _)| key != name);
        if self.children.len() != before {
            debug!("Delete audio mixer source. [elem={}, source={}]", self.name, name);
        }
    }

    pub fn delete_sources(&mut self) {
        self.children.clear();
        debug!("Delete all audio mixer sources. [elem={}]", self.name);
    }

    pub fn pause_source(&mut self, name: &str, paused: bool) {
        if let Some((_, child)) = self.children.iter_mut().find(|(key, _)| key == name) {
            child.paused = paused;
            debug!(
                "Pause audio mixer source. [elem={}, source={}, pause={}]",
                self.name, name, paused
            );
        }
    }

    pub fn set_source_effect(&mut self, name: &str, effect: SourceEffect) {
        if let Some((_, child)) = self.children.iter_mut().find(|(key, _)| key == name) {
            debug!(
                "Set audio mixer source effect. [elem={}, source={}, effect={:?}]",
                self.name,
                name,
                effect.kind()
            );
            child.effect = Some(effect);
        }
    }

    /// Drop queued (delayed) commands addressed to `name`.
    pub fn cancel_source_commands(&mut self, name: &str) {
        self.pending.retain(|cmd| match cmd {
            Command::DeleteSource { name: n, .. } => n != name,
            Command::PauseSource { name: n, .. } => n != name,
            _ => true,
        });
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::DeleteSource { name, .. } => self.delete_source(&name),
            Command::DeleteAllSources { .. } => self.delete_sources(),
            Command::PauseSource { name, paused, .. } => self.pause_source(&name, paused),
            other => warn!(
                "Mixer source cannot execute queued command. [elem={}, cmd={:?}]",
                self.name, other
            ),
        }
    }

    fn remove_done_effects(&mut self, events: &mut EventQueue) {
        let mixer = self.name.clone();
        for (key, child) in &mut self.children {
            let done = child.effect.as_ref().map(SourceEffect::is_done).unwrap_or(false);
            if !done {
                continue;
            }
            if let Some(effect) = child.effect.take() {
                debug!(
                    "Audio mixer source effect is done. [elem={}, source={}, effect={:?}]",
                    mixer,
                    key,
                    effect.kind()
                );
                events.push_back(AudioEvent::EffectDone {
                    mixer: mixer.clone(),
                    source: key.clone(),
                    effect,
                });
            }
        }
    }

    fn remove_done_sources(&mut self, events: &mut EventQueue) {
        let mut index = 0;
        while index < self.children.len() {
            if !self.children[index].1.element.is_source_done() {
                index += 1;
                continue;
            }
            let (key, mut child) = self.children.remove(index);
            child.element.shutdown();
            debug!("Audio mixer source is done. [elem={}, source={}]", self.name, key);
            events.push_back(AudioEvent::SourceDone {
                mixer: self.name.clone(),
                source: child.element,
            });
        }
    }
}

impl Element for MixerSource {
    fn kind(&self) -> &'static str {
        "MixerSource"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        debug!("Audio mixer source prepared. [elem={}, output={}]", self.name, self.format);
        Ok(())
    }

    fn process(
        &mut self,
        allocator: &BufferAllocator,
        events: &mut EventQueue,
        milliseconds: u32,
    ) -> Result<()> {
        if self.output.is_full() {
            return Ok(());
        }

        let mut src_buffers = Vec::new();
        for (key, child) in &mut self.children {
            if child.paused || child.element.is_source_done() {
                continue;
            }
            if let Err(e) = child.element.process(allocator, events, milliseconds) {
                warn!(
                    "Audio mixer source step failed. [elem={}, source={}, error={}]",
                    self.name, key, e
                );
                continue;
            }
            for i in 0..child.element.num_output_ports() {
                if let Some(mut buffer) = child.element.output_port(i).pull_buffer() {
                    if let Some(effect) = &mut child.effect {
                        effect.apply(Buffer::make_mut(&mut buffer));
                    }
                    src_buffers.push(buffer);
                }
            }
        }
        self.remove_done_effects(events);
        self.remove_done_sources(events);

        match src_buffers.len() {
            0 => {}
            1 => {
                if let Some(buffer) = src_buffers.pop() {
                    self.output.push_buffer(buffer);
                }
            }
            _ => {
                if let Some(mixed) = mix_buffers(allocator, &src_buffers, 1.0)? {
                    self.output.push_buffer(Arc::new(mixed));
                }
            }
        }
        Ok(())
    }

    fn advance(&mut self, milliseconds: u32) {
        let mut index = 0;
        while index < self.pending.len() {
            let fire = {
                let millis = match &mut self.pending[index] {
                    Command::DeleteSource { millis, .. }
                    | Command::DeleteAllSources { millis }
                    | Command::PauseSource { millis, .. } => millis,
                    // Only delayed mutations are ever queued.
                    _ => {
                        index += 1;
                        continue;
                    }
                };
                *millis -= (*millis).min(milliseconds);
                *millis == 0
            };
            if fire {
                let cmd = self.pending.remove(index);
                self.execute(cmd);
            } else {
                index += 1;
            }
        }

        for (_, child) in &mut self.children {
            child.element.advance(milliseconds);
        }
    }

    fn shutdown(&mut self) {
        for (_, child) in &mut self.children {
            child.element.shutdown();
        }
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        if self.never_done {
            return false;
        }
        self.children
            .iter()
            .all(|(_, child)| child.element.is_source_done())
    }

    fn receive_command(&mut self, cmd: Command) {
        match cmd {
            Command::AddSource { source, paused } => self.add_source(source, paused),
            Command::CancelSourceCommands { name } => self.cancel_source_commands(&name),
            Command::SetSourceEffect { src, effect } => self.set_source_effect(&src, effect),
            Command::DeleteSource { ref name, millis } => {
                if millis > 0 {
                    self.pending.push(cmd);
                } else {
                    let name = name.clone();
                    self.delete_source(&name);
                }
            }
            Command::PauseSource { ref name, paused, millis } => {
                if millis > 0 {
                    self.pending.push(cmd);
                } else {
                    let name = name.clone();
                    self.pause_source(&name, paused);
                }
            }
            Command::DeleteAllSources { millis } => {
                if millis > 0 {
                    self.pending.push(Command::DeleteAllSources { millis });
                } else {
                    self.delete_sources();
                }
            }
            other => warn!(
                "Mixer source ignored unexpected command. [elem={}, cmd={:?}]",
                self.name, other
            ),
        }
    }

    fn dispatch_command(&mut self, dest: &str, cmd: Command) -> Option<Command> {
        // A direct child by name wins.
        if let Some((_, child)) = self.children.iter_mut().find(|(key, _)| key == dest) {
            child.element.receive_command(cmd);
            return None;
        }
        // Otherwise descend recursively.
        let mut cmd = cmd;
        for (_, child) in &mut self.children {
            match child.element.dispatch_command(dest, cmd) {
                None => return None,
                Some(returned) => cmd = returned,
            }
        }
        Some(cmd)
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.output
    }
}
