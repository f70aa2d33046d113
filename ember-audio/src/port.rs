//! Single-slot ports between graph elements.
//!
//! A port is a typed mailbox holding at most one buffer. The graph moves
//! buffers from upstream output ports into downstream input ports once per
//! step, which gives the element network its FIFO timing: a buffer pushed
//! at step `k` crosses its link at step `k+1`.
//!
//! Ports also carry string control messages ("shutdown") addressed to the
//! owning element; the element drains them at the start of its step.

use crate::buffer::BufferHandle;
use crate::types::Format;
use std::collections::VecDeque;

/// Control message asking the receiving element to release its resources.
pub const MSG_SHUTDOWN: &str = "shutdown";

/// A single-slot buffer mailbox with a negotiated format.
#[derive(Debug, Default)]
pub struct Port {
    name: String,
    format: Format,
    slot: Option<BufferHandle>,
    messages: VecDeque<String>,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: Format::default(),
            slot: None,
            messages: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Set during prepare when formats are negotiated along the links.
    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Push a buffer into the slot. Rejected when the slot is occupied.
    pub fn push_buffer(&mut self, buffer: BufferHandle) -> bool {
        if self.slot.is_some() {
            return false;
        }
        self.slot = Some(buffer);
        true
    }

    /// Take the buffered handle, emptying the slot.
    pub fn pull_buffer(&mut self) -> Option<BufferHandle> {
        self.slot.take()
    }

    pub fn has_buffers(&self) -> bool {
        self.slot.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.slot.is_some()
    }

    /// Queue a control message for the owning element.
    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push_back(message.into());
    }

    /// Drain queued control messages in arrival order.
    pub fn drain_messages(&mut self) -> impl Iterator<Item = String> + '_ {
        self.messages.drain(..)
    }
}
