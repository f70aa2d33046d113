//! Buffer routing elements: fan-out, FIFO decoupling, delayed start,
//! sequential playlists and a null sink.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{Buffer, BufferAllocator};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// One input copied to N identical outputs.
pub struct Splitter {
    name: String,
    id: String,
    input: Port,
    outputs: Vec<Port>,
}

impl Splitter {
    /// `output_ports` empty falls back to two outputs, `out0` and `out1`.
    pub fn new(name: impl Into<String>, id: impl Into<String>, output_ports: Vec<String>) -> Self {
        let outputs = if output_ports.is_empty() {
            vec![Port::new("out0"), Port::new("out1")]
        } else {
            output_ports.into_iter().map(Port::new).collect()
        };
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            outputs,
        }
    }
}

impl Element for Splitter {
    fn kind(&self) -> &'static str {
        "Splitter"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let format = self.input.format();
        if !format.is_valid() {
            return Err(Error::UnsupportedFormat(format!(
                "splitter '{}' input format is invalid",
                self.name
            )));
        }
        for port in &mut self.outputs {
            port.set_format(format);
        }
        debug!("Audio splitter prepared. [elem={}, format={}]", self.name, format);
        Ok(())
    }

    fn process(
        &mut self,
        allocator: &BufferAllocator,
        _events: &mut EventQueue,
        _milliseconds: u32,
    ) -> Result<()> {
        if shutdown_requested(self) {
            self.shutdown();
        }
        let Some(src) = self.input.pull_buffer() else {
            return Ok(());
        };

        for port in &mut self.outputs {
            // Each copy takes the destination port's own pre-set format.
            // Prepare assigns every output port the input format, so the
            // copies are format-identical to the source buffer.
            let mut out = allocator.allocate(port.format(), src.frame_count())?;
            Buffer::copy_data(&src, &mut out);
            Buffer::copy_info_tags(&src, &mut out);
            port.push_buffer(Arc::new(out));
        }
        Ok(())
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn input_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.input
    }

    fn num_output_ports(&self) -> usize {
        self.outputs.len()
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        &mut self.outputs[index]
    }
}

/// Unbounded FIFO decoupling a producer from a consumer that briefly
/// stalls: accepts one buffer per step, emits one per step when the
/// output slot is free.
pub struct Queue {
    name: String,
    id: String,
    input: Port,
    output: Port,
    queue: VecDeque<crate::buffer::BufferHandle>,
}

impl Queue {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            output: Port::new("out"),
            queue: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Element for Queue {
    fn kind(&self) -> &'static str {
        "Queue"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let format = self.input.format();
        self.output.set_format(format);
        debug!("Audio queue element prepared. [elem={}, output={}]", self.name, format);
        Ok(())
    }

    fn process(
        &mut self,
        _allocator: &BufferAllocator,
        _events: &mut EventQueue,
        _milliseconds: u32,
    ) -> Result<()> {
        if shutdown_requested(self) {
            self.shutdown();
        }
        if let Some(buffer) = self.input.pull_buffer() {
            self.queue.push_back(buffer);
        }
        if self.queue.is_empty() || self.output.is_full() {
            return Ok(());
        }
        if let Some(front) = self.queue.pop_front() {
            self.output.push_buffer(front);
        }
        Ok(())
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn input_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.input
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.output
    }
}

/// Pass-through that starts forwarding only after a real-time countdown
/// has elapsed. Counts down in `advance`, not in `process`.
pub struct Delay {
    name: String,
    id: String,
    input: Port,
    output: Port,
    delay_ms: u32,
}

impl Delay {
    pub fn new(name: impl Into<String>, id: impl Into<String>, delay_ms: u32) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            output: Port::new("out"),
            delay_ms,
        }
    }

    pub fn remaining_ms(&self) -> u32 {
        self.delay_ms
    }
}

impl Element for Delay {
    fn kind(&self) -> &'static str {
        "Delay"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let format = self.input.format();
        self.output.set_format(format);
        debug!("Audio delay element prepared. [elem={}, output={}]", self.name, format);
        Ok(())
    }

    fn process(
        &mut self,
        _allocator: &BufferAllocator,
        _events: &mut EventQueue,
        _milliseconds: u32,
    ) -> Result<()> {
        if shutdown_requested(self) {
            self.shutdown();
        }
        if self.delay_ms > 0 {
            return Ok(());
        }
        if let Some(buffer) = self.input.pull_buffer() {
            self.output.push_buffer(buffer);
        }
        Ok(())
    }

    fn advance(&mut self, milliseconds: u32) {
        self.delay_ms -= self.delay_ms.min(milliseconds);
    }

    fn num_input_ports(&self) -> usize {
        1
    }

    fn input_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.input
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.output
    }
}

/// Plays its input ports one after another: buffers flow from the current
/// port until a pulled buffer shows every source behind it has wound
/// down, then the next port takes over.
pub struct Playlist {
    name: String,
    id: String,
    inputs: Vec<Port>,
    output: Port,
    current: usize,
}

impl Playlist {
    /// `input_ports` empty falls back to two inputs, `in0` and `in1`.
    pub fn new(name: impl Into<String>, id: impl Into<String>, input_ports: Vec<String>) -> Self {
        let inputs = if input_ports.is_empty() {
            vec![Port::new("in0"), Port::new("in1")]
        } else {
            input_ports.into_iter().map(Port::new).collect()
        };
        Self {
            name: name.into(),
            id: id.into(),
            inputs,
            output: Port::new("out"),
            current: 0,
        }
    }
}

impl Element for Playlist {
    fn kind(&self) -> &'static str {
        "Playlist"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let master = self.inputs[0].format();
        if !master.is_valid() {
            return Err(Error::UnsupportedFormat(format!(
                "playlist '{}' input port format is invalid",
                self.name
            )));
        }
        for port in &self.inputs {
            if port.format() != master {
                return Err(Error::UnsupportedFormat(format!(
                    "playlist '{}' port '{}' format {} is incompatible with {}",
                    self.name,
                    port.name(),
                    port.format(),
                    master
                )));
            }
        }
        self.output.set_format(master);
        debug!(
            "Audio playlist prepared. [elem={}, srcs={}, output={}]",
            self.name,
            self.inputs.len(),
            master
        );
        Ok(())
    }

    fn process(
        &mut self,
        _allocator: &BufferAllocator,
        _events: &mut EventQueue,
        _milliseconds: u32,
    ) -> Result<()> {
        if shutdown_requested(self) {
            self.shutdown();
        }
        if self.current == self.inputs.len() {
            return Ok(());
        }
        let Some(buffer) = self.inputs[self.current].pull_buffer() else {
            return Ok(());
        };

        if buffer.all_sources_done() {
            self.current += 1;
        }
        self.output.push_buffer(buffer);
        Ok(())
    }

    fn num_input_ports(&self) -> usize {
        self.inputs.len()
    }

    fn input_port(&mut self, index: usize) -> &mut Port {
        &mut self.inputs[index]
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.output
    }
}

/// Swallows whatever arrives on its input.
pub struct Null {
    name: String,
    id: String,
    input: Port,
}

impl Null {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
        }
    }
}

impl Element for Null {
    fn kind(&self) -> &'static str {
        "Null"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        Ok(())
    }

    fn process(
        &mut self,
        _allocator: &BufferAllocator,
        _events: &mut EventQueue,
        _milliseconds: u32,
    ) -> Result<()> {
        if shutdown_requested(self) {
            self.shutdown();
        }
        let _ = self.input.pull_buffer();
        Ok(())
    }

    fn receive_command(&mut self, _cmd: Command) {}

    fn num_input_ports(&self) -> usize {
        1
    }

    fn input_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.input
    }
}
