//! Channel layout elements: widen mono, join and split stereo.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{Buffer, BufferAllocator};
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use crate::types::{Format, SampleType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which stereo channel a widened mono signal lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    Left,
    Right,
    Both,
}

fn widen<T: Copy>(mono: &[T], stereo: &mut [T], channel: Channel) {
    for (i, &sample) in mono.iter().enumerate() {
        match channel {
            Channel::Both => {
                stereo[i * 2] = sample;
                stereo[i * 2 + 1] = sample;
            }
            Channel::Left => stereo[i * 2] = sample,
            Channel::Right => stereo[i * 2 + 1] = sample,
        }
    }
}

fn join<T: Copy>(left: &[T], right: &[T], out: &mut [T]) {
    for i in 0..left.len() {
        out[i * 2] = left[i];
        out[i * 2 + 1] = right[i];
    }
}

fn split<T: Copy>(stereo: &[T], left: &mut [T], right: &mut [T]) {
    for i in 0..left.len() {
        left[i] = stereo[i * 2];
        right[i] = stereo[i * 2 + 1];
    }
}

/// Converts mono input to stereo by duplicating the mono channel into one
/// or both output channels. Stereo input passes through unchanged.
pub struct StereoMaker {
    name: String,
    id: String,
    channel: Channel,
    input: Port,
    output: Port,
}

impl StereoMaker {
    pub fn new(name: impl Into<String>, id: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            channel,
            input: Port::new("in"),
            output: Port::new("out"),
        }
    }
}

impl Element for StereoMaker {
    fn kind(&self) -> &'static str {
        "StereoMaker"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let mut format = self.input.format();
        format.channel_count = 2;
        self.output.set_format(format);
        debug!("Audio stereo maker prepared. [elem={}, output={}]", self.name, format);
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
        let Some(handle) = self.input.pull_buffer() else {
            return Ok(());
        };

        if self.input.format().channel_count == 2 {
            self.output.push_buffer(handle);
            return Ok(());
        }

        let frames = handle.frame_count();
        let mut stereo = allocator.allocate(self.output.format(), frames)?;
        Buffer::copy_info_tags(&handle, &mut stereo);
        match handle.sample_type() {
            SampleType::Int16 => widen(handle.as_i16(), stereo.as_i16_mut(), self.channel),
            SampleType::Int32 => widen(handle.as_i32(), stereo.as_i32_mut(), self.channel),
            SampleType::Float32 => widen(handle.as_f32(), stereo.as_f32_mut(), self.channel),
        }
        self.output.push_buffer(Arc::new(stereo));
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

/// Joins two mono inputs (`left`, `right`) into one interleaved stereo
/// stream. Input formats must match and be mono.
pub struct StereoJoiner {
    name: String,
    id: String,
    in_left: Port,
    in_right: Port,
    output: Port,
}

impl StereoJoiner {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            in_left: Port::new("left"),
            in_right: Port::new("right"),
            output: Port::new("out"),
        }
    }
}

impl Element for StereoJoiner {
    fn kind(&self) -> &'static str {
        "StereoJoiner"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let left = self.in_left.format();
        let right = self.in_right.format();
        if left != right || left.channel_count != 1 {
            return Err(Error::UnsupportedFormat(format!(
                "joiner '{}' inputs are not matching mono streams (left={}, right={})",
                self.name, left, right
            )));
        }
        let out = Format::new(left.sample_rate, 2, left.sample_type);
        self.output.set_format(out);
        debug!("Audio joiner prepared. [elem={}, output={}]", self.name, out);
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
        if !self.in_left.has_buffers() || !self.in_right.has_buffers() {
            return Ok(());
        }
        let (Some(left), Some(right)) = (self.in_left.pull_buffer(), self.in_right.pull_buffer())
        else {
            return Ok(());
        };
        if left.byte_size() != right.byte_size() {
            warn!(
                "Audio joiner cannot join buffers with irregular number of frames. [elem={}]",
                self.name
            );
            return Ok(());
        }

        let frames = left.frame_count();
        let mut stereo = allocator.allocate(self.output.format(), frames)?;
        Buffer::copy_info_tags(&left, &mut stereo);
        Buffer::copy_info_tags(&right, &mut stereo);
        match left.sample_type() {
            SampleType::Int16 => join(left.as_i16(), right.as_i16(), stereo.as_i16_mut()),
            SampleType::Int32 => join(left.as_i32(), right.as_i32(), stereo.as_i32_mut()),
            SampleType::Float32 => join(left.as_f32(), right.as_f32(), stereo.as_f32_mut()),
        }
        self.output.push_buffer(Arc::new(stereo));
        Ok(())
    }

    fn num_input_ports(&self) -> usize {
        2
    }

    fn input_port(&mut self, index: usize) -> &mut Port {
        match index {
            0 => &mut self.in_left,
            1 => &mut self.in_right,
            _ => panic!("{} has no input port {}", self.name, index),
        }
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.output
    }
}

/// Splits one stereo input into two mono outputs (`left`, `right`).
pub struct StereoSplitter {
    name: String,
    id: String,
    input: Port,
    out_left: Port,
    out_right: Port,
}

impl StereoSplitter {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            out_left: Port::new("left"),
            out_right: Port::new("right"),
        }
    }
}

impl Element for StereoSplitter {
    fn kind(&self) -> &'static str {
        "StereoSplitter"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let format = self.input.format();
        if format.channel_count != 2 {
            return Err(Error::UnsupportedFormat(format!(
                "splitter '{}' input is not stereo ({})",
                self.name, format
            )));
        }
        let mono = Format::new(format.sample_rate, 1, format.sample_type);
        self.out_left.set_format(mono);
        self.out_right.set_format(mono);
        debug!("Audio splitter prepared. [elem={}, output={}]", self.name, mono);
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
        let Some(handle) = self.input.pull_buffer() else {
            return Ok(());
        };

        let frames = handle.frame_count();
        let mut left = allocator.allocate(self.out_left.format(), frames)?;
        let mut right = allocator.allocate(self.out_right.format(), frames)?;
        Buffer::copy_info_tags(&handle, &mut left);
        Buffer::copy_info_tags(&handle, &mut right);
        match handle.sample_type() {
            SampleType::Int16 => split(handle.as_i16(), left.as_i16_mut(), right.as_i16_mut()),
            SampleType::Int32 => split(handle.as_i32(), left.as_i32_mut(), right.as_i32_mut()),
            SampleType::Float32 => split(handle.as_f32(), left.as_f32_mut(), right.as_f32_mut()),
        }
        self.out_left.push_buffer(Arc::new(left));
        self.out_right.push_buffer(Arc::new(right));
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
        2
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        match index {
            0 => &mut self.out_left,
            1 => &mut self.out_right,
            _ => panic!("{} has no output port {}", self.name, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::InfoTag;
    use crate::source::FileLoader;

    fn mono_fmt() -> Format {
        Format::new(44100, 1, SampleType::Float32)
    }

    fn stereo_fmt() -> Format {
        Format::new(44100, 2, SampleType::Float32)
    }

    fn tagged_buffer(
        allocator: &BufferAllocator,
        format: Format,
        samples: &[f32],
    ) -> crate::buffer::BufferHandle {
        let frames = samples.len() / format.channel_count as usize;
        let mut buffer = allocator.allocate(format, frames).unwrap();
        buffer.as_f32_mut().copy_from_slice(samples);
        buffer.push_tag(InfoTag {
            element_id: "src".into(),
            element_name: "src".into(),
            source: true,
            source_done: false,
        });
        Arc::new(buffer)
    }

    #[test]
    fn test_maker_duplicates_both_channels() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut maker = StereoMaker::new("maker", "id", Channel::Both);
        maker.input.set_format(mono_fmt());
        maker.prepare(&FileLoader, &PrepareParams::default()).unwrap();
        assert_eq!(maker.output.format().channel_count, 2);

        maker
            .input
            .push_buffer(tagged_buffer(&allocator, mono_fmt(), &[0.1, 0.2]));
        maker.process(&allocator, &mut events, 20).unwrap();
        let out = maker.output.pull_buffer().unwrap();
        assert_eq!(out.as_f32(), &[0.1, 0.1, 0.2, 0.2]);
        assert_eq!(out.tags().len(), 1);
    }

    #[test]
    fn test_maker_single_channel_leaves_other_silent() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut maker = StereoMaker::new("maker", "id", Channel::Right);
        maker.input.set_format(mono_fmt());
        maker.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        maker
            .input
            .push_buffer(tagged_buffer(&allocator, mono_fmt(), &[0.5]));
        maker.process(&allocator, &mut events, 20).unwrap();
        let out = maker.output.pull_buffer().unwrap();
        assert_eq!(out.as_f32(), &[0.0, 0.5]);
    }

    #[test]
    fn test_maker_passes_stereo_through() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut maker = StereoMaker::new("maker", "id", Channel::Both);
        maker.input.set_format(stereo_fmt());
        maker.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        let buffer = tagged_buffer(&allocator, stereo_fmt(), &[0.1, 0.2]);
        maker.input.push_buffer(Arc::clone(&buffer));
        maker.process(&allocator, &mut events, 20).unwrap();
        let out = maker.output.pull_buffer().unwrap();
        assert!(Arc::ptr_eq(&out, &buffer));
    }

    #[test]
    fn test_join_split_round_trip() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();

        let mut splitter = StereoSplitter::new("split", "id");
        splitter.input.set_format(stereo_fmt());
        splitter.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        let mut joiner = StereoJoiner::new("join", "id");
        joiner.in_left.set_format(mono_fmt());
        joiner.in_right.set_format(mono_fmt());
        joiner.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        let original = [0.1f32, -0.1, 0.2, -0.2, 0.3, -0.3];
        splitter
            .input
            .push_buffer(tagged_buffer(&allocator, stereo_fmt(), &original));
        splitter.process(&allocator, &mut events, 20).unwrap();

        let left = splitter.out_left.pull_buffer().unwrap();
        let right = splitter.out_right.pull_buffer().unwrap();
        assert_eq!(left.as_f32(), &[0.1, 0.2, 0.3]);
        assert_eq!(right.as_f32(), &[-0.1, -0.2, -0.3]);
        assert_eq!(left.tags().len(), 1);
        assert_eq!(right.tags().len(), 1);

        joiner.in_left.push_buffer(left);
        joiner.in_right.push_buffer(right);
        joiner.process(&allocator, &mut events, 20).unwrap();
        let rejoined = joiner.output.pull_buffer().unwrap();
        assert_eq!(rejoined.as_f32(), &original);
    }

    #[test]
    fn test_joiner_rejects_mismatched_sizes() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut joiner = StereoJoiner::new("join", "id");
        joiner.in_left.set_format(mono_fmt());
        joiner.in_right.set_format(mono_fmt());
        joiner.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        joiner
            .in_left
            .push_buffer(tagged_buffer(&allocator, mono_fmt(), &[0.1, 0.2]));
        joiner
            .in_right
            .push_buffer(tagged_buffer(&allocator, mono_fmt(), &[0.1]));
        joiner.process(&allocator, &mut events, 20).unwrap();
        assert!(joiner.output.pull_buffer().is_none());
    }

    #[test]
    fn test_joiner_waits_for_both_inputs() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut joiner = StereoJoiner::new("join", "id");
        joiner.in_left.set_format(mono_fmt());
        joiner.in_right.set_format(mono_fmt());
        joiner.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        joiner
            .in_left
            .push_buffer(tagged_buffer(&allocator, mono_fmt(), &[0.1]));
        joiner.process(&allocator, &mut events, 20).unwrap();
        assert!(joiner.output.pull_buffer().is_none());
        // The early buffer is still parked in the port.
        assert!(joiner.in_left.has_buffers());
    }

    #[test]
    fn test_prepare_rejects_bad_formats() {
        let mut joiner = StereoJoiner::new("join", "id");
        joiner.in_left.set_format(mono_fmt());
        joiner.in_right.set_format(Format::new(22050, 1, SampleType::Float32));
        assert!(joiner.prepare(&FileLoader, &PrepareParams::default()).is_err());

        let mut splitter = StereoSplitter::new("split", "id");
        splitter.input.set_format(mono_fmt());
        assert!(splitter.prepare(&FileLoader, &PrepareParams::default()).is_err());
    }
}
