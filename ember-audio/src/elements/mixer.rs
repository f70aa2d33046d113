//! N-to-1 buffer mixing.
//!
//! Mixing combines whole buffers only; there is no splitting or queueing.
//! That works as long as every contributing buffer in a step covers the
//! same amount of PCM. The one exception is a source winding down: its
//! last buffer may be short, which is fine because no further buffer will
//! follow it from that source. The short buffer is recognised by its
//! `source_done` info tag — intermediate elements copy tags and never
//! clear them, so the check holds for single-producer chains even when the
//! bytes were transformed in between.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{Buffer, BufferAllocator, BufferHandle};
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use crate::types::SampleType;
use std::sync::Arc;
use tracing::{debug, warn};

/// Mix `buffers` element-wise into one output, scaling each input by
/// `gain`. Integer samples accumulate with saturating adds.
///
/// Returns `None` (emitting nothing) when buffer sizes disagree beyond the
/// winding-down exception described above.
pub(crate) fn mix_buffers(
    allocator: &BufferAllocator,
    buffers: &[BufferHandle],
    gain: f32,
) -> Result<Option<Buffer>> {
    let Some(first) = buffers.first() else {
        return Ok(None);
    };
    let max_frames = buffers.iter().map(|b| b.frame_count()).max().unwrap_or(0);

    for buffer in buffers {
        if buffer.frame_count() != max_frames && !buffer.any_source_done() {
            warn!(
                "Audio mixer dropping step with irregular buffer sizes. [frames={}, expected={}]",
                buffer.frame_count(),
                max_frames
            );
            return Ok(None);
        }
    }

    let mut out = allocator.allocate(first.format(), max_frames)?;
    for buffer in buffers {
        Buffer::copy_info_tags(buffer, &mut out);
        match buffer.sample_type() {
            SampleType::Float32 => {
                let dst = out.as_f32_mut();
                for (i, &sample) in buffer.as_f32().iter().enumerate() {
                    dst[i] += sample * gain;
                }
            }
            SampleType::Int16 => {
                let dst = out.as_i16_mut();
                for (i, &sample) in buffer.as_i16().iter().enumerate() {
                    dst[i] = dst[i].saturating_add((sample as f32 * gain) as i16);
                }
            }
            SampleType::Int32 => {
                let dst = out.as_i32_mut();
                for (i, &sample) in buffer.as_i32().iter().enumerate() {
                    dst[i] = dst[i].saturating_add((sample as f64 * gain as f64) as i32);
                }
            }
        }
    }
    Ok(Some(out))
}

/// Static mixer element: N same-format inputs, one output, gain 1/N.
pub struct Mixer {
    name: String,
    id: String,
    inputs: Vec<Port>,
    output: Port,
}

impl Mixer {
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
        }
    }

    pub fn with_inputs(name: impl Into<String>, id: impl Into<String>, num_inputs: usize) -> Self {
        let ports = (0..num_inputs).map(|i| format!("in{}", i)).collect();
        Self::new(name, id, ports)
    }
}

impl Element for Mixer {
    fn kind(&self) -> &'static str {
        "Mixer"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        // All input ports must agree on the format; a resampler upstream
        // is the tool for converting mismatched streams.
        let master = self.inputs[0].format();
        if !master.is_valid() {
            return Err(Error::UnsupportedFormat(format!(
                "mixer '{}' input port format is invalid",
                self.name
            )));
        }
        for port in &self.inputs {
            if port.format() != master {
                return Err(Error::UnsupportedFormat(format!(
                    "mixer '{}' port '{}' format {} is incompatible with {}",
                    self.name,
                    port.name(),
                    port.format(),
                    master
                )));
            }
        }
        self.output.set_format(master);
        debug!(
            "Audio mixer prepared. [elem={}, srcs={}, output={}]",
            self.name,
            self.inputs.len(),
            master
        );
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
        let gain = 1.0 / self.inputs.len() as f32;
        let buffers: Vec<BufferHandle> = self
            .inputs
            .iter_mut()
            .filter_map(|port| port.pull_buffer())
            .collect();
        if buffers.is_empty() {
            return Ok(());
        }

        if let Some(mixed) = mix_buffers(allocator, &buffers, gain)? {
            self.output.push_buffer(Arc::new(mixed));
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::InfoTag;
    use crate::source::FileLoader;
    use crate::types::Format;

    fn fmt() -> Format {
        Format::new(44100, 1, SampleType::Float32)
    }

    fn buffer_of(
        allocator: &BufferAllocator,
        samples: &[f32],
        source_done: bool,
    ) -> BufferHandle {
        let mut buffer = allocator.allocate(fmt(), samples.len()).unwrap();
        buffer.as_f32_mut().copy_from_slice(samples);
        buffer.push_tag(InfoTag {
            element_id: "src".into(),
            element_name: "src".into(),
            source: true,
            source_done,
        });
        Arc::new(buffer)
    }

    fn prepared_mixer(inputs: usize) -> Mixer {
        let mut mixer = Mixer::with_inputs("mixer", "id", inputs);
        for i in 0..inputs {
            mixer.inputs[i].set_format(fmt());
        }
        mixer.prepare(&FileLoader, &PrepareParams::default()).unwrap();
        mixer
    }

    #[test]
    fn test_mixes_with_equal_gain() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut mixer = prepared_mixer(2);

        mixer.inputs[0].push_buffer(buffer_of(&allocator, &[0.2, 0.4], false));
        mixer.inputs[1].push_buffer(buffer_of(&allocator, &[0.6, 0.8], false));
        mixer.process(&allocator, &mut events, 20).unwrap();

        let out = mixer.output.pull_buffer().unwrap();
        assert_eq!(out.as_f32(), &[0.4, 0.6]);
        // Union of tags from both inputs.
        assert_eq!(out.tags().len(), 2);
    }

    #[test]
    fn test_empty_step_emits_nothing() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut mixer = prepared_mixer(2);
        mixer.process(&allocator, &mut events, 20).unwrap();
        assert!(mixer.output.pull_buffer().is_none());
    }

    #[test]
    fn test_size_mismatch_drops_step() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut mixer = prepared_mixer(2);
        mixer.inputs[0].push_buffer(buffer_of(&allocator, &[0.1, 0.2], false));
        mixer.inputs[1].push_buffer(buffer_of(&allocator, &[0.1], false));
        mixer.process(&allocator, &mut events, 20).unwrap();
        assert!(mixer.output.pull_buffer().is_none());
    }

    #[test]
    fn test_short_last_buffer_accepted() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut mixer = prepared_mixer(2);
        mixer.inputs[0].push_buffer(buffer_of(&allocator, &[0.5, 0.5], false));
        // Short buffer from a winding-down source.
        mixer.inputs[1].push_buffer(buffer_of(&allocator, &[0.5], true));
        mixer.process(&allocator, &mut events, 20).unwrap();

        let out = mixer.output.pull_buffer().unwrap();
        assert_eq!(out.frame_count(), 2);
        assert_eq!(out.as_f32(), &[0.5, 0.25]);
    }

    #[test]
    fn test_int16_mixing_saturates() {
        let allocator = BufferAllocator::new();
        let int_fmt = Format::new(44100, 1, SampleType::Int16);
        let mut a = allocator.allocate(int_fmt, 2).unwrap();
        a.as_i16_mut().copy_from_slice(&[30000, -30000]);
        let mut b = allocator.allocate(int_fmt, 2).unwrap();
        b.as_i16_mut().copy_from_slice(&[30000, -30000]);

        let mixed = mix_buffers(&allocator, &[Arc::new(a), Arc::new(b)], 1.0)
            .unwrap()
            .unwrap();
        assert_eq!(mixed.as_i16(), &[i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_prepare_rejects_mismatched_inputs() {
        let mut mixer = Mixer::with_inputs("mixer", "id", 2);
        mixer.inputs[0].set_format(fmt());
        mixer.inputs[1].set_format(Format::new(22050, 1, SampleType::Float32));
        assert!(mixer.prepare(&FileLoader, &PrepareParams::default()).is_err());
    }
}
