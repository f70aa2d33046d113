//! Synthetic sources: silence and sine tones.
//!
//! Useful for keeping a graph fed (silence under a winding-down mix) and
//! for exercising new elements or device back-ends without audio files.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{BufferAllocator, InfoTag};
use crate::error::Result;
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use crate::types::{Format, SampleType};
use ember_common::timing::frames_for_duration;
use std::sync::Arc;
use tracing::debug;

/// Emits a zero-filled buffer sized to the requested step on every call;
/// never winds down.
pub struct ZeroSource {
    name: String,
    id: String,
    format: Format,
    output: Port,
}

impl ZeroSource {
    pub fn new(name: impl Into<String>, id: impl Into<String>, format: Format) -> Self {
        let mut output = Port::new("out");
        output.set_format(format);
        Self {
            name: name.into(),
            id: id.into(),
            format,
            output,
        }
    }
}

impl Element for ZeroSource {
    fn kind(&self) -> &'static str {
        "ZeroSource"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        self.output.set_format(self.format);
        debug!("Audio zero source prepared. [elem={}, output={}]", self.name, self.format);
        Ok(())
    }

    fn process(
        &mut self,
        allocator: &BufferAllocator,
        _events: &mut EventQueue,
        milliseconds: u32,
    ) -> Result<()> {
        if shutdown_requested(self) {
            self.shutdown();
        }
        if self.output.is_full() {
            return Ok(());
        }
        let frames = frames_for_duration(self.format.sample_rate, milliseconds);
        let mut buffer = allocator.allocate(self.format, frames)?;
        buffer.push_tag(InfoTag {
            element_id: self.id.clone(),
            element_name: self.name.clone(),
            source: true,
            source_done: false,
        });
        self.output.push_buffer(Arc::new(buffer));
        Ok(())
    }

    fn is_source(&self) -> bool {
        true
    }

    fn num_output_ports(&self) -> usize {
        1
    }

    fn output_port(&mut self, index: usize) -> &mut Port {
        assert_eq!(index, 0);
        &mut self.output
    }
}

/// Sine tone source at a fixed frequency, optionally time-limited.
///
/// Float output spans [-1, 1]; integer output scales to the full range of
/// the type.
pub struct SineSource {
    name: String,
    id: String,
    format: Format,
    frequency: u32,
    duration_ms: u32,
    elapsed_ms: u32,
    sample_count: u64,
    output: Port,
}

impl SineSource {
    /// `duration_ms == 0` plays forever.
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        format: Format,
        frequency: u32,
        duration_ms: u32,
    ) -> Self {
        let mut output = Port::new("out");
        output.set_format(format);
        Self {
            name: name.into(),
            id: id.into(),
            format,
            frequency,
            duration_ms,
            elapsed_ms: 0,
            sample_count: 0,
            output,
        }
    }
}

impl Element for SineSource {
    fn kind(&self) -> &'static str {
        "SineSource"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        self.output.set_format(self.format);
        debug!("Audio sine source prepared. [elem={}, output={}]", self.name, self.format);
        Ok(())
    }

    fn process(
        &mut self,
        allocator: &BufferAllocator,
        _events: &mut EventQueue,
        milliseconds: u32,
    ) -> Result<()> {
        if shutdown_requested(self) {
            self.shutdown();
        }
        if self.output.is_full() || self.is_source_done() {
            return Ok(());
        }

        let milliseconds = if self.duration_ms > 0 {
            milliseconds.min(self.duration_ms - self.elapsed_ms)
        } else {
            milliseconds
        };

        let frames = frames_for_duration(self.format.sample_rate, milliseconds);
        let mut buffer = allocator.allocate(self.format, frames)?;

        let channels = self.format.channel_count as usize;
        let step = std::f64::consts::PI * 2.0 * self.frequency as f64 / self.format.sample_rate as f64;
        match self.format.sample_type {
            SampleType::Float32 => {
                let samples = buffer.as_f32_mut();
                for frame in 0..frames {
                    let value = (self.sample_count as f64 * step).sin() as f32;
                    self.sample_count += 1;
                    for ch in 0..channels {
                        samples[frame * channels + ch] = value;
                    }
                }
            }
            SampleType::Int16 => {
                let samples = buffer.as_i16_mut();
                for frame in 0..frames {
                    let value = (self.sample_count as f64 * step).sin() as f32;
                    self.sample_count += 1;
                    for ch in 0..channels {
                        samples[frame * channels + ch] = (i16::MAX as f32 * value) as i16;
                    }
                }
            }
            SampleType::Int32 => {
                let samples = buffer.as_i32_mut();
                for frame in 0..frames {
                    let value = (self.sample_count as f64 * step).sin() as f32;
                    self.sample_count += 1;
                    for ch in 0..channels {
                        samples[frame * channels + ch] = (i32::MAX as f64 * value as f64) as i32;
                    }
                }
            }
        }

        self.elapsed_ms += milliseconds;
        buffer.push_tag(InfoTag {
            element_id: self.id.clone(),
            element_name: self.name.clone(),
            source: true,
            source_done: self.is_source_done(),
        });
        self.output.push_buffer(Arc::new(buffer));
        Ok(())
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        self.duration_ms > 0 && self.elapsed_ms >= self.duration_ms
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

    fn fmt(channels: u16, ty: SampleType) -> Format {
        Format::new(44100, channels, ty)
    }

    #[test]
    fn test_zero_source_emits_silence() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut zero = ZeroSource::new("zero", "id", fmt(2, SampleType::Float32));
        zero.process(&allocator, &mut events, 20).unwrap();

        let buffer = zero.output.pull_buffer().unwrap();
        assert_eq!(buffer.frame_count(), 882);
        assert!(buffer.as_f32().iter().all(|&s| s == 0.0));
        assert!(!buffer.all_sources_done());
        assert!(!zero.is_source_done());
    }

    #[test]
    fn test_sine_values() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut sine = SineSource::new("sine", "id", fmt(1, SampleType::Float32), 440, 0);
        sine.process(&allocator, &mut events, 20).unwrap();

        let buffer = sine.output.pull_buffer().unwrap();
        assert_eq!(buffer.frame_count(), 882);
        let step = std::f64::consts::PI * 2.0 * 440.0 / 44100.0;
        for (n, &sample) in buffer.as_f32().iter().enumerate() {
            let expected = (n as f64 * step).sin() as f32;
            assert!((sample - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sine_phase_continues_across_buffers() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut sine = SineSource::new("sine", "id", fmt(1, SampleType::Float32), 440, 0);
        sine.process(&allocator, &mut events, 10).unwrap();
        let first = sine.output.pull_buffer().unwrap();
        sine.process(&allocator, &mut events, 10).unwrap();
        let second = sine.output.pull_buffer().unwrap();

        let step = std::f64::consts::PI * 2.0 * 440.0 / 44100.0;
        let n = first.frame_count();
        let expected = (n as f64 * step).sin() as f32;
        assert!((second.as_f32()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_sine_duration_limit() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut sine = SineSource::new("sine", "id", fmt(1, SampleType::Float32), 440, 30);

        sine.process(&allocator, &mut events, 20).unwrap();
        let first = sine.output.pull_buffer().unwrap();
        assert_eq!(first.frame_count(), 882);
        assert!(!first.all_sources_done());

        // Second step is clamped to the remaining 10ms and tagged done.
        sine.process(&allocator, &mut events, 20).unwrap();
        let last = sine.output.pull_buffer().unwrap();
        assert_eq!(last.frame_count(), 441);
        assert!(last.all_sources_done());
        assert!(sine.is_source_done());

        // Exhausted source emits nothing.
        sine.process(&allocator, &mut events, 20).unwrap();
        assert!(sine.output.pull_buffer().is_none());
    }

    #[test]
    fn test_sine_int16_full_scale() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut sine = SineSource::new("sine", "id", fmt(1, SampleType::Int16), 441, 0);
        sine.process(&allocator, &mut events, 1000).unwrap();
        let buffer = sine.output.pull_buffer().unwrap();
        let peak = buffer.as_i16().iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 32000, "expected near full-scale peak, got {}", peak);
    }

    #[test]
    fn test_source_pauses_while_output_full() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();
        let mut sine = SineSource::new("sine", "id", fmt(1, SampleType::Float32), 440, 0);
        sine.process(&allocator, &mut events, 10).unwrap();
        let count_before = sine.sample_count;
        // Output slot still occupied: the step must not advance the phase.
        sine.process(&allocator, &mut events, 10).unwrap();
        assert_eq!(sine.sample_count, count_before);
    }
}
