//! Fade and gain elements.
//!
//! The fade window lives in element-local milliseconds: time starts at
//! zero when the element starts processing and advances by
//! `frames / sample_rate * 1000` per processed frame, so fades stay
//! sample-accurate across buffer boundaries.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{Buffer, BufferAllocator};
use crate::command::Command;
use crate::error::Result;
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Direction of a fade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    FadeIn,
    FadeOut,
}

/// Fade the frames of `buffer` against a window `[start_ms, start_ms +
/// duration_ms]`, starting at local time `time_ms`. Returns the local time
/// after the last frame.
///
/// Before the window the multiplier clamps to the window edge (silence for
/// a fade-in, unity for a fade-out); after it, to the other edge.
pub(crate) fn fade_buffer(
    buffer: &mut Buffer,
    time_ms: f32,
    start_ms: f32,
    duration_ms: f32,
    kind: EffectKind,
) -> f32 {
    let format = buffer.format();
    let channels = format.channel_count as usize;
    let ms_per_frame = 1000.0 / format.sample_rate as f32;
    let frames = buffer.frame_count();

    let gain_at = |t: f32| -> f32 {
        let progress = if duration_ms > 0.0 {
            ((t - start_ms) / duration_ms).clamp(0.0, 1.0)
        } else {
            1.0
        };
        match kind {
            EffectKind::FadeIn => progress,
            EffectKind::FadeOut => 1.0 - progress,
        }
    };

    let t = time_ms;
    apply_frame_gain(buffer, frames, channels, |frame_idx| {
        gain_at(t + frame_idx as f32 * ms_per_frame)
    });
    t + frames as f32 * ms_per_frame
}

/// Apply a per-frame gain function to every channel of every frame.
fn apply_frame_gain<F: Fn(usize) -> f32>(
    buffer: &mut Buffer,
    frames: usize,
    channels: usize,
    gain_at_frame: F,
) {
    match buffer.sample_type() {
        crate::types::SampleType::Float32 => {
            let samples = buffer.as_f32_mut();
            for frame in 0..frames {
                let gain = gain_at_frame(frame);
                for ch in 0..channels {
                    samples[frame * channels + ch] *= gain;
                }
            }
        }
        crate::types::SampleType::Int16 => {
            let samples = buffer.as_i16_mut();
            for frame in 0..frames {
                let gain = gain_at_frame(frame);
                for ch in 0..channels {
                    let idx = frame * channels + ch;
                    samples[idx] = (samples[idx] as f32 * gain) as i16;
                }
            }
        }
        crate::types::SampleType::Int32 => {
            let samples = buffer.as_i32_mut();
            for frame in 0..frames {
                let gain = gain_at_frame(frame);
                for ch in 0..channels {
                    let idx = frame * channels + ch;
                    samples[idx] = (samples[idx] as f64 * gain as f64) as i32;
                }
            }
        }
    }
}

/// Per-source fade held by a mixer for one of its children.
///
/// The window always starts at local time zero; `is_done` reports when the
/// fade has run its full duration.
#[derive(Debug, Clone)]
pub struct SourceEffect {
    kind: EffectKind,
    duration_ms: u32,
    time_ms: f32,
}

impl SourceEffect {
    pub fn new(kind: EffectKind, duration_ms: u32) -> Self {
        Self {
            kind,
            duration_ms,
            time_ms: 0.0,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn apply(&mut self, buffer: &mut Buffer) {
        self.time_ms = fade_buffer(buffer, self.time_ms, 0.0, self.duration_ms as f32, self.kind);
    }

    pub fn is_done(&self) -> bool {
        self.time_ms >= self.duration_ms as f32
    }
}

/// Fade element: applies a fade-in or fade-out window to the stream
/// passing through it. Samples past a finished fade-out are silenced.
pub struct Effect {
    name: String,
    id: String,
    input: Port,
    output: Port,
    kind: EffectKind,
    start_time_ms: u32,
    duration_ms: u32,
    sample_time_ms: f32,
}

impl Effect {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        time_ms: u32,
        duration_ms: u32,
        kind: EffectKind,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            output: Port::new("out"),
            kind,
            start_time_ms: time_ms,
            duration_ms,
            sample_time_ms: 0.0,
        }
    }

    fn set_effect(&mut self, kind: EffectKind, time_ms: u32, duration_ms: u32) {
        self.kind = kind;
        self.start_time_ms = time_ms;
        self.duration_ms = duration_ms;
        self.sample_time_ms = 0.0;
        debug!(
            "Set audio effect. [elem={}, effect={:?}, time={}ms, duration={}ms]",
            self.name, kind, time_ms, duration_ms
        );
    }
}

impl Element for Effect {
    fn kind(&self) -> &'static str {
        "Effect"
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
        debug!("Audio effect prepared. [elem={}, output={}]", self.name, format);
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
        let Some(mut handle) = self.input.pull_buffer() else {
            return Ok(());
        };

        let window_end = (self.start_time_ms + self.duration_ms) as f32;
        if self.sample_time_ms >= window_end {
            // Window already passed: fade-out silences, fade-in passes
            // through untouched.
            if self.kind == EffectKind::FadeOut {
                let buffer = Buffer::make_mut(&mut handle);
                silence(buffer);
            }
            self.output.push_buffer(handle);
            return Ok(());
        }

        let buffer = Buffer::make_mut(&mut handle);
        self.sample_time_ms = fade_buffer(
            buffer,
            self.sample_time_ms,
            self.start_time_ms as f32,
            self.duration_ms as f32,
            self.kind,
        );
        self.output.push_buffer(handle);
        Ok(())
    }

    fn receive_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetEffect { kind, time_ms, duration_ms } => {
                self.set_effect(kind, time_ms, duration_ms)
            }
            other => tracing::warn!(
                "Effect ignored unexpected command. [elem={}, cmd={:?}]",
                self.name,
                other
            ),
        }
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

fn silence(buffer: &mut Buffer) {
    match buffer.sample_type() {
        crate::types::SampleType::Float32 => buffer.as_f32_mut().fill(0.0),
        crate::types::SampleType::Int16 => buffer.as_i16_mut().fill(0),
        crate::types::SampleType::Int32 => buffer.as_i32_mut().fill(0),
    }
}

/// Constant gain stage. Integer samples clip to their type's range.
pub struct Gain {
    name: String,
    id: String,
    input: Port,
    output: Port,
    gain: f32,
}

impl Gain {
    pub fn new(name: impl Into<String>, id: impl Into<String>, gain: f32) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            input: Port::new("in"),
            output: Port::new("out"),
            gain,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Element for Gain {
    fn kind(&self) -> &'static str {
        "Gain"
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
        debug!(
            "Audio gain element prepared. [elem={}, gain={}, output={}]",
            self.name, self.gain, format
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
        let Some(mut handle) = self.input.pull_buffer() else {
            return Ok(());
        };

        let gain = self.gain;
        let buffer = Buffer::make_mut(&mut handle);
        match buffer.sample_type() {
            crate::types::SampleType::Float32 => {
                for sample in buffer.as_f32_mut() {
                    *sample *= gain;
                }
            }
            crate::types::SampleType::Int16 => {
                for sample in buffer.as_i16_mut() {
                    *sample = (*sample as f32 * gain)
                        .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                }
            }
            crate::types::SampleType::Int32 => {
                for sample in buffer.as_i32_mut() {
                    *sample = (*sample as f64 * gain as f64)
                        .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                }
            }
        }
        self.output.push_buffer(handle);
        Ok(())
    }

    fn receive_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetGain { gain } => {
                self.gain = gain;
                debug!("Received audio gain command. [elem={}, gain={}]", self.name, gain);
            }
            other => tracing::warn!(
                "Gain ignored unexpected command. [elem={}, cmd={:?}]",
                self.name,
                other
            ),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileLoader;
    use crate::types::{Format, SampleType};
    use std::sync::Arc;

    fn fmt() -> Format {
        Format::new(1000, 1, SampleType::Float32)
    }

    fn buffer_of(allocator: &BufferAllocator, samples: &[f32]) -> crate::buffer::BufferHandle {
        let mut buffer = allocator.allocate(fmt(), samples.len()).unwrap();
        buffer.as_f32_mut().copy_from_slice(samples);
        Arc::new(buffer)
    }

    #[test]
    fn test_fade_in_ramp() {
        // 1kHz mono: one frame per millisecond keeps the numbers readable.
        let allocator = BufferAllocator::new();
        let mut buffer = allocator.allocate(fmt(), 10).unwrap();
        buffer.as_f32_mut().fill(1.0);

        let t = fade_buffer(&mut buffer, 0.0, 0.0, 10.0, EffectKind::FadeIn);
        assert!((t - 10.0).abs() < 1e-3);
        let samples = buffer.as_f32();
        assert_eq!(samples[0], 0.0);
        assert!((samples[5] - 0.5).abs() < 1e-6);
        assert!(samples.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_fade_out_silences_after_window() {
        let allocator = BufferAllocator::new();
        let mut effect = Effect::new("fade", "id", 0, 5, EffectKind::FadeOut);
        effect.input.set_format(fmt());
        effect.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        let mut events = EventQueue::new();
        // First buffer covers the whole 5ms window.
        effect.input.push_buffer(buffer_of(&allocator, &[1.0; 5]));
        effect.process(&allocator, &mut events, 5).unwrap();
        let faded = effect.output.pull_buffer().unwrap();
        assert_eq!(faded.as_f32()[0], 1.0);
        assert!(faded.as_f32()[4] < 0.3);

        // Second buffer is past the window: fully silenced.
        effect.input.push_buffer(buffer_of(&allocator, &[1.0; 5]));
        effect.process(&allocator, &mut events, 5).unwrap();
        let silent = effect.output.pull_buffer().unwrap();
        assert!(silent.as_f32().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fade_in_passes_through_after_window() {
        let allocator = BufferAllocator::new();
        let mut effect = Effect::new("fade", "id", 0, 5, EffectKind::FadeIn);
        effect.input.set_format(fmt());
        effect.prepare(&FileLoader, &PrepareParams::default()).unwrap();

        let mut events = EventQueue::new();
        effect.input.push_buffer(buffer_of(&allocator, &[1.0; 5]));
        effect.process(&allocator, &mut events, 5).unwrap();
        effect.output.pull_buffer().unwrap();

        effect.input.push_buffer(buffer_of(&allocator, &[0.25; 5]));
        effect.process(&allocator, &mut events, 5).unwrap();
        let out = effect.output.pull_buffer().unwrap();
        assert!(out.as_f32().iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_set_effect_command_restarts_clock() {
        let mut effect = Effect::new("fade", "id", 0, 5, EffectKind::FadeIn);
        effect.sample_time_ms = 100.0;
        effect.receive_command(Command::SetEffect {
            kind: EffectKind::FadeOut,
            time_ms: 10,
            duration_ms: 20,
        });
        assert_eq!(effect.sample_time_ms, 0.0);
        assert_eq!(effect.kind, EffectKind::FadeOut);
        assert_eq!(effect.start_time_ms, 10);
        assert_eq!(effect.duration_ms, 20);
    }

    #[test]
    fn test_gain_scales_and_clips() {
        let allocator = BufferAllocator::new();
        let mut events = EventQueue::new();

        let mut gain = Gain::new("gain", "id", 0.5);
        gain.input.set_format(fmt());
        gain.prepare(&FileLoader, &PrepareParams::default()).unwrap();
        gain.input.push_buffer(buffer_of(&allocator, &[1.0, -0.5]));
        gain.process(&allocator, &mut events, 5).unwrap();
        let out = gain.output.pull_buffer().unwrap();
        assert_eq!(out.as_f32(), &[0.5, -0.25]);

        // Integer samples clip to the type range.
        let int_fmt = Format::new(1000, 1, SampleType::Int16);
        let mut gain = Gain::new("gain", "id", 4.0);
        gain.input.set_format(int_fmt);
        gain.prepare(&FileLoader, &PrepareParams::default()).unwrap();
        let mut buffer = allocator.allocate(int_fmt, 2).unwrap();
        buffer.as_i16_mut().copy_from_slice(&[20000, -20000]);
        gain.input.push_buffer(Arc::new(buffer));
        gain.process(&allocator, &mut events, 5).unwrap();
        let out = gain.output.pull_buffer().unwrap();
        assert_eq!(out.as_i16(), &[i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_source_effect_done() {
        let allocator = BufferAllocator::new();
        let mut effect = SourceEffect::new(EffectKind::FadeIn, 10);
        assert!(!effect.is_done());

        let mut buffer = allocator.allocate(fmt(), 10).unwrap();
        buffer.as_f32_mut().fill(1.0);
        effect.apply(&mut buffer);
        assert!(effect.is_done());
        assert_eq!(buffer.as_f32()[0], 0.0);
    }
}
