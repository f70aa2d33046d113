//! Sample rate conversion element.
//!
//! Wraps a rubato sinc resampler, keeping filter state across buffers so
//! streaming stays free of phase discontinuities. The resampler is sized
//! to the first buffer it sees; later buffers of the same size are
//! processed statefully, a shorter (final) buffer goes through the partial
//! path, and the tail of an oversized buffer is discarded with a warning.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{Buffer, BufferAllocator};
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use crate::types::{Format, SampleType};
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Resampler {
    name: String,
    id: String,
    out_rate: u32,
    input: Port,
    output: Port,
    state: Option<SincFixedIn<f32>>,
    chunk_frames: usize,
}

impl Resampler {
    pub fn new(name: impl Into<String>, id: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            out_rate: sample_rate,
            input: Port::new("in"),
            output: Port::new("out"),
            state: None,
            chunk_frames: 0,
        }
    }

    fn create_state(&mut self, chunk_frames: usize) -> Result<()> {
        let in_format = self.input.format();
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let state = SincFixedIn::<f32>::new(
            self.out_rate as f64 / in_format.sample_rate as f64,
            1.0,
            params,
            chunk_frames,
            in_format.channel_count as usize,
        )
        .map_err(|e| Error::Resample(format!("failed to create resampler: {}", e)))?;
        debug!(
            "Created resampler state. [elem={}, {}Hz -> {}Hz, chunk={}]",
            self.name, in_format.sample_rate, self.out_rate, chunk_frames
        );
        self.state = Some(state);
        self.chunk_frames = chunk_frames;
        Ok(())
    }
}

/// Interleaved -> planar, for rubato.
fn deinterleave(samples: &[f32], channels: usize, frames: usize) -> Vec<Vec<f32>> {
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in 0..frames {
        for (ch, lane) in planar.iter_mut().enumerate() {
            lane.push(samples[frame * channels + ch]);
        }
    }
    planar
}

/// Planar -> interleaved, into a prepared buffer.
fn interleave(planar: &[Vec<f32>], out: &mut [f32]) {
    let channels = planar.len();
    for (ch, lane) in planar.iter().enumerate() {
        for (frame, &sample) in lane.iter().enumerate() {
            out[frame * channels + ch] = sample;
        }
    }
}

impl Element for Resampler {
    fn kind(&self) -> &'static str {
        "Resampler"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let in_format = self.input.format();
        if in_format.sample_type != SampleType::Float32 {
            return Err(Error::UnsupportedFormat(format!(
                "resampler '{}' requires float32 input, got {}",
                self.name, in_format.sample_type
            )));
        }
        let out_format = Format::new(self.out_rate, in_format.channel_count, SampleType::Float32);
        self.output.set_format(out_format);
        debug!("Audio re-sampler prepared. [elem={}, output={}]", self.name, out_format);
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

        let in_format = self.input.format();
        let out_format = self.output.format();
        if in_format == out_format {
            self.output.push_buffer(handle);
            return Ok(());
        }

        let channels = in_format.channel_count as usize;
        let mut frames = handle.frame_count();
        if frames == 0 {
            return Ok(());
        }
        if self.state.is_none() {
            self.create_state(frames)?;
        }
        if frames > self.chunk_frames {
            warn!(
                "Audio re-sampler discarding input frames. [elem={}, frames={}]",
                self.name,
                frames - self.chunk_frames
            );
            frames = self.chunk_frames;
        }

        let planar_in = deinterleave(handle.as_f32(), channels, frames);
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let planar_out = if frames == self.chunk_frames {
            state.process(&planar_in, None)
        } else {
            state.process_partial(Some(planar_in.as_slice()), None)
        }
        .map_err(|e| Error::Resample(format!("resampling failed: {}", e)))?;

        let out_frames = planar_out.first().map(Vec::len).unwrap_or(0);
        if out_frames == 0 {
            return Ok(());
        }
        let mut out = allocator.allocate(out_format, out_frames)?;
        interleave(&planar_out, out.as_f32_mut());
        Buffer::copy_info_tags(&handle, &mut out);
        self.output.push_buffer(Arc::new(out));
        Ok(())
    }

    fn shutdown(&mut self) {
        self.state = None;
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
