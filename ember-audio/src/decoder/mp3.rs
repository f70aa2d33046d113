//! MP3 decoder.
//!
//! Always opened in stereo: mono bitstreams are widened by duplicating the
//! channel, so downstream elements can rely on a two-channel layout for
//! every MP3 source regardless of how the file was encoded.

use super::{convert_samples, decode_stream_to_f32, Decoder, DecodedPcm};
use crate::error::Result;
use crate::source::SourceStream;
use crate::types::SampleType;
use std::sync::Arc;
use tracing::debug;

pub struct Mp3Decoder {
    pcm: DecodedPcm,
}

impl Mp3Decoder {
    /// Decode the stream, widening to stereo and converting to
    /// `sample_type`. Slow for long files; callers that care run this on a
    /// worker thread.
    pub fn open(stream: Arc<dyn SourceStream>, sample_type: SampleType) -> Result<Self> {
        let name = stream.name().to_string();
        let (mut samples, sample_rate, channel_count) = decode_stream_to_f32(stream, "mp3")?;

        if channel_count == 1 {
            samples = widen_to_stereo(samples);
        }

        let pcm = DecodedPcm::new(convert_samples(samples, sample_type), sample_rate, 2);
        debug!(
            "Mp3 stream opened. [stream='{}', frames={}, rate={}]",
            name,
            pcm.total_frames(),
            sample_rate
        );
        Ok(Self { pcm })
    }
}

fn widen_to_stereo(mono: Vec<f32>) -> Vec<f32> {
    let mut stereo = Vec::with_capacity(mono.len() * 2);
    for sample in mono {
        stereo.push(sample);
        stereo.push(sample);
    }
    stereo
}

impl Decoder for Mp3Decoder {
    fn sample_rate(&self) -> u32 {
        self.pcm.sample_rate()
    }

    fn channel_count(&self) -> u16 {
        2
    }

    fn total_frames(&self) -> u64 {
        self.pcm.total_frames()
    }

    fn sample_type(&self) -> SampleType {
        self.pcm.sample_type()
    }

    fn read_frames_i16(&mut self, out: &mut [i16], frames: usize) -> usize {
        self.pcm.read_i16(out, frames)
    }

    fn read_frames_i32(&mut self, out: &mut [i32], frames: usize) -> usize {
        self.pcm.read_i32(out, frames)
    }

    fn read_frames_f32(&mut self, out: &mut [f32], frames: usize) -> usize {
        self.pcm.read_f32(out, frames)
    }

    fn reset(&mut self) {
        self.pcm.reset();
    }
}
