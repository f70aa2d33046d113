//! Decoder for OGG, WAV and FLAC streams.
//!
//! Unlike the MP3 decoder this one keeps the file's native channel layout
//! and sample rate; only the sample type is converted to what the decoder
//! was opened with.

use super::{convert_samples, decode_stream_to_f32, Decoder, DecodedPcm};
use crate::error::Result;
use crate::source::SourceStream;
use crate::types::SampleType;
use std::sync::Arc;
use tracing::debug;

pub struct SoundFileDecoder {
    pcm: DecodedPcm,
}

impl SoundFileDecoder {
    pub fn open(
        stream: Arc<dyn SourceStream>,
        extension_hint: &str,
        sample_type: SampleType,
    ) -> Result<Self> {
        let name = stream.name().to_string();
        let (samples, sample_rate, channel_count) = decode_stream_to_f32(stream, extension_hint)?;
        let pcm = DecodedPcm::new(
            convert_samples(samples, sample_type),
            sample_rate,
            channel_count,
        );
        debug!(
            "Sound file opened. [stream='{}', frames={}, rate={}, channels={}]",
            name,
            pcm.total_frames(),
            sample_rate,
            channel_count
        );
        Ok(Self { pcm })
    }
}

impl Decoder for SoundFileDecoder {
    fn sample_rate(&self) -> u32 {
        self.pcm.sample_rate()
    }

    fn channel_count(&self) -> u16 {
        self.pcm.channel_count()
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
