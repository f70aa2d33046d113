//! Streaming PCM decoders.
//!
//! A [`Decoder`] is a typed source of PCM frames: it is opened against
//! exactly one sample type and serves `read_frames_*` calls for that type
//! only; reading with a mismatched type is a contract violation on the
//! caller's side and panics. `reset` rewinds to frame zero.
//!
//! Opening is allowed to be slow (the whole stream is decoded up front so
//! `total_frames` is exact and reads never stall); the file source defers
//! opening to the worker pool when it can.

mod mp3;
mod sound_file;

pub use mp3::Mp3Decoder;
pub use sound_file::SoundFileDecoder;

use crate::buffer::SampleData;
use crate::error::{Error, Result};
use crate::source::{SourceStream, StreamAdapter};
use crate::types::SampleType;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Polymorphic streaming source of PCM frames.
pub trait Decoder: Send {
    fn sample_rate(&self) -> u32;
    fn channel_count(&self) -> u16;
    fn total_frames(&self) -> u64;
    /// The sample type the decoder was opened with.
    fn sample_type(&self) -> SampleType;

    /// Read up to `frames` frames into `out` (which must hold at least
    /// `frames * channel_count` samples). Returns frames actually read.
    fn read_frames_i16(&mut self, out: &mut [i16], frames: usize) -> usize {
        let _ = (out, frames);
        panic!("decoder was opened with sample type {}, not int16", self.sample_type());
    }

    fn read_frames_i32(&mut self, out: &mut [i32], frames: usize) -> usize {
        let _ = (out, frames);
        panic!("decoder was opened with sample type {}, not int32", self.sample_type());
    }

    fn read_frames_f32(&mut self, out: &mut [f32], frames: usize) -> usize {
        let _ = (out, frames);
        panic!("decoder was opened with sample type {}, not float32", self.sample_type());
    }

    /// Seek back to frame 0. Always succeeds on an opened decoder.
    fn reset(&mut self);
}

/// Extension-dispatched decoder open (case-insensitive).
///
/// `.mp3` gets the dedicated MP3 decoder; `.ogg`, `.wav` and `.flac` the
/// general sound file decoder. Anything else is unsupported.
pub fn open_decoder(
    stream: Arc<dyn SourceStream>,
    uri: &str,
    sample_type: SampleType,
) -> Result<Box<dyn Decoder>> {
    match extension_of(uri) {
        Some(ext) => open_decoder_for_extension(stream, &ext, sample_type),
        None => Err(Error::UnsupportedFormat(format!(
            "unknown audio file extension: '{}'",
            uri
        ))),
    }
}

/// Same as [`open_decoder`] with the container already named.
pub fn open_decoder_for_extension(
    stream: Arc<dyn SourceStream>,
    extension: &str,
    sample_type: SampleType,
) -> Result<Box<dyn Decoder>> {
    match extension.to_ascii_lowercase().as_str() {
        "mp3" => Ok(Box::new(Mp3Decoder::open(stream, sample_type)?)),
        "ogg" | "wav" | "flac" => Ok(Box::new(SoundFileDecoder::open(
            stream,
            extension,
            sample_type,
        )?)),
        other => Err(Error::UnsupportedFormat(format!(
            "unknown audio file extension: '{}'",
            other
        ))),
    }
}

pub(crate) fn extension_of(uri: &str) -> Option<String> {
    let dot = uri.rfind('.')?;
    Some(uri[dot + 1..].to_ascii_lowercase())
}

/// Fully decoded PCM held by the file decoders.
///
/// Reads are plain copies from a frame cursor, so decoders are cheap to
/// drive from the audio thread once opened.
pub(crate) struct DecodedPcm {
    data: SampleData,
    sample_rate: u32,
    channel_count: u16,
    cursor: u64,
}

impl DecodedPcm {
    pub(crate) fn new(data: SampleData, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            data,
            sample_rate,
            channel_count,
            cursor: 0,
        }
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub(crate) fn sample_type(&self) -> SampleType {
        self.data.sample_type()
    }

    pub(crate) fn total_frames(&self) -> u64 {
        (self.data.len() / self.channel_count as usize) as u64
    }

    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
    }

    fn read<T: Copy>(samples: &[T], channels: usize, cursor: &mut u64, out: &mut [T], frames: usize) -> usize {
        let start = *cursor as usize * channels;
        let avail_frames = (samples.len() - start.min(samples.len())) / channels;
        let count = frames.min(avail_frames);
        let samples_to_copy = count * channels;
        out[..samples_to_copy].copy_from_slice(&samples[start..start + samples_to_copy]);
        *cursor += count as u64;
        count
    }

    pub(crate) fn read_i16(&mut self, out: &mut [i16], frames: usize) -> usize {
        match &self.data {
            SampleData::I16(v) => {
                Self::read(v, self.channel_count as usize, &mut self.cursor, out, frames)
            }
            _ => panic!("decoded stream holds {}, not int16", self.data.sample_type()),
        }
    }

    pub(crate) fn read_i32(&mut self, out: &mut [i32], frames: usize) -> usize {
        match &self.data {
            SampleData::I32(v) => {
                Self::read(v, self.channel_count as usize, &mut self.cursor, out, frames)
            }
            _ => panic!("decoded stream holds {}, not int32", self.data.sample_type()),
        }
    }

    pub(crate) fn read_f32(&mut self, out: &mut [f32], frames: usize) -> usize {
        match &self.data {
            SampleData::F32(v) => {
                Self::read(v, self.channel_count as usize, &mut self.cursor, out, frames)
            }
            _ => panic!("decoded stream holds {}, not float32", self.data.sample_type()),
        }
    }
}

/// Decode an entire compressed stream to interleaved f32 samples.
///
/// Returns `(samples, sample_rate, channel_count)`.
pub(crate) fn decode_stream_to_f32(
    stream: Arc<dyn SourceStream>,
    extension_hint: &str,
) -> Result<(Vec<f32>, u32, u16)> {
    let stream_name = stream.name().to_string();
    let adapter = StreamAdapter::new(stream);
    let mss = MediaSourceStream::new(Box::new(adapter), Default::default());

    let mut hint = Hint::new();
    if !extension_hint.is_empty() {
        hint.with_extension(extension_hint);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::DecoderOpen(format!("failed to probe '{}': {}", stream_name, e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::DecoderOpen(format!("no audio track in '{}'", stream_name)))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::DecoderOpen(format!("no sample rate in '{}'", stream_name)))?;
    let channel_count = codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| Error::DecoderOpen(format!("no channel count in '{}'", stream_name)))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::DecoderOpen(format!("failed to create decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => {
                warn!("Error reading packet from '{}': {}", stream_name, e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let capacity = decoded.capacity() as u64;
                let buf = sample_buf.get_or_insert_with(|| SampleBuffer::new(capacity, spec));
                if buf.capacity() < decoded.frames() * spec.channels.count() {
                    *buf = SampleBuffer::new(capacity, spec);
                }
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                // Recoverable bitstream hiccup; skip the packet.
                warn!("Decode error in '{}': {}", stream_name, e);
                continue;
            }
            Err(e) => {
                return Err(Error::DecoderOpen(format!(
                    "fatal decode error in '{}': {}",
                    stream_name, e
                )));
            }
        }
    }

    debug!(
        "Decoded audio stream. [stream='{}', frames={}, rate={}, channels={}]",
        stream_name,
        samples.len() / channel_count.max(1) as usize,
        sample_rate,
        channel_count
    );
    Ok((samples, sample_rate, channel_count))
}

/// Convert interleaved f32 samples to the requested sample type.
pub(crate) fn convert_samples(samples: Vec<f32>, sample_type: SampleType) -> SampleData {
    match sample_type {
        SampleType::Float32 => SampleData::F32(samples),
        SampleType::Int16 => SampleData::I16(
            samples
                .iter()
                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .collect(),
        ),
        SampleType::Int32 => SampleData::I32(
            samples
                .iter()
                .map(|&s| (s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32)
                .collect(),
        ),
    }
}
