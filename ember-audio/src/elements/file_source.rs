//! File-backed audio source with PCM caching and deferred decoder opens.
//!
//! Two process-wide caches keep repeated playback cheap:
//!
//! - The *PCM cache* maps element id to a shared, incrementally filled
//!   blob of decoded PCM. Two file sources sharing an id (a sound effect
//!   fired twice) decode the compressed stream once; the second instance
//!   plays straight from the blob through a pass-through decoder.
//! - The *file-info cache* maps file path to the stream's rate, channel
//!   count and length. With that information on hand, `prepare` can
//!   negotiate formats without a decoder and push the slow open onto the
//!   worker pool; `process` emits nothing until the open completes.
//!
//! Cache writes happen on the audio thread. A completed PCM blob is
//! frozen: `complete` flips once and the data never changes afterwards.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{BufferAllocator, InfoTag, SampleData};
use crate::decoder::{open_decoder, Decoder};
use crate::error::{Error, Result};
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::Loader;
use crate::types::{Format, SampleType};
use ember_common::timing::frames_for_duration;
use ember_common::TaskHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, error, warn};

/// Raw PCM blob shared between the filling file source and any number of
/// pass-through readers.
pub struct PcmBuffer {
    pub complete: bool,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub total_frames: u64,
    pub data: SampleData,
}

/// Stream properties learned from a successful decoder open.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub total_frames: u64,
}

/// Both caches live behind one mutex, held briefly around lookup/insert.
#[derive(Default)]
struct Caches {
    pcm: HashMap<String, Arc<Mutex<PcmBuffer>>>,
    file_info: HashMap<String, FileInfo>,
}

fn caches() -> &'static Mutex<Caches> {
    static CACHES: OnceLock<Mutex<Caches>> = OnceLock::new();
    CACHES.get_or_init(|| Mutex::new(Caches::default()))
}

fn lock_caches() -> std::sync::MutexGuard<'static, Caches> {
    caches().lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop all cached PCM blobs and file infos.
pub fn clear_caches() {
    let mut caches = lock_caches();
    caches.pcm.clear();
    caches.file_info.clear();
}

/// File info from the cache, if a decoder open has recorded it.
pub fn cached_file_info(file: &str) -> Option<FileInfo> {
    lock_caches().file_info.get(file).copied()
}

/// Open a decoder eagerly to learn a file's stream properties, priming
/// the file-info cache so later prepares can defer their decoder opens.
pub fn probe_file(loader: &dyn Loader, file: &str) -> Result<FileInfo> {
    if let Some(info) = cached_file_info(file) {
        return Ok(info);
    }
    let stream = loader.open_audio_stream(file)?;
    let decoder = open_decoder(stream, file, SampleType::Float32)?;
    let info = FileInfo {
        sample_rate: decoder.sample_rate(),
        channel_count: decoder.channel_count(),
        total_frames: decoder.total_frames(),
    };
    lock_caches().file_info.insert(file.to_string(), info);
    debug!("Saved audio file source file info. [file='{}']", file);
    Ok(info)
}

/// Pass-through decoder reading a completed PCM blob; no actual decoding.
struct PcmDecoder {
    buffer: Arc<Mutex<PcmBuffer>>,
    frame: u64,
}

impl PcmDecoder {
    fn new(buffer: Arc<Mutex<PcmBuffer>>) -> Self {
        Self { buffer, frame: 0 }
    }

    fn read<T: Copy>(
        samples: &[T],
        channels: usize,
        frame: &mut u64,
        out: &mut [T],
        frames: usize,
    ) -> usize {
        let start = (*frame as usize * channels).min(samples.len());
        let count = frames.min((samples.len() - start) / channels);
        let n = count * channels;
        out[..n].copy_from_slice(&samples[start..start + n]);
        *frame += count as u64;
        count
    }
}

impl Decoder for PcmDecoder {
    fn sample_rate(&self) -> u32 {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).sample_rate
    }

    fn channel_count(&self) -> u16 {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).channel_count
    }

    fn total_frames(&self) -> u64 {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).total_frames
    }

    fn sample_type(&self) -> SampleType {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .data
            .sample_type()
    }

    fn read_frames_i16(&mut self, out: &mut [i16], frames: usize) -> usize {
        let pcm = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let channels = pcm.channel_count as usize;
        match &pcm.data {
            SampleData::I16(v) => Self::read(v, channels, &mut self.frame, out, frames),
            other => panic!("cached PCM holds {}, not int16", other.sample_type()),
        }
    }

    fn read_frames_i32(&mut self, out: &mut [i32], frames: usize) -> usize {
        let pcm = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let channels = pcm.channel_count as usize;
        match &pcm.data {
            SampleData::I32(v) => Self::read(v, channels, &mut self.frame, out, frames),
            other => panic!("cached PCM holds {}, not int32", other.sample_type()),
        }
    }

    fn read_frames_f32(&mut self, out: &mut [f32], frames: usize) -> usize {
        let pcm = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let channels = pcm.channel_count as usize;
        match &pcm.data {
            SampleData::F32(v) => Self::read(v, channels, &mut self.frame, out, frames),
            other => panic!("cached PCM holds {}, not float32", other.sample_type()),
        }
    }

    fn reset(&mut self) {
        self.frame = 0;
    }
}

/// Source element streaming PCM frames out of an audio file.
pub struct FileSource {
    name: String,
    id: String,
    file: String,
    format: Format,
    loop_count: u32,
    play_count: u32,
    frames_read: u64,
    decoder: Option<Box<dyn Decoder>>,
    open_task: Option<TaskHandle<Result<Box<dyn Decoder>>>>,
    pcm_fill: Option<Arc<Mutex<PcmBuffer>>>,
    pcm_caching: bool,
    output: Port,
}

impl FileSource {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        file: impl Into<String>,
        sample_type: SampleType,
        loop_count: u32,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            file: file.into(),
            format: Format {
                sample_rate: 0,
                channel_count: 0,
                sample_type,
            },
            loop_count: loop_count.max(1),
            play_count: 0,
            frames_read: 0,
            decoder: None,
            open_task: None,
            pcm_fill: None,
            pcm_caching: true,
            output: Port::new("out"),
        }
    }

    /// Per-element opt-out from PCM caching.
    pub fn enable_pcm_caching(&mut self, enable: bool) {
        self.pcm_caching = enable;
    }

    /// True while a deferred decoder open is outstanding.
    pub fn open_pending(&self) -> bool {
        self.open_task.is_some()
    }

    fn poll_open_task(&mut self) -> bool {
        let Some(task) = &self.open_task else {
            return true;
        };
        if !task.is_complete() {
            return false;
        }
        match task.try_take() {
            Some(Ok(decoder)) => {
                self.decoder = Some(decoder);
                debug!("Audio decoder open task is complete. [elem={}]", self.name);
            }
            Some(Err(e)) => {
                error!(
                    "Failed to open decoder on audio stream. [elem={}, file='{}', error={}]",
                    self.name, self.file, e
                );
            }
            None => {}
        }
        self.open_task = None;
        self.decoder.is_some()
    }
}

impl Element for FileSource {
    fn kind(&self) -> &'static str {
        "FileSource"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, loader: &dyn Loader, params: &PrepareParams) -> Result<()> {
        let caching = params.enable_pcm_caching && self.pcm_caching;
        let cached_pcm = if caching {
            lock_caches().pcm.get(&self.id).cloned()
        } else {
            None
        };
        let info = cached_file_info(&self.file);

        let mut decoder: Option<Box<dyn Decoder>> = None;
        let cache_is_complete = cached_pcm
            .as_ref()
            .map(|pcm| pcm.lock().unwrap_or_else(|e| e.into_inner()).complete)
            .unwrap_or(false);

        if let (true, Some(pcm)) = (cache_is_complete, &cached_pcm) {
            // A finished blob for this id: skip decoding entirely.
            decoder = Some(Box::new(PcmDecoder::new(Arc::clone(pcm))));
            debug!(
                "Using a cached PCM audio buffer. [elem={}, file='{}', id={}]",
                self.name, self.file, self.id
            );
        } else {
            let stream = loader.open_audio_stream(&self.file)?;
            let sample_type = self.format.sample_type;

            match (&info, &params.thread_pool) {
                (Some(_), Some(pool)) => {
                    // Stream properties are known: the open can run in the
                    // background while prepare finishes from the cache.
                    let file = self.file.clone();
                    self.open_task =
                        Some(pool.submit(move || open_decoder(stream, &file, sample_type)));
                    debug!("Submitted audio decoder open task. [file='{}']", self.file);
                }
                _ => {
                    decoder = Some(open_decoder(stream, &self.file, sample_type)?);
                }
            }

            if caching && cached_pcm.is_none() {
                let (rate, channels, frames) = match (&info, &decoder) {
                    (Some(info), _) => (info.sample_rate, info.channel_count, info.total_frames),
                    (None, Some(dec)) => (dec.sample_rate(), dec.channel_count(), dec.total_frames()),
                    (None, None) => (0, 0, 0),
                };
                let pcm = Arc::new(Mutex::new(PcmBuffer {
                    complete: false,
                    sample_rate: rate,
                    channel_count: channels,
                    total_frames: frames,
                    data: SampleData::empty(sample_type),
                }));
                lock_caches().pcm.insert(self.id.clone(), Arc::clone(&pcm));
                self.pcm_fill = Some(pcm);
            }
        }

        let (rate, channels) = match (&info, &decoder) {
            (Some(info), _) => (info.sample_rate, info.channel_count),
            (None, Some(dec)) => (dec.sample_rate(), dec.channel_count()),
            (None, None) => {
                return Err(Error::DecoderOpen(format!(
                    "no stream properties available for '{}'",
                    self.file
                )))
            }
        };
        self.format.sample_rate = rate;
        self.format.channel_count = channels;

        if info.is_none() {
            if let Some(dec) = &decoder {
                lock_caches().file_info.insert(
                    self.file.clone(),
                    FileInfo {
                        sample_rate: dec.sample_rate(),
                        channel_count: dec.channel_count(),
                        total_frames: dec.total_frames(),
                    },
                );
                debug!("Saved audio file source file info. [file='{}']", self.file);
            }
        }

        self.decoder = decoder;
        self.output.set_format(self.format);
        debug!(
            "Audio file source prepared. [elem={}, file='{}', format={}]",
            self.name, self.file, self.format
        );
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
            return Ok(());
        }
        if !self.poll_open_task() {
            return Ok(());
        }
        if self.output.is_full() {
            return Ok(());
        }
        let Some(decoder) = self.decoder.as_mut() else {
            // Open failed or the element was shut down.
            return Ok(());
        };

        let frames_wanted = frames_for_duration(self.format.sample_rate, milliseconds) as u64;
        let frames_available = decoder.total_frames();
        let frames = frames_wanted.min(frames_available - self.frames_read) as usize;
        if frames == 0 {
            return Ok(());
        }

        let mut buffer = allocator.allocate(self.format, frames)?;
        let read = match self.format.sample_type {
            SampleType::Float32 => decoder.read_frames_f32(buffer.as_f32_mut(), frames),
            SampleType::Int16 => decoder.read_frames_i16(buffer.as_i16_mut(), frames),
            SampleType::Int32 => decoder.read_frames_i32(buffer.as_i32_mut(), frames),
        };
        if read != frames {
            warn!(
                "Unexpected number of audio frames decoded. [elem={}, expected={}, decoded={}]",
                self.name, frames, read
            );
            buffer.truncate_frames(read);
        }

        if let Some(pcm) = &self.pcm_fill {
            let mut pcm = pcm.lock().unwrap_or_else(|e| e.into_inner());
            if !pcm.complete {
                let channels = self.format.channel_count as usize;
                let samples = read * channels;
                match (&mut pcm.data, &buffer) {
                    (SampleData::I16(dst), b) => dst.extend_from_slice(&b.as_i16()[..samples]),
                    (SampleData::I32(dst), b) => dst.extend_from_slice(&b.as_i32()[..samples]),
                    (SampleData::F32(dst), b) => dst.extend_from_slice(&b.as_f32()[..samples]),
                }
            }
        }

        self.frames_read += read as u64;
        if self.frames_read == frames_available {
            if let Some(pcm) = &self.pcm_fill {
                let mut pcm = pcm.lock().unwrap_or_else(|e| e.into_inner());
                pcm.complete = true;
                pcm.total_frames = frames_available;
                debug!(
                    "Audio PCM buffer is complete. [elem={}, file='{}', id={}, bytes={}]",
                    self.name,
                    self.file,
                    self.id,
                    pcm.data.byte_len()
                );
            }

            self.play_count += 1;
            if self.play_count != self.loop_count {
                if let Some(pcm) = self.pcm_fill.take() {
                    // Further passes replay the frozen blob.
                    self.decoder = Some(Box::new(PcmDecoder::new(pcm)));
                }
                if let Some(decoder) = self.decoder.as_mut() {
                    decoder.reset();
                }
                self.frames_read = 0;
                debug!(
                    "Audio file source was reset for looped playback. [elem={}, file='{}', count={}]",
                    self.name,
                    self.file,
                    self.play_count + 1
                );
            } else {
                debug!("Audio file source is done. [elem={}, file='{}']", self.name, self.file);
            }
            self.pcm_fill = None;
        }

        buffer.push_tag(InfoTag {
            element_id: self.id.clone(),
            element_name: self.name.clone(),
            source: true,
            source_done: self.is_source_done(),
        });
        self.output.push_buffer(Arc::new(buffer));
        Ok(())
    }

    fn shutdown(&mut self) {
        // An in-flight open task is abandoned; the worker completes it and
        // the result is discarded with the handle.
        self.open_task = None;
        self.decoder = None;
        self.pcm_fill = None;
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        if self.open_task.is_some() {
            return false;
        }
        let Some(decoder) = &self.decoder else {
            return true;
        };
        self.play_count == self.loop_count && self.frames_read == decoder.total_frames()
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

    #[test]
    fn test_pcm_decoder_reads_and_resets() {
        let pcm = Arc::new(Mutex::new(PcmBuffer {
            complete: true,
            sample_rate: 44100,
            channel_count: 2,
            total_frames: 3,
            data: SampleData::F32(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]),
        }));
        let mut decoder = PcmDecoder::new(Arc::clone(&pcm));
        assert_eq!(decoder.total_frames(), 3);
        assert_eq!(decoder.channel_count(), 2);
        assert_eq!(decoder.sample_type(), SampleType::Float32);

        let mut out = vec![0.0f32; 4];
        assert_eq!(decoder.read_frames_f32(&mut out, 2), 2);
        assert_eq!(out, vec![0.0, 0.1, 0.2, 0.3]);
        assert_eq!(decoder.read_frames_f32(&mut out, 2), 1);
        decoder.reset();
        assert_eq!(decoder.read_frames_f32(&mut out, 2), 2);
        assert_eq!(out, vec![0.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_source_without_decoder_reports_done() {
        let source = FileSource::new("music", "id-a", "a.wav", SampleType::Float32, 1);
        // Unprepared (no decoder, no pending open): treated as done.
        assert!(source.is_source_done());
        assert!(source.is_source());
    }
}
