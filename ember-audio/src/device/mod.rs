//! Device sinks consuming the engine's PCM output.
//!
//! The engine pushes fixed-duration buffers into per-track device streams
//! and keeps each stream topped up to a watermark; the device drains them
//! at its own pace. [`CpalDevice`] plays through the platform back-end,
//! [`NullDevice`] swallows audio for tests and headless runs.

mod cpal_device;

pub use cpal_device::CpalDevice;

use crate::buffer::BufferHandle;
use crate::error::{Error, Result};
use crate::types::Format;
use ember_common::timing::frames_to_ms;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Identifies one open device stream.
pub type StreamId = usize;

/// Platform audio output contract used by the engine.
pub trait DeviceSink: Send {
    /// Open a PCM stream in the given format. The format must agree with
    /// the device's output rate and channel layout.
    fn open_stream(&mut self, name: &str, format: Format) -> Result<StreamId>;

    /// Queue one buffer for playback on a stream.
    fn queue_buffer(&mut self, stream: StreamId, buffer: BufferHandle) -> Result<()>;

    /// Milliseconds of audio queued and not yet consumed.
    fn buffered_ms(&self, stream: StreamId) -> u32;

    fn close_stream(&mut self, stream: StreamId);
}

struct NullStream {
    format: Format,
    queued: VecDeque<BufferHandle>,
}

#[derive(Default)]
struct NullInner {
    streams: Vec<Option<NullStream>>,
}

/// Sink that parks queued buffers until someone takes them.
///
/// Cloning shares the underlying state, so a test can keep a handle while
/// the engine owns the boxed sink, and drain what the engine produced.
#[derive(Clone, Default)]
pub struct NullDevice {
    inner: Arc<Mutex<NullInner>>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything queued on a stream, simulating device consumption.
    pub fn take_buffers(&self, stream: StreamId) -> Vec<BufferHandle> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.streams.get_mut(stream) {
            Some(Some(s)) => s.queued.drain(..).collect(),
            _ => Vec::new(),
        }
    }
}

impl DeviceSink for NullDevice {
    fn open_stream(&mut self, _name: &str, format: Format) -> Result<StreamId> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.streams.push(Some(NullStream {
            format,
            queued: VecDeque::new(),
        }));
        Ok(inner.streams.len() - 1)
    }

    fn queue_buffer(&mut self, stream: StreamId, buffer: BufferHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.streams.get_mut(stream) {
            Some(Some(s)) => {
                s.queued.push_back(buffer);
                Ok(())
            }
            _ => Err(Error::Device(format!("unknown stream {}", stream))),
        }
    }

    fn buffered_ms(&self, stream: StreamId) -> u32 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.streams.get(stream) {
            Some(Some(s)) => {
                let frames: usize = s.queued.iter().map(|b| b.frame_count()).sum();
                frames_to_ms(s.format.sample_rate, frames) as u32
            }
            _ => 0,
        }
    }

    fn close_stream(&mut self, stream: StreamId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = inner.streams.get_mut(stream) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAllocator;
    use crate::types::SampleType;

    #[test]
    fn test_null_device_queues_and_drains() {
        let allocator = BufferAllocator::new();
        let format = Format::new(44100, 2, SampleType::Float32);
        let mut device = NullDevice::new();
        let probe = device.clone();

        let stream = device.open_stream("music", format).unwrap();
        assert_eq!(device.buffered_ms(stream), 0);

        for _ in 0..3 {
            let buffer = allocator.allocate(format, 882).unwrap();
            device.queue_buffer(stream, Arc::new(buffer)).unwrap();
        }
        assert_eq!(device.buffered_ms(stream), 60);

        let drained = probe.take_buffers(stream);
        assert_eq!(drained.len(), 3);
        assert_eq!(device.buffered_ms(stream), 0);
    }

    #[test]
    fn test_closed_stream_rejects_buffers() {
        let allocator = BufferAllocator::new();
        let format = Format::new(44100, 2, SampleType::Float32);
        let mut device = NullDevice::new();
        let stream = device.open_stream("music", format).unwrap();
        device.close_stream(stream);
        let buffer = Arc::new(allocator.allocate(format, 10).unwrap());
        assert!(device.queue_buffer(stream, buffer).is_err());
    }
}
