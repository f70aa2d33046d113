//! Source backed by an in-memory byte buffer.
//!
//! Same streaming contract as [`super::FileSource`] but the compressed
//! bytes are handed in directly, so there is no loader, no caching and no
//! deferred open; the decoder opens synchronously during prepare.

use super::{shutdown_requested, Element, PrepareParams};
use crate::buffer::{BufferAllocator, InfoTag};
use crate::decoder::{open_decoder_for_extension, Decoder};
use crate::error::Result;
use crate::events::EventQueue;
use crate::port::Port;
use crate::source::{Loader, SourceStream};
use crate::types::{Format, SampleType};
use ember_common::timing::frames_for_duration;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct StreamSource {
    name: String,
    id: String,
    stream: Arc<dyn SourceStream>,
    /// Container of the compressed bytes ("mp3", "ogg", "wav", "flac").
    container: String,
    format: Format,
    frames_read: u64,
    decoder: Option<Box<dyn Decoder>>,
    output: Port,
}

impl StreamSource {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        stream: Arc<dyn SourceStream>,
        container: impl Into<String>,
        sample_type: SampleType,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            stream,
            container: container.into(),
            format: Format {
                sample_rate: 0,
                channel_count: 0,
                sample_type,
            },
            frames_read: 0,
            decoder: None,
            output: Port::new("out"),
        }
    }
}

impl Element for StreamSource {
    fn kind(&self) -> &'static str {
        "StreamSource"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, _loader: &dyn Loader, _params: &PrepareParams) -> Result<()> {
        let decoder = open_decoder_for_extension(
            Arc::clone(&self.stream),
            &self.container,
            self.format.sample_type,
        )?;
        self.format.sample_rate = decoder.sample_rate();
        self.format.channel_count = decoder.channel_count();
        self.output.set_format(self.format);
        self.decoder = Some(decoder);
        debug!(
            "Audio buffer source prepared. [elem={}, output={}]",
            self.name, self.format
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
        if self.output.is_full() {
            return Ok(());
        }
        let Some(decoder) = self.decoder.as_mut() else {
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

        self.frames_read += read as u64;
        if self.frames_read == frames_available {
            debug!("Audio buffer source is done. [elem={}]", self.name);
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
        self.decoder = None;
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_source_done(&self) -> bool {
        match &self.decoder {
            Some(decoder) => self.frames_read == decoder.total_frames(),
            None => true,
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
