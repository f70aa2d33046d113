//! Reference-counted, pooled PCM buffers.
//!
//! Every hop between graph elements moves a [`BufferHandle`]: a shared,
//! immutable block of interleaved PCM frames plus the [`InfoTag`]s of the
//! sources it originated from. Buffers are produced mutable, filled by one
//! element, then frozen by pushing them into a port.
//!
//! Storage comes from a [`BufferAllocator`] free list so that the steady
//! state of the audio thread performs no heap allocation: dropping the last
//! handle returns the sample storage to the pool it came from.

use crate::error::{Error, Result};
use crate::types::{Format, SampleType};
use std::sync::{Arc, Mutex, Weak};

/// Origin annotation carried by a buffer.
///
/// Tags propagate through processing: a buffer produced from N inputs
/// inherits the union of their tags. Downstream elements use the tags to
/// tell whether the stream behind a buffer has wound down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoTag {
    pub element_id: String,
    pub element_name: String,
    /// True when the tagging element is a source.
    pub source: bool,
    /// True when the tagging source had exhausted its stream by the time
    /// this buffer was pushed.
    pub source_done: bool,
}

/// Interleaved sample storage, tagged by sample type.
#[derive(Debug, Clone)]
pub enum SampleData {
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl SampleData {
    /// Empty storage of the given sample type.
    pub fn empty(sample_type: SampleType) -> Self {
        match sample_type {
            SampleType::Int16 => SampleData::I16(Vec::new()),
            SampleType::Int32 => SampleData::I32(Vec::new()),
            SampleType::Float32 => SampleData::F32(Vec::new()),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            SampleData::I16(_) => SampleType::Int16,
            SampleData::I32(_) => SampleType::Int32,
            SampleData::F32(_) => SampleType::Float32,
        }
    }

    /// Number of samples currently valid.
    pub fn len(&self) -> usize {
        match self {
            SampleData::I16(v) => v.len(),
            SampleData::I32(v) => v.len(),
            SampleData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.sample_type().byte_size()
    }

    fn clear(&mut self) {
        match self {
            SampleData::I16(v) => v.clear(),
            SampleData::I32(v) => v.clear(),
            SampleData::F32(v) => v.clear(),
        }
    }

    fn truncate(&mut self, samples: usize) {
        match self {
            SampleData::I16(v) => v.truncate(samples),
            SampleData::I32(v) => v.truncate(samples),
            SampleData::F32(v) => v.truncate(samples),
        }
    }
}

/// A blob of interleaved PCM frames with a format and origin tags.
///
/// The sample data is private; elements go through the typed slice
/// accessors, which panic on a type mismatch (that mismatch is a bug in
/// the element, not a runtime condition).
#[derive(Debug)]
pub struct Buffer {
    format: Format,
    data: SampleData,
    tags: Vec<InfoTag>,
    pool: Weak<Mutex<PoolInner>>,
}

/// Shared ownership handle. A buffer is immutable once pushed into a port;
/// elements that transform in place use [`Buffer::make_mut`].
pub type BufferHandle = Arc<Buffer>;

impl Buffer {
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        debug_assert_eq!(format.sample_type, self.data.sample_type());
        self.format = format;
    }

    /// Actual valid bytes. Always a multiple of the frame size.
    pub fn byte_size(&self) -> usize {
        self.data.byte_len()
    }

    pub fn frame_count(&self) -> usize {
        let frame = self.format.frame_size();
        if frame == 0 {
            0
        } else {
            self.byte_size() / frame
        }
    }

    /// Shrink the valid region to `frames` frames.
    pub fn truncate_frames(&mut self, frames: usize) {
        self.data.truncate(frames * self.format.channel_count as usize);
    }

    pub fn sample_type(&self) -> SampleType {
        self.data.sample_type()
    }

    pub fn as_i16(&self) -> &[i16] {
        match &self.data {
            SampleData::I16(v) => v,
            other => panic!("buffer sample type is {}, not int16", other.sample_type()),
        }
    }

    pub fn as_i16_mut(&mut self) -> &mut [i16] {
        match &mut self.data {
            SampleData::I16(v) => v,
            other => panic!("buffer sample type is {}, not int16", other.sample_type()),
        }
    }

    pub fn as_i32(&self) -> &[i32] {
        match &self.data {
            SampleData::I32(v) => v,
            other => panic!("buffer sample type is {}, not int32", other.sample_type()),
        }
    }

    pub fn as_i32_mut(&mut self) -> &mut [i32] {
        match &mut self.data {
            SampleData::I32(v) => v,
            other => panic!("buffer sample type is {}, not int32", other.sample_type()),
        }
    }

    pub fn as_f32(&self) -> &[f32] {
        match &self.data {
            SampleData::F32(v) => v,
            other => panic!("buffer sample type is {}, not float32", other.sample_type()),
        }
    }

    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        match &mut self.data {
            SampleData::F32(v) => v,
            other => panic!("buffer sample type is {}, not float32", other.sample_type()),
        }
    }

    pub fn tags(&self) -> &[InfoTag] {
        &self.tags
    }

    pub fn push_tag(&mut self, tag: InfoTag) {
        self.tags.push(tag);
    }

    /// True when every source tag on this buffer reports `source_done`.
    /// Vacuously false for untagged buffers.
    pub fn all_sources_done(&self) -> bool {
        let mut seen_source = false;
        for tag in &self.tags {
            if !tag.source {
                continue;
            }
            seen_source = true;
            if !tag.source_done {
                return false;
            }
        }
        seen_source
    }

    /// True when at least one source tag reports `source_done`.
    pub fn any_source_done(&self) -> bool {
        self.tags.iter().any(|t| t.source && t.source_done)
    }

    /// Append `src`'s tags to `dst`'s tag list.
    pub fn copy_info_tags(src: &Buffer, dst: &mut Buffer) {
        dst.tags.extend(src.tags.iter().cloned());
    }

    /// Copy `src`'s valid samples into `dst`, replacing its contents.
    /// Both buffers must hold the same sample type.
    pub fn copy_data(src: &Buffer, dst: &mut Buffer) {
        match (&src.data, &mut dst.data) {
            (SampleData::I16(s), SampleData::I16(d)) => {
                d.clear();
                d.extend_from_slice(s);
            }
            (SampleData::I32(s), SampleData::I32(d)) => {
                d.clear();
                d.extend_from_slice(s);
            }
            (SampleData::F32(s), SampleData::F32(d)) => {
                d.clear();
                d.extend_from_slice(s);
            }
            _ => panic!(
                "copy between mismatched sample types ({} -> {})",
                src.sample_type(),
                dst.sample_type()
            ),
        }
    }

    /// Get a mutable view of the buffer behind a handle, cloning the
    /// contents through the pool only if the handle is actually shared.
    pub fn make_mut(handle: &mut BufferHandle) -> &mut Buffer {
        Arc::make_mut(handle)
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        Self {
            format: self.format,
            data: self.data.clone(),
            tags: self.tags.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let data = std::mem::replace(&mut self.data, SampleData::F32(Vec::new()));
        if let Some(pool) = self.pool.upgrade() {
            if let Ok(mut inner) = pool.lock() {
                inner.recycle(data);
            }
        }
    }
}

/// Free lists, one per sample type, keeping vector capacity alive between
/// buffers.
#[derive(Default)]
struct PoolInner {
    free_i16: Vec<Vec<i16>>,
    free_i32: Vec<Vec<i32>>,
    free_f32: Vec<Vec<f32>>,
}

// Dropping more than this many blocks of spare capacity per type would let
// one oversized allocation pin memory forever.
const MAX_POOLED_BLOCKS: usize = 64;

impl PoolInner {
    fn recycle(&mut self, mut data: SampleData) {
        data.clear();
        match data {
            SampleData::I16(v) if self.free_i16.len() < MAX_POOLED_BLOCKS => self.free_i16.push(v),
            SampleData::I32(v) if self.free_i32.len() < MAX_POOLED_BLOCKS => self.free_i32.push(v),
            SampleData::F32(v) if self.free_f32.len() < MAX_POOLED_BLOCKS => self.free_f32.push(v),
            _ => {}
        }
    }
}

fn take_block<T>(free: &mut Vec<Vec<T>>, samples: usize) -> std::result::Result<Vec<T>, usize>
where
    T: Default + Clone,
{
    let mut block = free.pop().unwrap_or_default();
    if block.capacity() < samples {
        let needed = samples - block.len();
        if block.try_reserve(needed).is_err() {
            return Err(samples * std::mem::size_of::<T>());
        }
    }
    block.resize(samples, T::default());
    Ok(block)
}

/// Pooled buffer factory shared by a graph and its elements.
#[derive(Clone)]
pub struct BufferAllocator {
    pool: Arc<Mutex<PoolInner>>,
}

impl Default for BufferAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferAllocator {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(Mutex::new(PoolInner::default())),
        }
    }

    /// Allocate a zero-filled buffer of `frames` frames in `format`.
    ///
    /// Requests beyond pooled block sizes fall back to a direct allocation;
    /// only a failed reservation surfaces as [`Error::OutOfMemory`].
    pub fn allocate(&self, format: Format, frames: usize) -> Result<Buffer> {
        let samples = frames * format.channel_count as usize;
        let mut inner = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        let data = match format.sample_type {
            SampleType::Int16 => take_block(&mut inner.free_i16, samples).map(SampleData::I16),
            SampleType::Int32 => take_block(&mut inner.free_i32, samples).map(SampleData::I32),
            SampleType::Float32 => take_block(&mut inner.free_f32, samples).map(SampleData::F32),
        };
        drop(inner);

        let data = data.map_err(|requested| Error::OutOfMemory { requested })?;
        Ok(Buffer {
            format,
            data,
            tags: Vec::new(),
            pool: Arc::downgrade(&self.pool),
        })
    }

    #[cfg(test)]
    fn pooled_blocks(&self) -> usize {
        let inner = self.pool.lock().unwrap();
        inner.free_i16.len() + inner.free_i32.len() + inner.free_f32.len()
    }
}
