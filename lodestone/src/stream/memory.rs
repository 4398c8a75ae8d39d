//! Growable in-memory stream.

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use super::{SeekFrom, Stream, StreamCapabilities};

/// In-memory read/write/seek stream over a growable buffer.
#[derive(Default)]
pub struct MemoryStream {
    buffer: Vec<u8>,
    position: usize,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Stream for MemoryStream {
    fn capabilities(&self) -> StreamCapabilities {
        StreamCapabilities {
            readable: true,
            writable: true,
            seekable: true,
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> LodestoneResult<usize> {
        let available = self.buffer.len().saturating_sub(self.position);
        let count = available.min(buffer.len());
        buffer[..count].copy_from_slice(&self.buffer[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn write(&mut self, buffer: &[u8]) -> LodestoneResult<usize> {
        let end = self.position + buffer.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(buffer);
        self.position = end;
        Ok(buffer.len())
    }

    fn seek(&mut self, position: SeekFrom) -> LodestoneResult<u64> {
        let target: i64 = match position {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => self.buffer.len() as i64 + delta,
        };

        if target < 0 {
            return Err(LodestoneError::StreamIo(format!(
                "seek before start of stream: {target}"
            )));
        }

        self.position = target as usize;
        Ok(self.position as u64)
    }

    fn tell(&mut self) -> LodestoneResult<u64> {
        Ok(self.position as u64)
    }
}
