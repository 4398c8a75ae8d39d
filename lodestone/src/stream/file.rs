//! Host filesystem stream.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;

use lodestone_shared::errors::LodestoneResult;

use super::{SeekFrom, Stream, StreamCapabilities};

/// Stream over a host file, opened either for reading or for writing.
pub struct FileStream {
    file: File,
    capabilities: StreamCapabilities,
}

impl FileStream {
    /// Open an existing file for reading and seeking.
    pub fn open_for_read(path: &Path) -> LodestoneResult<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            capabilities: StreamCapabilities {
                readable: true,
                writable: false,
                seekable: true,
            },
        })
    }

    /// Create or truncate a file for writing and seeking.
    pub fn open_for_write(path: &Path) -> LodestoneResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            capabilities: StreamCapabilities {
                readable: false,
                writable: true,
                seekable: true,
            },
        })
    }
}

impl Stream for FileStream {
    fn capabilities(&self) -> StreamCapabilities {
        self.capabilities
    }

    fn read(&mut self, buffer: &mut [u8]) -> LodestoneResult<usize> {
        if !self.capabilities.readable {
            return Err(lodestone_shared::errors::LodestoneError::StreamIo(
                "file stream opened write-only".to_string(),
            ));
        }
        Ok(self.file.read(buffer)?)
    }

    fn write(&mut self, buffer: &[u8]) -> LodestoneResult<usize> {
        if !self.capabilities.writable {
            return Err(lodestone_shared::errors::LodestoneError::StreamIo(
                "file stream opened read-only".to_string(),
            ));
        }
        Ok(self.file.write(buffer)?)
    }

    fn flush(&mut self) -> LodestoneResult<()> {
        Ok(self.file.flush()?)
    }

    fn seek(&mut self, position: SeekFrom) -> LodestoneResult<u64> {
        Ok(self.file.seek(position)?)
    }

    fn tell(&mut self) -> LodestoneResult<u64> {
        Ok(self.file.stream_position()?)
    }
}
