//! Polymorphic stream endpoints.
//!
//! A [`Stream`] exposes read/write/flush/seek/tell; any subset may be
//! unsupported for a given implementation, signalled by the default trait
//! bodies returning a stream error instead of a missing op-table entry.
//! Callers that care check [`Stream::capabilities`] up front.

mod file;
mod memory;

pub use file::FileStream;
pub use memory::MemoryStream;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

pub use std::io::SeekFrom;

/// Which operations a stream supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamCapabilities {
    pub readable: bool,
    pub writable: bool,
    pub seekable: bool,
}

fn unsupported(op: &str) -> LodestoneError {
    LodestoneError::StreamIo(format!("operation not supported by this stream: {op}"))
}

/// A polymorphic I/O endpoint.
///
/// Implementations override the operations they support and leave the
/// rest to the default bodies.
pub trait Stream: Send {
    fn capabilities(&self) -> StreamCapabilities;

    fn read(&mut self, _buffer: &mut [u8]) -> LodestoneResult<usize> {
        Err(unsupported("read"))
    }

    fn write(&mut self, _buffer: &[u8]) -> LodestoneResult<usize> {
        Err(unsupported("write"))
    }

    fn flush(&mut self) -> LodestoneResult<()> {
        Ok(())
    }

    fn seek(&mut self, _position: SeekFrom) -> LodestoneResult<u64> {
        Err(unsupported("seek"))
    }

    fn tell(&mut self) -> LodestoneResult<u64> {
        Err(unsupported("tell"))
    }

    /// Read exactly `buffer.len()` bytes or fail.
    fn read_exact(&mut self, buffer: &mut [u8]) -> LodestoneResult<()> {
        let mut done = 0usize;
        while done < buffer.len() {
            let read = self.read(&mut buffer[done..])?;
            if read == 0 {
                return Err(LodestoneError::StreamIo(format!(
                    "unexpected end of stream: wanted {} more bytes",
                    buffer.len() - done
                )));
            }
            done += read;
        }
        Ok(())
    }

    /// Write the whole buffer or fail.
    fn write_all(&mut self, buffer: &[u8]) -> LodestoneResult<()> {
        let mut done = 0usize;
        while done < buffer.len() {
            let written = self.write(&buffer[done..])?;
            if written == 0 {
                return Err(LodestoneError::StreamIo(
                    "stream refused to accept more bytes".to_string(),
                ));
            }
            done += written;
        }
        Ok(())
    }
}

/// Read the remaining bytes of a stream into a vector.
pub fn read_to_end(stream: &mut dyn Stream) -> LodestoneResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_round_trip() {
        let mut stream = MemoryStream::new();
        stream.write_all(b"hello lodestone").unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        let bytes = read_to_end(&mut stream).unwrap();
        assert_eq!(bytes, b"hello lodestone");
    }

    #[test]
    fn unsupported_operation_reports_stream_error() {
        struct ReadOnly;
        impl Stream for ReadOnly {
            fn capabilities(&self) -> StreamCapabilities {
                StreamCapabilities {
                    readable: true,
                    ..Default::default()
                }
            }
            fn read(&mut self, _buffer: &mut [u8]) -> LodestoneResult<usize> {
                Ok(0)
            }
        }

        let mut s = ReadOnly;
        assert!(!s.capabilities().writable);
        assert!(matches!(
            s.write(b"nope"),
            Err(LodestoneError::StreamIo(_))
        ));
    }

    #[test]
    fn seek_from_end_lands_before_end() {
        let mut stream = MemoryStream::from_vec(vec![1, 2, 3, 4, 5]);
        let position = stream.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(position, 3);

        let mut tail = [0u8; 2];
        stream.read_exact(&mut tail).unwrap();
        assert_eq!(tail, [4, 5]);
    }
}
