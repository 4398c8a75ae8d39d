//! Read-only pack builder.

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::stream::{SeekFrom, Stream};

use super::ropack::{RopackRegistry, RopackRegistryItem, write_pack_registry};

const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// Builds a sealed pack: `begin` takes the output stream, `add` appends
/// one file payload per call, `finalize` writes the registry and patches
/// the leading registry offset.
#[derive(Default)]
pub struct ReadOnlyPackBuilder {
    state: Option<BuilderState>,
}

struct BuilderState {
    output: Box<dyn Stream>,
    registry: RopackRegistry,
    cursor: u64,
}

impl ReadOnlyPackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building into `output`. The stream must be writable and
    /// seekable; the leading offset field is reserved immediately.
    pub fn begin(&mut self, mut output: Box<dyn Stream>) -> LodestoneResult<()> {
        if self.state.is_some() {
            return Err(LodestoneError::InvalidState(
                "pack builder already building".to_string(),
            ));
        }
        output.write_all(&0u64.to_le_bytes())?;
        self.state = Some(BuilderState {
            output,
            registry: RopackRegistry::default(),
            cursor: 8,
        });
        Ok(())
    }

    /// Copy `input` into the pack under `path`.
    pub fn add(&mut self, input: &mut dyn Stream, path: &str) -> LodestoneResult<()> {
        let state = self.state.as_mut().ok_or_else(|| {
            LodestoneError::InvalidState("pack builder not building".to_string())
        })?;

        if state.registry.items.iter().any(|item| item.path == path) {
            return Err(LodestoneError::AlreadyExists(format!(
                "path {path} already added to pack"
            )));
        }

        let offset = state.cursor;
        let mut size = 0u64;
        let mut chunk = [0u8; COPY_CHUNK_BYTES];
        loop {
            let read = input.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            state.output.write_all(&chunk[..read])?;
            size += read as u64;
        }

        state.cursor += size;
        state.registry.items.push(RopackRegistryItem {
            path: path.to_string(),
            offset,
            size,
        });

        tracing::debug!(path = %path, offset, size, "added file to read-only pack");
        Ok(())
    }

    /// Write the registry, patch the offset field and hand the stream
    /// back.
    pub fn finalize(&mut self) -> LodestoneResult<Box<dyn Stream>> {
        let mut state = self.state.take().ok_or_else(|| {
            LodestoneError::InvalidState("pack builder not building".to_string())
        })?;

        let registry_offset = state.cursor;
        write_pack_registry(state.output.as_mut(), &state.registry)?;

        state.output.seek(SeekFrom::Start(0))?;
        state.output.write_all(&registry_offset.to_le_bytes())?;
        state.output.flush()?;

        tracing::debug!(
            files = state.registry.items.len(),
            registry_offset,
            "finalized read-only pack"
        );
        Ok(state.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;
    use crate::vfs::ropack::{build_pack_tree, read_pack_registry};

    fn build_sample_pack() -> Vec<u8> {
        let mut builder = ReadOnlyPackBuilder::new();
        builder.begin(Box::new(MemoryStream::new())).unwrap();
        builder
            .add(&mut MemoryStream::from_vec(vec![1, 2, 3]), "a.bin")
            .unwrap();
        builder
            .add(
                &mut MemoryStream::from_vec(b"//! foo\nx = 1\n".to_vec()),
                "nested/b.rd",
            )
            .unwrap();
        let mut output = builder.finalize().unwrap();

        let mut bytes = Vec::new();
        output.seek(SeekFrom::Start(0)).unwrap();
        let mut chunk = [0u8; 256];
        loop {
            let read = output.read(&mut chunk).unwrap();
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
        }
        bytes
    }

    #[test]
    fn pack_round_trips_through_registry_reader() {
        let bytes = build_sample_pack();

        // Payloads start right after the 8-byte offset field.
        assert_eq!(&bytes[8..11], &[1, 2, 3]);

        let registry =
            read_pack_registry(Box::new(MemoryStream::from_vec(bytes.clone()))).unwrap();
        assert_eq!(registry.items.len(), 2);
        assert_eq!(registry.items[0].path, "a.bin");
        assert_eq!(registry.items[0].offset, 8);
        assert_eq!(registry.items[0].size, 3);
        assert_eq!(registry.items[1].path, "nested/b.rd");
        assert_eq!(registry.items[1].size, 14);

        let tree = build_pack_tree(&registry).unwrap();
        assert!(tree.file("a.bin").is_some());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut builder = ReadOnlyPackBuilder::new();
        builder.begin(Box::new(MemoryStream::new())).unwrap();
        builder
            .add(&mut MemoryStream::from_vec(vec![0]), "dup.bin")
            .unwrap();
        assert!(
            builder
                .add(&mut MemoryStream::from_vec(vec![1]), "dup.bin")
                .is_err()
        );
    }

    #[test]
    fn add_before_begin_is_invalid() {
        let mut builder = ReadOnlyPackBuilder::new();
        assert!(
            builder
                .add(&mut MemoryStream::from_vec(vec![0]), "x.bin")
                .is_err()
        );
    }
}
