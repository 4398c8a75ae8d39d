//! Persisted string registries.
//!
//! A string registry maps small integers to canonical strings so that
//! interned values in binary streams can be encoded as indices. The disk
//! layout is `u32 count` followed by `u32 length + bytes` per string.

use std::collections::HashMap;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};
use crate::stream::Stream;

use super::StepResult;

/// Ordered list of interned strings with index lookup both ways.
#[derive(Default)]
pub struct StringRegistry {
    strings: Vec<InternedString>,
    indices: HashMap<InternedString, u32>,
}

impl StringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&InternedString> {
        self.strings.get(index as usize)
    }

    /// Index of `value`, appending it when absent (writer side).
    pub fn index_of(&mut self, value: &InternedString) -> u32 {
        if let Some(index) = self.indices.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.clone());
        self.indices.insert(value.clone(), index);
        index
    }

    pub fn write_to(&self, stream: &mut dyn Stream) -> LodestoneResult<()> {
        stream.write_all(&(self.strings.len() as u32).to_le_bytes())?;
        for value in &self.strings {
            let bytes = value.as_str().as_bytes();
            stream.write_all(&(bytes.len() as u32).to_le_bytes())?;
            stream.write_all(bytes)?;
        }
        Ok(())
    }
}

/// Incremental reader for string-registry files: one string per step so
/// scanning can interleave under its budget.
pub struct StringRegistryReader {
    stream: Box<dyn Stream>,
    remaining: Option<u32>,
    registry: StringRegistry,
    failed: bool,
}

impl StringRegistryReader {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self {
            stream,
            remaining: None,
            registry: StringRegistry::new(),
            failed: false,
        }
    }

    pub fn step(&mut self) -> StepResult {
        if self.failed {
            return StepResult::Failed;
        }
        match self.step_inner() {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(%error, "string registry read failed");
                self.failed = true;
                StepResult::Failed
            }
        }
    }

    fn step_inner(&mut self) -> LodestoneResult<StepResult> {
        let remaining = match self.remaining {
            Some(remaining) => remaining,
            None => {
                let mut count_bytes = [0u8; 4];
                self.stream.read_exact(&mut count_bytes)?;
                let count = u32::from_le_bytes(count_bytes);
                self.remaining = Some(count);
                count
            }
        };

        if remaining == 0 {
            return Ok(StepResult::Finished);
        }

        let mut length_bytes = [0u8; 4];
        self.stream.read_exact(&mut length_bytes)?;
        let length = u32::from_le_bytes(length_bytes) as usize;
        if length > 1 << 20 {
            return Err(LodestoneError::Serialization(format!(
                "implausible registry string length {length}"
            )));
        }

        let mut bytes = vec![0u8; length];
        self.stream.read_exact(&mut bytes)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| LodestoneError::Serialization(format!("registry string not UTF-8: {e}")))?;

        let value = intern(&text);
        self.registry.index_of(&value);
        self.remaining = Some(remaining - 1);
        Ok(StepResult::InProgress)
    }

    pub fn into_registry(self) -> StringRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryStream, SeekFrom};

    #[test]
    fn registry_round_trip_preserves_order() {
        let mut registry = StringRegistry::new();
        let alpha = intern("alpha");
        let beta = intern("beta");
        assert_eq!(registry.index_of(&alpha), 0);
        assert_eq!(registry.index_of(&beta), 1);
        assert_eq!(registry.index_of(&alpha), 0);

        let mut stream = MemoryStream::new();
        registry.write_to(&mut stream).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        let mut reader = StringRegistryReader::new(Box::new(stream));
        loop {
            match reader.step() {
                StepResult::InProgress => {}
                StepResult::Finished => break,
                StepResult::Failed => panic!("registry read failed"),
            }
        }
        let loaded = reader.into_registry();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(0), Some(&alpha));
        assert_eq!(loaded.get(1), Some(&beta));
    }

    #[test]
    fn truncated_registry_fails() {
        let stream = MemoryStream::from_vec(vec![2, 0, 0, 0, 5, 0, 0, 0, b'a']);
        let mut reader = StringRegistryReader::new(Box::new(stream));
        let mut result = reader.step();
        while result == StepResult::InProgress {
            result = reader.step();
        }
        assert_eq!(result, StepResult::Failed);
    }
}
