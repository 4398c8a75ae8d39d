//! Read-only pack internals: registry layout, directory tree, section
//! stream.
//!
//! Pack layout: `[u64 LE registry offset][file payloads][registry]`,
//! with the registry serialized through the binary record stream over a
//! private reflection registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};
use crate::rdata::{BinaryReader, StepResult, write_binary_instance};
use crate::reflect::{Archetype, StructBuilder, TypeRegistry};
use crate::stream::{FileStream, SeekFrom, Stream, StreamCapabilities};

// ----------------------------------------------------------------------
// Serialized registry
// ----------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub(crate) struct RopackRegistryItem {
    pub path: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct RopackRegistry {
    pub items: Vec<RopackRegistryItem>,
}

static ROPACK_TYPES: OnceLock<Arc<TypeRegistry>> = OnceLock::new();

/// Private reflection registry describing the on-disk registry types.
pub(crate) fn ropack_type_registry() -> Arc<TypeRegistry> {
    ROPACK_TYPES
        .get_or_init(|| {
            let item = StructBuilder::new::<RopackRegistryItem>("ropack_registry_item_t")
                .field_string("path", std::mem::offset_of!(RopackRegistryItem, path))
                .field_uint("offset", std::mem::offset_of!(RopackRegistryItem, offset), 8)
                .field_uint("size", std::mem::offset_of!(RopackRegistryItem, size), 8)
                .build();
            let registry = StructBuilder::new::<RopackRegistry>("ropack_registry_t")
                .field_dynamic_array::<RopackRegistryItem>(
                    "items",
                    std::mem::offset_of!(RopackRegistry, items),
                    Archetype::Struct {
                        type_name: intern("ropack_registry_item_t"),
                    },
                )
                .build();

            let mut builder = TypeRegistry::builder();
            builder.add_struct(item);
            builder.add_struct(registry);
            builder.build().expect("static ropack types are disjoint")
        })
        .clone()
}

/// Serialize the registry record at the stream's current position.
pub(crate) fn write_pack_registry(
    stream: &mut dyn Stream,
    registry: &RopackRegistry,
) -> LodestoneResult<()> {
    let types = ropack_type_registry();
    let ty = types
        .struct_by_name(&intern("ropack_registry_t"))
        .expect("ropack registry type is always registered")
        .clone();
    unsafe {
        write_binary_instance(
            stream,
            registry as *const RopackRegistry as *const u8,
            &ty,
            &types,
            None,
        )
    }
}

/// Read `[u64 offset]` + registry from an opened pack stream.
pub(crate) fn read_pack_registry(mut stream: Box<dyn Stream>) -> LodestoneResult<RopackRegistry> {
    let mut offset_bytes = [0u8; 8];
    stream.read_exact(&mut offset_bytes)?;
    let registry_offset = u64::from_le_bytes(offset_bytes);
    stream.seek(SeekFrom::Start(registry_offset))?;

    let types = ropack_type_registry();
    let ty = types
        .struct_by_name(&intern("ropack_registry_t"))
        .expect("ropack registry type is always registered")
        .clone();

    let mut registry = RopackRegistry::default();
    let mut reader = unsafe {
        BinaryReader::new_raw(
            stream,
            &mut registry as *mut RopackRegistry as *mut u8,
            ty,
            types,
            None,
        )
    };
    loop {
        match reader.step() {
            StepResult::InProgress => {}
            StepResult::Finished => return Ok(registry),
            StepResult::Failed => {
                return Err(LodestoneError::Serialization(
                    "read-only pack registry is corrupt".to_string(),
                ));
            }
        }
    }
}

// ----------------------------------------------------------------------
// In-memory pack tree
// ----------------------------------------------------------------------

/// A file node: name and extension stored split, payload located by
/// offset and size within the pack file.
#[derive(Debug)]
pub(crate) struct PackFile {
    pub name: InternedString,
    pub extension: InternedString,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PackDir {
    pub name: InternedString,
    pub children: Vec<PackDir>,
    pub files: HashMap<(InternedString, InternedString), PackFile>,
}

impl PackDir {
    pub fn child(&self, name: &InternedString) -> Option<&PackDir> {
        self.children.iter().find(|dir| dir.name == *name)
    }

    fn child_mut_or_insert(&mut self, name: InternedString) -> &mut PackDir {
        if let Some(position) = self.children.iter().position(|dir| dir.name == name) {
            return &mut self.children[position];
        }
        self.children.push(PackDir {
            name,
            ..PackDir::default()
        });
        self.children.last_mut().expect("just pushed")
    }

    pub fn file(&self, component: &str) -> Option<&PackFile> {
        self.files.get(&split_file_name(component))
    }
}

/// Split a file component at the last dot.
///
/// A leading dot makes a name-less dotfile; both halves are empty for
/// the literal `.` component.
pub(crate) fn split_file_name(component: &str) -> (InternedString, InternedString) {
    if component == "." {
        return (intern(""), intern(""));
    }
    match component.rfind('.') {
        Some(position) => (
            intern(&component[..position]),
            intern(&component[position + 1..]),
        ),
        None => (intern(component), intern("")),
    }
}

/// Recompose a split file name.
pub(crate) fn compose_file_name(name: &InternedString, extension: &InternedString) -> String {
    if name.is_empty() && extension.is_empty() {
        ".".to_string()
    } else if extension.is_empty() {
        name.as_str().to_string()
    } else {
        format!("{}.{}", name, extension)
    }
}

/// Build the directory tree for a deserialized registry.
pub(crate) fn build_pack_tree(registry: &RopackRegistry) -> LodestoneResult<PackDir> {
    let mut root = PackDir::default();

    for item in &registry.items {
        let components: Vec<&str> = item
            .path
            .split('/')
            .filter(|component| !component.is_empty())
            .collect();
        let Some((file_component, directories)) = components.split_last() else {
            return Err(LodestoneError::PathInvalid(
                "empty path in read-only pack registry".to_string(),
            ));
        };

        let mut directory = &mut root;
        for component in directories {
            directory = directory.child_mut_or_insert(intern(component));
        }

        let key = split_file_name(file_component);
        if directory.files.contains_key(&key) {
            return Err(LodestoneError::AlreadyExists(format!(
                "duplicate path {} in read-only pack registry",
                item.path
            )));
        }
        directory.files.insert(
            key.clone(),
            PackFile {
                name: key.0,
                extension: key.1,
                offset: item.offset,
                size: item.size,
            },
        );
    }
    Ok(root)
}

// ----------------------------------------------------------------------
// Section stream
// ----------------------------------------------------------------------

/// Read-only stream over one file's span inside a pack, enforcing
/// `[0, size]` bounds on reads and seeks.
pub struct RopackFileStream {
    inner: Box<dyn Stream>,
    begin: u64,
    size: u64,
    position: u64,
}

impl RopackFileStream {
    pub(crate) fn open(pack_path: &Path, offset: u64, size: u64) -> LodestoneResult<Self> {
        let mut inner: Box<dyn Stream> = Box::new(FileStream::open_for_read(pack_path)?);
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            inner,
            begin: offset,
            size,
            position: 0,
        })
    }
}

impl Stream for RopackFileStream {
    fn capabilities(&self) -> StreamCapabilities {
        StreamCapabilities {
            readable: true,
            writable: false,
            seekable: true,
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> LodestoneResult<usize> {
        let remaining = (self.size - self.position) as usize;
        if remaining == 0 {
            return Ok(0);
        }
        let wanted = buffer.len().min(remaining);
        let read = self.inner.read(&mut buffer[..wanted])?;
        self.position += read as u64;
        Ok(read)
    }

    fn seek(&mut self, position: SeekFrom) -> LodestoneResult<u64> {
        let target: i64 = match position {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if target < 0 || target as u64 > self.size {
            return Err(LodestoneError::StreamIo(format!(
                "seek to {target} outside pack file of {} bytes",
                self.size
            )));
        }

        self.position = target as u64;
        self.inner.seek(SeekFrom::Start(self.begin + self.position))?;
        Ok(self.position)
    }

    fn tell(&mut self) -> LodestoneResult<u64> {
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_splitting() {
        let (name, extension) = split_file_name("model.rd");
        assert_eq!(name.as_str(), "model");
        assert_eq!(extension.as_str(), "rd");

        let (name, extension) = split_file_name("archive.tar.gz");
        assert_eq!(name.as_str(), "archive.tar");
        assert_eq!(extension.as_str(), "gz");

        let (name, extension) = split_file_name(".gitignore");
        assert!(name.is_empty());
        assert_eq!(extension.as_str(), "gitignore");

        let (name, extension) = split_file_name("README");
        assert_eq!(name.as_str(), "README");
        assert!(extension.is_empty());

        let (name, extension) = split_file_name(".");
        assert!(name.is_empty());
        assert!(extension.is_empty());
    }

    #[test]
    fn file_name_composition_round_trips() {
        for component in ["model.rd", "archive.tar.gz", ".gitignore", "README", "."] {
            let (name, extension) = split_file_name(component);
            assert_eq!(compose_file_name(&name, &extension), component);
        }
    }

    #[test]
    fn tree_building_nests_directories() {
        let registry = RopackRegistry {
            items: vec![
                RopackRegistryItem {
                    path: "a.bin".to_string(),
                    offset: 8,
                    size: 3,
                },
                RopackRegistryItem {
                    path: "nested/b.rd".to_string(),
                    offset: 11,
                    size: 12,
                },
            ],
        };

        let root = build_pack_tree(&registry).unwrap();
        assert!(root.file("a.bin").is_some());
        let nested = root.child(&intern("nested")).unwrap();
        let file = nested.file("b.rd").unwrap();
        assert_eq!(file.offset, 11);
        assert_eq!(file.size, 12);
    }

    #[test]
    fn duplicate_registry_paths_are_rejected() {
        let registry = RopackRegistry {
            items: vec![
                RopackRegistryItem {
                    path: "same.bin".to_string(),
                    offset: 8,
                    size: 1,
                },
                RopackRegistryItem {
                    path: "same.bin".to_string(),
                    offset: 9,
                    size: 1,
                },
            ],
        };
        assert!(build_pack_tree(&registry).is_err());
    }
}
