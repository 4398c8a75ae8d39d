//! Serialized resource index files.
//!
//! A directory may carry `resource_index.bin` enumerating its subtree:
//! native items grouped by type plus third-party items, optionally
//! accompanied by a string registry for interning acceleration. The index
//! is read through the binary record stream so scanning can step it under
//! its time budget.

use std::sync::{Arc, OnceLock};

use lodestone_shared::errors::LodestoneResult;

use crate::intern::intern;
use crate::rdata::{BinaryReader, StringRegistry, write_binary_instance};
use crate::reflect::{Archetype, EnumBuilder, StructBuilder, TypeRegistry};
use crate::stream::Stream;
use crate::vfs::VfsPath;

/// Well-known per-directory index file name.
pub const INDEX_FILE_NAME: &str = "resource_index.bin";
/// Optional companion string registry.
pub const STRING_REGISTRY_FILE_NAME: &str = "resource_index.strings.bin";

/// Storage format of a native item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ResourceFormat {
    #[default]
    Binary = 0,
    ReadableData = 1,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceIndexNativeItem {
    pub name: String,
    pub format: u32,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceIndexNativeGroup {
    pub type_name: String,
    pub items: Vec<ResourceIndexNativeItem>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceIndexThirdPartyItem {
    pub name: String,
    pub size: u64,
    pub path: String,
}

#[derive(Debug, Default)]
pub struct ResourceIndex {
    pub native: Vec<ResourceIndexNativeGroup>,
    pub third_party: Vec<ResourceIndexThirdPartyItem>,
}

static INDEX_TYPES: OnceLock<Arc<TypeRegistry>> = OnceLock::new();

/// Private reflection registry describing the index types.
pub(crate) fn index_type_registry() -> Arc<TypeRegistry> {
    INDEX_TYPES
        .get_or_init(|| {
            let format = EnumBuilder::new("resource_index_format_t")
                .item("binary", ResourceFormat::Binary as u32)
                .item("readable_data", ResourceFormat::ReadableData as u32)
                .build();

            let item = StructBuilder::new::<ResourceIndexNativeItem>("resource_index_native_item_t")
                .field_string("name", std::mem::offset_of!(ResourceIndexNativeItem, name))
                .field_enum(
                    "format",
                    std::mem::offset_of!(ResourceIndexNativeItem, format),
                    "resource_index_format_t",
                )
                .field_string("path", std::mem::offset_of!(ResourceIndexNativeItem, path))
                .build();

            let group =
                StructBuilder::new::<ResourceIndexNativeGroup>("resource_index_native_group_t")
                    .field_string(
                        "type",
                        std::mem::offset_of!(ResourceIndexNativeGroup, type_name),
                    )
                    .field_dynamic_array::<ResourceIndexNativeItem>(
                        "items",
                        std::mem::offset_of!(ResourceIndexNativeGroup, items),
                        Archetype::Struct {
                            type_name: intern("resource_index_native_item_t"),
                        },
                    )
                    .build();

            let third_party = StructBuilder::new::<ResourceIndexThirdPartyItem>(
                "resource_index_third_party_item_t",
            )
            .field_string(
                "name",
                std::mem::offset_of!(ResourceIndexThirdPartyItem, name),
            )
            .field_uint(
                "size",
                std::mem::offset_of!(ResourceIndexThirdPartyItem, size),
                8,
            )
            .field_string(
                "path",
                std::mem::offset_of!(ResourceIndexThirdPartyItem, path),
            )
            .build();

            let index = StructBuilder::new::<ResourceIndex>("resource_index_t")
                .field_dynamic_array::<ResourceIndexNativeGroup>(
                    "native",
                    std::mem::offset_of!(ResourceIndex, native),
                    Archetype::Struct {
                        type_name: intern("resource_index_native_group_t"),
                    },
                )
                .field_dynamic_array::<ResourceIndexThirdPartyItem>(
                    "third_party",
                    std::mem::offset_of!(ResourceIndex, third_party),
                    Archetype::Struct {
                        type_name: intern("resource_index_third_party_item_t"),
                    },
                )
                .build();

            let mut builder = TypeRegistry::builder();
            builder.add_enum(format);
            builder.add_struct(item);
            builder.add_struct(group);
            builder.add_struct(third_party);
            builder.add_struct(index);
            builder.build().expect("static index types are disjoint")
        })
        .clone()
}

/// Serialize an index (tooling and tests; the provider only reads).
pub fn write_resource_index(stream: &mut dyn Stream, index: &ResourceIndex) -> LodestoneResult<()> {
    let types = index_type_registry();
    let ty = types
        .struct_by_name(&intern("resource_index_t"))
        .expect("index type is always registered")
        .clone();
    unsafe {
        write_binary_instance(
            stream,
            index as *const ResourceIndex as *const u8,
            &ty,
            &types,
            None,
        )
    }
}

/// In-flight incremental read of one directory's index file.
pub(crate) struct IndexReading {
    /// Heap-pinned decode target; the reader points into it.
    buffer: Box<ResourceIndex>,
    pub reader: BinaryReader,
    pub directory: VfsPath,
    pub string_registry: Option<Arc<StringRegistry>>,
}

impl IndexReading {
    pub fn start(
        stream: Box<dyn Stream>,
        directory: VfsPath,
        string_registry: Option<Arc<StringRegistry>>,
    ) -> Self {
        let mut buffer = Box::new(ResourceIndex::default());
        let types = index_type_registry();
        let ty = types
            .struct_by_name(&intern("resource_index_t"))
            .expect("index type is always registered")
            .clone();
        let reader = unsafe {
            BinaryReader::new_raw(
                stream,
                buffer.as_mut() as *mut ResourceIndex as *mut u8,
                ty,
                types,
                None,
            )
        };
        Self {
            buffer,
            reader,
            directory,
            string_registry,
        }
    }

    pub fn into_index(self) -> (Box<ResourceIndex>, VfsPath, Option<Arc<StringRegistry>>) {
        (self.buffer, self.directory, self.string_registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::StepResult;
    use crate::stream::{MemoryStream, SeekFrom};

    #[test]
    fn index_round_trips_through_binary_stream() {
        let index = ResourceIndex {
            native: vec![ResourceIndexNativeGroup {
                type_name: "weapon_t".to_string(),
                items: vec![ResourceIndexNativeItem {
                    name: "sword".to_string(),
                    format: ResourceFormat::ReadableData as u32,
                    path: "weapons/sword.rd".to_string(),
                }],
            }],
            third_party: vec![ResourceIndexThirdPartyItem {
                name: "icon".to_string(),
                size: 16,
                path: "icons/icon.png".to_string(),
            }],
        };

        let mut stream = MemoryStream::new();
        write_resource_index(&mut stream, &index).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        let mut reading = IndexReading::start(
            Box::new(stream),
            VfsPath::new("root").unwrap(),
            None,
        );
        loop {
            match reading.reader.step() {
                StepResult::InProgress => {}
                StepResult::Finished => break,
                StepResult::Failed => panic!("index read failed"),
            }
        }

        let (decoded, directory, _) = reading.into_index();
        assert_eq!(directory.as_str(), "root");
        assert_eq!(decoded.native.len(), 1);
        assert_eq!(decoded.native[0].type_name, "weapon_t");
        assert_eq!(decoded.native[0].items[0].name, "sword");
        assert_eq!(
            decoded.native[0].items[0].format,
            ResourceFormat::ReadableData as u32
        );
        assert_eq!(decoded.third_party[0].size, 16);
    }
}
