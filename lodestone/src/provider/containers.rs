//! Reflection-driven container generation.
//!
//! At registry generation time, every struct carrying [`ResourceTypeMeta`]
//! gets a synthesized wrapper layout pairing a `container_id` with the
//! aligned payload. At provider-state finalization one trailing record
//! per type binds the wrapper to its storage table; records are sorted by
//! payload type name so lookup is a binary search.

use std::collections::HashMap;
use std::sync::Arc;

use lodestone_shared::errors::LodestoneResult;

use crate::intern::InternedString;
use crate::memory::AllocationGroup;
use crate::reflect::{Functor, GenerationHook, ReflectedBox, StructBuilder, StructType, TypeRegistry};

/// Marker meta: structs carrying it are loadable resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceTypeMeta;

/// Name prefix of generated container types.
pub const CONTAINER_TYPE_PREFIX: &str = "resource_container_";

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// The generation hook synthesizing one container type per resource type.
pub fn container_generation_hook() -> GenerationHook {
    Box::new(|registry: &TypeRegistry| {
        let mut generated: Vec<Arc<StructType>> = registry
            .structs()
            .filter(|ty| ty.meta::<ResourceTypeMeta>().is_some())
            .filter_map(|ty| synthesize_container_type(ty))
            .collect();
        generated.sort_by(|a, b| a.name.cmp(&b.name));
        generated
    })
}

fn synthesize_container_type(payload: &Arc<StructType>) -> Option<Arc<StructType>> {
    let (Some(payload_init), Some(payload_shutdown)) = (&payload.init, &payload.shutdown) else {
        tracing::error!(
            resource_type = %payload.name,
            "resource type lacks construction functors, no container generated"
        );
        return None;
    };

    let alignment = payload.alignment.max(8);
    let payload_offset = align_up(8, payload.alignment.max(1));
    let size = align_up(payload_offset + payload.size, alignment);

    let init: Functor = {
        let payload_init = payload_init.clone();
        let offset = payload_offset as usize;
        Arc::new(move |storage| {
            unsafe { std::ptr::write(storage as *mut u64, 0u64) };
            payload_init(unsafe { storage.add(offset) });
        })
    };
    let shutdown: Functor = {
        let payload_shutdown = payload_shutdown.clone();
        let offset = payload_offset as usize;
        Arc::new(move |storage| {
            payload_shutdown(unsafe { storage.add(offset) });
        })
    };

    Some(
        StructBuilder::new_generated(
            &format!("{CONTAINER_TYPE_PREFIX}{}", payload.name),
            size,
            alignment,
        )
        .with_functors(init, shutdown)
        .field_uint("container_id", 0, 8)
        .field_struct(
            "payload",
            payload_offset as usize,
            payload.name.as_str(),
            payload.size as usize,
        )
        .build(),
    )
}

/// Storage table of one resource type's containers, keyed by id.
#[derive(Default)]
pub(crate) struct ContainerStorage {
    rows: HashMap<u64, ReflectedBox>,
}

impl ContainerStorage {
    pub fn insert(&mut self, container_id: u64, container: ReflectedBox) {
        let previous = self.rows.insert(container_id, container);
        debug_assert!(previous.is_none(), "container ids are never reused");
    }

    pub fn get(&self, container_id: u64) -> Option<&ReflectedBox> {
        self.rows.get(&container_id)
    }

    pub fn remove(&mut self, container_id: u64) -> Option<ReflectedBox> {
        self.rows.remove(&container_id)
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Trailing record binding one resource type to its container layout and
/// storage queries.
pub(crate) struct ContainerTypeRecord {
    pub payload_type: Arc<StructType>,
    pub container_type: Arc<StructType>,
    pub payload_offset: u32,
    pub storage: ContainerStorage,
}

/// Sorted trailing records, looked up by payload type name.
#[derive(Default)]
pub(crate) struct ContainerRecords {
    records: Vec<ContainerTypeRecord>,
}

impl ContainerRecords {
    /// Walk the registry and build one record per generated container.
    pub fn build(registry: &TypeRegistry) -> Self {
        let mut records = Vec::new();
        for payload_type in registry.structs() {
            if payload_type.meta::<ResourceTypeMeta>().is_none() {
                continue;
            }
            let container_name = format!("{CONTAINER_TYPE_PREFIX}{}", payload_type.name);
            let Some(container_type) =
                registry.struct_by_name(&crate::intern::intern(&container_name))
            else {
                continue;
            };
            let Some((_, payload_field)) =
                container_type.field(&crate::intern::intern("payload"))
            else {
                continue;
            };

            records.push(ContainerTypeRecord {
                payload_type: payload_type.clone(),
                container_type: container_type.clone(),
                payload_offset: payload_field.offset,
                storage: ContainerStorage::default(),
            });
        }
        records.sort_by(|a, b| a.payload_type.name.cmp(&b.payload_type.name));
        Self { records }
    }

    pub fn find(&self, payload_type: &InternedString) -> Option<usize> {
        self.records
            .binary_search_by(|record| record.payload_type.name.cmp(payload_type))
            .ok()
    }

    pub fn record(&self, index: usize) -> &ContainerTypeRecord {
        &self.records[index]
    }

    pub fn record_mut(&mut self, index: usize) -> &mut ContainerTypeRecord {
        &mut self.records[index]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ContainerTypeRecord> {
        self.records.iter_mut()
    }

    /// Allocate one container for `index` with the given id.
    pub fn create_container(
        &mut self,
        index: usize,
        container_id: u64,
        group: AllocationGroup,
    ) -> LodestoneResult<*mut u8> {
        let record = &mut self.records[index];
        let container = ReflectedBox::new(record.container_type.clone(), group)?;

        let payload_pointer = unsafe { container.as_mut_ptr().add(record.payload_offset as usize) };
        unsafe {
            let id_pointer = container.as_mut_ptr() as *mut u64;
            *id_pointer = container_id;
        }

        record.storage.insert(container_id, container);
        Ok(payload_pointer)
    }
}

impl std::fmt::Debug for ContainerRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRecords")
            .field("types", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;
    use crate::reflect::TypeRegistry;

    #[derive(Default)]
    struct Widget {
        hits: i32,
        label: String,
    }

    fn registry_with_widget() -> Arc<TypeRegistry> {
        let widget = StructBuilder::new::<Widget>("widget_t")
            .field_sint("hits", std::mem::offset_of!(Widget, hits), 4)
            .field_string("label", std::mem::offset_of!(Widget, label))
            .meta(ResourceTypeMeta)
            .build();

        let mut builder = TypeRegistry::builder();
        builder.add_struct(widget);
        builder.add_generation_hook(container_generation_hook());
        builder.build().unwrap()
    }

    #[test]
    fn container_type_is_generated_with_aligned_payload() {
        let registry = registry_with_widget();
        let container = registry
            .struct_by_name(&intern("resource_container_widget_t"))
            .expect("container type generated");

        let (_, id_field) = container.field(&intern("container_id")).unwrap();
        assert_eq!(id_field.offset, 0);
        assert_eq!(id_field.size, 8);

        let (_, payload_field) = container.field(&intern("payload")).unwrap();
        assert_eq!(payload_field.offset % std::mem::align_of::<Widget>() as u32, 0);
        assert!(payload_field.offset >= 8);
        assert_eq!(payload_field.size, std::mem::size_of::<Widget>() as u32);
    }

    #[test]
    fn records_create_and_destroy_containers() {
        let registry = registry_with_widget();
        let mut records = ContainerRecords::build(&registry);
        let index = records.find(&intern("widget_t")).unwrap();

        let group = AllocationGroup::root().child("container_records_test");
        let payload = records
            .create_container(index, 41, group.clone())
            .unwrap();

        // The payload pointer is the default-initialized Widget.
        unsafe {
            let widget = &mut *(payload as *mut Widget);
            assert_eq!(widget.hits, 0);
            widget.hits = 7;
            widget.label.push_str("named");
        }

        let record = records.record_mut(index);
        let container = record.storage.get(41).unwrap();
        assert_eq!(
            unsafe { *(container.as_ptr() as *const u64) },
            41,
            "container id lives at offset zero"
        );

        record.storage.remove(41);
        assert_eq!(record.storage.len(), 0);
        assert_eq!(group.allocated(), 0);
    }

    #[test]
    fn find_uses_payload_type_name() {
        let registry = registry_with_widget();
        let records = ContainerRecords::build(&registry);
        assert!(records.find(&intern("widget_t")).is_some());
        assert!(records.find(&intern("missing_t")).is_none());
    }
}
