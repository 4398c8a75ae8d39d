//! Registry construction and lookup.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};

use super::patch::Patch;
use super::types::{
    Archetype, DynArrayOps, EnumItem, EnumType, Field, FieldVisibility, Functor, StructType,
};

/// Callback invoked while the registry is generated; returns additional
/// struct types synthesized from the ones registered so far (the resource
/// container generator hangs off this).
pub type GenerationHook = Box<dyn Fn(&TypeRegistry) -> Vec<Arc<StructType>> + Send + Sync>;

/// Immutable set of registered struct and enum types.
///
/// Registries are built once through [`RegistryBuilder`] and shared behind
/// an `Arc`; regeneration replaces the whole `Arc`, which is how mid-load
/// reflection changes are detected.
#[derive(Default)]
pub struct TypeRegistry {
    structs: HashMap<InternedString, Arc<StructType>>,
    enums: HashMap<InternedString, Arc<EnumType>>,
}

impl TypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn struct_by_name(&self, name: &InternedString) -> Option<&Arc<StructType>> {
        self.structs.get(name)
    }

    pub fn enum_by_name(&self, name: &InternedString) -> Option<&Arc<EnumType>> {
        self.enums.get(name)
    }

    pub fn structs(&self) -> impl Iterator<Item = &Arc<StructType>> {
        self.structs.values()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("structs", &self.structs.len())
            .field("enums", &self.enums.len())
            .finish()
    }
}

/// Builder for [`TypeRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    structs: Vec<Arc<StructType>>,
    enums: Vec<Arc<EnumType>>,
    hooks: Vec<GenerationHook>,
}

impl RegistryBuilder {
    pub fn add_struct(&mut self, ty: Arc<StructType>) -> &mut Self {
        self.structs.push(ty);
        self
    }

    pub fn add_enum(&mut self, ty: Arc<EnumType>) -> &mut Self {
        self.enums.push(ty);
        self
    }

    /// Register a generation hook, run once over the registered types when
    /// the registry is built.
    pub fn add_generation_hook(&mut self, hook: GenerationHook) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    /// Finish generation: insert all registered types, then run each hook
    /// over the interim registry and insert what it synthesizes.
    pub fn build(self) -> LodestoneResult<Arc<TypeRegistry>> {
        let mut registry = TypeRegistry::default();

        for ty in self.enums {
            if registry.enums.insert(ty.name.clone(), ty.clone()).is_some() {
                return Err(LodestoneError::AlreadyExists(format!(
                    "enum type {}",
                    ty.name
                )));
            }
        }

        for ty in self.structs {
            if registry
                .structs
                .insert(ty.name.clone(), ty.clone())
                .is_some()
            {
                return Err(LodestoneError::AlreadyExists(format!(
                    "struct type {}",
                    ty.name
                )));
            }
        }

        for hook in &self.hooks {
            for generated in hook(&registry) {
                if registry
                    .structs
                    .insert(generated.name.clone(), generated.clone())
                    .is_some()
                {
                    return Err(LodestoneError::AlreadyExists(format!(
                        "generated struct type {}",
                        generated.name
                    )));
                }
            }
        }

        Ok(Arc::new(registry))
    }
}

/// Builder for one struct descriptor.
///
/// `new::<T>` captures size, alignment and default/drop functors from the
/// backing Rust type; offsets passed to the field methods must come from
/// `std::mem::offset_of!` over that same type.
pub struct StructBuilder {
    name: InternedString,
    size: u32,
    alignment: u32,
    rust_type: Option<TypeId>,
    init: Option<Functor>,
    shutdown: Option<Functor>,
    fields: Vec<Field>,
    metas: Vec<Arc<dyn Any + Send + Sync>>,
}

impl StructBuilder {
    pub fn new<T: Default + Send + 'static>(name: &str) -> Self {
        let init: Functor = Arc::new(|storage| unsafe {
            std::ptr::write(storage as *mut T, T::default());
        });
        let shutdown: Functor = Arc::new(|storage| unsafe {
            std::ptr::drop_in_place(storage as *mut T);
        });

        Self {
            name: intern(name),
            size: std::mem::size_of::<T>() as u32,
            alignment: std::mem::align_of::<T>() as u32,
            rust_type: Some(TypeId::of::<T>()),
            init: Some(init),
            shutdown: Some(shutdown),
            fields: Vec::new(),
            metas: Vec::new(),
        }
    }

    /// Describe a layout with no backing Rust type (generated containers).
    pub fn new_generated(name: &str, size: u32, alignment: u32) -> Self {
        Self {
            name: intern(name),
            size,
            alignment,
            rust_type: None,
            init: None,
            shutdown: None,
            fields: Vec::new(),
            metas: Vec::new(),
        }
    }

    pub fn with_functors(mut self, init: Functor, shutdown: Functor) -> Self {
        self.init = Some(init);
        self.shutdown = Some(shutdown);
        self
    }

    pub fn field(mut self, name: &str, offset: usize, size: usize, archetype: Archetype) -> Self {
        self.fields.push(Field {
            name: intern(name),
            offset: offset as u32,
            size: size as u32,
            archetype,
            visibility: None,
        });
        self
    }

    pub fn field_sint(self, name: &str, offset: usize, size: usize) -> Self {
        self.field(name, offset, size, Archetype::SignedInt { size: size as u32 })
    }

    pub fn field_uint(self, name: &str, offset: usize, size: usize) -> Self {
        self.field(
            name,
            offset,
            size,
            Archetype::UnsignedInt { size: size as u32 },
        )
    }

    pub fn field_float(self, name: &str, offset: usize, size: usize) -> Self {
        self.field(name, offset, size, Archetype::Float { size: size as u32 })
    }

    pub fn field_enum(self, name: &str, offset: usize, enum_name: &str) -> Self {
        self.field(
            name,
            offset,
            4,
            Archetype::Enum {
                enum_name: intern(enum_name),
            },
        )
    }

    pub fn field_string(self, name: &str, offset: usize) -> Self {
        self.field(
            name,
            offset,
            std::mem::size_of::<String>(),
            Archetype::String,
        )
    }

    pub fn field_interned(self, name: &str, offset: usize) -> Self {
        self.field(
            name,
            offset,
            std::mem::size_of::<InternedString>(),
            Archetype::InternedString,
        )
    }

    pub fn field_struct(self, name: &str, offset: usize, type_name: &str, size: usize) -> Self {
        self.field(
            name,
            offset,
            size,
            Archetype::Struct {
                type_name: intern(type_name),
            },
        )
    }

    pub fn field_patch(self, name: &str, offset: usize) -> Self {
        self.field(name, offset, std::mem::size_of::<Patch>(), Archetype::Patch)
    }

    pub fn field_inline_array(
        self,
        name: &str,
        offset: usize,
        item: Archetype,
        item_size: usize,
        capacity: usize,
    ) -> Self {
        self.field(
            name,
            offset,
            item_size * capacity,
            Archetype::InlineArray {
                item: Box::new(item),
                item_size: item_size as u32,
                capacity: capacity as u32,
            },
        )
    }

    pub fn field_dynamic_array<T: Default + Send + 'static>(
        self,
        name: &str,
        offset: usize,
        item: Archetype,
    ) -> Self {
        self.field(
            name,
            offset,
            std::mem::size_of::<Vec<T>>(),
            Archetype::DynamicArray {
                item: Box::new(item),
                item_size: std::mem::size_of::<T>() as u32,
                ops: DynArrayOps::of::<T>(),
            },
        )
    }

    pub fn field_struct_pointer(self, name: &str, offset: usize, type_name: &str) -> Self {
        self.field(
            name,
            offset,
            std::mem::size_of::<usize>(),
            Archetype::StructPointer {
                type_name: intern(type_name),
            },
        )
    }

    pub fn field_external_pointer(self, name: &str, offset: usize) -> Self {
        self.field(
            name,
            offset,
            std::mem::size_of::<usize>(),
            Archetype::ExternalPointer,
        )
    }

    /// Attach a visibility condition to the most recently added field.
    pub fn visibility(mut self, condition_field: &str, values: Vec<i64>) -> Self {
        let field = self
            .fields
            .last_mut()
            .expect("visibility must follow a field");
        field.visibility = Some(FieldVisibility {
            condition_field: intern(condition_field),
            values,
        });
        self
    }

    /// Attach a per-type meta object.
    pub fn meta<M: Any + Send + Sync>(mut self, meta: M) -> Self {
        self.metas.push(Arc::new(meta));
        self
    }

    pub fn build(mut self) -> Arc<StructType> {
        self.fields.sort_by_key(|field| field.offset);
        debug_assert!(
            self.fields
                .windows(2)
                .all(|pair| pair[0].offset + pair[0].size <= pair[1].offset),
            "overlapping fields in struct {}",
            self.name
        );

        Arc::new(StructType {
            name: self.name,
            size: self.size,
            alignment: self.alignment,
            fields: self.fields,
            init: self.init,
            shutdown: self.shutdown,
            rust_type: self.rust_type,
            metas: self.metas,
        })
    }
}

/// Builder for one enum descriptor.
pub struct EnumBuilder {
    name: InternedString,
    flags: bool,
    items: Vec<EnumItem>,
}

impl EnumBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: intern(name),
            flags: false,
            items: Vec::new(),
        }
    }

    /// Mark the enum as a bit-set: setters accept multiple OR-ed values.
    pub fn flags(mut self) -> Self {
        self.flags = true;
        self
    }

    pub fn item(mut self, name: &str, value: u32) -> Self {
        self.items.push(EnumItem {
            name: intern(name),
            value,
        });
        self
    }

    pub fn build(self) -> Arc<EnumType> {
        Arc::new(EnumType {
            name: self.name,
            flags: self.flags,
            items: self.items,
        })
    }
}
