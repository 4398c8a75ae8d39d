//! Type, field and enum descriptors.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::intern::InternedString;

/// Placement construction/destruction functor for a described type.
///
/// Functors receive a pointer to properly sized and aligned storage.
pub type Functor = Arc<dyn Fn(*mut u8) + Send + Sync>;

/// Operations over a type-erased `Vec<T>` field.
///
/// All function pointers receive a pointer to the `Vec<T>` itself, not to
/// its elements. Built by [`DynArrayOps::of`], which is the only place the
/// concrete element type is known.
#[derive(Clone, Copy)]
pub struct DynArrayOps {
    pub len: unsafe fn(*const u8) -> usize,
    pub data: unsafe fn(*mut u8) -> *mut u8,
    pub resize: unsafe fn(*mut u8, usize),
    pub clear: unsafe fn(*mut u8),
}

impl DynArrayOps {
    pub fn of<T: Default + Send + 'static>() -> Self {
        unsafe fn len_impl<T>(vec: *const u8) -> usize {
            unsafe { (*(vec as *const Vec<T>)).len() }
        }
        unsafe fn data_impl<T>(vec: *mut u8) -> *mut u8 {
            unsafe { (*(vec as *mut Vec<T>)).as_mut_ptr() as *mut u8 }
        }
        unsafe fn resize_impl<T: Default>(vec: *mut u8, new_len: usize) {
            unsafe { (*(vec as *mut Vec<T>)).resize_with(new_len, T::default) }
        }
        unsafe fn clear_impl<T>(vec: *mut u8) {
            unsafe { (*(vec as *mut Vec<T>)).clear() }
        }

        Self {
            len: len_impl::<T>,
            data: data_impl::<T>,
            resize: resize_impl::<T>,
            clear: clear_impl::<T>,
        }
    }
}

impl std::fmt::Debug for DynArrayOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynArrayOps").finish()
    }
}

/// Coarse kind of a reflected field.
#[derive(Clone, Debug)]
pub enum Archetype {
    /// Signed integer of 1, 2, 4 or 8 bytes.
    SignedInt { size: u32 },
    /// Unsigned integer of 1, 2, 4 or 8 bytes.
    UnsignedInt { size: u32 },
    /// IEEE float of 4 or 8 bytes.
    Float { size: u32 },
    /// `u32`-backed enum described by a registered [`EnumType`].
    Enum { enum_name: InternedString },
    /// Owned `String`.
    String,
    /// [`InternedString`] handle.
    InternedString,
    /// Nested struct stored inline.
    Struct { type_name: InternedString },
    /// Pointer-to-struct; registered for completeness, never serialized.
    StructPointer { type_name: InternedString },
    /// Fixed-capacity inline array.
    InlineArray {
        item: Box<Archetype>,
        item_size: u32,
        capacity: u32,
    },
    /// `Vec<T>` behind a per-type ops table.
    DynamicArray {
        item: Box<Archetype>,
        item_size: u32,
        ops: DynArrayOps,
    },
    /// Sparse byte overlay against a registered struct type.
    Patch,
    /// Opaque runtime pointer; registered for completeness, never serialized.
    ExternalPointer,
}

impl Archetype {
    /// Whether values of this archetype can live inside a patch chunk.
    ///
    /// Patches are raw byte overlays, so only plain-old-data archetypes
    /// qualify; owning archetypes (strings, dynamic arrays, patches) and
    /// pointers are rejected.
    pub fn is_patchable(&self) -> bool {
        match self {
            Archetype::SignedInt { .. }
            | Archetype::UnsignedInt { .. }
            | Archetype::Float { .. }
            | Archetype::Enum { .. }
            | Archetype::Struct { .. } => true,
            Archetype::InlineArray { item, .. } => item.is_patchable(),
            Archetype::String
            | Archetype::InternedString
            | Archetype::StructPointer { .. }
            | Archetype::DynamicArray { .. }
            | Archetype::Patch
            | Archetype::ExternalPointer => false,
        }
    }
}

/// Conditional visibility of a field, driven by an earlier sibling field.
#[derive(Clone, Debug)]
pub struct FieldVisibility {
    pub condition_field: InternedString,
    pub values: Vec<i64>,
}

/// One reflected field of a struct.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: InternedString,
    pub offset: u32,
    pub size: u32,
    pub archetype: Archetype,
    pub visibility: Option<FieldVisibility>,
}

/// A registered struct: ordered field table plus construction functors.
pub struct StructType {
    pub name: InternedString,
    pub size: u32,
    pub alignment: u32,
    /// Sorted by offset.
    pub fields: Vec<Field>,
    pub init: Option<Functor>,
    pub shutdown: Option<Functor>,
    pub(crate) rust_type: Option<TypeId>,
    pub(crate) metas: Vec<Arc<dyn Any + Send + Sync>>,
}

impl StructType {
    /// Find a field by name, returning its index and descriptor.
    pub fn field(&self, name: &InternedString) -> Option<(usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == *name)
    }

    /// The field's size extended to the next field's offset, or to struct
    /// end for the last field.
    pub fn size_with_padding(&self, index: usize) -> u32 {
        let field = &self.fields[index];
        let end = self
            .fields
            .get(index + 1)
            .map(|next| next.offset)
            .unwrap_or(self.size);
        end - field.offset
    }

    /// Index of the field whose padded span contains `offset`.
    pub fn field_containing_offset(&self, offset: u32) -> Option<usize> {
        if self.fields.is_empty() || offset >= self.size {
            return None;
        }
        let index = match self
            .fields
            .binary_search_by(|field| field.offset.cmp(&offset))
        {
            Ok(exact) => exact,
            Err(0) => return None,
            Err(insertion) => insertion - 1,
        };
        (offset < self.fields[index].offset + self.size_with_padding(index)).then_some(index)
    }

    /// The `TypeId` of the Rust type backing this descriptor, if any.
    /// Generated layouts (resource containers) have none.
    pub fn rust_type(&self) -> Option<TypeId> {
        self.rust_type
    }

    /// Fetch an attached per-type meta by its Rust type.
    pub fn meta<M: Any + Send + Sync>(&self) -> Option<&M> {
        self.metas.iter().find_map(|meta| meta.downcast_ref::<M>())
    }

    /// Evaluate a field's visibility condition against an instance.
    ///
    /// # Safety
    ///
    /// `instance` must point at a valid value of this type; the condition
    /// field must already hold its decoded value.
    pub unsafe fn field_visible(
        &self,
        instance: *const u8,
        field: &Field,
    ) -> lodestone_shared::errors::LodestoneResult<bool> {
        use lodestone_shared::errors::LodestoneError;

        let Some(visibility) = &field.visibility else {
            return Ok(true);
        };
        let (_, condition) = self.field(&visibility.condition_field).ok_or_else(|| {
            LodestoneError::FieldAbsent(format!(
                "visibility condition {} of {}",
                visibility.condition_field, field.name
            ))
        })?;

        let pointer = unsafe { instance.add(condition.offset as usize) };
        let value = match &condition.archetype {
            Archetype::SignedInt { size } => unsafe {
                super::access::read_signed(pointer, *size)
            },
            Archetype::UnsignedInt { size } => {
                (unsafe { super::access::read_unsigned(pointer, *size) }) as i64
            }
            Archetype::Enum { .. } => (unsafe { super::access::read_unsigned(pointer, 4) }) as i64,
            other => {
                return Err(LodestoneError::TypeMismatch(format!(
                    "visibility condition {} has non-scalar archetype {:?}",
                    visibility.condition_field, other
                )));
            }
        };
        Ok(visibility.values.contains(&value))
    }
}

impl std::fmt::Debug for StructType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructType")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// One named value of an enum.
#[derive(Clone, Debug)]
pub struct EnumItem {
    pub name: InternedString,
    pub value: u32,
}

/// A registered `u32`-backed enum, optionally a bit-set.
#[derive(Clone, Debug)]
pub struct EnumType {
    pub name: InternedString,
    pub flags: bool,
    pub items: Vec<EnumItem>,
}

impl EnumType {
    pub fn item_by_name(&self, name: &InternedString) -> Option<&EnumItem> {
        self.items.iter().find(|item| item.name == *name)
    }

    pub fn item_by_value(&self, value: u32) -> Option<&EnumItem> {
        self.items.iter().find(|item| item.value == value)
    }
}
