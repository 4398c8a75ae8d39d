//! Forward-only binary record stream.
//!
//! Little-endian, host alignment. The writer walks fields in declaration
//! order; the reader mirrors it with an explicit frame stack so one step
//! decodes roughly one field, letting scans interleave under budget.
//! Interned strings encode as registry indices when a string registry is
//! attached, inline text otherwise.

use std::sync::Arc;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};
use crate::reflect::{
    Archetype, DynArrayOps, Patch, PatchBuilder, StructType, TypeRegistry, access,
};
use crate::stream::Stream;

use super::StepResult;
use super::strings::StringRegistry;

/// Longest accepted string payload; guards against corrupt length fields.
const MAX_STRING_BYTES: usize = 1 << 24;

/// Whether an archetype can be an array element of this format: elements
/// must decode in one pass, so nested containers are rejected.
fn element_streamable(archetype: &Archetype) -> bool {
    matches!(
        archetype,
        Archetype::SignedInt { .. }
            | Archetype::UnsignedInt { .. }
            | Archetype::Float { .. }
            | Archetype::Enum { .. }
            | Archetype::String
            | Archetype::InternedString
    )
}

// ----------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------

/// Serialize one instance to the binary record format.
///
/// Interned strings are appended to `strings` (and encoded as indices)
/// when one is provided.
///
/// # Safety
///
/// `instance` must point at a valid value laid out as `ty` describes.
pub unsafe fn write_binary_instance(
    stream: &mut dyn Stream,
    instance: *const u8,
    ty: &Arc<StructType>,
    registry: &TypeRegistry,
    mut strings: Option<&mut StringRegistry>,
) -> LodestoneResult<()> {
    write_struct(stream, instance, ty, registry, &mut strings)
}

fn write_struct(
    stream: &mut dyn Stream,
    instance: *const u8,
    ty: &Arc<StructType>,
    registry: &TypeRegistry,
    strings: &mut Option<&mut StringRegistry>,
) -> LodestoneResult<()> {
    for field in &ty.fields {
        if !unsafe { ty.field_visible(instance, field) }? {
            continue;
        }
        let pointer = unsafe { instance.add(field.offset as usize) };
        write_field(stream, pointer, &field.archetype, registry, strings)?;
    }
    Ok(())
}

fn write_field(
    stream: &mut dyn Stream,
    pointer: *const u8,
    archetype: &Archetype,
    registry: &TypeRegistry,
    strings: &mut Option<&mut StringRegistry>,
) -> LodestoneResult<()> {
    match archetype {
        Archetype::SignedInt { size } => {
            let value = unsafe { access::read_signed(pointer, *size) };
            stream.write_all(&value.to_le_bytes()[..*size as usize])
        }
        Archetype::UnsignedInt { size } => {
            let value = unsafe { access::read_unsigned(pointer, *size) };
            stream.write_all(&value.to_le_bytes()[..*size as usize])
        }
        Archetype::Float { size } => match size {
            4 => {
                let value = unsafe { access::read_float(pointer, 4) } as f32;
                stream.write_all(&value.to_le_bytes())
            }
            _ => {
                let value = unsafe { access::read_float(pointer, 8) };
                stream.write_all(&value.to_le_bytes())
            }
        },
        Archetype::Enum { .. } => {
            let value = unsafe { access::read_unsigned(pointer, 4) } as u32;
            stream.write_all(&value.to_le_bytes())
        }
        Archetype::String => {
            let value = unsafe { access::string_ref(pointer) };
            write_bytes(stream, value.as_bytes())
        }
        Archetype::InternedString => {
            let value = unsafe { access::interned_ref(pointer) };
            match strings {
                Some(registry) => {
                    let index = registry.index_of(value);
                    stream.write_all(&index.to_le_bytes())
                }
                None => write_bytes(stream, value.as_str().as_bytes()),
            }
        }
        Archetype::Struct { type_name } => {
            let inner = lookup_struct(registry, type_name)?;
            write_struct(stream, pointer, &inner, registry, strings)
        }
        Archetype::InlineArray {
            item,
            item_size,
            capacity,
        } => {
            if !element_streamable(item) {
                return Err(LodestoneError::UnsupportedArchetype(format!(
                    "inline array of {item:?}"
                )));
            }
            for element in 0..*capacity {
                let element_ptr = unsafe { pointer.add((element * item_size) as usize) };
                write_field(stream, element_ptr, item, registry, strings)?;
            }
            Ok(())
        }
        Archetype::DynamicArray {
            item,
            item_size,
            ops,
        } => {
            if !element_streamable(item) && !matches!(item.as_ref(), Archetype::Struct { .. }) {
                return Err(LodestoneError::UnsupportedArchetype(format!(
                    "dynamic array of {item:?}"
                )));
            }
            let length = unsafe { (ops.len)(pointer) };
            stream.write_all(&(length as u32).to_le_bytes())?;
            let data = unsafe { (ops.data)(pointer as *mut u8) };
            for element in 0..length {
                let element_ptr = unsafe { data.add(element * *item_size as usize) };
                write_field(stream, element_ptr, item, registry, strings)?;
            }
            Ok(())
        }
        Archetype::Patch => {
            let patch = unsafe { access::patch_ref(pointer) };
            match patch.type_name() {
                None => stream.write_all(&[0u8]),
                Some(type_name) => {
                    stream.write_all(&[1u8])?;
                    write_bytes(stream, type_name.as_str().as_bytes())?;
                    stream.write_all(&(patch.chunks().len() as u32).to_le_bytes())?;
                    for chunk in patch.chunks() {
                        stream.write_all(&chunk.offset.to_le_bytes())?;
                        stream.write_all(&chunk.size().to_le_bytes())?;
                        stream.write_all(&chunk.data)?;
                    }
                    Ok(())
                }
            }
        }
        // Runtime pointers have no serialized form.
        Archetype::StructPointer { .. } | Archetype::ExternalPointer => Ok(()),
    }
}

fn write_bytes(stream: &mut dyn Stream, bytes: &[u8]) -> LodestoneResult<()> {
    stream.write_all(&(bytes.len() as u32).to_le_bytes())?;
    stream.write_all(bytes)
}

// ----------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------

enum BinFrame {
    Struct {
        base: *mut u8,
        ty: Arc<StructType>,
        field_index: usize,
    },
    StructArray {
        vec_ptr: *mut u8,
        item_ty: Arc<StructType>,
        item_size: u32,
        ops: DynArrayOps,
        next: usize,
        total: usize,
    },
}

/// Step-based binary record reader.
pub struct BinaryReader {
    stream: Box<dyn Stream>,
    registry: Arc<TypeRegistry>,
    strings: Option<Arc<StringRegistry>>,
    frames: Vec<BinFrame>,
    failed: bool,
    finished: bool,
}

// Frames hold raw pointers into the caller-owned instance; the
// constructor contract makes them safe to carry across threads.
unsafe impl Send for BinaryReader {}

impl BinaryReader {
    /// Create a reader decoding the stream into `instance`.
    ///
    /// The binary type header must already have been consumed.
    ///
    /// # Safety
    ///
    /// `instance` must point at a valid, properly initialized value laid
    /// out as `ty` describes, staying valid until the reader is done.
    pub unsafe fn new_raw(
        stream: Box<dyn Stream>,
        instance: *mut u8,
        ty: Arc<StructType>,
        registry: Arc<TypeRegistry>,
        strings: Option<Arc<StringRegistry>>,
    ) -> Self {
        Self {
            stream,
            registry,
            strings,
            frames: vec![BinFrame::Struct {
                base: instance,
                ty,
                field_index: 0,
            }],
            failed: false,
            finished: false,
        }
    }

    /// Decode roughly one field.
    pub fn step(&mut self) -> StepResult {
        if self.failed {
            return StepResult::Failed;
        }
        if self.finished {
            return StepResult::Finished;
        }

        match self.step_inner() {
            Ok(result) => {
                if result == StepResult::Finished {
                    self.finished = true;
                }
                result
            }
            Err(error) => {
                tracing::error!(%error, "binary record deserialization failed");
                self.failed = true;
                StepResult::Failed
            }
        }
    }

    fn step_inner(&mut self) -> LodestoneResult<StepResult> {
        enum Action {
            Pop,
            PushStruct {
                base: *mut u8,
                ty: Arc<StructType>,
            },
            ReadField {
                base: *mut u8,
                ty: Arc<StructType>,
                field: crate::reflect::Field,
            },
        }

        let action = match self.frames.last_mut() {
            None => return Ok(StepResult::Finished),
            Some(BinFrame::StructArray {
                vec_ptr,
                item_ty,
                item_size,
                ops,
                next,
                total,
            }) => {
                if *next >= *total {
                    Action::Pop
                } else {
                    let element_ptr =
                        unsafe { (ops.data)(*vec_ptr).add(*next * *item_size as usize) };
                    *next += 1;
                    Action::PushStruct {
                        base: element_ptr,
                        ty: item_ty.clone(),
                    }
                }
            }
            Some(BinFrame::Struct {
                base,
                ty,
                field_index,
            }) => {
                if *field_index >= ty.fields.len() {
                    Action::Pop
                } else {
                    let field = ty.fields[*field_index].clone();
                    *field_index += 1;
                    Action::ReadField {
                        base: *base,
                        ty: ty.clone(),
                        field,
                    }
                }
            }
        };

        match action {
            Action::Pop => {
                self.frames.pop();
                if self.frames.is_empty() {
                    return Ok(StepResult::Finished);
                }
                Ok(StepResult::InProgress)
            }
            Action::PushStruct { base, ty } => {
                self.frames.push(BinFrame::Struct {
                    base,
                    ty,
                    field_index: 0,
                });
                Ok(StepResult::InProgress)
            }
            Action::ReadField { base, ty, field } => {
                if !unsafe { ty.field_visible(base, &field) }? {
                    return Ok(StepResult::InProgress);
                }
                let pointer = unsafe { base.add(field.offset as usize) };
                self.read_field(pointer, &field.archetype)?;
                Ok(StepResult::InProgress)
            }
        }
    }

    fn read_field(&mut self, pointer: *mut u8, archetype: &Archetype) -> LodestoneResult<()> {
        match archetype {
            Archetype::SignedInt { size } => {
                let mut bytes = [0u8; 8];
                self.stream.read_exact(&mut bytes[..*size as usize])?;
                let value = match size {
                    1 => bytes[0] as i8 as i64,
                    2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
                    4 => i32::from_le_bytes(bytes[..4].try_into().expect("sized above")) as i64,
                    _ => i64::from_le_bytes(bytes),
                };
                let _ = unsafe { access::write_signed(pointer, *size, value) };
                Ok(())
            }
            Archetype::UnsignedInt { size } => {
                let mut bytes = [0u8; 8];
                self.stream.read_exact(&mut bytes[..*size as usize])?;
                let value = match size {
                    1 => bytes[0] as u64,
                    2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u64,
                    4 => u32::from_le_bytes(bytes[..4].try_into().expect("sized above")) as u64,
                    _ => u64::from_le_bytes(bytes),
                };
                let _ = unsafe { access::write_unsigned(pointer, *size, value) };
                Ok(())
            }
            Archetype::Float { size } => {
                if *size == 4 {
                    let mut bytes = [0u8; 4];
                    self.stream.read_exact(&mut bytes)?;
                    unsafe { access::write_float(pointer, 4, f32::from_le_bytes(bytes) as f64) };
                } else {
                    let mut bytes = [0u8; 8];
                    self.stream.read_exact(&mut bytes)?;
                    unsafe { access::write_float(pointer, 8, f64::from_le_bytes(bytes)) };
                }
                Ok(())
            }
            Archetype::Enum { .. } => {
                let mut bytes = [0u8; 4];
                self.stream.read_exact(&mut bytes)?;
                let _ = unsafe {
                    access::write_unsigned(pointer, 4, u32::from_le_bytes(bytes) as u64)
                };
                Ok(())
            }
            Archetype::String => {
                let text = self.read_string()?;
                unsafe { *access::string_mut(pointer) = text };
                Ok(())
            }
            Archetype::InternedString => {
                let value = match &self.strings {
                    Some(registry) => {
                        let mut bytes = [0u8; 4];
                        self.stream.read_exact(&mut bytes)?;
                        let index = u32::from_le_bytes(bytes);
                        registry
                            .get(index)
                            .ok_or_else(|| {
                                LodestoneError::Serialization(format!(
                                    "interned index {index} outside string registry"
                                ))
                            })?
                            .clone()
                    }
                    None => intern(&self.read_string()?),
                };
                unsafe { *access::interned_mut(pointer) = value };
                Ok(())
            }
            Archetype::Struct { type_name } => {
                let inner = lookup_struct(&self.registry, type_name)?;
                self.frames.push(BinFrame::Struct {
                    base: pointer,
                    ty: inner,
                    field_index: 0,
                });
                Ok(())
            }
            Archetype::InlineArray {
                item,
                item_size,
                capacity,
            } => {
                if !element_streamable(item) {
                    return Err(LodestoneError::UnsupportedArchetype(format!(
                        "inline array of {item:?}"
                    )));
                }
                for element in 0..*capacity {
                    let element_ptr = unsafe { pointer.add((element * item_size) as usize) };
                    self.read_field(element_ptr, item)?;
                }
                Ok(())
            }
            Archetype::DynamicArray {
                item,
                item_size,
                ops,
            } => {
                let mut bytes = [0u8; 4];
                self.stream.read_exact(&mut bytes)?;
                let length = u32::from_le_bytes(bytes) as usize;
                unsafe { (ops.resize)(pointer, length) };

                if let Archetype::Struct { type_name } = item.as_ref() {
                    let item_ty = lookup_struct(&self.registry, type_name)?;
                    self.frames.push(BinFrame::StructArray {
                        vec_ptr: pointer,
                        item_ty,
                        item_size: *item_size,
                        ops: *ops,
                        next: 0,
                        total: length,
                    });
                    return Ok(());
                }
                if !element_streamable(item) {
                    return Err(LodestoneError::UnsupportedArchetype(format!(
                        "dynamic array of {item:?}"
                    )));
                }

                let data = unsafe { (ops.data)(pointer) };
                for element in 0..length {
                    let element_ptr = unsafe { data.add(element * *item_size as usize) };
                    self.read_field(element_ptr, item)?;
                }
                Ok(())
            }
            Archetype::Patch => {
                let mut flag = [0u8; 1];
                self.stream.read_exact(&mut flag)?;
                if flag[0] == 0 {
                    unsafe { *access::patch_mut(pointer) = Patch::default() };
                    return Ok(());
                }

                let type_name = intern(&self.read_string()?);
                let mut builder = PatchBuilder::new();
                builder.set_type(type_name);

                let mut count_bytes = [0u8; 4];
                self.stream.read_exact(&mut count_bytes)?;
                let count = u32::from_le_bytes(count_bytes);
                for _ in 0..count {
                    let mut header = [0u8; 8];
                    self.stream.read_exact(&mut header)?;
                    let offset = u32::from_le_bytes(header[..4].try_into().expect("sized above"));
                    let size =
                        u32::from_le_bytes(header[4..].try_into().expect("sized above")) as usize;
                    if size > MAX_STRING_BYTES {
                        return Err(LodestoneError::Serialization(format!(
                            "implausible patch chunk size {size}"
                        )));
                    }
                    let mut data = vec![0u8; size];
                    self.stream.read_exact(&mut data)?;
                    builder.add_bytes(offset, &data);
                }

                unsafe { *access::patch_mut(pointer) = builder.build()? };
                Ok(())
            }
            Archetype::StructPointer { .. } | Archetype::ExternalPointer => Ok(()),
        }
    }

    fn read_string(&mut self) -> LodestoneResult<String> {
        let mut length_bytes = [0u8; 4];
        self.stream.read_exact(&mut length_bytes)?;
        let length = u32::from_le_bytes(length_bytes) as usize;
        if length > MAX_STRING_BYTES {
            return Err(LodestoneError::Serialization(format!(
                "implausible string length {length}"
            )));
        }
        let mut bytes = vec![0u8; length];
        self.stream.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| LodestoneError::Serialization(format!("string is not UTF-8: {e}")))
    }
}

fn lookup_struct(
    registry: &TypeRegistry,
    type_name: &InternedString,
) -> LodestoneResult<Arc<StructType>> {
    registry
        .struct_by_name(type_name)
        .cloned()
        .ok_or_else(|| LodestoneError::NotFound(format!("struct type {type_name}")))
}
