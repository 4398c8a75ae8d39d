//! Readable-data serializer: typed instance → event stream.
//!
//! The writer drives a visibility-aware field iterator per struct frame
//! and emits one event (or closes one frame) per step. Short scalar
//! arrays collapse into a single packed setter; longer ones emit one
//! indexed event per element. Patch fields first emit their `__type`
//! setter, then walk chunks, binary-searching each chunk offset against
//! the target type's field table to rebuild the covering field paths.

use std::collections::VecDeque;
use std::sync::Arc;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};
use crate::reflect::{Archetype, StructType, TypeRegistry, access};
use crate::stream::Stream;

use super::StepResult;
use super::emitter::RdEmitter;
use super::event::{OutputTarget, RdEvent};

/// Arrays at or below this many values emit as one packed setter.
const PACKED_ARRAY_THRESHOLD: usize = 8;

enum FieldProgress {
    /// Per-element indexed emission for long scalar arrays.
    ScalarArray { next: u32, total: u32 },
    /// One array appender per element for struct dynamic arrays.
    StructArray { next: u32, total: u32 },
}

#[derive(Clone, Debug)]
enum LeafValues {
    Integers(Vec<i64>),
    Floats(Vec<f64>),
    Identifiers(Vec<InternedString>),
    Strings(Vec<String>),
}

enum PatchEmission {
    TypeSetter(InternedString),
    Leaf {
        path: Vec<InternedString>,
        array_index: Option<u32>,
        values: LeafValues,
    },
}

enum WriterFrame {
    Struct {
        instance: *const u8,
        ty: Arc<StructType>,
        field_index: usize,
        progress: Option<FieldProgress>,
    },
    Patch {
        pending: VecDeque<PatchEmission>,
        open_path: Vec<InternedString>,
    },
}

pub struct ReadableWriter<'a> {
    emitter: RdEmitter<'a>,
    registry: Arc<TypeRegistry>,
    frames: Vec<WriterFrame>,
    failed: bool,
    finished: bool,
}

impl<'a> ReadableWriter<'a> {
    /// Create a writer emitting `instance` into `stream`.
    ///
    /// The type header is the caller's business, written before this.
    ///
    /// # Safety
    ///
    /// `instance` must point at a valid value laid out as `ty` describes
    /// and stay valid and unmodified until the writer finishes.
    pub unsafe fn new_raw(
        stream: &'a mut dyn Stream,
        instance: *const u8,
        ty: Arc<StructType>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            emitter: RdEmitter::new(stream),
            registry,
            frames: vec![WriterFrame::Struct {
                instance,
                ty,
                field_index: 0,
                progress: None,
            }],
            failed: false,
            finished: false,
        }
    }

    /// Emit one event or close one frame.
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
                tracing::error!(%error, "readable data serialization failed");
                self.failed = true;
                StepResult::Failed
            }
        }
    }

    fn step_inner(&mut self) -> LodestoneResult<StepResult> {
        loop {
            let Some(frame) = self.frames.last() else {
                return Ok(StepResult::Finished);
            };

            match frame {
                WriterFrame::Patch { .. } => return self.step_patch(),
                WriterFrame::Struct { .. } => {
                    if let Some(result) = self.step_struct()? {
                        return Ok(result);
                    }
                    // A skipped field: loop until something emits.
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Struct frames
    // ------------------------------------------------------------------

    /// Returns `None` when the current field was skipped without emitting.
    fn step_struct(&mut self) -> LodestoneResult<Option<StepResult>> {
        let (instance, ty, field_index, progress_active) = match self.frames.last() {
            Some(WriterFrame::Struct {
                instance,
                ty,
                field_index,
                progress,
            }) => (*instance, ty.clone(), *field_index, progress.is_some()),
            _ => unreachable!("step_struct on a non-struct frame"),
        };

        if progress_active {
            return self.step_array_progress(instance, &ty).map(Some);
        }

        if field_index >= ty.fields.len() {
            self.frames.pop();
            if self.frames.is_empty() {
                return Ok(Some(StepResult::Finished));
            }
            self.emitter.emit(&RdEvent::BlockEnd)?;
            return Ok(Some(StepResult::InProgress));
        }

        let field = ty.fields[field_index].clone();
        if !self.field_visible(instance, &ty, &field)? {
            self.advance_field();
            return Ok(None);
        }

        let field_ptr = unsafe { instance.add(field.offset as usize) };
        match &field.archetype {
            Archetype::SignedInt { .. }
            | Archetype::UnsignedInt { .. }
            | Archetype::Float { .. } => {
                let value = self.read_leaf(&field.archetype, field_ptr)?;
                self.advance_field();
                self.emit_leaf_setter(single_target(&field.name), collect_values(vec![value]))?;
                Ok(Some(StepResult::InProgress))
            }
            Archetype::Enum { enum_name } => {
                let raw = unsafe { access::read_unsigned(field_ptr, 4) } as u32;
                let identifiers = self.enum_identifiers(enum_name, raw)?;
                self.advance_field();
                if identifiers.is_empty() {
                    // Zero flag value round-trips as an absent setter.
                    return Ok(None);
                }
                self.emit_leaf_setter(
                    single_target(&field.name),
                    LeafValues::Identifiers(identifiers),
                )?;
                Ok(Some(StepResult::InProgress))
            }
            Archetype::String => {
                let value = unsafe { access::string_ref(field_ptr) };
                self.advance_field();
                if value.is_empty() {
                    return Ok(None);
                }
                let values = LeafValues::Strings(vec![value.clone()]);
                self.emit_leaf_setter(single_target(&field.name), values)?;
                Ok(Some(StepResult::InProgress))
            }
            Archetype::InternedString => {
                let value = unsafe { access::interned_ref(field_ptr) };
                self.advance_field();
                if value.is_empty() {
                    return Ok(None);
                }
                let values = LeafValues::Strings(vec![value.as_str().to_string()]);
                self.emit_leaf_setter(single_target(&field.name), values)?;
                Ok(Some(StepResult::InProgress))
            }
            Archetype::Struct { type_name } => {
                let inner = self.lookup_struct(type_name)?;
                self.advance_field();
                self.emitter.emit(&RdEvent::StructuralSetterBegin {
                    target: single_target(&field.name),
                })?;
                self.frames.push(WriterFrame::Struct {
                    instance: field_ptr,
                    ty: inner,
                    field_index: 0,
                    progress: None,
                });
                Ok(Some(StepResult::InProgress))
            }
            Archetype::Patch => {
                let patch = unsafe { access::patch_ref(field_ptr) };
                self.advance_field();
                if !patch.is_valid() {
                    return Ok(None);
                }
                let pending = self.plan_patch_emissions(patch)?;
                self.emitter.emit(&RdEvent::StructuralSetterBegin {
                    target: single_target(&field.name),
                })?;
                self.frames.push(WriterFrame::Patch {
                    pending,
                    open_path: Vec::new(),
                });
                Ok(Some(StepResult::InProgress))
            }
            Archetype::InlineArray {
                item,
                item_size,
                capacity,
            } => {
                self.reject_flag_enum_array(item, &field.name)?;
                if *capacity == 0 {
                    self.advance_field();
                    return Ok(None);
                }
                if *capacity as usize <= PACKED_ARRAY_THRESHOLD {
                    let mut values = Vec::with_capacity(*capacity as usize);
                    for element in 0..*capacity {
                        let pointer =
                            unsafe { field_ptr.add((element * item_size) as usize) };
                        values.push(self.read_leaf(item, pointer)?);
                    }
                    self.advance_field();
                    self.emit_leaf_setter(single_target(&field.name), collect_values(values))?;
                    return Ok(Some(StepResult::InProgress));
                }
                self.set_progress(FieldProgress::ScalarArray {
                    next: 0,
                    total: *capacity,
                });
                Ok(None)
            }
            Archetype::DynamicArray {
                item,
                item_size: _,
                ops,
            } => {
                self.reject_flag_enum_array(item, &field.name)?;
                let length = unsafe { (ops.len)(field_ptr as *mut u8) };
                if length == 0 {
                    self.advance_field();
                    return Ok(None);
                }
                if matches!(item.as_ref(), Archetype::Struct { .. }) {
                    self.set_progress(FieldProgress::StructArray {
                        next: 0,
                        total: length as u32,
                    });
                    return Ok(None);
                }
                if length <= PACKED_ARRAY_THRESHOLD {
                    let item_size = match &field.archetype {
                        Archetype::DynamicArray { item_size, .. } => *item_size,
                        _ => unreachable!(),
                    };
                    let data = unsafe { (ops.data)(field_ptr as *mut u8) };
                    let mut values = Vec::with_capacity(length);
                    for element in 0..length {
                        let pointer = unsafe { data.add(element * item_size as usize) };
                        values.push(self.read_leaf(item, pointer)?);
                    }
                    self.advance_field();
                    self.emit_leaf_setter(single_target(&field.name), collect_values(values))?;
                    return Ok(Some(StepResult::InProgress));
                }
                self.set_progress(FieldProgress::ScalarArray {
                    next: 0,
                    total: length as u32,
                });
                Ok(None)
            }
            Archetype::StructPointer { .. } | Archetype::ExternalPointer => {
                // Runtime pointers have no serialized form.
                self.advance_field();
                Ok(None)
            }
        }
    }

    fn step_array_progress(
        &mut self,
        instance: *const u8,
        ty: &Arc<StructType>,
    ) -> LodestoneResult<StepResult> {
        enum ArrayKind {
            Scalar,
            Structs,
        }

        let (field_index, element, done, kind) = match self.frames.last_mut() {
            Some(WriterFrame::Struct {
                field_index,
                progress,
                ..
            }) => {
                let state = progress
                    .as_mut()
                    .expect("array progress stepped without progress state");
                let (element, done, kind) = match state {
                    FieldProgress::ScalarArray { next, total } => {
                        let element = *next;
                        *next += 1;
                        (element, *next == *total, ArrayKind::Scalar)
                    }
                    FieldProgress::StructArray { next, total } => {
                        let element = *next;
                        *next += 1;
                        (element, *next == *total, ArrayKind::Structs)
                    }
                };
                let field_index = *field_index;
                if done {
                    *progress = None;
                }
                (field_index, element, done, kind)
            }
            _ => unreachable!("array progress on a non-struct frame"),
        };

        let field = ty.fields[field_index].clone();
        let field_ptr = unsafe { instance.add(field.offset as usize) };
        if done {
            self.advance_field();
        }

        match kind {
            ArrayKind::Scalar => {
                let (item, pointer) = match &field.archetype {
                    Archetype::InlineArray {
                        item, item_size, ..
                    } => (item.clone(), unsafe {
                        field_ptr.add((element * item_size) as usize)
                    }),
                    Archetype::DynamicArray {
                        item,
                        item_size,
                        ops,
                    } => (item.clone(), unsafe {
                        (ops.data)(field_ptr as *mut u8).add((element * item_size) as usize) as *const u8
                    }),
                    _ => unreachable!("scalar array progress on a non-array field"),
                };

                let value = self.read_leaf(&item, pointer)?;
                let mut target = single_target(&field.name);
                target.array_index = Some(element);
                self.emit_leaf_setter(target, collect_values(vec![value]))?;
            }
            ArrayKind::Structs => {
                let (type_name, item_size, ops) = match &field.archetype {
                    Archetype::DynamicArray {
                        item,
                        item_size,
                        ops,
                    } => match item.as_ref() {
                        Archetype::Struct { type_name } => (type_name.clone(), *item_size, *ops),
                        _ => unreachable!("struct array progress over non-struct items"),
                    },
                    _ => unreachable!("struct array progress on a non-array field"),
                };

                let inner = self.lookup_struct(&type_name)?;
                let element_ptr = unsafe {
                    (ops.data)(field_ptr as *mut u8).add((element * item_size) as usize)
                };
                self.emitter.emit(&RdEvent::ArrayAppenderBegin {
                    target: single_target(&field.name),
                })?;
                self.frames.push(WriterFrame::Struct {
                    instance: element_ptr,
                    ty: inner,
                    field_index: 0,
                    progress: None,
                });
            }
        }
        Ok(StepResult::InProgress)
    }

    fn advance_field(&mut self) {
        if let Some(WriterFrame::Struct { field_index, .. }) = self.frames.last_mut() {
            *field_index += 1;
        }
    }

    fn set_progress(&mut self, new_progress: FieldProgress) {
        if let Some(WriterFrame::Struct { progress, .. }) = self.frames.last_mut() {
            *progress = Some(new_progress);
        }
    }

    fn field_visible(
        &self,
        instance: *const u8,
        ty: &Arc<StructType>,
        field: &crate::reflect::Field,
    ) -> LodestoneResult<bool> {
        unsafe { ty.field_visible(instance, field) }
    }

    // ------------------------------------------------------------------
    // Patch frames
    // ------------------------------------------------------------------

    fn step_patch(&mut self) -> LodestoneResult<StepResult> {
        let Some(WriterFrame::Patch { pending, open_path }) = self.frames.last_mut() else {
            unreachable!("step_patch on a non-patch frame");
        };

        match pending.front() {
            Some(PatchEmission::TypeSetter(type_name)) => {
                let event = RdEvent::ElementalIdentifierSetter {
                    target: OutputTarget {
                        components: vec![intern("__type")],
                        array_index: None,
                    },
                    values: vec![type_name.clone()],
                };
                pending.pop_front();
                self.emitter.emit(&event)?;
            }
            Some(PatchEmission::Leaf {
                path,
                array_index,
                values,
            }) => {
                let directory = &path[..path.len() - 1];
                let shared = open_path
                    .iter()
                    .zip(directory.iter())
                    .take_while(|(a, b)| a == b)
                    .count();

                if open_path.len() > shared {
                    open_path.pop();
                    self.emitter.emit(&RdEvent::BlockEnd)?;
                } else if open_path.len() < directory.len() {
                    let component = directory[open_path.len()].clone();
                    open_path.push(component.clone());
                    self.emitter.emit(&RdEvent::StructuralSetterBegin {
                        target: OutputTarget {
                            components: vec![component],
                            array_index: None,
                        },
                    })?;
                } else {
                    let target = OutputTarget {
                        components: vec![path[path.len() - 1].clone()],
                        array_index: *array_index,
                    };
                    let values = values.clone();
                    pending.pop_front();
                    self.emit_leaf_setter(target, values)?;
                }
            }
            None => {
                if open_path.pop().is_some() {
                    self.emitter.emit(&RdEvent::BlockEnd)?;
                } else {
                    self.frames.pop();
                    self.emitter.emit(&RdEvent::BlockEnd)?;
                }
            }
        }
        Ok(StepResult::InProgress)
    }

    /// Expand a patch into its emission plan: the `__type` setter first,
    /// then one leaf per covered field span of every chunk.
    fn plan_patch_emissions(
        &self,
        patch: &crate::reflect::Patch,
    ) -> LodestoneResult<VecDeque<PatchEmission>> {
        let type_name = patch
            .type_name()
            .ok_or_else(|| {
                LodestoneError::PatchWithoutType("cannot emit an untyped patch".to_string())
            })?
            .clone();
        let ty = self.lookup_struct(&type_name)?;

        let mut pending = VecDeque::new();
        pending.push_back(PatchEmission::TypeSetter(type_name));

        for chunk in patch.chunks() {
            let mut path = Vec::new();
            self.collect_patch_leaves(&ty, chunk.offset, &chunk.data, 0, &mut path, &mut pending)?;
        }
        Ok(pending)
    }

    fn collect_patch_leaves(
        &self,
        ty: &Arc<StructType>,
        chunk_offset: u32,
        chunk_data: &[u8],
        struct_base: u32,
        path: &mut Vec<InternedString>,
        out: &mut VecDeque<PatchEmission>,
    ) -> LodestoneResult<()> {
        let chunk_end = chunk_offset + chunk_data.len() as u32;

        // Binary-search the first field whose padded span reaches into the
        // chunk, then walk forward until past it.
        let first = if chunk_offset <= struct_base {
            0
        } else {
            ty.field_containing_offset(chunk_offset - struct_base)
                .unwrap_or(0)
        };

        for index in first..ty.fields.len() {
            let field = &ty.fields[index];
            let begin = struct_base + field.offset;
            let end = begin + ty.size_with_padding(index);
            if begin >= chunk_end {
                break;
            }
            if end <= chunk_offset {
                continue;
            }

            path.push(field.name.clone());
            match &field.archetype {
                Archetype::Struct { type_name } => {
                    let inner = self.lookup_struct(type_name)?;
                    self.collect_patch_leaves(&inner, chunk_offset, chunk_data, begin, path, out)?;
                }
                Archetype::SignedInt { .. }
                | Archetype::UnsignedInt { .. }
                | Archetype::Float { .. }
                | Archetype::Enum { .. } => {
                    let values =
                        self.chunk_leaf_values(&field.archetype, field.size, begin, chunk_offset, chunk_data)?;
                    out.push_back(PatchEmission::Leaf {
                        path: path.clone(),
                        array_index: None,
                        values,
                    });
                }
                Archetype::InlineArray {
                    item,
                    item_size,
                    capacity,
                } => {
                    for element in 0..*capacity {
                        let element_begin = begin + element * item_size;
                        if element_begin >= chunk_end {
                            break;
                        }
                        if element_begin + item_size <= chunk_offset {
                            continue;
                        }
                        let values = self.chunk_leaf_values(
                            item,
                            *item_size,
                            element_begin,
                            chunk_offset,
                            chunk_data,
                        )?;
                        out.push_back(PatchEmission::Leaf {
                            path: path.clone(),
                            array_index: Some(element),
                            values,
                        });
                    }
                }
                other => {
                    return Err(LodestoneError::UnsupportedArchetype(format!(
                        "patch chunk covers non-patchable field {} ({other:?})",
                        field.name
                    )));
                }
            }
            path.pop();
        }
        Ok(())
    }

    fn chunk_leaf_values(
        &self,
        archetype: &Archetype,
        size: u32,
        field_begin: u32,
        chunk_offset: u32,
        chunk_data: &[u8],
    ) -> LodestoneResult<LeafValues> {
        if field_begin < chunk_offset
            || field_begin + size > chunk_offset + chunk_data.len() as u32
        {
            return Err(LodestoneError::Serialization(format!(
                "patch chunk covers field bytes only partially at offset {field_begin}"
            )));
        }
        let bytes = &chunk_data
            [(field_begin - chunk_offset) as usize..(field_begin - chunk_offset + size) as usize];

        // Chunk bytes hold the value in its in-memory (little-endian)
        // layout; re-read through an aligned copy.
        match archetype {
            Archetype::SignedInt { size } => {
                let value = match size {
                    1 => bytes[0] as i8 as i64,
                    2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
                    4 => i32::from_le_bytes(bytes[..4].try_into().expect("sized above")) as i64,
                    8 => i64::from_le_bytes(bytes[..8].try_into().expect("sized above")),
                    _ => unreachable!("unsupported signed width"),
                };
                Ok(LeafValues::Integers(vec![value]))
            }
            Archetype::UnsignedInt { size } => {
                let value = match size {
                    1 => bytes[0] as u64,
                    2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u64,
                    4 => u32::from_le_bytes(bytes[..4].try_into().expect("sized above")) as u64,
                    8 => u64::from_le_bytes(bytes[..8].try_into().expect("sized above")),
                    _ => unreachable!("unsupported unsigned width"),
                };
                let value = i64::try_from(value).map_err(|_| {
                    LodestoneError::OutOfRange(format!(
                        "unsigned value {value} is not representable in readable data"
                    ))
                })?;
                Ok(LeafValues::Integers(vec![value]))
            }
            Archetype::Float { size } => {
                let value = match size {
                    4 => f32::from_le_bytes(bytes[..4].try_into().expect("sized above")) as f64,
                    8 => f64::from_le_bytes(bytes[..8].try_into().expect("sized above")),
                    _ => unreachable!("unsupported float width"),
                };
                Ok(LeafValues::Floats(vec![value]))
            }
            Archetype::Enum { enum_name } => {
                let raw = u32::from_le_bytes(bytes[..4].try_into().expect("sized above"));
                let identifiers = self.enum_identifiers(enum_name, raw)?;
                if identifiers.is_empty() {
                    // A zero flags value inside a chunk still needs a
                    // setter to reproduce the chunk bytes; emit the first
                    // zero item if one exists.
                    return Err(LodestoneError::Serialization(format!(
                        "zero flags value in patch chunk of enum {enum_name}"
                    )));
                }
                Ok(LeafValues::Identifiers(identifiers))
            }
            other => Err(LodestoneError::UnsupportedArchetype(format!(
                "archetype {other:?} inside a patch chunk"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Leaf helpers
    // ------------------------------------------------------------------

    fn lookup_struct(&self, type_name: &InternedString) -> LodestoneResult<Arc<StructType>> {
        self.registry
            .struct_by_name(type_name)
            .cloned()
            .ok_or_else(|| LodestoneError::NotFound(format!("struct type {type_name}")))
    }

    fn reject_flag_enum_array(
        &self,
        item: &Archetype,
        field_name: &InternedString,
    ) -> LodestoneResult<()> {
        if let Archetype::Enum { enum_name } = item {
            let enum_ty = self
                .registry
                .enum_by_name(enum_name)
                .ok_or_else(|| LodestoneError::NotFound(format!("enum type {enum_name}")))?;
            if enum_ty.flags {
                return Err(LodestoneError::UnsupportedArchetype(format!(
                    "{field_name} is an array of flag enums, which is ambiguous"
                )));
            }
        }
        Ok(())
    }

    /// Decompose an enum value into emitted identifiers.
    ///
    /// Plain enums yield exactly one name; flag enums yield one name per
    /// set bit group, and an empty list for zero.
    fn enum_identifiers(
        &self,
        enum_name: &InternedString,
        value: u32,
    ) -> LodestoneResult<Vec<InternedString>> {
        let enum_ty = self
            .registry
            .enum_by_name(enum_name)
            .ok_or_else(|| LodestoneError::NotFound(format!("enum type {enum_name}")))?;

        if !enum_ty.flags {
            let item = enum_ty.item_by_value(value).ok_or_else(|| {
                LodestoneError::NotFound(format!("value {value} in enum {enum_name}"))
            })?;
            return Ok(vec![item.name.clone()]);
        }

        let mut identifiers = Vec::new();
        let mut covered = 0u32;
        for item in &enum_ty.items {
            if item.value != 0 && value & item.value == item.value {
                identifiers.push(item.name.clone());
                covered |= item.value;
            }
        }
        if covered != value {
            return Err(LodestoneError::OutOfRange(format!(
                "flags value {value:#x} has bits outside enum {enum_name}"
            )));
        }
        Ok(identifiers)
    }

    /// Read one leaf element as an emitted value.
    fn read_leaf(&self, archetype: &Archetype, pointer: *const u8) -> LodestoneResult<LeafValue> {
        match archetype {
            Archetype::SignedInt { size } => {
                Ok(LeafValue::Integer(unsafe { access::read_signed(pointer, *size) }))
            }
            Archetype::UnsignedInt { size } => {
                let value = unsafe { access::read_unsigned(pointer, *size) };
                let value = i64::try_from(value).map_err(|_| {
                    LodestoneError::OutOfRange(format!(
                        "unsigned value {value} is not representable in readable data"
                    ))
                })?;
                Ok(LeafValue::Integer(value))
            }
            Archetype::Float { size } => {
                Ok(LeafValue::Float(unsafe { access::read_float(pointer, *size) }))
            }
            Archetype::Enum { enum_name } => {
                let raw = unsafe { access::read_unsigned(pointer, 4) } as u32;
                let enum_ty = self
                    .registry
                    .enum_by_name(enum_name)
                    .ok_or_else(|| LodestoneError::NotFound(format!("enum type {enum_name}")))?;
                debug_assert!(!enum_ty.flags, "flag enum arrays are rejected earlier");
                let item = enum_ty.item_by_value(raw).ok_or_else(|| {
                    LodestoneError::NotFound(format!("value {raw} in enum {enum_name}"))
                })?;
                Ok(LeafValue::Identifier(item.name.clone()))
            }
            Archetype::String => {
                Ok(LeafValue::Text(unsafe { access::string_ref(pointer) }.clone()))
            }
            Archetype::InternedString => Ok(LeafValue::Text(
                unsafe { access::interned_ref(pointer) }.as_str().to_string(),
            )),
            other => Err(LodestoneError::UnsupportedArchetype(format!(
                "cannot emit {other:?} as an elemental value"
            ))),
        }
    }

    fn emit_leaf_setter(
        &mut self,
        target: OutputTarget,
        values: LeafValues,
    ) -> LodestoneResult<()> {
        let event = match values {
            LeafValues::Integers(values) => RdEvent::ElementalIntegerSetter { target, values },
            LeafValues::Floats(values) => RdEvent::ElementalFloatingSetter { target, values },
            LeafValues::Identifiers(values) => {
                RdEvent::ElementalIdentifierSetter { target, values }
            }
            LeafValues::Strings(values) => RdEvent::ElementalStringSetter { target, values },
        };
        self.emitter.emit(&event)
    }
}

#[derive(Clone, Debug)]
enum LeafValue {
    Integer(i64),
    Float(f64),
    Identifier(InternedString),
    Text(String),
}

fn single_target(name: &InternedString) -> OutputTarget {
    OutputTarget {
        components: vec![name.clone()],
        array_index: None,
    }
}

fn collect_values(values: Vec<LeafValue>) -> LeafValues {
    debug_assert!(!values.is_empty(), "leaf setters carry at least one value");
    match &values[0] {
        LeafValue::Integer(_) => LeafValues::Integers(
            values
                .into_iter()
                .map(|v| match v {
                    LeafValue::Integer(value) => value,
                    _ => unreachable!("mixed leaf kinds in one array"),
                })
                .collect(),
        ),
        LeafValue::Float(_) => LeafValues::Floats(
            values
                .into_iter()
                .map(|v| match v {
                    LeafValue::Float(value) => value,
                    _ => unreachable!("mixed leaf kinds in one array"),
                })
                .collect(),
        ),
        LeafValue::Identifier(_) => LeafValues::Identifiers(
            values
                .into_iter()
                .map(|v| match v {
                    LeafValue::Identifier(value) => value,
                    _ => unreachable!("mixed leaf kinds in one array"),
                })
                .collect(),
        ),
        LeafValue::Text(_) => LeafValues::Strings(
            values
                .into_iter()
                .map(|v| match v {
                    LeafValue::Text(value) => value,
                    _ => unreachable!("mixed leaf kinds in one array"),
                })
                .collect(),
        ),
    }
}
