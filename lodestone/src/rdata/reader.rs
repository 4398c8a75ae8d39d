//! Readable-data serializer: event stream → typed instance.
//!
//! The reader keeps a stack of frames; the root frame is always a struct
//! frame over the caller's instance. `StructuralSetterBegin` pushes either
//! a nested struct frame, a patch frame (building a sparse overlay into a
//! `Patch` field) or a patch-substruct frame that logically descends
//! inside the patch scope. Every mismatch logs the offending path and
//! turns the reader into the failed state.

use std::sync::Arc;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};
use crate::reflect::{Archetype, PatchBuilder, StructType, TypeRegistry, access};
use crate::stream::Stream;

use super::StepResult;
use super::event::{OutputTarget, RdEvent};
use super::parser::RdParser;

enum ReaderFrame {
    Struct {
        instance: *mut u8,
        ty: Arc<StructType>,
    },
    Patch {
        patch_out: *mut u8,
        ty: Option<Arc<StructType>>,
    },
    PatchSubStruct {
        /// Cumulative offset from the patch root.
        offset: u32,
        size_with_padding: u32,
        ty: Arc<StructType>,
    },
}

/// Where a resolved write lands.
enum WriteScope {
    Instance {
        base: *mut u8,
    },
    Patch {
        scope_offset: u32,
        scope_size: u32,
        scope_size_with_padding: u32,
    },
}

struct ResolvedField {
    owner: Arc<StructType>,
    field_index: usize,
    /// Offset of the field from the frame's struct base.
    offset: u32,
}

pub struct ReadableReader {
    parser: RdParser,
    registry: Arc<TypeRegistry>,
    frames: Vec<ReaderFrame>,
    patch_builder: Option<PatchBuilder>,
    failed: bool,
    finished: bool,
}

// Frames hold raw pointers into the caller-owned instance; the
// constructor contract makes them safe to carry across threads.
unsafe impl Send for ReadableReader {}

impl ReadableReader {
    /// Create a reader decoding into `instance`.
    ///
    /// Reads the remaining stream content immediately; the type header
    /// must already have been consumed.
    ///
    /// # Safety
    ///
    /// `instance` must point at a valid, properly initialized value laid
    /// out as `ty` describes, and must stay valid and otherwise untouched
    /// until the reader is dropped or finishes.
    pub unsafe fn new_raw(
        stream: &mut dyn Stream,
        instance: *mut u8,
        ty: Arc<StructType>,
        registry: Arc<TypeRegistry>,
    ) -> LodestoneResult<Self> {
        let parser = RdParser::from_stream(stream)?;
        Ok(Self {
            parser,
            registry,
            frames: vec![ReaderFrame::Struct { instance, ty }],
            patch_builder: None,
            failed: false,
            finished: false,
        })
    }

    /// Advance by one parsed event.
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
                tracing::error!(
                    line = self.parser.line_number(),
                    %error,
                    "readable data deserialization failed"
                );
                self.failed = true;
                StepResult::Failed
            }
        }
    }

    fn step_inner(&mut self) -> LodestoneResult<StepResult> {
        let Some(event) = self.parser.step()? else {
            if self.frames.len() == 1 {
                return Ok(StepResult::Finished);
            }
            return Err(LodestoneError::Serialization(
                "stream ended with unclosed blocks".to_string(),
            ));
        };

        match event {
            RdEvent::BlockEnd => self.close_block()?,
            RdEvent::StructuralSetterBegin { target } => self.open_struct(&target)?,
            RdEvent::ArrayAppenderBegin { target } => self.open_appender(&target)?,
            setter => self.apply_setter(&setter)?,
        }
        Ok(StepResult::InProgress)
    }

    // ------------------------------------------------------------------
    // Frame helpers
    // ------------------------------------------------------------------

    fn frame_type(&self, frame: &ReaderFrame) -> LodestoneResult<Arc<StructType>> {
        match frame {
            ReaderFrame::Struct { ty, .. } => Ok(ty.clone()),
            ReaderFrame::PatchSubStruct { ty, .. } => Ok(ty.clone()),
            ReaderFrame::Patch { ty: Some(ty), .. } => Ok(ty.clone()),
            ReaderFrame::Patch { ty: None, .. } => Err(LodestoneError::PatchWithoutType(
                "patch content before its __type setter".to_string(),
            )),
        }
    }

    fn write_scope(&self, frame: &ReaderFrame) -> LodestoneResult<WriteScope> {
        match frame {
            ReaderFrame::Struct { instance, .. } => Ok(WriteScope::Instance { base: *instance }),
            ReaderFrame::Patch { ty: Some(ty), .. } => Ok(WriteScope::Patch {
                scope_offset: 0,
                scope_size: ty.size,
                scope_size_with_padding: ty.size,
            }),
            ReaderFrame::PatchSubStruct {
                offset,
                size_with_padding,
                ty,
            } => Ok(WriteScope::Patch {
                scope_offset: *offset,
                scope_size: ty.size,
                scope_size_with_padding: *size_with_padding,
            }),
            ReaderFrame::Patch { ty: None, .. } => Err(LodestoneError::PatchWithoutType(
                "patch content before its __type setter".to_string(),
            )),
        }
    }

    /// Resolve a dot path against `frame_ty`, descending through nested
    /// struct fields.
    fn resolve(
        &self,
        frame_ty: &Arc<StructType>,
        target: &OutputTarget,
    ) -> LodestoneResult<ResolvedField> {
        let mut owner = frame_ty.clone();
        let mut base_offset = 0u32;

        for (position, component) in target.components.iter().enumerate() {
            let (field_index, field) = owner.field(component).ok_or_else(|| {
                LodestoneError::FieldAbsent(format!("{} in {}", target.path(), owner.name))
            })?;

            if position + 1 == target.components.len() {
                let offset = base_offset + field.offset;
                return Ok(ResolvedField {
                    owner: owner.clone(),
                    field_index,
                    offset,
                });
            }

            match &field.archetype {
                Archetype::Struct { type_name } => {
                    base_offset += field.offset;
                    owner = self
                        .registry
                        .struct_by_name(type_name)
                        .ok_or_else(|| {
                            LodestoneError::NotFound(format!("struct type {type_name}"))
                        })?
                        .clone();
                }
                _ => {
                    return Err(LodestoneError::TypeMismatch(format!(
                        "{} is not a struct field on the way to {}",
                        component,
                        target.path()
                    )));
                }
            }
        }

        Err(LodestoneError::FieldAbsent(format!(
            "empty output target in {}",
            frame_ty.name
        )))
    }

    // ------------------------------------------------------------------
    // Block events
    // ------------------------------------------------------------------

    fn open_struct(&mut self, target: &OutputTarget) -> LodestoneResult<()> {
        if target.array_index.is_some() {
            return Err(LodestoneError::UnsupportedArchetype(format!(
                "indexed structural setter {}",
                target.path()
            )));
        }

        let top = self.frames.last().expect("frame stack never empty");
        let frame_ty = self.frame_type(top)?;
        let resolved = self.resolve(&frame_ty, target)?;
        let field = resolved.owner.fields[resolved.field_index].clone();

        match &field.archetype {
            Archetype::Struct { type_name } => {
                let inner = self
                    .registry
                    .struct_by_name(type_name)
                    .ok_or_else(|| LodestoneError::NotFound(format!("struct type {type_name}")))?
                    .clone();

                match self.write_scope(top)? {
                    WriteScope::Instance { base } => {
                        let instance = unsafe { base.add(resolved.offset as usize) };
                        self.frames.push(ReaderFrame::Struct {
                            instance,
                            ty: inner,
                        });
                    }
                    WriteScope::Patch { scope_offset, .. } => {
                        let size_with_padding =
                            resolved.owner.size_with_padding(resolved.field_index);
                        self.frames.push(ReaderFrame::PatchSubStruct {
                            offset: scope_offset + resolved.offset,
                            size_with_padding,
                            ty: inner,
                        });
                    }
                }
            }
            Archetype::Patch => {
                match self.write_scope(top)? {
                    WriteScope::Instance { base } => {
                        let patch_out = unsafe { base.add(resolved.offset as usize) };
                        self.frames.push(ReaderFrame::Patch {
                            patch_out,
                            ty: None,
                        });
                        self.patch_builder = Some(PatchBuilder::new());
                    }
                    WriteScope::Patch { .. } => {
                        return Err(LodestoneError::UnsupportedArchetype(format!(
                            "patch field {} inside a patch",
                            target.path()
                        )));
                    }
                }
            }
            other => {
                return Err(LodestoneError::TypeMismatch(format!(
                    "structural setter {} targets non-structural archetype {:?}",
                    target.path(),
                    other
                )));
            }
        }
        Ok(())
    }

    fn open_appender(&mut self, target: &OutputTarget) -> LodestoneResult<()> {
        let top = self.frames.last().expect("frame stack never empty");
        let base = match self.write_scope(top)? {
            WriteScope::Instance { base } => base,
            WriteScope::Patch { .. } => {
                return Err(LodestoneError::UnsupportedArchetype(format!(
                    "array appender {} inside a patch",
                    target.path()
                )));
            }
        };

        let frame_ty = self.frame_type(top)?;
        let resolved = self.resolve(&frame_ty, target)?;
        let field = resolved.owner.fields[resolved.field_index].clone();

        let Archetype::DynamicArray {
            item,
            item_size,
            ops,
        } = &field.archetype
        else {
            return Err(LodestoneError::TypeMismatch(format!(
                "array appender {} targets a non-dynamic-array field",
                target.path()
            )));
        };
        let Archetype::Struct { type_name } = item.as_ref() else {
            return Err(LodestoneError::TypeMismatch(format!(
                "array appender {} needs struct elements",
                target.path()
            )));
        };

        let inner = self
            .registry
            .struct_by_name(type_name)
            .ok_or_else(|| LodestoneError::NotFound(format!("struct type {type_name}")))?
            .clone();

        let vec_ptr = unsafe { base.add(resolved.offset as usize) };
        let element = unsafe {
            let length = (ops.len)(vec_ptr);
            (ops.resize)(vec_ptr, length + 1);
            (ops.data)(vec_ptr).add(length * *item_size as usize)
        };

        self.frames.push(ReaderFrame::Struct {
            instance: element,
            ty: inner,
        });
        Ok(())
    }

    fn close_block(&mut self) -> LodestoneResult<()> {
        if self.frames.len() <= 1 {
            return Err(LodestoneError::Serialization(
                "unbalanced block end".to_string(),
            ));
        }

        match self.frames.pop().expect("frame stack never empty") {
            ReaderFrame::Struct { .. } | ReaderFrame::PatchSubStruct { .. } => Ok(()),
            ReaderFrame::Patch { patch_out, .. } => {
                let builder = self
                    .patch_builder
                    .take()
                    .ok_or_else(|| {
                        LodestoneError::Internal("patch frame without builder".to_string())
                    })?;
                let patch = builder.build()?;
                unsafe { *access::patch_mut(patch_out) = patch };
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Elemental setters
    // ------------------------------------------------------------------

    fn apply_setter(&mut self, event: &RdEvent) -> LodestoneResult<()> {
        let target = event.target().expect("elemental setters carry a target");

        // `__type` inside a fresh patch frame selects the patch target.
        if let Some(ReaderFrame::Patch { ty: ty @ None, .. }) = self.frames.last_mut() {
            if target.components.len() == 1
                && target.components[0] == intern("__type")
                && target.array_index.is_none()
            {
                let RdEvent::ElementalIdentifierSetter { values, .. } = event else {
                    return Err(LodestoneError::TypeMismatch(
                        "__type expects a single type-name identifier".to_string(),
                    ));
                };
                let [type_name] = values.as_slice() else {
                    return Err(LodestoneError::TypeMismatch(
                        "__type expects exactly one value".to_string(),
                    ));
                };
                let patch_ty = self
                    .registry
                    .struct_by_name(type_name)
                    .ok_or_else(|| LodestoneError::NotFound(format!("struct type {type_name}")))?
                    .clone();
                *ty = Some(patch_ty.clone());
                self.patch_builder
                    .as_mut()
                    .expect("open patch frame owns the builder")
                    .set_type(patch_ty.name.clone());
                return Ok(());
            }
            return Err(LodestoneError::PatchWithoutType(format!(
                "setter {} before __type",
                target.path()
            )));
        }

        let top = self.frames.last().expect("frame stack never empty");
        let frame_ty = self.frame_type(top)?;
        let scope = self.write_scope(top)?;
        let resolved = self.resolve(&frame_ty, target)?;
        let field = resolved.owner.fields[resolved.field_index].clone();

        match &field.archetype {
            Archetype::InlineArray {
                item,
                item_size,
                capacity,
            } => {
                self.reject_flag_enum_array(item, target)?;
                match target.array_index {
                    Some(index) => {
                        if index >= *capacity {
                            return Err(LodestoneError::CapacityExceeded(format!(
                                "{}[{}] beyond capacity {}",
                                target.path(),
                                index,
                                capacity
                            )));
                        }
                        if setter_value_count(event) != 1 {
                            return Err(LodestoneError::TypeMismatch(format!(
                                "indexed setter {} takes exactly one value",
                                target.path()
                            )));
                        }
                        let offset = resolved.offset + index * item_size;
                        self.write_one(
                            &scope,
                            item,
                            *item_size,
                            offset,
                            event,
                            0,
                            &frame_ty,
                        )?;
                    }
                    None => {
                        let count = setter_value_count(event);
                        if count > *capacity as usize {
                            return Err(LodestoneError::CapacityExceeded(format!(
                                "{} holds {} values, capacity is {}",
                                target.path(),
                                count,
                                capacity
                            )));
                        }
                        for value_index in 0..count {
                            let offset = resolved.offset + value_index as u32 * item_size;
                            self.write_one(
                                &scope,
                                item,
                                *item_size,
                                offset,
                                event,
                                value_index,
                                &frame_ty,
                            )?;
                        }
                    }
                }
            }
            Archetype::DynamicArray {
                item,
                item_size,
                ops,
            } => {
                let WriteScope::Instance { base } = &scope else {
                    return Err(LodestoneError::UnsupportedArchetype(format!(
                        "dynamic array {} inside a patch",
                        target.path()
                    )));
                };
                self.reject_flag_enum_array(item, target)?;
                if matches!(item.as_ref(), Archetype::Struct { .. }) {
                    return Err(LodestoneError::TypeMismatch(format!(
                        "{} holds struct elements, use the array appender",
                        target.path()
                    )));
                }

                let vec_ptr = unsafe { base.add(resolved.offset as usize) };
                match target.array_index {
                    Some(index) => {
                        if setter_value_count(event) != 1 {
                            return Err(LodestoneError::TypeMismatch(format!(
                                "indexed setter {} takes exactly one value",
                                target.path()
                            )));
                        }
                        let element = unsafe {
                            let length = (ops.len)(vec_ptr);
                            if (index as usize) >= length {
                                (ops.resize)(vec_ptr, index as usize + 1);
                            }
                            (ops.data)(vec_ptr).add(index as usize * *item_size as usize)
                        };
                        self.write_element_into(item, element, event, 0)?;
                    }
                    None => {
                        let count = setter_value_count(event);
                        unsafe { (ops.resize)(vec_ptr, count) };
                        for value_index in 0..count {
                            let element = unsafe {
                                (ops.data)(vec_ptr).add(value_index * *item_size as usize)
                            };
                            self.write_element_into(item, element, event, value_index)?;
                        }
                    }
                }
            }
            Archetype::Enum { enum_name } => {
                if target.array_index.is_some() {
                    return Err(LodestoneError::TypeMismatch(format!(
                        "indexed setter {} on a plain enum field",
                        target.path()
                    )));
                }
                let value = self.decode_enum_whole(enum_name, event, target)?;
                self.commit_scalar(&scope, resolved.offset, &value.to_le_bytes(), |pointer| {
                    let _ = unsafe { access::write_unsigned(pointer, 4, value as u64) };
                })?;
            }
            Archetype::SignedInt { .. }
            | Archetype::UnsignedInt { .. }
            | Archetype::Float { .. }
            | Archetype::String
            | Archetype::InternedString => {
                if target.array_index.is_some() {
                    return Err(LodestoneError::TypeMismatch(format!(
                        "indexed setter {} on a scalar field",
                        target.path()
                    )));
                }
                if setter_value_count(event) != 1 {
                    return Err(LodestoneError::TypeMismatch(format!(
                        "{} expects exactly one value",
                        target.path()
                    )));
                }
                self.write_one(
                    &scope,
                    &field.archetype,
                    field.size,
                    resolved.offset,
                    event,
                    0,
                    &frame_ty,
                )?;
            }
            Archetype::Patch => {
                return Err(LodestoneError::TypeMismatch(format!(
                    "elemental setter {} targets a patch field",
                    target.path()
                )));
            }
            Archetype::Struct { .. } => {
                return Err(LodestoneError::TypeMismatch(format!(
                    "elemental setter {} targets a struct field",
                    target.path()
                )));
            }
            Archetype::StructPointer { .. } | Archetype::ExternalPointer => {
                return Err(LodestoneError::UnsupportedArchetype(format!(
                    "pointer field {} cannot be deserialized",
                    target.path()
                )));
            }
        }
        Ok(())
    }

    fn reject_flag_enum_array(
        &self,
        item: &Archetype,
        target: &OutputTarget,
    ) -> LodestoneResult<()> {
        if let Archetype::Enum { enum_name } = item {
            let enum_ty = self
                .registry
                .enum_by_name(enum_name)
                .ok_or_else(|| LodestoneError::NotFound(format!("enum type {enum_name}")))?;
            if enum_ty.flags {
                return Err(LodestoneError::UnsupportedArchetype(format!(
                    "{} is an array of flag enums, which is ambiguous",
                    target.path()
                )));
            }
        }
        Ok(())
    }

    /// Write one element of an elemental setter, either into the instance
    /// or into the patch builder.
    #[allow(clippy::too_many_arguments)]
    fn write_one(
        &mut self,
        scope: &WriteScope,
        archetype: &Archetype,
        size: u32,
        offset: u32,
        event: &RdEvent,
        value_index: usize,
        frame_ty: &Arc<StructType>,
    ) -> LodestoneResult<()> {
        match scope {
            WriteScope::Instance { base } => {
                let pointer = unsafe { base.add(offset as usize) };
                self.write_element_into(archetype, pointer, event, value_index)
            }
            WriteScope::Patch {
                scope_offset,
                scope_size,
                scope_size_with_padding,
            } => {
                if !archetype.is_patchable() {
                    return Err(LodestoneError::UnsupportedArchetype(format!(
                        "archetype {:?} cannot appear inside a patch of {}",
                        archetype, frame_ty.name
                    )));
                }
                let bytes = self.encode_element(archetype, size, event, value_index)?;

                // The last field of a substruct absorbs the padding of its
                // parent scope so round-trips preserve chunk extents.
                let mut adjusted_size = bytes.len() as u32;
                let mut data = bytes;
                if offset + adjusted_size == *scope_size
                    && *scope_size_with_padding > *scope_size
                {
                    adjusted_size = *scope_size_with_padding - offset;
                    data.resize(adjusted_size as usize, 0);
                }

                self.patch_builder
                    .as_mut()
                    .expect("patch scope implies an open builder")
                    .add_bytes(scope_offset + offset, &data);
                Ok(())
            }
        }
    }

    /// Scalar commit helper used by whole-field writes that already
    /// decoded their value (enums).
    fn commit_scalar(
        &mut self,
        scope: &WriteScope,
        offset: u32,
        le_bytes: &[u8],
        write: impl FnOnce(*mut u8),
    ) -> LodestoneResult<()> {
        match scope {
            WriteScope::Instance { base } => {
                write(unsafe { base.add(offset as usize) });
                Ok(())
            }
            WriteScope::Patch {
                scope_offset,
                scope_size,
                scope_size_with_padding,
            } => {
                let mut data = le_bytes.to_vec();
                let size = data.len() as u32;
                if offset + size == *scope_size && *scope_size_with_padding > *scope_size {
                    data.resize((*scope_size_with_padding - offset) as usize, 0);
                }
                self.patch_builder
                    .as_mut()
                    .expect("patch scope implies an open builder")
                    .add_bytes(scope_offset + offset, &data);
                Ok(())
            }
        }
    }

    /// Decode one setter value and write it at `pointer`.
    fn write_element_into(
        &self,
        archetype: &Archetype,
        pointer: *mut u8,
        event: &RdEvent,
        value_index: usize,
    ) -> LodestoneResult<()> {
        match archetype {
            Archetype::SignedInt { size } => {
                let value = integer_value(event, value_index)?;
                if !unsafe { access::write_signed(pointer, *size, value) } {
                    return Err(LodestoneError::OutOfRange(format!(
                        "{value} does not fit a signed {size}-byte field"
                    )));
                }
                Ok(())
            }
            Archetype::UnsignedInt { size } => {
                let value = integer_value(event, value_index)?;
                let unsigned = u64::try_from(value).map_err(|_| {
                    LodestoneError::OutOfRange(format!("{value} into an unsigned field"))
                })?;
                if !unsafe { access::write_unsigned(pointer, *size, unsigned) } {
                    return Err(LodestoneError::OutOfRange(format!(
                        "{value} does not fit an unsigned {size}-byte field"
                    )));
                }
                Ok(())
            }
            Archetype::Float { size } => {
                let value = float_value(event, value_index)?;
                unsafe { access::write_float(pointer, *size, value) };
                Ok(())
            }
            Archetype::Enum { enum_name } => {
                let enum_ty = self
                    .registry
                    .enum_by_name(enum_name)
                    .ok_or_else(|| LodestoneError::NotFound(format!("enum type {enum_name}")))?;
                let RdEvent::ElementalIdentifierSetter { values, .. } = event else {
                    return Err(LodestoneError::TypeMismatch(format!(
                        "enum {enum_name} expects identifier values"
                    )));
                };
                let name = &values[value_index];
                let item = enum_ty.item_by_name(name).ok_or_else(|| {
                    LodestoneError::NotFound(format!("value {name} in enum {enum_name}"))
                })?;
                let _ = unsafe { access::write_unsigned(pointer, 4, item.value as u64) };
                Ok(())
            }
            Archetype::String => {
                let RdEvent::ElementalStringSetter { values, .. } = event else {
                    return Err(LodestoneError::TypeMismatch(
                        "string field expects a quoted value".to_string(),
                    ));
                };
                unsafe { *access::string_mut(pointer) = values[value_index].clone() };
                Ok(())
            }
            Archetype::InternedString => {
                let value = match event {
                    RdEvent::ElementalStringSetter { values, .. } => intern(&values[value_index]),
                    RdEvent::ElementalIdentifierSetter { values, .. } => {
                        values[value_index].clone()
                    }
                    _ => {
                        return Err(LodestoneError::TypeMismatch(
                            "interned field expects a string or identifier".to_string(),
                        ));
                    }
                };
                unsafe { *access::interned_mut(pointer) = value };
                Ok(())
            }
            other => Err(LodestoneError::UnsupportedArchetype(format!(
                "cannot decode into {other:?} element"
            ))),
        }
    }

    /// Decode one setter value into little-endian bytes for patch chunks.
    fn encode_element(
        &self,
        archetype: &Archetype,
        size: u32,
        event: &RdEvent,
        value_index: usize,
    ) -> LodestoneResult<Vec<u8>> {
        let mut bytes = vec![0u8; size as usize];
        self.write_element_into(archetype, bytes.as_mut_ptr(), event, value_index)
            .map(|_| bytes)
    }

    fn decode_enum_whole(
        &self,
        enum_name: &InternedString,
        event: &RdEvent,
        target: &OutputTarget,
    ) -> LodestoneResult<u32> {
        let enum_ty = self
            .registry
            .enum_by_name(enum_name)
            .ok_or_else(|| LodestoneError::NotFound(format!("enum type {enum_name}")))?;
        let RdEvent::ElementalIdentifierSetter { values, .. } = event else {
            return Err(LodestoneError::TypeMismatch(format!(
                "enum setter {} expects identifier values",
                target.path()
            )));
        };

        if !enum_ty.flags && values.len() != 1 {
            return Err(LodestoneError::TypeMismatch(format!(
                "{} is not a flag enum and takes one value",
                target.path()
            )));
        }

        let mut combined = 0u32;
        for name in values {
            let item = enum_ty.item_by_name(name).ok_or_else(|| {
                LodestoneError::NotFound(format!("value {name} in enum {enum_name}"))
            })?;
            combined |= item.value;
        }
        Ok(combined)
    }
}

fn setter_value_count(event: &RdEvent) -> usize {
    match event {
        RdEvent::ElementalIdentifierSetter { values, .. } => values.len(),
        RdEvent::ElementalStringSetter { values, .. } => values.len(),
        RdEvent::ElementalIntegerSetter { values, .. } => values.len(),
        RdEvent::ElementalFloatingSetter { values, .. } => values.len(),
        _ => 0,
    }
}

fn integer_value(event: &RdEvent, value_index: usize) -> LodestoneResult<i64> {
    match event {
        RdEvent::ElementalIntegerSetter { values, .. } => Ok(values[value_index]),
        _ => Err(LodestoneError::TypeMismatch(
            "integer field expects integer values".to_string(),
        )),
    }
}

fn float_value(event: &RdEvent, value_index: usize) -> LodestoneResult<f64> {
    match event {
        RdEvent::ElementalFloatingSetter { values, .. } => Ok(values[value_index]),
        RdEvent::ElementalIntegerSetter { values, .. } => Ok(values[value_index] as f64),
        _ => Err(LodestoneError::TypeMismatch(
            "float field expects numeric values".to_string(),
        )),
    }
}
