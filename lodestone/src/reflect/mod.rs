//! Runtime type registry and reflection-driven data access.
//!
//! The registry describes structs and enums as ordered field tables with
//! byte offsets, which is what the serializers and the patch overlay
//! format operate on. Registration happens through [`StructBuilder`] with
//! offsets taken from `std::mem::offset_of!`; the raw access helpers in
//! [`access`] are the only unsafe surface and trust that invariant.

pub mod access;
mod instance;
mod patch;
mod registry;
mod system;
mod types;

pub use instance::ReflectedBox;
pub use patch::{Patch, PatchBuilder, PatchChunk};
pub use registry::{EnumBuilder, GenerationHook, RegistryBuilder, StructBuilder, TypeRegistry};
pub use system::{REFLECTION_SYSTEM_NAME, ReflectionSystem, ReflectionSystemConfig};
pub use types::{
    Archetype, DynArrayOps, EnumItem, EnumType, Field, FieldVisibility, Functor, StructType,
};
