//! Owned, type-erased reflected instances.

use std::alloc::{Layout, alloc, dealloc};
use std::any::TypeId;
use std::ptr::NonNull;
use std::sync::Arc;

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::memory::AllocationGroup;

use super::types::StructType;

/// Heap allocation described and managed by a [`StructType`].
///
/// Construction runs the type's init functor, drop runs its shutdown
/// functor; the allocation is charged to the owning allocation group for
/// its lifetime. The payload address is stable for the life of the box,
/// so readers may hold raw pointers into it while the box itself moves
/// between tables.
pub struct ReflectedBox {
    pointer: NonNull<u8>,
    ty: Arc<StructType>,
    group: AllocationGroup,
}

// The box owns its storage exclusively; the described types are required
// to be Send at registration time.
unsafe impl Send for ReflectedBox {}

impl ReflectedBox {
    pub fn new(ty: Arc<StructType>, group: AllocationGroup) -> LodestoneResult<Self> {
        if ty.size == 0 {
            return Err(LodestoneError::Internal(format!(
                "cannot instantiate zero-sized type {}",
                ty.name
            )));
        }
        let init = ty.init.clone().ok_or_else(|| {
            LodestoneError::Internal(format!("type {} has no init functor", ty.name))
        })?;

        let layout = Layout::from_size_align(ty.size as usize, ty.alignment as usize)
            .map_err(|e| LodestoneError::Internal(format!("bad layout for {}: {e}", ty.name)))?;

        let raw = unsafe { alloc(layout) };
        let pointer = NonNull::new(raw).ok_or_else(|| {
            LodestoneError::Internal(format!("allocation failed for {}", ty.name))
        })?;

        init(pointer.as_ptr());
        group.charge(ty.size as u64);

        Ok(Self { pointer, ty, group })
    }

    pub fn ty(&self) -> &Arc<StructType> {
        &self.ty
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.pointer.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.pointer.as_ptr()
    }

    /// Borrow the instance as its backing Rust type, if the descriptor
    /// was registered from one and it matches `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        (self.ty.rust_type() == Some(TypeId::of::<T>()))
            .then(|| unsafe { &*(self.pointer.as_ptr() as *const T) })
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        (self.ty.rust_type() == Some(TypeId::of::<T>()))
            .then(|| unsafe { &mut *(self.pointer.as_ptr() as *mut T) })
    }
}

impl Drop for ReflectedBox {
    fn drop(&mut self) {
        if let Some(shutdown) = &self.ty.shutdown {
            shutdown(self.pointer.as_ptr());
        }
        let layout = Layout::from_size_align(self.ty.size as usize, self.ty.alignment as usize)
            .expect("layout was validated at construction");
        unsafe { dealloc(self.pointer.as_ptr(), layout) };
        self.group.release(self.ty.size as u64);
    }
}

impl std::fmt::Debug for ReflectedBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectedBox")
            .field("type", &self.ty.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::StructBuilder;

    #[derive(Default)]
    struct Tracked {
        value: i32,
        text: String,
    }

    #[test]
    fn construction_and_downcast() {
        let ty = StructBuilder::new::<Tracked>("tracked_t")
            .field_sint("value", std::mem::offset_of!(Tracked, value), 4)
            .field_string("text", std::mem::offset_of!(Tracked, text))
            .build();

        let group = AllocationGroup::root().child("reflected_box_test");
        let mut instance = ReflectedBox::new(ty, group.clone()).unwrap();
        assert_eq!(group.allocated(), std::mem::size_of::<Tracked>() as u64);

        let tracked = instance.downcast_mut::<Tracked>().unwrap();
        tracked.value = 11;
        tracked.text.push_str("alive");

        assert_eq!(instance.downcast_ref::<Tracked>().unwrap().value, 11);
        assert!(instance.downcast_ref::<String>().is_none());

        drop(instance);
        assert_eq!(group.allocated(), 0);
    }
}
