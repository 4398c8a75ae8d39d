//! Raw field access over reflected instances.
//!
//! These helpers are the single place where descriptor offsets meet real
//! memory. Safety contract for every function here: `pointer` must point
//! at storage that is valid, properly aligned and actually of the shape
//! the descriptor promised at registration time.

use crate::intern::InternedString;

use super::patch::Patch;

/// Read a signed integer of `size` bytes, sign-extended to `i64`.
pub unsafe fn read_signed(pointer: *const u8, size: u32) -> i64 {
    unsafe {
        match size {
            1 => *(pointer as *const i8) as i64,
            2 => *(pointer as *const i16) as i64,
            4 => *(pointer as *const i32) as i64,
            8 => *(pointer as *const i64),
            _ => unreachable!("unsupported signed integer width {size}"),
        }
    }
}

/// Write a signed integer of `size` bytes. Returns false when the value
/// does not fit the width.
#[must_use]
pub unsafe fn write_signed(pointer: *mut u8, size: u32, value: i64) -> bool {
    unsafe {
        match size {
            1 => match i8::try_from(value) {
                Ok(v) => {
                    *(pointer as *mut i8) = v;
                    true
                }
                Err(_) => false,
            },
            2 => match i16::try_from(value) {
                Ok(v) => {
                    *(pointer as *mut i16) = v;
                    true
                }
                Err(_) => false,
            },
            4 => match i32::try_from(value) {
                Ok(v) => {
                    *(pointer as *mut i32) = v;
                    true
                }
                Err(_) => false,
            },
            8 => {
                *(pointer as *mut i64) = value;
                true
            }
            _ => unreachable!("unsupported signed integer width {size}"),
        }
    }
}

/// Read an unsigned integer of `size` bytes, zero-extended to `u64`.
pub unsafe fn read_unsigned(pointer: *const u8, size: u32) -> u64 {
    unsafe {
        match size {
            1 => *pointer as u64,
            2 => *(pointer as *const u16) as u64,
            4 => *(pointer as *const u32) as u64,
            8 => *(pointer as *const u64),
            _ => unreachable!("unsupported unsigned integer width {size}"),
        }
    }
}

/// Write an unsigned integer of `size` bytes. Returns false when the
/// value does not fit the width.
#[must_use]
pub unsafe fn write_unsigned(pointer: *mut u8, size: u32, value: u64) -> bool {
    unsafe {
        match size {
            1 => match u8::try_from(value) {
                Ok(v) => {
                    *pointer = v;
                    true
                }
                Err(_) => false,
            },
            2 => match u16::try_from(value) {
                Ok(v) => {
                    *(pointer as *mut u16) = v;
                    true
                }
                Err(_) => false,
            },
            4 => match u32::try_from(value) {
                Ok(v) => {
                    *(pointer as *mut u32) = v;
                    true
                }
                Err(_) => false,
            },
            8 => {
                *(pointer as *mut u64) = value;
                true
            }
            _ => unreachable!("unsupported unsigned integer width {size}"),
        }
    }
}

/// Read a float of `size` bytes widened to `f64`.
pub unsafe fn read_float(pointer: *const u8, size: u32) -> f64 {
    unsafe {
        match size {
            4 => *(pointer as *const f32) as f64,
            8 => *(pointer as *const f64),
            _ => unreachable!("unsupported float width {size}"),
        }
    }
}

/// Write a float of `size` bytes, narrowing from `f64`.
pub unsafe fn write_float(pointer: *mut u8, size: u32, value: f64) {
    unsafe {
        match size {
            4 => *(pointer as *mut f32) = value as f32,
            8 => *(pointer as *mut f64) = value,
            _ => unreachable!("unsupported float width {size}"),
        }
    }
}

pub unsafe fn string_ref<'a>(pointer: *const u8) -> &'a String {
    unsafe { &*(pointer as *const String) }
}

pub unsafe fn string_mut<'a>(pointer: *mut u8) -> &'a mut String {
    unsafe { &mut *(pointer as *mut String) }
}

pub unsafe fn interned_ref<'a>(pointer: *const u8) -> &'a InternedString {
    unsafe { &*(pointer as *const InternedString) }
}

pub unsafe fn interned_mut<'a>(pointer: *mut u8) -> &'a mut InternedString {
    unsafe { &mut *(pointer as *mut InternedString) }
}

pub unsafe fn patch_ref<'a>(pointer: *const u8) -> &'a Patch {
    unsafe { &*(pointer as *const Patch) }
}

pub unsafe fn patch_mut<'a>(pointer: *mut u8) -> &'a mut Patch {
    unsafe { &mut *(pointer as *mut Patch) }
}
