//! Wrapping native objects that already exist.
//!
//! Instead of letting a backend create its device, command buffers and resources, an application
//! that already owns native objects can hand them over through the descriptors of the
//! per-backend submodules. The descriptors are plain data: they are consumed once, when the
//! wrapping object is created, and carry no behavior of their own.

use std::{ffi::c_void, ptr::NonNull};

pub mod d3d11;

/// A pointer to a native API object, such as an `ID3D11Device`.
///
/// The validation layer never dereferences it. It is only carried to the backend, which knows
/// the actual type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NativeHandle(NonNull<c_void>);

// The handle is an opaque token to this crate; thread-safety of the pointee is the backend's
// contract.
unsafe impl Send for NativeHandle {}
unsafe impl Sync for NativeHandle {}

impl NativeHandle {
    /// Wraps `ptr`, or returns `None` if it is null.
    #[inline]
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Returns the raw pointer.
    #[inline]
    pub fn as_raw(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::NativeHandle;
    use std::ptr;

    #[test]
    fn null_is_rejected() {
        assert_eq!(NativeHandle::from_raw(ptr::null_mut()), None);

        let mut native = 0u64;
        let ptr = ptr::addr_of_mut!(native).cast();
        assert_eq!(NativeHandle::from_raw(ptr).map(NativeHandle::as_raw), Some(ptr));
    }
}
