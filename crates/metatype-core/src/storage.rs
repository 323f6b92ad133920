//! Owned, type-erased storage for a single value.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::types::{TypeRef, TypeTraits, print_to_string};

/// Heap storage holding one constructed value of a runtime type.
///
/// The blob zeroes its memory, runs the type's constructor when the type needs
/// one, and runs the destructor on drop.
pub struct DataBlob {
    ty: TypeRef,
    ptr: NonNull<u8>,
    layout: Layout,
}

fn layout_for(ty: &TypeRef) -> Layout {
    let align = ty.align().max(1).next_power_of_two();
    match Layout::from_size_align(ty.size().max(1), align) {
        Ok(layout) => layout,
        Err(_) => alloc::handle_alloc_error(Layout::new::<u8>()),
    }
}

impl DataBlob {
    /// Allocate and default-construct a value of `ty`.
    pub fn new(ty: TypeRef) -> Self {
        let layout = layout_for(&ty);
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };
        if ty.traits().contains(TypeTraits::NEEDS_CONSTRUCTOR) {
            // SAFETY: fresh zeroed memory with the type's layout.
            unsafe { ty.construct(ptr.as_ptr()) };
        }
        Self { ty, ptr, layout }
    }

    /// Allocate a copy of the value at `src`.
    ///
    /// # Safety
    /// `src` must hold a constructed value of `ty`.
    pub unsafe fn copy_of(ty: TypeRef, src: *const u8) -> Self {
        let mut blob = Self::new(ty);
        let dst = blob.as_mut_ptr();
        unsafe { blob.ty.copy(dst, src) };
        blob
    }

    /// Type of the stored value.
    #[inline]
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Mutable pointer obtained through a shared borrow.
    ///
    /// Callers are responsible for not aliasing live references.
    #[inline]
    pub(crate) fn shared_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Make the blob immutable so it can be shared between threads.
    pub fn freeze(self) -> FrozenBlob {
        FrozenBlob(self)
    }
}

impl Clone for DataBlob {
    fn clone(&self) -> Self {
        // SAFETY: our own value is constructed.
        unsafe { Self::copy_of(Arc::clone(&self.ty), self.as_ptr()) }
    }
}

impl PartialEq for DataBlob {
    fn eq(&self, other: &Self) -> bool {
        crate::types::same_type(self.ty.as_ref(), other.ty.as_ref())
            // SAFETY: both values are constructed values of the same type.
            && unsafe { self.ty.compare(self.as_ptr(), other.as_ptr()) }
    }
}

impl fmt::Debug for DataBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: our own value is constructed.
        let text = unsafe { print_to_string(self.ty.as_ref(), self.as_ptr()) };
        f.debug_struct("DataBlob")
            .field("type", &self.ty.name())
            .field("value", &text)
            .finish()
    }
}

impl Drop for DataBlob {
    fn drop(&mut self) {
        if self.ty.traits().contains(TypeTraits::NEEDS_DESTRUCTOR) {
            // SAFETY: the value is constructed and dropped exactly once.
            unsafe { self.ty.destruct(self.ptr.as_ptr()) };
        }
        // SAFETY: allocated with this layout in `new`.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// An immutable [`DataBlob`], shareable between threads.
///
/// Used for values owned by type metadata such as class default objects and
/// property defaults.
pub struct FrozenBlob(DataBlob);

// SAFETY: a frozen blob is never written after construction. The values it can
// hold only share state through atomically reference counted handles.
unsafe impl Send for FrozenBlob {}
// SAFETY: as above; all access is read-only.
unsafe impl Sync for FrozenBlob {}

impl FrozenBlob {
    #[inline]
    pub fn ty(&self) -> &TypeRef {
        self.0.ty()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    /// Copy the frozen value into a fresh mutable blob.
    pub fn thaw(&self) -> DataBlob {
        self.0.clone()
    }
}

impl fmt::Debug for FrozenBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FrozenBlob").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SimpleType;

    #[test]
    fn new_blob_is_default_constructed() {
        let ty: TypeRef = Arc::new(SimpleType::<String>::new());
        let blob = DataBlob::new(ty);
        assert_eq!(unsafe { &*blob.as_ptr().cast::<String>() }, "");
    }

    #[test]
    fn clone_copies_value() {
        let ty: TypeRef = Arc::new(SimpleType::<String>::new());
        let mut a = DataBlob::new(ty);
        unsafe { *a.as_mut_ptr().cast::<String>() = "x".to_string() };
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn frozen_blob_thaws_to_equal_copy() {
        let ty: TypeRef = Arc::new(SimpleType::<i64>::new());
        let mut a = DataBlob::new(ty);
        unsafe { *a.as_mut_ptr().cast::<i64>() = 9 };
        let frozen = a.freeze();
        let thawed = frozen.thaw();
        assert_eq!(unsafe { *thawed.as_ptr().cast::<i64>() }, 9);
    }
}
