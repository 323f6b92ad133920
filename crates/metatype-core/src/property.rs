//! Named, typed fields of a class.

use std::fmt;

use bitflags::bitflags;
use ustr::Ustr;

use crate::storage::{DataBlob, FrozenBlob};
use crate::type_hash::{NativeTypeHash, TypeHash};
use crate::types::{Type, TypeRef};

bitflags! {
    /// Per-property behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        /// Never written by either codec.
        const TRANSIENT = 1 << 0;
        /// The value is owned inline by the instance.
        const INLINED = 1 << 1;
        /// Not writable through typed accessors.
        const READ_ONLY = 1 << 2;
        /// May be overridden per instance by tools.
        const OVERRIDABLE = 1 << 3;
    }
}

/// A field at a fixed byte offset inside its owning class.
pub struct Property {
    name: Ustr,
    ty: TypeRef,
    offset: usize,
    flags: PropertyFlags,
    owner: Ustr,
    hash: TypeHash,
    default: Option<FrozenBlob>,
}

impl Property {
    pub fn new(name: &str, ty: TypeRef, offset: usize) -> Self {
        Self {
            name: Ustr::from(name),
            ty,
            offset,
            flags: PropertyFlags::empty(),
            owner: Ustr::from(""),
            hash: TypeHash::EMPTY,
            default: None,
        }
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Value applied when a runtime-laid-out instance is constructed.
    ///
    /// Ignored unless `value` has the property's type.
    pub fn with_default(mut self, value: DataBlob) -> Self {
        if crate::types::same_type(value.ty().as_ref(), self.ty.as_ref()) {
            self.default = Some(value.freeze());
        }
        self
    }

    pub(crate) fn with_owner(mut self, owner: Ustr) -> Self {
        self.owner = owner;
        self.hash = TypeHash::from_property(TypeHash::from_name(&owner), &self.name);
        self
    }

    #[inline]
    pub fn name(&self) -> Ustr {
        self.name
    }

    #[inline]
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    /// Name of the declaring class.
    #[inline]
    pub fn owner(&self) -> Ustr {
        self.owner
    }

    #[inline]
    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    pub fn default_value(&self) -> Option<&FrozenBlob> {
        self.default.as_ref()
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.flags.contains(PropertyFlags::TRANSIENT)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PropertyFlags::READ_ONLY)
    }

    /// Address of this property inside the instance at `base`.
    #[inline]
    pub fn offset_ptr(&self, base: *const u8) -> *const u8 {
        base.wrapping_add(self.offset)
    }

    /// Mutable address of this property inside the instance at `base`.
    #[inline]
    pub fn offset_ptr_mut(&self, base: *mut u8) -> *mut u8 {
        base.wrapping_add(self.offset)
    }

    fn holds<T: 'static>(&self) -> bool {
        self.ty.info().native == Some(NativeTypeHash::of::<T>())
    }

    /// Borrow the property value as `T`, if the property's type is bound to `T`.
    ///
    /// # Safety
    /// `base` must point at a constructed instance of the owning class.
    pub unsafe fn value_ref<'a, T: 'static>(&self, base: *const u8) -> Option<&'a T> {
        if self.holds::<T>() {
            Some(unsafe { &*self.offset_ptr(base).cast::<T>() })
        } else {
            None
        }
    }

    /// Clone the property value out as `T`.
    ///
    /// # Safety
    /// `base` must point at a constructed instance of the owning class.
    pub unsafe fn get<T: Clone + 'static>(&self, base: *const u8) -> Option<T> {
        unsafe { self.value_ref::<T>(base).cloned() }
    }

    /// Store `value` into the property. Returns `false` when `T` is not the
    /// property's type.
    ///
    /// # Safety
    /// `base` must point at a constructed instance of the owning class.
    pub unsafe fn set<T: 'static>(&self, base: *mut u8, value: T) -> bool {
        if !self.holds::<T>() {
            return false;
        }
        unsafe { *self.offset_ptr_mut(base).cast::<T>() = value };
        true
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("type", &self.ty.name())
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .finish()
    }
}
