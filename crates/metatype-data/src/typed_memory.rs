//! Uniform access to typed memory.
//!
//! A [`TypedMemory`] is a non-owning `(type, pointer, read-only)` view. It
//! classifies itself from the type kind and offers one API for reading,
//! writing, iterating and formatting any value:
//!
//! | Kind | Classification |
//! |------|----------------|
//! | arrays | [`MemoryKind::Array`] |
//! | classes, handles, variant tables | [`MemoryKind::Dictionary`] |
//! | class and resource references | [`MemoryKind::Pointer`] |
//! | everything else | [`MemoryKind::Value`] |
//!
//! Views follow the borrow rules of the memory they look at. Navigating through
//! `&self` ([`TypedMemory::member`], [`TypedMemory::element`]) yields read-only
//! children; the `_mut` variants borrow the parent mutably. Anything that can
//! move or free memory (array edits, table inserts, writes) takes `&mut self`,
//! so no child view can outlive the storage it points into:
//!
//! ```compile_fail
//! use metatype_core::DataBlob;
//! use metatype_data::TypedMemory;
//! use metatype_registry::TypeRegistry;
//!
//! let registry = TypeRegistry::with_builtins();
//! let mut list = DataBlob::new(registry.find("array<int32>").unwrap());
//! let mut view = TypedMemory::of_blob(&mut list);
//! let first = view.push().unwrap();
//! view.push().unwrap();
//! first.format();
//! ```
//!
//! Objects behind handles are shared, so views reached through a handle are
//! read-only and keep the object alive. [`TypedMemory::of_object_mut`] writes
//! into an object when the caller can vouch for exclusive access.

use std::fmt;
use std::marker::PhantomData;

use ustr::Ustr;

use metatype_core::{
    ArrayType, DataBlob, MetaType, ObjectPtr, Property, Type, TypeRef, TypeResolver, convert,
    print_to_string,
};

use crate::path::{PathSegment, parse_path};
use crate::result::DataViewResult;
use crate::variant::{Variant, native_blob, read_converted};
use crate::variant_table::{VariantTable, VariantTableType};

/// How a [`TypedMemory`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Indexed elements.
    Array,
    /// Named members.
    Dictionary,
    /// A single value.
    Value,
    /// A reference to something outside the value.
    Pointer,
}

/// Key of a child of an array or dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKey {
    Index(usize),
    Name(Ustr),
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildKey::Index(i) => write!(f, "[{i}]"),
            ChildKey::Name(name) => f.write_str(name),
        }
    }
}

/// Where a child lives, before it is wrapped in a view.
struct Slot {
    ty: TypeRef,
    data: *mut u8,
    read_only: bool,
    owner: Option<ObjectPtr>,
}

/// A typed view over memory owned elsewhere.
pub struct TypedMemory<'a> {
    ty: TypeRef,
    data: *mut u8,
    read_only: bool,
    /// Strong handle to the object the memory lives in, if any.
    owner: Option<ObjectPtr>,
    _marker: PhantomData<&'a mut u8>,
}

impl<'a> TypedMemory<'a> {
    /// View the value at `data`.
    ///
    /// # Safety
    /// `data` must hold a constructed value of `ty` for `'a`. When `read_only`
    /// is false nothing else may access the value while the view is used.
    pub unsafe fn new(ty: TypeRef, data: *mut u8, read_only: bool) -> Self {
        Self {
            ty,
            data,
            read_only,
            owner: None,
            _marker: PhantomData,
        }
    }

    /// Writable view of a blob.
    pub fn of_blob(blob: &'a mut DataBlob) -> Self {
        let ty = blob.ty().clone();
        // SAFETY: the blob holds a constructed value of its type and is borrowed
        // mutably for 'a.
        unsafe { Self::new(ty, blob.as_mut_ptr(), false) }
    }

    /// Read-only view of a blob.
    pub fn of_blob_ref(blob: &'a DataBlob) -> Self {
        let ty = blob.ty().clone();
        // SAFETY: the view is read-only and the blob is borrowed for 'a.
        unsafe { Self::new(ty, blob.as_ptr().cast_mut(), true) }
    }

    /// Writable view of a variant's value. Empty variants have none.
    pub fn of_variant(variant: &'a mut Variant) -> Option<Self> {
        let ty = variant.ty()?.clone();
        let data = variant.data_mut()?;
        // SAFETY: the variant holds a constructed value of `ty` and is borrowed
        // mutably for 'a.
        Some(unsafe { Self::new(ty, data, false) })
    }

    /// Read-only view of an object's storage. Null handles have none.
    pub fn of_object(object: &'a ObjectPtr) -> Option<Self> {
        Self::object_view(object, true)
    }

    /// Writable view of an object's storage. Null handles have none.
    ///
    /// # Safety
    /// No other view of the object, and no other code touching its storage, may
    /// be in use while the returned view or any of its children is alive.
    pub unsafe fn of_object_mut(object: &'a ObjectPtr) -> Option<Self> {
        Self::object_view(object, false)
    }

    fn object_view(object: &ObjectPtr, read_only: bool) -> Option<Self> {
        let target = object.get()?;
        let ty: TypeRef = target.class().clone();
        Some(Self {
            ty,
            data: target.data_mut(),
            read_only,
            owner: Some(object.clone()),
            _marker: PhantomData,
        })
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn data(&self) -> *const u8 {
        self.data
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The same memory without write access.
    pub fn as_read_only(&self) -> TypedMemory<'_> {
        self.wrap(self.slot(), true)
    }

    /// A shorter-lived view of the same memory.
    pub fn reborrow(&mut self) -> TypedMemory<'_> {
        self.wrap(self.slot(), false)
    }

    fn slot(&self) -> Slot {
        Slot {
            ty: self.ty.clone(),
            data: self.data,
            read_only: self.read_only,
            owner: self.owner.clone(),
        }
    }

    /// Wrap a slot found under this view. Write access never exceeds ours.
    fn wrap<'b>(&self, slot: Slot, read_only: bool) -> TypedMemory<'b> {
        TypedMemory {
            ty: slot.ty,
            data: slot.data,
            read_only: self.read_only || slot.read_only || read_only,
            owner: slot.owner,
            _marker: PhantomData,
        }
    }

    fn sub_slot(&self, ty: TypeRef, data: *mut u8, read_only: bool) -> Slot {
        Slot {
            ty,
            data,
            read_only: self.read_only || read_only,
            owner: self.owner.clone(),
        }
    }

    pub fn kind(&self) -> MemoryKind {
        match self.ty.meta_type() {
            MetaType::Array => MemoryKind::Array,
            MetaType::Class | MetaType::StrongHandle | MetaType::WeakHandle => {
                MemoryKind::Dictionary
            }
            MetaType::ClassRef | MetaType::ResourceRef => MemoryKind::Pointer,
            _ if VariantTableType::is_table(self.ty.as_ref()) => MemoryKind::Dictionary,
            _ => MemoryKind::Value,
        }
    }

    fn array(&self) -> Result<&ArrayType, DataViewResult> {
        self.ty.as_array().ok_or(DataViewResult::IllegalAccess)
    }

    fn table(&self) -> Option<&VariantTable> {
        // SAFETY: the type says the memory is a variant table.
        VariantTableType::is_table(self.ty.as_ref())
            .then(|| unsafe { &*self.data.cast::<VariantTable>() })
    }

    /// The object behind a handle, as a read-only view that keeps it alive.
    fn target(&self) -> Result<Option<TypedMemory<'_>>, DataViewResult> {
        let Some(handle) = self.ty.as_handle() else {
            return Ok(None);
        };
        // SAFETY: the view holds a handle value.
        let object = unsafe { handle.get(self.data) };
        match TypedMemory::object_view(&object, true) {
            Some(view) => Ok(Some(view)),
            None => Err(DataViewResult::NullTarget),
        }
    }

    // ==========================================================================
    // Arrays and dictionaries
    // ==========================================================================

    /// Element or member count. Values have none; null handles have none.
    pub fn len(&self) -> usize {
        if let Some(array) = self.ty.as_array() {
            // SAFETY: the view holds an array value.
            return unsafe { array.len(self.data) };
        }
        if let Some(class) = self.ty.as_class() {
            return class.members().properties().len();
        }
        if let Some(table) = self.table() {
            return table.len();
        }
        match self.target() {
            Ok(Some(target)) => target.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element_slot(&self, index: usize) -> Result<Slot, DataViewResult> {
        let array = self.array()?;
        // SAFETY: the view holds an array value.
        let data = unsafe { array.element_ptr_mut(self.data, index) }
            .ok_or(DataViewResult::IndexOutOfRange)?;
        Ok(self.sub_slot(array.element().clone(), data, false))
    }

    fn member_slot(&self, name: &str) -> Result<Slot, DataViewResult> {
        if let Some(class) = self.ty.as_class() {
            let property = class
                .find_property(name)
                .ok_or(DataViewResult::UnknownMember)?;
            return Ok(self.property_slot(&property));
        }
        if let Some(table) = self.table() {
            let entry = table.find(name).ok_or(DataViewResult::UnknownMember)?;
            return Ok(self.sub_slot(entry.ty.clone(), entry.data, false));
        }
        match self.target()? {
            Some(target) => target.member_slot(name),
            None => Err(DataViewResult::IllegalAccess),
        }
    }

    fn property_slot(&self, property: &Property) -> Slot {
        self.sub_slot(
            property.ty().clone(),
            property.offset_ptr_mut(self.data),
            property.is_read_only(),
        )
    }

    fn path_slot(&self, path: &str) -> Result<Slot, DataViewResult> {
        let segments = parse_path(path).ok_or(DataViewResult::InvalidValue)?;
        let mut slot = self.slot();
        for segment in segments {
            let step = self.wrap(slot, false);
            slot = match segment {
                PathSegment::Member(name) => step.member_slot(name)?,
                PathSegment::Index(index) => step.element_slot(index)?,
            };
        }
        Ok(slot)
    }

    /// Array element by index, read-only.
    pub fn element(&self, index: usize) -> Result<TypedMemory<'_>, DataViewResult> {
        Ok(self.wrap(self.element_slot(index)?, true))
    }

    /// Array element by index.
    pub fn element_mut(&mut self, index: usize) -> Result<TypedMemory<'_>, DataViewResult> {
        Ok(self.wrap(self.element_slot(index)?, false))
    }

    /// Dictionary member by name, read-only.
    pub fn member(&self, name: &str) -> Result<TypedMemory<'_>, DataViewResult> {
        Ok(self.wrap(self.member_slot(name)?, true))
    }

    /// Dictionary member by name. Members of a handle's target stay read-only.
    pub fn member_mut(&mut self, name: &str) -> Result<TypedMemory<'_>, DataViewResult> {
        Ok(self.wrap(self.member_slot(name)?, false))
    }

    /// Follow a data path such as `items[2].x`, read-only.
    pub fn resolve(&self, path: &str) -> Result<TypedMemory<'_>, DataViewResult> {
        Ok(self.wrap(self.path_slot(path)?, true))
    }

    /// Follow a data path such as `items[2].x`.
    pub fn resolve_mut(&mut self, path: &str) -> Result<TypedMemory<'_>, DataViewResult> {
        Ok(self.wrap(self.path_slot(path)?, false))
    }

    /// Names of the dictionary members, in declaration or insertion order.
    pub fn keys(&self) -> Vec<Ustr> {
        if let Some(class) = self.ty.as_class() {
            return class.members().properties().iter().map(|p| p.name()).collect();
        }
        if let Some(table) = self.table() {
            return table.keys().collect();
        }
        match self.target() {
            Ok(Some(target)) => target.keys(),
            _ => Vec::new(),
        }
    }

    /// Slots of every element or member. They never overlap.
    fn child_slots(&self) -> Vec<(ChildKey, Slot)> {
        match self.kind() {
            MemoryKind::Array => (0..self.len())
                .filter_map(|i| self.element_slot(i).ok().map(|s| (ChildKey::Index(i), s)))
                .collect(),
            MemoryKind::Dictionary => {
                if let Some(class) = self.ty.as_class() {
                    return class
                        .members()
                        .properties()
                        .iter()
                        .map(|p| (ChildKey::Name(p.name()), self.property_slot(p)))
                        .collect();
                }
                if let Some(table) = self.table() {
                    return table
                        .iter()
                        .map(|e| (ChildKey::Name(e.key), self.sub_slot(e.ty.clone(), e.data, false)))
                        .collect();
                }
                match self.target() {
                    Ok(Some(target)) => target.child_slots(),
                    _ => Vec::new(),
                }
            }
            MemoryKind::Value | MemoryKind::Pointer => Vec::new(),
        }
    }

    /// Every element or member with its key, read-only.
    pub fn children(&self) -> Vec<(ChildKey, TypedMemory<'_>)> {
        self.child_slots()
            .into_iter()
            .map(|(key, slot)| (key, self.wrap(slot, true)))
            .collect()
    }

    /// Every element or member with its key.
    pub fn children_mut(&mut self) -> Vec<(ChildKey, TypedMemory<'_>)> {
        self.child_slots()
            .into_iter()
            .map(|(key, slot)| (key, self.wrap(slot, false)))
            .collect()
    }

    // ==========================================================================
    // Array edits
    // ==========================================================================

    fn writable_array(&self) -> Result<&ArrayType, DataViewResult> {
        let array = self.array()?;
        if self.read_only {
            return Err(DataViewResult::ReadOnly);
        }
        Ok(array)
    }

    /// Resize a dynamic array. Fixed-size arrays refuse.
    pub fn resize(&mut self, len: usize) -> DataViewResult {
        let result = self.writable_array().and_then(|array| {
            // SAFETY: the view holds an array value and may write.
            if unsafe { array.resize(self.data, len) } {
                Ok(())
            } else {
                Err(DataViewResult::IllegalAccess)
            }
        });
        result.into()
    }

    /// Append a default element and view it.
    pub fn push(&mut self) -> Result<TypedMemory<'_>, DataViewResult> {
        let array = self.writable_array()?;
        // SAFETY: the view holds an array value and may write.
        let data = unsafe { array.push(self.data) }.ok_or(DataViewResult::IllegalAccess)?;
        let slot = self.sub_slot(array.element().clone(), data, false);
        Ok(self.wrap(slot, false))
    }

    /// Insert a default element at `index` and view it.
    pub fn insert(&mut self, index: usize) -> Result<TypedMemory<'_>, DataViewResult> {
        let array = self.writable_array()?;
        if !array.is_dynamic() {
            return Err(DataViewResult::IllegalAccess);
        }
        // SAFETY: the view holds an array value and may write.
        if index > unsafe { array.len(self.data) } {
            return Err(DataViewResult::IndexOutOfRange);
        }
        let data =
            unsafe { array.insert(self.data, index) }.ok_or(DataViewResult::IllegalAccess)?;
        let slot = self.sub_slot(array.element().clone(), data, false);
        Ok(self.wrap(slot, false))
    }

    pub fn remove(&mut self, index: usize) -> DataViewResult {
        let result = self.writable_array().and_then(|array| {
            if !array.is_dynamic() {
                return Err(DataViewResult::IllegalAccess);
            }
            // SAFETY: the view holds an array value and may write.
            if index >= unsafe { array.len(self.data) } {
                return Err(DataViewResult::IndexOutOfRange);
            }
            if unsafe { array.remove(self.data, index) } {
                Ok(())
            } else {
                Err(DataViewResult::IllegalAccess)
            }
        });
        result.into()
    }

    /// Add a variant table entry of type `ty`, or view the existing one.
    pub fn insert_member(
        &mut self,
        name: &str,
        ty: &TypeRef,
    ) -> Result<TypedMemory<'_>, DataViewResult> {
        if !VariantTableType::is_table(self.ty.as_ref()) {
            return Err(DataViewResult::IllegalAccess);
        }
        if self.read_only {
            return Err(DataViewResult::ReadOnly);
        }
        // SAFETY: the memory is a variant table and the view may write.
        let table = unsafe { &mut *self.data.cast::<VariantTable>() };
        let data = table.allocate(name, ty);
        let slot = self.sub_slot(ty.clone(), data, false);
        Ok(self.wrap(slot, false))
    }

    // ==========================================================================
    // Values
    // ==========================================================================

    /// Read the value as `T`, converting when the types differ.
    pub fn get<T: Clone + 'static>(&self, resolver: &dyn TypeResolver) -> Result<T, DataViewResult> {
        // SAFETY: the view holds a constructed value of its type.
        unsafe { read_converted(resolver, self.ty.as_ref(), self.data) }
            .ok_or(DataViewResult::TypeConversionFailure)
    }

    /// Copy the value into a variant of its own type.
    pub fn to_variant(&self) -> Variant {
        // SAFETY: the view holds a constructed value of its type.
        unsafe { Variant::from_raw(self.ty.clone(), self.data) }
    }

    /// Write a native value, converting it into the viewed type.
    pub fn set<T: 'static>(&mut self, resolver: &dyn TypeResolver, value: T) -> DataViewResult {
        if self.read_only {
            return DataViewResult::ReadOnly;
        }
        match native_blob(resolver, value) {
            // SAFETY: the blob holds a constructed value of its type.
            Some(blob) => unsafe { self.set_raw(blob.as_ptr(), blob.ty().as_ref()) },
            None => DataViewResult::TypeConversionFailure,
        }
    }

    /// Write another view's value, converting it into the viewed type.
    pub fn set_from(&mut self, source: &TypedMemory<'_>) -> DataViewResult {
        if self.read_only {
            return DataViewResult::ReadOnly;
        }
        // Copy out first; the source may live inside the value being replaced.
        let value = source.to_variant();
        self.set_variant(&value)
    }

    /// Write a variant's value, converting it into the viewed type.
    pub fn set_variant(&mut self, value: &Variant) -> DataViewResult {
        match value.as_blob() {
            // SAFETY: the blob holds a constructed value of its type.
            Some(blob) => unsafe { self.set_raw(blob.as_ptr(), blob.ty().as_ref()) },
            None => DataViewResult::InvalidValue,
        }
    }

    /// # Safety
    /// `src` must hold a constructed value of `src_ty` outside this view.
    unsafe fn set_raw(&mut self, src: *const u8, src_ty: &dyn Type) -> DataViewResult {
        if self.read_only {
            return DataViewResult::ReadOnly;
        }
        if unsafe { convert(src, src_ty, self.data, self.ty.as_ref()) } {
            DataViewResult::Ok
        } else {
            DataViewResult::TypeConversionFailure
        }
    }

    /// Parse `text` into the value. The value is untouched when parsing fails.
    pub fn set_text(&mut self, text: &str) -> DataViewResult {
        if self.read_only {
            return DataViewResult::ReadOnly;
        }
        let Some(parsed) = Variant::parse(self.ty.clone(), text) else {
            return DataViewResult::InvalidValue;
        };
        self.set_variant(&parsed)
    }

    /// Render the value with its type's printer.
    pub fn format(&self) -> String {
        // SAFETY: the view holds a constructed value of its type.
        unsafe { print_to_string(self.ty.as_ref(), self.data) }
    }

    /// Write a value at a data path.
    pub fn set_path_text(&mut self, path: &str, text: &str) -> DataViewResult {
        match self.resolve_mut(path) {
            Ok(mut view) => view.set_text(text),
            Err(code) => code,
        }
    }
}

impl fmt::Debug for TypedMemory<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedMemory")
            .field("ty", &self.ty.name())
            .field("kind", &self.kind())
            .field("read_only", &self.read_only)
            .field("value", &self.format())
            .finish()
    }
}
