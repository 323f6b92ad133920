//! Dynamic and fixed-size arrays.
//!
//! A dynamic array instance is an [`ArrayBuffer`]: all-zero memory is a valid
//! empty array, so only destruction needs to run. A native array is `N`
//! elements laid out inline with the element stride and cannot change length.

use std::alloc::{self, Layout};
use std::any::Any;
use std::ptr;
use std::sync::Arc;

use serde_json::Value;

use super::{MetaType, Type, TypeInfo, TypeRef, TypeTraits, stride_of};
use crate::error::StreamError;
use crate::storage::DataBlob;
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter, value_from_text, value_to_text};

/// Storage of one dynamic array value.
#[repr(C)]
#[derive(Debug)]
pub struct ArrayBuffer {
    ptr: *mut u8,
    len: usize,
    capacity: usize,
}

impl ArrayBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Whether the element count is part of the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Dynamic,
    Native(usize),
}

/// An array of one element type.
#[derive(Debug)]
pub struct ArrayType {
    info: TypeInfo,
    kind: ArrayKind,
    element: TypeRef,
    stride: usize,
}

impl ArrayType {
    /// `array<T>`
    pub fn new_dynamic(element: TypeRef) -> Self {
        let name = format!("array<{}>", element.name());
        let mut traits = TypeTraits::ZERO_INIT | TypeTraits::NEEDS_DESTRUCTOR;
        if element.traits().contains(TypeTraits::HASHABLE) {
            traits |= TypeTraits::HASHABLE;
        }
        Self {
            info: TypeInfo::native::<ArrayBuffer>(&name, MetaType::Array, traits),
            kind: ArrayKind::Dynamic,
            stride: stride_of(element.as_ref()),
            element,
        }
    }

    /// `[N]T`. Returns `None` when `N` elements do not fit in one allocation.
    pub fn new_native(element: TypeRef, count: usize) -> Option<Self> {
        let stride = stride_of(element.as_ref());
        let size = stride.checked_mul(count)?;
        Layout::from_size_align(size, element.align().max(1)).ok()?;
        let name = format!("[{count}]{}", element.name());
        let traits = element.traits() - TypeTraits::SCRIPTED;
        Some(Self {
            info: TypeInfo::new(&name, MetaType::Array, size, element.align(), traits),
            kind: ArrayKind::Native(count),
            stride,
            element,
        })
    }

    #[inline]
    pub fn kind(&self) -> ArrayKind {
        self.kind
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.kind == ArrayKind::Dynamic
    }

    /// The element type.
    #[inline]
    pub fn element(&self) -> &TypeRef {
        &self.element
    }

    /// Distance between elements in bytes.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of elements.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn len(&self, data: *const u8) -> usize {
        match self.kind {
            ArrayKind::Dynamic => unsafe { (*data.cast::<ArrayBuffer>()).len },
            ArrayKind::Native(count) => count,
        }
    }

    /// Allocated element slots.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn capacity(&self, data: *const u8) -> usize {
        match self.kind {
            ArrayKind::Dynamic => unsafe { (*data.cast::<ArrayBuffer>()).capacity },
            ArrayKind::Native(count) => count,
        }
    }

    unsafe fn base_ptr(&self, data: *const u8) -> *mut u8 {
        match self.kind {
            ArrayKind::Dynamic => unsafe { (*data.cast::<ArrayBuffer>()).ptr },
            ArrayKind::Native(_) => data.cast_mut(),
        }
    }

    /// Address of element `index`, or `None` when out of range.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn element_ptr(&self, data: *const u8, index: usize) -> Option<*const u8> {
        unsafe { self.element_ptr_mut(data.cast_mut(), index) }.map(<*mut u8>::cast_const)
    }

    /// Mutable address of element `index`, or `None` when out of range.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn element_ptr_mut(&self, data: *mut u8, index: usize) -> Option<*mut u8> {
        if index >= unsafe { self.len(data) } {
            return None;
        }
        Some(unsafe { self.base_ptr(data).add(index * self.stride) })
    }

    fn buffer_layout(&self, capacity: usize) -> Option<Layout> {
        let size = self.stride.checked_mul(capacity)?;
        if size == 0 {
            return None;
        }
        Layout::from_size_align(size, self.element.align()).ok()
    }

    unsafe fn construct_element(&self, slot: *mut u8) {
        unsafe {
            ptr::write_bytes(slot, 0, self.stride);
            if self.element.traits().contains(TypeTraits::NEEDS_CONSTRUCTOR) {
                self.element.construct(slot);
            }
        }
    }

    unsafe fn destruct_element(&self, slot: *mut u8) {
        if self.element.traits().contains(TypeTraits::NEEDS_DESTRUCTOR) {
            unsafe { self.element.destruct(slot) };
        }
    }

    /// Grow the buffer to hold `wanted` elements. Fails when that many
    /// elements do not fit in one allocation.
    unsafe fn reserve(&self, buffer: &mut ArrayBuffer, wanted: usize) -> bool {
        if wanted <= buffer.capacity {
            return true;
        }
        let capacity = wanted.max(buffer.capacity.saturating_mul(2)).max(4);
        if self.stride == 0 {
            // zero-sized elements never touch memory
            buffer.ptr = ptr::without_provenance_mut(self.element.align());
            buffer.capacity = capacity;
            return true;
        }
        let Some(layout) = self.buffer_layout(capacity) else {
            return false;
        };
        // SAFETY: layout has a non-zero size.
        let fresh = unsafe { alloc::alloc(layout) };
        if fresh.is_null() {
            alloc::handle_alloc_error(layout);
        }
        if let Some(old) = self.buffer_layout(buffer.capacity) {
            unsafe {
                ptr::copy_nonoverlapping(buffer.ptr, fresh, buffer.len * self.stride);
                alloc::dealloc(buffer.ptr, old);
            }
        }
        buffer.ptr = fresh;
        buffer.capacity = capacity;
        true
    }

    /// Change the element count, constructing or destructing the difference.
    /// Native arrays cannot be resized, and no array grows past what one
    /// allocation can hold.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn resize(&self, data: *mut u8, len: usize) -> bool {
        if !self.is_dynamic() {
            return false;
        }
        let buffer = unsafe { &mut *data.cast::<ArrayBuffer>() };
        if len < buffer.len {
            for i in (len..buffer.len).rev() {
                unsafe { self.destruct_element(buffer.ptr.add(i * self.stride)) };
            }
        } else {
            if !unsafe { self.reserve(buffer, len) } {
                return false;
            }
            for i in buffer.len..len {
                unsafe { self.construct_element(buffer.ptr.add(i * self.stride)) };
            }
        }
        buffer.len = len;
        true
    }

    /// Insert a default element at `index` and return its address.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn insert(&self, data: *mut u8, index: usize) -> Option<*mut u8> {
        if !self.is_dynamic() {
            return None;
        }
        let buffer = unsafe { &mut *data.cast::<ArrayBuffer>() };
        if index > buffer.len {
            return None;
        }
        unsafe {
            if !self.reserve(buffer, buffer.len + 1) {
                return None;
            }
            let slot = buffer.ptr.add(index * self.stride);
            ptr::copy(slot, slot.add(self.stride), (buffer.len - index) * self.stride);
            self.construct_element(slot);
            buffer.len += 1;
            Some(slot)
        }
    }

    /// Append a default element and return its address.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn push(&self, data: *mut u8) -> Option<*mut u8> {
        let len = unsafe { self.len(data) };
        unsafe { self.insert(data, len) }
    }

    /// Remove the element at `index`.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn remove(&self, data: *mut u8, index: usize) -> bool {
        if !self.is_dynamic() {
            return false;
        }
        let buffer = unsafe { &mut *data.cast::<ArrayBuffer>() };
        if index >= buffer.len {
            return false;
        }
        unsafe {
            let slot = buffer.ptr.add(index * self.stride);
            self.destruct_element(slot);
            ptr::copy(slot.add(self.stride), slot, (buffer.len - index - 1) * self.stride);
        }
        buffer.len -= 1;
        true
    }

    /// Remove every element.
    ///
    /// # Safety
    /// `data` must hold a value of this array type.
    pub unsafe fn clear(&self, data: *mut u8) -> bool {
        unsafe { self.resize(data, 0) }
    }

    /// Set the length from a stream, for native arrays only checking it.
    unsafe fn prepare_read(&self, data: *mut u8, len: usize) -> usize {
        match self.kind {
            ArrayKind::Dynamic => {
                if unsafe { self.resize(data, len) } {
                    len
                } else {
                    0
                }
            }
            ArrayKind::Native(count) => len.min(count),
        }
    }
}

impl Type for ArrayType {
    fn info(&self) -> &TypeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    unsafe fn construct(&self, data: *mut u8) {
        if let ArrayKind::Native(count) = self.kind {
            for i in 0..count {
                unsafe { self.construct_element(data.add(i * self.stride)) };
            }
        }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        match self.kind {
            ArrayKind::Native(count) => {
                for i in (0..count).rev() {
                    unsafe { self.destruct_element(data.add(i * self.stride)) };
                }
            }
            ArrayKind::Dynamic => unsafe {
                self.resize(data, 0);
                let buffer = &mut *data.cast::<ArrayBuffer>();
                if let Some(layout) = self.buffer_layout(buffer.capacity) {
                    alloc::dealloc(buffer.ptr, layout);
                }
                ptr::write(data.cast::<ArrayBuffer>(), ArrayBuffer {
                    ptr: ptr::null_mut(),
                    len: 0,
                    capacity: 0,
                });
            },
        }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        if ptr::eq(dst.cast_const(), src) {
            return;
        }
        let len = unsafe { self.len(src) };
        unsafe { self.resize(dst, len) };
        let src_base = unsafe { self.base_ptr(src) };
        let dst_base = unsafe { self.base_ptr(dst) };
        for i in 0..len {
            let offset = i * self.stride;
            unsafe { self.element.copy(dst_base.add(offset), src_base.add(offset)) };
        }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        let len = unsafe { self.len(a) };
        if len != unsafe { self.len(b) } {
            return false;
        }
        let (a, b) = unsafe { (self.base_ptr(a), self.base_ptr(b)) };
        (0..len).all(|i| {
            let offset = i * self.stride;
            unsafe { self.element.compare(a.add(offset), b.add(offset)) }
        })
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        let len = unsafe { self.len(data) };
        let base = unsafe { self.base_ptr(data) };
        (0..len).fold(len as u64, |hash, i| {
            let element = unsafe { self.element.hash_value(base.add(i * self.stride)) };
            hash.rotate_left(5) ^ element
        })
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        if let Ok(node) = unsafe { value_to_text(self, data) } {
            out.push_str(&node.to_string());
        }
    }

    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        match serde_json::from_str::<Value>(text) {
            Ok(node) => unsafe { value_from_text(self, &node, data, None) }.is_ok(),
            Err(_) => false,
        }
    }

    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        let len = unsafe { self.len(data) };
        let base = unsafe { self.base_ptr(data) };
        writer.write_varint(len as u64);
        for i in 0..len {
            unsafe { self.element.write_binary(writer, base.add(i * self.stride), None)? };
        }
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let saved = reader.read_len()?;
        let len = unsafe { self.prepare_read(data, saved) };
        let base = unsafe { self.base_ptr(data) };
        for i in 0..len {
            unsafe { self.element.read_binary(reader, base.add(i * self.stride))? };
        }
        if saved > len {
            let mut scratch = DataBlob::new(self.element.clone());
            for _ in len..saved {
                unsafe { self.element.read_binary(reader, scratch.as_mut_ptr())? };
            }
        }
        Ok(())
    }

    unsafe fn write_text(
        &self,
        writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        let len = unsafe { self.len(data) };
        let base = unsafe { self.base_ptr(data) };
        let mut items = Vec::with_capacity(len);
        for i in 0..len {
            items.push(unsafe { self.element.write_text(writer, base.add(i * self.stride), None)? });
        }
        Ok(Value::Array(items))
    }

    unsafe fn read_text(
        &self,
        reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let Value::Array(items) = node else {
            return Err(StreamError::MalformedText(format!(
                "expected array for '{}', found {node}",
                self.info.name
            )));
        };
        let len = unsafe { self.prepare_read(data, items.len()) };
        let base = unsafe { self.base_ptr(data) };
        for (i, item) in items.iter().take(len).enumerate() {
            unsafe { self.element.read_text(reader, item, base.add(i * self.stride))? };
        }
        Ok(())
    }

    fn as_array(&self) -> Option<&ArrayType> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SimpleType, print_to_string};

    fn ints() -> Arc<ArrayType> {
        Arc::new(ArrayType::new_dynamic(Arc::new(SimpleType::<i32>::new())))
    }

    unsafe fn get(array: &ArrayType, data: *const u8, i: usize) -> i32 {
        unsafe { *array.element_ptr(data, i).unwrap().cast::<i32>() }
    }

    #[test]
    fn names_follow_compound_syntax() {
        let element: TypeRef = Arc::new(SimpleType::<f32>::new());
        assert_eq!(ArrayType::new_dynamic(element.clone()).name().as_str(), "array<float>");
        let native = ArrayType::new_native(element, 3).unwrap();
        assert_eq!(native.name().as_str(), "[3]float");
        assert_eq!(native.size(), 12);
    }

    #[test]
    fn insert_and_remove_keep_order() {
        let array = ints();
        let ty: TypeRef = array.clone();
        let mut blob = DataBlob::new(ty);
        let data = blob.as_mut_ptr();
        unsafe {
            for v in [1, 3] {
                *array.push(data).unwrap().cast::<i32>() = v;
            }
            *array.insert(data, 1).unwrap().cast::<i32>() = 2;
            assert_eq!(array.len(data), 3);
            assert_eq!([get(&array, data, 0), get(&array, data, 1), get(&array, data, 2)], [1, 2, 3]);
            assert!(array.remove(data, 0));
            assert_eq!(get(&array, data, 0), 2);
            assert!(!array.remove(data, 5));
            assert!(array.insert(data, 9).is_none());
        }
    }

    #[test]
    fn resize_constructs_managed_elements() {
        let strings = Arc::new(ArrayType::new_dynamic(Arc::new(SimpleType::<String>::new())));
        let ty: TypeRef = strings.clone();
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            assert!(strings.resize(blob.as_mut_ptr(), 20));
            let last = strings.element_ptr_mut(blob.as_mut_ptr(), 19).unwrap();
            (*last.cast::<String>()).push_str("tail");
            let copy = blob.clone();
            assert_eq!(copy, blob);
            assert!(strings.resize(blob.as_mut_ptr(), 2));
            assert_ne!(copy, blob);
        }
    }

    #[test]
    fn native_arrays_cannot_resize() {
        let array = ArrayType::new_native(Arc::new(SimpleType::<u8>::new()), 4).unwrap();
        let ty: TypeRef = Arc::new(array);
        let mut blob = DataBlob::new(ty.clone());
        let array = ty.as_array().unwrap();
        unsafe {
            assert!(!array.resize(blob.as_mut_ptr(), 8));
            assert!(array.push(blob.as_mut_ptr()).is_none());
            assert_eq!(array.len(blob.as_ptr()), 4);
            assert!(array.element_ptr(blob.as_ptr(), 4).is_none());
        }
    }

    #[test]
    fn oversized_arrays_are_refused() {
        let element: TypeRef = Arc::new(SimpleType::<i32>::new());
        assert!(ArrayType::new_native(element.clone(), usize::MAX / 2).is_none());
        assert!(ArrayType::new_native(element.clone(), isize::MAX as usize / 4 + 1).is_none());
        assert!(ArrayType::new_native(element.clone(), 0).is_some());

        let array = ints();
        let ty: TypeRef = array.clone();
        let mut blob = DataBlob::new(ty);
        unsafe {
            assert!(array.resize(blob.as_mut_ptr(), 2));
            assert!(!array.resize(blob.as_mut_ptr(), usize::MAX / 2));
            assert_eq!(array.len(blob.as_ptr()), 2);
        }
    }

    #[test]
    fn print_and_parse_as_list() {
        let array = ints();
        let ty: TypeRef = array.clone();
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            assert!(ty.parse("[4, 5, 6]", blob.as_mut_ptr()));
            assert_eq!(array.len(blob.as_ptr()), 3);
            assert_eq!(print_to_string(ty.as_ref(), blob.as_ptr()), "[4,5,6]");
            assert!(!ty.parse("{}", blob.as_mut_ptr()));
        }
    }
}
