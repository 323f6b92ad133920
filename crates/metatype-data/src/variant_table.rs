//! A dynamic bag of named, typed values.
//!
//! # Storage Model
//!
//! - **Values**: bump allocated from pages owned by the table; a new page is
//!   twice the size of the previous one, so existing values never move
//! - **Entries**: a flat array of `(key, type, value pointer)` records
//! - **Buckets**: chain heads into the entry array, rehashed to twice the count
//!   when the number of entries per bucket exceeds the configured load factor
//!
//! Keys cannot be removed. Overwriting a key with a value of the same type keeps
//! its storage; a different type gets fresh storage.

use std::alloc::Layout;
use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use bumpalo::Bump;
use serde_json::{Map, Value};
use ustr::Ustr;

use metatype_core::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};
use metatype_core::{
    DataBlob, MetaType, StreamError, Type, TypeInfo, TypeRef, TypeResolver, TypeTraits,
    same_type,
};

use crate::variant::{Variant, native_blob, read_converted};

/// Sizing of a [`VariantTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantTableConfig {
    /// Bucket count of an empty table. Rounded up to a power of two.
    pub initial_buckets: usize,
    /// Entries per bucket before the bucket array doubles.
    pub max_load_factor: usize,
    /// Size of the first value page in bytes.
    pub initial_page_size: usize,
}

impl Default for VariantTableConfig {
    fn default() -> Self {
        Self {
            initial_buckets: 8,
            max_load_factor: 2,
            initial_page_size: 256,
        }
    }
}

struct Entry {
    key: Ustr,
    ty: TypeRef,
    data: NonNull<u8>,
    next: Option<u32>,
}

/// A borrowed entry of a [`VariantTable`].
#[derive(Clone, Copy)]
pub struct TableEntry<'a> {
    pub key: Ustr,
    pub ty: &'a TypeRef,
    pub data: *mut u8,
}

impl fmt::Debug for TableEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableEntry")
            .field("key", &self.key)
            .field("ty", &self.ty.name())
            .finish()
    }
}

/// Dictionary from interned keys to typed values with stable addresses.
pub struct VariantTable {
    config: VariantTableConfig,
    arena: Bump,
    entries: Vec<Entry>,
    buckets: Vec<Option<u32>>,
}

impl VariantTable {
    pub fn new() -> Self {
        Self::with_config(VariantTableConfig::default())
    }

    pub fn with_config(config: VariantTableConfig) -> Self {
        let config = VariantTableConfig {
            initial_buckets: config.initial_buckets.max(1).next_power_of_two(),
            max_load_factor: config.max_load_factor.max(1),
            initial_page_size: config.initial_page_size,
        };
        Self {
            arena: Bump::with_capacity(config.initial_page_size),
            entries: Vec::new(),
            buckets: vec![None; config.initial_buckets],
            config,
        }
    }

    pub fn config(&self) -> VariantTableConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bytes reserved by the value pages.
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }

    fn bucket_of(&self, key: Ustr) -> usize {
        // bucket count is a power of two
        (key.precomputed_hash() as usize) & (self.buckets.len() - 1)
    }

    fn position(&self, key: Ustr) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(key)];
        while let Some(index) = cursor {
            let entry = &self.entries[index as usize];
            if entry.key == key {
                return Some(index as usize);
            }
            cursor = entry.next;
        }
        None
    }

    fn entry_at(&self, index: usize) -> TableEntry<'_> {
        let entry = &self.entries[index];
        TableEntry {
            key: entry.key,
            ty: &entry.ty,
            data: entry.data.as_ptr(),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Look up a key. Lookups never intern: a key nobody has interned
    /// cannot be in any table.
    pub fn find(&self, key: &str) -> Option<TableEntry<'_>> {
        let key = Ustr::from_existing(key)?;
        self.position(key).map(|i| self.entry_at(i))
    }

    /// Entry by insertion index.
    pub fn entry(&self, index: usize) -> Option<TableEntry<'_>> {
        (index < self.entries.len()).then(|| self.entry_at(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = TableEntry<'_>> {
        (0..self.entries.len()).map(|i| self.entry_at(i))
    }

    pub fn keys(&self) -> impl Iterator<Item = Ustr> + '_ {
        self.entries.iter().map(|e| e.key)
    }

    /// Storage for `key` holding a value of `ty`, created default-constructed
    /// when missing.
    ///
    /// An existing value of another type is destroyed and replaced.
    pub fn allocate(&mut self, key: &str, ty: &TypeRef) -> *mut u8 {
        let key = Ustr::from(key);
        if let Some(index) = self.position(key) {
            if same_type(self.entries[index].ty.as_ref(), ty.as_ref()) {
                return self.entries[index].data.as_ptr();
            }
            let data = self.allocate_value(ty);
            let entry = &mut self.entries[index];
            // SAFETY: the entry holds a constructed value of its type.
            unsafe { destroy_value(&entry.ty, entry.data.as_ptr()) };
            entry.ty = ty.clone();
            entry.data = data;
            return data.as_ptr();
        }

        if self.entries.len() + 1 > self.buckets.len() * self.config.max_load_factor {
            self.rehash(self.buckets.len() * 2);
        }
        let data = self.allocate_value(ty);
        let index = self.entries.len() as u32;
        let bucket = self.bucket_of(key);
        self.entries.push(Entry {
            key,
            ty: ty.clone(),
            data,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = Some(index);
        data.as_ptr()
    }

    fn allocate_value(&self, ty: &TypeRef) -> NonNull<u8> {
        let align = ty.align().max(1).next_power_of_two();
        let layout = Layout::from_size_align(ty.size().max(1), align)
            .unwrap_or_else(|_| Layout::new::<u8>());
        let data = self.arena.alloc_layout(layout);
        // SAFETY: fresh arena memory of `layout.size()` bytes.
        unsafe {
            std::ptr::write_bytes(data.as_ptr(), 0, layout.size());
            if ty.traits().contains(TypeTraits::NEEDS_CONSTRUCTOR) {
                ty.construct(data.as_ptr());
            }
        }
        data
    }

    fn rehash(&mut self, buckets: usize) {
        tracing::trace!(entries = self.entries.len(), buckets, "rehashing variant table");
        self.buckets = vec![None; buckets];
        for index in 0..self.entries.len() {
            let bucket = self.bucket_of(self.entries[index].key);
            self.entries[index].next = self.buckets[bucket];
            self.buckets[bucket] = Some(index as u32);
        }
    }

    /// Store a copy of the value at `src` under `key`.
    ///
    /// # Safety
    /// `src` must hold a constructed value of `ty`.
    pub unsafe fn set_raw(&mut self, key: &str, ty: &TypeRef, src: *const u8) -> *mut u8 {
        let data = self.allocate(key, ty);
        unsafe { ty.copy(data, src) };
        data
    }

    /// Store a native value under `key`, typed by the type bound to `T`.
    pub fn set<T: 'static>(&mut self, resolver: &dyn TypeResolver, key: &str, value: T) -> bool {
        match native_blob(resolver, value) {
            Some(blob) => {
                // SAFETY: the blob holds a constructed value of its type.
                unsafe { self.set_raw(key, blob.ty(), blob.as_ptr()) };
                true
            }
            None => false,
        }
    }

    /// Store a variant's value under `key`. Empty variants are ignored.
    pub fn set_variant(&mut self, key: &str, value: &Variant) -> bool {
        match value.as_blob() {
            Some(blob) => {
                // SAFETY: the blob holds a constructed value of its type.
                unsafe { self.set_raw(key, blob.ty(), blob.as_ptr()) };
                true
            }
            None => false,
        }
    }

    /// Read the value under `key` as `T`, converting when the types differ.
    pub fn get<T: Clone + 'static>(&self, resolver: &dyn TypeResolver, key: &str) -> Option<T> {
        let entry = self.find(key)?;
        // SAFETY: the entry holds a constructed value of its type.
        unsafe { read_converted(resolver, entry.ty.as_ref(), entry.data) }
    }

    /// Copy the value under `key` into a variant.
    pub fn get_variant(&self, key: &str) -> Option<Variant> {
        let entry = self.find(key)?;
        // SAFETY: the entry holds a constructed value of its type.
        Some(unsafe { Variant::from_raw(entry.ty.clone(), entry.data) })
    }

    /// Destroy every value and release the pages.
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            // SAFETY: each entry holds a constructed value of its type.
            unsafe { destroy_value(&entry.ty, entry.data.as_ptr()) };
        }
        self.buckets.fill(None);
        self.arena.reset();
    }
}

/// # Safety
/// `data` must hold a constructed value of `ty`.
unsafe fn destroy_value(ty: &TypeRef, data: *mut u8) {
    if ty.traits().contains(TypeTraits::NEEDS_DESTRUCTOR) {
        unsafe { ty.destruct(data) };
    }
}

impl Default for VariantTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VariantTable {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Clone for VariantTable {
    fn clone(&self) -> Self {
        let mut table = Self::with_config(self.config);
        for entry in self.iter() {
            // SAFETY: the entry holds a constructed value of its type.
            unsafe { table.set_raw(&entry.key, entry.ty, entry.data) };
        }
        table
    }
}

impl PartialEq for VariantTable {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().all(|entry| match other.find(&entry.key) {
                Some(theirs) => {
                    same_type(entry.ty.as_ref(), theirs.ty.as_ref())
                        // SAFETY: both entries hold constructed values of the same type.
                        && unsafe { entry.ty.compare(entry.data, theirs.data) }
                }
                None => false,
            })
    }
}

impl fmt::Debug for VariantTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.iter() {
            // SAFETY: the entry holds a constructed value of its type.
            let text = unsafe { metatype_core::print_to_string(entry.ty.as_ref(), entry.data) };
            map.entry(&entry.key.as_str(), &text);
        }
        map.finish()
    }
}

// ==============================================================================
// Registered type
// ==============================================================================

/// The type of [`VariantTable`] values.
///
/// Binary form: a varint entry count, then per entry the key, the type name and
/// the value in a skip block. Text form: `{"key": {"type": name, "value": node}}`.
/// Entries whose type cannot be resolved are reported and skipped.
#[derive(Debug)]
pub struct VariantTableType {
    info: TypeInfo,
}

impl VariantTableType {
    pub const NAME: &'static str = "VariantTable";

    pub fn new() -> Self {
        Self {
            info: TypeInfo::native::<VariantTable>(Self::NAME, MetaType::Custom, TypeTraits::MANAGED),
        }
    }

    /// Recognize a variant table type behind a type handle.
    pub fn is_table(ty: &dyn Type) -> bool {
        ty.as_any().is::<VariantTableType>()
    }
}

impl Default for VariantTableType {
    fn default() -> Self {
        Self::new()
    }
}

/// # Safety
/// `data` must point at a live [`VariantTable`].
unsafe fn table<'a>(data: *const u8) -> &'a VariantTable {
    unsafe { &*data.cast::<VariantTable>() }
}

/// # Safety
/// `data` must point at a live [`VariantTable`].
unsafe fn table_mut<'a>(data: *mut u8) -> &'a mut VariantTable {
    unsafe { &mut *data.cast::<VariantTable>() }
}

impl Type for VariantTableType {
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
        unsafe { std::ptr::write(data.cast::<VariantTable>(), VariantTable::new()) }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        unsafe { std::ptr::drop_in_place(data.cast::<VariantTable>()) }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        let (dst, src) = unsafe { (table_mut(dst), table(src)) };
        dst.clear();
        for entry in src.iter() {
            unsafe { dst.set_raw(&entry.key, entry.ty, entry.data) };
        }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        unsafe { table(a) == table(b) }
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        // order independent
        unsafe { table(data) }.iter().fold(self.info.hash.as_u64(), |hash, entry| {
            let value = if entry.ty.traits().contains(TypeTraits::HASHABLE) {
                unsafe { entry.ty.hash_value(entry.data) }
            } else {
                0
            };
            hash ^ (entry.key.precomputed_hash().rotate_left(17) ^ value)
        })
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        let mut writer = TextWriter::new();
        if let Ok(node) = unsafe { self.write_text(&mut writer, data, None) } {
            out.push_str(&node.to_string());
        }
    }

    unsafe fn parse(&self, _text: &str, _data: *mut u8) -> bool {
        // entry types need a resolver
        false
    }

    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        let table = unsafe { table(data) };
        writer.write_varint(table.len() as u64);
        for entry in table.iter() {
            writer.write_str(&entry.key);
            writer.write_str(&entry.ty.name());
            let block = writer.begin_block();
            unsafe { entry.ty.write_binary(writer, entry.data, None)? };
            writer.end_block(block)?;
        }
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let table = unsafe { table_mut(data) };
        table.clear();
        let count = reader.read_len()?;
        for _ in 0..count {
            let key = reader.read_str()?;
            let type_name = reader.read_str()?;
            let end = reader.begin_block()?;
            match reader.resolver().find_type(type_name) {
                Some(ty) => {
                    let mut value = DataBlob::new(ty.clone());
                    match unsafe { ty.read_binary(reader, value.as_mut_ptr()) } {
                        Ok(()) => {
                            unsafe { table.set_raw(key, &ty, value.as_ptr()) };
                        }
                        Err(error) => {
                            reader
                                .reporter()
                                .report_property_data_corrupted(Self::NAME, key, &error);
                        }
                    }
                }
                None => {
                    reader
                        .reporter()
                        .report_property_type_missing(Self::NAME, key, type_name);
                }
            }
            reader.end_block(end);
        }
        Ok(())
    }

    unsafe fn write_text(
        &self,
        writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        let mut map = Map::new();
        for entry in unsafe { table(data) }.iter() {
            let value = unsafe { entry.ty.write_text(writer, entry.data, None)? };
            let mut node = Map::new();
            node.insert("type".into(), Value::String(entry.ty.name().to_string()));
            node.insert("value".into(), value);
            map.insert(entry.key.to_string(), Value::Object(node));
        }
        Ok(Value::Object(map))
    }

    unsafe fn read_text(
        &self,
        reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let Value::Object(map) = node else {
            return Err(StreamError::MalformedText(format!(
                "expected object for '{}', found {node}",
                Self::NAME
            )));
        };
        let resolver = reader.require_resolver(Self::NAME)?;
        let table = unsafe { table_mut(data) };
        table.clear();
        for (key, entry) in map {
            let type_name = entry.get("type").and_then(Value::as_str).ok_or_else(|| {
                StreamError::invalid_value(Self::NAME, format!("entry '{key}' has no type"))
            })?;
            let value = entry.get("value").unwrap_or(&Value::Null);
            let ty = resolver
                .find_type(type_name)
                .ok_or_else(|| StreamError::UnknownType(type_name.to_owned()))?;
            let slot = table.allocate(key, &ty);
            unsafe { ty.read_text(reader, value, slot)? };
        }
        Ok(())
    }
}
