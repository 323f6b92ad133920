//! Binary codec.
//!
//! # Layout
//!
//! ```text
//! stream   := magic "MTB1" | version u16 | root
//! root     := type-name str | value            (save_binary)
//!           | object                            (save_object_binary)
//! class    := { prop-ref skip-len u32 payload }* 0
//! prop-ref := varint; equal to the next free index it is followed by
//!             class-name str | property-name str | type-name str
//! object   := 0                                 (null)
//!           | 1 class-name str | class          (first occurrence)
//!           | 2 varint                          (back reference)
//! str      := varint length | utf-8 bytes
//! ```
//!
//! Scalars are little-endian. The skip length bounds the payload exactly, so a
//! reader that cannot interpret a property jumps to the next property reference.

use rustc_hash::FxHashMap;
use ustr::Ustr;

use super::ErrorReporter;
use crate::convert::convert;
use crate::error::StreamError;
use crate::object::{Object, ObjectPtr, ObjectWeakPtr};
use crate::resolver::TypeResolver;
use crate::storage::DataBlob;
use crate::types::{ClassType, Type, TypeRef};

/// Stream magic.
pub const BINARY_MAGIC: [u8; 4] = *b"MTB1";

/// Current stream version.
pub const BINARY_VERSION: u16 = 1;

const OBJECT_NULL: u8 = 0;
const OBJECT_INLINE: u8 = 1;
const OBJECT_BACK_REF: u8 = 2;

/// Options for [`BinaryWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinaryWriterOptions {
    /// Write properties even when they equal the default object.
    pub save_defaults: bool,
}

/// Writes values into an in-memory binary stream.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
    options: BinaryWriterOptions,
    properties: FxHashMap<(Ustr, Ustr, Ustr), u64>,
    objects: FxHashMap<usize, u64>,
    // Keeps written objects alive so their addresses stay unique.
    retained: Vec<ObjectPtr>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BinaryWriterOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    #[inline]
    pub fn options(&self) -> BinaryWriterOptions {
        self.options
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // ==========================================================================
    // Primitives
    // ==========================================================================

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Write an unsigned LEB128 varint.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Write a length-prefixed utf-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_varint(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    pub fn write_header(&mut self) {
        self.write_bytes(&BINARY_MAGIC);
        self.write_u16(BINARY_VERSION);
    }

    // ==========================================================================
    // Skip blocks and property references
    // ==========================================================================

    /// Reserve a skip-block length and return its position.
    pub fn begin_block(&mut self) -> usize {
        let at = self.buf.len();
        self.write_u32(0);
        at
    }

    /// Patch the length reserved by [`BinaryWriter::begin_block`].
    pub fn end_block(&mut self, at: usize) -> Result<(), StreamError> {
        let len = self.buf.len() - at - 4;
        let len = u32::try_from(len).map_err(|_| StreamError::BlockOverrun { offset: at })?;
        self.buf[at..at + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Write a reference to a property, defining it on first use.
    pub fn write_property_ref(&mut self, class: Ustr, property: Ustr, type_name: Ustr) {
        let key = (class, property, type_name);
        if let Some(&index) = self.properties.get(&key) {
            self.write_varint(index);
            return;
        }
        let index = self.properties.len() as u64 + 1;
        self.properties.insert(key, index);
        self.write_varint(index);
        self.write_str(&class);
        self.write_str(&property);
        self.write_str(&type_name);
    }

    pub fn write_end_of_properties(&mut self) {
        self.write_varint(0);
    }

    // ==========================================================================
    // Objects
    // ==========================================================================

    /// Index of an object already written to this stream.
    pub fn object_index(&self, object: &ObjectPtr) -> Option<u64> {
        self.objects.get(&object.addr()).copied()
    }

    fn register_object(&mut self, object: &ObjectPtr) -> u64 {
        let index = self.retained.len() as u64;
        self.objects.insert(object.addr(), index);
        self.retained.push(object.clone());
        index
    }

    /// Write an owning handle: inline on first occurrence, by index afterwards.
    pub fn write_object(&mut self, object: &ObjectPtr) -> Result<(), StreamError> {
        let Some(target) = object.get() else {
            self.write_u8(OBJECT_NULL);
            return Ok(());
        };
        if let Some(index) = self.object_index(object) {
            self.write_u8(OBJECT_BACK_REF);
            self.write_varint(index);
            return Ok(());
        }
        self.register_object(object);
        self.write_u8(OBJECT_INLINE);
        let class = target.class();
        self.write_str(&class.name());
        // SAFETY: object storage holds a constructed instance of its class.
        unsafe { class.write_binary(self, target.data(), None) }
    }

    /// Write a non-owning handle. It shares the object table with owning
    /// handles, so a target met here first is written inline and owning
    /// handles later in the stream refer back to it.
    pub fn write_weak_object(&mut self, object: &ObjectWeakPtr) -> Result<(), StreamError> {
        self.write_object(&object.upgrade())
    }
}

/// A property definition read from the stream's property table.
#[derive(Debug, Clone)]
pub struct SavedProperty {
    pub class: Ustr,
    pub name: Ustr,
    pub type_name: Ustr,
    /// Saved type, resolved once when the definition is read.
    pub ty: Option<TypeRef>,
}

/// Reads values from a binary stream.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    limits: Vec<usize>,
    resolver: &'a dyn TypeResolver,
    reporter: &'a mut dyn ErrorReporter,
    properties: Vec<SavedProperty>,
    objects: Vec<ObjectPtr>,
}

impl<'a> BinaryReader<'a> {
    pub fn new(
        data: &'a [u8],
        resolver: &'a dyn TypeResolver,
        reporter: &'a mut dyn ErrorReporter,
    ) -> Self {
        Self {
            data,
            pos: 0,
            limits: Vec::new(),
            resolver,
            reporter,
            properties: Vec::new(),
            objects: Vec::new(),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn limit(&self) -> usize {
        self.limits.last().copied().unwrap_or(self.data.len())
    }

    /// Bytes left before the end of the current block or stream.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit().saturating_sub(self.pos)
    }

    pub fn resolver(&self) -> &'a dyn TypeResolver {
        self.resolver
    }

    pub fn reporter(&mut self) -> &mut dyn ErrorReporter {
        &mut *self.reporter
    }

    // ==========================================================================
    // Primitives
    // ==========================================================================

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        if len > self.remaining() {
            return Err(StreamError::UnexpectedEnd {
                offset: self.pos,
                needed: len,
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, StreamError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_varint(&mut self) -> Result<u64, StreamError> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(StreamError::MalformedVarint(start))
    }

    /// Read a varint length and check it against the bytes available.
    pub fn read_len(&mut self) -> Result<usize, StreamError> {
        let offset = self.pos;
        let len = self.read_varint()?;
        usize::try_from(len)
            .ok()
            .filter(|len| *len <= self.remaining())
            .ok_or(StreamError::UnexpectedEnd {
                offset,
                needed: len as usize,
            })
    }

    pub fn read_str(&mut self) -> Result<&'a str, StreamError> {
        let len = self.read_len()?;
        let offset = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| StreamError::InvalidUtf8(offset))
    }

    pub fn read_string(&mut self) -> Result<String, StreamError> {
        self.read_str().map(str::to_owned)
    }

    pub fn read_header(&mut self) -> Result<(), StreamError> {
        let magic = self
            .read_array::<4>()
            .map_err(|_| StreamError::InvalidHeader)?;
        if magic != BINARY_MAGIC {
            return Err(StreamError::InvalidHeader);
        }
        match self.read_u16()? {
            BINARY_VERSION => Ok(()),
            other => Err(StreamError::UnsupportedVersion(other)),
        }
    }

    // ==========================================================================
    // Skip blocks and property references
    // ==========================================================================

    /// Read a skip-block length and enter the block. Returns the block end.
    pub fn begin_block(&mut self) -> Result<usize, StreamError> {
        let offset = self.pos;
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(StreamError::BlockOverrun { offset });
        }
        let end = self.pos + len;
        self.limits.push(end);
        Ok(end)
    }

    /// Leave a block, skipping whatever its payload did not consume.
    pub fn end_block(&mut self, end: usize) {
        if self.pos != end {
            tracing::trace!(
                position = self.pos,
                end,
                "resynchronizing at skip block end"
            );
        }
        self.pos = end;
        self.limits.pop();
    }

    /// The unread bytes of the current block.
    pub fn peek_block(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.limit())..self.limit()]
    }

    /// Read a property reference. `None` marks the end of a property list.
    pub fn read_property_ref(&mut self) -> Result<Option<usize>, StreamError> {
        let index = self.read_varint()?;
        if index == 0 {
            return Ok(None);
        }
        let next = self.properties.len() as u64 + 1;
        if index == next {
            let class = Ustr::from(self.read_str()?);
            let name = Ustr::from(self.read_str()?);
            let type_name = Ustr::from(self.read_str()?);
            let ty = self.resolver.find_type(&type_name);
            self.properties.push(SavedProperty {
                class,
                name,
                type_name,
                ty,
            });
        } else if index > next {
            return Err(StreamError::InvalidPropertyReference(index));
        }
        Ok(Some(index as usize - 1))
    }

    pub fn saved_property(&self, index: usize) -> Option<&SavedProperty> {
        self.properties.get(index)
    }

    // ==========================================================================
    // Objects
    // ==========================================================================

    /// Read an owning handle. When `expected` is given the object must be an
    /// instance of that class or a subclass.
    pub fn read_object(&mut self, expected: Option<&ClassType>) -> Result<ObjectPtr, StreamError> {
        let object = match self.read_u8()? {
            OBJECT_NULL => return Ok(ObjectPtr::null()),
            OBJECT_INLINE => {
                let name = self.read_str()?;
                let class = self
                    .resolver
                    .find_class(name)
                    .ok_or_else(|| StreamError::UnknownType(name.to_owned()))?;
                check_class(&class, expected)?;
                let object = Object::create(&class);
                let Some(target) = object.get() else {
                    return Err(StreamError::invalid_value(name, "class is abstract"));
                };
                self.objects.push(object.clone());
                // SAFETY: freshly created instance of `class`.
                unsafe { class.read_binary(self, target.data_mut())? };
                return Ok(object);
            }
            OBJECT_BACK_REF => {
                let index = self.read_varint()?;
                self.objects
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| {
                        StreamError::invalid_value("handle", format!("unknown object {index}"))
                    })?
            }
            tag => {
                return Err(StreamError::invalid_value(
                    "handle",
                    format!("unknown tag {tag}"),
                ));
            }
        };
        if let Some(class) = object.class() {
            check_class(class, expected)?;
        }
        Ok(object)
    }
}

fn check_class(class: &ClassType, expected: Option<&ClassType>) -> Result<(), StreamError> {
    match expected {
        Some(expected) if !class.is(Some(expected)) => Err(StreamError::invalid_value(
            expected.name().as_str(),
            format!("object of class '{}' is not compatible", class.name()),
        )),
        _ => Ok(()),
    }
}

// ==============================================================================
// Entry points
// ==============================================================================

/// Serialize a value with its type name as root.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn save_binary(value: &DataBlob, options: BinaryWriterOptions) -> Result<Vec<u8>, StreamError> {
    let mut writer = BinaryWriter::with_options(options);
    writer.write_header();
    writer.write_str(&value.ty().name());
    // SAFETY: the blob holds a constructed value of its type.
    unsafe { value.ty().write_binary(&mut writer, value.as_ptr(), None)? };
    Ok(writer.into_bytes())
}

/// Load a value written by [`save_binary`] into `value`.
///
/// When the stream was written with a different root type the saved value is
/// converted into the blob's type.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn load_binary(
    bytes: &[u8],
    value: &mut DataBlob,
    resolver: &dyn TypeResolver,
    reporter: &mut dyn ErrorReporter,
) -> Result<(), StreamError> {
    let mut reader = BinaryReader::new(bytes, resolver, reporter);
    reader.read_header()?;
    let name = reader.read_str()?;
    let ty = value.ty().clone();
    if ty.name().as_str() == name {
        // SAFETY: the blob holds a constructed value of its type.
        return unsafe { ty.read_binary(&mut reader, value.as_mut_ptr()) };
    }
    let saved = resolver
        .find_type(name)
        .ok_or_else(|| StreamError::UnknownType(name.to_owned()))?;
    let mut temp = DataBlob::new(saved.clone());
    // SAFETY: `temp` is a constructed value of `saved`.
    unsafe { saved.read_binary(&mut reader, temp.as_mut_ptr())? };
    // SAFETY: both blobs hold constructed values of their own types.
    if unsafe { convert(temp.as_ptr(), saved.as_ref(), value.as_mut_ptr(), ty.as_ref()) } {
        Ok(())
    } else {
        Err(StreamError::invalid_value(
            ty.name().as_str(),
            format!("cannot convert saved '{name}'"),
        ))
    }
}

/// Serialize an object graph rooted at `object`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn save_object_binary(
    object: &ObjectPtr,
    options: BinaryWriterOptions,
) -> Result<Vec<u8>, StreamError> {
    let mut writer = BinaryWriter::with_options(options);
    writer.write_header();
    writer.write_object(object)?;
    Ok(writer.into_bytes())
}

/// Load an object graph written by [`save_object_binary`].
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn load_object_binary(
    bytes: &[u8],
    resolver: &dyn TypeResolver,
    reporter: &mut dyn ErrorReporter,
) -> Result<ObjectPtr, StreamError> {
    let mut reader = BinaryReader::new(bytes, resolver, reporter);
    reader.read_header()?;
    reader.read_object(None)
}
