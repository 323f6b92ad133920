//! Types driven by a table of functions.
//!
//! The escape hatch for values that do not fit another kind. Every entry of
//! [`CustomTypeFuncs`] is optional; unset entries treat the value as plain
//! bytes (zeroed start, no destruction, byte copy and compare, hex text).

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;

use super::{
    MetaType, Type, TypeInfo, TypeTraits, compare_native, construct_native, copy_native,
    destruct_native, hex_decode, hex_encode, raw_bytes,
};
use crate::error::StreamError;
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};

/// Operations of a [`CustomType`].
#[derive(Clone, Copy, Default)]
pub struct CustomTypeFuncs {
    pub construct: Option<unsafe fn(*mut u8)>,
    pub destruct: Option<unsafe fn(*mut u8)>,
    pub copy: Option<unsafe fn(*mut u8, *const u8)>,
    pub compare: Option<unsafe fn(*const u8, *const u8) -> bool>,
    pub hash: Option<unsafe fn(*const u8) -> u64>,
    pub print: Option<unsafe fn(*const u8, &mut String)>,
    pub parse: Option<unsafe fn(&str, *mut u8) -> bool>,
    pub write_binary: Option<unsafe fn(&mut BinaryWriter, *const u8)>,
    pub read_binary: Option<unsafe fn(&mut BinaryReader<'_>, *mut u8) -> Result<(), StreamError>>,
    pub write_text: Option<unsafe fn(*const u8) -> Value>,
    pub read_text: Option<unsafe fn(&Value, *mut u8) -> bool>,
    /// Named parts of the value for inspection.
    pub describe: Option<unsafe fn(*const u8) -> Vec<(String, String)>>,
}

impl CustomTypeFuncs {
    /// Lifecycle entries for the Rust type `T`, everything else unset.
    pub fn of<T: Default + Clone + PartialEq + 'static>() -> Self {
        Self {
            construct: Some(construct_native::<T>),
            destruct: Some(destruct_native::<T>),
            copy: Some(copy_native::<T>),
            compare: Some(compare_native::<T>),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for CustomTypeFuncs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomTypeFuncs")
            .field("construct", &self.construct.is_some())
            .field("destruct", &self.destruct.is_some())
            .field("copy", &self.copy.is_some())
            .field("compare", &self.compare.is_some())
            .field("serialize", &self.write_binary.is_some())
            .finish_non_exhaustive()
    }
}

/// A type whose behavior is a [`CustomTypeFuncs`] table.
#[derive(Debug)]
pub struct CustomType {
    info: TypeInfo,
    funcs: CustomTypeFuncs,
}

impl CustomType {
    pub fn new(name: &str, size: usize, align: usize, funcs: CustomTypeFuncs) -> Self {
        let info = TypeInfo::new(name, MetaType::Custom, size, align, Self::traits_for(&funcs));
        Self { info, funcs }
    }

    /// A custom type laid out like `T` and bound to it.
    pub fn native<T: 'static>(name: &str, funcs: CustomTypeFuncs) -> Self {
        let info = TypeInfo::native::<T>(name, MetaType::Custom, Self::traits_for(&funcs));
        Self { info, funcs }
    }

    fn traits_for(funcs: &CustomTypeFuncs) -> TypeTraits {
        let mut traits = TypeTraits::HASHABLE;
        traits |= if funcs.construct.is_some() {
            TypeTraits::NEEDS_CONSTRUCTOR
        } else {
            TypeTraits::ZERO_INIT
        };
        if funcs.destruct.is_some() {
            traits |= TypeTraits::NEEDS_DESTRUCTOR;
        }
        if funcs.copy.is_none() {
            traits |= TypeTraits::TRIVIALLY_COPYABLE;
        }
        if funcs.compare.is_none() {
            traits |= TypeTraits::TRIVIALLY_COMPARABLE;
        }
        traits
    }

    #[inline]
    pub fn funcs(&self) -> &CustomTypeFuncs {
        &self.funcs
    }

    /// Named parts of the value. Without a `describe` entry the value is a
    /// single `bytes` entry.
    ///
    /// # Safety
    /// `data` must hold a value of this type.
    pub unsafe fn describe(&self, data: *const u8) -> Vec<(String, String)> {
        match self.funcs.describe {
            Some(describe) => unsafe { describe(data) },
            None => {
                let mut hex = String::new();
                hex_encode(unsafe { raw_bytes(data, self.info.size) }, &mut hex);
                vec![("bytes".to_owned(), hex)]
            }
        }
    }

    unsafe fn load_hex(&self, text: &str, data: *mut u8) -> bool {
        match hex_decode(text) {
            Some(bytes) if bytes.len() == self.info.size => {
                unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len()) };
                true
            }
            _ => false,
        }
    }
}

impl Type for CustomType {
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
        if let Some(construct) = self.funcs.construct {
            unsafe { construct(data) }
        }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        if let Some(destruct) = self.funcs.destruct {
            unsafe { destruct(data) }
        }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        match self.funcs.copy {
            Some(copy) => unsafe { copy(dst, src) },
            None => unsafe { std::ptr::copy_nonoverlapping(src, dst, self.info.size) },
        }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        match self.funcs.compare {
            Some(compare) => unsafe { compare(a, b) },
            None => unsafe { raw_bytes(a, self.info.size) == raw_bytes(b, self.info.size) },
        }
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        match self.funcs.hash {
            Some(hash) => unsafe { hash(data) },
            None => xxhash_rust::xxh64::xxh64(unsafe { raw_bytes(data, self.info.size) }, 0),
        }
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        match self.funcs.print {
            Some(print) => unsafe { print(data, out) },
            None => hex_encode(unsafe { raw_bytes(data, self.info.size) }, out),
        }
    }

    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        match self.funcs.parse {
            Some(parse) => unsafe { parse(text, data) },
            None => unsafe { self.load_hex(text, data) },
        }
    }

    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        match self.funcs.write_binary {
            Some(write) => unsafe { write(writer, data) },
            None => writer.write_bytes(unsafe { raw_bytes(data, self.info.size) }),
        }
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        match self.funcs.read_binary {
            Some(read) => unsafe { read(reader, data) },
            None => {
                let bytes = reader.read_bytes(self.info.size)?;
                unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len()) };
                Ok(())
            }
        }
    }

    unsafe fn write_text(
        &self,
        _writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        Ok(match self.funcs.write_text {
            Some(write) => unsafe { write(data) },
            None => {
                let mut hex = String::new();
                hex_encode(unsafe { raw_bytes(data, self.info.size) }, &mut hex);
                Value::String(hex)
            }
        })
    }

    unsafe fn read_text(
        &self,
        _reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let ok = match (self.funcs.read_text, node) {
            (Some(read), node) => unsafe { read(node, data) },
            (None, Value::String(hex)) => unsafe { self.load_hex(hex, data) },
            (None, _) => false,
        };
        if ok {
            Ok(())
        } else {
            Err(StreamError::invalid_value(self.info.name.as_str(), format!("cannot read {node}")))
        }
    }

    fn as_custom(&self) -> Option<&CustomType> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DataBlob;
    use crate::stream::{BinaryWriter, value_from_text, value_to_text};
    use crate::types::{TypeRef, print_to_string};

    #[repr(C)]
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Rgba {
        r: u8,
        g: u8,
        b: u8,
        a: u8,
    }

    unsafe fn print_rgba(data: *const u8, out: &mut String) {
        let c = unsafe { &*data.cast::<Rgba>() };
        out.push_str(&format!("#{:02x}{:02x}{:02x}{:02x}", c.r, c.g, c.b, c.a));
    }

    #[test]
    fn unset_entries_fall_back_to_bytes() {
        let ty: TypeRef = Arc::new(CustomType::native::<Rgba>("Rgba", CustomTypeFuncs::default()));
        assert!(ty.traits().contains(TypeTraits::ZERO_INIT | TypeTraits::TRIVIALLY_COPYABLE));
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            assert!(ty.parse("0a0b0c0d", blob.as_mut_ptr()));
            assert_eq!(*blob.as_ptr().cast::<Rgba>(), Rgba { r: 10, g: 11, b: 12, a: 13 });
            assert_eq!(print_to_string(ty.as_ref(), blob.as_ptr()), "0a0b0c0d");
            assert!(!ty.parse("0a0b", blob.as_mut_ptr()));

            let node = value_to_text(ty.as_ref(), blob.as_ptr()).unwrap();
            let mut copy = DataBlob::new(ty.clone());
            value_from_text(ty.as_ref(), &node, copy.as_mut_ptr(), None).unwrap();
            assert_eq!(copy, blob);

            let mut writer = BinaryWriter::new();
            ty.write_binary(&mut writer, blob.as_ptr(), None).unwrap();
            assert_eq!(writer.bytes(), &[10, 11, 12, 13]);
        }
    }

    #[test]
    fn set_entries_override_defaults() {
        let funcs = CustomTypeFuncs {
            print: Some(print_rgba),
            ..CustomTypeFuncs::of::<Rgba>()
        };
        let custom = CustomType::native::<Rgba>("Rgba", funcs);
        assert!(custom.traits().contains(TypeTraits::NEEDS_CONSTRUCTOR));
        let ty: TypeRef = Arc::new(custom);
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            (*blob.as_mut_ptr().cast::<Rgba>()).r = 255;
            assert_eq!(print_to_string(ty.as_ref(), blob.as_ptr()), "#ff000000");
            let parts = ty.as_custom().unwrap().describe(blob.as_ptr());
            assert_eq!(parts, vec![("bytes".to_owned(), "ff000000".to_owned())]);
        }
    }
}
