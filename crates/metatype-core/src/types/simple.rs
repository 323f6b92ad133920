//! Scalars, strings, interned names and `void`.

use std::any::Any;
use std::fmt::{self, Write};
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use ustr::Ustr;
use xxhash_rust::xxh64::xxh64;

use super::{MetaType, Type, TypeInfo, TypeTraits, compare_native, copy_native, destruct_native};
use crate::error::StreamError;
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};

/// Which built-in scalar a simple type holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimpleKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Name,
}

impl SimpleKind {
    pub fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32 | Self::Uint64)
    }

    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Strings and names.
    pub fn is_text(self) -> bool {
        matches!(self, Self::String | Self::Name)
    }
}

/// A numeric or boolean value in its widest form, used for conversions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl Scalar {
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Bool(b) => b as i64,
            Scalar::Int(v) => v,
            Scalar::Uint(v) => v as i64,
            Scalar::Float(v) => v as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Scalar::Bool(b) => b as u64,
            Scalar::Int(v) => v as u64,
            Scalar::Uint(v) => v,
            Scalar::Float(v) => v as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => b as u8 as f64,
            Scalar::Int(v) => v as f64,
            Scalar::Uint(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::Int(v) => v != 0,
            Scalar::Uint(v) => v != 0,
            Scalar::Float(v) => v != 0.0,
        }
    }
}

/// Rust types that back a [`SimpleType`].
pub trait SimpleValue: Clone + PartialEq + Send + Sync + fmt::Debug + 'static {
    /// Registered type name.
    const NAME: &'static str;
    const KIND: SimpleKind;
    const TRAITS: TypeTraits;

    fn initial() -> Self;
    fn to_scalar(&self) -> Option<Scalar>;
    fn from_scalar(value: Scalar) -> Option<Self>;
    fn hash_of(&self) -> u64;
    fn print(&self, out: &mut String);
    fn parse(text: &str) -> Option<Self>;
    fn write_binary(&self, writer: &mut BinaryWriter);
    fn read_binary(reader: &mut BinaryReader<'_>) -> Result<Self, StreamError>;
    fn to_json(&self) -> Value;
    fn from_json(node: &Value) -> Option<Self>;
}

macro_rules! impl_integer {
    ($($t:ty => $name:literal, $kind:ident, $variant:ident, $json:ident;)*) => {$(
        impl SimpleValue for $t {
            const NAME: &'static str = $name;
            const KIND: SimpleKind = SimpleKind::$kind;
            const TRAITS: TypeTraits = TypeTraits::POD;

            fn initial() -> Self {
                0
            }

            fn to_scalar(&self) -> Option<Scalar> {
                Some(Scalar::$variant(*self as _))
            }

            fn from_scalar(value: Scalar) -> Option<Self> {
                Some(match value {
                    Scalar::Bool(b) => b as $t,
                    Scalar::Int(v) => v as $t,
                    Scalar::Uint(v) => v as $t,
                    Scalar::Float(v) => v as $t,
                })
            }

            fn hash_of(&self) -> u64 {
                xxh64(&self.to_le_bytes(), 0)
            }

            fn print(&self, out: &mut String) {
                let _ = write!(out, "{}", self);
            }

            fn parse(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }

            fn write_binary(&self, writer: &mut BinaryWriter) {
                writer.write_bytes(&self.to_le_bytes());
            }

            fn read_binary(reader: &mut BinaryReader<'_>) -> Result<Self, StreamError> {
                Ok(<$t>::from_le_bytes(reader.read_array()?))
            }

            fn to_json(&self) -> Value {
                Value::from(*self)
            }

            fn from_json(node: &Value) -> Option<Self> {
                node.$json().and_then(|v| <$t>::try_from(v).ok())
            }
        }
    )*};
}

impl_integer! {
    i8 => "int8", Int8, Int, as_i64;
    i16 => "int16", Int16, Int, as_i64;
    i32 => "int32", Int32, Int, as_i64;
    i64 => "int64", Int64, Int, as_i64;
    u8 => "uint8", Uint8, Uint, as_u64;
    u16 => "uint16", Uint16, Uint, as_u64;
    u32 => "uint32", Uint32, Uint, as_u64;
    u64 => "uint64", Uint64, Uint, as_u64;
}

macro_rules! impl_float {
    ($($t:ty => $name:literal, $kind:ident;)*) => {$(
        impl SimpleValue for $t {
            const NAME: &'static str = $name;
            const KIND: SimpleKind = SimpleKind::$kind;
            // -0.0 == 0.0 and NaN != NaN rule out byte comparison.
            const TRAITS: TypeTraits = TypeTraits::ZERO_INIT
                .union(TypeTraits::TRIVIALLY_COPYABLE)
                .union(TypeTraits::HASHABLE);

            fn initial() -> Self {
                0.0
            }

            fn to_scalar(&self) -> Option<Scalar> {
                Some(Scalar::Float(*self as f64))
            }

            fn from_scalar(value: Scalar) -> Option<Self> {
                Some(value.as_f64() as $t)
            }

            fn hash_of(&self) -> u64 {
                let normalized = if *self == 0.0 { 0.0 } else { *self };
                xxh64(&normalized.to_le_bytes(), 0)
            }

            fn print(&self, out: &mut String) {
                let _ = write!(out, "{}", self);
            }

            fn parse(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }

            fn write_binary(&self, writer: &mut BinaryWriter) {
                writer.write_bytes(&self.to_le_bytes());
            }

            fn read_binary(reader: &mut BinaryReader<'_>) -> Result<Self, StreamError> {
                Ok(<$t>::from_le_bytes(reader.read_array()?))
            }

            fn to_json(&self) -> Value {
                if self.is_finite() {
                    Value::from(*self as f64)
                } else {
                    Value::String(self.to_string())
                }
            }

            fn from_json(node: &Value) -> Option<Self> {
                match node {
                    Value::Number(n) => n.as_f64().map(|v| v as $t),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                }
            }
        }
    )*};
}

impl_float! {
    f32 => "float", Float;
    f64 => "double", Double;
}

impl SimpleValue for bool {
    const NAME: &'static str = "bool";
    const KIND: SimpleKind = SimpleKind::Bool;
    const TRAITS: TypeTraits = TypeTraits::POD;

    fn initial() -> Self {
        false
    }

    fn to_scalar(&self) -> Option<Scalar> {
        Some(Scalar::Bool(*self))
    }

    fn from_scalar(value: Scalar) -> Option<Self> {
        Some(value.as_bool())
    }

    fn hash_of(&self) -> u64 {
        *self as u64
    }

    fn print(&self, out: &mut String) {
        out.push_str(if *self { "true" } else { "false" });
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    fn write_binary(&self, writer: &mut BinaryWriter) {
        writer.write_u8(*self as u8);
    }

    fn read_binary(reader: &mut BinaryReader<'_>) -> Result<Self, StreamError> {
        Ok(reader.read_u8()? != 0)
    }

    fn to_json(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_json(node: &Value) -> Option<Self> {
        node.as_bool()
    }
}

impl SimpleValue for String {
    const NAME: &'static str = "string";
    const KIND: SimpleKind = SimpleKind::String;
    const TRAITS: TypeTraits = TypeTraits::MANAGED.union(TypeTraits::HASHABLE);

    fn initial() -> Self {
        String::new()
    }

    fn to_scalar(&self) -> Option<Scalar> {
        None
    }

    fn from_scalar(_value: Scalar) -> Option<Self> {
        None
    }

    fn hash_of(&self) -> u64 {
        xxh64(self.as_bytes(), 0)
    }

    fn print(&self, out: &mut String) {
        out.push_str(self);
    }

    fn parse(text: &str) -> Option<Self> {
        Some(text.to_owned())
    }

    fn write_binary(&self, writer: &mut BinaryWriter) {
        writer.write_str(self);
    }

    fn read_binary(reader: &mut BinaryReader<'_>) -> Result<Self, StreamError> {
        reader.read_string()
    }

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_json(node: &Value) -> Option<Self> {
        node.as_str().map(str::to_owned)
    }
}

impl SimpleValue for Ustr {
    const NAME: &'static str = "name";
    const KIND: SimpleKind = SimpleKind::Name;
    // Interned pointers are never null, so zeroed memory is not a name.
    const TRAITS: TypeTraits = TypeTraits::NEEDS_CONSTRUCTOR
        .union(TypeTraits::TRIVIALLY_COPYABLE)
        .union(TypeTraits::TRIVIALLY_COMPARABLE)
        .union(TypeTraits::HASHABLE);

    fn initial() -> Self {
        Ustr::from("")
    }

    fn to_scalar(&self) -> Option<Scalar> {
        None
    }

    fn from_scalar(_value: Scalar) -> Option<Self> {
        None
    }

    fn hash_of(&self) -> u64 {
        self.precomputed_hash()
    }

    fn print(&self, out: &mut String) {
        out.push_str(self.as_str());
    }

    fn parse(text: &str) -> Option<Self> {
        Some(Ustr::from(text))
    }

    fn write_binary(&self, writer: &mut BinaryWriter) {
        writer.write_str(self.as_str());
    }

    fn read_binary(reader: &mut BinaryReader<'_>) -> Result<Self, StreamError> {
        reader.read_str().map(Ustr::from)
    }

    fn to_json(&self) -> Value {
        Value::String(self.as_str().to_owned())
    }

    fn from_json(node: &Value) -> Option<Self> {
        node.as_str().map(Ustr::from)
    }
}

/// A built-in type backed by the Rust type `T`.
pub struct SimpleType<T: SimpleValue> {
    info: TypeInfo,
    _marker: PhantomData<fn() -> T>,
}

impl<T: SimpleValue> SimpleType<T> {
    pub fn new() -> Self {
        Self {
            info: TypeInfo::native::<T>(T::NAME, MetaType::Simple, T::TRAITS),
            _marker: PhantomData,
        }
    }

    /// Read the value at `data`.
    ///
    /// # Safety
    /// `data` must hold a constructed `T`.
    pub unsafe fn value<'a>(&self, data: *const u8) -> &'a T {
        unsafe { &*data.cast::<T>() }
    }

    /// Overwrite the value at `data`.
    ///
    /// # Safety
    /// `data` must hold a constructed `T`.
    pub unsafe fn set_value(&self, data: *mut u8, value: T) {
        unsafe { *data.cast::<T>() = value }
    }
}

impl<T: SimpleValue> Default for SimpleType<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SimpleValue> fmt::Debug for SimpleType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleType").field("name", &T::NAME).finish()
    }
}

/// Read a simple value as a [`Scalar`], whatever its width.
///
/// # Safety
/// `data` must hold a constructed value of the simple type of kind `kind`.
pub(crate) unsafe fn read_scalar(kind: SimpleKind, data: *const u8) -> Option<Scalar> {
    unsafe {
        match kind {
            SimpleKind::Bool => (*data.cast::<bool>()).to_scalar(),
            SimpleKind::Int8 => (*data.cast::<i8>()).to_scalar(),
            SimpleKind::Int16 => (*data.cast::<i16>()).to_scalar(),
            SimpleKind::Int32 => (*data.cast::<i32>()).to_scalar(),
            SimpleKind::Int64 => (*data.cast::<i64>()).to_scalar(),
            SimpleKind::Uint8 => (*data.cast::<u8>()).to_scalar(),
            SimpleKind::Uint16 => (*data.cast::<u16>()).to_scalar(),
            SimpleKind::Uint32 => (*data.cast::<u32>()).to_scalar(),
            SimpleKind::Uint64 => (*data.cast::<u64>()).to_scalar(),
            SimpleKind::Float => (*data.cast::<f32>()).to_scalar(),
            SimpleKind::Double => (*data.cast::<f64>()).to_scalar(),
            SimpleKind::String | SimpleKind::Name => None,
        }
    }
}

/// Store a [`Scalar`] into a simple value, narrowing as needed.
///
/// # Safety
/// `data` must hold a constructed value of the simple type of kind `kind`.
pub(crate) unsafe fn write_scalar(kind: SimpleKind, data: *mut u8, value: Scalar) -> bool {
    unsafe fn store<T: SimpleValue>(data: *mut u8, value: Scalar) -> bool {
        match T::from_scalar(value) {
            Some(v) => {
                unsafe { *data.cast::<T>() = v };
                true
            }
            None => false,
        }
    }
    unsafe {
        match kind {
            SimpleKind::Bool => store::<bool>(data, value),
            SimpleKind::Int8 => store::<i8>(data, value),
            SimpleKind::Int16 => store::<i16>(data, value),
            SimpleKind::Int32 => store::<i32>(data, value),
            SimpleKind::Int64 => store::<i64>(data, value),
            SimpleKind::Uint8 => store::<u8>(data, value),
            SimpleKind::Uint16 => store::<u16>(data, value),
            SimpleKind::Uint32 => store::<u32>(data, value),
            SimpleKind::Uint64 => store::<u64>(data, value),
            SimpleKind::Float => store::<f32>(data, value),
            SimpleKind::Double => store::<f64>(data, value),
            SimpleKind::String | SimpleKind::Name => false,
        }
    }
}

/// Borrow a string or name value as text.
///
/// # Safety
/// `data` must hold a constructed value of the simple type of kind `kind`.
pub(crate) unsafe fn read_text<'a>(kind: SimpleKind, data: *const u8) -> Option<&'a str> {
    unsafe {
        match kind {
            SimpleKind::String => Some((*data.cast::<String>()).as_str()),
            SimpleKind::Name => Some((*data.cast::<Ustr>()).as_str()),
            _ => None,
        }
    }
}

/// Store text into a string or name value.
///
/// # Safety
/// `data` must hold a constructed value of the simple type of kind `kind`.
pub(crate) unsafe fn write_text(kind: SimpleKind, data: *mut u8, text: &str) -> bool {
    unsafe {
        match kind {
            SimpleKind::String => {
                let slot = &mut *data.cast::<String>();
                slot.clear();
                slot.push_str(text);
                true
            }
            SimpleKind::Name => {
                *data.cast::<Ustr>() = Ustr::from(text);
                true
            }
            _ => false,
        }
    }
}

impl<T: SimpleValue> Type for SimpleType<T> {
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
        unsafe { std::ptr::write(data.cast::<T>(), T::initial()) }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        unsafe { destruct_native::<T>(data) }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        unsafe { copy_native::<T>(dst, src) }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        unsafe { compare_native::<T>(a, b) }
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        unsafe { self.value(data).hash_of() }
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        unsafe { self.value(data).print(out) }
    }

    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        match T::parse(text) {
            Some(v) => {
                unsafe { self.set_value(data, v) };
                true
            }
            None => false,
        }
    }

    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        unsafe { self.value(data).write_binary(writer) };
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let value = T::read_binary(reader)?;
        unsafe { self.set_value(data, value) };
        Ok(())
    }

    unsafe fn write_text(
        &self,
        _writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        Ok(unsafe { self.value(data).to_json() })
    }

    unsafe fn read_text(
        &self,
        _reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let value = T::from_json(node)
            .ok_or_else(|| StreamError::invalid_value(T::NAME, format!("cannot read {node}")))?;
        unsafe { self.set_value(data, value) };
        Ok(())
    }

    fn as_simple(&self) -> Option<SimpleKind> {
        Some(T::KIND)
    }
}

/// The type with no value.
#[derive(Debug)]
pub struct VoidType {
    info: TypeInfo,
}

impl VoidType {
    pub fn new() -> Self {
        Self {
            info: TypeInfo::new("void", MetaType::Void, 0, 1, TypeTraits::POD),
        }
    }
}

impl Default for VoidType {
    fn default() -> Self {
        Self::new()
    }
}

impl Type for VoidType {
    fn info(&self) -> &TypeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    unsafe fn compare(&self, _a: *const u8, _b: *const u8) -> bool {
        true
    }

    unsafe fn print(&self, _data: *const u8, _out: &mut String) {}

    unsafe fn parse(&self, text: &str, _data: *mut u8) -> bool {
        text.trim().is_empty()
    }

    unsafe fn write_binary(
        &self,
        _writer: &mut BinaryWriter,
        _data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        _reader: &mut BinaryReader<'_>,
        _data: *mut u8,
    ) -> Result<(), StreamError> {
        Ok(())
    }

    unsafe fn write_text(
        &self,
        _writer: &mut TextWriter,
        _data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        Ok(Value::Null)
    }

    unsafe fn read_text(
        &self,
        _reader: &mut TextReader<'_>,
        _node: &Value,
        _data: *mut u8,
    ) -> Result<(), StreamError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DataBlob;
    use crate::types::TypeRef;

    fn blob<T: SimpleValue>() -> DataBlob {
        let ty: TypeRef = Arc::new(SimpleType::<T>::new());
        DataBlob::new(ty)
    }

    #[test]
    fn integer_print_parse() {
        let mut data = blob::<i32>();
        let ty = Arc::clone(data.ty());
        unsafe {
            assert!(ty.parse(" -42 ", data.as_mut_ptr()));
            assert_eq!(*data.as_ptr().cast::<i32>(), -42);
            let mut out = String::new();
            ty.print(data.as_ptr(), &mut out);
            assert_eq!(out, "-42");
            assert!(!ty.parse("forty", data.as_mut_ptr()));
        }
    }

    #[test]
    fn string_construct_and_compare() {
        let mut a = blob::<String>();
        let b = blob::<String>();
        let ty = Arc::clone(a.ty());
        unsafe {
            assert!(ty.compare(a.as_ptr(), b.as_ptr()));
            assert!(ty.parse("hello", a.as_mut_ptr()));
            assert!(!ty.compare(a.as_ptr(), b.as_ptr()));
            assert_eq!(&*a.as_ptr().cast::<String>(), "hello");
        }
    }

    #[test]
    fn name_starts_empty() {
        let data = blob::<Ustr>();
        unsafe {
            assert_eq!((*data.as_ptr().cast::<Ustr>()).as_str(), "");
        }
    }

    #[test]
    fn float_json_handles_non_finite() {
        assert_eq!(f32::INFINITY.to_json(), Value::String("inf".into()));
        assert_eq!(f64::from_json(&Value::String("NaN".into())).map(f64::is_nan), Some(true));
        assert_eq!(f32::from_json(&serde_json::json!(1.5)), Some(1.5));
    }

    #[test]
    fn integer_json_rejects_out_of_range() {
        assert_eq!(u8::from_json(&serde_json::json!(300)), None);
        assert_eq!(i16::from_json(&serde_json::json!(-3)), Some(-3));
    }

    #[test]
    fn scalar_round_trip_through_kinds() {
        let mut data = blob::<u16>();
        unsafe {
            assert!(write_scalar(SimpleKind::Uint16, data.as_mut_ptr(), Scalar::Float(7.9)));
            assert_eq!(read_scalar(SimpleKind::Uint16, data.as_ptr()), Some(Scalar::Uint(7)));
        }
    }

    #[test]
    fn float_hash_ignores_sign_of_zero() {
        assert_eq!(0.0f64.hash_of(), (-0.0f64).hash_of());
    }
}
