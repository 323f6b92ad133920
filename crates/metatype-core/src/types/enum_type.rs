//! Enumerations.

use std::any::Any;
use std::fmt::Write;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use ustr::Ustr;

use super::simple::{read_scalar, write_scalar};
use super::{MetaType, Scalar, SimpleKind, Type, TypeInfo, TypeTraits};
use crate::error::{RegistrationError, StreamError};
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};
use crate::type_hash::NativeTypeHash;

/// One named value of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumOption {
    pub name: Ustr,
    pub value: i64,
}

/// An integer type whose values have names.
#[derive(Debug)]
pub struct EnumType {
    info: TypeInfo,
    repr: SimpleKind,
    options: Vec<EnumOption>,
    by_name: FxHashMap<Ustr, i64>,
    initial: i64,
}

pub(crate) fn integer_size(repr: SimpleKind) -> Option<usize> {
    match repr {
        SimpleKind::Int8 | SimpleKind::Uint8 => Some(1),
        SimpleKind::Int16 | SimpleKind::Uint16 => Some(2),
        SimpleKind::Int32 | SimpleKind::Uint32 => Some(4),
        SimpleKind::Int64 | SimpleKind::Uint64 => Some(8),
        _ => None,
    }
}

impl EnumType {
    /// Create an enumeration stored as the integer kind `repr`.
    ///
    /// When no option has the value `0`, new values start at the first option.
    pub fn new<N: AsRef<str>>(
        name: &str,
        repr: SimpleKind,
        options: impl IntoIterator<Item = (N, i64)>,
    ) -> Result<Self, RegistrationError> {
        let size = integer_size(repr).ok_or_else(|| RegistrationError::InvalidLayout {
            class: name.to_owned(),
            reason: format!("enum storage must be an integer, not {repr:?}"),
        })?;
        let mut by_name = FxHashMap::default();
        let mut list = Vec::new();
        for (option, value) in options {
            let option = Ustr::from(option.as_ref());
            if by_name.insert(option, value).is_some() {
                return Err(RegistrationError::DuplicateProperty {
                    class: name.to_owned(),
                    name: option.to_string(),
                });
            }
            list.push(EnumOption {
                name: option,
                value,
            });
        }
        let initial = if list.iter().any(|o| o.value == 0) {
            0
        } else {
            list.first().map_or(0, |o| o.value)
        };
        let traits = if initial == 0 {
            TypeTraits::POD
        } else {
            TypeTraits::NEEDS_CONSTRUCTOR
                | TypeTraits::TRIVIALLY_COPYABLE
                | TypeTraits::TRIVIALLY_COMPARABLE
                | TypeTraits::HASHABLE
        };
        Ok(Self {
            info: TypeInfo::new(name, MetaType::Enum, size, size, traits),
            repr,
            options: list,
            by_name,
            initial,
        })
    }

    /// Bind the enumeration to a Rust type with the same size.
    pub fn bind_native<T: 'static>(mut self) -> Result<Self, RegistrationError> {
        if size_of::<T>() != self.info.size {
            return Err(RegistrationError::InvalidLayout {
                class: self.info.name.to_string(),
                reason: format!(
                    "native type is {} bytes, enum storage is {}",
                    size_of::<T>(),
                    self.info.size
                ),
            });
        }
        self.info.native = Some(NativeTypeHash::of::<T>());
        Ok(self)
    }

    pub fn repr(&self) -> SimpleKind {
        self.repr
    }

    pub fn options(&self) -> &[EnumOption] {
        &self.options
    }

    pub fn option_name(&self, value: i64) -> Option<Ustr> {
        self.options.iter().find(|o| o.value == value).map(|o| o.name)
    }

    pub fn option_value(&self, name: &str) -> Option<i64> {
        self.by_name.get(&Ustr::from_existing(name)?).copied()
    }

    /// Read the stored integer.
    ///
    /// # Safety
    /// `data` must hold a value of this enum.
    pub unsafe fn read_raw(&self, data: *const u8) -> i64 {
        unsafe { read_scalar(self.repr, data) }.map_or(0, Scalar::as_i64)
    }

    /// Store an integer.
    ///
    /// # Safety
    /// `data` must hold a value of this enum.
    pub unsafe fn write_raw(&self, data: *mut u8, value: i64) {
        unsafe { write_scalar(self.repr, data, Scalar::Int(value)) };
    }

    fn parse_value(&self, text: &str) -> Option<i64> {
        let text = text.trim();
        self.option_value(text).or_else(|| text.parse().ok())
    }
}

impl Type for EnumType {
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
        unsafe { self.write_raw(data, self.initial) };
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        unsafe { self.read_raw(data) as u64 }
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        let value = unsafe { self.read_raw(data) };
        match self.option_name(value) {
            Some(name) => out.push_str(&name),
            None => {
                let _ = write!(out, "{value}");
            }
        }
    }

    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        match self.parse_value(text) {
            Some(value) => {
                unsafe { self.write_raw(data, value) };
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
        writer.write_i64(unsafe { self.read_raw(data) });
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let value = reader.read_i64()?;
        unsafe { self.write_raw(data, value) };
        Ok(())
    }

    unsafe fn write_text(
        &self,
        _writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        let value = unsafe { self.read_raw(data) };
        Ok(match self.option_name(value) {
            Some(name) => Value::String(name.to_string()),
            None => Value::from(value),
        })
    }

    unsafe fn read_text(
        &self,
        _reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let value = match node {
            Value::String(name) => self.option_value(name),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
        .ok_or_else(|| {
            StreamError::invalid_value(self.info.name.as_str(), format!("unknown option {node}"))
        })?;
        unsafe { self.write_raw(data, value) };
        Ok(())
    }

    fn as_enum(&self) -> Option<&EnumType> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DataBlob;
    use crate::types::{TypeRef, print_to_string};

    fn color() -> Arc<EnumType> {
        Arc::new(
            EnumType::new(
                "Color",
                SimpleKind::Uint8,
                [("Red", 1), ("Green", 2), ("Blue", 4)],
            )
            .unwrap(),
        )
    }

    #[test]
    fn starts_at_first_option_without_zero() {
        let ty: TypeRef = color();
        let blob = DataBlob::new(ty.clone());
        assert_eq!(unsafe { print_to_string(ty.as_ref(), blob.as_ptr()) }, "Red");
        assert_eq!(ty.size(), 1);
    }

    #[test]
    fn parse_accepts_names_and_numbers() {
        let color = color();
        let ty: TypeRef = color.clone();
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            assert!(ty.parse("Blue", blob.as_mut_ptr()));
            assert_eq!(color.read_raw(blob.as_ptr()), 4);
            assert!(ty.parse("9", blob.as_mut_ptr()));
            assert_eq!(print_to_string(ty.as_ref(), blob.as_ptr()), "9");
            assert!(!ty.parse("Purple", blob.as_mut_ptr()));
        }
    }

    #[test]
    fn duplicate_options_are_rejected() {
        let err = EnumType::new("E", SimpleKind::Int32, [("A", 0), ("A", 1)]).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateProperty { .. }));
        let err = EnumType::new("E", SimpleKind::Float, [("A", 0)]).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidLayout { .. }));
    }

    #[test]
    fn bind_native_checks_size() {
        #[allow(dead_code)]
        #[repr(u8)]
        enum Small {
            A,
        }
        let e = EnumType::new("Small", SimpleKind::Uint8, [("A", 0)]).unwrap();
        assert!(e.bind_native::<Small>().is_ok());
        let e = EnumType::new("Small", SimpleKind::Int32, [("A", 0)]).unwrap();
        assert!(e.bind_native::<Small>().is_err());
    }
}
