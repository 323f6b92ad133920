//! Flag sets.

use std::any::Any;
use std::fmt::Write;
use std::sync::Arc;

use serde_json::Value;
use ustr::Ustr;

use super::enum_type::integer_size;
use super::simple::{read_scalar, write_scalar};
use super::{MetaType, Scalar, SimpleKind, Type, TypeInfo, TypeTraits};
use crate::error::{RegistrationError, StreamError};
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};
use crate::type_hash::NativeTypeHash;

/// One named flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitfieldFlag {
    pub name: Ustr,
    pub mask: u64,
}

/// An unsigned integer whose bits have names.
///
/// Printed as `A|B`; bits without a name print as a hex mask.
#[derive(Debug)]
pub struct BitfieldType {
    info: TypeInfo,
    repr: SimpleKind,
    flags: Vec<BitfieldFlag>,
}

impl BitfieldType {
    pub fn new<N: AsRef<str>>(
        name: &str,
        repr: SimpleKind,
        flags: impl IntoIterator<Item = (N, u64)>,
    ) -> Result<Self, RegistrationError> {
        let size = integer_size(repr).ok_or_else(|| RegistrationError::InvalidLayout {
            class: name.to_owned(),
            reason: format!("bitfield storage must be an integer, not {repr:?}"),
        })?;
        let mut list: Vec<BitfieldFlag> = Vec::new();
        for (flag, mask) in flags {
            let flag = Ustr::from(flag.as_ref());
            if list.iter().any(|f| f.name == flag) {
                return Err(RegistrationError::DuplicateProperty {
                    class: name.to_owned(),
                    name: flag.to_string(),
                });
            }
            list.push(BitfieldFlag { name: flag, mask });
        }
        Ok(Self {
            info: TypeInfo::new(name, MetaType::Bitfield, size, size, TypeTraits::POD),
            repr,
            flags: list,
        })
    }

    /// Bind the bitfield to a Rust type with the same size.
    pub fn bind_native<T: 'static>(mut self) -> Result<Self, RegistrationError> {
        if size_of::<T>() != self.info.size {
            return Err(RegistrationError::InvalidLayout {
                class: self.info.name.to_string(),
                reason: format!(
                    "native type is {} bytes, bitfield storage is {}",
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

    pub fn flags(&self) -> &[BitfieldFlag] {
        &self.flags
    }

    pub fn flag_mask(&self, name: &str) -> Option<u64> {
        self.flags
            .iter()
            .find(|f| f.name.as_str() == name)
            .map(|f| f.mask)
    }

    /// # Safety
    /// `data` must hold a value of this bitfield.
    pub unsafe fn read_raw(&self, data: *const u8) -> u64 {
        unsafe { read_scalar(self.repr, data) }.map_or(0, Scalar::as_u64)
    }

    /// # Safety
    /// `data` must hold a value of this bitfield.
    pub unsafe fn write_raw(&self, data: *mut u8, value: u64) {
        unsafe { write_scalar(self.repr, data, Scalar::Uint(value)) };
    }

    /// Names of the set flags plus any unnamed remainder.
    pub fn split(&self, value: u64) -> (Vec<Ustr>, u64) {
        let mut rest = value;
        let mut names = Vec::new();
        for flag in &self.flags {
            if flag.mask != 0 && value & flag.mask == flag.mask {
                names.push(flag.name);
                rest &= !flag.mask;
            }
        }
        (names, rest)
    }

    fn parse_value(&self, text: &str) -> Option<u64> {
        let text = text.trim();
        if text.is_empty() {
            return Some(0);
        }
        text.split('|').try_fold(0u64, |acc, token| {
            let token = token.trim();
            let mask = self.flag_mask(token).or_else(|| parse_mask(token))?;
            Some(acc | mask)
        })
    }
}

fn parse_mask(token: &str) -> Option<u64> {
    match token.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

impl Type for BitfieldType {
    fn info(&self) -> &TypeInfo {
        &self.info
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        unsafe { self.read_raw(data) }
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        let (names, rest) = self.split(unsafe { self.read_raw(data) });
        let mut first = true;
        for name in names {
            if !first {
                out.push('|');
            }
            out.push_str(&name);
            first = false;
        }
        if rest != 0 {
            if !first {
                out.push('|');
            }
            let _ = write!(out, "{rest:#x}");
        } else if first {
            out.push('0');
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
        writer.write_u64(unsafe { self.read_raw(data) });
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let value = reader.read_u64()?;
        unsafe { self.write_raw(data, value) };
        Ok(())
    }

    unsafe fn write_text(
        &self,
        _writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        let (names, rest) = self.split(unsafe { self.read_raw(data) });
        let mut nodes: Vec<Value> = names
            .into_iter()
            .map(|n| Value::String(n.to_string()))
            .collect();
        if rest != 0 {
            nodes.push(Value::from(rest));
        }
        Ok(Value::Array(nodes))
    }

    unsafe fn read_text(
        &self,
        _reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let invalid = || StreamError::invalid_value(self.info.name.as_str(), format!("bad flags {node}"));
        let value = match node {
            Value::Array(items) => items.iter().try_fold(0u64, |acc, item| {
                let mask = match item {
                    Value::String(name) => self.flag_mask(name),
                    Value::Number(n) => n.as_u64(),
                    _ => None,
                };
                mask.map(|m| acc | m)
            }),
            Value::Number(n) => n.as_u64(),
            Value::String(text) => self.parse_value(text),
            _ => None,
        }
        .ok_or_else(invalid)?;
        unsafe { self.write_raw(data, value) };
        Ok(())
    }

    fn as_bitfield(&self) -> Option<&BitfieldType> {
        Some(self)
    }
}
