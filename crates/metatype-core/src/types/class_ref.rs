//! References to class types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{ClassType, MetaType, Type, TypeInfo, TypeTraits, construct_native, destruct_native};
use crate::error::StreamError;
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};

/// Value of a class reference: a class or nothing.
#[derive(Clone, Default)]
pub struct ClassRef(pub Option<Arc<ClassType>>);

impl ClassRef {
    pub fn new(class: Arc<ClassType>) -> Self {
        Self(Some(class))
    }

    #[inline]
    pub fn class(&self) -> Option<&Arc<ClassType>> {
        self.0.as_ref()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    fn addr(&self) -> usize {
        self.0.as_ref().map_or(0, |c| Arc::as_ptr(c) as usize)
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ClassRef {}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(class) => write!(f, "ClassRef({})", class.name()),
            None => f.write_str("ClassRef(null)"),
        }
    }
}

/// A class reference constrained to a base class, or to any class.
#[derive(Debug)]
pub struct ClassRefType {
    info: TypeInfo,
    base: Option<Arc<ClassType>>,
}

impl ClassRefType {
    /// Name of the unconstrained class reference type.
    pub const ANY_NAME: &'static str = "ClassRef";

    /// `class<C>`, or [`ClassRefType::ANY_NAME`] without a base.
    pub fn new(base: Option<Arc<ClassType>>) -> Self {
        let name = match &base {
            Some(class) => format!("class<{}>", class.name()),
            None => Self::ANY_NAME.to_owned(),
        };
        Self {
            info: TypeInfo::native::<ClassRef>(
                &name,
                MetaType::ClassRef,
                TypeTraits::MANAGED | TypeTraits::HASHABLE,
            ),
            base,
        }
    }

    /// Classes stored here must derive from this one.
    #[inline]
    pub fn base(&self) -> Option<&Arc<ClassType>> {
        self.base.as_ref()
    }

    pub fn accepts(&self, class: Option<&ClassType>) -> bool {
        class.is_none_or(|c| c.is(self.base.as_deref()))
    }

    /// # Safety
    /// `data` must hold a value of this type.
    pub unsafe fn get(&self, data: *const u8) -> Option<Arc<ClassType>> {
        unsafe { (*data.cast::<ClassRef>()).0.clone() }
    }

    /// Store `class`, failing if it does not derive from [`ClassRefType::base`].
    ///
    /// # Safety
    /// `data` must hold a value of this type.
    pub unsafe fn set(&self, data: *mut u8, class: Option<Arc<ClassType>>) -> bool {
        if !self.accepts(class.as_deref()) {
            return false;
        }
        unsafe { (*data.cast::<ClassRef>()).0 = class };
        true
    }

    /// # Safety
    /// `data` must hold a value of this type.
    unsafe fn store_named(
        &self,
        data: *mut u8,
        name: Option<&str>,
        find: impl FnOnce(&str) -> Option<Arc<ClassType>>,
    ) -> Result<(), StreamError> {
        let class = match name {
            None | Some("") => None,
            Some(name) => Some(find(name).ok_or_else(|| StreamError::UnknownType(name.to_owned()))?),
        };
        if unsafe { self.set(data, class) } {
            Ok(())
        } else {
            Err(StreamError::invalid_value(
                self.info.name.as_str(),
                format!("{} does not derive from the reference base", name.unwrap_or_default()),
            ))
        }
    }
}

impl Type for ClassRefType {
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
        unsafe { construct_native::<ClassRef>(data) }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        unsafe { destruct_native::<ClassRef>(data) }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        unsafe { *dst.cast::<ClassRef>() = (*src.cast::<ClassRef>()).clone() }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        unsafe { *a.cast::<ClassRef>() == *b.cast::<ClassRef>() }
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        unsafe { (*data.cast::<ClassRef>()).addr() as u64 }
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        match unsafe { self.get(data) } {
            Some(class) => out.push_str(&class.name()),
            None => out.push_str("null"),
        }
    }

    /// Without a resolver only `null` and the base class itself can be parsed.
    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        let text = text.trim();
        if text == "null" || text.is_empty() {
            return unsafe { self.set(data, None) };
        }
        match &self.base {
            Some(base) if base.name().as_str() == text => unsafe { self.set(data, Some(base.clone())) },
            _ => false,
        }
    }

    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        match unsafe { self.get(data) } {
            Some(class) => writer.write_str(&class.name()),
            None => writer.write_str(""),
        }
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let name = reader.read_str()?;
        let resolver = reader.resolver();
        unsafe { self.store_named(data, Some(name), |n| resolver.find_class(n)) }
    }

    unsafe fn write_text(
        &self,
        _writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        Ok(match unsafe { self.get(data) } {
            Some(class) => Value::String(class.name().to_string()),
            None => Value::Null,
        })
    }

    unsafe fn read_text(
        &self,
        reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let name = match node {
            Value::Null => None,
            Value::String(name) => Some(name.as_str()),
            other => {
                return Err(StreamError::MalformedText(format!(
                    "expected class name, found {other}"
                )));
            }
        };
        let resolver = match name {
            Some(n) if !n.is_empty() => Some(reader.require_resolver(n)?),
            _ => None,
        };
        unsafe { self.store_named(data, name, |n| resolver.and_then(|r| r.find_class(n))) }
    }

    fn as_class_ref(&self) -> Option<&ClassRefType> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DataBlob;
    use crate::types::{TypeRef, print_to_string};

    #[test]
    fn constrained_reference_rejects_unrelated_classes() {
        let shape = ClassType::new_abstract("Shape", 0, 1);
        let circle = ClassType::new_abstract("Circle", 0, 1);
        circle.set_base(shape.clone()).unwrap();
        let other = ClassType::new_abstract("Other", 0, 1);

        let ty: TypeRef = Arc::new(ClassRefType::new(Some(shape.clone())));
        assert_eq!(ty.name().as_str(), "class<Shape>");
        let reference = ty.as_class_ref().unwrap();
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            assert!(reference.get(blob.as_ptr()).is_none());
            assert!(reference.set(blob.as_mut_ptr(), Some(circle.clone())));
            assert_eq!(print_to_string(ty.as_ref(), blob.as_ptr()), "Circle");
            assert!(!reference.set(blob.as_mut_ptr(), Some(other)));
            assert!(reference.get(blob.as_ptr()).is_some());
        }
    }

    #[test]
    fn unconstrained_reference_accepts_anything() {
        let ty = ClassRefType::new(None);
        assert_eq!(ty.name().as_str(), ClassRefType::ANY_NAME);
        assert!(ty.accepts(Some(&ClassType::new_abstract("Any", 0, 1))));
        assert!(ty.accepts(None));
    }
}
