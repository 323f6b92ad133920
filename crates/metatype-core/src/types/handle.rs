//! Strong and weak object handles.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;

use super::{
    ClassType, MetaType, Type, TypeInfo, TypeTraits, compare_native, construct_native,
    destruct_native,
};
use crate::error::StreamError;
use crate::object::{ObjectPtr, ObjectWeakPtr};
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};

/// A handle to instances of one class or its subclasses.
///
/// Strong handles store an [`ObjectPtr`] and keep the object alive; weak handles
/// store an [`ObjectWeakPtr`] and read as null once the object is gone.
#[derive(Debug)]
pub struct HandleType {
    info: TypeInfo,
    class: Arc<ClassType>,
    weak: bool,
}

impl HandleType {
    /// `handle<C>`
    pub fn new_strong(class: Arc<ClassType>) -> Self {
        let name = format!("handle<{}>", class.name());
        Self {
            info: TypeInfo::native::<ObjectPtr>(&name, MetaType::StrongHandle, Self::TRAITS),
            class,
            weak: false,
        }
    }

    /// `weak<C>`
    pub fn new_weak(class: Arc<ClassType>) -> Self {
        let name = format!("weak<{}>", class.name());
        Self {
            info: TypeInfo::native::<ObjectWeakPtr>(&name, MetaType::WeakHandle, Self::TRAITS),
            class,
            weak: true,
        }
    }

    const TRAITS: TypeTraits = TypeTraits::MANAGED.union(TypeTraits::HASHABLE);

    /// The class the handle points at.
    #[inline]
    pub fn class(&self) -> &Arc<ClassType> {
        &self.class
    }

    #[inline]
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Whether the handle at `data` is null, without touching the object.
    ///
    /// # Safety
    /// `data` must hold a value of this handle type.
    pub unsafe fn is_null(&self, data: *const u8) -> bool {
        if self.weak {
            unsafe { (*data.cast::<ObjectWeakPtr>()).is_null() }
        } else {
            unsafe { (*data.cast::<ObjectPtr>()).is_null() }
        }
    }

    /// Read the handle as an owning pointer.
    ///
    /// # Safety
    /// `data` must hold a value of this handle type.
    pub unsafe fn get(&self, data: *const u8) -> ObjectPtr {
        if self.weak {
            unsafe { (*data.cast::<ObjectWeakPtr>()).upgrade() }
        } else {
            unsafe { (*data.cast::<ObjectPtr>()).clone() }
        }
    }

    /// Point the handle at `object`. Fails when the object's class does not
    /// derive from the handle's class.
    ///
    /// # Safety
    /// `data` must hold a value of this handle type.
    pub unsafe fn set(&self, data: *mut u8, object: &ObjectPtr) -> bool {
        if !self.accepts(object) {
            return false;
        }
        if self.weak {
            unsafe { *data.cast::<ObjectWeakPtr>() = object.downgrade() };
        } else {
            unsafe { *data.cast::<ObjectPtr>() = object.clone() };
        }
        true
    }

    /// Whether `object` may be stored in this handle. Null always may.
    pub fn accepts(&self, object: &ObjectPtr) -> bool {
        object
            .class()
            .is_none_or(|class| class.is(Some(self.class.as_ref())))
    }

    fn incompatible(&self, object: &ObjectPtr) -> StreamError {
        StreamError::invalid_value(
            self.info.name.as_str(),
            format!("{object:?} is not a {}", self.class.name()),
        )
    }
}

impl Type for HandleType {
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
        if self.weak {
            unsafe { construct_native::<ObjectWeakPtr>(data) }
        } else {
            unsafe { construct_native::<ObjectPtr>(data) }
        }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        if self.weak {
            unsafe { destruct_native::<ObjectWeakPtr>(data) }
        } else {
            unsafe { destruct_native::<ObjectPtr>(data) }
        }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        if self.weak {
            unsafe { *dst.cast::<ObjectWeakPtr>() = (*src.cast::<ObjectWeakPtr>()).clone() }
        } else {
            unsafe { *dst.cast::<ObjectPtr>() = (*src.cast::<ObjectPtr>()).clone() }
        }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        if self.weak {
            unsafe { compare_native::<ObjectWeakPtr>(a, b) }
        } else {
            unsafe { compare_native::<ObjectPtr>(a, b) }
        }
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        unsafe { self.get(data) }.addr() as u64
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        let object = unsafe { self.get(data) };
        match object.class() {
            Some(class) => {
                out.push_str(&class.name());
                out.push_str(&format!("@{:#x}", object.addr()));
            }
            None => out.push_str("null"),
        }
    }

    /// Only `null` can be parsed; objects have no textual address.
    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        text.trim() == "null" && unsafe { self.set(data, &ObjectPtr::null()) }
    }

    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        if self.weak {
            writer.write_weak_object(unsafe { &*data.cast::<ObjectWeakPtr>() })
        } else {
            writer.write_object(unsafe { &*data.cast::<ObjectPtr>() })
        }
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let object = reader.read_object(Some(self.class.as_ref()))?;
        unsafe { self.set(data, &object) };
        Ok(())
    }

    unsafe fn write_text(
        &self,
        writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        if self.weak {
            writer.write_weak_object(unsafe { &*data.cast::<ObjectWeakPtr>() })
        } else {
            writer.write_object(unsafe { &*data.cast::<ObjectPtr>() })
        }
    }

    unsafe fn read_text(
        &self,
        reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let object = if self.weak {
            reader
                .read_weak_object(node, Some(self.class.as_ref()))?
                .upgrade()
        } else {
            reader.read_object(node, Some(self.class.as_ref()))?
        };
        if unsafe { self.set(data, &object) } {
            Ok(())
        } else {
            Err(self.incompatible(&object))
        }
    }

    fn as_handle(&self) -> Option<&HandleType> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::storage::DataBlob;
    use crate::types::{FieldDef, SimpleType, TypeRef};

    fn class(name: &str, base: Option<Arc<ClassType>>) -> Arc<ClassType> {
        let int: TypeRef = Arc::new(SimpleType::<i32>::new());
        ClassType::new_runtime(name, base, vec![FieldDef::new("v", int)]).unwrap()
    }

    #[test]
    fn strong_handle_owns_and_weak_expires() {
        let node = class("Node", None);
        let strong: TypeRef = Arc::new(HandleType::new_strong(node.clone()));
        let weak: TypeRef = Arc::new(HandleType::new_weak(node.clone()));
        assert_eq!(strong.name().as_str(), "handle<Node>");
        assert_eq!(weak.name().as_str(), "weak<Node>");

        let object = Object::create(&node);
        let mut s = DataBlob::new(strong.clone());
        let mut w = DataBlob::new(weak.clone());
        let (sh, wh) = (strong.as_handle().unwrap(), weak.as_handle().unwrap());
        unsafe {
            assert!(sh.is_null(s.as_ptr()));
            assert!(sh.set(s.as_mut_ptr(), &object));
            assert!(wh.set(w.as_mut_ptr(), &object));
            assert_eq!(object.strong_count(), 2);
            drop(object);
            assert!(!wh.is_null(w.as_ptr()));
            drop(s);
            assert!(wh.is_null(w.as_ptr()));
            assert!(wh.get(w.as_ptr()).is_null());
        }
    }

    #[test]
    fn set_checks_class_compatibility() {
        let base = class("Base", None);
        let derived = class("Derived", Some(base.clone()));
        let handle = HandleType::new_strong(derived.clone());
        let ty: TypeRef = Arc::new(HandleType::new_strong(base.clone()));
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            assert!(ty.as_handle().unwrap().set(blob.as_mut_ptr(), &Object::create(&derived)));
        }
        assert!(!handle.accepts(&Object::create(&base)));
        assert!(handle.accepts(&ObjectPtr::null()));
    }
}
