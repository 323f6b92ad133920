//! References to external resources.
//!
//! Only the resource key is persisted. The loaded object is resolved through
//! [`TypeResolver::resolve_resource`] when reading and can be re-pointed later
//! with [`ClassType::patch_resource_references`] when the resource reloads.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use ustr::Ustr;

use super::{
    ClassType, MetaType, Type, TypeInfo, TypeTraits, construct_native, copy_native,
    destruct_native,
};
use crate::error::StreamError;
use crate::object::ObjectPtr;
use crate::resolver::TypeResolver;
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};

/// Value of a resource reference.
#[derive(Debug, Clone, Default)]
pub struct ResourceRef {
    /// Key the resource is known by, empty for none.
    pub key: Ustr,
    /// The loaded resource, if any.
    pub resource: ObjectPtr,
}

impl ResourceRef {
    pub fn new(key: &str) -> Self {
        Self {
            key: Ustr::from(key),
            resource: ObjectPtr::null(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// Two references are equal when they name the same resource.
impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ResourceRef {}

/// `resource<C>`: a reference to a resource of class `C`.
#[derive(Debug)]
pub struct ResourceRefType {
    info: TypeInfo,
    class: Arc<ClassType>,
}

impl ResourceRefType {
    pub fn new(class: Arc<ClassType>) -> Self {
        let name = format!("resource<{}>", class.name());
        Self {
            info: TypeInfo::native::<ResourceRef>(
                &name,
                MetaType::ResourceRef,
                TypeTraits::MANAGED | TypeTraits::HASHABLE,
            ),
            class,
        }
    }

    /// Class of the referenced resources.
    #[inline]
    pub fn class(&self) -> &Arc<ClassType> {
        &self.class
    }

    /// # Safety
    /// `data` must hold a value of this type.
    pub unsafe fn get(&self, data: *const u8) -> ResourceRef {
        unsafe { (*data.cast::<ResourceRef>()).clone() }
    }

    /// Point at `key`, attaching `resource` when its class is compatible.
    ///
    /// # Safety
    /// `data` must hold a value of this type.
    pub unsafe fn set(&self, data: *mut u8, key: Ustr, resource: ObjectPtr) -> bool {
        let compatible = resource
            .class()
            .is_none_or(|c| c.is(Some(self.class.as_ref())));
        let target = unsafe { &mut *data.cast::<ResourceRef>() };
        target.key = key;
        target.resource = if compatible { resource } else { ObjectPtr::null() };
        compatible
    }

    unsafe fn load(&self, data: *mut u8, key: &str, resolver: Option<&dyn TypeResolver>) {
        let key = Ustr::from(key);
        let resource = match resolver {
            Some(resolver) if !key.is_empty() => resolver.resolve_resource(&self.class, key),
            _ => ObjectPtr::null(),
        };
        if !unsafe { self.set(data, key, resource) } {
            tracing::debug!(key = %key, class = %self.class.name().as_str(), "resolved resource has an incompatible class");
        }
    }
}

impl Type for ResourceRefType {
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
        unsafe { construct_native::<ResourceRef>(data) }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        unsafe { destruct_native::<ResourceRef>(data) }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        unsafe { copy_native::<ResourceRef>(dst, src) }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        unsafe { *a.cast::<ResourceRef>() == *b.cast::<ResourceRef>() }
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        unsafe { (*data.cast::<ResourceRef>()).key.precomputed_hash() }
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        out.push_str(unsafe { &(*data.cast::<ResourceRef>()).key });
    }

    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        unsafe { self.load(data, text.trim(), None) };
        true
    }

    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        writer.write_str(unsafe { &(*data.cast::<ResourceRef>()).key });
        Ok(())
    }

    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let key = reader.read_str()?;
        unsafe { self.load(data, key, Some(reader.resolver())) };
        Ok(())
    }

    unsafe fn write_text(
        &self,
        _writer: &mut TextWriter,
        data: *const u8,
        _default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        let key = unsafe { (*data.cast::<ResourceRef>()).key };
        Ok(if key.is_empty() {
            Value::Null
        } else {
            Value::String(key.to_string())
        })
    }

    unsafe fn read_text(
        &self,
        reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let key = match node {
            Value::Null => "",
            Value::String(key) => key.as_str(),
            other => {
                return Err(StreamError::MalformedText(format!(
                    "expected resource key, found {other}"
                )));
            }
        };
        unsafe { self.load(data, key, reader.resolver()) };
        Ok(())
    }

    fn as_resource_ref(&self) -> Option<&ResourceRefType> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::storage::DataBlob;
    use crate::stream::{value_from_text, value_to_text};
    use crate::types::{FieldDef, SimpleType, TypeRef};

    fn texture() -> Arc<ClassType> {
        let int: TypeRef = Arc::new(SimpleType::<i32>::new());
        ClassType::new_runtime("Texture", None, vec![FieldDef::new("width", int)]).unwrap()
    }

    #[test]
    fn equality_is_by_key() {
        let class = texture();
        let mut a = ResourceRef::new("stone.png");
        let b = ResourceRef::new("stone.png");
        a.resource = Object::create(&class);
        assert_eq!(a, b);
        assert_ne!(a, ResourceRef::new("grass.png"));
    }

    #[test]
    fn text_holds_only_the_key() {
        let class = texture();
        let ty: TypeRef = Arc::new(ResourceRefType::new(class.clone()));
        assert_eq!(ty.name().as_str(), "resource<Texture>");
        let reference = ty.as_resource_ref().unwrap();
        let mut blob = DataBlob::new(ty.clone());
        unsafe {
            assert_eq!(value_to_text(ty.as_ref(), blob.as_ptr()).unwrap(), Value::Null);
            assert!(reference.set(blob.as_mut_ptr(), Ustr::from("a.png"), Object::create(&class)));
            let node = value_to_text(ty.as_ref(), blob.as_ptr()).unwrap();
            assert_eq!(node, Value::String("a.png".into()));

            let mut loaded = DataBlob::new(ty.clone());
            value_from_text(ty.as_ref(), &node, loaded.as_mut_ptr(), None).unwrap();
            let value = reference.get(loaded.as_ptr());
            assert_eq!(value.key.as_str(), "a.png");
            assert!(value.resource.is_null());
        }
    }
}
