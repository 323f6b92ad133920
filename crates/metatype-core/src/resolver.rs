//! Name and identity lookup used while reading data.

use std::sync::Arc;

use ustr::Ustr;

use crate::object::ObjectPtr;
use crate::type_hash::NativeTypeHash;
use crate::types::{ClassType, TypeRef, class_arc};

/// Resolves names found in serialized data back to live types.
///
/// Implemented by the type registry. Streams, conversions and typed accessors
/// only ever see this seam, never the registry itself.
pub trait TypeResolver {
    /// Find a type by name, synthesizing compound names on demand.
    fn find_type(&self, name: &str) -> Option<TypeRef>;

    /// Find the type bound to a Rust type.
    fn find_native(&self, hash: NativeTypeHash) -> Option<TypeRef>;

    /// Find a class by name.
    fn find_class(&self, name: &str) -> Option<Arc<ClassType>> {
        self.find_type(name).as_ref().and_then(class_arc)
    }

    /// Find the type bound to `T`.
    fn find_native_of<T: 'static>(&self) -> Option<TypeRef>
    where
        Self: Sized,
    {
        self.find_native(NativeTypeHash::of::<T>())
    }

    /// Load the external resource named `key`.
    ///
    /// Resource loading lives outside the type system; the default resolves
    /// nothing and resource references keep only their key.
    fn resolve_resource(&self, _class: &ClassType, _key: Ustr) -> ObjectPtr {
        ObjectPtr::null()
    }
}
