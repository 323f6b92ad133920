//! A single boxed value of any registered type.

use std::fmt;

use metatype_core::{
    DataBlob, NativeTypeHash, Type, TypeRef, TypeResolver, convert, print_to_string, same_type,
};

/// One owned value together with its type, or nothing.
///
/// Reads and writes go through [`convert`], so a variant holding an `int32`
/// can be read as a `float` or a `string`.
#[derive(Default, Clone, PartialEq)]
pub struct Variant {
    value: Option<DataBlob>,
}

impl Variant {
    /// An empty variant.
    pub fn new() -> Self {
        Self::default()
    }

    /// A default-constructed value of `ty`.
    pub fn with_type(ty: TypeRef) -> Self {
        Self {
            value: Some(DataBlob::new(ty)),
        }
    }

    /// A copy of the value at `data`.
    ///
    /// # Safety
    /// `data` must hold a constructed value of `ty`.
    pub unsafe fn from_raw(ty: TypeRef, data: *const u8) -> Self {
        Self {
            value: Some(unsafe { DataBlob::copy_of(ty, data) }),
        }
    }

    /// Box a native value. Fails when `T` is not bound to a type.
    pub fn from_value<T: 'static>(resolver: &dyn TypeResolver, value: T) -> Option<Self> {
        native_blob(resolver, value).map(Self::from)
    }

    /// Parse `text` as a value of `ty`.
    pub fn parse(ty: TypeRef, text: &str) -> Option<Self> {
        let mut blob = DataBlob::new(ty.clone());
        // SAFETY: the blob holds a constructed value of `ty`.
        unsafe { ty.parse(text, blob.as_mut_ptr()) }.then(|| Self::from(blob))
    }

    /// Drop the held value and hold a default-constructed value of `ty` instead.
    pub fn reset(&mut self, ty: Option<TypeRef>) {
        self.value = ty.map(DataBlob::new);
    }

    /// Drop the held value and hold a copy of the value at `data` instead.
    ///
    /// # Safety
    /// `data` must hold a constructed value of `ty`.
    pub unsafe fn reset_with(&mut self, ty: TypeRef, data: *const u8) {
        self.value = Some(unsafe { DataBlob::copy_of(ty, data) });
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn ty(&self) -> Option<&TypeRef> {
        self.value.as_ref().map(DataBlob::ty)
    }

    pub fn data(&self) -> Option<*const u8> {
        self.value.as_ref().map(DataBlob::as_ptr)
    }

    pub fn data_mut(&mut self) -> Option<*mut u8> {
        self.value.as_mut().map(DataBlob::as_mut_ptr)
    }

    pub fn as_blob(&self) -> Option<&DataBlob> {
        self.value.as_ref()
    }

    pub fn into_blob(self) -> Option<DataBlob> {
        self.value
    }

    /// Store the value at `src`, converting it into the held type.
    ///
    /// An empty variant adopts `src_ty`.
    ///
    /// # Safety
    /// `src` must hold a constructed value of `src_ty`.
    pub unsafe fn set_raw(&mut self, src: *const u8, src_ty: &TypeRef) -> bool {
        match &mut self.value {
            Some(blob) => {
                let ty = blob.ty().clone();
                unsafe { convert(src, src_ty.as_ref(), blob.as_mut_ptr(), ty.as_ref()) }
            }
            None => {
                self.value = Some(unsafe { DataBlob::copy_of(src_ty.clone(), src) });
                true
            }
        }
    }

    /// Store another variant's value, converting it into the held type.
    pub fn set_variant(&mut self, other: &Variant) -> bool {
        match &other.value {
            // SAFETY: the blob holds a constructed value of its type.
            Some(blob) => unsafe { self.set_raw(blob.as_ptr(), blob.ty()) },
            None => {
                self.value = None;
                true
            }
        }
    }

    /// Store a native value, converting it into the held type.
    pub fn set<T: 'static>(&mut self, resolver: &dyn TypeResolver, value: T) -> bool {
        match native_blob(resolver, value) {
            // SAFETY: the blob holds a constructed value of its type.
            Some(blob) => unsafe { self.set_raw(blob.as_ptr(), blob.ty()) },
            None => false,
        }
    }

    /// Convert the held value into `dst`.
    ///
    /// # Safety
    /// `dst` must hold a constructed value of `dst_ty`.
    pub unsafe fn get_raw(&self, dst: *mut u8, dst_ty: &dyn Type) -> bool {
        match &self.value {
            Some(blob) => unsafe { convert(blob.as_ptr(), blob.ty().as_ref(), dst, dst_ty) },
            None => false,
        }
    }

    /// Read the held value as `T`, converting when the types differ.
    pub fn get<T: Clone + 'static>(&self, resolver: &dyn TypeResolver) -> Option<T> {
        let blob = self.value.as_ref()?;
        // SAFETY: the blob holds a constructed value of its type.
        unsafe { read_converted(resolver, blob.ty().as_ref(), blob.as_ptr()) }
    }

    /// Render the held value with its type's printer. Empty variants print nothing.
    pub fn print(&self) -> String {
        match &self.value {
            // SAFETY: the blob holds a constructed value of its type.
            Some(blob) => unsafe { print_to_string(blob.ty().as_ref(), blob.as_ptr()) },
            None => String::new(),
        }
    }

    /// True when both variants hold the same type.
    pub fn same_type_as(&self, other: &Variant) -> bool {
        match (self.ty(), other.ty()) {
            (Some(a), Some(b)) => same_type(a.as_ref(), b.as_ref()),
            (None, None) => true,
            _ => false,
        }
    }
}

impl From<DataBlob> for Variant {
    fn from(blob: DataBlob) -> Self {
        Self { value: Some(blob) }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print())
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(blob) => write!(f, "Variant({}: {})", blob.ty().name(), self.print()),
            None => f.write_str("Variant(empty)"),
        }
    }
}

/// Box `value` in a blob of the type bound to `T`.
pub(crate) fn native_blob<T: 'static>(resolver: &dyn TypeResolver, value: T) -> Option<DataBlob> {
    let ty = resolver.find_native(NativeTypeHash::of::<T>())?;
    let mut blob = DataBlob::new(ty);
    // SAFETY: types bound to `T` lay their values out as `T`, and the blob holds
    // a constructed one.
    unsafe { *blob.as_mut_ptr().cast::<T>() = value };
    Some(blob)
}

/// Read the value at `data` as `T`, converting through the type bound to `T`.
///
/// # Safety
/// `data` must hold a constructed value of `ty`.
pub(crate) unsafe fn read_converted<T: Clone + 'static>(
    resolver: &dyn TypeResolver,
    ty: &dyn Type,
    data: *const u8,
) -> Option<T> {
    if ty.info().native == Some(NativeTypeHash::of::<T>()) {
        return Some(unsafe { (*data.cast::<T>()).clone() });
    }
    let target = resolver.find_native(NativeTypeHash::of::<T>())?;
    let mut blob = DataBlob::new(target.clone());
    if !unsafe { convert(data, ty, blob.as_mut_ptr(), target.as_ref()) } {
        return None;
    }
    Some(unsafe { (*blob.as_ptr().cast::<T>()).clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metatype_registry::TypeRegistry;

    #[test]
    fn empty_variants() {
        let empty = Variant::new();
        assert!(empty.is_empty());
        assert_eq!(empty.print(), "");
        assert_eq!(empty, Variant::default());
        assert_eq!(format!("{empty:?}"), "Variant(empty)");
    }

    #[test]
    fn reset_constructs_default() {
        let registry = TypeRegistry::with_builtins();
        let mut value = Variant::new();
        value.reset(registry.find("int32"));
        assert_eq!(value.get::<i32>(&registry), Some(0));
        value.reset(None);
        assert!(value.is_empty());
    }

    #[test]
    fn set_and_get_convert() {
        let registry = TypeRegistry::with_builtins();
        let mut value = Variant::with_type(registry.find("int32").unwrap());
        assert!(value.set(&registry, 7u8));
        assert_eq!(value.get::<i32>(&registry), Some(7));
        assert_eq!(value.get::<f32>(&registry), Some(7.0));
        assert_eq!(value.get::<String>(&registry).as_deref(), Some("7"));
        assert!(value.set(&registry, "42".to_string()));
        assert_eq!(value.get::<i64>(&registry), Some(42));
    }

    #[test]
    fn empty_variant_adopts_type() {
        let registry = TypeRegistry::with_builtins();
        let mut value = Variant::new();
        assert!(value.set(&registry, 2.5f64));
        assert_eq!(value.ty().unwrap().name().as_str(), "double");
        assert_eq!(value.print(), "2.5");
    }

    #[test]
    fn equality_needs_same_type() {
        let registry = TypeRegistry::with_builtins();
        let a = Variant::from_value(&registry, 3i32).unwrap();
        let b = Variant::from_value(&registry, 3i32).unwrap();
        let c = Variant::from_value(&registry, 3i64).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.same_type_as(&c));
    }

    #[test]
    fn parse_by_type() {
        let registry = TypeRegistry::with_builtins();
        let value = Variant::parse(registry.find("float").unwrap(), "1.25").unwrap();
        assert_eq!(value.get::<f32>(&registry), Some(1.25));
        assert!(Variant::parse(registry.find("int32").unwrap(), "abc").is_none());
    }
}
