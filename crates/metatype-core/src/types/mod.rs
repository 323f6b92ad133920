//! The type contract and every type kind.
//!
//! A [`Type`] is a process-lifetime metadata object that knows how to construct,
//! destruct, copy, compare, print, parse and serialize instances of one data type
//! laid out in raw memory. Callers hold types as [`TypeRef`] and never need the
//! concrete Rust type of the data they manipulate.
//!
//! # Kinds
//!
//! | Kind | Implementation |
//! |------|----------------|
//! | Simple scalars, strings, names | [`SimpleType`] |
//! | Enumerations | [`EnumType`] |
//! | Flag sets | [`BitfieldType`] |
//! | Classes with properties and functions | [`ClassType`] |
//! | Dynamic and fixed-size arrays | [`ArrayType`] |
//! | Strong and weak object handles | [`HandleType`] |
//! | Class references | [`ClassRefType`] |
//! | External resource references | [`ResourceRefType`] |
//! | Function-pointer driven types | [`CustomType`] |
//!
//! # Memory contract
//!
//! Every `unsafe` method takes pointers to memory that is valid for reads (and
//! writes where mutable), aligned to [`Type::align`] and at least [`Type::size`]
//! bytes long. `construct` expects zeroed memory; every other operation expects
//! memory that was constructed by the same type and not yet destructed.

mod array;
mod bitfield;
mod class;
mod class_ref;
mod custom;
mod enum_type;
mod handle;
mod resource_ref;
mod simple;

pub use array::{ArrayBuffer, ArrayKind, ArrayType};
pub use bitfield::{BitfieldFlag, BitfieldType};
pub use class::{ClassLifecycle, ClassType, FieldDef, MemberSnapshot, NativeLifecycle};
pub use class_ref::{ClassRef, ClassRefType};
pub use custom::{CustomType, CustomTypeFuncs};
pub use enum_type::{EnumOption, EnumType};
pub use handle::HandleType;
pub use resource_ref::{ResourceRef, ResourceRefType};
pub use simple::{Scalar, SimpleKind, SimpleType, SimpleValue, VoidType};
pub(crate) use simple::{
    read_scalar, read_text as read_simple_text, write_scalar, write_text as write_simple_text,
};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde_json::Value;
use ustr::Ustr;
use xxhash_rust::xxh64::xxh64;

use crate::error::StreamError;
use crate::stream::{BinaryReader, BinaryWriter, TextReader, TextWriter};
use crate::type_hash::{NativeTypeHash, TypeHash};

/// Shared handle to a registered type.
pub type TypeRef = Arc<dyn Type>;

/// The closed set of type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaType {
    /// No value.
    Void,
    /// Scalars, strings and interned names.
    Simple,
    /// Named integer options.
    Enum,
    /// Named bit flags.
    Bitfield,
    /// Classes with properties.
    Class,
    /// Dynamic or fixed-size arrays.
    Array,
    /// Owning object handle.
    StrongHandle,
    /// Non-owning object handle.
    WeakHandle,
    /// Reference to an external resource.
    ResourceRef,
    /// Reference to a class type.
    ClassRef,
    /// Function-pointer driven type.
    Custom,
}

impl MetaType {
    /// Human readable kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            MetaType::Void => "void",
            MetaType::Simple => "simple",
            MetaType::Enum => "enum",
            MetaType::Bitfield => "bitfield",
            MetaType::Class => "class",
            MetaType::Array => "array",
            MetaType::StrongHandle => "strong handle",
            MetaType::WeakHandle => "weak handle",
            MetaType::ResourceRef => "resource reference",
            MetaType::ClassRef => "class reference",
            MetaType::Custom => "custom",
        }
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Capabilities of a type that let generic code skip work.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeTraits: u32 {
        /// All-zero memory is a valid initial value.
        const ZERO_INIT = 1 << 0;
        /// `construct` must run after zeroing.
        const NEEDS_CONSTRUCTOR = 1 << 1;
        /// `destruct` must run before the memory is released.
        const NEEDS_DESTRUCTOR = 1 << 2;
        /// A byte copy is a valid copy.
        const TRIVIALLY_COPYABLE = 1 << 3;
        /// A byte compare is a valid comparison.
        const TRIVIALLY_COMPARABLE = 1 << 4;
        /// `hash_value` is meaningful.
        const HASHABLE = 1 << 5;
        /// Defined at runtime rather than bound to a native type.
        const SCRIPTED = 1 << 6;
    }
}

impl TypeTraits {
    /// Traits of plain old data.
    pub const POD: TypeTraits = TypeTraits::ZERO_INIT
        .union(TypeTraits::TRIVIALLY_COPYABLE)
        .union(TypeTraits::TRIVIALLY_COMPARABLE)
        .union(TypeTraits::HASHABLE);

    /// Traits of a value owning heap resources.
    pub const MANAGED: TypeTraits =
        TypeTraits::NEEDS_CONSTRUCTOR.union(TypeTraits::NEEDS_DESTRUCTOR);
}

/// Identity and layout shared by every kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Registered name.
    pub name: Ustr,
    /// Hash of the name.
    pub hash: TypeHash,
    /// Kind tag.
    pub meta: MetaType,
    /// Size of one instance in bytes.
    pub size: usize,
    /// Alignment of one instance in bytes.
    pub align: usize,
    /// Capability flags.
    pub traits: TypeTraits,
    /// Identity of the bound Rust type, if any.
    pub native: Option<NativeTypeHash>,
}

impl TypeInfo {
    /// Create type info for a named type.
    pub fn new(name: &str, meta: MetaType, size: usize, align: usize, traits: TypeTraits) -> Self {
        Self {
            name: Ustr::from(name),
            hash: TypeHash::from_name(name),
            meta,
            size,
            align: align.max(1),
            traits,
            native: None,
        }
    }

    /// Create type info whose layout comes from the Rust type `T`.
    pub fn native<T: 'static>(name: &str, meta: MetaType, traits: TypeTraits) -> Self {
        let mut info = Self::new(
            name,
            meta,
            std::mem::size_of::<T>(),
            std::mem::align_of::<T>(),
            traits,
        );
        info.native = Some(NativeTypeHash::of::<T>());
        info
    }
}

/// The contract every type kind implements.
///
/// The lifecycle defaults describe a type that opts out: zeroed memory is a valid
/// value, destruction is a no-op and copy/compare work on raw bytes.
pub trait Type: Any + Send + Sync + fmt::Debug {
    /// Identity and layout.
    fn info(&self) -> &TypeInfo;

    /// Borrow as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert a shared handle into [`Any`] for downcasting.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Registered name.
    fn name(&self) -> Ustr {
        self.info().name
    }

    /// Kind tag.
    fn meta_type(&self) -> MetaType {
        self.info().meta
    }

    /// Size in bytes.
    fn size(&self) -> usize {
        self.info().size
    }

    /// Alignment in bytes.
    fn align(&self) -> usize {
        self.info().align
    }

    /// Capability flags.
    fn traits(&self) -> TypeTraits {
        self.info().traits
    }

    /// Initialize zeroed memory into a valid default value.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn construct(&self, _data: *mut u8) {}

    /// Release resources owned by a value.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn destruct(&self, _data: *mut u8) {}

    /// Assign `src` into the already constructed `dst`.
    ///
    /// # Safety
    /// See the module level memory contract. `dst` and `src` must not overlap.
    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        unsafe { std::ptr::copy_nonoverlapping(src, dst, self.size()) }
    }

    /// Compare two values for equality.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        unsafe { raw_bytes(a, self.size()) == raw_bytes(b, self.size()) }
    }

    /// Hash a value.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        unsafe { xxh64(raw_bytes(data, self.size()), 0) }
    }

    /// Append a human readable form of the value.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn print(&self, data: *const u8, out: &mut String);

    /// Parse the form produced by [`Type::print`] into a constructed value.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool;

    /// Write the value to a binary stream.
    ///
    /// `default` points to the baseline value used to omit unchanged members.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        default: Option<*const u8>,
    ) -> Result<(), StreamError>;

    /// Read a value written by [`Type::write_binary`] into constructed memory.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError>;

    /// Convert the value into a text tree node.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn write_text(
        &self,
        writer: &mut TextWriter,
        data: *const u8,
        default: Option<*const u8>,
    ) -> Result<Value, StreamError>;

    /// Read a text tree node into constructed memory.
    ///
    /// # Safety
    /// See the module level memory contract.
    unsafe fn read_text(
        &self,
        reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError>;

    /// Drop references to other types so reference cycles can be freed.
    fn release_type_refs(&self) {}

    /// Scalar kind, for simple types.
    fn as_simple(&self) -> Option<SimpleKind> {
        None
    }

    /// Downcast to an enum type.
    fn as_enum(&self) -> Option<&EnumType> {
        None
    }

    /// Downcast to a bitfield type.
    fn as_bitfield(&self) -> Option<&BitfieldType> {
        None
    }

    /// Downcast to a class type.
    fn as_class(&self) -> Option<&ClassType> {
        None
    }

    /// Downcast to an array type.
    fn as_array(&self) -> Option<&ArrayType> {
        None
    }

    /// Downcast to a handle type.
    fn as_handle(&self) -> Option<&HandleType> {
        None
    }

    /// Downcast to a class reference type.
    fn as_class_ref(&self) -> Option<&ClassRefType> {
        None
    }

    /// Downcast to a resource reference type.
    fn as_resource_ref(&self) -> Option<&ResourceRefType> {
        None
    }

    /// Downcast to a custom type.
    fn as_custom(&self) -> Option<&CustomType> {
        None
    }
}

/// Identity comparison of two types.
#[inline]
pub fn same_type(a: &dyn Type, b: &dyn Type) -> bool {
    std::ptr::addr_eq(a as *const dyn Type, b as *const dyn Type)
}

/// Recover the concrete class handle behind a [`TypeRef`].
pub fn class_arc(ty: &TypeRef) -> Option<Arc<ClassType>> {
    Arc::clone(ty).into_any().downcast::<ClassType>().ok()
}

/// Distance between consecutive array elements of `ty`.
#[inline]
pub fn stride_of(ty: &dyn Type) -> usize {
    let align = ty.align();
    ty.size().div_ceil(align) * align
}

/// Render a value with [`Type::print`].
///
/// # Safety
/// `data` must hold a constructed value of `ty`.
pub unsafe fn print_to_string(ty: &dyn Type, data: *const u8) -> String {
    let mut out = String::new();
    unsafe { ty.print(data, &mut out) };
    out
}

/// # Safety
/// `data` must be valid for `len` initialized bytes.
unsafe fn raw_bytes<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

pub(crate) unsafe fn construct_native<T: Default>(data: *mut u8) {
    unsafe { std::ptr::write(data.cast::<T>(), T::default()) }
}

pub(crate) unsafe fn destruct_native<T>(data: *mut u8) {
    unsafe { std::ptr::drop_in_place(data.cast::<T>()) }
}

pub(crate) unsafe fn copy_native<T: Clone>(dst: *mut u8, src: *const u8) {
    unsafe { (*dst.cast::<T>()).clone_from(&*src.cast::<T>()) }
}

pub(crate) unsafe fn compare_native<T: PartialEq>(a: *const u8, b: *const u8) -> bool {
    unsafe { *a.cast::<T>() == *b.cast::<T>() }
}

fn hex_encode(bytes: &[u8], out: &mut String) {
    use std::fmt::Write;
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_traits_are_zero_init() {
        assert!(TypeTraits::POD.contains(TypeTraits::ZERO_INIT));
        assert!(!TypeTraits::POD.contains(TypeTraits::NEEDS_DESTRUCTOR));
        assert!(TypeTraits::MANAGED.contains(TypeTraits::NEEDS_CONSTRUCTOR));
    }

    #[test]
    fn type_info_native_layout() {
        let info = TypeInfo::native::<u64>("uint64", MetaType::Simple, TypeTraits::POD);
        assert_eq!(info.size, 8);
        assert_eq!(info.align, 8);
        assert_eq!(info.native, Some(NativeTypeHash::of::<u64>()));
        assert_eq!(info.hash, TypeHash::from_name("uint64"));
    }

    #[test]
    fn zero_sized_types_keep_nonzero_alignment() {
        let info = TypeInfo::new("void", MetaType::Void, 0, 0, TypeTraits::POD);
        assert_eq!(info.align, 1);
    }

    #[test]
    fn hex_round_trip() {
        let mut out = String::new();
        hex_encode(&[0x00, 0xab, 0x10], &mut out);
        assert_eq!(out, "00ab10");
        assert_eq!(hex_decode(&out), Some(vec![0x00, 0xab, 0x10]));
        assert_eq!(hex_decode("abc"), None);
    }

    #[test]
    fn meta_type_names() {
        assert_eq!(MetaType::StrongHandle.to_string(), "strong handle");
        assert_eq!(MetaType::Class.as_str(), "class");
    }
}
