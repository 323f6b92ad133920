//! Deterministic hash-based type identity.
//!
//! [`TypeHash`] is a 64-bit hash computed from a type's registered name, so the
//! same name always produces the same identity regardless of registration order.
//! [`NativeTypeHash`] identifies a Rust type through its [`TypeId`] and is used to
//! bridge native values to their reflected type without going through a name.
//!
//! # Examples
//!
//! ```
//! use metatype_core::TypeHash;
//!
//! let a = TypeHash::from_name("int32");
//! let b = TypeHash::from_name("int32");
//! assert_eq!(a, b);
//!
//! let method = TypeHash::from_method(TypeHash::from_name("Point"), "length", &[]);
//! assert_ne!(method, TypeHash::from_name("length"));
//! ```

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
///
/// These keep types, functions and properties apart even when they share a name.
pub mod hash_constants {
    /// Separator constant for path components.
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Domain marker for type hashes.
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for global function hashes.
    pub const FUNCTION: u64 = 0x5ea77ffbcdf5f302;

    /// Domain marker for class method hashes.
    pub const METHOD: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for property hashes.
    pub const PROPERTY: u64 = 0x1a095090689d4647;

    /// Parameter position mixing constants so parameter order matters.
    pub const PARAM_MARKERS: [u64; 8] = [
        0x9e3779b97f4a7c15,
        0xbf58476d1ce4e5b9,
        0x94d049bb133111eb,
        0xd6e8feb86659fd93,
        0xe7037ed1a0b428db,
        0xc6a4a7935bd1e995,
        0x8648dbbc94d49b8d,
        0xa2b48b2c69e0d657,
    ];
}

/// A deterministic 64-bit hash identifying a type, function or property by name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from a registered type name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Create a function hash from its name and parameter type hashes.
    ///
    /// Parameter order matters: `(int32, float)` and `(float, int32)` differ.
    #[inline]
    pub fn from_function(name: &str, param_hashes: &[TypeHash]) -> Self {
        let seed = hash_constants::FUNCTION ^ xxh64(name.as_bytes(), 0);
        TypeHash(mix_params(seed, param_hashes))
    }

    /// Create a method hash from the owning class, method name and parameters.
    #[inline]
    pub fn from_method(owner: TypeHash, name: &str, param_hashes: &[TypeHash]) -> Self {
        let seed = hash_constants::METHOD ^ owner.0 ^ xxh64(name.as_bytes(), 0);
        TypeHash(mix_params(seed, param_hashes))
    }

    /// Create a property hash from the owning class and the property name.
    #[inline]
    pub fn from_property(owner: TypeHash, name: &str) -> Self {
        TypeHash(
            (hash_constants::PROPERTY ^ owner.0)
                .wrapping_mul(hash_constants::SEP)
                .wrapping_add(xxh64(name.as_bytes(), 0)),
        )
    }

    /// Check if this is an empty/invalid hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

fn mix_params(seed: u64, param_hashes: &[TypeHash]) -> u64 {
    let mut hash = seed;
    for (i, param) in param_hashes.iter().enumerate() {
        let marker = hash_constants::PARAM_MARKERS
            .get(i)
            .copied()
            .unwrap_or_else(|| hash_constants::PARAM_MARKERS[0].wrapping_add(i as u64));
        // wrapping_mul keeps the mix non-commutative
        hash = hash.wrapping_mul(hash_constants::SEP).wrapping_add(marker ^ param.0);
    }
    hash
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Identity hash of a native Rust type, computed once from its [`TypeId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NativeTypeHash(pub u64);

impl NativeTypeHash {
    /// Hash of the Rust type `T`.
    #[inline]
    pub fn of<T: 'static>() -> Self {
        Self::of_type_id(TypeId::of::<T>())
    }

    /// Hash of an existing [`TypeId`].
    #[inline]
    pub fn of_type_id(type_id: TypeId) -> Self {
        let mut hasher = FxHasher::default();
        type_id.hash(&mut hasher);
        NativeTypeHash(hasher.finish())
    }
}

impl fmt::Debug for NativeTypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeTypeHash({:#018x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_hash_determinism() {
        assert_eq!(TypeHash::from_name("int32"), TypeHash::from_name("int32"));
        assert_eq!(
            TypeHash::from_name("array<Point>"),
            TypeHash::from_name("array<Point>")
        );
    }

    #[test]
    fn type_hash_uniqueness() {
        let names = ["int32", "int64", "float", "double", "string", "name", "Point"];
        let hashes: Vec<_> = names.iter().map(|n| TypeHash::from_name(n)).collect();
        for i in 0..hashes.len() {
            for j in (i + 1)..hashes.len() {
                assert_ne!(hashes[i], hashes[j], "{} vs {}", names[i], names[j]);
            }
        }
    }

    #[test]
    fn function_hash_parameter_order_matters() {
        let int = TypeHash::from_name("int32");
        let float = TypeHash::from_name("float");
        assert_ne!(
            TypeHash::from_function("mix", &[int, float]),
            TypeHash::from_function("mix", &[float, int])
        );
    }

    #[test]
    fn method_hash_includes_owner() {
        let a = TypeHash::from_method(TypeHash::from_name("A"), "update", &[]);
        let b = TypeHash::from_method(TypeHash::from_name("B"), "update", &[]);
        assert_ne!(a, b);
        assert_ne!(a, TypeHash::from_function("update", &[]));
    }

    #[test]
    fn property_hash_includes_owner() {
        let owner = TypeHash::from_name("Point");
        assert_ne!(
            TypeHash::from_property(owner, "x"),
            TypeHash::from_property(owner, "y")
        );
        assert_ne!(
            TypeHash::from_property(owner, "x"),
            TypeHash::from_property(TypeHash::from_name("Vec3"), "x")
        );
    }

    #[test]
    fn native_hash_distinguishes_types() {
        assert_eq!(NativeTypeHash::of::<i32>(), NativeTypeHash::of::<i32>());
        assert_ne!(NativeTypeHash::of::<i32>(), NativeTypeHash::of::<u32>());
    }

    #[test]
    fn hash_display() {
        let hash = TypeHash(0x1234);
        assert_eq!(format!("{}", hash), "0x0000000000001234");
        assert_eq!(format!("{:?}", hash), "TypeHash(0x0000000000001234)");
        assert!(TypeHash::EMPTY.is_empty());
    }
}
