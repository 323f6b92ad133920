//! Runtime type and reflection core.
//!
//! Every data type the host application uses is described at runtime by a
//! [`Type`]: a metadata object that constructs, destroys, copies, compares,
//! prints, parses and serializes values laid out in raw memory. Classes add
//! offset-addressed [`Property`] reflection and type-erased [`Function`] calls.
//!
//! ## Modules
//!
//! - [`types`]: the [`Type`] contract and every kind
//! - [`property`] / [`function`]: member reflection attached to classes
//! - [`storage`]: owned, typed memory blocks
//! - [`object`]: heap objects and strong/weak handles
//! - [`stream`]: binary and text codecs with schema evolution
//! - [`convert`]: value conversion between types
//! - [`resolver`]: the name lookup seam implemented by the registry
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use metatype_core::{ClassType, DataBlob, FieldDef, SimpleType, TypeRef};
//! use metatype_core::stream::{save_text, TextWriterOptions};
//!
//! let int: TypeRef = Arc::new(SimpleType::<i32>::new());
//! let point = ClassType::new_runtime(
//!     "Point",
//!     None,
//!     vec![FieldDef::new("x", int.clone()), FieldDef::new("y", int)],
//! )
//! .unwrap();
//!
//! let mut value = DataBlob::new(point.clone());
//! let x = point.find_property("x").unwrap();
//! unsafe { x.set(value.as_mut_ptr(), 10i32) };
//! assert_eq!(save_text(&value, TextWriterOptions::default()).unwrap(), r#"{"x":10}"#);
//! ```

pub mod convert;
pub mod error;
pub mod function;
pub mod object;
pub mod property;
pub mod resolver;
pub mod storage;
pub mod stream;
pub mod type_hash;
pub mod types;

pub use convert::convert;
pub use error::{InvokeError, RegistrationError, StreamError};
pub use function::{
    Function, FunctionShim, FunctionSignature, NativeMethod, NativeStatic, ParamBuffer, ParamFlags,
    ParamInfo, ParamLayout,
};
pub use object::{Object, ObjectPtr, ObjectWeakPtr};
pub use property::{Property, PropertyFlags};
pub use resolver::TypeResolver;
pub use storage::{DataBlob, FrozenBlob};
pub use stream::{ErrorCollector, ErrorReporter, LoadEvent, LogReporter, ObjectHooks};
pub use type_hash::{NativeTypeHash, TypeHash};
pub use types::{
    ArrayBuffer, ArrayKind, ArrayType, BitfieldFlag, BitfieldType, ClassLifecycle, ClassRef,
    ClassRefType, ClassType, CustomType, CustomTypeFuncs, EnumOption, EnumType, FieldDef,
    HandleType, MemberSnapshot, MetaType, NativeLifecycle, ResourceRef, ResourceRefType, Scalar,
    SimpleKind, SimpleType, SimpleValue, Type, TypeInfo, TypeRef, TypeTraits, VoidType, class_arc,
    print_to_string, same_type, stride_of,
};

pub use ustr::Ustr;
