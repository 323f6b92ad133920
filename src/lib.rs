//! Runtime type and reflection engine.
//!
//! Every data type the host uses is described at runtime by a [`Type`]: simple
//! scalars, classes, enums, bitfields, arrays, object handles, class and resource
//! references and function-pointer driven custom types. A type knows how to
//! construct, destroy, copy, compare, print, parse and serialize its values,
//! so generic code never needs the concrete Rust type.
//!
//! | Crate | Provides |
//! |-------|----------|
//! | `metatype-core` | the type contract and kinds, reflection, conversion, streams |
//! | `metatype-registry` | [`TypeRegistry`] and the registration builders |
//! | `metatype-data` | [`Variant`], [`VariantTable`], [`TypedMemory`] |
//!
//! # Example
//!
//! ```
//! use metatype::prelude::*;
//!
//! # fn main() -> metatype::Result<()> {
//! let types = metatype::type_system()?;
//! let point = types
//!     .class("Point")
//!     .field("x", "int32")?
//!     .field("y", "int32")?
//!     .build()?;
//!
//! let mut value = DataBlob::new(point);
//! TypedMemory::of_blob(&mut value).set_path_text("x", "10");
//! assert_eq!(save_text(&value, TextWriterOptions::default())?, r#"{"x":10}"#);
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::{Error, Result};

pub use metatype_core as core;
pub use metatype_data as data;
pub use metatype_registry as registry;

pub use metatype_core::{DataBlob, Type, TypeRef, convert};
pub use metatype_data::{DataViewResult, TypedMemory, Variant, VariantTable};
pub use metatype_registry::TypeRegistry;

pub mod prelude {
    pub use metatype_core::stream::{
        BinaryWriterOptions, TextWriterOptions, load_binary, load_object_binary,
        load_object_text, load_text, save_binary, save_object_binary, save_object_text,
        save_text,
    };
    pub use metatype_core::{
        ClassType, DataBlob, ErrorCollector, ErrorReporter, LoadEvent, LogReporter, MetaType,
        Object, ObjectHooks, ObjectPtr, ObjectWeakPtr, Property, PropertyFlags, SimpleKind, Type,
        TypeRef, TypeResolver, TypeTraits, Ustr, convert, same_type,
    };
    pub use metatype_data::{
        ChildKey, DataViewResult, MemoryKind, TypedMemory, Variant, VariantTable,
        VariantTableConfig,
    };
    pub use metatype_registry::TypeRegistry;

    pub use crate::{Error, Result};
}

/// Create a registry holding the built-in simple types and the data types.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn type_system() -> Result<TypeRegistry> {
    let registry = TypeRegistry::with_builtins();
    metatype_data::register_data_types(&registry)?;
    tracing::debug!(types = registry.len(), "type system ready");
    Ok(registry)
}
