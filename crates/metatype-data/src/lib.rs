//! Generic typed data access.
//!
//! - [`Variant`]: one boxed value of any type
//! - [`VariantTable`]: a dynamic bag of named values with stable addresses
//! - [`TypedMemory`]: a uniform array / dictionary / value view over raw memory
//!
//! # Example
//!
//! ```
//! use metatype_data::{TypedMemory, register_data_types};
//! use metatype_registry::TypeRegistry;
//! use metatype_core::DataBlob;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TypeRegistry::with_builtins();
//! register_data_types(&registry)?;
//! registry.class("Player").field("hp", "int32")?.build()?;
//!
//! let mut player = DataBlob::new(registry.require("Player")?);
//! let mut view = TypedMemory::of_blob(&mut player);
//! assert!(view.set_path_text("hp", "25").is_ok());
//! assert_eq!(view.member("hp").unwrap().format(), "25");
//! # Ok(())
//! # }
//! ```

pub mod path;
mod result;
mod typed_memory;
mod variant;
mod variant_table;

pub use result::DataViewResult;
pub use typed_memory::{ChildKey, MemoryKind, TypedMemory};
pub use variant::Variant;
pub use variant_table::{TableEntry, VariantTable, VariantTableConfig, VariantTableType};

use std::sync::Arc;

use metatype_core::{RegistrationError, TypeRef};
use metatype_registry::TypeRegistry;

/// Register the types this crate defines.
pub fn register_data_types(registry: &TypeRegistry) -> Result<TypeRef, RegistrationError> {
    registry.register(Arc::new(VariantTableType::new()))
}
