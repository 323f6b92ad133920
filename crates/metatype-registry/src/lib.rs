//! Type registry for the metatype engine.
//!
//! [`TypeRegistry`] owns every registered type, resolves names (including
//! compound names such as `array<Point>`) and indexes class members by hash.
//! The builders in [`builder`] are the usual way to declare classes, enums and
//! bitfields.

pub mod builder;
pub mod compound;
pub mod registry;

pub use builder::{BitfieldBuilder, ClassBuilder, EnumBuilder, NativeClassBuilder};
pub use compound::CompoundName;
pub use registry::{ResourceLoader, TypeRegistry};
