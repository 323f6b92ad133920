//! Fluent registration helpers.
//!
//! # Example
//!
//! ```
//! use metatype_registry::TypeRegistry;
//! use metatype_core::SimpleKind;
//!
//! #[derive(Default, Clone, PartialEq)]
//! struct Vec2 {
//!     x: f32,
//!     y: f32,
//! }
//!
//! # fn main() -> Result<(), metatype_core::RegistrationError> {
//! let registry = TypeRegistry::with_builtins();
//!
//! registry
//!     .native_class::<Vec2>("Vec2")
//!     .property::<f32>("x", std::mem::offset_of!(Vec2, x))?
//!     .property::<f32>("y", std::mem::offset_of!(Vec2, y))?
//!     .method("length", |v: &mut Vec2| (v.x * v.x + v.y * v.y).sqrt())?
//!     .build()?;
//!
//! registry
//!     .class("Body")
//!     .field("position", "Vec2")?
//!     .field_default("mass", "float", "1.5")?
//!     .build()?;
//!
//! registry
//!     .enumeration("Layer")
//!     .repr(SimpleKind::Uint8)
//!     .option("Ground", 1)
//!     .option("Air", 2)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use metatype_core::{
    BitfieldType, ClassType, DataBlob, EnumType, FieldDef, Function, NativeMethod, NativeStatic,
    ObjectHooks, Property, PropertyFlags, RegistrationError, SimpleKind, Type, TypeRef, TypeResolver,
};

use crate::registry::TypeRegistry;

impl TypeRegistry {
    /// Start a class whose layout is computed from its fields.
    pub fn class(&self, name: &str) -> ClassBuilder<'_> {
        ClassBuilder::new(self, name)
    }

    /// Start a class bound to the Rust type `T`.
    pub fn native_class<T>(&self, name: &str) -> NativeClassBuilder<'_, T>
    where
        T: Default + Clone + PartialEq + Send + Sync + 'static,
    {
        NativeClassBuilder::new(self, name)
    }

    /// Start an enumeration.
    pub fn enumeration(&self, name: &str) -> EnumBuilder<'_> {
        EnumBuilder::new(self, name)
    }

    /// Start a bitfield.
    pub fn bitfield(&self, name: &str) -> BitfieldBuilder<'_> {
        BitfieldBuilder::new(self, name)
    }
}

/// Parse `text` into a fresh value of `ty`.
fn parse_default(class: &str, property: &str, ty: &TypeRef, text: &str) -> Result<DataBlob, RegistrationError> {
    let mut value = DataBlob::new(ty.clone());
    // SAFETY: the blob holds a constructed value of `ty`.
    if unsafe { ty.parse(text, value.as_mut_ptr()) } {
        Ok(value)
    } else {
        Err(RegistrationError::InvalidDefault {
            class: class.to_owned(),
            property: property.to_owned(),
            text: text.to_owned(),
        })
    }
}

// ==============================================================================
// Runtime classes
// ==============================================================================

/// Builder for classes laid out from a field list.
///
/// Created by [`TypeRegistry::class`].
pub struct ClassBuilder<'r> {
    registry: &'r TypeRegistry,
    name: String,
    base: Option<Arc<ClassType>>,
    fields: Vec<FieldDef>,
    hooks: Option<Arc<dyn ObjectHooks>>,
}

impl<'r> ClassBuilder<'r> {
    fn new(registry: &'r TypeRegistry, name: &str) -> Self {
        Self {
            registry,
            name: name.to_owned(),
            base: None,
            fields: Vec::new(),
            hooks: None,
        }
    }

    /// Derive from a registered class. Its fields come first in the layout.
    pub fn base(mut self, name: &str) -> Result<Self, RegistrationError> {
        let base = self
            .registry
            .find_class(name)
            .ok_or_else(|| RegistrationError::TypeNotFound(name.to_owned()))?;
        self.base = Some(base);
        Ok(self)
    }

    /// Append a field of the named type.
    pub fn field(self, name: &str, type_name: &str) -> Result<Self, RegistrationError> {
        self.field_with_flags(name, type_name, PropertyFlags::empty())
    }

    pub fn field_with_flags(
        mut self,
        name: &str,
        type_name: &str,
        flags: PropertyFlags,
    ) -> Result<Self, RegistrationError> {
        let ty = self.registry.require(type_name)?;
        self.fields.push(FieldDef::new(name, ty).with_flags(flags));
        Ok(self)
    }

    /// Append a field whose initial value is parsed from `default`.
    pub fn field_default(
        mut self,
        name: &str,
        type_name: &str,
        default: &str,
    ) -> Result<Self, RegistrationError> {
        let ty = self.registry.require(type_name)?;
        let value = parse_default(&self.name, name, &ty, default)?;
        self.fields.push(FieldDef::new(name, ty).with_default(value));
        Ok(self)
    }

    /// Append a prepared field.
    pub fn field_def(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ObjectHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Lay out and register the class.
    pub fn build(self) -> Result<Arc<ClassType>, RegistrationError> {
        let class = ClassType::new_runtime(&self.name, self.base, self.fields)?;
        if let Some(hooks) = self.hooks {
            class.set_hooks(hooks);
        }
        self.registry.register_class(class)
    }
}

// ==============================================================================
// Native classes
// ==============================================================================

/// Builder for classes backed by a Rust type.
///
/// Created by [`TypeRegistry::native_class`].
pub struct NativeClassBuilder<'r, T> {
    registry: &'r TypeRegistry,
    class: Arc<ClassType>,
    _marker: PhantomData<fn() -> T>,
}

impl<'r, T> NativeClassBuilder<'r, T>
where
    T: Default + Clone + PartialEq + Send + Sync + 'static,
{
    fn new(registry: &'r TypeRegistry, name: &str) -> Self {
        Self {
            registry,
            class: ClassType::new_native::<T>(name),
            _marker: PhantomData,
        }
    }

    /// Derive from a registered class. The base's properties must lie inside `T`.
    pub fn base(self, name: &str) -> Result<Self, RegistrationError> {
        let base = self
            .registry
            .find_class(name)
            .ok_or_else(|| RegistrationError::TypeNotFound(name.to_owned()))?;
        self.class.set_base(base)?;
        Ok(self)
    }

    /// Reflect a field of Rust type `F` at `offset`.
    pub fn property<F: 'static>(self, name: &str, offset: usize) -> Result<Self, RegistrationError> {
        self.property_with_flags::<F>(name, offset, PropertyFlags::empty())
    }

    pub fn property_with_flags<F: 'static>(
        self,
        name: &str,
        offset: usize,
        flags: PropertyFlags,
    ) -> Result<Self, RegistrationError> {
        let ty = self
            .registry
            .find_native_of::<F>()
            .ok_or_else(|| RegistrationError::TypeNotFound(std::any::type_name::<F>().to_owned()))?;
        self.class
            .add_property(Property::new(name, ty, offset).with_flags(flags))?;
        Ok(self)
    }

    /// Reflect a field by type name, for compound types without a Rust binding
    /// of their own.
    pub fn property_as(
        self,
        name: &str,
        type_name: &str,
        offset: usize,
        flags: PropertyFlags,
    ) -> Result<Self, RegistrationError> {
        let ty = self.registry.require(type_name)?;
        self.class
            .add_property(Property::new(name, ty, offset).with_flags(flags))?;
        Ok(self)
    }

    /// Bind a method taking `&mut T` and up to four arguments.
    pub fn method<Args, F>(self, name: &str, f: F) -> Result<Self, RegistrationError>
    where
        F: NativeMethod<T, Args>,
    {
        let function = Function::native_method::<T, Args, F>(self.registry, name, f)?;
        self.class.add_function(function)?;
        Ok(self)
    }

    /// Bind a function that needs no instance.
    pub fn static_function<Args, F>(self, name: &str, f: F) -> Result<Self, RegistrationError>
    where
        F: NativeStatic<Args>,
    {
        let function = Function::native_static::<Args, F>(self.registry, name, f)?;
        self.class.add_function(function)?;
        Ok(self)
    }

    pub fn hooks(self, hooks: Arc<dyn ObjectHooks>) -> Self {
        self.class.set_hooks(hooks);
        self
    }

    /// Register the class.
    pub fn build(self) -> Result<Arc<ClassType>, RegistrationError> {
        self.registry.register_class(self.class)
    }
}

// ==============================================================================
// Enums and bitfields
// ==============================================================================

type NativeBinding<T> = Box<dyn FnOnce(T) -> Result<T, RegistrationError>>;

/// Builder for enumerations. Stored as `int32` unless [`EnumBuilder::repr`]
/// says otherwise.
pub struct EnumBuilder<'r> {
    registry: &'r TypeRegistry,
    name: String,
    repr: SimpleKind,
    options: Vec<(String, i64)>,
    native: Option<NativeBinding<EnumType>>,
}

impl<'r> EnumBuilder<'r> {
    fn new(registry: &'r TypeRegistry, name: &str) -> Self {
        Self {
            registry,
            name: name.to_owned(),
            repr: SimpleKind::Int32,
            options: Vec::new(),
            native: None,
        }
    }

    pub fn repr(mut self, repr: SimpleKind) -> Self {
        self.repr = repr;
        self
    }

    pub fn option(mut self, name: &str, value: i64) -> Self {
        self.options.push((name.to_owned(), value));
        self
    }

    /// Bind the enumeration to the Rust type `E`, which must match the storage size.
    pub fn native<E: 'static>(mut self) -> Self {
        self.native = Some(Box::new(EnumType::bind_native::<E>));
        self
    }

    pub fn build(self) -> Result<Arc<EnumType>, RegistrationError> {
        let mut ty = EnumType::new(&self.name, self.repr, self.options)?;
        if let Some(bind) = self.native {
            ty = bind(ty)?;
        }
        let ty = Arc::new(ty);
        self.registry.register(ty.clone())?;
        Ok(ty)
    }
}

/// Builder for bitfields. Stored as `uint32` unless [`BitfieldBuilder::repr`]
/// says otherwise.
pub struct BitfieldBuilder<'r> {
    registry: &'r TypeRegistry,
    name: String,
    repr: SimpleKind,
    flags: Vec<(String, u64)>,
    native: Option<NativeBinding<BitfieldType>>,
}

impl<'r> BitfieldBuilder<'r> {
    fn new(registry: &'r TypeRegistry, name: &str) -> Self {
        Self {
            registry,
            name: name.to_owned(),
            repr: SimpleKind::Uint32,
            flags: Vec::new(),
            native: None,
        }
    }

    pub fn repr(mut self, repr: SimpleKind) -> Self {
        self.repr = repr;
        self
    }

    pub fn flag(mut self, name: &str, mask: u64) -> Self {
        self.flags.push((name.to_owned(), mask));
        self
    }

    pub fn native<E: 'static>(mut self) -> Self {
        self.native = Some(Box::new(BitfieldType::bind_native::<E>));
        self
    }

    pub fn build(self) -> Result<Arc<BitfieldType>, RegistrationError> {
        let mut ty = BitfieldType::new(&self.name, self.repr, self.flags)?;
        if let Some(bind) = self.native {
            ty = bind(ty)?;
        }
        let ty = Arc::new(ty);
        self.registry.register(ty.clone())?;
        Ok(ty)
    }
}
