//! Class types.
//!
//! A class owns an ordered list of locally declared properties and functions,
//! an optional base class and a lazily built [`MemberSnapshot`] merging its own
//! members with everything inherited. The snapshot and the default object are
//! swapped in atomically as whole values, so concurrent readers never see a map
//! being mutated.
//!
//! Three lifecycles exist:
//!
//! - **Native**: construct/destruct (and optionally copy/compare) are bound to
//!   functions, usually generated from a Rust type.
//! - **Fields**: the layout was computed at runtime from a field list; the class
//!   constructs, copies, compares and destructs property by property.
//! - **Abstract**: nothing is bound; the class cannot be instantiated.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use ustr::Ustr;

use super::{
    MetaType, Type, TypeInfo, TypeRef, TypeTraits, compare_native, construct_native, copy_native,
    destruct_native, same_type,
};
use crate::convert::convert;
use crate::error::{RegistrationError, StreamError};
use crate::function::Function;
use crate::object::ObjectPtr;
use crate::property::{Property, PropertyFlags};
use crate::storage::{DataBlob, FrozenBlob};
use crate::stream::{
    BinaryReader, BinaryWriter, ObjectHooks, SavedProperty, TextReader, TextWriter,
    value_from_text, value_to_text,
};

/// Bound lifecycle functions of a native class.
#[derive(Clone, Copy)]
pub struct NativeLifecycle {
    pub construct: unsafe fn(*mut u8),
    pub destruct: unsafe fn(*mut u8),
    /// Byte copy when unbound.
    pub copy: Option<unsafe fn(*mut u8, *const u8)>,
    /// Byte comparison when unbound.
    pub compare: Option<unsafe fn(*const u8, *const u8) -> bool>,
}

impl NativeLifecycle {
    /// Lifecycle generated from a Rust type.
    pub fn of<T: Default + Clone + PartialEq + 'static>() -> Self {
        Self {
            construct: construct_native::<T>,
            destruct: destruct_native::<T>,
            copy: Some(copy_native::<T>),
            compare: Some(compare_native::<T>),
        }
    }
}

/// How instances of a class are created and destroyed.
#[derive(Clone, Copy)]
pub enum ClassLifecycle {
    Abstract,
    Native(NativeLifecycle),
    Fields,
}

impl fmt::Debug for ClassLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClassLifecycle::Abstract => "Abstract",
            ClassLifecycle::Native(_) => "Native",
            ClassLifecycle::Fields => "Fields",
        })
    }
}

/// A field of a runtime-laid-out class.
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub flags: PropertyFlags,
    pub default: Option<DataBlob>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            flags: PropertyFlags::empty(),
            default: None,
        }
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_default(mut self, value: DataBlob) -> Self {
        self.default = Some(value);
        self
    }
}

/// Merged view of a class's own and inherited members.
///
/// Inherited members come first in declaration order; a member redeclared by a
/// derived class replaces the inherited one in place.
#[derive(Default)]
pub struct MemberSnapshot {
    base: Option<Arc<MemberSnapshot>>,
    properties: Vec<Arc<Property>>,
    property_index: FxHashMap<Ustr, usize>,
    functions: Vec<Arc<Function>>,
    function_index: FxHashMap<Ustr, usize>,
}

impl MemberSnapshot {
    fn build(
        base: Option<Arc<MemberSnapshot>>,
        properties: &[Arc<Property>],
        functions: &[Arc<Function>],
    ) -> Self {
        let mut snapshot = match &base {
            Some(base) => Self {
                base: None,
                properties: base.properties.clone(),
                property_index: base.property_index.clone(),
                functions: base.functions.clone(),
                function_index: base.function_index.clone(),
            },
            None => Self::default(),
        };
        for property in properties {
            match snapshot.property_index.get(&property.name()) {
                Some(&i) => snapshot.properties[i] = Arc::clone(property),
                None => {
                    snapshot
                        .property_index
                        .insert(property.name(), snapshot.properties.len());
                    snapshot.properties.push(Arc::clone(property));
                }
            }
        }
        for function in functions {
            match snapshot.function_index.get(&function.name()) {
                Some(&i) => snapshot.functions[i] = Arc::clone(function),
                None => {
                    snapshot
                        .function_index
                        .insert(function.name(), snapshot.functions.len());
                    snapshot.functions.push(Arc::clone(function));
                }
            }
        }
        snapshot.base = base;
        snapshot
    }

    fn is_current(&self, base: Option<&Arc<MemberSnapshot>>) -> bool {
        match (&self.base, base) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn properties(&self) -> &[Arc<Property>] {
        &self.properties
    }

    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    pub fn find_property(&self, name: &str) -> Option<&Arc<Property>> {
        let name = Ustr::from_existing(name)?;
        self.property_index
            .get(&name)
            .map(|&i| &self.properties[i])
    }

    pub fn find_function(&self, name: &str) -> Option<&Arc<Function>> {
        let name = Ustr::from_existing(name)?;
        self.function_index
            .get(&name)
            .map(|&i| &self.functions[i])
    }
}

/// A class type.
pub struct ClassType {
    info: TypeInfo,
    self_ref: Weak<ClassType>,
    lifecycle: ClassLifecycle,
    base: RwLock<Option<Arc<ClassType>>>,
    properties: RwLock<Vec<Arc<Property>>>,
    functions: RwLock<Vec<Arc<Function>>>,
    members: ArcSwapOption<MemberSnapshot>,
    rebuild: Mutex<()>,
    default_object: ArcSwapOption<FrozenBlob>,
    hooks: RwLock<Option<Arc<dyn ObjectHooks>>>,
}

impl ClassType {
    fn build(
        info: TypeInfo,
        lifecycle: ClassLifecycle,
        base: Option<Arc<ClassType>>,
        properties: Vec<Arc<Property>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            info,
            self_ref: self_ref.clone(),
            lifecycle,
            base: RwLock::new(base),
            properties: RwLock::new(properties),
            functions: RwLock::new(Vec::new()),
            members: ArcSwapOption::empty(),
            rebuild: Mutex::new(()),
            default_object: ArcSwapOption::empty(),
            hooks: RwLock::new(None),
        })
    }

    /// A class whose instances are the Rust type `T`.
    pub fn new_native<T>(name: &str) -> Arc<Self>
    where
        T: Default + Clone + PartialEq + Send + Sync + 'static,
    {
        let info = TypeInfo::native::<T>(name, MetaType::Class, TypeTraits::MANAGED);
        Self::build(info, ClassLifecycle::Native(NativeLifecycle::of::<T>()), None, Vec::new())
    }

    /// A class that can never be instantiated.
    pub fn new_abstract(name: &str, size: usize, align: usize) -> Arc<Self> {
        let info = TypeInfo::new(name, MetaType::Class, size, align, TypeTraits::empty());
        Self::build(info, ClassLifecycle::Abstract, None, Vec::new())
    }

    /// A class with explicitly bound lifecycle functions.
    ///
    /// Binding neither construct nor destruct makes the class abstract;
    /// binding only one of them is rejected.
    pub fn new_bound(
        name: &str,
        size: usize,
        align: usize,
        construct: Option<unsafe fn(*mut u8)>,
        destruct: Option<unsafe fn(*mut u8)>,
        copy: Option<unsafe fn(*mut u8, *const u8)>,
        compare: Option<unsafe fn(*const u8, *const u8) -> bool>,
    ) -> Result<Arc<Self>, RegistrationError> {
        let lifecycle = match (construct, destruct) {
            (Some(construct), Some(destruct)) => ClassLifecycle::Native(NativeLifecycle {
                construct,
                destruct,
                copy,
                compare,
            }),
            (None, None) => return Ok(Self::new_abstract(name, size, align)),
            _ => {
                return Err(RegistrationError::HalfBoundLifecycle {
                    class: name.to_owned(),
                });
            }
        };
        let info = TypeInfo::new(name, MetaType::Class, size, align, TypeTraits::MANAGED);
        Ok(Self::build(info, lifecycle, None, Vec::new()))
    }

    /// A class laid out at runtime from `fields`, placed after `base`.
    pub fn new_runtime(
        name: &str,
        base: Option<Arc<ClassType>>,
        fields: Vec<FieldDef>,
    ) -> Result<Arc<Self>, RegistrationError> {
        let owner = Ustr::from(name);
        let (mut offset, mut align) = match &base {
            Some(base) => (base.size(), base.align()),
            None => (0, 1),
        };
        let mut traits = TypeTraits::SCRIPTED;
        if let Some(base) = &base {
            traits |= base.traits() & (TypeTraits::NEEDS_CONSTRUCTOR | TypeTraits::NEEDS_DESTRUCTOR);
        }
        let mut properties: Vec<Arc<Property>> = Vec::with_capacity(fields.len());
        for field in fields {
            if properties.iter().any(|p| p.name().as_str() == field.name) {
                return Err(RegistrationError::DuplicateProperty {
                    class: name.to_owned(),
                    name: field.name,
                });
            }
            let field_traits = field.ty.traits();
            offset = offset.next_multiple_of(field.ty.align());
            align = align.max(field.ty.align());
            traits |= field_traits & (TypeTraits::NEEDS_CONSTRUCTOR | TypeTraits::NEEDS_DESTRUCTOR);
            let mut property = Property::new(&field.name, Arc::clone(&field.ty), offset)
                .with_flags(field.flags | PropertyFlags::INLINED);
            if let Some(default) = field.default {
                if !same_type(default.ty().as_ref(), field.ty.as_ref()) {
                    return Err(RegistrationError::InvalidLayout {
                        class: name.to_owned(),
                        reason: format!("default of '{}' has type '{}'", field.name, default.ty().name()),
                    });
                }
                traits |= TypeTraits::NEEDS_CONSTRUCTOR;
                property = property.with_default(default);
            }
            offset += field.ty.size();
            properties.push(Arc::new(property.with_owner(owner)));
        }
        if !traits.contains(TypeTraits::NEEDS_CONSTRUCTOR) {
            traits |= TypeTraits::ZERO_INIT;
        }
        let size = offset.next_multiple_of(align);
        let info = TypeInfo::new(name, MetaType::Class, size, align, traits);
        tracing::debug!(class = name, size, align, "laid out runtime class");
        Ok(Self::build(info, ClassLifecycle::Fields, base, properties))
    }

    // ==========================================================================
    // Hierarchy
    // ==========================================================================

    pub fn lifecycle(&self) -> &ClassLifecycle {
        &self.lifecycle
    }

    /// True when the class has no bound lifecycle.
    pub fn is_abstract(&self) -> bool {
        matches!(self.lifecycle, ClassLifecycle::Abstract)
    }

    pub fn base(&self) -> Option<Arc<ClassType>> {
        self.base.read().clone()
    }

    /// Set the base class. The base can be set once and must not create a cycle.
    pub fn set_base(&self, base: Arc<ClassType>) -> Result<(), RegistrationError> {
        let _guard = self.rebuild.lock();
        if let Some(existing) = self.base.read().as_ref() {
            return Err(RegistrationError::BaseClassAlreadySet {
                class: self.name().to_string(),
                existing: existing.name().to_string(),
            });
        }
        if base.is(Some(self)) {
            return Err(RegistrationError::CyclicBaseClass {
                class: self.name().to_string(),
                base: base.name().to_string(),
            });
        }
        if base.size() > self.size() {
            return Err(RegistrationError::InvalidLayout {
                class: self.name().to_string(),
                reason: format!("base class '{}' is larger than the class", base.name()),
            });
        }
        *self.base.write() = Some(base);
        self.members.store(None);
        Ok(())
    }

    /// Whether this class is `other` or derives from it. Every class derives
    /// from the empty class.
    pub fn is(&self, other: Option<&ClassType>) -> bool {
        let Some(other) = other else {
            return true;
        };
        if std::ptr::eq(self, other) {
            return true;
        }
        let mut next = self.base();
        while let Some(class) = next {
            if std::ptr::eq(class.as_ref(), other) {
                return true;
            }
            next = class.base();
        }
        false
    }

    // ==========================================================================
    // Members
    // ==========================================================================

    /// Add a property declared by this class.
    pub fn add_property(&self, property: Property) -> Result<Arc<Property>, RegistrationError> {
        if matches!(self.lifecycle, ClassLifecycle::Fields) {
            return Err(RegistrationError::InvalidLayout {
                class: self.name().to_string(),
                reason: "runtime class layout is fixed".into(),
            });
        }
        if property.offset() + property.ty().size() > self.size() {
            return Err(RegistrationError::InvalidLayout {
                class: self.name().to_string(),
                reason: format!("property '{}' lies outside the instance", property.name()),
            });
        }
        let _guard = self.rebuild.lock();
        let mut properties = self.properties.write();
        if properties.iter().any(|p| p.name() == property.name()) {
            return Err(RegistrationError::DuplicateProperty {
                class: self.name().to_string(),
                name: property.name().to_string(),
            });
        }
        let property = Arc::new(property.with_owner(self.name()));
        properties.push(Arc::clone(&property));
        self.members.store(None);
        Ok(property)
    }

    /// Add a function declared by this class.
    pub fn add_function(&self, function: Function) -> Result<Arc<Function>, RegistrationError> {
        let _guard = self.rebuild.lock();
        let mut functions = self.functions.write();
        if functions.iter().any(|f| f.name() == function.name()) {
            return Err(RegistrationError::DuplicateFunction {
                class: self.name().to_string(),
                name: function.name().to_string(),
            });
        }
        let function = Arc::new(function.with_owner(self.name()));
        functions.push(Arc::clone(&function));
        self.members.store(None);
        Ok(function)
    }

    /// Properties declared by this class only.
    pub fn local_properties(&self) -> Vec<Arc<Property>> {
        self.properties.read().clone()
    }

    /// Functions declared by this class only.
    pub fn local_functions(&self) -> Vec<Arc<Function>> {
        self.functions.read().clone()
    }

    /// Merged own and inherited members, rebuilt when stale.
    pub fn members(&self) -> Arc<MemberSnapshot> {
        let base = self.base().map(|b| b.members());
        if let Some(current) = self.members.load_full() {
            if current.is_current(base.as_ref()) {
                return current;
            }
        }
        let _guard = self.rebuild.lock();
        if let Some(current) = self.members.load_full() {
            if current.is_current(base.as_ref()) {
                return current;
            }
        }
        let snapshot = Arc::new(MemberSnapshot::build(
            base,
            &self.properties.read(),
            &self.functions.read(),
        ));
        tracing::debug!(
            class = %self.name(),
            properties = snapshot.properties.len(),
            functions = snapshot.functions.len(),
            "rebuilt member snapshot"
        );
        self.members.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    /// Own and inherited properties.
    pub fn all_properties(&self) -> Vec<Arc<Property>> {
        self.members().properties.clone()
    }

    /// Own and inherited functions.
    pub fn all_functions(&self) -> Vec<Arc<Function>> {
        self.members().functions.clone()
    }

    pub fn find_property(&self, name: &str) -> Option<Arc<Property>> {
        self.members().find_property(name).cloned()
    }

    pub fn find_function(&self, name: &str) -> Option<Arc<Function>> {
        self.members().find_function(name).cloned()
    }

    // ==========================================================================
    // Default object and hooks
    // ==========================================================================

    /// The never-mutated instance used as the baseline when saving.
    ///
    /// Built on first use; if two threads race, one allocation wins and the
    /// other is discarded. Abstract classes have none.
    pub fn default_object(&self) -> Option<Arc<FrozenBlob>> {
        if self.is_abstract() {
            return None;
        }
        let current = self.default_object.load();
        if let Some(existing) = &*current {
            return Some(Arc::clone(existing));
        }
        let ty: TypeRef = self.self_ref.upgrade()?;
        let fresh = Arc::new(DataBlob::new(ty).freeze());
        let previous = self
            .default_object
            .compare_and_swap(&current, Some(Arc::clone(&fresh)));
        match &*previous {
            Some(winner) => Some(Arc::clone(winner)),
            None => Some(fresh),
        }
    }

    pub fn set_hooks(&self, hooks: Arc<dyn ObjectHooks>) {
        *self.hooks.write() = Some(hooks);
    }

    /// Hooks of this class or, failing that, of the nearest base.
    pub fn hooks(&self) -> Option<Arc<dyn ObjectHooks>> {
        if let Some(hooks) = self.hooks.read().clone() {
            return Some(hooks);
        }
        self.base().and_then(|b| b.hooks())
    }

    /// Re-point every resource reference keyed `key` inside the instance at
    /// `data` at `resource`, descending into inline classes and arrays.
    /// References whose class `resource` is not an instance of are left alone,
    /// and a null `resource` detaches. Returns the names of the top-level
    /// properties that changed. An empty key matches nothing.
    ///
    /// # Safety
    /// `data` must hold a constructed instance of this class.
    pub unsafe fn patch_resource_references(
        &self,
        data: *mut u8,
        key: Ustr,
        resource: &ObjectPtr,
    ) -> Vec<Ustr> {
        if key.is_empty() {
            return Vec::new();
        }
        let members = self.members();
        members
            .properties()
            .iter()
            .filter(|p| unsafe { patch_value(p.ty().as_ref(), p.offset_ptr_mut(data), key, resource) })
            .map(|p| p.name())
            .collect()
    }

    // ==========================================================================
    // Lifecycle
    // ==========================================================================

    unsafe fn construct_fields(&self, data: *mut u8) {
        if let Some(base) = self.base() {
            unsafe { base.construct(data) };
        }
        for property in self.properties.read().iter() {
            let ty = property.ty();
            let target = property.offset_ptr_mut(data);
            if ty.traits().contains(TypeTraits::NEEDS_CONSTRUCTOR) {
                unsafe { ty.construct(target) };
            }
            if let Some(default) = property.default_value() {
                unsafe { ty.copy(target, default.as_ptr()) };
            }
        }
    }

    unsafe fn destruct_fields(&self, data: *mut u8) {
        for property in self.properties.read().iter().rev() {
            if property.ty().traits().contains(TypeTraits::NEEDS_DESTRUCTOR) {
                unsafe { property.ty().destruct(property.offset_ptr_mut(data)) };
            }
        }
        if let Some(base) = self.base() {
            unsafe { base.destruct(data) };
        }
    }

    unsafe fn copy_fields(&self, dst: *mut u8, src: *const u8) {
        if let Some(base) = self.base() {
            unsafe { base.copy(dst, src) };
        }
        for property in self.properties.read().iter() {
            unsafe {
                property
                    .ty()
                    .copy(property.offset_ptr_mut(dst), property.offset_ptr(src))
            };
        }
    }

    unsafe fn compare_fields(&self, a: *const u8, b: *const u8) -> bool {
        if let Some(base) = self.base() {
            if !unsafe { base.compare(a, b) } {
                return false;
            }
        }
        self.properties.read().iter().all(|property| unsafe {
            property
                .ty()
                .compare(property.offset_ptr(a), property.offset_ptr(b))
        })
    }

    // ==========================================================================
    // Serialization helpers
    // ==========================================================================

    fn baseline(&self, default: Option<*const u8>) -> (Option<Arc<FrozenBlob>>, Option<*const u8>) {
        match default {
            Some(ptr) => (None, Some(ptr)),
            None => {
                let object = self.default_object();
                let ptr = object.as_ref().map(|o| o.as_ptr());
                (object, ptr)
            }
        }
    }

    unsafe fn should_save(
        property: &Property,
        data: *const u8,
        baseline: Option<*const u8>,
        save_defaults: bool,
        hooks: Option<&dyn ObjectHooks>,
    ) -> bool {
        if property.is_transient() {
            return false;
        }
        if let Some(force) = hooks.and_then(|h| h.should_save_property(data, property)) {
            return force;
        }
        if save_defaults {
            return true;
        }
        match baseline {
            Some(base) => !unsafe {
                property
                    .ty()
                    .compare(property.offset_ptr(data), property.offset_ptr(base))
            },
            None => true,
        }
    }

    unsafe fn restore_default(&self, property: &Property, target: *mut u8) {
        if let Some(default) = self.default_object() {
            unsafe { property.ty().copy(target, property.offset_ptr(default.as_ptr())) };
        }
    }

    unsafe fn read_saved_property(
        &self,
        reader: &mut BinaryReader<'_>,
        members: &MemberSnapshot,
        hooks: Option<&dyn ObjectHooks>,
        saved: &SavedProperty,
        data: *mut u8,
    ) {
        let class = self.name();
        let Some(property) = members.find_property(&saved.name) else {
            let raw = reader.peek_block();
            if hooks.is_some_and(|h| h.on_property_missing_raw(data, saved.name, saved.type_name, raw)) {
                return;
            }
            if let (Some(hooks), Some(ty)) = (hooks, &saved.ty) {
                let mut value = DataBlob::new(Arc::clone(ty));
                let decoded = unsafe { ty.read_binary(reader, value.as_mut_ptr()) }.is_ok();
                if decoded && hooks.on_property_missing_typed(data, saved.name, &value) {
                    return;
                }
            }
            reader.reporter().report_property_missing(&class, &saved.name);
            return;
        };
        if property.is_transient() {
            return;
        }
        let target = property.offset_ptr_mut(data);
        let Some(saved_ty) = &saved.ty else {
            let raw = reader.peek_block();
            if hooks.is_some_and(|h| {
                h.on_property_type_missing_raw(data, property, saved.type_name, raw)
            }) {
                return;
            }
            reader
                .reporter()
                .report_property_type_missing(&class, &property.name(), &saved.type_name);
            return;
        };

        if same_type(saved_ty.as_ref(), property.ty().as_ref()) {
            if let Err(error) = unsafe { property.ty().read_binary(reader, target) } {
                reader
                    .reporter()
                    .report_property_data_corrupted(&class, &property.name(), &error);
                unsafe { self.restore_default(property, target) };
            }
            return;
        }

        let mut value = DataBlob::new(Arc::clone(saved_ty));
        if let Err(error) = unsafe { saved_ty.read_binary(reader, value.as_mut_ptr()) } {
            reader
                .reporter()
                .report_property_data_corrupted(&class, &property.name(), &error);
            return;
        }
        if hooks.is_some_and(|h| h.on_property_type_changed(data, property, &value)) {
            return;
        }
        let handled = unsafe {
            convert(
                value.as_ptr(),
                saved_ty.as_ref(),
                target,
                property.ty().as_ref(),
            )
        };
        reader.reporter().report_property_type_changed(
            &class,
            &property.name(),
            &saved.type_name,
            &property.ty().name(),
            handled,
        );
    }
}

/// Re-point resource references inside one value.
///
/// # Safety
/// `data` must hold a constructed value of `ty`.
pub(crate) unsafe fn patch_value(
    ty: &dyn Type,
    data: *mut u8,
    key: Ustr,
    resource: &ObjectPtr,
) -> bool {
    if let Some(reference_type) = ty.as_resource_ref() {
        let reference = unsafe { &mut *data.cast::<super::ResourceRef>() };
        if reference.key != key || reference.resource == *resource {
            return false;
        }
        let compatible = resource
            .class()
            .is_none_or(|c| c.is(Some(reference_type.class().as_ref())));
        if !compatible {
            tracing::debug!(key = %key, class = %reference_type.class().name().as_str(), "patched resource has an incompatible class");
            return false;
        }
        reference.resource = resource.clone();
        return true;
    }
    if let Some(class) = ty.as_class() {
        return !unsafe { class.patch_resource_references(data, key, resource) }.is_empty();
    }
    if let Some(array) = ty.as_array() {
        let element = array.element();
        let mut changed = false;
        for i in 0..unsafe { array.len(data) } {
            if let Some(ptr) = unsafe { array.element_ptr_mut(data, i) } {
                changed |= unsafe { patch_value(element.as_ref(), ptr, key, resource) };
            }
        }
        return changed;
    }
    false
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassType")
            .field("name", &self.info.name)
            .field("size", &self.info.size)
            .field("lifecycle", &self.lifecycle)
            .field("base", &self.base().map(|b| b.name()))
            .field("properties", &self.properties.read().len())
            .field("functions", &self.functions.read().len())
            .finish()
    }
}

impl Type for ClassType {
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
        match &self.lifecycle {
            ClassLifecycle::Native(native) => unsafe { (native.construct)(data) },
            ClassLifecycle::Abstract | ClassLifecycle::Fields => unsafe {
                self.construct_fields(data)
            },
        }
    }

    unsafe fn destruct(&self, data: *mut u8) {
        match &self.lifecycle {
            ClassLifecycle::Native(native) => unsafe { (native.destruct)(data) },
            ClassLifecycle::Abstract | ClassLifecycle::Fields => unsafe {
                self.destruct_fields(data)
            },
        }
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        match &self.lifecycle {
            ClassLifecycle::Native(NativeLifecycle { copy: Some(copy), .. }) => unsafe {
                (*copy)(dst, src)
            },
            ClassLifecycle::Native(_) => unsafe {
                std::ptr::copy_nonoverlapping(src, dst, self.size())
            },
            ClassLifecycle::Abstract | ClassLifecycle::Fields => unsafe {
                self.copy_fields(dst, src)
            },
        }
    }

    unsafe fn compare(&self, a: *const u8, b: *const u8) -> bool {
        match &self.lifecycle {
            ClassLifecycle::Native(NativeLifecycle {
                compare: Some(compare),
                ..
            }) => unsafe { (*compare)(a, b) },
            ClassLifecycle::Native(_) => unsafe {
                std::slice::from_raw_parts(a, self.size())
                    == std::slice::from_raw_parts(b, self.size())
            },
            ClassLifecycle::Abstract | ClassLifecycle::Fields => unsafe {
                self.compare_fields(a, b)
            },
        }
    }

    unsafe fn hash_value(&self, data: *const u8) -> u64 {
        self.members()
            .properties()
            .iter()
            .fold(self.info.hash.as_u64(), |hash, property| {
                let value = unsafe { property.ty().hash_value(property.offset_ptr(data)) };
                hash.rotate_left(5) ^ value
            })
    }

    unsafe fn print(&self, data: *const u8, out: &mut String) {
        if let Ok(node) = unsafe { value_to_text(self, data) } {
            out.push_str(&node.to_string());
        }
    }

    unsafe fn parse(&self, text: &str, data: *mut u8) -> bool {
        match serde_json::from_str::<Value>(text) {
            Ok(node) => unsafe { value_from_text(self, &node, data, None) }.is_ok(),
            Err(_) => false,
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    unsafe fn write_binary(
        &self,
        writer: &mut BinaryWriter,
        data: *const u8,
        default: Option<*const u8>,
    ) -> Result<(), StreamError> {
        let members = self.members();
        let hooks = self.hooks();
        let (_keep, baseline) = self.baseline(default);
        let save_defaults = writer.options().save_defaults;
        for property in members.properties() {
            if !unsafe { Self::should_save(property, data, baseline, save_defaults, hooks.as_deref()) } {
                continue;
            }
            writer.write_property_ref(self.name(), property.name(), property.ty().name());
            let block = writer.begin_block();
            let property_default = baseline.map(|b| property.offset_ptr(b));
            unsafe {
                property
                    .ty()
                    .write_binary(writer, property.offset_ptr(data), property_default)?
            };
            writer.end_block(block)?;
        }
        writer.write_end_of_properties();
        Ok(())
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    unsafe fn read_binary(
        &self,
        reader: &mut BinaryReader<'_>,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let members = self.members();
        let hooks = self.hooks();
        while let Some(index) = reader.read_property_ref()? {
            let end = reader.begin_block()?;
            let saved = reader
                .saved_property(index)
                .cloned()
                .ok_or(StreamError::InvalidPropertyReference(index as u64 + 1))?;
            unsafe { self.read_saved_property(reader, &members, hooks.as_deref(), &saved, data) };
            reader.end_block(end);
        }
        if let Some(hooks) = hooks {
            hooks.on_post_load(data);
        }
        Ok(())
    }

    unsafe fn write_text(
        &self,
        writer: &mut TextWriter,
        data: *const u8,
        default: Option<*const u8>,
    ) -> Result<Value, StreamError> {
        let members = self.members();
        let hooks = self.hooks();
        let (_keep, baseline) = self.baseline(default);
        let save_defaults = writer.options().save_defaults;
        let mut map = Map::new();
        for property in members.properties() {
            if !unsafe { Self::should_save(property, data, baseline, save_defaults, hooks.as_deref()) } {
                continue;
            }
            let property_default = baseline.map(|b| property.offset_ptr(b));
            let node = unsafe {
                property
                    .ty()
                    .write_text(writer, property.offset_ptr(data), property_default)?
            };
            map.insert(property.name().to_string(), node);
        }
        Ok(Value::Object(map))
    }

    unsafe fn read_text(
        &self,
        reader: &mut TextReader<'_>,
        node: &Value,
        data: *mut u8,
    ) -> Result<(), StreamError> {
        let Value::Object(map) = node else {
            return Err(StreamError::MalformedText(format!(
                "expected object for class '{}', found {node}",
                self.name()
            )));
        };
        let members = self.members();
        for (key, value) in map {
            let Some(property) = members.find_property(key) else {
                return Err(StreamError::UnknownElement {
                    class: self.name().to_string(),
                    name: key.clone(),
                });
            };
            if property.is_transient() {
                continue;
            }
            unsafe {
                property
                    .ty()
                    .read_text(reader, value, property.offset_ptr_mut(data))?
            };
        }
        if let Some(hooks) = self.hooks() {
            hooks.on_post_load(data);
        }
        Ok(())
    }

    fn release_type_refs(&self) {
        self.default_object.store(None);
        let _guard = self.rebuild.lock();
        self.members.store(None);
        self.hooks.write().take();
        self.functions.write().clear();
        self.properties.write().clear();
        self.base.write().take();
    }

    fn as_class(&self) -> Option<&ClassType> {
        Some(self)
    }
}
