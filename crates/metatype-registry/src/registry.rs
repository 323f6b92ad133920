//! TypeRegistry - the process-wide home of every type.
//!
//! # Storage Model
//!
//! - **Names**: registered names and alternative names map to one [`TypeRef`]
//! - **Native hashes**: Rust types bound to a type map to it by [`NativeTypeHash`]
//! - **Properties / functions**: class members indexed by [`TypeHash`]
//! - **Class enumeration**: concrete subclasses of a base, cached per base
//!
//! Each map has its own mutex, held only for the lookup or insert. Compound
//! names (`array<T>`, `handle<C>`, ...) are synthesized on first lookup and
//! cached, so repeated lookups return the identical instance.
//!
//! # Shutdown
//!
//! Types reference each other (a class holds its property types, a handle holds
//! its class) so they cannot be dropped one at a time. [`TypeRegistry::shutdown`]
//! first asks every type to release its references, then frees the maps.
//!
//! # Example
//!
//! ```
//! use metatype_registry::TypeRegistry;
//! use metatype_core::Type;
//!
//! let registry = TypeRegistry::with_builtins();
//! let a = registry.find("array<int>").unwrap();
//! let b = registry.find("array<int32>").unwrap();
//! assert!(metatype_core::same_type(a.as_ref(), b.as_ref()));
//! assert_eq!(a.name().as_str(), "array<int32>");
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use ustr::Ustr;

use metatype_core::{
    ArrayType, ClassRefType, ClassType, Function, HandleType, NativeTypeHash, ObjectPtr, Property,
    RegistrationError, ResourceRefType, SimpleType, Type, TypeHash, TypeRef, TypeResolver,
    VoidType, class_arc, same_type,
};

use crate::compound::CompoundName;

/// Loads external resources for resource references.
pub type ResourceLoader = Arc<dyn Fn(&ClassType, Ustr) -> ObjectPtr + Send + Sync>;

type ClassList = Arc<[Arc<ClassType>]>;

/// Registry of every type, keyed by name and by native type identity.
#[derive(Default)]
pub struct TypeRegistry {
    /// Registered and alternative names.
    names: Mutex<FxHashMap<Ustr, TypeRef>>,

    /// Types in registration order, each once.
    order: Mutex<Vec<TypeRef>>,

    /// Rust type identity to type.
    natives: Mutex<FxHashMap<NativeTypeHash, TypeRef>>,

    /// Class properties by property hash.
    properties: Mutex<FxHashMap<TypeHash, Arc<Property>>>,

    /// Class functions by method hash.
    functions: Mutex<FxHashMap<TypeHash, Arc<Function>>>,

    /// Concrete subclasses per base class address (0 for all classes).
    class_lists: Mutex<FxHashMap<usize, ClassList>>,

    resource_loader: RwLock<Option<ResourceLoader>>,

    shut_down: AtomicBool,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in simple types, `void`, the
    /// unconstrained `ClassRef` and the `int`/`uint` alternative names.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let registered = registry.register_builtins();
        debug_assert!(registered.is_ok(), "built-in registration failed: {registered:?}");
        registry
    }

    /// Register the built-ins into this registry. Fails on a shut down
    /// registry or when a built-in name is already taken.
    pub fn register_builtins(&self) -> Result<(), RegistrationError> {
        let builtins: [TypeRef; 15] = [
            Arc::new(VoidType::new()),
            Arc::new(SimpleType::<bool>::new()),
            Arc::new(SimpleType::<i8>::new()),
            Arc::new(SimpleType::<i16>::new()),
            Arc::new(SimpleType::<i32>::new()),
            Arc::new(SimpleType::<i64>::new()),
            Arc::new(SimpleType::<u8>::new()),
            Arc::new(SimpleType::<u16>::new()),
            Arc::new(SimpleType::<u32>::new()),
            Arc::new(SimpleType::<u64>::new()),
            Arc::new(SimpleType::<f32>::new()),
            Arc::new(SimpleType::<f64>::new()),
            Arc::new(SimpleType::<String>::new()),
            Arc::new(SimpleType::<Ustr>::new()),
            Arc::new(ClassRefType::new(None)),
        ];
        for ty in builtins {
            self.register(ty)?;
        }
        for (alias, target) in [("int", "int32"), ("uint", "uint32")] {
            let ty = self
                .find(target)
                .ok_or_else(|| RegistrationError::TypeNotFound(target.to_owned()))?;
            self.register_alternative_name(&ty, alias)?;
        }
        Ok(())
    }

    // ==========================================================================
    // Registration
    // ==========================================================================

    /// Register a type under its own name.
    pub fn register(&self, ty: TypeRef) -> Result<TypeRef, RegistrationError> {
        if self.is_shut_down() {
            return Err(RegistrationError::ShutDown);
        }
        let name = ty.name();
        validate_name(&name)?;
        {
            let mut names = self.names.lock();
            if names.contains_key(&name) {
                return Err(RegistrationError::DuplicateType(name.to_string()));
            }
            names.insert(name, ty.clone());
        }
        self.order.lock().push(ty.clone());
        if let Some(native) = ty.info().native {
            self.natives.lock().entry(native).or_insert_with(|| ty.clone());
        }
        if let Some(class) = class_arc(&ty) {
            self.index_members(&class);
            self.class_lists.lock().clear();
        }
        tracing::debug!(name = %name, kind = %ty.meta_type(), "registered type");
        Ok(ty)
    }

    /// Register a class and return it with its concrete type.
    pub fn register_class(&self, class: Arc<ClassType>) -> Result<Arc<ClassType>, RegistrationError> {
        self.register(class.clone())?;
        Ok(class)
    }

    /// Make `ty` reachable under `name` as well.
    pub fn register_alternative_name(&self, ty: &TypeRef, name: &str) -> Result<(), RegistrationError> {
        validate_name(name)?;
        let mut names = self.names.lock();
        match names.get(&Ustr::from(name)) {
            Some(existing) if same_type(existing.as_ref(), ty.as_ref()) => Ok(()),
            Some(existing) => Err(RegistrationError::DuplicateAlternativeName {
                name: name.to_owned(),
                existing: existing.name().to_string(),
            }),
            None => {
                names.insert(Ustr::from(name), ty.clone());
                Ok(())
            }
        }
    }

    /// Add a property to a registered class and index it.
    pub fn add_property(
        &self,
        class: &ClassType,
        property: Property,
    ) -> Result<Arc<Property>, RegistrationError> {
        let property = class.add_property(property)?;
        self.properties.lock().insert(property.hash(), property.clone());
        Ok(property)
    }

    /// Add a function to a registered class and index it.
    pub fn add_function(
        &self,
        class: &ClassType,
        function: Function,
    ) -> Result<Arc<Function>, RegistrationError> {
        let function = class.add_function(function)?;
        self.functions.lock().insert(function.hash(), function.clone());
        Ok(function)
    }

    /// Set the base class of a registered class.
    pub fn set_base(&self, class: &ClassType, base: Arc<ClassType>) -> Result<(), RegistrationError> {
        class.set_base(base)?;
        self.class_lists.lock().clear();
        Ok(())
    }

    /// Install the loader used to resolve resource references while reading.
    pub fn set_resource_loader(&self, loader: ResourceLoader) {
        *self.resource_loader.write() = Some(loader);
    }

    fn index_members(&self, class: &ClassType) {
        let mut properties = self.properties.lock();
        for property in class.local_properties() {
            properties.insert(property.hash(), property);
        }
        drop(properties);
        let mut functions = self.functions.lock();
        for function in class.local_functions() {
            functions.insert(function.hash(), function);
        }
    }

    // ==========================================================================
    // Lookup
    // ==========================================================================

    /// Find a type by name, synthesizing compound names on first use.
    pub fn find(&self, name: &str) -> Option<TypeRef> {
        if let Some(ty) = self.find_existing(name) {
            return Some(ty);
        }
        if self.is_shut_down() {
            return None;
        }
        let compound = CompoundName::parse(name)?;
        let built = self.synthesize(compound)?;
        Some(self.intern(name, built))
    }

    /// Find a type, failing with [`RegistrationError::TypeNotFound`].
    pub fn require(&self, name: &str) -> Result<TypeRef, RegistrationError> {
        self.find(name)
            .ok_or_else(|| RegistrationError::TypeNotFound(name.to_owned()))
    }

    /// Find a class by name.
    pub fn find_class(&self, name: &str) -> Option<Arc<ClassType>> {
        self.find(name).as_ref().and_then(class_arc)
    }

    /// Find the type bound to a Rust type.
    pub fn map_native_type(&self, hash: NativeTypeHash) -> Option<TypeRef> {
        self.natives.lock().get(&hash).cloned()
    }

    /// Find a property by its hash.
    pub fn find_property(&self, hash: TypeHash) -> Option<Arc<Property>> {
        self.properties.lock().get(&hash).cloned()
    }

    /// Find a class function by its hash.
    pub fn find_function(&self, hash: TypeHash) -> Option<Arc<Function>> {
        self.functions.lock().get(&hash).cloned()
    }

    /// Every registered type, in registration order.
    pub fn types(&self) -> Vec<TypeRef> {
        self.order.lock().clone()
    }

    /// Number of distinct registered types.
    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_existing(&self, name: &str) -> Option<TypeRef> {
        let key = Ustr::from_existing(name)?;
        self.names.lock().get(&key).cloned()
    }

    fn synthesize(&self, compound: CompoundName<'_>) -> Option<TypeRef> {
        let class = |name: &str| self.find_class(name);
        let ty: TypeRef = match compound {
            CompoundName::Array(inner) => Arc::new(ArrayType::new_dynamic(self.find(inner)?)),
            CompoundName::NativeArray(count, inner) => {
                Arc::new(ArrayType::new_native(self.find(inner)?, count)?)
            }
            CompoundName::Handle(inner) => Arc::new(HandleType::new_strong(class(inner)?)),
            CompoundName::Weak(inner) => Arc::new(HandleType::new_weak(class(inner)?)),
            CompoundName::Resource(inner) => Arc::new(ResourceRefType::new(class(inner)?)),
            CompoundName::ClassRef(None) => {
                return self
                    .find_existing(ClassRefType::ANY_NAME)
                    .or_else(|| Some(Arc::new(ClassRefType::new(None))));
            }
            CompoundName::ClassRef(Some(inner)) => Arc::new(ClassRefType::new(Some(class(inner)?))),
        };
        Some(ty)
    }

    /// Store a synthesized type under its canonical name and under `requested`.
    ///
    /// When another thread or spelling got there first, the existing instance
    /// wins and `built` is discarded.
    fn intern(&self, requested: &str, built: TypeRef) -> TypeRef {
        let canonical = built.name();
        let mut names = self.names.lock();
        let (ty, fresh) = match names.get(&canonical) {
            Some(existing) => (existing.clone(), false),
            None => {
                names.insert(canonical, built.clone());
                (built, true)
            }
        };
        names.entry(Ustr::from(requested)).or_insert_with(|| ty.clone());
        drop(names);
        if fresh {
            self.order.lock().push(ty.clone());
            tracing::debug!(name = %canonical, "synthesized compound type");
        }
        ty
    }

    // ==========================================================================
    // Class enumeration
    // ==========================================================================

    /// Classes deriving from `base` (all classes for `None`), including `base`.
    ///
    /// Abstract classes are skipped unless `allow_abstract`. The unfiltered
    /// concrete list is cached per base until the next class registration.
    pub fn enum_classes(
        &self,
        base: Option<&ClassType>,
        filter: Option<&dyn Fn(&ClassType) -> bool>,
        allow_abstract: bool,
    ) -> Vec<Arc<ClassType>> {
        let cacheable = filter.is_none() && !allow_abstract;
        let key = base.map_or(0, |b| std::ptr::from_ref(b) as usize);
        if cacheable {
            if let Some(list) = self.class_lists.lock().get(&key) {
                return list.to_vec();
            }
        }
        let classes: Vec<Arc<ClassType>> = self
            .types()
            .iter()
            .filter_map(class_arc)
            .filter(|class| class.is(base))
            .filter(|class| allow_abstract || !class.is_abstract())
            .filter(|class| filter.is_none_or(|f| f(class.as_ref())))
            .collect();
        if cacheable {
            self.class_lists.lock().insert(key, classes.clone().into());
        }
        classes
    }

    // ==========================================================================
    // Shutdown
    // ==========================================================================

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Release every type in two passes: drop cross references, then free.
    ///
    /// Lookups return nothing and registration fails afterwards. Calling it
    /// again does nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let types = std::mem::take(&mut *self.order.lock());
        tracing::debug!(count = types.len(), "shutting down type registry");
        for ty in &types {
            ty.release_type_refs();
        }
        self.class_lists.lock().clear();
        self.properties.lock().clear();
        self.functions.lock().clear();
        self.natives.lock().clear();
        self.names.lock().clear();
        *self.resource_loader.write() = None;
        drop(types);
    }
}

impl Drop for TypeRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl TypeResolver for TypeRegistry {
    fn find_type(&self, name: &str) -> Option<TypeRef> {
        self.find(name)
    }

    fn find_native(&self, hash: NativeTypeHash) -> Option<TypeRef> {
        self.map_native_type(hash)
    }

    fn find_class(&self, name: &str) -> Option<Arc<ClassType>> {
        TypeRegistry::find_class(self, name)
    }

    fn resolve_resource(&self, class: &ClassType, key: Ustr) -> ObjectPtr {
        let loader = self.resource_loader.read().clone();
        match loader {
            Some(loader) => loader(class, key),
            None => ObjectPtr::null(),
        }
    }
}

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(RegistrationError::InvalidTypeName(name.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metatype_core::{EnumType, FieldDef, MetaType, SimpleKind};

    fn point(registry: &TypeRegistry) -> Arc<ClassType> {
        let int = registry.find("int").unwrap();
        let class = ClassType::new_runtime(
            "Point",
            None,
            vec![FieldDef::new("x", int.clone()), FieldDef::new("y", int)],
        )
        .unwrap();
        registry.register_class(class).unwrap()
    }

    #[test]
    fn builtins_and_alternative_names() {
        let registry = TypeRegistry::with_builtins();
        let int = registry.find("int").unwrap();
        assert_eq!(int.name().as_str(), "int32");
        assert!(same_type(int.as_ref(), registry.find("int32").unwrap().as_ref()));
        assert_eq!(registry.find("ClassRef").unwrap().meta_type(), MetaType::ClassRef);
        assert!(registry.find_native_of::<f64>().is_some());
        assert!(registry.find("nope").is_none());
    }

    #[test]
    fn builtins_register_once() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.register_builtins(), Ok(()));
        let count = registry.len();
        assert_eq!(
            registry.register_builtins(),
            Err(RegistrationError::DuplicateType("void".into()))
        );
        assert_eq!(registry.len(), count);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = TypeRegistry::with_builtins();
        let err = registry.register(Arc::new(SimpleType::<i32>::new())).unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateType("int32".into()));

        let float = registry.find("float").unwrap();
        let err = registry.register_alternative_name(&float, "int").unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateAlternativeName { .. }));
        registry.register_alternative_name(&float, "real").unwrap();
        registry.register_alternative_name(&float, "real").unwrap();
    }

    #[test]
    fn compound_names_are_cached() {
        let registry = TypeRegistry::with_builtins();
        let before = registry.len();
        let a = registry.find("array<int>").unwrap();
        let b = registry.find("array<int>").unwrap();
        let c = registry.find("array<int32>").unwrap();
        assert!(same_type(a.as_ref(), b.as_ref()));
        assert!(same_type(a.as_ref(), c.as_ref()));
        assert_eq!(registry.len(), before + 1);
        assert_eq!(registry.find("[3]array<int32>").unwrap().size(), 3 * a.size());
        assert!(registry.find("array<missing>").is_none());
    }

    #[test]
    fn class_compounds_require_classes() {
        let registry = TypeRegistry::with_builtins();
        point(&registry);
        assert_eq!(registry.find("handle<Point>").unwrap().meta_type(), MetaType::StrongHandle);
        assert_eq!(registry.find("weak<Point>").unwrap().meta_type(), MetaType::WeakHandle);
        assert_eq!(registry.find("resource<Point>").unwrap().name().as_str(), "resource<Point>");
        assert_eq!(registry.find("class<Point>").unwrap().name().as_str(), "class<Point>");
        assert!(same_type(
            registry.find("class<>").unwrap().as_ref(),
            registry.find("ClassRef").unwrap().as_ref()
        ));
        assert!(registry.find("handle<int32>").is_none());
    }

    #[test]
    fn members_are_indexed_by_hash() {
        let registry = TypeRegistry::with_builtins();
        let class = point(&registry);
        let x = class.find_property("x").unwrap();
        let found = registry.find_property(x.hash()).unwrap();
        assert!(Arc::ptr_eq(&x, &found));
    }

    #[test]
    fn enum_classes_walks_the_hierarchy() {
        let registry = TypeRegistry::with_builtins();
        let shape = registry.register_class(ClassType::new_abstract("Shape", 0, 1)).unwrap();
        let circle = ClassType::new_runtime("Circle", Some(shape.clone()), Vec::new()).unwrap();
        registry.register_class(circle).unwrap();
        let square = ClassType::new_runtime("Square", Some(shape.clone()), Vec::new()).unwrap();
        registry.register_class(square).unwrap();
        point(&registry);

        let names = |list: Vec<Arc<ClassType>>| list.iter().map(|c| c.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(registry.enum_classes(Some(shape.as_ref()), None, false)), ["Circle", "Square"]);
        assert_eq!(
            names(registry.enum_classes(Some(shape.as_ref()), None, true)),
            ["Shape", "Circle", "Square"]
        );
        let only_square = |c: &ClassType| c.name().as_str() == "Square";
        assert_eq!(names(registry.enum_classes(Some(shape.as_ref()), Some(&only_square), false)), ["Square"]);
        assert_eq!(registry.enum_classes(None, None, false).len(), 3);

        let late = ClassType::new_runtime("Triangle", Some(shape.clone()), Vec::new()).unwrap();
        registry.register_class(late).unwrap();
        assert_eq!(registry.enum_classes(Some(shape.as_ref()), None, false).len(), 3);
    }

    #[test]
    fn shutdown_releases_cycles() {
        let registry = TypeRegistry::with_builtins();
        let node = ClassType::new_abstract("Node", 0, 1);
        registry.register_class(node.clone()).unwrap();
        let handle = registry.find("handle<Node>").unwrap();
        let weak_class = Arc::downgrade(&node);
        drop(node);
        drop(handle);
        registry.shutdown();
        assert!(weak_class.upgrade().is_none());
        assert!(registry.find("int32").is_none());
        let enum_type = EnumType::new("Late", SimpleKind::Int32, [("A", 0)]).unwrap();
        assert_eq!(registry.register(Arc::new(enum_type)).unwrap_err(), RegistrationError::ShutDown);
    }
}
