//! Heap objects and the handles that point at them.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::storage::DataBlob;
use crate::types::{ClassType, Type, TypeRef};

/// A heap allocated instance of a class.
pub struct Object {
    class: Arc<ClassType>,
    storage: DataBlob,
}

impl Object {
    pub(crate) fn from_blob(class: Arc<ClassType>, storage: DataBlob) -> Self {
        Self { class, storage }
    }

    /// Allocate a default-constructed instance of `class`.
    ///
    /// Returns a null handle for abstract classes.
    pub fn create(class: &Arc<ClassType>) -> ObjectPtr {
        if class.is_abstract() {
            return ObjectPtr::null();
        }
        let ty: TypeRef = Arc::clone(class) as TypeRef;
        let storage = DataBlob::new(ty);
        ObjectPtr::new(Self::from_blob(Arc::clone(class), storage))
    }

    /// Runtime class of the object.
    #[inline]
    pub fn class(&self) -> &Arc<ClassType> {
        &self.class
    }

    /// Address of the object's property block.
    #[inline]
    pub fn data(&self) -> *const u8 {
        self.storage.as_ptr()
    }

    /// Mutable address of the object's property block.
    ///
    /// Objects are shared through handles; callers must not hold overlapping
    /// references into the same property.
    #[inline]
    pub fn data_mut(&self) -> *mut u8 {
        self.storage.shared_mut_ptr()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class.name())
            .field("data", &self.storage)
            .finish()
    }
}

/// Owning handle to an [`Object`]. May be null.
#[derive(Clone, Default)]
pub struct ObjectPtr(Option<Arc<Object>>);

impl ObjectPtr {
    #[inline]
    pub fn null() -> Self {
        Self(None)
    }

    pub fn new(object: Object) -> Self {
        Self(Some(Arc::new(object)))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    #[inline]
    pub fn get(&self) -> Option<&Object> {
        self.0.as_deref()
    }

    pub fn class(&self) -> Option<&Arc<ClassType>> {
        self.get().map(Object::class)
    }

    pub fn downgrade(&self) -> ObjectWeakPtr {
        ObjectWeakPtr(self.0.as_ref().map(Arc::downgrade))
    }

    /// Identity of the pointee, `0` for null.
    #[inline]
    pub fn addr(&self) -> usize {
        self.0.as_ref().map_or(0, |object| Arc::as_ptr(object) as usize)
    }

    /// Number of strong handles to the object, `0` for null.
    pub fn strong_count(&self) -> usize {
        self.0.as_ref().map_or(0, Arc::strong_count)
    }
}

impl PartialEq for ObjectPtr {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ObjectPtr {}

impl fmt::Debug for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(object) => write!(f, "ObjectPtr({})", object.class.name()),
            None => f.write_str("ObjectPtr(null)"),
        }
    }
}

/// Non-owning handle to an [`Object`]. Reads as null once the object is gone.
#[derive(Clone, Default)]
pub struct ObjectWeakPtr(Option<Weak<Object>>);

impl ObjectWeakPtr {
    #[inline]
    pub fn null() -> Self {
        Self(None)
    }

    pub fn upgrade(&self) -> ObjectPtr {
        ObjectPtr(self.0.as_ref().and_then(Weak::upgrade))
    }

    /// Whether the handle no longer reaches a live object.
    pub fn is_null(&self) -> bool {
        self.0.as_ref().is_none_or(|weak| weak.strong_count() == 0)
    }

    /// Identity of the pointee, `0` for null or expired.
    pub fn addr(&self) -> usize {
        if self.is_null() {
            0
        } else {
            self.0.as_ref().map_or(0, |weak| weak.as_ptr() as usize)
        }
    }
}

impl PartialEq for ObjectWeakPtr {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ObjectWeakPtr {}

impl fmt::Debug for ObjectWeakPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade().get() {
            Some(object) => write!(f, "ObjectWeakPtr({})", object.class.name()),
            None => f.write_str("ObjectWeakPtr(null)"),
        }
    }
}
