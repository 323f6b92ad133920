//! Text codec over `serde_json` trees.
//!
//! Class instances become JSON objects holding the properties that differ from
//! the default object, in declaration order. Handles become `null`,
//! `{"class": name, "data": {..}}` on first occurrence or `{"ref": index}`
//! afterwards. Unlike the binary codec, unknown property names are an error.

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::error::StreamError;
use crate::object::{Object, ObjectPtr, ObjectWeakPtr};
use crate::resolver::TypeResolver;
use crate::storage::DataBlob;
use crate::types::{ClassType, Type};

const KEY_CLASS: &str = "class";
const KEY_DATA: &str = "data";
const KEY_REF: &str = "ref";

/// Options for [`TextWriter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextWriterOptions {
    /// Write properties even when they equal the default object.
    pub save_defaults: bool,
    /// Indent the rendered text.
    pub pretty: bool,
}

/// Builds text trees from values.
#[derive(Debug, Default)]
pub struct TextWriter {
    options: TextWriterOptions,
    objects: FxHashMap<usize, u64>,
    retained: Vec<ObjectPtr>,
}

impl TextWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TextWriterOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    #[inline]
    pub fn options(&self) -> TextWriterOptions {
        self.options
    }

    fn object_index(&self, object: &ObjectPtr) -> Option<u64> {
        self.objects.get(&object.addr()).copied()
    }

    /// Convert an owning handle into a node.
    pub fn write_object(&mut self, object: &ObjectPtr) -> Result<Value, StreamError> {
        let Some(target) = object.get() else {
            return Ok(Value::Null);
        };
        if let Some(index) = self.object_index(object) {
            return Ok(back_ref(index));
        }
        self.objects
            .insert(object.addr(), self.retained.len() as u64);
        self.retained.push(object.clone());

        let class = target.class();
        // SAFETY: object storage holds a constructed instance of its class.
        let data = unsafe { class.write_text(self, target.data(), None)? };
        let mut node = Map::new();
        node.insert(KEY_CLASS.into(), Value::String(class.name().as_str().to_owned()));
        node.insert(KEY_DATA.into(), data);
        Ok(Value::Object(node))
    }

    /// Convert a non-owning handle into a node. Targets not yet written are
    /// written in full, exactly like an owning handle.
    pub fn write_weak_object(&mut self, object: &ObjectWeakPtr) -> Result<Value, StreamError> {
        self.write_object(&object.upgrade())
    }
}

fn back_ref(index: u64) -> Value {
    let mut node = Map::new();
    node.insert(KEY_REF.into(), Value::from(index));
    Value::Object(node)
}

/// Reads values from text trees.
pub struct TextReader<'a> {
    resolver: Option<&'a dyn TypeResolver>,
    objects: Vec<ObjectPtr>,
}

impl<'a> TextReader<'a> {
    /// Create a reader. Without a resolver, handles and class references
    /// cannot be read.
    pub fn new(resolver: Option<&'a dyn TypeResolver>) -> Self {
        Self {
            resolver,
            objects: Vec::new(),
        }
    }

    pub fn resolver(&self) -> Option<&'a dyn TypeResolver> {
        self.resolver
    }

    /// The resolver, or an [`StreamError::UnknownType`] naming `what`.
    pub fn require_resolver(&self, what: &str) -> Result<&'a dyn TypeResolver, StreamError> {
        self.resolver
            .ok_or_else(|| StreamError::UnknownType(what.to_owned()))
    }

    /// Read an owning handle node.
    pub fn read_object(
        &mut self,
        node: &Value,
        expected: Option<&ClassType>,
    ) -> Result<ObjectPtr, StreamError> {
        let map = match node {
            Value::Null => return Ok(ObjectPtr::null()),
            Value::Object(map) => map,
            other => return Err(StreamError::MalformedText(format!("expected handle, found {other}"))),
        };
        if let Some(index) = map.get(KEY_REF) {
            let object = self.back_ref(index)?;
            check_class(&object, expected)?;
            return Ok(object);
        }
        let name = map
            .get(KEY_CLASS)
            .and_then(Value::as_str)
            .ok_or_else(|| StreamError::MalformedText("handle without class".into()))?;
        let class = self
            .require_resolver(name)?
            .find_class(name)
            .ok_or_else(|| StreamError::UnknownType(name.to_owned()))?;
        let object = Object::create(&class);
        check_class(&object, expected)?;
        let Some(target) = object.get() else {
            return Err(StreamError::invalid_value(name, "class is abstract"));
        };
        self.objects.push(object.clone());
        if let Some(data) = map.get(KEY_DATA) {
            // SAFETY: freshly created instance of `class`.
            unsafe { class.read_text(self, data, target.data_mut())? };
        }
        Ok(object)
    }

    /// Read a non-owning handle node.
    ///
    /// The reader keeps every object it creates alive until it is dropped, so
    /// an owning handle later in the tree can still reach a target first met
    /// through a weak handle.
    pub fn read_weak_object(
        &mut self,
        node: &Value,
        expected: Option<&ClassType>,
    ) -> Result<ObjectWeakPtr, StreamError> {
        Ok(self.read_object(node, expected)?.downgrade())
    }

    fn back_ref(&self, index: &Value) -> Result<ObjectPtr, StreamError> {
        index
            .as_u64()
            .and_then(|i| self.objects.get(i as usize))
            .cloned()
            .ok_or_else(|| StreamError::MalformedText(format!("unknown object reference {index}")))
    }
}

fn check_class(object: &ObjectPtr, expected: Option<&ClassType>) -> Result<(), StreamError> {
    match (object.class(), expected) {
        (Some(class), Some(expected)) if !class.is(Some(expected)) => {
            Err(StreamError::invalid_value(
                expected.name().as_str(),
                format!("object of class '{}' is not compatible", class.name()),
            ))
        }
        _ => Ok(()),
    }
}

fn render(node: &Value, pretty: bool) -> Result<String, StreamError> {
    let text = if pretty {
        serde_json::to_string_pretty(node)
    } else {
        serde_json::to_string(node)
    };
    text.map_err(|e| StreamError::MalformedText(e.to_string()))
}

fn parse(text: &str) -> Result<Value, StreamError> {
    serde_json::from_str(text).map_err(|e| StreamError::MalformedText(e.to_string()))
}

// ==============================================================================
// Entry points
// ==============================================================================

/// Convert the value at `data` into a text tree with default options.
///
/// # Safety
/// `data` must hold a constructed value of `ty`.
pub unsafe fn value_to_text(ty: &dyn Type, data: *const u8) -> Result<Value, StreamError> {
    let mut writer = TextWriter::new();
    unsafe { ty.write_text(&mut writer, data, None) }
}

/// Read a text tree into the value at `data`.
///
/// # Safety
/// `data` must hold a constructed value of `ty`.
pub unsafe fn value_from_text(
    ty: &dyn Type,
    node: &Value,
    data: *mut u8,
    resolver: Option<&dyn TypeResolver>,
) -> Result<(), StreamError> {
    let mut reader = TextReader::new(resolver);
    unsafe { ty.read_text(&mut reader, node, data) }
}

/// Render a value as text.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn save_text(value: &DataBlob, options: TextWriterOptions) -> Result<String, StreamError> {
    let mut writer = TextWriter::with_options(options);
    // SAFETY: the blob holds a constructed value of its type.
    let node = unsafe { value.ty().write_text(&mut writer, value.as_ptr(), None)? };
    render(&node, options.pretty)
}

/// Load text written by [`save_text`] into `value`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn load_text(
    text: &str,
    value: &mut DataBlob,
    resolver: Option<&dyn TypeResolver>,
) -> Result<(), StreamError> {
    let node = parse(text)?;
    let ty = value.ty().clone();
    // SAFETY: the blob holds a constructed value of its type.
    unsafe { value_from_text(ty.as_ref(), &node, value.as_mut_ptr(), resolver) }
}

/// Render an object graph rooted at `object` as text.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn save_object_text(object: &ObjectPtr, options: TextWriterOptions) -> Result<String, StreamError> {
    let mut writer = TextWriter::with_options(options);
    let node = writer.write_object(object)?;
    render(&node, options.pretty)
}

/// Load an object graph written by [`save_object_text`].
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn load_object_text(text: &str, resolver: &dyn TypeResolver) -> Result<ObjectPtr, StreamError> {
    let node = parse(text)?;
    TextReader::new(Some(resolver)).read_object(&node, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::types::{SimpleType, TypeRef};

    #[test]
    fn simple_values_render_as_json() {
        let ty: TypeRef = Arc::new(SimpleType::<i32>::new());
        let mut value = DataBlob::new(ty);
        unsafe { *value.as_mut_ptr().cast::<i32>() = 12 };
        assert_eq!(save_text(&value, TextWriterOptions::default()).unwrap(), "12");

        load_text("-4", &mut value, None).unwrap();
        assert_eq!(unsafe { *value.as_ptr().cast::<i32>() }, -4);
    }

    #[test]
    fn wrong_node_kind_is_rejected() {
        let ty: TypeRef = Arc::new(SimpleType::<bool>::new());
        let mut value = DataBlob::new(ty);
        assert!(matches!(
            load_text("\"yes\"", &mut value, None),
            Err(StreamError::InvalidValue { .. })
        ));
        assert!(matches!(
            load_text("{", &mut value, None),
            Err(StreamError::MalformedText(_))
        ));
    }

    #[test]
    fn null_handle_and_missing_resolver() {
        assert_eq!(
            save_object_text(&ObjectPtr::null(), TextWriterOptions::default()).unwrap(),
            "null"
        );
        let mut reader = TextReader::new(None);
        let node = serde_json::json!({ "class": "Point", "data": {} });
        assert_eq!(
            reader.read_object(&node, None),
            Err(StreamError::UnknownType("Point".into()))
        );
    }

    #[test]
    fn weak_handles_read_like_owning_handles() {
        let mut reader = TextReader::new(None);
        assert!(reader.read_weak_object(&Value::Null, None).unwrap().is_null());
        assert!(matches!(
            reader.read_weak_object(&serde_json::json!({ "class": "A" }), None),
            Err(StreamError::UnknownType(name)) if name == "A"
        ));
        assert!(matches!(
            reader.read_weak_object(&serde_json::json!({ "ref": 0 }), None),
            Err(StreamError::MalformedText(_))
        ));
    }
}
