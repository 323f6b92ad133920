//! Loading data written by an older or newer class layout.

use std::sync::{Arc, Mutex};

use metatype::prelude::*;
use pretty_assertions::assert_eq;

fn types_with(fields: &[(&str, &str)]) -> TypeRegistry {
    let types = metatype::type_system().unwrap();
    let mut class = types.class("A");
    for (name, ty) in fields {
        class = class.field(name, ty).unwrap();
    }
    class.build().unwrap();
    types
}

fn set_text(value: &mut DataBlob, path: &str, text: &str) {
    assert_eq!(TypedMemory::of_blob(value).set_path_text(path, text), DataViewResult::Ok);
}

#[test]
fn removed_property_is_reported_once() {
    let old = types_with(&[("x", "int32"), ("y", "int32")]);
    let mut saved = DataBlob::new(old.find("A").unwrap());
    set_text(&mut saved, "x", "4");
    set_text(&mut saved, "y", "9");
    let bytes = save_binary(&saved, BinaryWriterOptions::default()).unwrap();

    let new = types_with(&[("x", "int32")]);
    let mut loaded = DataBlob::new(new.find("A").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut loaded, &new, &mut errors).unwrap();

    assert_eq!(TypedMemory::of_blob(&mut loaded).member("x").unwrap().get::<i32>(&new), Ok(4));
    assert_eq!(
        errors.events(),
        &[LoadEvent::PropertyMissing {
            class: "A".into(),
            property: "y".into(),
        }]
    );
}

#[test]
fn changed_type_is_converted() {
    let old = types_with(&[("x", "int32")]);
    let mut saved = DataBlob::new(old.find("A").unwrap());
    set_text(&mut saved, "x", "5");
    let bytes = save_binary(&saved, BinaryWriterOptions::default()).unwrap();

    let new = types_with(&[("x", "float")]);
    let mut loaded = DataBlob::new(new.find("A").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut loaded, &new, &mut errors).unwrap();

    assert_eq!(TypedMemory::of_blob(&mut loaded).member("x").unwrap().get::<f32>(&new), Ok(5.0));
    assert_eq!(
        errors.events(),
        &[LoadEvent::PropertyTypeChanged {
            class: "A".into(),
            property: "x".into(),
            saved_type: "int32".into(),
            current_type: "float".into(),
            handled: true,
        }]
    );
}

#[test]
fn unconvertible_value_is_discarded() {
    let old = types_with(&[("x", "string"), ("z", "int32")]);
    let mut saved = DataBlob::new(old.find("A").unwrap());
    set_text(&mut saved, "x", "seven");
    set_text(&mut saved, "z", "1");
    let bytes = save_binary(&saved, BinaryWriterOptions::default()).unwrap();

    let new = types_with(&[("x", "int32"), ("z", "int32")]);
    let mut loaded = DataBlob::new(new.find("A").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut loaded, &new, &mut errors).unwrap();

    let view = TypedMemory::of_blob(&mut loaded);
    assert_eq!(view.member("x").unwrap().get::<i32>(&new), Ok(0));
    assert_eq!(view.member("z").unwrap().get::<i32>(&new), Ok(1));
    assert!(matches!(
        errors.events(),
        [LoadEvent::PropertyTypeChanged { handled: false, .. }]
    ));
}

#[test]
fn missing_type_is_skipped() {
    let old = metatype::type_system().unwrap();
    old.enumeration("Mood").option("Calm", 1).option("Angry", 2).build().unwrap();
    old.class("A")
        .field("mood", "Mood")
        .unwrap()
        .field("x", "int32")
        .unwrap()
        .build()
        .unwrap();
    let mut saved = DataBlob::new(old.find("A").unwrap());
    set_text(&mut saved, "mood", "Angry");
    set_text(&mut saved, "x", "8");
    let bytes = save_binary(&saved, BinaryWriterOptions::default()).unwrap();

    // the enum no longer exists; the property is now a plain integer
    let new = types_with(&[("mood", "int32"), ("x", "int32")]);
    let mut loaded = DataBlob::new(new.find("A").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut loaded, &new, &mut errors).unwrap();

    let view = TypedMemory::of_blob(&mut loaded);
    assert_eq!(view.member("x").unwrap().get::<i32>(&new), Ok(8));
    assert_eq!(view.member("mood").unwrap().get::<i32>(&new), Ok(0));
    assert_eq!(
        errors.events(),
        &[LoadEvent::PropertyTypeMissing {
            class: "A".into(),
            property: "mood".into(),
            type_name: "Mood".into(),
        }]
    );
}

#[derive(Default)]
struct Rename {
    seen: Mutex<Vec<String>>,
}

impl ObjectHooks for Rename {
    fn on_property_missing_raw(
        &self,
        object: *mut u8,
        name: Ustr,
        type_name: Ustr,
        raw: &[u8],
    ) -> bool {
        self.seen.lock().unwrap().push(format!("{name}:{type_name}"));
        if name.as_str() != "old_x" || raw.len() != 4 {
            return false;
        }
        // the renamed property lives at offset 0
        let value = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        unsafe { *object.cast::<i32>() = value };
        true
    }
}

#[test]
fn unrepresentable_saved_type_is_missing() {
    let nested = "array<array<array<int32>>>";
    let oversized = "[4611686018427387905]int32";
    assert_eq!(nested.len(), oversized.len());

    let old = types_with(&[("grid", nested), ("x", "int32")]);
    let mut saved = DataBlob::new(old.find("A").unwrap());
    set_text(&mut saved, "grid", "[[[1]]]");
    set_text(&mut saved, "x", "6");
    let mut bytes = save_binary(&saved, BinaryWriterOptions::default()).unwrap();
    let at = bytes
        .windows(nested.len())
        .position(|w| w == nested.as_bytes())
        .unwrap();
    bytes[at..at + nested.len()].copy_from_slice(oversized.as_bytes());

    let new = types_with(&[("grid", nested), ("x", "int32")]);
    assert!(new.find(oversized).is_none());
    let mut loaded = DataBlob::new(new.find("A").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut loaded, &new, &mut errors).unwrap();

    assert_eq!(TypedMemory::of_blob(&mut loaded).member("x").unwrap().get::<i32>(&new), Ok(6));
    assert_eq!(
        errors.events(),
        &[LoadEvent::PropertyTypeMissing {
            class: "A".into(),
            property: "grid".into(),
            type_name: oversized.into(),
        }]
    );
}

#[test]
fn hooks_see_missing_properties_first() {
    let old = types_with(&[("old_x", "int32")]);
    let mut saved = DataBlob::new(old.find("A").unwrap());
    set_text(&mut saved, "old_x", "12");
    let bytes = save_binary(&saved, BinaryWriterOptions::default()).unwrap();

    let new = types_with(&[("x", "int32")]);
    let hooks = Arc::new(Rename::default());
    new.find_class("A").unwrap().set_hooks(hooks.clone());
    let mut loaded = DataBlob::new(new.find("A").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut loaded, &new, &mut errors).unwrap();

    assert!(errors.is_empty());
    assert_eq!(TypedMemory::of_blob(&mut loaded).member("x").unwrap().get::<i32>(&new), Ok(12));
    assert_eq!(*hooks.seen.lock().unwrap(), vec!["old_x:int32".to_string()]);
}

#[test]
fn text_rejects_unknown_elements() {
    let types = types_with(&[("x", "int32")]);
    let mut value = DataBlob::new(types.find("A").unwrap());
    let err = load_text(r#"{"x":1,"y":2}"#, &mut value, Some(&types)).unwrap_err();
    assert_eq!(
        err,
        metatype::core::StreamError::UnknownElement {
            class: "A".into(),
            name: "y".into(),
        }
    );
}
