//! Values equal to the default object are never written.

use metatype::prelude::*;
use pretty_assertions::assert_eq;

fn settings() -> (TypeRegistry, TypeRef) {
    let types = metatype::type_system().unwrap();
    types
        .class("Settings")
        .field_default("volume", "float", "0.8")
        .unwrap()
        .field("name", "string")
        .unwrap()
        .field("history", "array<int32>")
        .unwrap()
        .build()
        .unwrap();
    let ty = types.find("Settings").unwrap();
    (types, ty)
}

#[test]
fn changed_then_restored_is_byte_identical() {
    let (types, ty) = settings();
    let untouched = DataBlob::new(ty.clone());
    let expected = save_binary(&untouched, BinaryWriterOptions::default()).unwrap();
    let expected_text = save_text(&untouched, TextWriterOptions::default()).unwrap();
    assert_eq!(expected_text, "{}");

    let mut edited = DataBlob::new(ty);
    let mut view = TypedMemory::of_blob(&mut edited);
    assert!(view.member_mut("volume").unwrap().set(&types, 0.1f32).is_ok());
    assert!(view.member_mut("name").unwrap().set_text("custom").is_ok());
    assert!(view.member_mut("history").unwrap().resize(4).is_ok());
    assert_ne!(save_binary(&edited, BinaryWriterOptions::default()).unwrap(), expected);

    let mut view = TypedMemory::of_blob(&mut edited);
    assert!(view.member_mut("volume").unwrap().set_text("0.8").is_ok());
    assert!(view.member_mut("name").unwrap().set_text("").is_ok());
    assert!(view.member_mut("history").unwrap().resize(0).is_ok());
    assert_eq!(save_binary(&edited, BinaryWriterOptions::default()).unwrap(), expected);
    assert_eq!(save_text(&edited, TextWriterOptions::default()).unwrap(), expected_text);
}

#[test]
fn save_defaults_option_forces_everything() {
    let (_types, ty) = settings();
    let value = DataBlob::new(ty);
    let sparse = save_binary(&value, BinaryWriterOptions::default()).unwrap();
    let full = save_binary(&value, BinaryWriterOptions { save_defaults: true }).unwrap();
    assert!(full.len() > sparse.len());
}

struct AlwaysSaveName;

impl ObjectHooks for AlwaysSaveName {
    fn should_save_property(&self, _object: *const u8, property: &Property) -> Option<bool> {
        (property.name().as_str() == "name").then_some(true)
    }
}

#[test]
fn hooks_can_force_a_property() {
    let (types, ty) = settings();
    types
        .find_class("Settings")
        .unwrap()
        .set_hooks(std::sync::Arc::new(AlwaysSaveName));
    let value = DataBlob::new(ty);
    assert_eq!(
        save_text(&value, TextWriterOptions::default()).unwrap(),
        r#"{"name":""}"#
    );
}

#[test]
fn transient_properties_are_never_written() {
    let types = metatype::type_system().unwrap();
    types
        .class("Cache")
        .field_with_flags("scratch", "int32", PropertyFlags::TRANSIENT)
        .unwrap()
        .build()
        .unwrap();
    let mut value = DataBlob::new(types.find("Cache").unwrap());
    assert!(TypedMemory::of_blob(&mut value).set_path_text("scratch", "9").is_ok());
    let options = TextWriterOptions {
        save_defaults: true,
        pretty: false,
    };
    assert_eq!(save_text(&value, options).unwrap(), "{}");
}
