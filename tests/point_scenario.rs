//! The `Point{x, y}` walkthrough: only non-default members are saved.

use metatype::core::stream::{BINARY_MAGIC, BINARY_VERSION};
use metatype::prelude::*;
use pretty_assertions::assert_eq;

fn point_types() -> TypeRegistry {
    let types = metatype::type_system().unwrap();
    types
        .class("Point")
        .field_default("x", "int32", "0")
        .unwrap()
        .field_default("y", "int32", "0")
        .unwrap()
        .build()
        .unwrap();
    types
}

fn point(types: &TypeRegistry, x: i32, y: i32) -> DataBlob {
    let mut value = DataBlob::new(types.find("Point").unwrap());
    let mut view = TypedMemory::of_blob(&mut value);
    assert!(view.member_mut("x").unwrap().set(types, x).is_ok());
    assert!(view.member_mut("y").unwrap().set(types, y).is_ok());
    value
}

fn string(out: &mut Vec<u8>, text: &str) {
    out.push(text.len() as u8);
    out.extend_from_slice(text.as_bytes());
}

#[test]
fn binary_save_writes_only_x() {
    let types = point_types();
    let bytes = save_binary(&point(&types, 10, 0), BinaryWriterOptions::default()).unwrap();

    let mut expected = BINARY_MAGIC.to_vec();
    expected.extend_from_slice(&BINARY_VERSION.to_le_bytes());
    string(&mut expected, "Point");
    // first use of a property defines it inline
    expected.push(1);
    string(&mut expected, "Point");
    string(&mut expected, "x");
    string(&mut expected, "int32");
    expected.extend_from_slice(&4u32.to_le_bytes());
    expected.extend_from_slice(&10i32.to_le_bytes());
    expected.push(0);
    assert_eq!(bytes, expected);
}

#[test]
fn text_save_writes_only_x() {
    let types = point_types();
    let text = save_text(&point(&types, 10, 0), TextWriterOptions::default()).unwrap();
    assert_eq!(text, r#"{"x":10}"#);
}

#[test]
fn loading_into_a_fresh_point() {
    let types = point_types();
    let original = point(&types, 10, 0);

    let bytes = save_binary(&original, BinaryWriterOptions::default()).unwrap();
    let mut from_binary = DataBlob::new(types.find("Point").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut from_binary, &types, &mut errors).unwrap();
    assert!(errors.is_empty());
    assert_eq!(from_binary, original);

    let text = save_text(&original, TextWriterOptions::default()).unwrap();
    let mut from_text = DataBlob::new(types.find("Point").unwrap());
    load_text(&text, &mut from_text, Some(&types)).unwrap();
    assert_eq!(from_text, original);

    let view = TypedMemory::of_blob(&mut from_text);
    assert_eq!(view.member("x").unwrap().get::<i32>(&types), Ok(10));
    assert_eq!(view.member("y").unwrap().get::<i32>(&types), Ok(0));
}

#[test]
fn save_defaults_writes_everything() {
    let types = point_types();
    let options = TextWriterOptions {
        save_defaults: true,
        pretty: false,
    };
    let text = save_text(&point(&types, 10, 0), options).unwrap();
    assert_eq!(text, r#"{"x":10,"y":0}"#);
}

#[test]
fn defaults_come_from_field_text() {
    let types = metatype::type_system().unwrap();
    types
        .class("Spawn")
        .field_default("count", "int32", "3")
        .unwrap()
        .field_default("label", "string", "enemy")
        .unwrap()
        .build()
        .unwrap();
    let spawn = DataBlob::new(types.find("Spawn").unwrap());
    let view = TypedMemory::of_blob_ref(&spawn);
    assert_eq!(view.member("count").unwrap().format(), "3");
    assert_eq!(view.member("label").unwrap().format(), "enemy");
    assert_eq!(save_text(&spawn, TextWriterOptions::default()).unwrap(), "{}");
}
