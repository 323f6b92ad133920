//! Variant tables keep entry addresses stable while they grow.

use metatype::prelude::*;
use pretty_assertions::assert_eq;

#[test]
fn entry_addresses_are_stable() {
    let types = metatype::type_system().unwrap();
    let mut table = VariantTable::new();
    table.set(&types, "k", 1i32);
    let p = table.find("k").unwrap().data;
    table.set(&types, "m", 2i32);
    assert_eq!(table.find("k").unwrap().data, p);

    for i in 0..1000 {
        table.set(&types, &format!("filler{i}"), format!("value {i}"));
    }
    assert_eq!(table.find("k").unwrap().data, p);
    assert_eq!(unsafe { *p.cast::<i32>() }, 1);
    assert_eq!(table.len(), 1002);
    assert_eq!(
        table.get::<String>(&types, "filler999").as_deref(),
        Some("value 999")
    );
}

#[test]
fn tables_nest_inside_classes() {
    let types = metatype::type_system().unwrap();
    types
        .class("Entity")
        .field("name", "string")
        .unwrap()
        .field("props", "VariantTable")
        .unwrap()
        .build()
        .unwrap();
    let mut entity = DataBlob::new(types.find("Entity").unwrap());
    let mut view = TypedMemory::of_blob(&mut entity);
    let int = types.find("int32").unwrap();
    let mut props = view.member_mut("props").unwrap();
    assert!(props.insert_member("health", &int).unwrap().set_text("100").is_ok());
    assert_eq!(view.resolve("props.health").unwrap().format(), "100");

    let text = save_text(&entity, TextWriterOptions::default()).unwrap();
    assert_eq!(text, r#"{"props":{"health":{"type":"int32","value":100}}}"#);

    let bytes = save_binary(&entity, BinaryWriterOptions::default()).unwrap();
    let mut loaded = DataBlob::new(types.find("Entity").unwrap());
    let mut errors = ErrorCollector::new();
    load_binary(&bytes, &mut loaded, &types, &mut errors).unwrap();
    assert_eq!(loaded, entity);
}

#[test]
fn variants_move_between_tables() {
    let types = metatype::type_system().unwrap();
    let mut table = VariantTable::new();
    let value = Variant::from_value(&types, 0.5f64).unwrap();
    assert!(table.set_variant("ratio", &value));
    assert!(!table.set_variant("nothing", &Variant::new()));
    assert_eq!(table.get_variant("ratio"), Some(value));
    assert_eq!(table.get::<f32>(&types, "ratio"), Some(0.5));
    table.clear();
    assert!(table.is_empty());
}
