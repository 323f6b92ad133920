//! Every kind survives a binary and a text round trip, with and without
//! default exclusion.

use std::sync::Arc;

use metatype::core::{CustomType, CustomTypeFuncs};
use metatype::prelude::*;
use pretty_assertions::assert_eq;

fn types() -> TypeRegistry {
    let types = metatype::type_system().unwrap();
    types
        .enumeration("Mood")
        .option("Calm", 0)
        .option("Angry", 5)
        .build()
        .unwrap();
    types
        .bitfield("Access")
        .flag("Read", 1)
        .flag("Write", 2)
        .flag("Exec", 4)
        .build()
        .unwrap();
    types
        .register(Arc::new(CustomType::new("Rgba", 4, 1, CustomTypeFuncs::default())))
        .unwrap();
    types.class("Leaf").field("v", "int32").unwrap().build().unwrap();
    types
        .class("Everything")
        .field("flag", "bool")
        .unwrap()
        .field("small", "int8")
        .unwrap()
        .field("big", "uint64")
        .unwrap()
        .field("ratio", "double")
        .unwrap()
        .field("title", "string")
        .unwrap()
        .field("tag", "name")
        .unwrap()
        .field("mood", "Mood")
        .unwrap()
        .field("access", "Access")
        .unwrap()
        .field("list", "array<int32>")
        .unwrap()
        .field("grid", "[3]float")
        .unwrap()
        .field("leaves", "array<Leaf>")
        .unwrap()
        .field("child", "handle<Leaf>")
        .unwrap()
        .field("peer", "weak<Leaf>")
        .unwrap()
        .field("kind", "class<Leaf>")
        .unwrap()
        .field("texture", "resource<Leaf>")
        .unwrap()
        .field("color", "Rgba")
        .unwrap()
        .build()
        .unwrap();
    types
        .class("Edges")
        .field_default("primes", "array<int32>", "[2, 3]")
        .unwrap()
        .field("nothing", "handle<Leaf>")
        .unwrap()
        .field_default("texture", "resource<Leaf>", "stone")
        .unwrap()
        .field("matrix", "array<array<int32>>")
        .unwrap()
        .field("cells", "[2]Leaf")
        .unwrap()
        .build()
        .unwrap();
    types
        .class("Owner")
        .field("peer", "weak<Leaf>")
        .unwrap()
        .field("children", "array<handle<Leaf>>")
        .unwrap()
        .field("child", "handle<Leaf>")
        .unwrap()
        .field("back", "weak<Leaf>")
        .unwrap()
        .build()
        .unwrap();
    types
}

#[derive(Debug, Clone, Copy)]
enum Codec {
    Binary,
    Text,
}

fn save(codec: Codec, value: &DataBlob, save_defaults: bool) -> Vec<u8> {
    match codec {
        Codec::Binary => save_binary(value, BinaryWriterOptions { save_defaults }).unwrap(),
        Codec::Text => save_text(
            value,
            TextWriterOptions {
                save_defaults,
                pretty: false,
            },
        )
        .unwrap()
        .into_bytes(),
    }
}

fn load(codec: Codec, types: &TypeRegistry, class: &str, bytes: &[u8]) -> DataBlob {
    let mut loaded = DataBlob::new(types.find(class).unwrap());
    match codec {
        Codec::Binary => {
            let mut errors = ErrorCollector::new();
            load_binary(bytes, &mut loaded, types, &mut errors).unwrap();
            assert!(errors.is_empty(), "{:?}", errors.events());
        }
        Codec::Text => {
            let text = std::str::from_utf8(bytes).unwrap();
            load_text(text, &mut loaded, Some(types)).unwrap();
        }
    }
    loaded
}

struct Case {
    class: &'static str,
    fill: fn(&TypeRegistry, &mut DataBlob),
    check: fn(&TypeRegistry, &DataBlob),
}

const CASES: [Case; 3] = [
    Case {
        class: "Everything",
        fill: fill_everything,
        check: check_everything,
    },
    Case {
        class: "Edges",
        fill: fill_edges,
        check: check_edges,
    },
    Case {
        class: "Owner",
        fill: fill_owner,
        check: check_owner,
    },
];

#[test]
fn values_survive_every_codec() {
    let types = types();
    for case in &CASES {
        let mut original = DataBlob::new(types.find(case.class).unwrap());
        (case.fill)(&types, &mut original);
        for codec in [Codec::Binary, Codec::Text] {
            for save_defaults in [false, true] {
                let saved = save(codec, &original, save_defaults);
                let loaded = load(codec, &types, case.class, &saved);
                assert_eq!(
                    save(codec, &loaded, save_defaults),
                    saved,
                    "{} {codec:?} save_defaults={save_defaults}",
                    case.class
                );
                (case.check)(&types, &loaded);
            }
        }
    }
}

fn fill_everything(types: &TypeRegistry, value: &mut DataBlob) {
    let class = types.find_class("Everything").unwrap();
    let mut view = TypedMemory::of_blob(value);
    for (path, text) in [
        ("flag", "true"),
        ("small", "-7"),
        ("big", "18446744073709551615"),
        ("ratio", "0.125"),
        ("title", "hello \"world\""),
        ("tag", "player"),
        ("mood", "Angry"),
        ("access", "Read|Exec"),
        ("kind", "Leaf"),
        ("texture", "textures/grass"),
        ("color", "ff000080"),
    ] {
        assert_eq!(view.set_path_text(path, text), DataViewResult::Ok, "{path}");
    }
    let mut list = view.member_mut("list").unwrap();
    for i in [3, 1, 4] {
        assert!(list.push().unwrap().set(types, i).is_ok());
    }
    assert!(view.set_path_text("grid[1]", "2.5").is_ok());
    assert!(view.member_mut("leaves").unwrap().resize(2).is_ok());
    assert!(view.set_path_text("leaves[1].v", "11").is_ok());

    let leaf = Object::create(&types.find_class("Leaf").unwrap());
    // SAFETY: nothing else views the new object.
    let mut leaf_view = unsafe { TypedMemory::of_object_mut(&leaf) }.unwrap();
    assert!(leaf_view.set_path_text("v", "3").is_ok());
    let child = class.find_property("child").unwrap();
    let peer = class.find_property("peer").unwrap();
    unsafe {
        assert!(child.set(value.as_mut_ptr(), leaf.clone()));
        assert!(peer.set(value.as_mut_ptr(), leaf.downgrade()));
    }
}

fn check_everything(types: &TypeRegistry, loaded: &DataBlob) {
    let class = types.find_class("Everything").unwrap();
    let child = class.find_property("child").unwrap();
    let peer = class.find_property("peer").unwrap();
    let (child, peer) = unsafe {
        (
            child.get::<ObjectPtr>(loaded.as_ptr()).unwrap(),
            peer.get::<ObjectWeakPtr>(loaded.as_ptr()).unwrap(),
        )
    };
    assert!(!child.is_null());
    assert_eq!(peer.upgrade(), child);

    let view = TypedMemory::of_blob_ref(loaded);
    for (path, text) in [
        ("flag", "true"),
        ("small", "-7"),
        ("big", "18446744073709551615"),
        ("mood", "Angry"),
        ("access", "Read|Exec"),
        ("list[2]", "4"),
        ("grid[1]", "2.5"),
        ("leaves[1].v", "11"),
        ("child.v", "3"),
        ("kind", "Leaf"),
        ("texture", "textures/grass"),
        ("color", "ff000080"),
    ] {
        assert_eq!(view.resolve(path).unwrap().format(), text, "{path}");
    }
    assert_eq!(view.member("title").unwrap().get::<String>(types).as_deref(), Ok("hello \"world\""));
    assert_eq!(view.member("tag").unwrap().get::<Ustr>(types), Ok(Ustr::from("player")));
}

fn fill_edges(_types: &TypeRegistry, value: &mut DataBlob) {
    let mut view = TypedMemory::of_blob(value);
    assert!(view.member_mut("primes").unwrap().resize(0).is_ok());
    assert!(view.set_path_text("texture", "").is_ok());
    assert!(view.set_path_text("matrix", "[[], [1, 2], []]").is_ok());
    assert!(view.set_path_text("cells[1].v", "9").is_ok());
}

fn check_edges(types: &TypeRegistry, loaded: &DataBlob) {
    let class = types.find_class("Edges").unwrap();
    let nothing = class.find_property("nothing").unwrap();
    assert!(unsafe { nothing.get::<ObjectPtr>(loaded.as_ptr()) }.unwrap().is_null());

    let view = TypedMemory::of_blob_ref(loaded);
    assert!(view.member("primes").unwrap().is_empty());
    assert_eq!(view.member("texture").unwrap().format(), "");
    let matrix = view.member("matrix").unwrap();
    assert_eq!(matrix.len(), 3);
    assert!(matrix.element(0).unwrap().is_empty());
    assert_eq!(matrix.format(), "[[],[1,2],[]]");
    assert!(view.resolve("matrix[2]").unwrap().is_empty());
    assert_eq!(view.member("cells").unwrap().len(), 2);
    assert_eq!(view.resolve("cells[0].v").unwrap().format(), "0");
    assert_eq!(view.resolve("cells[1].v").unwrap().format(), "9");
}

/// The weak field comes first, so the shared leaf is first met through it.
fn fill_owner(types: &TypeRegistry, value: &mut DataBlob) {
    let class = types.find_class("Owner").unwrap();
    let leaf_class = types.find_class("Leaf").unwrap();
    let leaf = Object::create(&leaf_class);
    let other = Object::create(&leaf_class);
    for (object, v) in [(&leaf, "5"), (&other, "6")] {
        // SAFETY: nothing else views the new objects.
        let mut view = unsafe { TypedMemory::of_object_mut(object) }.unwrap();
        assert!(view.set_path_text("v", v).is_ok());
    }
    let children = class.find_property("children").unwrap();
    let array = children.ty().as_array().unwrap();
    let handle = array.element().as_handle().unwrap();
    let base = value.as_mut_ptr();
    unsafe {
        assert!(class.find_property("peer").unwrap().set(base, leaf.downgrade()));
        assert!(class.find_property("child").unwrap().set(base, leaf.clone()));
        assert!(class.find_property("back").unwrap().set(base, leaf.downgrade()));
        let list = children.offset_ptr_mut(base);
        assert!(array.resize(list, 3));
        for (i, child) in [ObjectPtr::null(), other, leaf].iter().enumerate() {
            assert!(handle.set(array.element_ptr_mut(list, i).unwrap(), child));
        }
    }
}

fn check_owner(types: &TypeRegistry, loaded: &DataBlob) {
    let class = types.find_class("Owner").unwrap();
    let base = loaded.as_ptr();
    let (peer, child, back) = unsafe {
        (
            class.find_property("peer").unwrap().get::<ObjectWeakPtr>(base).unwrap(),
            class.find_property("child").unwrap().get::<ObjectPtr>(base).unwrap(),
            class.find_property("back").unwrap().get::<ObjectWeakPtr>(base).unwrap(),
        )
    };
    assert!(!child.is_null());
    assert_eq!(peer.upgrade(), child);
    assert_eq!(back.upgrade(), child);

    let children = class.find_property("children").unwrap();
    let array = children.ty().as_array().unwrap();
    let handle = array.element().as_handle().unwrap();
    let list = children.offset_ptr(base);
    let elements: Vec<ObjectPtr> = unsafe {
        (0..array.len(list))
            .map(|i| handle.get(array.element_ptr(list, i).unwrap()))
            .collect()
    };
    assert_eq!(elements.len(), 3);
    assert!(elements[0].is_null());
    assert!(!elements[1].is_null());
    assert_eq!(elements[2], child);

    let view = TypedMemory::of_blob_ref(loaded);
    assert_eq!(view.resolve("child.v").unwrap().format(), "5");
    assert_eq!(view.resolve("children[1].v").unwrap().format(), "6");
}

#[test]
fn weak_only_targets_end_with_the_load() {
    let types = types();
    types.class("Watcher").field("seen", "weak<Leaf>").unwrap().build().unwrap();
    let class = types.find_class("Watcher").unwrap();
    let leaf = Object::create(&types.find_class("Leaf").unwrap());
    let mut original = DataBlob::new(types.find("Watcher").unwrap());
    unsafe { class.find_property("seen").unwrap().set(original.as_mut_ptr(), leaf.downgrade()) };

    for codec in [Codec::Binary, Codec::Text] {
        let saved = save(codec, &original, false);
        let loaded = load(codec, &types, "Watcher", &saved);
        let seen = unsafe { class.find_property("seen").unwrap().get::<ObjectWeakPtr>(loaded.as_ptr()) };
        assert!(seen.unwrap().upgrade().is_null(), "{codec:?}");
    }
}

#[test]
fn object_graphs_share_objects() {
    let types = types();
    let leaf_class = types.find_class("Leaf").unwrap();
    types
        .class("Pair")
        .field("a", "handle<Leaf>")
        .unwrap()
        .field("b", "handle<Leaf>")
        .unwrap()
        .build()
        .unwrap();
    let pair_class = types.find_class("Pair").unwrap();
    let pair = Object::create(&pair_class);
    let shared = Object::create(&leaf_class);
    let base = pair.get().unwrap().data_mut();
    unsafe {
        pair_class.find_property("a").unwrap().set(base, shared.clone());
        pair_class.find_property("b").unwrap().set(base, shared.clone());
    }

    let bytes = save_object_binary(&pair, BinaryWriterOptions::default()).unwrap();
    let mut errors = ErrorCollector::new();
    let loaded = load_object_binary(&bytes, &types, &mut errors).unwrap();
    let text = save_object_text(&loaded, TextWriterOptions::default()).unwrap();
    let reloaded = load_object_text(&text, &types).unwrap();

    for object in [&loaded, &reloaded] {
        let data = object.get().unwrap().data();
        let (a, b) = unsafe {
            (
                pair_class.find_property("a").unwrap().get::<ObjectPtr>(data).unwrap(),
                pair_class.find_property("b").unwrap().get::<ObjectPtr>(data).unwrap(),
            )
        };
        assert!(!a.is_null());
        assert_eq!(a, b);
    }
}
