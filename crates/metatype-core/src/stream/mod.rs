//! Binary and text serialization.
//!
//! Both codecs are written purely against the [`Type`](crate::types::Type)
//! contract. Each class writes only the properties that differ from its default
//! object. The binary codec wraps every property in a length-prefixed skip block
//! so that data written by an older or newer class layout still loads: missing
//! properties, missing types and changed types are routed to the class's
//! [`ObjectHooks`] first and then reported to an [`ErrorReporter`]. The text codec
//! is strict and fails on unknown elements.

mod binary;
mod text;

pub use binary::{
    BINARY_MAGIC, BINARY_VERSION, BinaryReader, BinaryWriter, BinaryWriterOptions,
    SavedProperty, load_binary, load_object_binary, save_binary, save_object_binary,
};
pub use text::{
    TextReader, TextWriter, TextWriterOptions, load_object_text, load_text, save_object_text,
    save_text, value_from_text, value_to_text,
};

use std::fmt;

use ustr::Ustr;

use crate::error::StreamError;
use crate::property::Property;
use crate::storage::DataBlob;

/// Receives one callback per recoverable load condition.
pub trait ErrorReporter {
    /// A saved property no longer exists on the class.
    fn report_property_missing(&mut self, class: &str, property: &str);

    /// A property exists but the type it was saved with is unknown.
    fn report_property_type_missing(&mut self, class: &str, property: &str, type_name: &str);

    /// A property was saved with a different type. `handled` tells whether the
    /// value was converted into the current type.
    fn report_property_type_changed(
        &mut self,
        class: &str,
        property: &str,
        saved_type: &str,
        current_type: &str,
        handled: bool,
    );

    /// A property payload could not be decoded. The property keeps its default.
    fn report_property_data_corrupted(&mut self, class: &str, property: &str, error: &StreamError);
}

/// One recorded load condition.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    PropertyMissing {
        class: Ustr,
        property: Ustr,
    },
    PropertyTypeMissing {
        class: Ustr,
        property: Ustr,
        type_name: Ustr,
    },
    PropertyTypeChanged {
        class: Ustr,
        property: Ustr,
        saved_type: Ustr,
        current_type: Ustr,
        handled: bool,
    },
    PropertyDataCorrupted {
        class: Ustr,
        property: Ustr,
        error: StreamError,
    },
}

impl fmt::Display for LoadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadEvent::PropertyMissing { class, property } => {
                write!(f, "{class}.{property}: property no longer exists")
            }
            LoadEvent::PropertyTypeMissing {
                class,
                property,
                type_name,
            } => write!(f, "{class}.{property}: saved type '{type_name}' is unknown"),
            LoadEvent::PropertyTypeChanged {
                class,
                property,
                saved_type,
                current_type,
                handled,
            } => write!(
                f,
                "{class}.{property}: type changed from '{saved_type}' to '{current_type}' ({})",
                if *handled { "converted" } else { "discarded" }
            ),
            LoadEvent::PropertyDataCorrupted {
                class,
                property,
                error,
            } => write!(f, "{class}.{property}: corrupted data: {error}"),
        }
    }
}

/// Reporter that records every event for later inspection.
#[derive(Debug, Default, Clone)]
pub struct ErrorCollector {
    events: Vec<LoadEvent>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[LoadEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl ErrorReporter for ErrorCollector {
    fn report_property_missing(&mut self, class: &str, property: &str) {
        self.events.push(LoadEvent::PropertyMissing {
            class: class.into(),
            property: property.into(),
        });
    }

    fn report_property_type_missing(&mut self, class: &str, property: &str, type_name: &str) {
        self.events.push(LoadEvent::PropertyTypeMissing {
            class: class.into(),
            property: property.into(),
            type_name: type_name.into(),
        });
    }

    fn report_property_type_changed(
        &mut self,
        class: &str,
        property: &str,
        saved_type: &str,
        current_type: &str,
        handled: bool,
    ) {
        self.events.push(LoadEvent::PropertyTypeChanged {
            class: class.into(),
            property: property.into(),
            saved_type: saved_type.into(),
            current_type: current_type.into(),
            handled,
        });
    }

    fn report_property_data_corrupted(&mut self, class: &str, property: &str, error: &StreamError) {
        self.events.push(LoadEvent::PropertyDataCorrupted {
            class: class.into(),
            property: property.into(),
            error: error.clone(),
        });
    }
}

/// Reporter that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report_property_missing(&mut self, class: &str, property: &str) {
        tracing::warn!(class, property, "saved property no longer exists");
    }

    fn report_property_type_missing(&mut self, class: &str, property: &str, type_name: &str) {
        tracing::warn!(class, property, type_name, "saved property type is unknown");
    }

    fn report_property_type_changed(
        &mut self,
        class: &str,
        property: &str,
        saved_type: &str,
        current_type: &str,
        handled: bool,
    ) {
        tracing::warn!(
            class,
            property,
            saved_type,
            current_type,
            handled,
            "saved property type changed"
        );
    }

    fn report_property_data_corrupted(&mut self, class: &str, property: &str, error: &StreamError) {
        tracing::warn!(class, property, %error, "saved property data is corrupted");
    }
}

/// Per-class callbacks that take part in saving and loading.
///
/// Every method has a neutral default, so implementors override only what they
/// need. `object` points at the instance being saved or loaded.
pub trait ObjectHooks: Send + Sync {
    /// Force a property to be saved (`Some(true)`) or skipped (`Some(false)`).
    fn should_save_property(&self, _object: *const u8, _property: &Property) -> Option<bool> {
        None
    }

    /// Handle the raw bytes of a property that no longer exists.
    fn on_property_missing_raw(
        &self,
        _object: *mut u8,
        _name: Ustr,
        _type_name: Ustr,
        _raw: &[u8],
    ) -> bool {
        false
    }

    /// Handle the decoded value of a property that no longer exists.
    fn on_property_missing_typed(&self, _object: *mut u8, _name: Ustr, _value: &DataBlob) -> bool {
        false
    }

    /// Handle the raw bytes of a property whose saved type is unknown.
    fn on_property_type_missing_raw(
        &self,
        _object: *mut u8,
        _property: &Property,
        _type_name: Ustr,
        _raw: &[u8],
    ) -> bool {
        false
    }

    /// Handle a value saved with a different type than the property has now.
    fn on_property_type_changed(
        &self,
        _object: *mut u8,
        _property: &Property,
        _value: &DataBlob,
    ) -> bool {
        false
    }

    /// Called after every property of the instance has been read.
    fn on_post_load(&self, _object: *mut u8) {}
}
