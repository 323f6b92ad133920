//! Error types for the reflection engine.
//!
//! ## Error Hierarchy
//!
//! ```text
//! RegistrationError - schema errors raised while types are being defined
//! StreamError       - malformed binary or text input, and strict text failures
//! InvokeError       - type-erased calls with mismatched arguments
//! ```
//!
//! Data-evolution conditions (a saved property that no longer exists, a saved type
//! that is gone, a property whose type changed) are not errors: they are routed to
//! [`ObjectHooks`](crate::ObjectHooks) and an [`ErrorReporter`](crate::ErrorReporter)
//! and loading continues.

use thiserror::Error;

/// Errors raised while registering or defining types.
///
/// These describe programmer mistakes in the schema and are raised at definition
/// time, never while processing data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A referenced type was not found.
    #[error("type not found: {0}")]
    TypeNotFound(String),

    /// A type with this name already exists.
    #[error("duplicate type: {0}")]
    DuplicateType(String),

    /// An alternative name is already used by another type.
    #[error("alternative name '{name}' is already taken by type '{existing}'")]
    DuplicateAlternativeName {
        /// The alternative name that was requested.
        name: String,
        /// The type currently owning that name.
        existing: String,
    },

    /// A property with this name is already declared in the class.
    #[error("duplicate property '{name}' in class '{class}'")]
    DuplicateProperty {
        /// Owning class.
        class: String,
        /// Property name.
        name: String,
    },

    /// A function with this name is already declared in the class.
    #[error("duplicate function '{name}' in class '{class}'")]
    DuplicateFunction {
        /// Owning class.
        class: String,
        /// Function name.
        name: String,
    },

    /// Setting the base class would create an inheritance cycle.
    #[error("class '{class}' cannot derive from '{base}': inheritance cycle")]
    CyclicBaseClass {
        /// Class being modified.
        class: String,
        /// Requested base class.
        base: String,
    },

    /// The base class was already set to a different class.
    #[error("class '{class}' already derives from '{existing}'")]
    BaseClassAlreadySet {
        /// Class being modified.
        class: String,
        /// The base class already in place.
        existing: String,
    },

    /// Only one of construct/destruct was bound.
    #[error("class '{class}' binds only one of construct/destruct")]
    HalfBoundLifecycle {
        /// Offending class.
        class: String,
    },

    /// A type name could not be parsed.
    #[error("invalid type name: {0}")]
    InvalidTypeName(String),

    /// A property does not fit the layout of its class.
    #[error("invalid layout for '{class}': {reason}")]
    InvalidLayout {
        /// Offending class.
        class: String,
        /// Why the layout is rejected.
        reason: String,
    },

    /// A property default could not be parsed as the property's type.
    #[error("invalid default '{text}' for '{class}.{property}'")]
    InvalidDefault {
        /// Owning class.
        class: String,
        /// Property name.
        property: String,
        /// The rejected text.
        text: String,
    },

    /// The registry was already shut down.
    #[error("type registry is shut down")]
    ShutDown,
}

/// Errors raised while reading or writing serialized data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// The input ended before the value was complete.
    #[error("unexpected end of data at offset {offset} (needed {needed} more bytes)")]
    UnexpectedEnd {
        /// Read position.
        offset: usize,
        /// Missing byte count.
        needed: usize,
    },

    /// A read would cross the end of the enclosing skip-block.
    #[error("read past the end of a skip-block at offset {offset}")]
    BlockOverrun {
        /// Read position.
        offset: usize,
    },

    /// The stream header is not recognized.
    #[error("invalid stream header")]
    InvalidHeader,

    /// The stream was written by an unsupported format version.
    #[error("unsupported stream version {0}")]
    UnsupportedVersion(u16),

    /// A variable-length integer is malformed.
    #[error("malformed varint at offset {0}")]
    MalformedVarint(usize),

    /// A string is not valid UTF-8.
    #[error("invalid utf-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// A property reference points outside the property table.
    #[error("invalid property reference {0}")]
    InvalidPropertyReference(u64),

    /// A type referenced inside a payload does not exist.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// A text element names a member the class does not have.
    #[error("unknown element '{name}' in '{class}'")]
    UnknownElement {
        /// Class being read.
        class: String,
        /// The unknown element name.
        name: String,
    },

    /// A value has the wrong shape for its type.
    #[error("invalid value for '{ty}': {reason}")]
    InvalidValue {
        /// Type being read or written.
        ty: String,
        /// What was wrong.
        reason: String,
    },

    /// Text input could not be parsed.
    #[error("malformed text: {0}")]
    MalformedText(String),
}

impl StreamError {
    /// Shorthand for [`StreamError::InvalidValue`].
    pub fn invalid_value(ty: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::InvalidValue {
            ty: ty.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by type-erased function calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The parameter buffer was built for a different signature.
    #[error("parameter buffer does not match the signature of '{0}'")]
    SignatureMismatch(String),

    /// A method was called without an instance.
    #[error("method '{0}' requires an instance")]
    MissingContext(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_error_display() {
        let err = RegistrationError::DuplicateProperty {
            class: "Point".into(),
            name: "x".into(),
        };
        assert_eq!(err.to_string(), "duplicate property 'x' in class 'Point'");

        let err = RegistrationError::CyclicBaseClass {
            class: "A".into(),
            base: "B".into(),
        };
        assert!(err.to_string().contains("inheritance cycle"));
    }

    #[test]
    fn stream_error_display() {
        let err = StreamError::UnexpectedEnd {
            offset: 10,
            needed: 4,
        };
        assert_eq!(
            err.to_string(),
            "unexpected end of data at offset 10 (needed 4 more bytes)"
        );
        assert_eq!(
            StreamError::invalid_value("int32", "not a number").to_string(),
            "invalid value for 'int32': not a number"
        );
    }
}
