use std::fmt;

/// Outcome of a [`TypedMemory`](crate::TypedMemory) access.
///
/// Returned by value so callers can show per-field diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataViewResult {
    Ok,
    /// No member or key with that name.
    UnknownMember,
    /// The operation does not apply to this kind of value.
    IllegalAccess,
    /// The value could not be converted to or from the requested type.
    TypeConversionFailure,
    /// The view or the member is read-only.
    ReadOnly,
    /// A handle on the path is null.
    NullTarget,
    IndexOutOfRange,
    /// Text did not parse, or a path is malformed.
    InvalidValue,
}

impl DataViewResult {
    pub fn is_ok(self) -> bool {
        self == DataViewResult::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataViewResult::Ok => "ok",
            DataViewResult::UnknownMember => "unknown member",
            DataViewResult::IllegalAccess => "illegal access",
            DataViewResult::TypeConversionFailure => "type conversion failure",
            DataViewResult::ReadOnly => "read-only",
            DataViewResult::NullTarget => "null target",
            DataViewResult::IndexOutOfRange => "index out of range",
            DataViewResult::InvalidValue => "invalid value",
        }
    }

    /// `Ok(())` for [`DataViewResult::Ok`], the code itself otherwise.
    pub fn into_result(self) -> Result<(), DataViewResult> {
        match self {
            DataViewResult::Ok => Ok(()),
            other => Err(other),
        }
    }
}

impl fmt::Display for DataViewResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Result<(), DataViewResult>> for DataViewResult {
    fn from(result: Result<(), DataViewResult>) -> Self {
        match result {
            Ok(()) => DataViewResult::Ok,
            Err(code) => code,
        }
    }
}
