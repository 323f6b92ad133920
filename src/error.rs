use thiserror::Error;

use metatype_core::{InvokeError, RegistrationError, StreamError};

pub type Result<T> = std::result::Result<T, Error>;

/// Any error the type system can raise.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}
