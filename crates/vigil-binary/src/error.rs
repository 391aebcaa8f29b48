use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Errors that can occur during binary operations.
#[derive(Error, Debug)]
pub enum BinaryError {
    /// Not enough bytes remaining in the buffer for the requested operation.
    #[error("not enough bytes in buffer: needed {needed}, remaining {remaining}")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// Attempted to read a string that was not valid UTF-8.
    #[error("invalid UTF-8 string data: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    /// An invalid value was encountered (oversized field, bad flag byte, ...).
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BinaryError>;
