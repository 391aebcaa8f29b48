//! # Vigil Binary Utilities
//!
//! Reading and writing helpers for the vigil wire formats, built on the
//! `bytes` crate. Everything on the wire is big-endian; strings are
//! u32-length-prefixed UTF-8 and identifiers are fixed-width ASCII fields
//! right-padded with spaces.

pub mod error;
pub mod io;

pub use error::{BinaryError, Result};
pub use io::{ByteReader, ByteWriter};
