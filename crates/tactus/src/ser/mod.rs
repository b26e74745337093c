// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagged, self-describing byte chunks and streams.
//!
//! Every frame on the wire is built from three primitives:
//!
//! - fixed-width scalars, little-endian, width determined by the type;
//! - length-prefixed UTF-8 strings (`u32` LE prefix, no terminator);
//! - nested chunks appended verbatim.
//!
//! ```text
//! +-------------+------------------+-------------+-----+
//! | len:u32 LE  | utf-8 bytes      | scalar (LE) | ... |
//! +-------------+------------------+-------------+-----+
//! ```
//!
//! [`Chunk`] is the append-only writer, [`Stream`] the bounds-checked read
//! cursor. Tag dispatch happens through [`Stream::is_next_tag`], which reads
//! a string at the cursor and advances only when it matches.

mod chunk;
mod stream;

pub use chunk::{Chunk, PutChunk};
pub use stream::Stream;

use std::fmt;

/// Decode error raised when a read would run past the frame or the bytes
/// are not valid for the requested type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A `read_*` call would cross the end of the buffer.
    ReadFailed { offset: usize, reason: &'static str },
    /// A length-prefixed string was not valid UTF-8.
    BadUtf8 { offset: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            CodecError::BadUtf8 { offset } => {
                write!(f, "invalid utf-8 in string at offset {}", offset)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Result alias for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;
