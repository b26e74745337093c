// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked read cursor over an immutable frame.

use super::{CodecError, CodecResult};

/// Generate little-endian read methods for primitive types.
macro_rules! impl_read_le {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> CodecResult<$type> {
            if self.offset + $size > self.bytes.len() {
                return Err(CodecError::ReadFailed {
                    offset: self.offset,
                    reason: "unexpected end of buffer",
                });
            }
            let mut buf = [0u8; $size];
            buf.copy_from_slice(&self.bytes[self.offset..self.offset + $size]);
            self.offset += $size;
            Ok(<$type>::from_le_bytes(buf))
        }
    };
}

/// Read cursor over an immutable byte buffer. Sequential `read_*` calls
/// consume fields in declaration order.
#[derive(Debug)]
pub struct Stream<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Stream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    // Generated little-endian scalar reads
    impl_read_le!(read_u8, u8, 1);
    impl_read_le!(read_u16, u16, 2);
    impl_read_le!(read_u32, u32, 4);
    impl_read_le!(read_i32, i32, 4);
    impl_read_le!(read_u64, u64, 8);

    /// Read an `f64` from its little-endian bit pattern.
    pub fn read_f64(&mut self) -> CodecResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> CodecResult<String> {
        let start = self.offset;
        let len = self.read_u32()? as usize;
        if self.offset + len > self.bytes.len() {
            // Rewind so the caller sees the offset of the failed field
            self.offset = start;
            return Err(CodecError::ReadFailed {
                offset: start,
                reason: "string length exceeds buffer",
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        match std::str::from_utf8(slice) {
            Ok(s) => {
                self.offset += len;
                Ok(s.to_owned())
            }
            Err(_) => {
                self.offset = start;
                Err(CodecError::BadUtf8 { offset: start })
            }
        }
    }

    /// Peek a string at the cursor and compare it to `tag`. Advances the
    /// cursor only when the tag matches; otherwise the cursor is left
    /// untouched (including when the bytes do not decode as a string).
    pub fn is_next_tag(&mut self, tag: &str) -> bool {
        let start = self.offset;
        match self.read_str() {
            Ok(next) if next == tag => true,
            Ok(_) => {
                self.offset = start;
                false
            }
            Err(_) => {
                self.offset = start;
                false
            }
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::Chunk;

    #[test]
    fn test_stream_reads_in_declaration_order() {
        let mut chunk = Chunk::new();
        chunk.put_str("Negotiate");
        chunk.put_u16(8001);
        chunk.put_i32(-3);
        chunk.put_f64(0.25);

        let mut stream = Stream::new(chunk.as_bytes());
        assert_eq!(
            stream.read_str().expect("Read tag should succeed"),
            "Negotiate"
        );
        assert_eq!(stream.read_u16().expect("Read port should succeed"), 8001);
        assert_eq!(stream.read_i32().expect("Read count should succeed"), -3);
        assert!((stream.read_f64().expect("Read f64 should succeed") - 0.25).abs() < f64::EPSILON);
        assert!(stream.is_eof());
    }

    #[test]
    fn test_stream_read_overflow_reports_offset() {
        let bytes = [0u8; 1];
        let mut stream = Stream::new(&bytes);
        assert_eq!(stream.read_u8().expect("Read u8 should succeed"), 0);

        let err = stream.read_u16().unwrap_err();
        match err {
            CodecError::ReadFailed { offset, reason } => {
                assert_eq!(offset, 1);
                assert_eq!(reason, "unexpected end of buffer");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_stream_string_length_past_end() {
        // Length prefix claims 100 bytes but only 2 follow
        let mut chunk = Chunk::new();
        chunk.put_u32(100);
        chunk.put_u16(0);

        let mut stream = Stream::new(chunk.as_bytes());
        let err = stream.read_str().unwrap_err();
        match err {
            CodecError::ReadFailed { offset, .. } => assert_eq!(offset, 0),
            other => panic!("unexpected error {:?}", other),
        }
        // Cursor restored, scalar reads still work
        assert_eq!(stream.offset(), 0);
    }

    #[test]
    fn test_stream_bad_utf8() {
        let mut chunk = Chunk::new();
        chunk.put_u32(2);
        chunk.put_u8(0xFF);
        chunk.put_u8(0xFE);

        let mut stream = Stream::new(chunk.as_bytes());
        match stream.read_str().unwrap_err() {
            CodecError::BadUtf8 { offset } => assert_eq!(offset, 0),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_is_next_tag_advances_only_on_match() {
        let mut chunk = Chunk::new();
        chunk.put_str("~");
        chunk.put_str("Ping");

        let mut stream = Stream::new(chunk.as_bytes());
        assert!(!stream.is_next_tag("-"));
        assert_eq!(stream.offset(), 0);
        assert!(stream.is_next_tag("~"));
        assert!(stream.is_next_tag("Ping"));
        assert!(stream.is_eof());
    }

    #[test]
    fn test_is_next_tag_on_garbage_is_false() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut stream = Stream::new(&bytes);
        assert!(!stream.is_next_tag("~"));
        assert_eq!(stream.offset(), 0);
    }
}
