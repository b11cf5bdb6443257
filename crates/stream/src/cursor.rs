use winnow::binary::{be_f32, be_f64, be_i16, be_i32, be_i64, be_u16, be_u32, i8, u8};
use winnow::combinator::repeat;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use crate::errors::StreamError;

/// Random-access cursor over a serialized stream, with the typed big-endian
/// reads of `java.io.DataInput`.
///
/// All multi-byte values in the protocol are big-endian; floating point
/// values are IEEE-754 and integers are two's complement. A read past the
/// end of the buffer fails with [StreamError::UnexpectedEof] carrying the
/// position at which the read started.
#[derive(Debug)]
pub struct DataCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DataCursor<'a> {
    pub fn new(data: &'a [u8]) -> DataCursor<'a> {
        DataCursor { data, pos: 0 }
    }

    /// Current position, in bytes from the start of the stream.
    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current position.
    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Move to an absolute position. Positioning right past the last byte is
    /// allowed; anything beyond that is rejected.
    pub fn seek(&mut self, position: usize) -> Result<(), StreamError> {
        if position > self.data.len() {
            return Err(StreamError::SeekOutOfBounds { position });
        }
        self.pos = position;
        Ok(())
    }

    /// Move relative to the current position.
    ///
    /// The only reverse seek the decoder itself performs is
    /// `seek_relative(-1)`, used to hand an unrecognised type code back to a
    /// transformer.
    pub fn seek_relative(&mut self, delta: i64) -> Result<(), StreamError> {
        let target = self.pos as i64 + delta;
        if target < 0 {
            return Err(StreamError::SeekOutOfBounds { position: 0 });
        }
        self.seek(target as usize)
    }

    /// The raw bytes between two absolute positions, clamped to the buffer.
    pub fn span(&self, start: usize, end: usize) -> &'a [u8] {
        let end = end.min(self.data.len());
        let start = start.min(end);
        &self.data[start..end]
    }

    /// Run a winnow parser at the current position and advance past the
    /// bytes it consumed.
    fn read_with<O, P>(&mut self, mut parser: P) -> Result<O, StreamError>
    where
        P: Parser<&'a [u8], O, ErrMode<ContextError>>,
    {
        let mut input = self.remaining();
        let value = parser
            .parse_next(&mut input)
            .map_err(|_| StreamError::UnexpectedEof { offset: self.pos })?;
        self.pos = self.data.len() - input.len();
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_ubyte()? != 0)
    }

    pub fn read_byte(&mut self) -> Result<i8, StreamError> {
        self.read_with(i8)
    }

    pub fn read_ubyte(&mut self) -> Result<u8, StreamError> {
        self.read_with(u8)
    }

    pub fn read_short(&mut self) -> Result<i16, StreamError> {
        self.read_with(be_i16)
    }

    pub fn read_ushort(&mut self) -> Result<u16, StreamError> {
        self.read_with(be_u16)
    }

    pub fn read_int(&mut self) -> Result<i32, StreamError> {
        self.read_with(be_i32)
    }

    pub fn read_uint(&mut self) -> Result<u32, StreamError> {
        self.read_with(be_u32)
    }

    pub fn read_long(&mut self) -> Result<i64, StreamError> {
        self.read_with(be_i64)
    }

    pub fn read_float(&mut self) -> Result<f32, StreamError> {
        self.read_with(be_f32)
    }

    pub fn read_double(&mut self) -> Result<f64, StreamError> {
        self.read_with(be_f64)
    }

    /// A `char` is a single UTF-16 code unit. Surrogate halves are returned
    /// as-is; pairing them up is the caller's business.
    pub fn read_char(&mut self) -> Result<u16, StreamError> {
        self.read_with(be_u16)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], StreamError> {
        self.read_with(take(count))
    }

    /// Bulk-read `count` values with the given winnow parser. This is the
    /// dense path used for primitive arrays.
    pub fn read_repeated<O, P>(&mut self, count: usize, parser: P) -> Result<Vec<O>, StreamError>
    where
        P: Parser<&'a [u8], O, ErrMode<ContextError>>,
    {
        self.read_with(repeat(count, parser))
    }

    /// Decode `length` bytes of modified UTF-8 at the current position.
    ///
    /// Returns the decoded text and its codepoint count. Note that modified
    /// UTF-8 is not UTF-8: `U+0000` has a two-byte encoding and supplementary
    /// characters are stored as six-byte surrogate pairs, which is why this
    /// goes through a CESU-8 capable decoder.
    pub fn read_mutf8(&mut self, length: usize) -> Result<(String, usize), StreamError> {
        let offset = self.pos;
        let bytes = self.read_bytes(length)?;
        let value = simd_cesu8::mutf8::decode(bytes).map_err(|_| StreamError::Mutf8 { offset })?;
        let count = value.chars().count();
        Ok((value.into_owned(), count))
    }

    /// Read a `u16`-prefixed modified UTF-8 string (`DataInput::readUTF`).
    pub fn read_utf(&mut self) -> Result<(String, usize), StreamError> {
        let length = self.read_ushort()?;
        self.read_mutf8(length as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_reads_are_big_endian() {
        let data = [0x00, 0x00, 0x00, 0x2A, 0x12, 0xE2, 0xFF, 0xFF];
        let mut cursor = DataCursor::new(&data);
        assert_eq!(cursor.read_int().unwrap(), 42);
        assert_eq!(cursor.read_ushort().unwrap(), 0x12E2);
        assert_eq!(cursor.read_short().unwrap(), -1);
        assert_eq!(cursor.tell(), 8);
    }

    #[test]
    fn signed_and_floating_reads() {
        let data = [0xFF, 0x3F, 0x80, 0x00, 0x00];
        let mut cursor = DataCursor::new(&data);
        assert_eq!(cursor.read_byte().unwrap(), -1);
        assert_eq!(cursor.read_float().unwrap(), 1.0);
    }

    #[test]
    fn short_read_reports_start_offset() {
        let data = [0x00, 0x01];
        let mut cursor = DataCursor::new(&data);
        cursor.read_ubyte().unwrap();
        match cursor.read_int() {
            Err(StreamError::UnexpectedEof { offset }) => assert_eq!(offset, 1),
            other => panic!("expected eof, got {other:?}"),
        }
    }

    #[test]
    fn seeks_are_bounds_checked() {
        let data = [0x01, 0x02, 0x03];
        let mut cursor = DataCursor::new(&data);
        cursor.seek(3).unwrap();
        assert!(cursor.is_empty());
        assert!(cursor.seek(4).is_err());
        cursor.seek_relative(-1).unwrap();
        assert_eq!(cursor.read_ubyte().unwrap(), 0x03);
        assert!(cursor.seek_relative(-10).is_err());
    }

    #[test]
    fn read_utf_decodes_modified_utf8() {
        // "a\0b" with the two-byte encoding of U+0000
        let data = [0x00, 0x04, 0x61, 0xC0, 0x80, 0x62];
        let mut cursor = DataCursor::new(&data);
        let (value, length) = cursor.read_utf().unwrap();
        assert_eq!(value, "a\0b");
        assert_eq!(length, 3);
    }

    #[test]
    fn read_utf_decodes_surrogate_pairs() {
        // U+1F600 as a six-byte mUTF-8 surrogate pair
        let data = [0x00, 0x06, 0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        let mut cursor = DataCursor::new(&data);
        let (value, length) = cursor.read_utf().unwrap();
        assert_eq!(value, "\u{1F600}");
        assert_eq!(length, 1);
    }

    #[test]
    fn invalid_mutf8_is_rejected() {
        let data = [0x00, 0x02, 0xFF, 0xFF];
        let mut cursor = DataCursor::new(&data);
        assert!(matches!(
            cursor.read_utf(),
            Err(StreamError::Mutf8 { offset: 2 })
        ));
    }

    #[test]
    fn read_repeated_consumes_exactly() {
        let data = [0x00, 0x01, 0x00, 0x02, 0x00, 0x03];
        let mut cursor = DataCursor::new(&data);
        let values = cursor.read_repeated(3, winnow::binary::be_u16).unwrap();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(cursor.is_empty());
    }
}
