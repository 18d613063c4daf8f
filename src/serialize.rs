//! Fixed-width integer and float encoding shared by every participant.
//!
//! All values are big endian (network order), whatever the host platform is.
use byteorder::{BigEndian, ByteOrder};

use crate::NetError;

/// Encodes a 32 bit signed integer into 4 bytes.
#[inline]
pub fn encode_int(value: i32) -> [u8; 4] {
    let mut buffer = [0u8; 4];
    BigEndian::write_i32(&mut buffer, value);
    buffer
}

/// Decodes 4 bytes produced by [`encode_int`].
#[inline]
pub fn decode_int(bytes: [u8; 4]) -> i32 {
    BigEndian::read_i32(&bytes)
}

/// Encodes a 32 bit float into 4 bytes.
#[inline]
pub fn encode_float(value: f32) -> [u8; 4] {
    let mut buffer = [0u8; 4];
    BigEndian::write_f32(&mut buffer, value);
    buffer
}

/// Decodes 4 bytes produced by [`encode_float`].
#[inline]
pub fn decode_float(bytes: [u8; 4]) -> f32 {
    BigEndian::read_f32(&bytes)
}

/// Appends an encoded integer to `out`.
#[inline]
pub fn write_int(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&encode_int(value));
}

/// Appends an encoded float to `out`.
#[inline]
pub fn write_float(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&encode_float(value));
}

/// Cursor over a received payload.
///
/// Every read checks the remaining length first and fails with
/// [`NetError::TruncatedMessage`] instead of reading past the end.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Number of bytes not read yet.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], NetError> {
        if self.remaining() < len {
            return Err(NetError::TruncatedMessage {
                needed: len,
                available: self.remaining(),
            });
        }

        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], NetError> {
        let mut data = [0u8; N];
        data.copy_from_slice(self.read_bytes(N)?);
        Ok(data)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, NetError> {
        Ok(self.read_bytes(1)?[0])
    }

    #[inline]
    pub fn read_int(&mut self) -> Result<i32, NetError> {
        self.read_array().map(decode_int)
    }

    #[inline]
    pub fn read_float(&mut self) -> Result<f32, NetError> {
        self.read_array().map(decode_float)
    }

    /// Fails if any byte was left unread.
    pub fn finish(self) -> Result<(), NetError> {
        if !self.is_empty() {
            return Err(NetError::TrailingBytes {
                declared: self.position,
                available: self.buffer.len(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_is_big_endian() {
        assert_eq!(encode_int(1), [0, 0, 0, 1]);
        assert_eq!(encode_int(-2), [0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(decode_int([0x12, 0x34, 0x56, 0x78]), 0x1234_5678);
    }

    #[test]
    fn float_is_big_endian() {
        assert_eq!(encode_float(1.0), [0x3f, 0x80, 0, 0]);
        assert_eq!(decode_float([0xc0, 0x00, 0, 0]), -2.0);
    }

    #[test]
    fn reader_sequence() {
        let mut buffer = vec![7u8];
        write_int(&mut buffer, i32::MIN);
        write_float(&mut buffer, 3.5);

        let mut reader = Reader::new(&buffer);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_int().unwrap(), i32::MIN);
        assert_eq!(reader.read_float().unwrap(), 3.5);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn reader_truncated() {
        let buffer = [0u8, 1, 2];
        let mut reader = Reader::new(&buffer);
        match reader.read_int() {
            Err(NetError::TruncatedMessage { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected truncated message, got {:?}", other),
        }
        // A failed read does not consume anything.
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn reader_trailing_bytes() {
        let buffer = [1u8, 2];
        let mut reader = Reader::new(&buffer);
        reader.read_u8().unwrap();
        assert!(matches!(
            reader.finish(),
            Err(NetError::TrailingBytes { declared: 1, available: 2 })
        ));
    }
}
