//! Growable little-endian byte buffer that instructions are appended to.

use bytes::{BufMut, BytesMut};

#[derive(Debug, Clone, Default)]
pub struct AssemblerBuffer {
    bytes: BytesMut,
}

impl AssemblerBuffer {
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_byte(&mut self, value: u8) {
        self.bytes.put_u8(value);
    }

    pub fn put_byte_signed(&mut self, value: i8) {
        self.bytes.put_i8(value);
    }

    pub fn put_short(&mut self, value: i16) {
        self.bytes.put_i16_le(value);
    }

    pub fn put_int(&mut self, value: i32) {
        self.bytes.put_i32_le(value);
    }

    pub fn put_int64(&mut self, value: i64) {
        self.bytes.put_i64_le(value);
    }

    /// Offset of the next byte to be written.
    pub fn code_size(&self) -> usize {
        self.bytes.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrite the four bytes ending at `end`.
    pub(crate) fn set_int32_before(&mut self, end: usize, value: i32) {
        if let Some(slot) = end.checked_sub(4).and_then(|start| self.bytes.get_mut(start..end)) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }

    pub(crate) fn into_vec(self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut buffer = AssemblerBuffer::new();
        buffer.put_byte(0x90);
        buffer.put_short(0x1234);
        buffer.put_int(-2);
        buffer.put_int64(0x0102_0304_0506_0708);
        assert_eq!(
            buffer.data(),
            &[
                0x90, 0x34, 0x12, 0xfe, 0xff, 0xff, 0xff, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01
            ]
        );
        assert_eq!(buffer.code_size(), 15);
    }

    #[test]
    fn test_set_int32_before() {
        let mut buffer = AssemblerBuffer::new();
        buffer.put_byte(0xe9);
        buffer.put_int(0);
        buffer.set_int32_before(5, 0x1122_3344);
        assert_eq!(buffer.data(), &[0xe9, 0x44, 0x33, 0x22, 0x11]);
    }
}
