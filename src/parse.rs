use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, SourceQueryError};

/// Forward-only reader over a received packet.
///
/// Fixed-width reads are little-endian and bounds checked; a read past the
/// end of the buffer fails with [SourceQueryError::UnexpectedEof] and leaves
/// the position untouched.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PacketReader { data, pos: 0 }
    }

    /// Index of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true if at least `size` bytes are left to read.
    pub fn can_read(&self, size: usize) -> bool {
        self.remaining() >= size
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    /// The unread tail of the packet, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn take(&mut self, size: usize) -> Result<&'a [u8]> {
        let offset = self.pos;
        let bytes = self
            .data
            .get(offset..offset + size)
            .ok_or(SourceQueryError::UnexpectedEof { offset, needed: size })?;
        self.pos += size;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read a null-terminated string for a mandatory field.
    ///
    /// A missing terminator is malformed input and aborts the decode with
    /// [SourceQueryError::UnterminatedString].
    pub fn read_string(&mut self) -> Result<String> {
        let offset = self.pos;
        self.try_read_string()
            .ok_or(SourceQueryError::UnterminatedString(offset))
    }

    /// Read a null-terminated string that may be cut off by the end of the packet.
    ///
    /// Returns `None` without advancing if no terminator is found.
    /// Invalid UTF-8 is replaced rather than rejected, since servers happily
    /// send arbitrary bytes in player names and cvar values.
    pub fn try_read_string(&mut self) -> Option<String> {
        let rest = self.rest();
        let len = rest.iter().position(|&c| c == 0)?;
        let value = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Some(value)
    }
}

/// Append-only buffer for building outbound packets.
#[derive(Debug, Default, Clone)]
pub struct PacketBuilder {
    payload: Vec<u8>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.payload.push(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.write_bytes(&buf)
    }

    /// Append `value` followed by a single zero byte.
    /// Interior zero bytes are not escaped.
    pub fn write_cstring(&mut self, value: &str) -> &mut Self {
        self.payload.extend_from_slice(value.as_bytes());
        self.write_u8(0)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.payload
    }
}
