//! Offset tables and bounds-checked field accessors
//!
//! Responses are never reinterpreted in place. Each variant declares where
//! its fields live and every read goes through an accessor that checks the
//! buffer length first.

use std::net::Ipv4Addr;

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// A fixed-width field inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub len: usize,
}

impl Field {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// First byte after this field
    pub const fn end(self) -> usize {
        self.offset.saturating_add(self.len)
    }
}

/// Offsets shared by every response frame
pub mod common {
    use super::Field;

    pub const HEADER: Field = Field::new(0, 2);
    pub const PAD_ADDRESS: Field = Field::new(2, 1);
    pub const COMMAND: Field = Field::new(3, 1);

    /// First body byte (ack/nak/notify code, or first data field)
    pub const BODY: usize = 4;
}

fn slice(buf: &[u8], field: Field) -> Result<&[u8]> {
    buf.get(field.offset..field.end()).ok_or(Error::TooShort {
        expected: field.end(),
        actual: buf.len(),
    })
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(slice(buf, Field::new(offset, 1))?[0])
}

pub fn read_i8(buf: &[u8], offset: usize) -> Result<i8> {
    Ok(read_u8(buf, offset)? as i8)
}

pub fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16> {
    Ok(LittleEndian::read_u16(slice(buf, Field::new(offset, 2))?))
}

pub fn read_i16_le(buf: &[u8], offset: usize) -> Result<i16> {
    Ok(LittleEndian::read_i16(slice(buf, Field::new(offset, 2))?))
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32> {
    Ok(LittleEndian::read_u32(slice(buf, Field::new(offset, 4))?))
}

pub fn read_ipv4(buf: &[u8], offset: usize) -> Result<Ipv4Addr> {
    let b = slice(buf, Field::new(offset, 4))?;
    Ok(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
}

/// Read a nul-padded ASCII field, stopping at the first nul
pub fn read_str(buf: &[u8], field: Field) -> Result<String> {
    let raw = slice(buf, field)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());

    // Firmware strings are 7-bit ASCII; map bytes 1:1 so nothing is lost
    Ok(raw[..end].iter().map(|&b| char::from(b)).collect())
}

/// Write `value` into a nul-padded field of `len` bytes, truncating if needed
pub fn put_fixed_str(buf: &mut BytesMut, value: &str, len: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, len - n);
}
