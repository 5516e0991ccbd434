//! Bounds-checked field readers.
//!
//! Every multi-byte value pulled out of device bytes goes through here.
//! A read that would run past the end of the buffer yields `None`, so a
//! superblock parser can be written as a chain of `?` without any slice
//! indexing of its own.

use crate::types::Endianness;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// A byte buffer viewed as a record with a fixed byte order.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    buf: &'a [u8],
    order: Endianness,
}

impl<'a> Fields<'a> {
    pub fn new(buf: &'a [u8], order: Endianness) -> Self {
        Self { buf, order }
    }

    pub fn le(buf: &'a [u8]) -> Self {
        Self::new(buf, Endianness::Little)
    }

    pub fn be(buf: &'a [u8]) -> Self {
        Self::new(buf, Endianness::Big)
    }

    #[inline]
    pub fn order(&self) -> Endianness {
        self.order
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `len` bytes starting at `off`.
    #[inline]
    pub fn bytes(&self, off: usize, len: usize) -> Option<&'a [u8]> {
        self.buf.get(off..off.checked_add(len)?)
    }

    /// Fixed-size copy of `N` bytes starting at `off`.
    #[inline]
    pub fn array<const N: usize>(&self, off: usize) -> Option<[u8; N]> {
        self.bytes(off, N)?.try_into().ok()
    }

    /// Re-slices the record from `off` onward, keeping the byte order.
    pub fn sub(&self, off: usize) -> Option<Fields<'a>> {
        Some(Self::new(self.buf.get(off..)?, self.order))
    }

    #[inline]
    pub fn u8(&self, off: usize) -> Option<u8> {
        self.buf.get(off).copied()
    }

    #[inline]
    pub fn i8(&self, off: usize) -> Option<i8> {
        self.u8(off).map(|v| v as i8)
    }

    pub fn u16(&self, off: usize) -> Option<u16> {
        let raw = self.bytes(off, 2)?;
        Some(match self.order {
            Endianness::Little => LittleEndian::read_u16(raw),
            Endianness::Big => BigEndian::read_u16(raw),
        })
    }

    pub fn u32(&self, off: usize) -> Option<u32> {
        let raw = self.bytes(off, 4)?;
        Some(match self.order {
            Endianness::Little => LittleEndian::read_u32(raw),
            Endianness::Big => BigEndian::read_u32(raw),
        })
    }

    pub fn u64(&self, off: usize) -> Option<u64> {
        let raw = self.bytes(off, 8)?;
        Some(match self.order {
            Endianness::Little => LittleEndian::read_u64(raw),
            Endianness::Big => BigEndian::read_u64(raw),
        })
    }

    pub fn i32(&self, off: usize) -> Option<i32> {
        self.u32(off).map(|v| v as i32)
    }

    /// True when `len` bytes at `off` exist and are all zero.
    pub fn is_zero(&self, off: usize, len: usize) -> bool {
        self.bytes(off, len)
            .is_some_and(|b| b.iter().all(|&x| x == 0))
    }
}

/// Little-endian u16 at `off`, if in bounds.
#[inline]
pub fn le16(buf: &[u8], off: usize) -> Option<u16> {
    Fields::le(buf).u16(off)
}

#[inline]
pub fn le32(buf: &[u8], off: usize) -> Option<u32> {
    Fields::le(buf).u32(off)
}

#[inline]
pub fn le64(buf: &[u8], off: usize) -> Option<u64> {
    Fields::le(buf).u64(off)
}

#[inline]
pub fn be16(buf: &[u8], off: usize) -> Option<u16> {
    Fields::be(buf).u16(off)
}

#[inline]
pub fn be32(buf: &[u8], off: usize) -> Option<u32> {
    Fields::be(buf).u32(off)
}

#[inline]
pub fn be64(buf: &[u8], off: usize) -> Option<u64> {
    Fields::be(buf).u64(off)
}
