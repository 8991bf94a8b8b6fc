//! Bounds-checked little-endian decoding of fixed-layout records.
//!
//! The [`Read`] trait follows the shape of `std::io`'s, but is
//! specialised to in-memory buffers: every failed read
//! reports where it happened and how many bytes were missing, so the
//! parser never has to reinterpret raw memory or trust a record that
//! ran off the end of the input.

use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;

/// A record did not fit in the buffer it was decoded from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecodeError {
    /// Offset the failed read started at.
    pub offset: usize,
    /// Number of bytes the read needed.
    pub needed: usize,
    /// Number of bytes that were actually left.
    pub available: usize,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "needed {:#x} bytes at offset {:#x}, but only {:#x} remain",
            self.needed, self.offset, self.available
        )
    }
}

impl core::error::Error for DecodeError {}

/// A trait for streams which can be read.
pub trait Read {
    /// Fill `buf` completely, or fail without consuming anything.
    ///
    /// # Errors
    ///
    /// This function will return an error if fewer than `buf.len()`
    /// bytes remain in the stream.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DecodeError>;

    /// Read a fixed-size byte array.
    ///
    /// # Errors
    ///
    /// See [`Read::read_exact`].
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// # Errors
    ///
    /// See [`Read::read_exact`].
    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// # Errors
    ///
    /// See [`Read::read_exact`].
    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// # Errors
    ///
    /// See [`Read::read_exact`].
    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// # Errors
    ///
    /// See [`Read::read_exact`].
    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// # Errors
    ///
    /// See [`Read::read_exact`].
    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.read_array().map(i64::from_le_bytes)
    }
}

/// A [`Read`]able cursor over a byte buffer.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    inner: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    /// Create a `Cursor` positioned at the start of `inner`.
    pub fn new(inner: &'a [u8]) -> Self {
        Self { inner, position: 0 }
    }

    /// Create a `Cursor` positioned at `offset`.
    pub fn at(inner: &'a [u8], offset: usize) -> Self {
        Self {
            inner,
            position: offset,
        }
    }

    /// The current position of the cursor.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get a slice to the rest of the buffer. Empty if the cursor is
    /// past the end.
    pub fn rest(&self) -> &'a [u8] {
        self.inner.get(self.position..).unwrap_or(&[])
    }
}

impl Read for Cursor<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        let rest = self.rest();
        if buf.len() > rest.len() {
            return Err(DecodeError {
                offset: self.position,
                needed: buf.len(),
                available: rest.len(),
            });
        }
        buf.copy_from_slice(&rest[..buf.len()]);
        self.position += buf.len();
        Ok(())
    }
}

/// A trait for sinks that bytes can be appended to.
pub trait Write {
    /// Append all of `buf`.
    fn write_all(&mut self, buf: &[u8]);

    /// Append a single byte.
    fn write_u8(&mut self, v: u8) {
        self.write_all(&[v]);
    }

    /// Append a little-endian `u16`.
    fn write_u16(&mut self, v: u16) {
        self.write_all(&v.to_le_bytes());
    }

    /// Append a little-endian `u32`.
    fn write_u32(&mut self, v: u32) {
        self.write_all(&v.to_le_bytes());
    }

    /// Append a little-endian `u64`.
    fn write_u64(&mut self, v: u64) {
        self.write_all(&v.to_le_bytes());
    }

    /// Append a little-endian `i64`.
    fn write_i64(&mut self, v: i64) {
        self.write_all(&v.to_le_bytes());
    }
}

impl Write for Vec<u8> {
    fn write_all(&mut self, buf: &[u8]) {
        self.extend_from_slice(buf);
    }
}

/// A fixed-layout record with a little-endian on-disk form.
pub trait Decode: Sized {
    /// Size of the encoded record in bytes.
    const SIZE: usize;

    /// Decode one record from the current position of `reader`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the reader runs out of
    /// bytes before the record is complete.
    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}

/// The inverse of [`Decode`]: appends exactly `Decode::SIZE` bytes.
pub trait Encode {
    /// Append the encoded record to `writer`.
    fn encode<W: Write>(&self, writer: &mut W);

    /// Encode into a freshly allocated buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Decode a single record of type `T` located at `offset` in `buf`.
///
/// # Errors
///
/// This function will return an error if the record does not fit
/// between `offset` and the end of `buf`.
pub fn decode_at<T: Decode>(buf: &[u8], offset: usize) -> Result<T, DecodeError> {
    T::decode(&mut Cursor::at(buf, offset))
}

/// `offset..offset + len` as a range into a buffer of `available`
/// bytes, or `None` if any part of it falls outside.
pub fn byte_range(offset: u64, len: u64, available: usize) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    (end <= available).then_some(start..end)
}

/// Round `value` up to the next multiple of `align`, which must be a
/// power of two.
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + (align - 1)) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let buf = [0x4F, 0x15, 0x3D, 0x1D, 0x34, 0x12, 0xFF];
        let mut cur = Cursor::new(&buf);
        assert_eq!(cur.read_u32(), Ok(0x1D3D_154F));
        assert_eq!(cur.read_u16(), Ok(0x1234));
        assert_eq!(cur.read_u8(), Ok(0xFF));
        assert_eq!(cur.position(), 7);
    }

    #[test]
    fn short_read_reports_location_and_does_not_advance() {
        let buf = [0u8; 6];
        let mut cur = Cursor::at(&buf, 4);
        assert_eq!(
            cur.read_u32(),
            Err(DecodeError {
                offset: 4,
                needed: 4,
                available: 2,
            })
        );
        assert_eq!(cur.position(), 4);
    }

    #[test]
    fn cursor_past_the_end_fails_on_next_read() {
        let buf = [0u8; 4];
        let mut cur = Cursor::at(&buf, 16);
        assert!(cur.rest().is_empty());
        assert_eq!(
            cur.read_u8(),
            Err(DecodeError {
                offset: 16,
                needed: 1,
                available: 0,
            })
        );
    }

    #[test]
    fn byte_range_rejects_overruns() {
        assert_eq!(byte_range(0x10, 0x20, 0x30), Some(0x10..0x30));
        assert_eq!(byte_range(0x10, 0x21, 0x30), None);
        assert_eq!(byte_range(u64::MAX, 1, 0x30), None);
        assert_eq!(byte_range(0x30, 0, 0x30), Some(0x30..0x30));
    }

    #[test]
    fn align_up_rounds_to_sixteen() {
        assert_eq!(align_up(0, 0x10), 0);
        assert_eq!(align_up(1, 0x10), 0x10);
        assert_eq!(align_up(0x10, 0x10), 0x10);
        assert_eq!(align_up(0x1801, 0x10), 0x1810);
    }
}
