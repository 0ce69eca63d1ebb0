//! Bounds-checked little-endian reading and writing of primitive values.
//!
//! Every structure this crate touches (PE headers, the CLI header, metadata streams,
//! method bodies, CIL operands) is little-endian. The helpers in this module read and
//! write primitives at explicit offsets and fail with [`crate::Error::OutOfBounds`]
//! instead of panicking when a buffer is too short.
//!
//! # Key Components
//!
//! - [`CilIO`] - Trait describing how a primitive maps to and from its byte array
//! - [`read_le`] / [`read_le_at`] - Read a value at the start of a buffer, or at a cursor
//! - [`read_le_at_dyn`] - Read a 2- or 4-byte metadata index
//! - [`write_le_at`] - Overwrite a value in place at a cursor
//! - [`push_le`] - Append a value to a growing output buffer
//! - [`push_compressed_uint`] - Append a compressed length prefix
//!
//! # Examples
//!
//! ```rust,ignore
//! use cilpatch::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00];
//! let mut offset = 0;
//! let first: u16 = read_le_at(&data, &mut offset)?;
//! let second: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!((first, second, offset), (1, 2, 6));
//!
//! let mut offset = 2;
//! write_le_at(&mut data, &mut offset, 7u32)?;
//! assert_eq!(data, [0x01, 0x00, 0x07, 0x00, 0x00, 0x00]);
//! # Ok::<(), cilpatch::Error>(())
//! ```

use crate::Result;

/// Trait for primitives that can be converted from and to little-endian bytes.
///
/// The associated `Bytes` type is the fixed-size array backing the primitive
/// (e.g. `[u8; 4]` for `u32`).
pub trait CilIO: Sized + Copy {
    /// The fixed-size byte representation of this type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Build a value from its little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Convert a value into its little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Read a value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a value at `offset` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit in `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };

    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Read a metadata index which is either 2 or 4 bytes wide.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the index does not fit in `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Overwrite the bytes at `offset` with `value` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit in `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();

    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(out_of_bounds_error!());
    };

    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}

/// Append `value` in little-endian order to `out`.
pub fn push_le<T: CilIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Append `value` as an ECMA-335 compressed unsigned integer (II.23.2).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `value` exceeds `0x1FFF_FFFF`.
pub fn push_compressed_uint(out: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(((value >> 8) as u8) | 0x80);
            out.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(((value >> 24) as u8) | 0xC0);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
        _ => {
            return Err(malformed_error!(
                "Value too large for a compressed integer - {}",
                value
            ))
        }
    }

    Ok(())
}

/// Round `value` up to the next multiple of `alignment` (which must be a power of two).
#[must_use]
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u8() {
        let result = read_le::<u8>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x01);
    }

    #[test]
    fn read_le_i8() {
        let result = read_le::<i8>(&[0xFF]).unwrap();
        assert_eq!(result, -1);
    }

    #[test]
    fn read_le_u16() {
        let result = read_le::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0201);
    }

    #[test]
    fn read_le_u32() {
        let result = read_le::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0403_0201);
    }

    #[test]
    fn read_le_u64() {
        let result = read_le::<u64>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let value = read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0403);
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_dyn() {
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, false).unwrap(), 0x0201);
        assert_eq!(offset, 2);
        assert_eq!(
            read_le_at_dyn(&TEST_BUFFER, &mut offset, true).unwrap(),
            0x0605_0403
        );
        assert_eq!(offset, 6);
    }

    #[test]
    fn errors() {
        let buffer = [0xFF, 0xFF, 0xFF, 0xFF];

        let result = read_le::<u64>(&buffer);
        assert!(matches!(result, Err(crate::Error::OutOfBounds { .. })));

        let mut offset = usize::MAX;
        let result = read_le_at::<u16>(&buffer, &mut offset);
        assert!(matches!(result, Err(crate::Error::OutOfBounds { .. })));
    }

    #[test]
    fn write_in_place() {
        let mut buffer = [0u8; 6];
        let mut offset = 1;
        write_le_at(&mut buffer, &mut offset, 0x0A0B_0C0Du32).unwrap();
        assert_eq!(buffer, [0x00, 0x0D, 0x0C, 0x0B, 0x0A, 0x00]);
        assert_eq!(offset, 5);

        let mut offset = 5;
        assert!(write_le_at(&mut buffer, &mut offset, 1u16).is_err());
    }

    #[test]
    fn push() {
        let mut out = Vec::new();
        push_le(&mut out, 0x1234u16);
        push_le(&mut out, -2i32);
        assert_eq!(out, [0x34, 0x12, 0xFE, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn compressed() {
        let mut out = Vec::new();
        push_compressed_uint(&mut out, 0x03).unwrap();
        push_compressed_uint(&mut out, 0x80).unwrap();
        push_compressed_uint(&mut out, 0x4000).unwrap();
        assert_eq!(out, [0x03, 0x80, 0x80, 0xC0, 0x00, 0x40, 0x00]);

        assert!(push_compressed_uint(&mut out, 0x2000_0000).is_err());
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(0x201, 0x200), 0x400);
    }
}
