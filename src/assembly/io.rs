// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Little-endian reading and writing of primitive values.
//!
//! IL streams, field data blobs and the interpreter's byte arena all store values in
//! little-endian order. The [`CilIO`] trait gives every primitive numeric type a uniform
//! conversion to and from its byte representation, and the free functions perform the
//! bounds-checked access.
//!
//! # Examples
//!
//! ```rust
//! use cilpreinit::assembly::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 2;
//! write_le_at(&mut data, &mut offset, 0x1234_5678_u32)?;
//! assert_eq!(data, [0, 0, 0x78, 0x56, 0x34, 0x12]);
//!
//! let mut offset = 2;
//! let value: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(value, 0x1234_5678);
//! assert_eq!(offset, 6);
//! # Ok::<(), cilpreinit::Error>(())
//! ```

use crate::Result;

/// Trait for primitive types that can be converted to and from little-endian bytes.
///
/// Each implementation names the fixed-size byte array matching the type (for example
/// `[u8; 4]` for `u32`).
///
/// # Thread Safety
///
/// All implementations are pure conversions over primitive data and are safe to use from
/// any thread.
pub trait CilIO: Sized {
    /// Byte array type holding the encoded value.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $size:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $size];

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

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Reads a value of type `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value of type `T` at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset
        .checked_add(type_len)
        .ok_or(out_of_bounds_error!())?;
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Writes `value` at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let end = offset
        .checked_add(type_len)
        .ok_or(out_of_bounds_error!())?;
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_le_signed_values() {
        assert_eq!(read_le::<i8>(&[0xFF]).unwrap(), -1);
        assert_eq!(read_le::<i16>(&[0xFE, 0xFF]).unwrap(), -2);
        assert_eq!(read_le::<i64>(&[0xFF; 8]).unwrap(), -1);
    }

    #[test]
    fn read_le_floats() {
        let bytes = 1.5f32.to_le_bytes();
        assert_eq!(read_le::<f32>(&bytes).unwrap(), 1.5);
        let bytes = (-2.25f64).to_le_bytes();
        assert_eq!(read_le::<f64>(&bytes).unwrap(), -2.25);
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let data = [0x01, 0x02, 0x03];
        let mut offset = 1;
        assert!(matches!(
            read_le_at::<u32>(&data, &mut offset),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(offset, 1);
    }

    #[test]
    fn write_then_read_at_offset() {
        let mut data = [0u8; 8];
        let mut offset = 4;
        write_le_at(&mut data, &mut offset, -2i16).unwrap();
        assert_eq!(offset, 6);
        assert_eq!(&data[4..6], &[0xFE, 0xFF]);

        let mut offset = 7;
        assert!(write_le_at(&mut data, &mut offset, 0u16).is_err());
    }
}
