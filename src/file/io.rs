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

//! Little-endian, bounds-checked reading and writing of primitive values.
//!
//! Module images, method bodies and symbol images are all little-endian. Everything in this
//! module goes through the [`CilIO`] trait so that a short buffer is reported as
//! [`crate::Error::OutOfBounds`] instead of a panic.
//!
//! # Key Components
//!
//! - [`CilIO`] - Trait implemented for every primitive that can be read or written
//! - [`read_le`] / [`read_le_at`] - Read a value, optionally advancing an offset
//! - [`write_le`] / [`write_le_at`] - Write a value into an existing buffer
//! - [`WriteLe`] - Append helpers for growable output buffers

use crate::{Error::OutOfBounds, Result};

/// Trait for primitives that have a fixed-size little-endian representation.
pub trait CilIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cilio {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

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

impl_cilio! {
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

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing the
/// offset by the size of `T`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Writes `value` in little-endian byte order to the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le<T: CilIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Writes `value` in little-endian byte order at `offset`, advancing the offset.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let bytes = value.to_le_bytes();
    data[*offset..end].copy_from_slice(bytes.as_ref());
    *offset = end;

    Ok(())
}

/// Append-style little-endian writing for growable buffers.
///
/// Implemented for `Vec<u8>`, which is what every serializer in this crate writes into.
pub trait WriteLe {
    /// Append `value` in little-endian byte order.
    fn write_le<T: CilIO>(&mut self, value: T);

    /// Append an ECMA-335 compressed unsigned integer (II.23.2).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`.
    fn write_compressed_uint(&mut self, value: u32) -> Result<()>;

    /// Append an ECMA-335 compressed signed integer (II.23.2): the value is rotated left by
    /// one with the sign in bit 0, in the narrowest of the 7, 14 and 29 bit widths.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for values outside `-2^28..2^28`.
    fn write_compressed_int(&mut self, value: i32) -> Result<()>;
}

impl WriteLe for Vec<u8> {
    fn write_le<T: CilIO>(&mut self, value: T) {
        self.extend_from_slice(value.to_le_bytes().as_ref());
    }

    fn write_compressed_uint(&mut self, value: u32) -> Result<()> {
        // The narrowing casts below are guarded by the range checks of each arm
        #[allow(clippy::cast_possible_truncation)]
        match value {
            0..=0x7F => self.push(value as u8),
            0x80..=0x3FFF => {
                self.push(0x80 | (value >> 8) as u8);
                self.push(value as u8);
            }
            0x4000..=0x1FFF_FFFF => {
                self.push(0xC0 | (value >> 24) as u8);
                self.push((value >> 16) as u8);
                self.push((value >> 8) as u8);
                self.push(value as u8);
            }
            _ => {
                return Err(malformed_error!(
                    "Value too large for compressed encoding - {}",
                    value
                ))
            }
        }
        Ok(())
    }

    fn write_compressed_int(&mut self, value: i32) -> Result<()> {
        let sign = u32::from(value < 0);
        // Two's complement bits of the value, masked to the chosen width below
        #[allow(clippy::cast_sign_loss)]
        let rotated = ((value as u32) << 1) | sign;

        #[allow(clippy::cast_possible_truncation)]
        match value {
            -0x40..=0x3F => self.push((rotated & 0x7F) as u8),
            -0x2000..=0x1FFF => {
                let bits = rotated & 0x3FFF;
                self.push(0x80 | (bits >> 8) as u8);
                self.push(bits as u8);
            }
            -0x1000_0000..=0x0FFF_FFFF => {
                let bits = rotated & 0x1FFF_FFFF;
                self.push(0xC0 | (bits >> 24) as u8);
                self.push((bits >> 16) as u8);
                self.push((bits >> 8) as u8);
                self.push(bits as u8);
            }
            _ => {
                return Err(malformed_error!(
                    "Value out of range for compressed encoding - {}",
                    value
                ))
            }
        }
        Ok(())
    }
}
