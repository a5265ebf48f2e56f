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

//! The `#US` heap.
//!
//! String literals referenced by `ldstr`: a compressed byte length, UTF-16LE code units and
//! a trailing flag byte (ECMA-335 II.24.2.4).

use widestring::U16String;

use crate::{
    file::{io::WriteLe, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Owned, append-only `#US` heap.
#[derive(Debug, Clone)]
pub struct UserStrings {
    data: Vec<u8>,
}

impl UserStrings {
    /// An empty heap.
    #[must_use]
    pub fn new() -> UserStrings {
        UserStrings { data: vec![0] }
    }

    /// Take ownership of heap bytes read from an image.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the heap does not start with the empty entry.
    pub fn from(data: &[u8]) -> Result<UserStrings> {
        if data.is_empty() || data[0] != 0 {
            return Err(OutOfBounds);
        }

        Ok(UserStrings {
            data: data.to_vec(),
        })
    }

    /// The literal at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry runs past the heap and
    /// [`crate::Error::Malformed`] if it is not valid UTF-16.
    pub fn get(&self, offset: u32) -> Result<String> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[start..]);
        let length = parser.read_compressed_uint()? as usize;
        if length == 0 {
            return Ok(String::new());
        }

        // Last byte is the terminal flag, not part of the string
        let bytes = parser.read_bytes(length)?;
        let units: Vec<u16> = bytes[..length - 1]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        U16String::from_vec(units)
            .to_string()
            .map_err(|_| malformed_error!("Invalid string from index - {}", offset))
    }

    /// Append `value`, returning its offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap would exceed its addressable size.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        let offset = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#US heap exceeds 4 GiB"))?;

        let units = U16String::from_str(value).into_vec();
        let length = u32::try_from(units.len() * 2 + 1)
            .map_err(|_| malformed_error!("String literal too large"))?;

        self.data.write_compressed_uint(length)?;
        let mut special = false;
        for unit in &units {
            special |= Self::needs_flag(*unit);
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(u8::from(special));
        Ok(offset)
    }

    /// Raw heap bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn needs_flag(unit: u16) -> bool {
        unit > 0xFF || matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
    }
}

impl Default for UserStrings {
    fn default() -> Self {
        Self::new()
    }
}
