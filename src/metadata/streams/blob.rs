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

//! The `#Blob` heap.
//!
//! Length-prefixed byte sequences (signatures, custom attribute values) addressed by byte
//! offset. Offset 0 is the empty blob. Appending never moves existing entries.

use crate::{
    file::{io::WriteLe, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Owned, append-only `#Blob` heap.
#[derive(Debug, Clone)]
pub struct Blob {
    data: Vec<u8>,
}

impl Blob {
    /// An empty heap holding only the empty blob.
    #[must_use]
    pub fn new() -> Blob {
        Blob { data: vec![0] }
    }

    /// Take ownership of heap bytes read from an image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty blob.
    pub fn from(data: &[u8]) -> Result<Blob> {
        if data.first() != Some(&0) {
            return Err(malformed_error!("#Blob heap must start with an empty blob"));
        }

        Ok(Blob {
            data: data.to_vec(),
        })
    }

    /// The blob at `offset`, without its length prefix.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the blob runs past the heap.
    pub fn get(&self, offset: u32) -> Result<&[u8]> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[start..]);
        let length = parser.read_compressed_uint()? as usize;
        parser.read_bytes(length)
    }

    /// Append `value`, returning its offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap would exceed its addressable size.
    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Blob heap exceeds 4 GiB"))?;
        let length = u32::try_from(value.len())
            .map_err(|_| malformed_error!("Blob too large - {} bytes", value.len()))?;
        self.data.write_compressed_uint(length)?;
        self.data.extend_from_slice(value);
        Ok(offset)
    }

    /// Raw heap bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Blob {
    fn default() -> Self {
        Self::new()
    }
}
