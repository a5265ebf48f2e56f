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

//! The `#Strings` heap.
//!
//! NUL-terminated UTF-8 identifiers addressed by byte offset. Offset 0 is always the empty
//! string. The heap is append-only: existing offsets stay valid after new names are added.

use std::collections::HashMap;

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Owned, append-only `#Strings` heap.
#[derive(Debug, Clone)]
pub struct Strings {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl Strings {
    /// An empty heap holding only the mandatory empty string.
    #[must_use]
    pub fn new() -> Strings {
        Strings {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Take ownership of heap bytes read from an image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty string.
    pub fn from(data: &[u8]) -> Result<Strings> {
        if data.first() != Some(&0) {
            return Err(malformed_error!("#Strings heap must start with an empty string"));
        }

        let mut index = HashMap::new();
        let mut parser = Parser::new(data);
        while parser.has_more_data() {
            let offset = parser.pos();
            let Ok(value) = parser.read_string_utf8() else {
                // Trailing padding without terminator
                break;
            };
            if !value.is_empty() {
                #[allow(clippy::cast_possible_truncation)]
                index.entry(value).or_insert(offset as u32);
            }
        }

        Ok(Strings {
            data: data.to_vec(),
            index,
        })
    }

    /// The string starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an offset outside the heap and
    /// [`crate::Error::Malformed`] for invalid UTF-8.
    pub fn get(&self, offset: u32) -> Result<&str> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(OutOfBounds);
        }

        let rest = &self.data[start..];
        let length = rest.iter().position(|byte| *byte == 0).ok_or(OutOfBounds)?;
        std::str::from_utf8(&rest[..length])
            .map_err(|_| malformed_error!("Invalid UTF-8 in #Strings at {}", offset))
    }

    /// Add `value`, returning its offset. Existing identical strings are reused.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for strings with an interior NUL.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if value.contains('\0') {
            return Err(malformed_error!("Identifier contains NUL - {:?}", value));
        }
        if let Some(offset) = self.index.get(value) {
            return Ok(*offset);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Strings heap exceeds 4 GiB"))?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.index.insert(value.to_string(), offset);
        Ok(offset)
    }

    /// Raw heap bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Strings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let heap = Strings::from(b"\0Contract\0Ensures\0").unwrap();
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(1).unwrap(), "Contract");
        assert_eq!(heap.get(10).unwrap(), "Ensures");
        // Suffix addressing into an existing entry
        assert_eq!(heap.get(13).unwrap(), "ures");
        assert!(heap.get(200).is_err());
    }

    #[test]
    fn add_reuses_existing() {
        let mut heap = Strings::from(b"\0Result\0").unwrap();
        assert_eq!(heap.add("Result").unwrap(), 1);

        let offset = heap.add("EndContractBlock").unwrap();
        assert_eq!(offset, 8);
        assert_eq!(heap.get(offset).unwrap(), "EndContractBlock");
        assert_eq!(heap.add("").unwrap(), 0);
    }

    #[test]
    fn invalid() {
        assert!(Strings::from(b"").is_err());
        assert!(Strings::from(b"abc\0").is_err());
    }
}
