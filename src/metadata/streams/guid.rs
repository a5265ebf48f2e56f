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

//! The `#GUID` heap.
//!
//! A plain array of 16 byte GUIDs addressed by 1-based index; index 0 means "no GUID".

use uguid::Guid;

use crate::{Error::OutOfBounds, Result};

/// Owned, append-only `#GUID` heap.
#[derive(Debug, Clone, Default)]
pub struct GuidHeap {
    data: Vec<u8>,
}

impl GuidHeap {
    /// An empty heap.
    #[must_use]
    pub fn new() -> GuidHeap {
        GuidHeap::default()
    }

    /// Take ownership of heap bytes read from an image. A trailing partial entry is dropped.
    #[must_use]
    pub fn from(data: &[u8]) -> GuidHeap {
        let whole = data.len() - data.len() % 16;
        GuidHeap {
            data: data[..whole].to_vec(),
        }
    }

    /// The GUID at 1-based `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for index 0 and indices past the end.
    pub fn get(&self, index: u32) -> Result<Guid> {
        let start = (index as usize).checked_sub(1).ok_or(OutOfBounds)? * 16;
        let bytes = self.data.get(start..start + 16).ok_or(OutOfBounds)?;

        let mut guid = [0_u8; 16];
        guid.copy_from_slice(bytes);
        Ok(Guid::from_bytes(guid))
    }

    /// Append `guid`, returning its index. Existing identical entries are reused.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is full.
    pub fn add(&mut self, guid: Guid) -> Result<u32> {
        let bytes = guid.to_bytes();
        if let Some(position) = self.data.chunks(16).position(|entry| entry == bytes) {
            return u32::try_from(position + 1).map_err(|_| malformed_error!("#GUID heap is full"));
        }

        self.data.extend_from_slice(&bytes);
        u32::try_from(self.len()).map_err(|_| malformed_error!("#GUID heap is full"))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / 16
    }

    /// Returns `true` if the heap has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw heap bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_based_indices() {
        let mut heap = GuidHeap::new();
        let first = Guid::from_bytes([1; 16]);
        let second = Guid::from_bytes([2; 16]);
        assert_eq!(heap.add(first).unwrap(), 1);
        assert_eq!(heap.add(second).unwrap(), 2);
        assert_eq!(heap.add(first).unwrap(), 1);

        assert_eq!(heap.get(2).unwrap(), second);
        assert!(heap.get(0).is_err());
        assert!(heap.get(3).is_err());
    }

    #[test]
    fn partial_entry_dropped() {
        let heap = GuidHeap::from(&[7; 20]);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.get(1).unwrap(), Guid::from_bytes([7; 16]));
    }
}
