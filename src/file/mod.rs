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

//! Input file abstraction.
//!
//! A [`File`] hides whether the bytes come from a memory-mapped file on disk
//! ([`physical::Physical`]) or from a buffer the caller already owns ([`memory::Memory`]).
//! Loaders only ever see `&[u8]`.
//!
//! The low level helpers live in [`io`] (fixed-size little-endian access) and [`parser`]
//! (a cursor with the ECMA-335 variable length encodings). [`pe`] maps the PE/COFF layout
//! around the CLI metadata.

pub mod io;
mod memory;
pub mod parser;
pub mod pe;
mod physical;

use std::{io::Write, path::Path};

use crate::{Error, Result};

/// Source of raw input bytes.
pub trait Backend: Send + Sync {
    /// The complete input.
    fn data(&self) -> &[u8];
}

/// Read-only input buffer backed by a file mapping or an owned vector.
pub struct File {
    data: Box<dyn Backend>,
}

impl File {
    /// Map the file at `file` into memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if the path does not exist,
    /// [`crate::Error::Empty`] for a zero-length file, and I/O errors otherwise.
    pub fn from_file(file: &Path) -> Result<File> {
        if !file.exists() {
            return Err(Error::NotFound(file.to_path_buf()));
        }

        let input = physical::Physical::new(file)?;
        if input.data().is_empty() {
            return Err(Error::Empty);
        }

        Ok(File {
            data: Box::new(input),
        })
    }

    /// Use an owned buffer as input.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        Ok(File {
            data: Box::new(memory::Memory::new(data)),
        })
    }

    /// Total size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.data().len()
    }

    /// Returns `true` for an empty input; never the case for a constructed [`File`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.data().is_empty()
    }

    /// The complete input.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// A bounds-checked slice of the input.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range leaves the input.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(end) = offset.checked_add(len) else {
            return Err(Error::OutOfBounds);
        };

        self.data().get(offset..end).ok_or(Error::OutOfBounds)
    }
}

/// Write `data` to `path` through a temporary file in the same directory, so that readers
/// never observe a partially written file.
///
/// # Errors
/// Returns [`crate::Error::FileError`] if the temporary file cannot be created, written or
/// renamed over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(directory)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|error| error.error)?;
    Ok(())
}
