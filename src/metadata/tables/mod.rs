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

//! Metadata tables.
//!
//! The tables stream (`#~`) holds the ECMA-335 tables of a module, or the debug tables of a
//! portable PDB. Index columns are 2 or 4 bytes wide depending on the row counts and heap
//! sizes ([`TableInfo`]); [`MetadataTables`] stores every cell as a `u32` and recomputes the
//! widths when the stream is written, so rows can be appended freely.
//!
//! # Layout
//!
//! ```text
//! u32 reserved   u8 major   u8 minor   u8 heap_sizes   u8 reserved
//! u64 valid               bit n set = table n present
//! u64 sorted              bit n set = table n sorted by its key
//! u32 row_count[...]      one per present table, in table id order
//! rows                    tables in id order, rows in row id order
//! ```
//!
//! A set bit outside [`TableId`] is rejected as malformed, since the row size of an
//! unknown table cannot be derived. The pointer tables of unoptimized metadata are not
//! supported.
//!
//! Typed views ([`TypeDefRaw`], [`MethodDefRaw`], ...) implement [`TableRow`] and decode
//! coded indices into tokens.

mod codedindex;
mod raw;
mod stream;
mod tableinfo;
mod types;

pub use codedindex::CodedIndexType;
pub use raw::*;
pub use stream::{MetadataTables, TableRow, DEFAULT_SORTED};
pub use tableinfo::{HeapSizes, TableInfo};
pub use types::{ColumnType, TableId};
