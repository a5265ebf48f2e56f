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

use bitflags::bitflags;

use crate::metadata::tables::{CodedIndexType, ColumnType, TableId};

bitflags! {
    /// `HeapSizes` of the tables stream: heaps whose indices are four bytes wide.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeapSizes: u8 {
        /// `#Strings` offsets are 4 bytes
        const STRINGS = 0x01;
        /// `#GUID` indices are 4 bytes
        const GUID = 0x02;
        /// `#Blob` offsets are 4 bytes
        const BLOB = 0x04;
    }
}

impl HeapSizes {
    /// Flags for heaps of the given sizes; `guids` counts entries, the others bytes.
    #[must_use]
    pub fn for_heaps(strings: usize, guids: usize, blob: usize) -> Self {
        let mut sizes = HeapSizes::empty();
        sizes.set(HeapSizes::STRINGS, strings > 0xFFFF);
        sizes.set(HeapSizes::GUID, guids > 0xFFFF);
        sizes.set(HeapSizes::BLOB, blob > 0xFFFF);
        sizes
    }
}

/// Row counts and heap sizes that determine the width of every index column.
///
/// Rows of tables stored in another stream (the type system tables referenced from a
/// portable PDB) count like local rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    rows: [u32; 64],
    heap_sizes: HeapSizes,
}

fn bits(rows: u32) -> u32 {
    if rows == 0 {
        1
    } else {
        u32::BITS - rows.leading_zeros()
    }
}

impl TableInfo {
    /// Widths for `rows`, indexed by table id.
    #[must_use]
    pub fn new(rows: [u32; 64], heap_sizes: HeapSizes) -> Self {
        TableInfo { rows, heap_sizes }
    }

    /// Number of rows of `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[usize::from(table.id())]
    }

    /// Heap index widths.
    #[must_use]
    pub fn heap_sizes(&self) -> HeapSizes {
        self.heap_sizes
    }

    /// Width of a plain index into `table`.
    #[must_use]
    pub fn table_index_bytes(&self, table: TableId) -> usize {
        if bits(self.rows(table)) > 16 {
            4
        } else {
            2
        }
    }

    /// Width of a coded index: 2 bytes while the largest target table leaves room for the
    /// tag in 16 bits.
    #[must_use]
    pub fn coded_index_bytes(&self, coded: CodedIndexType) -> usize {
        let max_bits = coded
            .tables()
            .iter()
            .flatten()
            .map(|table| bits(self.rows(*table)))
            .max()
            .unwrap_or(1);

        if max_bits + coded.tag_bits() > 16 {
            4
        } else {
            2
        }
    }

    /// Width of one column.
    #[must_use]
    pub fn column_bytes(&self, column: ColumnType) -> usize {
        let heap = |flag: HeapSizes| if self.heap_sizes.contains(flag) { 4 } else { 2 };
        match column {
            ColumnType::U16 => 2,
            ColumnType::U32 => 4,
            ColumnType::String => heap(HeapSizes::STRINGS),
            ColumnType::Guid => heap(HeapSizes::GUID),
            ColumnType::Blob => heap(HeapSizes::BLOB),
            ColumnType::Index(table) => self.table_index_bytes(table),
            ColumnType::Coded(coded) => self.coded_index_bytes(coded),
        }
    }

    /// Width of one row of `table`.
    #[must_use]
    pub fn row_bytes(&self, table: TableId) -> usize {
        table
            .columns()
            .iter()
            .map(|column| self.column_bytes(*column))
            .sum()
    }
}
