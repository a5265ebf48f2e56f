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

use strum::IntoEnumIterator;

use crate::{
    file::{io::WriteLe, parser::Parser},
    metadata::{
        tables::{HeapSizes, TableId, TableInfo},
        token::Token,
    },
    Error::{InvalidToken, NotSupported},
    Result,
};

/// Tables that must be sorted by their primary key, as most compilers emit them.
pub const DEFAULT_SORTED: u64 = 0x0000_1600_3301_FA00;

/// `HeapSizes` bit announcing four extra bytes after the row counts.
const EXTRA_DATA: u8 = 0x40;
/// `HeapSizes` bits of edit-and-continue deltas.
const ENC_DELTA: u8 = 0x20 | 0x80;

/// A metadata row with a typed view over its cells.
pub trait TableRow: Sized {
    /// Table this row type belongs to.
    const TABLE: TableId;

    /// Decode a row from its cells, one per column of [`TableId::columns`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for cells that do not fit their column.
    fn from_cells(cells: &[u32]) -> Result<Self>;

    /// Encode the row into cells.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] for references the column cannot hold.
    fn to_cells(&self) -> Result<Vec<u32>>;
}

#[derive(Debug, Clone, Default)]
struct Table {
    width: usize,
    cells: Vec<u32>,
}

impl Table {
    fn rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.cells.len() / self.width
        }
    }
}

/// The tables of a `#~` stream, owned.
///
/// Every cell is stored as a `u32` independent of its on-disk width: heap offsets and row
/// indices as they are, coded indices in their tagged form. Widths are derived again from
/// the row counts and heap sizes when the stream is written.
#[derive(Debug, Clone)]
pub struct MetadataTables {
    /// Major version of the stream, 2
    pub major_version: u8,
    /// Minor version of the stream, 0
    pub minor_version: u8,
    /// Tables flagged as sorted
    pub sorted: u64,
    tables: Vec<Table>,
}

impl Default for MetadataTables {
    fn default() -> Self {
        MetadataTables {
            major_version: 2,
            minor_version: 0,
            sorted: DEFAULT_SORTED,
            tables: vec![Table::default(); 64],
        }
    }
}

/// Row counts with `external` filling in the tables that are not stored locally.
fn merge_rows(local: &[u32; 64], external: Option<&[u32; 64]>) -> [u32; 64] {
    let mut rows = *local;
    if let Some(external) = external {
        for (row, other) in rows.iter_mut().zip(external) {
            if *row == 0 {
                *row = *other;
            }
        }
    }
    rows
}

impl MetadataTables {
    /// Parse a tables stream.
    ///
    /// `external` holds the row counts of tables stored in another stream, which is how a
    /// portable PDB sizes its references into the module's type system tables.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for unoptimized or delta metadata,
    /// [`crate::Error::Malformed`] for unknown tables or implausible row counts and
    /// [`crate::Error::OutOfBounds`] for a truncated stream.
    pub fn read(data: &[u8], external: Option<&[u32; 64]>) -> Result<MetadataTables> {
        let mut parser = Parser::new(data);
        let _reserved = parser.read_le::<u32>()?;
        let major_version = parser.read_le::<u8>()?;
        let minor_version = parser.read_le::<u8>()?;
        let heap_sizes = parser.read_le::<u8>()?;
        let _reserved = parser.read_le::<u8>()?;
        let valid = parser.read_le::<u64>()?;
        let sorted = parser.read_le::<u64>()?;

        if heap_sizes & ENC_DELTA != 0 {
            log::warn!("Edit-and-continue delta metadata is not supported");
            return Err(NotSupported);
        }

        let known = TableId::iter().fold(0_u64, |mask, table| mask | table.mask());
        if valid & !known != 0 {
            return Err(malformed_error!(
                "Unknown tables present - 0x{:016X}",
                valid & !known
            ));
        }
        if let Some(table) = TableId::iter().find(|table| table.is_pointer() && valid & table.mask() != 0)
        {
            log::warn!("Unoptimized metadata with {} table is not supported", table.name());
            return Err(NotSupported);
        }

        let mut local = [0_u32; 64];
        for table in TableId::iter() {
            if valid & table.mask() != 0 {
                local[usize::from(table.id())] = parser.read_le::<u32>()?;
            }
        }
        if heap_sizes & EXTRA_DATA != 0 {
            parser.read_le::<u32>()?;
        }

        let info = TableInfo::new(
            merge_rows(&local, external),
            HeapSizes::from_bits_truncate(heap_sizes),
        );

        let mut tables = vec![Table::default(); 64];
        for table in TableId::iter() {
            let count = local[usize::from(table.id())] as usize;
            if count == 0 {
                continue;
            }

            let columns = table.columns();
            let row_bytes = info.row_bytes(table);
            match count.checked_mul(row_bytes) {
                Some(size) if size <= parser.remaining() => {}
                _ => {
                    return Err(malformed_error!(
                        "{} row count {} exceeds stream size",
                        table.name(),
                        count
                    ))
                }
            }

            let slot = &mut tables[usize::from(table.id())];
            slot.width = columns.len();
            slot.cells.reserve(count * columns.len());
            for _ in 0..count {
                for column in columns {
                    let cell = match info.column_bytes(*column) {
                        2 => u32::from(parser.read_le::<u16>()?),
                        _ => parser.read_le::<u32>()?,
                    };
                    slot.cells.push(cell);
                }
            }
        }

        Ok(MetadataTables {
            major_version,
            minor_version,
            sorted,
            tables,
        })
    }

    /// Serialize the tables stream. Empty tables are omitted.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a cell that does not fit its column.
    pub fn write(&self, heap_sizes: HeapSizes, external: Option<&[u32; 64]>) -> Result<Vec<u8>> {
        let local = self.row_counts();
        let info = TableInfo::new(merge_rows(&local, external), heap_sizes);
        let valid = TableId::iter()
            .filter(|table| local[usize::from(table.id())] > 0)
            .fold(0_u64, |mask, table| mask | table.mask());

        let mut out = Vec::new();
        out.write_le(0_u32);
        out.write_le(self.major_version);
        out.write_le(self.minor_version);
        out.write_le(heap_sizes.bits());
        out.write_le(1_u8);
        out.write_le(valid);
        out.write_le(self.sorted);

        for table in TableId::iter() {
            let rows = local[usize::from(table.id())];
            if rows > 0 {
                out.write_le(rows);
            }
        }

        for table in TableId::iter() {
            let slot = &self.tables[usize::from(table.id())];
            let columns = table.columns();
            for row in slot.cells.chunks(slot.width.max(1)) {
                for (column, cell) in columns.iter().zip(row) {
                    if info.column_bytes(*column) == 2 {
                        let narrow = u16::try_from(*cell).map_err(|_| {
                            malformed_error!(
                                "{} cell 0x{:X} exceeds its {:?} column",
                                table.name(),
                                cell,
                                column
                            )
                        })?;
                        out.write_le(narrow);
                    } else {
                        out.write_le(*cell);
                    }
                }
            }
        }

        Ok(out)
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        // Row ids are 24 bits, enforced when rows are added
        #[allow(clippy::cast_possible_truncation)]
        let count = self.tables[usize::from(table.id())].rows() as u32;
        count
    }

    /// Row counts of all tables, indexed by table id.
    #[must_use]
    pub fn row_counts(&self) -> [u32; 64] {
        let mut rows = [0; 64];
        for table in TableId::iter() {
            rows[usize::from(table.id())] = self.row_count(table);
        }
        rows
    }

    /// Tables with at least one row.
    #[must_use]
    pub fn valid(&self) -> u64 {
        TableId::iter()
            .filter(|table| self.row_count(*table) > 0)
            .fold(0, |mask, table| mask | table.mask())
    }

    /// The raw cells of a 1-based `row` of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if the row does not exist.
    pub fn cells(&self, table: TableId, row: u32) -> Result<&[u32]> {
        let slot = &self.tables[usize::from(table.id())];
        let index = (row as usize).wrapping_sub(1);
        if row == 0 || index >= slot.rows() {
            return Err(InvalidToken(Token::from_parts(table.id(), row)));
        }
        Ok(&slot.cells[index * slot.width..(index + 1) * slot.width])
    }

    /// Decode the 1-based `row` of `T`'s table.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if the row does not exist.
    pub fn get<T: TableRow>(&self, row: u32) -> Result<T> {
        T::from_cells(self.cells(T::TABLE, row)?)
    }

    /// Decode every row of `T`'s table.
    ///
    /// # Errors
    /// Returns decoding errors of [`TableRow::from_cells`].
    pub fn rows<T: TableRow>(&self) -> Result<Vec<T>> {
        let slot = &self.tables[usize::from(T::TABLE.id())];
        slot.cells
            .chunks(slot.width.max(1))
            .map(T::from_cells)
            .collect()
    }

    /// Append a row and return its token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table is full, and encoding errors of
    /// [`TableRow::to_cells`].
    pub fn push<T: TableRow>(&mut self, row: &T) -> Result<Token> {
        let cells = row.to_cells()?;
        let slot = &mut self.tables[usize::from(T::TABLE.id())];
        if slot.rows() >= 0x00FF_FFFF {
            return Err(malformed_error!("{} table is full", T::TABLE.name()));
        }

        slot.width = cells.len();
        slot.cells.extend(cells);
        Ok(Token::from_parts(T::TABLE.id(), self.row_count(T::TABLE)))
    }

    /// Replace the 1-based `row` of `T`'s table.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if the row does not exist.
    pub fn set<T: TableRow>(&mut self, row: u32, value: &T) -> Result<()> {
        let cells = value.to_cells()?;
        self.cells(T::TABLE, row)?;

        let slot = &mut self.tables[usize::from(T::TABLE.id())];
        let start = (row as usize - 1) * slot.width;
        slot.cells[start..start + slot.width].copy_from_slice(&cells);
        Ok(())
    }

    /// Stable sort of `table` by the stored value of `column`, and flag it as sorted.
    pub fn sort_by_column(&mut self, table: TableId, column: usize) {
        let slot = &mut self.tables[usize::from(table.id())];
        if slot.width == 0 || column >= slot.width {
            return;
        }

        let mut rows: Vec<Vec<u32>> = slot.cells.chunks(slot.width).map(<[u32]>::to_vec).collect();
        rows.sort_by_key(|row| row[column]);
        slot.cells = rows.concat();
        self.sorted |= table.mask();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::{MemberRefRaw, MethodSpecRaw, StateMachineMethodRaw, TypeRefRaw};

    #[test]
    fn write_then_read() {
        let mut tables = MetadataTables::default();
        tables
            .push(&TypeRefRaw {
                resolution_scope: Token::new(0x2300_0001),
                name: 8,
                namespace: 1,
            })
            .unwrap();
        tables
            .push(&MemberRefRaw {
                class: Token::new(0x0100_0001),
                name: 14,
                signature: 3,
            })
            .unwrap();

        let bytes = tables.write(HeapSizes::empty(), None).unwrap();
        // header + two counts + 6 byte TypeRef + 6 byte MemberRef
        assert_eq!(bytes.len(), 24 + 8 + 6 + 6);

        let parsed = MetadataTables::read(&bytes, None).unwrap();
        assert_eq!(parsed.rows::<TypeRefRaw>().unwrap(), tables.rows::<TypeRefRaw>().unwrap());
        assert_eq!(
            parsed.get::<MemberRefRaw>(1).unwrap().class,
            Token::new(0x0100_0001)
        );
        assert_eq!(parsed.row_count(TableId::MethodDef), 0);
        assert_eq!(parsed.sorted, DEFAULT_SORTED);
    }

    #[test]
    fn method_spec_sets_the_high_mask_bit() {
        let mut tables = MetadataTables::default();
        tables
            .push(&MethodSpecRaw {
                method: Token::new(0x0A00_0002),
                instantiation: 0x10,
            })
            .unwrap();

        let bytes = tables.write(HeapSizes::empty(), None).unwrap();
        let valid = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(valid, 1 << 0x2B);

        let parsed = MetadataTables::read(&bytes, None).unwrap();
        let row = parsed.get::<MethodSpecRaw>(1).unwrap();
        assert_eq!(row.method, Token::new(0x0A00_0002));
        assert_eq!(row.instantiation, 0x10);
    }

    #[test]
    fn wide_cells_follow_row_counts() {
        let mut tables = MetadataTables::default();
        let wide = HeapSizes::STRINGS | HeapSizes::BLOB;
        tables
            .push(&MemberRefRaw {
                class: Token::new(0x0100_0001),
                name: 0x1_0000,
                signature: 0x2_0000,
            })
            .unwrap();
        assert!(tables.write(HeapSizes::empty(), None).is_err());

        let bytes = tables.write(wide, None).unwrap();
        let parsed = MetadataTables::read(&bytes, None).unwrap();
        assert_eq!(parsed.get::<MemberRefRaw>(1).unwrap().signature, 0x2_0000);
    }

    #[test]
    fn external_rows_size_indices() {
        let mut external = [0; 64];
        external[usize::from(TableId::MethodDef.id())] = 0x1_0000;

        let mut tables = MetadataTables::default();
        tables
            .push(&StateMachineMethodRaw {
                move_next: 0x1_0000,
                kickoff: 1,
            })
            .unwrap();

        let bytes = tables.write(HeapSizes::empty(), Some(&external)).unwrap();
        assert_eq!(bytes.len(), 24 + 4 + 8);
        let parsed = MetadataTables::read(&bytes, Some(&external)).unwrap();
        assert_eq!(parsed.row_count(TableId::StateMachineMethod), 1);
    }

    #[test]
    fn pointer_tables_not_supported() {
        let mut bytes = vec![0, 0, 0, 0, 2, 0, 0, 1];
        bytes.write_le(TableId::MethodPtr.mask());
        bytes.write_le(0_u64);
        bytes.write_le(1_u32);
        bytes.write_le(1_u16);
        assert!(matches!(
            MetadataTables::read(&bytes, None),
            Err(crate::Error::NotSupported)
        ));
    }

    #[test]
    fn hostile_row_count_rejected() {
        let mut bytes = vec![0, 0, 0, 0, 2, 0, 0, 1];
        bytes.write_le(TableId::StandAloneSig.mask());
        bytes.write_le(0_u64);
        bytes.write_le(0x00FF_FFFF_u32);
        assert!(MetadataTables::read(&bytes, None).is_err());
    }

    #[test]
    fn unknown_table_rejected() {
        let mut bytes = vec![0, 0, 0, 0, 2, 0, 0, 1];
        bytes.write_le(1_u64 << 0x2D);
        bytes.write_le(0_u64);
        bytes.write_le(1_u32);
        assert!(MetadataTables::read(&bytes, None).is_err());
    }

    #[test]
    fn sorting_flags_the_table() {
        let mut tables = MetadataTables {
            sorted: 0,
            ..MetadataTables::default()
        };
        for name in [9, 3, 5] {
            tables
                .push(&TypeRefRaw {
                    resolution_scope: Token::new(0),
                    name,
                    namespace: 0,
                })
                .unwrap();
        }
        tables.sort_by_column(TableId::TypeRef, 1);
        let names: Vec<u32> = tables
            .rows::<TypeRefRaw>()
            .unwrap()
            .iter()
            .map(|row| row.name)
            .collect();
        assert_eq!(names, [3, 5, 9]);
        assert_eq!(tables.sorted, TableId::TypeRef.mask());
    }
}
