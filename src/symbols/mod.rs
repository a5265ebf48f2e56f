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

//! Portable PDB symbol files.
//!
//! A portable PDB lives next to its module as `<module stem>.pdb`. It is a metadata root of
//! its own with a `#Pdb` stream in front of the usual heaps and tables:
//!
//! ```text
//! [20] PdbId       GUID of the module's CodeView debug entry and a 4 byte stamp
//! u32  EntryPoint  MethodDef token or 0
//! u64  ReferencedTypeSystemTables
//! u32  row count of each referenced module table, in table order
//! ```
//!
//! The module tables are referenced, not copied: their row counts size the index columns of
//! the PDB tables. A rewritten module therefore needs its PDB written again even when only
//! the `StandAloneSig` table grew.

mod sequencepoints;

use std::path::{Path, PathBuf};

use strum::IntoEnumIterator;
use uguid::Guid;

pub use sequencepoints::{SequencePoint, SequencePoints, HIDDEN_LINE};

use crate::{
    file::{io::WriteLe, parser::Parser, pe::PeImage},
    metadata::{
        root::{
            MetadataRoot, CIL_HEADER_MAGIC, STREAM_BLOB, STREAM_GUID, STREAM_PDB, STREAM_STRINGS,
            STREAM_TABLES,
        },
        streams::{Blob, GuidHeap, Strings},
        tables::{
            DocumentRaw, HeapSizes, LocalScopeRaw, MetadataTables, MethodDebugInformationRaw,
            TableId,
        },
        token::Token,
    },
    Error::{NotSupported, SymbolMismatch},
    Result,
};

/// Metadata version string of portable PDBs.
pub const PDB_VERSION: &str = "PDB v1.0";

/// Language GUID of C# documents.
pub const LANGUAGE_CSHARP: Guid = uguid::guid!("3f5162f8-07c6-11d3-9053-00c04fa302a1");

/// Symbol file path belonging to the module at `module`.
#[must_use]
pub fn symbol_path(module: &Path) -> PathBuf {
    module.with_extension("pdb")
}

/// A parsed portable PDB.
#[derive(Debug, Clone)]
pub struct PortablePdb {
    /// GUID and stamp shared with the module's CodeView debug entry
    pub id: [u8; 20],
    /// Entry point `MethodDef` token, 0 for libraries
    pub entry_point: u32,
    /// Row counts of the referenced module tables, indexed by table id
    pub type_system_rows: [u32; 64],
    /// `#Strings` heap
    pub strings: Strings,
    /// `#Blob` heap
    pub blob: Blob,
    /// `#GUID` heap
    pub guids: GuidHeap,
    /// Debug tables
    pub tables: MetadataTables,
    root: MetadataRoot,
}

impl PortablePdb {
    /// An empty PDB for a module with the given table row counts.
    #[must_use]
    pub fn new(id: [u8; 20], type_system_rows: &[u32; 64]) -> PortablePdb {
        let mut pdb = PortablePdb {
            id,
            entry_point: 0,
            type_system_rows: [0; 64],
            strings: Strings::new(),
            blob: Blob::new(),
            guids: GuidHeap::new(),
            tables: MetadataTables::default(),
            root: MetadataRoot {
                version: PDB_VERSION.to_string(),
                ..MetadataRoot::default()
            },
        };
        pdb.sync_type_system(type_system_rows);
        pdb
    }

    /// Parse a portable PDB.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for Windows PDBs and other foreign files, and
    /// [`crate::Error::Malformed`] / [`crate::Error::OutOfBounds`] for damaged input.
    pub fn read(data: &[u8]) -> Result<PortablePdb> {
        if data.len() < 4 || Parser::new(data).read_le::<u32>()? != CIL_HEADER_MAGIC {
            return Err(NotSupported);
        }

        let root = MetadataRoot::read(data)?;
        let Some(pdb_stream) = root.stream(STREAM_PDB) else {
            return Err(NotSupported);
        };

        let mut parser = Parser::new(pdb_stream);
        let mut id = [0_u8; 20];
        id.copy_from_slice(parser.read_bytes(20)?);
        let entry_point = parser.read_le::<u32>()?;
        let referenced = parser.read_le::<u64>()?;

        let mut type_system_rows = [0_u32; 64];
        for table in TableId::iter() {
            if referenced & table.mask() == 0 {
                continue;
            }
            if table.is_debug() {
                return Err(malformed_error!(
                    "#Pdb references debug table {}",
                    table.name()
                ));
            }
            type_system_rows[usize::from(table.id())] = parser.read_le::<u32>()?;
        }

        let tables = MetadataTables::read(
            root.stream(STREAM_TABLES)
                .ok_or_else(|| malformed_error!("PDB has no #~ stream"))?,
            Some(&type_system_rows),
        )?;

        let strings = match root.stream(STREAM_STRINGS) {
            Some(heap) => Strings::from(heap)?,
            None => Strings::new(),
        };
        let blob = match root.stream(STREAM_BLOB) {
            Some(heap) => Blob::from(heap)?,
            None => Blob::new(),
        };
        let guids = root.stream(STREAM_GUID).map(GuidHeap::from).unwrap_or_default();

        Ok(PortablePdb {
            id,
            entry_point,
            type_system_rows,
            strings,
            blob,
            guids,
            tables,
            root,
        })
    }

    /// Read the portable PDB at `path`.
    ///
    /// # Errors
    /// Returns I/O errors and the parsing errors of [`PortablePdb::read`].
    pub fn from_file(path: &Path) -> Result<PortablePdb> {
        let data = std::fs::read(path)?;
        PortablePdb::read(&data)
    }

    /// The GUID part of the PDB id.
    #[must_use]
    pub fn guid(&self) -> Guid {
        let mut guid = [0_u8; 16];
        guid.copy_from_slice(&self.id[..16]);
        Guid::from_bytes(guid)
    }

    /// Check that the PDB belongs to the module image `data`.
    ///
    /// The module names its PDB through the CodeView entry of its debug directory; the GUID
    /// recorded there has to equal the GUID of the PDB id.
    ///
    /// # Errors
    /// Returns [`crate::Error::SymbolMismatch`] if the module has no CodeView entry or the
    /// GUIDs differ.
    pub fn verify(&self, pe: &PeImage, data: &[u8]) -> Result<()> {
        let Some(codeview) = pe.codeview(data)? else {
            return Err(SymbolMismatch(
                "module has no CodeView debug directory entry".to_string(),
            ));
        };

        if codeview.guid != self.guid() {
            return Err(SymbolMismatch(format!(
                "PDB id {} differs from module debug id {} ({})",
                self.guid(),
                codeview.guid,
                codeview.path
            )));
        }

        Ok(())
    }

    /// Adopt the row counts of the module's tables, e.g. after new `StandAloneSig` rows.
    pub fn sync_type_system(&mut self, rows: &[u32; 64]) {
        for table in TableId::iter().filter(|table| !table.is_debug()) {
            let index = usize::from(table.id());
            self.type_system_rows[index] = rows[index];
        }
    }

    /// Names of all documents in row order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid name blobs.
    pub fn documents(&self) -> Result<Vec<String>> {
        self.tables
            .rows::<DocumentRaw>()?
            .iter()
            .map(|row| self.document_name(row.name))
            .collect()
    }

    fn document_name(&self, blob: u32) -> Result<String> {
        let data = self.blob.get(blob)?;
        let mut parser = Parser::new(data);
        let separator = if parser.has_more_data() {
            parser.read_le::<u8>()?
        } else {
            0
        };

        let mut parts = Vec::new();
        while parser.has_more_data() {
            let part = parser.read_compressed_uint()?;
            let bytes = if part == 0 { &[][..] } else { self.blob.get(part)? };
            parts.push(String::from_utf8_lossy(bytes).into_owned());
        }

        let separator = if separator == 0 {
            String::new()
        } else {
            char::from(separator).to_string()
        };
        Ok(parts.join(&separator))
    }

    /// Add a document named `name`, returning its row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a heap or the table is full.
    pub fn add_document(&mut self, name: &str, language: Guid) -> Result<u32> {
        let mut encoded = vec![b'/'];
        for part in name.split('/') {
            let offset = if part.is_empty() {
                0
            } else {
                self.blob.add(part.as_bytes())?
            };
            encoded.write_compressed_uint(offset)?;
        }

        let row = DocumentRaw {
            name: self.blob.add(&encoded)?,
            hash_algorithm: 0,
            hash: 0,
            language: self.guids.add(language)?,
        };
        Ok(self.tables.push(&row)?.row())
    }

    /// Append the debug information of the next `MethodDef` row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for points that cannot be encoded.
    pub fn push_method(&mut self, points: &SequencePoints, local_signature: u32) -> Result<Token> {
        let row = self.method_row(points, local_signature)?;
        self.tables.push(&row)
    }

    /// Append a local scope of the `MethodDef` row `method`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table is full.
    pub fn push_scope(&mut self, method: u32, start_offset: u32, length: u32) -> Result<Token> {
        let variables = self.tables.row_count(TableId::LocalVariable) + 1;
        let constants = self.tables.row_count(TableId::LocalConstant) + 1;
        self.tables.push(&LocalScopeRaw {
            method,
            import_scope: 0,
            variable_list: variables,
            constant_list: constants,
            start_offset,
            length,
        })
    }

    fn method_row(
        &mut self,
        points: &SequencePoints,
        local_signature: u32,
    ) -> Result<MethodDebugInformationRaw> {
        if points.0.is_empty() {
            return Ok(MethodDebugInformationRaw {
                document: 0,
                sequence_points: 0,
            });
        }

        let (document, blob) = points.encode(local_signature)?;
        Ok(MethodDebugInformationRaw {
            document,
            sequence_points: self.blob.add(&blob)?,
        })
    }

    /// Sequence points of `method` with the `StandAloneSig` row of its locals, `None` if the
    /// PDB has none for it.
    ///
    /// # Errors
    /// Returns decoding errors of [`SequencePoints::decode`].
    pub fn sequence_points(&self, method: Token) -> Result<Option<(u32, SequencePoints)>> {
        if method.table() != TableId::MethodDef.id()
            || method.row() == 0
            || method.row() > self.tables.row_count(TableId::MethodDebugInformation)
        {
            return Ok(None);
        }

        let row = self.tables.get::<MethodDebugInformationRaw>(method.row())?;
        if row.sequence_points == 0 {
            return Ok(None);
        }
        SequencePoints::decode(self.blob.get(row.sequence_points)?, row.document).map(Some)
    }

    /// Move the sequence points and local scopes of `method` to new IL offsets.
    ///
    /// `map` returns the new offset for an old one, including the end of the code. Points it
    /// maps to `None` are dropped; scopes keep their old bounds. Scopes starting at offset 0
    /// keep starting there. `local_signature` replaces
    /// the local signature recorded with the points.
    ///
    /// # Errors
    /// Returns decoding and encoding errors of the sequence points blob.
    pub fn remap_method(
        &mut self,
        method: Token,
        map: impl Fn(u32) -> Option<u32>,
        local_signature: Option<Token>,
    ) -> Result<()> {
        if let Some((old_signature, mut points)) = self.sequence_points(method)? {
            points.remap(&map);
            let signature = local_signature.map_or(old_signature, |token| token.row());
            let row = self.method_row(&points, signature)?;
            self.tables.set(method.row(), &row)?;
        }

        let scopes = self.tables.rows::<LocalScopeRaw>()?;
        for (index, scope) in scopes.into_iter().enumerate() {
            if scope.method != method.row() {
                continue;
            }

            let end = scope.start_offset.saturating_add(scope.length);
            // A scope opening the body also covers code injected at its start
            let start = if scope.start_offset == 0 {
                Some(0)
            } else {
                map(scope.start_offset)
            };
            let (Some(start), Some(end)) = (start, map(end)) else {
                log::warn!(
                    "Local scope IL_{:04X}..IL_{:04X} of {} does not map to the rewritten code",
                    scope.start_offset,
                    end,
                    method
                );
                continue;
            };

            // Row ids are 24 bits
            #[allow(clippy::cast_possible_truncation)]
            let row = index as u32 + 1;
            self.tables.set(
                row,
                &LocalScopeRaw {
                    start_offset: start,
                    length: end.saturating_sub(start),
                    ..scope
                },
            )?;
        }

        Ok(())
    }

    /// Serialize the PDB.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the PDB exceeds the format limits.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut pdb_stream = Vec::with_capacity(32 + 4 * 64);
        pdb_stream.extend_from_slice(&self.id);
        pdb_stream.write_le(self.entry_point);
        let referenced = TableId::iter()
            .filter(|table| self.type_system_rows[usize::from(table.id())] > 0)
            .fold(0_u64, |mask, table| mask | table.mask());
        pdb_stream.write_le(referenced);
        for table in TableId::iter() {
            let rows = self.type_system_rows[usize::from(table.id())];
            if rows > 0 {
                pdb_stream.write_le(rows);
            }
        }

        let heap_sizes = HeapSizes::for_heaps(
            self.strings.data().len(),
            self.guids.len(),
            self.blob.data().len(),
        );
        let mut root = self.root.clone();
        root.set_stream(STREAM_PDB, pdb_stream);
        root.set_stream(
            STREAM_TABLES,
            self.tables.write(heap_sizes, Some(&self.type_system_rows))?,
        );
        root.set_stream(STREAM_STRINGS, self.strings.data().to_vec());
        root.set_stream(STREAM_GUID, self.guids.data().to_vec());
        root.set_stream(STREAM_BLOB, self.blob.data().to_vec());
        root.write()
    }
}
