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

//! PE/COFF layout of a .NET module.
//!
//! [`PeImage`] is an owned summary of the headers goblin parses: section table, alignments
//! and data directories. It maps RVAs to file offsets for the metadata loader and appends
//! new sections for the writer, which leaves every existing byte of the image where it was
//! and only patches header fields.

use goblin::pe::PE;
use uguid::Guid;

use crate::{
    file::io::{read_le, read_le_at, write_le_at},
    Error::{NotSupported, OutOfBounds},
    Result,
};

/// Data directory of the certificate table.
pub const DIRECTORY_SECURITY: usize = 4;
/// Data directory of the debug directory.
pub const DIRECTORY_DEBUG: usize = 6;
/// Data directory of the CLI header.
pub const DIRECTORY_CLR: usize = 14;

/// `IMAGE_DEBUG_TYPE_CODEVIEW`
pub const DEBUG_TYPE_CODEVIEW: u32 = 2;
/// `RSDS`, the signature of a PDB 7.0 CodeView record.
pub const CODEVIEW_SIGNATURE: u32 = 0x5344_5352;

/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`
pub const SECTION_READ_DATA: u32 = 0x4000_0040;
/// `IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_MEM_READ`
pub const SECTION_CODE: u32 = 0x6000_0020;

const SECTION_HEADER_SIZE: usize = 40;
/// Size of one debug directory entry.
pub const DEBUG_DIRECTORY_ENTRY_SIZE: usize = 28;
const PE32_MAGIC: u16 = 0x10B;

/// One entry of the section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name, NUL padding removed
    pub name: String,
    /// RVA of the section start
    pub virtual_address: u32,
    /// Size when loaded
    pub virtual_size: u32,
    /// File offset of the raw data
    pub pointer_to_raw_data: u32,
    /// Size of the raw data, a multiple of the file alignment
    pub size_of_raw_data: u32,
    /// `IMAGE_SCN_*` flags
    pub characteristics: u32,
}

impl Section {
    fn mapped_size(&self) -> u32 {
        if self.virtual_size == 0 {
            self.size_of_raw_data
        } else {
            self.virtual_size
        }
    }
}

/// The PDB 7.0 CodeView record a module uses to name its symbol file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeView {
    /// GUID shared with the PDB id
    pub guid: Guid,
    /// Incremented on each incremental link
    pub age: u32,
    /// Path of the PDB as recorded by the compiler
    pub path: String,
}

/// Owned view of the PE headers of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeImage {
    /// File offset of the COFF header
    pub coff_offset: usize,
    /// File offset of the optional header
    pub optional_offset: usize,
    /// `true` for PE32+
    pub is_pe32_plus: bool,
    /// Section alignment in memory
    pub section_alignment: u32,
    /// Alignment of raw data in the file
    pub file_alignment: u32,
    /// Combined size of all headers, rounded to the file alignment
    pub size_of_headers: u32,
    /// Section table in file order
    pub sections: Vec<Section>,
    /// Data directories as `(rva, size)`
    pub directories: Vec<(u32, u32)>,
}

fn align(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment.max(1)) * alignment.max(1)
}

impl PeImage {
    /// Parse the headers of a .NET module.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for input that is not a PE file or a PE file
    /// without CLI header, and [`crate::Error::GoblinErr`] for damaged PE headers.
    pub fn parse(data: &[u8]) -> Result<PeImage> {
        if data.get(..2) != Some(b"MZ".as_slice()) {
            return Err(NotSupported);
        }

        let pe = PE::parse(data)?;
        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };

        let coff_offset = read_le::<u32>(data.get(0x3C..).ok_or(OutOfBounds)?)? as usize + 4;
        let optional_offset = coff_offset + 20;
        let is_pe32_plus = optional_header.standard_fields.magic != PE32_MAGIC;

        let mut offset = optional_offset + if is_pe32_plus { 108 } else { 92 };
        let count = read_le_at::<u32>(data, &mut offset)?.min(16) as usize;
        let mut directories = Vec::with_capacity(16);
        for _ in 0..count {
            let rva = read_le_at::<u32>(data, &mut offset)?;
            let size = read_le_at::<u32>(data, &mut offset)?;
            directories.push((rva, size));
        }
        directories.resize(16, (0, 0));

        if directories[DIRECTORY_CLR].0 == 0 {
            log::debug!("PE file without CLR runtime header");
            return Err(NotSupported);
        }

        let sections = pe
            .sections
            .iter()
            .map(|section| Section {
                name: String::from_utf8_lossy(&section.name)
                    .trim_end_matches('\0')
                    .to_string(),
                virtual_address: section.virtual_address,
                virtual_size: section.virtual_size,
                pointer_to_raw_data: section.pointer_to_raw_data,
                size_of_raw_data: section.size_of_raw_data,
                characteristics: section.characteristics,
            })
            .collect();

        Ok(PeImage {
            coff_offset,
            optional_offset,
            is_pe32_plus,
            section_alignment: optional_header.windows_fields.section_alignment,
            file_alignment: optional_header.windows_fields.file_alignment,
            size_of_headers: optional_header.windows_fields.size_of_headers,
            sections,
            directories,
        })
    }

    /// `(rva, size)` of data directory `index`, `(0, 0)` if absent.
    #[must_use]
    pub fn directory(&self, index: usize) -> (u32, u32) {
        self.directories.get(index).copied().unwrap_or_default()
    }

    /// File offset of data directory `index` inside the optional header.
    fn directory_offset(&self, index: usize) -> usize {
        self.optional_offset + if self.is_pe32_plus { 112 } else { 96 } + index * 8
    }

    /// Convert a relative virtual address to a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section maps `rva`.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        for section in &self.sections {
            let Some(section_max) = section.virtual_address.checked_add(section.mapped_size())
            else {
                return Err(malformed_error!(
                    "Section malformed, causing integer overflow - {} + {}",
                    section.virtual_address,
                    section.mapped_size()
                ));
            };

            if section.virtual_address <= rva && rva < section_max {
                let delta = rva - section.virtual_address;
                if delta >= section.size_of_raw_data {
                    return Err(malformed_error!("RVA 0x{:X} has no file backing", rva));
                }
                return Ok(section.pointer_to_raw_data as usize + delta as usize);
            }
        }

        Err(malformed_error!(
            "RVA could not be converted to offset - 0x{:X}",
            rva
        ))
    }

    /// `len` bytes of `data` at `rva`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unmapped RVAs and
    /// [`crate::Error::OutOfBounds`] for ranges past the end of the file.
    pub fn slice_at<'a>(&self, data: &'a [u8], rva: u32, len: usize) -> Result<&'a [u8]> {
        let start = self.rva_to_offset(rva)?;
        start
            .checked_add(len)
            .and_then(|end| data.get(start..end))
            .ok_or(OutOfBounds)
    }

    /// Everything from `rva` to the end of its section's raw data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unmapped RVAs.
    pub fn tail_at<'a>(&self, data: &'a [u8], rva: u32) -> Result<&'a [u8]> {
        let start = self.rva_to_offset(rva)?;
        let end = self
            .sections
            .iter()
            .find(|section| {
                section.virtual_address <= rva
                    && rva - section.virtual_address < section.size_of_raw_data
            })
            .map_or(data.len(), |section| {
                (section.pointer_to_raw_data as usize + section.size_of_raw_data as usize)
                    .min(data.len())
            });
        data.get(start..end).ok_or(OutOfBounds)
    }

    /// The PDB 7.0 CodeView record of the debug directory, if any.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for a debug
    /// directory pointing outside the file.
    pub fn codeview(&self, data: &[u8]) -> Result<Option<CodeView>> {
        let (rva, size) = self.directory(DIRECTORY_DEBUG);
        if rva == 0 || size == 0 {
            return Ok(None);
        }

        let directory = self.slice_at(data, rva, size as usize)?;
        for entry in directory.chunks_exact(DEBUG_DIRECTORY_ENTRY_SIZE) {
            let kind = read_le::<u32>(&entry[12..])?;
            let size_of_data = read_le::<u32>(&entry[16..])? as usize;
            let pointer = read_le::<u32>(&entry[24..])? as usize;
            if kind != DEBUG_TYPE_CODEVIEW || size_of_data < 24 {
                continue;
            }

            let record = pointer
                .checked_add(size_of_data)
                .and_then(|end| data.get(pointer..end))
                .ok_or(OutOfBounds)?;
            if read_le::<u32>(record)? != CODEVIEW_SIGNATURE {
                continue;
            }

            let mut guid = [0_u8; 16];
            guid.copy_from_slice(&record[4..20]);
            let path = &record[24..];
            let path_len = path.iter().position(|byte| *byte == 0).unwrap_or(path.len());

            return Ok(Some(CodeView {
                guid: Guid::from_bytes(guid),
                age: read_le::<u32>(&record[20..])?,
                path: String::from_utf8_lossy(&path[..path_len]).into_owned(),
            }));
        }

        Ok(None)
    }

    /// RVA a section appended to this image would get.
    #[must_use]
    pub fn next_section_rva(&self) -> u32 {
        let end = self
            .sections
            .iter()
            .map(|section| section.virtual_address as usize + section.mapped_size() as usize)
            .max()
            .unwrap_or(self.size_of_headers as usize);

        // Section tables are bounded by SizeOfImage, a u32
        #[allow(clippy::cast_possible_truncation)]
        let rva = align(end, self.section_alignment as usize) as u32;
        rva
    }

    /// Copy `data` with `content` appended as a new section at [`PeImage::next_section_rva`].
    ///
    /// The section header goes into the free space after the section table; the section
    /// count, `SizeOfImage` and `SizeOfInitializedData` are updated and the checksum is
    /// cleared. An Authenticode signature cannot survive the change and is dropped.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the headers have no room for another section
    /// or the image would exceed 4 GiB.
    pub fn append_section(
        &self,
        data: &[u8],
        name: &str,
        content: &[u8],
        characteristics: u32,
    ) -> Result<Vec<u8>> {
        if name.len() > 8 {
            return Err(malformed_error!("Section name too long - {}", name));
        }

        let table_offset = self.coff_offset + 20 + usize::from(read_le::<u16>(
            data.get(self.coff_offset + 16..).ok_or(OutOfBounds)?,
        )?);
        let header_offset = table_offset + self.sections.len() * SECTION_HEADER_SIZE;
        let header_end = header_offset + SECTION_HEADER_SIZE;
        let first_raw = self
            .sections
            .iter()
            .map(|section| section.pointer_to_raw_data as usize)
            .filter(|pointer| *pointer != 0)
            .min()
            .unwrap_or(self.size_of_headers as usize);
        if header_end > self.size_of_headers as usize
            || header_end > first_raw
            || !data
                .get(header_offset..header_end)
                .is_some_and(|slot| slot.iter().all(|byte| *byte == 0))
        {
            return Err(malformed_error!(
                "No room for another section header at 0x{:X}",
                header_offset
            ));
        }

        let to_u32 =
            |value: usize| u32::try_from(value).map_err(|_| malformed_error!("Image exceeds 4 GiB"));
        let file_alignment = self.file_alignment as usize;
        let rva = self.next_section_rva();
        let raw_offset = align(data.len(), file_alignment);
        let raw_size = align(content.len(), file_alignment);

        let mut out = Vec::with_capacity(raw_offset + raw_size);
        out.extend_from_slice(data);
        out.resize(raw_offset, 0);
        out.extend_from_slice(content);
        out.resize(raw_offset + raw_size, 0);

        let mut header = [0_u8; SECTION_HEADER_SIZE];
        header[..name.len()].copy_from_slice(name.as_bytes());
        let mut field = 8;
        write_le_at(&mut header, &mut field, to_u32(content.len())?)?;
        write_le_at(&mut header, &mut field, rva)?;
        write_le_at(&mut header, &mut field, to_u32(raw_size)?)?;
        write_le_at(&mut header, &mut field, to_u32(raw_offset)?)?;
        let mut field = 36;
        write_le_at(&mut header, &mut field, characteristics)?;
        out[header_offset..header_end].copy_from_slice(&header);

        let sections = u16::try_from(self.sections.len() + 1)
            .map_err(|_| malformed_error!("Too many sections"))?;
        write_le_at(&mut out, &mut (self.coff_offset + 2), sections)?;

        let initialized = read_le::<u32>(&out[self.optional_offset + 8..])?;
        write_le_at(
            &mut out,
            &mut (self.optional_offset + 8),
            initialized.saturating_add(to_u32(raw_size)?),
        )?;
        let size_of_image = align(
            rva as usize + content.len(),
            self.section_alignment as usize,
        );
        write_le_at(&mut out, &mut (self.optional_offset + 56), to_u32(size_of_image)?)?;
        write_le_at(&mut out, &mut (self.optional_offset + 64), 0_u32)?;

        if self.directory(DIRECTORY_SECURITY) != (0, 0) {
            log::warn!("Dropping the Authenticode signature of the rewritten module");
            self.set_directory(&mut out, DIRECTORY_SECURITY, 0, 0)?;
        }

        Ok(out)
    }

    /// Overwrite data directory `index` in `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the directory lies outside `data`.
    pub fn set_directory(&self, data: &mut [u8], index: usize, rva: u32, size: u32) -> Result<()> {
        let mut offset = self.directory_offset(index);
        write_le_at(data, &mut offset, rva)?;
        write_le_at(data, &mut offset, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::ModuleBuilder, Error};

    fn image() -> Vec<u8> {
        let mut builder = ModuleBuilder::new("Layout");
        builder.begin_type("Layout", "Empty", 0x0010_0001).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn rejects_non_pe_input() {
        assert!(matches!(PeImage::parse(b"BSJB\x01\0"), Err(Error::NotSupported)));
        assert!(matches!(PeImage::parse(&[]), Err(Error::NotSupported)));
    }

    #[test]
    fn rejects_pe_without_clr_header() {
        let mut data = image();
        let pe = PeImage::parse(&data).unwrap();
        pe.set_directory(&mut data, DIRECTORY_CLR, 0, 0).unwrap();
        assert!(matches!(PeImage::parse(&data), Err(Error::NotSupported)));
    }

    #[test]
    fn maps_rvas_into_text() {
        let data = image();
        let pe = PeImage::parse(&data).unwrap();
        assert!(!pe.is_pe32_plus);
        assert_eq!(pe.sections[0].name, ".text");

        let (clr, size) = pe.directory(DIRECTORY_CLR);
        assert_eq!(size, 72);
        assert_eq!(pe.slice_at(&data, clr, 4).unwrap(), &[72, 0, 0, 0]);
        assert!(pe.rva_to_offset(0x10).is_err());
    }

    #[test]
    fn appended_section_is_mapped() {
        let data = image();
        let pe = PeImage::parse(&data).unwrap();
        let rva = pe.next_section_rva();
        assert_eq!(rva % pe.section_alignment, 0);

        let out = pe
            .append_section(&data, ".weave", b"woven", SECTION_READ_DATA)
            .unwrap();
        assert_eq!(out.len() % pe.file_alignment as usize, 0);

        let appended = PeImage::parse(&out).unwrap();
        assert_eq!(appended.sections.len(), 2);
        assert_eq!(appended.sections[1].name, ".weave");
        assert_eq!(appended.slice_at(&out, rva, 5).unwrap(), b"woven");
        // The original bytes are untouched apart from header fields
        assert_eq!(
            &out[pe.sections[0].pointer_to_raw_data as usize..data.len()],
            &data[pe.sections[0].pointer_to_raw_data as usize..]
        );
    }
}
