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

//! The CLI header (ECMA-335 II.25.3.3), found through the CLR runtime header data directory.

use crate::{
    file::{io::WriteLe, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Size of the header in bytes.
pub const COR20_HEADER_SIZE: usize = 72;

/// `COMIMAGE_FLAGS_ILONLY`
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
/// `COMIMAGE_FLAGS_STRONGNAMESIGNED`
pub const COMIMAGE_FLAGS_STRONGNAMESIGNED: u32 = 0x0000_0008;

/// The CLI header of a .NET module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cor20Header {
    /// Size of the header, 72
    pub cb: u32,
    /// Minimum runtime major version
    pub major_runtime_version: u16,
    /// Minimum runtime minor version
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// `COMIMAGE_FLAGS_*`
    pub flags: u32,
    /// Entry point `MethodDef` token, or native entry point RVA
    pub entry_point_token: u32,
    /// RVA of the managed resources
    pub resource_rva: u32,
    /// Size of the managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature hash
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature hash
    pub strong_name_signature_size: u32,
    /// Reserved, 0
    pub code_manager_table_rva: u32,
    /// Reserved, 0
    pub code_manager_table_size: u32,
    /// RVA of the vtable fixups
    pub vtable_fixups_rva: u32,
    /// Size of the vtable fixups
    pub vtable_fixups_size: u32,
    /// Reserved, 0
    pub export_address_table_jmp_rva: u32,
    /// Reserved, 0
    pub export_address_table_jmp_size: u32,
    /// Reserved, 0
    pub managed_native_header_rva: u32,
    /// Reserved, 0
    pub managed_native_header_size: u32,
}

impl Cor20Header {
    /// Parse the header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for fewer than 72 bytes and
    /// [`crate::Error::Malformed`] for a wrong size field or missing metadata.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);
        let header = Cor20Header {
            cb: parser.read_le()?,
            major_runtime_version: parser.read_le()?,
            minor_runtime_version: parser.read_le()?,
            meta_data_rva: parser.read_le()?,
            meta_data_size: parser.read_le()?,
            flags: parser.read_le()?,
            entry_point_token: parser.read_le()?,
            resource_rva: parser.read_le()?,
            resource_size: parser.read_le()?,
            strong_name_signature_rva: parser.read_le()?,
            strong_name_signature_size: parser.read_le()?,
            code_manager_table_rva: parser.read_le()?,
            code_manager_table_size: parser.read_le()?,
            vtable_fixups_rva: parser.read_le()?,
            vtable_fixups_size: parser.read_le()?,
            export_address_table_jmp_rva: parser.read_le()?,
            export_address_table_jmp_size: parser.read_le()?,
            managed_native_header_rva: parser.read_le()?,
            managed_native_header_size: parser.read_le()?,
        };

        if header.cb as usize != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                header.cb
            ));
        }
        if header.meta_data_rva == 0 || header.meta_data_size == 0 {
            return Err(malformed_error!("CLR header does not reference metadata"));
        }

        Ok(header)
    }

    /// Returns `true` if the module carries a strong name signature.
    #[must_use]
    pub fn is_strong_name_signed(&self) -> bool {
        self.flags & COMIMAGE_FLAGS_STRONGNAMESIGNED != 0 && self.strong_name_signature_size != 0
    }

    /// Serialize the header.
    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COR20_HEADER_SIZE);
        out.write_le(self.cb);
        out.write_le(self.major_runtime_version);
        out.write_le(self.minor_runtime_version);
        for value in [
            self.meta_data_rva,
            self.meta_data_size,
            self.flags,
            self.entry_point_token,
            self.resource_rva,
            self.resource_size,
            self.strong_name_signature_rva,
            self.strong_name_signature_size,
            self.code_manager_table_rva,
            self.code_manager_table_size,
            self.vtable_fixups_rva,
            self.vtable_fixups_size,
            self.export_address_table_jmp_rva,
            self.export_address_table_jmp_size,
            self.managed_native_header_rva,
            self.managed_native_header_size,
        ] {
            out.write_le(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let header = Cor20Header {
            cb: 72,
            major_runtime_version: 2,
            minor_runtime_version: 5,
            meta_data_rva: 0x2080,
            meta_data_size: 0x400,
            flags: COMIMAGE_FLAGS_ILONLY,
            ..Cor20Header::default()
        };

        let bytes = header.write();
        assert_eq!(bytes.len(), COR20_HEADER_SIZE);
        assert_eq!(&bytes[8..12], &[0x80, 0x20, 0, 0]);
        assert_eq!(Cor20Header::read(&bytes).unwrap(), header);
        assert!(!header.is_strong_name_signed());
    }

    #[test]
    fn rejects_missing_metadata() {
        let header = Cor20Header {
            cb: 72,
            ..Cor20Header::default()
        };
        assert!(Cor20Header::read(&header.write()).is_err());
        assert!(Cor20Header::read(&[0; 16]).is_err());
    }
}
