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

//! Representation and parsing of CIL method bodies.
//!
//! A body is a header (tiny or fat), the CIL code, and for fat bodies optional extra data
//! sections holding exception handling clauses.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    file::io::{read_le, read_le_at, WriteLe},
    metadata::method::{
        encode_exception_handlers, ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags,
        SectionFlags,
    },
    Error::OutOfBounds,
    Result,
};

/// Max stack implied by a tiny header.
pub const TINY_MAX_STACK: usize = 8;

/// The parsed header and section data of a method body.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Size of the CIL code in bytes
    pub size_code: usize,
    /// Size of the header in bytes
    pub size_header: usize,
    /// Size of the whole body, data sections included
    pub size_total: usize,
    /// `StandAloneSig` token of the local variable signature, 0 if none
    pub local_var_sig_token: u32,
    /// Maximum evaluation stack depth
    pub max_stack: usize,
    /// Header format
    pub is_fat: bool,
    /// Locals are zero-initialized
    pub is_init_local: bool,
    /// Exception handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Parse the body starting at `data[0]`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated bodies and
    /// [`crate::Error::Malformed`] for invalid headers.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    size_total: size_code + 1,
                    local_var_sig_token: 0,
                    max_stack: TINY_MAX_STACK,
                    is_fat: false,
                    is_init_local: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = ((first_duo >> 12) * 4) as usize;
                if size_header < 12 {
                    return Err(malformed_error!(
                        "Fat method header too small - {}",
                        size_header
                    ));
                }
                let size_code = read_le::<u32>(&data[4..])? as usize;
                if data.len() < size_code + size_header {
                    return Err(OutOfBounds);
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])? as usize;

                let is_init_local = flags_header.contains(MethodBodyFlags::INIT_LOCALS);

                let mut size_total = size_header + size_code;
                let mut exception_handlers = Vec::new();
                if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    // Sections start 4-byte aligned after the code
                    let mut cursor = (size_total + 3) & !3;

                    loop {
                        if data.len() < cursor + 4 {
                            return Err(OutOfBounds);
                        }

                        let section_flags =
                            SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
                        let is_fat_section = section_flags.contains(SectionFlags::FAT_FORMAT);
                        let section_size = if is_fat_section {
                            (read_le::<u32>(&data[cursor..])? >> 8) as usize
                        } else {
                            read_le::<u8>(&data[cursor + 1..])? as usize
                        };
                        if section_size < 4 || data.len() < cursor + section_size {
                            return Err(malformed_error!(
                                "Invalid method data section size - {}",
                                section_size
                            ));
                        }

                        if section_flags.contains(SectionFlags::EHTABLE) {
                            let mut offset = cursor + 4;
                            if is_fat_section {
                                for _ in 0..(section_size - 4) / 24 {
                                    // Clause flags occupy the low half of the first field
                                    #[allow(clippy::cast_possible_truncation)]
                                    let flags = ExceptionHandlerFlags::from_bits_truncate(
                                        read_le_at::<u32>(data, &mut offset)? as u16,
                                    );
                                    exception_handlers.push(ExceptionHandler {
                                        flags,
                                        try_offset: read_le_at::<u32>(data, &mut offset)?,
                                        try_length: read_le_at::<u32>(data, &mut offset)?,
                                        handler_offset: read_le_at::<u32>(data, &mut offset)?,
                                        handler_length: read_le_at::<u32>(data, &mut offset)?,
                                        filter_offset: read_le_at::<u32>(data, &mut offset)?,
                                    });
                                }
                            } else {
                                for _ in 0..(section_size - 4) / 12 {
                                    exception_handlers.push(ExceptionHandler {
                                        flags: ExceptionHandlerFlags::from_bits_truncate(
                                            read_le_at::<u16>(data, &mut offset)?,
                                        ),
                                        try_offset: u32::from(read_le_at::<u16>(
                                            data,
                                            &mut offset,
                                        )?),
                                        try_length: u32::from(read_le_at::<u8>(
                                            data,
                                            &mut offset,
                                        )?),
                                        handler_offset: u32::from(read_le_at::<u16>(
                                            data,
                                            &mut offset,
                                        )?),
                                        handler_length: u32::from(read_le_at::<u8>(
                                            data,
                                            &mut offset,
                                        )?),
                                        filter_offset: read_le_at::<u32>(data, &mut offset)?,
                                    });
                                }
                            }
                        }

                        cursor += section_size;
                        size_total = cursor;

                        if !section_flags.contains(SectionFlags::MORE_SECTS) {
                            break;
                        }
                        cursor = (cursor + 3) & !3;
                    }
                }

                Ok(MethodBody {
                    size_code,
                    size_header,
                    size_total,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local,
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Header plus code size, excluding data sections.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// Returns `true` if the body carries exception handling clauses.
    #[must_use]
    pub fn has_exception_handlers(&self) -> bool {
        !self.exception_handlers.is_empty()
    }
}

/// Parameters of a body to encode.
#[derive(Debug, Clone)]
pub struct MethodBodyHeader {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// `StandAloneSig` token of the local variable signature, 0 if none
    pub local_var_sig_token: u32,
    /// Zero-initialize locals
    pub init_locals: bool,
    /// Force the fat format even when a tiny header would do
    pub force_fat: bool,
}

/// Encode a complete method body: header, `code` and the exception handling section.
///
/// The tiny format is used when the body allows it and `force_fat` is not set.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the code exceeds the encodable size.
pub fn encode_method_body(
    header: &MethodBodyHeader,
    code: &[u8],
    handlers: &[ExceptionHandler],
) -> Result<Vec<u8>> {
    let code_size =
        u32::try_from(code.len()).map_err(|_| malformed_error!("Method body size exceeds u32"))?;

    let tiny = !header.force_fat
        && code.len() < 64
        && usize::from(header.max_stack) <= TINY_MAX_STACK
        && header.local_var_sig_token == 0
        && !header.init_locals
        && handlers.is_empty();

    let mut body = Vec::with_capacity(code.len() + 12);
    if tiny {
        // Bounded by the size check above
        #[allow(clippy::cast_possible_truncation)]
        body.push(((code.len() as u8) << 2) | 0x2);
        body.extend_from_slice(code);
        return Ok(body);
    }

    let mut flags = MethodBodyFlags::FAT_FORMAT.bits() | (3 << 12);
    if header.init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS.bits();
    }
    if !handlers.is_empty() {
        flags |= MethodBodyFlags::MORE_SECTS.bits();
    }

    body.write_le(flags);
    body.write_le(header.max_stack);
    body.write_le(code_size);
    body.write_le(header.local_var_sig_token);
    body.extend_from_slice(code);

    if !handlers.is_empty() {
        while body.len() % 4 != 0 {
            body.push(0x00);
        }
        body.extend_from_slice(&encode_exception_handlers(handlers)?);
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        // ldarg.0; ret
        let data = [0x0A, 0x02, 0x2A];
        let body = MethodBody::from(&data).unwrap();

        assert!(!body.is_fat);
        assert!(!body.is_init_local);
        assert!(!body.has_exception_handlers());
        assert_eq!(body.max_stack, TINY_MAX_STACK);
        assert_eq!(body.size_code, 2);
        assert_eq!(body.size_header, 1);
        assert_eq!(body.size(), 3);
        assert_eq!(body.size_total, 3);
        assert_eq!(body.local_var_sig_token, 0);
    }

    #[test]
    fn tiny_truncated() {
        assert!(MethodBody::from(&[0x0A, 0x02]).is_err());
        assert!(MethodBody::from(&[]).is_err());
    }

    #[test]
    fn fat() {
        #[rustfmt::skip]
        let data = [
            0x13, 0x30, 0x02, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x11,
            0x06, 0x2A,
        ];
        let body = MethodBody::from(&data).unwrap();

        assert!(body.is_fat);
        assert!(body.is_init_local);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.size_code, 2);
        assert_eq!(body.size_header, 12);
        assert_eq!(body.size_total, 14);
        assert_eq!(body.local_var_sig_token, 0x1100_0001);
    }

    #[test]
    fn fat_exceptions_roundtrip() {
        let handlers = vec![ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: 0,
            try_length: 2,
            handler_offset: 2,
            handler_length: 1,
            filter_offset: 0,
        }];
        let header = MethodBodyHeader {
            max_stack: 1,
            local_var_sig_token: 0,
            init_locals: false,
            force_fat: false,
        };
        // nop; leave.s 0 ... endfinally; ret (shape only matters here)
        let code = [0x00, 0x00, 0xDC, 0x2A, 0x00];
        let encoded = encode_method_body(&header, &code, &handlers).unwrap();

        // 12 header + 5 code + 3 padding + 16 section
        assert_eq!(encoded.len(), 36);

        let body = MethodBody::from(&encoded).unwrap();
        assert!(body.is_fat);
        assert_eq!(body.size_code, 5);
        assert_eq!(body.size_total, 36);
        assert_eq!(body.exception_handlers, handlers);
    }

    #[test]
    fn encode_picks_tiny() {
        let header = MethodBodyHeader {
            max_stack: 8,
            local_var_sig_token: 0,
            init_locals: false,
            force_fat: false,
        };
        let encoded = encode_method_body(&header, &[0x2A], &[]).unwrap();
        assert_eq!(encoded, [0x06, 0x2A]);

        let forced = MethodBodyHeader {
            force_fat: true,
            ..header
        };
        let encoded = encode_method_body(&forced, &[0x2A], &[]).unwrap();
        assert_eq!(encoded.len(), 13);
        assert_eq!(MethodBody::from(&encoded).unwrap().max_stack, 8);
    }
}
