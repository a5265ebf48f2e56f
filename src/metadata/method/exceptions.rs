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

//! Exception handling clauses of method bodies (ECMA-335 II.25.4.6).

use bitflags::bitflags;

use crate::{file::io::WriteLe, Result};

bitflags! {
    /// Kind of an exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause (finally that is called on exception only)
        const FAULT = 0x0004;
    }
}

/// One exception handling clause, with IL offsets relative to the start of the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Class token for typed clauses, filter start for filter clauses, 0 otherwise
    pub filter_offset: u32,
}

impl ExceptionHandler {
    fn fits_small(&self) -> bool {
        self.try_offset <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_offset <= 0xFFFF
            && self.handler_length <= 0xFF
    }
}

/// Encode `handlers` as a single EH data section, small format whenever every clause fits.
///
/// The section is meant to be appended to a 4-byte aligned body.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if there are too many clauses for one section.
pub fn encode_exception_handlers(handlers: &[ExceptionHandler]) -> Result<Vec<u8>> {
    let mut section = Vec::new();

    let small_size = handlers.len() * 12 + 4;
    if small_size <= 0xFF && handlers.iter().all(ExceptionHandler::fits_small) {
        section.push(0x01);
        // Bounded by the check above
        #[allow(clippy::cast_possible_truncation)]
        section.push(small_size as u8);
        section.write_le(0_u16);

        #[allow(clippy::cast_possible_truncation)]
        for handler in handlers {
            section.write_le(handler.flags.bits());
            section.write_le(handler.try_offset as u16);
            section.push(handler.try_length as u8);
            section.write_le(handler.handler_offset as u16);
            section.push(handler.handler_length as u8);
            section.write_le(handler.filter_offset);
        }
    } else {
        let fat_size = handlers.len() * 24 + 4;
        if fat_size > 0x00FF_FFFF {
            return Err(malformed_error!(
                "Too many exception handlers - {}",
                handlers.len()
            ));
        }

        #[allow(clippy::cast_possible_truncation)]
        let header = 0x41 | ((fat_size as u32) << 8);
        section.write_le(header);

        for handler in handlers {
            section.write_le(u32::from(handler.flags.bits()));
            section.write_le(handler.try_offset);
            section.write_le(handler.try_length);
            section.write_le(handler.handler_offset);
            section.write_le(handler.handler_length);
            section.write_le(handler.filter_offset);
        }
    }

    Ok(section)
}
