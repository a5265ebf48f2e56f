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

//! CIL bytecode decoding.
//!
//! [`decode_stream`] turns the code bytes of a method body into an [`InstructionStream`].
//! Branch displacements and exception clause offsets are resolved to [`InstrId`]s, and the
//! byte offset every instruction was decoded from is kept for symbol remapping.
//!
//! # Examples
//!
//! ```rust
//! use dotweave::assembly::decode_stream;
//!
//! // ldarg.0; brtrue.s +1; nop; ret
//! let decoded = decode_stream(&[0x02, 0x2D, 0x01, 0x00, 0x2A], &[])?;
//! assert_eq!(decoded.stream.len(), 4);
//! assert_eq!(decoded.offsets, vec![0, 1, 3, 4]);
//! # Ok::<(), dotweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{fe, lookup, FlowType, Immediate, InstrId, Instruction, Operand, OperandType},
        opcodes,
        stream::{Boundary, ExceptionRegion, InstructionStream},
    },
    file::parser::Parser,
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags},
        token::Token,
    },
    Result,
};

/// Result of decoding a method's code.
#[derive(Debug, Clone)]
pub struct DecodedStream {
    /// The decoded instructions
    pub stream: InstructionStream,
    /// Original byte offset of every instruction, indexed by [`InstrId::index`]
    pub offsets: Vec<u32>,
}

impl DecodedStream {
    /// Map from original byte offset to instruction.
    #[must_use]
    pub fn offset_map(&self) -> HashMap<u32, InstrId> {
        self.stream
            .ids()
            .iter()
            .map(|id| (self.offsets[id.index()], *id))
            .collect()
    }
}

enum PendingOperand {
    Ready(Operand),
    Branch(i64),
    Switch(Vec<i64>),
}

fn is_local_opcode(opcode: u16) -> bool {
    opcode == u16::from(opcodes::LDLOC_S)
        || opcode == u16::from(opcodes::LDLOCA_S)
        || opcode == u16::from(opcodes::STLOC_S)
        || opcode == fe(opcodes::FE_LDLOC)
        || opcode == fe(opcodes::FE_LDLOCA)
        || opcode == fe(opcodes::FE_STLOC)
}

fn is_argument_opcode(opcode: u16) -> bool {
    opcode == u16::from(opcodes::LDARG_S)
        || opcode == u16::from(opcodes::LDARGA_S)
        || opcode == u16::from(opcodes::STARG_S)
        || opcode == fe(opcodes::FE_LDARG)
        || opcode == fe(opcodes::FE_LDARGA)
        || opcode == fe(opcodes::FE_STARG)
}

/// Decode a single instruction at the parser position.
///
/// Branch displacements are returned relative to the start of the code.
fn decode_instruction(parser: &mut Parser) -> Result<(u16, PendingOperand)> {
    let first_byte = parser.read_le::<u8>()?;
    let opcode = if first_byte == opcodes::FE_PREFIX {
        fe(parser.read_le::<u8>()?)
    } else {
        u16::from(first_byte)
    };

    let info = lookup(opcode)?;
    let operand = match info.op_type {
        OperandType::None => PendingOperand::Ready(Operand::None),
        OperandType::Int8 if matches!(
            info.flow,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        ) =>
        {
            let displacement = i64::from(parser.read_le::<i8>()?);
            PendingOperand::Branch(parser.pos() as i64 + displacement)
        }
        OperandType::Int32 if matches!(
            info.flow,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        ) =>
        {
            let displacement = i64::from(parser.read_le::<i32>()?);
            PendingOperand::Branch(parser.pos() as i64 + displacement)
        }
        OperandType::Int8 => {
            PendingOperand::Ready(Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)))
        }
        OperandType::UInt8 => {
            let value = parser.read_le::<u8>()?;
            PendingOperand::Ready(if is_local_opcode(opcode) {
                Operand::Local(u16::from(value))
            } else if is_argument_opcode(opcode) {
                Operand::Argument(u16::from(value))
            } else {
                Operand::Immediate(Immediate::UInt8(value))
            })
        }
        OperandType::UInt16 => {
            let value = parser.read_le::<u16>()?;
            PendingOperand::Ready(if is_local_opcode(opcode) {
                Operand::Local(value)
            } else if is_argument_opcode(opcode) {
                Operand::Argument(value)
            } else {
                Operand::Immediate(Immediate::UInt16(value))
            })
        }
        OperandType::Int32 => {
            PendingOperand::Ready(Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)))
        }
        OperandType::Int64 => {
            PendingOperand::Ready(Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)))
        }
        OperandType::Float32 => PendingOperand::Ready(Operand::Immediate(Immediate::Float32(
            parser.read_le::<f32>()?,
        ))),
        OperandType::Float64 => PendingOperand::Ready(Operand::Immediate(Immediate::Float64(
            parser.read_le::<f64>()?,
        ))),
        OperandType::Token => {
            PendingOperand::Ready(Operand::Token(Token::new(parser.read_le::<u32>()?)))
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count > parser.remaining() / 4 {
                return Err(malformed_error!("Switch table exceeds code - {}", case_count));
            }

            let mut displacements = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                displacements.push(i64::from(parser.read_le::<i32>()?));
            }

            let base = parser.pos() as i64;
            PendingOperand::Switch(displacements.into_iter().map(|d| base + d).collect())
        }
    };

    Ok((opcode, operand))
}

/// Decode the code bytes of a method body and its exception clauses.
///
/// # Errors
/// Returns [`crate::Error::InvalidOpcode`] for reserved opcodes, [`crate::Error::OutOfBounds`]
/// for truncated code and [`crate::Error::Malformed`] for branches or clauses that do not land
/// on an instruction boundary.
pub fn decode_stream(code: &[u8], handlers: &[ExceptionHandler]) -> Result<DecodedStream> {
    let mut parser = Parser::new(code);
    let mut pending = Vec::new();
    let mut offsets = Vec::new();

    while parser.has_more_data() {
        // Code size is bounded by the u32 size field of the body header
        #[allow(clippy::cast_possible_truncation)]
        offsets.push(parser.pos() as u32);
        pending.push(decode_instruction(&mut parser)?);
    }

    #[allow(clippy::cast_possible_truncation)]
    let by_offset: HashMap<i64, InstrId> = offsets
        .iter()
        .enumerate()
        .map(|(index, offset)| (i64::from(*offset), InstrId(index as u32)))
        .collect();
    let resolve = |target: i64| -> Result<InstrId> {
        by_offset
            .get(&target)
            .copied()
            .ok_or_else(|| malformed_error!("Branch target not on an instruction - {}", target))
    };

    let mut stream = InstructionStream::new();
    for (opcode, operand) in pending {
        let operand = match operand {
            PendingOperand::Ready(operand) => operand,
            PendingOperand::Branch(target) => Operand::Target(resolve(target)?),
            PendingOperand::Switch(targets) => Operand::Switch(
                targets
                    .into_iter()
                    .map(&resolve)
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        stream.push(Instruction::new(opcode, operand));
    }

    let code_len = code.len() as u64;
    let boundary = |offset: u64| -> Result<Boundary> {
        if offset == code_len {
            return Ok(Boundary::End);
        }
        by_offset
            .get(&(offset as i64))
            .copied()
            .map(Boundary::At)
            .ok_or_else(|| malformed_error!("Exception clause offset not on an instruction - {}", offset))
    };

    for handler in handlers {
        let is_filter = handler
            .flags
            .contains(ExceptionHandlerFlags::FILTER);
        stream.regions.push(ExceptionRegion {
            flags: handler.flags,
            try_start: boundary(u64::from(handler.try_offset))?,
            try_end: boundary(u64::from(handler.try_offset) + u64::from(handler.try_length))?,
            handler_start: boundary(u64::from(handler.handler_offset))?,
            handler_end: boundary(
                u64::from(handler.handler_offset) + u64::from(handler.handler_length),
            )?,
            filter_start: if is_filter {
                Some(boundary(u64::from(handler.filter_offset))?)
            } else {
                None
            },
            class_token: if is_filter { 0 } else { handler.filter_offset },
        });
    }

    Ok(DecodedStream { stream, offsets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn operands_are_typed() {
        #[rustfmt::skip]
        let code = [
            0x11, 0x05,                         // ldloc.s 5
            0x0E, 0x01,                         // ldarg.s 1
            0x1F, 0xFE,                         // ldc.i4.s -2
            0xFE, 0x0E, 0x00, 0x01,             // stloc 256
            0x28, 0x01, 0x00, 0x00, 0x0A,       // call 0x0A000001
            0xFE, 0x01,                         // ceq
            0x2A,                               // ret
        ];
        let decoded = decode_stream(&code, &[]).unwrap();
        let operands: Vec<&Operand> = decoded.stream.iter().map(|(_, i)| &i.operand).collect();

        assert_eq!(operands[0], &Operand::Local(5));
        assert_eq!(operands[1], &Operand::Argument(1));
        assert_eq!(operands[2], &Operand::Immediate(Immediate::Int8(-2)));
        assert_eq!(operands[3], &Operand::Local(256));
        assert_eq!(operands[4], &Operand::Token(Token::new(0x0A00_0001)));
        assert_eq!(decoded.stream.at(5).unwrap().mnemonic(), "ceq");
        assert_eq!(decoded.offsets, vec![0, 2, 4, 6, 10, 15, 17]);
    }

    #[test]
    fn branches_resolve_to_ids() {
        // br.s -2 (loop onto itself); brfalse +0; ret
        let code = [0x2B, 0xFE, 0x39, 0x00, 0x00, 0x00, 0x00, 0x2A];
        let decoded = decode_stream(&code, &[]).unwrap();
        let ids = decoded.stream.ids().to_vec();

        assert_eq!(decoded.stream.at(0).unwrap().operand, Operand::Target(ids[0]));
        assert_eq!(decoded.stream.at(1).unwrap().operand, Operand::Target(ids[2]));
    }

    #[test]
    fn switch_targets() {
        // switch (2) [+0, +1]; nop; ret
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x2A,
        ];
        let decoded = decode_stream(&code, &[]).unwrap();
        let ids = decoded.stream.ids().to_vec();
        assert_eq!(
            decoded.stream.at(0).unwrap().operand,
            Operand::Switch(vec![ids[1], ids[2]])
        );
    }

    #[test]
    fn branch_into_instruction_is_malformed() {
        // br.s +1 lands inside the ldc.i4.s
        let code = [0x2B, 0x01, 0x1F, 0x05, 0x2A];
        assert!(matches!(
            decode_stream(&code, &[]),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn reserved_opcode() {
        assert!(matches!(
            decode_stream(&[0x24], &[]),
            Err(Error::InvalidOpcode(0x24))
        ));
        assert!(matches!(
            decode_stream(&[0x28, 0x01], &[]),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn exception_regions() {
        // try { nop; leave.s +1 } finally { nop; endfinally } ret
        let code = [0x00, 0xDE, 0x01, 0x00, 0xDC, 0x2A];
        let handlers = [ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 2,
            filter_offset: 0,
        }];
        let decoded = decode_stream(&code, &handlers).unwrap();
        let ids = decoded.stream.ids().to_vec();
        let region = &decoded.stream.regions[0];

        assert_eq!(region.try_start, Boundary::At(ids[0]));
        assert_eq!(region.try_end, Boundary::At(ids[2]));
        assert_eq!(region.handler_end, Boundary::At(ids[4]));
        assert_eq!(decoded.offset_map()[&3], ids[2]);
    }
}
