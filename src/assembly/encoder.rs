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

//! CIL bytecode encoding.
//!
//! [`encode_stream`] lays out an [`InstructionStream`] as code bytes. Branches keep the form
//! they were created with; short branches whose displacement no longer fits in 8 bits are
//! promoted to the long form, repeating the layout until it is stable.

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{lookup, Immediate, InstrId, Instruction, Operand, OperandType},
        opcodes,
        stream::{Boundary, InstructionStream},
    },
    file::io::WriteLe,
    metadata::method::ExceptionHandler,
    Result,
};

/// Result of encoding an instruction stream.
#[derive(Debug, Clone)]
pub struct EncodedStream {
    /// The code bytes
    pub code: Vec<u8>,
    /// Byte offset of every placed instruction
    pub offsets: HashMap<InstrId, u32>,
    /// Exception clauses with resolved offsets
    pub handlers: Vec<ExceptionHandler>,
}

fn operand_size(instruction: &Instruction, op_type: OperandType) -> usize {
    match (&instruction.operand, op_type) {
        (Operand::Switch(targets), _) => 4 + 4 * targets.len(),
        (_, op_type) => op_type.size().unwrap_or(0),
    }
}

fn opcode_size(opcode: u16) -> usize {
    if opcode > 0xFF {
        2
    } else {
        1
    }
}

fn check_operand(instruction: &Instruction, op_type: OperandType) -> Result<()> {
    let valid = match (&instruction.operand, op_type) {
        (Operand::None, OperandType::None)
        | (Operand::Immediate(Immediate::Int8(_)), OperandType::Int8)
        | (Operand::Immediate(Immediate::UInt8(_)), OperandType::UInt8)
        | (Operand::Immediate(Immediate::UInt16(_)), OperandType::UInt16)
        | (Operand::Immediate(Immediate::Int32(_)), OperandType::Int32)
        | (Operand::Immediate(Immediate::Int64(_)), OperandType::Int64)
        | (Operand::Immediate(Immediate::Float32(_)), OperandType::Float32)
        | (Operand::Immediate(Immediate::Float64(_)), OperandType::Float64)
        | (Operand::Token(_), OperandType::Token)
        | (Operand::Target(_), OperandType::Int8 | OperandType::Int32)
        | (Operand::Switch(_), OperandType::Switch)
        | (Operand::Local(_) | Operand::Argument(_), OperandType::UInt16) => true,
        (Operand::Local(index) | Operand::Argument(index), OperandType::UInt8) => *index <= 0xFF,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(malformed_error!(
            "Operand '{}' does not fit '{}'",
            instruction.operand.kind(),
            instruction.mnemonic()
        ))
    }
}

/// Lay out and encode `stream`.
///
/// # Errors
/// Returns [`crate::Error::InvalidOpcode`] for unknown opcodes and [`crate::Error::Malformed`]
/// for operands that do not match their opcode or targets that are not part of the stream.
pub fn encode_stream(stream: &InstructionStream) -> Result<EncodedStream> {
    let mut opcodes_in_order = Vec::with_capacity(stream.len());
    for (_, instruction) in stream.iter() {
        check_operand(instruction, lookup(instruction.opcode)?.op_type)?;
        opcodes_in_order.push(instruction.opcode);
    }

    let offsets = loop {
        let mut offsets = HashMap::with_capacity(stream.len());
        let mut position = 0_usize;
        for ((id, instruction), opcode) in stream.iter().zip(&opcodes_in_order) {
            offsets.insert(id, position);
            position +=
                opcode_size(*opcode) + operand_size(instruction, lookup(*opcode)?.op_type);
        }

        let mut promoted = false;
        for (index, (id, instruction)) in stream.iter().enumerate() {
            let Operand::Target(target) = instruction.operand else {
                continue;
            };
            let opcode = opcodes_in_order[index];
            // Short branches are always single-byte opcodes
            #[allow(clippy::cast_possible_truncation)]
            let Some(long) = opcodes::long_branch(opcode as u8).filter(|_| opcode <= 0xFF) else {
                continue;
            };

            let next = offsets[&id] + 2;
            let target = *offsets.get(&target).ok_or_else(|| {
                malformed_error!("Branch target {} is not part of the stream", target)
            })?;
            let displacement = target as i64 - next as i64;
            if i8::try_from(displacement).is_err() {
                opcodes_in_order[index] = u16::from(long);
                promoted = true;
            }
        }

        if !promoted {
            break offsets;
        }
    };

    let mut code = Vec::new();
    for ((id, instruction), opcode) in stream.iter().zip(&opcodes_in_order) {
        let info = lookup(*opcode)?;
        if *opcode > 0xFF {
            code.push(opcodes::FE_PREFIX);
        }
        // Low byte of the opcode, the prefix was written above
        #[allow(clippy::cast_possible_truncation)]
        code.push(*opcode as u8);

        let next = offsets[&id] + opcode_size(*opcode) + operand_size(instruction, info.op_type);
        let displacement = |target: &InstrId| -> Result<i64> {
            offsets
                .get(target)
                .map(|offset| *offset as i64 - next as i64)
                .ok_or_else(|| malformed_error!("Branch target {} is not part of the stream", target))
        };

        match (&instruction.operand, info.op_type) {
            (Operand::None, _) => {}
            (Operand::Immediate(value), _) => match value {
                Immediate::Int8(value) => code.write_le(*value),
                Immediate::UInt8(value) => code.write_le(*value),
                Immediate::UInt16(value) => code.write_le(*value),
                Immediate::Int32(value) => code.write_le(*value),
                Immediate::Int64(value) => code.write_le(*value),
                Immediate::Float32(value) => code.write_le(*value),
                Immediate::Float64(value) => code.write_le(*value),
            },
            (Operand::Token(token), _) => code.write_le(token.value()),
            (Operand::Local(index) | Operand::Argument(index), OperandType::UInt8) => {
                // Range checked by check_operand
                #[allow(clippy::cast_possible_truncation)]
                code.push(*index as u8);
            }
            (Operand::Local(index) | Operand::Argument(index), _) => code.write_le(*index),
            (Operand::Target(target), OperandType::Int8) => {
                let value = i8::try_from(displacement(target)?)
                    .map_err(|_| malformed_error!("Short branch out of range"))?;
                code.write_le(value);
            }
            (Operand::Target(target), _) => {
                let value = i32::try_from(displacement(target)?)
                    .map_err(|_| malformed_error!("Branch out of range"))?;
                code.write_le(value);
            }
            (Operand::Switch(targets), _) => {
                let count = u32::try_from(targets.len())
                    .map_err(|_| malformed_error!("Switch table too large"))?;
                code.write_le(count);
                for target in targets {
                    let value = i32::try_from(displacement(target)?)
                        .map_err(|_| malformed_error!("Branch out of range"))?;
                    code.write_le(value);
                }
            }
        }
    }

    let to_u32 = |value: usize| {
        u32::try_from(value).map_err(|_| malformed_error!("Method code exceeds u32 range"))
    };
    let code_len = to_u32(code.len())?;
    let resolve = |boundary: Boundary| -> Result<u32> {
        match boundary {
            Boundary::End => Ok(code_len),
            Boundary::At(id) => offsets
                .get(&id)
                .map(|offset| to_u32(*offset))
                .ok_or_else(|| malformed_error!("Exception boundary {} is not part of the stream", id))?,
        }
    };

    let mut handlers = Vec::with_capacity(stream.regions.len());
    for region in &stream.regions {
        let try_offset = resolve(region.try_start)?;
        let handler_offset = resolve(region.handler_start)?;
        handlers.push(ExceptionHandler {
            flags: region.flags,
            try_offset,
            try_length: resolve(region.try_end)?.saturating_sub(try_offset),
            handler_offset,
            handler_length: resolve(region.handler_end)?.saturating_sub(handler_offset),
            filter_offset: match region.filter_start {
                Some(filter) => resolve(filter)?,
                None => region.class_token,
            },
        });
    }

    let offsets = offsets
        .into_iter()
        .map(|(id, offset)| Ok((id, to_u32(offset)?)))
        .collect::<Result<HashMap<_, _>>>()?;

    Ok(EncodedStream {
        code,
        offsets,
        handlers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{decode_stream, fe, ExceptionRegion},
        metadata::{method::ExceptionHandlerFlags, token::Token},
    };

    #[test]
    fn roundtrip_preserves_bytes() {
        #[rustfmt::skip]
        let code = [
            0x02,                               // ldarg.0
            0x2C, 0x06,                         // brfalse.s +6
            0x28, 0x01, 0x00, 0x00, 0x0A,       // call
            0x00,                               // nop
            0xFE, 0x0C, 0x00, 0x01,             // ldloc 256
            0x2A,                               // ret
        ];
        let decoded = decode_stream(&code, &[]).unwrap();
        let encoded = encode_stream(&decoded.stream).unwrap();
        assert_eq!(encoded.code, code);
    }

    #[test]
    fn short_branch_promotion() {
        let mut stream = InstructionStream::new();
        let ret = stream.allocate(Instruction::simple(opcodes::RET));
        stream.push(Instruction::new(u16::from(opcodes::BR_S), Operand::Target(ret)));
        for _ in 0..200 {
            stream.push(Instruction::simple(opcodes::NOP));
        }
        stream.place(ret).unwrap();

        let encoded = encode_stream(&stream).unwrap();
        assert_eq!(encoded.code[0], opcodes::BR);
        assert_eq!(&encoded.code[1..5], &200_i32.to_le_bytes());
        assert_eq!(encoded.offsets[&ret], 205);
        assert_eq!(encoded.code.len(), 206);
    }

    #[test]
    fn short_branch_kept_when_in_range() {
        let mut stream = InstructionStream::new();
        let ret = stream.allocate(Instruction::simple(opcodes::RET));
        stream.push(Instruction::new(u16::from(opcodes::BRTRUE_S), Operand::Target(ret)));
        stream.push(Instruction::simple(opcodes::NOP));
        stream.place(ret).unwrap();

        let encoded = encode_stream(&stream).unwrap();
        assert_eq!(encoded.code, [opcodes::BRTRUE_S, 0x01, opcodes::NOP, opcodes::RET]);
    }

    #[test]
    fn operand_mismatch() {
        let mut stream = InstructionStream::new();
        stream.push(Instruction::new(
            u16::from(opcodes::CALL),
            Operand::Local(1),
        ));
        assert!(encode_stream(&stream).is_err());

        let mut stream = InstructionStream::new();
        stream.push(Instruction::new(u16::from(opcodes::STLOC_S), Operand::Local(300)));
        assert!(encode_stream(&stream).is_err());
    }

    #[test]
    fn regions_and_wide_operands() {
        let mut stream = InstructionStream::new();
        let start = stream.push(Instruction::new(fe(opcodes::FE_STLOC), Operand::Local(2)));
        let leave_target = stream.allocate(Instruction::simple(opcodes::RET));
        stream.push(Instruction::new(u16::from(opcodes::LEAVE_S), Operand::Target(leave_target)));
        let handler = stream.push(Instruction::simple(opcodes::ENDFINALLY));
        stream.place(leave_target).unwrap();
        stream.regions.push(ExceptionRegion {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: Boundary::At(start),
            try_end: Boundary::At(handler),
            handler_start: Boundary::At(handler),
            handler_end: Boundary::At(leave_target),
            filter_start: None,
            class_token: 0,
        });
        stream.push(Instruction::call(Token::new(0x0600_0001)));

        let encoded = encode_stream(&stream).unwrap();
        let handler_clause = &encoded.handlers[0];
        assert_eq!(handler_clause.try_offset, 0);
        assert_eq!(handler_clause.try_length, 6);
        assert_eq!(handler_clause.handler_offset, 6);
        assert_eq!(handler_clause.handler_length, 1);
        assert_eq!(&encoded.code[4..6], &[opcodes::LEAVE_S, 0x01]);
    }
}
