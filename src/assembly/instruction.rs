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

//! CIL instruction representation, operand types and control flow metadata.
//!
//! An [`Instruction`] is an opcode plus a typed [`Operand`]. Branch operands do not hold byte
//! offsets: they reference other instructions of the same [`crate::assembly::InstructionStream`]
//! by [`InstrId`], so instructions can be inserted and removed without patching displacements.
//! Byte offsets only exist at the edges, in [`crate::assembly::decode_stream`] and
//! [`crate::assembly::encode_stream`].
//!
//! # Key Components
//!
//! - [`Instruction`] - Opcode and operand of one decoded instruction
//! - [`Operand`] - Typed operand representation
//! - [`Immediate`] - Literal values embedded in the instruction stream
//! - [`OperandType`] - Encoded operand shape of an opcode
//! - [`FlowType`] - Control flow behavior of an opcode

use std::fmt;

use crate::{
    assembly::{
        instructions::{CilInstruction, INSTRUCTIONS, INSTRUCTIONS_FE},
        opcodes,
    },
    metadata::token::Token,
    Error, Result,
};

/// Types of operands for CIL instructions.
///
/// Each variant corresponds to the size and signedness of the operand bytes that follow the
/// opcode in the encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Metadata token reference
    Token,
    /// Switch table operand
    Switch,
}

impl OperandType {
    /// Returns the size in bytes of this operand type, `None` for the variable sized switch
    /// table.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32 | OperandType::Float32 | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// An immediate value embedded in a CIL instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl From<Immediate> for u64 {
    fn from(val: Immediate) -> Self {
        match val {
            // Signed values keep their bit pattern
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int8(value) => value as u64,
            Immediate::UInt8(value) => u64::from(value),
            Immediate::UInt16(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int32(value) => value as u64,
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int64(value) => value as u64,
            Immediate::Float32(value) => u64::from(value.to_bits()),
            Immediate::Float64(value) => value.to_bits(),
        }
    }
}

/// Stable identifier of an instruction within one [`crate::assembly::InstructionStream`].
///
/// Ids are never reused, so a branch or exception region keeps pointing at the same
/// instruction regardless of insertions and removals around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// Raw value of the id.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04}", self.0)
    }
}

/// The decoded operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present, or an index implied by the opcode (`ldarg.0`, `stloc.1`)
    None,
    /// Literal value
    Immediate(Immediate),
    /// Metadata token reference (method, field, type, string or signature)
    Token(Token),
    /// Local variable slot
    Local(u16),
    /// Argument index
    Argument(u16),
    /// Branch target
    Target(InstrId),
    /// Switch table
    Switch(Vec<InstrId>),
}

impl Operand {
    /// Short name of the operand shape, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operand::None => "none",
            Operand::Immediate(_) => "literal",
            Operand::Token(_) => "token",
            Operand::Local(_) => "local",
            Operand::Argument(_) => "argument",
            Operand::Target(_) => "branch target",
            Operand::Switch(_) => "switch table",
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally or filter block
    EndFinally,
    /// Leave protected region
    Leave,
    /// Prefix modifying the next instruction
    Prefix,
}

/// A single CIL instruction.
///
/// `opcode` holds single-byte opcodes as-is and two-byte opcodes as `0xFE00 | second_byte`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: u16,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Create an instruction from an opcode and operand.
    #[must_use]
    pub fn new(opcode: u16, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// Create an instruction without operand.
    #[must_use]
    pub fn simple(opcode: u8) -> Self {
        Instruction::new(u16::from(opcode), Operand::None)
    }

    /// `call <method>`
    #[must_use]
    pub fn call(method: Token) -> Self {
        Instruction::new(u16::from(opcodes::CALL), Operand::Token(method))
    }

    /// Shortest encoding of `ldarg <index>`.
    #[must_use]
    pub fn ldarg(index: u16) -> Self {
        match index {
            0..=3 => Instruction::simple(opcodes::LDARG_0 + index as u8),
            4..=255 => Instruction::new(u16::from(opcodes::LDARG_S), Operand::Argument(index)),
            _ => Instruction::new(fe(opcodes::FE_LDARG), Operand::Argument(index)),
        }
    }

    /// Shortest encoding of `ldloc <slot>`.
    #[must_use]
    pub fn ldloc(slot: u16) -> Self {
        match slot {
            0..=3 => Instruction::simple(opcodes::LDLOC_0 + slot as u8),
            4..=255 => Instruction::new(u16::from(opcodes::LDLOC_S), Operand::Local(slot)),
            _ => Instruction::new(fe(opcodes::FE_LDLOC), Operand::Local(slot)),
        }
    }

    /// Shortest encoding of `stloc <slot>`.
    #[must_use]
    pub fn stloc(slot: u16) -> Self {
        match slot {
            0..=3 => Instruction::simple(opcodes::STLOC_0 + slot as u8),
            4..=255 => Instruction::new(u16::from(opcodes::STLOC_S), Operand::Local(slot)),
            _ => Instruction::new(fe(opcodes::FE_STLOC), Operand::Local(slot)),
        }
    }

    /// Table entry of the opcode.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOpcode`] for reserved or unknown opcodes.
    pub fn info(&self) -> Result<&'static CilInstruction<'static>> {
        lookup(self.opcode)
    }

    /// Mnemonic of the opcode, `"???"` for unknown opcodes.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        lookup(self.opcode).map_or("???", |info| info.instr)
    }

    /// Control flow behavior of the opcode.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        lookup(self.opcode).map_or(FlowType::Sequential, |info| info.flow)
    }

    /// Returns `true` for `ret`.
    #[must_use]
    pub fn is_return(&self) -> bool {
        self.opcode == u16::from(opcodes::RET)
    }

    /// Returns `true` for `nop`.
    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.opcode == u16::from(opcodes::NOP)
    }

    /// The called method token for `call`, `callvirt` and `newobj`.
    #[must_use]
    pub fn call_target(&self) -> Option<Token> {
        match (self.flow(), &self.operand) {
            (FlowType::Call, Operand::Token(token))
                if self.opcode != u16::from(opcodes::CALLI) =>
            {
                Some(*token)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match &self.operand {
            Operand::None => write!(f, "{mnemonic}"),
            Operand::Immediate(value) => write!(f, "{mnemonic} {value:?}"),
            Operand::Token(token) => write!(f, "{mnemonic} {token}"),
            Operand::Local(slot) => write!(f, "{mnemonic} V_{slot}"),
            Operand::Argument(index) => write!(f, "{mnemonic} A_{index}"),
            Operand::Target(target) => write!(f, "{mnemonic} {target}"),
            Operand::Switch(targets) => write!(f, "{mnemonic} ({} targets)", targets.len()),
        }
    }
}

/// Two-byte opcode value for `0xFE <second>`.
#[must_use]
pub const fn fe(second: u8) -> u16 {
    0xFE00 | second as u16
}

/// Look up the table entry of an opcode.
///
/// # Errors
/// Returns [`crate::Error::InvalidOpcode`] for reserved or unknown opcodes.
pub fn lookup(opcode: u16) -> Result<&'static CilInstruction<'static>> {
    let entry = if opcode >> 8 == u16::from(opcodes::FE_PREFIX) {
        INSTRUCTIONS_FE.get(usize::from(opcode & 0xFF))
    } else if opcode <= 0xFF {
        INSTRUCTIONS.get(usize::from(opcode))
    } else {
        None
    };

    match entry {
        Some(info) if !info.instr.is_empty() => Ok(info),
        _ => Err(Error::InvalidOpcode(opcode)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortest_forms() {
        assert_eq!(Instruction::ldarg(0).mnemonic(), "ldarg.0");
        assert_eq!(Instruction::ldarg(7).mnemonic(), "ldarg.s");
        assert_eq!(Instruction::ldarg(300).mnemonic(), "ldarg");
        assert_eq!(Instruction::stloc(3).mnemonic(), "stloc.3");
        assert_eq!(Instruction::stloc(4).operand, Operand::Local(4));
        assert_eq!(Instruction::stloc(4).mnemonic(), "stloc.s");
        assert_eq!(Instruction::ldloc(256).mnemonic(), "ldloc");
    }

    #[test]
    fn lookup_rejects_reserved() {
        assert!(matches!(lookup(0x24), Err(Error::InvalidOpcode(0x24))));
        assert!(matches!(lookup(fe(0x08)), Err(Error::InvalidOpcode(0xFE08))));
        assert!(lookup(0x1FF).is_err());
        assert_eq!(lookup(fe(opcodes::FE_CEQ)).unwrap().instr, "ceq");
    }

    #[test]
    fn call_target() {
        let token = Token::new(0x0A00_0001);
        assert_eq!(Instruction::call(token).call_target(), Some(token));
        assert_eq!(Instruction::simple(opcodes::RET).call_target(), None);

        let calli = Instruction::new(u16::from(opcodes::CALLI), Operand::Token(token));
        assert_eq!(calli.call_target(), None);
    }

    #[test]
    fn display() {
        let instr = Instruction::call(Token::new(0x0600_0002));
        assert_eq!(instr.to_string(), "call 0x06000002");
        assert_eq!(Instruction::ldloc(5).to_string(), "ldloc.s V_5");
    }
}
