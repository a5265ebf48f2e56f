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

//! CIL instruction set support: opcode tables, the instruction model, and conversion between
//! code bytes and an editable [`InstructionStream`].
//!
//! # Key Components
//!
//! - [`Instruction`] / [`Operand`] - Decoded instructions with typed operands
//! - [`InstructionStream`] - Editable instruction sequence addressed by stable [`InstrId`]s
//! - [`decode_stream`] - Code bytes to instruction stream
//! - [`encode_stream`] - Instruction stream to code bytes, with branch form selection
//! - [`opcodes`] - Raw opcode constants
//!
//! # Examples
//!
//! ```rust
//! use dotweave::assembly::{decode_stream, encode_stream, opcodes, Instruction};
//!
//! let mut decoded = decode_stream(&[0x2A], &[])?;
//! decoded.stream.insert(0, Instruction::simple(opcodes::NOP))?;
//!
//! let encoded = encode_stream(&decoded.stream)?;
//! assert_eq!(encoded.code, [0x00, 0x2A]);
//! # Ok::<(), dotweave::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod instructions;
pub mod opcodes;
mod stream;

pub use decoder::{decode_stream, DecodedStream};
pub use encoder::{encode_stream, EncodedStream};
pub use instruction::{
    fe, lookup, FlowType, Immediate, InstrId, Instruction, Operand, OperandType,
};
pub use instructions::{CilInstruction, INSTRUCTIONS, INSTRUCTIONS_FE};
pub use stream::{Boundary, ExceptionRegion, InstructionStream};
