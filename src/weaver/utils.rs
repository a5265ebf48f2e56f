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

//! Instruction helpers shared by the analysis and the rewriter.

use crate::{
    assembly::{opcodes, Instruction, Operand},
    metadata::Module,
    weaver::markers::QualifiedMethod,
    Error, Result,
};

/// Duplicate `instruction` for insertion at another site.
///
/// Branch targets and switch tables refer to positions of the original site and cannot be
/// duplicated.
///
/// # Errors
/// Returns [`crate::Error::UnsupportedOperand`] naming `method` for branch and switch
/// operands.
pub fn clone_instruction(instruction: &Instruction, method: &str) -> Result<Instruction> {
    match instruction.operand {
        Operand::None
        | Operand::Immediate(_)
        | Operand::Token(_)
        | Operand::Local(_)
        | Operand::Argument(_) => Ok(instruction.clone()),
        Operand::Target(_) | Operand::Switch(_) => Err(Error::UnsupportedOperand {
            opcode: instruction.mnemonic(),
            operand: instruction.operand.kind(),
            method: method.to_string(),
        }),
    }
}

/// Returns `true` if `instruction` is a direct `call` of `target`.
///
/// `callvirt` and `newobj` never match; contract markers are static methods.
///
/// # Errors
/// Returns [`crate::Error::InvalidToken`] if the call operand does not resolve.
pub fn is_call_to(
    module: &Module,
    instruction: &Instruction,
    target: &QualifiedMethod,
) -> Result<bool> {
    if instruction.opcode != u16::from(opcodes::CALL) {
        return Ok(false);
    }

    let Operand::Token(token) = instruction.operand else {
        return Ok(false);
    };

    Ok(target.matches(&module.method_ref(token)?))
}
