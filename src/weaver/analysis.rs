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

//! Per-method decisions: which checks a method receives and where its contract block is.
//!
//! The analysis never mutates anything. It produces a [`MethodAnalysis`] that the rewriter
//! applies to the decoded body.

use crate::{
    assembly::{InstrId, InstructionStream},
    metadata::{Module, Tags},
    weaver::{markers::MarkerCatalog, utils::is_call_to},
    Result,
};

/// Where a method needs the invariant to be checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvariantRequirement {
    /// Check once at method entry
    pub on_entry: bool,
    /// Check before every return
    pub on_exit: bool,
}

impl InvariantRequirement {
    /// Decide the requirement for `method` given the index of its type's invariant method.
    ///
    /// Only public instance methods of a type with an invariant are checked, never the
    /// invariant itself. Constructors are checked on exit only. Pure methods, and accessors
    /// of pure properties, are exempt.
    #[must_use]
    pub fn for_method(module: &Module, method: usize, invariant: Option<usize>) -> Self {
        let Some(invariant) = invariant else {
            return InvariantRequirement::default();
        };
        let definition = &module.methods[method];

        let eligible = definition.is_public() && !definition.is_static() && method != invariant;
        let constructor = definition.is_constructor();

        if eligible && !constructor && is_pure(module, method) {
            return InvariantRequirement::default();
        }

        InvariantRequirement {
            on_entry: eligible && !constructor,
            on_exit: eligible,
        }
    }

    /// Returns `true` if no invariant check is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.on_entry && !self.on_exit
    }
}

/// Returns `true` if the method is tagged pure itself or is an accessor of a pure property.
#[must_use]
pub fn is_pure(module: &Module, method: usize) -> bool {
    let definition = &module.methods[method];
    if definition.tags.contains(Tags::PURE) {
        return true;
    }

    definition
        .property
        .and_then(|property| module.properties.get(property))
        .is_some_and(|property| property.tags.contains(Tags::PURE))
}

/// The leading run of instructions that declares postconditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractBlock {
    /// Every instruction of the block in order, terminator and trailing nops included
    pub instructions: Vec<InstrId>,
    /// The terminating `EndContractBlock` call
    pub terminator: InstrId,
    /// Number of `Ensures` calls inside the block
    pub postconditions: usize,
}

impl ContractBlock {
    /// Returns `true` if the block declares at least one postcondition.
    #[must_use]
    pub fn has_postconditions(&self) -> bool {
        self.postconditions > 0
    }

    /// Instructions to replay before a return, i.e. everything before the terminator.
    pub fn replayed(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.instructions
            .iter()
            .copied()
            .take_while(move |id| *id != self.terminator)
    }
}

/// Locate the contract block of a body.
///
/// The block runs from the first instruction through the first `EndContractBlock` call and
/// any `nop`s directly following it. Without a terminator there is no block.
///
/// # Errors
/// Returns [`crate::Error::InvalidToken`] if a call operand does not resolve.
pub fn find_contract_block(
    module: &Module,
    stream: &InstructionStream,
    markers: &MarkerCatalog,
) -> Result<Option<ContractBlock>> {
    let mut terminator = None;
    for (index, (id, instruction)) in stream.iter().enumerate() {
        if is_call_to(module, instruction, &markers.end_contract_block)? {
            terminator = Some((index, id));
            break;
        }
    }

    let Some((end, terminator)) = terminator else {
        return Ok(None);
    };

    let trailing = stream
        .iter()
        .skip(end + 1)
        .take_while(|(_, instruction)| instruction.is_nop())
        .count();

    let instructions: Vec<InstrId> = stream.ids()[..=end + trailing].to_vec();
    let mut postconditions = 0;
    for id in &instructions[..end] {
        if let Some(instruction) = stream.get(*id) {
            if is_call_to(module, instruction, &markers.ensures)? {
                postconditions += 1;
            }
        }
    }

    Ok(Some(ContractBlock {
        instructions,
        terminator,
        postconditions,
    }))
}

/// Count `Ensures` calls anywhere in the body.
///
/// # Errors
/// Returns [`crate::Error::InvalidToken`] if a call operand does not resolve.
pub fn count_ensures(
    module: &Module,
    stream: &InstructionStream,
    markers: &MarkerCatalog,
) -> Result<usize> {
    let mut count = 0;
    for (_, instruction) in stream.iter() {
        if is_call_to(module, instruction, &markers.ensures)? {
            count += 1;
        }
    }
    Ok(count)
}

/// Everything the rewriter needs to know about one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodAnalysis {
    /// Where the invariant is checked
    pub invariant: InvariantRequirement,
    /// The contract block, if the body has one
    pub contract_block: Option<ContractBlock>,
}

impl MethodAnalysis {
    /// Analyze `method` with its decoded body.
    ///
    /// Postcondition calls without a terminating `EndContractBlock` are reported and left
    /// untouched.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if a call operand does not resolve.
    pub fn analyze(
        module: &Module,
        method: usize,
        invariant: Option<usize>,
        stream: &InstructionStream,
        markers: &MarkerCatalog,
    ) -> Result<Self> {
        let contract_block = find_contract_block(module, stream, markers)?;
        if contract_block.is_none() {
            let stray = count_ensures(module, stream, markers)?;
            if stray > 0 {
                log::warn!(
                    "{}: {} postcondition(s) without {}, not woven",
                    module.methods[method].full_name(),
                    stray,
                    markers.end_contract_block.name
                );
            }
        }

        Ok(MethodAnalysis {
            invariant: InvariantRequirement::for_method(module, method, invariant),
            contract_block,
        })
    }

    /// The contract block, if it declares postconditions.
    #[must_use]
    pub fn postconditions(&self) -> Option<&ContractBlock> {
        self.contract_block
            .as_ref()
            .filter(|block| block.has_postconditions())
    }

    /// Returns `true` if the body stays untouched.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.invariant.is_empty() && self.postconditions().is_none()
    }
}
