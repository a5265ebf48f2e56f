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

//! Editable instruction sequence of a method body.
//!
//! [`InstructionStream`] stores instructions in an append-only arena addressed by [`InstrId`]
//! and keeps their order in a separate list. Branch operands and exception region boundaries
//! hold ids, never offsets, so editing the order never breaks them. Redirecting references
//! from one instruction to another is explicit through [`InstructionStream::retarget`].

use crate::{
    assembly::instruction::{InstrId, Instruction, Operand},
    metadata::method::ExceptionHandlerFlags,
    Error::OutOfBounds,
    Result,
};

/// Position an exception region boundary refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boundary {
    /// Starts at the given instruction
    At(InstrId),
    /// The end of the code
    End,
}

/// An exception handling clause expressed in instruction ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the protected block
    pub try_start: Boundary,
    /// First instruction after the protected block
    pub try_end: Boundary,
    /// First instruction of the handler
    pub handler_start: Boundary,
    /// First instruction after the handler
    pub handler_end: Boundary,
    /// First instruction of the filter for filter clauses
    pub filter_start: Option<Boundary>,
    /// Catch type token for typed clauses, 0 otherwise
    pub class_token: u32,
}

impl ExceptionRegion {
    fn boundaries_mut(&mut self) -> impl Iterator<Item = &mut Boundary> + '_ {
        [
            &mut self.try_start,
            &mut self.try_end,
            &mut self.handler_start,
            &mut self.handler_end,
        ]
        .into_iter()
        .chain(self.filter_start.as_mut())
    }
}

/// Ordered, editable list of instructions plus the exception regions over them.
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    arena: Vec<Instruction>,
    order: Vec<InstrId>,
    /// Exception handling clauses of the body
    pub regions: Vec<ExceptionRegion>,
}

impl InstructionStream {
    /// Create an empty stream.
    #[must_use]
    pub fn new() -> Self {
        InstructionStream::default()
    }

    /// Number of instructions currently in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the stream holds no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in stream order.
    #[must_use]
    pub fn ids(&self) -> &[InstrId] {
        &self.order
    }

    /// Id at `index`.
    #[must_use]
    pub fn id_at(&self, index: usize) -> Option<InstrId> {
        self.order.get(index).copied()
    }

    /// Instruction at `index`.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Instruction> {
        self.id_at(index).map(|id| &self.arena[id.index()])
    }

    /// Instruction with the given id. The id must come from this stream.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.arena.get(id.index())
    }

    /// Mutable access to the instruction with `id`, placed or not.
    pub fn get_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.arena.get_mut(id.index())
    }

    /// Index of `id` in the current order.
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// Iterate `(id, instruction)` pairs in stream order.
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.order.iter().map(|id| (*id, &self.arena[id.index()]))
    }

    /// Allocate an id for `instruction` without placing it in the order.
    ///
    /// Used to create forward branch targets before their position is known.
    pub fn allocate(&mut self, instruction: Instruction) -> InstrId {
        // Streams are bounded by the u32 code size of a method body
        #[allow(clippy::cast_possible_truncation)]
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(instruction);
        id
    }

    /// Append an instruction.
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        let id = self.allocate(instruction);
        self.order.push(id);
        id
    }

    /// Place an allocated id at the end of the order.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the id was never allocated.
    pub fn place(&mut self, id: InstrId) -> Result<()> {
        if id.index() >= self.arena.len() {
            return Err(OutOfBounds);
        }
        self.order.push(id);
        Ok(())
    }

    /// Insert an instruction before position `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `index` is past the end.
    pub fn insert(&mut self, index: usize, instruction: Instruction) -> Result<InstrId> {
        if index > self.order.len() {
            return Err(OutOfBounds);
        }
        let id = self.allocate(instruction);
        self.order.insert(index, id);
        Ok(id)
    }

    /// Insert a sequence of instructions before position `index`, returning their ids.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `index` is past the end.
    pub fn insert_all(
        &mut self,
        index: usize,
        instructions: impl IntoIterator<Item = Instruction>,
    ) -> Result<Vec<InstrId>> {
        if index > self.order.len() {
            return Err(OutOfBounds);
        }
        let ids: Vec<InstrId> = instructions
            .into_iter()
            .map(|instruction| self.allocate(instruction))
            .collect();
        self.order.splice(index..index, ids.iter().copied());
        Ok(ids)
    }

    /// Remove the instruction at `index` from the order and return its id.
    ///
    /// References to the removed instruction are left alone; callers redirect them with
    /// [`InstructionStream::retarget`].
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `index` is past the end.
    pub fn remove(&mut self, index: usize) -> Result<InstrId> {
        if index >= self.order.len() {
            return Err(OutOfBounds);
        }
        Ok(self.order.remove(index))
    }

    /// Redirect every branch operand and region boundary pointing at `from` to `to`.
    pub fn retarget(&mut self, from: InstrId, to: Boundary) {
        for id in &self.order {
            match &mut self.arena[id.index()].operand {
                Operand::Target(target) if *target == from => {
                    if let Boundary::At(new) = to {
                        *target = new;
                    }
                }
                Operand::Switch(targets) => {
                    if let Boundary::At(new) = to {
                        for target in targets.iter_mut().filter(|target| **target == from) {
                            *target = new;
                        }
                    }
                }
                _ => {}
            }
        }

        for region in &mut self.regions {
            for boundary in region.boundaries_mut() {
                if *boundary == Boundary::At(from) {
                    *boundary = to;
                }
            }
        }
    }

    /// Returns `true` if any branch operand targets `id`.
    #[must_use]
    pub fn is_branch_target(&self, id: InstrId) -> bool {
        self.iter().any(|(_, instr)| match &instr.operand {
            Operand::Target(target) => *target == id,
            Operand::Switch(targets) => targets.contains(&id),
            _ => false,
        })
    }

    /// Boundary of the instruction at `index`, [`Boundary::End`] past the last one.
    #[must_use]
    pub fn boundary_at(&self, index: usize) -> Boundary {
        self.id_at(index).map_or(Boundary::End, Boundary::At)
    }
}
