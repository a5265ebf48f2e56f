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

//! Rewriting a single method body.
//!
//! The body is decoded into an [`InstructionStream`], edited by instruction identity and
//! encoded again, so branch offsets, exception clauses and sequence points all follow the
//! edits without any manual offset arithmetic. The edits, in order:
//!
//! 1. `ldarg.0; call Invariant` at the start of the body when checked on entry.
//! 2. Removal of the contract block when it declares postconditions. References to a removed
//!    instruction move to the instruction following it.
//! 3. A fresh local of the return type for non-void methods that need one.
//! 4. Before every `ret`: store the return value, replay the postconditions, check the
//!    invariant and reload the return value. Branches to the `ret` now enter the injected
//!    sequence. A `tail.` prefix on the call before such a `ret` is dropped, since the call
//!    is no longer in tail position.

use std::collections::HashMap;

use crate::{
    assembly::{
        decode_stream, encode_stream, fe, opcodes, Boundary, FlowType, InstrId, Instruction,
        InstructionStream,
    },
    metadata::{
        method::{encode_method_body, MethodBody, MethodBodyHeader},
        signatures::{encoders::append_local, SignatureParser},
        token::Token,
        Module,
    },
    weaver::{
        analysis::MethodAnalysis,
        markers::MarkerCatalog,
        utils::{clone_instruction, is_call_to},
    },
    Error, Result,
};

/// What was done to a method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// The invariant is checked at entry
    pub invariant_on_entry: bool,
    /// The invariant is checked before every return
    pub invariant_on_exit: bool,
    /// Postconditions replayed at every return
    pub postconditions: usize,
    /// Number of `ret` instructions rewritten
    pub return_sites: usize,
}

/// Rewrites the bodies of a module one method at a time.
pub struct MethodRewriter<'a> {
    module: &'a mut Module,
    markers: &'a MarkerCatalog,
}

impl<'a> MethodRewriter<'a> {
    /// Create a rewriter for `module`.
    pub fn new(module: &'a mut Module, markers: &'a MarkerCatalog) -> Self {
        MethodRewriter { module, markers }
    }

    /// Rewrite the method at index `method`, whose type has the invariant method at index
    /// `invariant`.
    ///
    /// Returns `None` and leaves the body byte-identical when the method needs nothing.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedOperand`] if a postcondition contains a branch,
    /// and decoding or encoding errors for malformed bodies.
    pub fn rewrite(
        &mut self,
        method: usize,
        invariant: Option<usize>,
    ) -> Result<Option<RewriteOutcome>> {
        let Some(body) = self.module.methods[method].body.as_deref() else {
            return Ok(None);
        };

        let header = MethodBody::from(body)?;
        let code = body
            .get(header.size_header..header.size_header + header.size_code)
            .ok_or(Error::OutOfBounds)?;
        let decoded = decode_stream(code, &header.exception_handlers)?;
        let old_end = u32::try_from(code.len()).unwrap_or(u32::MAX);

        let analysis = MethodAnalysis::analyze(
            self.module,
            method,
            invariant,
            &decoded.stream,
            self.markers,
        )?;
        if analysis.is_noop() {
            return Ok(None);
        }

        let original_offsets = decoded.offset_map();
        let mut stream = decoded.stream;
        let mut moved: HashMap<InstrId, Boundary> = HashMap::new();
        let mut outcome = RewriteOutcome::default();

        let invariant_token = invariant.map(|index| self.module.methods[index].token);
        let definition = &self.module.methods[method];
        let full_name = definition.full_name().to_string();
        let returns_void = definition.returns_void();
        let method_token = definition.token;

        if let Some(invariant) = invariant_token.filter(|_| analysis.invariant.on_entry) {
            if stream.is_empty() {
                stream.push(Instruction::simple(opcodes::NOP));
            }
            stream.insert_all(0, invariant_check(invariant))?;
            outcome.invariant_on_entry = true;
        }

        let postconditions = analysis.postconditions();
        if let Some(block) = postconditions {
            for id in &block.instructions {
                let Some(index) = stream.position(*id) else {
                    continue;
                };
                stream.remove(index)?;
                let successor = stream.boundary_at(index);
                stream.retarget(*id, successor);
                moved.insert(*id, successor);
            }
            outcome.postconditions = block.postconditions;
        }

        let exit_invariant = invariant_token.filter(|_| analysis.invariant.on_exit);
        outcome.invariant_on_exit = exit_invariant.is_some();

        let mut local_var_sig_token = header.local_var_sig_token;
        let mut init_locals = header.is_init_local;
        let result_slot = if !returns_void && (postconditions.is_some() || exit_invariant.is_some())
        {
            let (token, slot) = self.add_result_local(method, local_var_sig_token)?;
            local_var_sig_token = token.value();
            init_locals = true;
            Some(slot)
        } else {
            None
        };

        let mut replay = Vec::new();
        if let Some(block) = postconditions {
            for id in block.replayed() {
                let Some(instruction) = stream.get(id) else {
                    continue;
                };
                let copy = match result_slot {
                    Some(slot) if is_call_to(self.module, instruction, &self.markers.result)? => {
                        Instruction::ldloc(slot)
                    }
                    _ => clone_instruction(instruction, &full_name)?,
                };
                replay.push(copy);
            }
        }

        let returns: Vec<InstrId> = stream
            .iter()
            .filter(|(_, instruction)| instruction.is_return())
            .map(|(id, _)| id)
            .collect();

        // A `tail.` call must be followed by its `ret`; the injected code goes in between
        let weaves_returns =
            result_slot.is_some() || !replay.is_empty() || exit_invariant.is_some();
        if weaves_returns {
            for ret in &returns {
                if let Some(prefix) = tail_prefix_before(&stream, *ret) {
                    let Some(index) = stream.position(prefix) else {
                        continue;
                    };
                    stream.remove(index)?;
                    let call = stream.boundary_at(index);
                    stream.retarget(prefix, call);
                    moved.insert(prefix, call);
                    log::debug!("{}: dropped tail. prefix before woven return", full_name);
                }
            }
        }

        for ret in returns {
            let mut sequence = Vec::with_capacity(replay.len() + 4);
            if let Some(slot) = result_slot {
                sequence.push(Instruction::stloc(slot));
            }
            sequence.extend(replay.iter().cloned());
            if let Some(invariant) = exit_invariant {
                sequence.extend(invariant_check(invariant));
            }
            if let Some(slot) = result_slot {
                sequence.push(Instruction::ldloc(slot));
            }
            if sequence.is_empty() {
                continue;
            }

            let Some(index) = stream.position(ret) else {
                continue;
            };
            let injected = stream.insert_all(index, sequence)?;
            if let Some(head) = injected.first() {
                stream.retarget(ret, Boundary::At(*head));
            }
            outcome.return_sites += 1;
        }

        let encoded = encode_stream(&stream)?;
        let max_stack = u16::try_from(header.max_stack.max(1))
            .map_err(|_| malformed_error!("{} - max stack out of range", full_name))?;
        let rewritten = encode_method_body(
            &MethodBodyHeader {
                max_stack,
                local_var_sig_token,
                init_locals,
                force_fat: header.is_fat,
            },
            &encoded.code,
            &encoded.handlers,
        )?;

        if let Some(symbols) = self.module.symbols.as_mut() {
            // Code length is a valid end offset for scopes that close at the end of the body
            let new_end = u32::try_from(encoded.code.len()).unwrap_or(u32::MAX);
            let local_signature = (local_var_sig_token != header.local_var_sig_token)
                .then(|| Token::new(local_var_sig_token));
            symbols.remap_method(
                method_token,
                |offset| {
                    if offset == old_end {
                        return Some(new_end);
                    }
                    let mut boundary = Boundary::At(*original_offsets.get(&offset)?);
                    while let Boundary::At(id) = boundary {
                        match moved.get(&id) {
                            Some(next) => boundary = *next,
                            None => break,
                        }
                    }
                    match boundary {
                        Boundary::At(id) => encoded.offsets.get(&id).copied(),
                        Boundary::End => Some(new_end),
                    }
                },
                local_signature,
            )?;
        }

        log::debug!(
            "{}: entry={} exit={} postconditions={} returns={}",
            full_name,
            outcome.invariant_on_entry,
            outcome.invariant_on_exit,
            outcome.postconditions,
            outcome.return_sites
        );

        self.module.methods[method].body = Some(rewritten);
        Ok(Some(outcome))
    }

    /// Append a local of the method's return type, returning the new local signature token
    /// and the slot of the local.
    fn add_result_local(
        &mut self,
        method: usize,
        local_var_sig_token: u32,
    ) -> Result<(Token, u16)> {
        let signature = self.module.methods[method].signature_blob.clone();
        let return_type = SignatureParser::new(&signature).method_return_type_raw()?;

        let existing = self.module.local_signature(local_var_sig_token)?;
        let (locals, slot) = append_local(existing, return_type)?;
        let token = self.module.add_local_signature(&locals)?;
        Ok((token, slot))
    }
}

/// The `tail.` prefix of the call directly before `ret`, if there is one.
fn tail_prefix_before(stream: &InstructionStream, ret: InstrId) -> Option<InstrId> {
    let index = stream.position(ret)?;
    if stream.at(index.checked_sub(1)?)?.flow() != FlowType::Call {
        return None;
    }
    let prefix_index = index.checked_sub(2)?;
    if stream.at(prefix_index)?.opcode != fe(opcodes::FE_TAIL) {
        return None;
    }
    stream.id_at(prefix_index)
}

/// `ldarg.0; call invariant`
fn invariant_check(invariant: Token) -> [Instruction; 2] {
    [Instruction::ldarg(0), Instruction::call(invariant)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Operand,
        metadata::{method::MethodBody, Tags},
        metadata::tables::{LocalScopeRaw, TableId},
        symbols::{PortablePdb, SequencePoint, SequencePoints, LANGUAGE_CSHARP},
        test::fixtures::{branching_postcondition, calculator, invariant_target, load},
        weaver::{markers::QualifiedMethod, typeanalysis::find_invariant_method},
        Error,
    };

    fn index_of(module: &Module, name: &str) -> usize {
        module
            .methods
            .iter()
            .position(|method| method.name == name)
            .unwrap()
    }

    fn rewrite(module: &mut Module, name: &str) -> Result<Option<RewriteOutcome>> {
        let markers = MarkerCatalog::default();
        module.tag_with(|attributes| markers.tags(attributes));
        let method = index_of(module, name);
        let invariant = find_invariant_method(module, module.methods[method].declaring_type)?;
        MethodRewriter::new(module, &markers).rewrite(method, invariant)
    }

    fn decode(module: &Module, name: &str) -> (MethodBody, InstructionStream) {
        let body = module.methods[index_of(module, name)].body.as_deref().unwrap();
        let header = MethodBody::from(body).unwrap();
        let code = &body[header.size_header..header.size_header + header.size_code];
        let stream = decode_stream(code, &header.exception_handlers).unwrap().stream;
        (header, stream)
    }

    fn count_calls(stream: &InstructionStream, token: Token) -> usize {
        stream
            .iter()
            .filter(|(_, instruction)| **instruction == Instruction::call(token))
            .count()
    }

    fn calls_to(module: &Module, stream: &InstructionStream, target: &QualifiedMethod) -> usize {
        stream
            .iter()
            .filter(|(_, instruction)| is_call_to(module, instruction, target).unwrap())
            .count()
    }

    #[test]
    fn entry_and_exit_checks() {
        let mut module = load(invariant_target());
        let invariant = module.methods[index_of(&module, "ObjectInvariant")].token;
        let (_, before) = decode(&module, "Increment");

        let outcome = rewrite(&mut module, "Increment").unwrap().unwrap();
        assert_eq!(
            outcome,
            RewriteOutcome {
                invariant_on_entry: true,
                invariant_on_exit: true,
                postconditions: 0,
                return_sites: 1,
            }
        );

        let (_, after) = decode(&module, "Increment");
        assert_eq!(after.len(), before.len() + 4);
        assert_eq!(after.at(0), Some(&Instruction::ldarg(0)));
        assert_eq!(after.at(1), Some(&Instruction::call(invariant)));
        let end = after.len();
        assert_eq!(after.at(end - 3), Some(&Instruction::ldarg(0)));
        assert_eq!(after.at(end - 2), Some(&Instruction::call(invariant)));
        assert!(after.at(end - 1).unwrap().is_return());
    }

    #[test]
    fn one_exit_check_per_return() {
        let mut module = load(invariant_target());
        let invariant = module.methods[index_of(&module, "ObjectInvariant")].token;

        let outcome = rewrite(&mut module, "Pick").unwrap().unwrap();
        assert_eq!(outcome.return_sites, 2);

        let (_, after) = decode(&module, "Pick");
        assert_eq!(count_calls(&after, invariant), 3);
        let returns: Vec<usize> = after
            .iter()
            .enumerate()
            .filter(|(_, (_, instruction))| instruction.is_return())
            .map(|(index, _)| index)
            .collect();
        for ret in returns {
            assert_eq!(after.at(ret - 1), Some(&Instruction::ldloc(0)));
            assert_eq!(after.at(ret - 2), Some(&Instruction::call(invariant)));
            assert_eq!(after.at(ret - 4), Some(&Instruction::stloc(0)));
        }
    }

    #[test]
    fn constructor_checked_on_exit_only() {
        let mut module = load(invariant_target());
        let invariant = module.methods[index_of(&module, "ObjectInvariant")].token;

        let outcome = rewrite(&mut module, ".ctor").unwrap().unwrap();
        assert!(!outcome.invariant_on_entry);
        assert!(outcome.invariant_on_exit);

        let (_, after) = decode(&module, ".ctor");
        assert_eq!(count_calls(&after, invariant), 1);
        assert_eq!(after.at(0), Some(&Instruction::ldarg(0)));
        assert_eq!(after.at(1), Some(&Instruction::ldarg(1)));
    }

    #[test]
    fn return_value_goes_through_a_local() {
        let mut module = load(invariant_target());
        let invariant = module.methods[index_of(&module, "ObjectInvariant")].token;
        let sig_rows = module.tables.row_count(TableId::StandAloneSig);

        rewrite(&mut module, "GetValue").unwrap().unwrap();
        let (header, after) = decode(&module, "GetValue");

        assert_eq!(module.tables.row_count(TableId::StandAloneSig), sig_rows + 1);
        assert!(header.is_init_local);
        assert_eq!(
            module.local_signature(header.local_var_sig_token).unwrap(),
            Some(&[0x07, 0x01, 0x08][..])
        );

        let tail: Vec<&Instruction> = after.iter().map(|(_, i)| i).skip(4).collect();
        assert_eq!(
            tail,
            [
                &Instruction::stloc(0),
                &Instruction::ldarg(0),
                &Instruction::call(invariant),
                &Instruction::ldloc(0),
                &Instruction::simple(opcodes::RET),
            ]
        );
    }

    #[test]
    fn pure_and_private_methods_untouched() {
        let mut module = load(invariant_target());
        for name in ["PureValue", "get_Value", "Reset", "Twice", "ObjectInvariant"] {
            let before = module.methods[index_of(&module, name)].body.clone();
            assert_eq!(rewrite(&mut module, name).unwrap(), None, "{name}");
            assert_eq!(module.methods[index_of(&module, name)].body, before, "{name}");
        }
        assert!(module.methods[index_of(&module, "PureValue")]
            .tags
            .contains(Tags::PURE));
    }

    #[test]
    fn branch_to_ret_enters_exit_check() {
        let mut module = load(invariant_target());
        rewrite(&mut module, "Clamp").unwrap().unwrap();
        let (_, after) = decode(&module, "Clamp");

        let (branch_index, target) = after
            .iter()
            .enumerate()
            .find_map(|(index, (_, instruction))| match instruction.operand {
                Operand::Target(target) => Some((index, target)),
                _ => None,
            })
            .unwrap();
        assert_eq!(branch_index, 5);
        let target_index = after.position(target).unwrap();
        assert_eq!(target_index, after.len() - 3);
        assert_eq!(after.at(target_index), Some(&Instruction::ldarg(0)));
    }

    #[test]
    fn postconditions_replayed_at_every_return() {
        let mut module = load(calculator());
        let markers = MarkerCatalog::default();

        let outcome = rewrite(&mut module, "AddFive").unwrap().unwrap();
        assert_eq!(outcome.postconditions, 1);
        assert_eq!(outcome.return_sites, 2);
        assert!(!outcome.invariant_on_entry && !outcome.invariant_on_exit);

        let (_, after) = decode(&module, "AddFive");
        assert_eq!(after.len(), 27);
        assert_eq!(calls_to(&module, &after, &markers.ensures), 2);
        assert_eq!(calls_to(&module, &after, &markers.end_contract_block), 0);
        assert_eq!(calls_to(&module, &after, &markers.result), 0);
        assert_eq!(after.at(0), Some(&Instruction::ldarg(1)));
        assert_eq!(after.at(6), Some(&Instruction::stloc(0)));
        assert_eq!(after.at(7), Some(&Instruction::ldloc(0)));
    }

    #[test]
    fn void_postcondition_has_no_local() {
        let mut module = load(calculator());
        let sig_rows = module.tables.row_count(TableId::StandAloneSig);
        let outcome = rewrite(&mut module, "Touch").unwrap().unwrap();
        assert_eq!(outcome.return_sites, 1);
        assert_eq!(module.tables.row_count(TableId::StandAloneSig), sig_rows);

        let (header, after) = decode(&module, "Touch");
        assert_eq!(header.local_var_sig_token, 0);
        assert_eq!(after.len(), 5);
    }

    #[test]
    fn stray_postconditions_are_left_alone() {
        let mut module = load(calculator());
        for name in ["Stray", "Identity", ".ctor"] {
            let before = module.methods[index_of(&module, name)].body.clone();
            assert_eq!(rewrite(&mut module, name).unwrap(), None, "{name}");
            assert_eq!(module.methods[index_of(&module, name)].body, before);
        }
    }

    #[test]
    fn branches_in_postconditions_are_rejected() {
        let mut module = load(branching_postcondition());
        match rewrite(&mut module, "Check") {
            Err(Error::UnsupportedOperand {
                opcode,
                operand,
                method,
            }) => {
                assert_eq!(opcode, "brtrue.s");
                assert_eq!(operand, "branch target");
                assert_eq!(method, "Odin.Tests.Branching::Check");
            }
            other => panic!("Expected UnsupportedOperand, got {other:?}"),
        }
    }

    #[test]
    fn tail_call_before_woven_return_loses_its_prefix() {
        let mut module = load(invariant_target());
        let invariant = module.methods[index_of(&module, "ObjectInvariant")].token;
        let get_value = module.methods[index_of(&module, "GetValue")].token;
        let (_, before) = decode(&module, "Forward");
        assert_eq!(before.at(1).unwrap().opcode, fe(opcodes::FE_TAIL));

        let outcome = rewrite(&mut module, "Forward").unwrap().unwrap();
        assert_eq!(outcome.return_sites, 1);

        let (_, after) = decode(&module, "Forward");
        assert!(after
            .iter()
            .all(|(_, instruction)| instruction.opcode != fe(opcodes::FE_TAIL)));
        let code: Vec<&Instruction> = after.iter().map(|(_, i)| i).collect();
        assert_eq!(
            code,
            [
                &Instruction::ldarg(0),
                &Instruction::call(invariant),
                &Instruction::ldarg(0),
                &Instruction::call(get_value),
                &Instruction::stloc(0),
                &Instruction::ldarg(0),
                &Instruction::call(invariant),
                &Instruction::ldloc(0),
                &Instruction::simple(opcodes::RET),
            ]
        );
    }

    #[test]
    fn sequence_points_follow_instructions() {
        let mut module = load(invariant_target());
        let token = module.methods[index_of(&module, "Increment")].token;
        let point = |il_offset, start_line| SequencePoint {
            il_offset,
            document: 1,
            start_line,
            start_col: 9,
            end_line: start_line,
            end_col: 20,
        };

        let mut symbols = PortablePdb::new([0; 20], &module.tables.row_counts());
        symbols.add_document("/src/InvariantTarget.cs", LANGUAGE_CSHARP).unwrap();
        for method in &module.methods {
            let points = if method.token == token {
                vec![point(0, 10), point(14, 11)]
            } else {
                Vec::new()
            };
            symbols.push_method(&SequencePoints(points), 0).unwrap();
        }
        // Increment is `ldarg.0 ldarg.0 ldfld ldc.i4.1 add stfld ret`, 15 bytes
        symbols.push_scope(token.row(), 0, 15).unwrap();
        module.symbols = Some(symbols);

        rewrite(&mut module, "Increment").unwrap().unwrap();
        let symbols = module.symbols.as_ref().unwrap();
        let (_, points) = symbols.sequence_points(token).unwrap().unwrap();
        let offsets: Vec<u32> = points.0.iter().map(|point| point.il_offset).collect();
        assert_eq!(offsets, [6, 26]);

        let scope = symbols.tables.get::<LocalScopeRaw>(1).unwrap();
        assert_eq!((scope.start_offset, scope.length), (0, 27));
    }
}
