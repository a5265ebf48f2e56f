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

//! Method body construction.
//!
//! [`MethodBodyBuilder`] drives an [`Assembler`] through a closure and encodes the result
//! as a complete body, header and exception clauses included.

use crate::{
    assembly::{
        encode_stream, fe, opcodes, Boundary, ExceptionRegion, Immediate, InstrId, Instruction,
        InstructionStream, Operand,
    },
    builder::ModuleBuilder,
    metadata::{
        method::{encode_method_body, ExceptionHandlerFlags, MethodBodyHeader},
        signatures::{
            encoders::encode_local_var_signature, SignatureLocalVariable, SignatureLocalVariables,
            TypeSignature,
        },
        token::Token,
    },
    Error, Result,
};

/// Type alias for method body implementation closures
type ImplementationFn = Box<dyn FnOnce(&mut Assembler) -> Result<()>>;

/// A position in the code, bound with [`Assembler::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

enum Fixup {
    Branch(Label),
    Switch(Vec<Label>),
}

struct PendingRegion {
    flags: ExceptionHandlerFlags,
    try_start: Label,
    try_end: Label,
    handler_start: Label,
    handler_end: Label,
    filter_start: Option<Label>,
    class_token: u32,
}

/// Emits instructions into an [`InstructionStream`], resolving labels at the end.
///
/// Branches are emitted in their short form; the encoder widens the ones that do not fit.
#[derive(Default)]
pub struct Assembler {
    stream: InstructionStream,
    labels: Vec<Option<usize>>,
    fixups: Vec<(InstrId, Fixup)>,
    regions: Vec<PendingRegion>,
}

/// Stand-in operand for a branch until its label is resolved.
const UNRESOLVED: InstrId = InstrId(u32::MAX);

impl Assembler {
    /// An empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an arbitrary instruction.
    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.stream.push(instruction);
        self
    }

    fn op(&mut self, opcode: u8) -> &mut Self {
        self.emit(Instruction::simple(opcode))
    }

    fn token_op(&mut self, opcode: u8, token: Token) -> &mut Self {
        self.emit(Instruction::new(u16::from(opcode), Operand::Token(token)))
    }

    fn branch(&mut self, opcode: u8, target: Label) -> &mut Self {
        let id = self
            .stream
            .push(Instruction::new(u16::from(opcode), Operand::Target(UNRESOLVED)));
        self.fixups.push((id, Fixup::Branch(target)));
        self
    }

    /// Create an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn mark(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.stream.len());
        }
        self
    }

    /// Declare an exception clause over labeled ranges.
    pub fn region(
        &mut self,
        flags: ExceptionHandlerFlags,
        try_range: (Label, Label),
        handler_range: (Label, Label),
        filter_start: Option<Label>,
        class_token: u32,
    ) -> &mut Self {
        self.regions.push(PendingRegion {
            flags,
            try_start: try_range.0,
            try_end: try_range.1,
            handler_start: handler_range.0,
            handler_end: handler_range.1,
            filter_start,
            class_token,
        });
        self
    }

    /// `nop`
    pub fn nop(&mut self) -> &mut Self {
        self.op(opcodes::NOP)
    }

    /// `ldarg <index>`, shortest form
    pub fn ldarg(&mut self, index: u16) -> &mut Self {
        self.emit(Instruction::ldarg(index))
    }

    /// `ldloc <slot>`, shortest form
    pub fn ldloc(&mut self, slot: u16) -> &mut Self {
        self.emit(Instruction::ldloc(slot))
    }

    /// `stloc <slot>`, shortest form
    pub fn stloc(&mut self, slot: u16) -> &mut Self {
        self.emit(Instruction::stloc(slot))
    }

    /// Shortest encoding of `ldc.i4 <value>`.
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=8 => {
                // Range checked by the match arm
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let opcode = (i32::from(opcodes::LDC_I4_0) + value) as u8;
                self.op(opcode)
            }
            -128..=127 => {
                // Range checked by the match arm
                #[allow(clippy::cast_possible_truncation)]
                let value = value as i8;
                self.emit(Instruction::new(
                    u16::from(opcodes::LDC_I4_S),
                    Operand::Immediate(Immediate::Int8(value)),
                ))
            }
            _ => self.emit(Instruction::new(
                u16::from(opcodes::LDC_I4),
                Operand::Immediate(Immediate::Int32(value)),
            )),
        }
    }

    /// `ldnull`
    pub fn ldnull(&mut self) -> &mut Self {
        self.op(opcodes::LDNULL)
    }

    /// `ldstr <string>`
    pub fn ldstr(&mut self, string: Token) -> &mut Self {
        self.token_op(opcodes::LDSTR, string)
    }

    /// `ldfld <field>`
    pub fn ldfld(&mut self, field: Token) -> &mut Self {
        self.token_op(opcodes::LDFLD, field)
    }

    /// `stfld <field>`
    pub fn stfld(&mut self, field: Token) -> &mut Self {
        self.token_op(opcodes::STFLD, field)
    }

    /// `call <method>`
    pub fn call(&mut self, method: Token) -> &mut Self {
        self.token_op(opcodes::CALL, method)
    }

    /// `callvirt <method>`
    pub fn callvirt(&mut self, method: Token) -> &mut Self {
        self.token_op(opcodes::CALLVIRT, method)
    }

    /// `newobj <constructor>`
    pub fn newobj(&mut self, constructor: Token) -> &mut Self {
        self.token_op(opcodes::NEWOBJ, constructor)
    }

    /// `ret`
    pub fn ret(&mut self) -> &mut Self {
        self.op(opcodes::RET)
    }

    /// `pop`
    pub fn pop(&mut self) -> &mut Self {
        self.op(opcodes::POP)
    }

    /// `dup`
    pub fn dup(&mut self) -> &mut Self {
        self.op(opcodes::DUP)
    }

    /// `add`
    pub fn add(&mut self) -> &mut Self {
        self.op(opcodes::ADD)
    }

    /// `sub`
    pub fn sub(&mut self) -> &mut Self {
        self.op(opcodes::SUB)
    }

    /// `mul`
    pub fn mul(&mut self) -> &mut Self {
        self.op(opcodes::MUL)
    }

    /// `ceq`
    pub fn ceq(&mut self) -> &mut Self {
        self.emit(Instruction::new(fe(opcodes::FE_CEQ), Operand::None))
    }

    /// `cgt`
    pub fn cgt(&mut self) -> &mut Self {
        self.emit(Instruction::new(fe(opcodes::FE_CGT), Operand::None))
    }

    /// `clt`
    pub fn clt(&mut self) -> &mut Self {
        self.emit(Instruction::new(fe(opcodes::FE_CLT), Operand::None))
    }

    /// `tail.` prefix of the next call
    pub fn tail(&mut self) -> &mut Self {
        self.emit(Instruction::new(fe(opcodes::FE_TAIL), Operand::None))
    }

    /// `throw`
    pub fn throw(&mut self) -> &mut Self {
        self.op(opcodes::THROW)
    }

    /// `endfinally`
    pub fn endfinally(&mut self) -> &mut Self {
        self.op(opcodes::ENDFINALLY)
    }

    /// `br.s <target>`
    pub fn br(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::BR_S, target)
    }

    /// `brtrue.s <target>`
    pub fn brtrue(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::BRTRUE_S, target)
    }

    /// `brfalse.s <target>`
    pub fn brfalse(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::BRFALSE_S, target)
    }

    /// `bgt.s <target>`
    pub fn bgt(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::BGT_S, target)
    }

    /// `blt.s <target>`
    pub fn blt(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::BLT_S, target)
    }

    /// `ble.s <target>`
    pub fn ble(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::BLE_S, target)
    }

    /// `bge.s <target>`
    pub fn bge(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::BGE_S, target)
    }

    /// `leave.s <target>`
    pub fn leave(&mut self, target: Label) -> &mut Self {
        self.branch(opcodes::LEAVE_S, target)
    }

    /// `switch <targets>`
    pub fn switch(&mut self, targets: &[Label]) -> &mut Self {
        let id = self.stream.push(Instruction::new(
            u16::from(opcodes::SWITCH),
            Operand::Switch(vec![UNRESOLVED; targets.len()]),
        ));
        self.fixups.push((id, Fixup::Switch(targets.to_vec())));
        self
    }

    fn resolve(&self, label: Label) -> Result<Boundary> {
        match self.labels.get(label.0).copied().flatten() {
            Some(index) => Ok(self.stream.boundary_at(index)),
            None => Err(Error::Error(format!("label {} was never marked", label.0))),
        }
    }

    fn resolve_target(&self, label: Label) -> Result<InstrId> {
        match self.resolve(label)? {
            Boundary::At(id) => Ok(id),
            Boundary::End => Err(Error::Error(format!(
                "label {} marks the end of the code and cannot be branched to",
                label.0
            ))),
        }
    }

    /// Resolve all labels and return the finished stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] for unmarked labels and branches past the end.
    pub fn finish(mut self) -> Result<InstructionStream> {
        let fixups = std::mem::take(&mut self.fixups);
        for (id, fixup) in fixups {
            let operand = match fixup {
                Fixup::Branch(label) => Operand::Target(self.resolve_target(label)?),
                Fixup::Switch(labels) => Operand::Switch(
                    labels
                        .into_iter()
                        .map(|label| self.resolve_target(label))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            if let Some(instruction) = self.stream.get_mut(id) {
                instruction.operand = operand;
            }
        }

        let pending = std::mem::take(&mut self.regions);
        for region in pending {
            let filter_start = region
                .filter_start
                .map(|label| self.resolve(label))
                .transpose()?;
            let resolved = ExceptionRegion {
                flags: region.flags,
                try_start: self.resolve(region.try_start)?,
                try_end: self.resolve(region.try_end)?,
                handler_start: self.resolve(region.handler_start)?,
                handler_end: self.resolve(region.handler_end)?,
                filter_start,
                class_token: region.class_token,
            };
            self.stream.regions.push(resolved);
        }

        Ok(self.stream)
    }
}

/// Builder for method bodies.
///
/// # Examples
///
/// ```rust
/// use dotweave::builder::{MethodBodyBuilder, ModuleBuilder};
///
/// let mut module = ModuleBuilder::new("Demo");
/// let body = MethodBodyBuilder::new()
///     .implementation(|asm| {
///         let done = asm.label();
///         asm.ldarg(1).brtrue(done).ldc_i4(7).ret();
///         asm.mark(done).ldc_i4(9).ret();
///         Ok(())
///     })
///     .build(&mut module)?;
/// assert_eq!(body[0] & 0x3, 0x2);
/// # Ok::<(), dotweave::Error>(())
/// ```
pub struct MethodBodyBuilder {
    max_stack: u16,
    init_locals: bool,
    fat: bool,
    locals: Vec<TypeSignature>,
    implementation: Option<ImplementationFn>,
}

impl Default for MethodBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodBodyBuilder {
    /// A builder for an empty body with a max stack of 8.
    #[must_use]
    pub fn new() -> Self {
        MethodBodyBuilder {
            max_stack: 8,
            init_locals: true,
            fat: false,
            locals: Vec::new(),
            implementation: None,
        }
    }

    /// Set the maximum stack depth.
    #[must_use]
    pub fn max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    /// Add a local variable; locals are numbered in the order they are added.
    #[must_use]
    pub fn local(mut self, local_type: TypeSignature) -> Self {
        self.locals.push(local_type);
        self
    }

    /// Zero-initialize locals. Only meaningful for bodies with locals.
    #[must_use]
    pub fn init_locals(mut self, init: bool) -> Self {
        self.init_locals = init;
        self
    }

    /// Always use the fat header.
    #[must_use]
    pub fn fat(mut self) -> Self {
        self.fat = true;
        self
    }

    /// Set the code of the body.
    #[must_use]
    pub fn implementation<F>(mut self, implementation: F) -> Self
    where
        F: FnOnce(&mut Assembler) -> Result<()> + 'static,
    {
        self.implementation = Some(Box::new(implementation));
        self
    }

    /// Encode the body, registering its local signature with `module`.
    ///
    /// # Errors
    /// Returns errors of the implementation closure, unresolved labels and encoding
    /// failures.
    pub fn build(self, module: &mut ModuleBuilder) -> Result<Vec<u8>> {
        let mut assembler = Assembler::new();
        if let Some(implementation) = self.implementation {
            implementation(&mut assembler)?;
        }
        let stream = assembler.finish()?;
        let encoded = encode_stream(&stream)?;

        let local_var_sig_token = if self.locals.is_empty() {
            0
        } else {
            let signature = encode_local_var_signature(&SignatureLocalVariables {
                locals: self
                    .locals
                    .into_iter()
                    .map(|base| SignatureLocalVariable {
                        base,
                        ..SignatureLocalVariable::default()
                    })
                    .collect(),
            })?;
            module.standalone_signature(&signature)?.value()
        };

        encode_method_body(
            &MethodBodyHeader {
                max_stack: self.max_stack,
                local_var_sig_token,
                init_locals: self.init_locals && local_var_sig_token != 0,
                force_fat: self.fat,
            },
            &encoded.code,
            &encoded.handlers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::decode_stream, metadata::method::MethodBody};

    fn build(body: MethodBodyBuilder) -> Vec<u8> {
        body.build(&mut ModuleBuilder::new("Bodies")).unwrap()
    }

    #[test]
    fn tiny_by_default() {
        let body = build(MethodBodyBuilder::new().implementation(|asm| {
            asm.ldc_i4(2).ldc_i4(-1).add().ret();
            Ok(())
        }));
        assert_eq!(body, [0x12, 0x18, 0x15, 0x58, 0x2A]);
    }

    #[test]
    fn ldc_forms() {
        let body = build(MethodBodyBuilder::new().implementation(|asm| {
            asm.ldc_i4(100).ldc_i4(1000).ret();
            Ok(())
        }));
        assert_eq!(&body[1..3], &[0x1F, 100]);
        assert_eq!(&body[3..8], &[0x20, 0xE8, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn labels_resolve() {
        let body = build(MethodBodyBuilder::new().implementation(|asm| {
            let other = asm.label();
            asm.ldarg(1).brtrue(other).ldc_i4(1).ret();
            asm.mark(other).ldc_i4(2).ret();
            Ok(())
        }));

        let header = MethodBody::from(&body).unwrap();
        let decoded = decode_stream(&body[header.size_header..], &[]).unwrap();
        let stream = decoded.stream;
        assert_eq!(
            stream.at(1).unwrap().operand,
            Operand::Target(stream.id_at(4).unwrap())
        );
    }

    #[test]
    fn unmarked_label() {
        let result = MethodBodyBuilder::new()
            .implementation(|asm| {
                let nowhere = asm.label();
                asm.br(nowhere);
                Ok(())
            })
            .build(&mut ModuleBuilder::new("Bodies"));
        assert!(result.is_err());
    }

    #[test]
    fn locals_make_fat_body() {
        let mut module = ModuleBuilder::new("Bodies");
        let body = MethodBodyBuilder::new()
            .local(TypeSignature::I4)
            .implementation(|asm| {
                asm.ldc_i4(3).stloc(0).ldloc(0).ret();
                Ok(())
            })
            .build(&mut module)
            .unwrap();

        let header = MethodBody::from(&body).unwrap();
        assert!(header.is_fat);
        assert!(header.is_init_local);
        assert_eq!(header.local_var_sig_token, 0x1100_0001);
    }

    #[test]
    fn finally_region() {
        let body = build(MethodBodyBuilder::new().implementation(|asm| {
            let (try_start, handler, end) = (asm.label(), asm.label(), asm.label());
            asm.mark(try_start).nop().leave(end);
            asm.mark(handler).endfinally();
            asm.mark(end).ret();
            asm.region(
                ExceptionHandlerFlags::FINALLY,
                (try_start, handler),
                (handler, end),
                None,
                0,
            );
            Ok(())
        }));

        let header = MethodBody::from(&body).unwrap();
        assert_eq!(header.exception_handlers.len(), 1);
        let clause = &header.exception_handlers[0];
        assert_eq!((clause.try_offset, clause.try_length), (0, 3));
        assert_eq!((clause.handler_offset, clause.handler_length), (3, 1));
    }
}
