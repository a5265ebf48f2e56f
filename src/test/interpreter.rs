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

//! A small CIL interpreter for checking woven bodies by running them.
//!
//! Supports the instruction subset the fixtures use. Calls into the contract library are
//! served by the host: failed checks become a [`Fault`] and every call is traced.

use std::collections::HashMap;

use crate::{
    assembly::{decode_stream, fe, opcodes, Immediate, InstrId, Instruction, Operand},
    metadata::{
        method::MethodBody,
        signatures::SignatureParser,
        tables::{FieldRaw, TableId},
        token::Token,
        Module,
    },
};

/// A value on the evaluation stack, in an argument or in a local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    I32(i32),
    Null,
    Object(usize),
}

impl Value {
    fn truthy(self) -> bool {
        match self {
            Value::I32(value) => value != 0,
            Value::Null => false,
            Value::Object(_) => true,
        }
    }

    fn int(self) -> Result<i32, Fault> {
        match self {
            Value::I32(value) => Ok(value),
            other => Err(Fault::Host(format!("expected int32, got {other:?}"))),
        }
    }
}

/// Abnormal termination of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// `Contract.Invariant(false)`
    InvariantViolated,
    /// `Contract.Ensures(false)`
    PostconditionViolated,
    /// `Contract.Requires(false)`
    PreconditionViolated,
    /// Anything the interpreter cannot run
    Host(String),
}

const CONTRACT: &str = "Odin.DesignContracts.Contract";
const STEP_LIMIT: usize = 100_000;

/// Runs methods of one module.
pub struct Interpreter<'m> {
    module: &'m Module,
    objects: Vec<HashMap<u32, Value>>,
    /// Names of the contract methods called so far, in order
    pub trace: Vec<String>,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Interpreter {
            module,
            objects: Vec::new(),
            trace: Vec::new(),
        }
    }

    fn method_index(&self, full_name: &str) -> Result<usize, Fault> {
        self.module
            .methods
            .iter()
            .position(|method| method.full_name() == full_name)
            .ok_or_else(|| Fault::Host(format!("no method {full_name}")))
    }

    /// Allocate an object of `type_name` and run its constructor.
    pub fn construct(&mut self, type_name: &str, args: &[Value]) -> Result<Value, Fault> {
        let ctor = self.method_index(&format!("{type_name}::.ctor"))?;
        self.objects.push(HashMap::new());
        let this = Value::Object(self.objects.len() - 1);

        let mut all = vec![this];
        all.extend_from_slice(args);
        self.invoke(ctor, all)?;
        Ok(this)
    }

    /// Call the method `full_name`; `args` include `this` for instance methods.
    pub fn call(&mut self, full_name: &str, args: &[Value]) -> Result<Value, Fault> {
        let method = self.method_index(full_name)?;
        self.invoke(method, args.to_vec())
    }

    /// Read a field of an object by name.
    pub fn field(&self, object: Value, name: &str) -> Option<Value> {
        let Value::Object(handle) = object else {
            return None;
        };
        let row = self
            .module
            .tables
            .rows::<FieldRaw>()
            .ok()?
            .iter()
            .position(|field| self.module.strings.get(field.name).ok() == Some(name))?;
        let token = Token::from_parts(TableId::Field.id(), row as u32 + 1);
        Some(
            self.objects
                .get(handle)?
                .get(&token.value())
                .copied()
                .unwrap_or(Value::I32(0)),
        )
    }

    fn host_call(&mut self, token: Token, stack: &mut Vec<Value>) -> Result<bool, Fault> {
        let target = self
            .module
            .method_ref(token)
            .map_err(|error| Fault::Host(error.to_string()))?;
        if target.declaring_type.as_deref() != Some(CONTRACT) {
            return Ok(false);
        }

        self.trace.push(target.name.clone());
        let fault = match target.name.as_str() {
            "Invariant" => Fault::InvariantViolated,
            "Ensures" => Fault::PostconditionViolated,
            "Requires" => Fault::PreconditionViolated,
            "EndContractBlock" => return Ok(true),
            "Result" => {
                stack.push(Value::I32(0));
                return Ok(true);
            }
            other => return Err(Fault::Host(format!("unknown contract method {other}"))),
        };

        let condition = stack
            .pop()
            .ok_or_else(|| Fault::Host("stack underflow".into()))?;
        if !condition.truthy() {
            return Err(fault);
        }
        Ok(true)
    }

    fn invoke(&mut self, method: usize, mut args: Vec<Value>) -> Result<Value, Fault> {
        let module = self.module;
        let definition = &module.methods[method];
        let body = definition
            .body
            .as_deref()
            .ok_or_else(|| Fault::Host(format!("{} has no body", definition.full_name())))?;
        let host = |error: crate::Error| Fault::Host(error.to_string());

        let header = MethodBody::from(body).map_err(host)?;
        let code = &body[header.size_header..header.size_header + header.size_code];
        let decoded = decode_stream(code, &header.exception_handlers).map_err(host)?;
        let stream = decoded.stream;
        let index_of: HashMap<InstrId, usize> = stream
            .ids()
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();

        let local_count = match module
            .local_signature(header.local_var_sig_token)
            .map_err(host)?
        {
            Some(signature) => SignatureParser::new(signature)
                .parse_local_var_signature()
                .map_err(host)?
                .locals
                .len(),
            None => 0,
        };
        let mut locals = vec![Value::I32(0); local_count];
        let expected_args = definition.param_count() + usize::from(definition.signature.has_this);
        args.resize(expected_args, Value::I32(0));

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        for _ in 0..STEP_LIMIT {
            let instruction: &Instruction = stream.at(pc).ok_or_else(|| {
                Fault::Host(format!("fell off the end of {}", definition.full_name()))
            })?;
            pc += 1;

            let pop = |stack: &mut Vec<Value>| {
                stack.pop().ok_or_else(|| Fault::Host("stack underflow".into()))
            };
            let jump = |target: &InstrId| {
                index_of
                    .get(target)
                    .copied()
                    .ok_or_else(|| Fault::Host("branch outside body".into()))
            };

            let opcode = instruction.opcode;
            let short = |value: u8| opcode == u16::from(value);
            match (&instruction.operand, opcode) {
                (Operand::None, op) if short(opcodes::NOP) || op == fe(opcodes::FE_TAIL) => {}
                (Operand::None, op) if (0x02..=0x05).contains(&op) => {
                    stack.push(args[usize::from(op - 0x02)]);
                }
                (Operand::None, op) if (0x06..=0x09).contains(&op) => {
                    stack.push(locals[usize::from(op - 0x06)]);
                }
                (Operand::None, op) if (0x0A..=0x0D).contains(&op) => {
                    locals[usize::from(op - 0x0A)] = pop(&mut stack)?;
                }
                (Operand::Argument(index), _)
                    if short(opcodes::STARG_S) || opcode == fe(opcodes::FE_STARG) =>
                {
                    args[usize::from(*index)] = pop(&mut stack)?;
                }
                (Operand::Argument(index), _) => stack.push(args[usize::from(*index)]),
                (Operand::Local(slot), _)
                    if short(opcodes::STLOC_S) || opcode == fe(opcodes::FE_STLOC) =>
                {
                    locals[usize::from(*slot)] = pop(&mut stack)?;
                }
                (Operand::Local(slot), _) => stack.push(locals[usize::from(*slot)]),
                (Operand::None, op) if (0x15..=0x1E).contains(&op) => {
                    stack.push(Value::I32(i32::from(op) - i32::from(opcodes::LDC_I4_0)));
                }
                (Operand::Immediate(Immediate::Int8(value)), _) => {
                    stack.push(Value::I32(i32::from(*value)));
                }
                (Operand::Immediate(Immediate::Int32(value)), _) => stack.push(Value::I32(*value)),
                (Operand::None, _) if short(opcodes::LDNULL) => stack.push(Value::Null),
                (Operand::None, _) if short(opcodes::DUP) => {
                    let top = pop(&mut stack)?;
                    stack.extend([top, top]);
                }
                (Operand::None, _) if short(opcodes::POP) => {
                    pop(&mut stack)?;
                }
                (Operand::None, _) if short(opcodes::RET) => {
                    return Ok(if definition.returns_void() {
                        Value::Null
                    } else {
                        pop(&mut stack)?
                    });
                }
                (Operand::None, op)
                    if [opcodes::ADD, opcodes::SUB, opcodes::MUL]
                        .map(u16::from)
                        .contains(&op)
                        || [opcodes::FE_CEQ, opcodes::FE_CGT, opcodes::FE_CLT]
                            .map(fe)
                            .contains(&op) =>
                {
                    let right = pop(&mut stack)?.int()?;
                    let left = pop(&mut stack)?;
                    let result = if op == fe(opcodes::FE_CEQ) {
                        i32::from(left == Value::I32(right))
                    } else {
                        let left = left.int()?;
                        match op {
                            op if op == u16::from(opcodes::ADD) => left.wrapping_add(right),
                            op if op == u16::from(opcodes::SUB) => left.wrapping_sub(right),
                            op if op == u16::from(opcodes::MUL) => left.wrapping_mul(right),
                            op if op == fe(opcodes::FE_CGT) => i32::from(left > right),
                            _ => i32::from(left < right),
                        }
                    };
                    stack.push(Value::I32(result));
                }
                (Operand::Target(target), op) => {
                    let op = u8::try_from(op).map_err(|_| Fault::Host("bad branch".into()))?;
                    let op = match op {
                        opcodes::BR_S..=opcodes::BLT_UN_S => {
                            opcodes::long_branch(op).unwrap_or(op)
                        }
                        opcodes::LEAVE_S => opcodes::LEAVE,
                        other => other,
                    };
                    let taken = match op {
                        opcodes::BR | opcodes::LEAVE => true,
                        opcodes::BRFALSE => !pop(&mut stack)?.truthy(),
                        opcodes::BRTRUE => pop(&mut stack)?.truthy(),
                        _ => {
                            let right = pop(&mut stack)?.int()?;
                            let left = pop(&mut stack)?.int()?;
                            match op {
                                opcodes::BEQ => left == right,
                                opcodes::BGE => left >= right,
                                opcodes::BGT => left > right,
                                opcodes::BLE => left <= right,
                                opcodes::BLT => left < right,
                                opcodes::BNE_UN => left != right,
                                other => {
                                    return Err(Fault::Host(format!(
                                        "unsupported branch 0x{other:02X}"
                                    )))
                                }
                            }
                        }
                    };
                    if taken {
                        pc = jump(target)?;
                    }
                }
                (Operand::Switch(targets), _) => {
                    let selector = pop(&mut stack)?.int()?;
                    let target = usize::try_from(selector)
                        .ok()
                        .and_then(|index| targets.get(index));
                    if let Some(target) = target {
                        pc = jump(target)?;
                    }
                }
                (Operand::Token(field), _) if short(opcodes::LDFLD) => {
                    let Value::Object(handle) = pop(&mut stack)? else {
                        return Err(Fault::Host("ldfld on non-object".into()));
                    };
                    let value = self.objects[handle].get(&field.value()).copied();
                    stack.push(value.unwrap_or(Value::I32(0)));
                }
                (Operand::Token(field), _) if short(opcodes::STFLD) => {
                    let value = pop(&mut stack)?;
                    let Value::Object(handle) = pop(&mut stack)? else {
                        return Err(Fault::Host("stfld on non-object".into()));
                    };
                    self.objects[handle].insert(field.value(), value);
                }
                (Operand::Token(callee), _)
                    if short(opcodes::CALL) || short(opcodes::CALLVIRT) =>
                {
                    if self.host_call(*callee, &mut stack)? {
                        continue;
                    }
                    let target = module
                        .method_by_token(*callee)
                        .ok_or_else(|| Fault::Host(format!("cannot call {callee}")))?;
                    let index = module
                        .methods
                        .iter()
                        .position(|method| method.token == target.token)
                        .ok_or_else(|| Fault::Host(format!("cannot call {callee}")))?;
                    let count = target.param_count() + usize::from(target.signature.has_this);
                    let split = stack
                        .len()
                        .checked_sub(count)
                        .ok_or_else(|| Fault::Host("stack underflow".into()))?;
                    let call_args = stack.split_off(split);
                    let result = self.invoke(index, call_args)?;
                    if !target.returns_void() {
                        stack.push(result);
                    }
                }
                _ => {
                    return Err(Fault::Host(format!(
                        "unsupported instruction {instruction} in {}",
                        definition.full_name()
                    )))
                }
            }
        }

        Err(Fault::Host(format!("{} did not terminate", definition.full_name())))
    }
}
