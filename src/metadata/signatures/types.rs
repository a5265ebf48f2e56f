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

#![allow(missing_docs)]

use crate::metadata::token::Token;

/// A type as it appears inside a signature blob.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypeSignature {
    /// Placeholder for an unparsed type
    #[default]
    Unknown,
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Ptr(Box<TypeSignature>),
    ByRef(Box<TypeSignature>),
    // TypeDefOrRefOrSpecEncoded
    ValueType(Token),
    // TypeDefOrRefOrSpecEncoded
    Class(Token),
    // Index into the declaring type's generic parameters
    GenericParamType(u32),
    Array(SignatureArray),
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    TypedByRef,
    I,
    U,
    FnPtr(Box<SignatureMethod>),
    Object,
    SzArray(Box<TypeSignature>),
    // Index into the method's generic parameters
    GenericParamMethod(u32),
    Pinned(Box<TypeSignature>),
}

/// A general array type (`ELEMENT_TYPE_ARRAY`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureArray {
    pub base: Box<TypeSignature>,
    pub rank: u32,
    pub sizes: Vec<u32>,
    pub lower_bounds: Vec<u32>,
}

/// A return type or parameter, with its custom modifiers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureParameter {
    pub modifiers: Vec<CustomModifier>,
    pub by_ref: bool,
    pub base: TypeSignature,
}

/// A `modreq` / `modopt` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomModifier {
    pub is_required: bool,
    pub modifier_type: Token,
}

/// `MethodDefSig` / `MethodRefSig`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureMethod {
    pub has_this: bool,
    pub explicit_this: bool,
    pub vararg: bool,
    pub generic_param_count: u32,
    pub return_type: SignatureParameter,
    pub params: Vec<SignatureParameter>,
}

impl SignatureMethod {
    /// Returns `true` when the method does not produce a value.
    #[must_use]
    pub fn returns_void(&self) -> bool {
        !self.return_type.by_ref && self.return_type.base == TypeSignature::Void
    }
}

/// One local of a `LocalVarSig`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureLocalVariable {
    pub modifiers: Vec<CustomModifier>,
    pub is_byref: bool,
    pub is_pinned: bool,
    pub base: TypeSignature,
}

/// `LocalVarSig`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureLocalVariables {
    pub locals: Vec<SignatureLocalVariable>,
}

/// `FieldSig`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureField {
    pub modifiers: Vec<CustomModifier>,
    pub base: TypeSignature,
}

/// `MethodSpec` instantiation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureMethodSpec {
    pub generic_args: Vec<TypeSignature>,
}
