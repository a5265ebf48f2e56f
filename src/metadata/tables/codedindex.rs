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

//! Coded indices (ECMA-335 II.24.2.6).
//!
//! A coded index stores a row reference into one of several tables: the low bits hold a
//! tag selecting the table, the remaining bits the 1-based row. Rows are kept as tokens
//! everywhere above the table layer, so this module only converts between the two.

use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Error::InvalidToken,
    Result,
};

/// The coded index kinds of ECMA-335 and the portable PDB format.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef` or `TypeSpec`
    TypeDefOrRef,
    /// `Field`, `Param` or `Property`
    HasConstant,
    /// Anything an attribute can be applied to
    HasCustomAttribute,
    /// `Field` or `Param`
    HasFieldMarshal,
    /// `TypeDef`, `MethodDef` or `Assembly`
    HasDeclSecurity,
    /// Declaring entity of a `MemberRef`
    MemberRefParent,
    /// `Event` or `Property`
    HasSemantics,
    /// `MethodDef` or `MemberRef`
    MethodDefOrRef,
    /// `Field` or `MethodDef`
    MemberForwarded,
    /// `File`, `AssemblyRef` or `ExportedType`
    Implementation,
    /// Constructor of a custom attribute
    CustomAttributeType,
    /// Scope of a `TypeRef`
    ResolutionScope,
    /// `TypeDef` or `MethodDef`
    TypeOrMethodDef,
    /// Anything custom debug information can be attached to
    HasCustomDebugInformation,
}

impl CodedIndexType {
    /// Target tables by tag. `None` marks tags that are reserved.
    #[must_use]
    pub fn tables(self) -> &'static [Option<TableId>] {
        macro_rules! slots {
            ($($table:ident),*) => { &[$(Some(TableId::$table)),*] };
        }

        match self {
            CodedIndexType::TypeDefOrRef => slots!(TypeDef, TypeRef, TypeSpec),
            CodedIndexType::HasConstant => slots!(Field, Param, Property),
            CodedIndexType::HasCustomAttribute => slots!(
                MethodDef, Field, TypeRef, TypeDef, Param, InterfaceImpl, MemberRef, Module,
                DeclSecurity, Property, Event, StandAloneSig, ModuleRef, TypeSpec, Assembly,
                AssemblyRef, File, ExportedType, ManifestResource, GenericParam,
                GenericParamConstraint, MethodSpec
            ),
            CodedIndexType::HasFieldMarshal => slots!(Field, Param),
            CodedIndexType::HasDeclSecurity => slots!(TypeDef, MethodDef, Assembly),
            CodedIndexType::MemberRefParent => {
                slots!(TypeDef, TypeRef, ModuleRef, MethodDef, TypeSpec)
            }
            CodedIndexType::HasSemantics => slots!(Event, Property),
            CodedIndexType::MethodDefOrRef => slots!(MethodDef, MemberRef),
            CodedIndexType::MemberForwarded => slots!(Field, MethodDef),
            CodedIndexType::Implementation => slots!(File, AssemblyRef, ExportedType),
            CodedIndexType::CustomAttributeType => &[
                None,
                None,
                Some(TableId::MethodDef),
                Some(TableId::MemberRef),
                None,
            ],
            CodedIndexType::ResolutionScope => slots!(Module, ModuleRef, AssemblyRef, TypeRef),
            CodedIndexType::TypeOrMethodDef => slots!(TypeDef, MethodDef),
            CodedIndexType::HasCustomDebugInformation => slots!(
                MethodDef, Field, TypeRef, TypeDef, Param, InterfaceImpl, MemberRef, Module,
                DeclSecurity, Property, Event, StandAloneSig, ModuleRef, TypeSpec, Assembly,
                AssemblyRef, File, ExportedType, ManifestResource, GenericParam,
                GenericParamConstraint, MethodSpec, Document, LocalScope, LocalVariable,
                LocalConstant, ImportScope
            ),
        }
    }

    /// Number of low bits holding the tag.
    #[must_use]
    pub fn tag_bits(self) -> u32 {
        let slots = self.tables().len();
        usize::BITS - (slots - 1).leading_zeros()
    }

    /// Split a stored value into a token. A zero row decodes to the null token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a reserved tag.
    pub fn decode(self, value: u32) -> Result<Token> {
        let bits = self.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;
        if row == 0 {
            return Ok(Token::new(0));
        }

        match self.tables().get(tag).copied().flatten() {
            Some(table) => Ok(Token::from_parts(table.id(), row)),
            None => Err(malformed_error!(
                "Invalid {:?} tag - {}",
                self,
                tag
            )),
        }
    }

    /// Combine a token into the stored value. The null token encodes as 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if the token's table is not a target of this
    /// coded index.
    pub fn encode(self, token: Token) -> Result<u32> {
        if token.row() == 0 {
            return Ok(0);
        }

        let tag = self
            .tables()
            .iter()
            .position(|slot| slot.is_some_and(|table| table.id() == token.table()))
            .ok_or(InvalidToken(token))?;
        #[allow(clippy::cast_possible_truncation)]
        let tag = tag as u32;
        Ok((token.row() << self.tag_bits()) | tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_widths() {
        assert_eq!(CodedIndexType::MethodDefOrRef.tag_bits(), 1);
        assert_eq!(CodedIndexType::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexType::MemberRefParent.tag_bits(), 3);
        assert_eq!(CodedIndexType::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndexType::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndexType::HasCustomDebugInformation.tag_bits(), 5);
    }

    #[test]
    fn decode_and_encode() {
        // MemberRef row 3 as attribute constructor: (3 << 3) | 3
        let token = CodedIndexType::CustomAttributeType.decode(0x1B).unwrap();
        assert_eq!(token, Token::new(0x0A00_0003));
        assert_eq!(CodedIndexType::CustomAttributeType.encode(token).unwrap(), 0x1B);

        // Property row 2 as attribute parent: (2 << 5) | 9
        let token = CodedIndexType::HasCustomAttribute.decode(0x49).unwrap();
        assert_eq!(token, Token::new(0x1700_0002));
        assert_eq!(CodedIndexType::HasCustomAttribute.encode(token).unwrap(), 0x49);
    }

    #[test]
    fn null_and_reserved() {
        assert!(CodedIndexType::TypeDefOrRef.decode(0).unwrap().is_null());
        assert_eq!(CodedIndexType::TypeDefOrRef.encode(Token::new(0)).unwrap(), 0);
        assert!(CodedIndexType::CustomAttributeType.decode(0x09).is_err());
        assert!(CodedIndexType::TypeDefOrRef.decode(0x07).is_err());
        assert!(CodedIndexType::MethodDefOrRef
            .encode(Token::new(0x0200_0001))
            .is_err());
    }
}
