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

use strum::{EnumCount, EnumIter, FromRepr, IntoStaticStr};

use crate::metadata::tables::CodedIndexType;

/// Identifiers of the metadata tables, including the portable PDB tables.
///
/// The discriminants are the ECMA-335 table numbers, which are also the high byte of
/// tokens referencing rows of the table and the bit positions in the `Valid` mask of the
/// tables stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount, FromRepr,
    IntoStaticStr,
)]
#[repr(u8)]
pub enum TableId {
    /// `Module` (0x00)
    Module = 0x00,
    /// `TypeRef` (0x01)
    TypeRef = 0x01,
    /// `TypeDef` (0x02)
    TypeDef = 0x02,
    /// `FieldPtr` (0x03)
    FieldPtr = 0x03,
    /// `Field` (0x04)
    Field = 0x04,
    /// `MethodPtr` (0x05)
    MethodPtr = 0x05,
    /// `MethodDef` (0x06)
    MethodDef = 0x06,
    /// `ParamPtr` (0x07)
    ParamPtr = 0x07,
    /// `Param` (0x08)
    Param = 0x08,
    /// `InterfaceImpl` (0x09)
    InterfaceImpl = 0x09,
    /// `MemberRef` (0x0A)
    MemberRef = 0x0A,
    /// `Constant` (0x0B)
    Constant = 0x0B,
    /// `CustomAttribute` (0x0C)
    CustomAttribute = 0x0C,
    /// `FieldMarshal` (0x0D)
    FieldMarshal = 0x0D,
    /// `DeclSecurity` (0x0E)
    DeclSecurity = 0x0E,
    /// `ClassLayout` (0x0F)
    ClassLayout = 0x0F,
    /// `FieldLayout` (0x10)
    FieldLayout = 0x10,
    /// `StandAloneSig` (0x11)
    StandAloneSig = 0x11,
    /// `EventMap` (0x12)
    EventMap = 0x12,
    /// `EventPtr` (0x13)
    EventPtr = 0x13,
    /// `Event` (0x14)
    Event = 0x14,
    /// `PropertyMap` (0x15)
    PropertyMap = 0x15,
    /// `PropertyPtr` (0x16)
    PropertyPtr = 0x16,
    /// `Property` (0x17)
    Property = 0x17,
    /// `MethodSemantics` (0x18)
    MethodSemantics = 0x18,
    /// `MethodImpl` (0x19)
    MethodImpl = 0x19,
    /// `ModuleRef` (0x1A)
    ModuleRef = 0x1A,
    /// `TypeSpec` (0x1B)
    TypeSpec = 0x1B,
    /// `ImplMap` (0x1C)
    ImplMap = 0x1C,
    /// `FieldRVA` (0x1D)
    FieldRVA = 0x1D,
    /// `EncLog` (0x1E)
    EncLog = 0x1E,
    /// `EncMap` (0x1F)
    EncMap = 0x1F,
    /// `Assembly` (0x20)
    Assembly = 0x20,
    /// `AssemblyProcessor` (0x21)
    AssemblyProcessor = 0x21,
    /// `AssemblyOS` (0x22)
    AssemblyOS = 0x22,
    /// `AssemblyRef` (0x23)
    AssemblyRef = 0x23,
    /// `AssemblyRefProcessor` (0x24)
    AssemblyRefProcessor = 0x24,
    /// `AssemblyRefOS` (0x25)
    AssemblyRefOS = 0x25,
    /// `File` (0x26)
    File = 0x26,
    /// `ExportedType` (0x27)
    ExportedType = 0x27,
    /// `ManifestResource` (0x28)
    ManifestResource = 0x28,
    /// `NestedClass` (0x29)
    NestedClass = 0x29,
    /// `GenericParam` (0x2A)
    GenericParam = 0x2A,
    /// `MethodSpec` (0x2B)
    MethodSpec = 0x2B,
    /// `GenericParamConstraint` (0x2C)
    GenericParamConstraint = 0x2C,
    /// `Document` (0x30)
    Document = 0x30,
    /// `MethodDebugInformation` (0x31)
    MethodDebugInformation = 0x31,
    /// `LocalScope` (0x32)
    LocalScope = 0x32,
    /// `LocalVariable` (0x33)
    LocalVariable = 0x33,
    /// `LocalConstant` (0x34)
    LocalConstant = 0x34,
    /// `ImportScope` (0x35)
    ImportScope = 0x35,
    /// `StateMachineMethod` (0x36)
    StateMachineMethod = 0x36,
    /// `CustomDebugInformation` (0x37)
    CustomDebugInformation = 0x37,
}

/// Storage class of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Two byte constant
    U16,
    /// Four byte constant
    U32,
    /// `#Strings` offset
    String,
    /// 1-based `#GUID` index
    Guid,
    /// `#Blob` offset
    Blob,
    /// 1-based row index into one table
    Index(TableId),
    /// Tagged row index into one of several tables
    Coded(CodedIndexType),
}

use ColumnType::{Blob, Coded, Guid, Index, String as Str, U16, U32};

impl TableId {
    /// The table number, equal to the token table byte.
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Bit of this table in the `Valid` and `Sorted` masks.
    #[must_use]
    pub fn mask(self) -> u64 {
        1_u64 << self.id()
    }

    /// Display name of the table.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for the indirection tables of unoptimized metadata.
    #[must_use]
    pub fn is_pointer(self) -> bool {
        matches!(
            self,
            TableId::FieldPtr
                | TableId::MethodPtr
                | TableId::ParamPtr
                | TableId::EventPtr
                | TableId::PropertyPtr
        )
    }

    /// Returns `true` for tables that live in a portable PDB.
    #[must_use]
    pub fn is_debug(self) -> bool {
        self >= TableId::Document
    }

    /// Column layout of the table (ECMA-335 II.22, portable PDB tables after `0x30`).
    #[must_use]
    #[rustfmt::skip]
    pub fn columns(self) -> &'static [ColumnType] {
        use CodedIndexType as C;
        match self {
            TableId::Module => &[U16, Str, Guid, Guid, Guid],
            TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
            TableId::TypeDef => &[
                U32, Str, Str, Coded(C::TypeDefOrRef), Index(TableId::Field), Index(TableId::MethodDef),
            ],
            TableId::FieldPtr => &[Index(TableId::Field)],
            TableId::Field => &[U16, Str, Blob],
            TableId::MethodPtr => &[Index(TableId::MethodDef)],
            TableId::MethodDef => &[U32, U16, U16, Str, Blob, Index(TableId::Param)],
            TableId::ParamPtr => &[Index(TableId::Param)],
            TableId::Param => &[U16, U16, Str],
            TableId::InterfaceImpl => &[Index(TableId::TypeDef), Coded(C::TypeDefOrRef)],
            TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
            TableId::Constant => &[U16, Coded(C::HasConstant), Blob],
            TableId::CustomAttribute => &[Coded(C::HasCustomAttribute), Coded(C::CustomAttributeType), Blob],
            TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
            TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
            TableId::ClassLayout => &[U16, U32, Index(TableId::TypeDef)],
            TableId::FieldLayout => &[U32, Index(TableId::Field)],
            TableId::StandAloneSig => &[Blob],
            TableId::EventMap => &[Index(TableId::TypeDef), Index(TableId::Event)],
            TableId::EventPtr => &[Index(TableId::Event)],
            TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
            TableId::PropertyMap => &[Index(TableId::TypeDef), Index(TableId::Property)],
            TableId::PropertyPtr => &[Index(TableId::Property)],
            TableId::Property => &[U16, Str, Blob],
            TableId::MethodSemantics => &[U16, Index(TableId::MethodDef), Coded(C::HasSemantics)],
            TableId::MethodImpl => &[Index(TableId::TypeDef), Coded(C::MethodDefOrRef), Coded(C::MethodDefOrRef)],
            TableId::ModuleRef => &[Str],
            TableId::TypeSpec => &[Blob],
            TableId::ImplMap => &[U16, Coded(C::MemberForwarded), Str, Index(TableId::ModuleRef)],
            TableId::FieldRVA => &[U32, Index(TableId::Field)],
            TableId::EncLog => &[U32, U32],
            TableId::EncMap => &[U32],
            TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
            TableId::AssemblyProcessor => &[U32],
            TableId::AssemblyOS => &[U32, U32, U32],
            TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
            TableId::AssemblyRefProcessor => &[U32, Index(TableId::AssemblyRef)],
            TableId::AssemblyRefOS => &[U32, U32, U32, Index(TableId::AssemblyRef)],
            TableId::File => &[U32, Str, Blob],
            TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
            TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
            TableId::NestedClass => &[Index(TableId::TypeDef), Index(TableId::TypeDef)],
            TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
            TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
            TableId::GenericParamConstraint => &[Index(TableId::GenericParam), Coded(C::TypeDefOrRef)],
            TableId::Document => &[Blob, Guid, Blob, Guid],
            TableId::MethodDebugInformation => &[Index(TableId::Document), Blob],
            TableId::LocalScope => &[
                Index(TableId::MethodDef), Index(TableId::ImportScope), Index(TableId::LocalVariable),
                Index(TableId::LocalConstant), U32, U32,
            ],
            TableId::LocalVariable => &[U16, U16, Str],
            TableId::LocalConstant => &[Str, Blob],
            TableId::ImportScope => &[Index(TableId::ImportScope), Blob],
            TableId::StateMachineMethod => &[Index(TableId::MethodDef), Index(TableId::MethodDef)],
            TableId::CustomDebugInformation => &[Coded(C::HasCustomDebugInformation), Guid, Blob],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn table_ids() {
        assert_eq!(TableId::MethodSpec.id(), 0x2B);
        assert_eq!(TableId::MethodSpec.mask(), 0x0000_0800_0000_0000);
        assert_eq!(TableId::from_repr(0x0A), Some(TableId::MemberRef));
        assert_eq!(TableId::from_repr(0x2D), None);
        assert_eq!(TableId::StandAloneSig.name(), "StandAloneSig");
        assert!(TableId::Document.is_debug());
        assert!(!TableId::GenericParamConstraint.is_debug());
        assert!(TableId::MethodPtr.is_pointer());
    }

    #[test]
    fn every_table_has_columns() {
        for table in TableId::iter() {
            assert!(!table.columns().is_empty(), "{}", table.name());
        }
        assert_eq!(TableId::LocalScope.columns().len(), 6);
    }
}
