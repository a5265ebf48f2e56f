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

//! Typed row views.
//!
//! Column names follow ECMA-335 II.22 and the portable PDB format. String columns are
//! `#Strings` offsets, guid columns 1-based `#GUID` indices, signature and value columns
//! `#Blob` offsets. Coded index columns decode into full tokens; plain index columns stay
//! 1-based row numbers of the one table they point into.

use crate::{
    metadata::{
        tables::{ColumnType, TableId, TableRow},
        token::Token,
    },
    Error::{InvalidToken, OutOfBounds},
    Result,
};

trait Column: Sized {
    fn from_cell(cell: u32, column: ColumnType) -> Result<Self>;
    fn to_cell(&self, column: ColumnType) -> Result<u32>;
}

impl Column for u16 {
    fn from_cell(cell: u32, _column: ColumnType) -> Result<Self> {
        u16::try_from(cell).map_err(|_| malformed_error!("Cell 0x{:X} exceeds u16", cell))
    }

    fn to_cell(&self, _column: ColumnType) -> Result<u32> {
        Ok(u32::from(*self))
    }
}

impl Column for u32 {
    fn from_cell(cell: u32, _column: ColumnType) -> Result<Self> {
        Ok(cell)
    }

    fn to_cell(&self, _column: ColumnType) -> Result<u32> {
        Ok(*self)
    }
}

impl Column for Token {
    fn from_cell(cell: u32, column: ColumnType) -> Result<Self> {
        match column {
            ColumnType::Coded(coded) => coded.decode(cell),
            ColumnType::Index(_) if cell == 0 => Ok(Token::new(0)),
            ColumnType::Index(table) => Ok(Token::from_parts(table.id(), cell)),
            _ => Ok(Token::new(cell)),
        }
    }

    fn to_cell(&self, column: ColumnType) -> Result<u32> {
        match column {
            ColumnType::Coded(coded) => coded.encode(*self),
            ColumnType::Index(_) if self.is_null() => Ok(0),
            ColumnType::Index(table) if self.table() == table.id() => Ok(self.row()),
            ColumnType::Index(_) => Err(InvalidToken(*self)),
            _ => Ok(self.value()),
        }
    }
}

macro_rules! table_row {
    (
        $(#[$meta:meta])*
        $name:ident => $table:ident {
            $( $(#[$field_meta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $( $(#[$field_meta])* pub $field: $ty, )*
        }

        impl TableRow for $name {
            const TABLE: TableId = TableId::$table;

            fn from_cells(cells: &[u32]) -> Result<Self> {
                let mut columns = TableId::$table.columns().iter().zip(cells);
                Ok($name {
                    $( $field: {
                        let (column, cell) = columns.next().ok_or(OutOfBounds)?;
                        <$ty as Column>::from_cell(*cell, *column)?
                    }, )*
                })
            }

            fn to_cells(&self) -> Result<Vec<u32>> {
                let mut columns = TableId::$table.columns().iter();
                let mut cells = Vec::with_capacity(TableId::$table.columns().len());
                $(
                    let column = columns.next().ok_or(OutOfBounds)?;
                    cells.push(Column::to_cell(&self.$field, *column)?);
                )*
                Ok(cells)
            }
        }
    };
}

table_row! {
    /// The module itself; always exactly one row.
    ModuleRaw => Module {
        /// Reserved, 0
        generation: u16,
        /// `#Strings` offset of the module file name
        name: u32,
        /// `#GUID` index of the module version id
        mvid: u32,
        /// Reserved, 0
        enc_id: u32,
        /// Reserved, 0
        enc_base_id: u32,
    }
}

table_row! {
    /// A reference to a type defined in another module.
    TypeRefRaw => TypeRef {
        /// `Module`, `ModuleRef`, `AssemblyRef` or enclosing `TypeRef`
        resolution_scope: Token,
        /// `#Strings` offset of the name
        name: u32,
        /// `#Strings` offset of the namespace
        namespace: u32,
    }
}

table_row! {
    /// A type defined in this module. Owns the `Field` rows from `field_list` and the
    /// `MethodDef` rows from `method_list` up to the lists of the next row.
    TypeDefRaw => TypeDef {
        /// `TypeAttributes`
        flags: u32,
        /// `#Strings` offset of the name
        name: u32,
        /// `#Strings` offset of the namespace
        namespace: u32,
        /// Base type, null for interfaces and `System.Object`
        extends: Token,
        /// First owned `Field` row
        field_list: u32,
        /// First owned `MethodDef` row
        method_list: u32,
    }
}

table_row! {
    /// A field definition.
    FieldRaw => Field {
        /// `FieldAttributes`
        flags: u16,
        /// `#Strings` offset of the name
        name: u32,
        /// `#Blob` offset of the `FieldSig`
        signature: u32,
    }
}

table_row! {
    /// A method definition.
    MethodDefRaw => MethodDef {
        /// RVA of the method body, 0 when the method has no body
        rva: u32,
        /// `MethodImplAttributes`
        impl_flags: u16,
        /// `MethodAttributes`
        flags: u16,
        /// `#Strings` offset of the name
        name: u32,
        /// `#Blob` offset of the `MethodDefSig`
        signature: u32,
        /// First owned `Param` row
        param_list: u32,
    }
}

table_row! {
    /// A parameter definition; sequence 0 describes the return value.
    ParamRaw => Param {
        /// `ParamAttributes`
        flags: u16,
        /// Position of the parameter
        sequence: u16,
        /// `#Strings` offset of the name
        name: u32,
    }
}

table_row! {
    /// A reference to a method or field of another type.
    MemberRefRaw => MemberRef {
        /// Declaring `TypeRef`, `TypeDef`, `TypeSpec`, `ModuleRef` or `MethodDef`
        class: Token,
        /// `#Strings` offset of the member name
        name: u32,
        /// `#Blob` offset of the member signature
        signature: u32,
    }
}

table_row! {
    /// A custom attribute applied to a metadata row.
    CustomAttributeRaw => CustomAttribute {
        /// Row carrying the attribute
        parent: Token,
        /// `MethodDef` or `MemberRef` of the attribute constructor
        constructor: Token,
        /// `#Blob` offset of the encoded arguments
        value: u32,
    }
}

table_row! {
    /// A standalone signature, used for local variable signatures.
    StandAloneSigRaw => StandAloneSig {
        /// `#Blob` offset of the signature
        signature: u32,
    }
}

table_row! {
    /// Links a type to the run of `Property` rows it owns.
    PropertyMapRaw => PropertyMap {
        /// Owning `TypeDef` row
        parent: u32,
        /// First owned `Property` row
        property_list: u32,
    }
}

table_row! {
    /// A property definition; accessors are attached through `MethodSemantics`.
    PropertyRaw => Property {
        /// `PropertyAttributes`
        flags: u16,
        /// `#Strings` offset of the name
        name: u32,
        /// `#Blob` offset of the `PropertySig`
        signature: u32,
    }
}

table_row! {
    /// Binds an accessor method to a property or event.
    MethodSemanticsRaw => MethodSemantics {
        /// `MethodSemanticsAttributes`, see [`SEMANTICS_SETTER`] and [`SEMANTICS_GETTER`]
        semantics: u16,
        /// Accessor `MethodDef` row
        method: u32,
        /// `Property` or `Event`
        association: Token,
    }
}

/// `MethodSemantics` flag of a property setter.
pub const SEMANTICS_SETTER: u16 = 0x0001;
/// `MethodSemantics` flag of a property getter.
pub const SEMANTICS_GETTER: u16 = 0x0002;

table_row! {
    /// A constructed type such as a generic instantiation.
    TypeSpecRaw => TypeSpec {
        /// `#Blob` offset of the `TypeSpec` signature
        signature: u32,
    }
}

table_row! {
    /// The assembly manifest of the module.
    AssemblyRaw => Assembly {
        /// `AssemblyHashAlgorithm`
        hash_algorithm: u32,
        /// Version major
        major_version: u16,
        /// Version minor
        minor_version: u16,
        /// Version build
        build_number: u16,
        /// Version revision
        revision_number: u16,
        /// `AssemblyFlags`
        flags: u32,
        /// `#Blob` offset of the public key
        public_key: u32,
        /// `#Strings` offset of the name
        name: u32,
        /// `#Strings` offset of the culture
        culture: u32,
    }
}

table_row! {
    /// A referenced assembly.
    AssemblyRefRaw => AssemblyRef {
        /// Version major
        major_version: u16,
        /// Version minor
        minor_version: u16,
        /// Version build
        build_number: u16,
        /// Version revision
        revision_number: u16,
        /// `AssemblyFlags`
        flags: u32,
        /// `#Blob` offset of the public key or its token
        public_key_or_token: u32,
        /// `#Strings` offset of the name
        name: u32,
        /// `#Strings` offset of the culture
        culture: u32,
        /// `#Blob` offset of the hash value
        hash_value: u32,
    }
}

table_row! {
    /// Nesting of one type definition in another.
    NestedClassRaw => NestedClass {
        /// Nested `TypeDef` row
        nested_class: u32,
        /// Enclosing `TypeDef` row
        enclosing_class: u32,
    }
}

table_row! {
    /// An instantiation of a generic method.
    MethodSpecRaw => MethodSpec {
        /// Generic `MethodDef` or `MemberRef`
        method: Token,
        /// `#Blob` offset of the instantiation signature
        instantiation: u32,
    }
}

table_row! {
    /// A source document of a portable PDB.
    DocumentRaw => Document {
        /// `#Blob` offset of the encoded document name
        name: u32,
        /// `#GUID` index of the hash algorithm
        hash_algorithm: u32,
        /// `#Blob` offset of the document hash
        hash: u32,
        /// `#GUID` index of the source language
        language: u32,
    }
}

table_row! {
    /// Sequence points of one method; row `n` belongs to `MethodDef` row `n`.
    MethodDebugInformationRaw => MethodDebugInformation {
        /// `Document` row of single-document methods, 0 otherwise
        document: u32,
        /// `#Blob` offset of the sequence points, 0 for methods without
        sequence_points: u32,
    }
}

table_row! {
    /// A lexical scope of local variables and constants.
    LocalScopeRaw => LocalScope {
        /// Owning `MethodDef` row
        method: u32,
        /// `ImportScope` row
        import_scope: u32,
        /// First owned `LocalVariable` row
        variable_list: u32,
        /// First owned `LocalConstant` row
        constant_list: u32,
        /// IL offset of the first instruction in scope
        start_offset: u32,
        /// Length of the scope in IL bytes
        length: u32,
    }
}

table_row! {
    /// Links the `MoveNext` method of a compiler-generated state machine to its kickoff
    /// method.
    StateMachineMethodRaw => StateMachineMethod {
        /// `MoveNext` `MethodDef` row
        move_next: u32,
        /// Kickoff `MethodDef` row
        kickoff: u32,
    }
}
