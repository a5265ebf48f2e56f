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

//! Construction of complete module images.
//!
//! [`ModuleBuilder`] assembles heaps, tables and method bodies into a PE32 library with a
//! single `.text` section that [`crate::metadata::Module`] can load, and the portable PDB
//! belonging to it. Types are built one at a time: fields, methods and properties always
//! belong to the type started last with [`ModuleBuilder::begin_type`].
//!
//! # Image layout
//!
//! ```text
//! 0x000  DOS header, e_lfanew = 0x80
//! 0x080  PE signature, COFF header, PE32 optional header, section table
//! 0x200  .text (RVA 0x2000): CLI header, bodies, metadata, debug directory, CodeView
//! ```

use std::collections::HashMap;

use sha1::{Digest, Sha1};
use uguid::Guid;

use crate::{
    builder::MethodBodyBuilder,
    file::{
        io::WriteLe,
        pe::{
            CODEVIEW_SIGNATURE, DEBUG_DIRECTORY_ENTRY_SIZE, DEBUG_TYPE_CODEVIEW, DIRECTORY_CLR,
            DIRECTORY_DEBUG, SECTION_CODE,
        },
    },
    metadata::{
        cor20header::{Cor20Header, COMIMAGE_FLAGS_ILONLY, COR20_HEADER_SIZE},
        method::MethodBody,
        root::{
            MetadataRoot, STREAM_BLOB, STREAM_GUID, STREAM_STRINGS, STREAM_TABLES,
            STREAM_USER_STRINGS,
        },
        signatures::{
            encoders::{
                encode_field_signature, encode_method_signature, encode_method_spec_signature,
                encode_type,
            },
            SignatureField, SignatureMethod, SignatureMethodSpec, SignatureParameter,
            TypeSignature, CALLING_CONVENTION, SIGNATURE_HEADER,
        },
        streams::{Blob, GuidHeap, Strings, UserStrings},
        tables::{
            AssemblyRaw, AssemblyRefRaw, CustomAttributeRaw, FieldRaw, HeapSizes, MemberRefRaw,
            MetadataTables, MethodDefRaw, MethodSemanticsRaw, MethodSpecRaw, ModuleRaw,
            NestedClassRaw, ParamRaw, PropertyMapRaw, PropertyRaw, StandAloneSigRaw, TableId,
            TypeDefRaw, TypeRefRaw, TypeSpecRaw, SEMANTICS_GETTER, SEMANTICS_SETTER,
        },
        token::Token,
        Module,
    },
    symbols::{PortablePdb, SequencePoint, SequencePoints, LANGUAGE_CSHARP},
    Error, Result,
};

/// Encoded value of an attribute without arguments: prolog and zero named arguments.
const EMPTY_ATTRIBUTE_VALUE: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Public key token of the core library references.
const CORE_LIBRARY_TOKEN: [u8; 8] = [0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A];

/// `TypeAttributes.Interface`
const TYPE_INTERFACE: u32 = 0x0000_0020;

const PE_OFFSET: u32 = 0x80;
const IMAGE_BASE: u32 = 0x1000_0000;
const SECTION_ALIGNMENT: u32 = 0x2000;
const FILE_ALIGNMENT: u32 = 0x200;
const TEXT_RVA: u32 = 0x2000;
/// `IMAGE_FILE_EXECUTABLE_IMAGE | IMAGE_FILE_32BIT_MACHINE | IMAGE_FILE_DLL`
const IMAGE_CHARACTERISTICS: u16 = 0x2102;
/// `DYNAMIC_BASE | NX_COMPAT | NO_SEH | TERMINAL_SERVER_AWARE`
const DLL_CHARACTERISTICS: u16 = 0x8540;
/// Minor version of a debug directory entry describing a portable PDB
const PORTABLE_PDB_MINOR: u16 = 0x504D;

fn align(value: usize, alignment: u32) -> usize {
    value.div_ceil(alignment as usize) * alignment as usize
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Image exceeds 4 GiB"))
}

/// Builder for module images.
///
/// # Examples
///
/// ```rust
/// use dotweave::builder::{MethodBodyBuilder, ModuleBuilder};
/// use dotweave::metadata::signatures::{SignatureMethod, SignatureParameter, TypeSignature};
///
/// let mut builder = ModuleBuilder::new("Demo");
/// builder.begin_type("Demo", "Counter", 0x0010_0001)?;
///
/// let signature = SignatureMethod {
///     has_this: true,
///     return_type: SignatureParameter {
///         base: TypeSignature::I4,
///         ..SignatureParameter::default()
///     },
///     ..SignatureMethod::default()
/// };
/// let body = MethodBodyBuilder::new().implementation(|asm| {
///     asm.ldc_i4(42).ret();
///     Ok(())
/// });
/// builder.method("Answer", 0x0006, &signature, &[], Some(body))?;
///
/// let module = builder.build_module()?;
/// assert_eq!(module.methods()[0].full_name(), "Demo.Counter::Answer");
/// # Ok::<(), dotweave::Error>(())
/// ```
pub struct ModuleBuilder {
    name: String,
    mvid: Guid,
    strings: Strings,
    user_strings: UserStrings,
    blob: Blob,
    tables: MetadataTables,
    bodies: Vec<Option<Vec<u8>>>,
    type_refs: HashMap<(String, String), Token>,
    attribute_ctors: HashMap<Token, Token>,
    documents: Vec<String>,
    sequence_points: HashMap<u32, SequencePoints>,
}

impl ModuleBuilder {
    /// Start an empty module. The MVID and the debug id are derived from `name`, so equal
    /// names produce identical images.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let digest = Sha1::digest(name.as_bytes());
        let mut mvid = [0_u8; 16];
        mvid.copy_from_slice(&digest[..16]);

        ModuleBuilder {
            name: name.to_string(),
            mvid: Guid::from_bytes(mvid),
            strings: Strings::new(),
            user_strings: UserStrings::new(),
            blob: Blob::new(),
            tables: MetadataTables::default(),
            bodies: Vec::new(),
            type_refs: HashMap::new(),
            attribute_ctors: HashMap::new(),
            documents: Vec::new(),
            sequence_points: HashMap::new(),
        }
    }

    /// The module version id of the image being built.
    #[must_use]
    pub fn mvid(&self) -> Guid {
        self.mvid
    }

    /// Id shared by the CodeView entry of the image and its portable PDB: a 16 byte GUID
    /// followed by a 4 byte stamp.
    #[must_use]
    pub fn pdb_id(&self) -> [u8; 20] {
        let digest = Sha1::digest(format!("{}.pdb", self.name).as_bytes());
        let mut id = [0_u8; 20];
        id.copy_from_slice(&digest[..20]);
        id
    }

    fn current_type(&self) -> Result<Token> {
        // Row 1 is <Module>
        let row = self.tables.row_count(TableId::TypeDef);
        if row < 2 {
            return Err(Error::Error(
                "Members can only be added after begin_type".to_string(),
            ));
        }
        Ok(Token::from_parts(TableId::TypeDef.id(), row))
    }

    fn core_library(&mut self) -> Result<Token> {
        if self.tables.row_count(TableId::AssemblyRef) == 0 {
            let row = AssemblyRefRaw {
                major_version: 8,
                minor_version: 0,
                build_number: 0,
                revision_number: 0,
                flags: 0,
                public_key_or_token: self.blob.add(&CORE_LIBRARY_TOKEN)?,
                name: self.strings.add("System.Runtime")?,
                culture: 0,
                hash_value: 0,
            };
            self.tables.push(&row)?;
        }
        Ok(Token::from_parts(TableId::AssemblyRef.id(), 1))
    }

    /// Reference a type of the core library. Repeated references share one row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid names or a full table.
    pub fn type_ref(&mut self, namespace: &str, name: &str) -> Result<Token> {
        let key = (namespace.to_string(), name.to_string());
        if let Some(token) = self.type_refs.get(&key) {
            return Ok(*token);
        }

        let row = TypeRefRaw {
            resolution_scope: self.core_library()?,
            name: self.strings.add(name)?,
            namespace: self.strings.add(namespace)?,
        };
        let token = self.tables.push(&row)?;
        self.type_refs.insert(key, token);
        Ok(token)
    }

    /// Add a type specification such as a generic instantiation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the type cannot be encoded.
    pub fn type_spec(&mut self, signature: &TypeSignature) -> Result<Token> {
        let mut encoded = Vec::new();
        encode_type(signature, &mut encoded)?;
        let row = TypeSpecRaw {
            signature: self.blob.add(&encoded)?,
        };
        self.tables.push(&row)
    }

    /// Reference a method of `class`, which may be a `TypeRef`, `TypeDef` or `TypeSpec`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the signature cannot be encoded.
    pub fn member_ref(
        &mut self,
        class: Token,
        name: &str,
        signature: &SignatureMethod,
    ) -> Result<Token> {
        let row = MemberRefRaw {
            class,
            name: self.strings.add(name)?,
            signature: self.blob.add(&encode_method_signature(signature)?)?,
        };
        self.tables.push(&row)
    }

    /// Instantiate the generic method `method` with `generic_args`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an argument cannot be encoded.
    pub fn method_spec(
        &mut self,
        method: Token,
        generic_args: Vec<TypeSignature>,
    ) -> Result<Token> {
        let instantiation = encode_method_spec_signature(&SignatureMethodSpec { generic_args })?;
        let row = MethodSpecRaw {
            method,
            instantiation: self.blob.add(&instantiation)?,
        };
        self.tables.push(&row)
    }

    /// Add a string literal for `ldstr`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is full.
    pub fn user_string(&mut self, value: &str) -> Result<Token> {
        let offset = self.user_strings.add(value)?;
        if offset > 0x00FF_FFFF {
            return Err(malformed_error!("#US heap exceeds token range"));
        }
        Ok(Token::from_parts(0x70, offset))
    }

    /// Add a standalone signature, e.g. a local variable signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob heap or the table is full.
    pub fn standalone_signature(&mut self, signature: &[u8]) -> Result<Token> {
        let row = StandAloneSigRaw {
            signature: self.blob.add(signature)?,
        };
        self.tables.push(&row)
    }

    fn push_type(&mut self, namespace: &str, name: &str, flags: u32) -> Result<Token> {
        if self.tables.row_count(TableId::TypeDef) == 0 {
            let module_type = TypeDefRaw {
                flags: 0,
                name: self.strings.add("<Module>")?,
                namespace: 0,
                extends: Token::new(0),
                field_list: 1,
                method_list: 1,
            };
            self.tables.push(&module_type)?;
        }

        let extends = if flags & TYPE_INTERFACE == 0 {
            self.type_ref("System", "Object")?
        } else {
            Token::new(0)
        };
        let row = TypeDefRaw {
            flags,
            name: self.strings.add(name)?,
            namespace: self.strings.add(namespace)?,
            extends,
            field_list: self.tables.row_count(TableId::Field) + 1,
            method_list: self.tables.row_count(TableId::MethodDef) + 1,
        };
        self.tables.push(&row)
    }

    /// Start a new type. Members added afterwards belong to it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid names or a full table.
    pub fn begin_type(&mut self, namespace: &str, name: &str, flags: u32) -> Result<Token> {
        self.push_type(namespace, name, flags)
    }

    /// Start a new type nested in `enclosing`. Members added afterwards belong to it.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if `enclosing` is not a type of this module,
    /// and [`crate::Error::Malformed`] for invalid names or a full table.
    pub fn begin_nested_type(&mut self, enclosing: Token, name: &str, flags: u32) -> Result<Token> {
        if enclosing.table() != TableId::TypeDef.id()
            || enclosing.row() < 2
            || enclosing.row() > self.tables.row_count(TableId::TypeDef)
        {
            return Err(Error::InvalidToken(enclosing));
        }

        let nested = self.push_type("", name, flags)?;
        self.tables.push(&NestedClassRaw {
            nested_class: nested.row(),
            enclosing_class: enclosing.row(),
        })?;
        Ok(nested)
    }

    /// Add a field to the current type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] before the first type, and
    /// [`crate::Error::Malformed`] if the field type cannot be encoded.
    pub fn field(&mut self, name: &str, flags: u16, field_type: &TypeSignature) -> Result<Token> {
        self.current_type()?;
        let signature = encode_field_signature(&SignatureField {
            modifiers: Vec::new(),
            base: field_type.clone(),
        })?;

        let row = FieldRaw {
            flags,
            name: self.strings.add(name)?,
            signature: self.blob.add(&signature)?,
        };
        self.tables.push(&row)
    }

    /// Add a method to the current type. `params` names the parameters in order; missing
    /// names stay unnamed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] before the first type, and body or signature
    /// encoding errors.
    pub fn method(
        &mut self,
        name: &str,
        flags: u16,
        signature: &SignatureMethod,
        params: &[&str],
        body: Option<MethodBodyBuilder>,
    ) -> Result<Token> {
        self.current_type()?;
        let body = body.map(|body| body.build(self)).transpose()?;

        let param_list = self.tables.row_count(TableId::Param) + 1;
        for (index, param) in params.iter().enumerate() {
            let sequence = u16::try_from(index + 1)
                .map_err(|_| malformed_error!("Too many parameters - {}", params.len()))?;
            let row = ParamRaw {
                flags: 0,
                sequence,
                name: self.strings.add(param)?,
            };
            self.tables.push(&row)?;
        }

        let row = MethodDefRaw {
            rva: 0,
            impl_flags: 0,
            flags,
            name: self.strings.add(name)?,
            signature: self.blob.add(&encode_method_signature(signature)?)?,
            param_list,
        };
        let token = self.tables.push(&row)?;
        self.bodies.push(body);
        Ok(token)
    }

    /// Add an instance property of the current type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] before the first type, and
    /// [`crate::Error::Malformed`] if the property type cannot be encoded.
    pub fn property(
        &mut self,
        name: &str,
        property_type: &TypeSignature,
        getter: Option<Token>,
        setter: Option<Token>,
    ) -> Result<Token> {
        let parent = self.current_type()?;

        let mut signature = vec![SIGNATURE_HEADER::PROPERTY | CALLING_CONVENTION::HASTHIS, 0];
        encode_type(property_type, &mut signature)?;

        let maps = self.tables.row_count(TableId::PropertyMap);
        let mapped = maps > 0 && self.tables.get::<PropertyMapRaw>(maps)?.parent == parent.row();
        if !mapped {
            self.tables.push(&PropertyMapRaw {
                parent: parent.row(),
                property_list: self.tables.row_count(TableId::Property) + 1,
            })?;
        }

        let row = PropertyRaw {
            flags: 0,
            name: self.strings.add(name)?,
            signature: self.blob.add(&signature)?,
        };
        let property = self.tables.push(&row)?;

        for (semantics, accessor) in [(SEMANTICS_GETTER, getter), (SEMANTICS_SETTER, setter)] {
            let Some(accessor) = accessor else {
                continue;
            };
            if accessor.table() != TableId::MethodDef.id() {
                return Err(Error::InvalidToken(accessor));
            }
            self.tables.push(&MethodSemanticsRaw {
                semantics,
                method: accessor.row(),
                association: property,
            })?;
        }

        Ok(property)
    }

    /// Apply the attribute with constructor `constructor` to `parent`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob heap is full.
    pub fn custom_attribute(&mut self, parent: Token, constructor: Token) -> Result<()> {
        let row = CustomAttributeRaw {
            parent,
            constructor,
            value: self.blob.add(&EMPTY_ATTRIBUTE_VALUE)?,
        };
        self.tables.push(&row)?;
        Ok(())
    }

    /// Apply the parameterless attribute `namespace.name` to `parent`, referencing the
    /// attribute type from another module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid names or full tables.
    pub fn attribute(&mut self, parent: Token, namespace: &str, name: &str) -> Result<()> {
        let attribute_type = self.type_ref(namespace, name)?;
        let constructor = match self.attribute_ctors.get(&attribute_type) {
            Some(constructor) => *constructor,
            None => {
                let signature = SignatureMethod {
                    has_this: true,
                    return_type: SignatureParameter {
                        base: TypeSignature::Void,
                        ..SignatureParameter::default()
                    },
                    ..SignatureMethod::default()
                };
                let constructor = self.member_ref(attribute_type, ".ctor", &signature)?;
                self.attribute_ctors.insert(attribute_type, constructor);
                constructor
            }
        };
        self.custom_attribute(parent, constructor)
    }

    /// Register a source document for sequence points, returning its `Document` row.
    pub fn document(&mut self, name: &str) -> u32 {
        let index = match self.documents.iter().position(|document| document == name) {
            Some(index) => index,
            None => {
                self.documents.push(name.to_string());
                self.documents.len() - 1
            }
        };
        // Documents are few
        #[allow(clippy::cast_possible_truncation)]
        let row = index as u32 + 1;
        row
    }

    /// Attach sequence points to `method`; they end up in [`ModuleBuilder::build_symbols`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if `method` is not a method of this module.
    pub fn sequence_points(&mut self, method: Token, points: &[SequencePoint]) -> Result<()> {
        if method.table() != TableId::MethodDef.id()
            || method.row() == 0
            || method.row() > self.tables.row_count(TableId::MethodDef)
        {
            return Err(Error::InvalidToken(method));
        }
        self.sequence_points
            .insert(method.row(), SequencePoints(points.to_vec()));
        Ok(())
    }

    /// Tables and heaps with the module and assembly rows added and the keyed tables sorted.
    fn finish(&self) -> Result<(MetadataTables, Strings, GuidHeap)> {
        let mut tables = self.tables.clone();
        let mut strings = self.strings.clone();
        let mut guids = GuidHeap::new();

        tables.push(&ModuleRaw {
            generation: 0,
            name: strings.add(&format!("{}.dll", self.name))?,
            mvid: guids.add(self.mvid)?,
            enc_id: 0,
            enc_base_id: 0,
        })?;
        tables.push(&AssemblyRaw {
            hash_algorithm: 0x8004,
            major_version: 1,
            minor_version: 0,
            build_number: 0,
            revision_number: 0,
            flags: 0,
            public_key: 0,
            name: strings.add(&self.name)?,
            culture: 0,
        })?;

        tables.sort_by_column(TableId::CustomAttribute, 0);
        tables.sort_by_column(TableId::MethodSemantics, 2);
        tables.sort_by_column(TableId::NestedClass, 0);
        Ok((tables, strings, guids))
    }

    /// Serialize the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the image exceeds the format limits.
    pub fn build(&self) -> Result<Vec<u8>> {
        let (mut tables, strings, guids) = self.finish()?;

        let mut text = vec![0_u8; COR20_HEADER_SIZE];
        for (index, body) in self.bodies.iter().enumerate() {
            let Some(body) = body else {
                continue;
            };

            text.resize(align(text.len(), 4), 0);
            let row = to_u32(index + 1)?;
            let mut raw = tables.get::<MethodDefRaw>(row)?;
            raw.rva = TEXT_RVA + to_u32(text.len())?;
            tables.set(row, &raw)?;
            text.extend_from_slice(body);
        }

        let heap_sizes =
            HeapSizes::for_heaps(strings.data().len(), guids.len(), self.blob.data().len());
        let mut root = MetadataRoot::default();
        root.set_stream(STREAM_TABLES, tables.write(heap_sizes, None)?);
        root.set_stream(STREAM_STRINGS, strings.data().to_vec());
        root.set_stream(STREAM_USER_STRINGS, self.user_strings.data().to_vec());
        root.set_stream(STREAM_GUID, guids.data().to_vec());
        root.set_stream(STREAM_BLOB, self.blob.data().to_vec());
        let metadata = root.write()?;

        text.resize(align(text.len(), 4), 0);
        let cor20 = Cor20Header {
            cb: to_u32(COR20_HEADER_SIZE)?,
            major_runtime_version: 2,
            minor_runtime_version: 5,
            meta_data_rva: TEXT_RVA + to_u32(text.len())?,
            meta_data_size: to_u32(metadata.len())?,
            flags: COMIMAGE_FLAGS_ILONLY,
            ..Cor20Header::default()
        };
        text[..COR20_HEADER_SIZE].copy_from_slice(&cor20.write());
        text.extend_from_slice(&metadata);

        let id = self.pdb_id();
        let stamp = u32::from_le_bytes([id[16], id[17], id[18], id[19]]);
        let mut codeview = Vec::new();
        codeview.write_le(CODEVIEW_SIGNATURE);
        codeview.extend_from_slice(&id[..16]);
        codeview.write_le(1_u32);
        codeview.extend_from_slice(format!("{}.pdb", self.name).as_bytes());
        codeview.push(0);

        text.resize(align(text.len(), 4), 0);
        let debug_offset = text.len();
        let record_offset = debug_offset + DEBUG_DIRECTORY_ENTRY_SIZE;
        text.write_le(0_u32);
        text.write_le(stamp);
        text.write_le(0x0100_u16);
        text.write_le(PORTABLE_PDB_MINOR);
        text.write_le(DEBUG_TYPE_CODEVIEW);
        text.write_le(to_u32(codeview.len())?);
        text.write_le(TEXT_RVA + to_u32(record_offset)?);
        text.write_le(FILE_ALIGNMENT + to_u32(record_offset)?);
        text.extend_from_slice(&codeview);

        let raw_size = align(text.len(), FILE_ALIGNMENT);
        let size_of_image = align(TEXT_RVA as usize + text.len(), SECTION_ALIGNMENT);

        let mut out = Vec::with_capacity(FILE_ALIGNMENT as usize + raw_size);
        out.extend_from_slice(b"MZ");
        out.resize(0x3C, 0);
        out.write_le(PE_OFFSET);
        out.resize(PE_OFFSET as usize, 0);
        out.extend_from_slice(b"PE\0\0");

        // COFF header
        out.write_le(0x014C_u16);
        out.write_le(1_u16);
        out.write_le(stamp);
        out.write_le(0_u32);
        out.write_le(0_u32);
        out.write_le(0x00E0_u16);
        out.write_le(IMAGE_CHARACTERISTICS);

        // Optional header, standard fields
        out.write_le(0x010B_u16);
        out.write_le(48_u8);
        out.write_le(0_u8);
        out.write_le(to_u32(raw_size)?);
        out.write_le(0_u32);
        out.write_le(0_u32);
        out.write_le(0_u32);
        out.write_le(TEXT_RVA);
        out.write_le(0_u32);

        // Windows fields
        out.write_le(IMAGE_BASE);
        out.write_le(SECTION_ALIGNMENT);
        out.write_le(FILE_ALIGNMENT);
        for version in [4_u16, 0, 0, 0, 4, 0] {
            out.write_le(version);
        }
        out.write_le(0_u32);
        out.write_le(to_u32(size_of_image)?);
        out.write_le(FILE_ALIGNMENT);
        out.write_le(0_u32);
        out.write_le(3_u16);
        out.write_le(DLL_CHARACTERISTICS);
        for size in [0x0010_0000_u32, 0x1000, 0x0010_0000, 0x1000] {
            out.write_le(size);
        }
        out.write_le(0_u32);
        out.write_le(16_u32);
        for index in 0..16 {
            let (rva, size) = match index {
                DIRECTORY_DEBUG => (
                    TEXT_RVA + to_u32(debug_offset)?,
                    to_u32(DEBUG_DIRECTORY_ENTRY_SIZE)?,
                ),
                DIRECTORY_CLR => (TEXT_RVA, to_u32(COR20_HEADER_SIZE)?),
                _ => (0, 0),
            };
            out.write_le(rva);
            out.write_le(size);
        }

        let mut name = [0_u8; 8];
        name[..5].copy_from_slice(b".text");
        out.extend_from_slice(&name);
        out.write_le(to_u32(text.len())?);
        out.write_le(TEXT_RVA);
        out.write_le(to_u32(raw_size)?);
        out.write_le(FILE_ALIGNMENT);
        out.write_le(0_u32);
        out.write_le(0_u32);
        out.write_le(0_u16);
        out.write_le(0_u16);
        out.write_le(SECTION_CODE);

        out.resize(FILE_ALIGNMENT as usize, 0);
        out.extend_from_slice(&text);
        out.resize(FILE_ALIGNMENT as usize + raw_size, 0);
        Ok(out)
    }

    /// The portable PDB of the image [`ModuleBuilder::build`] produces, with one
    /// `MethodDebugInformation` row per method and a local scope over every method that has
    /// sequence points.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for sequence points that cannot be encoded.
    pub fn build_symbols(&self) -> Result<PortablePdb> {
        let (tables, _, _) = self.finish()?;
        let mut pdb = PortablePdb::new(self.pdb_id(), &tables.row_counts());
        for document in &self.documents {
            pdb.add_document(document, LANGUAGE_CSHARP)?;
        }

        let none = SequencePoints::default();
        for (index, body) in self.bodies.iter().enumerate() {
            let row = to_u32(index + 1)?;
            let points = self.sequence_points.get(&row).unwrap_or(&none);
            let (local_signature, code_size) = match body {
                Some(body) => {
                    let header = MethodBody::from(body)?;
                    (header.local_var_sig_token & 0x00FF_FFFF, header.size_code)
                }
                None => (0, 0),
            };

            pdb.push_method(points, local_signature)?;
            if !points.0.is_empty() {
                pdb.push_scope(row, 0, to_u32(code_size)?)?;
            }
        }

        Ok(pdb)
    }

    /// Serialize the image and load it.
    ///
    /// # Errors
    /// Returns serialization and loading errors.
    pub fn build_module(&self) -> Result<Module> {
        Module::from_bytes(&self.build()?)
    }
}
