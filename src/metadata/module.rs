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

//! The owned object model of a loaded module.
//!
//! [`Module`] is read from a PE image into owned heaps, tables and definition records, can be
//! edited in memory, and is serialized back into a PE image by [`Module::to_bytes`]. Nothing
//! borrows from the input buffer, so the input file can be overwritten with the result.
//!
//! Writing never moves existing bytes. Changed method bodies and the re-serialized metadata
//! go into a new `.weave` section, and the CLI header and `MethodDef` RVAs are redirected to
//! them. Unchanged bodies, resources, native code and the debug directory stay where the
//! compiler put them.
//!
//! # Key Components
//!
//! - [`Module`] - Heaps, tables, definitions and the optional portable PDB
//! - [`TypeDefinition`] - A type with its methods and properties
//! - [`MethodDefinition`] - A method with flags, signature, tags and raw body
//! - [`PropertyDefinition`] - A property with its accessors
//! - [`Tags`] - Declarative markers resolved from custom attributes
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotweave::metadata::Module;
//! use std::path::Path;
//!
//! let module = Module::from_file(Path::new("Target.dll"))?;
//! for ty in module.types() {
//!     println!("{} ({} methods)", ty.full_name(), ty.methods.len());
//! }
//! # Ok::<(), dotweave::Error>(())
//! ```

use std::{ops::Range, path::Path};

use bitflags::bitflags;
use uguid::Guid;

use crate::{
    file::{
        pe::{PeImage, DIRECTORY_CLR, SECTION_READ_DATA},
        write_atomic, File,
    },
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        method::{MethodAccessFlags, MethodBody, MethodModifiers},
        root::{
            MetadataRoot, STREAM_BLOB, STREAM_GUID, STREAM_STRINGS, STREAM_TABLES,
            STREAM_USER_STRINGS,
        },
        signatures::{SignatureMethod, SignatureParser, TypeSignature},
        streams::{Blob, GuidHeap, Strings, UserStrings},
        tables::{
            CustomAttributeRaw, HeapSizes, MemberRefRaw, MetadataTables, MethodDefRaw,
            MethodSemanticsRaw, MethodSpecRaw, ModuleRaw, NestedClassRaw, ParamRaw,
            PropertyMapRaw, PropertyRaw, StandAloneSigRaw, TableId, TypeDefRaw, TypeRefRaw,
            TypeSpecRaw, SEMANTICS_GETTER, SEMANTICS_SETTER,
        },
        token::Token,
    },
    symbols::PortablePdb,
    Error::InvalidToken,
    Result,
};

/// Name of the section holding relocated bodies and metadata.
pub const WEAVE_SECTION: &str = ".weave";

/// `MethodImplAttributes.CodeTypeMask`; anything but IL has no CIL body.
const CODE_TYPE_MASK: u16 = 0x0003;

/// Enclosing `TypeRef` chains deeper than this are treated as cycles.
const MAX_NESTING: usize = 64;

bitflags! {
    /// Declarative markers attached to methods and properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Tags: u8 {
        /// The method checks the class invariants of its type
        const INVARIANT_METHOD = 0x01;
        /// The member has no observable side effects
        const PURE = 0x02;
    }
}

/// A type defined in the module.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    /// `TypeDef` token
    pub token: Token,
    /// `TypeAttributes`
    pub flags: u32,
    /// Namespace, empty for the global namespace and nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Index of the enclosing type in [`Module::types`]
    pub enclosing: Option<usize>,
    /// Indices into [`Module::methods`], in row order
    pub methods: Vec<usize>,
    /// Indices into [`Module::properties`], in row order
    pub properties: Vec<usize>,
    full_name: String,
}

impl TypeDefinition {
    /// `Namespace.Name`, with nested types as `Namespace.Outer/Inner`.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

/// A property defined in the module.
#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    /// `Property` token
    pub token: Token,
    /// Property name
    pub name: String,
    /// Index of the owning type in [`Module::types`]
    pub declaring_type: usize,
    /// Index of the getter in [`Module::methods`]
    pub getter: Option<usize>,
    /// Index of the setter in [`Module::methods`]
    pub setter: Option<usize>,
    /// Full names of the attribute types applied to the property
    pub attributes: Vec<String>,
    /// Resolved markers
    pub tags: Tags,
}

/// A method defined in the module.
#[derive(Debug, Clone)]
pub struct MethodDefinition {
    /// `MethodDef` token
    pub token: Token,
    /// Method name
    pub name: String,
    /// Index of the owning type in [`Module::types`]
    pub declaring_type: usize,
    /// `MethodAttributes`
    pub flags: u16,
    /// `MethodImplAttributes`
    pub impl_flags: u16,
    /// Parsed signature
    pub signature: SignatureMethod,
    /// Raw signature blob
    pub signature_blob: Vec<u8>,
    /// Parameter names by position, empty where the module has no `Param` row
    pub params: Vec<String>,
    /// Index of the property this method is an accessor of
    pub property: Option<usize>,
    /// Full names of the attribute types applied to the method
    pub attributes: Vec<String>,
    /// Resolved markers
    pub tags: Tags,
    /// Complete encoded body (header, code, data sections), `None` for abstract,
    /// runtime-provided and native methods
    pub body: Option<Vec<u8>>,
    /// RVA of the body as loaded, 0 for methods without one
    rva: u32,
    /// Length of the body as loaded
    loaded_len: usize,
    full_name: String,
}

impl MethodDefinition {
    /// `Namespace.Type::Method`
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Member access of the method.
    #[must_use]
    pub fn access(&self) -> MethodAccessFlags {
        MethodAccessFlags::from_method_flags(self.flags)
    }

    /// Modifier flags of the method.
    #[must_use]
    pub fn modifiers(&self) -> MethodModifiers {
        MethodModifiers::from_method_flags(self.flags)
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers().contains(MethodModifiers::STATIC)
    }

    /// Returns `true` for publicly accessible methods.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access() == MethodAccessFlags::PUBLIC
    }

    /// Returns `true` for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        !self.is_static()
            && self.name == ".ctor"
            && self.modifiers().contains(MethodModifiers::RTSPECIAL_NAME)
    }

    /// Returns `true` if the method has a body.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Returns `true` when the method does not produce a value.
    #[must_use]
    pub fn returns_void(&self) -> bool {
        self.signature.returns_void()
    }

    /// Number of declared parameters, `this` excluded.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.signature.params.len()
    }

    /// Parse the header of the body.
    ///
    /// # Errors
    /// Returns an error if the stored body is malformed.
    pub fn body_header(&self) -> Result<Option<MethodBody>> {
        self.body.as_deref().map(MethodBody::from).transpose()
    }
}

/// Declaring type and name of a called method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    /// Full name of the declaring type, `None` when the parent is not a named type
    pub declaring_type: Option<String>,
    /// Method name
    pub name: String,
}

/// A loaded module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Module version id from the `Module` row
    pub mvid: Guid,
    /// CLI header
    pub cor20: Cor20Header,
    /// `#Strings` heap
    pub strings: Strings,
    /// `#US` heap
    pub user_strings: UserStrings,
    /// `#Blob` heap
    pub blob: Blob,
    /// `#GUID` heap
    pub guids: GuidHeap,
    /// Metadata tables
    pub tables: MetadataTables,
    /// Types in `TypeDef` row order
    pub types: Vec<TypeDefinition>,
    /// Methods in `MethodDef` row order
    pub methods: Vec<MethodDefinition>,
    /// Properties in `Property` row order
    pub properties: Vec<PropertyDefinition>,
    /// Portable PDB loaded alongside the module
    pub symbols: Option<PortablePdb>,
    pe: PeImage,
    root: MetadataRoot,
    data: Vec<u8>,
}

fn qualified_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

/// Rows owned by a list column: from `start` up to the next owner's list, 1-based.
fn list_range(start: u32, next: Option<u32>, len: usize) -> Range<usize> {
    let begin = (start.max(1) - 1) as usize;
    let end = next.map_or(len, |next| (next.max(1) - 1) as usize).min(len);
    begin.min(end)..end
}

/// Zero-based row index of `token` in `table`.
fn row_index(token: Token, table: TableId, rows: usize) -> Result<usize> {
    let row = token.row() as usize;
    if token.table() != table.id() || row == 0 || row > rows {
        return Err(InvalidToken(token));
    }
    Ok(row - 1)
}

fn token_of(table: TableId, index: usize) -> Token {
    // Row ids are 24 bits, enforced when tables are read
    #[allow(clippy::cast_possible_truncation)]
    let row = index as u32 + 1;
    Token::from_parts(table.id(), row)
}

/// Full names of all types, following `NestedClass` to their enclosing types.
fn type_names(types: &mut [TypeDefinition], nesting: &[NestedClassRaw]) -> Result<()> {
    for nested in nesting {
        let inner = row_index(
            Token::from_parts(TableId::TypeDef.id(), nested.nested_class),
            TableId::TypeDef,
            types.len(),
        )?;
        let outer = row_index(
            Token::from_parts(TableId::TypeDef.id(), nested.enclosing_class),
            TableId::TypeDef,
            types.len(),
        )?;
        types[inner].enclosing = Some(outer);
    }

    for index in 0..types.len() {
        let mut name = qualified_name(&types[index].namespace, &types[index].name);
        let mut current = types[index].enclosing;
        let mut depth = 0;
        while let Some(outer) = current {
            depth += 1;
            if depth > MAX_NESTING {
                return Err(malformed_error!(
                    "NestedClass cycle through {}",
                    types[index].name
                ));
            }
            name = format!(
                "{}/{}",
                qualified_name(&types[outer].namespace, &types[outer].name),
                name
            );
            current = types[outer].enclosing;
        }
        types[index].full_name = name;
    }

    Ok(())
}

impl Module {
    /// Load a module from disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if the file does not exist, and any parsing error
    /// of [`Module::from_bytes`].
    pub fn from_file(path: &Path) -> Result<Module> {
        let file = File::from_file(path)?;
        Module::from_bytes(file.data())
    }

    /// Load a module from an owned buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for an empty buffer and any parsing error of
    /// [`Module::from_bytes`].
    pub fn from_mem(data: Vec<u8>) -> Result<Module> {
        let file = File::from_mem(data)?;
        Module::from_bytes(file.data())
    }

    /// Parse a PE image into an owned module.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for files that are not .NET modules,
    /// [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged images and
    /// [`crate::Error::InvalidToken`] for references to rows that do not exist.
    pub fn from_bytes(data: &[u8]) -> Result<Module> {
        let pe = PeImage::parse(data)?;
        let (clr_rva, _) = pe.directory(DIRECTORY_CLR);
        let cor20 = Cor20Header::read(pe.slice_at(data, clr_rva, COR20_HEADER_SIZE)?)?;
        let root = MetadataRoot::read(pe.slice_at(
            data,
            cor20.meta_data_rva,
            cor20.meta_data_size as usize,
        )?)?;

        let strings = match root.stream(STREAM_STRINGS) {
            Some(heap) => Strings::from(heap)?,
            None => Strings::new(),
        };
        let user_strings = match root.stream(STREAM_USER_STRINGS) {
            Some(heap) => UserStrings::from(heap)?,
            None => UserStrings::new(),
        };
        let blob = match root.stream(STREAM_BLOB) {
            Some(heap) => Blob::from(heap)?,
            None => Blob::new(),
        };
        let guids = root.stream(STREAM_GUID).map(GuidHeap::from).unwrap_or_default();
        let tables = MetadataTables::read(
            root.stream(STREAM_TABLES)
                .ok_or_else(|| malformed_error!("Metadata has no #~ stream"))?,
            None,
        )?;

        let mvid = guids.get(tables.get::<ModuleRaw>(1)?.mvid)?;

        let method_rows = tables.rows::<MethodDefRaw>()?;
        let param_rows = tables.rows::<ParamRaw>()?;
        let mut methods = Vec::with_capacity(method_rows.len());
        for (index, row) in method_rows.iter().enumerate() {
            let signature_blob = blob.get(row.signature)?.to_vec();
            let signature = SignatureParser::new(&signature_blob).parse_method_signature()?;

            let body = if row.rva == 0 || row.impl_flags & CODE_TYPE_MASK != 0 {
                None
            } else {
                let start = pe.tail_at(data, row.rva)?;
                let header = MethodBody::from(start)?;
                Some(start[..header.size_total].to_vec())
            };

            let next = method_rows.get(index + 1).map(|row| row.param_list);
            let mut params = vec![String::new(); signature.params.len()];
            for param in &param_rows[list_range(row.param_list, next, param_rows.len())] {
                let slot = usize::from(param.sequence);
                if slot > 0 && slot <= params.len() {
                    params[slot - 1] = strings.get(param.name)?.to_string();
                }
            }

            methods.push(MethodDefinition {
                token: token_of(TableId::MethodDef, index),
                name: strings.get(row.name)?.to_string(),
                declaring_type: 0,
                flags: row.flags,
                impl_flags: row.impl_flags,
                signature,
                signature_blob,
                params,
                property: None,
                attributes: Vec::new(),
                tags: Tags::empty(),
                loaded_len: body.as_ref().map_or(0, Vec::len),
                rva: row.rva,
                body,
                full_name: String::new(),
            });
        }

        let type_rows = tables.rows::<TypeDefRaw>()?;
        let mut types = Vec::with_capacity(type_rows.len());
        for (index, row) in type_rows.iter().enumerate() {
            let next = type_rows.get(index + 1).map(|row| row.method_list);
            types.push(TypeDefinition {
                token: token_of(TableId::TypeDef, index),
                flags: row.flags,
                namespace: strings.get(row.namespace)?.to_string(),
                name: strings.get(row.name)?.to_string(),
                enclosing: None,
                methods: list_range(row.method_list, next, methods.len()).collect(),
                properties: Vec::new(),
                full_name: String::new(),
            });
        }
        type_names(&mut types, &tables.rows::<NestedClassRaw>()?)?;

        for (index, ty) in types.iter().enumerate() {
            for method_index in &ty.methods {
                let method = &mut methods[*method_index];
                method.declaring_type = index;
                method.full_name = format!("{}::{}", ty.full_name, method.name);
            }
        }

        let property_rows = tables.rows::<PropertyRaw>()?;
        let mut properties = Vec::with_capacity(property_rows.len());
        let maps = tables.rows::<PropertyMapRaw>()?;
        let mut owners = vec![None; property_rows.len()];
        for (index, map) in maps.iter().enumerate() {
            let parent = row_index(
                Token::from_parts(TableId::TypeDef.id(), map.parent),
                TableId::TypeDef,
                types.len(),
            )?;
            let next = maps.get(index + 1).map(|map| map.property_list);
            for property in list_range(map.property_list, next, property_rows.len()) {
                owners[property] = Some(parent);
            }
        }

        for (index, row) in property_rows.iter().enumerate() {
            let token = token_of(TableId::Property, index);
            let declaring_type = owners[index].ok_or(InvalidToken(token))?;
            types[declaring_type].properties.push(index);

            properties.push(PropertyDefinition {
                token,
                name: strings.get(row.name)?.to_string(),
                declaring_type,
                getter: None,
                setter: None,
                attributes: Vec::new(),
                tags: Tags::empty(),
            });
        }

        for semantics in tables.rows::<MethodSemanticsRaw>()? {
            if semantics.association.table() != TableId::Property.id() {
                continue;
            }

            let property = row_index(semantics.association, TableId::Property, properties.len())?;
            let method = row_index(
                Token::from_parts(TableId::MethodDef.id(), semantics.method),
                TableId::MethodDef,
                methods.len(),
            )?;

            if semantics.semantics & SEMANTICS_GETTER != 0 {
                properties[property].getter = Some(method);
            } else if semantics.semantics & SEMANTICS_SETTER != 0 {
                properties[property].setter = Some(method);
            } else {
                continue;
            }
            methods[method].property = Some(property);
        }

        let mut module = Module {
            mvid,
            cor20,
            strings,
            user_strings,
            blob,
            guids,
            tables,
            types,
            methods,
            properties,
            symbols: None,
            pe,
            root,
            data: data.to_vec(),
        };
        module.resolve_attributes()?;

        Ok(module)
    }

    fn resolve_attributes(&mut self) -> Result<()> {
        for row in self.tables.rows::<CustomAttributeRaw>()? {
            let Some(attribute) = self.method_ref(row.constructor)?.declaring_type else {
                continue;
            };

            if row.parent.table() == TableId::MethodDef.id() {
                let method = row_index(row.parent, TableId::MethodDef, self.methods.len())?;
                self.methods[method].attributes.push(attribute);
            } else if row.parent.table() == TableId::Property.id() {
                let property = row_index(row.parent, TableId::Property, self.properties.len())?;
                self.properties[property].attributes.push(attribute);
            }
        }

        Ok(())
    }

    /// Types in row order.
    #[must_use]
    pub fn types(&self) -> &[TypeDefinition] {
        &self.types
    }

    /// Methods in row order.
    #[must_use]
    pub fn methods(&self) -> &[MethodDefinition] {
        &self.methods
    }

    /// PE headers of the loaded image.
    #[must_use]
    pub fn pe(&self) -> &PeImage {
        &self.pe
    }

    /// The image bytes the module was loaded from.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The method with the given `MethodDef` token.
    #[must_use]
    pub fn method_by_token(&self, token: Token) -> Option<&MethodDefinition> {
        row_index(token, TableId::MethodDef, self.methods.len())
            .ok()
            .map(|index| &self.methods[index])
    }

    /// The type with the given full name.
    #[must_use]
    pub fn type_by_name(&self, full_name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|ty| ty.full_name == full_name)
    }

    /// Resolve the markers of every method and property with `resolve`.
    pub fn tag_with(&mut self, resolve: impl Fn(&[String]) -> Tags) {
        for method in &mut self.methods {
            method.tags = resolve(&method.attributes);
        }
        for property in &mut self.properties {
            property.tags = resolve(&property.attributes);
        }
    }

    fn type_ref_name(&self, token: Token, depth: usize) -> Result<String> {
        if depth > MAX_NESTING {
            return Err(malformed_error!("TypeRef scope cycle through {}", token));
        }

        let row = self.tables.get::<TypeRefRaw>(token.row())?;
        let name = qualified_name(self.strings.get(row.namespace)?, self.strings.get(row.name)?);
        if row.resolution_scope.table() == TableId::TypeRef.id() && !row.resolution_scope.is_null()
        {
            let outer = self.type_ref_name(row.resolution_scope, depth + 1)?;
            return Ok(format!("{outer}/{name}"));
        }
        Ok(name)
    }

    /// Full name of the type referenced by a `TypeDef`, `TypeRef` or `TypeSpec` token.
    ///
    /// Type specifications resolve to their generic type definition; other specifications
    /// (arrays, pointers, generic parameters) do not name a type and yield `None`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] for tokens of other tables or missing rows.
    pub fn type_name(&self, token: Token) -> Result<Option<String>> {
        match TableId::from_repr(token.table()) {
            Some(TableId::TypeDef) => {
                let index = row_index(token, TableId::TypeDef, self.types.len())?;
                Ok(Some(self.types[index].full_name.clone()))
            }
            Some(TableId::TypeRef) => self.type_ref_name(token, 0).map(Some),
            Some(TableId::TypeSpec) => {
                let row = self.tables.get::<TypeSpecRaw>(token.row())?;
                let signature = SignatureParser::new(self.blob.get(row.signature)?)
                    .parse_type_spec_signature()?;

                match signature {
                    TypeSignature::GenericInst(base, _) => match *base {
                        TypeSignature::Class(inner) | TypeSignature::ValueType(inner) => {
                            self.type_name(inner)
                        }
                        _ => Ok(None),
                    },
                    TypeSignature::Class(inner) | TypeSignature::ValueType(inner) => {
                        self.type_name(inner)
                    }
                    _ => Ok(None),
                }
            }
            _ => Err(InvalidToken(token)),
        }
    }

    /// Declaring type and name of the method referenced by a `MethodDef`, `MemberRef` or
    /// `MethodSpec` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] for tokens of other tables or missing rows.
    pub fn method_ref(&self, token: Token) -> Result<MethodRef> {
        match TableId::from_repr(token.table()) {
            Some(TableId::MethodDef) => {
                let index = row_index(token, TableId::MethodDef, self.methods.len())?;
                let method = &self.methods[index];
                Ok(MethodRef {
                    declaring_type: Some(
                        self.types
                            .get(method.declaring_type)
                            .map_or_else(String::new, |ty| ty.full_name.clone()),
                    ),
                    name: method.name.clone(),
                })
            }
            Some(TableId::MemberRef) => {
                let row = self.tables.get::<MemberRefRaw>(token.row())?;
                let declaring_type = if row.class.table() == TableId::MethodDef.id() {
                    self.method_ref(row.class)?.declaring_type
                } else if row.class.table() == TableId::ModuleRef.id() {
                    None
                } else {
                    self.type_name(row.class)?
                };

                Ok(MethodRef {
                    declaring_type,
                    name: self.strings.get(row.name)?.to_string(),
                })
            }
            Some(TableId::MethodSpec) => {
                let method = self.tables.get::<MethodSpecRaw>(token.row())?.method;
                if method.table() == TableId::MethodSpec.id() {
                    return Err(InvalidToken(token));
                }
                self.method_ref(method)
            }
            _ => Err(InvalidToken(token)),
        }
    }

    /// The `LocalVarSig` blob referenced by a `StandAloneSig` token, `None` for token 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if the row does not exist.
    pub fn local_signature(&self, token: u32) -> Result<Option<&[u8]>> {
        if token == 0 {
            return Ok(None);
        }

        let token = Token::new(token);
        if token.table() != TableId::StandAloneSig.id() {
            return Err(InvalidToken(token));
        }
        let row = self.tables.get::<StandAloneSigRaw>(token.row())?;
        self.blob.get(row.signature).map(Some)
    }

    /// Append a new `StandAloneSig` row holding `signature`.
    ///
    /// Existing rows are never modified since they may be shared between methods.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob heap or the table is full.
    pub fn add_local_signature(&mut self, signature: &[u8]) -> Result<Token> {
        let offset = self.blob.add(signature)?;
        self.tables.push(&StandAloneSigRaw { signature: offset })
    }

    /// Returns `true` if `method`'s body differs from the one it was loaded with.
    fn body_changed(&self, method: &MethodDefinition) -> bool {
        let Some(body) = method.body.as_deref() else {
            return false;
        };
        if method.rva == 0 || body.len() != method.loaded_len {
            return true;
        }
        self.pe
            .slice_at(&self.data, method.rva, body.len())
            .map_or(true, |loaded| loaded != body)
    }

    /// Serialize the module into a PE image.
    ///
    /// A module without changes is returned byte for byte. Otherwise changed bodies and the
    /// metadata are written to an appended [`WEAVE_SECTION`]; a strong name signature or
    /// Authenticode signature of the input no longer matches and has to be reapplied.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the headers have no room for another section or
    /// the image exceeds the format limits.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let base = self.pe.next_section_rva();
        let to_u32 = |value: usize| {
            u32::try_from(value).map_err(|_| malformed_error!("Section exceeds 4 GiB"))
        };

        let mut section = Vec::new();
        let mut tables = self.tables.clone();
        for (index, method) in self.methods.iter().enumerate() {
            let Some(body) = method.body.as_deref() else {
                continue;
            };
            if !self.body_changed(method) {
                continue;
            }

            section.resize((section.len() + 3) & !3, 0);
            let row = method.token.row();
            let mut raw = tables.get::<MethodDefRaw>(row)?;
            raw.rva = base + to_u32(section.len())?;
            tables.set(row, &raw)?;
            section.extend_from_slice(body);
            log::trace!("Relocated body of {} (#{})", method.full_name, index);
        }

        let heap_sizes = HeapSizes::for_heaps(
            self.strings.data().len(),
            self.guids.len(),
            self.blob.data().len(),
        );
        let mut root = self.root.clone();
        root.set_stream(STREAM_TABLES, tables.write(heap_sizes, None)?);
        root.set_stream(STREAM_STRINGS, self.strings.data().to_vec());
        if root.stream(STREAM_USER_STRINGS).is_some() || self.user_strings.data().len() > 1 {
            root.set_stream(STREAM_USER_STRINGS, self.user_strings.data().to_vec());
        }
        root.set_stream(STREAM_GUID, self.guids.data().to_vec());
        root.set_stream(STREAM_BLOB, self.blob.data().to_vec());
        let metadata = root.write()?;

        let loaded_metadata = self.pe.slice_at(
            &self.data,
            self.cor20.meta_data_rva,
            self.cor20.meta_data_size as usize,
        )?;
        if section.is_empty() && metadata == loaded_metadata {
            return Ok(self.data.clone());
        }

        if self.cor20.is_strong_name_signed() {
            log::warn!("The strong name signature of the module is invalidated and must be reapplied");
        }

        section.resize((section.len() + 3) & !3, 0);
        let mut cor20 = self.cor20;
        cor20.meta_data_rva = base + to_u32(section.len())?;
        cor20.meta_data_size = to_u32(metadata.len())?;
        section.extend_from_slice(&metadata);

        let mut out = self
            .pe
            .append_section(&self.data, WEAVE_SECTION, &section, SECTION_READ_DATA)?;
        let (clr_rva, _) = self.pe.directory(DIRECTORY_CLR);
        let clr_offset = self.pe.rva_to_offset(clr_rva)?;
        out[clr_offset..clr_offset + COR20_HEADER_SIZE].copy_from_slice(&cor20.write());

        Ok(out)
    }

    /// Serialize the module and write it to `path`.
    ///
    /// # Errors
    /// Returns serialization errors and [`crate::Error::FileError`] for I/O failures.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_ranges() {
        assert_eq!(list_range(1, Some(3), 5), 0..2);
        assert_eq!(list_range(3, None, 5), 2..5);
        assert_eq!(list_range(3, Some(3), 5), 2..2);
        // Lists pointing past the table own nothing
        assert_eq!(list_range(7, None, 5), 5..5);
        assert_eq!(list_range(0, Some(0), 5), 0..0);
    }

    #[test]
    fn row_index_checks_table() {
        assert_eq!(
            row_index(Token::new(0x0600_0002), TableId::MethodDef, 2).unwrap(),
            1
        );
        assert!(row_index(Token::new(0x0600_0003), TableId::MethodDef, 2).is_err());
        assert!(row_index(Token::new(0x0A00_0001), TableId::MethodDef, 2).is_err());
        assert!(row_index(Token::new(0x0600_0000), TableId::MethodDef, 2).is_err());
    }

    #[test]
    fn nested_type_names() {
        let mut types: Vec<TypeDefinition> = [("Shop", "Outer"), ("", "Inner"), ("", "Deepest")]
            .iter()
            .enumerate()
            .map(|(index, (namespace, name))| TypeDefinition {
                token: token_of(TableId::TypeDef, index),
                flags: 0,
                namespace: (*namespace).to_string(),
                name: (*name).to_string(),
                enclosing: None,
                methods: Vec::new(),
                properties: Vec::new(),
                full_name: String::new(),
            })
            .collect();
        let nesting = [
            NestedClassRaw {
                nested_class: 2,
                enclosing_class: 1,
            },
            NestedClassRaw {
                nested_class: 3,
                enclosing_class: 2,
            },
        ];

        type_names(&mut types, &nesting).unwrap();
        assert_eq!(types[0].full_name(), "Shop.Outer");
        assert_eq!(types[2].full_name(), "Shop.Outer/Inner/Deepest");

        let cycle = [NestedClassRaw {
            nested_class: 1,
            enclosing_class: 1,
        }];
        assert!(type_names(&mut types, &cycle).is_err());
    }

    #[test]
    fn qualified_names() {
        assert_eq!(qualified_name("", "Program"), "Program");
        assert_eq!(
            qualified_name("Odin.DesignContracts", "Contract"),
            "Odin.DesignContracts.Contract"
        );
    }
}
