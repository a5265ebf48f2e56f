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

//! Signature encoders.
//!
//! Produce the blob bytes for the signatures the builder creates, and extend existing local
//! variable signatures for the weaver.

use crate::{
    file::{io::WriteLe, parser::Parser},
    metadata::{
        signatures::{
            CustomModifier, SignatureField, SignatureLocalVariables, SignatureMethod,
            SignatureMethodSpec, SignatureParameter, TypeSignature, CALLING_CONVENTION,
            ELEMENT_TYPE, SIGNATURE_HEADER,
        },
        tables::TableId,
        token::Token,
    },
    Result,
};

/// Encode a `TypeDef`, `TypeRef` or `TypeSpec` token as `TypeDefOrRefOrSpecEncoded`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for tokens of any other table.
pub fn encode_type_def_or_ref(token: Token, buffer: &mut Vec<u8>) -> Result<()> {
    let tag = match TableId::from_repr(token.table()) {
        Some(TableId::TypeDef) => 0,
        Some(TableId::TypeRef) => 1,
        Some(TableId::TypeSpec) => 2,
        _ => {
            return Err(malformed_error!(
                "Token {} cannot be encoded as TypeDefOrRef",
                token
            ))
        }
    };

    buffer.write_compressed_uint((token.row() << 2) | tag)
}

fn encode_custom_modifier(modifier: &CustomModifier, buffer: &mut Vec<u8>) -> Result<()> {
    buffer.push(if modifier.is_required {
        ELEMENT_TYPE::CMOD_REQD
    } else {
        ELEMENT_TYPE::CMOD_OPT
    });
    encode_type_def_or_ref(modifier.modifier_type, buffer)
}

/// Encode a single type.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for [`TypeSignature::Unknown`] or invalid tokens.
pub fn encode_type(signature: &TypeSignature, buffer: &mut Vec<u8>) -> Result<()> {
    match signature {
        TypeSignature::Unknown => {
            return Err(malformed_error!("Cannot encode an unknown type"));
        }
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::TypedByRef => buffer.push(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::I => buffer.push(ELEMENT_TYPE::I),
        TypeSignature::U => buffer.push(ELEMENT_TYPE::U),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::Ptr(base) => {
            buffer.push(ELEMENT_TYPE::PTR);
            encode_type(base, buffer)?;
        }
        TypeSignature::ByRef(base) => {
            buffer.push(ELEMENT_TYPE::BYREF);
            encode_type(base, buffer)?;
        }
        TypeSignature::Pinned(base) => {
            buffer.push(ELEMENT_TYPE::PINNED);
            encode_type(base, buffer)?;
        }
        TypeSignature::SzArray(base) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_type(base, buffer)?;
        }
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            encode_type_def_or_ref(*token, buffer)?;
        }
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            encode_type_def_or_ref(*token, buffer)?;
        }
        TypeSignature::GenericParamType(index) => {
            buffer.push(ELEMENT_TYPE::VAR);
            buffer.write_compressed_uint(*index)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            buffer.push(ELEMENT_TYPE::MVAR);
            buffer.write_compressed_uint(*index)?;
        }
        TypeSignature::Array(array) => {
            buffer.push(ELEMENT_TYPE::ARRAY);
            encode_type(&array.base, buffer)?;
            buffer.write_compressed_uint(array.rank)?;
            write_len(array.sizes.len(), buffer)?;
            for size in &array.sizes {
                buffer.write_compressed_uint(*size)?;
            }
            write_len(array.lower_bounds.len(), buffer)?;
            for bound in &array.lower_bounds {
                buffer.write_compressed_uint(*bound)?;
            }
        }
        TypeSignature::GenericInst(base, args) => {
            buffer.push(ELEMENT_TYPE::GENERICINST);
            encode_type(base, buffer)?;
            write_len(args.len(), buffer)?;
            for arg in args {
                encode_type(arg, buffer)?;
            }
        }
        TypeSignature::FnPtr(method) => {
            buffer.push(ELEMENT_TYPE::FNPTR);
            buffer.extend_from_slice(&encode_method_signature(method)?);
        }
    }

    Ok(())
}

fn encode_param(param: &SignatureParameter, buffer: &mut Vec<u8>) -> Result<()> {
    for modifier in &param.modifiers {
        encode_custom_modifier(modifier, buffer)?;
    }
    if param.by_ref {
        buffer.push(ELEMENT_TYPE::BYREF);
    }
    encode_type(&param.base, buffer)
}

fn write_len(len: usize, buffer: &mut Vec<u8>) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| malformed_error!("Signature list too long"))?;
    buffer.write_compressed_uint(len)
}

/// Encode a `MethodDefSig`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if any contained type cannot be encoded.
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    let mut convention = if signature.vararg {
        CALLING_CONVENTION::VARARG
    } else {
        CALLING_CONVENTION::DEFAULT
    };
    if signature.has_this {
        convention |= CALLING_CONVENTION::HASTHIS;
    }
    if signature.explicit_this {
        convention |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    if signature.generic_param_count > 0 {
        convention |= CALLING_CONVENTION::GENERIC;
    }

    buffer.push(convention);
    if signature.generic_param_count > 0 {
        buffer.write_compressed_uint(signature.generic_param_count)?;
    }
    write_len(signature.params.len(), &mut buffer)?;
    encode_param(&signature.return_type, &mut buffer)?;
    for param in &signature.params {
        encode_param(param, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encode a `FieldSig`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the field type cannot be encoded.
pub fn encode_field_signature(signature: &SignatureField) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::FIELD];
    for modifier in &signature.modifiers {
        encode_custom_modifier(modifier, &mut buffer)?;
    }
    encode_type(&signature.base, &mut buffer)?;
    Ok(buffer)
}

/// Encode a `LocalVarSig`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if any local type cannot be encoded.
pub fn encode_local_var_signature(signature: &SignatureLocalVariables) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::LOCAL_SIG];
    write_len(signature.locals.len(), &mut buffer)?;

    for local in &signature.locals {
        for modifier in &local.modifiers {
            encode_custom_modifier(modifier, &mut buffer)?;
        }
        if local.is_pinned {
            buffer.push(ELEMENT_TYPE::PINNED);
        }
        if local.is_byref {
            buffer.push(ELEMENT_TYPE::BYREF);
        }
        encode_type(&local.base, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encode a `MethodSpec` instantiation.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if any type argument cannot be encoded.
pub fn encode_method_spec_signature(signature: &SignatureMethodSpec) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::GENERIC_INST];
    write_len(signature.generic_args.len(), &mut buffer)?;
    for arg in &signature.generic_args {
        encode_type(arg, &mut buffer)?;
    }
    Ok(buffer)
}

/// Append one local of the raw type `local_type` to an existing `LocalVarSig`.
///
/// `existing` is `None` for methods without locals. Returns the new signature together with
/// the slot index of the appended local.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `existing` is not a local variable signature.
pub fn append_local(existing: Option<&[u8]>, local_type: &[u8]) -> Result<(Vec<u8>, u16)> {
    let (count, types) = match existing {
        Some(blob) => {
            let mut parser = Parser::new(blob);
            let head_byte = parser.read_le::<u8>()?;
            if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
                return Err(malformed_error!(
                    "SignatureLocalVar - invalid start - {}",
                    head_byte
                ));
            }
            let count = parser.read_compressed_uint()?;
            (count, &blob[parser.pos()..])
        }
        None => (0, &[][..]),
    };

    let slot = u16::try_from(count)
        .ok()
        .filter(|slot| *slot < u16::MAX)
        .ok_or_else(|| malformed_error!("Too many locals to add another - {}", count))?;

    let mut buffer = vec![SIGNATURE_HEADER::LOCAL_SIG];
    buffer.write_compressed_uint(count + 1)?;
    buffer.extend_from_slice(types);
    buffer.extend_from_slice(local_type);

    Ok((buffer, slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::{SignatureLocalVariable, SignatureParser};

    #[test]
    fn method_signature_roundtrip() {
        let signature = SignatureMethod {
            has_this: true,
            return_type: SignatureParameter {
                base: TypeSignature::I4,
                ..SignatureParameter::default()
            },
            params: vec![SignatureParameter {
                base: TypeSignature::Class(Token::new(0x0100_0003)),
                ..SignatureParameter::default()
            }],
            ..SignatureMethod::default()
        };

        let bytes = encode_method_signature(&signature).unwrap();
        assert_eq!(bytes, [0x20, 0x01, 0x08, 0x12, 0x0D]);

        let parsed = SignatureParser::new(&bytes)
            .parse_method_signature()
            .unwrap();
        assert_eq!(parsed, signature);
    }

    #[test]
    fn local_var_signature() {
        let locals = SignatureLocalVariables {
            locals: vec![SignatureLocalVariable {
                base: TypeSignature::String,
                ..SignatureLocalVariable::default()
            }],
        };
        assert_eq!(
            encode_local_var_signature(&locals).unwrap(),
            [0x07, 0x01, 0x0E]
        );
    }

    #[test]
    fn append_local_to_existing() {
        let (sig, slot) = append_local(Some(&[0x07, 0x02, 0x08, 0x0E]), &[0x02]).unwrap();
        assert_eq!(slot, 2);
        assert_eq!(sig, [0x07, 0x03, 0x08, 0x0E, 0x02]);
    }

    #[test]
    fn append_local_without_locals() {
        let (sig, slot) = append_local(None, &[0x12, 0x09]).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(sig, [0x07, 0x01, 0x12, 0x09]);
    }

    #[test]
    fn append_local_widens_count() {
        let mut existing = vec![0x07, 0x7F];
        existing.extend(std::iter::repeat(0x08).take(0x7F));

        let (sig, slot) = append_local(Some(&existing), &[0x08]).unwrap();
        assert_eq!(slot, 0x7F);
        assert_eq!(&sig[..3], &[0x07, 0x80, 0x80]);
        assert_eq!(sig.len(), 3 + 0x80);

        let parsed = SignatureParser::new(&sig)
            .parse_local_var_signature()
            .unwrap();
        assert_eq!(parsed.locals.len(), 0x80);
    }

    #[test]
    fn invalid_type_def_or_ref() {
        let mut buffer = Vec::new();
        assert!(encode_type_def_or_ref(Token::new(0x0600_0001), &mut buffer).is_err());
    }
}
