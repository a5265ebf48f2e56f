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

use crate::{
    file::parser::Parser,
    metadata::signatures::{
        CustomModifier, SignatureArray, SignatureField, SignatureLocalVariable,
        SignatureLocalVariables, SignatureMethod, SignatureMethodSpec, SignatureParameter,
        TypeSignature, CALLING_CONVENTION, ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Result,
};

const MAX_RECURSION_DEPTH: usize = 50;

/// Parser for signature blobs.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a new `SignatureParser` from a byte slice
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    /// Parse a single type from the signature blob
    fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(malformed_error!(
                "Signature nesting exceeds {} levels",
                MAX_RECURSION_DEPTH
            ));
        }

        let current_byte = self.parser.read_le::<u8>()?;
        let parsed = match current_byte {
            ELEMENT_TYPE::VOID => TypeSignature::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSignature::Boolean,
            ELEMENT_TYPE::CHAR => TypeSignature::Char,
            ELEMENT_TYPE::I1 => TypeSignature::I1,
            ELEMENT_TYPE::U1 => TypeSignature::U1,
            ELEMENT_TYPE::I2 => TypeSignature::I2,
            ELEMENT_TYPE::U2 => TypeSignature::U2,
            ELEMENT_TYPE::I4 => TypeSignature::I4,
            ELEMENT_TYPE::U4 => TypeSignature::U4,
            ELEMENT_TYPE::I8 => TypeSignature::I8,
            ELEMENT_TYPE::U8 => TypeSignature::U8,
            ELEMENT_TYPE::R4 => TypeSignature::R4,
            ELEMENT_TYPE::R8 => TypeSignature::R8,
            ELEMENT_TYPE::STRING => TypeSignature::String,
            ELEMENT_TYPE::PTR => {
                // Modifiers on pointed-to types carry no meaning for the weaver
                self.parse_custom_mods()?;
                TypeSignature::Ptr(Box::new(self.parse_type()?))
            }
            ELEMENT_TYPE::BYREF => TypeSignature::ByRef(Box::new(self.parse_type()?)),
            ELEMENT_TYPE::VALUETYPE => {
                TypeSignature::ValueType(self.parser.read_compressed_token()?)
            }
            ELEMENT_TYPE::CLASS => TypeSignature::Class(self.parser.read_compressed_token()?),
            ELEMENT_TYPE::VAR => {
                TypeSignature::GenericParamType(self.parser.read_compressed_uint()?)
            }
            ELEMENT_TYPE::ARRAY => {
                let base = Box::new(self.parse_type()?);
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                let mut sizes = Vec::new();
                for _ in 0..num_sizes {
                    sizes.push(self.parser.read_compressed_uint()?);
                }

                let num_lo_bounds = self.parser.read_compressed_uint()?;
                let mut lower_bounds = Vec::new();
                for _ in 0..num_lo_bounds {
                    lower_bounds.push(self.parser.read_compressed_uint()?);
                }

                TypeSignature::Array(SignatureArray {
                    base,
                    rank,
                    sizes,
                    lower_bounds,
                })
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;

                let mut type_args = Vec::new();
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                TypeSignature::GenericInst(Box::new(base_type), type_args)
            }
            ELEMENT_TYPE::TYPEDBYREF => TypeSignature::TypedByRef,
            ELEMENT_TYPE::I => TypeSignature::I,
            ELEMENT_TYPE::U => TypeSignature::U,
            ELEMENT_TYPE::FNPTR => TypeSignature::FnPtr(Box::new(self.parse_method_signature()?)),
            ELEMENT_TYPE::OBJECT => TypeSignature::Object,
            ELEMENT_TYPE::SZARRAY => {
                self.parse_custom_mods()?;
                TypeSignature::SzArray(Box::new(self.parse_type()?))
            }
            ELEMENT_TYPE::MVAR => {
                TypeSignature::GenericParamMethod(self.parser.read_compressed_uint()?)
            }
            ELEMENT_TYPE::PINNED => TypeSignature::Pinned(Box::new(self.parse_type()?)),
            _ => {
                return Err(malformed_error!(
                    "Unsupported ELEMENT_TYPE - {}",
                    current_byte
                ))
            }
        };

        self.depth -= 1;
        Ok(parsed)
    }

    /// Parse custom modifiers (`CMOD_OPT` or `CMOD_REQD`)
    fn parse_custom_mods(&mut self) -> Result<Vec<CustomModifier>> {
        let mut mods = Vec::new();

        while self.parser.has_more_data() {
            let next_byte = self.parser.peek_byte()?;
            if next_byte != ELEMENT_TYPE::CMOD_OPT && next_byte != ELEMENT_TYPE::CMOD_REQD {
                break;
            }

            self.parser.advance()?;

            mods.push(CustomModifier {
                is_required: next_byte == ELEMENT_TYPE::CMOD_REQD,
                modifier_type: self.parser.read_compressed_token()?,
            });
        }

        Ok(mods)
    }

    /// Parse a parameter including custom modifiers (`return_type` counts as parameter)
    fn parse_param(&mut self) -> Result<SignatureParameter> {
        let modifiers = self.parse_custom_mods()?;

        let mut by_ref = false;
        if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
            self.parser.advance()?;
            by_ref = true;
        }

        Ok(SignatureParameter {
            modifiers,
            by_ref,
            base: self.parse_type()?,
        })
    }

    /// Parse the header of a method signature, returning (flags, generic count, param count).
    fn parse_method_header(&mut self) -> Result<(u8, u32, u32)> {
        let convention_byte = self.parser.read_le::<u8>()?;
        let generic_param_count = if convention_byte & CALLING_CONVENTION::GENERIC != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };
        let param_count = self.parser.read_compressed_uint()?;

        Ok((convention_byte, generic_param_count, param_count))
    }

    /// Parse a method signature from the blob - `MethodDefSig`, `MethodRefSig`, `StandAloneMethodSig`
    ///
    /// # Errors
    /// Returns an error if the signature data is malformed or if reading beyond the buffer bounds.
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let (convention_byte, generic_param_count, param_count) = self.parse_method_header()?;

        let mut method = SignatureMethod {
            has_this: convention_byte & CALLING_CONVENTION::HASTHIS != 0,
            explicit_this: convention_byte & CALLING_CONVENTION::EXPLICITTHIS != 0,
            vararg: convention_byte & 0x0F == CALLING_CONVENTION::VARARG,
            generic_param_count,
            return_type: self.parse_param()?,
            params: Vec::new(),
        };

        for _ in 0..param_count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                // Vararg call site arguments follow, they are not part of the definition
                self.parser.advance()?;
            }
            method.params.push(self.parse_param()?);
        }

        Ok(method)
    }

    /// The raw bytes of a method signature's return type, custom modifiers included.
    ///
    /// These bytes are a valid local variable type and can be appended to a `LocalVarSig`
    /// as they are.
    ///
    /// # Errors
    /// Returns an error if the signature data is malformed.
    pub fn method_return_type_raw(&mut self) -> Result<&'a [u8]> {
        self.parse_method_header()?;

        let start = self.parser.pos();
        self.parse_param()?;
        let end = self.parser.pos();

        Ok(&self.parser.data()[start..end])
    }

    /// Parse a field signature from the blob (II.23.2.4)
    ///
    /// # Errors
    /// Returns an error if the signature header is invalid or if the field type cannot be parsed.
    pub fn parse_field_signature(&mut self) -> Result<SignatureField> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        let modifiers = self.parse_custom_mods()?;
        let base = self.parse_type()?;

        Ok(SignatureField { modifiers, base })
    }

    /// Parse a local variable signature from the blob (II.23.2.6)
    ///
    /// # Errors
    /// Returns an error if the local variable signature header is invalid or if variable types cannot be parsed.
    pub fn parse_local_var_signature(&mut self) -> Result<SignatureLocalVariables> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "SignatureLocalVar - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;

        let mut locals = Vec::new();
        for _ in 0..count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::TYPEDBYREF {
                self.parser.advance()?;
                locals.push(SignatureLocalVariable {
                    base: TypeSignature::TypedByRef,
                    ..SignatureLocalVariable::default()
                });
                continue;
            }

            let mut local = SignatureLocalVariable {
                modifiers: self.parse_custom_mods()?,
                ..SignatureLocalVariable::default()
            };

            if self.parser.peek_byte()? == ELEMENT_TYPE::PINNED {
                self.parser.advance()?;
                local.is_pinned = true;
                local.modifiers.extend(self.parse_custom_mods()?);
            }

            if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
                self.parser.advance()?;
                local.is_byref = true;
            }

            local.base = self.parse_type()?;
            locals.push(local);
        }

        Ok(SignatureLocalVariables { locals })
    }

    /// Parse a method instantiation from the blob (II.23.2.15)
    ///
    /// # Errors
    /// Returns an error if the header is invalid or if a type argument cannot be parsed.
    pub fn parse_method_spec_signature(&mut self) -> Result<SignatureMethodSpec> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::GENERIC_INST {
            return Err(malformed_error!(
                "SignatureMethodSpec - invalid start - {}",
                head_byte
            ));
        }

        let arg_count = self.parser.read_compressed_uint()?;
        let mut generic_args = Vec::new();
        for _ in 0..arg_count {
            generic_args.push(self.parse_type()?);
        }

        Ok(SignatureMethodSpec { generic_args })
    }

    /// Parse a `TypeSpec` blob, which is a bare type.
    ///
    /// # Errors
    /// Returns an error if the type cannot be parsed.
    pub fn parse_type_spec_signature(&mut self) -> Result<TypeSignature> {
        self.parse_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    #[test]
    fn method_instance_returning_int() {
        // instance int32 (int32)
        let sig = SignatureParser::new(&[0x20, 0x01, 0x08, 0x08])
            .parse_method_signature()
            .unwrap();

        assert!(sig.has_this);
        assert!(!sig.returns_void());
        assert_eq!(sig.return_type.base, TypeSignature::I4);
        assert_eq!(sig.params.len(), 1);
    }

    #[test]
    fn method_void_no_params() {
        let sig = SignatureParser::new(&[0x20, 0x00, 0x01])
            .parse_method_signature()
            .unwrap();
        assert!(sig.returns_void());
        assert!(sig.params.is_empty());
    }

    #[test]
    fn generic_method_signature() {
        // !!0 Result<T>()
        let sig = SignatureParser::new(&[0x10, 0x01, 0x00, 0x1E, 0x00])
            .parse_method_signature()
            .unwrap();
        assert_eq!(sig.generic_param_count, 1);
        assert_eq!(sig.return_type.base, TypeSignature::GenericParamMethod(0));
    }

    #[test]
    fn return_type_raw_includes_modifiers() {
        // instance modopt(TypeRef 1) class TypeRef 2 ()
        let blob = [0x20, 0x00, 0x20, 0x05, 0x12, 0x09];
        let raw = SignatureParser::new(&blob)
            .method_return_type_raw()
            .unwrap();
        assert_eq!(raw, &[0x20, 0x05, 0x12, 0x09]);
    }

    #[test]
    fn local_var_signature() {
        // int32, pinned byref uint8, class TypeRef 1
        let sig = SignatureParser::new(&[0x07, 0x03, 0x08, 0x45, 0x10, 0x05, 0x12, 0x05])
            .parse_local_var_signature()
            .unwrap();

        assert_eq!(sig.locals.len(), 3);
        assert_eq!(sig.locals[0].base, TypeSignature::I4);
        assert!(sig.locals[1].is_pinned && sig.locals[1].is_byref);
        assert_eq!(
            sig.locals[2].base,
            TypeSignature::Class(Token::new(0x0100_0001))
        );
    }

    #[test]
    fn method_spec_signature() {
        let sig = SignatureParser::new(&[0x0A, 0x01, 0x08])
            .parse_method_spec_signature()
            .unwrap();
        assert_eq!(sig.generic_args, vec![TypeSignature::I4]);
    }

    #[test]
    fn invalid_headers() {
        assert!(SignatureParser::new(&[0x06, 0x08])
            .parse_local_var_signature()
            .is_err());
        assert!(SignatureParser::new(&[0x07, 0x08])
            .parse_field_signature()
            .is_err());
        assert!(SignatureParser::new(&[0x20, 0x00, 0x99])
            .parse_method_signature()
            .is_err());
    }

    #[test]
    fn recursion_limit() {
        let blob = vec![ELEMENT_TYPE::SZARRAY; 64];
        assert!(SignatureParser::new(&blob).parse_type_spec_signature().is_err());
    }
}
