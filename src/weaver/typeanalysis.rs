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

//! Locating and validating the invariant method of a type.

use crate::{
    metadata::{MethodDefinition, Module, Tags},
    Error, Result,
};

/// Find the invariant method of the type at `ty`, returning its method index.
///
/// A type has at most one invariant method and it must be callable as `this.Invariant()`:
/// an instance method with a body, no parameters and no return value.
///
/// # Errors
/// Returns [`crate::Error::MultipleInvariantMethods`] if more than one method of the type
/// is tagged, and [`crate::Error::InvalidInvariantMethod`] if the tagged method has the
/// wrong shape.
pub fn find_invariant_method(module: &Module, ty: usize) -> Result<Option<usize>> {
    let Some(definition) = module.types.get(ty) else {
        return Ok(None);
    };

    let candidates: Vec<usize> = definition
        .methods
        .iter()
        .copied()
        .filter(|method| module.methods[*method].tags.contains(Tags::INVARIANT_METHOD))
        .collect();

    let method = match candidates.as_slice() {
        [] => return Ok(None),
        [method] => *method,
        _ => {
            return Err(Error::MultipleInvariantMethods {
                type_name: definition.full_name().to_string(),
                candidates: candidates
                    .iter()
                    .map(|method| module.methods[*method].full_name().to_string())
                    .collect(),
            })
        }
    };

    validate(&module.methods[method])?;
    log::debug!(
        "{}: invariant method {}",
        definition.full_name(),
        module.methods[method].full_name()
    );

    Ok(Some(method))
}

fn validate(method: &MethodDefinition) -> Result<()> {
    let requirement = if method.is_static() {
        "an instance method"
    } else if method.param_count() > 0 {
        "parameterless"
    } else if !method.returns_void() {
        "void returning"
    } else if !method.has_body() {
        "a method with a body"
    } else {
        return Ok(());
    };

    Err(Error::InvalidInvariantMethod {
        method: method.full_name().to_string(),
        requirement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{MethodBodyBuilder, ModuleBuilder},
        metadata::{
            method::{MethodAccessFlags, MethodModifiers},
            signatures::{SignatureMethod, TypeSignature},
        },
        test::fixtures::{instance_sig, static_sig},
        weaver::markers::MarkerCatalog,
    };

    const PRIVATE: u16 = MethodAccessFlags::PRIVATE.bits();

    fn empty_body() -> Option<MethodBodyBuilder> {
        Some(MethodBodyBuilder::new().implementation(|asm| {
            asm.ret();
            Ok(())
        }))
    }

    fn single_type(methods: &[(&str, SignatureMethod, bool, bool)]) -> Module {
        let mut builder = ModuleBuilder::new("Invariants");
        builder.begin_type("Shop", "Cart", 0x0010_0001).unwrap();
        for (name, signature, tagged, body) in methods {
            let body = if *body { empty_body() } else { None };
            let flags = if signature.has_this {
                PRIVATE
            } else {
                PRIVATE | MethodModifiers::STATIC.bits()
            };
            let token = builder.method(name, flags, signature, &[], body).unwrap();
            if *tagged {
                builder
                    .attribute(token, "Odin.DesignContracts", "ClassInvariantMethodAttribute")
                    .unwrap();
            }
        }
        builder.begin_type("Shop", "Empty", 0x0010_0001).unwrap();

        let mut module = builder.build_module().unwrap();
        module.tag_with(|attributes| MarkerCatalog::default().tags(attributes));
        module
    }

    #[test]
    fn finds_single_invariant() {
        let void = instance_sig(TypeSignature::Void, 0);
        let module = single_type(&[
            ("Add", void.clone(), false, true),
            ("Check", void, true, true),
        ]);

        assert_eq!(find_invariant_method(&module, 0).unwrap(), Some(1));
        assert_eq!(find_invariant_method(&module, 1).unwrap(), None);
        assert_eq!(find_invariant_method(&module, 7).unwrap(), None);
    }

    #[test]
    fn rejects_multiple() {
        let void = instance_sig(TypeSignature::Void, 0);
        let module = single_type(&[
            ("Check", void.clone(), true, true),
            ("Verify", void, true, true),
        ]);

        match find_invariant_method(&module, 0) {
            Err(Error::MultipleInvariantMethods {
                type_name,
                candidates,
            }) => {
                assert_eq!(type_name, "Shop.Cart");
                assert_eq!(candidates, ["Shop.Cart::Check", "Shop.Cart::Verify"]);
            }
            other => panic!("Expected MultipleInvariantMethods, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_shapes() {
        let cases = [
            (static_sig(TypeSignature::Void, 0), true, "an instance method"),
            (instance_sig(TypeSignature::Void, 1), true, "parameterless"),
            (instance_sig(TypeSignature::Boolean, 0), true, "void returning"),
            (instance_sig(TypeSignature::Void, 0), false, "a method with a body"),
        ];

        for (signature, body, expected) in cases {
            let module = single_type(&[("Check", signature, true, body)]);
            match find_invariant_method(&module, 0) {
                Err(Error::InvalidInvariantMethod {
                    method,
                    requirement,
                }) => {
                    assert_eq!(method, "Shop.Cart::Check");
                    assert_eq!(requirement, expected);
                }
                other => panic!("Expected InvalidInvariantMethod, got {other:?}"),
            }
        }
    }
}
