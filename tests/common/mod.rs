//! Shared fixtures for the integration tests.
//!
//! Modules are produced with the public builder API, the same way a compiler targeting the
//! contract library would lay them out.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use dotweave::{
    assembly::{decode_stream, InstructionStream},
    builder::{MethodBodyBuilder, ModuleBuilder},
    metadata::{
        method::{MethodAccessFlags, MethodBody, MethodModifiers},
        signatures::{SignatureMethod, SignatureParameter, TypeSignature},
        token::Token,
    },
    Module, Result,
};

pub const ACCOUNT: &str = "Bank.Account";

const PUBLIC: u16 = MethodAccessFlags::PUBLIC.bits();
const PRIVATE: u16 = MethodAccessFlags::PRIVATE.bits();
const CTOR: u16 =
    PUBLIC | MethodModifiers::SPECIAL_NAME.bits() | MethodModifiers::RTSPECIAL_NAME.bits();
const CLASS: u32 = 0x0010_0001;

fn parameter(base: TypeSignature) -> SignatureParameter {
    SignatureParameter {
        base,
        ..SignatureParameter::default()
    }
}

fn signature(has_this: bool, ret: TypeSignature, params: usize) -> SignatureMethod {
    SignatureMethod {
        has_this,
        return_type: parameter(ret),
        params: vec![parameter(TypeSignature::I4); params],
        ..SignatureMethod::default()
    }
}

/// `Bank.Account` keeps `_balance >= 0`.
///
/// `.ctor(int)`, `Deposit(int)` and `Balance()` are rewritten, `CheckInvariant()` is the
/// invariant and `Peek()` is pure.
pub fn account(invariant_is_static: bool) -> Result<ModuleBuilder> {
    let mut builder = ModuleBuilder::new("Account");
    let contract = builder.type_ref("Odin.DesignContracts", "Contract")?;
    let condition = SignatureMethod {
        params: vec![parameter(TypeSignature::Boolean)],
        ..signature(false, TypeSignature::Void, 0)
    };
    let result = SignatureMethod {
        generic_param_count: 1,
        return_type: parameter(TypeSignature::GenericParamMethod(0)),
        ..signature(false, TypeSignature::Void, 0)
    };
    let ensures = builder.member_ref(contract, "Ensures", &condition)?;
    let invariant = builder.member_ref(contract, "Invariant", &condition)?;
    let end_contract_block = builder.member_ref(
        contract,
        "EndContractBlock",
        &signature(false, TypeSignature::Void, 0),
    )?;
    let result_generic = builder.member_ref(contract, "Result", &result)?;
    let result = builder.method_spec(result_generic, vec![TypeSignature::I4])?;

    builder.begin_type("Bank", "Account", CLASS)?;
    let balance = builder.field("_balance", 0x0001, &TypeSignature::I4)?;

    builder.method(
        ".ctor",
        CTOR,
        &signature(true, TypeSignature::Void, 1),
        &["opening"],
        Some(MethodBodyBuilder::new().implementation(move |asm| {
            asm.ldarg(0).ldarg(1).stfld(balance).ret();
            Ok(())
        })),
    )?;

    let (flags, check_signature) = if invariant_is_static {
        (
            PRIVATE | MethodModifiers::STATIC.bits(),
            signature(false, TypeSignature::Void, 0),
        )
    } else {
        (PRIVATE, signature(true, TypeSignature::Void, 0))
    };
    let check = builder.method(
        "CheckInvariant",
        flags,
        &check_signature,
        &[],
        Some(MethodBodyBuilder::new().implementation(move |asm| {
            asm.ldarg(0)
                .ldfld(balance)
                .ldc_i4(0)
                .clt()
                .ldc_i4(0)
                .ceq()
                .call(invariant)
                .ret();
            Ok(())
        })),
    )?;
    builder.attribute(check, "Odin.DesignContracts", "ClassInvariantMethodAttribute")?;

    builder.method(
        "Deposit",
        PUBLIC,
        &signature(true, TypeSignature::Void, 1),
        &["amount"],
        Some(MethodBodyBuilder::new().implementation(move |asm| {
            asm.ldarg(0)
                .ldarg(0)
                .ldfld(balance)
                .ldarg(1)
                .add()
                .stfld(balance)
                .ret();
            Ok(())
        })),
    )?;

    builder.method(
        "Balance",
        PUBLIC,
        &signature(true, TypeSignature::I4, 0),
        &[],
        Some(MethodBodyBuilder::new().implementation(move |asm| {
            asm.call(result)
                .ldc_i4(0)
                .clt()
                .ldc_i4(0)
                .ceq()
                .call(ensures)
                .call(end_contract_block)
                .ldarg(0)
                .ldfld(balance)
                .ret();
            Ok(())
        })),
    )?;

    let peek = builder.method(
        "Peek",
        PUBLIC,
        &signature(true, TypeSignature::I4, 0),
        &[],
        Some(MethodBodyBuilder::new().implementation(move |asm| {
            asm.ldarg(0).ldfld(balance).ret();
            Ok(())
        })),
    )?;
    builder.attribute(peek, "System.Diagnostics.Contracts", "PureAttribute")?;

    Ok(builder)
}

/// Write the account fixture to `dir/Account.dll`.
pub fn write_account(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("Account.dll");
    std::fs::write(&path, account(false)?.build()?)?;
    Ok(path)
}

/// Index of the method called `name`.
pub fn method_index(module: &Module, name: &str) -> usize {
    module
        .methods
        .iter()
        .position(|method| method.name == name)
        .unwrap_or_else(|| panic!("no method {name}"))
}

/// Token of the method called `name`.
pub fn method_token(module: &Module, name: &str) -> Token {
    module.methods[method_index(module, name)].token
}

/// Decoded body of the method called `name`.
pub fn instructions(module: &Module, name: &str) -> Result<InstructionStream> {
    let body = module.methods[method_index(module, name)]
        .body
        .as_deref()
        .unwrap_or_default();
    let header = MethodBody::from(body)?;
    let code = &body[header.size_header..header.size_header + header.size_code];
    Ok(decode_stream(code, &header.exception_handlers)?.stream)
}
