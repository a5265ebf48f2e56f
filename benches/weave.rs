//! Benchmarks for weaving.
//!
//! - Decoding and encoding a single method body
//! - Weaving a module with many invariant-checked methods
//! - Weaving a module with many postconditions

extern crate dotweave;

use criterion::{criterion_group, criterion_main, Criterion};
use dotweave::{
    assembly::{decode_stream, encode_stream},
    builder::{MethodBodyBuilder, ModuleBuilder},
    metadata::{
        method::MethodAccessFlags,
        signatures::{SignatureMethod, SignatureParameter, TypeSignature},
    },
    Module, Weaver,
};
use std::hint::black_box;

const PUBLIC: u16 = MethodAccessFlags::PUBLIC.bits();
const PRIVATE: u16 = MethodAccessFlags::PRIVATE.bits();

fn sig(ret: TypeSignature, params: usize) -> SignatureMethod {
    let parameter = |base| SignatureParameter {
        base,
        ..SignatureParameter::default()
    };
    SignatureMethod {
        has_this: true,
        return_type: parameter(ret),
        params: vec![parameter(TypeSignature::I4); params],
        ..SignatureMethod::default()
    }
}

/// A type with an invariant and `count` public methods, half of them with a postcondition.
fn counter_module(count: usize) -> Module {
    let mut builder = ModuleBuilder::new("Counter");
    let contract = builder.type_ref("Odin.DesignContracts", "Contract").unwrap();
    let condition = SignatureMethod {
        has_this: false,
        params: vec![SignatureParameter {
            base: TypeSignature::Boolean,
            ..SignatureParameter::default()
        }],
        ..sig(TypeSignature::Void, 0)
    };
    let ensures = builder.member_ref(contract, "Ensures", &condition).unwrap();
    let end = builder
        .member_ref(
            contract,
            "EndContractBlock",
            &SignatureMethod {
                has_this: false,
                ..sig(TypeSignature::Void, 0)
            },
        )
        .unwrap();

    builder.begin_type("Bench", "Counter", 0x0010_0001).unwrap();
    let value = builder.field("_value", 0x0001, &TypeSignature::I4).unwrap();
    let check = builder
        .method(
            "CheckInvariant",
            PRIVATE,
            &sig(TypeSignature::Void, 0),
            &[],
            Some(MethodBodyBuilder::new().implementation(|asm| {
                asm.ret();
                Ok(())
            })),
        )
        .unwrap();
    builder
        .attribute(check, "Odin.DesignContracts", "ClassInvariantMethodAttribute")
        .unwrap();

    for index in 0..count {
        let with_postcondition = index % 2 == 0;
        builder
            .method(
                &format!("Step{index}"),
                PUBLIC,
                &sig(TypeSignature::I4, 1),
                &["amount"],
                Some(MethodBodyBuilder::new().implementation(move |asm| {
                    if with_postcondition {
                        asm.ldarg(1).ldc_i4(0).cgt().call(ensures).call(end);
                    }
                    let skip = asm.label();
                    asm.ldarg(1).brfalse(skip);
                    asm.ldarg(0).ldarg(0).ldfld(value).ldarg(1).add().stfld(value);
                    asm.mark(skip).ldarg(0).ldfld(value).ret();
                    Ok(())
                })),
            )
            .unwrap();
    }

    builder.build_module().unwrap()
}

fn bench_decode_encode(c: &mut Criterion) {
    let module = counter_module(1);
    let body = module.methods[1].body.clone().unwrap();
    let header = dotweave::metadata::method::MethodBody::from(&body).unwrap();
    let code = body[header.size_header..header.size_header + header.size_code].to_vec();

    c.bench_function("decode_encode_body", |b| {
        b.iter(|| {
            let decoded = decode_stream(black_box(&code), &[]).unwrap();
            black_box(encode_stream(&decoded.stream).unwrap())
        });
    });
}

fn bench_weave_module(c: &mut Criterion) {
    let module = counter_module(500);
    let weaver = Weaver::new();

    c.bench_function("weave_500_methods", |b| {
        b.iter(|| {
            let mut module = module.clone();
            black_box(weaver.weave_module(&mut module).unwrap())
        });
    });
}

fn bench_weave_and_serialize(c: &mut Criterion) {
    let image = counter_module(500).to_bytes().unwrap();
    let weaver = Weaver::new();

    c.bench_function("load_weave_serialize_500_methods", |b| {
        b.iter(|| {
            let mut module = Module::from_bytes(black_box(&image)).unwrap();
            weaver.weave_module(&mut module).unwrap();
            black_box(module.to_bytes().unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_decode_encode,
    bench_weave_module,
    bench_weave_and_serialize
);
criterion_main!(benches);
