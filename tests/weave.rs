//! Integration tests for weaving modules on disk.
//!
//! These tests write fixture modules to a temporary directory, weave them through the
//! public entry points and load the results back.

mod common;

use common::*;
use dotweave::{
    assembly::Instruction,
    metadata::{tables::TableId, WEAVE_SECTION},
    Error, Module, Result, Weaver, WeaverConfig,
};

#[test]
fn weave_to_new_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_account(dir.path())?;
    let original = std::fs::read(&input)?;
    let output = dir.path().join("woven").join("Account.dll");

    let report = Weaver::with_config(WeaverConfig::new().output(&output)).run(&input)?;

    assert_eq!(report.input.as_deref(), Some(input.as_path()));
    assert_eq!(report.output.as_deref(), Some(output.as_path()));
    assert_eq!(report.symbols, None);
    assert_eq!(report.invariant_types, 1);
    assert_eq!(report.rewritten, 3);

    let names: Vec<&str> = report.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        ["Bank.Account::.ctor", "Bank.Account::Deposit", "Bank.Account::Balance"]
    );

    // Input is left alone when an output path is given
    assert_eq!(std::fs::read(&input)?, original);

    let module = Module::from_file(&output)?;
    let invariant = method_token(&module, "CheckInvariant");
    let deposit = instructions(&module, "Deposit")?;
    assert_eq!(deposit.at(0), Some(&Instruction::ldarg(0)));
    assert_eq!(deposit.at(1), Some(&Instruction::call(invariant)));
    assert_eq!(deposit.len(), 11);

    let balance = instructions(&module, "Balance")?;
    // entry check, ldarg.0, ldfld, stloc, 6 replayed, exit check, ldloc, ret
    assert_eq!(balance.len(), 2 + 2 + 1 + 6 + 2 + 1 + 1);
    assert!(balance.at(balance.len() - 1).is_some_and(Instruction::is_return));

    let peek = instructions(&module, "Peek")?;
    assert_eq!(peek.len(), 3);
    Ok(())
}

#[test]
fn rewrite_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_account(dir.path())?;
    let original = std::fs::read(&input)?;

    assert_eq!(Weaver::new().rewrite(&input, None)?, 3);
    assert_ne!(std::fs::read(&input)?, original);

    let module = Module::from_file(&input)?;
    assert_eq!(instructions(&module, "Deposit")?.len(), 11);
    Ok(())
}

#[test]
fn dry_run_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_account(dir.path())?;
    let original = std::fs::read(&input)?;
    let output = dir.path().join("Account.woven.dll");

    let config = WeaverConfig::new().output(&output).dry_run(true);
    let report = Weaver::with_config(config).run(&input)?;

    assert_eq!(report.rewritten, 3);
    assert_eq!(report.output, None);
    assert!(!output.exists());
    assert_eq!(std::fs::read(&input)?, original);
    Ok(())
}

#[test]
fn missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("Missing.dll");

    match Weaver::new().run(&input) {
        Err(Error::NotFound(path)) => assert_eq!(path, input),
        other => panic!("Expected NotFound, got {other:?}"),
    }
}

#[test]
fn foreign_input_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("notes.txt");
    std::fs::write(&input, b"not a module at all")?;

    assert!(matches!(Weaver::new().run(&input), Err(Error::NotSupported)));
    Ok(())
}

#[test]
fn invalid_invariant_leaves_files_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("Account.dll");
    std::fs::write(&input, account(true)?.build()?)?;
    let original = std::fs::read(&input)?;
    let output = dir.path().join("out.dll");

    match Weaver::with_config(WeaverConfig::new().output(&output)).run(&input) {
        Err(Error::InvalidInvariantMethod {
            method,
            requirement,
        }) => {
            assert_eq!(method, "Bank.Account::CheckInvariant");
            assert_eq!(requirement, "an instance method");
        }
        other => panic!("Expected InvalidInvariantMethod, got {other:?}"),
    }

    assert!(!output.exists());
    assert_eq!(std::fs::read(&input)?, original);

    // In-place weaving must not touch the input either
    assert!(Weaver::new().rewrite(&input, None).is_err());
    assert_eq!(std::fs::read(&input)?, original);
    Ok(())
}

#[test]
fn woven_module_round_trips() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_account(dir.path())?;
    let output = dir.path().join("out.dll");
    Weaver::new().rewrite(&input, Some(&output))?;

    let woven = std::fs::read(&output)?;
    let module = Module::from_bytes(&woven)?;
    assert_eq!(module.to_bytes()?, woven);

    let original = Module::from_file(&input)?;
    assert_eq!(module.mvid, original.mvid);
    assert_eq!(module.methods.len(), original.methods.len());
    assert_eq!(
        module.tables.row_count(TableId::StandAloneSig),
        original.tables.row_count(TableId::StandAloneSig) + 1
    );

    // The input stays a valid PE image: every byte before the appended section is kept
    assert_eq!(module.pe().sections.len(), 2);
    assert_eq!(module.pe().sections[1].name, WEAVE_SECTION);
    let text_end = original.pe().sections[0].pointer_to_raw_data as usize
        + original.pe().sections[0].size_of_raw_data as usize;
    let original_bytes = std::fs::read(&input)?;
    assert_eq!(
        woven[original.pe().sections[0].pointer_to_raw_data as usize..text_end],
        original_bytes[original.pe().sections[0].pointer_to_raw_data as usize..text_end]
    );
    Ok(())
}

#[test]
fn unchanged_module_is_written_byte_for_byte() -> Result<()> {
    let image = account(false)?.build()?;
    let module = Module::from_bytes(&image)?;
    assert_eq!(module.to_bytes()?, image);
    Ok(())
}
