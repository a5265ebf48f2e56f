//! Integration tests for portable PDBs travelling with woven modules.

mod common;

use common::*;
use dotweave::{
    metadata::tables::{LocalScopeRaw, TableId},
    symbols::{symbol_path, PortablePdb, SequencePoint},
    Error, Module, Result, SymbolMode, Weaver, WeaverConfig,
};
use std::path::{Path, PathBuf};

fn point(il_offset: u32, start_line: u32, document: u32) -> SequencePoint {
    SequencePoint {
        il_offset,
        document,
        start_line,
        start_col: 9,
        end_line: start_line,
        end_col: 42,
    }
}

/// Write the account module to `dir/Account.dll` with a PDB carrying points for `Deposit`.
/// A `foreign` PDB has a debug id the module does not reference.
fn write_with_symbols(dir: &Path, foreign: bool) -> Result<PathBuf> {
    let mut builder = account(false)?;
    let deposit = method_token(&builder.build_module()?, "Deposit");
    let document = builder.document("/src/Account.cs");
    // `this._balance += amount` at 0, closing brace at the `ret`
    builder.sequence_points(deposit, &[point(0, 17, document), point(14, 18, document)])?;

    let input = dir.join("Account.dll");
    std::fs::write(&input, builder.build()?)?;

    let mut symbols = builder.build_symbols()?;
    if foreign {
        symbols.id[..16].copy_from_slice(&[0xAB; 16]);
    }
    std::fs::write(symbol_path(&input), symbols.write()?)?;
    Ok(input)
}

/// The PDB next to `module` belongs to it and describes its tables.
fn assert_matches(symbols: &PortablePdb, module: &Module) -> Result<()> {
    symbols.verify(module.pe(), module.data())?;
    for table in [TableId::MethodDef, TableId::StandAloneSig] {
        assert_eq!(
            symbols.type_system_rows[usize::from(table.id())],
            module.tables.row_count(table)
        );
    }
    Ok(())
}

#[test]
fn symbols_follow_rewritten_code() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_with_symbols(dir.path(), false)?;
    let output = dir.path().join("out").join("Account.dll");

    let report = Weaver::with_config(WeaverConfig::new().output(&output)).run(&input)?;
    let written = dir.path().join("out").join("Account.pdb");
    assert_eq!(report.symbols.as_deref(), Some(written.as_path()));

    let module = Module::from_file(&output)?;
    let symbols = PortablePdb::from_file(&written)?;
    assert_matches(&symbols, &module)?;
    assert_eq!(symbols.documents()?, ["/src/Account.cs"]);

    let (local_signature, points) = symbols
        .sequence_points(method_token(&module, "Deposit"))?
        .expect("Deposit keeps its sequence points");
    let offsets: Vec<u32> = points.0.iter().map(|point| point.il_offset).collect();
    // 6 bytes of entry check in front, 6 bytes of exit check before the `ret`
    assert_eq!(offsets, [6, 26]);
    assert_eq!(local_signature, 0);

    let scope = symbols.tables.get::<LocalScopeRaw>(1)?;
    assert_eq!((scope.start_offset, scope.length), (0, 27));
    Ok(())
}

#[test]
fn symbols_skipped_on_request() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_with_symbols(dir.path(), false)?;
    let output = dir.path().join("Account.woven.dll");

    let config = WeaverConfig::new()
        .output(&output)
        .symbols(SymbolMode::Skip);
    let report = Weaver::with_config(config).run(&input)?;

    assert_eq!(report.symbols, None);
    assert!(output.exists());
    assert!(!symbol_path(&output).exists());
    Ok(())
}

#[test]
fn module_without_symbols() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_account(dir.path())?;

    let report = Weaver::new().run(&input)?;
    assert_eq!(report.symbols, None);
    assert!(!symbol_path(&input).exists());
    Ok(())
}

#[test]
fn foreign_symbols_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_with_symbols(dir.path(), true)?;
    let original = std::fs::read(&input)?;
    let original_symbols = std::fs::read(symbol_path(&input))?;

    assert!(matches!(
        Weaver::new().run(&input),
        Err(Error::SymbolMismatch(_))
    ));
    assert_eq!(std::fs::read(&input)?, original);
    assert_eq!(std::fs::read(symbol_path(&input))?, original_symbols);
    Ok(())
}

#[test]
fn in_place_weaving_updates_symbols() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_with_symbols(dir.path(), false)?;
    let before = PortablePdb::from_file(&symbol_path(&input))?;

    Weaver::new().rewrite(&input, None)?;

    let module = Module::from_file(&input)?;
    let symbols = PortablePdb::from_file(&symbol_path(&input))?;
    assert_matches(&symbols, &module)?;
    assert_eq!(symbols.id, before.id);
    // `Balance` gained a result local
    assert_eq!(
        symbols.type_system_rows[usize::from(TableId::StandAloneSig.id())],
        before.type_system_rows[usize::from(TableId::StandAloneSig.id())] + 1
    );
    Ok(())
}
