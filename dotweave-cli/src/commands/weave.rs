use anyhow::Context;
use dotweave::{SymbolMode, WeaveReport, Weaver, WeaverConfig};

use crate::{
    app::Cli,
    output::{print_output, Column, Columns},
};

pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let weaver = Weaver::with_config(config(cli));
    let report = weaver
        .run(&cli.input)
        .with_context(|| format!("failed to weave {}", cli.input.display()))?;

    print_output(&report, &cli.global, |report| print_report(report, cli.dry_run))
}

fn config(cli: &Cli) -> WeaverConfig {
    let mut config = WeaverConfig::new().dry_run(cli.dry_run).symbols(if cli.no_symbols {
        SymbolMode::Skip
    } else {
        SymbolMode::Auto
    });
    if let Some(output) = &cli.output {
        config = config.output(output);
    }
    config
}

const METHOD_COLUMNS: &[Column] = &[
    Column::text("Token"),
    Column::text("Method"),
    Column::text("Entry"),
    Column::text("Exit"),
    Column::number("Ensures"),
    Column::number("Returns"),
];

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "-" }.to_string()
}

fn print_report(report: &WeaveReport, dry_run: bool) {
    if !report.methods.is_empty() {
        let mut table = Columns::new(METHOD_COLUMNS);
        for method in &report.methods {
            table.row([
                format!("0x{:08X}", method.token),
                method.name.clone(),
                yes_no(method.invariant_on_entry),
                yes_no(method.invariant_on_exit),
                method.postconditions.to_string(),
                method.return_sites.to_string(),
            ]);
        }
        println!("{}\n", table.render());
    }

    println!(
        "{} methods rewritten, {} types with invariants",
        report.rewritten, report.invariant_types
    );
    match (&report.output, dry_run) {
        (_, true) => println!("Dry run, nothing written"),
        (Some(output), false) => println!("Output:  {}", output.display()),
        (None, false) => {}
    }
    if let Some(symbols) = &report.symbols {
        println!("Symbols: {}", symbols.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    #[test]
    fn config_from_arguments() {
        let cli = Cli::try_parse_from(["dotweave", "--dry-run", "--no-symbols", "a.dll", "b.dll"])
            .unwrap();
        let config = config(&cli);
        assert!(config.is_dry_run());
        assert_eq!(config.symbol_mode(), SymbolMode::Skip);
        assert_eq!(config.output_path(), Some(Path::new("b.dll")));

        let cli = Cli::try_parse_from(["dotweave", "a.dll"]).unwrap();
        let config = super::config(&cli);
        assert!(!config.is_dry_run());
        assert_eq!(config.symbol_mode(), SymbolMode::Auto);
        assert_eq!(config.output_path(), None);
    }
}
