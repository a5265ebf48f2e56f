mod app;
mod commands;
mod output;

use std::process::ExitCode;

use clap::{error::ErrorKind, Parser};

use crate::app::Cli;

/// Missing or malformed arguments.
const EXIT_USAGE: u8 = 3;
/// The input module does not exist.
const EXIT_NOT_FOUND: u8 = 2;
/// Anything else that stopped the rewrite.
const EXIT_FAILURE: u8 = 1;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            // Nothing sensible is left to do if stdout or stderr is gone
            let _ = error.print();
            return ExitCode::from(code);
        }
    };

    // Show dotweave info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("dotweave", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match commands::weave::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(exit_code(&error))
        }
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<dotweave::Error>() {
        Some(dotweave::Error::NotFound(_)) => EXIT_NOT_FOUND,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::path::PathBuf;

    #[test]
    fn exit_codes() {
        let missing: anyhow::Result<()> =
            Err(dotweave::Error::NotFound(PathBuf::from("Shop.dll"))).context("failed to weave");
        assert_eq!(exit_code(&missing.unwrap_err()), EXIT_NOT_FOUND);

        let broken: anyhow::Result<()> = Err(dotweave::Error::NotSupported).context("failed");
        assert_eq!(exit_code(&broken.unwrap_err()), EXIT_FAILURE);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), EXIT_FAILURE);
    }
}
