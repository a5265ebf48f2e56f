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

//! Contract weaving.
//!
//! The [`Weaver`] loads a module, rewrites every method body that needs invariant or
//! postcondition checks and writes the module back, together with its portable PDB when one
//! was loaded.
//!
//! # Architecture
//!
//! - [`markers`] - The names of the contract methods and attributes
//! - [`typeanalysis`] - Locating and validating a type's invariant method
//! - [`analysis`] - Deciding what each method receives
//! - [`rewriter`] - Editing a method body
//!
//! Type analysis runs for every type before the first body is touched, and the bodies are
//! rewritten on a copy of the module, so any error aborts the rewrite with the module
//! unchanged and nothing written. Output files are replaced atomically.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotweave::{SymbolMode, Weaver, WeaverConfig};
//! use std::path::Path;
//!
//! let weaver = Weaver::with_config(
//!     WeaverConfig::new()
//!         .output("out/Shop.dll")
//!         .symbols(SymbolMode::Skip),
//! );
//! let report = weaver.run(Path::new("Shop.dll"))?;
//! println!("{} methods rewritten", report.rewritten);
//! # Ok::<(), dotweave::Error>(())
//! ```

pub mod analysis;
pub mod markers;
pub mod rewriter;
pub mod typeanalysis;
pub mod utils;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{
    file::{write_atomic, File},
    metadata::Module,
    symbols::{symbol_path, PortablePdb},
    weaver::{
        markers::MarkerCatalog,
        rewriter::{MethodRewriter, RewriteOutcome},
        typeanalysis::find_invariant_method,
    },
    Result,
};

/// Whether the symbol file next to the input is read and rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolMode {
    /// Use the symbol file if one exists
    #[default]
    Auto,
    /// Ignore symbol files
    Skip,
}

/// Options of a [`Weaver`].
#[derive(Debug, Clone, Default)]
pub struct WeaverConfig {
    output: Option<PathBuf>,
    symbols: SymbolMode,
    markers: MarkerCatalog,
    dry_run: bool,
}

impl WeaverConfig {
    /// Default configuration: rewrite in place, symbols when present.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the result to `path` instead of overwriting the input.
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Choose how symbol files are handled.
    #[must_use]
    pub fn symbols(mut self, mode: SymbolMode) -> Self {
        self.symbols = mode;
        self
    }

    /// Use a different set of marker names.
    #[must_use]
    pub fn markers(mut self, markers: MarkerCatalog) -> Self {
        self.markers = markers;
        self
    }

    /// Analyze and rewrite in memory without writing anything.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The configured output path, `None` to overwrite the input.
    #[must_use]
    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// The configured symbol handling.
    #[must_use]
    pub fn symbol_mode(&self) -> SymbolMode {
        self.symbols
    }

    /// Returns `true` if nothing is written.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// A rewritten method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodReport {
    /// `MethodDef` token
    pub token: u32,
    /// `Namespace.Type::Method`
    pub name: String,
    /// The invariant is checked at entry
    pub invariant_on_entry: bool,
    /// The invariant is checked before every return
    pub invariant_on_exit: bool,
    /// Postconditions replayed at every return
    pub postconditions: usize,
    /// Rewritten `ret` instructions
    pub return_sites: usize,
}

/// Summary of a weaving run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeaveReport {
    /// Module that was read
    pub input: Option<PathBuf>,
    /// Module that was written, `None` for dry runs and in-memory weaving
    pub output: Option<PathBuf>,
    /// Symbol file that was written
    pub symbols: Option<PathBuf>,
    /// Number of rewritten methods
    pub rewritten: usize,
    /// Types with an invariant method
    pub invariant_types: usize,
    /// Every rewritten method
    pub methods: Vec<MethodReport>,
}

/// Injects invariant and postcondition checks into a module.
#[derive(Debug, Clone, Default)]
pub struct Weaver {
    config: WeaverConfig,
}

impl Weaver {
    /// A weaver with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A weaver with `config`.
    #[must_use]
    pub fn with_config(config: WeaverConfig) -> Self {
        Weaver { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    /// Rewrite the module at `input`, writing to `output` or over the input.
    ///
    /// Returns the number of rewritten methods.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if `input` does not exist, contract errors from
    /// [`Weaver::weave_module`], and I/O errors while writing.
    pub fn rewrite(&self, input: &Path, output: Option<&Path>) -> Result<usize> {
        let mut config = self.config.clone();
        if let Some(output) = output {
            config.output = Some(output.to_path_buf());
        }
        Ok(Weaver::with_config(config).run(input)?.rewritten)
    }

    /// Rewrite the module at `input` according to the configuration.
    ///
    /// The module and its symbols are fully serialized before the first byte is written.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotFound`] if `input` does not exist,
    /// [`crate::Error::SymbolMismatch`] for a symbol file of another module, contract errors
    /// from [`Weaver::weave_module`], and I/O errors while writing.
    pub fn run(&self, input: &Path) -> Result<WeaveReport> {
        let file = File::from_file(input)?;
        let mut module = Module::from_bytes(file.data())?;

        let input_symbols = symbol_path(input);
        if self.config.symbols == SymbolMode::Auto && input_symbols.is_file() {
            let symbols = PortablePdb::from_file(&input_symbols)?;
            symbols.verify(module.pe(), module.data())?;
            log::debug!("loaded symbols from {}", input_symbols.display());
            module.symbols = Some(symbols);
        }
        drop(file);

        let mut report = self.weave_module(&mut module)?;
        report.input = Some(input.to_path_buf());

        let output = self
            .config
            .output
            .clone()
            .unwrap_or_else(|| input.to_path_buf());

        let image = module.to_bytes()?;
        let rows = module.tables.row_counts();
        let symbols = match module.symbols.as_mut() {
            Some(symbols) => {
                symbols.sync_type_system(&rows);
                Some(symbols.write()?)
            }
            None => None,
        };

        if self.config.dry_run {
            log::info!("dry run, {} not written", output.display());
            return Ok(report);
        }

        if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&output, &image)?;
        if let Some(symbols) = symbols {
            let output_symbols = symbol_path(&output);
            write_atomic(&output_symbols, &symbols)?;
            report.symbols = Some(output_symbols);
        }

        log::info!(
            "wrote {} ({} methods rewritten)",
            output.display(),
            report.rewritten
        );
        report.output = Some(output);
        Ok(report)
    }

    /// Weave a loaded module in memory.
    ///
    /// The module is only updated when every method was woven; on error it is left exactly
    /// as it was passed in.
    ///
    /// # Errors
    /// Returns [`crate::Error::MultipleInvariantMethods`] and
    /// [`crate::Error::InvalidInvariantMethod`] for broken invariant declarations,
    /// [`crate::Error::UnsupportedOperand`] for postconditions that cannot be replayed, and
    /// decoding errors for malformed bodies.
    pub fn weave_module(&self, module: &mut Module) -> Result<WeaveReport> {
        let mut staged = module.clone();
        let report = self.weave_staged(&mut staged)?;
        *module = staged;
        Ok(report)
    }

    fn weave_staged(&self, module: &mut Module) -> Result<WeaveReport> {
        let markers = &self.config.markers;
        module.tag_with(|attributes| markers.tags(attributes));

        let invariants = (0..module.types.len())
            .map(|ty| find_invariant_method(module, ty))
            .collect::<Result<Vec<_>>>()?;

        let mut report = WeaveReport {
            invariant_types: invariants.iter().flatten().count(),
            ..WeaveReport::default()
        };

        let owned: Vec<(usize, Option<usize>)> = module
            .types
            .iter()
            .zip(&invariants)
            .flat_map(|(ty, invariant)| ty.methods.iter().map(move |method| (*method, *invariant)))
            .collect();

        let mut rewriter = MethodRewriter::new(module, markers);
        let mut outcomes = Vec::new();
        for (method, invariant) in owned {
            if let Some(outcome) = rewriter.rewrite(method, invariant)? {
                outcomes.push((method, outcome));
            }
        }

        for (method, outcome) in outcomes {
            report.methods.push(method_report(module, method, outcome));
        }
        report.rewritten = report.methods.len();

        log::info!(
            "{} of {} methods rewritten, {} types with invariants",
            report.rewritten,
            module.methods.len(),
            report.invariant_types
        );
        Ok(report)
    }
}

fn method_report(module: &Module, method: usize, outcome: RewriteOutcome) -> MethodReport {
    let definition = &module.methods[method];
    MethodReport {
        token: definition.token.value(),
        name: definition.full_name().to_string(),
        invariant_on_entry: outcome.invariant_on_entry,
        invariant_on_exit: outcome.invariant_on_exit,
        postconditions: outcome.postconditions,
        return_sites: outcome.return_sites,
    }
}
