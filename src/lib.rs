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

//! # dotweave
//!
//! A build-time weaver that injects design-by-contract checks into the CIL method bodies of a
//! compiled module. It rewrites a module in place (or to a new path), keeping branch targets,
//! exception clauses and debug sequence points consistent with the edited code.
//!
//! Two kinds of checks are woven:
//!
//! - **Class invariants** - a type may declare one parameterless, void returning instance
//!   method tagged with an invariant attribute. Public instance methods of the type call it on
//!   entry, and constructors and public instance methods call it before every return.
//!   Pure methods and the accessors of pure properties are left alone.
//! - **Postconditions** - `Contract.Ensures(...)` calls at the top of a method, closed by
//!   `Contract.EndContractBlock()`, are moved in front of every `ret`, with
//!   `Contract.Result<T>()` reading the value about to be returned.
//!
//! # Architecture
//!
//! - [`file`] - Memory-mapped or in-memory input and the PE/COFF layout of modules
//! - [`metadata`] - CLI header, metadata root, heaps, tables, signatures and method bodies
//! - [`assembly`] - CIL instruction decoding, an editable instruction stream and encoding
//! - [`symbols`] - Portable PDBs carrying sequence points and local scopes
//! - [`weaver`] - Contract discovery and method rewriting
//! - [`builder`] - Programmatic construction of modules, used to produce weaving input
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dotweave::Weaver;
//! use std::path::Path;
//!
//! let report = Weaver::new().run(Path::new("bin/Shop.dll"))?;
//! println!("{} methods rewritten", report.rewritten);
//! # Ok::<(), dotweave::Error>(())
//! ```
//!
//! # Weaving in memory
//!
//! ```rust,no_run
//! use dotweave::{metadata::Module, Weaver};
//!
//! let mut module = Module::from_file("bin/Shop.dll".as_ref())?;
//! let report = Weaver::new().weave_module(&mut module)?;
//! for method in &report.methods {
//!     println!("{}: {} return sites", method.name, method.return_sites);
//! }
//! std::fs::write("bin/Shop.woven.dll", module.to_bytes()?)?;
//! # Ok::<(), dotweave::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T>`]. Contract declaration problems are reported
//! before any method is touched, and nothing is written to disk unless the whole module was
//! woven and serialized successfully.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// CIL instruction decoding, editing and encoding
///
/// Method bodies are decoded into an [`assembly::InstructionStream`], where instructions are
/// addressed by identity rather than by offset. Branches, switch tables and exception regions
/// refer to instructions, so inserting or removing code never requires offset fix-ups by hand.
///
/// # Examples
///
/// ```rust,no_run
/// use dotweave::assembly::{decode_stream, encode_stream, Instruction};
///
/// let code = [0x02, 0x2A]; // ldarg.0, ret
/// let mut stream = decode_stream(&code, &[])?.stream;
/// stream.insert(0, Instruction::simple(0x00))?; // nop
/// assert_eq!(encode_stream(&stream)?.code, [0x00, 0x02, 0x2A]);
/// # Ok::<(), dotweave::Error>(())
/// ```
pub mod assembly;

/// Programmatic construction of modules
///
/// Used by tooling and tests to produce modules that declare contracts the way compiled user
/// code does.
pub mod builder;

/// Input files, either memory-mapped or owned buffers, and PE/COFF headers
pub mod file;

/// Module images and their metadata
pub mod metadata;

/// Portable PDBs
///
/// A module `Shop.dll` may be accompanied by the portable PDB `Shop.pdb`, carrying sequence
/// points that map IL offsets to source lines. The weaver loads it automatically when its id
/// matches the CodeView entry of the module, remaps every point and local scope through the
/// rewritten code and writes it next to the output module.
pub mod symbols;

/// Contract discovery and method rewriting
pub mod weaver;

/// `dotweave` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use dotweave::{Result, Weaver};
/// use std::path::Path;
///
/// fn weave_in_place(path: &Path) -> Result<usize> {
///     Weaver::new().rewrite(path, None)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `dotweave` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use dotweave::{Error, Weaver};
/// use std::path::Path;
///
/// match Weaver::new().run(Path::new("bin/Shop.dll")) {
///     Ok(report) => println!("{} methods rewritten", report.rewritten),
///     Err(Error::InvalidInvariantMethod { method, requirement }) => {
///         eprintln!("{method} must be {requirement}")
///     }
///     Err(e) => eprintln!("Error: {e}"),
/// }
/// ```
pub use error::Error;

/// Main entry point for weaving modules.
///
/// See [`weaver::Weaver`] for the available operations.
pub use weaver::{MethodReport, SymbolMode, WeaveReport, Weaver, WeaverConfig};

/// The owned object model of a loaded module.
pub use metadata::Module;

/// Provides access to low-level file and memory parsing utilities.
///
/// # Example
///
/// ```rust,no_run
/// use dotweave::Parser;
///
/// let data = [0x81, 0x00];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_compressed_uint()?, 0x100);
/// # Ok::<(), dotweave::Error>(())
/// ```
pub use file::{parser::Parser, File};
