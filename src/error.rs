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

use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure of the weaving pipeline surfaces as one of these variants. Structural
/// problems with the contracts declared in a module abort the whole rewrite, so callers
/// never observe a partially woven output.
///
/// # Error Categories
///
/// ## File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid module structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::NotSupported`] - Not a .NET module, or an unsupported metadata feature
/// - [`Error::GoblinErr`] - PE parsing errors from goblin
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::InvalidOpcode`] - Unknown or reserved CIL opcode
/// - [`Error::InvalidToken`] - Token that does not resolve to a metadata row
///
/// ## I/O Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::NotFound`] - The input module does not exist
/// - [`Error::SymbolMismatch`] - The symbol file belongs to a different module
///
/// ## Contract Errors
/// - [`Error::MultipleInvariantMethods`] - More than one tagged invariant method on a type
/// - [`Error::InvalidInvariantMethod`] - The tagged invariant method has the wrong shape
/// - [`Error::UnsupportedOperand`] - A contract block instruction cannot be duplicated
///
/// # Examples
///
/// ```rust,no_run
/// use dotweave::{Error, Weaver};
/// use std::path::Path;
///
/// match Weaver::new().rewrite(Path::new("Target.dll"), None) {
///     Ok(count) => println!("rewrote {count} methods"),
///     Err(Error::NotFound(path)) => eprintln!("missing input {}", path.display()),
///     Err(Error::MultipleInvariantMethods { type_name, .. }) => {
///         eprintln!("fix the invariants of {type_name}")
///     }
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // File parsing Errors
    /// The module is damaged and could not be parsed.
    ///
    /// The error records the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    ///
    /// This error occurs when trying to read data beyond the end of a buffer
    /// or stream. It's a safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Returned for inputs that are not .NET modules, for uncompressed (`#-`) metadata and
    /// for metadata versions this library cannot read.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// The input module path does not exist.
    #[error("Input module not found - {}", .0.display())]
    NotFound(PathBuf),

    /// Encountered an opcode that is reserved or not part of the CIL instruction set.
    ///
    /// The value is the full opcode, `0xFEXX` for two-byte opcodes.
    #[error("Invalid opcode - 0x{0:04X}")]
    InvalidOpcode(u16),

    /// A token does not reference a row that exists in the module.
    #[error("Token does not resolve to a metadata row - {0}")]
    InvalidToken(Token),

    /// The symbol file does not describe the module it was loaded with.
    #[error("Symbol file does not match module - {0}")]
    SymbolMismatch(String),

    /// A type declares more than one invariant method.
    ///
    /// # Fields
    ///
    /// * `type_name` - Full name of the offending type
    /// * `candidates` - Full names of every tagged method found on the type
    #[error(
        "Type '{type_name}' has multiple invariant methods, only one is supported: {}",
        candidates.join(", ")
    )]
    MultipleInvariantMethods {
        /// Full name of the type declaring the methods
        type_name: String,
        /// Every method carrying the invariant tag
        candidates: Vec<String>,
    },

    /// The tagged invariant method cannot be called as `this.Invariant()`.
    #[error("Invariant method must be {requirement}: {method}")]
    InvalidInvariantMethod {
        /// Full name of the invariant method
        method: String,
        /// What the method violates, e.g. "an instance method"
        requirement: &'static str,
    },

    /// An instruction of a contract block carries an operand that cannot be duplicated
    /// at an exit site.
    #[error("Unsupported operand '{operand}' on '{opcode}' in contract block of {method}")]
    UnsupportedOperand {
        /// Mnemonic of the instruction
        opcode: &'static str,
        /// Kind of operand that was found
        operand: &'static str,
        /// Full name of the method being rewritten
        method: String,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_invariants_lists_all_candidates() {
        let error = Error::MultipleInvariantMethods {
            type_name: "Shop.Cart".to_string(),
            candidates: vec!["Shop.Cart::Check".to_string(), "Shop.Cart::Verify".to_string()],
        };

        let message = error.to_string();
        assert!(message.contains("Type 'Shop.Cart' has multiple invariant methods"));
        assert!(message.contains("Shop.Cart::Check, Shop.Cart::Verify"));
    }

    #[test]
    fn malformed_records_location() {
        let error = malformed_error!("bad header - {}", 7);
        match error {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad header - 7");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("Expected Error::Malformed"),
        }
    }

    #[test]
    fn invalid_invariant_message() {
        let error = Error::InvalidInvariantMethod {
            method: "Shop.Cart::Check".to_string(),
            requirement: "an instance method",
        };
        assert_eq!(
            error.to_string(),
            "Invariant method must be an instance method: Shop.Cart::Check"
        );
    }
}
