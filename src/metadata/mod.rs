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

//! Metadata parsing, representation and serialization of .NET modules.
//!
//! # Key Components
//!
//! - [`Module`] - The owned object model of a loaded module
//! - [`cor20header`] - The CLI header found through the PE data directories
//! - [`root`] - Metadata root and stream directory
//! - [`streams`] - `#Strings`, `#US`, `#GUID` and `#Blob` heaps
//! - [`tables`] - Metadata tables
//! - [`signatures`] - Method, field, local and type signatures
//! - [`method`] - Method flags, body headers and exception sections
//! - [`token`] - Metadata table row references
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotweave::metadata::Module;
//!
//! let module = Module::from_file("Target.dll".as_ref())?;
//! println!("MVID {}", module.mvid);
//! println!("Methods: {}", module.methods().len());
//! # Ok::<(), dotweave::Error>(())
//! ```

/// Implementation of the CLI header
pub mod cor20header;
/// Implementation of method flags and bodies
pub mod method;
/// Implementation of the owned module object model
mod module;
/// Implementation of the metadata root
pub mod root;
/// Implementation of method and type signatures
pub mod signatures;
/// Implementation of the metadata heaps
pub mod streams;
/// Implementation of the metadata tables
pub mod tables;
/// Commonly used metadata token type
pub mod token;

pub use module::{
    MethodDefinition, MethodRef, Module, PropertyDefinition, Tags, TypeDefinition,
    WEAVE_SECTION,
};
