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

//! Builders for module images and method bodies.
//!
//! These produce the same image format [`crate::metadata::Module`] reads, which makes them
//! the tool of choice for constructing inputs in tests and benchmarks.
//!
//! # Key Components
//!
//! - [`ModuleBuilder`] - Types, members, references and attributes
//! - [`MethodBodyBuilder`] - A method body, assembled through an [`Assembler`]
//! - [`Assembler`] - Instruction emission with labels and exception clauses

mod method;
mod module;

pub use method::{Assembler, Label, MethodBodyBuilder};
pub use module::ModuleBuilder;
