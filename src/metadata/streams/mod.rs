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

//! Metadata heaps.
//!
//! All heaps are owned and append-only, which is what makes in-place weaving safe:
//! anything the weaver adds lands behind the existing data, so every offset stored in the
//! tables or in signatures keeps pointing at the same entry.

mod blob;
mod guid;
mod strings;
mod userstrings;

pub use blob::Blob;
pub use guid::GuidHeap;
pub use strings::Strings;
pub use userstrings::UserStrings;
