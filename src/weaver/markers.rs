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

//! The closed set of names the weaver recognizes.
//!
//! Markers are matched structurally by declaring type full name and member name. Tags are
//! attribute type full names; several names may map to the same tag so that both the
//! library's own attributes and the BCL contract attributes are honored.

use crate::metadata::{MethodRef, Tags};

/// Namespace of the contract library.
pub const CONTRACT_NAMESPACE: &str = "Odin.DesignContracts";
/// Namespace of the BCL contract attributes.
pub const BCL_CONTRACT_NAMESPACE: &str = "System.Diagnostics.Contracts";

/// A method identified by its declaring type and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedMethod {
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Method name
    pub name: String,
}

impl QualifiedMethod {
    /// Create a method name.
    #[must_use]
    pub fn new(declaring_type: &str, name: &str) -> Self {
        QualifiedMethod {
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
        }
    }

    /// Returns `true` if `method` refers to this method. Generic instantiations match their
    /// definition.
    #[must_use]
    pub fn matches(&self, method: &MethodRef) -> bool {
        method.name == self.name
            && method.declaring_type.as_deref() == Some(self.declaring_type.as_str())
    }
}

/// Every name the weaver acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerCatalog {
    /// Declares a postcondition
    pub ensures: QualifiedMethod,
    /// Terminates the contract block
    pub end_contract_block: QualifiedMethod,
    /// Placeholder for the return value inside postconditions
    pub result: QualifiedMethod,
    /// Attributes tagging the invariant method of a type
    pub invariant_tags: Vec<String>,
    /// Attributes tagging pure methods and properties
    pub pure_tags: Vec<String>,
}

impl Default for MarkerCatalog {
    fn default() -> Self {
        let contract = format!("{CONTRACT_NAMESPACE}.Contract");
        MarkerCatalog {
            ensures: QualifiedMethod::new(&contract, "Ensures"),
            end_contract_block: QualifiedMethod::new(&contract, "EndContractBlock"),
            result: QualifiedMethod::new(&contract, "Result"),
            invariant_tags: vec![
                format!("{CONTRACT_NAMESPACE}.ClassInvariantMethodAttribute"),
                format!("{BCL_CONTRACT_NAMESPACE}.ContractInvariantMethodAttribute"),
            ],
            pure_tags: vec![
                format!("{CONTRACT_NAMESPACE}.PureAttribute"),
                format!("{BCL_CONTRACT_NAMESPACE}.PureAttribute"),
            ],
        }
    }
}

impl MarkerCatalog {
    /// Markers carried by a member with the given attribute types.
    #[must_use]
    pub fn tags(&self, attributes: &[String]) -> Tags {
        let mut tags = Tags::empty();
        for attribute in attributes {
            if self.invariant_tags.contains(attribute) {
                tags |= Tags::INVARIANT_METHOD;
            }
            if self.pure_tags.contains(attribute) {
                tags |= Tags::PURE;
            }
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_from_either_namespace() {
        let catalog = MarkerCatalog::default();
        let tags = catalog.tags(&[
            "System.Diagnostics.Contracts.ContractInvariantMethodAttribute".to_string(),
            "System.ObsoleteAttribute".to_string(),
        ]);
        assert_eq!(tags, Tags::INVARIANT_METHOD);

        let tags = catalog.tags(&[
            "Odin.DesignContracts.PureAttribute".to_string(),
            "Odin.DesignContracts.ClassInvariantMethodAttribute".to_string(),
        ]);
        assert_eq!(tags, Tags::INVARIANT_METHOD | Tags::PURE);
        assert!(catalog.tags(&[]).is_empty());
    }

    #[test]
    fn method_matching() {
        let catalog = MarkerCatalog::default();
        let ensures = MethodRef {
            declaring_type: Some("Odin.DesignContracts.Contract".to_string()),
            name: "Ensures".to_string(),
        };
        assert!(catalog.ensures.matches(&ensures));
        assert!(!catalog.result.matches(&ensures));

        let foreign = MethodRef {
            declaring_type: Some("System.Diagnostics.Contracts.Contract".to_string()),
            name: "Ensures".to_string(),
        };
        assert!(!catalog.ensures.matches(&foreign));

        let unnamed = MethodRef {
            declaring_type: None,
            name: "Ensures".to_string(),
        };
        assert!(!catalog.ensures.matches(&unnamed));
    }
}
