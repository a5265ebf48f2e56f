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

//! Metadata tokens.
//!
//! A token is a 32-bit reference to a metadata row: the high byte names the table and the
//! low 24 bits hold the 1-based row index. Instruction operands such as `call` and `ldfld`
//! carry tokens, as do the reference columns of the tables in [`crate::metadata::tables`].
//! User string literals (`ldstr`) use the pseudo-table `0x70` with a `#US` heap offset as
//! the row.

use std::fmt;

/// A metadata token (ECMA-335 II.22).
///
/// # Examples
///
/// ```rust
/// use dotweave::metadata::token::Token;
///
/// let token = Token::from_parts(0x06, 3);
/// assert_eq!(token.value(), 0x0600_0003);
/// assert_eq!(token.table(), 0x06);
/// assert_eq!(token.row(), 3);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token from a table id and a 1-based row index.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// The raw 32-bit value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table id (high byte).
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The 1-based row index (low 24 bits).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token(0x0A00_0005);
        assert_eq!(token.table(), 0x0A);
        assert_eq!(token.row(), 5);

        let token = Token::from_parts(0x2B, 0x00FF_FFFF);
        assert_eq!(token.value(), 0x2BFF_FFFF);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token::default().is_null());
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_token_display_debug() {
        let token = Token(0x0600_0001);
        assert_eq!(format!("{token}"), "0x06000001");
        assert_eq!(
            format!("{token:?}"),
            "Token(0x06000001, table: 0x06, row: 1)"
        );
    }

    #[test]
    fn test_token_from_conversion() {
        let token: Token = 0x0200_0002u32.into();
        let back: u32 = token.into();
        assert_eq!(back, 0x0200_0002);
    }
}
