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

//! Metadata tokens embedded in CIL instruction operands.
//!
//! Instructions such as `ldsfld`, `call`, `newarr` or `ldstr` carry a 4-byte token whose
//! high byte names a metadata table and whose low 24 bits hold a 1-based row. A
//! [`crate::metadata::method::TokenTable`] maps these tokens to the type system handles
//! they denote; this module only deals with the raw encoding.
//!
//! # Examples
//!
//! ```rust
//! use cilpreinit::metadata::token::{Token, TokenKind};
//!
//! let token = Token::from_parts(TokenKind::Field, 3);
//! assert_eq!(token.value(), 0x0400_0003);
//! assert_eq!(token.kind(), Some(TokenKind::Field));
//! assert_eq!(token.row(), 3);
//! ```

use std::fmt;

/// The metadata tables a method body token can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `TypeDef`/`TypeRef`/`TypeSpec` collapsed into one table (0x02)
    Type,
    /// `Field` table (0x04)
    Field,
    /// `MethodDef`/`MemberRef`/`MethodSpec` collapsed into one table (0x06)
    Method,
    /// `#US` heap string literal (0x70)
    String,
}

impl TokenKind {
    /// Returns the high byte used for tokens of this kind.
    #[must_use]
    pub const fn table(self) -> u8 {
        match self {
            TokenKind::Type => 0x02,
            TokenKind::Field => 0x04,
            TokenKind::Method => 0x06,
            TokenKind::String => 0x70,
        }
    }

    /// Maps a table byte back to its kind.
    #[must_use]
    pub const fn from_table(table: u8) -> Option<Self> {
        match table {
            0x02 => Some(TokenKind::Type),
            0x04 => Some(TokenKind::Field),
            0x06 => Some(TokenKind::Method),
            0x70 => Some(TokenKind::String),
            _ => None,
        }
    }
}

/// A raw 32-bit metadata token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a token from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Builds a token from a table kind and a 1-based row.
    #[must_use]
    pub const fn from_parts(kind: TokenKind, row: u32) -> Self {
        Token(((kind.table() as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Table byte (high 8 bits)
    #[must_use]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Row (low 24 bits)
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Table kind, if the table byte is one a method body may reference.
    #[must_use]
    pub const fn kind(&self) -> Option<TokenKind> {
        TokenKind::from_table(self.table())
    }

    /// Returns true for the null token
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.row() == 0
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
        write!(f, "Token(0x{:08x}, {:?}, row: {})", self.0, self.kind(), self.row())
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
    fn test_from_parts() {
        let token = Token::from_parts(TokenKind::Method, 1);
        assert_eq!(token.value(), 0x0600_0001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
        assert_eq!(token.kind(), Some(TokenKind::Method));

        let string = Token::from_parts(TokenKind::String, 0x1234);
        assert_eq!(string.value(), 0x7000_1234);
    }

    #[test]
    fn test_unknown_table() {
        let token = Token::new(0x1100_0001);
        assert_eq!(token.kind(), None);
    }

    #[test]
    fn test_null_row() {
        assert!(Token::new(0x0400_0000).is_null());
        assert!(!Token::from_parts(TokenKind::Field, 7).is_null());
    }

    #[test]
    fn test_display_and_debug() {
        let token = Token::from_parts(TokenKind::Type, 2);
        assert_eq!(format!("{}", token), "0x02000002");
        let debug = format!("{:?}", token);
        assert!(debug.contains("Type"));
        assert!(debug.contains("row: 2"));
    }

    #[test]
    fn test_u32_conversion() {
        let token: Token = 0x0400_0009u32.into();
        let raw: u32 = token.into();
        assert_eq!(raw, 0x0400_0009);
    }
}
