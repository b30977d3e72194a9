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

//! Method bodies as the interpreter consumes them.
//!
//! A [`MethodIL`] bundles the raw IL stream with everything needed to execute it without
//! going back to metadata: local variable types, exception regions and a [`TokenTable`]
//! resolving the tokens embedded in the instruction stream.
//!
//! Bodies are usually produced by [`crate::metadata::method::MethodBodyBuilder`], but
//! [`MethodIL::parse`] also accepts the tiny and fat header formats of ECMA-335 II.25.4,
//! so bodies lifted from an image can be fed in directly.

use std::sync::Arc;

use bitflags::bitflags;
use indexmap::IndexSet;

use crate::{
    assembly::io::{read_le, read_le_at},
    metadata::{
        method::{ExceptionHandlerFlags, ExceptionRegion},
        token::{Token, TokenKind},
        typesystem::{FieldId, MethodId, TypeId},
    },
    Error::OutOfBounds,
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct MethodBodyFlags: u16 {
        const TINY_FORMAT = 0x2;
        const FAT_FORMAT = 0x3;
        const MORE_SECTS = 0x8;
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SectionFlags: u8 {
        const EHTABLE = 0x1;
        const OPT_ILTABLE = 0x2;
        const FAT_FORMAT = 0x40;
        const MORE_SECTS = 0x80;
    }
}

/// What a token in a method body refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenTarget {
    /// A type
    Type(TypeId),
    /// A field
    Field(FieldId),
    /// A method
    Method(MethodId),
    /// A user string literal
    String(Arc<str>),
}

/// Per-body mapping from metadata tokens to type system handles.
///
/// Tokens are allocated densely per kind; adding the same target twice returns the same
/// token.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    types: IndexSet<TypeId>,
    fields: IndexSet<FieldId>,
    methods: IndexSet<MethodId>,
    strings: IndexSet<Arc<str>>,
}

fn row_token(kind: TokenKind, index: usize) -> Token {
    #[allow(clippy::cast_possible_truncation)]
    Token::from_parts(kind, index as u32 + 1)
}

impl TokenTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a type.
    pub fn add_type(&mut self, ty: TypeId) -> Token {
        row_token(TokenKind::Type, self.types.insert_full(ty).0)
    }

    /// Token for a field.
    pub fn add_field(&mut self, field: FieldId) -> Token {
        row_token(TokenKind::Field, self.fields.insert_full(field).0)
    }

    /// Token for a method.
    pub fn add_method(&mut self, method: MethodId) -> Token {
        row_token(TokenKind::Method, self.methods.insert_full(method).0)
    }

    /// Token for a string literal.
    pub fn add_string(&mut self, value: &str) -> Token {
        row_token(TokenKind::String, self.strings.insert_full(Arc::from(value)).0)
    }

    /// Resolves a token of any kind.
    #[must_use]
    pub fn resolve(&self, token: Token) -> Option<TokenTarget> {
        let index = (token.row() as usize).checked_sub(1)?;
        match token.kind()? {
            TokenKind::Type => self.types.get_index(index).copied().map(TokenTarget::Type),
            TokenKind::Field => self.fields.get_index(index).copied().map(TokenTarget::Field),
            TokenKind::Method => self.methods.get_index(index).copied().map(TokenTarget::Method),
            TokenKind::String => self.strings.get_index(index).cloned().map(TokenTarget::String),
        }
    }

    /// Resolves a type token.
    #[must_use]
    pub fn resolve_type(&self, token: Token) -> Option<TypeId> {
        match self.resolve(token)? {
            TokenTarget::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Resolves a field token.
    #[must_use]
    pub fn resolve_field(&self, token: Token) -> Option<FieldId> {
        match self.resolve(token)? {
            TokenTarget::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Resolves a method token.
    #[must_use]
    pub fn resolve_method(&self, token: Token) -> Option<MethodId> {
        match self.resolve(token)? {
            TokenTarget::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Resolves a string token.
    #[must_use]
    pub fn resolve_string(&self, token: Token) -> Option<Arc<str>> {
        match self.resolve(token)? {
            TokenTarget::String(value) => Some(value),
            _ => None,
        }
    }

    /// Total number of entries across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len() + self.fields.len() + self.methods.len() + self.strings.len()
    }

    /// True if no token was allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An executable method body.
#[derive(Debug, Clone)]
pub struct MethodIL {
    /// IL instruction stream
    pub code: Vec<u8>,
    /// Declared maximum evaluation stack depth
    pub max_stack: u16,
    /// Local variable types, in slot order
    pub locals: Vec<TypeId>,
    /// Whether locals start zeroed (`localsinit`)
    pub init_locals: bool,
    /// Exception regions, innermost first
    pub exception_regions: Vec<ExceptionRegion>,
    /// Token resolution for the instruction stream
    pub tokens: TokenTable,
}

impl MethodIL {
    /// Body with the given code and nothing else.
    #[must_use]
    pub fn new(code: Vec<u8>) -> Self {
        MethodIL {
            code,
            max_stack: 8,
            locals: Vec::new(),
            init_locals: true,
            exception_regions: Vec::new(),
            tokens: TokenTable::new(),
        }
    }

    /// Replaces the local variable types.
    #[must_use]
    pub fn with_locals(mut self, locals: Vec<TypeId>) -> Self {
        self.locals = locals;
        self
    }

    /// Replaces the token table.
    #[must_use]
    pub fn with_tokens(mut self, tokens: TokenTable) -> Self {
        self.tokens = tokens;
        self
    }

    /// Replaces the exception regions.
    #[must_use]
    pub fn with_exception_regions(mut self, regions: Vec<ExceptionRegion>) -> Self {
        self.exception_regions = regions;
        self
    }

    /// True if any region is a `finally` clause.
    #[must_use]
    pub fn has_finally(&self) -> bool {
        self.exception_regions.iter().any(ExceptionRegion::is_finally)
    }

    /// Parses a method body in ECMA-335 tiny or fat format.
    ///
    /// The local variable signature token of a fat header is not resolved; callers supply
    /// the already-resolved local types and token table.
    ///
    /// # Arguments
    /// * `data` - Header, code and trailing data sections
    /// * `locals` - Local variable types
    /// * `tokens` - Resolution for tokens inside the code
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is truncated, or
    /// [`crate::Error::Malformed`] if the header is neither tiny nor fat.
    pub fn parse(data: &[u8], locals: Vec<TypeId>, tokens: TokenTable) -> Result<MethodIL> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodIL {
                    code: data[1..=size_code].to_vec(),
                    max_stack: 8,
                    locals,
                    init_locals: false,
                    exception_regions: Vec::new(),
                    tokens,
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = usize::from(first_duo >> 12) * 4;
                let size_code = read_le::<u32>(&data[4..])? as usize;
                if size_header < 12 || data.len() < size_code + size_header {
                    return Err(OutOfBounds);
                }

                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = read_le::<u16>(&data[2..])?;
                let code = data[size_header..size_header + size_code].to_vec();

                let exception_regions = if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    // Sections start 4-byte aligned after the code
                    let cursor = (size_header + size_code + 3) & !3;
                    parse_sections(data, cursor)?
                } else {
                    Vec::new()
                };

                Ok(MethodIL {
                    code,
                    max_stack,
                    locals,
                    init_locals: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    exception_regions,
                    tokens,
                })
            }
            _ => Err(malformed_error!(
                "Method header is neither fat nor tiny - {}",
                first_byte
            )),
        }
    }
}

fn parse_sections(data: &[u8], mut cursor: usize) -> Result<Vec<ExceptionRegion>> {
    let mut regions = Vec::new();

    while data.len() >= cursor + 4 {
        let section = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
        if !section.contains(SectionFlags::EHTABLE) {
            break;
        }

        let fat = section.contains(SectionFlags::FAT_FORMAT);
        let size = if fat {
            (read_le::<u32>(&data[cursor + 1..])? & 0x00FF_FFFF) as usize
        } else {
            usize::from(read_le::<u8>(&data[cursor + 1..])?)
        };
        if size < 4 || data.len() < cursor + size {
            return Err(OutOfBounds);
        }

        let mut clause = cursor + 4;
        if fat {
            for _ in 0..(size - 4) / 24 {
                #[allow(clippy::cast_possible_truncation)]
                let flags = read_le_at::<u32>(data, &mut clause)? as u16;
                regions.push(ExceptionRegion {
                    flags: ExceptionHandlerFlags::from_bits_truncate(flags),
                    try_offset: read_le_at::<u32>(data, &mut clause)?,
                    try_length: read_le_at::<u32>(data, &mut clause)?,
                    handler_offset: read_le_at::<u32>(data, &mut clause)?,
                    handler_length: read_le_at::<u32>(data, &mut clause)?,
                    class_token_or_filter_offset: read_le_at::<u32>(data, &mut clause)?,
                });
            }
        } else {
            for _ in 0..(size - 4) / 12 {
                regions.push(ExceptionRegion {
                    flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(
                        data,
                        &mut clause,
                    )?),
                    try_offset: u32::from(read_le_at::<u16>(data, &mut clause)?),
                    try_length: u32::from(read_le_at::<u8>(data, &mut clause)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, &mut clause)?),
                    handler_length: u32::from(read_le_at::<u8>(data, &mut clause)?),
                    class_token_or_filter_offset: read_le_at::<u32>(data, &mut clause)?,
                });
            }
        }

        if !section.contains(SectionFlags::MORE_SECTS) {
            break;
        }
        cursor += size;
    }

    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_token_table_dedupes() {
        let mut tokens = TokenTable::new();
        let first = tokens.add_string("hello");
        let second = tokens.add_string("hello");
        let other = tokens.add_string("world");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.value(), 0x7000_0001);
        assert_eq!(tokens.resolve_string(other).as_deref(), Some("world"));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_token_table_kind_mismatch() {
        let mut tokens = TokenTable::new();
        let token = tokens.add_type(TypeId::new(3));
        assert_eq!(tokens.resolve_type(token), Some(TypeId::new(3)));
        assert_eq!(tokens.resolve_field(token), None);
        assert_eq!(tokens.resolve(Token::new(0x0200_0000)), None);
        assert_eq!(tokens.resolve(Token::new(0x0200_0009)), None);
    }

    #[test]
    fn test_parse_tiny() {
        // ldc.i4.1; ret
        let data = [0x02 | (2 << 2), 0x17, 0x2A];
        let body = MethodIL::parse(&data, Vec::new(), TokenTable::new()).unwrap();
        assert_eq!(body.code, vec![0x17, 0x2A]);
        assert!(body.exception_regions.is_empty());
        assert!(!body.init_locals);
    }

    #[test]
    fn test_parse_tiny_truncated() {
        let data = [0x02 | (5 << 2), 0x17];
        assert!(matches!(
            MethodIL::parse(&data, Vec::new(), TokenTable::new()),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn test_parse_fat_with_small_eh_section() {
        let mut data = vec![
            0x1B, 0x30, // fat, more sects, init locals, header size 3 dwords
            0x02, 0x00, // max stack
            0x04, 0x00, 0x00, 0x00, // code size
            0x00, 0x00, 0x00, 0x00, // local sig token
            0x00, 0xDC, 0xDC, 0x2A, // nop; endfinally; endfinally; ret
        ];
        data.extend_from_slice(&[
            0x01, 0x10, 0x00, 0x00, // small EH table, 16 bytes
            0x02, 0x00, // finally
            0x00, 0x00, 0x01, // try 0..1
            0x01, 0x00, 0x02, // handler 1..3
            0x00, 0x00, 0x00, 0x00,
        ]);

        let body = MethodIL::parse(&data, Vec::new(), TokenTable::new()).unwrap();
        assert_eq!(body.max_stack, 2);
        assert!(body.init_locals);
        assert_eq!(body.code.len(), 4);
        assert_eq!(body.exception_regions.len(), 1);
        assert!(body.has_finally());
        assert_eq!(body.exception_regions[0].handler_offset, 1);
        assert_eq!(body.exception_regions[0].handler_length, 2);
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        assert!(MethodIL::parse(&[0x01], Vec::new(), TokenTable::new()).is_err());
        assert!(MethodIL::parse(&[], Vec::new(), TokenTable::new()).is_err());
    }
}
