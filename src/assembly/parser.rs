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

//! Cursor over an IL byte stream.
//!
//! [`Parser`] keeps a position within a borrowed byte slice and reads little-endian
//! primitives through the [`crate::assembly::io::CilIO`] trait. The decoder uses it to walk
//! method bodies one instruction at a time; the interpreter uses [`Parser::seek`] to follow
//! branches.

use crate::{
    assembly::io::{read_le_at, CilIO},
    Result,
};

/// A little-endian cursor over a borrowed byte buffer.
///
/// # Examples
///
/// ```rust
/// use cilpreinit::assembly::Parser;
///
/// let data = [0x20, 0x2A, 0x00, 0x00, 0x00, 0x2A];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_le::<u8>()?, 0x20);
/// assert_eq!(parser.read_le::<i32>()?, 42);
/// assert!(parser.has_more_data());
/// # Ok::<(), cilpreinit::Error>(())
/// ```
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while the position is before the end of the buffer.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the position to `pos`.
    ///
    /// Seeking to exactly the end of the buffer is allowed; it leaves the parser without
    /// further data, which is how a branch to the end of a method body is observed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        if self.position + step > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position += step;
        Ok(())
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Get access to the underlying data buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Peek at the byte at the current position without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the buffer.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Read a type `T` from the current position in little-endian format and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read `length` raw bytes and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;
        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_to_end_is_allowed() {
        let data = [0x00, 0x2A];
        let mut parser = Parser::new(&data);
        parser.seek(2).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.seek(3).is_err());
    }

    #[test]
    fn read_bytes_advances() {
        let data = [1, 2, 3, 4];
        let mut parser = Parser::new(&data);
        parser.advance_by(1).unwrap();
        assert_eq!(parser.read_bytes(2).unwrap(), &[2, 3]);
        assert_eq!(parser.pos(), 3);
        assert_eq!(parser.peek_byte().unwrap(), 4);
        assert!(parser.read_bytes(2).is_err());
    }

    #[test]
    fn read_le_mixed_widths() {
        let data = [0xFE, 0x06, 0x01, 0x00, 0x00, 0x0A];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_le::<u8>().unwrap(), 0xFE);
        assert_eq!(parser.read_le::<u8>().unwrap(), 0x06);
        assert_eq!(parser.read_le::<u32>().unwrap(), 0x0A00_0001);
        assert!(parser.read_le::<u8>().is_err());
    }
}
