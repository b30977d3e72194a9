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

use thiserror::Error;

/// Helper macro to build an [`Error::Malformed`] that records where it was raised.
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

/// Helper macro to build an [`Error::OutOfBounds`].
macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// Helper macro to build an [`Error::InvalidProgram`].
///
/// Used whenever interpreted IL violates a verifier rule (stack underflow, a local index
/// past the end of the locals, an operand of the wrong stack kind, ...). Valid input never
/// produces this error.
macro_rules! invalid_program {
    () => {
        crate::Error::InvalidProgram {
            message: String::from("Common Language Runtime detected an invalid program"),
            file: file!(),
            line: line!(),
        }
    };

    ($msg:expr) => {
        crate::Error::InvalidProgram {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidProgram {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Interpretation Errors
/// - [`Error::InvalidProgram`] - The interpreted IL violates a verifier rule
/// - [`Error::Preinit`] - The interpreter reached a construct it does not model
///
/// ## Decoding Errors
/// - [`Error::Malformed`] - Corrupted or invalid IL byte stream
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the IL byte stream
///
/// ## Assembler Errors
/// - [`Error::InvalidMnemonic`], [`Error::WrongOperandType`], [`Error::UnexpectedOperand`]
/// - [`Error::UndefinedLabel`], [`Error::DuplicateLabel`], [`Error::InvalidBranch`]
///
/// ## Type System Errors
/// - [`Error::TypeSystem`] - Invalid use of the type-system builder
///
/// Neither interpretation error escapes [`crate::preinit::scan_type`]: both are folded into a failed
/// [`crate::preinit::PreinitializationInfo`] so that the caller can fall back to running the static
/// constructor at runtime.
///
/// # Examples
///
/// ```rust
/// use cilpreinit::{assembly::InstructionEncoder, Error};
///
/// let mut encoder = InstructionEncoder::new();
/// match encoder.emit_instruction("not.an.opcode", None) {
///     Err(Error::InvalidMnemonic(name)) => assert_eq!(name, "not.an.opcode"),
///     other => panic!("unexpected result: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The interpreted method body is not valid IL.
    ///
    /// Raised for verifier violations such as popping from an empty evaluation stack,
    /// referencing a local or argument past the declared count, or feeding an operand of the
    /// wrong stack kind to an instruction. This indicates a defect in whatever produced the
    /// IL, not an unsupported construct.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violation
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invalid program - {file}:{line}: {message}")]
    InvalidProgram {
        /// The message to be printed for the InvalidProgram error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The interpreter cannot model a construct and gives up on the type.
    ///
    /// The payload is the formatted diagnostic, either
    /// `Method '<method>', opcode '<opcode>' <detail>` or `Method '<method>': <detail>`.
    #[error("{0}")]
    Preinit(String),

    /// The IL byte stream is damaged and could not be decoded.
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

    /// An out of bound access was attempted while reading IL bytes.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The assembler does not know this mnemonic.
    #[error("Invalid instruction mnemonic: {0}")]
    InvalidMnemonic(String),

    /// The operand supplied to the assembler does not match the opcode's operand type.
    #[error("Wrong operand type - expected {expected}")]
    WrongOperandType {
        /// The operand type required by the opcode
        expected: String,
    },

    /// An operand was supplied for an opcode that takes none.
    #[error("Unexpected operand provided for instruction that expects none")]
    UnexpectedOperand,

    /// A branch refers to a label that was never defined.
    #[error("Undefined label: {0}")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("Duplicate label: {0}")]
    DuplicateLabel(String),

    /// A branch instruction could not be encoded.
    #[error("Invalid branch: {0}")]
    InvalidBranch(String),

    /// Misuse of the type-system builder, e.g. adding an instance field to an enum or
    /// instantiating a generic definition with the wrong number of arguments.
    #[error("Type system error: {0}")]
    TypeSystem(String),
}

impl Error {
    /// Returns `true` if this error reports a verifier violation in the interpreted IL.
    #[must_use]
    pub fn is_invalid_program(&self) -> bool {
        matches!(self, Error::InvalidProgram { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_program_records_location() {
        let error = invalid_program!("stack underflow");
        match &error {
            Error::InvalidProgram { message, file, line } => {
                assert_eq!(message, "stack underflow");
                assert!(file.ends_with("error.rs"));
                assert!(*line > 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(error.is_invalid_program());
    }

    #[test]
    fn preinit_error_displays_reason_verbatim() {
        let error = Error::Preinit("Method 'Foo..cctor': Finally regions".to_string());
        assert_eq!(error.to_string(), "Method 'Foo..cctor': Finally regions");
        assert!(!error.is_invalid_program());
    }

    #[test]
    fn malformed_error_formats_arguments() {
        let error = malformed_error!("Reserved opcode: {:02X}", 0x24);
        assert!(error.to_string().contains("Reserved opcode: 24"));
    }
}
