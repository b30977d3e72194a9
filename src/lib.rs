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

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # cilpreinit
//!
//! Compile-time preinitialization of .NET static constructors.
//!
//! An ahead-of-time compiler normally emits a check before every access to a type with a
//! static constructor, and runs the constructor on first use. `cilpreinit` evaluates the
//! constructor during compilation instead, with an abstract CIL interpreter, and produces
//! the final values of the type's static fields as frozen data. When the interpreter
//! reaches anything it cannot reproduce exactly, the scan fails with a diagnostic and the
//! compiler keeps the runtime initialization.
//!
//! ## Quick Start
//!
//! ```rust
//! use cilpreinit::prelude::*;
//!
//! let types = TypeSystem::new(PointerSize::Bit64);
//! let ty = types.define_class("Demo", "Table");
//! let int32 = types.well_known(WellKnownType::Int32);
//! let count = types.add_field(ty, "Count", int32, FieldAttributes::STATIC)?;
//! let cctor = types.add_static_constructor(ty)?;
//!
//! let bodies = InMemoryMethodBodies::new(&types);
//! let mut builder = MethodBodyBuilder::new(&types);
//! builder
//!     .ldc_i4(6)?
//!     .ldc_i4(7)?
//!     .op("mul")?
//!     .field("stsfld", count)?
//!     .op("ret")?;
//! bodies.insert(cctor, builder.build()?);
//!
//! let ctx = PreinitContext::new(&types, &bodies);
//! let info = scan_type(&ctx, ty);
//! assert_eq!(info.field_value(count).and_then(FrozenValue::as_i32), Some(42));
//! # Ok::<(), cilpreinit::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - CIL instruction model, decoder and label-aware assembler
//! - [`metadata`] - Type system, method bodies and metadata tokens
//! - [`policy`] - Oracles the compiler answers: bodies, inlining, dataflow, read-only fields
//! - [`preinit`] - The interpreter and the [`preinit::scan_type`] entry point
//! - [`serialize`] - Writing frozen values and objects as bytes and relocations
//! - [`PreinitConfig`] - Instruction budget and allocation ceilings
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Failure model
//!
//! Two kinds of problems end a scan. Constructs the interpreter does not model (finally
//! regions, virtual dispatch, reference-typed array elements, thread statics, exhausted
//! budgets, ...) are the expected outcome for many types and are reported as
//! [`preinit::FailureKind::Unsupported`]. IL that violates verifier rules is reported as
//! [`preinit::FailureKind::InvalidProgram`] and logged as a warning, since it points at a
//! bug in whatever produced the IL.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// CIL instruction decoding and assembly.
///
/// The decoder turns raw method body bytes into [`assembly::Instruction`]s for the
/// interpreter; the [`assembly::InstructionEncoder`] turns mnemonics back into bytes, which
/// is how tests and tools author constructor bodies.
pub mod assembly;

/// Type system and method bodies.
pub mod metadata;

/// External oracles consulted during preinitialization.
pub mod policy;

/// Static constructor preinitialization.
pub mod preinit;

/// Emission of preinitialized data.
pub mod serialize;

mod config;

/// `cilpreinit` Result type.
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilpreinit` Error type.
///
/// See [`Error`] for the individual variants.
pub use error::Error;

/// Interpreter limits.
pub use config::PreinitConfig;
