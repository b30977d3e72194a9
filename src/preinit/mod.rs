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

//! Compile-time preinitialization of static constructors.
//!
//! This module evaluates the static constructor of a type with an abstract CIL interpreter
//! and, when every instruction it reaches can be modeled exactly, produces the final values
//! of the type's static fields as frozen data. A compiler embeds those values in its image
//! and drops the runtime initialization check of the type.
//!
//! # Architecture
//!
//! - [`value`] - Interpreted values, a closed sum type of scalars, heap handles and byrefs
//! - [`heap`] - Byte arena of one scan; byrefs are `(storage, offset)` handles into it
//! - [`access`] - Field get/set/address over objects, structs, spans and foreign snapshots
//! - [`stack`] - Typed evaluation stack and the location coercion rules
//! - [`interpreter`] - Instruction dispatch for one type's scan
//! - [`session`] - Instruction budget, recursion guard and nested constructor memo
//! - [`frozen`] - Immutable snapshots that outlive the scan
//!
//! Nothing here is ever executed for real. A construct the interpreter cannot reproduce
//! ends the scan with a diagnostic, and the caller falls back to running the constructor
//! at runtime.
//!
//! # Usage Examples
//!
//! ```rust
//! use cilpreinit::prelude::*;
//!
//! let types = TypeSystem::new(PointerSize::Bit64);
//! let ty = types.define_class("Demo", "Answer");
//! let int32 = types.well_known(WellKnownType::Int32);
//! let value = types.add_field(ty, "Value", int32, FieldAttributes::STATIC)?;
//! let cctor = types.add_static_constructor(ty)?;
//!
//! let bodies = InMemoryMethodBodies::new(&types);
//! let mut builder = MethodBodyBuilder::new(&types);
//! builder.ldc_i4(42)?.field("stsfld", value)?.op("ret")?;
//! bodies.insert(cctor, builder.build()?);
//!
//! let info = scan_type(&PreinitContext::new(&types, &bodies), ty);
//! assert!(info.is_preinitialized());
//! assert_eq!(info.field_value(value).and_then(FrozenValue::as_i32), Some(42));
//! # Ok::<(), cilpreinit::Error>(())
//! ```

pub(crate) mod access;
pub(crate) mod frozen;
pub(crate) mod heap;
pub(crate) mod interpreter;
pub(crate) mod session;
pub(crate) mod stack;
pub(crate) mod value;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, debug_span, warn};

use crate::{
    metadata::typesystem::{FieldId, TypeId},
    policy::PreinitContext,
    Error,
};

pub use frozen::{AllocationSite, ComEntry, FrozenContent, FrozenObject, FrozenValue};

use session::PreinitSession;

/// Why a type was not preinitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The constructor reached a construct the interpreter does not model
    Unsupported,
    /// The constructor violates a verifier rule
    InvalidProgram,
}

/// A failed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreinitFailure {
    /// Class of the failure
    pub kind: FailureKind,
    /// Human readable diagnostic, meant for build logs
    pub reason: String,
}

impl PreinitFailure {
    fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        PreinitFailure {
            kind,
            reason: reason.into(),
        }
    }
}

/// Counters of one top-level scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreinitStatistics {
    /// Instructions interpreted, nested constructors and callees included
    pub instructions_executed: usize,
    /// How often each nested static constructor was interpreted
    pub nested_scans: IndexMap<TypeId, usize>,
}

/// Outcome of preinitializing one type.
#[derive(Debug, Clone)]
pub struct PreinitializationInfo {
    ty: TypeId,
    outcome: Result<IndexMap<FieldId, FrozenValue>, PreinitFailure>,
    statistics: PreinitStatistics,
}

impl PreinitializationInfo {
    /// The scanned type.
    #[must_use]
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// True when the static field values were computed.
    #[must_use]
    pub fn is_preinitialized(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The failure, if the type was not preinitialized.
    #[must_use]
    pub fn failure(&self) -> Option<&PreinitFailure> {
        self.outcome.as_ref().err()
    }

    /// The failure diagnostic, if the type was not preinitialized.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure().map(|failure| failure.reason.as_str())
    }

    /// Final value of a static field of the scanned type.
    ///
    /// `None` for failed scans and for fields that have no preinitialized storage
    /// (literal, thread-static and RVA fields).
    #[must_use]
    pub fn field_value(&self, field: FieldId) -> Option<&FrozenValue> {
        self.outcome.as_ref().ok()?.get(&field)
    }

    /// All final static field values, in declaration order.
    pub fn field_values(&self) -> impl Iterator<Item = (FieldId, &FrozenValue)> {
        self.outcome
            .as_ref()
            .ok()
            .into_iter()
            .flat_map(|values| values.iter().map(|(&field, value)| (field, value)))
    }

    /// Counters of the scan.
    #[must_use]
    pub fn statistics(&self) -> &PreinitStatistics {
        &self.statistics
    }
}

/// Preinitializes the static fields of `ty`.
///
/// Never fails: every problem is reported through
/// [`PreinitializationInfo::failure`]. Each call uses its own heap, interned tables and
/// nested constructor memo, so concurrent calls for different types are independent.
///
/// # Arguments
///
/// * `ctx` - Type system, method bodies, oracles and limits
/// * `ty` - The type whose static constructor should be evaluated
#[must_use]
pub fn scan_type(ctx: &PreinitContext<'_>, ty: TypeId) -> PreinitializationInfo {
    let types = ctx.types;
    let span = debug_span!("preinit", ty = %types.type_name(ty));
    let _guard = span.enter();

    let fail = |kind, reason: &str| PreinitializationInfo {
        ty,
        outcome: Err(PreinitFailure::new(kind, reason)),
        statistics: PreinitStatistics::default(),
    };

    let desc = types.type_desc(ty);
    let cctor = match desc.static_constructor() {
        Some(cctor) if !desc.is_generic_definition() => cctor,
        _ => return fail(FailureKind::Unsupported, "Unsupported static constructor"),
    };

    if types.is_canonical_subtype(ty) {
        // shared code answers for every instantiation, so no values are produced
        if ctx
            .policy
            .can_preinitialize_all_concrete_forms_for_canon_form(types, ty)
        {
            return PreinitializationInfo {
                ty,
                outcome: Ok(IndexMap::new()),
                statistics: PreinitStatistics::default(),
            };
        }
        return fail(FailureKind::Unsupported, "Disallowed by policy");
    }
    if !ctx.policy.can_preinitialize(types, ty) {
        return fail(FailureKind::Unsupported, "Disallowed by policy");
    }

    let mut session = PreinitSession::new(*ctx);
    let outcome = session.run(ty, cctor);
    let statistics = session.statistics();

    let outcome = match outcome {
        Ok(statics) => {
            debug!(
                fields = statics.len(),
                instructions = statistics.instructions_executed,
                "preinitialized"
            );
            Ok(statics)
        }
        Err(Error::Preinit(reason)) => {
            debug!(%reason, "not preinitialized");
            Err(PreinitFailure::new(FailureKind::Unsupported, reason))
        }
        Err(Error::InvalidProgram { message, file, line }) => {
            warn!(%message, file, line, "invalid program in static constructor");
            Err(PreinitFailure::new(FailureKind::InvalidProgram, message))
        }
        Err(error) => {
            warn!(%error, "static constructor could not be interpreted");
            Err(PreinitFailure::new(FailureKind::InvalidProgram, error.to_string()))
        }
    };

    PreinitializationInfo {
        ty,
        outcome,
        statistics,
    }
}

/// Preinitializes many types in parallel.
///
/// Results are returned in the order of `types`. Every type gets an independent scan,
/// exactly as if [`scan_type`] was called for each.
#[must_use]
pub fn scan_types(ctx: &PreinitContext<'_>, types: &[TypeId]) -> Vec<PreinitializationInfo> {
    types.par_iter().map(|&ty| scan_type(ctx, ty)).collect()
}
