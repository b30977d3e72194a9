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

//! # cilpreinit Prelude
//!
//! Re-exports of the types needed to describe a type system, author constructor bodies
//! and run a preinitialization scan.
//!
//! ```rust
//! use cilpreinit::prelude::*;
//!
//! let types = TypeSystem::new(PointerSize::Bit32);
//! let bodies = InMemoryMethodBodies::new(&types);
//! let ctx = PreinitContext::new(&types, &bodies).with_config(PreinitConfig::strict());
//! assert_eq!(ctx.config.instruction_limit, 1_000);
//! ```

// ================================================================================================
// Core
// ================================================================================================

/// Error and result types
pub use crate::{Error, Result};

/// Interpreter limits
pub use crate::PreinitConfig;

// ================================================================================================
// Type System and Method Bodies
// ================================================================================================

/// Type system handles, descriptors and builders
pub use crate::metadata::typesystem::{
    FieldAttributes, FieldId, MethodAttributes, MethodId, MethodSignature, PointerSize,
    TypeAttributes, TypeCategory, TypeId, TypeKind, TypeSystem, WellKnownType,
};

/// Method bodies and their token tables
pub use crate::metadata::method::{
    ExceptionHandlerFlags, ExceptionRegion, MethodBodyBuilder, MethodIL, TokenTable, TokenTarget,
};

/// Metadata token
pub use crate::metadata::token::Token;

// ================================================================================================
// Policies
// ================================================================================================

/// Oracles and their default implementations
pub use crate::policy::{
    AnnotatedMembers, CompilationModuleGroup, DisabledPreinitializationPolicy, FlowAnnotations,
    InMemoryMethodBodies, InitOnlyFieldPolicy, MethodBodyProvider, NoFlowAnnotations,
    PreinitContext, PreinitializationPolicy, ReadOnlyFieldPolicy, SingleModuleGroup,
    TypeLoaderAwarePreinitializationPolicy,
};

// ================================================================================================
// Preinitialization
// ================================================================================================

/// Scan entry points and results
pub use crate::preinit::{
    scan_type, scan_types, AllocationSite, FailureKind, FrozenContent, FrozenObject, FrozenValue,
    PreinitFailure, PreinitStatistics, PreinitializationInfo,
};

// ================================================================================================
// Serialization
// ================================================================================================

/// Emission of frozen values
pub use crate::serialize::{
    NodeFactory, ObjectDataBuilder, RecordingNodeFactory, Reloc, SerializableValue, Symbol,
};
