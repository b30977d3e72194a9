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

//! Metadata the preinitializer consumes: tokens, the type system and method bodies.
//!
//! # Architecture
//!
//! - [`token`]: raw metadata tokens as found in instruction operands
//! - [`typesystem`]: types, fields, methods, layout and classification queries
//! - [`method`]: method bodies and their token tables

pub mod method;
pub mod token;
pub mod typesystem;
