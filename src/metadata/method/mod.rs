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

//! Method bodies: IL, locals, exception regions and token resolution.
//!
//! # Key Components
//!
//! - [`MethodIL`]: an executable body, optionally parsed from ECMA-335 header bytes
//! - [`TokenTable`]: resolves instruction tokens to types, fields, methods and strings
//! - [`MethodBodyBuilder`]: assembles bodies from mnemonics
//! - [`ExceptionRegion`]: protected blocks and their handlers

mod body;
mod builder;
mod exceptions;

pub use body::{MethodIL, TokenTable, TokenTarget};
pub use builder::MethodBodyBuilder;
pub use exceptions::{ExceptionHandlerFlags, ExceptionRegion};
