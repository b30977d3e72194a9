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

//! Interpreter limits for static constructor preinitialization
//!
//! Every bound the interpreter enforces while evaluating a static constructor lives here, so
//! that a compiler driver can tighten or relax them in one place.

/// Limits applied while interpreting one static constructor and everything it calls.
///
/// The instruction budget is shared by the whole recursive evaluation of a type: nested
/// static constructors and inlined callees draw from the same counter as the outermost
/// constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreinitConfig {
    /// Maximum number of IL instructions interpreted before the type is rejected (default: 100,000)
    pub instruction_limit: usize,

    /// Largest element count accepted by `newarr` (default: 8192)
    pub max_array_elements: usize,

    /// Largest byte count accepted by `localloc` (default: 8192)
    pub max_localloc_bytes: usize,

    /// Bytes one type's heap may hold before the type is rejected (default: 64 MiB)
    ///
    /// Nothing allocated during a scan is reclaimed before the scan ends, so a constructor
    /// that allocates in a loop is bounded by this ceiling rather than by the instruction
    /// budget alone.
    pub max_heap_bytes: usize,
}

impl Default for PreinitConfig {
    fn default() -> Self {
        Self {
            instruction_limit: 100_000,
            max_array_elements: 8192,
            max_localloc_bytes: 8192,
            max_heap_bytes: 64 * 1024 * 1024,
        }
    }
}

impl PreinitConfig {
    /// Creates a configuration with small budgets.
    ///
    /// Useful for tooling that wants an answer quickly and for tests that exercise the
    /// budget paths without executing a hundred thousand instructions.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            instruction_limit: 1_000,
            max_array_elements: 256,
            max_localloc_bytes: 256,
            max_heap_bytes: 1024 * 1024,
        }
    }

    /// Sets the instruction budget.
    #[must_use]
    pub fn with_instruction_limit(mut self, limit: usize) -> Self {
        self.instruction_limit = limit;
        self
    }

    /// Sets the `newarr` element ceiling.
    #[must_use]
    pub fn with_max_array_elements(mut self, max: usize) -> Self {
        self.max_array_elements = max;
        self
    }

    /// Sets the `localloc` byte ceiling.
    #[must_use]
    pub fn with_max_localloc_bytes(mut self, max: usize) -> Self {
        self.max_localloc_bytes = max;
        self
    }

    /// Sets the per-type heap ceiling.
    #[must_use]
    pub fn with_max_heap_bytes(mut self, max: usize) -> Self {
        self.max_heap_bytes = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_limits() {
        let config = PreinitConfig::default();
        assert_eq!(config.instruction_limit, 100_000);
        assert_eq!(config.max_array_elements, 8192);
        assert_eq!(config.max_localloc_bytes, 8192);
        assert_eq!(config.max_heap_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn builder_methods_override_single_limits() {
        let config = PreinitConfig::strict()
            .with_instruction_limit(42)
            .with_max_localloc_bytes(16)
            .with_max_heap_bytes(4096);
        assert_eq!(config.instruction_limit, 42);
        assert_eq!(config.max_array_elements, 256);
        assert_eq!(config.max_localloc_bytes, 16);
        assert_eq!(config.max_heap_bytes, 4096);
    }
}
