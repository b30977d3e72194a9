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

//! State shared by one top-level scan and every nested scan it triggers.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    metadata::typesystem::{MethodId, TypeId},
    policy::PreinitContext,
    preinit::{frozen::FrozenStatics, interpreter::TypeScan, PreinitStatistics},
    Error, Result,
};

/// One top-level scan.
///
/// The instruction counter, the recursion guard and the memo of nested results are owned
/// here and threaded through every [`TypeScan`] the top-level scan creates, so a nested
/// static constructor draws from the same budget as the constructor that needed it.
pub(crate) struct PreinitSession<'a> {
    pub(crate) ctx: PreinitContext<'a>,
    /// Instructions interpreted so far, across all nested scans
    pub(crate) instructions: usize,
    /// Methods currently being interpreted
    pub(crate) recursion: Vec<MethodId>,
    memo: HashMap<TypeId, Arc<FrozenStatics>>,
    nested_scans: indexmap::IndexMap<TypeId, usize>,
}

impl<'a> PreinitSession<'a> {
    pub(crate) fn new(ctx: PreinitContext<'a>) -> Self {
        PreinitSession {
            ctx,
            instructions: 0,
            recursion: Vec::new(),
            memo: HashMap::new(),
            nested_scans: indexmap::IndexMap::new(),
        }
    }

    /// Interprets the static constructor of `ty` as the outermost scan.
    ///
    /// # Errors
    /// Whatever the interpretation fails with.
    pub(crate) fn run(&mut self, ty: TypeId, cctor: MethodId) -> Result<FrozenStatics> {
        let mut scan = TypeScan::new(self, ty, 0);
        scan.scan_method(cctor, Vec::new())?;
        scan.freeze()
    }

    /// Final statics of `ty`, interpreting its static constructor on first use.
    ///
    /// Returns `None` when the nested constructor cannot be preinitialized. Invalid
    /// programs propagate, since they abort the whole top-level scan.
    ///
    /// # Errors
    /// [`crate::Error::InvalidProgram`] raised inside the nested constructor.
    pub(crate) fn nested_statics(
        &mut self,
        caller: MethodId,
        ty: TypeId,
    ) -> Result<Option<Arc<FrozenStatics>>> {
        if let Some(statics) = self.memo.get(&ty) {
            return Ok(Some(statics.clone()));
        }

        let types = self.ctx.types;
        let Some(cctor) = types.type_desc(ty).static_constructor() else {
            return Ok(None);
        };

        debug!(
            ty = %types.type_name(ty),
            caller = %types.method_name(caller),
            counter = self.instructions,
            "scanning nested static constructor"
        );

        self.recursion.push(caller);
        let base = self.instructions;
        let outcome = {
            let mut scan = TypeScan::new(self, ty, base);
            scan.scan_method(cctor, Vec::new())
                .and_then(|_| scan.freeze())
        };
        self.recursion.pop();
        *self.nested_scans.entry(ty).or_insert(0) += 1;

        match outcome {
            Ok(statics) => {
                let statics = Arc::new(statics);
                self.memo.insert(ty, statics.clone());
                Ok(Some(statics))
            }
            Err(Error::Preinit(reason)) => {
                debug!(ty = %types.type_name(ty), %reason, "nested static constructor not preinitialized");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    pub(crate) fn statistics(&self) -> PreinitStatistics {
        PreinitStatistics {
            instructions_executed: self.instructions,
            nested_scans: self.nested_scans.clone(),
        }
    }
}
