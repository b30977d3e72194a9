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

//! Assembling [`MethodIL`] bodies from mnemonics.
//!
//! [`MethodBodyBuilder`] layers token allocation and local/exception-region bookkeeping
//! over [`InstructionEncoder`]. Calls derive their stack effect from the callee's
//! signature, so the builder's max-stack tracking stays exact.
//!
//! # Examples
//!
//! ```rust
//! use cilpreinit::metadata::{
//!     method::MethodBodyBuilder,
//!     typesystem::{FieldAttributes, PointerSize, TypeSystem, WellKnownType},
//! };
//!
//! let types = TypeSystem::new(PointerSize::Bit64);
//! let ty = types.define_class("Demo", "Answer");
//! let int32 = types.well_known(WellKnownType::Int32);
//! let field = types.add_field(ty, "Value", int32, FieldAttributes::STATIC)?;
//!
//! let mut builder = MethodBodyBuilder::new(&types);
//! builder.ldc_i4(42)?.field("stsfld", field)?.op("ret")?;
//! let body = builder.build()?;
//! assert_eq!(body.code, vec![0x1F, 42, 0x80, 0x01, 0x00, 0x00, 0x04, 0x2A]);
//! # Ok::<(), cilpreinit::Error>(())
//! ```

use crate::{
    assembly::{Immediate, InstructionEncoder, Operand},
    metadata::{
        method::{ExceptionHandlerFlags, ExceptionRegion, MethodIL, TokenTable},
        token::Token,
        typesystem::{FieldId, MethodId, TypeId, TypeSystem},
    },
    Error, Result,
};

struct PendingRegion {
    flags: ExceptionHandlerFlags,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    filter_start: Option<String>,
}

/// Builds a [`MethodIL`] instruction by instruction.
pub struct MethodBodyBuilder<'a> {
    types: &'a TypeSystem,
    encoder: InstructionEncoder,
    tokens: TokenTable,
    locals: Vec<TypeId>,
    regions: Vec<PendingRegion>,
    init_locals: bool,
}

impl<'a> MethodBodyBuilder<'a> {
    /// Creates an empty body.
    #[must_use]
    pub fn new(types: &'a TypeSystem) -> Self {
        MethodBodyBuilder {
            types,
            encoder: InstructionEncoder::new(),
            tokens: TokenTable::new(),
            locals: Vec::new(),
            regions: Vec::new(),
            init_locals: true,
        }
    }

    /// Declares a local and returns its slot.
    ///
    /// # Errors
    /// Returns [`Error::TypeSystem`] past 65535 locals.
    pub fn local(&mut self, ty: TypeId) -> Result<u16> {
        let slot = u16::try_from(self.locals.len())
            .map_err(|_| Error::TypeSystem("too many locals".to_string()))?;
        self.locals.push(ty);
        Ok(slot)
    }

    /// Controls the `localsinit` flag.
    pub fn init_locals(&mut self, init: bool) -> &mut Self {
        self.init_locals = init;
        self
    }

    /// Emits an instruction without operand.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn op(&mut self, mnemonic: &str) -> Result<&mut Self> {
        self.encoder.emit_instruction(mnemonic, None)?;
        Ok(self)
    }

    /// Emits an instruction with an explicit immediate operand.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn op_imm(&mut self, mnemonic: &str, immediate: Immediate) -> Result<&mut Self> {
        self.encoder
            .emit_instruction(mnemonic, Some(Operand::Immediate(immediate)))?;
        Ok(self)
    }

    /// Shortest `ldc.i4` form.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        self.encoder.emit_ldc_i4(value)?;
        Ok(self)
    }

    /// `ldc.i8`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.op_imm("ldc.i8", Immediate::Int64(value))
    }

    /// `ldc.r4`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_r4(&mut self, value: f32) -> Result<&mut Self> {
        self.op_imm("ldc.r4", Immediate::Float32(value))
    }

    /// `ldc.r8`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_r8(&mut self, value: f64) -> Result<&mut Self> {
        self.op_imm("ldc.r8", Immediate::Float64(value))
    }

    /// Shortest `ldarg` form.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldarg(index)?;
        Ok(self)
    }

    /// Shortest `starg` form.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn starg(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_starg(index)?;
        Ok(self)
    }

    /// Shortest `ldarga` form.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldarga(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldarga(index)?;
        Ok(self)
    }

    /// Shortest `ldloc` form.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldloc(index)?;
        Ok(self)
    }

    /// Shortest `stloc` form.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_stloc(index)?;
        Ok(self)
    }

    /// Shortest `ldloca` form.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldloca(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldloca(index)?;
        Ok(self)
    }

    /// Field instruction (`ldsfld`, `stfld`, `ldflda`, `ldtoken`, ...).
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn field(&mut self, mnemonic: &str, field: FieldId) -> Result<&mut Self> {
        let token = self.tokens.add_field(field);
        self.encoder
            .emit_instruction(mnemonic, Some(Operand::Token(token)))?;
        Ok(self)
    }

    /// Type instruction (`newarr`, `box`, `initobj`, `ldtoken`, `constrained.`, ...).
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn type_op(&mut self, mnemonic: &str, ty: TypeId) -> Result<&mut Self> {
        let token = self.tokens.add_type(ty);
        self.encoder
            .emit_instruction(mnemonic, Some(Operand::Token(token)))?;
        Ok(self)
    }

    /// `call`, `callvirt` or `newobj` with the stack effect of the callee's signature.
    ///
    /// # Errors
    /// Propagates encoder errors, or [`Error::TypeSystem`] for more than 255 arguments.
    pub fn call(&mut self, mnemonic: &str, method: MethodId) -> Result<&mut Self> {
        let desc = self.types.method(method);
        let void = self
            .types
            .well_known(crate::metadata::typesystem::WellKnownType::Void);
        let (pops, pushes) = if mnemonic == "newobj" {
            (desc.signature.parameters.len(), true)
        } else {
            (desc.argument_count(), desc.signature.return_type != void)
        };
        let pops = u8::try_from(pops)
            .map_err(|_| Error::TypeSystem("too many call arguments".to_string()))?;

        let token = self.tokens.add_method(method);
        self.encoder
            .emit_call(mnemonic, Some(Operand::Token(token)), pops, pushes)?;
        Ok(self)
    }

    /// `ldftn`/`ldvirtftn`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn method_op(&mut self, mnemonic: &str, method: MethodId) -> Result<&mut Self> {
        let token = self.tokens.add_method(method);
        self.encoder
            .emit_instruction(mnemonic, Some(Operand::Token(token)))?;
        Ok(self)
    }

    /// `ldstr`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldstr(&mut self, value: &str) -> Result<&mut Self> {
        let token = self.tokens.add_string(value);
        self.encoder
            .emit_instruction("ldstr", Some(Operand::Token(token)))?;
        Ok(self)
    }

    /// Instruction with a raw token the table does not know, for malformed bodies.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn raw_token(&mut self, mnemonic: &str, token: Token) -> Result<&mut Self> {
        self.encoder
            .emit_instruction(mnemonic, Some(Operand::Token(token)))?;
        Ok(self)
    }

    /// Branch to a label.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn branch(&mut self, mnemonic: &str, label: &str) -> Result<&mut Self> {
        self.encoder.emit_branch(mnemonic, label)?;
        Ok(self)
    }

    /// `switch` over labels.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn switch(&mut self, labels: &[&str]) -> Result<&mut Self> {
        self.encoder.emit_switch(labels)?;
        Ok(self)
    }

    /// Places a label at the current position.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] if it already exists.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        self.encoder.define_label(name)?;
        Ok(self)
    }

    /// Places a handler entry label. Catch and filter handlers start with the exception
    /// object on the stack.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] if it already exists.
    pub fn handler_label(&mut self, name: &str, flags: ExceptionHandlerFlags) -> Result<&mut Self> {
        self.encoder.define_label(name)?;
        let catches = !flags.intersects(ExceptionHandlerFlags::FINALLY | ExceptionHandlerFlags::FAULT);
        self.encoder.set_stack_depth(i16::from(catches));
        Ok(self)
    }

    /// Records an exception region delimited by labels, resolved in [`Self::build`].
    pub fn region(
        &mut self,
        flags: ExceptionHandlerFlags,
        try_labels: (&str, &str),
        handler_labels: (&str, &str),
    ) -> &mut Self {
        self.regions.push(PendingRegion {
            flags,
            try_start: try_labels.0.to_string(),
            try_end: try_labels.1.to_string(),
            handler_start: handler_labels.0.to_string(),
            handler_end: handler_labels.1.to_string(),
            filter_start: None,
        });
        self
    }

    /// Records a filter region; `filter` labels the start of the filter block.
    pub fn filter_region(
        &mut self,
        try_labels: (&str, &str),
        filter: &str,
        handler_labels: (&str, &str),
    ) -> &mut Self {
        self.region(ExceptionHandlerFlags::FILTER, try_labels, handler_labels);
        if let Some(region) = self.regions.last_mut() {
            region.filter_start = Some(filter.to_string());
        }
        self
    }

    /// Resolves labels and produces the body.
    ///
    /// # Errors
    /// Returns [`Error::UndefinedLabel`] for a branch or region label that was never placed.
    pub fn build(self) -> Result<MethodIL> {
        let (code, max_stack, labels) = self.encoder.finalize()?;
        let position = |label: &str| {
            labels
                .get(label)
                .copied()
                .ok_or_else(|| Error::UndefinedLabel(label.to_string()))
        };

        let mut exception_regions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let try_offset = position(&region.try_start)?;
            let handler_offset = position(&region.handler_start)?;
            let filter = match &region.filter_start {
                Some(label) => position(label)?,
                None => 0,
            };
            exception_regions.push(ExceptionRegion {
                flags: region.flags,
                try_offset,
                try_length: position(&region.try_end)?.saturating_sub(try_offset),
                handler_offset,
                handler_length: position(&region.handler_end)?.saturating_sub(handler_offset),
                class_token_or_filter_offset: filter,
            });
        }

        Ok(MethodIL {
            code,
            max_stack,
            locals: self.locals,
            init_locals: self.init_locals,
            exception_regions,
            tokens: self.tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::decode_stream,
        metadata::typesystem::{
            FieldAttributes, MethodAttributes, MethodSignature, PointerSize, WellKnownType,
        },
    };

    #[test]
    fn test_call_stack_effect() -> Result<()> {
        let types = TypeSystem::new(PointerSize::Bit64);
        let ty = types.define_class("Test", "Math");
        let int32 = types.well_known(WellKnownType::Int32);
        let add = types.add_method(
            ty,
            "Add",
            MethodSignature::new_static(vec![int32, int32], int32),
            MethodAttributes::STATIC,
        );

        let mut builder = MethodBodyBuilder::new(&types);
        builder.ldc_i4(1)?.ldc_i4(2)?.call("call", add)?.op("pop")?.op("ret")?;
        let body = builder.build().unwrap();

        assert_eq!(body.max_stack, 2);
        assert_eq!(body.tokens.resolve_method(Token::new(0x0600_0001)), Some(add));
        Ok(())
    }

    #[test]
    fn test_stack_underflow_is_reported() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let mut builder = MethodBodyBuilder::new(&types);
        assert!(builder.op("pop").is_err());
    }

    #[test]
    fn test_regions_resolve_labels() -> Result<()> {
        let types = TypeSystem::new(PointerSize::Bit64);
        let mut builder = MethodBodyBuilder::new(&types);
        builder
            .label("try")?
            .op("nop")?
            .branch("leave.s", "end")?
            .handler_label("finally", ExceptionHandlerFlags::FINALLY)?
            .op("endfinally")?
            .label("end")?
            .op("ret")?;
        builder.region(
            ExceptionHandlerFlags::FINALLY,
            ("try", "finally"),
            ("finally", "end"),
        );
        let body = builder.build().unwrap();

        assert_eq!(body.exception_regions.len(), 1);
        let region = body.exception_regions[0];
        assert_eq!(region.try_offset, 0);
        assert_eq!(region.try_length, 3);
        assert_eq!(region.handler_offset, 3);
        assert_eq!(region.handler_length, 1);
        assert!(body.has_finally());
        Ok(())
    }

    #[test]
    fn test_tokens_decode_back() -> Result<()> {
        let types = TypeSystem::new(PointerSize::Bit64);
        let ty = types.define_class("Test", "Holder");
        let int32 = types.well_known(WellKnownType::Int32);
        let field = types.add_field(ty, "X", int32, FieldAttributes::STATIC).unwrap();

        let mut builder = MethodBodyBuilder::new(&types);
        builder.ldstr("text")?.op("pop")?.field("ldsfld", field)?.op("pop")?.op("ret")?;
        let body = builder.build().unwrap();
        let instructions = decode_stream(&body.code).unwrap();

        let string_token = instructions[0].get_token_operand().unwrap();
        assert_eq!(body.tokens.resolve_string(string_token).as_deref(), Some("text"));
        let field_token = instructions[2].get_token_operand().unwrap();
        assert_eq!(body.tokens.resolve_field(field_token), Some(field));
        Ok(())
    }

    #[test]
    fn test_undefined_region_label() {
        let types = TypeSystem::new(PointerSize::Bit64);
        let mut builder = MethodBodyBuilder::new(&types);
        builder.op("ret").unwrap();
        builder.region(ExceptionHandlerFlags::FAULT, ("a", "b"), ("c", "d"));
        assert!(matches!(builder.build(), Err(Error::UndefinedLabel(_))));
    }
}
