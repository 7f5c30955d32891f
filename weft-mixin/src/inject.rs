//! The injection subsystem: per-kind bytecode splicers and their
//! orchestration.
//!
//! Injectors run after the merge phase, so every handler they emit calls to
//! is already a (renamed, synthetic, private) method of the target class.
//! All node locations are [`weft_asm::insn::InsnId`]s collected during
//! `prepare`; arena identity keeps them valid across earlier injections'
//! rewrites.

use weft_asm::classfile::CodeBody;
use weft_asm::descriptor::{JavaType, MethodDescriptor};
use weft_asm::insn::{Insn, InsnList};
use weft_asm::opcode::Opcode;

use crate::error::{Result, TransformError};

mod args_class;
mod callback;
mod frame;
mod info;
mod modify_arg;
mod modify_constant;
mod modify_variable;
mod redirect;

pub use args_class::{args_class_name, generate_args_class, ARGS_CLASS};
pub use info::{GroupCounters, InjectionInfo};

/// Internal name of the callback-context runtime type for void targets.
pub const CALLBACK_INFO: &str = "weft/callback/CallbackInfo";
/// Internal name of the callback-context runtime type for non-void targets.
pub const CALLBACK_INFO_RETURNABLE: &str = "weft/callback/CallbackInfoReturnable";

/// The method an injection rewrites, viewed mutably.
pub(crate) struct InjectSite<'a> {
    /// Target class internal name.
    pub owner: &'a str,
    /// Target method name.
    pub method_name: &'a str,
    /// Target method descriptor.
    pub method_desc: &'a str,
    /// Flag whether the target method is static.
    pub method_static: bool,
    /// The method body.
    pub code: &'a mut CodeBody,
}

impl InjectSite<'_> {
    /// Parsed target method descriptor.
    pub fn desc(&self) -> Result<MethodDescriptor> {
        Ok(MethodDescriptor::parse(self.method_desc)?)
    }

    /// Allocate `slots` fresh locals, returning the first index.
    pub fn alloc_locals(&mut self, slots: u16) -> u16 {
        let base = self.code.max_locals;
        self.code.max_locals += slots;
        base
    }

    /// Record the extra operand-stack depth an injection needs.
    ///
    /// Budgets grow by the sum of all injections rather than their maximum.
    pub fn grow_stack(&mut self, extra: u16) {
        self.code.max_stack += extra;
    }
}

/// The merged handler an injection invokes.
#[derive(Debug, Clone)]
pub(crate) struct Handler<'a> {
    /// Class the handler was merged into (the target class).
    pub owner: &'a str,
    /// Post-merge handler name.
    pub name: &'a str,
    /// Handler descriptor.
    pub desc: &'a str,
    /// Flag whether the handler is static.
    pub is_static: bool,
    /// Mixin that declared the handler, for diagnostics.
    pub mixin: &'a str,
}

impl Handler<'_> {
    /// Parsed handler descriptor.
    pub fn parsed(&self) -> Result<MethodDescriptor> {
        Ok(MethodDescriptor::parse(self.desc)?)
    }

    /// The invocation instruction for this handler.
    ///
    /// Merged handlers are private, so instance handlers are bound with
    /// `invokespecial`.
    pub fn invoke(&self) -> Insn {
        let op = if self.is_static {
            Opcode::INVOKESTATIC
        } else {
            Opcode::INVOKESPECIAL
        };
        Insn::Method {
            op,
            owner: self.owner.to_string(),
            name: self.name.to_string(),
            desc: self.desc.to_string(),
            itf: false,
        }
    }

    /// Shorthand for an [`TransformError::InvalidInjection`] on this
    /// handler.
    pub fn error(&self, reason: impl Into<String>) -> TransformError {
        TransformError::injection(self.mixin, format!("{}{}", self.name, self.desc), reason)
    }
}

/// Emit loads for a run of values stored in consecutive locals.
pub(crate) fn load_sequence(seq: &mut InsnList, types: &[JavaType], mut slot: u16) {
    for ty in types {
        seq.push_back(Insn::Var(ty.load_op(), slot));
        slot += ty.size();
    }
}

/// Spill the top `types.len()` stack values (whose top is the LAST element
/// of `types`) into fresh consecutive locals starting at `base`; returns the
/// per-type slots.
pub(crate) fn spill_sequence(seq: &mut InsnList, types: &[JavaType], base: u16) -> Vec<u16> {
    let mut slots = Vec::with_capacity(types.len());
    let mut slot = base;
    for ty in types {
        slots.push(slot);
        slot += ty.size();
    }
    for (ty, slot) in types.iter().zip(&slots).rev() {
        seq.push_back(Insn::Var(ty.store_op(), *slot));
    }
    slots
}

/// Total slot size of a type sequence.
pub(crate) fn slot_count(types: &[JavaType]) -> u16 {
    types.iter().map(JavaType::size).sum()
}
