//! Constant modifier: feeds a matched constant load through a handler.

use weft_asm::descriptor::JavaType;
use weft_asm::insn::{Insn, InsnId, InsnList};
use weft_asm::opcode::Opcode;

use crate::error::Result;
use crate::inject::{Handler, InjectSite};

/// Splice `handler(<constant>)` directly after the constant load at `at`.
pub(crate) fn inject(site: &mut InjectSite<'_>, at: InsnId, handler: &Handler<'_>) -> Result<()> {
    let constant_ty = match site.code.insns.get(at) {
        Insn::Simple(Opcode::ACONST_NULL) => {
            JavaType::Object("java/lang/Object".to_string())
        }
        insn => match insn.constant_value() {
            Some(constant) => JavaType::parse(&constant.type_desc())?,
            None => {
                return Err(handler.error(format!(
                    "located instruction {insn:?} is not a constant load"
                )))
            }
        },
    };

    let handler_desc = handler.parsed()?;
    let shape_ok = handler_desc.args.len() == 1
        && handler_desc.args[0] == constant_ty
        && handler_desc.ret == constant_ty;
    if !shape_ok {
        return Err(handler.error(format!(
            "constant modifiers for this constant must have shape ({constant_ty}){constant_ty}"
        )));
    }

    let mut seq = InsnList::new();
    if handler.is_static {
        seq.push_back(handler.invoke());
    } else {
        // the receiver must sit below the value; stash the constant first
        let slot = site.alloc_locals(constant_ty.size());
        seq.push_back(Insn::Var(constant_ty.store_op(), slot));
        seq.push_back(Insn::Var(Opcode::ALOAD, 0));
        seq.push_back(Insn::Var(constant_ty.load_op(), slot));
        seq.push_back(handler.invoke());
    }

    match site.code.insns.next(at) {
        Some(next) => {
            site.code.insns.splice_before(Some(next), &seq);
        }
        None => {
            site.code.insns.splice_before(None, &seq);
        }
    }
    site.code.modified = true;
    site.grow_stack(1);
    Ok(())
}
