//! Redirect injector: replaces a method invocation or field access with a
//! handler call.

use weft_asm::descriptor::{JavaType, MethodDescriptor};
use weft_asm::insn::{Insn, InsnId, InsnList};
use weft_asm::opcode::Opcode;

use crate::error::Result;
use crate::inject::{load_sequence, slot_count, spill_sequence, Handler, InjectSite};

/// Expected handler descriptor shapes for the access at `at`.
///
/// The bare shape takes the receiver (for instance accesses) and the
/// original operands and returns the original result; the extended shape
/// additionally appends the enclosing target method's own arguments so the
/// handler can observe caller context.
fn expected_shapes(
    site: &InjectSite<'_>,
    at: InsnId,
    handler: &Handler<'_>,
) -> Result<(Vec<JavaType>, JavaType)> {
    let insn = site.code.insns.get(at).clone();
    match insn {
        Insn::Method {
            op,
            owner,
            desc,
            ..
        } => {
            let invoked = MethodDescriptor::parse(&desc)?;
            let mut args = Vec::new();
            if op != Opcode::INVOKESTATIC {
                args.push(JavaType::Object(owner));
            }
            args.extend(invoked.args);
            Ok((args, invoked.ret))
        }
        Insn::Field {
            op,
            owner,
            desc,
            ..
        } => {
            let field_ty = JavaType::parse(&desc)?;
            let receiver = JavaType::Object(owner);
            Ok(match op {
                Opcode::GETFIELD => (vec![receiver], field_ty),
                Opcode::GETSTATIC => (Vec::new(), field_ty),
                Opcode::PUTFIELD => (vec![receiver, field_ty], JavaType::Void),
                _ => (vec![field_ty], JavaType::Void),
            })
        }
        other => Err(handler.error(format!(
            "located instruction {other:?} is not an invocation or field access"
        ))),
    }
}

/// Rewrite the access at `at` into a handler invocation.
///
/// The located instruction is replaced in place so its node identity (and
/// any decoration on it) survives.
pub(crate) fn inject(site: &mut InjectSite<'_>, at: InsnId, handler: &Handler<'_>) -> Result<()> {
    let (bare_args, ret) = expected_shapes(site, at, handler)?;
    let handler_desc = handler.parsed()?;
    if handler_desc.ret != ret {
        return Err(handler.error(format!(
            "redirect handler must return {ret}, found {}",
            handler_desc.ret
        )));
    }

    let target_desc = site.desc()?;
    let bare = handler_desc.args == bare_args;
    let extended_args: Vec<JavaType> = bare_args
        .iter()
        .cloned()
        .chain(target_desc.args.iter().cloned())
        .collect();
    let extended = !bare && handler_desc.args == extended_args;
    if !bare && !extended {
        return Err(handler.error(format!(
            "redirect handler arguments must be ({}) or the same plus the enclosing method's arguments",
            bare_args
                .iter()
                .map(ToString::to_string)
                .collect::<String>()
        )));
    }

    if handler.is_static && bare {
        // stack shape is already exactly the handler's argument list
        site.code.insns.replace(at, handler.invoke());
        site.code.modified = true;
        return Ok(());
    }

    // general shape: spill the original operands, optionally load the
    // receiver for an instance handler, replay the operands, append caller
    // arguments, then invoke
    let base = site.alloc_locals(slot_count(&bare_args));
    let mut seq = InsnList::new();
    spill_sequence(&mut seq, &bare_args, base);
    if !handler.is_static {
        seq.push_back(Insn::Var(Opcode::ALOAD, 0));
    }
    load_sequence(&mut seq, &bare_args, base);
    if extended {
        let args_base = if site.method_static { 0 } else { 1 };
        load_sequence(&mut seq, &target_desc.args, args_base);
    }
    site.code.insns.splice_before(Some(at), &seq);
    site.code.insns.replace(at, handler.invoke());
    site.code.modified = true;
    site.grow_stack(
        1 + if extended {
            slot_count(&target_desc.args)
        } else {
            0
        },
    );
    Ok(())
}
