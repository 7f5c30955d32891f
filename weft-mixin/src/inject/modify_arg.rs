//! Argument modifiers: single-argument and whole-list rewrites at an
//! invocation site.

use weft_asm::classfile::ClassNode;
use weft_asm::descriptor::{JavaType, MethodDescriptor};
use weft_asm::insn::{Insn, InsnId, InsnList};
use weft_asm::opcode::Opcode;

use crate::error::Result;
use crate::inject::args_class::{args_class_name, generate_args_class, ARGS_CLASS};
use crate::inject::{load_sequence, slot_count, spill_sequence, Handler, InjectSite};

/// The invocation an argument modifier rewrites.
fn invoked_descriptor(site: &InjectSite<'_>, at: InsnId, handler: &Handler<'_>) -> Result<MethodDescriptor> {
    match site.code.insns.get(at) {
        Insn::Method { desc, .. } => Ok(MethodDescriptor::parse(desc)?),
        other => Err(handler.error(format!(
            "located instruction {other:?} is not a method invocation"
        ))),
    }
}

/// Splice a single-argument modifier before the invocation at `at`.
///
/// The handler takes the argument's type and returns it. With no explicit
/// index the argument is inferred: exactly one argument of the invocation
/// must have the handler's parameter type.
pub(crate) fn inject_single(
    site: &mut InjectSite<'_>,
    at: InsnId,
    handler: &Handler<'_>,
    index: Option<usize>,
) -> Result<()> {
    let invoked = invoked_descriptor(site, at, handler)?;
    let handler_desc = handler.parsed()?;
    if handler_desc.args.len() != 1 || handler_desc.ret != handler_desc.args[0] {
        return Err(handler.error("argument modifiers must have shape (T)T"));
    }
    let wanted = &handler_desc.args[0];

    let index = match index {
        Some(explicit) => {
            if invoked.args.get(explicit) != Some(wanted) {
                return Err(handler.error(format!(
                    "argument {explicit} of the invocation is not {wanted}"
                )));
            }
            explicit
        }
        None => {
            let mut matching = invoked
                .args
                .iter()
                .enumerate()
                .filter(|(_, ty)| *ty == wanted);
            match (matching.next(), matching.next()) {
                (Some((i, _)), None) => i,
                (None, _) => {
                    return Err(handler.error(format!(
                        "the invocation has no {wanted} argument"
                    )))
                }
                _ => {
                    return Err(handler.error(format!(
                        "the invocation has several {wanted} arguments, an explicit index is required"
                    )))
                }
            }
        }
    };

    // spill the arguments stacked above the one being modified, plus the
    // argument itself so an instance handler can load the receiver first
    let upper = &invoked.args[index + 1..];
    let spilled: Vec<JavaType> = std::iter::once(wanted.clone())
        .chain(upper.iter().cloned())
        .collect();
    let base = site.alloc_locals(slot_count(&spilled));

    let mut seq = InsnList::new();
    let slots = spill_sequence(&mut seq, &spilled, base);
    if !handler.is_static {
        seq.push_back(Insn::Var(Opcode::ALOAD, 0));
    }
    seq.push_back(Insn::Var(wanted.load_op(), slots[0]));
    seq.push_back(handler.invoke());
    for (ty, slot) in upper.iter().zip(&slots[1..]) {
        seq.push_back(Insn::Var(ty.load_op(), *slot));
    }

    site.code.insns.splice_before(Some(at), &seq);
    site.code.modified = true;
    site.grow_stack(1 + u16::from(!handler.is_static));
    Ok(())
}

/// Splice a whole-argument-list modifier before the invocation at `at`.
///
/// All arguments are spilled into a synthesized container extending
/// `weft/callback/Args`; the handler mutates the container and the
/// arguments are re-pushed from it.
pub(crate) fn inject_multi(
    site: &mut InjectSite<'_>,
    generated: &mut Vec<ClassNode>,
    at: InsnId,
    handler: &Handler<'_>,
) -> Result<()> {
    let invoked = invoked_descriptor(site, at, handler)?;
    let handler_desc = handler.parsed()?;
    let args_param = matches!(
        handler_desc.args.as_slice(),
        [JavaType::Object(name)] if name == ARGS_CLASS
    );
    if !args_param || handler_desc.ret != JavaType::Void {
        return Err(handler.error(format!(
            "multi-argument modifiers must have shape (L{ARGS_CLASS};)V"
        )));
    }

    let container = generate_args_class(&invoked.args);
    let container_name = container.name.clone();
    if !generated.iter().any(|g| g.name == container_name) {
        generated.push(container);
    }

    let ctor_desc = MethodDescriptor::describe(invoked.args.iter(), &JavaType::Void);
    debug_assert_eq!(container_name, args_class_name(&ctor_desc));

    let base = site.alloc_locals(slot_count(&invoked.args) + 1);
    let args_slot = base + slot_count(&invoked.args);

    let mut seq = InsnList::new();
    spill_sequence(&mut seq, &invoked.args, base);

    // args = new Args$xxx(a0, .., aN)
    seq.push_back(Insn::Type {
        op: Opcode::NEW,
        ty: container_name.clone(),
    });
    seq.push_back(Insn::Simple(Opcode::DUP));
    load_sequence(&mut seq, &invoked.args, base);
    seq.push_back(Insn::Method {
        op: Opcode::INVOKESPECIAL,
        owner: container_name.clone(),
        name: "<init>".to_string(),
        desc: ctor_desc,
        itf: false,
    });
    seq.push_back(Insn::Var(Opcode::ASTORE, args_slot));

    // handler(args)
    if !handler.is_static {
        seq.push_back(Insn::Var(Opcode::ALOAD, 0));
    }
    seq.push_back(Insn::Var(Opcode::ALOAD, args_slot));
    seq.push_back(handler.invoke());

    // re-push each argument from the container
    for (i, arg) in invoked.args.iter().enumerate() {
        seq.push_back(Insn::Var(Opcode::ALOAD, args_slot));
        seq.push_back(Insn::Method {
            op: Opcode::INVOKEVIRTUAL,
            owner: container_name.clone(),
            name: format!("load${i}"),
            desc: format!("(){arg}"),
            itf: false,
        });
    }

    site.code.insns.splice_before(Some(at), &seq);
    site.code.modified = true;
    site.grow_stack(2 + slot_count(&invoked.args));
    Ok(())
}
