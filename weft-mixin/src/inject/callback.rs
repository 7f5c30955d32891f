//! Callback injector: inserts a handler invocation at the located point.

use weft_asm::descriptor::JavaType;
use weft_asm::insn::{Insn, InsnId, InsnList};
use weft_asm::opcode::Opcode;
use weft_asm::pool::PoolConstant;

use crate::error::Result;
use crate::inject::frame::{coarse_match, locals_at};
use crate::inject::{
    load_sequence, slot_count, Handler, InjectSite, CALLBACK_INFO, CALLBACK_INFO_RETURNABLE,
};

/// Splice a callback invocation before `at`.
///
/// The handler receives the target's arguments and a callback-context
/// object; in capture mode the locals live at the point are appended. When
/// the callback is cancellable the emitted code tests the context and
/// returns early, reading the replacement return value out of the context
/// for non-void targets.
pub(crate) fn inject(
    site: &mut InjectSite<'_>,
    at: InsnId,
    handler: &Handler<'_>,
    cancellable: bool,
    capture_locals: bool,
) -> Result<()> {
    let target_desc = site.desc()?;
    let ci_class = if target_desc.ret == JavaType::Void {
        CALLBACK_INFO
    } else {
        CALLBACK_INFO_RETURNABLE
    };

    let captured = if capture_locals {
        captured_locals(site, at)?
    } else {
        Vec::new()
    };
    validate_handler(handler, &target_desc.args, ci_class, &captured)?;

    let ci_slot = site.alloc_locals(1);
    let mut seq = InsnList::new();

    // new CallbackInfo("<method>", cancellable)
    seq.push_back(Insn::Type {
        op: Opcode::NEW,
        ty: ci_class.to_string(),
    });
    seq.push_back(Insn::Simple(Opcode::DUP));
    seq.push_back(Insn::Ldc(PoolConstant::Str(site.method_name.to_string())));
    seq.push_back(Insn::Simple(if cancellable {
        Opcode::ICONST_1
    } else {
        Opcode::ICONST_0
    }));
    seq.push_back(Insn::Method {
        op: Opcode::INVOKESPECIAL,
        owner: ci_class.to_string(),
        name: "<init>".to_string(),
        desc: "(Ljava/lang/String;Z)V".to_string(),
        itf: false,
    });
    seq.push_back(Insn::Var(Opcode::ASTORE, ci_slot));

    // handler(args..., ci, captured...)
    if !handler.is_static {
        seq.push_back(Insn::Var(Opcode::ALOAD, 0));
    }
    let args_base = if site.method_static { 0 } else { 1 };
    load_sequence(&mut seq, &target_desc.args, args_base);
    seq.push_back(Insn::Var(Opcode::ALOAD, ci_slot));
    for (slot, ty) in &captured {
        seq.push_back(Insn::Var(ty.load_op(), *slot));
    }
    seq.push_back(handler.invoke());

    if cancellable {
        let resume = seq.new_label();
        seq.push_back(Insn::Var(Opcode::ALOAD, ci_slot));
        seq.push_back(Insn::Method {
            op: Opcode::INVOKEVIRTUAL,
            owner: ci_class.to_string(),
            name: "isCancelled".to_string(),
            desc: "()Z".to_string(),
            itf: false,
        });
        seq.push_back(Insn::Jump(Opcode::IFEQ, resume));
        match &target_desc.ret {
            JavaType::Void => {
                seq.push_back(Insn::Simple(Opcode::RETURN));
            }
            ret => {
                seq.push_back(Insn::Var(Opcode::ALOAD, ci_slot));
                seq.push_back(Insn::Method {
                    op: Opcode::INVOKEVIRTUAL,
                    owner: ci_class.to_string(),
                    name: "getReturnValue".to_string(),
                    desc: "()Ljava/lang/Object;".to_string(),
                    itf: false,
                });
                match ret {
                    JavaType::Object(name) => {
                        seq.push_back(Insn::Type {
                            op: Opcode::CHECKCAST,
                            ty: name.clone(),
                        });
                    }
                    JavaType::Array(_) => {
                        seq.push_back(Insn::Type {
                            op: Opcode::CHECKCAST,
                            ty: ret.to_string(),
                        });
                    }
                    primitive => {
                        let boxed = primitive
                            .boxed()
                            .ok_or_else(|| handler.error("uncastable return type"))?;
                        let unbox = primitive
                            .unbox_method()
                            .ok_or_else(|| handler.error("uncastable return type"))?;
                        seq.push_back(Insn::Type {
                            op: Opcode::CHECKCAST,
                            ty: boxed.to_string(),
                        });
                        seq.push_back(Insn::Method {
                            op: Opcode::INVOKEVIRTUAL,
                            owner: boxed.to_string(),
                            name: unbox.to_string(),
                            desc: format!("(){primitive}"),
                            itf: false,
                        });
                    }
                }
                seq.push_back(Insn::Simple(ret.return_op()));
            }
        }
        seq.push_back(Insn::Label(resume));
    }

    site.code.insns.splice_before(Some(at), &seq);
    site.code.modified = true;

    let invoke_depth = u16::from(!handler.is_static)
        + slot_count(&target_desc.args)
        + 1
        + captured.iter().map(|(_, ty)| ty.size()).sum::<u16>();
    site.grow_stack(invoke_depth.max(4));
    Ok(())
}

/// Locals beyond the parameters, live at the point, in slot order.
fn captured_locals(site: &InjectSite<'_>, at: InsnId) -> Result<Vec<(u16, JavaType)>> {
    let desc = site.desc()?;
    let first_free = desc.first_free_local(site.method_static);
    let slots = locals_at(site.owner, &desc, site.method_static, site.code, at);
    Ok(slots
        .into_iter()
        .enumerate()
        .skip(first_free as usize)
        .filter_map(|(slot, info)| info.map(|info| (slot as u16, info.ty)))
        .collect())
}

fn validate_handler(
    handler: &Handler<'_>,
    target_args: &[JavaType],
    ci_class: &str,
    captured: &[(u16, JavaType)],
) -> Result<()> {
    let desc = handler.parsed()?;
    if desc.ret != JavaType::Void {
        return Err(handler.error("callback handlers must return void"));
    }
    let expected = target_args.len() + 1 + captured.len();
    if desc.args.len() != expected {
        return Err(handler.error(format!(
            "expected {expected} parameters (target args, callback info, captured locals), found {}",
            desc.args.len()
        )));
    }
    for (i, arg) in target_args.iter().enumerate() {
        if &desc.args[i] != arg {
            return Err(handler.error(format!(
                "parameter {i} is {}, target argument is {arg}",
                desc.args[i]
            )));
        }
    }
    match &desc.args[target_args.len()] {
        JavaType::Object(name) if name == ci_class => {}
        other => {
            return Err(handler.error(format!(
                "parameter {} must be L{ci_class};, found {other}",
                target_args.len()
            )))
        }
    }
    for (i, (_, ty)) in captured.iter().enumerate() {
        let declared = &desc.args[target_args.len() + 1 + i];
        if !coarse_match(ty, declared) {
            return Err(handler.error(format!(
                "captured local {i} is {ty}, handler declares {declared}"
            )));
        }
    }
    Ok(())
}
