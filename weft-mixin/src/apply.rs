//! The applicator: merges mixin declarations into the target class tree.
//!
//! Runs before the injection phase so that injector handlers are already
//! present (renamed, synthetic, private) when injections emit calls to them.
//! Every instruction of a merged body is retargeted: references to the mixin
//! class become references to the target, renamed members resolve to their
//! post-merge names, and symbols pass through the config's reference map.

use std::collections::HashMap;

use tracing::{debug, warn};

use weft_asm::annotation::{AnnotationNode, AnnotationValue};
use weft_asm::classfile::{CodeBody, FieldNode, MethodNode, CTOR_NAME};
use weft_asm::descriptor::{JavaType, MethodDescriptor};
use weft_asm::insn::{Insn, InsnList};
use weft_asm::opcode::Opcode;
use weft_asm::pool::PoolConstant;
use weft_asm::visibility::{FieldAccess, MethodAccess, Visibility};

use crate::annotations::descriptors;
use crate::context::TargetClassContext;
use crate::error::{ErrorAction, ErrorHandler, Result, TransformError};
use crate::info::{ClassInfoCache, ClassSource, Traversal};
use crate::mixin::{handler_name, AccessorKind, MemberSig, MixinInfo};
use crate::point::{delegate_call, FindContext};

/// Merge every mixin of the context into the target tree, in order.
///
/// A failing mixin escalates when it is required or when an error handler
/// asks for it; otherwise the failure is logged and the remaining mixins
/// still apply.
pub(crate) fn apply_mixins(
    ctx: &mut TargetClassContext,
    cache: &mut ClassInfoCache,
    source: &dyn ClassSource,
    handlers: &[Box<dyn ErrorHandler>],
) -> Result<()> {
    let mixins: Vec<_> = ctx.mixins().to_vec();
    for mixin in mixins {
        debug!(
            mixin = mixin.name.as_str(),
            target = ctx.name.as_str(),
            priority = mixin.priority,
            "applying mixin"
        );
        if let Err(error) = apply_one(ctx, &mixin, cache, source) {
            if mixin.required || escalate_apply(handlers, &ctx.name, &error) {
                return Err(error);
            }
            warn!(
                mixin = mixin.name.as_str(),
                target = ctx.name.as_str(),
                %error,
                "mixin failed to apply and was skipped; earlier changes from it may remain"
            );
        }
    }
    Ok(())
}

pub(crate) fn escalate_apply(
    handlers: &[Box<dyn ErrorHandler>],
    target: &str,
    error: &TransformError,
) -> bool {
    let mut action = ErrorAction::Warn;
    for handler in handlers {
        match handler.on_apply_error(target, error) {
            ErrorAction::Error => action = ErrorAction::Error,
            ErrorAction::Ignore if action == ErrorAction::Warn => action = ErrorAction::Ignore,
            _ => {}
        }
    }
    action == ErrorAction::Error
}

fn apply_one(
    ctx: &mut TargetClassContext,
    mixin: &MixinInfo,
    cache: &mut ClassInfoCache,
    source: &dyn ClassSource,
) -> Result<()> {
    let renames = unique_renames(ctx, mixin);
    apply_interfaces(ctx, mixin);
    apply_fields(ctx, mixin)?;
    apply_methods(ctx, mixin, &renames)?;
    apply_accessors(ctx, mixin, cache, source)?;
    apply_initializers(ctx, mixin, &renames)?;
    Ok(())
}

/// Per-target rename decisions for `Unique` members.
///
/// A Unique only gets its deterministic rename when it collides with a
/// method already on the target; otherwise it merges under its own name and
/// no call site may be rewritten. Decided up front so bodies adapted before
/// the uniques loop runs (overwrites) see the same mapping.
fn unique_renames(ctx: &TargetClassContext, mixin: &MixinInfo) -> HashMap<MemberSig, String> {
    let mut renames = HashMap::new();
    for sig in &mixin.members.uniques {
        let desc = retarget_desc(&sig.desc, &mixin.name, &ctx.name);
        if ctx.node().find_method(&sig.name, &desc).is_some() {
            renames.insert(sig.clone(), handler_name("unique", &mixin.name, sig));
        }
    }
    renames
}

fn apply_interfaces(ctx: &mut TargetClassContext, mixin: &MixinInfo) {
    for itf in &mixin.tree.interfaces {
        ctx.node_mut().add_interface(itf);
    }
}

fn apply_fields(ctx: &mut TargetClassContext, mixin: &MixinInfo) -> Result<()> {
    // shadows never materialize; they only adjust the target's declaration
    for shadow in &mixin.members.shadow_fields {
        let name = mixin.remap_field(&ctx.name, &shadow.name, &shadow.desc);
        let declared_access = mixin
            .tree
            .find_field(&shadow.declared_name)
            .map(|f| f.access.bits())
            .unwrap_or(0);
        let target_name = ctx.name.clone();
        let Some(field) = ctx
            .node_mut()
            .fields
            .iter_mut()
            .find(|f| f.name == name)
        else {
            return Err(TransformError::apply(
                &mixin.name,
                &target_name,
                format!("shadowed field {name} is missing from the target"),
            ));
        };
        let widened = Visibility::from_flags(declared_access).widen(field.access.bits());
        field.access = FieldAccess::from_bits_truncate(widened);
        if shadow.mutable {
            field.access.remove(FieldAccess::FINAL);
        }
    }

    for field in &mixin.tree.fields {
        if mixin
            .members
            .shadow_fields
            .iter()
            .any(|s| s.declared_name == field.name)
        {
            continue;
        }
        if ctx.node().find_field(&field.name).is_some() {
            return Err(TransformError::apply(
                &mixin.name,
                &ctx.name,
                format!("field {} already exists in the target", field.name),
            ));
        }
        let mut merged = FieldNode::new(
            field.access,
            field.name.clone(),
            retarget_desc(&field.desc, &mixin.name, &ctx.name),
        );
        merged.signature = field.signature.clone();
        merged.constant = field.constant.clone();
        ctx.node_mut().fields.push(merged);
    }
    Ok(())
}

fn apply_methods(
    ctx: &mut TargetClassContext,
    mixin: &MixinInfo,
    renames: &HashMap<MemberSig, String>,
) -> Result<()> {
    let members = &mixin.members;
    for sig in &members.overwrites {
        apply_overwrite(ctx, mixin, &sig.name, &sig.desc, renames)?;
    }
    for sig in &members.uniques {
        let method = expect_method(mixin, &sig.name, &sig.desc)?;
        let mut merged = adapt_method(ctx, mixin, method, renames);
        if let Some(renamed) = renames.get(sig) {
            merged.name = renamed.clone();
        }
        push_merged(ctx, mixin, merged);
    }
    for sig in &members.intrinsics {
        let desc = retarget_desc(&sig.desc, &mixin.name, &ctx.name);
        if ctx.node().find_method(&sig.name, &desc).is_none() {
            let method = expect_method(mixin, &sig.name, &sig.desc)?;
            let merged = adapt_method(ctx, mixin, method, renames);
            push_merged(ctx, mixin, merged);
        }
    }
    for def in &members.injectors {
        let method = expect_method(mixin, &def.method.name, &def.method.desc)?;
        let mut merged = adapt_method(ctx, mixin, method, renames);
        merged.name = mixin.merged_name(&def.method.name, &def.method.desc);
        merged.access = (merged.access
            & !(MethodAccess::PUBLIC | MethodAccess::PROTECTED))
            | MethodAccess::PRIVATE
            | MethodAccess::SYNTHETIC;
        push_merged(ctx, mixin, merged);
    }
    for sig in &members.plain_methods {
        let desc = retarget_desc(&sig.desc, &mixin.name, &ctx.name);
        if let Some(existing) = ctx.node().find_method(&sig.name, &desc) {
            if merged_annotation(existing).is_none() {
                return Err(TransformError::apply(
                    &mixin.name,
                    &ctx.name,
                    format!(
                        "method {}{} already exists in the target and is not overwritable",
                        sig.name, sig.desc
                    ),
                ));
            }
            warn!(
                mixin = mixin.name.as_str(),
                method = sig.name.as_str(),
                "plain method collides with an earlier merge and is skipped"
            );
            continue;
        }
        let method = expect_method(mixin, &sig.name, &sig.desc)?;
        let merged = adapt_method(ctx, mixin, method, renames);
        push_merged(ctx, mixin, merged);
    }
    Ok(())
}

/// Overwrite semantics with the priority tie-breaks.
fn apply_overwrite(
    ctx: &mut TargetClassContext,
    mixin: &MixinInfo,
    name: &str,
    desc: &str,
    renames: &HashMap<MemberSig, String>,
) -> Result<()> {
    let target_name = mixin.remap_method(&ctx.name, name, desc);
    let target_desc = retarget_desc(desc, &mixin.name, &ctx.name);
    let Some(existing) = ctx.node().find_method(&target_name, &target_desc) else {
        return Err(TransformError::apply(
            &mixin.name,
            &ctx.name,
            format!("overwrite target {target_name}{target_desc} does not exist"),
        ));
    };

    if let Some(merged) = merged_annotation(existing) {
        let existing_priority = merged.get_int("priority").unwrap_or(i32::MIN);
        let is_final = existing.access.contains(MethodAccess::FINAL);
        if existing_priority >= mixin.priority {
            warn!(
                mixin = mixin.name.as_str(),
                method = target_name.as_str(),
                existing_priority,
                "skipping overwrite: an equal or higher priority overwrite is already merged"
            );
            return Ok(());
        }
        if is_final {
            return Err(TransformError::apply(
                &mixin.name,
                &ctx.name,
                format!("overwrite target {target_name} was merged final by an earlier mixin"),
            ));
        }
    }

    let method = expect_method(mixin, name, desc)?;
    let mut merged = adapt_method(ctx, mixin, method, renames);
    merged.name = target_name.clone();
    merged
        .invisible_annotations
        .push(merged_stamp(mixin, &ctx.session_id));
    // the body replaces the existing method wholesale
    ctx.replace_method(merged);
    ctx.mark_merged(&target_name, &target_desc);
    Ok(())
}

fn apply_accessors(
    ctx: &mut TargetClassContext,
    mixin: &MixinInfo,
    cache: &mut ClassInfoCache,
    source: &dyn ClassSource,
) -> Result<()> {
    for accessor in &mixin.members.accessors {
        let field_name = mixin.remap_field(&ctx.name, &accessor.field, &accessor.field_desc);
        let decl = cache
            .find_field_in_hierarchy(&ctx.name, &field_name, Traversal::All, source)
            .or_else(|| {
                ctx.node().find_field(&field_name).map(|f| crate::info::FieldDecl {
                    name: f.name.clone(),
                    desc: f.desc.clone(),
                    access: f.access.bits(),
                    is_static: f.is_static(),
                    owner: ctx.name.clone(),
                })
            })
            .ok_or_else(|| {
                TransformError::apply(
                    &mixin.name,
                    &ctx.name,
                    format!("accessor target field {field_name} does not resolve"),
                )
            })?;

        let ty = JavaType::parse(&accessor.field_desc)?;
        let mut insns = InsnList::new();
        let (max_stack, max_locals) = match accessor.kind {
            AccessorKind::Getter => {
                if decl.is_static {
                    insns.push_back(Insn::Field {
                        op: Opcode::GETSTATIC,
                        owner: decl.owner.clone(),
                        name: decl.name.clone(),
                        desc: decl.desc.clone(),
                    });
                    insns.push_back(Insn::Simple(ty.return_op()));
                    (ty.size(), 1)
                } else {
                    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
                    insns.push_back(Insn::Field {
                        op: Opcode::GETFIELD,
                        owner: decl.owner.clone(),
                        name: decl.name.clone(),
                        desc: decl.desc.clone(),
                    });
                    insns.push_back(Insn::Simple(ty.return_op()));
                    (ty.size().max(1), 1)
                }
            }
            AccessorKind::Setter => {
                if decl.is_static {
                    insns.push_back(Insn::Var(ty.load_op(), 0));
                    insns.push_back(Insn::Field {
                        op: Opcode::PUTSTATIC,
                        owner: decl.owner.clone(),
                        name: decl.name.clone(),
                        desc: decl.desc.clone(),
                    });
                    insns.push_back(Insn::Simple(Opcode::RETURN));
                    (ty.size(), 1 + ty.size())
                } else {
                    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
                    insns.push_back(Insn::Var(ty.load_op(), 1));
                    insns.push_back(Insn::Field {
                        op: Opcode::PUTFIELD,
                        owner: decl.owner.clone(),
                        name: decl.name.clone(),
                        desc: decl.desc.clone(),
                    });
                    insns.push_back(Insn::Simple(Opcode::RETURN));
                    (1 + ty.size(), 1 + ty.size())
                }
            }
        };

        let declared = mixin
            .method(&accessor.method.name, &accessor.method.desc)
            .map(|m| m.access)
            .unwrap_or(MethodAccess::PUBLIC);
        let mut method = MethodNode::new(
            (declared & !MethodAccess::ABSTRACT) | MethodAccess::SYNTHETIC,
            accessor.method.name.clone(),
            accessor.method.desc.clone(),
        );
        method.code = Some(CodeBody {
            max_stack,
            max_locals,
            insns,
            ..CodeBody::default()
        });
        push_merged(ctx, mixin, method);
    }

    for invoker in &mixin.members.invokers {
        let invoker_desc = MethodDescriptor::parse(&invoker.method.desc)?;
        let target_name = mixin.remap_method(&ctx.name, &invoker.target, &invoker.method.desc);
        let target_name_for_err = target_name.clone();
        let Some(target) = ctx.node().find_method(&target_name, &invoker.method.desc) else {
            return Err(TransformError::apply(
                &mixin.name,
                &ctx.name,
                format!(
                    "invoker target {target_name_for_err}{} does not resolve",
                    invoker.method.desc
                ),
            ));
        };
        let target_static = target.is_static();
        let target_private = target.access.contains(MethodAccess::PRIVATE);

        let mut insns = InsnList::new();
        let mut slot = 0u16;
        if !target_static {
            insns.push_back(Insn::Var(Opcode::ALOAD, 0));
            slot += 1;
        }
        for arg in &invoker_desc.args {
            insns.push_back(Insn::Var(arg.load_op(), slot));
            slot += arg.size();
        }
        let op = if target_static {
            Opcode::INVOKESTATIC
        } else if target_private {
            Opcode::INVOKESPECIAL
        } else {
            Opcode::INVOKEVIRTUAL
        };
        insns.push_back(Insn::Method {
            op,
            owner: ctx.name.clone(),
            name: target_name,
            desc: invoker.method.desc.clone(),
            itf: false,
        });
        insns.push_back(Insn::Simple(invoker_desc.ret.return_op()));

        let declared = mixin
            .method(&invoker.method.name, &invoker.method.desc)
            .map(|m| m.access)
            .unwrap_or(MethodAccess::PUBLIC);
        let mut method = MethodNode::new(
            (declared & !MethodAccess::ABSTRACT) | MethodAccess::SYNTHETIC,
            invoker.method.name.clone(),
            invoker.method.desc.clone(),
        );
        method.code = Some(CodeBody {
            max_stack: slot.max(invoker_desc.ret.size()).max(1),
            max_locals: slot,
            insns,
            ..CodeBody::default()
        });
        push_merged(ctx, mixin, method);
    }
    Ok(())
}

/// Splice the mixin's instance-field initializers into every target
/// constructor, after the delegate constructor call.
fn apply_initializers(
    ctx: &mut TargetClassContext,
    mixin: &MixinInfo,
    renames: &HashMap<MemberSig, String>,
) -> Result<()> {
    let Some(mixin_ctor) = mixin.tree.ctors().next() else {
        return Ok(());
    };
    let Some(code) = &mixin_ctor.code else {
        return Ok(());
    };
    let find_ctx = FindContext {
        owner: &mixin.name,
        superclass: mixin.tree.superclass.as_deref(),
        method_name: CTOR_NAME,
        method_desc: &mixin_ctor.desc,
        insns: &code.insns,
    };
    let Some(delegate) = delegate_call(&find_ctx) else {
        return Ok(());
    };

    // everything between the delegate call and the final return is
    // initializer code
    let mut initializer = InsnList::new();
    let mut cursor = code.insns.next(delegate);
    while let Some(id) = cursor {
        let insn = code.insns.get(id);
        if insn.opcode().map(Opcode::is_return).unwrap_or(false) {
            break;
        }
        if !insn.is_marker() {
            initializer.push_back(insn.clone());
        }
        cursor = code.insns.next(id);
    }
    if initializer.is_empty() {
        return Ok(());
    }
    let initializer = adapt_code_body(
        ctx,
        mixin,
        &CodeBody {
            insns: initializer,
            ..CodeBody::default()
        },
        renames,
    );

    let target = ctx.name.clone();
    let superclass = ctx.node().superclass.clone();
    let extra_stack = code.max_stack;
    let ctor_sigs: Vec<(String, String)> = ctx
        .node()
        .ctors()
        .map(|m| (m.name.clone(), m.desc.clone()))
        .collect();
    for (name, desc) in ctor_sigs {
        let Some(method) = ctx.node_mut().find_method_mut(&name, &desc) else {
            continue;
        };
        let Some(target_code) = method.code.as_mut() else {
            continue;
        };
        let find_ctx = FindContext {
            owner: &target,
            superclass: superclass.as_deref(),
            method_name: CTOR_NAME,
            method_desc: &desc,
            insns: &target_code.insns,
        };
        let Some(target_delegate) = delegate_call(&find_ctx) else {
            continue;
        };
        let splice_at = target_code.insns.next(target_delegate);
        target_code.insns.splice_before(splice_at, &initializer.insns);
        target_code.max_stack += extra_stack;
        target_code.modified = true;
    }
    Ok(())
}

fn expect_method<'a>(mixin: &'a MixinInfo, name: &str, desc: &str) -> Result<&'a MethodNode> {
    mixin.method(name, desc).ok_or_else(|| {
        TransformError::apply(
            &mixin.name,
            &mixin.name,
            format!("mixin method {name}{desc} disappeared during application"),
        )
    })
}

fn push_merged(ctx: &mut TargetClassContext, mixin: &MixinInfo, mut method: MethodNode) {
    method
        .invisible_annotations
        .push(merged_stamp(mixin, &ctx.session_id));
    ctx.mark_merged(&method.name, &method.desc);
    ctx.node_mut().methods.push(method);
}

/// The annotation stamped onto every merged method.
fn merged_stamp(mixin: &MixinInfo, session_id: &str) -> AnnotationNode {
    AnnotationNode::new(descriptors::MIXIN_MERGED)
        .with("mixin", AnnotationValue::Str(mixin.name.clone()))
        .with("priority", AnnotationValue::Int(mixin.priority))
        .with("sessionId", AnnotationValue::Str(session_id.to_string()))
}

fn merged_annotation(method: &MethodNode) -> Option<&AnnotationNode> {
    method
        .invisible_annotations
        .iter()
        .find(|a| a.desc == descriptors::MIXIN_MERGED)
}

/// Clone a mixin method into target-space.
fn adapt_method(
    ctx: &TargetClassContext,
    mixin: &MixinInfo,
    method: &MethodNode,
    renames: &HashMap<MemberSig, String>,
) -> MethodNode {
    let mut merged = MethodNode::new(
        method.access,
        mixin.remap_method(&ctx.name, &method.name, &method.desc),
        retarget_desc(&method.desc, &mixin.name, &ctx.name),
    );
    let not_injector =
        |a: &&AnnotationNode| crate::annotations::InjectorKind::for_descriptor(&a.desc).is_none();
    merged.signature = method.signature.clone();
    merged.exceptions = method.exceptions.clone();
    merged.visible_annotations = method
        .visible_annotations
        .iter()
        .filter(not_injector)
        .cloned()
        .collect();
    merged.invisible_annotations = method
        .invisible_annotations
        .iter()
        .filter(not_injector)
        .cloned()
        .collect();
    merged.code = method
        .code
        .as_ref()
        .map(|code| adapt_code_body(ctx, mixin, code, renames));
    merged
}

/// Rewrite every reference in a cloned body into target-space.
///
/// `renames` carries this application's Unique rename decisions so call
/// sites track exactly the declarations that were actually renamed.
fn adapt_code_body(
    ctx: &TargetClassContext,
    mixin: &MixinInfo,
    code: &CodeBody,
    renames: &HashMap<MemberSig, String>,
) -> CodeBody {
    let shadow_fields: HashMap<&str, &str> = mixin
        .members
        .shadow_fields
        .iter()
        .map(|s| (s.declared_name.as_str(), s.name.as_str()))
        .collect();
    let shadow_methods: HashMap<(&str, &str), &str> = mixin
        .members
        .shadow_methods
        .iter()
        .map(|s| ((s.declared_name.as_str(), s.desc.as_str()), s.name.as_str()))
        .collect();
    let unique_renames: HashMap<(&str, &str), &str> = renames
        .iter()
        .map(|(sig, renamed)| ((sig.name.as_str(), sig.desc.as_str()), renamed.as_str()))
        .collect();

    let mut adapted = code.clone();
    adapted.attrs.clear();
    adapted.modified = true;
    for entry in &mut adapted.locals {
        entry.desc = retarget_desc(&entry.desc, &mixin.name, &ctx.name);
    }

    for id in adapted.insns.ids() {
        let replacement = match adapted.insns.get(id) {
            Insn::Field {
                op,
                owner,
                name,
                desc,
            } => {
                let same_class = owner == &mixin.name;
                let new_owner = if same_class {
                    ctx.name.clone()
                } else {
                    owner.clone()
                };
                let stripped = if same_class {
                    shadow_fields
                        .get(name.as_str())
                        .copied()
                        .unwrap_or(name.as_str())
                } else {
                    name.as_str()
                };
                let new_name = mixin.remap_field(&new_owner, stripped, desc);
                Some(Insn::Field {
                    op: *op,
                    owner: new_owner,
                    name: new_name,
                    desc: retarget_desc(desc, &mixin.name, &ctx.name),
                })
            }
            Insn::Method {
                op,
                owner,
                name,
                desc,
                itf,
            } => {
                let same_class = owner == &mixin.name;
                let new_owner = if same_class {
                    ctx.name.clone()
                } else {
                    owner.clone()
                };
                let renamed = if same_class {
                    if let Some(stripped) = shadow_methods.get(&(name.as_str(), desc.as_str())) {
                        stripped.to_string()
                    } else if let Some(renamed) =
                        unique_renames.get(&(name.as_str(), desc.as_str()))
                    {
                        renamed.to_string()
                    } else {
                        mixin.merged_name(name, desc)
                    }
                } else {
                    name.clone()
                };
                let new_name = mixin.remap_method(&new_owner, &renamed, desc);
                Some(Insn::Method {
                    op: *op,
                    owner: new_owner,
                    name: new_name,
                    desc: retarget_desc(desc, &mixin.name, &ctx.name),
                    itf: *itf,
                })
            }
            Insn::Type { op, ty } => Some(Insn::Type {
                op: *op,
                ty: retarget_name(ty, &mixin.name, &ctx.name),
            }),
            Insn::Ldc(PoolConstant::Class(name)) => Some(Insn::Ldc(PoolConstant::Class(
                retarget_name(name, &mixin.name, &ctx.name),
            ))),
            Insn::MultiANewArray { desc, dims } => Some(Insn::MultiANewArray {
                desc: retarget_desc(desc, &mixin.name, &ctx.name),
                dims: *dims,
            }),
            _ => None,
        };
        if let Some(insn) = replacement {
            adapted.insns.replace(id, insn);
        }
    }
    adapted
}

/// Replace references to the mixin type inside a descriptor.
fn retarget_desc(desc: &str, mixin: &str, target: &str) -> String {
    desc.replace(&format!("L{mixin};"), &format!("L{target};"))
}

/// Replace a bare internal name or array descriptor naming the mixin type.
fn retarget_name(name: &str, mixin: &str, target: &str) -> String {
    if name == mixin {
        target.to_string()
    } else {
        retarget_desc(name, mixin, target)
    }
}
