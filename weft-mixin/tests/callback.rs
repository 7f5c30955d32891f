//! Callback injection at method head.

use weft_mixin::prelude::*;
use weft_mixin::util::test_helpers::*;

use weft_asm::annotation::AnnotationValue;

/// `game/Engine` with `void tick()` whose first instruction is `aload 0`.
fn target_class() -> ClassNode {
    let mut class = class_with_ctor("game/Engine");
    class
        .fields
        .push(FieldNode::new(FieldAccess::PRIVATE, "count", "I"));

    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Simple(Opcode::DUP));
    insns.push_back(Insn::field(Opcode::GETFIELD, "game/Engine", "count", "I").unwrap());
    insns.push_back(Insn::Simple(Opcode::ICONST_1));
    insns.push_back(Insn::Simple(Opcode::IADD));
    insns.push_back(Insn::field(Opcode::PUTFIELD, "game/Engine", "count", "I").unwrap());
    insns.push_back(Insn::Simple(Opcode::RETURN));
    class
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "tick", "()V", 1, insns));
    class
}

/// A mixin whose `onTick` handler is injected at the head of `tick`.
fn mixin(cancellable: bool) -> ClassNode {
    let mut class = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::RETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE,
        "onTick",
        &format!("(L{CALLBACK_INFO};)V"),
        2,
        insns,
    );
    handler.invisible_annotations.push(
        injector(descriptors::INJECT, "tick", at("HEAD"))
            .with("cancellable", AnnotationValue::Bool(cancellable))
            .with("require", AnnotationValue::Int(1)),
    );
    class.methods.push(handler);
    class
}

fn transformed(cancellable: bool) -> ClassNode {
    let (engine, source) = engine();
    source.insert_node(&target_class()).unwrap();
    source.insert_node(&mixin(cancellable)).unwrap();
    engine
        .add_config(
            "mixins.game.json",
            &config_json("game.mixins", &["EngineMixin"]),
        )
        .unwrap();

    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    decode(&out).unwrap()
}

#[test]
fn head_injection_prepends_callback_sequence() {
    let class = transformed(true);
    let code = class.find_method("tick", "()V").unwrap().code.as_ref().unwrap();
    let real: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| !insn.is_marker())
        .collect();

    // callback-info construction comes first
    assert!(
        matches!(real[0], Insn::Type { op: Opcode::NEW, ty } if ty == CALLBACK_INFO),
        "expected callback-info allocation, found {:?}",
        real[0]
    );
    assert!(matches!(real[1], Insn::Simple(Opcode::DUP)));
    assert!(
        matches!(real[2], Insn::Ldc(PoolConstant::Str(name)) if name == "tick")
    );
    assert!(matches!(real[3], Insn::Simple(Opcode::ICONST_1)));

    // the handler invocation targets the renamed merged handler
    let handler_invoke = real
        .iter()
        .find_map(|insn| match insn {
            Insn::Method { op: Opcode::INVOKESPECIAL, owner, name, .. }
                if owner == "game/Engine" && name.contains("$onTick") =>
            {
                Some(name.clone())
            }
            _ => None,
        })
        .expect("handler invocation missing");
    assert!(handler_invoke.starts_with("handler$"));
    assert!(
        class
            .methods
            .iter()
            .any(|m| m.name == handler_invoke
                && m.access.contains(MethodAccess::PRIVATE)
                && m.access.contains(MethodAccess::SYNTHETIC)),
        "merged handler must be a synthetic private method of the target"
    );

    // cancellation: isCancelled + conditional early return
    let cancelled_check = real.iter().position(|insn| {
        matches!(insn, Insn::Method { name, .. } if name == "isCancelled")
    });
    let check = cancelled_check.expect("isCancelled test missing");
    assert!(matches!(real[check + 1], Insn::Jump(Opcode::IFEQ, _)));
    assert!(matches!(real[check + 2], Insn::Simple(Opcode::RETURN)));

    // the original body still follows, starting with its aload 0
    assert!(matches!(real[check + 3], Insn::Var(Opcode::ALOAD, 0)));
    assert!(real
        .iter()
        .skip(check + 3)
        .any(|insn| matches!(insn, Insn::Field { op: Opcode::PUTFIELD, name, .. } if name == "count")));
}

#[test]
fn non_cancellable_callback_has_no_early_return() {
    let class = transformed(false);
    let code = class.find_method("tick", "()V").unwrap().code.as_ref().unwrap();
    assert!(!code
        .insns
        .iter()
        .any(|(_, insn)| matches!(insn, Insn::Method { name, .. } if name == "isCancelled")));
}

#[test]
fn frame_budgets_grow() {
    let original = target_class();
    let before = original.find_method("tick", "()V").unwrap().code.as_ref().unwrap();
    let class = transformed(true);
    let after = class.find_method("tick", "()V").unwrap().code.as_ref().unwrap();
    assert!(after.max_stack > before.max_stack);
    assert!(after.max_locals > before.max_locals);
}

#[test]
fn missing_target_method_fails_require() {
    let (engine, source) = engine();
    source.insert_node(&target_class()).unwrap();

    let mut bad = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::RETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE,
        "onTick",
        &format!("(L{CALLBACK_INFO};)V"),
        2,
        insns,
    );
    handler.invisible_annotations.push(
        injector(descriptors::INJECT, "doesNotExist", at("HEAD"))
            .with("require", AnnotationValue::Int(1)),
    );
    bad.methods.push(handler);
    source.insert_node(&bad).unwrap();

    engine
        .add_config(
            "mixins.game.json",
            &config_json("game.mixins", &["EngineMixin"]),
        )
        .unwrap();
    let bytes = source.class_bytes("game/Engine").unwrap();
    let err = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap_err();
    assert!(matches!(err, TransformError::InjectionCount { count: 0, required: 1, .. }));
}
