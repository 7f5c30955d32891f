//! Redirect injection: invocation rewrites, ordinals and priority
//! conflicts.

use weft_mixin::prelude::*;
use weft_mixin::util::test_helpers::*;

use weft_asm::annotation::AnnotationValue;

/// `boolean check(bar/Bar b)` containing `invokevirtual bar/Bar.bar(II)Z`.
fn target_with_invoke() -> ClassNode {
    let mut class = class_with_ctor("game/Engine");
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 1));
    insns.push_back(Insn::Simple(Opcode::ICONST_1));
    insns.push_back(Insn::Simple(Opcode::ICONST_2));
    insns.push_back(Insn::method(Opcode::INVOKEVIRTUAL, "bar/Bar", "bar", "(II)Z", false).unwrap());
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    class.methods.push(method_with_code(
        MethodAccess::PUBLIC,
        "check",
        "(Lbar/Bar;)Z",
        2,
        insns,
    ));
    class
}

fn redirect_mixin(name: &str, handler_name: &str, priority: Option<i32>) -> ClassNode {
    let mut class = mixin_class(name, &["game/Engine"]);
    if let Some(priority) = priority {
        set_mixin_priority(&mut class, priority);
    }
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::ICONST_0));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE,
        handler_name,
        "(Lbar/Bar;II)Z",
        4,
        insns,
    );
    handler.invisible_annotations.push(injector(
        descriptors::REDIRECT,
        "check",
        at_target("INVOKE", "Lbar/Bar;bar(II)Z"),
    ));
    class.methods.push(handler);
    class
}

#[test]
fn redirect_replaces_the_invocation_in_place() {
    let (engine, source) = engine();
    source.insert_node(&target_with_invoke()).unwrap();
    source
        .insert_node(&redirect_mixin("game/mixins/BarMixin", "barProxy", None))
        .unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["BarMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    let class = decode(&out).unwrap();
    let code = class
        .find_method("check", "(Lbar/Bar;)Z")
        .unwrap()
        .code
        .as_ref()
        .unwrap();

    // the original invoke is gone, the handler invoke carries the receiver
    // plus the original arguments
    assert!(!code.insns.iter().any(|(_, insn)| {
        matches!(insn, Insn::Method { owner, .. } if owner == "bar/Bar")
    }));
    let handler = code
        .insns
        .iter()
        .find_map(|(_, insn)| match insn {
            Insn::Method { owner, name, desc, .. }
                if owner == "game/Engine" && name.contains("$barProxy") =>
            {
                Some(desc.clone())
            }
            _ => None,
        })
        .expect("redirect handler invocation missing");
    assert_eq!(handler, "(Lbar/Bar;II)Z");
}

#[test]
fn lower_priority_redirect_on_same_instruction_is_skipped() {
    let (engine, source) = engine();
    source.insert_node(&target_with_invoke()).unwrap();
    source
        .insert_node(&redirect_mixin("game/mixins/HighMixin", "proxyHigh", None))
        .unwrap();
    source
        .insert_node(&redirect_mixin("game/mixins/LowMixin", "proxyLow", Some(500)))
        .unwrap();
    engine
        .add_config(
            "mixins.game.json",
            &config_json("game.mixins", &["HighMixin", "LowMixin"]),
        )
        .unwrap();

    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    let class = decode(&out).unwrap();
    let code = class
        .find_method("check", "(Lbar/Bar;)Z")
        .unwrap()
        .code
        .as_ref()
        .unwrap();

    // the default-priority (1000) redirect wins; the 500 one is skipped
    assert!(code.insns.iter().any(|(_, insn)| {
        matches!(insn, Insn::Method { name, .. } if name.contains("$proxyHigh"))
    }));
    assert!(!code.insns.iter().any(|(_, insn)| {
        matches!(insn, Insn::Method { name, .. } if name.contains("$proxyLow"))
    }));
}

/// Three `List.add` invocations; ordinal 1 rewrites only the second.
#[test]
fn ordinal_selects_the_second_invocation() {
    let mut class = class_with_ctor("game/Tasks");
    let mut insns = InsnList::new();
    for _ in 0..3 {
        insns.push_back(Insn::Var(Opcode::ALOAD, 0));
        insns.push_back(Insn::Simple(Opcode::ACONST_NULL));
        insns.push_back(
            Insn::method(
                Opcode::INVOKEINTERFACE,
                "java/util/List",
                "add",
                "(Ljava/lang/Object;)Z",
                true,
            )
            .unwrap(),
        );
        insns.push_back(Insn::Simple(Opcode::POP));
    }
    insns.push_back(Insn::Simple(Opcode::RETURN));
    class.methods.push(method_with_code(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "fill",
        "(Ljava/util/List;)V",
        1,
        insns,
    ));

    let mut mixin = mixin_class("game/mixins/TasksMixin", &["game/Tasks"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Simple(Opcode::ICONST_1));
    body.push_back(Insn::Simple(Opcode::IRETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE | MethodAccess::STATIC,
        "addProxy",
        "(Ljava/util/List;Ljava/lang/Object;)Z",
        2,
        body,
    );
    handler.invisible_annotations.push(injector(
        descriptors::REDIRECT,
        "fill",
        at_target("INVOKE", "add").with("ordinal", AnnotationValue::Int(1)),
    ));
    mixin.methods.push(handler);

    let (engine, source) = engine();
    source.insert_node(&class).unwrap();
    source.insert_node(&mixin).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["TasksMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Tasks").unwrap();
    let out = engine
        .transform("game/Tasks", "game/Tasks", Some(&bytes))
        .unwrap();
    let decoded = decode(&out).unwrap();
    let code = decoded
        .find_method("fill", "(Ljava/util/List;)V")
        .unwrap()
        .code
        .as_ref()
        .unwrap();

    let invokes: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| matches!(insn, Insn::Method { .. }))
        .collect();
    assert_eq!(invokes.len(), 3);
    assert!(matches!(invokes[0], Insn::Method { owner, .. } if owner == "java/util/List"));
    assert!(
        matches!(invokes[1], Insn::Method { op: Opcode::INVOKESTATIC, owner, name, .. }
            if owner == "game/Tasks" && name.contains("$addProxy"))
    );
    assert!(matches!(invokes[2], Insn::Method { owner, .. } if owner == "java/util/List"));
}
