//! Constant and local-variable modifiers.

use weft_mixin::prelude::*;
use weft_mixin::util::test_helpers::*;

use weft_asm::annotation::AnnotationValue;

/// `static int area(int x)` computing `x * 10`.
fn target() -> ClassNode {
    let mut class = class_with_ctor("game/Plot");
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ILOAD, 0));
    insns.push_back(Insn::Int(Opcode::BIPUSH, 10));
    insns.push_back(Insn::Simple(Opcode::IMUL));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    class.methods.push(method_with_code(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "area",
        "(I)I",
        1,
        insns,
    ));
    class
}

#[test]
fn modify_constant_wraps_the_matched_load() {
    let mut mixin = mixin_class("game/mixins/PlotMixin", &["game/Plot"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Var(Opcode::ILOAD, 0));
    body.push_back(Insn::Simple(Opcode::IRETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE | MethodAccess::STATIC,
        "tweak",
        "(I)I",
        1,
        body,
    );
    handler.invisible_annotations.push(
        AnnotationNode::new(descriptors::MODIFY_CONSTANT)
            .with(
                "method",
                AnnotationValue::Array(vec![AnnotationValue::Str("area".to_string())]),
            )
            .with("intValue", AnnotationValue::Int(10))
            .with("require", AnnotationValue::Int(1)),
    );
    mixin.methods.push(handler);

    let (engine, source) = engine();
    source.insert_node(&target()).unwrap();
    source.insert_node(&mixin).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["PlotMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Plot").unwrap();
    let out = engine
        .transform("game/Plot", "game/Plot", Some(&bytes))
        .unwrap();
    let class = decode(&out).unwrap();
    let code = class.find_method("area", "(I)I").unwrap().code.as_ref().unwrap();
    let real: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| !insn.is_marker())
        .collect();

    // iload, bipush 10, handler, imul, ireturn
    assert!(matches!(real[1], Insn::Int(Opcode::BIPUSH, 10)));
    assert!(
        matches!(real[2], Insn::Method { op: Opcode::INVOKESTATIC, name, desc, .. }
            if name.contains("$tweak") && desc == "(I)I")
    );
    assert!(matches!(real[3], Insn::Simple(Opcode::IMUL)));
}

#[test]
fn unmatched_constant_value_injects_nothing() {
    let mut mixin = mixin_class("game/mixins/PlotMixin", &["game/Plot"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Var(Opcode::ILOAD, 0));
    body.push_back(Insn::Simple(Opcode::IRETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE | MethodAccess::STATIC,
        "tweak",
        "(I)I",
        1,
        body,
    );
    handler.invisible_annotations.push(
        AnnotationNode::new(descriptors::MODIFY_CONSTANT)
            .with(
                "method",
                AnnotationValue::Array(vec![AnnotationValue::Str("area".to_string())]),
            )
            .with("intValue", AnnotationValue::Int(99)),
    );
    mixin.methods.push(handler);

    let (engine, source) = engine();
    source.insert_node(&target()).unwrap();
    source.insert_node(&mixin).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["PlotMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Plot").unwrap();
    let out = engine
        .transform("game/Plot", "game/Plot", Some(&bytes))
        .unwrap();
    let class = decode(&out).unwrap();
    let code = class.find_method("area", "(I)I").unwrap().code.as_ref().unwrap();
    assert!(!code
        .insns
        .iter()
        .any(|(_, insn)| matches!(insn, Insn::Method { .. })));
}

#[test]
fn modify_variable_rewrites_the_discriminated_local() {
    // static int run(int a) { int b = 7; return a + b; }
    let mut class = class_with_ctor("game/Vars");
    let mut insns = InsnList::new();
    insns.push_back(Insn::Int(Opcode::BIPUSH, 7));
    insns.push_back(Insn::Var(Opcode::ISTORE, 1));
    insns.push_back(Insn::Var(Opcode::ILOAD, 0));
    insns.push_back(Insn::Var(Opcode::ILOAD, 1));
    insns.push_back(Insn::Simple(Opcode::IADD));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    class.methods.push(method_with_code(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "run",
        "(I)I",
        2,
        insns,
    ));

    let mut mixin = mixin_class("game/mixins/VarsMixin", &["game/Vars"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Var(Opcode::ILOAD, 0));
    body.push_back(Insn::Simple(Opcode::IRETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE | MethodAccess::STATIC,
        "scale",
        "(I)I",
        1,
        body,
    );
    // anchored after the store into slot 1, explicitly discriminated
    handler.invisible_annotations.push(
        injector(
            descriptors::MODIFY_VARIABLE,
            "run",
            at("STORE").with("args", AnnotationValue::Array(vec![AnnotationValue::Str(
                "index=1".to_string(),
            )])),
        )
        .with("index", AnnotationValue::Int(1))
        .with("require", AnnotationValue::Int(1)),
    );
    mixin.methods.push(handler);

    let (engine, source) = engine();
    source.insert_node(&class).unwrap();
    source.insert_node(&mixin).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["VarsMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Vars").unwrap();
    let out = engine
        .transform("game/Vars", "game/Vars", Some(&bytes))
        .unwrap();
    let decoded = decode(&out).unwrap();
    let code = decoded.find_method("run", "(I)I").unwrap().code.as_ref().unwrap();
    let real: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| !insn.is_marker())
        .collect();

    // bipush 7, istore 1, iload 1, handler, istore 1, iload 0, ...
    assert!(matches!(real[0], Insn::Int(Opcode::BIPUSH, 7)));
    assert!(matches!(real[1], Insn::Var(Opcode::ISTORE, 1)));
    assert!(matches!(real[2], Insn::Var(Opcode::ILOAD, 1)));
    assert!(
        matches!(real[3], Insn::Method { name, .. } if name.contains("$scale"))
    );
    assert!(matches!(real[4], Insn::Var(Opcode::ISTORE, 1)));
}

#[test]
fn modify_arg_rewrites_only_the_selected_argument() {
    // static void emit() { sink(1, 2); }
    let mut class = class_with_ctor("game/Emit");
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::ICONST_1));
    insns.push_back(Insn::Simple(Opcode::ICONST_2));
    insns.push_back(Insn::method(Opcode::INVOKESTATIC, "game/Sink", "sink", "(II)V", false).unwrap());
    insns.push_back(Insn::Simple(Opcode::RETURN));
    class.methods.push(method_with_code(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "emit",
        "()V",
        0,
        insns,
    ));

    let mut mixin = mixin_class("game/mixins/EmitMixin", &["game/Emit"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Var(Opcode::ILOAD, 0));
    body.push_back(Insn::Simple(Opcode::IRETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE | MethodAccess::STATIC,
        "first",
        "(I)I",
        1,
        body,
    );
    handler.invisible_annotations.push(
        injector(
            descriptors::MODIFY_ARG,
            "emit",
            at_target("INVOKE", "Lgame/Sink;sink(II)V"),
        )
        .with("index", AnnotationValue::Int(0))
        .with("require", AnnotationValue::Int(1)),
    );
    mixin.methods.push(handler);

    let (engine, source) = engine();
    source.insert_node(&class).unwrap();
    source.insert_node(&mixin).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EmitMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Emit").unwrap();
    let out = engine
        .transform("game/Emit", "game/Emit", Some(&bytes))
        .unwrap();
    let decoded = decode(&out).unwrap();
    let code = decoded.find_method("emit", "()V").unwrap().code.as_ref().unwrap();

    // the original invocation survives, preceded by the handler call on the
    // spilled first argument
    let sequence: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| !insn.is_marker())
        .collect();
    let handler_pos = sequence
        .iter()
        .position(|insn| matches!(insn, Insn::Method { name, .. } if name.contains("$first")))
        .expect("argument-modifier handler missing");
    let sink_pos = sequence
        .iter()
        .position(|insn| matches!(insn, Insn::Method { owner, .. } if owner == "game/Sink"))
        .expect("original invocation missing");
    assert!(handler_pos < sink_pos);
}
