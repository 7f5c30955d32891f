//! Constructor-head injection and enforce modes.

use weft_mixin::prelude::*;
use weft_mixin::util::test_helpers::*;

use weft_asm::annotation::AnnotationValue;

/// Constructor doing `super(); this.x = 1; this.tick();`.
fn target() -> ClassNode {
    let mut class = ClassNode::new("game/Engine");
    class.fields.push(FieldNode::new(FieldAccess::PRIVATE, "x", "I"));

    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Method {
        op: Opcode::INVOKESPECIAL,
        owner: OBJECT.to_string(),
        name: CTOR_NAME.to_string(),
        desc: "()V".to_string(),
        itf: false,
    });
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Simple(Opcode::ICONST_1));
    insns.push_back(Insn::field(Opcode::PUTFIELD, "game/Engine", "x", "I").unwrap());
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::method(Opcode::INVOKEVIRTUAL, "game/Engine", "tick", "()V", false).unwrap());
    insns.push_back(Insn::Simple(Opcode::RETURN));
    class
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, CTOR_NAME, "()V", 1, insns));

    let mut tick = InsnList::new();
    tick.push_back(Insn::Simple(Opcode::RETURN));
    class
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "tick", "()V", 1, tick));
    class
}

fn ctor_mixin(enforce: Option<&str>) -> ClassNode {
    let mut class = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Simple(Opcode::RETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE,
        "onCtor",
        &format!("(L{CALLBACK_INFO};)V"),
        2,
        body,
    );
    let mut point = at("CTOR_HEAD");
    if let Some(enforce) = enforce {
        point = point.with(
            "args",
            AnnotationValue::Array(vec![AnnotationValue::Str(format!("enforce={enforce}"))]),
        );
    }
    handler.invisible_annotations.push(
        injector(descriptors::INJECT, "<init>", point)
            .with("require", AnnotationValue::Int(1)),
    );
    class.methods.push(handler);
    class
}

/// Index of the merged handler invocation among the real instructions,
/// along with the indices of the delegate call, the field store and the
/// body invocation.
fn positions(enforce: Option<&str>) -> (usize, usize, usize, usize) {
    let (engine, source) = engine();
    source.insert_node(&target()).unwrap();
    source.insert_node(&ctor_mixin(enforce)).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    let class = decode(&out).unwrap();
    let code = class.find_method(CTOR_NAME, "()V").unwrap().code.as_ref().unwrap();
    let real: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| !insn.is_marker())
        .collect();

    let find = |pred: &dyn Fn(&Insn) -> bool| real.iter().position(|i| pred(i)).unwrap();
    let delegate = find(&|insn| {
        matches!(insn, Insn::Method { op: Opcode::INVOKESPECIAL, name, owner, .. }
            if name == CTOR_NAME && owner == OBJECT)
    });
    let store = find(&|insn| matches!(insn, Insn::Field { op: Opcode::PUTFIELD, name, .. } if name == "x"));
    let body = find(&|insn| matches!(insn, Insn::Method { name, .. } if name == "tick"));
    let handler = find(&|insn| matches!(insn, Insn::Method { name, .. } if name.contains("$onCtor")));
    (delegate, store, body, handler)
}

#[test]
fn post_delegate_lands_between_super_and_initializer() {
    let (delegate, store, _, handler) = positions(Some("POST_DELEGATE"));
    assert!(delegate < handler);
    assert!(handler < store);
}

#[test]
fn default_enforce_lands_after_the_initializers() {
    let (_, store, body, handler) = positions(None);
    assert!(store < handler);
    assert!(handler < body);
}

#[test]
fn pre_body_matches_the_post_initializer_anchor() {
    let (_, store, body, handler) = positions(Some("PRE_BODY"));
    assert!(store < handler);
    assert!(handler < body);
}

#[test]
fn instance_handler_before_delegate_is_rejected() {
    let (engine, source) = engine();
    source.insert_node(&target()).unwrap();

    // HEAD of a constructor sits before the delegate call, where only
    // static handlers may run
    let mut class = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Simple(Opcode::RETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE,
        "onCtor",
        &format!("(L{CALLBACK_INFO};)V"),
        2,
        body,
    );
    handler
        .invisible_annotations
        .push(injector(descriptors::INJECT, "<init>", at("HEAD")));
    class.methods.push(handler);
    source.insert_node(&class).unwrap();

    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();
    let bytes = source.class_bytes("game/Engine").unwrap();
    let err = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap_err();
    assert!(matches!(err, TransformError::InvalidInjection { .. }));
}
