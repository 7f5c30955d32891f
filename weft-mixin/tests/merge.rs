//! Merge semantics: shadows, overwrites, uniques, intrinsics, interfaces,
//! accessors and invokers.

use weft_mixin::prelude::*;
use weft_mixin::util::test_helpers::*;

use weft_asm::annotation::AnnotationValue;

fn counter_target() -> ClassNode {
    let mut class = class_with_ctor("game/Engine");
    class
        .fields
        .push(FieldNode::new(FieldAccess::PRIVATE, "counter", "I"));
    class
}

fn apply(target: &ClassNode, mixins: &[ClassNode], names: &[&str]) -> ClassNode {
    let (engine, source) = engine();
    source.insert_node(target).unwrap();
    for mixin in mixins {
        source.insert_node(mixin).unwrap();
    }
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", names))
        .unwrap();
    let bytes = source.class_bytes(&target.name).unwrap();
    let out = engine
        .transform(&target.name, &target.name, Some(&bytes))
        .unwrap();
    decode(&out).unwrap()
}

#[test]
fn shadow_field_never_materializes_and_bump_reaches_the_target_field() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);

    // package-private `@Shadow int counter`
    let mut shadow = FieldNode::new(FieldAccess::empty(), "counter", "I");
    shadow
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::SHADOW));
    mixin.fields.push(shadow);

    // void bump() { counter++; }
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Simple(Opcode::DUP));
    insns.push_back(
        Insn::field(Opcode::GETFIELD, "game/mixins/EngineMixin", "counter", "I").unwrap(),
    );
    insns.push_back(Insn::Simple(Opcode::ICONST_1));
    insns.push_back(Insn::Simple(Opcode::IADD));
    insns.push_back(
        Insn::field(Opcode::PUTFIELD, "game/mixins/EngineMixin", "counter", "I").unwrap(),
    );
    insns.push_back(Insn::Simple(Opcode::RETURN));
    mixin
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "bump", "()V", 1, insns));

    let merged = apply(&counter_target(), &[mixin], &["EngineMixin"]);

    // no synthetic counter field was added
    assert_eq!(merged.fields.len(), 1);
    // the target field was widened from private to package
    assert_eq!(
        Visibility::from_flags(merged.fields[0].access.bits()),
        Visibility::Package
    );

    let bump = merged.find_method("bump", "()V").expect("bump was not merged");
    let code = bump.code.as_ref().unwrap();
    assert!(code.insns.iter().all(|(_, insn)| match insn {
        Insn::Field { owner, name, .. } => owner == "game/Engine" && name == "counter",
        _ => true,
    }));
    // merged methods carry the merge stamp with the session id
    assert!(bump
        .invisible_annotations
        .iter()
        .any(|a| a.desc == descriptors::MIXIN_MERGED));
}

fn overwrite_mixin(class_name: &str, return_const: Opcode, priority: Option<i32>) -> ClassNode {
    let mut mixin = mixin_class(class_name, &["game/Engine"]);
    if let Some(priority) = priority {
        set_mixin_priority(&mut mixin, priority);
    }
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(return_const));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    let mut method = method_with_code(MethodAccess::PUBLIC, "mode", "()I", 1, insns);
    method
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::OVERWRITE));
    mixin.methods.push(method);
    mixin
}

fn mode_target() -> ClassNode {
    let mut class = class_with_ctor("game/Engine");
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::ICONST_0));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    class
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "mode", "()I", 1, insns));
    class
}

fn returned_const(class: &ClassNode, name: &str) -> Opcode {
    class
        .find_method(name, "()I")
        .unwrap()
        .code
        .as_ref()
        .unwrap()
        .insns
        .iter()
        .find_map(|(_, insn)| match insn {
            Insn::Simple(op) if !op.is_return() => Some(*op),
            _ => None,
        })
        .unwrap()
}

#[test]
fn higher_priority_overwrite_wins() {
    let high = overwrite_mixin("game/mixins/HighMixin", Opcode::ICONST_1, Some(2000));
    let low = overwrite_mixin("game/mixins/LowMixin", Opcode::ICONST_2, None);
    let merged = apply(&mode_target(), &[high, low], &["HighMixin", "LowMixin"]);
    assert_eq!(returned_const(&merged, "mode"), Opcode::ICONST_1);
}

#[test]
fn equal_priority_overwrite_takes_the_stable_earlier_mixin() {
    let a = overwrite_mixin("game/mixins/AlphaMixin", Opcode::ICONST_3, None);
    let b = overwrite_mixin("game/mixins/BetaMixin", Opcode::ICONST_4, None);
    // registration order reversed to show name order decides, not input
    let merged = apply(&mode_target(), &[b, a], &["BetaMixin", "AlphaMixin"]);
    assert_eq!(returned_const(&merged, "mode"), Opcode::ICONST_3);
}

#[test]
fn overwrite_without_a_target_method_fails() {
    let mixin = overwrite_mixin("game/mixins/HighMixin", Opcode::ICONST_1, None);
    let (engine, source) = engine();
    let target = class_with_ctor("game/Engine");
    source.insert_node(&target).unwrap();
    source.insert_node(&mixin).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["HighMixin"]))
        .unwrap();
    // a non-required mixin's apply failure downgrades to a warning
    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    assert!(decode(&out).unwrap().find_method("mode", "()I").is_none());
}

#[test]
fn unique_method_is_renamed_on_conflict() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::ICONST_5));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    let mut method = method_with_code(MethodAccess::PUBLIC, "mode", "()I", 1, insns);
    method
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::UNIQUE));
    mixin.methods.push(method);

    let merged = apply(&mode_target(), &[mixin], &["EngineMixin"]);
    // the target's own method is untouched
    assert_eq!(returned_const(&merged, "mode"), Opcode::ICONST_0);
    // the unique method exists under its deterministic rename
    assert!(merged
        .methods
        .iter()
        .any(|m| m.name.starts_with("unique$") && m.name.ends_with("$mode")));
}

#[test]
fn unique_without_conflict_keeps_its_name_at_call_sites() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    // @Unique int extra() { return 5; } — nothing on the target collides
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::ICONST_5));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    let mut extra = method_with_code(MethodAccess::PUBLIC, "extra", "()I", 1, insns);
    extra
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::UNIQUE));
    mixin.methods.push(extra);
    // int callExtra() { return this.extra(); } — same-class call site
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(
        Insn::method(
            Opcode::INVOKEVIRTUAL,
            "game/mixins/EngineMixin",
            "extra",
            "()I",
            false,
        )
        .unwrap(),
    );
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    mixin
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "callExtra", "()I", 1, insns));

    let merged = apply(&counter_target(), &[mixin], &["EngineMixin"]);

    // merged under its own name, nothing renamed
    assert!(merged.find_method("extra", "()I").is_some());
    assert!(!merged.methods.iter().any(|m| m.name.starts_with("unique$")));
    // the call site still resolves against the merged declaration
    let caller = merged
        .find_method("callExtra", "()I")
        .unwrap()
        .code
        .as_ref()
        .unwrap();
    assert!(caller.insns.iter().any(|(_, insn)| matches!(
        insn,
        Insn::Method { owner, name, .. } if owner == "game/Engine" && name == "extra"
    )));
}

#[test]
fn unique_conflict_rename_rewrites_same_class_call_sites() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    // @Unique int mode() collides with the target's mode()I
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::ICONST_5));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    let mut unique = method_with_code(MethodAccess::PUBLIC, "mode", "()I", 1, insns);
    unique
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::UNIQUE));
    mixin.methods.push(unique);
    // int callMode() { return this.mode(); } — must follow the rename
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(
        Insn::method(
            Opcode::INVOKEVIRTUAL,
            "game/mixins/EngineMixin",
            "mode",
            "()I",
            false,
        )
        .unwrap(),
    );
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    mixin
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "callMode", "()I", 1, insns));

    let merged = apply(&mode_target(), &[mixin], &["EngineMixin"]);

    let caller = merged
        .find_method("callMode", "()I")
        .unwrap()
        .code
        .as_ref()
        .unwrap();
    let invoked = caller
        .insns
        .iter()
        .find_map(|(_, insn)| match insn {
            Insn::Method { owner, name, .. } if owner == "game/Engine" => Some(name.clone()),
            _ => None,
        })
        .expect("call site missing");
    assert!(invoked.starts_with("unique$") && invoked.ends_with("$mode"));
    // and the renamed declaration it points at really exists
    assert!(merged.find_method(&invoked, "()I").is_some());
    // the target's own method is untouched
    assert_eq!(returned_const(&merged, "mode"), Opcode::ICONST_0);
}

#[test]
fn intrinsic_merges_only_when_absent() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::ICONST_5));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    let mut method = method_with_code(MethodAccess::PUBLIC, "mode", "()I", 1, insns);
    method
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::INTRINSIC));
    mixin.methods.push(method.clone());

    // target already has the method: kept
    let merged = apply(&mode_target(), &[mixin.clone()], &["EngineMixin"]);
    assert_eq!(returned_const(&merged, "mode"), Opcode::ICONST_0);

    // target lacks it: merged
    let merged = apply(&class_with_ctor("game/Engine"), &[mixin], &["EngineMixin"]);
    assert_eq!(returned_const(&merged, "mode"), Opcode::ICONST_5);
}

#[test]
fn interfaces_are_unioned() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    mixin.interfaces.push("game/Marker".to_string());
    let merged = apply(&counter_target(), &[mixin], &["EngineMixin"]);
    assert!(merged.interfaces.iter().any(|i| i == "game/Marker"));
}

#[test]
fn accessor_and_invoker_are_synthesized() {
    let mut target = counter_target();
    let mut insns = InsnList::new();
    insns.push_back(Insn::Simple(Opcode::RETURN));
    target.methods.push(method_with_code(
        MethodAccess::PRIVATE,
        "step",
        "()V",
        1,
        insns,
    ));

    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut getter = MethodNode::new(
        MethodAccess::PUBLIC | MethodAccess::ABSTRACT,
        "getCounter",
        "()I",
    );
    getter
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::ACCESSOR));
    mixin.methods.push(getter);

    let mut invoker = MethodNode::new(
        MethodAccess::PUBLIC | MethodAccess::ABSTRACT,
        "callStep",
        "()V",
    );
    invoker
        .invisible_annotations
        .push(AnnotationNode::new(descriptors::INVOKER));
    mixin.methods.push(invoker);

    let merged = apply(&target, &[mixin], &["EngineMixin"]);

    let getter = merged.find_method("getCounter", "()I").expect("accessor missing");
    let code = getter.code.as_ref().unwrap();
    assert!(code.insns.iter().any(|(_, insn)| matches!(
        insn,
        Insn::Field { op: Opcode::GETFIELD, name, .. } if name == "counter"
    )));

    let invoker = merged.find_method("callStep", "()V").expect("invoker missing");
    let code = invoker.code.as_ref().unwrap();
    assert!(code.insns.iter().any(|(_, insn)| matches!(
        insn,
        // private target, so the bridge binds with invokespecial
        Insn::Method { op: Opcode::INVOKESPECIAL, name, .. } if name == "step"
    )));
}

#[test]
fn plain_field_initializer_is_spliced_into_target_ctor() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    mixin
        .fields
        .push(FieldNode::new(FieldAccess::PRIVATE, "added", "I"));
    // ctor: super(); this.added = 7;
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
    insns.push_back(Insn::Int(Opcode::BIPUSH, 7));
    insns.push_back(
        Insn::field(Opcode::PUTFIELD, "game/mixins/EngineMixin", "added", "I").unwrap(),
    );
    insns.push_back(Insn::Simple(Opcode::RETURN));
    mixin
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, CTOR_NAME, "()V", 1, insns));

    let merged = apply(&counter_target(), &[mixin], &["EngineMixin"]);
    assert!(merged.find_field("added").is_some());

    let ctor = merged.find_method(CTOR_NAME, "()V").unwrap();
    let code = ctor.code.as_ref().unwrap();
    let real: Vec<&Insn> = code
        .insns
        .iter()
        .map(|(_, insn)| insn)
        .filter(|insn| !insn.is_marker())
        .collect();
    // aload0, invokespecial super, aload0, bipush 7, putfield added, return
    assert!(matches!(real[1], Insn::Method { name, .. } if name == CTOR_NAME));
    assert!(matches!(real[3], Insn::Int(Opcode::BIPUSH, 7)));
    assert!(
        matches!(real[4], Insn::Field { op: Opcode::PUTFIELD, owner, name, .. }
            if owner == "game/Engine" && name == "added")
    );
}

#[test]
fn field_collision_without_shadow_is_skipped_with_the_mixin() {
    let mut mixin = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    mixin
        .fields
        .push(FieldNode::new(FieldAccess::PRIVATE, "counter", "I"));
    // not required: the apply failure downgrades and the target passes
    // through without the colliding field duplicated
    let merged = apply(&counter_target(), &[mixin], &["EngineMixin"]);
    assert_eq!(merged.fields.len(), 1);
}
