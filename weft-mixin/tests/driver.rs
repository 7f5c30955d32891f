//! Driver behavior: pass-through, package guards, refmap resolution,
//! plugins, groups, audit and hot swapping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use weft_mixin::prelude::*;
use weft_mixin::util::test_helpers::*;

use weft_asm::annotation::AnnotationValue;

fn tick_target(name: &str) -> ClassNode {
    let mut class = class_with_ctor(name);
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Simple(Opcode::POP));
    insns.push_back(Insn::Simple(Opcode::RETURN));
    class
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "tick", "()V", 1, insns));
    class
}

fn head_mixin(class_name: &str, method: &str) -> ClassNode {
    let mut class = mixin_class(class_name, &["game/Engine"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Simple(Opcode::RETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE,
        "onTick",
        &format!("(L{CALLBACK_INFO};)V"),
        2,
        body,
    );
    handler
        .invisible_annotations
        .push(injector(descriptors::INJECT, method, at("HEAD")));
    class.methods.push(handler);
    class
}

#[test]
fn pass_through_is_bytewise_identity() {
    let (engine, source) = engine();
    let unrelated = tick_target("game/Other");
    source.insert_node(&unrelated).unwrap();

    let bytes = source.class_bytes("game/Other").unwrap();
    let out = engine
        .transform("game/Other", "game/Other", Some(&bytes))
        .unwrap();
    assert_eq!(out, bytes);

    // repeated calls stay identical regardless of cache state
    let again = engine
        .transform("game/Other", "game/Other", Some(&bytes))
        .unwrap();
    assert_eq!(again, bytes);
}

#[test]
fn mixin_package_classes_cannot_be_loaded() {
    let (engine, source) = engine();
    source.insert_node(&tick_target("game/Engine")).unwrap();
    source
        .insert_node(&head_mixin("game/mixins/EngineMixin", "tick"))
        .unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/mixins/EngineMixin").unwrap();
    let err = engine
        .transform(
            "game/mixins/EngineMixin",
            "game/mixins/EngineMixin",
            Some(&bytes),
        )
        .unwrap_err();
    assert!(matches!(err, TransformError::MixinClassLoaded { .. }));
}

#[test]
fn refmap_resolves_source_names_to_runtime_names() {
    let (engine, source) = engine();
    // the runtime class carries the obfuscated name `t`
    let mut class = class_with_ctor("game/Engine");
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Simple(Opcode::POP));
    insns.push_back(Insn::Simple(Opcode::RETURN));
    class
        .methods
        .push(method_with_code(MethodAccess::PUBLIC, "t", "()V", 1, insns));
    source.insert_node(&class).unwrap();
    // the mixin targets the source name `tick`
    source
        .insert_node(&head_mixin("game/mixins/EngineMixin", "tick"))
        .unwrap();

    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();
    engine
        .add_refmap(
            "mixins.game.json",
            r#"{"mappings": {"game/Engine": {"tick": "t"}}}"#,
        )
        .unwrap();

    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    let decoded = decode(&out).unwrap();
    let code = decoded.find_method("t", "()V").unwrap().code.as_ref().unwrap();
    assert!(code
        .insns
        .iter()
        .any(|(_, insn)| matches!(insn, Insn::Method { name, .. } if name.contains("$onTick"))));
}

struct VetoPlugin {
    consulted: AtomicUsize,
}

impl MixinConfigPlugin for VetoPlugin {
    fn should_apply(&self, _target: &str, _mixin: &str) -> bool {
        self.consulted.fetch_add(1, Ordering::SeqCst);
        false
    }
}

#[test]
fn plugin_can_veto_application() {
    let (engine, source) = engine();
    source.insert_node(&tick_target("game/Engine")).unwrap();
    source
        .insert_node(&head_mixin("game/mixins/EngineMixin", "tick"))
        .unwrap();

    let plugin = Arc::new(VetoPlugin {
        consulted: AtomicUsize::new(0),
    });
    let as_plugin: Arc<dyn MixinConfigPlugin> = plugin.clone();
    engine.register_plugin("game.mixins.Plugin", as_plugin);
    engine
        .add_config(
            "mixins.game.json",
            r#"{"package": "game.mixins", "mixins": ["EngineMixin"], "plugin": "game.mixins.Plugin"}"#,
        )
        .unwrap();

    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    // vetoed application degrades to a pass-through
    assert_eq!(out, bytes);
    assert!(plugin.consulted.load(Ordering::SeqCst) > 0);
}

#[test]
fn group_minimum_applies_to_the_sum() {
    let (engine, source) = engine();
    source.insert_node(&tick_target("game/Engine")).unwrap();

    let mut class = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    // one handler that cannot match, one that matches, both in one group
    for (name, target) in [("onMissing", "absent"), ("onTick", "tick")] {
        let mut body = InsnList::new();
        body.push_back(Insn::Simple(Opcode::RETURN));
        let mut handler = method_with_code(
            MethodAccess::PRIVATE,
            name,
            &format!("(L{CALLBACK_INFO};)V"),
            2,
            body,
        );
        handler
            .invisible_annotations
            .push(injector(descriptors::INJECT, target, at("HEAD")));
        handler.invisible_annotations.push(
            AnnotationNode::new(descriptors::GROUP)
                .with("name", AnnotationValue::Str("ticks".to_string()))
                .with("min", AnnotationValue::Int(1)),
        );
        class.methods.push(handler);
    }
    source.insert_node(&class).unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();

    // sum across the group is 1 which satisfies min=1
    let bytes = source.class_bytes("game/Engine").unwrap();
    engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
}

#[test]
fn audit_reports_targets_that_never_loaded() {
    let (engine, source) = engine();
    source.insert_node(&tick_target("game/Engine")).unwrap();
    source
        .insert_node(&head_mixin("game/mixins/EngineMixin", "tick"))
        .unwrap();
    // this mixin's target has no bytes anywhere
    source
        .insert_node(&head_mixin("game/mixins/GhostMixin", "tick"))
        .unwrap();
    {
        // retarget the ghost mixin to a class the source cannot provide
        let mut ghost = head_mixin("game/mixins/GhostMixin", "tick");
        ghost.invisible_annotations[0] = AnnotationNode::new(descriptors::MIXIN).with(
            "targets",
            AnnotationValue::Array(vec![AnnotationValue::Str("game/Missing".to_string())]),
        );
        source.insert_node(&ghost).unwrap();
    }
    engine
        .add_config(
            "mixins.game.json",
            &config_json("game.mixins", &["EngineMixin", "GhostMixin"]),
        )
        .unwrap();

    let remaining = engine.audit();
    assert_eq!(remaining, vec!["game/Missing".to_string()]);

    // the loadable target was force-transformed during the audit
    let remaining = engine.audit();
    assert_eq!(remaining, vec!["game/Missing".to_string()]);
}

#[test]
fn hot_swap_returns_affected_targets_and_requires_the_flag() {
    let (engine, source) = engine();
    source.insert_node(&tick_target("game/Engine")).unwrap();
    source
        .insert_node(&head_mixin("game/mixins/EngineMixin", "tick"))
        .unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();
    let bytes = source.class_bytes("game/Engine").unwrap();
    engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();

    let swapped = encode(&head_mixin("game/mixins/EngineMixin", "tick")).unwrap();
    assert!(engine.hot_swap("game/mixins/EngineMixin", &swapped).is_err());

    let (engine, source) = engine_with_options(TransformerOptions {
        hot_swap: true,
        ..TransformerOptions::default()
    });
    source.insert_node(&tick_target("game/Engine")).unwrap();
    source
        .insert_node(&head_mixin("game/mixins/EngineMixin", "tick"))
        .unwrap();
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();
    let bytes = source.class_bytes("game/Engine").unwrap();
    engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();

    let targets = engine
        .hot_swap("game/mixins/EngineMixin", &swapped)
        .unwrap();
    assert_eq!(targets, vec!["game/Engine".to_string()]);
}

struct FirstInsn;

impl InjectionPointStrategy for FirstInsn {
    fn find(&self, ctx: &FindContext<'_>, window: &[InsnId]) -> Vec<InsnId> {
        window
            .iter()
            .copied()
            .find(|id| !ctx.insns.get(*id).is_marker())
            .into_iter()
            .collect()
    }
}

#[test]
fn custom_injection_points_resolve_by_dotted_id() {
    let (engine, source) = engine();
    source.insert_node(&tick_target("game/Engine")).unwrap();

    let mut class = mixin_class("game/mixins/EngineMixin", &["game/Engine"]);
    let mut body = InsnList::new();
    body.push_back(Insn::Simple(Opcode::RETURN));
    let mut handler = method_with_code(
        MethodAccess::PRIVATE,
        "onTick",
        &format!("(L{CALLBACK_INFO};)V"),
        2,
        body,
    );
    handler.invisible_annotations.push(
        injector(descriptors::INJECT, "tick", at("game.points.FirstInsn"))
            .with("require", AnnotationValue::Int(1)),
    );
    class.methods.push(handler);
    source.insert_node(&class).unwrap();

    engine.register_injection_point("game.points.FirstInsn", Arc::new(FirstInsn));
    engine
        .add_config("mixins.game.json", &config_json("game.mixins", &["EngineMixin"]))
        .unwrap();

    let bytes = source.class_bytes("game/Engine").unwrap();
    let out = engine
        .transform("game/Engine", "game/Engine", Some(&bytes))
        .unwrap();
    assert!(decode(&out)
        .unwrap()
        .find_method("tick", "()V")
        .unwrap()
        .code
        .as_ref()
        .unwrap()
        .insns
        .iter()
        .any(|(_, insn)| matches!(insn, Insn::Method { name, .. } if name.contains("$onTick"))));
}
