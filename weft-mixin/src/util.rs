//! Test utilities.

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    //! Builders for target classes, mixin classes and engines, used by the
    //! integration suite.

    use std::sync::Arc;

    use weft_asm::annotation::{AnnotationNode, AnnotationValue};
    use weft_asm::classfile::{ClassNode, CodeBody, MethodNode, CTOR_NAME, OBJECT};
    use weft_asm::insn::{Insn, InsnList};
    use weft_asm::opcode::Opcode;
    use weft_asm::visibility::MethodAccess;

    use crate::annotations::descriptors;
    use crate::info::MemoryClassSource;
    use crate::transform::{Transformer, TransformerOptions};

    /// A method with a body, defaulting to generous frame budgets.
    pub fn method_with_code(
        access: MethodAccess,
        name: &str,
        desc: &str,
        max_locals: u16,
        insns: InsnList,
    ) -> MethodNode {
        let mut method = MethodNode::new(access, name, desc);
        method.code = Some(CodeBody {
            max_stack: 8,
            max_locals,
            insns,
            ..CodeBody::default()
        });
        method
    }

    /// A no-argument constructor that just delegates to `superclass`.
    pub fn default_ctor(superclass: &str) -> MethodNode {
        let mut insns = InsnList::new();
        insns.push_back(Insn::Var(Opcode::ALOAD, 0));
        insns.push_back(Insn::Method {
            op: Opcode::INVOKESPECIAL,
            owner: superclass.to_string(),
            name: CTOR_NAME.to_string(),
            desc: "()V".to_string(),
            itf: false,
        });
        insns.push_back(Insn::Simple(Opcode::RETURN));
        method_with_code(MethodAccess::PUBLIC, CTOR_NAME, "()V", 1, insns)
    }

    /// A class extending the root class with a default constructor.
    pub fn class_with_ctor(name: &str) -> ClassNode {
        let mut class = ClassNode::new(name);
        class.methods.push(default_ctor(OBJECT));
        class
    }

    /// A mixin class targeting `targets`, with the class annotation already
    /// attached.
    pub fn mixin_class(name: &str, targets: &[&str]) -> ClassNode {
        let mut class = ClassNode::new(name);
        class.invisible_annotations.push(
            AnnotationNode::new(descriptors::MIXIN).with(
                "targets",
                AnnotationValue::Array(
                    targets
                        .iter()
                        .map(|t| AnnotationValue::Str(t.to_string()))
                        .collect(),
                ),
            ),
        );
        class
    }

    /// Override the priority on an already-built mixin class.
    pub fn set_mixin_priority(class: &mut ClassNode, priority: i32) {
        for annotation in &mut class.invisible_annotations {
            if annotation.desc == descriptors::MIXIN {
                annotation
                    .values
                    .push(("priority".to_string(), AnnotationValue::Int(priority)));
            }
        }
    }

    /// An `At` annotation record.
    pub fn at(code: &str) -> AnnotationNode {
        AnnotationNode::new(descriptors::AT).with("value", AnnotationValue::Str(code.to_string()))
    }

    /// An `At` annotation record with a target member.
    pub fn at_target(code: &str, target: &str) -> AnnotationNode {
        at(code).with("target", AnnotationValue::Str(target.to_string()))
    }

    /// An injector annotation of the given type, for one method and one
    /// point.
    pub fn injector(desc: &str, method: &str, at: AnnotationNode) -> AnnotationNode {
        AnnotationNode::new(desc)
            .with(
                "method",
                AnnotationValue::Array(vec![AnnotationValue::Str(method.to_string())]),
            )
            .with("at", AnnotationValue::Array(vec![AnnotationValue::Nested(at)]))
    }

    /// A standard config document for one package.
    pub fn config_json(package: &str, mixins: &[&str]) -> String {
        let list = mixins
            .iter()
            .map(|m| format!("{m:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(r#"{{"package": "{package}", "mixins": [{list}]}}"#)
    }

    /// An engine over an in-memory class source, with default options.
    pub fn engine() -> (Transformer, Arc<MemoryClassSource>) {
        engine_with_options(TransformerOptions::default())
    }

    /// An engine over an in-memory class source.
    pub fn engine_with_options(
        options: TransformerOptions,
    ) -> (Transformer, Arc<MemoryClassSource>) {
        let source = Arc::new(MemoryClassSource::new());
        let transformer = Transformer::new(Arc::clone(&source), options);
        (transformer, source)
    }
}
