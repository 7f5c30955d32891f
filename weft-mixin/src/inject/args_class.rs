//! Synthesized argument-container classes backing `ModifyArgs`.
//!
//! For each distinct argument signature a small class is generated that
//! spills the invocation's arguments into typed fields and hands them back
//! one by one. The classes are queued on the target context and served by
//! the driver's class-generator table when the loader asks for them.

use sha3::{Digest, Keccak256};

use weft_asm::classfile::{ClassNode, CodeBody, FieldNode, MethodNode, CTOR_NAME};
use weft_asm::descriptor::{JavaType, MethodDescriptor};
use weft_asm::insn::{Insn, InsnList};
use weft_asm::opcode::Opcode;
use weft_asm::visibility::{ClassAccess, FieldAccess, MethodAccess};

/// Internal name of the args-container base class.
pub const ARGS_CLASS: &str = "weft/callback/Args";

/// Deterministic name of the container class for an argument signature.
pub fn args_class_name(arg_desc: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(arg_desc.as_bytes());
    let digest = hasher.finalize();
    format!(
        "{ARGS_CLASS}${:02x}{:02x}{:02x}{:02x}",
        digest[0], digest[1], digest[2], digest[3]
    )
}

/// Build the container class for an argument list.
///
/// Layout: one typed field per argument, a constructor taking all of them,
/// and one `load$<n>` getter per argument.
pub fn generate_args_class(args: &[JavaType]) -> ClassNode {
    let ctor_desc = MethodDescriptor::describe(args.iter(), &JavaType::Void);
    let name = args_class_name(&ctor_desc);
    let mut class = ClassNode::new(&name);
    class.access |= ClassAccess::FINAL | ClassAccess::SYNTHETIC;
    class.superclass = Some(ARGS_CLASS.to_string());

    for (i, arg) in args.iter().enumerate() {
        class.fields.push(FieldNode::new(
            FieldAccess::PRIVATE | FieldAccess::FINAL | FieldAccess::SYNTHETIC,
            format!("${i}"),
            arg.to_string(),
        ));
    }

    // ctor: super(); this.$n = argn;
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Method {
        op: Opcode::INVOKESPECIAL,
        owner: ARGS_CLASS.to_string(),
        name: CTOR_NAME.to_string(),
        desc: "()V".to_string(),
        itf: false,
    });
    let mut slot = 1u16;
    for (i, arg) in args.iter().enumerate() {
        insns.push_back(Insn::Var(Opcode::ALOAD, 0));
        insns.push_back(Insn::Var(arg.load_op(), slot));
        insns.push_back(Insn::Field {
            op: Opcode::PUTFIELD,
            owner: name.clone(),
            name: format!("${i}"),
            desc: arg.to_string(),
        });
        slot += arg.size();
    }
    insns.push_back(Insn::Simple(Opcode::RETURN));
    let mut ctor = MethodNode::new(MethodAccess::PUBLIC | MethodAccess::SYNTHETIC, CTOR_NAME, ctor_desc);
    ctor.code = Some(CodeBody {
        max_stack: 3,
        max_locals: slot,
        insns,
        ..CodeBody::default()
    });
    class.methods.push(ctor);

    for (i, arg) in args.iter().enumerate() {
        let mut insns = InsnList::new();
        insns.push_back(Insn::Var(Opcode::ALOAD, 0));
        insns.push_back(Insn::Field {
            op: Opcode::GETFIELD,
            owner: name.clone(),
            name: format!("${i}"),
            desc: arg.to_string(),
        });
        insns.push_back(Insn::Simple(arg.return_op()));
        let mut getter = MethodNode::new(
            MethodAccess::PUBLIC | MethodAccess::SYNTHETIC,
            format!("load${i}"),
            format!("(){arg}"),
        );
        getter.code = Some(CodeBody {
            max_stack: arg.size().max(1) + 1,
            max_locals: 1,
            insns,
            ..CodeBody::default()
        });
        class.methods.push(getter);
    }

    class
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_shape() {
        let args = vec![JavaType::Int, JavaType::Long, JavaType::Object("a/B".into())];
        let class = generate_args_class(&args);
        assert_eq!(class.superclass.as_deref(), Some(ARGS_CLASS));
        assert_eq!(class.fields.len(), 3);
        assert!(class.find_method("load$1", "()J").is_some());
        assert!(class.find_method(CTOR_NAME, "(IJLa/B;)V").is_some());
    }

    #[test]
    fn name_is_deterministic_per_signature() {
        assert_eq!(args_class_name("(IJ)V"), args_class_name("(IJ)V"));
        assert_ne!(args_class_name("(IJ)V"), args_class_name("(JI)V"));
    }
}
