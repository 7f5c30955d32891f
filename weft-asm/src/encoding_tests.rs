//! Whole-class encode/decode round trips.

use crate::classfile::{decode, encode, ClassNode, CodeBody, FieldNode, MethodNode, TryCatchBlock};
use crate::insn::{Insn, InsnList};
use crate::opcode::Opcode;
use crate::pool::PoolConstant;
use crate::visibility::{FieldAccess, MethodAccess};

fn tick_method() -> MethodNode {
    // void tick() { this.count = this.count + 1; }
    let mut insns = InsnList::new();
    insns.push_back(Insn::Var(Opcode::ALOAD, 0));
    insns.push_back(Insn::Simple(Opcode::DUP));
    insns
        .push_back(Insn::field(Opcode::GETFIELD, "game/Engine", "count", "I").unwrap());
    insns.push_back(Insn::Simple(Opcode::ICONST_1));
    insns.push_back(Insn::Simple(Opcode::IADD));
    insns
        .push_back(Insn::field(Opcode::PUTFIELD, "game/Engine", "count", "I").unwrap());
    insns.push_back(Insn::Simple(Opcode::RETURN));

    let mut method = MethodNode::new(MethodAccess::PUBLIC, "tick", "()V");
    method.code = Some(CodeBody {
        max_stack: 3,
        max_locals: 1,
        insns,
        ..CodeBody::default()
    });
    method
}

fn sample_class() -> ClassNode {
    let mut class = ClassNode::new("game/Engine");
    class.interfaces.push("game/Ticking".to_string());
    class.source_file = Some("Engine.java".to_string());
    class
        .fields
        .push(FieldNode::new(FieldAccess::PRIVATE, "count", "I"));
    class.methods.push(tick_method());
    class
}

#[test]
fn structural_round_trip() {
    let class = sample_class();
    let bytes = encode(&class).unwrap();
    let read = decode(&bytes).unwrap();

    assert_eq!(read.name, "game/Engine");
    assert_eq!(read.superclass.as_deref(), Some("java/lang/Object"));
    assert_eq!(read.interfaces, vec!["game/Ticking"]);
    assert_eq!(read.source_file.as_deref(), Some("Engine.java"));
    assert_eq!(read.fields.len(), 1);
    assert_eq!(read.fields[0].name, "count");

    let method = read.find_method("tick", "()V").unwrap();
    let code = method.code.as_ref().unwrap();
    let ops: Vec<_> = code
        .insns
        .iter()
        .filter_map(|(_, insn)| insn.opcode())
        .collect();
    assert_eq!(
        ops,
        vec![
            Opcode::ALOAD,
            Opcode::DUP,
            Opcode::GETFIELD,
            Opcode::ICONST_1,
            Opcode::IADD,
            Opcode::PUTFIELD,
            Opcode::RETURN,
        ]
    );
}

#[test]
fn second_encode_is_stable() {
    let class = sample_class();
    let first = encode(&class).unwrap();
    let reread = decode(&first).unwrap();
    let second = encode(&reread).unwrap();
    assert_eq!(first, second);
}

#[test]
fn jumps_and_handlers_round_trip() {
    // int clamp(int x) { try { if (x < 0) return 0; return x; } catch (RuntimeException e) { return -1; } }
    let mut insns = InsnList::new();
    let body_start = insns.new_label();
    let body_end = insns.new_label();
    let handler = insns.new_label();
    let positive = insns.new_label();

    insns.push_back(Insn::Label(body_start));
    insns.push_back(Insn::Line(40));
    insns.push_back(Insn::Var(Opcode::ILOAD, 1));
    insns.push_back(Insn::Jump(Opcode::IFGE, positive));
    insns.push_back(Insn::Simple(Opcode::ICONST_0));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    insns.push_back(Insn::Label(positive));
    insns.push_back(Insn::Var(Opcode::ILOAD, 1));
    insns.push_back(Insn::Simple(Opcode::IRETURN));
    insns.push_back(Insn::Label(body_end));
    insns.push_back(Insn::Label(handler));
    insns.push_back(Insn::Var(Opcode::ASTORE, 2));
    insns.push_back(Insn::Simple(Opcode::ICONST_M1));
    insns.push_back(Insn::Simple(Opcode::IRETURN));

    let mut method = MethodNode::new(MethodAccess::PUBLIC, "clamp", "(I)I");
    method.code = Some(CodeBody {
        max_stack: 1,
        max_locals: 3,
        insns,
        try_catch: vec![TryCatchBlock {
            start: body_start,
            end: body_end,
            handler,
            catch_type: Some("java/lang/RuntimeException".to_string()),
        }],
        ..CodeBody::default()
    });

    let mut class = ClassNode::new("game/Maths");
    class.methods.push(method);

    let read = decode(&encode(&class).unwrap()).unwrap();
    let code = read.find_method("clamp", "(I)I").unwrap().code.as_ref().unwrap();

    assert_eq!(code.try_catch.len(), 1);
    assert_eq!(
        code.try_catch[0].catch_type.as_deref(),
        Some("java/lang/RuntimeException")
    );

    // the conditional's target label must be present in the decoded list
    let jump_target = code
        .insns
        .iter()
        .find_map(|(_, insn)| match insn {
            Insn::Jump(Opcode::IFGE, target) => Some(*target),
            _ => None,
        })
        .unwrap();
    assert!(code
        .insns
        .iter()
        .any(|(_, insn)| matches!(insn, Insn::Label(label) if *label == jump_target)));

    // the line marker survives
    assert!(code
        .insns
        .iter()
        .any(|(_, insn)| matches!(insn, Insn::Line(40))));
}

#[test]
fn constants_round_trip() {
    let mut insns = InsnList::new();
    insns.push_back(Insn::Int(Opcode::BIPUSH, 10));
    insns.push_back(Insn::Ldc(PoolConstant::Long(1 << 40)));
    insns.push_back(Insn::Simple(Opcode::POP2));
    insns.push_back(Insn::Ldc(PoolConstant::Str("speed".to_string())));
    insns.push_back(Insn::Simple(Opcode::POP));
    insns.push_back(Insn::Simple(Opcode::POP));
    insns.push_back(Insn::Simple(Opcode::RETURN));

    let mut method = MethodNode::new(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "constants",
        "()V",
    );
    method.code = Some(CodeBody {
        max_stack: 3,
        max_locals: 0,
        insns,
        ..CodeBody::default()
    });
    let mut class = ClassNode::new("game/Consts");
    class.methods.push(method);

    let read = decode(&encode(&class).unwrap()).unwrap();
    let code = read
        .find_method("constants", "()V")
        .unwrap()
        .code
        .as_ref()
        .unwrap();
    let constants: Vec<_> = code
        .insns
        .iter()
        .filter_map(|(_, insn)| insn.constant_value())
        .collect();
    assert_eq!(
        constants,
        vec![
            PoolConstant::Int(10),
            PoolConstant::Long(1 << 40),
            PoolConstant::Str("speed".to_string()),
        ]
    );
}
