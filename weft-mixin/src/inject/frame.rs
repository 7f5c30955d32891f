//! Coarse local-variable frame reconstruction.
//!
//! Injections that capture or modify locals need to know what occupies each
//! slot at the injection point. A forward walk from the method entry is
//! enough: parameters seed the slots and stores update them. Types are
//! coarse (`astore` yields `java/lang/Object`); names and precise reference
//! types are refined from the local-variable debug table when present.

use weft_asm::classfile::CodeBody;
use weft_asm::descriptor::{JavaType, MethodDescriptor};
use weft_asm::insn::{Insn, InsnId};
use weft_asm::opcode::Opcode;

/// What occupies one local slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LocalSlotInfo {
    /// Coarse type, refined from debug info when available.
    pub ty: JavaType,
    /// Source name, when debug info covers the slot at the point.
    pub name: Option<String>,
}

/// Reconstruct the locals live at `at` (exclusive).
///
/// The result is indexed by slot; `None` marks untouched slots and the
/// second half of wide values.
pub(crate) fn locals_at(
    owner: &str,
    desc: &MethodDescriptor,
    is_static: bool,
    code: &CodeBody,
    at: InsnId,
) -> Vec<Option<LocalSlotInfo>> {
    let mut slots: Vec<Option<LocalSlotInfo>> = vec![None; code.max_locals as usize];
    let mut set = |slots: &mut Vec<Option<LocalSlotInfo>>, slot: u16, ty: JavaType| {
        let wide = ty.size() == 2;
        let idx = slot as usize;
        if idx >= slots.len() {
            slots.resize(idx + 2, None);
        }
        slots[idx] = Some(LocalSlotInfo { ty, name: None });
        if wide && idx + 1 < slots.len() {
            slots[idx + 1] = None;
        }
    };

    let mut cursor = 0u16;
    if !is_static {
        set(&mut slots, cursor, JavaType::Object(owner.to_string()));
        cursor += 1;
    }
    for arg in &desc.args {
        set(&mut slots, cursor, arg.clone());
        cursor += arg.size();
    }

    for (id, insn) in code.insns.iter() {
        if id == at {
            break;
        }
        match insn {
            Insn::Var(op, slot) if op.is_local_store() => {
                let ty = match op {
                    Opcode::ISTORE => JavaType::Int,
                    Opcode::LSTORE => JavaType::Long,
                    Opcode::FSTORE => JavaType::Float,
                    Opcode::DSTORE => JavaType::Double,
                    _ => JavaType::Object("java/lang/Object".to_string()),
                };
                set(&mut slots, *slot, ty);
            }
            Insn::Iinc { slot, .. } => set(&mut slots, *slot, JavaType::Int),
            _ => {}
        }
    }

    refine_from_debug_table(code, at, &mut slots);
    slots
}

/// Overlay names and precise types from `LocalVariableTable` entries whose
/// range covers the point.
fn refine_from_debug_table(
    code: &CodeBody,
    at: InsnId,
    slots: &mut [Option<LocalSlotInfo>],
) {
    if code.locals.is_empty() {
        return;
    }
    // positions of labels and of the point itself, in one pass
    let mut at_pos = None;
    let mut label_pos = std::collections::HashMap::new();
    for (pos, (id, insn)) in code.insns.iter().enumerate() {
        if id == at {
            at_pos = Some(pos);
        }
        if let Insn::Label(label) = insn {
            label_pos.insert(*label, pos);
        }
    }
    let Some(at_pos) = at_pos else { return };

    for entry in &code.locals {
        let (Some(start), Some(end)) = (label_pos.get(&entry.start), label_pos.get(&entry.end))
        else {
            continue;
        };
        if *start <= at_pos && at_pos < *end {
            if let Some(Some(slot)) = slots.get_mut(entry.slot as usize) {
                slot.name = Some(entry.name.clone());
                if let Ok(ty) = JavaType::parse(&entry.desc) {
                    slot.ty = ty;
                }
            }
        }
    }
}

/// Flag whether two types are interchangeable at the coarse level the
/// analyzer works at.
pub(crate) fn coarse_match(analyzed: &JavaType, wanted: &JavaType) -> bool {
    match (analyzed, wanted) {
        (JavaType::Object(a), JavaType::Object(b)) => {
            a == b || a == "java/lang/Object" || b == "java/lang/Object"
        }
        (JavaType::Object(a), JavaType::Array(_)) => a == "java/lang/Object",
        (JavaType::Array(_), JavaType::Object(b)) => b == "java/lang/Object",
        (a, b) if a.is_int_like() && b.is_int_like() => true,
        (a, b) => a == b,
    }
}
