//! Instruction model.
//!
//! Instructions are tagged variants held in an [`InsnList`], an arena-backed
//! doubly linked list whose node ids are stable for the lifetime of the list.
//! Injection points communicate locations as [`InsnId`]s, so nothing in the
//! engine ever holds a direct reference into a method body.

use crate::error::{Error, Result};
use crate::opcode::Opcode;
use crate::pool::PoolConstant;

mod list;

pub use list::{InsnList, Iter};

/// Stable identity of one instruction node within its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InsnId(pub(crate) u32);

/// Identity of a label within its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelId(pub(crate) u32);

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Operand-less instruction.
    Simple(Opcode),
    /// Local-slot access: loads, stores and `RET`.
    Var(Opcode, u16),
    /// `iinc slot, delta`.
    Iinc {
        /// Local slot.
        slot: u16,
        /// Signed increment.
        delta: i16,
    },
    /// Inline integer operand: `bipush`, `sipush` and `newarray`.
    Int(Opcode, i32),
    /// Constant-pool load.
    Ldc(PoolConstant),
    /// Field access.
    Field {
        /// One of the four field opcodes.
        op: Opcode,
        /// Owner internal name.
        owner: String,
        /// Field name.
        name: String,
        /// Field descriptor.
        desc: String,
    },
    /// Method invocation.
    Method {
        /// One of the four invoke opcodes.
        op: Opcode,
        /// Owner internal name.
        owner: String,
        /// Method name.
        name: String,
        /// Method descriptor.
        desc: String,
        /// Flag whether the owner is an interface.
        itf: bool,
    },
    /// Dynamically-computed call site, carried opaquely.
    InvokeDynamic {
        /// Call-site name.
        name: String,
        /// Call-site descriptor.
        desc: String,
        /// Index into the class's bootstrap-method table.
        bootstrap: u16,
    },
    /// Type operand: `new`, `anewarray`, `checkcast`, `instanceof`.
    Type {
        /// The opcode.
        op: Opcode,
        /// Internal name, or array descriptor for array types.
        ty: String,
    },
    /// `multianewarray desc, dims`.
    MultiANewArray {
        /// Array type descriptor.
        desc: String,
        /// Number of dimensions to allocate.
        dims: u8,
    },
    /// Conditional or unconditional branch.
    Jump(Opcode, LabelId),
    /// `tableswitch`.
    TableSwitch {
        /// Fallthrough target.
        default: LabelId,
        /// Lowest key.
        low: i32,
        /// Highest key.
        high: i32,
        /// One target per key in `low..=high`.
        targets: Vec<LabelId>,
    },
    /// `lookupswitch`.
    LookupSwitch {
        /// Fallthrough target.
        default: LabelId,
        /// Sorted `(key, target)` pairs.
        pairs: Vec<(i32, LabelId)>,
    },
    /// Position marker; jump targets and handler ranges resolve to these.
    Label(LabelId),
    /// Line-number marker for the instructions that follow it.
    Line(u16),
}

impl Insn {
    /// Local-slot access instruction; the opcode must be a load, store or
    /// `RET`.
    pub fn var(op: Opcode, slot: u16) -> Result<Self> {
        if op.is_local_load() || op.is_local_store() || op == Opcode::RET {
            Ok(Insn::Var(op, slot))
        } else {
            Err(Error::InvalidOpcode {
                op,
                context: "a local-variable instruction",
            })
        }
    }

    /// Field-access instruction.
    pub fn field(
        op: Opcode,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Result<Self> {
        if !op.is_field_access() {
            return Err(Error::InvalidOpcode {
                op,
                context: "a field-access instruction",
            });
        }
        Ok(Insn::Field {
            op,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        })
    }

    /// Method-invoke instruction.
    pub fn method(
        op: Opcode,
        owner: impl Into<String>,
        name: impl Into<String>,
        desc: impl Into<String>,
        itf: bool,
    ) -> Result<Self> {
        if !op.is_invoke() {
            return Err(Error::InvalidOpcode {
                op,
                context: "a method-invoke instruction",
            });
        }
        Ok(Insn::Method {
            op,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
            itf,
        })
    }

    /// Type-operand instruction.
    pub fn type_insn(op: Opcode, ty: impl Into<String>) -> Result<Self> {
        if !matches!(
            op,
            Opcode::NEW | Opcode::ANEWARRAY | Opcode::CHECKCAST | Opcode::INSTANCEOF
        ) {
            return Err(Error::InvalidOpcode {
                op,
                context: "a type instruction",
            });
        }
        Ok(Insn::Type { op, ty: ty.into() })
    }

    /// Branch instruction.
    pub fn jump(op: Opcode, target: LabelId) -> Result<Self> {
        if !op.is_jump() {
            return Err(Error::InvalidOpcode {
                op,
                context: "a jump instruction",
            });
        }
        Ok(Insn::Jump(op, target))
    }

    /// The opcode of this instruction, if it has one.
    ///
    /// `Label` and `Line` are markers without an opcode; `Ldc` reports `LDC`
    /// regardless of which raw form it was read from.
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Insn::Simple(op) | Insn::Var(op, _) | Insn::Int(op, _) | Insn::Jump(op, _) => *op,
            Insn::Iinc { .. } => Opcode::IINC,
            Insn::Ldc(_) => Opcode::LDC,
            Insn::Field { op, .. } | Insn::Method { op, .. } | Insn::Type { op, .. } => *op,
            Insn::InvokeDynamic { .. } => Opcode::INVOKEDYNAMIC,
            Insn::MultiANewArray { .. } => Opcode::MULTIANEWARRAY,
            Insn::TableSwitch { .. } => Opcode::TABLESWITCH,
            Insn::LookupSwitch { .. } => Opcode::LOOKUPSWITCH,
            Insn::Label(_) | Insn::Line(_) => return None,
        })
    }

    /// Flag whether this is a `Label` or `Line` marker rather than a real
    /// instruction.
    pub const fn is_marker(&self) -> bool {
        matches!(self, Insn::Label(_) | Insn::Line(_))
    }

    /// The constant pushed by this instruction, if it is a constant load.
    ///
    /// `ACONST_NULL` loads a constant but has no representable value; it
    /// reports `None` here and must be special-cased by callers that care.
    pub fn constant_value(&self) -> Option<PoolConstant> {
        match self {
            Insn::Simple(Opcode::ICONST_M1) => Some(PoolConstant::Int(-1)),
            Insn::Simple(Opcode::ICONST_0) => Some(PoolConstant::Int(0)),
            Insn::Simple(Opcode::ICONST_1) => Some(PoolConstant::Int(1)),
            Insn::Simple(Opcode::ICONST_2) => Some(PoolConstant::Int(2)),
            Insn::Simple(Opcode::ICONST_3) => Some(PoolConstant::Int(3)),
            Insn::Simple(Opcode::ICONST_4) => Some(PoolConstant::Int(4)),
            Insn::Simple(Opcode::ICONST_5) => Some(PoolConstant::Int(5)),
            Insn::Simple(Opcode::LCONST_0) => Some(PoolConstant::Long(0)),
            Insn::Simple(Opcode::LCONST_1) => Some(PoolConstant::Long(1)),
            Insn::Simple(Opcode::FCONST_0) => Some(PoolConstant::Float(0.0)),
            Insn::Simple(Opcode::FCONST_1) => Some(PoolConstant::Float(1.0)),
            Insn::Simple(Opcode::FCONST_2) => Some(PoolConstant::Float(2.0)),
            Insn::Simple(Opcode::DCONST_0) => Some(PoolConstant::Double(0.0)),
            Insn::Simple(Opcode::DCONST_1) => Some(PoolConstant::Double(1.0)),
            Insn::Int(Opcode::BIPUSH, v) | Insn::Int(Opcode::SIPUSH, v) => {
                Some(PoolConstant::Int(*v))
            }
            Insn::Ldc(c) => Some(c.clone()),
            _ => None,
        }
    }

    /// Flag whether this instruction pushes a constant, `ACONST_NULL`
    /// included.
    pub fn is_constant_load(&self) -> bool {
        matches!(self, Insn::Simple(Opcode::ACONST_NULL)) || self.constant_value().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_constructors_reject_wrong_opcodes() {
        assert!(Insn::method(Opcode::GETFIELD, "a/B", "c", "()V", false).is_err());
        assert!(Insn::field(Opcode::INVOKEVIRTUAL, "a/B", "c", "I").is_err());
        assert!(Insn::var(Opcode::IADD, 0).is_err());
        assert!(Insn::type_insn(Opcode::GOTO, "a/B").is_err());

        assert!(Insn::method(Opcode::INVOKESTATIC, "a/B", "c", "()V", false).is_ok());
        assert!(Insn::var(Opcode::ALOAD, 0).is_ok());
    }

    #[test]
    fn constant_detection() {
        assert_eq!(
            Insn::Simple(Opcode::ICONST_3).constant_value(),
            Some(PoolConstant::Int(3))
        );
        assert_eq!(
            Insn::Int(Opcode::BIPUSH, 10).constant_value(),
            Some(PoolConstant::Int(10))
        );
        assert!(Insn::Simple(Opcode::ACONST_NULL).is_constant_load());
        assert_eq!(Insn::Simple(Opcode::ACONST_NULL).constant_value(), None);
        assert!(!Insn::Simple(Opcode::IADD).is_constant_load());
    }

    #[test]
    fn opcode_projection() {
        assert_eq!(
            Insn::Ldc(PoolConstant::Int(7)).opcode(),
            Some(Opcode::LDC)
        );
        assert_eq!(Insn::Label(LabelId(0)).opcode(), None);
        assert_eq!(Insn::Line(14).opcode(), None);
    }
}
