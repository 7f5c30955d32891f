//! Class-file model and instruction primitives of the weft weaving engine.
//!
//! This crate owns everything below the mixin semantics: reading and writing
//! class files, the constant pool, the instruction list with stable node
//! identity, descriptors, access flags and annotation records. It performs no
//! verification beyond structural well-formedness; a transformed class is
//! expected to be re-verified by whatever defines it.

#![warn(missing_docs)]

pub mod annotation;
pub mod bytes;
pub mod classfile;
pub mod descriptor;
pub mod error;
pub mod insn;
pub mod opcode;
pub mod pool;
pub mod visibility;

#[cfg(test)]
mod encoding_tests;

pub use error::Error;

/// Commonly used types.
pub mod prelude {
    pub use crate::annotation::{AnnotationNode, AnnotationValue};
    pub use crate::classfile::{
        decode, encode, BootstrapMethod, ClassNode, CodeBody, FieldNode, InnerClassNode,
        LocalVariableEntry, MethodNode, RawAttribute, TryCatchBlock, CLINIT_NAME, CTOR_NAME,
        OBJECT,
    };
    pub use crate::descriptor::{JavaType, MethodDescriptor};
    pub use crate::error::Error;
    pub use crate::insn::{Insn, InsnId, InsnList, LabelId};
    pub use crate::opcode::Opcode;
    pub use crate::pool::{ConstantPool, PoolBuilder, PoolConstant};
    pub use crate::visibility::{ClassAccess, FieldAccess, MethodAccess, Visibility};
}
