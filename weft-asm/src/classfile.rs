//! Class-file tree model.
//!
//! The tree keeps everything symbolic: member references are strings, jump
//! targets are label ids, and only attributes the engine never rewrites are
//! carried as opaque byte blobs. Decoding retains the original constant pool
//! so those blobs stay valid when the class is re-encoded; see
//! [`crate::pool::PoolBuilder::from_pool`].

use crate::annotation::AnnotationNode;
use crate::error::Result;
use crate::insn::{InsnList, LabelId};
use crate::pool::{ConstantPool, PoolConstant};
use crate::visibility::{ClassAccess, FieldAccess, MethodAccess};

mod read;
mod write;

pub use read::decode;
pub use write::encode;

/// Name of the constructor method.
pub const CTOR_NAME: &str = "<init>";
/// Name of the static initializer method.
pub const CLINIT_NAME: &str = "<clinit>";
/// Default superclass of synthesized classes.
pub const OBJECT: &str = "java/lang/Object";

/// An attribute the codec does not interpret, re-emitted verbatim.
///
/// The payload may embed constant-pool indices, which is why decoded classes
/// keep their original pool as a prefix of the encoded one.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAttribute {
    /// Attribute name.
    pub name: String,
    /// Raw payload.
    pub data: Vec<u8>,
}

/// One entry of the `InnerClasses` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerClassNode {
    /// Internal name of the inner class.
    pub name: String,
    /// Internal name of the enclosing class, when compiled in.
    pub outer: Option<String>,
    /// Simple name, absent for anonymous classes.
    pub inner_name: Option<String>,
    /// Raw inner-class access flags.
    pub access: u16,
}

/// One entry of the `BootstrapMethods` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapMethod {
    /// The bootstrap method handle.
    pub handle: PoolConstant,
    /// Static bootstrap arguments.
    pub args: Vec<PoolConstant>,
}

/// One exception-handler range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlock {
    /// First covered instruction.
    pub start: LabelId,
    /// End of the covered range, exclusive.
    pub end: LabelId,
    /// Handler entry point.
    pub handler: LabelId,
    /// Caught type; `None` catches everything (`finally` ranges).
    pub catch_type: Option<String>,
}

/// One `LocalVariableTable` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariableEntry {
    /// Source-level name.
    pub name: String,
    /// Field descriptor of the variable.
    pub desc: String,
    /// Start of the live range.
    pub start: LabelId,
    /// End of the live range, exclusive.
    pub end: LabelId,
    /// Local slot.
    pub slot: u16,
}

/// Body of a non-abstract method.
#[derive(Debug, Clone, Default)]
pub struct CodeBody {
    /// Operand-stack budget.
    pub max_stack: u16,
    /// Local-slot budget.
    pub max_locals: u16,
    /// The instruction list.
    pub insns: InsnList,
    /// Exception-handler ranges.
    pub try_catch: Vec<TryCatchBlock>,
    /// Local-variable debug table.
    pub locals: Vec<LocalVariableEntry>,
    /// Unparsed code attributes (`StackMapTable` and friends); dropped on
    /// encode once `modified` is set, since their payload embeds offsets
    /// into the original bytecode.
    pub attrs: Vec<RawAttribute>,
    /// Set by anything that rewrites `insns` after decoding.
    pub modified: bool,
}

/// One method.
#[derive(Debug, Clone)]
pub struct MethodNode {
    /// Access flags.
    pub access: MethodAccess,
    /// Method name.
    pub name: String,
    /// Method descriptor.
    pub desc: String,
    /// Generic signature.
    pub signature: Option<String>,
    /// Declared thrown exceptions, internal names.
    pub exceptions: Vec<String>,
    /// Runtime-visible annotations.
    pub visible_annotations: Vec<AnnotationNode>,
    /// Runtime-invisible annotations.
    pub invisible_annotations: Vec<AnnotationNode>,
    /// Body; absent for abstract and native methods.
    pub code: Option<CodeBody>,
    /// Unparsed method attributes.
    pub attrs: Vec<RawAttribute>,
}

impl MethodNode {
    /// Bodyless method with the given signature.
    pub fn new(access: MethodAccess, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            exceptions: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            code: None,
            attrs: Vec::new(),
        }
    }

    /// Flag whether the method is static.
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    /// Flag whether the method is abstract.
    pub fn is_abstract(&self) -> bool {
        self.access.contains(MethodAccess::ABSTRACT)
    }

    /// Flag whether this is an instance constructor.
    pub fn is_ctor(&self) -> bool {
        self.name == CTOR_NAME
    }

    /// Flag whether this is the static initializer.
    pub fn is_static_init(&self) -> bool {
        self.name == CLINIT_NAME
    }

    /// `name(desc)` for diagnostics.
    pub fn display_name(&self) -> String {
        format!("{}{}", self.name, self.desc)
    }
}

/// One field.
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Access flags.
    pub access: FieldAccess,
    /// Field name.
    pub name: String,
    /// Field descriptor.
    pub desc: String,
    /// Generic signature.
    pub signature: Option<String>,
    /// `ConstantValue` payload for static finals.
    pub constant: Option<PoolConstant>,
    /// Runtime-visible annotations.
    pub visible_annotations: Vec<AnnotationNode>,
    /// Runtime-invisible annotations.
    pub invisible_annotations: Vec<AnnotationNode>,
    /// Unparsed field attributes.
    pub attrs: Vec<RawAttribute>,
}

impl FieldNode {
    /// Field with the given signature and no attributes.
    pub fn new(access: FieldAccess, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            signature: None,
            constant: None,
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            attrs: Vec::new(),
        }
    }

    /// Flag whether the field is static.
    pub fn is_static(&self) -> bool {
        self.access.contains(FieldAccess::STATIC)
    }
}

/// A decoded class.
#[derive(Debug, Clone)]
pub struct ClassNode {
    /// Minor format version.
    pub minor: u16,
    /// Major format version.
    pub major: u16,
    /// Access flags.
    pub access: ClassAccess,
    /// Internal name.
    pub name: String,
    /// Internal name of the superclass; `None` only for the root class.
    pub superclass: Option<String>,
    /// Directly implemented interfaces.
    pub interfaces: Vec<String>,
    /// Generic signature.
    pub signature: Option<String>,
    /// Source file name.
    pub source_file: Option<String>,
    /// Declared fields in order.
    pub fields: Vec<FieldNode>,
    /// Declared methods in order.
    pub methods: Vec<MethodNode>,
    /// Runtime-visible annotations.
    pub visible_annotations: Vec<AnnotationNode>,
    /// Runtime-invisible annotations.
    pub invisible_annotations: Vec<AnnotationNode>,
    /// `InnerClasses` entries.
    pub inner_classes: Vec<InnerClassNode>,
    /// `BootstrapMethods` entries, referenced by `InvokeDynamic`
    /// instructions and `Dynamic` constants.
    pub bootstrap_methods: Vec<BootstrapMethod>,
    /// Unparsed class attributes.
    pub attrs: Vec<RawAttribute>,
    /// Original pool, kept so raw attribute payloads survive re-encoding.
    pub(crate) orig_pool: Option<ConstantPool>,
}

impl ClassNode {
    /// Format version written for synthesized classes (Java 8).
    pub const DEFAULT_MAJOR: u16 = 52;

    /// Fresh public class extending the root class.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            minor: 0,
            major: Self::DEFAULT_MAJOR,
            access: ClassAccess::PUBLIC | ClassAccess::SUPER,
            name: name.into(),
            superclass: Some(OBJECT.to_string()),
            interfaces: Vec::new(),
            signature: None,
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
            inner_classes: Vec::new(),
            bootstrap_methods: Vec::new(),
            attrs: Vec::new(),
            orig_pool: None,
        }
    }

    /// Decode from bytes; see [`decode`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }

    /// Encode to bytes; see [`encode`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Method by exact name and descriptor.
    pub fn find_method(&self, name: &str, desc: &str) -> Option<&MethodNode> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.desc == desc)
    }

    /// Mutable method by exact name and descriptor.
    pub fn find_method_mut(&mut self, name: &str, desc: &str) -> Option<&mut MethodNode> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.desc == desc)
    }

    /// Field by name.
    pub fn find_field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Add an interface unless already present.
    pub fn add_interface(&mut self, name: &str) {
        if !self.interfaces.iter().any(|i| i == name) {
            self.interfaces.push(name.to_string());
        }
    }

    /// All constructors.
    pub fn ctors(&self) -> impl Iterator<Item = &MethodNode> {
        self.methods.iter().filter(|m| m.is_ctor())
    }
}
