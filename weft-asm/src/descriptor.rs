//! Descriptor parsing and generation.
//!
//! Descriptors are kept as plain strings throughout the engine; this module
//! provides the typed view used wherever slot arithmetic or per-argument
//! rewriting is required.

use std::fmt;

use crate::error::{Error, Result};
use crate::opcode::Opcode;

/// A parsed field or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JavaType {
    /// `V`, only valid in return position.
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `L<internal name>;`
    Object(String),
    /// `[<element>`
    Array(Box<JavaType>),
}

impl JavaType {
    /// Parse a single type starting at the beginning of `desc`.
    ///
    /// Returns the type and the number of characters consumed.
    pub fn parse_prefix(desc: &str) -> Result<(JavaType, usize)> {
        let bytes = desc.as_bytes();
        let first = *bytes
            .first()
            .ok_or_else(|| Error::bad_class("empty type descriptor", 0))?;
        let ty = match first {
            b'V' => (JavaType::Void, 1),
            b'Z' => (JavaType::Boolean, 1),
            b'B' => (JavaType::Byte, 1),
            b'C' => (JavaType::Char, 1),
            b'S' => (JavaType::Short, 1),
            b'I' => (JavaType::Int, 1),
            b'J' => (JavaType::Long, 1),
            b'F' => (JavaType::Float, 1),
            b'D' => (JavaType::Double, 1),
            b'L' => {
                let end = desc.find(';').ok_or_else(|| {
                    Error::bad_class(format!("unterminated object type: {desc}"), 0)
                })?;
                (JavaType::Object(desc[1..end].to_string()), end + 1)
            }
            b'[' => {
                let (elem, used) = JavaType::parse_prefix(&desc[1..])?;
                (JavaType::Array(Box::new(elem)), used + 1)
            }
            other => {
                return Err(Error::bad_class(
                    format!("invalid type descriptor character {:?}", other as char),
                    0,
                ))
            }
        };
        Ok(ty)
    }

    /// Parse a complete field descriptor.
    pub fn parse(desc: &str) -> Result<JavaType> {
        let (ty, used) = Self::parse_prefix(desc)?;
        if used != desc.len() {
            return Err(Error::bad_class(
                format!("trailing characters in type descriptor: {desc}"),
                used,
            ));
        }
        Ok(ty)
    }

    /// Number of local/stack slots the type occupies.
    pub const fn size(&self) -> u16 {
        match self {
            JavaType::Void => 0,
            JavaType::Long | JavaType::Double => 2,
            _ => 1,
        }
    }

    /// Flag whether this is a reference type.
    pub const fn is_reference(&self) -> bool {
        matches!(self, JavaType::Object(_) | JavaType::Array(_))
    }

    /// Flag whether this is one of the int-class primitives.
    pub const fn is_int_like(&self) -> bool {
        matches!(
            self,
            JavaType::Boolean
                | JavaType::Byte
                | JavaType::Char
                | JavaType::Short
                | JavaType::Int
        )
    }

    /// Opcode that loads a value of this type from a local slot.
    pub fn load_op(&self) -> Opcode {
        match self {
            JavaType::Long => Opcode::LLOAD,
            JavaType::Float => Opcode::FLOAD,
            JavaType::Double => Opcode::DLOAD,
            JavaType::Object(_) | JavaType::Array(_) => Opcode::ALOAD,
            _ => Opcode::ILOAD,
        }
    }

    /// Opcode that stores a value of this type into a local slot.
    pub fn store_op(&self) -> Opcode {
        match self {
            JavaType::Long => Opcode::LSTORE,
            JavaType::Float => Opcode::FSTORE,
            JavaType::Double => Opcode::DSTORE,
            JavaType::Object(_) | JavaType::Array(_) => Opcode::ASTORE,
            _ => Opcode::ISTORE,
        }
    }

    /// Opcode that returns a value of this type.
    pub fn return_op(&self) -> Opcode {
        match self {
            JavaType::Void => Opcode::RETURN,
            JavaType::Long => Opcode::LRETURN,
            JavaType::Float => Opcode::FRETURN,
            JavaType::Double => Opcode::DRETURN,
            JavaType::Object(_) | JavaType::Array(_) => Opcode::ARETURN,
            _ => Opcode::IRETURN,
        }
    }

    /// Internal name of the boxed counterpart, if the type is primitive.
    pub fn boxed(&self) -> Option<&'static str> {
        Some(match self {
            JavaType::Boolean => "java/lang/Boolean",
            JavaType::Byte => "java/lang/Byte",
            JavaType::Char => "java/lang/Character",
            JavaType::Short => "java/lang/Short",
            JavaType::Int => "java/lang/Integer",
            JavaType::Long => "java/lang/Long",
            JavaType::Float => "java/lang/Float",
            JavaType::Double => "java/lang/Double",
            _ => return None,
        })
    }

    /// Name of the unboxing method on the boxed counterpart.
    pub fn unbox_method(&self) -> Option<&'static str> {
        Some(match self {
            JavaType::Boolean => "booleanValue",
            JavaType::Byte => "byteValue",
            JavaType::Char => "charValue",
            JavaType::Short => "shortValue",
            JavaType::Int => "intValue",
            JavaType::Long => "longValue",
            JavaType::Float => "floatValue",
            JavaType::Double => "doubleValue",
            _ => return None,
        })
    }
}

impl fmt::Display for JavaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JavaType::Void => write!(f, "V"),
            JavaType::Boolean => write!(f, "Z"),
            JavaType::Byte => write!(f, "B"),
            JavaType::Char => write!(f, "C"),
            JavaType::Short => write!(f, "S"),
            JavaType::Int => write!(f, "I"),
            JavaType::Long => write!(f, "J"),
            JavaType::Float => write!(f, "F"),
            JavaType::Double => write!(f, "D"),
            JavaType::Object(name) => write!(f, "L{name};"),
            JavaType::Array(elem) => write!(f, "[{elem}"),
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Argument types in declaration order.
    pub args: Vec<JavaType>,
    /// Return type; `Void` for `V`.
    pub ret: JavaType,
}

impl MethodDescriptor {
    /// Parse `(<args>)<ret>`.
    pub fn parse(desc: &str) -> Result<Self> {
        if !desc.starts_with('(') {
            return Err(Error::bad_class(
                format!("method descriptor must start with '(': {desc}"),
                0,
            ));
        }
        let close = desc
            .find(')')
            .ok_or_else(|| Error::bad_class(format!("unterminated method descriptor: {desc}"), 0))?;
        let mut args = Vec::new();
        let mut rest = &desc[1..close];
        while !rest.is_empty() {
            let (ty, used) = JavaType::parse_prefix(rest)?;
            args.push(ty);
            rest = &rest[used..];
        }
        let ret = JavaType::parse(&desc[close + 1..])?;
        Ok(Self { args, ret })
    }

    /// Build the descriptor string from a sequence of argument types and a
    /// return type.
    pub fn describe<'a>(args: impl IntoIterator<Item = &'a JavaType>, ret: &JavaType) -> String {
        let mut out = String::from("(");
        for arg in args {
            out.push_str(&arg.to_string());
        }
        out.push(')');
        out.push_str(&ret.to_string());
        out
    }

    /// Total number of local slots occupied by the arguments, not counting
    /// the receiver.
    pub fn arg_slots(&self) -> u16 {
        self.args.iter().map(JavaType::size).sum()
    }

    /// First local slot not occupied by the receiver or the arguments.
    pub fn first_free_local(&self, is_static: bool) -> u16 {
        self.arg_slots() + if is_static { 0 } else { 1 }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::describe(self.args.iter(), &self.ret))
    }
}
