//! Class-file codec error implementation

use thiserror::Error;

use crate::opcode::Opcode;

/// Errors raised while decoding, mutating or encoding a class file.
#[derive(Debug, Error)]
pub enum Error {
    /// The input bytes are not a well-formed class file.
    #[error("malformed class file at offset {offset}: {reason}")]
    BadClass {
        /// Human-readable description of the defect.
        reason: String,
        /// Byte offset at which the defect was detected.
        offset: usize,
    },
    /// An opcode was used with an instruction shape it does not belong to.
    #[error("opcode {op} is not valid for {context}")]
    InvalidOpcode {
        /// The offending opcode.
        op: Opcode,
        /// The instruction shape or operation that rejected it.
        context: &'static str,
    },
    /// An unknown opcode byte was encountered in a code attribute.
    #[error("unknown opcode byte {op:#04x} at code offset {offset}")]
    UnknownOpcode {
        /// The raw byte.
        op: u8,
        /// Offset within the code array.
        offset: usize,
    },
    /// The class tree cannot be serialized back to bytes.
    #[error("cannot encode method {method}: {reason}")]
    Unencodable {
        /// `owner.name(desc)` of the offending method.
        method: String,
        /// Why the encoding failed, e.g. a jump offset overflow.
        reason: String,
    },
}

impl Error {
    pub(crate) fn bad_class(reason: impl Into<String>, offset: usize) -> Self {
        Self::BadClass {
            reason: reason.into(),
            offset,
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;
