//! Opcode table for the class-file instruction set.
//!
//! The table is normalized the way every structural bytecode library
//! normalizes it: the `*load_<n>`/`*store_<n>` shorthand forms, the `wide`
//! prefix, `ldc_w`/`ldc2_w` and `goto_w`/`jsr_w` exist only in the raw
//! encoding and are folded into their canonical opcode during decoding. The
//! encoder re-selects the compact forms on the way out.

use num_enum::TryFromPrimitive;

/// Canonical opcode of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[repr(u8)]
#[non_exhaustive]
pub enum Opcode {
    /// Do nothing.
    NOP = 0x00,
    /// Push `null`.
    ACONST_NULL = 0x01,
    /// Push int constant -1.
    ICONST_M1 = 0x02,
    /// Push int constant 0.
    ICONST_0 = 0x03,
    /// Push int constant 1.
    ICONST_1 = 0x04,
    /// Push int constant 2.
    ICONST_2 = 0x05,
    /// Push int constant 3.
    ICONST_3 = 0x06,
    /// Push int constant 4.
    ICONST_4 = 0x07,
    /// Push int constant 5.
    ICONST_5 = 0x08,
    /// Push long constant 0.
    LCONST_0 = 0x09,
    /// Push long constant 1.
    LCONST_1 = 0x0a,
    /// Push float constant 0.
    FCONST_0 = 0x0b,
    /// Push float constant 1.
    FCONST_1 = 0x0c,
    /// Push float constant 2.
    FCONST_2 = 0x0d,
    /// Push double constant 0.
    DCONST_0 = 0x0e,
    /// Push double constant 1.
    DCONST_1 = 0x0f,
    /// Push a sign-extended byte.
    BIPUSH = 0x10,
    /// Push a sign-extended short.
    SIPUSH = 0x11,
    /// Push a constant-pool entry (covers the wide raw forms).
    LDC = 0x12,
    /// Load int from a local slot.
    ILOAD = 0x15,
    /// Load long from a local slot.
    LLOAD = 0x16,
    /// Load float from a local slot.
    FLOAD = 0x17,
    /// Load double from a local slot.
    DLOAD = 0x18,
    /// Load reference from a local slot.
    ALOAD = 0x19,
    /// Load int from an array.
    IALOAD = 0x2e,
    /// Load long from an array.
    LALOAD = 0x2f,
    /// Load float from an array.
    FALOAD = 0x30,
    /// Load double from an array.
    DALOAD = 0x31,
    /// Load reference from an array.
    AALOAD = 0x32,
    /// Load byte or boolean from an array.
    BALOAD = 0x33,
    /// Load char from an array.
    CALOAD = 0x34,
    /// Load short from an array.
    SALOAD = 0x35,
    /// Store int into a local slot.
    ISTORE = 0x36,
    /// Store long into a local slot.
    LSTORE = 0x37,
    /// Store float into a local slot.
    FSTORE = 0x38,
    /// Store double into a local slot.
    DSTORE = 0x39,
    /// Store reference into a local slot.
    ASTORE = 0x3a,
    /// Store int into an array.
    IASTORE = 0x4f,
    /// Store long into an array.
    LASTORE = 0x50,
    /// Store float into an array.
    FASTORE = 0x51,
    /// Store double into an array.
    DASTORE = 0x52,
    /// Store reference into an array.
    AASTORE = 0x53,
    /// Store byte or boolean into an array.
    BASTORE = 0x54,
    /// Store char into an array.
    CASTORE = 0x55,
    /// Store short into an array.
    SASTORE = 0x56,
    /// Pop the top category-1 value.
    POP = 0x57,
    /// Pop two category-1 values or one category-2 value.
    POP2 = 0x58,
    /// Duplicate the top category-1 value.
    DUP = 0x59,
    /// Duplicate the top value below the next one.
    DUP_X1 = 0x5a,
    /// Duplicate the top value two slots down.
    DUP_X2 = 0x5b,
    /// Duplicate the top one or two values.
    DUP2 = 0x5c,
    /// Duplicate the top one or two values below the next one.
    DUP2_X1 = 0x5d,
    /// Duplicate the top one or two values two slots down.
    DUP2_X2 = 0x5e,
    /// Swap the top two category-1 values.
    SWAP = 0x5f,
    /// Add ints.
    IADD = 0x60,
    /// Add longs.
    LADD = 0x61,
    /// Add floats.
    FADD = 0x62,
    /// Add doubles.
    DADD = 0x63,
    /// Subtract ints.
    ISUB = 0x64,
    /// Subtract longs.
    LSUB = 0x65,
    /// Subtract floats.
    FSUB = 0x66,
    /// Subtract doubles.
    DSUB = 0x67,
    /// Multiply ints.
    IMUL = 0x68,
    /// Multiply longs.
    LMUL = 0x69,
    /// Multiply floats.
    FMUL = 0x6a,
    /// Multiply doubles.
    DMUL = 0x6b,
    /// Divide ints.
    IDIV = 0x6c,
    /// Divide longs.
    LDIV = 0x6d,
    /// Divide floats.
    FDIV = 0x6e,
    /// Divide doubles.
    DDIV = 0x6f,
    /// Remainder of ints.
    IREM = 0x70,
    /// Remainder of longs.
    LREM = 0x71,
    /// Remainder of floats.
    FREM = 0x72,
    /// Remainder of doubles.
    DREM = 0x73,
    /// Negate int.
    INEG = 0x74,
    /// Negate long.
    LNEG = 0x75,
    /// Negate float.
    FNEG = 0x76,
    /// Negate double.
    DNEG = 0x77,
    /// Shift int left.
    ISHL = 0x78,
    /// Shift long left.
    LSHL = 0x79,
    /// Arithmetic shift int right.
    ISHR = 0x7a,
    /// Arithmetic shift long right.
    LSHR = 0x7b,
    /// Logical shift int right.
    IUSHR = 0x7c,
    /// Logical shift long right.
    LUSHR = 0x7d,
    /// Bitwise and of ints.
    IAND = 0x7e,
    /// Bitwise and of longs.
    LAND = 0x7f,
    /// Bitwise or of ints.
    IOR = 0x80,
    /// Bitwise or of longs.
    LOR = 0x81,
    /// Bitwise xor of ints.
    IXOR = 0x82,
    /// Bitwise xor of longs.
    LXOR = 0x83,
    /// Increment a local int slot by a constant.
    IINC = 0x84,
    /// Convert int to long.
    I2L = 0x85,
    /// Convert int to float.
    I2F = 0x86,
    /// Convert int to double.
    I2D = 0x87,
    /// Convert long to int.
    L2I = 0x88,
    /// Convert long to float.
    L2F = 0x89,
    /// Convert long to double.
    L2D = 0x8a,
    /// Convert float to int.
    F2I = 0x8b,
    /// Convert float to long.
    F2L = 0x8c,
    /// Convert float to double.
    F2D = 0x8d,
    /// Convert double to int.
    D2I = 0x8e,
    /// Convert double to long.
    D2L = 0x8f,
    /// Convert double to float.
    D2F = 0x90,
    /// Truncate int to byte.
    I2B = 0x91,
    /// Truncate int to char.
    I2C = 0x92,
    /// Truncate int to short.
    I2S = 0x93,
    /// Compare longs.
    LCMP = 0x94,
    /// Compare floats, -1 on NaN.
    FCMPL = 0x95,
    /// Compare floats, 1 on NaN.
    FCMPG = 0x96,
    /// Compare doubles, -1 on NaN.
    DCMPL = 0x97,
    /// Compare doubles, 1 on NaN.
    DCMPG = 0x98,
    /// Branch if int is zero.
    IFEQ = 0x99,
    /// Branch if int is nonzero.
    IFNE = 0x9a,
    /// Branch if int is negative.
    IFLT = 0x9b,
    /// Branch if int is non-negative.
    IFGE = 0x9c,
    /// Branch if int is positive.
    IFGT = 0x9d,
    /// Branch if int is non-positive.
    IFLE = 0x9e,
    /// Branch if ints are equal.
    IF_ICMPEQ = 0x9f,
    /// Branch if ints differ.
    IF_ICMPNE = 0xa0,
    /// Branch if first int is less.
    IF_ICMPLT = 0xa1,
    /// Branch if first int is not less.
    IF_ICMPGE = 0xa2,
    /// Branch if first int is greater.
    IF_ICMPGT = 0xa3,
    /// Branch if first int is not greater.
    IF_ICMPLE = 0xa4,
    /// Branch if references are equal.
    IF_ACMPEQ = 0xa5,
    /// Branch if references differ.
    IF_ACMPNE = 0xa6,
    /// Unconditional branch (covers the wide raw form).
    GOTO = 0xa7,
    /// Jump to subroutine (legacy).
    JSR = 0xa8,
    /// Return from subroutine (legacy).
    RET = 0xa9,
    /// Indexed jump table.
    TABLESWITCH = 0xaa,
    /// Sparse jump table.
    LOOKUPSWITCH = 0xab,
    /// Return int.
    IRETURN = 0xac,
    /// Return long.
    LRETURN = 0xad,
    /// Return float.
    FRETURN = 0xae,
    /// Return double.
    DRETURN = 0xaf,
    /// Return reference.
    ARETURN = 0xb0,
    /// Return void.
    RETURN = 0xb1,
    /// Read a static field.
    GETSTATIC = 0xb2,
    /// Write a static field.
    PUTSTATIC = 0xb3,
    /// Read an instance field.
    GETFIELD = 0xb4,
    /// Write an instance field.
    PUTFIELD = 0xb5,
    /// Invoke an instance method, dispatched on class.
    INVOKEVIRTUAL = 0xb6,
    /// Invoke a constructor, private or super method.
    INVOKESPECIAL = 0xb7,
    /// Invoke a static method.
    INVOKESTATIC = 0xb8,
    /// Invoke an interface method.
    INVOKEINTERFACE = 0xb9,
    /// Invoke a dynamically-computed call site.
    INVOKEDYNAMIC = 0xba,
    /// Allocate an instance.
    NEW = 0xbb,
    /// Allocate a primitive array.
    NEWARRAY = 0xbc,
    /// Allocate a reference array.
    ANEWARRAY = 0xbd,
    /// Push array length.
    ARRAYLENGTH = 0xbe,
    /// Throw the top reference.
    ATHROW = 0xbf,
    /// Checked reference cast.
    CHECKCAST = 0xc0,
    /// Type test.
    INSTANCEOF = 0xc1,
    /// Enter a monitor.
    MONITORENTER = 0xc2,
    /// Exit a monitor.
    MONITOREXIT = 0xc3,
    /// Allocate a multi-dimensional array.
    MULTIANEWARRAY = 0xc5,
    /// Branch if reference is null.
    IFNULL = 0xc6,
    /// Branch if reference is non-null.
    IFNONNULL = 0xc7,
}

impl Opcode {
    /// Flag whether the opcode returns from the enclosing method.
    pub const fn is_return(self) -> bool {
        matches!(
            self,
            Self::IRETURN
                | Self::LRETURN
                | Self::FRETURN
                | Self::DRETURN
                | Self::ARETURN
                | Self::RETURN
        )
    }

    /// Flag whether the opcode is a method invocation.
    ///
    /// `INVOKEDYNAMIC` is excluded: its call site is symbolic and carries no
    /// owner, so it never participates in member matching.
    pub const fn is_invoke(self) -> bool {
        matches!(
            self,
            Self::INVOKEVIRTUAL
                | Self::INVOKESPECIAL
                | Self::INVOKESTATIC
                | Self::INVOKEINTERFACE
        )
    }

    /// Flag whether the opcode is a field read or write.
    pub const fn is_field_access(self) -> bool {
        matches!(
            self,
            Self::GETSTATIC | Self::PUTSTATIC | Self::GETFIELD | Self::PUTFIELD
        )
    }

    /// Flag whether the opcode reads a field.
    pub const fn is_field_get(self) -> bool {
        matches!(self, Self::GETSTATIC | Self::GETFIELD)
    }

    /// Flag whether the opcode writes a field.
    pub const fn is_field_put(self) -> bool {
        matches!(self, Self::PUTSTATIC | Self::PUTFIELD)
    }

    /// Flag whether the opcode loads a local slot.
    pub const fn is_local_load(self) -> bool {
        matches!(
            self,
            Self::ILOAD | Self::LLOAD | Self::FLOAD | Self::DLOAD | Self::ALOAD
        )
    }

    /// Flag whether the opcode stores into a local slot.
    pub const fn is_local_store(self) -> bool {
        matches!(
            self,
            Self::ISTORE | Self::LSTORE | Self::FSTORE | Self::DSTORE | Self::ASTORE
        )
    }

    /// Flag whether the opcode is a conditional or unconditional branch.
    ///
    /// The switch opcodes are not included; they carry their own shape.
    pub const fn is_jump(self) -> bool {
        (self as u8) >= Self::IFEQ as u8 && (self as u8) <= Self::JSR as u8
            || matches!(self, Self::IFNULL | Self::IFNONNULL)
    }

    /// Flag whether the opcode is a two-way conditional branch.
    pub const fn is_conditional_jump(self) -> bool {
        self.is_jump() && !matches!(self, Self::GOTO | Self::JSR)
    }

    /// Flag whether the opcode pushes an inline constant, excluding `LDC`.
    pub const fn is_inline_const(self) -> bool {
        (self as u8) >= Self::ACONST_NULL as u8 && (self as u8) <= Self::SIPUSH as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_byte_round_trips() {
        for raw in 0u8..=0xc7 {
            if let Ok(op) = Opcode::try_from(raw) {
                assert_eq!(op as u8, raw);
            }
        }
    }

    #[test]
    fn shorthand_bytes_are_not_canonical() {
        // load/store shorthands, wide, and the wide constant forms are
        // handled by the codec, not the table
        for raw in [0x13u8, 0x14, 0x1a, 0x2d, 0x3b, 0x4e, 0xc4, 0xc8, 0xc9] {
            assert!(Opcode::try_from(raw).is_err(), "{raw:#04x}");
        }
    }

    #[test]
    fn classification() {
        assert!(Opcode::RETURN.is_return());
        assert!(Opcode::INVOKEINTERFACE.is_invoke());
        assert!(!Opcode::INVOKEDYNAMIC.is_invoke());
        assert!(Opcode::PUTFIELD.is_field_put());
        assert!(Opcode::IFNULL.is_conditional_jump());
        assert!(!Opcode::GOTO.is_conditional_jump());
        assert!(Opcode::GOTO.is_jump());
        assert!(Opcode::SIPUSH.is_inline_const());
        assert!(!Opcode::LDC.is_inline_const());
    }
}
