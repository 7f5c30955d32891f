//! Access flags and the visibility lattice used by the merge rules.

use bitflags::bitflags;

bitflags! {
    /// Class-level access flags.
    pub struct ClassAccess: u16 {
        /// Declared public.
        const PUBLIC = 0x0001;
        /// Declared final.
        const FINAL = 0x0010;
        /// Treat superclass methods specially on `invokespecial`.
        const SUPER = 0x0020;
        /// Is an interface.
        const INTERFACE = 0x0200;
        /// Declared abstract.
        const ABSTRACT = 0x0400;
        /// Not present in source.
        const SYNTHETIC = 0x1000;
        /// Declared as an annotation type.
        const ANNOTATION = 0x2000;
        /// Declared as an enum type.
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Field-level access flags.
    pub struct FieldAccess: u16 {
        /// Declared public.
        const PUBLIC = 0x0001;
        /// Declared private.
        const PRIVATE = 0x0002;
        /// Declared protected.
        const PROTECTED = 0x0004;
        /// Declared static.
        const STATIC = 0x0008;
        /// Declared final.
        const FINAL = 0x0010;
        /// Declared volatile.
        const VOLATILE = 0x0040;
        /// Declared transient.
        const TRANSIENT = 0x0080;
        /// Not present in source.
        const SYNTHETIC = 0x1000;
        /// Member of an enum.
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Method-level access flags.
    pub struct MethodAccess: u16 {
        /// Declared public.
        const PUBLIC = 0x0001;
        /// Declared private.
        const PRIVATE = 0x0002;
        /// Declared protected.
        const PROTECTED = 0x0004;
        /// Declared static.
        const STATIC = 0x0008;
        /// Declared final.
        const FINAL = 0x0010;
        /// Declared synchronized.
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge.
        const BRIDGE = 0x0040;
        /// Variable arity.
        const VARARGS = 0x0080;
        /// Implemented natively.
        const NATIVE = 0x0100;
        /// Declared abstract.
        const ABSTRACT = 0x0400;
        /// Strict floating-point.
        const STRICT = 0x0800;
        /// Not present in source.
        const SYNTHETIC = 0x1000;
    }
}

/// Member visibility, ordered for merge widening.
///
/// The ordering follows the access semantics of the class format rather than
/// source-language intuition: `protected` members are not visible to
/// same-package non-subclasses, so package-private sits above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Visibility {
    /// `private`
    Private,
    /// `protected`
    Protected,
    /// package-private (no flag)
    Package,
    /// `public`
    Public,
}

impl Visibility {
    /// Raw mask covering all three visibility bits.
    pub const MASK: u16 = 0x0007;

    /// Extract the visibility from raw access flags.
    pub const fn from_flags(access: u16) -> Self {
        if access & 0x0001 != 0 {
            Visibility::Public
        } else if access & 0x0002 != 0 {
            Visibility::Private
        } else if access & 0x0004 != 0 {
            Visibility::Protected
        } else {
            Visibility::Package
        }
    }

    /// Raw flag bits for this visibility.
    pub const fn bits(self) -> u16 {
        match self {
            Visibility::Public => 0x0001,
            Visibility::Private => 0x0002,
            Visibility::Protected => 0x0004,
            Visibility::Package => 0x0000,
        }
    }

    /// Replace the visibility bits of `access` with this visibility.
    pub const fn apply(self, access: u16) -> u16 {
        (access & !Self::MASK) | self.bits()
    }

    /// Widen `access` so it is at least as visible as `self`.
    pub fn widen(self, access: u16) -> u16 {
        let current = Self::from_flags(access);
        if current < self {
            self.apply(access)
        } else {
            access
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_order() {
        assert!(Visibility::Private < Visibility::Protected);
        assert!(Visibility::Protected < Visibility::Package);
        assert!(Visibility::Package < Visibility::Public);
    }

    #[test]
    fn widen_never_narrows() {
        let public = FieldAccess::PUBLIC.bits();
        assert_eq!(Visibility::Package.widen(public), public);

        let private = FieldAccess::PRIVATE.bits() | FieldAccess::FINAL.bits();
        let widened = Visibility::Package.widen(private);
        assert_eq!(Visibility::from_flags(widened), Visibility::Package);
        assert_ne!(widened & FieldAccess::FINAL.bits(), 0);
    }
}
