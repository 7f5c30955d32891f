//! Load-time bytecode weaving engine for the JVM class-file format.
//!
//! The engine composes annotated companion classes ("mixins") into target
//! classes as the host defines them: merging fields, methods and
//! interfaces, and splicing handler invocations into existing method bodies
//! at instruction-level injection points. The host feeds raw class bytes
//! through [`transform::Transformer::transform`] and defines whatever comes
//! back.

#![warn(missing_docs)]

pub mod annotations;
pub mod apply;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod info;
pub mod inject;
pub mod mixin;
pub mod point;
pub mod profiler;
pub mod refmap;
pub mod transform;

#[cfg(any(test, feature = "test-helpers"))]
pub mod util;

pub use error::TransformError;

/// Commonly used types.
pub mod prelude {
    pub use weft_asm::prelude::*;

    pub use crate::annotations::{
        descriptors, AtRecord, ConstantMatcher, InjectorKind, MemberInfo,
    };
    pub use crate::config::{MixinConfig, MixinConfigPlugin};
    pub use crate::context::TargetClassContext;
    pub use crate::env::{Environment, Phase, Side};
    pub use crate::error::{ErrorAction, ErrorHandler, TransformError};
    pub use crate::info::{ClassInfoCache, ClassSource, MemoryClassSource, Traversal};
    pub use crate::inject::{CALLBACK_INFO, CALLBACK_INFO_RETURNABLE};
    pub use crate::mixin::MixinInfo;
    pub use crate::point::{FindContext, InjectionPoint, InjectionPointStrategy};
    pub use crate::profiler::Profiler;
    pub use crate::refmap::RefMap;
    pub use crate::transform::{
        ClassGenerator, Decompiler, Extension, Transformer, TransformerOptions,
    };
}
