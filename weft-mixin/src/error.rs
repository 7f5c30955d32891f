//! Engine error implementation.
//!
//! Per-mixin failures are values, not control flow: each step of the pipeline
//! returns a `Result` and the driver decides, based on the mixin's `required`
//! flag and the registered error handlers, whether to escalate or log and
//! carry on.

use thiserror::Error;

/// Errors raised by the transformation pipeline.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The class bytes could not be decoded or re-encoded.
    #[error(transparent)]
    BadClass(#[from] weft_asm::Error),
    /// A mixin class failed validation during config preparation.
    #[error("mixin {mixin} failed to prepare: {reason}")]
    MixinPrepare {
        /// The offending mixin class.
        mixin: String,
        /// What went wrong.
        reason: String,
    },
    /// An injector annotation is malformed or incompatible with its target.
    #[error("invalid injection {handler} in {mixin}: {reason}")]
    InvalidInjection {
        /// The offending mixin class.
        mixin: String,
        /// The handler method.
        handler: String,
        /// What went wrong.
        reason: String,
    },
    /// An injection-point specifier could not be parsed.
    #[error("invalid injection point {at} in {mixin}: {reason}")]
    InvalidInjectionPoint {
        /// The offending mixin class.
        mixin: String,
        /// The at-code as written.
        at: String,
        /// What went wrong.
        reason: String,
    },
    /// Fewer injections succeeded than the handler requires.
    #[error(
        "critical injection failure: {handler} in {mixin} succeeded {count} times, required {required}"
    )]
    InjectionCount {
        /// The offending mixin class.
        mixin: String,
        /// The handler method.
        handler: String,
        /// Successful injections.
        count: usize,
        /// Required injections.
        required: usize,
    },
    /// A final injector already claimed the instruction.
    #[error("{handler} in {mixin} conflicts with a final injection from {owner} on {target}")]
    RedirectConflict {
        /// The offending mixin class.
        mixin: String,
        /// The handler method.
        handler: String,
        /// Mixin owning the existing final injection.
        owner: String,
        /// The contested target method.
        target: String,
    },
    /// A mixin failed while being merged into its target.
    #[error("mixin {mixin} failed to apply to {target}: {reason}")]
    MixinApply {
        /// The offending mixin class.
        mixin: String,
        /// The target class.
        target: String,
        /// What went wrong.
        reason: String,
    },
    /// Mixin application was attempted while another application is on the
    /// stack of the same thread.
    #[error("re-entrant transformation of {target} (depth {depth})")]
    ReEntrance {
        /// The class being transformed when re-entrance was detected.
        target: String,
        /// Transformer depth on this thread.
        depth: usize,
    },
    /// A class in a mixin package was fed to the transformer as a load
    /// target.
    #[error("mixin class {name} cannot be referenced directly")]
    MixinClassLoaded {
        /// The mixin class name.
        name: String,
    },
    /// A mixin target was defined before its configs were prepared.
    #[error("target {target} was loaded before mixin preparation")]
    ClassAlreadyLoaded {
        /// The target class name.
        target: String,
    },
    /// A synthetic class was requested but no generator produced it.
    #[error("no class generator produced synthetic class {name}")]
    NoGenerator {
        /// The requested class name.
        name: String,
    },
    /// A required config document failed to parse.
    #[error("config {name} is invalid: {reason}")]
    BadConfig {
        /// Config resource name.
        name: String,
        /// What went wrong.
        reason: String,
    },
}

impl TransformError {
    pub(crate) fn prepare(mixin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MixinPrepare {
            mixin: mixin.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn injection(
        mixin: impl Into<String>,
        handler: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidInjection {
            mixin: mixin.into(),
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn apply(
        mixin: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MixinApply {
            mixin: mixin.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// What an error handler wants done with a non-required mixin's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Swallow silently.
    Ignore,
    /// Log a warning and skip the mixin.
    Warn,
    /// Escalate as if the mixin were required.
    Error,
}

/// Host-registered hook consulted when a non-required mixin fails.
///
/// Handlers are consulted in registration order; the most severe answer
/// wins. Required mixins escalate regardless of what handlers say.
pub trait ErrorHandler: Send + Sync {
    /// A mixin failed during config preparation.
    fn on_prepare_error(&self, config: &str, error: &TransformError) -> ErrorAction {
        let _ = (config, error);
        ErrorAction::Warn
    }

    /// A mixin failed while applying to a target.
    fn on_apply_error(&self, target: &str, error: &TransformError) -> ErrorAction {
        let _ = (target, error);
        ErrorAction::Warn
    }
}

/// Result alias for the engine.
pub type Result<T> = core::result::Result<T, TransformError>;
