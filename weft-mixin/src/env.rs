//! Environment, phases and sides.

use std::fmt;

/// Pipeline stage controlling which configs are eligible for selection.
///
/// Phases are ordered; a config declared for an earlier phase is selected as
/// soon as the environment reaches it and stays selected afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Phase {
    /// Before the host finishes bootstrapping.
    Preinit,
    /// Host initialization.
    Init,
    /// Normal operation.
    #[default]
    Default,
}

impl Phase {
    /// Parse a phase name as written in config documents.
    pub fn parse(name: &str) -> Option<Phase> {
        match name {
            "preinit" => Some(Phase::Preinit),
            "init" => Some(Phase::Init),
            "default" => Some(Phase::Default),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Preinit => write!(f, "preinit"),
            Phase::Init => write!(f, "init"),
            Phase::Default => write!(f, "default"),
        }
    }
}

/// Which side of a client/server split the host is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    /// Client distribution.
    Client,
    /// Dedicated server distribution.
    Server,
    /// Side-agnostic; accepts everything.
    #[default]
    Both,
}

impl Side {
    /// Flag whether mixins declared for `declared` apply on this side.
    pub fn accepts(self, declared: Side) -> bool {
        matches!(
            (self, declared),
            (_, Side::Both) | (Side::Both, _) | (Side::Client, Side::Client) | (Side::Server, Side::Server)
        )
    }
}

/// The environment a transformer operates in.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Current phase.
    pub phase: Phase,
    /// Current side.
    pub side: Side,
}

impl Environment {
    /// Environment at the given phase, side-agnostic.
    pub fn at(phase: Phase) -> Self {
        Self {
            phase,
            side: Side::Both,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ordering() {
        assert!(Phase::Preinit < Phase::Init);
        assert!(Phase::Init < Phase::Default);
        assert_eq!(Phase::parse("init"), Some(Phase::Init));
        assert_eq!(Phase::parse("unknown"), None);
    }

    #[test]
    fn side_acceptance() {
        assert!(Side::Client.accepts(Side::Both));
        assert!(Side::Both.accepts(Side::Server));
        assert!(!Side::Client.accepts(Side::Server));
    }
}
