use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Step of a model migration, as reported by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// No migration.
    #[default]
    None,
    Quiesce,
    Import,
    ProcessRelations,
    Validation,
    Success,
    LogTransfer,
    Reap,
    ReapFailed,
    Done,
    Abort,
    AbortDone,
    /// Reported by a newer controller; treated as active.
    Unknown,
}

const NAMES: [(Phase, &str); 13] = [
    (Phase::None, "NONE"),
    (Phase::Quiesce, "QUIESCE"),
    (Phase::Import, "IMPORT"),
    (Phase::ProcessRelations, "PROCESSRELATIONS"),
    (Phase::Validation, "VALIDATION"),
    (Phase::Success, "SUCCESS"),
    (Phase::LogTransfer, "LOGTRANSFER"),
    (Phase::Reap, "REAP"),
    (Phase::ReapFailed, "REAPFAILED"),
    (Phase::Done, "DONE"),
    (Phase::Abort, "ABORT"),
    (Phase::AbortDone, "ABORTDONE"),
    (Phase::Unknown, "UNKNOWN"),
];

impl Phase {
    /// True once the migration ended, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::ReapFailed | Phase::Done | Phase::AbortDone)
    }

    /// True while a migration is underway.
    pub fn is_running(self) -> bool {
        !is_inactive(self)
    }

    pub fn as_str(self) -> &'static str {
        NAMES
            .iter()
            .find(|(p, _)| *p == self)
            .map_or("UNKNOWN", |(_, name)| name)
    }
}

/// Predicate of the migration-inactive flag: no migration, or a finished one.
pub fn is_inactive(phase: Phase) -> bool {
    phase == Phase::None || phase.is_terminal()
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase name not recognised by [`Phase::from_str`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown migration phase {0:?}")]
pub struct ParsePhaseError(pub String);

impl FromStr for Phase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(p, _)| *p)
            .ok_or_else(|| ParsePhaseError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_means_none_or_terminal() {
        let inactive: Vec<_> = NAMES
            .iter()
            .map(|(p, _)| *p)
            .filter(|p| is_inactive(*p))
            .collect();
        assert_eq!(
            inactive,
            vec![Phase::None, Phase::ReapFailed, Phase::Done, Phase::AbortDone]
        );
        assert!(Phase::Unknown.is_running());
        assert!(!Phase::None.is_terminal());
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("PROCESSRELATIONS".parse(), Ok(Phase::ProcessRelations));
        assert_eq!(Phase::AbortDone.to_string(), "ABORTDONE");
        assert_eq!(
            "quiesce".parse::<Phase>(),
            Err(ParsePhaseError("quiesce".into()))
        );
    }
}
