use std::fmt;

use thiserror::Error;

/// Fatal-to-the-cycle failure of an external collector command.
///
/// The refresh cycle keeps the previous snapshot and marks it stale; the
/// next scheduled tick is the retry mechanism.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("collection failed: {command}: {detail}")]
pub struct CollectError {
    /// The command that failed, e.g. `scontrol show node -d`
    pub command: String,
    /// Exit status, timeout, or spawn failure description
    pub detail: String,
}

impl CollectError {
    pub fn new(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            detail: detail.into(),
        }
    }
}

/// Non-fatal, per-stanza parse diagnostic.
///
/// Accumulated over a cycle and carried on the published snapshot; never
/// aborts a parse and never changes the cycle state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseWarning {
    /// Node name or job id the warning refers to, when known
    pub entity: Option<String>,
    pub reason: String,
}

impl ParseWarning {
    pub fn new(entity: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.map(str::to_string),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{}: {}", entity, self.reason),
            None => fmt::Display::fmt(&self.reason, f),
        }
    }
}
