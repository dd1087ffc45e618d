// 🚨 Error taxonomy for the reconciliation benchmark
//
// Provisioning  → reference/sample setup failed, nothing was measured
// StagingConflict → staging relation already present when a trial starts
// Trial         → load/match/extract failed, carries the phase + store cause
// Release       → teardown of the staging relation failed
//
// A release failure that happens while a trial is already failing is kept as
// a suppressed cause on the TrialError, the trial failure stays primary.

use crate::config::StagingScope;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, BenchError>;

// ============================================================================
// PHASE
// ============================================================================

/// Step of a trial at which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Create,
    Index,
    Load,
    Match,
    Extract,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Create => "create",
            Phase::Index => "index",
            Phase::Load => "load",
            Phase::Match => "match",
            Phase::Extract => "extract",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RELEASE / TRIAL ERRORS
// ============================================================================

/// Dropping the staging relation failed
#[derive(Debug, Error)]
#[error("failed to release staging relation {relation}: {source}")]
pub struct ReleaseError {
    pub relation: String,
    #[source]
    pub source: rusqlite::Error,
}

/// A trial aborted in one of its phases
#[derive(Debug, Error)]
#[error("trial failed during {phase} phase: {source}")]
pub struct TrialError {
    pub phase: Phase,
    #[source]
    pub source: rusqlite::Error,
    /// Teardown failure that happened after this error (never masks it)
    pub suppressed: Option<ReleaseError>,
}

impl TrialError {
    pub fn new(phase: Phase, source: rusqlite::Error) -> Self {
        TrialError {
            phase,
            source,
            suppressed: None,
        }
    }

    /// Closure for `map_err` at a given phase
    pub fn at(phase: Phase) -> impl FnOnce(rusqlite::Error) -> TrialError {
        move |source| TrialError::new(phase, source)
    }

    /// True when the store interrupted the statement (trial deadline hit)
    pub fn is_interrupted(&self) -> bool {
        matches!(
            &self.source,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::OperationInterrupted
        )
    }
}

// ============================================================================
// TOP-LEVEL ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum BenchError {
    /// Reference set or incoming sample could not be prepared
    #[error("provisioning failed: {reason}")]
    Provisioning {
        reason: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// Staging relation already exists in the requested scope
    #[error("staging relation {relation} already exists ({scope} scope)")]
    StagingConflict { relation: String, scope: StagingScope },

    #[error(transparent)]
    Trial(#[from] TrialError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    /// The untimed warmup trial failed, nothing was measured
    #[error("warmup trial failed: {0}")]
    Warmup(#[source] Box<BenchError>),

    /// A timed trial failed; identifies the config and the 1-based trial number
    #[error("config {config}, trial {trial}: {source}")]
    ConfigFailed {
        config: String,
        trial: usize,
        #[source]
        source: Box<BenchError>,
    },

    /// Benchmark setup rejected before touching the store
    #[error("invalid benchmark setup: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl BenchError {
    pub fn provisioning(reason: impl Into<String>) -> Self {
        BenchError::Provisioning {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn provisioning_store(reason: impl Into<String>, source: rusqlite::Error) -> Self {
        BenchError::Provisioning {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Phase of the underlying trial failure, if any
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            BenchError::Trial(err) => Some(err.phase),
            BenchError::StagingConflict { .. } => Some(Phase::Create),
            BenchError::Warmup(inner) | BenchError::ConfigFailed { source: inner, .. } => {
                inner.failed_phase()
            }
            _ => None,
        }
    }

    /// Innermost trial error, walking through config/warmup wrappers
    pub fn trial_error(&self) -> Option<&TrialError> {
        match self {
            BenchError::Trial(err) => Some(err),
            BenchError::Warmup(inner) | BenchError::ConfigFailed { source: inner, .. } => {
                inner.trial_error()
            }
            _ => None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn interrupted() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            Some("interrupted".to_string()),
        )
    }

    #[test]
    fn test_trial_error_display_names_phase() {
        let err = TrialError::new(Phase::Match, rusqlite::Error::QueryReturnedNoRows);
        let msg = err.to_string();
        assert!(msg.contains("match phase"), "got: {}", msg);
    }

    #[test]
    fn test_interrupted_detection() {
        assert!(TrialError::new(Phase::Load, interrupted()).is_interrupted());
        assert!(!TrialError::new(Phase::Load, rusqlite::Error::QueryReturnedNoRows).is_interrupted());
    }

    #[test]
    fn test_failed_phase_through_wrappers() {
        let trial = BenchError::Trial(TrialError::new(Phase::Extract, rusqlite::Error::InvalidQuery));
        let wrapped = BenchError::ConfigFailed {
            config: "temporary/no-index/bulk".to_string(),
            trial: 3,
            source: Box::new(trial),
        };

        assert_eq!(wrapped.failed_phase(), Some(Phase::Extract));
        assert!(wrapped.trial_error().is_some());
        assert!(wrapped.to_string().contains("trial 3"));
    }

    #[test]
    fn test_staging_conflict_counts_as_create_phase() {
        let err = BenchError::StagingConflict {
            relation: "main.staging_keys".to_string(),
            scope: StagingScope::Persistent,
        };
        assert_eq!(err.failed_phase(), Some(Phase::Create));
        assert!(err.trial_error().is_none());
    }
}
