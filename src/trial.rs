// 🧪 Trial Runner - one load → match → extract pass
//
// Steps:
//   1. create staging relation (scope from the config)
//   2. optional index build, timed on its own, outside PhaseTiming
//   3. load    ─┐
//   4. match    ├ PhaseClock checkpoints
//   5. extract ─┘ (result fully materialized)
//   6. release, on every path
//
// A failure in 2-5 still runs 6. If 6 fails as well, the release error rides
// along as a suppressed cause of the TrialError.

use crate::config::StrategyConfig;
use crate::db::{IncomingSample, ReferenceHandle, StagingRow};
use crate::error::{BenchError, Phase, Result, TrialError};
use crate::reconcile::Reconciler;
use crate::staging::StagingTable;
use crate::timing::{duration_ms, PhaseClock, PhaseTiming};
use rusqlite::Connection;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of a successful trial
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub timing: PhaseTiming,

    /// Time spent building the staging index, if the config asked for one
    pub index_build: Option<Duration>,

    pub staged: usize,

    pub matched: Vec<StagingRow>,
}

pub struct TrialRunner<'a> {
    conn: &'a Connection,
    reference: &'a ReferenceHandle,
    reconciler: &'a dyn Reconciler,
    timeout: Option<Duration>,
}

impl<'a> TrialRunner<'a> {
    pub fn new(
        conn: &'a Connection,
        reference: &'a ReferenceHandle,
        reconciler: &'a dyn Reconciler,
    ) -> Self {
        TrialRunner {
            conn,
            reference,
            reconciler,
            timeout: None,
        }
    }

    /// Abort any trial still running after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn reconciler(&self) -> &dyn Reconciler {
        self.reconciler
    }

    pub fn run_trial(&self, sample: &IncomingSample, config: &StrategyConfig) -> Result<TrialOutcome> {
        let mut staging = match StagingTable::create(self.conn, config.scope) {
            Ok(staging) => staging,
            Err(BenchError::Store(source)) => {
                return Err(TrialError::new(Phase::Create, source).into())
            }
            Err(err) => return Err(err),
        };

        let deadline = self.timeout.map(|timeout| Deadline::arm(self.conn, timeout));
        let result = self.run_phases(&mut staging, sample, config);
        // disarm before the drop so release is never interrupted
        drop(deadline);

        match (result, staging.dispose()) {
            (Ok(outcome), Ok(())) => {
                debug!(
                    target: "reconcile_bench::trial",
                    config = %config,
                    load_ms = duration_ms(outcome.timing.load),
                    match_ms = duration_ms(outcome.timing.matching),
                    extract_ms = duration_ms(outcome.timing.extract),
                    matched = outcome.matched.len(),
                    "trial finished"
                );
                Ok(outcome)
            }
            (Ok(_), Err(release)) => Err(release.into()),
            (Err(mut trial), Err(release)) => {
                warn!(target: "reconcile_bench::trial", error = %release, "release failed after trial failure");
                trial.suppressed = Some(release);
                Err(trial.into())
            }
            (Err(trial), Ok(())) => Err(trial.into()),
        }
    }

    fn run_phases(
        &self,
        staging: &mut StagingTable<'_>,
        sample: &IncomingSample,
        config: &StrategyConfig,
    ) -> std::result::Result<TrialOutcome, TrialError> {
        let index_build = if config.secondary_index {
            let started = Instant::now();
            staging.build_index().map_err(TrialError::at(Phase::Index))?;
            Some(started.elapsed())
        } else {
            None
        };

        let mut clock = PhaseClock::start();

        let staged = staging
            .load(sample.keys(), config.load)
            .map_err(TrialError::at(Phase::Load))?;
        let load = clock.checkpoint();

        self.reconciler
            .match_and_annotate(staging, self.reference)
            .map_err(TrialError::at(Phase::Match))?;
        let matching = clock.checkpoint();

        let matched = self
            .reconciler
            .extract_matched(staging)
            .map_err(TrialError::at(Phase::Extract))?;
        let extract = clock.checkpoint();

        Ok(TrialOutcome {
            timing: PhaseTiming::new(load, matching, extract),
            index_build,
            staged,
            matched,
        })
    }
}

// ============================================================================
// DEADLINE
// ============================================================================

// SQLite polls the progress handler every N VM steps; returning true
// interrupts the running statement with SQLITE_INTERRUPT
const PROGRESS_STEPS: i32 = 1_000;

struct Deadline<'c> {
    conn: &'c Connection,
}

impl<'c> Deadline<'c> {
    fn arm(conn: &'c Connection, timeout: Duration) -> Self {
        let expires = Instant::now() + timeout;
        conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= expires));
        Deadline { conn }
    }
}

impl Drop for Deadline<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

// ============================================================================
// TESTS
// ============================================================================
