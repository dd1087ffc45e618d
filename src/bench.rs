// 🏁 Benchmark Orchestrator
//
// Idle → Warmup → Running(config_i, trial_j) → Aggregating(config_i) → … → Done
//
// One untimed warmup trial, then for every config, in order, N sequential
// timed trials. Per-config means are computed from the collected timings.
// No retries. A failed trial ends its config; FailurePolicy decides whether
// the run stops there (Abort) or moves on to the next config (Continue).

use crate::config::{validate_strategies, FailurePolicy, StrategyConfig};
use crate::db::IncomingSample;
use crate::error::{BenchError, Phase, Result};
use crate::timing::{duration_ms, mean_ms, AggregateTiming, PhaseTiming};
use crate::trial::TrialRunner;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BenchState {
    Idle,
    Warmup,
    /// Zero-based config index, 1-based trial number
    Running { config: usize, trial: usize },
    Aggregating { config: usize },
    Done,
}

impl fmt::Display for BenchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchState::Idle => write!(f, "idle"),
            BenchState::Warmup => write!(f, "warmup"),
            BenchState::Running { config, trial } => {
                write!(f, "running(config {}, trial {})", config, trial)
            }
            BenchState::Aggregating { config } => write!(f, "aggregating(config {})", config),
            BenchState::Done => write!(f, "done"),
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Why a config stopped early (Continue policy only)
#[derive(Debug, Clone, Serialize)]
pub struct ConfigFailure {
    /// 1-based trial number that failed
    pub trial: usize,
    pub phase: Option<Phase>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigResult {
    pub config: StrategyConfig,
    pub label: String,
    pub trials: Vec<PhaseTiming>,
    /// Means over `trials` (successful trials only)
    pub aggregate: AggregateTiming,
    /// Index build per trial, not part of `trials`; empty without an index
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub index_build_ms: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_build_mean_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ConfigFailure>,
}

impl ConfigResult {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reconciler: String,
    pub sample_size: usize,
    pub sample_fingerprint: String,
    pub trials_per_config: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup: Option<StrategyConfig>,
    pub results: Vec<ConfigResult>,
}

impl BenchmarkReport {
    /// Result for one config (configs are unique within a run)
    pub fn result_for(&self, config: &StrategyConfig) -> Option<&ConfigResult> {
        self.results.iter().find(|r| &r.config == config)
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.is_complete())
    }
}

// ============================================================================
// BENCHMARK
// ============================================================================

pub struct Benchmark<'a> {
    runner: TrialRunner<'a>,
    warmup: Option<StrategyConfig>,
    trials_per_config: usize,
    policy: FailurePolicy,
    state: BenchState,
    history: Vec<BenchState>,
}

impl<'a> Benchmark<'a> {
    pub fn new(runner: TrialRunner<'a>, trials_per_config: usize) -> Self {
        Benchmark {
            runner,
            warmup: None,
            trials_per_config,
            policy: FailurePolicy::Abort,
            state: BenchState::Idle,
            history: vec![BenchState::Idle],
        }
    }

    pub fn with_warmup(mut self, warmup: Option<StrategyConfig>) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> BenchState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[BenchState] {
        &self.history
    }

    fn enter(&mut self, state: BenchState) {
        self.state = state;
        self.history.push(state);
    }

    pub fn run(&mut self, sample: &IncomingSample, configs: &[StrategyConfig]) -> Result<BenchmarkReport> {
        if self.state != BenchState::Idle {
            return Err(BenchError::Validation(format!(
                "benchmark already ran (state {})",
                self.state
            )));
        }
        validate_strategies(configs)?;

        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(
            target: "reconcile_bench::bench",
            %run_id,
            sample = sample.len(),
            configs = configs.len(),
            trials = self.trials_per_config,
            "benchmark started"
        );

        if let Some(warmup) = self.warmup {
            self.enter(BenchState::Warmup);
            info!(target: "reconcile_bench::bench", config = %warmup, "warmup trial (not measured)");
            self.runner
                .run_trial(sample, &warmup)
                .map_err(|e| BenchError::Warmup(Box::new(e)))?;
        }

        let mut results = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let result = self.run_config(index, config, sample)?;
            results.push(result);
        }

        self.enter(BenchState::Done);

        Ok(BenchmarkReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            reconciler: self.runner.reconciler().name().to_string(),
            sample_size: sample.len(),
            sample_fingerprint: sample.fingerprint(),
            trials_per_config: self.trials_per_config,
            warmup: self.warmup,
            results,
        })
    }

    fn run_config(
        &mut self,
        index: usize,
        config: &StrategyConfig,
        sample: &IncomingSample,
    ) -> Result<ConfigResult> {
        info!(target: "reconcile_bench::bench", config = %config, "starting config");

        let mut trials = Vec::with_capacity(self.trials_per_config);
        let mut index_builds = Vec::new();
        let mut failure = None;

        for trial in 1..=self.trials_per_config {
            self.enter(BenchState::Running {
                config: index,
                trial,
            });

            match self.runner.run_trial(sample, config) {
                Ok(outcome) => {
                    trials.push(outcome.timing);
                    index_builds.extend(outcome.index_build);
                }
                Err(err) => {
                    warn!(
                        target: "reconcile_bench::bench",
                        config = %config,
                        trial,
                        error = %err,
                        "trial failed, no further trials for this config"
                    );
                    match self.policy {
                        FailurePolicy::Abort => {
                            return Err(BenchError::ConfigFailed {
                                config: config.label(),
                                trial,
                                source: Box::new(err),
                            })
                        }
                        FailurePolicy::Continue => {
                            failure = Some(ConfigFailure {
                                trial,
                                phase: err.failed_phase(),
                                message: error_chain(&err),
                            });
                            break;
                        }
                    }
                }
            }
        }

        self.enter(BenchState::Aggregating { config: index });
        let aggregate = AggregateTiming::from_trials(&trials);
        let index_build_mean_ms = mean_ms(&index_builds);
        info!(
            target: "reconcile_bench::bench",
            config = %config,
            trials = aggregate.trials,
            load_ms = aggregate.load_ms,
            match_ms = aggregate.match_ms,
            extract_ms = aggregate.extract_ms,
            total_ms = aggregate.total_ms,
            index_build_ms = index_build_mean_ms,
            "config finished"
        );

        Ok(ConfigResult {
            config: *config,
            label: config.label(),
            trials,
            aggregate,
            index_build_ms: index_builds.into_iter().map(duration_ms).collect(),
            index_build_mean_ms,
            failure,
        })
    }
}

// Display already carries the cause; suppressed release failures are appended
fn error_chain(err: &BenchError) -> String {
    match err.trial_error().and_then(|t| t.suppressed.as_ref()) {
        Some(suppressed) => format!("{} (suppressed: {})", err, suppressed),
        None => err.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
