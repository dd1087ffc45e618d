// ⚙️ Benchmark configuration
//
// StrategyConfig = how one trial stages and matches the incoming keys
// BenchConfig    = the whole run (database, strategies, trials, data shape),
//                  loadable from TOML with every field defaulted

use crate::error::{BenchError, Result};
use crate::reconcile::ReconcilerKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// STAGING SCOPE
// ============================================================================

/// Visibility of the staging relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingScope {
    /// Connection-scoped relation (SQLite `temp` schema)
    Temporary,

    /// Shared relation in the main schema, dropped explicitly
    Persistent,
}

impl StagingScope {
    /// SQLite schema the relation lives in
    pub fn schema(&self) -> &'static str {
        match self {
            StagingScope::Temporary => "temp",
            StagingScope::Persistent => "main",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StagingScope::Temporary => "temporary",
            StagingScope::Persistent => "persistent",
        }
    }
}

impl fmt::Display for StagingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LOAD STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// All keys in one set-oriented statement
    Bulk,

    /// One parameterized insert per key
    RowWise,
}

impl LoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStrategy::Bulk => "bulk",
            LoadStrategy::RowWise => "row-wise",
        }
    }
}

// ============================================================================
// STRATEGY CONFIG
// ============================================================================

/// Execution strategy for one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub scope: StagingScope,

    /// Build an index on the staging business key before loading
    #[serde(default)]
    pub secondary_index: bool,

    pub load: LoadStrategy,
}

impl StrategyConfig {
    pub fn new(scope: StagingScope, secondary_index: bool, load: LoadStrategy) -> Self {
        StrategyConfig {
            scope,
            secondary_index,
            load,
        }
    }

    pub fn use_temporary_scope(&self) -> bool {
        self.scope == StagingScope::Temporary
    }

    pub fn use_secondary_index(&self) -> bool {
        self.secondary_index
    }

    pub fn use_bulk_load(&self) -> bool {
        self.load == LoadStrategy::Bulk
    }

    /// Short label, e.g. `temporary/no-index/bulk`
    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.scope.as_str(),
            if self.secondary_index { "index" } else { "no-index" },
            self.load.as_str()
        )
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ============================================================================
// FAILURE POLICY
// ============================================================================

/// What the orchestrator does after a trial fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole run and return the error
    #[default]
    Abort,

    /// Record the failure, skip the rest of that config, move to the next one
    Continue,
}

// ============================================================================
// PROVISIONING
// ============================================================================

/// Characters synthetic business keys are drawn from
pub const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Slice of the reference set (in identity order) copied into the sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleWindow {
    pub offset: usize,
    pub count: usize,
}

impl SampleWindow {
    pub fn new(offset: usize, count: usize) -> Self {
        SampleWindow { offset, count }
    }

    pub fn end(&self) -> usize {
        self.offset + self.count
    }
}

/// Shape of the synthetic reference set and incoming sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub reference_size: usize,
    pub key_length: usize,
    pub note_length: usize,
    pub max_amount: f64,

    /// Seed for the provisioner's own RNG; None = derive from the clock
    pub seed: Option<u64>,

    /// Extra sample keys guaranteed absent from the reference set
    pub foreign_keys: usize,

    pub windows: Vec<SampleWindow>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            reference_size: 100_000,
            key_length: 20,
            note_length: 250,
            max_amount: 200_000.0,
            seed: None,
            foreign_keys: 0,
            windows: vec![
                SampleWindow::new(5_000, 30_000),
                SampleWindow::new(40_000, 30_000),
                SampleWindow::new(75_000, 10_000),
            ],
        }
    }
}

impl ProvisionConfig {
    /// Number of sample keys this config produces
    pub fn sample_size(&self) -> usize {
        self.windows.iter().map(|w| w.count).sum::<usize>() + self.foreign_keys
    }

    /// Distinct keys of `key_length` characters, saturating
    pub fn key_space(&self) -> u128 {
        let exponent = u32::try_from(self.key_length).unwrap_or(u32::MAX);
        (KEY_ALPHABET.len() as u128).saturating_pow(exponent)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_length == 0 {
            return Err(BenchError::Validation("key_length must be at least 1".to_string()));
        }
        let needed = self.reference_size as u128 + self.foreign_keys as u128;
        if self.key_space() < needed {
            return Err(BenchError::Validation(format!(
                "key_length {} allows {} distinct keys, {} needed (reference_size + foreign_keys)",
                self.key_length,
                self.key_space(),
                needed
            )));
        }
        if !(self.max_amount > 0.0) {
            return Err(BenchError::Validation(format!(
                "max_amount must be positive, got {}",
                self.max_amount
            )));
        }
        for window in &self.windows {
            if window.end() > self.reference_size {
                return Err(BenchError::Validation(format!(
                    "sample window {}..{} exceeds reference size {}",
                    window.offset,
                    window.end(),
                    self.reference_size
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// BENCH CONFIG
// ============================================================================

pub const DEFAULT_TRIALS_PER_CONFIG: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// SQLite database path, or `:memory:`
    pub database: String,

    pub trials_per_config: usize,

    pub failure_policy: FailurePolicy,

    pub reconciler: ReconcilerKind,

    /// Per-trial deadline in milliseconds
    pub trial_timeout_ms: Option<u64>,

    /// Leave reference and sample tables in place after the run
    pub keep_data: bool,

    // Table-valued fields stay last so the TOML form stays writable
    /// Untimed priming trial; None skips it
    pub warmup: Option<StrategyConfig>,

    pub strategies: Vec<StrategyConfig>,

    pub provision: ProvisionConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            database: ":memory:".to_string(),
            trials_per_config: DEFAULT_TRIALS_PER_CONFIG,
            failure_policy: FailurePolicy::Abort,
            reconciler: ReconcilerKind::JoinUpdate,
            trial_timeout_ms: None,
            keep_data: false,
            warmup: Some(StrategyConfig::new(
                StagingScope::Persistent,
                false,
                LoadStrategy::Bulk,
            )),
            strategies: vec![
                StrategyConfig::new(StagingScope::Temporary, false, LoadStrategy::RowWise),
                StrategyConfig::new(StagingScope::Temporary, false, LoadStrategy::Bulk),
            ],
            provision: ProvisionConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BenchError::Config(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BenchError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BenchError::Config(e.to_string()))
    }

    pub fn trial_timeout(&self) -> Option<Duration> {
        self.trial_timeout_ms.map(Duration::from_millis)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database == ":memory:"
    }

    /// Checks everything that can be checked without a connection
    pub fn validate(&self) -> Result<()> {
        validate_strategies(&self.strategies)?;
        if self.trial_timeout_ms == Some(0) {
            return Err(BenchError::Validation(
                "trial_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.provision.validate()
    }
}

/// Strategy list must be non-empty and free of duplicates (results are keyed by config)
pub fn validate_strategies(strategies: &[StrategyConfig]) -> Result<()> {
    if strategies.is_empty() {
        return Err(BenchError::Validation("no strategies configured".to_string()));
    }
    for (i, config) in strategies.iter().enumerate() {
        if strategies[..i].contains(config) {
            return Err(BenchError::Validation(format!(
                "strategy {} listed more than once",
                config.label()
            )));
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
