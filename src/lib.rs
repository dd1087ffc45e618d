// Reconciliation Benchmark Harness - Core Library
// Times staged key matching against a reference set under different strategies

pub mod config;
pub mod error;
pub mod timing;
pub mod db;
pub mod staging;        // Staging Store Adapter
pub mod reconcile;      // Match-and-annotate strategies
pub mod trial;          // Trial Runner
pub mod bench;          // Benchmark Orchestrator
pub mod provision;      // Test data (outside the measured core)
pub mod report;         // Text / JSON / CSV sinks

// Re-export commonly used types
pub use config::{
    BenchConfig, FailurePolicy, LoadStrategy, ProvisionConfig, SampleWindow, StagingScope,
    StrategyConfig,
};
pub use error::{BenchError, Phase, ReleaseError, Result, TrialError};
pub use timing::{AggregateTiming, PhaseClock, PhaseTiming};
pub use db::{
    IncomingSample, ReferenceHandle, ReferenceRecord, StagingRow,
    open_database, REFERENCE_TABLE, INCOMING_TABLE,
};
pub use staging::{staging_exists, StagingTable, STAGING_TABLE};
pub use reconcile::{expected_matches, CorrelatedUpdate, JoinUpdate, Reconciler, ReconcilerKind};
pub use trial::{TrialOutcome, TrialRunner};
pub use bench::{Benchmark, BenchmarkReport, BenchState, ConfigFailure, ConfigResult};
pub use provision::{FixedProvisioner, Provisioner, SyntheticProvisioner};
pub use report::{CsvReport, JsonReport, ReportFormat, ReportSink, TextReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
