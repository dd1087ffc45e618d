// End-to-end checks of the benchmark protocol through the public API

use reconcile_bench::{
    expected_matches, open_database, staging_exists, BenchConfig, BenchError, Benchmark,
    FailurePolicy, FixedProvisioner, IncomingSample, JoinUpdate, LoadStrategy, Phase,
    ProvisionConfig, Provisioner, ReconcilerKind, ReferenceHandle, ReferenceRecord, Reconciler,
    SampleWindow, StagingRow, StagingScope, StagingTable, StrategyConfig, SyntheticProvisioner,
    TrialRunner,
};
use rusqlite::Connection;
use std::cell::Cell;
use std::collections::BTreeSet;

fn every_config() -> Vec<StrategyConfig> {
    let mut configs = Vec::new();
    for scope in [StagingScope::Temporary, StagingScope::Persistent] {
        for secondary_index in [false, true] {
            for load in [LoadStrategy::Bulk, LoadStrategy::RowWise] {
                configs.push(StrategyConfig::new(scope, secondary_index, load));
            }
        }
    }
    configs
}

fn k1_to_k100() -> Vec<ReferenceRecord> {
    (1..=100)
        .map(|id| ReferenceRecord::new(id, format!("K{}", id)))
        .collect()
}

fn small_provision(seed: u64) -> ProvisionConfig {
    ProvisionConfig {
        reference_size: 2_000,
        key_length: 12,
        note_length: 32,
        max_amount: 200_000.0,
        seed: Some(seed),
        foreign_keys: 50,
        windows: vec![
            SampleWindow::new(100, 600),
            SampleWindow::new(800, 600),
            SampleWindow::new(1_500, 200),
        ],
    }
}

/// Drops the reference relation on the Nth match call
struct DropsReferenceOnCall {
    fail_on: usize,
    calls: Cell<usize>,
}

impl Reconciler for DropsReferenceOnCall {
    fn name(&self) -> &'static str {
        "drops-reference"
    }

    fn match_and_annotate(
        &self,
        staging: &StagingTable<'_>,
        reference: &ReferenceHandle,
    ) -> rusqlite::Result<usize> {
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() == self.fail_on {
            staging
                .connection()
                .execute(&format!("ALTER TABLE {} RENAME TO parked_reference", reference.table()), [])?;
            let result = JoinUpdate.match_and_annotate(staging, reference);
            staging
                .connection()
                .execute(&format!("ALTER TABLE parked_reference RENAME TO {}", reference.table()), [])?;
            return result;
        }
        JoinUpdate.match_and_annotate(staging, reference)
    }
}

#[test]
fn scenario_k5_k150_k10_matches_two_rows_for_every_config() {
    let conn = Connection::open_in_memory().unwrap();
    let mut provisioner = FixedProvisioner::new(
        k1_to_k100(),
        vec!["K5".to_string(), "K150".to_string(), "K10".to_string()],
    );
    let (reference, sample) = provisioner.provision(&conn).unwrap();
    let runner = TrialRunner::new(&conn, &reference, &JoinUpdate);

    for config in every_config() {
        let outcome = runner.run_trial(&sample, &config).unwrap();

        let matched: BTreeSet<StagingRow> = outcome.matched.into_iter().collect();
        let expected: BTreeSet<StagingRow> =
            [StagingRow::matched("K5", 5), StagingRow::matched("K10", 10)].into_iter().collect();
        assert_eq!(matched, expected, "{}", config);
        assert!(!staging_exists(&conn, config.scope).unwrap());
    }

    provisioner.teardown(&conn).unwrap();
}

#[test]
fn matched_keys_are_independent_of_strategy() {
    let conn = Connection::open_in_memory().unwrap();
    let mut provisioner = SyntheticProvisioner::new(small_provision(11));
    let (reference, sample) = provisioner.provision(&conn).unwrap();
    let records = reconcile_bench::db::get_reference_records(&conn).unwrap();
    let expected = expected_matches(&records, &sample);
    assert_eq!(expected.len(), 1_400);

    for kind in [ReconcilerKind::JoinUpdate, ReconcilerKind::CorrelatedUpdate] {
        let reconciler = kind.build();
        let runner = TrialRunner::new(&conn, &reference, reconciler.as_ref());

        for config in every_config() {
            let outcome = runner.run_trial(&sample, &config).unwrap();
            assert_eq!(outcome.staged, sample.len());
            assert_eq!(outcome.matched, expected, "{} / {}", reconciler.name(), config);
        }
    }
}

#[test]
fn bulk_and_row_wise_load_stage_identical_rows() {
    let conn = Connection::open_in_memory().unwrap();
    let mut provisioner = SyntheticProvisioner::new(small_provision(3));
    let (_, sample) = provisioner.provision(&conn).unwrap();

    let mut snapshots = Vec::new();
    for load in [LoadStrategy::Bulk, LoadStrategy::RowWise] {
        let mut staging = StagingTable::create(&conn, StagingScope::Persistent).unwrap();
        staging.load(sample.keys(), load).unwrap();
        snapshots.push(staging.snapshot().unwrap());
        staging.dispose().unwrap();
    }

    assert_eq!(snapshots[0], snapshots[1]);
    assert!(snapshots[0].iter().all(|row| row.reference_id.is_none()));
    assert_eq!(snapshots[0].len(), sample.len());
}

#[test]
fn persistent_staging_is_gone_for_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.db");
    let path = path.to_str().unwrap();

    let conn = open_database(path).unwrap();
    let mut provisioner = FixedProvisioner::new(k1_to_k100(), vec!["K1".to_string()]);
    let (reference, sample) = provisioner.provision(&conn).unwrap();
    let runner = TrialRunner::new(&conn, &reference, &JoinUpdate);
    let config = StrategyConfig::new(StagingScope::Persistent, true, LoadStrategy::RowWise);

    for _ in 0..3 {
        runner.run_trial(&sample, &config).unwrap();
        let observer = Connection::open(path).unwrap();
        assert!(!staging_exists(&observer, StagingScope::Persistent).unwrap());
    }
}

#[test]
fn forced_match_failure_on_trial_three_of_five() {
    let conn = Connection::open_in_memory().unwrap();
    let mut provisioner = FixedProvisioner::new(k1_to_k100(), vec!["K5".into(), "K150".into()]);
    let (reference, sample) = provisioner.provision(&conn).unwrap();
    let failing = DropsReferenceOnCall {
        fail_on: 3,
        calls: Cell::new(0),
    };
    let config = StrategyConfig::new(StagingScope::Persistent, false, LoadStrategy::Bulk);
    let runner = TrialRunner::new(&conn, &reference, &failing);
    let mut benchmark = Benchmark::new(runner, 5).with_failure_policy(FailurePolicy::Continue);

    let report = benchmark.run(&sample, &[config]).unwrap();

    let result = report.result_for(&config).unwrap();
    let failure = result.failure.as_ref().expect("config should record its failure");
    assert_eq!(failure.trial, 3);
    assert_eq!(failure.phase, Some(Phase::Match));
    assert_eq!(result.trials.len(), 2);
    assert_eq!(failing.calls.get(), 3, "no trials after the failing one");
    assert!(!staging_exists(&conn, StagingScope::Persistent).unwrap());
}

#[test]
fn abort_policy_surfaces_config_and_trial() {
    let conn = Connection::open_in_memory().unwrap();
    let mut provisioner = FixedProvisioner::new(k1_to_k100(), vec!["K5".into()]);
    let (reference, sample) = provisioner.provision(&conn).unwrap();
    let failing = DropsReferenceOnCall {
        fail_on: 3,
        calls: Cell::new(0),
    };
    let config = StrategyConfig::new(StagingScope::Temporary, true, LoadStrategy::RowWise);
    let mut benchmark = Benchmark::new(TrialRunner::new(&conn, &reference, &failing), 5);

    let err = benchmark.run(&sample, &[config]).unwrap_err();

    match err {
        BenchError::ConfigFailed { ref config, trial, ref source } => {
            assert_eq!(config, "temporary/index/row-wise");
            assert_eq!(trial, 3);
            assert!(matches!(**source, BenchError::Trial(_)));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!staging_exists(&conn, StagingScope::Temporary).unwrap());
}

#[test]
fn default_protocol_end_to_end_on_small_data() {
    let mut config = BenchConfig::default();
    config.trials_per_config = 2;
    config.provision = small_provision(5);
    config.validate().unwrap();

    let conn = open_database(&config.database).unwrap();
    let mut provisioner = SyntheticProvisioner::new(config.provision.clone());
    let (reference, sample) = provisioner.provision(&conn).unwrap();
    let reconciler = config.reconciler.build();
    let runner = TrialRunner::new(&conn, &reference, reconciler.as_ref());
    let mut benchmark = Benchmark::new(runner, config.trials_per_config).with_warmup(config.warmup);

    let report = benchmark.run(&sample, &config.strategies).unwrap();

    assert_eq!(report.sample_size, config.provision.sample_size());
    assert_eq!(report.sample_fingerprint, sample.fingerprint());
    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(result.trials.len(), 2);
        for timing in &result.trials {
            assert_eq!(timing.total(), timing.load + timing.matching + timing.extract);
        }
    }

    provisioner.teardown(&conn).unwrap();
}

#[test]
fn empty_sample_is_a_valid_trial() {
    let conn = Connection::open_in_memory().unwrap();
    let mut provisioner = FixedProvisioner::new(k1_to_k100(), vec![]);
    let (reference, sample) = provisioner.provision(&conn).unwrap();
    let runner = TrialRunner::new(&conn, &reference, &JoinUpdate);

    for config in every_config() {
        let outcome = runner.run_trial(&IncomingSample::default(), &config).unwrap();
        assert!(outcome.matched.is_empty());
    }
    assert!(sample.is_empty());
}
