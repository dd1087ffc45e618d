// ⚖️ Reconciliation Strategy - match staged keys against the reference set
//
// Join semantics: reference.business_key == staging.business_key ⇒
//   staging.reference_id := reference.id
// Unmatched staging rows keep a NULL reference_id.
//
// Business keys are unique in the reference set (the provisioner enforces
// it). If that ever breaks, which identity lands on a staging row is
// whatever the store picks for the statement: UNSPECIFIED, not "first" or
// "last".

use crate::db::{IncomingSample, ReferenceHandle, ReferenceRecord, StagingRow};
use crate::staging::StagingTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// RECONCILER TRAIT
// ============================================================================

/// Match-and-annotate step plus read-back of the matched rows
///
/// `match_and_annotate` must be one set-based statement, never a per-row loop.
pub trait Reconciler {
    fn name(&self) -> &'static str;

    /// Back-fill reference identities; returns the number of rows annotated
    fn match_and_annotate(
        &self,
        staging: &StagingTable<'_>,
        reference: &ReferenceHandle,
    ) -> rusqlite::Result<usize>;

    /// Matched rows, fully materialized
    fn extract_matched(&self, staging: &StagingTable<'_>) -> rusqlite::Result<Vec<StagingRow>> {
        staging.extract_matched()
    }
}

// ============================================================================
// STRATEGIES
// ============================================================================

/// `UPDATE ... FROM` join (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinUpdate;

impl Reconciler for JoinUpdate {
    fn name(&self) -> &'static str {
        "join-update"
    }

    fn match_and_annotate(
        &self,
        staging: &StagingTable<'_>,
        reference: &ReferenceHandle,
    ) -> rusqlite::Result<usize> {
        staging.connection().execute(
            &format!(
                "UPDATE {} AS t
                 SET reference_id = r.id
                 FROM {} AS r
                 WHERE r.business_key = t.business_key",
                staging.qualified_name(),
                reference.table()
            ),
            [],
        )
    }
}

/// Correlated sub-select per staging row, still a single statement
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelatedUpdate;

impl Reconciler for CorrelatedUpdate {
    fn name(&self) -> &'static str {
        "correlated-update"
    }

    fn match_and_annotate(
        &self,
        staging: &StagingTable<'_>,
        reference: &ReferenceHandle,
    ) -> rusqlite::Result<usize> {
        staging.connection().execute(
            &format!(
                "UPDATE {0} AS t
                 SET reference_id = (
                     SELECT r.id FROM {1} AS r WHERE r.business_key = t.business_key LIMIT 1
                 )
                 WHERE EXISTS (
                     SELECT 1 FROM {1} AS r WHERE r.business_key = t.business_key
                 )",
                staging.qualified_name(),
                reference.table()
            ),
            [],
        )
    }
}

/// Selectable strategy, for config files and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilerKind {
    #[default]
    JoinUpdate,
    CorrelatedUpdate,
}

impl ReconcilerKind {
    pub fn build(&self) -> Box<dyn Reconciler> {
        match self {
            ReconcilerKind::JoinUpdate => Box::new(JoinUpdate),
            ReconcilerKind::CorrelatedUpdate => Box::new(CorrelatedUpdate),
        }
    }
}

// ============================================================================
// IN-MEMORY ORACLE
// ============================================================================

/// What a correct match phase yields for `sample`, in sample order
///
/// Assumes unique reference keys; with duplicates the identity picked here
/// need not agree with the store's.
pub fn expected_matches(reference: &[ReferenceRecord], sample: &IncomingSample) -> Vec<StagingRow> {
    let by_key: HashMap<&str, i64> = reference
        .iter()
        .map(|r| (r.business_key.as_str(), r.id))
        .collect();

    sample
        .keys()
        .iter()
        .filter_map(|key| {
            by_key
                .get(key.as_str())
                .map(|id| StagingRow::matched(key.clone(), *id))
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadStrategy, StagingScope};
    use crate::db::{create_reference_schema, insert_reference_records};
    use rusqlite::Connection;

    fn reference_k1_to_k100() -> Vec<ReferenceRecord> {
        (1..=100)
            .map(|id| ReferenceRecord::new(id, format!("K{}", id)))
            .collect()
    }

    fn setup() -> (Connection, Vec<ReferenceRecord>) {
        let conn = Connection::open_in_memory().unwrap();
        create_reference_schema(&conn).unwrap();
        let records = reference_k1_to_k100();
        insert_reference_records(&conn, &records).unwrap();
        (conn, records)
    }

    fn run(reconciler: &dyn Reconciler, conn: &Connection, sample: &IncomingSample) -> (usize, Vec<StagingRow>) {
        let mut staging = StagingTable::create(conn, StagingScope::Temporary).unwrap();
        staging.load(sample.keys(), LoadStrategy::Bulk).unwrap();
        let annotated = reconciler
            .match_and_annotate(&staging, &ReferenceHandle::default())
            .unwrap();
        let rows = reconciler.extract_matched(&staging).unwrap();
        staging.dispose().unwrap();
        (annotated, rows)
    }

    #[test]
    fn test_join_update_scenario() {
        let (conn, _) = setup();
        let sample: IncomingSample = ["K5", "K150", "K10"].into_iter().collect();

        let (annotated, rows) = run(&JoinUpdate, &conn, &sample);

        assert_eq!(annotated, 2);
        assert_eq!(rows, vec![StagingRow::matched("K5", 5), StagingRow::matched("K10", 10)]);
    }

    #[test]
    fn test_strategies_agree_with_oracle() {
        let (conn, records) = setup();
        let sample: IncomingSample = ["K100", "X1", "K1", "K42", "K42", "K101"]
            .into_iter()
            .collect();
        let expected = expected_matches(&records, &sample);

        for kind in [ReconcilerKind::JoinUpdate, ReconcilerKind::CorrelatedUpdate] {
            let reconciler = kind.build();
            let (annotated, rows) = run(reconciler.as_ref(), &conn, &sample);

            assert_eq!(annotated, 4, "{}", reconciler.name());
            assert_eq!(rows, expected, "{}", reconciler.name());
        }
    }

    #[test]
    fn test_unmatched_rows_keep_null_identity() {
        let (conn, _) = setup();
        let mut staging = StagingTable::create(&conn, StagingScope::Persistent).unwrap();
        staging
            .load(&["K1".to_string(), "nope".to_string()], LoadStrategy::RowWise)
            .unwrap();

        JoinUpdate
            .match_and_annotate(&staging, &ReferenceHandle::default())
            .unwrap();

        assert_eq!(
            staging.snapshot().unwrap(),
            vec![StagingRow::matched("K1", 1), StagingRow::unmatched("nope")]
        );
        staging.dispose().unwrap();
    }

    #[test]
    fn test_missing_reference_relation_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let staging = StagingTable::create(&conn, StagingScope::Temporary).unwrap();

        let result = JoinUpdate.match_and_annotate(&staging, &ReferenceHandle::new("no_such_table"));
        assert!(result.is_err());
    }

    #[test]
    fn test_oracle_preserves_sample_order_and_repeats() {
        let records = reference_k1_to_k100();
        let sample: IncomingSample = ["K3", "K2", "K3"].into_iter().collect();

        assert_eq!(
            expected_matches(&records, &sample),
            vec![
                StagingRow::matched("K3", 3),
                StagingRow::matched("K2", 2),
                StagingRow::matched("K3", 3),
            ]
        );
    }
}
