// 🌱 Test Data Provisioner - reference set + incoming sample
//
// Sits outside the measured core: it creates and fills the reference
// relation, builds the incoming sample and drops both afterwards.
// All randomness lives here, in an RNG owned by the provisioner.

use crate::config::{ProvisionConfig, KEY_ALPHABET};
use crate::db::{
    create_incoming_table, create_reference_schema, drop_test_tables, insert_incoming_keys,
    insert_reference_records, load_incoming_sample, IncomingSample, ReferenceHandle,
    ReferenceRecord, INCOMING_TABLE, REFERENCE_TABLE,
};
use crate::error::{BenchError, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{info, warn};

pub trait Provisioner {
    /// Create and fill the reference relation, return it with the sample
    fn provision(&mut self, conn: &Connection) -> Result<(ReferenceHandle, IncomingSample)>;

    /// Remove everything `provision` created
    fn teardown(&mut self, conn: &Connection) -> Result<()>;
}

/// Create and fill both test relations
///
/// A failure after the reference relation exists drops the relations this
/// call created, so a file database is not left half provisioned. Relations
/// that were already present (the conflict case) are left alone.
fn store_test_data(conn: &Connection, records: &[ReferenceRecord], keys: &[String]) -> Result<()> {
    create_reference_schema(conn)
        .map_err(|e| BenchError::provisioning_store("cannot create reference relation", e))?;

    let reference_only = insert_reference_records(conn, records)
        .map_err(|e| BenchError::provisioning_store("cannot load reference records", e))
        .and_then(|_| {
            create_incoming_table(conn)
                .map_err(|e| BenchError::provisioning_store("cannot create incoming flow", e))
        });
    if let Err(err) = reference_only {
        discard(conn, &[REFERENCE_TABLE]);
        return Err(err);
    }
    info!(target: "reconcile_bench::provision", records = records.len(), "reference set loaded");

    if let Err(err) = insert_incoming_keys(conn, keys)
        .map_err(|e| BenchError::provisioning_store("cannot load incoming flow", e))
    {
        discard(conn, &[INCOMING_TABLE, REFERENCE_TABLE]);
        return Err(err);
    }
    Ok(())
}

fn discard(conn: &Connection, tables: &[&str]) {
    for table in tables {
        if let Err(err) = conn.execute(&format!("DROP TABLE IF EXISTS {}", table), []) {
            warn!(target: "reconcile_bench::provision", table = *table, error = %err, "cannot drop partial test data");
        }
    }
}

// ============================================================================
// SYNTHETIC PROVISIONER
// ============================================================================

pub struct SyntheticProvisioner {
    config: ProvisionConfig,
    rng: StdRng,
}

impl SyntheticProvisioner {
    pub fn new(config: ProvisionConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        SyntheticProvisioner { config, rng }
    }

    fn random_string(&mut self, length: usize) -> String {
        (0..length)
            .map(|_| KEY_ALPHABET[self.rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect()
    }

    /// Unique random key not present in `taken`; the key is added to `taken`
    fn fresh_key(&mut self, taken: &mut HashSet<String>) -> String {
        loop {
            let key = self.random_string(self.config.key_length);
            if taken.insert(key.clone()) {
                return key;
            }
        }
    }

    /// Records with identities 1..=reference_size and unique business keys
    pub fn generate_records(&mut self) -> Vec<ReferenceRecord> {
        let inserted_at = Utc::now();
        let mut taken = HashSet::with_capacity(self.config.reference_size);

        (1..=self.config.reference_size)
            .map(|id| {
                let business_key = self.fresh_key(&mut taken);
                let amount = (self.rng.gen::<f64>() * self.config.max_amount * 100.0).floor() / 100.0;
                let notes = self.random_string(self.config.note_length);
                ReferenceRecord {
                    id: id as i64,
                    business_key,
                    inserted_at,
                    amount,
                    notes: Some(notes),
                }
            })
            .collect()
    }

    /// Sample keys: configured windows over reference order, then foreign keys
    pub fn build_sample_keys(&mut self, records: &[ReferenceRecord]) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(self.config.sample_size());

        for window in &self.config.windows {
            let slice = records.get(window.offset..window.end()).ok_or_else(|| {
                BenchError::provisioning(format!(
                    "sample window {}..{} outside reference set of {}",
                    window.offset,
                    window.end(),
                    records.len()
                ))
            })?;
            keys.extend(slice.iter().map(|r| r.business_key.clone()));
        }

        if self.config.foreign_keys > 0 {
            let mut taken: HashSet<String> =
                records.iter().map(|r| r.business_key.clone()).collect();
            for _ in 0..self.config.foreign_keys {
                keys.push(self.fresh_key(&mut taken));
            }
        }

        Ok(keys)
    }

    /// Write generated data into the store; shared by `provision`
    fn populate(&mut self, conn: &Connection) -> Result<IncomingSample> {
        let records = self.generate_records();
        let keys = self.build_sample_keys(&records)?;

        store_test_data(conn, &records, &keys)?;

        let sample = match load_incoming_sample(conn) {
            Ok(sample) => sample,
            Err(e) => {
                discard(conn, &[INCOMING_TABLE, REFERENCE_TABLE]);
                return Err(BenchError::provisioning_store("cannot read incoming flow", e));
            }
        };
        info!(target: "reconcile_bench::provision", sample = sample.len(), "incoming flow loaded");

        Ok(sample)
    }
}

impl Provisioner for SyntheticProvisioner {
    fn provision(&mut self, conn: &Connection) -> Result<(ReferenceHandle, IncomingSample)> {
        self.config.validate().map_err(|e| BenchError::provisioning(e.to_string()))?;
        let sample = self.populate(conn)?;
        Ok((ReferenceHandle::default(), sample))
    }

    fn teardown(&mut self, conn: &Connection) -> Result<()> {
        drop_test_tables(conn)?;
        info!(target: "reconcile_bench::provision", "test data dropped");
        Ok(())
    }
}

// ============================================================================
// FIXED PROVISIONER
// ============================================================================

/// Explicit records and sample, for tests and hand-made datasets
pub struct FixedProvisioner {
    records: Vec<ReferenceRecord>,
    sample: Vec<String>,
}

impl FixedProvisioner {
    pub fn new(records: Vec<ReferenceRecord>, sample: Vec<String>) -> Self {
        FixedProvisioner { records, sample }
    }

    fn check_unique_keys(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.records.len());
        for record in &self.records {
            if !seen.insert(record.business_key.as_str()) {
                return Err(BenchError::provisioning(format!(
                    "duplicate business key {} in reference set",
                    record.business_key
                )));
            }
        }
        Ok(())
    }
}

impl Provisioner for FixedProvisioner {
    fn provision(&mut self, conn: &Connection) -> Result<(ReferenceHandle, IncomingSample)> {
        self.check_unique_keys()?;
        store_test_data(conn, &self.records, &self.sample)?;

        Ok((ReferenceHandle::default(), IncomingSample::new(self.sample.clone())))
    }

    fn teardown(&mut self, conn: &Connection) -> Result<()> {
        drop_test_tables(conn)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleWindow;
    use crate::db::{get_reference_records, table_exists, REFERENCE_TABLE};

    fn small_config(seed: u64) -> ProvisionConfig {
        ProvisionConfig {
            reference_size: 200,
            key_length: 8,
            note_length: 16,
            max_amount: 1_000.0,
            seed: Some(seed),
            foreign_keys: 5,
            windows: vec![SampleWindow::new(10, 30), SampleWindow::new(150, 20)],
        }
    }

    #[test]
    fn test_synthetic_provisioning() {
        let conn = Connection::open_in_memory().unwrap();
        let mut provisioner = SyntheticProvisioner::new(small_config(7));

        let (reference, sample) = provisioner.provision(&conn).unwrap();

        assert_eq!(reference.count(&conn).unwrap(), 200);
        assert_eq!(sample.len(), 55);

        let records = get_reference_records(&conn).unwrap();
        let keys: HashSet<&str> = records.iter().map(|r| r.business_key.as_str()).collect();
        assert_eq!(keys.len(), 200, "business keys must be unique");
        assert!(records.iter().all(|r| r.business_key.len() == 8));
        assert!(records.iter().all(|r| r.amount >= 0.0 && r.amount < 1_000.0));
        assert_eq!(records[0].id, 1);

        // windows follow identity order, foreign keys are absent from the reference
        assert_eq!(sample.keys()[0], records[10].business_key);
        assert_eq!(sample.keys()[30], records[150].business_key);
        assert!(sample.keys()[50..].iter().all(|k| !keys.contains(k.as_str())));

        provisioner.teardown(&conn).unwrap();
        assert!(!table_exists(&conn, "main", REFERENCE_TABLE).unwrap());
    }

    #[test]
    fn test_same_seed_same_data() {
        let first = SyntheticProvisioner::new(small_config(42)).generate_records();
        let second = SyntheticProvisioner::new(small_config(42)).generate_records();

        let keys = |records: &[ReferenceRecord]| -> Vec<String> {
            records.iter().map(|r| r.business_key.clone()).collect()
        };
        assert_eq!(keys(&first), keys(&second));
    }

    #[test]
    fn test_invalid_window_is_provisioning_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mut config = small_config(1);
        config.windows = vec![SampleWindow::new(190, 20)];

        let err = SyntheticProvisioner::new(config).provision(&conn).unwrap_err();

        assert!(matches!(err, BenchError::Provisioning { .. }));
        assert!(!table_exists(&conn, "main", REFERENCE_TABLE).unwrap());
    }

    #[test]
    fn test_leftover_reference_is_provisioning_error() {
        let conn = Connection::open_in_memory().unwrap();
        create_reference_schema(&conn).unwrap();

        let err = SyntheticProvisioner::new(small_config(1))
            .provision(&conn)
            .unwrap_err();

        assert!(matches!(err, BenchError::Provisioning { source: Some(_), .. }));
    }

    #[test]
    fn test_exhausted_key_space_fails_before_store() {
        let conn = Connection::open_in_memory().unwrap();
        let config = ProvisionConfig {
            reference_size: 37,
            key_length: 1,
            windows: vec![],
            ..small_config(1)
        };

        let err = SyntheticProvisioner::new(config).provision(&conn).unwrap_err();

        assert!(matches!(err, BenchError::Provisioning { source: None, .. }));
        assert!(!table_exists(&conn, "main", REFERENCE_TABLE).unwrap());
    }

    #[test]
    fn test_partial_provisioning_is_rolled_back() {
        let conn = Connection::open_in_memory().unwrap();
        // leftover incoming flow makes the second CREATE fail
        create_incoming_table(&conn).unwrap();
        insert_incoming_keys(&conn, &["LEFTOVER".to_string()]).unwrap();

        let err = SyntheticProvisioner::new(small_config(1))
            .provision(&conn)
            .unwrap_err();
        assert!(matches!(err, BenchError::Provisioning { source: Some(_), .. }));

        let err = FixedProvisioner::new(vec![ReferenceRecord::new(1, "K1")], vec!["K1".into()])
            .provision(&conn)
            .unwrap_err();
        assert!(matches!(err, BenchError::Provisioning { source: Some(_), .. }));

        // our reference relation is gone, the leftover is untouched
        assert!(!table_exists(&conn, "main", REFERENCE_TABLE).unwrap());
        assert_eq!(load_incoming_sample(&conn).unwrap().keys(), ["LEFTOVER".to_string()]);

        // a clean store provisions fine afterwards
        drop_test_tables(&conn).unwrap();
        assert!(SyntheticProvisioner::new(small_config(1)).provision(&conn).is_ok());
    }

    #[test]
    fn test_fixed_provisioner_rejects_duplicate_keys() {
        let conn = Connection::open_in_memory().unwrap();
        let records = vec![ReferenceRecord::new(1, "K1"), ReferenceRecord::new(2, "K1")];

        let err = FixedProvisioner::new(records, vec![]).provision(&conn).unwrap_err();

        assert!(matches!(err, BenchError::Provisioning { .. }));
    }
}
