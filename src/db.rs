use anyhow::Context as _;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub const REFERENCE_TABLE: &str = "reference_records";
pub const INCOMING_TABLE: &str = "incoming_flow";

/// Reference record - the data incoming keys are reconciled against
/// Never mutated by the harness once provisioned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Stable numeric identity (primary key)
    pub id: i64,

    /// Natural key, unique across the reference set
    pub business_key: String,

    pub inserted_at: DateTime<Utc>,

    pub amount: f64,

    pub notes: Option<String>,
}

impl ReferenceRecord {
    pub fn new(id: i64, business_key: impl Into<String>) -> Self {
        ReferenceRecord {
            id,
            business_key: business_key.into(),
            inserted_at: Utc::now(),
            amount: 0.0,
            notes: None,
        }
    }
}

/// Ordered business keys arriving for reconciliation
/// The same sample is reused by every trial of a run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncomingSample {
    keys: Vec<String>,
}

impl IncomingSample {
    pub fn new(keys: Vec<String>) -> Self {
        IncomingSample { keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// SHA-256 over the ordered keys, proves two runs used the same sample
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for key in &self.keys {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

impl<S: Into<String>> FromIterator<S> for IncomingSample {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        IncomingSample::new(iter.into_iter().map(Into::into).collect())
    }
}

/// One row of the staging relation; reference_id stays None until matched
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StagingRow {
    pub business_key: String,
    pub reference_id: Option<i64>,
}

impl StagingRow {
    pub fn unmatched(business_key: impl Into<String>) -> Self {
        StagingRow {
            business_key: business_key.into(),
            reference_id: None,
        }
    }

    pub fn matched(business_key: impl Into<String>, reference_id: i64) -> Self {
        StagingRow {
            business_key: business_key.into(),
            reference_id: Some(reference_id),
        }
    }
}

/// Read-only handle to the provisioned reference relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceHandle {
    table: String,
}

impl ReferenceHandle {
    pub fn new(table: impl Into<String>) -> Self {
        ReferenceHandle {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn count(&self, conn: &Connection) -> rusqlite::Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })
    }
}

impl Default for ReferenceHandle {
    fn default() -> Self {
        ReferenceHandle::new(REFERENCE_TABLE)
    }
}

/// Open a benchmark database; `:memory:` gives a private in-memory store
pub fn open_database(database: &str) -> anyhow::Result<Connection> {
    if database == ":memory:" {
        return Ok(Connection::open_in_memory()?);
    }

    let conn = Connection::open(Path::new(database))
        .with_context(|| format!("Failed to open database {}", database))?;

    // WAL keeps row-wise autocommit inserts from fsyncing every statement
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    Ok(conn)
}

pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            schema
        ),
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ============================================================================
// Reference schema
// ============================================================================

/// Create the reference relation and its business-key index
/// Fails if the relation is already there (left over from an earlier run)
pub fn create_reference_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE {} (
                id INTEGER PRIMARY KEY,
                business_key TEXT NOT NULL,
                inserted_at TEXT NOT NULL,
                amount REAL NOT NULL,
                notes TEXT
            )",
            REFERENCE_TABLE
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX idx_{0}_business_key ON {0}(business_key)",
            REFERENCE_TABLE
        ),
        [],
    )?;

    Ok(())
}

/// Insert reference records in one transaction with a cached statement
pub fn insert_reference_records(
    conn: &Connection,
    records: &[ReferenceRecord],
) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO {} (id, business_key, inserted_at, amount, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            REFERENCE_TABLE
        ))?;

        for record in records {
            stmt.execute(params![
                record.id,
                record.business_key,
                record.inserted_at.to_rfc3339(),
                record.amount,
                record.notes,
            ])?;
        }
    }
    tx.commit()?;

    Ok(records.len())
}

pub fn get_reference_records(conn: &Connection) -> rusqlite::Result<Vec<ReferenceRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, business_key, inserted_at, amount, notes FROM {} ORDER BY id",
        REFERENCE_TABLE
    ))?;

    let records = stmt
        .query_map([], |row| {
            let inserted_at: String = row.get(2)?;
            let inserted_at = DateTime::parse_from_rfc3339(&inserted_at)
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?
                .with_timezone(&Utc);

            Ok(ReferenceRecord {
                id: row.get(0)?,
                business_key: row.get(1)?,
                inserted_at,
                amount: row.get(3)?,
                notes: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

// ============================================================================
// Incoming flow
// ============================================================================

pub fn create_incoming_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE {} (business_key TEXT NOT NULL)",
            INCOMING_TABLE
        ),
        [],
    )?;
    Ok(())
}

pub fn insert_incoming_keys(conn: &Connection, keys: &[String]) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO {} (business_key) VALUES (?1)",
            INCOMING_TABLE
        ))?;
        for key in keys {
            stmt.execute([key])?;
        }
    }
    tx.commit()?;

    Ok(keys.len())
}

/// Read the incoming flow back in insertion order
pub fn load_incoming_sample(conn: &Connection) -> rusqlite::Result<IncomingSample> {
    let mut stmt = conn.prepare(&format!(
        "SELECT business_key FROM {} ORDER BY rowid",
        INCOMING_TABLE
    ))?;

    let keys = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(IncomingSample::new(keys))
}

/// Drop reference and incoming relations (test data teardown)
pub fn drop_test_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(&format!("DROP TABLE IF EXISTS {}", INCOMING_TABLE), [])?;
    conn.execute(&format!("DROP TABLE IF EXISTS {}", REFERENCE_TABLE), [])?;
    Ok(())
}
