// 📥 Staging Store Adapter
//
// One disposable relation per trial, shaped (business_key TEXT, reference_id INTEGER NULL).
//
//   create(scope) → [build_index()] → load(keys) → match (see reconcile.rs)
//                 → extract_matched() → dispose()
//
// Scope maps onto SQLite schemas: Temporary = `temp` (dies with the
// connection), Persistent = `main` (must be dropped explicitly).
// dispose() reports release failures; Drop only covers the early-exit paths
// that never reach dispose() and logs what it could not drop.

use crate::config::{LoadStrategy, StagingScope};
use crate::db::{table_exists, StagingRow};
use crate::error::{BenchError, ReleaseError, Result};
use rusqlite::Connection;
use tracing::{debug, warn};

pub const STAGING_TABLE: &str = "staging_keys";
pub const STAGING_INDEX: &str = "ix_staging_keys_business_key";

/// True if a staging relation is present in the given scope
pub fn staging_exists(conn: &Connection, scope: StagingScope) -> rusqlite::Result<bool> {
    table_exists(conn, scope.schema(), STAGING_TABLE)
}

pub struct StagingTable<'c> {
    conn: &'c Connection,
    scope: StagingScope,
    indexed: bool,
    loaded: bool,
    released: bool,
}

impl<'c> StagingTable<'c> {
    /// Allocate a fresh, empty staging relation
    ///
    /// Returns `StagingConflict` if one is already present in `scope`; raw
    /// store failures come back as `BenchError::Store`.
    pub fn create(conn: &'c Connection, scope: StagingScope) -> Result<Self> {
        let qualified = qualified_name(scope);

        if staging_exists(conn, scope)? {
            return Err(BenchError::StagingConflict {
                relation: qualified,
                scope,
            });
        }

        let ddl = match scope {
            StagingScope::Temporary => format!(
                "CREATE TEMP TABLE {} (business_key TEXT NOT NULL, reference_id INTEGER)",
                STAGING_TABLE
            ),
            StagingScope::Persistent => format!(
                "CREATE TABLE {} (business_key TEXT NOT NULL, reference_id INTEGER)",
                qualified
            ),
        };
        conn.execute(&ddl, [])?;

        debug!(target: "reconcile_bench::staging", relation = %qualified, "created staging relation");

        Ok(StagingTable {
            conn,
            scope,
            indexed: false,
            loaded: false,
            released: false,
        })
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    pub fn scope(&self) -> StagingScope {
        self.scope
    }

    /// Schema-qualified relation name, e.g. `temp.staging_keys`
    pub fn qualified_name(&self) -> String {
        qualified_name(self.scope)
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Index the business key; no-op when already indexed
    ///
    /// Call before `load` so that the rows are indexed as they arrive.
    pub fn build_index(&mut self) -> rusqlite::Result<()> {
        if self.indexed {
            return Ok(());
        }
        if self.loaded {
            warn!(target: "reconcile_bench::staging", "index built after rows were loaded");
        }

        self.conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {}.{} ON {} (business_key)",
                self.scope.schema(),
                STAGING_INDEX,
                STAGING_TABLE
            ),
            [],
        )?;
        self.indexed = true;
        Ok(())
    }

    /// Insert one unmatched row per key, in key order
    pub fn load(&mut self, keys: &[String], strategy: LoadStrategy) -> rusqlite::Result<usize> {
        let inserted = match strategy {
            LoadStrategy::Bulk => self.load_bulk(keys)?,
            LoadStrategy::RowWise => self.load_row_wise(keys)?,
        };
        self.loaded = true;
        Ok(inserted)
    }

    // Whole key set travels as one JSON array parameter and is expanded
    // server-side by json_each, a single INSERT ... SELECT
    fn load_bulk(&self, keys: &[String]) -> rusqlite::Result<usize> {
        let payload = serde_json::to_string(keys)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        self.conn.execute(
            &format!(
                "INSERT INTO {} (business_key)
                 SELECT value FROM json_each(?1) ORDER BY key",
                self.qualified_name()
            ),
            [payload],
        )
    }

    // Autocommit per statement, no enclosing transaction
    fn load_row_wise(&self, keys: &[String]) -> rusqlite::Result<usize> {
        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO {} (business_key) VALUES (?1)",
            self.qualified_name()
        ))?;

        let mut inserted = 0;
        for key in keys {
            inserted += stmt.execute([key])?;
        }
        Ok(inserted)
    }

    /// Stream matched rows (non-null reference_id) in staging order
    ///
    /// Rows are handed to `visit` as the cursor advances; the result set is
    /// consumed once and cannot be replayed.
    pub fn visit_matched<F>(&self, mut visit: F) -> rusqlite::Result<usize>
    where
        F: FnMut(StagingRow),
    {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT business_key, reference_id FROM {}
             WHERE reference_id IS NOT NULL
             ORDER BY rowid",
            self.qualified_name()
        ))?;

        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            visit(StagingRow {
                business_key: row.get(0)?,
                reference_id: row.get(1)?,
            });
            count += 1;
        }
        Ok(count)
    }

    /// Materialize every matched row
    pub fn extract_matched(&self) -> rusqlite::Result<Vec<StagingRow>> {
        let mut matched = Vec::new();
        self.visit_matched(|row| matched.push(row))?;
        Ok(matched)
    }

    /// Full staging contents, matched or not, in staging order
    pub fn snapshot(&self) -> rusqlite::Result<Vec<StagingRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT business_key, reference_id FROM {} ORDER BY rowid",
            self.qualified_name()
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(StagingRow {
                    business_key: row.get(0)?,
                    reference_id: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Drop the relation; runs once, even if the drop itself fails
    pub fn dispose(mut self) -> std::result::Result<(), ReleaseError> {
        self.release()
    }

    fn release(&mut self) -> std::result::Result<(), ReleaseError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let relation = self.qualified_name();
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS {}", relation), [])
            .map_err(|source| ReleaseError {
                relation: relation.clone(),
                source,
            })?;

        debug!(target: "reconcile_bench::staging", relation = %relation, "released staging relation");
        Ok(())
    }
}

impl Drop for StagingTable<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(target: "reconcile_bench::staging", error = %err, "staging relation leaked");
        }
    }
}

fn qualified_name(scope: StagingScope) -> String {
    format!("{}.{}", scope.schema(), STAGING_TABLE)
}

// ============================================================================
// TESTS
// ============================================================================
