//! SQLite schema DDL and migration framework.

use rusqlite::Connection;
use tracing::info;

use crate::errors::EmissionsResult;

/// Version written to `store_meta` once every migration step has run.
pub const SCHEMA_VERSION: i32 = 2;

/// Tables and indexes, all `IF NOT EXISTS` so replaying them is harmless.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        date TEXT NOT NULL,
        total_emissions_cache REAL,
        total_emissions_cache_year INTEGER,
        UNIQUE(name, date)
    );",
    "CREATE TABLE IF NOT EXISTS reduction_strategies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS report_strategies (
        report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
        strategy_id INTEGER NOT NULL REFERENCES reduction_strategies(id) ON DELETE CASCADE,
        PRIMARY KEY(report_id, strategy_id)
    );",
    "CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
        category TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        method TEXT NOT NULL,
        emission_factor REAL NOT NULL,
        value REAL NOT NULL,
        value_unit TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        lifetime INTEGER NOT NULL,
        acquisition_year INTEGER NOT NULL,
        uncertainty REAL NOT NULL DEFAULT 0.0,
        year INTEGER,
        UNIQUE(name, report_id, year)
    );",
    "CREATE TABLE IF NOT EXISTS modifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        reduction_strategy_id INTEGER NOT NULL REFERENCES reduction_strategies(id) ON DELETE CASCADE,
        source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        modification_type TEXT NOT NULL,
        value REAL NOT NULL,
        apply_order INTEGER NOT NULL,
        start_year INTEGER NOT NULL,
        end_year INTEGER,
        is_progressive INTEGER NOT NULL DEFAULT 0,
        target_value REAL,
        calculation_year INTEGER,
        UNIQUE(reduction_strategy_id, source_id, start_year, apply_order)
    );",
    "CREATE INDEX IF NOT EXISTS idx_sources_report ON sources(report_id);",
    "CREATE INDEX IF NOT EXISTS idx_modifications_source ON modifications(source_id);",
    "CREATE INDEX IF NOT EXISTS idx_modifications_strategy ON modifications(reduction_strategy_id);",
    "CREATE INDEX IF NOT EXISTS idx_report_strategies_strategy ON report_strategies(strategy_id);",
    "CREATE INDEX IF NOT EXISTS idx_modifications_source_sequence \
     ON modifications(source_id, start_year, apply_order);",
];

// ─── Migrations ─────────────────────────────────────────────────────────────

type MigrationStep = fn(&Connection) -> EmissionsResult<()>;

/// `MIGRATIONS[i]` upgrades a database from version `i` to `i + 1`.
const MIGRATIONS: [MigrationStep; SCHEMA_VERSION as usize] = [initial_layout, sequence_and_epoch];

/// Bring `conn` from its stored version up to [`SCHEMA_VERSION`].
///
/// Every step runs in its own savepoint and is logged to
/// `migration_history`; a failing step is rolled back alone and recorded as
/// `failed` before the error is returned.
pub fn migrate_schema(conn: &Connection) -> EmissionsResult<()> {
    let stored = get_schema_version(conn);
    for (from, step) in MIGRATIONS.iter().enumerate().skip(stored.max(0) as usize) {
        let from = from as i32;
        let to = from + 1;
        conn.execute_batch("SAVEPOINT emissions_migration;")?;
        let outcome = step(conn)
            .and_then(|()| set_schema_version(conn, to))
            .and_then(|()| log_migration(conn, from, to, None));
        match outcome {
            Ok(()) => {
                conn.execute_batch("RELEASE SAVEPOINT emissions_migration;")?;
                info!(from, to, "schema migrated");
            }
            Err(e) => {
                conn.execute_batch(
                    "ROLLBACK TO SAVEPOINT emissions_migration; \
                     RELEASE SAVEPOINT emissions_migration;",
                )?;
                log_migration(conn, from, to, Some(&e.to_string()))?;
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Apply DDL and pending migrations on `conn`.
pub fn apply_schema(conn: &Connection) -> EmissionsResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    migrate_schema(conn)
}

/// Stored schema version, `0` for a database that has never been migrated.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT CAST(value AS INTEGER) FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get::<_, i32>(0),
    )
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> EmissionsResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO store_meta(key, value) VALUES('schema_version', ?1);",
        [version.to_string()],
    )?;
    Ok(())
}

fn log_migration(conn: &Connection, from: i32, to: i32, error: Option<&str>) -> EmissionsResult<()> {
    let status = if error.is_some() { "failed" } else { "success" };
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from, to, status, error],
    )?;
    Ok(())
}

/// v1: the tables created by [`SCHEMA_STATEMENTS`].
fn initial_layout(_conn: &Connection) -> EmissionsResult<()> {
    Ok(())
}

/// v2: composite index matching the `(start_year, order)` fold order, and
/// the data epoch used to version cached projections.
fn sequence_and_epoch(conn: &Connection) -> EmissionsResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_modifications_source_sequence \
             ON modifications(source_id, start_year, apply_order); \
         INSERT OR IGNORE INTO store_meta(key, value) VALUES('data_epoch', '1');",
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn open_test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    apply_schema(&conn).unwrap();
    conn
}
