//! SQLite store for reports, sources, reduction strategies and modifications.
//!
//! Each public method opens its own connection so the caller never has to
//! manage connection lifetime. The row-level work lives in `repository`.

use std::path::PathBuf;

use pyo3::prelude::*;
use rusqlite::Connection;
use tracing::info;

use crate::config;
use crate::errors::EmissionsResult;
use crate::models::{ModificationRecord, ReductionStrategyRecord, ReportRecord, SourceRecord};
use crate::store::{repository, schema};

/// `~` and `~/…` resolve against `$HOME`; anything else is returned as is.
fn home_relative(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match std::env::var_os("HOME") {
        Some(home) if rest.is_empty() => PathBuf::from(home),
        Some(home) => PathBuf::from(home).join(rest),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[pyclass]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Open a new SQLite connection to `self.db_path` with foreign keys on.
    fn connect(&self) -> EmissionsResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Connection for the query engines.
    pub fn connect_internal(&self) -> EmissionsResult<Connection> {
        self.connect()
    }

    /// Open (creating directories as needed) a store at `db_path`.
    pub fn open(db_path: PathBuf) -> EmissionsResult<Self> {
        let mut db_path = home_relative(&db_path.to_string_lossy());
        if db_path.is_relative() {
            db_path = std::env::current_dir()?.join(db_path);
        }
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self { db_path })
    }

    pub fn apply_schema(&self) -> EmissionsResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::apply_schema(&conn)?;
        info!(path = %self.db_path.display(), "emissions store ready");
        Ok(())
    }
}

#[pymethods]
impl Database {
    // -----------------------------------------------------------------------
    // Constructor
    // -----------------------------------------------------------------------

    #[new]
    pub fn new(db_path: PathBuf) -> PyResult<Self> {
        Ok(Self::open(db_path)?)
    }

    /// Absolute path of the database file.
    #[getter]
    fn db_path(&self) -> String {
        self.db_path.to_string_lossy().into_owned()
    }

    /// Return a Python ``sqlite3.Connection`` to the database, for callers
    /// that need raw SQL.
    #[pyo3(name = "connect")]
    fn py_connect(&self, py: Python<'_>) -> PyResult<PyObject> {
        let sqlite3 = py.import("sqlite3")?;
        let conn = sqlite3.call_method1("connect", (self.db_path(),))?;
        conn.setattr("row_factory", sqlite3.getattr("Row")?)?;
        conn.call_method1("execute", ("PRAGMA foreign_keys = ON;",))?;
        Ok(conn.unbind())
    }

    // -----------------------------------------------------------------------
    // Schema / meta
    // -----------------------------------------------------------------------

    /// Set WAL mode, create tables and indexes, then run pending migrations.
    pub fn init_schema(&self) -> PyResult<()> {
        Ok(self.apply_schema()?)
    }

    fn schema_version(&self) -> PyResult<i32> {
        let conn = self.connect()?;
        Ok(schema::get_schema_version(&conn))
    }

    /// Current data epoch; changes after every write.
    fn data_epoch(&self) -> PyResult<i64> {
        let conn = self.connect()?;
        Ok(repository::data_epoch(&conn)?)
    }

    fn bump_data_epoch(&self) -> PyResult<i64> {
        let conn = self.connect()?;
        Ok(repository::bump_data_epoch(&conn)?)
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    fn create_report(&self, record: ReportRecord) -> PyResult<i64> {
        let conn = self.connect()?;
        Ok(repository::insert_report(&conn, &record)?)
    }

    fn get_report(&self, report_id: i64) -> PyResult<ReportRecord> {
        let conn = self.connect()?;
        Ok(repository::get_report(&conn, report_id)?)
    }

    fn list_reports(&self) -> PyResult<Vec<ReportRecord>> {
        let conn = self.connect()?;
        Ok(repository::list_reports(&conn)?)
    }

    fn update_report(&self, record: ReportRecord) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::update_report(&conn, &record)?)
    }

    fn delete_report(&self, report_id: i64) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::delete_report(&conn, report_id)?)
    }

    fn link_strategy(&self, report_id: i64, strategy_id: i64) -> PyResult<bool> {
        let conn = self.connect()?;
        Ok(repository::link_strategy(&conn, report_id, strategy_id)?)
    }

    fn unlink_strategy(&self, report_id: i64, strategy_id: i64) -> PyResult<bool> {
        let conn = self.connect()?;
        Ok(repository::unlink_strategy(&conn, report_id, strategy_id)?)
    }

    /// Lifetime-to-date emissions of a report, cached on the report row.
    #[pyo3(signature = (report_id, current_year=None))]
    fn get_total_emissions(&self, report_id: i64, current_year: Option<i32>) -> PyResult<f64> {
        let conn = self.connect()?;
        let year = current_year.unwrap_or_else(config::current_year);
        Ok(repository::cached_total_emissions(&conn, report_id, year)?)
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    fn create_source(&self, record: SourceRecord) -> PyResult<i64> {
        let conn = self.connect()?;
        Ok(repository::insert_source(&conn, &record)?)
    }

    fn get_source(&self, source_id: i64) -> PyResult<SourceRecord> {
        let conn = self.connect()?;
        Ok(repository::get_source(&conn, source_id)?)
    }

    #[pyo3(signature = (report_id=None))]
    fn list_sources(&self, report_id: Option<i64>) -> PyResult<Vec<SourceRecord>> {
        let conn = self.connect()?;
        Ok(repository::list_sources(&conn, report_id)?)
    }

    fn update_source(&self, record: SourceRecord) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::update_source(&conn, &record)?)
    }

    fn delete_source(&self, source_id: i64) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::delete_source(&conn, source_id)?)
    }

    // -----------------------------------------------------------------------
    // Reduction strategies
    // -----------------------------------------------------------------------

    fn create_strategy(&self, record: ReductionStrategyRecord) -> PyResult<i64> {
        let conn = self.connect()?;
        Ok(repository::insert_strategy(&conn, &record)?)
    }

    fn get_strategy(&self, strategy_id: i64) -> PyResult<ReductionStrategyRecord> {
        let conn = self.connect()?;
        Ok(repository::get_strategy(&conn, strategy_id)?)
    }

    fn list_strategies(&self) -> PyResult<Vec<ReductionStrategyRecord>> {
        let conn = self.connect()?;
        Ok(repository::list_strategies(&conn)?)
    }

    fn update_strategy(&self, record: ReductionStrategyRecord) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::update_strategy(&conn, &record)?)
    }

    fn delete_strategy(&self, strategy_id: i64) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::delete_strategy(&conn, strategy_id)?)
    }

    // -----------------------------------------------------------------------
    // Modifications
    // -----------------------------------------------------------------------

    fn create_modification(&self, record: ModificationRecord) -> PyResult<i64> {
        let conn = self.connect()?;
        Ok(repository::insert_modification(&conn, &record)?)
    }

    fn get_modification(&self, modification_id: i64) -> PyResult<ModificationRecord> {
        let conn = self.connect()?;
        Ok(repository::get_modification(&conn, modification_id)?)
    }

    #[pyo3(signature = (source_id=None, strategy_id=None))]
    fn list_modifications(
        &self,
        source_id: Option<i64>,
        strategy_id: Option<i64>,
    ) -> PyResult<Vec<ModificationRecord>> {
        let conn = self.connect()?;
        Ok(repository::list_modifications(&conn, source_id, strategy_id)?)
    }

    fn update_modification(&self, record: ModificationRecord) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::update_modification(&conn, &record)?)
    }

    fn delete_modification(&self, modification_id: i64) -> PyResult<()> {
        let conn = self.connect()?;
        Ok(repository::delete_modification(&conn, modification_id)?)
    }
}

#[cfg(test)]
pub(crate) fn temp_database() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("nested").join("emissions.db")).unwrap();
    db.apply_schema().unwrap();
    (dir, db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EmissionsError;
    use crate::models::fixtures::{report, source};

    #[test]
    fn open_creates_parent_directories() {
        let (dir, db) = temp_database();
        assert!(dir.path().join("nested").is_dir());
        assert!(db.db_path.is_absolute());
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(home_relative("~/x.db"), PathBuf::from(home).join("x.db"));
        }
        assert_eq!(home_relative("plain.db"), PathBuf::from("plain.db"));
        assert_eq!(home_relative("~other/x.db"), PathBuf::from("~other/x.db"));
    }

    #[test]
    fn apply_schema_is_repeatable_on_disk() {
        let (_dir, db) = temp_database();
        db.apply_schema().unwrap();
        let conn = db.connect_internal().unwrap();
        assert_eq!(schema::get_schema_version(&conn), schema::SCHEMA_VERSION);
    }

    #[test]
    fn writes_survive_reconnecting() {
        let (_dir, db) = temp_database();
        let report_id = {
            let conn = db.connect_internal().unwrap();
            let report_id = repository::insert_report(&conn, &report("Annual")).unwrap();
            repository::insert_source(&conn, &source("Fleet", report_id)).unwrap();
            report_id
        };
        let conn = db.connect_internal().unwrap();
        assert_eq!(repository::list_sources(&conn, Some(report_id)).unwrap().len(), 1);
        assert!(matches!(
            repository::get_report(&conn, report_id + 1),
            Err(EmissionsError::NotFound { .. })
        ));
    }
}
