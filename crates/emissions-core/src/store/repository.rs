//! Row-level access to reports, sources, strategies and modifications.
//!
//! Every function takes a borrowed `Connection` so the same code serves the
//! `Database` pyclass, the query engines and in-memory tests. Public writes
//! open their own transaction; the `*_in` helpers assume the caller holds one.

use std::collections::HashSet;

use rusqlite::{params, Connection, ErrorCode, Row};
use tracing::debug;

use crate::errors::{EmissionsError, EmissionsResult};
use crate::models::{ModificationRecord, ReductionStrategyRecord, ReportRecord, SourceRecord};
use crate::projection::{
    report_lifetime_to_date_total, select_modifications, Modification, Source, SourceSnapshot,
};

const SOURCE_COLUMNS: &str = "id, name, report_id, category, description, method, \
     emission_factor, value, value_unit, quantity, lifetime, acquisition_year, uncertainty, year";

const MODIFICATION_COLUMNS: &str = "id, reduction_strategy_id, source_id, modification_type, \
     value, apply_order, start_year, end_year, is_progressive, target_value, calculation_year";

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<SourceRecord> {
    Ok(SourceRecord {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        report_id: row.get(2)?,
        category: row.get(3)?,
        description: row.get(4)?,
        method: row.get(5)?,
        emission_factor: row.get(6)?,
        value: row.get(7)?,
        value_unit: row.get(8)?,
        quantity: row.get(9)?,
        lifetime: row.get(10)?,
        acquisition_year: row.get(11)?,
        uncertainty: row.get(12)?,
        year: row.get(13)?,
    })
}

fn modification_from_row(row: &Row<'_>) -> rusqlite::Result<ModificationRecord> {
    Ok(ModificationRecord {
        id: Some(row.get(0)?),
        reduction_strategy_id: row.get(1)?,
        source_id: row.get(2)?,
        modification_type: row.get(3)?,
        value: row.get(4)?,
        order: Some(row.get(5)?),
        start_year: row.get(6)?,
        end_year: row.get(7)?,
        is_progressive: row.get::<_, i64>(8)? != 0,
        target_value: row.get(9)?,
        calculation_year: row.get(10)?,
    })
}

/// Turn a UNIQUE violation into a validation error; pass everything else on.
fn duplicate_as_validation(err: rusqlite::Error, what: &str) -> EmissionsError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            EmissionsError::Validation(format!("{what} already exists"))
        }
        _ => err.into(),
    }
}

fn exists(conn: &Connection, table: &str, id: i64) -> EmissionsResult<bool> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?1 LIMIT 1;");
    match conn.query_row(&sql, params![id], |_| Ok(())) {
        Ok(()) => Ok(true),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn require(conn: &Connection, table: &str, entity: &'static str, id: i64) -> EmissionsResult<()> {
    if exists(conn, table, id)? {
        Ok(())
    } else {
        Err(EmissionsError::not_found(entity, id))
    }
}

fn require_id(id: Option<i64>, entity: &str) -> EmissionsResult<i64> {
    id.ok_or_else(|| EmissionsError::Validation(format!("{entity} has no id")))
}

// ---------------------------------------------------------------------------
// Data epoch
// ---------------------------------------------------------------------------

/// Monotonic counter bumped by every write. Result caches key on it.
pub fn data_epoch(conn: &Connection) -> EmissionsResult<i64> {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'data_epoch';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => Ok(v.parse::<i64>().unwrap_or(1).max(1)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(1),
        Err(e) => Err(e.into()),
    }
}

fn bump_data_epoch_in(conn: &Connection) -> EmissionsResult<i64> {
    let next_epoch = data_epoch(conn)? + 1;
    conn.execute(
        "INSERT INTO store_meta(key, value) VALUES('data_epoch', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![next_epoch.to_string()],
    )?;
    Ok(next_epoch)
}

/// Increment the data epoch and return the new value.
pub fn bump_data_epoch(conn: &Connection) -> EmissionsResult<i64> {
    let tx = conn.unchecked_transaction()?;
    let epoch = bump_data_epoch_in(&tx)?;
    tx.commit()?;
    Ok(epoch)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

fn report_strategy_ids_in(conn: &Connection, report_id: i64) -> EmissionsResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT strategy_id FROM report_strategies WHERE report_id = ?1 ORDER BY strategy_id;",
    )?;
    let ids = stmt
        .query_map(params![report_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn replace_report_strategies_in(
    conn: &Connection,
    report_id: i64,
    strategy_ids: &[i64],
) -> EmissionsResult<()> {
    for &strategy_id in strategy_ids {
        require(conn, "reduction_strategies", "ReductionStrategy", strategy_id)?;
    }
    conn.execute(
        "DELETE FROM report_strategies WHERE report_id = ?1;",
        params![report_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO report_strategies(report_id, strategy_id) VALUES (?1, ?2);",
    )?;
    for strategy_id in strategy_ids {
        stmt.execute(params![report_id, strategy_id])?;
    }
    Ok(())
}

fn invalidate_report_total_in(conn: &Connection, report_id: i64) -> EmissionsResult<()> {
    conn.execute(
        "UPDATE reports SET total_emissions_cache = NULL, total_emissions_cache_year = NULL \
         WHERE id = ?1;",
        params![report_id],
    )?;
    debug!(report_id, "report total cache invalidated");
    Ok(())
}

pub fn insert_report(conn: &Connection, record: &ReportRecord) -> EmissionsResult<i64> {
    record.validate()?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO reports(name, date) VALUES (?1, ?2);",
        params![record.name, record.date],
    )
    .map_err(|e| duplicate_as_validation(e, "report with this name and date"))?;
    let report_id = tx.last_insert_rowid();
    replace_report_strategies_in(&tx, report_id, &record.strategy_ids)?;
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    debug!(report_id, name = %record.name, "report created");
    Ok(report_id)
}

pub fn get_report(conn: &Connection, report_id: i64) -> EmissionsResult<ReportRecord> {
    let result = conn.query_row(
        "SELECT id, name, date, total_emissions_cache FROM reports WHERE id = ?1;",
        params![report_id],
        |row| {
            Ok(ReportRecord {
                id: Some(row.get(0)?),
                name: row.get(1)?,
                date: row.get(2)?,
                total_emissions_cache: row.get(3)?,
                strategy_ids: Vec::new(),
            })
        },
    );
    let mut record = match result {
        Ok(r) => r,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return Err(EmissionsError::not_found("Report", report_id))
        }
        Err(e) => return Err(e.into()),
    };
    record.strategy_ids = report_strategy_ids_in(conn, report_id)?;
    Ok(record)
}

/// All reports, newest date first.
pub fn list_reports(conn: &Connection) -> EmissionsResult<Vec<ReportRecord>> {
    let mut stmt = conn.prepare("SELECT id FROM reports ORDER BY date DESC, id ASC;")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    ids.into_iter().map(|id| get_report(conn, id)).collect()
}

/// Update name, date and linked strategies. The cached total is untouched
/// since none of these change the baseline.
pub fn update_report(conn: &Connection, record: &ReportRecord) -> EmissionsResult<()> {
    let report_id = require_id(record.id, "Report")?;
    record.validate()?;
    let tx = conn.unchecked_transaction()?;
    let changed = tx
        .execute(
            "UPDATE reports SET name = ?1, date = ?2 WHERE id = ?3;",
            params![record.name, record.date, report_id],
        )
        .map_err(|e| duplicate_as_validation(e, "report with this name and date"))?;
    if changed == 0 {
        return Err(EmissionsError::not_found("Report", report_id));
    }
    replace_report_strategies_in(&tx, report_id, &record.strategy_ids)?;
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    Ok(())
}

/// Delete a report together with its sources and their modifications.
pub fn delete_report(conn: &Connection, report_id: i64) -> EmissionsResult<()> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute("DELETE FROM reports WHERE id = ?1;", params![report_id])?;
    if changed == 0 {
        return Err(EmissionsError::not_found("Report", report_id));
    }
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    debug!(report_id, "report deleted");
    Ok(())
}

/// Attach a strategy to a report. Returns `false` when it was already linked.
pub fn link_strategy(conn: &Connection, report_id: i64, strategy_id: i64) -> EmissionsResult<bool> {
    require(conn, "reports", "Report", report_id)?;
    require(conn, "reduction_strategies", "ReductionStrategy", strategy_id)?;
    let tx = conn.unchecked_transaction()?;
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO report_strategies(report_id, strategy_id) VALUES (?1, ?2);",
        params![report_id, strategy_id],
    )?;
    if inserted > 0 {
        bump_data_epoch_in(&tx)?;
    }
    tx.commit()?;
    Ok(inserted > 0)
}

/// Detach a strategy from a report. Returns `false` when it was not linked.
pub fn unlink_strategy(conn: &Connection, report_id: i64, strategy_id: i64) -> EmissionsResult<bool> {
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute(
        "DELETE FROM report_strategies WHERE report_id = ?1 AND strategy_id = ?2;",
        params![report_id, strategy_id],
    )?;
    if removed > 0 {
        bump_data_epoch_in(&tx)?;
    }
    tx.commit()?;
    Ok(removed > 0)
}

pub fn report_strategy_ids(conn: &Connection, report_id: i64) -> EmissionsResult<Vec<i64>> {
    require(conn, "reports", "Report", report_id)?;
    report_strategy_ids_in(conn, report_id)
}

/// Ids from `strategy_ids` that name no stored strategy, in input order.
pub fn missing_strategy_ids(conn: &Connection, strategy_ids: &[i64]) -> EmissionsResult<Vec<i64>> {
    let mut missing = Vec::new();
    for &id in strategy_ids {
        if !exists(conn, "reduction_strategies", id)? && !missing.contains(&id) {
            missing.push(id);
        }
    }
    Ok(missing)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

pub fn insert_source(conn: &Connection, record: &SourceRecord) -> EmissionsResult<i64> {
    record.validate()?;
    require(conn, "reports", "Report", record.report_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO sources (name, report_id, category, description, method, emission_factor, \
             value, value_unit, quantity, lifetime, acquisition_year, uncertainty, year) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
        params![
            record.name,
            record.report_id,
            record.category,
            record.description,
            record.method,
            record.emission_factor,
            record.value,
            record.value_unit,
            record.quantity,
            record.lifetime,
            record.acquisition_year,
            record.uncertainty,
            record.year,
        ],
    )
    .map_err(|e| duplicate_as_validation(e, "source with this name, report and year"))?;
    let source_id = tx.last_insert_rowid();
    invalidate_report_total_in(&tx, record.report_id)?;
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    debug!(source_id, report_id = record.report_id, "source created");
    Ok(source_id)
}

pub fn get_source(conn: &Connection, source_id: i64) -> EmissionsResult<SourceRecord> {
    let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1;");
    match conn.query_row(&sql, params![source_id], source_from_row) {
        Ok(r) => Ok(r),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(EmissionsError::not_found("Source", source_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// Sources of one report, or of all reports when `report_id` is `None`.
pub fn list_sources(conn: &Connection, report_id: Option<i64>) -> EmissionsResult<Vec<SourceRecord>> {
    let records = match report_id {
        Some(report_id) => {
            let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE report_id = ?1 ORDER BY id;");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![report_id], source_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id;");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], source_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(records)
}

/// Overwrite a source. Both the old and the new report lose their cached total.
pub fn update_source(conn: &Connection, record: &SourceRecord) -> EmissionsResult<()> {
    let source_id = require_id(record.id, "Source")?;
    record.validate()?;
    let previous = get_source(conn, source_id)?;
    require(conn, "reports", "Report", record.report_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE sources SET name = ?1, report_id = ?2, category = ?3, description = ?4, \
             method = ?5, emission_factor = ?6, value = ?7, value_unit = ?8, quantity = ?9, \
             lifetime = ?10, acquisition_year = ?11, uncertainty = ?12, year = ?13 \
         WHERE id = ?14;",
        params![
            record.name,
            record.report_id,
            record.category,
            record.description,
            record.method,
            record.emission_factor,
            record.value,
            record.value_unit,
            record.quantity,
            record.lifetime,
            record.acquisition_year,
            record.uncertainty,
            record.year,
            source_id,
        ],
    )
    .map_err(|e| duplicate_as_validation(e, "source with this name, report and year"))?;
    invalidate_report_total_in(&tx, previous.report_id)?;
    if previous.report_id != record.report_id {
        invalidate_report_total_in(&tx, record.report_id)?;
    }
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    Ok(())
}

pub fn delete_source(conn: &Connection, source_id: i64) -> EmissionsResult<()> {
    let previous = get_source(conn, source_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM sources WHERE id = ?1;", params![source_id])?;
    invalidate_report_total_in(&tx, previous.report_id)?;
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    debug!(source_id, report_id = previous.report_id, "source deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Reduction strategies
// ---------------------------------------------------------------------------

fn strategy_from_row(row: &Row<'_>) -> rusqlite::Result<ReductionStrategyRecord> {
    Ok(ReductionStrategyRecord {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

pub fn insert_strategy(conn: &Connection, record: &ReductionStrategyRecord) -> EmissionsResult<i64> {
    record.validate()?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO reduction_strategies(name) VALUES (?1);",
        params![record.name],
    )?;
    let strategy_id = tx.last_insert_rowid();
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    Ok(strategy_id)
}

pub fn get_strategy(conn: &Connection, strategy_id: i64) -> EmissionsResult<ReductionStrategyRecord> {
    match conn.query_row(
        "SELECT id, name, created_at FROM reduction_strategies WHERE id = ?1;",
        params![strategy_id],
        strategy_from_row,
    ) {
        Ok(r) => Ok(r),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(EmissionsError::not_found("ReductionStrategy", strategy_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// All strategies, most recently created first.
pub fn list_strategies(conn: &Connection) -> EmissionsResult<Vec<ReductionStrategyRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at FROM reduction_strategies ORDER BY created_at DESC, id DESC;",
    )?;
    let rows = stmt
        .query_map([], strategy_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_strategy(conn: &Connection, record: &ReductionStrategyRecord) -> EmissionsResult<()> {
    let strategy_id = require_id(record.id, "ReductionStrategy")?;
    record.validate()?;
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE reduction_strategies SET name = ?1 WHERE id = ?2;",
        params![record.name, strategy_id],
    )?;
    if changed == 0 {
        return Err(EmissionsError::not_found("ReductionStrategy", strategy_id));
    }
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    Ok(())
}

/// Delete a strategy, its modifications and its report links.
pub fn delete_strategy(conn: &Connection, strategy_id: i64) -> EmissionsResult<()> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "DELETE FROM reduction_strategies WHERE id = ?1;",
        params![strategy_id],
    )?;
    if changed == 0 {
        return Err(EmissionsError::not_found("ReductionStrategy", strategy_id));
    }
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    debug!(strategy_id, "strategy deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Modifications
// ---------------------------------------------------------------------------

fn next_order_in(
    conn: &Connection,
    strategy_id: i64,
    source_id: i64,
    start_year: i64,
) -> EmissionsResult<i64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(apply_order), 0) FROM modifications \
         WHERE reduction_strategy_id = ?1 AND source_id = ?2 AND start_year = ?3;",
        params![strategy_id, source_id, start_year],
        |row| row.get(0),
    )?;
    Ok(max + 1)
}

/// Store a modification. A missing or zero `order` becomes one past the
/// highest order already used for the same strategy, source and start year.
pub fn insert_modification(conn: &Connection, record: &ModificationRecord) -> EmissionsResult<i64> {
    record.validate()?;
    require(conn, "sources", "Source", record.source_id)?;
    require(
        conn,
        "reduction_strategies",
        "ReductionStrategy",
        record.reduction_strategy_id,
    )?;
    let tx = conn.unchecked_transaction()?;
    let order = match record.order {
        Some(order) if order > 0 => order,
        _ => next_order_in(
            &tx,
            record.reduction_strategy_id,
            record.source_id,
            record.start_year,
        )?,
    };
    let record = record.with_order(order);
    Modification::try_from(&record)?;
    tx.execute(
        "INSERT INTO modifications (reduction_strategy_id, source_id, modification_type, value, \
             apply_order, start_year, end_year, is_progressive, target_value, calculation_year) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
        params![
            record.reduction_strategy_id,
            record.source_id,
            record.modification_type,
            record.value,
            order,
            record.start_year,
            record.end_year,
            record.is_progressive as i64,
            record.target_value,
            record.calculation_year,
        ],
    )
    .map_err(|e| duplicate_as_validation(e, "modification with this strategy, source, start year and order"))?;
    let modification_id = tx.last_insert_rowid();
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    debug!(
        modification_id,
        source_id = record.source_id,
        strategy_id = record.reduction_strategy_id,
        order,
        "modification created"
    );
    Ok(modification_id)
}

pub fn get_modification(conn: &Connection, modification_id: i64) -> EmissionsResult<ModificationRecord> {
    let sql = format!("SELECT {MODIFICATION_COLUMNS} FROM modifications WHERE id = ?1;");
    match conn.query_row(&sql, params![modification_id], modification_from_row) {
        Ok(r) => Ok(r),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(EmissionsError::not_found("Modification", modification_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// Modifications filtered by source and/or strategy, in fold order.
pub fn list_modifications(
    conn: &Connection,
    source_id: Option<i64>,
    strategy_id: Option<i64>,
) -> EmissionsResult<Vec<ModificationRecord>> {
    let sql = format!(
        "SELECT {MODIFICATION_COLUMNS} FROM modifications \
         WHERE (?1 IS NULL OR source_id = ?1) AND (?2 IS NULL OR reduction_strategy_id = ?2) \
         ORDER BY start_year, apply_order, id;"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![source_id, strategy_id], modification_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Overwrite a modification. A missing `order` keeps the stored one.
pub fn update_modification(conn: &Connection, record: &ModificationRecord) -> EmissionsResult<()> {
    let modification_id = require_id(record.id, "Modification")?;
    record.validate()?;
    let previous = get_modification(conn, modification_id)?;
    require(conn, "sources", "Source", record.source_id)?;
    require(
        conn,
        "reduction_strategies",
        "ReductionStrategy",
        record.reduction_strategy_id,
    )?;
    let order = record.order.or(previous.order).unwrap_or(1);
    let record = record.with_order(order);
    Modification::try_from(&record)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE modifications SET reduction_strategy_id = ?1, source_id = ?2, \
             modification_type = ?3, value = ?4, apply_order = ?5, start_year = ?6, \
             end_year = ?7, is_progressive = ?8, target_value = ?9, calculation_year = ?10 \
         WHERE id = ?11;",
        params![
            record.reduction_strategy_id,
            record.source_id,
            record.modification_type,
            record.value,
            order,
            record.start_year,
            record.end_year,
            record.is_progressive as i64,
            record.target_value,
            record.calculation_year,
            modification_id,
        ],
    )
    .map_err(|e| duplicate_as_validation(e, "modification with this strategy, source, start year and order"))?;
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    Ok(())
}

pub fn delete_modification(conn: &Connection, modification_id: i64) -> EmissionsResult<()> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "DELETE FROM modifications WHERE id = ?1;",
        params![modification_id],
    )?;
    if changed == 0 {
        return Err(EmissionsError::not_found("Modification", modification_id));
    }
    bump_data_epoch_in(&tx)?;
    tx.commit()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Engine loaders
// ---------------------------------------------------------------------------

/// Load one source as the engine sees it.
pub fn load_source(conn: &Connection, source_id: i64) -> EmissionsResult<Source> {
    Source::try_from(&get_source(conn, source_id)?)
}

fn load_all_modifications(conn: &Connection, source_id: i64) -> EmissionsResult<Vec<Modification>> {
    list_modifications(conn, Some(source_id), None)?
        .iter()
        .map(Modification::try_from)
        .collect()
}

/// Modifications of `source_id`, restricted to `strategy_ids` when given,
/// sorted by `(start_year, order, id)`.
pub fn load_modifications(
    conn: &Connection,
    source_id: i64,
    strategy_ids: Option<&[i64]>,
) -> EmissionsResult<Vec<Modification>> {
    let all = load_all_modifications(conn, source_id)?;
    let filter: Option<HashSet<i64>> = strategy_ids.map(|ids| ids.iter().copied().collect());
    Ok(select_modifications(&all, filter.as_ref())
        .into_iter()
        .cloned()
        .collect())
}

/// The named modifications, keeping only those that belong to `source_id`.
pub fn load_modifications_by_ids(
    conn: &Connection,
    source_id: i64,
    modification_ids: &[i64],
) -> EmissionsResult<Vec<Modification>> {
    let wanted: HashSet<i64> = modification_ids.iter().copied().collect();
    Ok(load_all_modifications(conn, source_id)?
        .into_iter()
        .filter(|m| wanted.contains(&m.id))
        .collect())
}

/// A source plus every modification attached to it.
pub fn load_snapshot(conn: &Connection, source_id: i64) -> EmissionsResult<SourceSnapshot> {
    Ok(SourceSnapshot {
        source: load_source(conn, source_id)?,
        modifications: load_all_modifications(conn, source_id)?,
    })
}

pub fn load_report_sources(conn: &Connection, report_id: i64) -> EmissionsResult<Vec<Source>> {
    require(conn, "reports", "Report", report_id)?;
    list_sources(conn, Some(report_id))?
        .iter()
        .map(Source::try_from)
        .collect()
}

/// Snapshots of every source in a report.
pub fn load_report_snapshots(conn: &Connection, report_id: i64) -> EmissionsResult<Vec<SourceSnapshot>> {
    require(conn, "reports", "Report", report_id)?;
    list_sources(conn, Some(report_id))?
        .iter()
        .map(|record| {
            let source = Source::try_from(record)?;
            let modifications = load_all_modifications(conn, source.id)?;
            Ok(SourceSnapshot {
                source,
                modifications,
            })
        })
        .collect()
}

/// Snapshots of every source that the strategy modifies at least once.
pub fn load_strategy_snapshots(
    conn: &Connection,
    strategy_id: i64,
) -> EmissionsResult<Vec<SourceSnapshot>> {
    require(conn, "reduction_strategies", "ReductionStrategy", strategy_id)?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT source_id FROM modifications \
         WHERE reduction_strategy_id = ?1 ORDER BY source_id;",
    )?;
    let source_ids = stmt
        .query_map(params![strategy_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    source_ids
        .into_iter()
        .map(|id| load_snapshot(conn, id))
        .collect()
}

// ---------------------------------------------------------------------------
// Report total cache
// ---------------------------------------------------------------------------

/// Lifetime-to-date total of a report, served from `total_emissions_cache`
/// when it was computed for `current_year` and recomputed otherwise.
pub fn cached_total_emissions(
    conn: &Connection,
    report_id: i64,
    current_year: i32,
) -> EmissionsResult<f64> {
    let cached = conn.query_row(
        "SELECT total_emissions_cache, total_emissions_cache_year FROM reports WHERE id = ?1;",
        params![report_id],
        |row| Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, Option<i32>>(1)?)),
    );
    match cached {
        Ok((Some(total), Some(year))) if year == current_year => {
            debug!(report_id, "report total served from cache");
            Ok(total)
        }
        Ok(_) => refresh_total_emissions(conn, report_id, current_year),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(EmissionsError::not_found("Report", report_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// Recompute and store a report's lifetime-to-date total.
pub fn refresh_total_emissions(
    conn: &Connection,
    report_id: i64,
    current_year: i32,
) -> EmissionsResult<f64> {
    let sources = load_report_sources(conn, report_id)?;
    let total = report_lifetime_to_date_total(&sources, current_year);
    conn.execute(
        "UPDATE reports SET total_emissions_cache = ?1, total_emissions_cache_year = ?2 \
         WHERE id = ?3;",
        params![total, current_year, report_id],
    )?;
    debug!(report_id, total, "report total recomputed");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{modification, report, source, strategy};
    use crate::projection::{Adjustment, Target};
    use crate::store::schema::open_test_connection;

    struct Seed {
        report_id: i64,
        source_id: i64,
        strategy_id: i64,
    }

    fn seed(conn: &Connection) -> Seed {
        let report_id = insert_report(conn, &report("Annual")).unwrap();
        let source_id = insert_source(conn, &source("Fleet", report_id)).unwrap();
        let strategy_id = insert_strategy(conn, &strategy("Electrify")).unwrap();
        Seed {
            report_id,
            source_id,
            strategy_id,
        }
    }

    #[test]
    fn report_round_trips_with_links() {
        let conn = open_test_connection();
        let strategy_id = insert_strategy(&conn, &strategy("Electrify")).unwrap();
        let mut record = report("Annual");
        record.strategy_ids = vec![strategy_id];
        let report_id = insert_report(&conn, &record).unwrap();

        let loaded = get_report(&conn, report_id).unwrap();
        assert_eq!(loaded.name, "Annual");
        assert_eq!(loaded.strategy_ids, vec![strategy_id]);
        assert_eq!(list_reports(&conn).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_report_is_a_validation_error() {
        let conn = open_test_connection();
        insert_report(&conn, &report("Annual")).unwrap();
        let err = insert_report(&conn, &report("Annual")).unwrap_err();
        assert!(matches!(err, EmissionsError::Validation(_)));
    }

    #[test]
    fn linking_unknown_strategy_is_not_found() {
        let conn = open_test_connection();
        let s = seed(&conn);
        assert!(matches!(
            link_strategy(&conn, s.report_id, 999),
            Err(EmissionsError::NotFound { .. })
        ));
        assert!(link_strategy(&conn, s.report_id, s.strategy_id).unwrap());
        assert!(!link_strategy(&conn, s.report_id, s.strategy_id).unwrap());
        assert_eq!(report_strategy_ids(&conn, s.report_id).unwrap(), vec![s.strategy_id]);
        assert!(unlink_strategy(&conn, s.report_id, s.strategy_id).unwrap());
        assert!(report_strategy_ids(&conn, s.report_id).unwrap().is_empty());
    }

    #[test]
    fn missing_strategy_ids_lists_unknown_ids_once() {
        let conn = open_test_connection();
        let s = seed(&conn);
        assert_eq!(
            missing_strategy_ids(&conn, &[s.strategy_id, 41, 42, 41]).unwrap(),
            vec![41, 42]
        );
    }

    #[test]
    fn source_crud_and_validation() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let mut record = get_source(&conn, s.source_id).unwrap();
        assert_eq!(record.name, "Fleet");

        record.value = 2000.0;
        update_source(&conn, &record).unwrap();
        assert_eq!(get_source(&conn, s.source_id).unwrap().value, 2000.0);

        record.quantity = 0;
        assert!(matches!(
            update_source(&conn, &record),
            Err(EmissionsError::Validation(_))
        ));

        delete_source(&conn, s.source_id).unwrap();
        assert!(matches!(
            get_source(&conn, s.source_id),
            Err(EmissionsError::NotFound { .. })
        ));
    }

    #[test]
    fn source_for_unknown_report_is_not_found() {
        let conn = open_test_connection();
        let err = insert_source(&conn, &source("Fleet", 77)).unwrap_err();
        assert!(matches!(err, EmissionsError::NotFound { entity: "Report", id: 77 }));
    }

    #[test]
    fn modification_order_is_assigned_per_group() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let first = insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.9, 2024)).unwrap();
        let second = insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.8, 2024)).unwrap();
        let other_year =
            insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.7, 2025)).unwrap();

        assert_eq!(get_modification(&conn, first).unwrap().order, Some(1));
        assert_eq!(get_modification(&conn, second).unwrap().order, Some(2));
        assert_eq!(get_modification(&conn, other_year).unwrap().order, Some(1));
    }

    #[test]
    fn explicit_duplicate_order_is_rejected() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let mut record = modification(s.strategy_id, s.source_id, 0.9, 2024);
        record.order = Some(3);
        insert_modification(&conn, &record).unwrap();
        assert!(matches!(
            insert_modification(&conn, &record),
            Err(EmissionsError::Validation(_))
        ));
    }

    #[test]
    fn progressive_modification_without_target_is_rejected_on_insert() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let mut record = modification(s.strategy_id, s.source_id, 1.0, 2024);
        record.is_progressive = true;
        record.end_year = Some(2030);
        assert!(matches!(
            insert_modification(&conn, &record),
            Err(EmissionsError::InvalidModification(_))
        ));
        assert!(list_modifications(&conn, Some(s.source_id), None).unwrap().is_empty());
    }

    #[test]
    fn load_modifications_sorts_and_filters_by_strategy() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let other = insert_strategy(&conn, &strategy("Insulate")).unwrap();

        let mut late = modification(s.strategy_id, s.source_id, 0.5, 2026);
        late.order = Some(1);
        insert_modification(&conn, &late).unwrap();
        let mut ramp = modification(other, s.source_id, 1.0, 2024);
        ramp.is_progressive = true;
        ramp.target_value = Some(10.0);
        ramp.calculation_year = Some(2028);
        insert_modification(&conn, &ramp).unwrap();

        let all = load_modifications(&conn, s.source_id, None).unwrap();
        assert_eq!(
            all.iter().map(|m| m.start_year).collect::<Vec<_>>(),
            vec![2024, 2026]
        );
        assert_eq!(
            all[0].adjustment,
            Adjustment::Ramp {
                target: 10.0,
                ramp_end: 2028
            }
        );
        assert_eq!(all[0].target, Target::Value);

        let only_mine = load_modifications(&conn, s.source_id, Some(&[s.strategy_id])).unwrap();
        assert_eq!(only_mine.len(), 1);
        assert!(load_modifications(&conn, s.source_id, Some(&[])).unwrap().is_empty());
    }

    #[test]
    fn modifications_by_id_stay_on_their_source() {
        let conn = open_test_connection();
        let s = seed(&conn);
        let other_source = insert_source(&conn, &source("Servers", s.report_id)).unwrap();
        let mine = insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.9, 2024)).unwrap();
        let theirs =
            insert_modification(&conn, &modification(s.strategy_id, other_source, 0.9, 2024)).unwrap();

        let loaded = load_modifications_by_ids(&conn, s.source_id, &[mine, theirs]).unwrap();
        assert_eq!(loaded.iter().map(|m| m.id).collect::<Vec<_>>(), vec![mine]);
    }

    #[test]
    fn strategy_snapshots_cover_touched_sources_only() {
        let conn = open_test_connection();
        let s = seed(&conn);
        insert_source(&conn, &source("Servers", s.report_id)).unwrap();
        insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.9, 2024)).unwrap();

        let snaps = load_strategy_snapshots(&conn, s.strategy_id).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].source.id, s.source_id);
        assert_eq!(load_report_snapshots(&conn, s.report_id).unwrap().len(), 2);
    }

    #[test]
    fn deleting_a_strategy_removes_its_modifications() {
        let conn = open_test_connection();
        let s = seed(&conn);
        insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.9, 2024)).unwrap();
        delete_strategy(&conn, s.strategy_id).unwrap();
        assert!(list_modifications(&conn, Some(s.source_id), None).unwrap().is_empty());
    }

    #[test]
    fn total_cache_fills_and_source_writes_clear_it() {
        let conn = open_test_connection();
        let s = seed(&conn);
        // 0.1 * 1000 * 1 for 2023..=2024
        assert_eq!(cached_total_emissions(&conn, s.report_id, 2024).unwrap(), 200.0);
        assert_eq!(get_report(&conn, s.report_id).unwrap().total_emissions_cache, Some(200.0));

        insert_source(&conn, &source("Servers", s.report_id)).unwrap();
        assert_eq!(get_report(&conn, s.report_id).unwrap().total_emissions_cache, None);
        assert_eq!(cached_total_emissions(&conn, s.report_id, 2024).unwrap(), 400.0);

        delete_source(&conn, s.source_id).unwrap();
        assert_eq!(cached_total_emissions(&conn, s.report_id, 2024).unwrap(), 200.0);
    }

    #[test]
    fn total_cache_is_recomputed_for_another_year() {
        let conn = open_test_connection();
        let s = seed(&conn);
        assert_eq!(cached_total_emissions(&conn, s.report_id, 2023).unwrap(), 100.0);
        assert_eq!(cached_total_emissions(&conn, s.report_id, 2025).unwrap(), 300.0);
    }

    #[test]
    fn every_write_bumps_the_epoch() {
        let conn = open_test_connection();
        let before = data_epoch(&conn).unwrap();
        let s = seed(&conn);
        let after_seed = data_epoch(&conn).unwrap();
        assert_eq!(after_seed, before + 3);

        insert_modification(&conn, &modification(s.strategy_id, s.source_id, 0.9, 2024)).unwrap();
        assert_eq!(data_epoch(&conn).unwrap(), after_seed + 1);
        assert_eq!(bump_data_epoch(&conn).unwrap(), after_seed + 2);
    }
}
