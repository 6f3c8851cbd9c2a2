//! Persistent Store - SQLite-backed day records
//!
//! One row per non-empty day, keyed by the encoded `MonthDayKey`, so a whole
//! month is a contiguous primary-key range and "nearest non-empty month"
//! lookups are a single indexed MIN/MAX.
//!
//! Every committed write bumps the shared [`MutationCounter`] exactly once.

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::{DayFlags, DayRecord, MonthData, MonthDayKey, MonthIndex, MutationCounter};
use crate::units::WeightUnit;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Schema version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS days (
        monthday INTEGER PRIMARY KEY,
        scale_weight REAL,
        trend_weight REAL,
        flags INTEGER NOT NULL DEFAULT 0,
        note TEXT
    );
    CREATE TABLE IF NOT EXISTS settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        weight_unit INTEGER NOT NULL
    );
";

/// Owner of the on-disk database and the mutation counter
pub struct PersistentStore {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
    counter: MutationCounter,
}

impl PersistentStore {
    /// Open (or create) a store file
    ///
    /// Fails with [`StoreError::Unavailable`] if the file cannot be created,
    /// is not a SQLite database, or carries an unknown schema version.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let started_at = Instant::now();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::unavailable(path, e))?;
        }

        let mut conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::unavailable(path, e))?;

        bootstrap(&mut conn).map_err(|e| StoreError::unavailable(path, e))?;

        info!(
            path = %path.display(),
            duration_ms = started_at.elapsed().as_millis() as u64,
            "Opened store"
        );

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            counter: MutationCounter::new(),
        })
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> StoreResult<Self> {
        let mut conn =
            Connection::open_in_memory().map_err(|e| StoreError::unavailable(":memory:", e))?;
        bootstrap(&mut conn).map_err(|e| StoreError::unavailable(":memory:", e))?;

        Ok(Self {
            conn,
            path: None,
            counter: MutationCounter::new(),
        })
    }

    /// Close the underlying connection
    pub fn close(self) -> StoreResult<()> {
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| StoreError::Write(e))?;
        if let Some(path) = path {
            info!(path = %path.display(), "Closed store");
        }
        Ok(())
    }

    /// Path of the database file (None for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Another handle to the shared mutation counter
    pub fn mutation_counter(&self) -> MutationCounter {
        self.counter.clone()
    }

    // ========================================================================
    // Range and aggregate queries
    // ========================================================================

    /// Month of the earliest stored row
    pub fn earliest_month(&self) -> StoreResult<Option<MonthIndex>> {
        Ok(self
            .query_key("SELECT MIN(monthday) FROM days", [])?
            .map(|k| k.month))
    }

    /// Month of the latest stored row
    pub fn latest_month(&self) -> StoreResult<Option<MonthIndex>> {
        Ok(self
            .query_key("SELECT MAX(monthday) FROM days", [])?
            .map(|k| k.month))
    }

    pub fn earliest_measured_day(&self) -> StoreResult<Option<MonthDayKey>> {
        self.query_key(
            "SELECT MIN(monthday) FROM days WHERE scale_weight IS NOT NULL",
            [],
        )
    }

    pub fn latest_measured_day(&self) -> StoreResult<Option<MonthDayKey>> {
        self.query_key(
            "SELECT MAX(monthday) FROM days WHERE scale_weight IS NOT NULL",
            [],
        )
    }

    /// Number of days carrying a measurement
    pub fn measurement_count(&self) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM days WHERE scale_weight IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn minimum_weight(&self) -> StoreResult<Option<f32>> {
        self.query_weight("SELECT MIN(scale_weight) FROM days")
    }

    pub fn maximum_weight(&self) -> StoreResult<Option<f32>> {
        self.query_weight("SELECT MAX(scale_weight) FROM days")
    }

    /// Nearest earlier month holding at least one row
    pub fn month_before(&self, month: MonthIndex) -> StoreResult<Option<MonthIndex>> {
        Ok(self
            .query_key(
                "SELECT MAX(monthday) FROM days WHERE monthday < ?1",
                [month_start(month)],
            )?
            .map(|k| k.month))
    }

    /// Nearest later month holding at least one row
    pub fn month_after(&self, month: MonthIndex) -> StoreResult<Option<MonthIndex>> {
        Ok(self
            .query_key(
                "SELECT MIN(monthday) FROM days WHERE monthday >= ?1",
                [month_start(month.succ())],
            )?
            .map(|k| k.month))
    }

    /// Trend weight of the latest measured day before `month`
    ///
    /// Months holding only notes or flags are skipped.
    pub fn trend_before(&self, month: MonthIndex) -> StoreResult<Option<f32>> {
        let value: Option<Option<f64>> = self
            .conn
            .query_row(
                "SELECT trend_weight FROM days
                 WHERE monthday < ?1 AND scale_weight IS NOT NULL
                 ORDER BY monthday DESC LIMIT 1",
                [month_start(month)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten().map(|v| v as f32))
    }

    // ========================================================================
    // Month load / save
    // ========================================================================

    /// Load one month; months without rows come back all-empty
    pub fn load_month(&self, month: MonthIndex) -> StoreResult<MonthData> {
        let mut data = MonthData::empty(month);

        let mut stmt = self.conn.prepare_cached(
            "SELECT monthday, scale_weight, trend_weight, flags, note FROM days
             WHERE monthday >= ?1 AND monthday < ?2
             ORDER BY monthday",
        )?;
        let rows = stmt.query_map(
            params![month_start(month), month_start(month.succ())],
            read_day_row,
        )?;

        for row in rows {
            let (key, record) = row?;
            let slot = data.day_mut(key.day).ok_or_else(|| {
                StoreError::Corruption(format!("row {} outside month {}", key.encode(), month))
            })?;
            *slot = record;
        }

        debug!(month = %month, measured = data.measured_count(), "Loaded month");
        Ok(data)
    }

    /// Write one month back as a single logical change
    pub fn save_month(&mut self, month: &MonthData) -> StoreResult<u64> {
        self.save_months(std::iter::once(month))
    }

    /// Write several months in one transaction
    ///
    /// Non-empty days are upserted and empty days deleted. On success the
    /// mutation counter is bumped once and its new value returned; on
    /// failure nothing is committed and the counter is untouched.
    pub fn save_months<'a>(
        &mut self,
        months: impl IntoIterator<Item = &'a MonthData>,
    ) -> StoreResult<u64> {
        let tx = self.conn.transaction().map_err(StoreError::Write)?;
        let mut saved = Vec::new();

        {
            let mut upsert = tx
                .prepare_cached(
                    "INSERT INTO days (monthday, scale_weight, trend_weight, flags, note)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(monthday) DO UPDATE SET
                        scale_weight = excluded.scale_weight,
                        trend_weight = excluded.trend_weight,
                        flags = excluded.flags,
                        note = excluded.note",
                )
                .map_err(StoreError::Write)?;
            let mut delete = tx
                .prepare_cached("DELETE FROM days WHERE monthday = ?1")
                .map_err(StoreError::Write)?;

            for month in months {
                for (key, record) in month.iter() {
                    if record.is_empty() {
                        delete.execute([key.encode()]).map_err(StoreError::Write)?;
                    } else {
                        upsert
                            .execute(params![
                                key.encode(),
                                record.scale_weight.map(f64::from),
                                record.trend_weight.map(f64::from),
                                record.flags.bits() as i64,
                                record.note.as_deref(),
                            ])
                            .map_err(StoreError::Write)?;
                    }
                }
                saved.push(month.month());
            }
        }

        tx.commit().map_err(StoreError::Write)?;
        let version = self.counter.bump();

        debug!(months = ?saved, version, "Saved months");
        Ok(version)
    }

    /// Every stored day in ascending key order
    pub fn all_days(&self) -> StoreResult<Vec<(MonthDayKey, DayRecord)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT monthday, scale_weight, trend_weight, flags, note FROM days ORDER BY monthday",
        )?;
        let rows = stmt.query_map([], read_day_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Remove every day row
    pub fn delete_all(&mut self) -> StoreResult<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM days", [])
            .map_err(StoreError::Write)?;
        let version = self.counter.bump();
        info!(deleted, version, "Deleted all days");
        Ok(deleted)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Unit stored magnitudes are expressed in (pounds until set)
    pub fn weight_unit(&self) -> StoreResult<WeightUnit> {
        let code: Option<i64> = self
            .conn
            .query_row("SELECT weight_unit FROM settings WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match code {
            None => Ok(WeightUnit::default()),
            Some(code) => WeightUnit::from_code(code)
                .ok_or_else(|| StoreError::Corruption(format!("unknown weight unit code {}", code))),
        }
    }

    /// Change the unit label; stored magnitudes are not converted
    pub fn set_weight_unit(&mut self, unit: WeightUnit) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO settings (id, weight_unit) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET weight_unit = excluded.weight_unit",
                [unit.code()],
            )
            .map_err(StoreError::Write)?;
        let version = self.counter.bump();
        info!(unit = %unit, version, "Weight unit changed");
        Ok(())
    }

    fn query_key<P: rusqlite::Params>(&self, sql: &str, params: P) -> StoreResult<Option<MonthDayKey>> {
        let value: Option<i64> = self.conn.query_row(sql, params, |row| row.get(0))?;
        Ok(value.map(MonthDayKey::decode))
    }

    fn query_weight(&self, sql: &str) -> StoreResult<Option<f32>> {
        let value: Option<f64> = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(value.map(|v| v as f32))
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("path", &self.path)
            .field("version", &self.counter.current())
            .finish()
    }
}

/// Encoded key of day 0 of `month`, the lower bound of its key range
fn month_start(month: MonthIndex) -> i64 {
    (month.0 as i64) << 5
}

fn read_day_row(row: &Row<'_>) -> rusqlite::Result<(MonthDayKey, DayRecord)> {
    let key = MonthDayKey::decode(row.get(0)?);
    let scale_weight: Option<f64> = row.get(1)?;
    let trend_weight: Option<f64> = row.get(2)?;
    let flags: i64 = row.get(3)?;
    let note: Option<String> = row.get(4)?;

    let mut record = DayRecord {
        scale_weight: scale_weight.map(|w| w as f32),
        trend_weight: trend_weight.map(|w| w as f32),
        flags: DayFlags::from_bits(flags as u8),
        note: None,
    };
    record.set_note(note);
    Ok((key, record))
}

fn bootstrap(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        ",
    )?;

    let version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    match version {
        0 => {
            let tx = conn.transaction()?;
            tx.execute_batch(SCHEMA)?;
            tx.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
            tx.commit()?;
            debug!(version = SCHEMA_VERSION, "Created schema");
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        other => Err(StoreError::Corruption(format!(
            "unsupported schema version {} (expected {})",
            other, SCHEMA_VERSION
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn month(year: i32, m: u32) -> MonthIndex {
        MonthIndex::from_year_month(year, m).unwrap()
    }

    fn month_with(m: MonthIndex, days: &[(u8, DayRecord)]) -> MonthData {
        let mut data = MonthData::empty(m);
        for (day, record) in days {
            *data.day_mut(*day).unwrap() = record.clone();
        }
        data
    }

    #[test]
    fn test_save_and_load_month() {
        let dir = tempdir().unwrap();
        let mut store = PersistentStore::open(dir.path().join("weights.db")).unwrap();
        let m = month(2024, 3);

        let data = month_with(
            m,
            &[
                (1, DayRecord::measured(180.5).flag(0)),
                (2, DayRecord::default().note("skipped scale")),
                (31, DayRecord::measured(179.0)),
            ],
        );
        store.save_month(&data).unwrap();

        let loaded = store.load_month(m).unwrap();
        assert_eq!(loaded, data);
        assert_eq!(store.measurement_count().unwrap(), 2);
        assert!(store.load_month(m.succ()).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.db");
        let m = month(2023, 12);

        {
            let mut store = PersistentStore::open(&path).unwrap();
            store.save_month(&month_with(m, &[(24, DayRecord::measured(70.2))])).unwrap();
            store.set_weight_unit(WeightUnit::Kilograms).unwrap();
            store.close().unwrap();
        }

        let store = PersistentStore::open(&path).unwrap();
        assert_eq!(store.load_month(m).unwrap().day(24).unwrap().scale_weight, Some(70.2));
        assert_eq!(store.weight_unit().unwrap(), WeightUnit::Kilograms);
    }

    #[test]
    fn test_empty_days_are_deleted() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        let m = month(2024, 1);

        store.save_month(&month_with(m, &[(5, DayRecord::measured(150.0))])).unwrap();
        assert_eq!(store.measurement_count().unwrap(), 1);

        store.save_month(&MonthData::empty(m)).unwrap();
        assert_eq!(store.measurement_count().unwrap(), 0);
        assert_eq!(store.earliest_month().unwrap(), None);
    }

    #[test]
    fn test_counter_bumps_once_per_save() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        let counter = store.mutation_counter();
        let a = month_with(month(2024, 1), &[(1, DayRecord::measured(1.0))]);
        let b = month_with(month(2024, 2), &[(1, DayRecord::measured(2.0))]);

        store.save_month(&a).unwrap();
        assert_eq!(counter.current(), 1);

        store.save_months([&a, &b]).unwrap();
        assert_eq!(counter.current(), 2);

        store.set_weight_unit(WeightUnit::Pounds).unwrap();
        store.delete_all().unwrap();
        assert_eq!(counter.current(), 4);
    }

    #[test]
    fn test_failed_write_commits_nothing() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        let m = month(2024, 6);
        store.save_month(&month_with(m, &[(1, DayRecord::measured(100.0))])).unwrap();

        store
            .conn
            .execute_batch(
                "CREATE TEMP TRIGGER reject_day BEFORE INSERT ON days
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let before = store.mutation_counter().current();
        let update = month_with(
            m,
            &[(1, DayRecord::measured(99.0)), (2, DayRecord::measured(98.0))],
        );
        let result = store.save_month(&update);

        assert!(matches!(result, Err(StoreError::Write(_))));
        assert_eq!(store.mutation_counter().current(), before);
        assert_eq!(store.load_month(m).unwrap().day(1).unwrap().scale_weight, Some(100.0));
    }

    #[test]
    fn test_range_and_aggregate_queries() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        assert_eq!(store.earliest_measured_day().unwrap(), None);
        assert_eq!(store.minimum_weight().unwrap(), None);

        store
            .save_month(&month_with(
                month(2022, 5),
                &[(3, DayRecord::default().note("note only")), (10, DayRecord::measured(160.0))],
            ))
            .unwrap();
        store
            .save_month(&month_with(month(2022, 8), &[(20, DayRecord::measured(155.5))]))
            .unwrap();

        assert_eq!(store.earliest_month().unwrap(), Some(month(2022, 5)));
        assert_eq!(store.latest_month().unwrap(), Some(month(2022, 8)));
        assert_eq!(
            store.earliest_measured_day().unwrap(),
            MonthDayKey::new(month(2022, 5), 10)
        );
        assert_eq!(
            store.latest_measured_day().unwrap(),
            MonthDayKey::new(month(2022, 8), 20)
        );
        assert_eq!(store.minimum_weight().unwrap(), Some(155.5));
        assert_eq!(store.maximum_weight().unwrap(), Some(160.0));
        assert_eq!(store.all_days().unwrap().len(), 3);
    }

    #[test]
    fn test_sparse_month_neighbours() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        let jan = month(2001, 1);
        let sep = month(2019, 9);
        store.save_month(&month_with(jan, &[(31, DayRecord::measured(1.0))])).unwrap();
        store.save_month(&month_with(sep, &[(1, DayRecord::measured(2.0))])).unwrap();

        assert_eq!(store.month_after(jan).unwrap(), Some(sep));
        assert_eq!(store.month_before(sep).unwrap(), Some(jan));
        assert_eq!(store.month_after(month(2010, 1)).unwrap(), Some(sep));
        assert_eq!(store.month_before(month(2010, 1)).unwrap(), Some(jan));
        assert_eq!(store.month_before(jan).unwrap(), None);
        assert_eq!(store.month_after(sep).unwrap(), None);
    }

    #[test]
    fn test_trend_before_skips_note_only_months() {
        let mut store = PersistentStore::open_in_memory().unwrap();
        let mut measured = DayRecord::measured(100.0);
        measured.trend_weight = Some(98.5);
        store.save_month(&month_with(month(2024, 1), &[(10, measured)])).unwrap();
        store
            .save_month(&month_with(month(2024, 2), &[(3, DayRecord::default().note("trip"))]))
            .unwrap();

        assert_eq!(store.trend_before(month(2024, 3)).unwrap(), Some(98.5));
        assert_eq!(store.trend_before(month(2024, 2)).unwrap(), Some(98.5));
        assert_eq!(store.trend_before(month(2024, 1)).unwrap(), None);
    }

    #[test]
    fn test_garbage_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.db");
        std::fs::write(&path, b"definitely not a sqlite database, just some bytes....").unwrap();

        let result = PersistentStore::open(&path);
        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
    }

    #[test]
    fn test_unknown_schema_version_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.db");
        {
            let store = PersistentStore::open(&path).unwrap();
            store.conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }

        let result = PersistentStore::open(&path);
        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
    }
}
