//! CSV Import
//!
//! Imports daily records into the month cache.
//! Supports header auto-detection, flexible column mapping and several date formats.

use super::IntegrationError;
use crate::storage::{DayFlags, MonthCache, MonthDayKey, FLAG_COUNT};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Most per-row errors kept in a summary
const MAX_REPORTED_ERRORS: usize = 100;

/// Date formats tried after the configured one
const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%b %d, %Y",
];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// A field a CSV column can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportField {
    Date,
    Weight,
    Flag(usize),
    Note,
}

/// CSV importer with configurable column mapping
#[derive(Debug, Clone)]
pub struct CsvImporter {
    date_column: Option<usize>,
    weight_column: Option<usize>,
    flag_columns: [Option<usize>; FLAG_COUNT],
    note_column: Option<usize>,
    /// Tried before the built-in format list
    date_format: Option<String>,
    /// None means detect from the first row
    has_header: Option<bool>,
    delete_first: bool,
}

/// Result of an import
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    /// Data rows read (header excluded)
    pub rows: usize,
    /// Rows written to the store
    pub imported: usize,
    /// Rows rejected
    pub failed: usize,
    pub errors: Vec<String>,
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvImporter {
    /// Importer expecting the export layout `Date,Weight,Mark1..Mark4,Note`
    pub fn new() -> Self {
        Self {
            date_column: Some(0),
            weight_column: Some(1),
            flag_columns: [Some(2), Some(3), Some(4), Some(5)],
            note_column: Some(6),
            date_format: None,
            has_header: None,
            delete_first: false,
        }
    }

    /// Map a field to a column index
    pub fn with_column(mut self, field: ImportField, column: usize) -> Self {
        match field {
            ImportField::Date => self.date_column = Some(column),
            ImportField::Weight => self.weight_column = Some(column),
            ImportField::Flag(i) if i < FLAG_COUNT => self.flag_columns[i] = Some(column),
            ImportField::Flag(_) => {}
            ImportField::Note => self.note_column = Some(column),
        }
        self
    }

    /// Set the preferred date format string
    pub fn with_date_format(mut self, format: &str) -> Self {
        self.date_format = Some(format.to_string());
        self
    }

    /// Declare whether the first row is a header (detected when unset)
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = Some(has_header);
        self
    }

    /// Delete every stored day before importing
    pub fn with_delete_first(mut self, delete_first: bool) -> Self {
        self.delete_first = delete_first;
        self
    }

    /// Map columns from header names; returns false if no date column was found
    pub fn auto_detect_columns(&mut self, headers: &csv::StringRecord) -> bool {
        let mut date = None;
        let mut weight = None;
        let mut flags = [None; FLAG_COUNT];
        let mut note = None;

        for (idx, header) in headers.iter().enumerate() {
            let name = header.trim().to_lowercase().replace([' ', '_'], "");

            if date.is_none() && (name.contains("date") || name == "day") {
                date = Some(idx);
            } else if weight.is_none() && name.contains("weight") && !name.contains("trend") {
                weight = Some(idx);
            } else if let Some(flag) = flag_index(&name) {
                flags[flag] = Some(idx);
            } else if note.is_none() && (name.contains("note") || name.contains("comment")) {
                note = Some(idx);
            }
        }

        if date.is_none() {
            return false;
        }

        self.date_column = date;
        self.weight_column = weight;
        self.flag_columns = flags;
        self.note_column = note;
        true
    }

    /// Parse a date with the configured format, then the built-in ones
    pub fn parse_date(&self, value: &str) -> Result<NaiveDate, IntegrationError> {
        let value = value.trim();

        if let Some(fmt) = &self.date_format {
            if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
                return Ok(date);
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
                return Ok(dt.date());
            }
        }

        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
                return Ok(date);
            }
        }
        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
                return Ok(dt.date());
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(dt.date_naive());
        }

        Err(IntegrationError::ParseError(format!(
            "Could not parse date: {}",
            value
        )))
    }

    /// Import a CSV file
    pub fn import_path<F>(
        &self,
        cache: &mut MonthCache,
        path: &Path,
        progress: F,
    ) -> Result<ImportSummary, IntegrationError>
    where
        F: FnMut(f32),
    {
        let file = std::fs::File::open(path)?;
        self.perform_import(cache, file, progress)
    }

    /// Import from a CSV string (useful for testing)
    pub fn import_str(
        &self,
        cache: &mut MonthCache,
        csv_data: &str,
    ) -> Result<ImportSummary, IntegrationError> {
        self.perform_import(cache, csv_data.as_bytes(), |_| {})
    }

    /// Read every row from `source` and write it through the cache
    ///
    /// `progress` receives the fraction of rows handled, ending at 1.0. The
    /// cache is flushed afterwards.
    pub fn perform_import<R, F>(
        &self,
        cache: &mut MonthCache,
        source: R,
        mut progress: F,
    ) -> Result<ImportSummary, IntegrationError>
    where
        R: Read,
        F: FnMut(f32),
    {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);
        let records = reader.records().collect::<Result<Vec<_>, _>>()?;

        let mut importer = self.clone();
        let skip_header = match (records.first(), self.has_header) {
            (Some(first), Some(true)) => {
                importer.auto_detect_columns(first);
                true
            }
            (Some(first), None) => {
                let looks_like_data = self
                    .date_column
                    .and_then(|c| first.get(c))
                    .map_or(false, |v| self.parse_date(v).is_ok());
                !looks_like_data && importer.auto_detect_columns(first)
            }
            _ => false,
        };
        let rows = &records[usize::from(skip_header)..];
        let first_line = if skip_header { 2 } else { 1 };

        if self.delete_first {
            cache.delete_all()?;
        }

        let mut summary = ImportSummary {
            rows: rows.len(),
            ..Default::default()
        };

        for (i, record) in rows.iter().enumerate() {
            let line = first_line + i;
            match importer.parse_row(record) {
                Ok(Some((key, row))) => {
                    cache.update_day(key, |day| {
                        day.scale_weight = row.weight;
                        day.flags = row.flags;
                        day.set_note(row.note);
                    })?;
                    summary.imported += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(format!("Line {}: {}", line, e));
                }
            }
            progress((i + 1) as f32 / rows.len() as f32);
        }

        cache.flush();

        if summary.errors.len() > MAX_REPORTED_ERRORS {
            let total = summary.errors.len();
            summary.errors.truncate(MAX_REPORTED_ERRORS);
            summary
                .errors
                .push(format!("... and {} more errors", total - MAX_REPORTED_ERRORS));
        }
        if summary.failed > 0 {
            warn!(failed = summary.failed, "Some rows were rejected");
        }
        info!(
            rows = summary.rows,
            imported = summary.imported,
            failed = summary.failed,
            "CSV import finished"
        );
        Ok(summary)
    }

    /// None for rows without a measurement, flag or note
    fn parse_row(
        &self,
        record: &csv::StringRecord,
    ) -> Result<Option<(MonthDayKey, ParsedRow)>, IntegrationError> {
        let field = |column: Option<usize>| column.and_then(|c| record.get(c)).unwrap_or("");

        let date_str = field(self.date_column);
        if date_str.is_empty() {
            return Err(IntegrationError::ParseError("missing date".to_string()));
        }
        let key = MonthDayKey::from_date(self.parse_date(date_str)?);

        let weight = match field(self.weight_column) {
            "" => None,
            value => Some(value.parse::<f32>().map_err(|_| {
                IntegrationError::ParseError(format!("Invalid weight: {}", value))
            })?),
        };

        let mut flags = DayFlags::empty();
        for (i, column) in self.flag_columns.iter().enumerate() {
            flags.set(i, parse_flag(field(*column)));
        }

        let note = Some(field(self.note_column).to_string()).filter(|n| !n.is_empty());

        if weight.is_none() && !flags.any() && note.is_none() {
            return Ok(None);
        }
        Ok(Some((key, ParsedRow { weight, flags, note })))
    }
}

struct ParsedRow {
    weight: Option<f32>,
    flags: DayFlags,
    note: Option<String>,
}

/// `mark1`..`mark4` or `flag0`..`flag3`
fn flag_index(name: &str) -> Option<usize> {
    if let Some(n) = name.strip_prefix("mark") {
        return n.parse::<usize>().ok().filter(|n| (1..=FLAG_COUNT).contains(n)).map(|n| n - 1);
    }
    if let Some(n) = name.strip_prefix("flag") {
        return n.parse::<usize>().ok().filter(|n| *n < FLAG_COUNT);
    }
    None
}

fn parse_flag(value: &str) -> bool {
    match value.to_lowercase().as_str() {
        "" | "0" | "false" | "no" | "n" => false,
        "1" | "true" | "yes" | "y" | "x" => true,
        other => other.parse::<f64>().map_or(true, |v| v != 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MonthIndex, PersistentStore};

    fn cache() -> MonthCache {
        MonthCache::new(PersistentStore::open_in_memory().unwrap())
    }

    fn day(cache: &mut MonthCache, y: i32, m: u32, d: u8) -> crate::storage::DayRecord {
        let month = MonthIndex::from_year_month(y, m).unwrap();
        cache.get(month).unwrap().day(d).unwrap().clone()
    }

    #[test]
    fn test_simple_csv_import() {
        let csv_data = "Date,Weight,Mark1,Mark2,Mark3,Mark4,Note
2024-01-15,180.5,1,0,0,0,
2024-01-16,180.1,0,0,0,1,\"late dinner, salty\"
2024-01-17,,0,0,0,0,";

        let mut cache = cache();
        let summary = CsvImporter::new().import_str(&mut cache, csv_data).unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.failed, 0);

        let first = day(&mut cache, 2024, 1, 15);
        assert_eq!(first.scale_weight, Some(180.5));
        assert!(first.flags.get(0));

        let second = day(&mut cache, 2024, 1, 16);
        assert!(second.flags.get(3));
        assert_eq!(second.note.as_deref(), Some("late dinner, salty"));
        assert!(second.trend_weight.is_some());
    }

    #[test]
    fn test_auto_detect_reordered_columns() {
        let csv_data = "note,flag2,weight,trend weight,date
gym,yes,72.4,72.0,03/05/2024";

        let mut cache = cache();
        let summary = CsvImporter::new().import_str(&mut cache, csv_data).unwrap();

        assert_eq!(summary.imported, 1);
        let record = day(&mut cache, 2024, 3, 5);
        assert_eq!(record.scale_weight, Some(72.4));
        assert!(record.flags.get(2));
        assert_eq!(record.note.as_deref(), Some("gym"));
    }

    #[test]
    fn test_headerless_rows_use_default_layout() {
        let csv_data = "2023-12-01,150.0\n2023-12-02,149.5";

        let mut cache = cache();
        let summary = CsvImporter::new().import_str(&mut cache, csv_data).unwrap();

        assert_eq!(summary.rows, 2);
        assert_eq!(summary.imported, 2);
        assert_eq!(cache.store().measurement_count().unwrap(), 2);
    }

    #[test]
    fn test_bad_rows_are_reported() {
        let csv_data = "Date,Weight
2024-02-01,abc
not a date,150
2024-02-03,151";

        let mut cache = cache();
        let summary = CsvImporter::new().import_str(&mut cache, csv_data).unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failed, 2);
        assert!(summary.errors[0].starts_with("Line 2:"));
        assert!(summary.errors[1].starts_with("Line 3:"));
    }

    #[test]
    fn test_delete_first_and_progress() {
        let mut cache = cache();
        CsvImporter::new()
            .import_str(&mut cache, "Date,Weight\n2020-01-01,200")
            .unwrap();

        let mut reported = Vec::new();
        let summary = CsvImporter::new()
            .with_delete_first(true)
            .perform_import(
                &mut cache,
                "Date,Weight\n2024-01-01,180\n2024-01-02,179".as_bytes(),
                |p| reported.push(p),
            )
            .unwrap();

        assert_eq!(summary.imported, 2);
        assert_eq!(reported, vec![0.5, 1.0]);
        assert_eq!(cache.store().measurement_count().unwrap(), 2);
        assert_eq!(
            cache.store().earliest_month().unwrap(),
            MonthIndex::from_year_month(2024, 1)
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_configured_date_format() {
        let importer = CsvImporter::new().with_date_format("%d-%m-%Y");
        assert_eq!(
            importer.parse_date("31-12-2023").unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
        assert_eq!(
            importer.parse_date("2024-02-29T07:30:00").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(importer.parse_date("yesterday").is_err());
    }
}
