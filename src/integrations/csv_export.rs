//! CSV Export
//!
//! Writes every stored day in ascending order using the layout the importer
//! reads by default.

use super::IntegrationError;
use crate::storage::{PersistentStore, FLAG_COUNT};
use std::io::Write;
use std::path::Path;
use tracing::info;

pub const EXPORT_HEADER: [&str; 7] = ["Date", "Weight", "Mark1", "Mark2", "Mark3", "Mark4", "Note"];

/// Write all stored days to `out`; returns the number of rows written
pub fn export_csv<W: Write>(store: &PersistentStore, out: W) -> Result<usize, IntegrationError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(EXPORT_HEADER)?;

    let days = store.all_days()?;
    for (key, record) in &days {
        let mut row: Vec<String> = Vec::with_capacity(EXPORT_HEADER.len());
        row.push(key.to_string());
        // shortest text that parses back to the same f32
        row.push(record.scale_weight.map(|w| w.to_string()).unwrap_or_default());
        for i in 0..FLAG_COUNT {
            row.push(if record.flags.get(i) { "1" } else { "0" }.to_string());
        }
        row.push(record.note.clone().unwrap_or_default());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    info!(rows = days.len(), "CSV export finished");
    Ok(days.len())
}

/// Export to a file, creating parent directories as needed
pub fn export_csv_to_path(store: &PersistentStore, path: &Path) -> Result<usize, IntegrationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    export_csv(store, std::io::BufWriter::new(file))
}
