//! External Integrations
//!
//! Thin collaborators that only use the core's public interface:
//! - CSV import (auto-detected columns, optional delete-first, progress reporting)
//! - CSV export (`Date,Weight,Mark1,Mark2,Mark3,Mark4,Note`)

mod csv_export;
mod csv_import;

pub use csv_export::{export_csv, export_csv_to_path, EXPORT_HEADER};
pub use csv_import::{CsvImporter, ImportField, ImportSummary};

use crate::storage::StoreError;

/// Errors that can occur during integration operations
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
