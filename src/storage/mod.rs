//! Trendline Storage
//!
//! Month-granular persistence for daily measurements:
//!
//! - **types**: Core data structures (MonthIndex, MonthDayKey, DayRecord, MonthData)
//! - **store**: SQLite-backed persistent store and mutation counter
//! - **cache**: Lazily populated in-memory month cache with write-through mutations
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   MonthCache::mutate → clone + apply → re-derive trend → save_months (tx) → bump counter → swap in
//!
//! Read Path:
//!   MonthCache::get → cached? → PersistentStore::load_month
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use trendline::storage::{MonthCache, MonthDayKey, PersistentStore};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PersistentStore::open("./weights.db")?;
//!     let mut cache = MonthCache::new(store);
//!
//!     let today = MonthDayKey::from_date(chrono::Local::now().date_naive());
//!     cache.update_day(today, |day| day.scale_weight = Some(172.4))?;
//!
//!     let month = cache.get(today.month)?;
//!     println!("{} measured days in {}", month.measured_count(), month.month());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::MonthCache;
pub use error::{StoreError, StoreResult};
pub use store::{PersistentStore, SCHEMA_VERSION};
pub use types::{
    DayFlags, DayRecord, DaySlot, MonthData, MonthDayKey, MonthIndex, MutationCounter, FLAG_COUNT,
    TREND_SMOOTHING,
};
