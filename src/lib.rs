//! # Trendline
//!
//! Personal weight tracking: daily measurements in a month-granular SQLite
//! store, smoothed trend weights, regression over trailing spans, and
//! background chart rendering.
//!
//! ## Features
//!
//! - **Month-granular storage**: One SQLite row per recorded day, loaded and saved a month at a time
//! - **Write-through cache**: Every mutation is durable before the cache sees it
//! - **Change detection**: A monotonic mutation counter tells consumers when to recompute
//! - **Trend analytics**: Least-squares regression and flag frequencies per span
//! - **Background charts**: Cancellable renders on a bounded task pool
//!
//! ## Modules
//!
//! - [`storage`]: Persistent store, month cache and core types
//! - [`trends`]: Trend span computation and the trend board
//! - [`render`]: Chart parameters, rasterization and the render pool
//! - [`units`]: Weight and energy unit policy
//! - [`integrations`]: CSV import and export
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trendline::render::{ChartRenderer, PixelBounds};
//! use trendline::storage::{MonthCache, MonthDayKey, PersistentStore};
//! use trendline::trends::{TrendBoard, TrendSpanSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cache = MonthCache::new(PersistentStore::open("./weights.db")?);
//!
//!     // Record today's weight
//!     let today = MonthDayKey::from_date(chrono::Local::now().date_naive());
//!     cache.update_day(today, |day| day.scale_weight = Some(181.4))?;
//!
//!     // Compute spans and render their charts
//!     let mut board = TrendBoard::new(TrendSpanSpec::default_specs());
//!     board.refresh(&mut cache)?;
//!
//!     let renderer = ChartRenderer::from_current(2)?;
//!     board.request_charts(&renderer, PixelBounds::new(320, 160), 8);
//!     while board.has_pending_renders() {
//!         board.next_completion().await;
//!     }
//!
//!     for span in board.spans() {
//!         println!("{}: {:+.2}/day", span.title(), span.weight_per_day);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod integrations;
pub mod render;
pub mod storage;
pub mod trends;
pub mod units;

pub use storage::{MonthCache, PersistentStore, StoreError, StoreResult};
pub use trends::{TrendAnalyzer, TrendBoard, TrendSpan, TrendSpanSpec};
