//! Trend Analytics
//!
//! - **span**: Span descriptors, computed statistics and per-span render state
//! - **analyzer**: Regression and flag-frequency computation over the month cache
//! - **board**: Foreground consumer tying spans, the mutation counter and renders together

pub mod analyzer;
pub mod board;
pub mod span;

pub use analyzer::TrendAnalyzer;
pub use board::TrendBoard;
pub use span::{CompletionOutcome, SpanLength, SpanSummary, TrendSpan, TrendSpanSpec};
