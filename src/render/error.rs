//! Chart rendering error types

use thiserror::Error;

/// Errors delivered with a render completion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// The bitmap could not be produced (allocation, size cap, empty bounds)
    #[error("Render failed: {0}")]
    RenderFailed(String),

    /// No async runtime was available to schedule renders on
    #[error("No runtime available: {0}")]
    NoRuntime(String),
}
