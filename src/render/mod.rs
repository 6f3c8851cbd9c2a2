//! Chart Rendering
//!
//! - **params**: Owned render inputs and the weight/day to pixel mapping
//! - **image**: `Rgb565` bitmap implementing `embedded_graphics::DrawTarget`
//! - **draw**: Layer-by-layer rasterization with cooperative cancellation
//! - **renderer**: Background task pool, task handles and completions
//! - **error**: Error types
//!
//! ```text
//! submit(snapshot, params, tx) → Queued → (permit) → Running → spawn_blocking(render_chart)
//!                                   │                                │
//!                                cancel ──────────────→ Cancelled    └→ tx.send(RenderCompletion)
//! ```

pub mod draw;
pub mod error;
pub mod image;
pub mod params;
pub mod renderer;

pub use draw::{render_chart, RenderStop};
pub use error::RenderError;
pub use image::ChartImage;
pub use params::{AffineTransform, ChartPoint, PixelBounds, RenderParameters, SpanSnapshot};
pub use renderer::{
    ChartRenderer, CompletionReceiver, CompletionSender, RenderCompletion, RenderTask, TaskHandle,
    TaskState,
};
