//! Background chart renderer
//!
//! Each [`ChartRenderer::submit`] spawns a task on the runtime that waits for
//! a concurrency permit, rasterizes on the blocking pool and reports a
//! [`RenderCompletion`] over the caller's channel. The returned [`RenderTask`]
//! observes the task's state and cancels it when asked or dropped.

use crate::render::draw::{render_chart, RenderStop};
use crate::render::error::RenderError;
use crate::render::image::ChartImage;
use crate::render::params::{RenderParameters, SpanSnapshot};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// Identity of one submitted render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "render#{}", self.0)
    }
}

/// Lifecycle of a render task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Queued = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Queued,
            1 => TaskState::Running,
            2 => TaskState::Completed,
            3 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }
}

/// Outcome of a render, routed back to the submitter
#[derive(Debug)]
pub struct RenderCompletion {
    pub handle: TaskHandle,
    pub result: Result<Arc<ChartImage>, RenderError>,
}

pub type CompletionSender = mpsc::UnboundedSender<RenderCompletion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<RenderCompletion>;

#[derive(Debug)]
struct TaskShared {
    cancel: AtomicBool,
    state: AtomicU8,
}

impl TaskShared {
    fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Caller-side handle of a submitted render; cancels the render on drop
#[derive(Debug)]
pub struct RenderTask {
    handle: TaskHandle,
    shared: Arc<TaskShared>,
}

impl RenderTask {
    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Ask the render to stop at its next checkpoint
    pub fn cancel(&self) {
        if !self.shared.cancel.swap(true, Ordering::AcqRel) {
            debug!(handle = %self.handle, "Render cancel requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

impl Drop for RenderTask {
    fn drop(&mut self) {
        if !self.state().is_finished() {
            self.cancel();
        }
    }
}

/// Bounded-concurrency chart renderer
#[derive(Debug)]
pub struct ChartRenderer {
    runtime: Handle,
    pub(crate) permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl ChartRenderer {
    /// Renderer on `runtime` running at most `max_concurrent` renders at once
    pub fn new(runtime: Handle, max_concurrent: usize) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_id: AtomicU64::new(1),
        }
    }

    /// Renderer on the runtime the caller is running in
    pub fn from_current(max_concurrent: usize) -> Result<Self, RenderError> {
        let runtime = Handle::try_current().map_err(|e| RenderError::NoRuntime(e.to_string()))?;
        Ok(Self::new(runtime, max_concurrent))
    }

    /// Schedule a render of `snapshot`
    ///
    /// The completion is sent on `completions` unless the task is cancelled
    /// first. Cancelled tasks deliver nothing.
    pub fn submit(
        &self,
        snapshot: SpanSnapshot,
        params: RenderParameters,
        completions: CompletionSender,
    ) -> RenderTask {
        let handle = TaskHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(TaskShared {
            cancel: AtomicBool::new(false),
            state: AtomicU8::new(TaskState::Queued as u8),
        });

        debug!(
            handle = %handle,
            width = params.bounds.width,
            height = params.bounds.height,
            points = snapshot.points.len(),
            "Render queued"
        );

        let task_shared = Arc::clone(&shared);
        let permits = Arc::clone(&self.permits);
        self.runtime.spawn(async move {
            let result = run(handle, snapshot, params, &task_shared, permits).await;
            let Some(result) = result else {
                task_shared.set_state(TaskState::Cancelled);
                debug!(handle = %handle, "Render cancelled");
                return;
            };

            match &result {
                Ok(_) => {
                    task_shared.set_state(TaskState::Completed);
                    debug!(handle = %handle, "Render completed");
                }
                Err(e) => {
                    task_shared.set_state(TaskState::Failed);
                    warn!(handle = %handle, error = %e, "Render failed");
                }
            }

            if completions.send(RenderCompletion { handle, result }).is_err() {
                debug!(handle = %handle, "Completion receiver gone");
            }
        });

        RenderTask { handle, shared }
    }
}

/// None when the render was cancelled
async fn run(
    handle: TaskHandle,
    snapshot: SpanSnapshot,
    params: RenderParameters,
    shared: &Arc<TaskShared>,
    permits: Arc<Semaphore>,
) -> Option<Result<Arc<ChartImage>, RenderError>> {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return Some(Err(RenderError::RenderFailed(
                "renderer shut down".to_string(),
            )))
        }
    };

    if shared.is_cancelled() {
        return None;
    }
    shared.set_state(TaskState::Running);
    debug!(handle = %handle, "Render running");

    let job = Arc::clone(shared);
    let joined =
        tokio::task::spawn_blocking(move || render_chart(&snapshot, &params, &job.cancel)).await;

    match joined {
        Ok(Ok(_)) if shared.is_cancelled() => None,
        Ok(Ok(image)) => Some(Ok(Arc::new(image))),
        Ok(Err(RenderStop::Cancelled)) => None,
        Ok(Err(RenderStop::Failed(e))) => Some(Err(e)),
        Err(e) => Some(Err(RenderError::RenderFailed(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::params::{ChartPoint, PixelBounds};
    use crate::storage::{DayFlags, MonthIndex};

    fn snapshot(base: f32, days: u32) -> SpanSnapshot {
        SpanSnapshot {
            begin: MonthIndex(0).first_day(),
            day_count: days,
            weight_per_day: 0.0,
            intercept: base,
            trending: false,
            points: (0..days)
                .map(|i| ChartPoint {
                    offset: i,
                    scale_weight: base + i as f32,
                    trend_weight: Some(base + i as f32 * 0.5),
                    flags: DayFlags::empty(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_renders_are_isolated() {
        let renderer = ChartRenderer::from_current(2).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut small = snapshot(100.0, 7);
        let big = snapshot(200.0, 30);
        let a = renderer.submit(
            small.clone(),
            RenderParameters::fit(&small, PixelBounds::new(40, 30), 5),
            tx.clone(),
        );
        let b = renderer.submit(
            big.clone(),
            RenderParameters::fit(&big, PixelBounds::new(120, 80), 5),
            tx,
        );
        // the caller's copy is free to change after submission
        small.points.clear();

        let mut sizes = std::collections::HashMap::new();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            let image = completion.result.unwrap();
            sizes.insert(completion.handle, (image.width(), image.height()));
        }

        assert_ne!(a.handle(), b.handle());
        assert_eq!(sizes[&a.handle()], (40, 30));
        assert_eq!(sizes[&b.handle()], (120, 80));
        assert_eq!(a.state(), TaskState::Completed);
        assert_eq!(b.state(), TaskState::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_task_delivers_nothing() {
        let renderer = ChartRenderer::from_current(1).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let snap = snapshot(150.0, 10);
        let params = RenderParameters::fit(&snap, PixelBounds::new(60, 40), 5);

        // hold the only permit so the task is still queued when cancelled
        let permit = Arc::clone(&renderer.permits).acquire_owned().await.unwrap();
        let task = renderer.submit(snap.clone(), params, tx.clone());
        assert_eq!(task.state(), TaskState::Queued);
        task.cancel();
        drop(permit);

        let follow_up = renderer.submit(snap, params, tx);
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.handle, follow_up.handle());
        assert!(completion.result.is_ok());

        tokio::task::yield_now().await;
        assert!(task.is_cancelled());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_render_reports_error() {
        let renderer = ChartRenderer::from_current(1).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let snap = snapshot(150.0, 3);
        let params = RenderParameters::fit(&snap, PixelBounds::new(10_000, 10_000), 5);

        let task = renderer.submit(snap, params, tx);
        let completion = rx.recv().await.unwrap();

        assert_eq!(completion.handle, task.handle());
        assert!(matches!(completion.result, Err(RenderError::RenderFailed(_))));
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn test_from_current_outside_runtime() {
        assert!(matches!(
            ChartRenderer::from_current(1),
            Err(RenderError::NoRuntime(_))
        ));
    }
}
