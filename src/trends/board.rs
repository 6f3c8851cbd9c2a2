//! Trend Board
//!
//! Foreground owner of the computed spans. Recomputes them only when the
//! store's mutation counter has moved, submits chart renders for visible
//! spans, and routes render completions back to the span that asked for
//! them (by task handle; anything else is stale).

use crate::render::{
    ChartRenderer, CompletionReceiver, CompletionSender, PixelBounds, RenderCompletion, TaskHandle,
};
use crate::storage::{MonthCache, StoreResult};
use crate::trends::analyzer::TrendAnalyzer;
use crate::trends::span::{CompletionOutcome, TrendSpan, TrendSpanSpec};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct TrendBoard {
    specs: Vec<TrendSpanSpec>,
    spans: Vec<TrendSpan>,
    /// Counter value the current spans were computed at
    computed_at: Option<u64>,
    completions_tx: CompletionSender,
    completions_rx: CompletionReceiver,
}

impl TrendBoard {
    pub fn new(specs: Vec<TrendSpanSpec>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            specs,
            spans: Vec::new(),
            computed_at: None,
            completions_tx,
            completions_rx,
        }
    }

    pub fn specs(&self) -> &[TrendSpanSpec] {
        &self.specs
    }

    pub fn spans(&self) -> &[TrendSpan] {
        &self.spans
    }

    pub fn span(&self, title: &str) -> Option<&TrendSpan> {
        self.spans.iter().find(|s| s.title() == title)
    }

    /// Recompute spans if the store changed since the last computation
    ///
    /// Returns whether a recomputation happened. Replaced spans cancel their
    /// outstanding renders as they are dropped.
    pub fn refresh(&mut self, cache: &mut MonthCache) -> StoreResult<bool> {
        let current = cache.mutation_counter().current();
        if self.computed_at == Some(current) {
            return Ok(false);
        }

        self.spans = TrendAnalyzer::compute_trend_spans(cache, &self.specs)?;
        self.computed_at = Some(current);
        info!(spans = self.spans.len(), version = current, "Trend spans refreshed");
        Ok(true)
    }

    /// Submit renders for visible spans that have neither an image nor a task
    pub fn request_charts(
        &mut self,
        renderer: &ChartRenderer,
        bounds: PixelBounds,
        max_grid_lines: u32,
    ) -> Vec<TaskHandle> {
        let mut handles = Vec::new();
        for span in self.spans.iter_mut() {
            if !span.is_visible() || span.image().is_some() || span.current_task().is_some() {
                continue;
            }
            let params = span.render_parameters(bounds, max_grid_lines);
            handles.push(span.request_render(renderer, params, self.completions_tx.clone()));
        }
        handles
    }

    /// Show or hide a span by title
    pub fn set_visible(&mut self, title: &str, visible: bool) -> bool {
        if let Some(spec) = self.specs.iter_mut().find(|s| s.title == title) {
            spec.visible = visible;
        }
        match self.spans.iter_mut().find(|s| s.title() == title) {
            Some(span) => {
                span.set_visible(visible);
                true
            }
            None => false,
        }
    }

    /// Route every completion already delivered; returns how many attached
    pub fn apply_completions(&mut self) -> usize {
        let mut attached = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.route(completion) == CompletionOutcome::Attached {
                attached += 1;
            }
        }
        attached
    }

    /// Wait for the next completion and route it
    pub async fn next_completion(&mut self) -> Option<CompletionOutcome> {
        let completion = self.completions_rx.recv().await?;
        Some(self.route(completion))
    }

    /// Whether any span is waiting on a render
    pub fn has_pending_renders(&self) -> bool {
        self.spans.iter().any(|s| s.current_task().is_some())
    }

    fn route(&mut self, completion: RenderCompletion) -> CompletionOutcome {
        let handle = completion.handle;
        match self
            .spans
            .iter_mut()
            .find(|s| s.current_task() == Some(handle))
        {
            Some(span) => span.accept_completion(completion),
            None => {
                debug!(handle = %handle, "No span owns completion");
                CompletionOutcome::Stale
            }
        }
    }
}
