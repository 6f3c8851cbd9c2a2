//! Trend span descriptors and their computed statistics

use crate::render::{
    ChartImage, ChartPoint, ChartRenderer, CompletionSender, PixelBounds, RenderCompletion,
    RenderError, RenderParameters, RenderTask, SpanSnapshot, TaskHandle,
};
use crate::storage::{MonthDayKey, FLAG_COUNT};
use crate::units::{energy_equivalent, EnergyUnit, WeightUnit};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Nominal length of a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanLength {
    Days(u32),
    AllTime,
}

/// Configured span: title, nominal length and visibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendSpanSpec {
    pub title: String,
    /// Nominal length in days; omitted for "all time"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl TrendSpanSpec {
    pub fn days(title: impl Into<String>, days: u32) -> Self {
        Self {
            title: title.into(),
            days: Some(days),
            visible: true,
        }
    }

    pub fn all_time(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            days: None,
            visible: true,
        }
    }

    pub fn length(&self) -> SpanLength {
        match self.days {
            Some(days) => SpanLength::Days(days.max(1)),
            None => SpanLength::AllTime,
        }
    }

    /// Week through All Time
    pub fn default_specs() -> Vec<TrendSpanSpec> {
        vec![
            TrendSpanSpec::days("Week", 7),
            TrendSpanSpec::days("Fortnight", 14),
            TrendSpanSpec::days("Month", 30),
            TrendSpanSpec::days("Quarter", 90),
            TrendSpanSpec::days("Six Months", 182),
            TrendSpanSpec::days("Year", 365),
            TrendSpanSpec::all_time("All Time"),
        ]
    }
}

/// Result of routing a completion to a span
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The image was attached to the span
    Attached,
    /// The completion belongs to a task the span no longer tracks
    Stale,
    /// The span's current task failed; its image slot is empty
    Failed(RenderError),
}

/// Computed statistics for one configured span
#[derive(Debug)]
pub struct TrendSpan {
    pub spec: TrendSpanSpec,
    pub begin: MonthDayKey,
    pub end: MonthDayKey,
    /// Least-squares slope of measured weight per day
    pub weight_per_day: f32,
    /// `weight_per_day` times the span's inclusive day count
    pub weight_change: f32,
    /// Regression value on the first day
    pub intercept: f32,
    /// Whether at least two measurements fed the regression
    pub trending: bool,
    /// Whether history is shorter than the nominal length
    pub clamped: bool,
    pub measured_days: u32,
    /// Fraction of measured days carrying each flag
    pub flag_frequencies: [f32; FLAG_COUNT],
    pub(crate) points: Vec<ChartPoint>,
    image: Option<Arc<ChartImage>>,
    task: Option<RenderTask>,
}

impl TrendSpan {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        spec: TrendSpanSpec,
        begin: MonthDayKey,
        end: MonthDayKey,
        weight_per_day: f32,
        intercept: f32,
        trending: bool,
        clamped: bool,
        flag_frequencies: [f32; FLAG_COUNT],
        points: Vec<ChartPoint>,
    ) -> Self {
        let day_count = begin.days_until(end) + 1;
        Self {
            spec,
            begin,
            end,
            weight_per_day,
            weight_change: weight_per_day * day_count as f32,
            intercept,
            trending,
            clamped,
            measured_days: points.len() as u32,
            flag_frequencies,
            points,
            image: None,
            task: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.spec.title
    }

    pub fn length(&self) -> SpanLength {
        self.spec.length()
    }

    pub fn is_visible(&self) -> bool {
        self.spec.visible
    }

    /// Inclusive number of days from begin to end
    pub fn day_count(&self) -> u32 {
        (self.begin.days_until(self.end) + 1) as u32
    }

    pub fn begin_date(&self) -> Option<NaiveDate> {
        self.begin.to_date()
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end.to_date()
    }

    /// Daily energy surplus (positive) or deficit (negative) implied by the slope
    pub fn energy_per_day(&self, weight_unit: WeightUnit, energy_unit: EnergyUnit) -> f32 {
        energy_equivalent(self.weight_per_day, weight_unit, energy_unit)
    }

    /// Owned copy of everything a render needs
    pub fn snapshot(&self) -> SpanSnapshot {
        SpanSnapshot {
            begin: self.begin,
            day_count: self.day_count(),
            weight_per_day: self.weight_per_day,
            intercept: self.intercept,
            trending: self.trending,
            points: self.points.clone(),
        }
    }

    /// Parameters fitting this span into `bounds`
    pub fn render_parameters(&self, bounds: PixelBounds, max_grid_lines: u32) -> RenderParameters {
        RenderParameters::fit(&self.snapshot(), bounds, max_grid_lines)
    }

    pub fn image(&self) -> Option<&Arc<ChartImage>> {
        self.image.as_ref()
    }

    pub fn current_task(&self) -> Option<TaskHandle> {
        self.task.as_ref().map(RenderTask::handle)
    }

    /// Submit a render, cancelling and replacing any outstanding one
    pub fn request_render(
        &mut self,
        renderer: &ChartRenderer,
        params: RenderParameters,
        completions: CompletionSender,
    ) -> TaskHandle {
        self.cancel_render();
        let task = renderer.submit(self.snapshot(), params, completions);
        let handle = task.handle();
        debug!(span = %self.spec.title, handle = %handle, "Render requested");
        self.task = Some(task);
        handle
    }

    /// Cancel the outstanding render, if any
    pub fn cancel_render(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }

    /// Attach a completion if it belongs to the current task
    pub fn accept_completion(&mut self, completion: RenderCompletion) -> CompletionOutcome {
        if self.current_task() != Some(completion.handle) {
            debug!(span = %self.spec.title, handle = %completion.handle, "Discarded stale render");
            return CompletionOutcome::Stale;
        }

        self.task = None;
        match completion.result {
            Ok(image) => {
                self.image = Some(image);
                CompletionOutcome::Attached
            }
            Err(e) => {
                self.image = None;
                CompletionOutcome::Failed(e)
            }
        }
    }

    /// Show or hide the span; hiding drops its image and cancels its render
    pub fn set_visible(&mut self, visible: bool) {
        self.spec.visible = visible;
        if !visible {
            self.cancel_render();
            self.image = None;
        }
    }

    pub fn summary(&self, weight_unit: WeightUnit, energy_unit: EnergyUnit) -> SpanSummary {
        SpanSummary {
            title: self.spec.title.clone(),
            begin: self.begin_date(),
            end: self.end_date(),
            days: self.day_count(),
            clamped: self.clamped,
            measured_days: self.measured_days,
            trending: self.trending,
            weight_per_day: self.weight_per_day,
            weight_change: self.weight_change,
            energy_per_day: self.energy_per_day(weight_unit, energy_unit),
            weight_unit,
            energy_unit,
            flag_frequencies: self.flag_frequencies,
        }
    }
}

/// Serializable view of a span for reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanSummary {
    pub title: String,
    pub begin: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub days: u32,
    pub clamped: bool,
    pub measured_days: u32,
    pub trending: bool,
    pub weight_per_day: f32,
    pub weight_change: f32,
    pub energy_per_day: f32,
    pub weight_unit: WeightUnit,
    pub energy_unit: EnergyUnit,
    pub flag_frequencies: [f32; FLAG_COUNT],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DayFlags, MonthIndex};
    use tokio::sync::mpsc;

    fn span(days: u32) -> TrendSpan {
        let begin = MonthIndex::from_year_month(2024, 1).unwrap().first_day();
        let points = (0..days)
            .map(|i| ChartPoint {
                offset: i,
                scale_weight: 180.0 - 0.2 * i as f32,
                trend_weight: Some(180.0 - 0.2 * i as f32),
                flags: DayFlags::empty(),
            })
            .collect();
        TrendSpan::new(
            TrendSpanSpec::days("Test", days),
            begin,
            begin.add_days(days as i64 - 1),
            -0.2,
            180.0,
            true,
            false,
            [0.0; FLAG_COUNT],
            points,
        )
    }

    #[test]
    fn test_spec_lengths() {
        let specs = TrendSpanSpec::default_specs();
        assert_eq!(specs.len(), 7);
        assert_eq!(specs[0].length(), SpanLength::Days(7));
        assert_eq!(specs[6].length(), SpanLength::AllTime);
        assert_eq!(TrendSpanSpec::days("Zero", 0).length(), SpanLength::Days(1));
    }

    #[test]
    fn test_span_dates_and_energy() {
        let span = span(7);
        assert_eq!(span.day_count(), 7);
        assert_eq!(span.end_date(), NaiveDate::from_ymd_opt(2024, 1, 7));
        assert!((span.weight_change + 1.4).abs() < 1e-5);

        // 0.2 lb/day loss is a 700 cal/day deficit
        let energy = span.energy_per_day(WeightUnit::Pounds, EnergyUnit::Calories);
        assert!((energy + 700.0).abs() < 0.01);

        let summary = span.summary(WeightUnit::Pounds, EnergyUnit::Calories);
        assert_eq!(summary.measured_days, 7);
        assert_eq!(summary.title, "Test");
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let renderer = ChartRenderer::from_current(2).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut span = span(10);
        let params = span.render_parameters(PixelBounds::new(50, 40), 5);

        let first = span.request_render(&renderer, params, tx.clone());
        let first_completion = rx.recv().await.unwrap();
        assert_eq!(first_completion.handle, first);

        let second = span.request_render(&renderer, params, tx);
        assert_ne!(first, second);

        assert_eq!(span.accept_completion(first_completion), CompletionOutcome::Stale);
        assert!(span.image().is_none());

        let second_completion = rx.recv().await.unwrap();
        assert_eq!(span.accept_completion(second_completion), CompletionOutcome::Attached);
        assert_eq!(span.image().map(|i| i.width()), Some(50));
        assert_eq!(span.current_task(), None);
    }

    #[tokio::test]
    async fn test_resubmit_while_queued_supersedes_first() {
        let renderer = ChartRenderer::from_current(1).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut span = span(10);
        let params = span.render_parameters(PixelBounds::new(50, 40), 5);

        // hold the only permit so both renders stay queued
        let permit = Arc::clone(&renderer.permits).acquire_owned().await.unwrap();
        let first = span.request_render(&renderer, params, tx.clone());
        let second = span.request_render(&renderer, params, tx);
        assert_eq!(span.current_task(), Some(second));

        // a result for the first handle, however late, no longer belongs here
        let late = RenderCompletion {
            handle: first,
            result: Err(RenderError::RenderFailed("superseded".to_string())),
        };
        assert_eq!(span.accept_completion(late), CompletionOutcome::Stale);
        assert_eq!(span.current_task(), Some(second));
        drop(permit);

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.handle, second);
        assert_eq!(span.accept_completion(completion), CompletionOutcome::Attached);
        assert_eq!(span.image().map(|i| i.height()), Some(40));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hiding_tears_down() {
        let renderer = ChartRenderer::from_current(1).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut span = span(5);
        let params = span.render_parameters(PixelBounds::new(20, 20), 5);

        span.request_render(&renderer, params, tx.clone());
        let done = rx.recv().await.unwrap();
        span.accept_completion(done);
        assert!(span.image().is_some());

        span.request_render(&renderer, params, tx);
        span.set_visible(false);
        assert!(span.image().is_none());
        assert!(span.current_task().is_none());
        assert!(!span.is_visible());
    }

    #[tokio::test]
    async fn test_failed_completion_leaves_slot_empty() {
        let renderer = ChartRenderer::from_current(1).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut span = span(3);

        let params = span.render_parameters(PixelBounds::new(0, 0), 5);
        span.request_render(&renderer, params, tx);
        let completion = rx.recv().await.unwrap();

        assert!(matches!(
            span.accept_completion(completion),
            CompletionOutcome::Failed(RenderError::RenderFailed(_))
        ));
        assert!(span.image().is_none());
        assert!(span.current_task().is_none());
    }
}
