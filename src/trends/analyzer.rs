//! Trend Analyzer
//!
//! Computes [`TrendSpan`] statistics by scanning months through the cache.
//! Every span ends on the latest measured day; its begin is clamped to the
//! earliest measured day. Measurements are read once for the widest span and
//! shared by the narrower ones.
//!
//! # Statistics
//! - `weight_per_day`: least-squares slope of measured weight against day offset
//! - `weight_change`: slope × inclusive day count
//! - `flag_frequencies`: share of measured days carrying each flag

use crate::render::ChartPoint;
use crate::storage::{MonthCache, MonthDayKey, StoreResult, FLAG_COUNT};
use crate::trends::span::{SpanLength, TrendSpan, TrendSpanSpec};
use tracing::debug;

/// Stateless span calculator; callers own freshness tracking
pub struct TrendAnalyzer;

impl TrendAnalyzer {
    /// Compute one span per descriptor, or nothing when the store has no measurements
    pub fn compute_trend_spans(
        cache: &mut MonthCache,
        specs: &[TrendSpanSpec],
    ) -> StoreResult<Vec<TrendSpan>> {
        let (first, last) = match (
            cache.store().earliest_measured_day()?,
            cache.store().latest_measured_day()?,
        ) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(Vec::new()),
        };
        let history_days = first.days_until(last) + 1;

        let widest = specs
            .iter()
            .map(|spec| span_days(spec.length(), history_days))
            .max()
            .unwrap_or(1);
        let window_begin = last.add_days(-(widest - 1));
        let samples = collect_points(cache, window_begin, last)?;

        let spans = specs
            .iter()
            .map(|spec| {
                let length = spec.length();
                let days = span_days(length, history_days);
                let clamped = matches!(length, SpanLength::Days(n) if n as i64 > history_days);
                let begin = last.add_days(-(days - 1));
                let start = window_begin.days_until(begin) as u32;

                let points: Vec<ChartPoint> = samples
                    .iter()
                    .filter(|p| p.offset >= start)
                    .map(|p| ChartPoint {
                        offset: p.offset - start,
                        ..*p
                    })
                    .collect();

                let (weight_per_day, intercept, trending) = match least_squares(&points) {
                    Some((slope, intercept)) => (slope, intercept, true),
                    None => (0.0, points.first().map_or(0.0, |p| p.scale_weight), false),
                };

                TrendSpan::new(
                    spec.clone(),
                    begin,
                    last,
                    weight_per_day,
                    intercept,
                    trending,
                    clamped,
                    flag_frequencies(&points),
                    points,
                )
            })
            .collect::<Vec<_>>();

        debug!(
            spans = spans.len(),
            samples = samples.len(),
            first = %first,
            last = %last,
            "Computed trend spans"
        );
        Ok(spans)
    }
}

/// Effective length in days after clamping to the available history
fn span_days(length: SpanLength, history_days: i64) -> i64 {
    match length {
        SpanLength::Days(n) => (n as i64).clamp(1, history_days),
        SpanLength::AllTime => history_days,
    }
}

/// Measured days in `[begin, end]`, offsets relative to `begin`
fn collect_points(
    cache: &mut MonthCache,
    begin: MonthDayKey,
    end: MonthDayKey,
) -> StoreResult<Vec<ChartPoint>> {
    let mut points = Vec::new();

    for month in begin.month.through(end.month) {
        let data = cache.get(month)?;
        for (key, record) in data.iter() {
            if key < begin || key > end {
                continue;
            }
            if let Some(weight) = record.scale_weight {
                points.push(ChartPoint {
                    offset: begin.days_until(key) as u32,
                    scale_weight: weight,
                    trend_weight: record.trend_weight,
                    flags: record.flags,
                });
            }
        }
    }

    Ok(points)
}

/// Slope and intercept of the least-squares line, None below two distinct days
fn least_squares(points: &[ChartPoint]) -> Option<(f32, f32)> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for p in points {
        let x = p.offset as f64;
        let y = p.scale_weight as f64;
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    let denominator = n * sxx - sx * sx;
    if denominator.abs() < f64::EPSILON {
        return None;
    }

    let slope = (n * sxy - sx * sy) / denominator;
    let intercept = (sy - slope * sx) / n;
    Some((slope as f32, intercept as f32))
}

fn flag_frequencies(points: &[ChartPoint]) -> [f32; FLAG_COUNT] {
    if points.is_empty() {
        return [0.0; FLAG_COUNT];
    }

    let mut counts = [0u32; FLAG_COUNT];
    for p in points {
        for (i, count) in counts.iter_mut().enumerate() {
            if p.flags.get(i) {
                *count += 1;
            }
        }
    }

    let measured = points.len() as f32;
    counts.map(|c| c as f32 / measured)
}
