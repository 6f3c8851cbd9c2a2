//! Render inputs
//!
//! [`SpanSnapshot`] is the owned copy of everything a render reads, and
//! [`RenderParameters`] maps its weight/day space onto pixel space.

use crate::storage::{DayFlags, MonthDayKey};
use embedded_graphics::prelude::Point;
use serde::{Deserialize, Serialize};

/// Candidate spacings between horizontal grid lines, in weight units
pub const GRID_INCREMENTS: [f32; 7] = [0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0];

/// Smallest weight range a chart will cover
pub const MIN_WEIGHT_RANGE: f32 = 1.0;

/// One measured day within a span
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Days since the span's first day
    pub offset: u32,
    pub scale_weight: f32,
    pub trend_weight: Option<f32>,
    pub flags: DayFlags,
}

/// Immutable copy of a span's statistics and points, taken at submission
#[derive(Debug, Clone, PartialEq)]
pub struct SpanSnapshot {
    pub begin: MonthDayKey,
    /// Inclusive number of days covered
    pub day_count: u32,
    pub weight_per_day: f32,
    /// Regression value at offset 0
    pub intercept: f32,
    pub trending: bool,
    pub points: Vec<ChartPoint>,
}

impl SpanSnapshot {
    /// Lowest and highest weight the chart has to show
    pub fn weight_range(&self) -> Option<(f32, f32)> {
        let mut values = self
            .points
            .iter()
            .flat_map(|p| std::iter::once(p.scale_weight).chain(p.trend_weight));

        let first = values.next()?;
        let (mut lo, mut hi) = (first, first);
        for v in values {
            lo = lo.min(v);
            hi = hi.max(v);
        }

        if self.trending {
            let last_offset = self.day_count.saturating_sub(1) as f32;
            for v in [self.intercept, self.intercept + self.weight_per_day * last_offset] {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        Some((lo, hi))
    }
}

/// Row-vector affine transform: `x' = a·x + c·y + tx`, `y' = b·x + d·y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }
}

/// Target bitmap size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelBounds {
    pub width: u32,
    pub height: u32,
}

impl PixelBounds {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Mapping from (day offset, weight) to pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParameters {
    pub min_weight: f32,
    pub max_weight: f32,
    /// Pixels per day
    pub scale_x: f32,
    /// Pixels per weight unit
    pub scale_y: f32,
    pub grid_min_weight: f32,
    pub grid_max_weight: f32,
    pub grid_increment_weight: f32,
    pub transform: AffineTransform,
    pub bounds: PixelBounds,
}

impl RenderParameters {
    /// Fit a snapshot into `bounds` with at most `max_grid_lines` grid lines
    ///
    /// The weight axis is widened to whole grid increments and flipped so
    /// heavier weights sit higher. Each day owns one column of width
    /// `scale_x` and is plotted at the column's centre.
    pub fn fit(snapshot: &SpanSnapshot, bounds: PixelBounds, max_grid_lines: u32) -> Self {
        let (lo, hi) = snapshot.weight_range().unwrap_or((0.0, 0.0));
        let (lo, hi) = if hi - lo < MIN_WEIGHT_RANGE {
            let mid = (lo + hi) / 2.0;
            (mid - MIN_WEIGHT_RANGE / 2.0, mid + MIN_WEIGHT_RANGE / 2.0)
        } else {
            (lo, hi)
        };

        let max_lines = max_grid_lines.max(1) as f32;
        let increment = GRID_INCREMENTS
            .iter()
            .copied()
            .find(|inc| (hi - lo) / inc <= max_lines)
            .unwrap_or(GRID_INCREMENTS[GRID_INCREMENTS.len() - 1]);

        let grid_min_weight = (lo / increment).floor() * increment;
        let mut grid_max_weight = (hi / increment).ceil() * increment;
        if grid_max_weight <= grid_min_weight {
            grid_max_weight = grid_min_weight + increment;
        }

        let scale_x = bounds.width as f32 / snapshot.day_count.max(1) as f32;
        let scale_y = bounds.height as f32 / (grid_max_weight - grid_min_weight);

        let transform = AffineTransform {
            a: scale_x,
            b: 0.0,
            c: 0.0,
            d: -scale_y,
            tx: scale_x / 2.0,
            ty: scale_y * grid_max_weight,
        };

        Self {
            min_weight: grid_min_weight,
            max_weight: grid_max_weight,
            scale_x,
            scale_y,
            grid_min_weight,
            grid_max_weight,
            grid_increment_weight: increment,
            transform,
            bounds,
        }
    }

    /// Pixel position of a weight on a given day offset
    pub fn to_pixel(&self, offset: f32, weight: f32) -> Point {
        let (x, y) = self.transform.apply(offset, weight);
        Point::new(x.round() as i32, y.round() as i32)
    }

    /// Weights at which horizontal grid lines are drawn
    pub fn grid_weights(&self) -> impl Iterator<Item = f32> + '_ {
        let steps = ((self.grid_max_weight - self.grid_min_weight) / self.grid_increment_weight)
            .round() as u32;
        (0..=steps).map(move |i| self.grid_min_weight + i as f32 * self.grid_increment_weight)
    }
}
