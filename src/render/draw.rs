//! Chart rasterization
//!
//! Draws a [`SpanSnapshot`] into a fresh [`ChartImage`]: background, weight
//! grid, trend polyline, measurement markers with sinker lines to the trend,
//! and the regression line. The cancel flag is polled between layers.

use crate::render::error::RenderError;
use crate::render::image::ChartImage;
use crate::render::params::{RenderParameters, SpanSnapshot};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, Line, PrimitiveStyle, PrimitiveStyleBuilder};
use std::sync::atomic::{AtomicBool, Ordering};

pub const BACKGROUND_COLOR: Rgb565 = Rgb565::new(31, 63, 31);
pub const GRID_COLOR: Rgb565 = Rgb565::new(26, 52, 26);
pub const TREND_COLOR: Rgb565 = Rgb565::new(28, 8, 4);
pub const SINKER_COLOR: Rgb565 = Rgb565::new(17, 34, 17);
pub const MARKER_COLOR: Rgb565 = Rgb565::new(4, 8, 20);
/// Marker fill for days with flag 0 set
pub const FLAGGED_MARKER_COLOR: Rgb565 = Rgb565::new(30 >> 3, 144 >> 2, 255 >> 3);
pub const REGRESSION_COLOR: Rgb565 = Rgb565::new(6, 40, 6);

/// Marker diameter in pixels
const MARKER_DIAMETER_PX: u32 = 5;
const TREND_LINE_WIDTH_PX: u32 = 2;

/// Why a render stopped without an image
#[derive(Debug, Clone, PartialEq)]
pub enum RenderStop {
    Cancelled,
    Failed(RenderError),
}

impl From<RenderError> for RenderStop {
    fn from(err: RenderError) -> Self {
        RenderStop::Failed(err)
    }
}

/// Rasterize `snapshot` with `params`, giving up as soon as `cancel` is set
pub fn render_chart(
    snapshot: &SpanSnapshot,
    params: &RenderParameters,
    cancel: &AtomicBool,
) -> Result<ChartImage, RenderStop> {
    let check = || {
        if cancel.load(Ordering::Acquire) {
            Err(RenderStop::Cancelled)
        } else {
            Ok(())
        }
    };

    check()?;
    let mut image = ChartImage::new(params.bounds, BACKGROUND_COLOR)?;

    draw_grid(params, &mut image);
    check()?;

    draw_trend(snapshot, params, &mut image);
    check()?;

    draw_markers(snapshot, params, &mut image);
    check()?;

    if snapshot.trending {
        let last = snapshot.day_count.saturating_sub(1) as f32;
        let start = params.to_pixel(0.0, snapshot.intercept);
        let end = params.to_pixel(last, snapshot.intercept + snapshot.weight_per_day * last);
        paint(
            &mut image,
            Line::new(start, end).into_styled(PrimitiveStyle::with_stroke(REGRESSION_COLOR, 1)),
        );
    }
    check()?;

    Ok(image)
}

fn draw_grid(params: &RenderParameters, image: &mut ChartImage) {
    let right = params.bounds.width as i32 - 1;
    let style = PrimitiveStyle::with_stroke(GRID_COLOR, 1);

    for weight in params.grid_weights() {
        let y = params.to_pixel(0.0, weight).y;
        paint(image, Line::new(Point::new(0, y), Point::new(right, y)).into_styled(style));
    }
}

fn draw_trend(snapshot: &SpanSnapshot, params: &RenderParameters, image: &mut ChartImage) {
    let style = PrimitiveStyle::with_stroke(TREND_COLOR, TREND_LINE_WIDTH_PX);

    let mut previous: Option<Point> = None;
    for point in &snapshot.points {
        let Some(trend) = point.trend_weight else {
            continue;
        };
        let current = params.to_pixel(point.offset as f32, trend);
        if let Some(prev) = previous {
            paint(image, Line::new(prev, current).into_styled(style));
        }
        previous = Some(current);
    }
}

fn draw_markers(snapshot: &SpanSnapshot, params: &RenderParameters, image: &mut ChartImage) {
    let sinker = PrimitiveStyle::with_stroke(SINKER_COLOR, 1);

    for point in &snapshot.points {
        let x = point.offset as f32;
        let center = params.to_pixel(x, point.scale_weight);

        if let Some(trend) = point.trend_weight {
            let foot = params.to_pixel(x, trend);
            paint(image, Line::new(center, foot).into_styled(sinker));
        }

        let fill = if point.flags.get(0) {
            FLAGGED_MARKER_COLOR
        } else {
            BACKGROUND_COLOR
        };
        let style = PrimitiveStyleBuilder::new()
            .stroke_color(MARKER_COLOR)
            .stroke_width(1)
            .fill_color(fill)
            .build();
        paint(
            image,
            Circle::with_center(center, MARKER_DIAMETER_PX).into_styled(style),
        );
    }
}

fn paint<T>(image: &mut ChartImage, item: T)
where
    T: Drawable<Color = Rgb565, Output = ()>,
{
    if let Err(never) = item.draw(image) {
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::params::{ChartPoint, PixelBounds};
    use crate::storage::{DayFlags, MonthIndex};

    fn declining(days: u32) -> SpanSnapshot {
        SpanSnapshot {
            begin: MonthIndex(0).first_day(),
            day_count: days,
            weight_per_day: -0.5,
            intercept: 160.0,
            trending: true,
            points: (0..days)
                .map(|i| ChartPoint {
                    offset: i,
                    scale_weight: 160.0 - 0.5 * i as f32 + if i % 2 == 0 { 1.0 } else { -1.0 },
                    trend_weight: Some(160.0 - 0.5 * i as f32),
                    flags: if i == 3 { DayFlags::empty().with(0) } else { DayFlags::empty() },
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_draws_all_layers() {
        let snapshot = declining(10);
        let params = RenderParameters::fit(&snapshot, PixelBounds::new(200, 120), 8);
        let image = render_chart(&snapshot, &params, &AtomicBool::new(false)).unwrap();

        assert_eq!(image.bounds(), PixelBounds::new(200, 120));
        assert!(image.count_color(GRID_COLOR) > 0);
        assert!(image.count_color(TREND_COLOR) > 0);
        assert!(image.count_color(MARKER_COLOR) > 0);
        assert!(image.count_color(FLAGGED_MARKER_COLOR) > 0);
        assert!(image.count_color(BACKGROUND_COLOR) > 0);
    }

    #[test]
    fn test_render_honours_cancel() {
        let snapshot = declining(5);
        let params = RenderParameters::fit(&snapshot, PixelBounds::new(50, 50), 8);

        let result = render_chart(&snapshot, &params, &AtomicBool::new(true));
        assert_eq!(result.unwrap_err(), RenderStop::Cancelled);
    }

    #[test]
    fn test_render_fails_on_empty_bounds() {
        let snapshot = declining(5);
        let params = RenderParameters::fit(&snapshot, PixelBounds::new(0, 50), 8);

        let result = render_chart(&snapshot, &params, &AtomicBool::new(false));
        assert!(matches!(result, Err(RenderStop::Failed(RenderError::RenderFailed(_)))));
    }
}
