//! Heap-backed chart bitmap implementing `DrawTarget<Color = Rgb565>`.

use crate::render::error::RenderError;
use crate::render::params::PixelBounds;
use embedded_graphics::pixelcolor::{Rgb565, Rgb888};
use embedded_graphics::prelude::*;
use std::convert::Infallible;
use std::io::Write;

/// Largest bitmap a render may allocate (4096 x 4096)
pub const MAX_PIXELS: u64 = 4096 * 4096;

/// A finished (or in-progress) chart bitmap
#[derive(Clone, PartialEq, Eq)]
pub struct ChartImage {
    width: u32,
    height: u32,
    pixels: Vec<Rgb565>,
}

impl ChartImage {
    /// Allocate a bitmap filled with `background`
    ///
    /// Fails with [`RenderError::RenderFailed`] for empty bounds, bounds over
    /// [`MAX_PIXELS`], or when the allocation itself is refused.
    pub fn new(bounds: PixelBounds, background: Rgb565) -> Result<Self, RenderError> {
        let count = bounds.pixel_count();
        if count == 0 {
            return Err(RenderError::RenderFailed(format!(
                "empty bitmap {}x{}",
                bounds.width, bounds.height
            )));
        }
        if count > MAX_PIXELS {
            return Err(RenderError::RenderFailed(format!(
                "bitmap {}x{} exceeds {} pixels",
                bounds.width, bounds.height, MAX_PIXELS
            )));
        }

        let count = count as usize;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(count)
            .map_err(|e| RenderError::RenderFailed(e.to_string()))?;
        pixels.resize(count, background);

        Ok(Self {
            width: bounds.width,
            height: bounds.height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> PixelBounds {
        PixelBounds::new(self.width, self.height)
    }

    /// Colour at `(x, y)`, None outside the bitmap
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb565> {
        if x < self.width && y < self.height {
            self.pixels.get((y * self.width + x) as usize).copied()
        } else {
            None
        }
    }

    /// Number of pixels with the given colour
    pub fn count_color(&self, color: Rgb565) -> usize {
        self.pixels.iter().filter(|&&p| p == color).count()
    }

    /// Encode as binary PPM (P6)
    pub fn write_ppm<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        let mut bytes = Vec::with_capacity(self.pixels.len() * 3);
        for &pixel in &self.pixels {
            let rgb = Rgb888::from(pixel);
            bytes.extend_from_slice(&[rgb.r(), rgb.g(), rgb.b()]);
        }
        out.write_all(&bytes)?;
        out.flush()
    }
}

impl std::fmt::Debug for ChartImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl OriginDimensions for ChartImage {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for ChartImage {
    type Color = Rgb565;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let w = self.width as i32;
        let h = self.height as i32;

        for Pixel(coord, color) in pixels {
            if coord.x >= 0 && coord.y >= 0 && coord.x < w && coord.y < h {
                let idx = (coord.y * w + coord.x) as usize;
                self.pixels[idx] = color;
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.pixels.fill(color);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::primitives::{Line, PrimitiveStyle};

    #[test]
    fn test_new_rejects_bad_bounds() {
        assert!(matches!(
            ChartImage::new(PixelBounds::new(0, 10), Rgb565::WHITE),
            Err(RenderError::RenderFailed(_))
        ));
        assert!(matches!(
            ChartImage::new(PixelBounds::new(5000, 5000), Rgb565::WHITE),
            Err(RenderError::RenderFailed(_))
        ));
    }

    #[test]
    fn test_draw_clips_to_bounds() {
        let mut image = ChartImage::new(PixelBounds::new(4, 3), Rgb565::WHITE).unwrap();
        Line::new(Point::new(-5, 1), Point::new(10, 1))
            .into_styled(PrimitiveStyle::with_stroke(Rgb565::RED, 1))
            .draw(&mut image)
            .unwrap();

        assert_eq!(image.count_color(Rgb565::RED), 4);
        assert_eq!(image.pixel(0, 1), Some(Rgb565::RED));
        assert_eq!(image.pixel(0, 0), Some(Rgb565::WHITE));
        assert_eq!(image.pixel(4, 0), None);
    }

    #[test]
    fn test_write_ppm() {
        let image = ChartImage::new(PixelBounds::new(2, 2), Rgb565::BLACK).unwrap();
        let mut out = Vec::new();
        image.write_ppm(&mut out).unwrap();

        let header = b"P6\n2 2\n255\n";
        assert!(out.starts_with(header));
        assert_eq!(out.len(), header.len() + 12);
    }
}
