// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Overlaying frames onto base map viewports.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::caption::draw_caption;
use crate::frame::{FrameLayer, RadarFrame};
use crate::projection::TileGrid;
use crate::viewport::Viewport;

/// Alpha-blend `frame` over `viewport`.
///
/// The frame is stretched over the pixel rectangle its bounding box occupies
/// on the base map, then clipped to the viewport. A frame that misses the
/// viewport entirely yields an unchanged copy of the viewport.
#[must_use]
pub fn composite(grid: &TileGrid, viewport: &Viewport, frame: &RadarFrame) -> RgbaImage {
    let mut output = viewport.image().as_ref().clone();

    let frame_rect = grid.pixel_rect(frame.bounds());
    if frame_rect.is_empty() {
        return output;
    }
    let view_rect = viewport.rect();
    let Some(visible) = frame_rect.intersect(&view_rect) else {
        return output;
    };

    // Only the part of the source that lands in the viewport is resampled
    let source = frame.image();
    let (src_w, src_h) = source.dimensions();
    let (x, width) = source_span(
        visible.x - frame_rect.x,
        visible.width,
        src_w,
        frame_rect.width,
    );
    let (y, height) = source_span(
        visible.y - frame_rect.y,
        visible.height,
        src_h,
        frame_rect.height,
    );
    let region = imageops::crop_imm(source.as_ref(), x, y, width, height).to_image();
    let clipped = if region.dimensions() == (visible.width, visible.height) {
        region
    } else {
        imageops::resize(&region, visible.width, visible.height, FilterType::Lanczos3)
    };

    imageops::overlay(
        &mut output,
        &clipped,
        visible.x - view_rect.x,
        visible.y - view_rect.y,
    );
    output
}

/// [`composite`] for display: weather frames also get their capture-time
/// caption.
#[must_use]
pub fn captioned_composite(grid: &TileGrid, viewport: &Viewport, frame: &RadarFrame) -> RgbaImage {
    let mut output = composite(grid, viewport, frame);
    if frame.layer() == FrameLayer::Weather {
        draw_caption(&mut output, frame.captured_at());
    }
    output
}

/// Source pixels `(start, len)` covering `len` destination pixels from
/// `offset` when `src` source pixels are stretched over `dst`.
fn source_span(offset: i64, len: u32, src: u32, dst: u32) -> (u32, u32) {
    let offset = u64::try_from(offset).unwrap_or(0);
    let (src, dst) = (u64::from(src), u64::from(dst.max(1)));
    let start = (offset * src / dst).min(src.saturating_sub(1));
    let end = ((offset + u64::from(len)) * src)
        .div_ceil(dst)
        .clamp(start + 1, src.max(1));
    (
        u32::try_from(start).unwrap_or(0),
        u32::try_from(end - start).unwrap_or(1),
    )
}

/// Resize to a square of `edge` pixels for fixed-size display.
#[must_use]
pub fn scale_to(image: &RgbaImage, edge: u32) -> RgbaImage {
    if image.dimensions() == (edge, edge) {
        return image.clone();
    }
    imageops::resize(image, edge, edge, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{GeoBounds, PixelRect};
    use chrono::Utc;
    use image::Rgba;
    use std::sync::Arc;

    const GROUND: Rgba<u8> = Rgba([200, 200, 200, 255]);

    fn assert_close(actual: [u8; 4], expected: [u8; 4]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!(a.abs_diff(e) <= 2, "{actual:?} != {expected:?}");
        }
    }

    fn grid() -> TileGrid {
        TileGrid::new(8, (60, 95), (61, 96))
    }

    /// Bounds whose projection is exactly `rect` (up to rounding).
    fn bounds_for(rect: PixelRect) -> GeoBounds {
        let grid = grid();
        let to_geo = |px: f64, py: f64| {
            let size = f64::from(grid.tile_size);
            let lon = crate::projection::WebMercator::tile_to_lon(px / size + f64::from(grid.first_x), grid.zoom);
            let lat = crate::projection::WebMercator::tile_to_lat(py / size + f64::from(grid.first_y), grid.zoom);
            (lat, lon)
        };
        let nw = to_geo(rect.x as f64, rect.y as f64);
        let se = to_geo(rect.right() as f64, rect.bottom() as f64);
        GeoBounds::from_corners(nw, se).unwrap()
    }

    fn viewport(rect: PixelRect) -> Viewport {
        let bounds = bounds_for(rect);
        let rect = grid().pixel_rect(&bounds);
        Viewport::new(
            bounds,
            rect,
            Arc::new(RgbaImage::from_pixel(rect.width, rect.height, GROUND)),
        )
    }

    fn frame(rect: PixelRect, color: [u8; 4]) -> RadarFrame {
        RadarFrame::from_image(
            FrameLayer::Weather,
            bounds_for(rect),
            Utc::now(),
            RgbaImage::from_pixel(8, 8, Rgba(color)),
        )
    }

    #[test]
    fn test_full_overlay() {
        let rect = PixelRect::new(100, 100, 64, 64);
        let viewport = viewport(rect);
        let output = composite(&grid(), &viewport, &frame(rect, [255, 0, 0, 255]));
        assert_eq!(output.dimensions(), (64, 64));
        assert_close(output.get_pixel(32, 32).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_transparent_overlay_keeps_ground() {
        let rect = PixelRect::new(100, 100, 64, 64);
        let viewport = viewport(rect);
        let output = composite(&grid(), &viewport, &frame(rect, [255, 0, 0, 0]));
        for pixel in output.pixels() {
            assert_close(pixel.0, GROUND.0);
        }
    }

    #[test]
    fn test_partial_overlap_is_aligned() {
        let viewport = viewport(PixelRect::new(100, 100, 64, 64));
        // Covers the right half of the viewport and beyond
        let output = composite(
            &grid(),
            &viewport,
            &frame(PixelRect::new(132, 80, 100, 100), [0, 0, 255, 255]),
        );
        assert_eq!(output.get_pixel(10, 32).0, GROUND.0);
        assert_close(output.get_pixel(50, 32).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_disjoint_frame_changes_nothing() {
        let viewport = viewport(PixelRect::new(100, 100, 64, 64));
        let output = composite(
            &grid(),
            &viewport,
            &frame(PixelRect::new(300, 300, 50, 50), [0, 0, 255, 255]),
        );
        assert_eq!(output.as_raw(), viewport.image().as_raw());
    }

    #[test]
    fn test_world_frame_over_small_viewport() {
        let viewport = viewport(PixelRect::new(100, 100, 64, 64));
        // About 65536 px square on the base map; only the 64 px view is resampled
        let world = RadarFrame::from_image(
            FrameLayer::Weather,
            GeoBounds::new(85.0, -180.0, -85.0, 180.0).unwrap(),
            Utc::now(),
            RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255])),
        );
        let output = composite(&grid(), &viewport, &world);
        assert_eq!(output.dimensions(), (64, 64));
        assert_close(output.get_pixel(0, 0).0, [0, 255, 0, 255]);
        assert_close(output.get_pixel(63, 63).0, [0, 255, 0, 255]);
    }

    #[test]
    fn test_weather_composite_is_captioned() {
        let rect = PixelRect::new(100, 100, 300, 100);
        let viewport = viewport(rect);
        let weather = frame(rect, [255, 0, 0, 0]);
        let plain = composite(&grid(), &viewport, &weather);
        let captioned = captioned_composite(&grid(), &viewport, &weather);

        let (w, h) = captioned.dimensions();
        let (x, y) = crate::caption::caption_origin(w, h);
        let (x, y) = (u32::try_from(x).unwrap(), u32::try_from(y).unwrap());
        assert_ne!(captioned.get_pixel(x + 1, y + 13), plain.get_pixel(x + 1, y + 13));
        assert_eq!(captioned.get_pixel(5, 5), plain.get_pixel(5, 5));

        let traffic = RadarFrame::from_image(
            FrameLayer::Traffic,
            bounds_for(rect),
            Utc::now(),
            RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 0])),
        );
        assert_eq!(captioned_composite(&grid(), &viewport, &traffic), plain);
    }

    #[test]
    fn test_source_span() {
        // 8 source pixels over 800: destination 150..250 reads source 1..3
        assert_eq!(source_span(150, 100, 8, 800), (1, 2));
        // Downscale: 1000 source pixels over 100, second half
        assert_eq!(source_span(50, 50, 1000, 100), (500, 500));
        // Never empty, never past the source
        assert_eq!(source_span(799, 1, 8, 800), (7, 1));
        assert_eq!(source_span(0, 1, 8, u32::MAX), (0, 1));
    }

    #[test]
    fn test_scale_to() {
        let image = RgbaImage::from_pixel(30, 20, GROUND);
        assert_eq!(scale_to(&image, 600).dimensions(), (600, 600));
    }
}
