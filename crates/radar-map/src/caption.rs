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

//! Capture-time caption stamped in the corner of weather maps.
//!
//! The caption is a small SVG (translucent grey box, black outline, local
//! time in a monospace face) rendered with resvg and alpha-blended at a fixed
//! offset from the bottom-right corner.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use image::{imageops, RgbaImage};
use lazy_static::lazy_static;
use log::warn;
use resvg::tiny_skia;
use usvg::fontdb;

/// Caption box size in pixels, outline included.
pub const CAPTION_SIZE: (u32, u32) = (232, 26);

/// Distance of the box's upper-left corner from the right and bottom edges.
const CAPTION_OFFSET: (u32, u32) = (235, 29);

lazy_static! {
    static ref FONTS: Arc<fontdb::Database> = {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        Arc::new(db)
    };
}

/// Capture time in local time, to the minute.
#[must_use]
pub fn caption_text(captured_at: DateTime<Utc>) -> String {
    captured_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Upper-left corner of the caption box on an image of the given size.
#[must_use]
pub fn caption_origin(width: u32, height: u32) -> (i64, i64) {
    (
        i64::from(width.saturating_sub(CAPTION_OFFSET.0)),
        i64::from(height.saturating_sub(CAPTION_OFFSET.1)),
    )
}

/// Stamp the capture-time caption onto `image`.
///
/// Images smaller than the caption get it clipped at their upper-left corner.
pub fn draw_caption(image: &mut RgbaImage, captured_at: DateTime<Utc>) {
    let text = caption_text(captured_at);
    match render_caption(&text) {
        Ok(caption) => {
            let (x, y) = caption_origin(image.width(), image.height());
            imageops::overlay(image, &caption, x, y);
        }
        Err(e) => warn!("Failed to draw caption {}: {}", text, e),
    }
}

fn render_caption(text: &str) -> Result<RgbaImage, String> {
    let (width, height) = CAPTION_SIZE;
    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}">
<rect x="0.5" y="0.5" width="{box_w}" height="{box_h}" fill="#808080" fill-opacity="0.376" stroke="#000000"/>
<text x="3" y="20" font-family="DejaVu Sans Mono, monospace" font-size="24" fill="#000000">{text}</text>
</svg>"##,
        box_w = width - 1,
        box_h = height - 1,
    );

    let options = usvg::Options {
        fontdb: Arc::clone(&FONTS),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(&svg, &options).map_err(|e| e.to_string())?;

    let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or("empty caption")?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    // tiny-skia stores premultiplied alpha
    let raw = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    RgbaImage::from_raw(width, height, raw).ok_or_else(|| "caption buffer size mismatch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgba;

    const WHITE: [u8; 4] = [255, 255, 255, 255];

    fn captured_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 35, 0).unwrap()
    }

    #[test]
    fn test_caption_text_format() {
        let text = caption_text(captured_at());
        assert_eq!(text.len(), 16);
        assert_eq!(&text[4..5], "-");
        assert_eq!(&text[7..8], "-");
        assert_eq!(&text[10..11], " ");
        assert_eq!(&text[13..14], ":");
    }

    #[test]
    fn test_caption_origin() {
        assert_eq!(caption_origin(600, 600), (365, 571));
        assert_eq!(caption_origin(16, 16), (0, 0));
    }

    #[test]
    fn test_caption_changes_box_pixels() {
        let mut image = RgbaImage::from_pixel(400, 300, Rgba(WHITE));
        draw_caption(&mut image, captured_at());

        let (x, y) = caption_origin(400, 300);
        let (x, y) = (u32::try_from(x).unwrap(), u32::try_from(y).unwrap());
        // Outline, then fill (or text) inside the box
        assert_ne!(image.get_pixel(x, y).0, WHITE);
        assert_ne!(image.get_pixel(x + 1, y + 13).0, WHITE);
        assert_ne!(image.get_pixel(x + 230, y + 24).0, WHITE);

        // Nothing outside the box
        assert_eq!(image.get_pixel(x - 1, y - 1).0, WHITE);
        assert_eq!(image.get_pixel(0, 0).0, WHITE);
        assert_eq!(image.get_pixel(399, 299).0, WHITE);
    }

    #[test]
    fn test_caption_on_small_image() {
        let mut image = RgbaImage::from_pixel(16, 16, Rgba(WHITE));
        draw_caption(&mut image, captured_at());
        assert_eq!(image.dimensions(), (16, 16));
        assert_ne!(image.get_pixel(0, 0).0, WHITE);
    }
}
