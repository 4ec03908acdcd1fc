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

//! Assembly of the 3×3 traffic map from individually delivered tiles.

use chrono::{DateTime, Utc};
use image::imageops;
use image::{Rgba, RgbaImage};
use log::debug;

use crate::error::FrameError;

/// Tiles per row and column.
pub const TRAFFIC_GRID: usize = 3;
/// Edge length of a traffic tile in pixels.
pub const TRAFFIC_TILE_SIZE: u32 = 200;

/// Effect of adding a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficUpdate {
    /// The tile was already present with the same timestamp.
    Unchanged,
    /// Stored; other tiles of this timestamp are still missing.
    Partial,
    /// All nine tiles now share this timestamp.
    Complete(DateTime<Utc>),
}

/// Traffic map under assembly.
#[derive(Debug, Clone)]
pub struct TrafficMap {
    image: RgbaImage,
    tiles: [[Option<DateTime<Utc>>; TRAFFIC_GRID]; TRAFFIC_GRID],
}

impl Default for TrafficMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficMap {
    #[must_use]
    pub fn new() -> Self {
        let edge = TRAFFIC_TILE_SIZE * 3;
        Self {
            image: RgbaImage::from_pixel(edge, edge, Rgba([255, 255, 255, 255])),
            tiles: [[None; TRAFFIC_GRID]; TRAFFIC_GRID],
        }
    }

    /// Paste a tile at zero-based `row`/`col`.
    pub fn add_tile(
        &mut self,
        row: u8,
        col: u8,
        captured_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<TrafficUpdate, FrameError> {
        let (r, c) = (usize::from(row), usize::from(col));
        if r >= TRAFFIC_GRID || c >= TRAFFIC_GRID {
            return Err(FrameError::TileIndex { row, col });
        }

        if self.tiles[r][c] == Some(captured_at) {
            return Ok(TrafficUpdate::Unchanged);
        }
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }

        let tile = image::load_from_memory(bytes)?.to_rgba8();
        debug!("Got traffic map tile: {}, {}", row, col);

        imageops::replace(
            &mut self.image,
            &tile,
            i64::from(u32::from(col) * TRAFFIC_TILE_SIZE),
            i64::from(u32::from(row) * TRAFFIC_TILE_SIZE),
        );
        self.tiles[r][c] = Some(captured_at);

        if self.is_complete(captured_at) {
            Ok(TrafficUpdate::Complete(captured_at))
        } else {
            Ok(TrafficUpdate::Partial)
        }
    }

    fn is_complete(&self, captured_at: DateTime<Utc>) -> bool {
        self.tiles
            .iter()
            .flatten()
            .all(|t| *t == Some(captured_at))
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}
