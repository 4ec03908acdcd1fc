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

//! Builds the base map by stitching slippy-map tiles into one image.

use std::path::Path;
use std::time::Duration;

use image::{imageops, Rgb, RgbImage};
use log::{debug, info};
use radar_map::{TileCoord, TileGrid};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fetch every tile of `grid` with `fetch` and paste it at its slot.
pub fn stitch<F>(grid: &TileGrid, mut fetch: F) -> Result<RgbImage, BoxError>
where
    F: FnMut(TileCoord) -> Result<Vec<u8>, BoxError>,
{
    let mut map = RgbImage::from_pixel(grid.width_px(), grid.height_px(), Rgb([255, 255, 255]));

    for tile in grid.tiles() {
        let bytes = fetch(tile)?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| format!("tile {}/{}/{}: {e}", tile.zoom, tile.x, tile.y))?
            .to_rgb8();
        let (x, y) = grid.tile_origin(tile);
        imageops::replace(&mut map, &image, x, y);
    }

    Ok(map)
}

/// Download the grid from `server` and save the stitched map to `path`.
///
/// Blocking; run it on a blocking thread from async code.
pub fn build_base_map(grid: &TileGrid, server: &str, path: &Path) -> Result<(), BoxError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()?;

    let total = grid.columns() * grid.rows();
    info!("Building {}x{} base map from {} tiles", grid.width_px(), grid.height_px(), total);

    let map = stitch(grid, |tile| {
        let url = tile.url(server);
        debug!("Downloading tile: {}", url);
        let response = client.get(&url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    map.save(path)?;
    info!("Saved base map to {}", path.display());
    Ok(())
}
