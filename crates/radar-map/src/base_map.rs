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

//! The full-resolution base map raster on disk.

use std::path::{Path, PathBuf};

use image::{GenericImageView, RgbaImage};
use log::debug;

use crate::error::MapError;
use crate::projection::{PixelRect, TileGrid};

/// Handle to the base map file. The image is read from disk on demand and
/// never kept in memory, since the standard map is several hundred megabytes
/// once decoded.
#[derive(Debug, Clone)]
pub struct BaseMap {
    path: PathBuf,
    grid: TileGrid,
}

impl BaseMap {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, grid: TileGrid) -> Self {
        Self {
            path: path.into(),
            grid,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Crop `rect` out of the base map. `rect` must lie within the grid extent.
    pub fn crop(&self, rect: PixelRect) -> Result<RgbaImage, MapError> {
        if !self.exists() {
            return Err(MapError::BaseMapMissing(self.path.clone()));
        }

        debug!("Loading base map {}", self.path.display());
        let image = image::open(&self.path)?;

        let (width, height) = image.dimensions();
        if width != self.grid.width_px() || height != self.grid.height_px() {
            return Err(MapError::BaseMapSize {
                expected_width: self.grid.width_px(),
                expected_height: self.grid.height_px(),
                actual_width: width,
                actual_height: height,
            });
        }

        let x = u32::try_from(rect.x).map_err(|e| MapError::InvalidBounds(e.to_string()))?;
        let y = u32::try_from(rect.y).map_err(|e| MapError::InvalidBounds(e.to_string()))?;

        Ok(image.crop_imm(x, y, rect.width, rect.height).to_rgba8())
    }
}
