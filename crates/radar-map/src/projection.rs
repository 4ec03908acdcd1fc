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

//! Slippy-map projection and the tile grid the base map is assembled from.
//!
//! The base map is a mosaic of OpenStreetMap tiles at a single zoom level.
//! Every geographic coordinate is placed on it with the Web Mercator
//! transform: fractional tile numbers at the grid's zoom, offset by the
//! grid's first tile and scaled by the tile size. Radar frames are aligned
//! with the same mapping, so nothing depends on the pixel size of a frame.

use std::fmt;

use crate::error::MapError;

/// Edge length of a slippy-map tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Latitude limit of the Web Mercator projection.
const MAX_LATITUDE: f64 = 85.051_128_78;

const MAX_LONGITUDE: f64 = 180.0;

/// Web Mercator projection utilities
#[derive(Debug, Clone, Copy)]
pub struct WebMercator;

impl WebMercator {
    /// Convert latitude to a fractional tile Y coordinate at `zoom`
    #[must_use]
    pub fn lat_to_y(lat: f64, zoom: u8) -> f64 {
        let lat_rad = lat.to_radians();
        let n = 2_f64.powi(i32::from(zoom));
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0;
        y * n
    }

    /// Convert longitude to a fractional tile X coordinate at `zoom`
    #[must_use]
    pub fn lon_to_x(lon: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        ((lon + 180.0) / 360.0) * n
    }

    /// Convert tile coordinates back to latitude
    #[must_use]
    pub fn tile_to_lat(y: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        let lat_rad = ((std::f64::consts::PI * (1.0 - 2.0 * y / n)).sinh()).atan();
        lat_rad.to_degrees()
    }

    /// Convert tile coordinates back to longitude
    #[must_use]
    pub fn tile_to_lon(x: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        x / n * 360.0 - 180.0
    }
}

/// A geographic bounding box given by its north-west and south-east corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl GeoBounds {
    /// Create a bounding box, rejecting inverted, non-finite or off-globe corners.
    pub fn new(north: f64, west: f64, south: f64, east: f64) -> Result<Self, MapError> {
        if ![north, west, south, east].iter().all(|v| v.is_finite()) {
            return Err(MapError::InvalidBounds("non-finite coordinate".to_string()));
        }
        if north <= south {
            return Err(MapError::InvalidBounds(format!(
                "north edge {north} is not above south edge {south}"
            )));
        }
        if east <= west {
            return Err(MapError::InvalidBounds(format!(
                "east edge {east} is not right of west edge {west}"
            )));
        }
        if north > MAX_LATITUDE || south < -MAX_LATITUDE {
            return Err(MapError::InvalidBounds(format!(
                "latitude outside the Mercator range ({south}..{north})"
            )));
        }
        if west < -MAX_LONGITUDE || east > MAX_LONGITUDE {
            return Err(MapError::InvalidBounds(format!(
                "longitude outside -180..180 ({west}..{east})"
            )));
        }

        Ok(Self {
            north,
            west,
            south,
            east,
        })
    }

    /// Create a bounding box from `(lat, lon)` upper-left and lower-right corners.
    pub fn from_corners(upper_left: (f64, f64), lower_right: (f64, f64)) -> Result<Self, MapError> {
        Self::new(upper_left.0, upper_left.1, lower_right.0, lower_right.1)
    }

    /// Stable textual key used to name cached crops.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{:.6}",
            self.north, self.west, self.south, self.east
        )
    }
}

impl fmt::Display for GeoBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.4}, {:.4})-({:.4}, {:.4})",
            self.north, self.west, self.south, self.east
        )
    }
}

/// Integer rectangle in base map pixel space. May extend past the map edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> i64 {
        self.x.saturating_add(i64::from(self.width))
    }

    #[must_use]
    pub fn bottom(&self) -> i64 {
        self.y.saturating_add(i64::from(self.height))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Overlapping area of two rectangles, `None` when they only touch or are disjoint.
    #[must_use]
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(PixelRect::new(
            x0,
            y0,
            u32::try_from(x1.checked_sub(x0)?).ok()?,
            u32::try_from(y1.checked_sub(y0)?).ok()?,
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileCoord {
    #[must_use]
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }

    /// Tile URL on a `{server}/{z}/{x}/{y}.png` tile server
    #[must_use]
    pub fn url(&self, server: &str) -> String {
        format!(
            "{}/{}/{}/{}.png",
            server.trim_end_matches('/'),
            self.zoom,
            self.x,
            self.y
        )
    }
}

/// The block of slippy-map tiles the base map covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub zoom: u8,
    pub first_x: u32,
    pub first_y: u32,
    pub last_x: u32,
    pub last_y: u32,
    pub tile_size: u32,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl TileGrid {
    /// Tiles (35,84)–(81,110) at zoom 8: the continental US, 12032×6912 px.
    pub const STANDARD: TileGrid = TileGrid {
        zoom: 8,
        first_x: 35,
        first_y: 84,
        last_x: 81,
        last_y: 110,
        tile_size: TILE_SIZE,
    };

    /// Grid spanning `first` to `last` (inclusive) at `zoom` with 256 px tiles.
    #[must_use]
    pub fn new(zoom: u8, first: (u32, u32), last: (u32, u32)) -> Self {
        Self {
            zoom,
            first_x: first.0.min(last.0),
            first_y: first.1.min(last.1),
            last_x: first.0.max(last.0),
            last_y: first.1.max(last.1),
            tile_size: TILE_SIZE,
        }
    }

    #[must_use]
    pub fn columns(&self) -> u32 {
        self.last_x - self.first_x + 1
    }

    #[must_use]
    pub fn rows(&self) -> u32 {
        self.last_y - self.first_y + 1
    }

    #[must_use]
    pub fn width_px(&self) -> u32 {
        self.columns() * self.tile_size
    }

    #[must_use]
    pub fn height_px(&self) -> u32 {
        self.rows() * self.tile_size
    }

    /// Whole map as a pixel rectangle.
    #[must_use]
    pub fn extent(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width_px(), self.height_px())
    }

    /// Geographic area covered by the grid.
    #[must_use]
    pub fn coverage(&self) -> GeoBounds {
        GeoBounds {
            north: WebMercator::tile_to_lat(f64::from(self.first_y), self.zoom),
            west: WebMercator::tile_to_lon(f64::from(self.first_x), self.zoom),
            south: WebMercator::tile_to_lat(f64::from(self.last_y + 1), self.zoom),
            east: WebMercator::tile_to_lon(f64::from(self.last_x + 1), self.zoom),
        }
    }

    /// All tiles of the grid, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> {
        let grid = *self;
        (grid.first_y..=grid.last_y).flat_map(move |y| {
            (grid.first_x..=grid.last_x).map(move |x| TileCoord::new(x, y, grid.zoom))
        })
    }

    /// Pixel position of a tile's upper-left corner in the mosaic.
    #[must_use]
    pub fn tile_origin(&self, tile: TileCoord) -> (i64, i64) {
        let col = i64::from(tile.x) - i64::from(self.first_x);
        let row = i64::from(tile.y) - i64::from(self.first_y);
        (col * i64::from(self.tile_size), row * i64::from(self.tile_size))
    }

    /// Fractional pixel position of a coordinate on the base map.
    #[must_use]
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let size = f64::from(self.tile_size);
        let tile_x = WebMercator::lon_to_x(lon, self.zoom) - f64::from(self.first_x);
        let tile_y = WebMercator::lat_to_y(lat, self.zoom) - f64::from(self.first_y);
        (tile_x * size, tile_y * size)
    }

    /// Pixel position of a coordinate, rounded to the nearest pixel.
    /// Values past the `i64` range saturate.
    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "float to int casts saturate")]
    pub fn pixel(&self, lat: f64, lon: f64) -> (i64, i64) {
        let (x, y) = self.project(lat, lon);
        (x.round() as i64, y.round() as i64)
    }

    /// Pixel rectangle occupied by `bounds`, which may fall outside the map.
    #[must_use]
    pub fn pixel_rect(&self, bounds: &GeoBounds) -> PixelRect {
        let (x0, y0) = self.pixel(bounds.north, bounds.west);
        let (x1, y1) = self.pixel(bounds.south, bounds.east);
        PixelRect::new(
            x0,
            y0,
            u32::try_from(x1.saturating_sub(x0).max(0)).unwrap_or(u32::MAX),
            u32::try_from(y1.saturating_sub(y0).max(0)).unwrap_or(u32::MAX),
        )
    }

    /// Pixel rectangle of `bounds`, required to lie within the map.
    pub fn coverage_rect(&self, bounds: &GeoBounds) -> Result<PixelRect, MapError> {
        let rect = self.pixel_rect(bounds);
        let extent = self.extent();

        if rect.x < extent.x
            || rect.y < extent.y
            || rect.right() > extent.right()
            || rect.bottom() > extent.bottom()
        {
            return Err(MapError::OutOfCoverage(*bounds));
        }
        if rect.is_empty() {
            return Err(MapError::InvalidBounds(format!(
                "{bounds} covers no base map pixels"
            )));
        }

        Ok(rect)
    }
}
