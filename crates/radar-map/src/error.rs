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

//! Error types for the map cache.

use std::path::PathBuf;

use thiserror::Error;

use crate::projection::GeoBounds;

/// Errors raised by viewport extraction and cache management.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("bounding box {0} is outside the base map coverage")]
    OutOfCoverage(GeoBounds),

    #[error("invalid bounding box: {0}")]
    InvalidBounds(String),

    #[error("area id {0:?} is not usable in a file name")]
    InvalidAreaId(String),

    #[error("base map not found: {}", .0.display())]
    BaseMapMissing(PathBuf),

    #[error("base map is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    BaseMapSize {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while turning decoder payloads into frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("empty frame payload")]
    Empty,

    #[error("undecodable frame image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("traffic tile index out of range: row {row}, column {col}")]
    TileIndex { row: u8, col: u8 },
}
