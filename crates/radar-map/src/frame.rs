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

//! Time-stamped overlay frames delivered by the decoder.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use sha2::{Digest, Sha256};

use crate::error::FrameError;
use crate::projection::GeoBounds;

/// Which data service a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum FrameLayer {
    #[default]
    Weather,
    Traffic,
}

impl FrameLayer {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameLayer::Weather => "weather",
            FrameLayer::Traffic => "traffic",
        }
    }
}

impl fmt::Display for FrameLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded overlay raster tagged with its area and capture time.
#[derive(Debug, Clone)]
pub struct RadarFrame {
    layer: FrameLayer,
    bounds: GeoBounds,
    captured_at: DateTime<Utc>,
    checksum: String,
    image: Arc<RgbaImage>,
}

impl RadarFrame {
    /// Decode an encoded image (PNG in practice) received from the decoder.
    pub fn decode(
        layer: FrameLayer,
        bounds: GeoBounds,
        captured_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }

        let image = image::load_from_memory(bytes)?.to_rgba8();

        Ok(Self {
            layer,
            bounds,
            captured_at,
            checksum: checksum(bytes),
            image: Arc::new(image),
        })
    }

    /// Wrap an already decoded raster. The checksum covers its pixels.
    #[must_use]
    pub fn from_image(
        layer: FrameLayer,
        bounds: GeoBounds,
        captured_at: DateTime<Utc>,
        image: RgbaImage,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image.width().to_le_bytes());
        hasher.update(image.height().to_le_bytes());
        hasher.update(image.as_raw());

        Self {
            layer,
            bounds,
            captured_at,
            checksum: format!("{:x}", hasher.finalize()),
            image: Arc::new(image),
        }
    }

    #[must_use]
    pub fn layer(&self) -> FrameLayer {
        self.layer
    }

    #[must_use]
    pub fn bounds(&self) -> &GeoBounds {
        &self.bounds
    }

    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Hex SHA-256 of the frame's source data.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    #[must_use]
    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    /// Same delivery: identical capture time, area, layer and payload.
    #[must_use]
    pub fn is_duplicate_of(&self, other: &RadarFrame) -> bool {
        self.layer == other.layer
            && self.captured_at == other.captured_at
            && self.bounds == other.bounds
            && self.checksum == other.checksum
    }
}

/// Hex SHA-256 of a byte payload.
#[must_use]
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
