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

//! Viewport crops of the base map, cached in memory and on disk.
//!
//! A crop is keyed by its bounding box. The first request for a box crops
//! the base map and writes `viewport_<sha256>.png` into the cache directory;
//! later requests are answered from memory, then from that file. Nothing here
//! notices when the base map itself changes: [`ViewportCache::invalidate`]
//! must be called after it is replaced.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbaImage;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::base_map::BaseMap;
use crate::error::MapError;
use crate::projection::{GeoBounds, PixelRect};

const CACHE_FILE_PREFIX: &str = "viewport_";

/// A crop of the base map together with where it sits on the map.
#[derive(Debug, Clone)]
pub struct Viewport {
    bounds: GeoBounds,
    rect: PixelRect,
    image: Arc<RgbaImage>,
}

impl Viewport {
    #[must_use]
    pub fn new(bounds: GeoBounds, rect: PixelRect, image: Arc<RgbaImage>) -> Self {
        Self { bounds, rect, image }
    }

    #[must_use]
    pub fn bounds(&self) -> &GeoBounds {
        &self.bounds
    }

    /// Position of the crop in base map pixels.
    #[must_use]
    pub fn rect(&self) -> PixelRect {
        self.rect
    }

    #[must_use]
    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }
}

#[derive(Debug, Default)]
struct CacheState {
    crops: HashMap<String, Arc<RgbaImage>>,
    /// Files that survived an invalidation because they could not be deleted.
    stale_files: HashSet<PathBuf>,
}

/// Cache of base map crops
#[derive(Debug)]
pub struct ViewportCache {
    base_map: BaseMap,
    cache_dir: PathBuf,
    state: Mutex<CacheState>,
}

impl ViewportCache {
    pub fn new(base_map: BaseMap, cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();

        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(
                "Failed to create viewport cache directory {}: {}",
                cache_dir.display(),
                e
            );
        }

        Self {
            base_map,
            cache_dir,
            state: Mutex::new(CacheState::default()),
        }
    }

    #[must_use]
    pub fn base_map(&self) -> &BaseMap {
        &self.base_map
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file path for a bounding box, named by the SHA-256 of its key
    fn cache_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        self.cache_dir
            .join(format!("{CACHE_FILE_PREFIX}{hash:x}.png"))
    }

    /// Get the crop for `bounds`, building and persisting it on first use.
    pub fn get(&self, bounds: &GeoBounds) -> Result<Viewport, MapError> {
        let rect = self.base_map.grid().coverage_rect(bounds)?;
        let key = bounds.cache_key();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(image) = state.crops.get(&key) {
            return Ok(Viewport::new(*bounds, rect, Arc::clone(image)));
        }

        let path = self.cache_path(&key);
        if !state.stale_files.contains(&path) {
            if let Some(image) = Self::load_cached(&path, rect) {
                let image = Arc::new(image);
                state.crops.insert(key, Arc::clone(&image));
                return Ok(Viewport::new(*bounds, rect, image));
            }
        }

        info!("Creating viewport {} from base map", bounds);
        let image = self.base_map.crop(rect)?;

        match image.save(&path) {
            Ok(()) => {
                state.stale_files.remove(&path);
                debug!("Saved viewport cache {}", path.display());
            }
            Err(e) => warn!("Failed to save viewport cache {}: {}", path.display(), e),
        }

        let image = Arc::new(image);
        state.crops.insert(key, Arc::clone(&image));
        Ok(Viewport::new(*bounds, rect, image))
    }

    /// Read a persisted crop; any failure counts as a cache miss.
    fn load_cached(path: &Path, rect: PixelRect) -> Option<RgbaImage> {
        if !path.is_file() {
            return None;
        }

        match image::open(path) {
            Ok(image) => {
                let image = image.to_rgba8();
                if image.dimensions() == (rect.width, rect.height) {
                    Some(image)
                } else {
                    warn!(
                        "Ignoring viewport cache {} with unexpected size {:?}",
                        path.display(),
                        image.dimensions()
                    );
                    None
                }
            }
            Err(e) => {
                warn!("Failed to load viewport cache {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Drop every cached crop, in memory and on disk. Returns the number of
    /// files deleted.
    pub fn invalidate(&self) -> Result<usize, MapError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.crops.clear();

        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_cache_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with(CACHE_FILE_PREFIX)
                        && Path::new(name)
                            .extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
                });
            if !is_cache_file {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    state.stale_files.remove(&path);
                    removed += 1;
                }
                Err(e) => {
                    warn!("Failed to delete viewport cache {}: {}", path.display(), e);
                    state.stale_files.insert(path);
                }
            }
        }

        info!("Invalidated {} cached viewport(s)", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::TileGrid;
    use image::{Rgb, RgbImage};

    struct Fixture {
        dir: PathBuf,
        map_path: PathBuf,
        grid: TileGrid,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("radar-map-viewport-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            let grid = TileGrid::new(8, (60, 95), (61, 96));
            let map_path = dir.join("map.png");
            Self::write_map(&map_path, &grid, 0);
            Self { dir, map_path, grid }
        }

        fn write_map(path: &Path, grid: &TileGrid, seed: u8) {
            RgbImage::from_fn(grid.width_px(), grid.height_px(), |x, y| {
                Rgb([(x % 251) as u8, (y % 241) as u8, seed])
            })
            .save(path)
            .unwrap();
        }

        fn cache(&self) -> ViewportCache {
            ViewportCache::new(BaseMap::new(&self.map_path, self.grid), self.dir.join("cache"))
        }

        fn bounds(&self) -> GeoBounds {
            let c = self.grid.coverage();
            let lat_span = c.north - c.south;
            let lon_span = c.east - c.west;
            GeoBounds::new(
                c.north - lat_span * 0.25,
                c.west + lon_span * 0.2,
                c.south + lat_span * 0.3,
                c.east - lon_span * 0.1,
            )
            .unwrap()
        }

        fn direct_crop(&self, bounds: &GeoBounds) -> RgbaImage {
            let rect = self.grid.pixel_rect(bounds);
            image::open(&self.map_path)
                .unwrap()
                .crop_imm(rect.x as u32, rect.y as u32, rect.width, rect.height)
                .to_rgba8()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    #[test]
    fn test_viewport_matches_direct_crop() {
        let fixture = Fixture::new();
        let bounds = fixture.bounds();
        let expected = fixture.direct_crop(&bounds);

        // Cold, warm (memory) and disk-only reads all agree
        let cache = fixture.cache();
        assert_eq!(*cache.get(&bounds).unwrap().image().as_ref(), expected);
        assert_eq!(*cache.get(&bounds).unwrap().image().as_ref(), expected);
        let reopened = fixture.cache();
        assert_eq!(*reopened.get(&bounds).unwrap().image().as_ref(), expected);
    }

    #[test]
    fn test_viewport_persists_cache_file() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        cache.get(&fixture.bounds()).unwrap();

        let files: Vec<_> = fs::read_dir(cache.cache_dir()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().into_string().unwrap();
        assert!(name.starts_with("viewport_"));
    }

    #[test]
    fn test_out_of_coverage() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let bounds = GeoBounds::new(52.0, 5.0, 48.0, 15.0).unwrap();
        assert!(matches!(cache.get(&bounds), Err(MapError::OutOfCoverage(_))));
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let fixture = Fixture::new();
        let cache = fixture.cache();
        let bounds = fixture.bounds();
        let before = cache.get(&bounds).unwrap();

        // Replace the base map; the stale crop is still served until invalidated
        Fixture::write_map(&fixture.map_path, &fixture.grid, 99);
        assert_eq!(cache.get(&bounds).unwrap().image(), before.image());

        assert_eq!(cache.invalidate().unwrap(), 1);
        let after = cache.get(&bounds).unwrap();
        assert_ne!(after.image(), before.image());
        assert_eq!(*after.image().as_ref(), fixture.direct_crop(&bounds));
    }

    #[test]
    fn test_corrupt_cache_file_is_a_miss() {
        let fixture = Fixture::new();
        let bounds = fixture.bounds();
        let cache = fixture.cache();
        cache.get(&bounds).unwrap();

        let path = cache.cache_path(&bounds.cache_key());
        fs::write(&path, b"not a png").unwrap();

        let reopened = fixture.cache();
        assert_eq!(
            *reopened.get(&bounds).unwrap().image().as_ref(),
            fixture.direct_crop(&bounds)
        );
    }

    #[test]
    fn test_missing_base_map_is_reported() {
        let fixture = Fixture::new();
        fs::remove_file(&fixture.map_path).unwrap();
        let cache = fixture.cache();
        assert!(matches!(
            cache.get(&fixture.bounds()),
            Err(MapError::BaseMapMissing(_))
        ));
    }
}
