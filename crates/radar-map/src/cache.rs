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

//! The map cache and its live sessions.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::animation::{lock_session, Animation};
use crate::base_map::BaseMap;
use crate::compose::{captioned_composite, composite};
use crate::error::MapError;
use crate::frame::{FrameLayer, RadarFrame};
use crate::projection::{GeoBounds, TileGrid};
use crate::session::{IngestOutcome, IngestReport, MapSession, SessionConfig, SessionSnapshot};
use crate::viewport::{Viewport, ViewportCache};

/// Where the cache keeps its files and which tile grid the base map uses.
#[derive(Debug, Clone)]
pub struct MapCacheConfig {
    pub base_map_path: PathBuf,
    pub cache_dir: PathBuf,
    pub grid: TileGrid,
}

/// Viewport cache plus compositing over one base map.
#[derive(Debug)]
pub struct MapCache {
    grid: TileGrid,
    viewports: ViewportCache,
}

impl MapCache {
    #[must_use]
    pub fn new(config: MapCacheConfig) -> Self {
        let base_map = BaseMap::new(config.base_map_path, config.grid);
        Self {
            grid: config.grid,
            viewports: ViewportCache::new(base_map, config.cache_dir),
        }
    }

    #[must_use]
    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    #[must_use]
    pub fn base_map(&self) -> &BaseMap {
        self.viewports.base_map()
    }

    /// Base map crop for `bounds`; see [`ViewportCache::get`].
    pub fn get_viewport(&self, bounds: &GeoBounds) -> Result<Viewport, MapError> {
        self.viewports.get(bounds)
    }

    /// Overlay `frame` on `viewport` using the base map's tile grid.
    #[must_use]
    pub fn composite(&self, viewport: &Viewport, frame: &RadarFrame) -> RgbaImage {
        composite(&self.grid, viewport, frame)
    }

    /// Forget every cached crop. Call after replacing the base map file.
    pub fn invalidate(&self) -> Result<usize, MapError> {
        self.viewports.invalidate()
    }

    /// Start a session for a radar area. Fails when the area has no viewport.
    pub fn open_session(
        &self,
        area_id: &str,
        bounds: &GeoBounds,
        config: SessionConfig,
    ) -> Result<SessionHandle, MapError> {
        let viewport = self.get_viewport(bounds)?;
        info!("Opened map session for area {} {}", area_id, bounds);

        Ok(SessionHandle {
            session: Arc::new(Mutex::new(MapSession::new(area_id, viewport, config))),
            grid: self.grid,
            cancel: CancellationToken::new(),
        })
    }
}

/// Shared handle to a [`MapSession`].
///
/// Clones refer to the same session. All mutation goes through the session
/// lock; readers take a [`SessionSnapshot`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<MapSession>>,
    grid: TileGrid,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Add a frame to the session, evicting frames that fell out of the window.
    pub fn ingest_frame(&self, frame: RadarFrame) -> IngestReport {
        let captured_at = frame.captured_at();
        let layer = frame.layer();
        let report = lock_session(&self.session).ingest(frame);

        match report.outcome {
            IngestOutcome::Duplicate => debug!("Ignoring duplicate {} frame {}", layer, captured_at),
            outcome => debug!(
                "Ingested {} frame {}: {:?}, {} evicted",
                layer, captured_at, outcome, report.evicted
            ),
        }
        report
    }

    /// Evict frames older than the retention window measured from `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        lock_session(&self.session).evict_expired(now)
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        lock_session(&self.session).snapshot()
    }

    #[must_use]
    pub fn area_id(&self) -> String {
        lock_session(&self.session).area_id().to_string()
    }

    #[must_use]
    pub fn bounds(&self) -> GeoBounds {
        *lock_session(&self.session).viewport().bounds()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock_session(&self.session).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock_session(&self.session).is_empty()
    }

    pub fn set_speed(&self, speed: Duration) {
        lock_session(&self.session).set_speed(speed);
    }

    pub fn set_layer(&self, layer: FrameLayer) {
        lock_session(&self.session).set_layer(layer);
    }

    /// Newest frame of the active layer over the viewport, or the bare
    /// viewport when there is none. Weather frames carry their caption.
    #[must_use]
    pub fn current_composite(&self) -> RgbaImage {
        let (viewport, latest) = {
            let session = lock_session(&self.session);
            (session.viewport().clone(), session.latest_frame().cloned())
        };

        match latest {
            Some(frame) => captioned_composite(&self.grid, &viewport, &frame),
            None => viewport.image().as_ref().clone(),
        }
    }

    /// Animation over the retained frames at `speed` per frame.
    #[must_use]
    pub fn animate(&self, speed: Duration) -> Animation {
        self.set_speed(speed);
        Animation::new(Arc::clone(&self.session), self.grid, self.cancel.child_token())
    }

    /// End the session: running animations stop immediately.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Closing map session for area {}", self.area_id());
            self.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::{Rgb, RgbImage, Rgba};
    use std::fs;

    struct Fixture {
        dir: PathBuf,
        cache: MapCache,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("radar-map-cache-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            let grid = TileGrid::new(8, (60, 95), (61, 96));
            let base_map_path = dir.join("map.png");
            RgbImage::from_pixel(grid.width_px(), grid.height_px(), Rgb([10, 20, 30]))
                .save(&base_map_path)
                .unwrap();

            let cache = MapCache::new(MapCacheConfig {
                base_map_path,
                cache_dir: dir.join("cache"),
                grid,
            });
            Self { dir, cache }
        }

        /// Middle half of the grid.
        fn viewport_bounds(&self) -> GeoBounds {
            let c = self.cache.grid().coverage();
            let lat = c.north - c.south;
            let lon = c.east - c.west;
            GeoBounds::new(
                c.north - lat * 0.25,
                c.west + lon * 0.25,
                c.south + lat * 0.25,
                c.east - lon * 0.25,
            )
            .unwrap()
        }

        /// North-west corner, clear of the viewport.
        fn outside_bounds(&self) -> GeoBounds {
            let c = self.cache.grid().coverage();
            let lat = c.north - c.south;
            let lon = c.east - c.west;
            GeoBounds::new(c.north, c.west, c.north - lat * 0.1, c.west + lon * 0.1).unwrap()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn frame(bounds: GeoBounds, minutes: i64) -> RadarFrame {
        RadarFrame::from_image(
            FrameLayer::Weather,
            bounds,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes),
            RgbaImage::from_pixel(16, 16, Rgba([0, 200, 0, 255])),
        )
    }

    #[test]
    fn test_session_lifecycle() {
        let fixture = Fixture::new();
        let bounds = fixture.viewport_bounds();
        let session = fixture
            .cache
            .open_session("RD23", &bounds, SessionConfig::default())
            .unwrap();

        assert_eq!(session.area_id(), "RD23");
        assert_eq!(session.bounds(), bounds);
        assert!(session.is_empty());

        let report = session.ingest_frame(frame(bounds, 0));
        assert_eq!(report.outcome, IngestOutcome::Inserted);
        assert_eq!(session.ingest_frame(frame(bounds, 0)).outcome, IngestOutcome::Duplicate);
        assert_eq!(session.len(), 1);

        let composite = session.current_composite();
        assert_eq!(composite.get_pixel(5, 5).0[1], 200);

        session.close();
        assert!(session.is_closed());
        assert_eq!(session.animate(Duration::from_secs(1)).count(), 0);
    }

    #[test]
    fn test_frame_outside_viewport_is_retained_but_invisible() {
        let fixture = Fixture::new();
        let bounds = fixture.viewport_bounds();
        let session = fixture
            .cache
            .open_session("RD23", &bounds, SessionConfig::default())
            .unwrap();
        let viewport = fixture.cache.get_viewport(&bounds).unwrap();

        let outside = frame(fixture.outside_bounds(), 0);
        session.ingest_frame(outside.clone());
        assert_eq!(session.len(), 1);

        let output = fixture.cache.composite(&viewport, &outside);
        assert_eq!(output.as_raw(), viewport.image().as_raw());

        // Only the caption is drawn
        let mut expected = viewport.image().as_ref().clone();
        crate::caption::draw_caption(&mut expected, outside.captured_at());
        assert_eq!(session.current_composite(), expected);
    }

    #[test]
    fn test_open_session_out_of_coverage() {
        let fixture = Fixture::new();
        let bounds = GeoBounds::new(52.0, 5.0, 48.0, 15.0).unwrap();
        assert!(matches!(
            fixture.cache.open_session("EU", &bounds, SessionConfig::default()),
            Err(MapError::OutOfCoverage(_))
        ));
    }

    #[test]
    fn test_animation_scenario() {
        let fixture = Fixture::new();
        let bounds = fixture.viewport_bounds();
        let session = fixture
            .cache
            .open_session("RD23", &bounds, SessionConfig::default())
            .unwrap();
        for minutes in [5, 0, 10] {
            session.ingest_frame(frame(bounds, minutes));
        }

        let frames: Vec<_> = session.animate(Duration::from_secs(2)).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames
            .windows(2)
            .all(|w| w[0].captured_at < w[1].captured_at));
        assert!(frames.iter().all(|f| f.delay == Duration::from_secs(2)));
        assert_eq!(session.snapshot().speed, Duration::from_secs(2));
    }

    #[test]
    fn test_two_animations_on_one_session() {
        let fixture = Fixture::new();
        let bounds = fixture.viewport_bounds();
        let session = fixture
            .cache
            .open_session("RD23", &bounds, SessionConfig::default())
            .unwrap();
        for minutes in [0, 5, 10] {
            session.ingest_frame(frame(bounds, minutes));
        }

        let mut a = session.animate(Duration::from_secs(1));
        let mut b = session.animate(Duration::from_secs(1));
        let mut times_a = Vec::new();
        let mut times_b = Vec::new();
        for _ in 0..3 {
            times_a.push(a.next().and_then(|f| f.captured_at));
            times_b.push(b.next().and_then(|f| f.captured_at));
        }
        assert!(times_a.iter().all(Option::is_some));
        assert_eq!(times_a, times_b);
    }
}
