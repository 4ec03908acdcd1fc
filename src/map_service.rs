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

//! Routes received data files into the map cache.
//!
//! Weather info opens a session for the announced radar area (primed from
//! the archive), weather overlays are archived and ingested, and traffic
//! tiles are assembled until a full map is available.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use log::{debug, error, info, warn};
use radar_map::{
    scale_to, DataFile, FrameArchive, FrameLayer, IngestOutcome, MapCache, RadarFrame,
    SessionConfig, SessionHandle, TrafficMap, TrafficUpdate, WeatherInfo,
};
use tokio_util::sync::CancellationToken;

use crate::decoder::{Decoder, DecoderEvent};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// File name of the latest weather composite.
pub const WEATHER_NOW: &str = "weather_now.png";
/// File name of the latest complete traffic map.
pub const TRAFFIC_MAP: &str = "traffic_map.png";

#[derive(Debug, Clone)]
pub struct MapServiceConfig {
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub session: SessionConfig,
    /// Square edge for written images; `None` keeps the native size.
    pub scale: Option<u32>,
    pub cleanup_interval: Duration,
}

#[derive(Debug)]
pub struct MapService {
    cache: Arc<MapCache>,
    archive: FrameArchive,
    config: MapServiceConfig,
    session: Option<SessionHandle>,
    traffic: TrafficMap,
}

impl MapService {
    pub fn new(cache: Arc<MapCache>, config: MapServiceConfig) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.output_dir) {
            warn!("Failed to create output directory {}: {}", config.output_dir.display(), e);
        }

        Self {
            archive: FrameArchive::new(&config.archive_dir, config.session.retention),
            cache,
            config,
            session: None,
            traffic: TrafficMap::new(),
        }
    }

    /// The session for the current radar area, once weather info arrived.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    /// Handle one received data file. Files unrelated to maps are ignored.
    pub fn handle_file(&mut self, name: &str, bytes: &[u8], now: DateTime<Utc>) -> Result<(), BoxError> {
        match DataFile::parse(name)? {
            Some(DataFile::WeatherInfo) => self.weather_info(bytes, now),
            Some(DataFile::WeatherOverlay {
                area_id,
                captured_at,
            }) => self.weather_overlay(&area_id, captured_at, bytes),
            Some(DataFile::TrafficTile {
                row,
                col,
                captured_at,
            }) => self.traffic_tile(row, col, captured_at, bytes),
            None => Ok(()),
        }
    }

    fn weather_info(&mut self, bytes: &[u8], now: DateTime<Utc>) -> Result<(), BoxError> {
        let info = WeatherInfo::parse(bytes)?;

        if let Some(session) = &self.session {
            if session.area_id() == info.area_id && session.bounds() == info.bounds {
                return Ok(());
            }
            session.close();
        }

        info!("Got position for area {}: {}", info.area_id, info.bounds);
        // Drop the old session before opening the new one so a failure leaves none
        self.session = None;
        let session = match self
            .cache
            .open_session(&info.area_id, &info.bounds, self.config.session)
        {
            Ok(session) => session,
            Err(e) => {
                warn!("No map available for area {}: {}", info.area_id, e);
                return Ok(());
            }
        };

        let archived = self.archive.load(&info.area_id, now);
        for stored in archived {
            match RadarFrame::decode(FrameLayer::Weather, info.bounds, stored.captured_at, &stored.bytes) {
                Ok(frame) => {
                    session.ingest_frame(frame);
                }
                Err(e) => warn!("Skipping archived overlay {}: {}", stored.captured_at, e),
            }
        }
        debug!("Found {} weather maps", session.len());

        self.session = Some(session);
        self.write_weather_now()
    }

    fn weather_overlay(
        &mut self,
        area_id: &str,
        captured_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<(), BoxError> {
        let Some(session) = &self.session else {
            warn!("Received weather overlay for {} before weather info", area_id);
            return Ok(());
        };
        if session.area_id() != area_id {
            error!("Received weather overlay with the wrong ID: {}", area_id);
            return Ok(());
        }

        let frame = RadarFrame::decode(FrameLayer::Weather, session.bounds(), captured_at, bytes)?;
        let report = session.ingest_frame(frame);

        match report.outcome {
            IngestOutcome::Inserted | IngestOutcome::Replaced => {
                debug!("Got weather overlay {}", captured_at);
                if let Err(e) = self.archive.store(area_id, captured_at, bytes) {
                    warn!("Failed to archive weather overlay {}: {}", captured_at, e);
                }
                self.write_weather_now()
            }
            IngestOutcome::Duplicate | IngestOutcome::Expired => Ok(()),
        }
    }

    fn traffic_tile(
        &mut self,
        row: u8,
        col: u8,
        captured_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<(), BoxError> {
        let TrafficUpdate::Complete(time) = self.traffic.add_tile(row, col, captured_at, bytes)? else {
            return Ok(());
        };

        debug!("Got complete traffic map");
        let path = self.output_path(TRAFFIC_MAP);
        self.traffic.image().save(&path)?;

        if let Some(session) = &self.session {
            let frame = RadarFrame::from_image(
                FrameLayer::Traffic,
                session.bounds(),
                time,
                self.traffic.image().clone(),
            );
            session.ingest_frame(frame);
        }
        Ok(())
    }

    fn write_weather_now(&self) -> Result<(), BoxError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let image = session.current_composite();
        self.save_scaled(&image, &self.output_path(WEATHER_NOW))
    }

    fn save_scaled(&self, image: &RgbaImage, path: &Path) -> Result<(), BoxError> {
        match self.config.scale {
            Some(edge) => scale_to(image, edge).save(path)?,
            None => image.save(path)?,
        }
        Ok(())
    }

    /// Evict frames and archive files older than the retention window.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = self.archive.prune(now);
        if let Some(session) = &self.session {
            removed += session.evict_expired(now);
        }
        if removed > 0 {
            debug!("Removed {} expired radar frame(s)", removed);
        }
        removed
    }

    /// Feed decoder events into the service until `cancel` fires or the
    /// decoder goes away.
    pub async fn run(mut self, mut decoder: Decoder, cancel: CancellationToken) {
        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = decoder.recv() => {
                    match event {
                        Some(DecoderEvent::File { name, bytes }) => {
                            if let Err(e) = self.handle_file(&name, &bytes, Utc::now()) {
                                error!("Failed to process {}: {}", name, e);
                            }
                        }
                        Some(DecoderEvent::Synchronized) => info!("Synchronized"),
                        Some(DecoderEvent::LostSync) => warn!("Lost synchronization"),
                        Some(DecoderEvent::StateChanged(state)) => debug!("Decoder state: {:?}", state),
                        None => break,
                    }
                }

                _ = cleanup.tick() => {
                    self.evict_expired(Utc::now());
                }

                () = cancel.cancelled() => break,
            }
        }

        decoder.shutdown();
        if let Some(session) = &self.session {
            session.close();
        }
        info!("Map service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::{ImageFormat, Rgb, RgbImage, Rgba};
    use radar_map::{GeoBounds, MapCacheConfig, TileGrid};
    use std::io::Cursor;

    struct Fixture {
        dir: PathBuf,
        service: MapService,
        bounds: GeoBounds,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("hdradio-maps-service-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            let grid = TileGrid::new(8, (60, 95), (61, 96));
            let base_map_path = dir.join("base_map.png");
            RgbImage::from_pixel(grid.width_px(), grid.height_px(), Rgb([200, 200, 200]))
                .save(&base_map_path)
                .unwrap();

            let cache = Arc::new(MapCache::new(MapCacheConfig {
                base_map_path,
                cache_dir: dir.join("viewports"),
                grid,
            }));
            let service = MapService::new(
                cache,
                MapServiceConfig {
                    output_dir: dir.join("map"),
                    archive_dir: dir.join("archive"),
                    session: SessionConfig::default(),
                    scale: None,
                    cleanup_interval: Duration::from_secs(60),
                },
            );

            let c = grid.coverage();
            let lat = c.north - c.south;
            let lon = c.east - c.west;
            let bounds = GeoBounds::new(
                c.north - lat * 0.25,
                c.west + lon * 0.25,
                c.south + lat * 0.25,
                c.east - lon * 0.25,
            )
            .unwrap();

            Self { dir, service, bounds }
        }

        fn info_text(&self, area_id: &str) -> Vec<u8> {
            format!(
                "DWR_Area_ID=\"{}\"\nCoordinates=({},{}) ({},{})\n",
                area_id, self.bounds.north, self.bounds.west, self.bounds.south, self.bounds.east
            )
            .into_bytes()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn png(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(width, height, color)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_weather_flow() {
        let mut fixture = Fixture::new();
        let info = fixture.info_text("RD23");
        fixture.service.handle_file("DWRI_0001.txt", &info, now()).unwrap();

        let session = fixture.service.session().unwrap().clone();
        assert_eq!(session.area_id(), "RD23");
        assert!(fixture.service.output_path(WEATHER_NOW).exists());

        let overlay = png(32, 32, Rgba([0, 255, 0, 255]));
        fixture
            .service
            .handle_file("DWRO_RD23_0001_20240501_1235.png", &overlay, now())
            .unwrap();
        fixture
            .service
            .handle_file("DWRO_RD23_0001_20240501_1235.png", &overlay, now())
            .unwrap();
        assert_eq!(session.len(), 1);

        let current = image::open(fixture.service.output_path(WEATHER_NOW)).unwrap().to_rgba8();
        let (w, h) = current.dimensions();
        let [r, g, _, _] = current.get_pixel(w / 2, h / 2).0;
        assert!(r < 5 && g > 250);
        // Capture-time caption in the bottom-right corner
        assert_ne!(current.get_pixel(w - 234, h - 16).0, [0, 255, 0, 255]);

        // Overlays for another area are dropped
        fixture
            .service
            .handle_file("DWRO_NY01_0001_20240501_1240.png", &overlay, now())
            .unwrap();
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_archive_failure_still_updates_map() {
        let mut fixture = Fixture::new();
        // A plain file where the archive directory should be
        let archive_dir = fixture.dir.join("archive");
        std::fs::remove_dir_all(&archive_dir).unwrap();
        std::fs::write(&archive_dir, b"").unwrap();

        let info = fixture.info_text("RD23");
        fixture.service.handle_file("DWRI_0001.txt", &info, now()).unwrap();
        fixture
            .service
            .handle_file("DWRO_RD23_0001_20240501_1235.png", &png(32, 32, Rgba([0, 255, 0, 255])), now())
            .unwrap();

        assert_eq!(fixture.service.session().unwrap().len(), 1);
        let current = image::open(fixture.service.output_path(WEATHER_NOW)).unwrap().to_rgba8();
        let (w, h) = current.dimensions();
        let [r, g, _, _] = current.get_pixel(w / 2, h / 2).0;
        assert!(r < 5 && g > 250);
    }

    #[test]
    fn test_archive_primes_new_session() {
        let mut fixture = Fixture::new();
        let info = fixture.info_text("RD23");
        fixture.service.handle_file("DWRI_0001.txt", &info, now()).unwrap();
        for minute in ["1230", "1235"] {
            fixture
                .service
                .handle_file(
                    &format!("DWRO_RD23_0001_20240501_{minute}.png"),
                    &png(8, 8, Rgba([0, 0, 255, 128])),
                    now(),
                )
                .unwrap();
        }

        // Switching areas and back reloads the archived frames
        let other = fixture.info_text("NY01");
        fixture.service.handle_file("DWRI_0002.txt", &other, now()).unwrap();
        assert!(fixture.service.session().unwrap().is_empty());

        fixture.service.handle_file("DWRI_0003.txt", &info, now()).unwrap();
        assert_eq!(fixture.service.session().unwrap().len(), 2);
    }

    #[test]
    fn test_overlay_before_info_ignored() {
        let mut fixture = Fixture::new();
        fixture
            .service
            .handle_file("DWRO_RD23_0001_20240501_1235.png", &png(8, 8, Rgba([0, 0, 0, 255])), now())
            .unwrap();
        assert!(fixture.service.session().is_none());
        assert!(!fixture.service.output_path(WEATHER_NOW).exists());
    }

    #[test]
    fn test_complete_traffic_map_saved_and_ingested() {
        let mut fixture = Fixture::new();
        let info = fixture.info_text("RD23");
        fixture.service.handle_file("DWRI_0001.txt", &info, now()).unwrap();

        let tile = png(200, 200, Rgba([255, 0, 0, 255]));
        for row in 1..=3 {
            for col in 1..=3 {
                fixture
                    .service
                    .handle_file(&format!("TMT_abc_{row}_{col}_20240501_1230_0.png"), &tile, now())
                    .unwrap();
            }
        }

        let traffic = image::open(fixture.service.output_path(TRAFFIC_MAP)).unwrap();
        assert_eq!((traffic.width(), traffic.height()), (600, 600));

        let session = fixture.service.session().unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.frames.len(), 1);
        assert_eq!(snapshot.frames[0].layer(), FrameLayer::Traffic);
    }

    #[test]
    fn test_area_outside_base_map_has_no_session() {
        let mut fixture = Fixture::new();
        let info = b"DWR_Area_ID=\"EU01\"\nCoordinates=(52.0,5.0) (48.0,15.0)\n";
        fixture.service.handle_file("DWRI_0001.txt", info, now()).unwrap();
        assert!(fixture.service.session().is_none());
    }

    #[test]
    fn test_unrelated_files_ignored() {
        let mut fixture = Fixture::new();
        fixture.service.handle_file("SLKX_logo.png", b"x", now()).unwrap();
        assert!(fixture.service.handle_file("DWRI_0001.txt", b"garbage", now()).is_err());
    }

    #[test]
    fn test_evict_expired() {
        let mut fixture = Fixture::new();
        let info = fixture.info_text("RD23");
        fixture.service.handle_file("DWRI_0001.txt", &info, now()).unwrap();
        fixture
            .service
            .handle_file("DWRO_RD23_0001_20240501_1235.png", &png(8, 8, Rgba([0, 0, 0, 255])), now())
            .unwrap();

        let later = now() + chrono::Duration::hours(13);
        // One session frame plus its archive file
        assert_eq!(fixture.service.evict_expired(later), 2);
        assert!(fixture.service.session().unwrap().is_empty());
    }
}
