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

//! Map compositing for HD Radio weather and traffic services.
//!
//! This library keeps the pieces needed to turn decoded radar overlays into
//! map images:
//!
//! - **Projection**: the Web Mercator tile grid the base map was stitched from
//! - **Viewport cache**: base map crops per radar area, in memory and on disk
//! - **Sessions**: retained [`RadarFrame`]s for one area, with eviction and
//!   de-duplication
//! - **Compositing and animation**: frames overlaid on the viewport with a
//!   capture-time caption, replayed oldest to newest, each animation with its
//!   own cursor
//! - **Protocol**: decoder status lines, data file names and weather info text
//!
//! # Quick Start
//!
//! ```no_run
//! use radar_map::{FrameLayer, GeoBounds, MapCache, MapCacheConfig, RadarFrame, SessionConfig, TileGrid};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = MapCache::new(MapCacheConfig {
//!     base_map_path: "map.png".into(),
//!     cache_dir: "cache".into(),
//!     grid: TileGrid::default(),
//! });
//!
//! let bounds = GeoBounds::new(41.4, -92.1, 37.2, -85.9)?;
//! let session = cache.open_session("RD23", &bounds, SessionConfig::default())?;
//!
//! let bytes = std::fs::read("DWRO_RD23_0001_20240501_1235.png")?;
//! let frame = RadarFrame::decode(FrameLayer::Weather, bounds, chrono::Utc::now(), &bytes)?;
//! session.ingest_frame(frame);
//!
//! for (i, step) in session.animate(Duration::from_millis(500)).enumerate() {
//!     step.image.save(format!("frame_{i:03}.png"))?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Protocol Layer Only
//!
//! ```
//! use radar_map::protocol::{DataFile, Protocol, StatusEvent, StatusParser};
//!
//! let mut parser = StatusParser::new();
//! let line = b"LOT file: port=1001 lot=33 name=DWRO_RD23_0001_20240501_1235.png size=5120";
//! if let Ok(Some(StatusEvent::LotFile { name, .. })) = parser.parse(line) {
//!     assert!(matches!(DataFile::parse(&name), Ok(Some(DataFile::WeatherOverlay { .. }))));
//! }
//! ```

pub mod animation;
pub mod archive;
pub mod base_map;
pub mod cache;
pub mod caption;
pub mod compose;
pub mod error;
pub mod frame;
pub mod projection;
pub mod protocol;
pub mod session;
pub mod traffic;
pub mod viewport;

pub use animation::{Animation, AnimationFrame, Playback, DEFAULT_LOOP_HOLD};
pub use archive::{ArchivedFrame, FrameArchive};
pub use base_map::BaseMap;
pub use cache::{MapCache, MapCacheConfig, SessionHandle};
pub use caption::{caption_text, draw_caption};
pub use compose::{captioned_composite, composite, scale_to};
pub use error::{FrameError, MapError};
pub use frame::{FrameLayer, RadarFrame};
pub use projection::{GeoBounds, PixelRect, TileCoord, TileGrid, WebMercator, TILE_SIZE};
pub use protocol::{DataFile, ParseError, Protocol, StatusEvent, StatusParser, WeatherInfo};
pub use session::{
    IngestOutcome, IngestReport, MapSession, SessionConfig, SessionSnapshot,
    DEFAULT_ANIMATION_SPEED, DEFAULT_RETENTION_HOURS,
};
pub use traffic::{TrafficMap, TrafficUpdate, TRAFFIC_GRID, TRAFFIC_TILE_SIZE};
pub use viewport::{Viewport, ViewportCache};
