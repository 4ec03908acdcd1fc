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

//! Application configuration management.
//!
//! Persistent settings are stored as TOML through `confy`. Every field has a
//! serde default so older config files keep loading as fields are added.

use std::path::PathBuf;
use std::time::Duration;

use radar_map::{MapCacheConfig, SessionConfig, TileGrid, DEFAULT_RETENTION_HOURS};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "hdradio-maps";

/// Default slippy-map tile server used to build the base map.
pub const DEFAULT_TILE_SERVER: &str = "https://tile.openstreetmap.org";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Stitched base map image
    #[serde(default = "default_base_map_path")]
    pub base_map_path: PathBuf,

    /// Directory for cached viewport crops
    #[serde(default = "default_viewport_dir")]
    pub viewport_dir: PathBuf,

    /// Directory for archived radar overlays
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Directory where composites are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory the decoder dumps received data files into
    #[serde(default = "default_dump_dir")]
    pub dump_dir: PathBuf,

    /// How long radar frames are kept
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,

    /// Animation delay per frame in seconds
    #[serde(default = "default_animation_speed")]
    pub animation_speed_secs: f64,

    /// Extra delay on the newest frame before a looping animation restarts
    #[serde(default = "default_loop_hold")]
    pub loop_hold_secs: f64,

    /// Resize output images to this square edge; 0 keeps the viewport size
    #[serde(default = "default_scale")]
    pub scale: u32,

    /// Tile server for building the base map
    #[serde(default = "default_tile_server")]
    pub tile_server: String,

    /// Decoder executable
    #[serde(default = "default_decoder_program")]
    pub decoder_program: String,

    /// Extra decoder arguments (gain, device index, ...)
    #[serde(default)]
    pub decoder_args: Vec<String>,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

fn default_base_map_path() -> PathBuf {
    cache_root().join("base_map.png")
}

fn default_viewport_dir() -> PathBuf {
    cache_root().join("viewports")
}

fn default_archive_dir() -> PathBuf {
    cache_root().join("archive")
}

fn default_output_dir() -> PathBuf {
    cache_root().join("map")
}

fn default_dump_dir() -> PathBuf {
    cache_root().join("aas")
}

fn default_retention_hours() -> i64 {
    DEFAULT_RETENTION_HOURS
}

fn default_animation_speed() -> f64 {
    0.5
}

fn default_loop_hold() -> f64 {
    2.0
}

fn default_scale() -> u32 {
    600
}

fn default_tile_server() -> String {
    DEFAULT_TILE_SERVER.to_string()
}

fn default_decoder_program() -> String {
    "nrsc5".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            base_map_path: default_base_map_path(),
            viewport_dir: default_viewport_dir(),
            archive_dir: default_archive_dir(),
            output_dir: default_output_dir(),
            dump_dir: default_dump_dir(),
            retention_hours: default_retention_hours(),
            animation_speed_secs: default_animation_speed(),
            loop_hold_secs: default_loop_hold(),
            scale: default_scale(),
            tile_server: default_tile_server(),
            decoder_program: default_decoder_program(),
            decoder_args: Vec::new(),
        }
    }
}

/// Seconds from the config file; negative or non-finite values fall back to zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

impl AppConfig {
    /// Load configuration from disk
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, "config")
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, "config")
    }

    pub fn animation_speed(&self) -> Duration {
        seconds(self.animation_speed_secs)
    }

    pub fn loop_hold(&self) -> Duration {
        seconds(self.loop_hold_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours.max(0))
    }

    /// Square output edge, if scaling is enabled.
    pub fn scale(&self) -> Option<u32> {
        (self.scale > 0).then_some(self.scale)
    }

    pub fn map_cache_config(&self) -> MapCacheConfig {
        MapCacheConfig {
            base_map_path: self.base_map_path.clone(),
            cache_dir: self.viewport_dir.clone(),
            grid: TileGrid::default(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retention: self.retention(),
            speed: self.animation_speed(),
            ..SessionConfig::default()
        }
    }
}
