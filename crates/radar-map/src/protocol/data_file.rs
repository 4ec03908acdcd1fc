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

//! Classification of weather and traffic data-service file names.
//!
//! ```text
//! DWRI_<...>                              weather info (area id + coordinates)
//! DWRO_<area>_<...>_<YYYYMMDD_HHMM><...>  weather radar overlay
//! TMT_<...>_<row>_<col>_<YYYYMMDD_HHMM><...>  traffic map tile, row/col 1-3
//! ```

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use super::{parse_file_timestamp, ParseError};

lazy_static! {
    static ref WEATHER_OVERLAY: Regex =
        Regex::new(r"^DWRO_(.*)_.*_(\d{8}_\d{4}).*$").expect("valid overlay pattern");
    static ref TRAFFIC_TILE: Regex =
        Regex::new(r"^TMT_.*_([1-3])_([1-3])_(\d{8}_\d{4}).*$").expect("valid traffic pattern");
}

/// A data file relevant to the map features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFile {
    /// Weather info text describing the radar area.
    WeatherInfo,
    /// Weather radar overlay image for an area.
    WeatherOverlay {
        area_id: String,
        captured_at: DateTime<Utc>,
    },
    /// One tile of the 3×3 traffic map, zero-based.
    TrafficTile {
        row: u8,
        col: u8,
        captured_at: DateTime<Utc>,
    },
}

impl DataFile {
    /// Classify a file name. `Ok(None)` for files the map features ignore
    /// (album art, station logos, ...).
    pub fn parse(name: &str) -> Result<Option<DataFile>, ParseError> {
        if name.starts_with("DWRI_") {
            return Ok(Some(DataFile::WeatherInfo));
        }

        if name.starts_with("DWRO_") {
            let caps = WEATHER_OVERLAY
                .captures(name)
                .ok_or_else(|| ParseError::InvalidFormat(format!("weather overlay name {name}")))?;
            return Ok(Some(DataFile::WeatherOverlay {
                area_id: caps[1].to_string(),
                captured_at: parse_file_timestamp(&caps[2])?,
            }));
        }

        if name.starts_with("TMT_") {
            let caps = TRAFFIC_TILE
                .captures(name)
                .ok_or_else(|| ParseError::InvalidFormat(format!("traffic tile name {name}")))?;
            let index = |i: usize, field: &'static str| {
                caps[i]
                    .parse::<u8>()
                    .map(|n| n - 1)
                    .map_err(|e| ParseError::InvalidValue {
                        field,
                        value: e.to_string(),
                    })
            };
            return Ok(Some(DataFile::TrafficTile {
                row: index(1, "row")?,
                col: index(2, "col")?,
                captured_at: parse_file_timestamp(&caps[3])?,
            }));
        }

        Ok(None)
    }
}
