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

//! Weather info (`DWRI_*`) text parser.
//!
//! ```text
//! DWR_Area_ID="RD23"
//! Coordinates=(41.4, -92.1) (37.2, -85.9)
//! ```
//!
//! The coordinates are the upper-left and lower-right corners of the radar
//! overlays sent for the area.

use lazy_static::lazy_static;
use regex::Regex;

use super::ParseError;
use crate::projection::GeoBounds;

lazy_static! {
    static ref AREA_ID: Regex = Regex::new(r#"^DWR_Area_ID="(.+)"$"#).expect("valid area pattern");
    static ref COORDINATE_PAIR: Regex =
        Regex::new(r"\(\s*([-+]?[0-9]*\.?[0-9]+)\s*,\s*([-+]?[0-9]*\.?[0-9]+)\s*\)")
            .expect("valid coordinate pattern");
}

/// Radar area announced by the weather service.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherInfo {
    pub area_id: String,
    pub bounds: GeoBounds,
}

impl WeatherInfo {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid UTF-8: {e}")))?;

        let mut area_id = None;
        let mut corners = None;

        for line in text.lines().map(str::trim) {
            if line.starts_with("DWR_Area_ID=") {
                let caps = AREA_ID
                    .captures(line)
                    .ok_or_else(|| ParseError::InvalidFormat(line.to_string()))?;
                area_id = Some(caps[1].to_string());
            } else if line.starts_with("Coordinates=") {
                corners = Some(parse_corners(line)?);
            }
        }

        let area_id = area_id.ok_or(ParseError::MissingField("DWR_Area_ID"))?;
        let (upper_left, lower_right) = corners.ok_or(ParseError::MissingField("Coordinates"))?;
        let bounds = GeoBounds::from_corners(upper_left, lower_right).map_err(|e| {
            ParseError::InvalidValue {
                field: "Coordinates",
                value: e.to_string(),
            }
        })?;

        Ok(Self { area_id, bounds })
    }
}

type Corner = (f64, f64);

fn parse_corners(line: &str) -> Result<(Corner, Corner), ParseError> {
    let mut pairs = COORDINATE_PAIR.captures_iter(line).map(|caps| {
        let number = |i: usize| {
            caps[i].parse::<f64>().map_err(|e| ParseError::InvalidValue {
                field: "Coordinates",
                value: format!("{} ({e})", &caps[i]),
            })
        };
        Ok::<_, ParseError>((number(1)?, number(2)?))
    });

    let first = pairs
        .next()
        .ok_or_else(|| ParseError::InvalidFormat(line.to_string()))??;
    let second = pairs
        .next()
        .ok_or_else(|| ParseError::InvalidFormat(line.to_string()))??;
    Ok((first, second))
}
