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

//! Parsing of decoder output.
//!
//! The decoder reports each data-service file it receives on a status line
//! and writes the file's payload into a dump directory. This module parses
//! the status lines, classifies file names from the weather and traffic
//! services, and reads the weather-info text that carries the radar area.

mod data_file;
mod status;
mod weather_info;

pub use data_file::DataFile;
pub use status::{StatusEvent, StatusParser};
pub use weather_info::WeatherInfo;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Errors that can occur while parsing decoder output.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Trait for line parsers.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}

/// Parse the `YYYYMMDD_HHMM` UTC stamp embedded in data file names.
pub(crate) fn parse_file_timestamp(stamp: &str) -> Result<DateTime<Utc>, ParseError> {
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M")
        .map(|naive| naive.and_utc())
        .map_err(|e| ParseError::InvalidValue {
            field: "timestamp",
            value: format!("{stamp} ({e})"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_file_timestamp() {
        assert_eq!(
            parse_file_timestamp("20240501_1235").unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 35, 0).unwrap()
        );
        assert!(parse_file_timestamp("20241301_1235").is_err());
    }
}
