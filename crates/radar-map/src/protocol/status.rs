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

//! Decoder status line parser.
//!
//! Only the lines the map features act on are recognised:
//!
//! ```text
//! 12:00:01 Synchronized
//! 12:03:44 LOT file: port=1001 lot=33 name=DWRO_RD23_0001_20240501_1235.png size=5120 mime=F7F08A70
//! 12:09:12 Lost synchronization
//! ```

use lazy_static::lazy_static;
use regex::Regex;

use super::{ParseError, Protocol};

lazy_static! {
    static ref LOT_FILE: Regex = Regex::new(
        r"LOT file: port=([0-9A-Fa-f]+)\b.*?\bname=(\S+)(?:.*?\bsize=(\d+))?"
    )
    .expect("valid LOT pattern");
}

/// Events reported by the decoder that matter to the map features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A data-service file was received and written to the dump directory.
    LotFile {
        port: u16,
        name: String,
        size: Option<usize>,
    },
    /// The decoder locked onto the signal.
    Synchronized,
    /// The decoder lost the signal.
    LostSync,
}

/// Parser for decoder status lines.
#[derive(Debug, Default)]
pub struct StatusParser;

impl StatusParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for StatusParser {
    type Message = StatusEvent;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<StatusEvent>, ParseError> {
        let line = std::str::from_utf8(input)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid UTF-8: {e}")))?;

        parse_status_line(line.trim_end())
    }
}

fn parse_status_line(line: &str) -> Result<Option<StatusEvent>, ParseError> {
    if line.contains("LOT file:") {
        let caps = LOT_FILE
            .captures(line)
            .ok_or(ParseError::MissingField("name"))?;

        let port = u16::from_str_radix(&caps[1], 16).map_err(|e| ParseError::InvalidValue {
            field: "port",
            value: format!("{} ({e})", &caps[1]),
        })?;
        let size = caps.get(3).and_then(|m| m.as_str().parse().ok());

        return Ok(Some(StatusEvent::LotFile {
            port,
            name: caps[2].to_string(),
            size,
        }));
    }

    if line.ends_with("Lost synchronization") {
        return Ok(Some(StatusEvent::LostSync));
    }
    if line.ends_with("Synchronized") {
        return Ok(Some(StatusEvent::Synchronized));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lot_file() {
        let mut parser = StatusParser::new();
        let line = b"12:03:44 LOT file: port=1001 lot=33 name=DWRO_RD23_0001_20240501_1235.png size=5120 mime=F7F08A70\n";
        let result = parser.parse(line).unwrap();
        assert_eq!(
            result,
            Some(StatusEvent::LotFile {
                port: 0x1001,
                name: "DWRO_RD23_0001_20240501_1235.png".to_string(),
                size: Some(5120),
            })
        );
    }

    #[test]
    fn test_parse_lot_file_without_size() {
        let mut parser = StatusParser::new();
        let result = parser.parse(b"LOT file: port=0A00 name=TMT_1_1_1_20240501_1200.png").unwrap();
        assert!(matches!(
            result,
            Some(StatusEvent::LotFile { port: 0x0a00, size: None, .. })
        ));
    }

    #[test]
    fn test_parse_sync_lines() {
        let mut parser = StatusParser::new();
        assert_eq!(parser.parse(b"12:00:01 Synchronized").unwrap(), Some(StatusEvent::Synchronized));
        assert_eq!(
            parser.parse(b"12:09:12 Lost synchronization").unwrap(),
            Some(StatusEvent::LostSync)
        );
    }

    #[test]
    fn test_other_lines_ignored() {
        let mut parser = StatusParser::new();
        assert_eq!(parser.parse(b"12:00:02 Title: Some Song").unwrap(), None);
        assert!(parser.parse(b"LOT file: port=1001 lot=1").is_err());
        assert!(parser.parse(&[0xff, 0xfe]).is_err());
    }
}
