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

//! On-disk archive of received radar overlays.
//!
//! Overlays are stored as received, one file per area and capture time
//! (`radar_<area>_<unix seconds>.png`), so a new session for an area can be
//! primed with the frames that are still within the retention window.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use crate::error::MapError;

lazy_static! {
    static ref ARCHIVE_FILE: Regex =
        Regex::new(r"^radar_([A-Za-z0-9]+)_([0-9]+)\.png$").expect("valid archive pattern");
}

/// A stored overlay read back from the archive.
#[derive(Debug, Clone)]
pub struct ArchivedFrame {
    pub captured_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// Directory of stored radar overlays
#[derive(Debug, Clone)]
pub struct FrameArchive {
    dir: PathBuf,
    retention: chrono::Duration,
}

impl FrameArchive {
    pub fn new(dir: impl Into<PathBuf>, retention: chrono::Duration) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create frame archive {}: {}", dir.display(), e);
        }
        Self { dir, retention }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Area ids become part of file names and must be ASCII letters and
    /// digits only, so that distinct ids never share files.
    fn valid_area_id(area_id: &str) -> bool {
        !area_id.is_empty() && area_id.chars().all(|c| c.is_ascii_alphanumeric())
    }

    /// Store an overlay. Storing the same area and time again overwrites it.
    pub fn store(
        &self,
        area_id: &str,
        captured_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<PathBuf, MapError> {
        if !Self::valid_area_id(area_id) {
            return Err(MapError::InvalidAreaId(area_id.to_string()));
        }
        let path = self
            .dir
            .join(format!("radar_{}_{}.png", area_id, captured_at.timestamp()));
        fs::write(&path, bytes)?;
        debug!("Archived radar overlay {}", path.display());
        Ok(path)
    }

    /// Overlays for `area_id` still within the retention window at `now`,
    /// oldest first. Expired files of any area are deleted on the way.
    pub fn load(&self, area_id: &str, now: DateTime<Utc>) -> Vec<ArchivedFrame> {
        if !Self::valid_area_id(area_id) {
            warn!("No archive for area id {:?}", area_id);
            return Vec::new();
        }
        let mut frames: Vec<ArchivedFrame> = self
            .scan(now)
            .into_iter()
            .filter(|(area, _, _)| area == area_id)
            .filter_map(|(_, captured_at, path)| match fs::read(&path) {
                Ok(bytes) => Some(ArchivedFrame { captured_at, bytes }),
                Err(e) => {
                    warn!("Failed to read archived overlay {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        frames.sort_by_key(|f| f.captured_at);
        debug!("Found {} archived overlay(s) for area {}", frames.len(), area_id);
        frames
    }

    /// Delete expired files. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.count();
        let kept = self.scan(now).len();
        before.saturating_sub(kept)
    }

    fn count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| {
                        e.file_name()
                            .to_str()
                            .is_some_and(|n| ARCHIVE_FILE.is_match(n))
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Live archive entries as `(area, capture time, path)`, deleting expired ones.
    fn scan(&self, now: DateTime<Utc>) -> Vec<(String, DateTime<Utc>, PathBuf)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read frame archive {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let cutoff = now - self.retention;
        let mut live = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(caps) = ARCHIVE_FILE.captures(name) else {
                continue;
            };
            let Some(captured_at) = caps[2]
                .parse::<i64>()
                .ok()
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
            else {
                continue;
            };

            if captured_at < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => debug!("Deleted old radar overlay {}", path.display()),
                    Err(e) => warn!("Failed to delete old radar overlay {}: {}", path.display(), e),
                }
                continue;
            }

            live.push((caps[1].to_string(), captured_at, path));
        }

        live
    }
}
