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

//! Live map viewing session: viewport and retained frames.
//!
//! A session keeps frames ordered by capture time and only while they fall
//! inside the retention window, measured back from the newest capture time
//! seen so far. Playback positions are capture times held by each animation,
//! so frames evicted mid-playback are skipped naturally.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

use crate::frame::{FrameLayer, RadarFrame};
use crate::viewport::Viewport;

/// Radar frames are kept for 12 hours.
pub const DEFAULT_RETENTION_HOURS: i64 = 12;

/// Default delay between animation frames.
pub const DEFAULT_ANIMATION_SPEED: Duration = Duration::from_millis(500);

/// Per-session settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// How far back from the newest frame frames are retained.
    pub retention: chrono::Duration,
    /// Delay between animation frames.
    pub speed: Duration,
    /// Layer replayed by animations and shown as the current map.
    pub layer: FrameLayer,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::hours(DEFAULT_RETENTION_HOURS),
            speed: DEFAULT_ANIMATION_SPEED,
            layer: FrameLayer::Weather,
        }
    }
}

/// What happened to an ingested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New capture time, added to the sequence.
    Inserted,
    /// Replaced a different frame with the same capture time.
    Replaced,
    /// Identical to a retained frame; nothing changed.
    Duplicate,
    /// Older than the retention window; not retained.
    Expired,
}

/// Result of [`MapSession::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    /// Frames evicted because the window moved forward.
    pub evicted: usize,
}

type FrameKey = (DateTime<Utc>, FrameLayer);

/// State of an active map session.
#[derive(Debug)]
pub struct MapSession {
    area_id: String,
    viewport: Viewport,
    frames: BTreeMap<FrameKey, RadarFrame>,
    latest: Option<DateTime<Utc>>,
    retention: chrono::Duration,
    speed: Duration,
    layer: FrameLayer,
}

impl MapSession {
    #[must_use]
    pub fn new(area_id: impl Into<String>, viewport: Viewport, config: SessionConfig) -> Self {
        Self {
            area_id: area_id.into(),
            viewport,
            frames: BTreeMap::new(),
            latest: None,
            retention: config.retention,
            speed: config.speed,
            layer: config.layer,
        }
    }

    #[must_use]
    pub fn area_id(&self) -> &str {
        &self.area_id
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Insert a frame and evict everything older than the retention window.
    pub fn ingest(&mut self, frame: RadarFrame) -> IngestReport {
        let captured_at = frame.captured_at();
        let latest = self.latest.map_or(captured_at, |l| l.max(captured_at));
        let cutoff = latest - self.retention;

        if captured_at < cutoff {
            debug!(
                "Dropping {} frame from {}: older than retention window",
                frame.layer(),
                captured_at
            );
            return IngestReport {
                outcome: IngestOutcome::Expired,
                evicted: 0,
            };
        }

        let key = (captured_at, frame.layer());
        let outcome = match self.frames.get(&key) {
            Some(existing) if existing.is_duplicate_of(&frame) => IngestOutcome::Duplicate,
            Some(_) => IngestOutcome::Replaced,
            None => IngestOutcome::Inserted,
        };

        if outcome != IngestOutcome::Duplicate {
            self.frames.insert(key, frame);
        }
        self.latest = Some(latest);

        IngestReport {
            outcome,
            evicted: self.evict_before(cutoff),
        }
    }

    /// Evict frames captured before `now - retention`.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        self.evict_before(now - self.retention)
    }

    fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.frames.len();
        self.frames.retain(|(captured_at, _), _| *captured_at >= cutoff);
        let evicted = before - self.frames.len();
        if evicted > 0 {
            debug!("Evicted {} frame(s) captured before {}", evicted, cutoff);
        }
        evicted
    }

    /// Retained frames of every layer in capture-time order.
    pub fn frames(&self) -> impl Iterator<Item = &RadarFrame> {
        self.frames.values()
    }

    /// Retained frames of the active layer in capture-time order.
    pub fn layer_frames(&self) -> impl Iterator<Item = &RadarFrame> {
        let layer = self.layer;
        self.frames.values().filter(move |f| f.layer() == layer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Newest retained frame of the active layer.
    #[must_use]
    pub fn latest_frame(&self) -> Option<&RadarFrame> {
        self.layer_frames().last()
    }

    /// First frame of the active layer captured after `cursor`, or the
    /// oldest one when `cursor` is `None`.
    #[must_use]
    pub fn next_frame_after(&self, cursor: Option<DateTime<Utc>>) -> Option<RadarFrame> {
        self.layer_frames()
            .find(|f| cursor.map_or(true, |c| f.captured_at() > c))
            .cloned()
    }

    #[must_use]
    pub fn speed(&self) -> Duration {
        self.speed
    }

    pub fn set_speed(&mut self, speed: Duration) {
        self.speed = speed;
    }

    #[must_use]
    pub fn layer(&self) -> FrameLayer {
        self.layer
    }

    /// Switch the layer shown and replayed.
    pub fn set_layer(&mut self, layer: FrameLayer) {
        self.layer = layer;
    }

    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }

    /// Consistent copy of the session for display.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            area_id: self.area_id.clone(),
            viewport: self.viewport.clone(),
            frames: self.frames.values().cloned().collect(),
            speed: self.speed,
            layer: self.layer,
        }
    }
}

/// Point-in-time copy of a session. Frame rasters are shared, not copied.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub area_id: String,
    pub viewport: Viewport,
    pub frames: Vec<RadarFrame>,
    pub speed: Duration,
    pub layer: FrameLayer,
}
