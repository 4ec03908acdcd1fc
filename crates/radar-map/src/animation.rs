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

//! Replaying a session's retained frames as composited images.
//!
//! [`Animation`] is a lazy iterator with its own cursor, the capture time of
//! the last frame it produced. Each step looks up the next frame under the
//! session lock, then composites outside of it. It ends after the
//! newest frame and can be restarted from the oldest. [`Animation::play`]
//! drives it on a tokio task, one frame per tick, until the sequence ends or
//! its cancellation token fires.

use std::iter::FusedIterator;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::compose::captioned_composite;
use crate::projection::TileGrid;
use crate::session::MapSession;
use crate::viewport::Viewport;

/// Hold time for the newest frame before a looping animation restarts.
pub const DEFAULT_LOOP_HOLD: Duration = Duration::from_secs(2);

pub(crate) fn lock_session(session: &Mutex<MapSession>) -> MutexGuard<'_, MapSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One composited animation step.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub image: RgbaImage,
    /// Capture time of the overlaid frame; `None` for the bare viewport.
    pub captured_at: Option<DateTime<Utc>>,
    /// How long to show this frame.
    pub delay: Duration,
}

/// Lazy, restartable sequence of composites for a session.
#[derive(Debug)]
pub struct Animation {
    session: Arc<Mutex<MapSession>>,
    grid: TileGrid,
    viewport: Viewport,
    cancel: CancellationToken,
    cursor: Option<DateTime<Utc>>,
    emitted: usize,
    finished: bool,
}

impl Animation {
    pub(crate) fn new(
        session: Arc<Mutex<MapSession>>,
        grid: TileGrid,
        cancel: CancellationToken,
    ) -> Self {
        let viewport = lock_session(&session).viewport().clone();

        Self {
            session,
            grid,
            viewport,
            cancel,
            cursor: None,
            emitted: 0,
            finished: false,
        }
    }

    /// Start again from the oldest retained frame.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.emitted = 0;
        self.finished = false;
    }

    /// Delay between frames, read from the session.
    #[must_use]
    pub fn speed(&self) -> Duration {
        lock_session(&self.session).speed()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Play on a background task, one frame per tick.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn play(self, looping: bool, hold_last: Duration) -> Playback {
        let (frame_tx, frame_rx) = mpsc::channel(4);
        let cancel = self.cancel.child_token();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            playback_loop(self, frame_tx, task_cancel, looping, hold_last).await;
        });

        Playback {
            frame_rx,
            cancel,
            task,
        }
    }
}

impl Iterator for Animation {
    type Item = AnimationFrame;

    fn next(&mut self) -> Option<AnimationFrame> {
        if self.finished || self.cancel.is_cancelled() {
            return None;
        }

        let (frame, delay) = {
            let session = lock_session(&self.session);
            (session.next_frame_after(self.cursor), session.speed())
        };

        if let Some(frame) = frame {
            self.cursor = Some(frame.captured_at());
            self.emitted += 1;
            return Some(AnimationFrame {
                image: captioned_composite(&self.grid, &self.viewport, &frame),
                captured_at: Some(frame.captured_at()),
                delay,
            });
        }

        self.finished = true;
        if self.emitted == 0 {
            // Nothing retained: a single frame of the bare map
            self.emitted = 1;
            return Some(AnimationFrame {
                image: self.viewport.image().as_ref().clone(),
                captured_at: None,
                delay,
            });
        }
        None
    }
}

impl FusedIterator for Animation {}

async fn playback_loop(
    mut animation: Animation,
    frame_tx: mpsc::Sender<AnimationFrame>,
    cancel: CancellationToken,
    looping: bool,
    hold_last: Duration,
) {
    loop {
        let mut shown = 0usize;

        while let Some(frame) = animation.next() {
            if frame.captured_at.is_some() {
                shown += 1;
            }
            let delay = frame.delay;

            if frame_tx.send(frame).await.is_err() {
                return; // Receiver dropped
            }

            tokio::select! {
                () = sleep(delay) => {}
                () = cancel.cancelled() => {
                    debug!("Animation cancelled");
                    return;
                }
            }
        }

        if !looping || shown == 0 || cancel.is_cancelled() {
            debug!("Animation finished after {} frame(s)", shown);
            return;
        }

        // Newest frame stays up longer before starting over
        let extra = hold_last.saturating_sub(animation.speed());
        tokio::select! {
            () = sleep(extra) => {}
            () = cancel.cancelled() => return,
        }
        animation.restart();
    }
}

/// Handle to a running animation.
///
/// Dropping the handle stops playback.
#[derive(Debug)]
pub struct Playback {
    frame_rx: mpsc::Receiver<AnimationFrame>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Playback {
    /// Receive the next frame; `None` once playback has ended or was stopped.
    pub async fn recv(&mut self) -> Option<AnimationFrame> {
        self.frame_rx.recv().await
    }

    /// Stop playback immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
