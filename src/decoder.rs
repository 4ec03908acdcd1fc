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

//! Decoder process supervision.
//!
//! Runs the HD Radio decoder as a child process, parses its status output and
//! hands back the data files it dumps. The process is restarted after it
//! exits until the handle is shut down.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, info, warn};
use radar_map::{Protocol, StatusEvent, StatusParser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Configuration for the decoder process.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Frequency in MHz.
    pub frequency: f64,
    /// Audio program number (0-3).
    pub program_number: u8,
    /// Directory the decoder writes received files into.
    pub dump_dir: PathBuf,
    /// Delay before restarting after the process exits.
    pub restart_delay: Duration,
    pub buffer_size: usize,
}

impl DecoderConfig {
    fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "--dump-aas-files".to_string(),
            self.dump_dir.display().to_string(),
        ];
        args.extend(self.args.iter().cloned());
        args.push(self.frequency.to_string());
        args.push(self.program_number.to_string());
        args
    }
}

/// Decoder process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderState {
    Starting,
    Running,
    Exited,
    Error(String),
}

/// Events emitted by the decoder.
#[derive(Debug, Clone)]
pub enum DecoderEvent {
    StateChanged(DecoderState),
    Synchronized,
    LostSync,
    /// A data file was received; `bytes` is its content from the dump directory.
    File { name: String, bytes: Vec<u8> },
}

/// Handle to a supervised decoder process.
pub struct Decoder {
    event_rx: mpsc::Receiver<DecoderEvent>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Decoder {
    #[must_use]
    pub fn spawn(config: DecoderConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size);
        let cancel_token = CancellationToken::new();
        let task_cancel = cancel_token.clone();

        tokio::spawn(async move {
            decoder_loop(config, event_tx, task_cancel).await;
        });

        Self {
            event_rx,
            cancel_token,
        }
    }

    /// Receive the next event. Returns `None` once the decoder has shut down.
    pub async fn recv(&mut self) -> Option<DecoderEvent> {
        self.event_rx.recv().await
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn decoder_loop(
    config: DecoderConfig,
    event_tx: mpsc::Sender<DecoderEvent>,
    cancel_token: CancellationToken,
) {
    if let Err(e) = tokio::fs::create_dir_all(&config.dump_dir).await {
        error!("Failed to create dump directory {}: {}", config.dump_dir.display(), e);
    }

    loop {
        if cancel_token.is_cancelled() {
            info!("Decoder cancelled");
            return;
        }

        if event_tx
            .send(DecoderEvent::StateChanged(DecoderState::Starting))
            .await
            .is_err()
        {
            return; // Receiver dropped
        }

        info!("Starting {} {}", config.program, config.command_args().join(" "));

        match run_decoder(&config, &event_tx, &cancel_token).await {
            Ok(ExitReason::Cancelled) => {
                info!("Decoder cancelled");
                return;
            }
            Ok(ExitReason::Exited) => {
                warn!("Decoder exited");
                let _ = event_tx
                    .send(DecoderEvent::StateChanged(DecoderState::Exited))
                    .await;
            }
            Err(e) => {
                error!("Decoder error: {}", e);
                let _ = event_tx
                    .send(DecoderEvent::StateChanged(DecoderState::Error(e.to_string())))
                    .await;
            }
        }

        warn!("Restarting decoder in {} seconds...", config.restart_delay.as_secs());

        tokio::select! {
            () = sleep(config.restart_delay) => {}
            () = cancel_token.cancelled() => {
                info!("Decoder cancelled during restart delay");
                return;
            }
        }
    }
}

enum ExitReason {
    Exited,
    Cancelled,
}

async fn run_decoder(
    config: &DecoderConfig,
    event_tx: &mpsc::Sender<DecoderEvent>,
    cancel_token: &CancellationToken,
) -> Result<ExitReason, Box<dyn std::error::Error + Send + Sync>> {
    let mut child = Command::new(&config.program)
        .args(config.command_args())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stderr = child.stderr.take().ok_or("decoder stderr not captured")?;
    if event_tx
        .send(DecoderEvent::StateChanged(DecoderState::Running))
        .await
        .is_err()
    {
        return Ok(ExitReason::Cancelled);
    }

    // Raw lines: metadata text is not always UTF-8, and only LOT lines matter
    let mut lines = BufReader::new(stderr).split(b'\n');
    let mut parser = StatusParser::new();

    loop {
        tokio::select! {
            line_result = lines.next_segment() => {
                match line_result? {
                    Some(line) => {
                        let Some(event) = handle_line(&mut parser, &line, &config.dump_dir).await else {
                            continue;
                        };
                        if event_tx.send(event).await.is_err() {
                            return Ok(ExitReason::Cancelled);
                        }
                    }
                    None => {
                        let status = child.wait().await?;
                        info!("Decoder exited with {}", status);
                        return Ok(ExitReason::Exited);
                    }
                }
            }

            () = cancel_token.cancelled() => {
                child.kill().await?;
                return Ok(ExitReason::Cancelled);
            }
        }
    }
}

async fn handle_line(parser: &mut StatusParser, line: &[u8], dump_dir: &Path) -> Option<DecoderEvent> {
    match parser.parse(line) {
        Ok(Some(StatusEvent::Synchronized)) => Some(DecoderEvent::Synchronized),
        Ok(Some(StatusEvent::LostSync)) => Some(DecoderEvent::LostSync),
        Ok(Some(StatusEvent::LotFile { port, name, .. })) => {
            debug!("LOT port={:04X} name={}", port, name);
            read_dumped_file(dump_dir, name).await
        }
        Ok(None) => None,
        Err(e) => {
            debug!("Unparsed decoder line {:?}: {}", String::from_utf8_lossy(line), e);
            None
        }
    }
}

/// Read a file the decoder wrote. Names with path components are refused.
async fn read_dumped_file(dump_dir: &Path, name: String) -> Option<DecoderEvent> {
    if Path::new(&name).file_name().and_then(|n| n.to_str()) != Some(name.as_str()) {
        warn!("Ignoring data file with unexpected name {:?}", name);
        return None;
    }

    match tokio::fs::read(dump_dir.join(&name)).await {
        Ok(bytes) => Some(DecoderEvent::File { name, bytes }),
        Err(e) => {
            warn!("Failed to read data file {}: {}", name, e);
            None
        }
    }
}
