mod config;
mod decoder;
mod map_builder;
mod map_service;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config::AppConfig;
use decoder::{Decoder, DecoderConfig};
use log::{error, info, warn};
use map_service::{MapService, MapServiceConfig};
use radar_map::{
    scale_to, AnimationFrame, FrameArchive, FrameLayer, GeoBounds, MapCache, RadarFrame,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Weather radar and traffic maps from HD Radio data services", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download map tiles and stitch the base map, then drop cached viewports
    BuildBaseMap {
        /// Tile server URL (overrides the config file)
        #[arg(long)]
        tile_server: Option<String>,
    },
    /// Write the base map crop for an area
    Viewport {
        /// Area as NORTH,WEST,SOUTH,EAST in degrees
        #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
        area: GeoBounds,
        #[arg(short, long, default_value = "viewport.png")]
        output: PathBuf,
    },
    /// Discard every cached viewport
    Invalidate,
    /// Render archived radar frames of an area as an animation
    Animate {
        /// Radar area id as announced by the station
        #[arg(long)]
        area_id: String,
        /// Area as NORTH,WEST,SOUTH,EAST in degrees
        #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
        area: GeoBounds,
        /// Seconds per frame (overrides the config file)
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long, default_value = "animation")]
        output_dir: PathBuf,
        /// Pace frame output at the animation speed
        #[arg(long)]
        realtime: bool,
    },
    /// Run the decoder and keep maps up to date until interrupted
    Run {
        /// Frequency in MHz
        frequency: f64,
        /// Audio program (0-3)
        #[arg(default_value_t = 0)]
        program: u8,
    },
}

fn parse_bounds(value: &str) -> Result<GeoBounds, String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    match parts.as_slice() {
        [north, west, south, east] => {
            GeoBounds::new(*north, *west, *south, *east).map_err(|e| e.to_string())
        }
        _ => Err("expected NORTH,WEST,SOUTH,EAST".to_string()),
    }
}

#[derive(Serialize, Debug)]
struct IndexEntry {
    file: String,
    captured_at: Option<DateTime<Utc>>,
    delay_ms: u128,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {}", e);
        AppConfig::default()
    });
    if let Ok(path) = AppConfig::get_config_path() {
        info!("Configuration: {}", path.display());
    }

    let cache = Arc::new(MapCache::new(config.map_cache_config()));

    match args.command {
        Command::BuildBaseMap { tile_server } => {
            let server = tile_server.unwrap_or_else(|| config.tile_server.clone());
            build_base_map(&cache, server).await?;
        }
        Command::Viewport { area, output } => {
            let viewport = cache.get_viewport(&area)?;
            viewport.image().save(&output)?;
            info!("Wrote {} viewport to {}", area, output.display());
        }
        Command::Invalidate => {
            let removed = cache.invalidate()?;
            info!("Removed {} cached viewport(s)", removed);
        }
        Command::Animate {
            area_id,
            area,
            speed,
            output_dir,
            realtime,
        } => {
            let speed = speed
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .unwrap_or_else(|| config.animation_speed());
            animate(&cache, &config, &area_id, &area, speed, &output_dir, realtime).await?;
        }
        Command::Run { frequency, program } => {
            run(cache, &config, frequency, program).await?;
        }
    }

    Ok(())
}

async fn build_base_map(cache: &Arc<MapCache>, server: String) -> Result<(), BoxError> {
    let grid = cache.grid();
    let path = cache.base_map().path().to_path_buf();

    tokio::task::spawn_blocking(move || map_builder::build_base_map(&grid, &server, &path)).await??;

    let removed = cache.invalidate()?;
    info!("Base map rebuilt, dropped {} cached viewport(s)", removed);
    Ok(())
}

async fn animate(
    cache: &MapCache,
    config: &AppConfig,
    area_id: &str,
    area: &GeoBounds,
    speed: Duration,
    output_dir: &Path,
    realtime: bool,
) -> Result<(), BoxError> {
    let session = cache.open_session(area_id, area, config.session_config())?;

    let archive = FrameArchive::new(&config.archive_dir, config.retention());
    for stored in archive.load(area_id, Utc::now()) {
        match RadarFrame::decode(FrameLayer::Weather, *area, stored.captured_at, &stored.bytes) {
            Ok(frame) => {
                session.ingest_frame(frame);
            }
            Err(e) => warn!("Skipping archived overlay {}: {}", stored.captured_at, e),
        }
    }
    info!("Animating {} frame(s) for area {}", session.len(), area_id);

    std::fs::create_dir_all(output_dir)?;
    let mut index = Vec::new();
    let mut write = |i: usize, frame: &AnimationFrame| -> Result<(), BoxError> {
        let file = format!("frame_{i:03}.png");
        match config.scale() {
            Some(edge) => scale_to(&frame.image, edge).save(output_dir.join(&file))?,
            None => frame.image.save(output_dir.join(&file))?,
        }
        index.push(IndexEntry {
            file,
            captured_at: frame.captured_at,
            delay_ms: frame.delay.as_millis(),
        });
        Ok(())
    };

    let animation = session.animate(speed);
    if realtime {
        let mut playback = animation.play(false, config.loop_hold());
        let mut i = 0;
        loop {
            tokio::select! {
                frame = playback.recv() => {
                    let Some(frame) = frame else { break };
                    write(i, &frame)?;
                    i += 1;
                }
                _ = tokio::signal::ctrl_c() => {
                    playback.stop();
                    break;
                }
            }
        }
    } else {
        for (i, frame) in animation.enumerate() {
            write(i, &frame)?;
        }
    }

    let count = index.len();
    std::fs::write(output_dir.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
    session.close();
    info!("Wrote {} frame(s) to {}", count, output_dir.display());
    Ok(())
}

async fn run(cache: Arc<MapCache>, config: &AppConfig, frequency: f64, program: u8) -> Result<(), BoxError> {
    if !cache.base_map().exists() {
        warn!(
            "Base map {} is missing; run build-base-map first",
            cache.base_map().path().display()
        );
    }

    let decoder = Decoder::spawn(DecoderConfig {
        program: config.decoder_program.clone(),
        args: config.decoder_args.clone(),
        frequency,
        program_number: program,
        dump_dir: config.dump_dir.clone(),
        restart_delay: Duration::from_secs(5),
        buffer_size: 64,
    });

    let service = MapService::new(
        cache,
        MapServiceConfig {
            output_dir: config.output_dir.clone(),
            archive_dir: config.archive_dir.clone(),
            session: config.session_config(),
            scale: config.scale(),
            cleanup_interval: Duration::from_secs(60),
        },
    );

    let cancel = CancellationToken::new();
    let mut service_task = tokio::spawn(service.run(decoder, cancel.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down");
            cancel.cancel();
            service_task.await?;
        }
        result = &mut service_task => {
            result?;
            warn!("Decoder stopped, map service ended");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bounds() {
        let bounds = parse_bounds("41.4,-92.1,37.2,-85.9").unwrap();
        assert_eq!(bounds, GeoBounds::new(41.4, -92.1, 37.2, -85.9).unwrap());
        assert!(parse_bounds("41.4,-92.1,37.2").is_err());
        assert!(parse_bounds("37.2,-92.1,41.4,-85.9").is_err());
        assert!(parse_bounds("a,b,c,d").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let args = Args::try_parse_from([
            "hdradio-maps",
            "animate",
            "--area-id",
            "RD23",
            "--area",
            "41.4,-92.1,37.2,-85.9",
            "--speed",
            "0.25",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Animate { realtime: false, .. }));

        let args = Args::try_parse_from(["hdradio-maps", "run", "90.5", "1"]).unwrap();
        assert!(matches!(args.command, Command::Run { program: 1, .. }));
    }
}
