use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use avfeed::decoder;
use avfeed::media::{Overlay, VideoBuffer};
use avfeed::player::{MediaFeed, TransportCommand};
use avfeed::utils::{load_config, Config};

/// avfeed - pull a media source through the real-time feed pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media file or URL to play ("-" for stdin)
    #[arg(value_name = "INPUT")]
    input: String,

    /// Configuration file (defaults to the system and user config files)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start position in minutes
    #[arg(short, long, value_name = "MINUTES")]
    position: Option<f64>,

    /// Force the input format
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<String>,

    /// Pad widescreen sources to 4:3
    #[arg(long, conflicts_with = "pillarbox")]
    letterbox: bool,

    /// Crop widescreen sources to 4:3
    #[arg(long)]
    pillarbox: bool,

    /// Downmix surround audio to stereo
    #[arg(long)]
    downmix: bool,

    /// Audio gain factor
    #[arg(long, value_name = "GAIN")]
    volume: Option<f32>,

    /// Ignore the audio stream
    #[arg(long)]
    no_audio: bool,

    /// Emit one output frame per field
    #[arg(long)]
    interlace: bool,

    /// Forward text subtitles (optionally from a given stream) to the log
    #[arg(long, value_name = "INDEX", num_args = 0..=1, default_missing_value = "-1")]
    teletext: Option<i64>,

    /// Write raw RGB32 frames here
    #[arg(long, value_name = "FILE")]
    video_out: Option<PathBuf>,

    /// Write raw interleaved s16 audio here
    #[arg(long, value_name = "FILE")]
    audio_out: Option<PathBuf>,

    /// Write a JSON run summary here
    #[arg(long, value_name = "FILE")]
    stats: Option<PathBuf>,

    /// Pull as fast as possible instead of at the output cadence
    #[arg(long)]
    no_pacing: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Summary written with `--stats`
#[derive(Debug, Default, Serialize)]
struct RunStats {
    input: String,
    video_frames: u64,
    audio_blocks: u64,
    audio_samples: u64,
    elapsed_secs: f64,
}

/// Sends changed subtitle text to the log in place of a teletext inserter
struct LogOverlay;

impl Overlay for LogOverlay {
    fn teletext(&self, text: &str) -> avfeed::Result<()> {
        if !text.is_empty() {
            info!("Subtitle: {}", text.replace('\n', " / "));
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => load_config()?,
    };
    apply_args(&mut config, &args);
    config.validate()?;

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting avfeed v{}", env!("CARGO_PKG_VERSION"));

    let (commands, events) = crossbeam_channel::unbounded();
    spawn_key_reader(commands)?;

    let feed = decoder::open(&args.input, &config, Arc::new(LogOverlay), Some(Box::new(events)))
        .with_context(|| format!("Failed to open {}", args.input))?;

    let stats = match run(feed, &config, &args) {
        Ok(stats) => stats,
        Err(e) => {
            error!("Playback failed: {:#}", e);
            return Err(e);
        }
    };

    info!(
        "Finished: {} frames, {} audio blocks in {:.1}s",
        stats.video_frames, stats.audio_blocks, stats.elapsed_secs
    );

    if let Some(path) = &args.stats {
        let json = serde_json::to_string_pretty(&stats)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(())
}

fn apply_args(config: &mut Config, args: &Args) {
    if let Some(position) = args.position {
        config.source.position = position;
    }
    if let Some(format) = &args.format {
        config.source.format = Some(format.clone());
    }
    if let Some(volume) = args.volume {
        config.filter.volume = volume;
    }
    if let Some(index) = args.teletext {
        // Negative means "any subtitle stream"
        config.overlay.teletext_subtitles = Some(usize::try_from(index).unwrap_or(usize::MAX));
    }

    config.filter.letterbox |= args.letterbox;
    config.filter.pillarbox |= args.pillarbox;
    config.filter.downmix |= args.downmix;
    config.output.interlace |= args.interlace;
    config.output.audio &= !args.no_audio;
}

/// Map stdin lines to transport commands
///
/// Space or "p" toggles pause, "f"/"+" seeks forward and "b"/"-" seeks back.
fn spawn_key_reader(commands: crossbeam_channel::Sender<TransportCommand>) -> Result<()> {
    thread::Builder::new()
        .name("avfeed-keys".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };

                let command = match line.trim() {
                    "" | "p" => TransportCommand::TogglePause,
                    "f" | "+" => TransportCommand::SeekForward,
                    "b" | "-" => TransportCommand::SeekBackward,
                    other => {
                        debug!("Ignoring key input {:?}", other);
                        continue;
                    }
                };

                if commands.send(command).is_err() {
                    break;
                }
            }
        })
        .context("Failed to start key reader")?;

    Ok(())
}

fn create_sink(path: &Option<PathBuf>) -> Result<Option<BufWriter<File>>> {
    path.as_ref()
        .map(|path| {
            File::create(path)
                .map(BufWriter::new)
                .with_context(|| format!("Failed to create {}", path.display()))
        })
        .transpose()
}

fn write_frame(sink: &mut Option<BufWriter<File>>, frame: &VideoBuffer) -> Result<()> {
    if let Some(sink) = sink {
        sink.write_all(bytemuck::cast_slice(frame.pixels()))?;
    }
    Ok(())
}

/// Drive the pull API at the output cadence until every stream ends
fn run(mut feed: MediaFeed, config: &Config, args: &Args) -> Result<RunStats> {
    let mut video_sink = create_sink(&args.video_out)?;
    let mut audio_sink = create_sink(&args.audio_out)?;

    let fields = if config.output.interlace { 2.0 } else { 1.0 };
    let tick = Duration::from_secs_f64(
        config.output.frame_rate_den as f64 / (config.output.frame_rate_num as f64 * fields),
    );
    let samples_per_tick = config.output.sample_rate as f64 * tick.as_secs_f64();

    let mut stats = RunStats {
        input: args.input.clone(),
        ..RunStats::default()
    };
    let started = Instant::now();
    let mut deadline = started;
    let mut ticks = 0u64;

    while !feed.eof() {
        if feed.has_video() {
            if let Some(frame) = feed.read_video() {
                write_frame(&mut video_sink, &frame)?;
                stats.video_frames += 1;
            }
        }

        // Keep audio level with the output clock
        if !feed.is_paused() {
            ticks += 1;
        }
        let wanted = (ticks as f64 * samples_per_tick) as u64;
        while feed.has_audio() && stats.audio_samples < wanted {
            let frames = match feed.read_audio() {
                Some(block) => {
                    if let Some(sink) = audio_sink.as_mut() {
                        sink.write_all(bytemuck::cast_slice(block.samples()))?;
                    }
                    block.len()
                }
                None => break,
            };

            stats.audio_blocks += 1;
            stats.audio_samples += frames as u64;
        }

        if !args.no_pacing {
            deadline += tick;
            if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }

    stats.elapsed_secs = started.elapsed().as_secs_f64();
    feed.close();

    for sink in [video_sink.as_mut(), audio_sink.as_mut()].into_iter().flatten() {
        sink.flush()?;
    }

    Ok(stats)
}
