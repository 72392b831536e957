// THEORY:
// `replay_tester` drives a full session offline: a folder of frames, a file of
// detections recorded for those frames, and a session config. Every record the
// session emits is printed to stdout as one JSON line, so runs can be diffed.
// With `--render`, each frame is also written back out with its overlay drawn,
// which is the quickest way to eyeball line placement and track ids. Labels and
// legends need `--font`; without it only the shapes are painted.

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use traffic_lens::overlay;
use traffic_lens::{ImageSequence, RecordedDetections, Session, SessionConfig, SessionEvent};

#[derive(Parser, Debug)]
#[command(name = "replay_tester", about = "Replay recorded detections through a traffic_lens session")]
struct Args {
    /// Directory of frames, played back in file-name order.
    #[arg(long, value_name = "DIR")]
    frames: PathBuf,
    /// JSON lines of `{"frame": n, "detections": [...]}`.
    #[arg(long, value_name = "FILE")]
    detections: PathBuf,
    /// Session configuration (lines, roi, speed zone, tracker).
    #[arg(long, value_name = "FILE")]
    config: PathBuf,
    /// Write annotated frames to this directory.
    #[arg(long, value_name = "DIR")]
    render: Option<PathBuf>,
    /// Frame rate of the recording.
    #[arg(long)]
    fps: Option<f64>,
    /// TrueType/OpenType font for labels and legends on rendered frames.
    #[arg(long, value_name = "FILE", requires = "render")]
    font: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Argument Parsing & Setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("traffic_lens=info,replay_tester=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config_json = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config = SessionConfig::from_json(&config_json).context("invalid session config")?;

    let detections_file =
        File::open(&args.detections).with_context(|| format!("opening {}", args.detections.display()))?;
    let detector = RecordedDetections::from_json_lines(BufReader::new(detections_file))?;
    info!(frames = detector.frames(), "recorded detections loaded");

    if let Some(dir) = &args.render {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let font = match &args.font {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            Some(overlay::load_font(bytes).with_context(|| format!("parsing font {}", path.display()))?)
        }
        None => None,
    };
    if args.render.is_some() && font.is_none() {
        warn!("no --font given, rendered frames will carry shapes only");
    }

    // --- 2. Session Initialization ---
    let mut source = ImageSequence::new(&args.frames);
    if let Some(fps) = args.fps {
        source = source.with_fps(fps);
    }
    let session = Session::open(config, &source, Arc::new(detector))?;

    // --- 3. Main Processing Loop ---
    let mut stream = Box::pin(session.into_stream());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while let Some(event) = stream.next().await {
        serde_json::to_writer(&mut out, &event)?;
        writeln!(out)?;

        match event {
            SessionEvent::Frame(record) => {
                // --- 4. Optional Rendering ---
                if let Some(dir) = &args.render {
                    let mut frame = record.frame;
                    overlay::draw(&mut frame, &record.overlay);
                    if let Some(font) = &font {
                        overlay::draw_labels(&mut frame, &record.overlay, font);
                    }
                    let path = dir.join(format!("frame_{:06}.png", record.frame_index));
                    frame.save(&path).with_context(|| format!("writing {}", path.display()))?;
                }
            }
            SessionEvent::Error(error) => {
                out.flush()?;
                bail!("session aborted at frame {}: {}", error.frame_index, error.message);
            }
        }
    }
    out.flush()?;
    Ok(())
}
