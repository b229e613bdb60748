//! CLI entry point: plays back a recorded route from disk, pacing events
//! to wall-clock time and republishing them.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use replay::bus::BusFilter;
use replay::camera::RingBufferTransport;
use replay::control::{Control, Flag, NullBusSink};
use replay::route::Route;

/// Deterministic playback of a recorded driving route.
#[derive(Parser, Debug)]
#[command(name = "replay", about = "Deterministic playback of a recorded driving route")]
struct Cli {
    /// Directory containing the route's `<name>--<segment>` subdirectories.
    route_dir: PathBuf,

    /// Segment index to start playback from.
    #[arg(long, default_value_t = 0)]
    start_segment: u32,

    /// Playback speed multiplier (1.0 = real time).
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Stream as fast as frames decode, ignoring event pacing entirely.
    #[arg(long)]
    full_speed: bool,

    /// Comma-separated bus socket allow-list. Overrides the `ALLOW`
    /// environment variable if given.
    #[arg(long)]
    allow: Option<String>,

    /// Comma-separated bus socket block-list. Overrides the `BLOCK`
    /// environment variable if given.
    #[arg(long)]
    block: Option<String>,
}

fn main() -> anyhow::Result<()> {
    replay::log::init();
    ffmpeg::init()?;

    let cli = Cli::parse();

    let route_name = cli
        .route_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "route".to_string());
    let route = Route::discover(&cli.route_dir, route_name)?;

    let bus_filter = if cli.allow.is_none() && cli.block.is_none() {
        BusFilter::from_env()
    } else {
        BusFilter::new(
            cli.allow.as_deref().map(split_list).unwrap_or_default(),
            cli.block.as_deref().map(split_list).unwrap_or_default(),
        )
    };

    let control = Control::new(
        route,
        cli.start_segment,
        bus_filter,
        Arc::new(NullBusSink),
        Arc::new(RingBufferTransport::new()),
    );
    control.set_speed(cli.speed);
    if cli.full_speed {
        control.set_flag(Flag::FullSpeed);
    }

    control.start();
    tracing::info!(route = %cli.route_dir.display(), start_segment = cli.start_segment, "replay started");

    println!("replay running; press enter to stop");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    control.stop();
    Ok(())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}
