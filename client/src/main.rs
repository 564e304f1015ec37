use clap::Parser;
use client::network::{Client, ClientConfig};
use log::info;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Stage to play
    #[arg(long, default_value = "demo")]
    stage: String,

    /// Join this room instead of creating one
    #[arg(short = 'r', long)]
    room: Option<String>,

    /// Play back input from a recording
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Save the input sent to this file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Round-trip budget between input submissions, in milliseconds
    #[arg(short = 'b', long, default_value = "32")]
    budget_ms: u64,

    /// How long the room creator waits before starting, in milliseconds
    #[arg(long, default_value = "2000")]
    start_delay_ms: u64,

    /// Room and countdown poll interval, in milliseconds
    #[arg(long, default_value = "100")]
    poll_ms: u64,

    /// Ask for a restart when the run finishes
    #[arg(long)]
    restart_on_finish: bool,

    /// Disconnect after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Request a goal reset after this many frames
    #[arg(long)]
    goal_reset_at: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if let Some(path) = &args.replay {
        info!("Replaying input from {}", path.display());
    }

    let config = ClientConfig {
        server_addr: args.server,
        stage: args.stage,
        room: args.room,
        replay: args.replay,
        record: args.record,
        round_trip_budget: Duration::from_millis(args.budget_ms),
        start_delay: Duration::from_millis(args.start_delay_ms),
        poll_interval: Duration::from_millis(args.poll_ms),
        restart_on_finish: args.restart_on_finish,
        max_frames: args.max_frames,
        goal_reset_at: args.goal_reset_at,
        ..ClientConfig::default()
    };

    let summary = Client::new(config)?.run().await?;
    info!(
        "Session over: room {:?}, player {:?}, {} frames, finished: {}",
        summary.room.map(|room| room.to_string()),
        summary.player_index,
        summary.frames,
        summary.finished
    );

    Ok(())
}
