use clap::Parser;
use log::{info, warn};
use server::config::ServerConfig;
use server::level_registry::FileStageSource;
use server::network::Server;
use shared::framing::FrameConfig;
use shared::stage::StageTemplate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Directory holding .stage files
    #[clap(short, long, default_value = "stages")]
    stages: PathBuf,
    /// Room tick rate (updates per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
    /// Countdown before a started room begins simulating, in milliseconds
    #[clap(long, default_value = "3000")]
    countdown_ms: u64,
    /// Seconds an unused stage stays loaded
    #[clap(long, default_value = "30")]
    level_grace_secs: u64,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "64")]
    max_users: usize,
    /// Maximum message payload in bytes
    #[clap(long, default_value = "1048576")]
    max_payload: u32,
    /// Write a demo stage with this name into the stage directory first
    #[clap(long)]
    write_demo: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        stage_dir: args.stages,
        tick_rate: args.tick_rate,
        countdown: Duration::from_millis(args.countdown_ms),
        level_grace: Duration::from_secs(args.level_grace_secs),
        max_users: args.max_users,
        frame: FrameConfig {
            max_payload_size: args.max_payload,
        },
    };

    let source = FileStageSource::new(&config.stage_dir);
    if let Some(name) = args.write_demo {
        let path = source.save(&StageTemplate::demo(&name))?;
        info!("Wrote demo stage to {}", path.display());
    }

    let server = Server::bind(config, Arc::new(source)).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
