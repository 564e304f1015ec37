//! Server runtime configuration.

use shared::framing::FrameConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: String,
    /// Directory scanned for `.stage` files at startup.
    pub stage_dir: PathBuf,
    /// Simulation ticks per second for every running room.
    pub tick_rate: u32,
    /// Delay between a room starting and its first simulation step.
    pub countdown: Duration,
    /// How long an unreferenced stage stays loaded before it is dropped.
    pub level_grace: Duration,
    /// Maximum number of concurrent connections.
    pub max_users: usize,
    pub frame: FrameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            stage_dir: PathBuf::from("stages"),
            tick_rate: 60,
            countdown: Duration::from_millis(3000),
            level_grace: Duration::from_secs(30),
            max_users: 64,
            frame: FrameConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tick_period() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_period().as_micros(), 16_666);
    }

    #[test]
    fn test_zero_tick_rate_is_clamped() {
        let config = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_period(), Duration::from_secs(1));
    }
}
