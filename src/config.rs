use clap::Parser;
use tokio::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

const PORT: u16 = 6379;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "minidis", version, about)]
pub struct Config {
    /// The address to listen on
    #[arg(long, env = "MINIDIS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, env = "MINIDIS_PORT", default_value_t = PORT)]
    pub port: u16,

    /// Largest number of bytes buffered for a single incomplete request before the connection is
    /// dropped
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Milliseconds between background purges of expired keys, 0 disables the sweeper
    #[arg(long, env = "MINIDIS_SWEEP_INTERVAL_MS", default_value_t = 100)]
    pub sweep_interval_ms: u64,

    /// Maximum level of the emitted logs
    #[arg(long, env = "MINIDIS_LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,
}

impl Config {
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.sweep_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            sweep_interval_ms: 100,
            log_level: tracing::Level::INFO,
        }
    }
}
