use std::time::Duration;

use clap::Parser;

/// Stream seismometer data over SeedLink, estimate per-channel Modified
/// Mercalli Intensity, and publish intensity messages to an SQS queue.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Settings {
    /// Make noise
    #[arg(long)]
    pub verbose: bool,

    /// Don't actually send the messages
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Streams config file, retained for compatibility and ignored
    #[arg(long, default_value = "impact.json", hide = true)]
    pub config: String,

    /// FDSN station service host providing the channel catalog
    #[arg(long, default_value = "localhost:8080")]
    pub fdsn: String,

    /// How often to reload the channel catalog
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1h")]
    pub reload: Duration,

    /// AWS region
    #[arg(long, env = "AWS_IMPACT_REGION")]
    pub region: Option<String>,

    /// SQS queue receiving intensity messages
    #[arg(long, env = "AWS_IMPACT_QUEUE")]
    pub queue: Option<String>,

    /// AWS access key id, overrides env and credentials file
    #[arg(long, default_value = "")]
    pub key: String,

    /// AWS secret key, overrides env and credentials file
    #[arg(long, default_value = "")]
    pub secret: String,

    /// SeedLink network reconnect delay in seconds
    #[arg(long, default_value_t = 0)]
    pub netdly: u64,

    /// SeedLink network timeout in seconds
    #[arg(long, default_value_t = 300)]
    pub netto: u64,

    /// SeedLink keep-alive interval in seconds, 0 to disable
    #[arg(long, default_value_t = 0)]
    pub keepalive: u64,

    /// Default channel selectors
    #[arg(long, default_value = "???")]
    pub selectors: String,

    /// Streams to subscribe, e.g. "NZ_WEL:HHZ,IU_ANMO" or "*_*"
    #[arg(long, default_value = "*_*")]
    pub streams: String,

    /// How often to send unchanged heartbeat messages, 0 to disable
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5m")]
    pub flush: Duration,

    /// Noise probation window
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10m")]
    pub probation: Duration,

    /// Noise threshold level
    #[arg(long, default_value_t = 2)]
    pub level: i32,

    /// How many times to try and send a message
    #[arg(long, default_value_t = 6)]
    pub resends: u32,

    /// How long to wait between message resends
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    pub wait: Duration,

    /// SeedLink server address
    #[arg(default_value = "localhost:18000")]
    pub server: String,
}
