use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub reservation: ReservationConfig,
    pub jobs: JobsConfig,
    pub fanout: FanOutConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub seat_topic: String,
    pub notification_topic: String,
    pub group_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub hold_seconds: u64,
    pub max_seats_per_hold: usize,
    pub debounce_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    pub poll_interval_ms: u64,
    /// How long a claimed job stays invisible before another worker may take it.
    pub lease_seconds: u64,
    pub batch_size: usize,
    /// Period of the backstop that releases lapsed holds missed by expiry jobs.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_sweep_interval_seconds() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FanOutMode {
    /// Deltas reach viewers connected to this process only.
    Local,
    /// Deltas go through the seat topic and every node relays them.
    Kafka,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FanOutConfig {
    pub mode: FanOutMode,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_subscriber_buffer() -> usize { 64 }

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Hold/confirm requests per requester per minute. 0 disables the limit.
    pub booking_per_minute: i64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `BOXOFFICE__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("BOXOFFICE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
