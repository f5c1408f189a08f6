use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub booking: BookingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingConfig {
    /// Lock TTL and cancel-trigger delay. Both must come from this one value.
    #[serde(default = "default_hold_window")]
    pub hold_window_seconds: u64,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch_size: usize,
}

fn default_hold_window() -> u64 { 600 }
fn default_operation_timeout() -> u64 { 5_000 }
fn default_sweep_interval() -> u64 { 60 }
fn default_sweep_batch() -> usize { 100 }

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_window_seconds: default_hold_window(),
            operation_timeout_ms: default_operation_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            sweep_batch_size: default_sweep_batch(),
        }
    }
}

impl BookingConfig {
    pub fn hold_window(&self) -> Duration {
        Duration::from_secs(self.hold_window_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
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

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `SHOWSEAT_BOOKING__HOLD_WINDOW_SECONDS=300`
            .add_source(config::Environment::with_prefix("SHOWSEAT").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
