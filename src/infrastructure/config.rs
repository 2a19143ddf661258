// Runtime configuration: optional TOML file plus environment overrides
use crate::domain::frame::IntegrityPolicy;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggerConfig {
    #[serde(default)]
    pub listener: ListenerSettings,
    #[serde(default)]
    pub decoder: DecoderSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenerSettings {
    #[serde(default = "default_address")]
    pub address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Silence longer than this closes the day.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Echo every datagram as hex at info level.
    #[serde(default)]
    pub verbose: bool,
}

impl ListenerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            idle_timeout: default_idle_timeout(),
            verbose: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct DecoderSettings {
    #[serde(default)]
    pub checksum_policy: IntegrityPolicy,
    #[serde(default)]
    pub marker_policy: IntegrityPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
    /// Wait before the first write retry, doubled for each further retry.
    #[serde(default = "default_write_retry_delay", with = "humantime_serde")]
    pub write_retry_delay: Duration,
    /// Close days without readings without writing a file.
    #[serde(default)]
    pub skip_empty_days: bool,
    /// Directory for the raw hex journal; disabled when unset.
    #[serde(default)]
    pub raw_log_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            write_attempts: default_write_attempts(),
            write_retry_delay: default_write_retry_delay(),
            skip_empty_days: false,
            raw_log_dir: None,
        }
    }
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    5432
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_write_attempts() -> u32 {
    3
}

fn default_write_retry_delay() -> Duration {
    Duration::from_secs(5)
}

/// Load `config/logger.*` (optional) with `SOLIS_` environment overrides,
/// e.g. `SOLIS_LISTENER__PORT=5433`.
pub fn load_logger_config() -> anyhow::Result<LoggerConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/logger").required(false))
        .add_source(
            config::Environment::with_prefix("SOLIS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
