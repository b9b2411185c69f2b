//! Configuration layer: typed settings resolved from the environment (with
//! an optional file source layered underneath) and validated up front.

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_ADDR: &str = ":8080";
const DEFAULT_REGION: &str = "auto";
const DEFAULT_CACHE_CAPACITY: usize = 2048;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CACHE_STALE_TTL: Duration = Duration::from_secs(2 * 60);
const DEFAULT_MAX_OBJECT_SIZE: u64 = 16 * 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Command-line arguments for the Specchio binary.
#[derive(Debug, Parser)]
#[command(
    name = "specchio",
    version,
    about = "Caching read-through proxy for S3-compatible object storage"
)]
pub struct CliArgs {
    /// Optional path to a configuration file layered below the environment.
    #[arg(long = "config-file", env = "SPECCHIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,
}

/// Fully-resolved deployment settings after validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub origin: OriginSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity: NonZeroUsize,
    pub ttl: Duration,
    pub stale_ttl: Duration,
    pub max_object_size: u64,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Per-IP token refill rate; zero disables rate limiting. Burst equals
    /// the rate.
    pub rps: f64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("`{key}` must be provided")]
    Missing { key: &'static str },
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn missing(key: &'static str) -> Self {
        Self::Missing { key }
    }

    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings: optional file source, then the environment on top.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder();
    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }
    builder = builder.add_source(Environment::default());

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

/// Resolve configuration using the process CLI arguments.
pub fn load_with_cli() -> Result<Settings, LoadError> {
    let args = CliArgs::parse();
    load(&args)
}

/// Unvalidated settings as they arrive from the environment. Every value is
/// a string at this stage; parsing and range checks happen in `from_raw`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    auth_token: Option<String>,
    s3_endpoint: Option<String>,
    s3_bucket: Option<String>,
    s3_access_key: Option<String>,
    s3_secret_key: Option<String>,
    s3_region: Option<String>,
    server_addr: Option<String>,
    cache_capacity: Option<String>,
    cache_ttl: Option<String>,
    cache_stale_ttl: Option<String>,
    max_object_size: Option<String>,
    request_timeout: Option<String>,
    read_timeout: Option<String>,
    write_timeout: Option<String>,
    idle_timeout: Option<String>,
    rate_limit_rps: Option<String>,
    log_level: Option<String>,
    log_json: Option<String>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let auth = AuthSettings {
            token: require_string(raw.auth_token, "auth_token")?,
        };

        let origin = OriginSettings {
            endpoint: require_string(raw.s3_endpoint, "s3_endpoint")?,
            bucket: require_string(raw.s3_bucket, "s3_bucket")?,
            access_key: require_string(raw.s3_access_key, "s3_access_key")?,
            secret_key: require_string(raw.s3_secret_key, "s3_secret_key")?,
            region: optional_string(raw.s3_region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            request_timeout: positive_duration(
                parse_duration(raw.request_timeout, "request_timeout", DEFAULT_REQUEST_TIMEOUT)?,
                "request_timeout",
            )?,
        };

        let addr_value = optional_string(raw.server_addr).unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let server = ServerSettings {
            addr: parse_listen_addr(&addr_value)
                .map_err(|reason| LoadError::invalid("server_addr", reason))?,
            read_timeout: parse_duration(raw.read_timeout, "read_timeout", DEFAULT_READ_TIMEOUT)?,
            write_timeout: parse_duration(
                raw.write_timeout,
                "write_timeout",
                DEFAULT_WRITE_TIMEOUT,
            )?,
            idle_timeout: parse_duration(raw.idle_timeout, "idle_timeout", DEFAULT_IDLE_TIMEOUT)?,
        };

        let capacity_value = parse_number::<usize>(
            raw.cache_capacity,
            "cache_capacity",
            DEFAULT_CACHE_CAPACITY,
        )?;
        let cache = CacheSettings {
            capacity: NonZeroUsize::new(capacity_value)
                .ok_or_else(|| LoadError::invalid("cache_capacity", "must be greater than zero"))?,
            ttl: positive_duration(
                parse_duration(raw.cache_ttl, "cache_ttl", DEFAULT_CACHE_TTL)?,
                "cache_ttl",
            )?,
            stale_ttl: parse_duration(
                raw.cache_stale_ttl,
                "cache_stale_ttl",
                DEFAULT_CACHE_STALE_TTL,
            )?,
            max_object_size: {
                let size =
                    parse_number::<u64>(raw.max_object_size, "max_object_size", DEFAULT_MAX_OBJECT_SIZE)?;
                if size == 0 {
                    return Err(LoadError::invalid(
                        "max_object_size",
                        "must be greater than zero",
                    ));
                }
                size
            },
        };

        let rps = match optional_string(raw.rate_limit_rps) {
            None => 0.0,
            Some(value) => value
                .parse::<f64>()
                .map_err(|err| LoadError::invalid("rate_limit_rps", err.to_string()))?,
        };
        if !rps.is_finite() || rps < 0.0 {
            return Err(LoadError::invalid(
                "rate_limit_rps",
                "must be zero or positive",
            ));
        }

        let logging = build_logging_settings(raw.log_level, raw.log_json)?;

        Ok(Self {
            server,
            logging,
            origin,
            cache,
            auth,
            rate_limit: RateLimitSettings { rps },
        })
    }
}

fn build_logging_settings(
    level: Option<String>,
    json: Option<String>,
) -> Result<LoggingSettings, LoadError> {
    let level = match optional_string(level) {
        Some(value) => LevelFilter::from_str(&value)
            .map_err(|err| LoadError::invalid("log_level", format!("failed to parse: {err}")))?,
        None => LevelFilter::INFO,
    };

    let json = match optional_string(json) {
        None => true,
        Some(value) => value
            .parse::<bool>()
            .map_err(|err| LoadError::invalid("log_json", err.to_string()))?,
    };

    Ok(LoggingSettings {
        level,
        format: if json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
    })
}

fn require_string(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    optional_string(value).ok_or_else(|| LoadError::missing(key))
}

fn optional_string(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_duration(
    value: Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, LoadError> {
    match optional_string(value) {
        None => Ok(default),
        Some(value) => humantime::parse_duration(&value)
            .map_err(|err| LoadError::invalid(key, err.to_string())),
    }
}

fn positive_duration(value: Duration, key: &'static str) -> Result<Duration, LoadError> {
    if value.is_zero() {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn parse_number<T: FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, LoadError>
where
    T::Err: std::fmt::Display,
{
    match optional_string(value) {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|err| LoadError::invalid(key, err.to_string())),
    }
}

/// Accept both `host:port` and the bare `:port` shorthand, which binds all
/// interfaces.
fn parse_listen_addr(value: &str) -> Result<SocketAddr, String> {
    let candidate = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{value}`: {err}"))
}
