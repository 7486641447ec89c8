//! Daemon configuration, read once from the environment

use crate::logging::LogFormat;
use std::time::Duration;
use trainwatch_core::domain::WatchGranularity;
use trainwatch_core::error::{AppError, Result};
use trainwatch_infra_http::{GCS_BASE_URL, REPLICATE_BASE_URL};

const DEFAULT_DB_PATH: &str = "~/.trainwatch/trainwatch.db";
const DEFAULT_RPC_PORT: u16 = 9630;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: String,
    pub owner: String,
    pub trainer_version: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    pub access_token: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc_port: u16,
    pub poll_interval: Duration,
    pub granularity: WatchGranularity,
    pub log_format: LogFormat,
    pub replicate: ReplicateConfig,
    pub gcs: GcsConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Config(format!("{} must be set", key)))
        };

        let db_path = lookup("TRAINWATCH_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = shellexpand::tilde(&db_path).into_owned();

        let rpc_port = match lookup("TRAINWATCH_RPC_PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("invalid TRAINWATCH_RPC_PORT: {}", v)))?,
            None => DEFAULT_RPC_PORT,
        };

        let poll_secs: u64 = match lookup("TRAINWATCH_POLL_INTERVAL_SECS") {
            Some(v) => v.parse().map_err(|_| {
                AppError::Config(format!("invalid TRAINWATCH_POLL_INTERVAL_SECS: {}", v))
            })?,
            None => DEFAULT_POLL_INTERVAL_SECS,
        };
        if poll_secs == 0 {
            return Err(AppError::Config(
                "TRAINWATCH_POLL_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        let granularity = match lookup("TRAINWATCH_WATCH_GRANULARITY") {
            Some(v) => v
                .parse::<WatchGranularity>()
                .map_err(|e| AppError::Config(e.to_string()))?,
            None => WatchGranularity::default(),
        };

        Ok(Self {
            db_path,
            rpc_port,
            poll_interval: Duration::from_secs(poll_secs),
            granularity,
            log_format: LogFormat::parse(lookup("TRAINWATCH_LOG_FORMAT").as_deref()),
            replicate: ReplicateConfig {
                api_token: required("REPLICATE_API_TOKEN")?,
                owner: required("REPLICATE_OWNER")?,
                trainer_version: required("REPLICATE_TRAINER_VERSION")?,
                base_url: lookup("REPLICATE_BASE_URL")
                    .unwrap_or_else(|| REPLICATE_BASE_URL.to_string()),
            },
            gcs: GcsConfig {
                bucket: required("GCS_BUCKET")?,
                access_token: required("GCS_ACCESS_TOKEN")?,
                base_url: lookup("GCS_BASE_URL").unwrap_or_else(|| GCS_BASE_URL.to_string()),
            },
        })
    }
}
