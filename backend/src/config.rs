use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend_url: Url,
    pub request_timeout: Duration,
    pub bind_host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub cors_allow_origins: Vec<String>,
    pub labels_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = get("ML_BACKEND_URL").ok_or(ConfigError::Missing("ML_BACKEND_URL"))?;
        let backend_url = Url::parse(backend_url.trim()).map_err(|e| ConfigError::Invalid {
            name: "ML_BACKEND_URL",
            reason: e.to_string(),
        })?;
        if !matches!(backend_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                name: "ML_BACKEND_URL",
                reason: format!("unsupported scheme '{}'", backend_url.scheme()),
            });
        }

        let timeout_ms = parse_or(get("ML_TIMEOUT_MS"), "ML_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "ML_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let max_upload_bytes = parse_or(
            get("MAX_UPLOAD_BYTES"),
            "MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;

        let cors_allow_origins = get("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            backend_url,
            request_timeout: Duration::from_millis(timeout_ms),
            bind_host: get("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            max_upload_bytes,
            cors_allow_origins,
            labels_path: get("LABELS_PATH").map(PathBuf::from),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

fn parse_or<T>(value: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
