use std::env;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_KLING_BASE_URL: &str = "https://api-singapore.klingai.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(String),
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,

    pub openai_api_key: String,
    pub openai_base_url: String,
    pub kling_access_key: String,
    pub kling_secret_key: String,
    pub kling_base_url: String,

    // Job engine tuning
    pub video_poll_interval_secs: u64,
    pub video_max_poll_attempts: u32,
    pub max_concurrent_jobs: usize,
    pub recover_jobs_on_startup: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed("PORT", 8080)?,
            cors_origins: parse_cors_origins(
                &env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            ),
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            kling_access_key: required("KLING_ACCESS_KEY")?,
            kling_secret_key: required("KLING_SECRET_KEY")?,
            kling_base_url: env::var("KLING_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_KLING_BASE_URL.to_string()),
            video_poll_interval_secs: parsed("VIDEO_POLL_INTERVAL_SECS", 10)?,
            video_max_poll_attempts: parsed("VIDEO_MAX_POLL_ATTEMPTS", 30)?,
            max_concurrent_jobs: parsed("MAX_CONCURRENT_JOBS", 8)?,
            recover_jobs_on_startup: parsed("RECOVER_JOBS_ON_STARTUP", true)?,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

fn parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Accepts either a JSON array (`["http://a","http://b"]`) or a comma-separated list
pub fn parse_cors_origins(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        if let Ok(origins) = serde_json::from_str::<Vec<String>>(raw) {
            return origins;
        }
    }

    raw.split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .map(|origin| origin.to_string())
        .collect()
}
