//! Application configuration loaded from environment variables

use std::env;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Directory for generated thumbnails and previews
    pub artwork_path: String,

    /// ffprobe executable
    pub ffprobe_path: String,

    /// ffmpeg executable
    pub ffmpeg_path: String,

    /// fpcalc (chromaprint) executable
    pub fpcalc_path: String,

    /// Wall-clock limit for one ffmpeg invocation, in seconds
    pub encode_timeout_secs: u64,

    /// Watcher per-path quiescence window, in milliseconds
    pub watch_debounce_ms: u64,

    /// Similarity score at or above which a pair is flagged
    pub duplicate_threshold: f64,

    /// Allowed duration ratio deviation for duplicate comparison
    pub duration_tolerance: f64,

    /// Item-level workers for the fingerprint pass
    pub fingerprint_workers: usize,

    /// Item-level workers for thumbnail/preview passes
    pub artwork_workers: usize,

    /// Item-level workers for the metadata pass
    pub metadata_workers: usize,

    /// Enable the TVMaze metadata provider
    pub metadata_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        Ok(Self {
            database_url,
            artwork_path: env::var("ARTWORK_PATH").unwrap_or_else(|_| "./data/artwork".to_string()),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            fpcalc_path: env::var("FPCALC_PATH").unwrap_or_else(|_| "fpcalc".to_string()),
            encode_timeout_secs: env_parsed("ENCODE_TIMEOUT_SECS", 300)?,
            watch_debounce_ms: env_parsed("WATCH_DEBOUNCE_MS", 1000)?,
            duplicate_threshold: env_parsed("DUPLICATE_THRESHOLD", 0.90)?,
            duration_tolerance: env_parsed("DURATION_TOLERANCE", 0.05)?,
            fingerprint_workers: env_parsed("FINGERPRINT_WORKERS", 4)?,
            artwork_workers: env_parsed("ARTWORK_WORKERS", 2)?,
            metadata_workers: env_parsed("METADATA_WORKERS", 3)?,
            metadata_enabled: env_parsed("METADATA_ENABLED", true)?,
        })
    }
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(env_parsed("CURATOR_TEST_UNSET_VAR", 42u64).unwrap(), 42);
    }

    #[test]
    fn invalid_values_error_with_name() {
        env::set_var("CURATOR_TEST_BAD_VAR", "not-a-number");
        let err = env_parsed::<u64>("CURATOR_TEST_BAD_VAR", 1).unwrap_err();
        assert!(err.to_string().contains("CURATOR_TEST_BAD_VAR"));
        env::remove_var("CURATOR_TEST_BAD_VAR");
    }
}
