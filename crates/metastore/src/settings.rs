use std::path::PathBuf;
use std::time::Duration;

use raster::Resampling;

use crate::{Error, Result};

pub const ENV_RASTER_CACHE_SIZE: &str = "TC_RASTER_CACHE_SIZE";
pub const ENV_REMOTE_DB_CACHE_DIR: &str = "TC_REMOTE_DB_CACHE_DIR";
pub const ENV_REMOTE_DB_CACHE_TTL: &str = "TC_REMOTE_DB_CACHE_TTL";
pub const ENV_RESAMPLING_METHOD: &str = "TC_RESAMPLING_METHOD";
pub const ENV_LARGE_RASTER_THRESHOLD: &str = "TC_LARGE_RASTER_THRESHOLD";

/// Immutable configuration snapshot consumed by the drivers and the tile
/// engine. Construct once at startup, clone freely.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Tile cache budget in bytes.
    pub raster_cache_size: usize,
    /// Directory holding local copies of remote metadata databases.
    pub remote_db_cache_dir: PathBuf,
    /// How long a remote freshness check stays valid.
    pub remote_db_cache_ttl: Duration,
    /// Resampling used for warped tile reads.
    pub resampling_method: Resampling,
    /// Pixel count above which metadata is computed in chunks.
    pub large_raster_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            raster_cache_size: 512 * 1024 * 1024,
            remote_db_cache_dir: std::env::temp_dir().join("rastile-remote-db"),
            remote_db_cache_ttl: Duration::from_secs(10),
            resampling_method: Resampling::Nearest,
            large_raster_threshold: 10980 * 10980,
        }
    }
}

impl Settings {
    /// Settings from the `TC_*` environment variables, falling back to the
    /// defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(value) = env_var(ENV_RASTER_CACHE_SIZE) {
            settings.raster_cache_size = parse_env(ENV_RASTER_CACHE_SIZE, &value)?;
            if settings.raster_cache_size == 0 {
                return Err(Error::ConfigError(format!("{} must be positive", ENV_RASTER_CACHE_SIZE)));
            }
        }

        if let Some(value) = env_var(ENV_REMOTE_DB_CACHE_DIR) {
            settings.remote_db_cache_dir = PathBuf::from(value);
        }

        if let Some(value) = env_var(ENV_REMOTE_DB_CACHE_TTL) {
            let seconds: f64 = parse_env(ENV_REMOTE_DB_CACHE_TTL, &value)?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(Error::ConfigError(format!("{} must be non-negative", ENV_REMOTE_DB_CACHE_TTL)));
            }
            settings.remote_db_cache_ttl = Duration::from_secs_f64(seconds);
        }

        if let Some(value) = env_var(ENV_RESAMPLING_METHOD) {
            settings.resampling_method = value
                .parse::<Resampling>()
                .map_err(|e| Error::ConfigError(e.to_string()))?;
        }

        if let Some(value) = env_var(ENV_LARGE_RASTER_THRESHOLD) {
            settings.large_raster_threshold = parse_env(ENV_LARGE_RASTER_THRESHOLD, &value)?;
        }

        Ok(settings)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::ConfigError(format!("Invalid value for {}: '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.resampling_method, Resampling::Nearest);
        assert_eq!(settings.large_raster_threshold, 10980 * 10980);
        assert!(settings.raster_cache_size > 0);
    }

    #[test]
    fn from_env_overrides() -> Result {
        unsafe {
            std::env::set_var(ENV_RASTER_CACHE_SIZE, "1024");
            std::env::set_var(ENV_RESAMPLING_METHOD, "linear");
            std::env::set_var(ENV_REMOTE_DB_CACHE_TTL, "2.5");
        }

        let settings = Settings::from_env()?;
        assert_eq!(settings.raster_cache_size, 1024);
        assert_eq!(settings.resampling_method, Resampling::Linear);
        assert_eq!(settings.remote_db_cache_ttl, Duration::from_secs_f64(2.5));

        unsafe {
            std::env::remove_var(ENV_RASTER_CACHE_SIZE);
            std::env::remove_var(ENV_RESAMPLING_METHOD);
            std::env::remove_var(ENV_REMOTE_DB_CACHE_TTL);
        }

        Ok(())
    }

    #[test]
    fn from_env_rejects_unknown_resampling() {
        unsafe { std::env::set_var(ENV_RESAMPLING_METHOD, "lanczos") };
        let result = Settings::from_env();
        unsafe { std::env::remove_var(ENV_RESAMPLING_METHOD) };
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
