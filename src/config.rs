//! Configuration management

use anyhow::{Context, Result};

use crate::services::delay::DelayThresholds;
use crate::services::matrix::GoogleMapsConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL (message boundary, topics, JetStream KV state)
    pub nats_url: String,

    /// Google Maps API key; estimates are used when absent
    pub google_maps_api_key: Option<String>,

    /// Distance Matrix endpoint override (tests)
    pub google_maps_base_url: Option<String>,

    /// Matrix fetch timeout in seconds
    pub matrix_fetch_timeout_seconds: u64,

    /// Matrix cache TTL in seconds
    pub matrix_cache_ttl_seconds: u64,

    /// Solver wall-clock limit in seconds
    pub solver_time_limit_seconds: u32,

    /// Stops accepted per optimization request
    pub max_stops_per_request: usize,

    /// Minutes behind schedule before a reroute
    pub delay_threshold_minutes: i64,

    /// Remaining/baseline duration ratio before a reroute
    pub traffic_increase_ratio: f64,

    /// Quiet period between traffic-triggered reroutes, seconds
    pub min_reroute_interval_seconds: i64,

    /// Driver session TTL in seconds
    pub session_ttl_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let google_maps_api_key = std::env::var("GOOGLE_MAPS_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());
        let google_maps_base_url = std::env::var("GOOGLE_MAPS_BASE_URL").ok();

        Ok(Self {
            nats_url,
            google_maps_api_key,
            google_maps_base_url,
            matrix_fetch_timeout_seconds: parse_env("MATRIX_FETCH_TIMEOUT_SECONDS", 8)?,
            matrix_cache_ttl_seconds: parse_env("MATRIX_CACHE_TTL_SECONDS", 1800)?,
            solver_time_limit_seconds: parse_env("SOLVER_TIME_LIMIT_SECONDS", 10)?,
            max_stops_per_request: parse_env("MAX_STOPS_PER_REQUEST", 25)?,
            delay_threshold_minutes: parse_env("DELAY_THRESHOLD_MINUTES", 5)?,
            traffic_increase_ratio: parse_env("TRAFFIC_INCREASE_RATIO", 1.20)?,
            min_reroute_interval_seconds: parse_env("MIN_REROUTE_INTERVAL_SECONDS", 300)?,
            session_ttl_seconds: parse_env("SESSION_TTL_SECONDS", 43_200)?,
        })
    }

    /// Google client configuration, absent without a key
    pub fn google_config(&self) -> Option<GoogleMapsConfig> {
        let api_key = self.google_maps_api_key.clone()?;
        let mut config = GoogleMapsConfig::new(api_key);
        config.timeout_seconds = self.matrix_fetch_timeout_seconds;
        if let Some(base_url) = &self.google_maps_base_url {
            config.base_url = base_url.clone();
        }
        Some(config)
    }

    pub fn delay_thresholds(&self) -> DelayThresholds {
        DelayThresholds {
            delay_threshold_minutes: self.delay_threshold_minutes,
            traffic_increase_ratio: self.traffic_increase_ratio,
            min_reroute_interval_secs: self.min_reroute_interval_seconds,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", name, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialise the tests that touch them
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults_without_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("MATRIX_CACHE_TTL_SECONDS");
        std::env::remove_var("SOLVER_TIME_LIMIT_SECONDS");
        std::env::remove_var("GOOGLE_MAPS_API_KEY");

        let config = Config::from_env().unwrap();
        assert_eq!(config.matrix_cache_ttl_seconds, 1800);
        assert_eq!(config.solver_time_limit_seconds, 10);
        assert_eq!(config.max_stops_per_request, 25);
        assert_eq!(config.session_ttl_seconds, 43_200);
        assert!((config.traffic_increase_ratio - 1.20).abs() < f64::EPSILON);
    }

    #[test]
    fn test_google_config_requires_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("GOOGLE_MAPS_API_KEY");
        let config = Config::from_env().unwrap();
        assert!(config.google_config().is_none());
    }

    #[test]
    fn test_env_overrides_apply() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("DELAY_THRESHOLD_MINUTES", "9");
        std::env::set_var("MIN_REROUTE_INTERVAL_SECONDS", "120");

        let config = Config::from_env().unwrap();
        let thresholds = config.delay_thresholds();
        assert_eq!(thresholds.delay_threshold_minutes, 9);
        assert_eq!(thresholds.min_reroute_interval_secs, 120);

        std::env::remove_var("DELAY_THRESHOLD_MINUTES");
        std::env::remove_var("MIN_REROUTE_INTERVAL_SECONDS");
    }

    #[test]
    fn test_invalid_numeric_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SESSION_TTL_SECONDS", "not-a-number");
        assert!(Config::from_env().is_err());
        std::env::remove_var("SESSION_TTL_SECONDS");
    }
}
