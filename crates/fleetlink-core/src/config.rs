//! Bridge configuration
//!
//! Configuration is read from environment variables, matching the deployment
//! style of the proxy (containers with env-injected settings). Invalid values
//! fall back to their defaults with a logged error rather than aborting.

use std::path::PathBuf;
use tracing::{debug, error, info};

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDRESS: &str = ":8080";

/// Default BLE scan window in seconds
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 5;

/// Default `Cache-Control: max-age` hint in seconds (0 disables caching
/// headers entirely)
pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 5;

/// Default in-memory TTL for vehicle-data endpoints in seconds
pub const DEFAULT_VEHICLE_DATA_CACHE_SECS: u64 = 30;

/// Default key directory
pub const DEFAULT_KEY_DIRECTORY: &str = "key";

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (`debug` or `info`)
    pub log_level: String,
    /// HTTP listen address (`:8080` or `host:port`)
    pub http_listen_address: String,
    /// Seconds to scan for the vehicle beacon; 0 leaves the scan unbounded
    /// (it is still cut off by the per-attempt connection deadline)
    pub scan_timeout: u64,
    /// Seconds for the HTTP `Cache-Control: max-age` hint on proxy reads
    pub cache_max_age: u64,
    /// Seconds each `(VIN, endpoint)` vehicle-data payload stays fresh
    pub vehicle_data_cache_time: u64,
    /// Directory holding the role-based key files
    pub key_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            http_listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT_SECS,
            cache_max_age: DEFAULT_CACHE_MAX_AGE_SECS,
            vehicle_data_cache_time: DEFAULT_VEHICLE_DATA_CACHE_SECS,
            key_directory: PathBuf::from(DEFAULT_KEY_DIRECTORY),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Recognised variables: `logLevel`, `httpListenAddress`, `scanTimeout`,
    /// `cacheMaxAge`, `vehicleDataCacheTime`, `keyDirectory`.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let log_level = match std::env::var("logLevel") {
            Ok(v) if !v.is_empty() => v,
            _ => defaults.log_level,
        };

        let http_listen_address = match std::env::var("httpListenAddress") {
            Ok(v) if !v.is_empty() => v,
            _ => defaults.http_listen_address,
        };
        info!(httpListenAddress = %http_listen_address, "env");

        let scan_timeout = parse_seconds(
            "scanTimeout",
            std::env::var("scanTimeout").ok(),
            defaults.scan_timeout,
        );
        info!(scanTimeout = scan_timeout, "env");

        let cache_max_age = parse_seconds(
            "cacheMaxAge",
            std::env::var("cacheMaxAge").ok(),
            defaults.cache_max_age,
        );
        info!(cacheMaxAge = cache_max_age, "env");

        let vehicle_data_cache_time = parse_seconds(
            "vehicleDataCacheTime",
            std::env::var("vehicleDataCacheTime").ok(),
            defaults.vehicle_data_cache_time,
        );
        info!(vehicleDataCacheTime = vehicle_data_cache_time, "env");

        let key_directory = match std::env::var("keyDirectory") {
            Ok(v) if !v.is_empty() => PathBuf::from(v),
            _ => defaults.key_directory,
        };
        debug!(keyDirectory = %key_directory.display(), "env");

        Config {
            log_level,
            http_listen_address,
            scan_timeout,
            cache_max_age,
            vehicle_data_cache_time,
            key_directory,
        }
    }

    /// Whether debug logging was requested
    pub fn debug_logging(&self) -> bool {
        self.log_level.eq_ignore_ascii_case("debug")
    }
}

/// Parse a seconds value, falling back to `default` on bad input.
fn parse_seconds(name: &str, raw: Option<String>, default: u64) -> u64 {
    match raw {
        None => default,
        Some(raw) if raw.is_empty() => default,
        Some(raw) => match raw.parse::<u64>() {
            Ok(v) => v,
            Err(err) => {
                error!(%name, value = %raw, %err, "invalid value, using default");
                default
            }
        },
    }
}
