//! FleetLink node - HTTP-to-BLE bridge for Tesla vehicles
//!
//! This binary serves the Fleet-mirror HTTP surface and runs the BLE
//! session orchestrator. Configuration comes from the environment
//! (`logLevel`, `httpListenAddress`, `scanTimeout`, `cacheMaxAge`,
//! `vehicleDataCacheTime`, `keyDirectory`); a few flags override it.

mod server;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fleetlink_ble::{BleControl, KeyStore};
use fleetlink_core::vehicle::VehicleConnector;
use fleetlink_core::{Config, VehicleDataCache};
use server::AppState;

#[derive(Parser)]
#[command(name = "fleetlink")]
#[command(about = "HTTP-to-BLE bridge mirroring the Tesla Fleet API")]
#[command(version)]
struct Args {
    /// HTTP listen address (overrides httpListenAddress)
    #[arg(long)]
    listen: Option<String>,

    /// Key directory (overrides keyDirectory)
    #[arg(long)]
    key_dir: Option<String>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

/// The authenticated Tesla BLE transport is an external driver; embedders
/// wire their [`VehicleConnector`] implementation in here. Without one the
/// bridge still serves its HTTP surface and answers vehicle requests with
/// "BleControl is not initialized".
fn build_connector() -> Option<Arc<dyn VehicleConnector>> {
    None
}

fn scan_timeout(config: &Config) -> Option<Duration> {
    (config.scan_timeout > 0).then(|| Duration::from_secs(config.scan_timeout))
}

/// Accept Go-style `:8080` as well as full `host:port` addresses
fn normalize_listen_address(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(listen) = args.listen {
        config.http_listen_address = listen;
    }
    if let Some(key_dir) = args.key_dir {
        config.key_directory = key_dir.into();
    }

    let level = if args.verbose || config.debug_logging() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(version = fleetlink_core::VERSION, "FleetLink is loading");

    let keystore = KeyStore::new(&config.key_directory);
    if let Err(err) = keystore.migrate_legacy() {
        warn!(%err, "legacy key migration failed");
    }

    let ble = match build_connector() {
        Some(connector) => {
            match BleControl::setup(connector, &keystore, scan_timeout(&config)) {
                Ok((handle, _task)) => Some(handle),
                Err(err) => {
                    warn!(%err, "BleControl could not be initialized");
                    None
                }
            }
        }
        None => {
            warn!("no BLE driver wired in; vehicle requests will be rejected");
            None
        }
    };

    let state = Arc::new(AppState {
        ble,
        cache: VehicleDataCache::with_ttl(Duration::from_secs(config.vehicle_data_cache_time)),
        config: config.clone(),
    });
    let app = server::create_router(state);

    let addr = normalize_listen_address(&config.http_listen_address);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "FleetLink is running");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_listen_address() {
        assert_eq!(normalize_listen_address(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen_address("127.0.0.1:9090"), "127.0.0.1:9090");
    }

    #[test]
    fn test_scan_timeout_zero_means_unbounded() {
        let mut config = Config::default();
        config.scan_timeout = 0;
        assert!(scan_timeout(&config).is_none());
        config.scan_timeout = 2;
        assert_eq!(scan_timeout(&config), Some(Duration::from_secs(2)));
    }
}
