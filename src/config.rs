//! Environment-driven configuration

use crate::propagator::Observer;

/// Runtime configuration, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite satellite store
    pub database_path: String,
    /// Base URL of the element-set catalog service
    pub catalog_base_url: String,
    /// Default observer location for visibility features, if configured
    pub default_observer: Option<Observer>,
    /// Emit JSON-formatted logs
    pub json_logs: bool,
}

const DEFAULT_CATALOG_URL: &str = "https://celestrak.org/NORAD/elements/gp.php";

impl Config {
    pub fn from_env() -> Self {
        let database_path =
            std::env::var("SATTRACK_DB").unwrap_or_else(|_| "satellites.db".to_string());

        let catalog_base_url =
            std::env::var("CATALOG_URL").unwrap_or_else(|_| DEFAULT_CATALOG_URL.to_string());

        let json_logs = std::env::var("JSON_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        // Out-of-range or unparseable coordinates leave the observer unset,
        // which disables visibility-dependent features rather than erroring.
        let default_observer = match (
            std::env::var("OBSERVER_LAT").ok().and_then(|v| v.parse::<f64>().ok()),
            std::env::var("OBSERVER_LON").ok().and_then(|v| v.parse::<f64>().ok()),
        ) {
            (Some(lat), Some(lon)) => Observer::new(lat, lon),
            _ => None,
        };

        Config {
            database_path,
            catalog_base_url,
            default_observer,
            json_logs,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: "satellites.db".to_string(),
            catalog_base_url: DEFAULT_CATALOG_URL.to_string(),
            default_observer: None,
            json_logs: false,
        }
    }
}
