//! Tap configuration, read from the JSON config file passed on the command line.
//!
//! ```json
//! {
//!   "secret_key": "YOUR_SECRET_KEY",
//!   "start_date": "2019-01-01T00:00:00Z",
//!   "user_agent": "tap-darksky <api_user_email@your_company.com>",
//!   "language": "en",
//!   "units": "us",
//!   "location_list": "38.840544,-105.0444233;40.7128,-74.0060"
//! }
//! ```

use crate::utils::parse_datetime;
use log::info;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

static LOCATION_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9,.;-]").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{0}'")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("start_date '{0}' is not a valid date or datetime")]
    InvalidStartDate(String),

    #[error("location_list does not contain any lat,lon pairs")]
    NoLocations,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub secret_key: String,
    /// Earliest date to sync when a location has no bookmark yet.
    pub start_date: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_units")]
    pub units: String,
    /// Semicolon-separated `lat,lon` pairs.
    pub location_list: String,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_units() -> String {
    "auto".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes =
            std::fs::read(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: Config = serde_json::from_slice(&bytes)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if parse_datetime(&self.start_date).is_none() {
            return Err(ConfigError::InvalidStartDate(self.start_date.clone()));
        }
        if self.locations().is_empty() {
            return Err(ConfigError::NoLocations);
        }
        Ok(())
    }

    pub fn locations(&self) -> Vec<String> {
        sanitize_locations(&self.location_list)
    }

    /// Logs the loaded configuration with the secret key masked.
    pub fn log_config(&self) {
        let chars: Vec<char> = self.secret_key.chars().collect();
        let masked_key = match chars.len() {
            0 => "<missing>".to_string(),
            n if n <= 4 => "****".to_string(),
            n => format!("****{}", chars[n - 4..].iter().collect::<String>()),
        };

        info!("Configuration loaded:");
        info!("  secret_key : {}", masked_key);
        info!("  start_date : {}", self.start_date);
        info!("  user_agent : {}", self.user_agent.as_deref().unwrap_or("-"));
        info!("  language   : {}", self.language);
        info!("  units      : {}", self.units);
        info!("  locations  : {}", self.locations().len());
    }
}

/// Splits a `lat,lon;lat,lon` list into location identifiers.
///
/// Everything except digits, `,`, `.`, `;` and `-` is dropped first, so whitespace,
/// newlines and stray text from a UI text area do not end up in request URLs.
///
/// ```
/// use darksky_tap::sanitize_locations;
///
/// assert_eq!(
///     sanitize_locations(" 38.8, -105.0 ;\n40.7,-74.0 "),
///     vec!["38.8,-105.0", "40.7,-74.0"]
/// );
/// ```
pub fn sanitize_locations(raw: &str) -> Vec<String> {
    LOCATION_NOISE
        .replace_all(raw, "")
        .split(';')
        .filter(|location| !location.is_empty())
        .map(str::to_string)
        .collect()
}
