pub mod drain;
pub mod read;
pub mod run;
pub mod status;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use sensorcast_core::{Config, HttpDelivery};

/// Load the configuration or exit with an error.
pub fn load_config(path: &Path) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

/// Build the HTTP delivery client or exit with an error.
pub fn make_delivery(config: &Config) -> HttpDelivery {
    match HttpDelivery::from_config(config) {
        Ok(delivery) => delivery,
        Err(e) => {
            eprintln!("Error creating HTTP client: {e}");
            std::process::exit(1);
        }
    }
}

/// Device keys that must never be sent to the server.
///
/// A key shared by a live sensor is not local-only: its cache is drained.
pub fn local_only_keys(config: &Config) -> HashSet<&str> {
    let live: HashSet<&str> = config
        .sensors
        .iter()
        .filter(|s| !s.local_only)
        .map(|s| s.authkey.as_str())
        .collect();
    config
        .sensors
        .iter()
        .filter(|s| s.local_only && !live.contains(s.authkey.as_str()))
        .map(|s| s.authkey.as_str())
        .collect()
}

/// Parse a duration string like "5m", "30s", "1h", "100ms".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        // Assume seconds
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    if value == 0 {
        return Err(format!("duration '{s}' must be greater than zero"));
    }
    let millis = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("invalid duration '{s}'"))?;
    Ok(Duration::from_millis(millis))
}
