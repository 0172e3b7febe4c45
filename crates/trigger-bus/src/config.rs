//! Bus configuration and loader
//!
//! The only runtime-tunable parameter of the bus is payload precision.
//! Configuration is stored as YAML, e.g.
//!
//! ```yaml
//! decimal_places: 3
//! ```

use crate::normalize::{DEFAULT_DECIMAL_PLACES, MAX_DECIMAL_PLACES};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration consumed when a bus is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Decimal places payload values are rounded to (default 2)
    ///
    /// Coarser precision lets more repeated events coalesce, at the cost of
    /// control resolution.
    pub decimal_places: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            decimal_places: DEFAULT_DECIMAL_PLACES,
        }
    }
}

impl BusConfig {
    pub fn with_decimal_places(decimal_places: u32) -> Self {
        Self { decimal_places }
    }

    /// Precision actually used, clamped to what an `f64` can represent
    pub fn effective_decimal_places(&self) -> u32 {
        if self.decimal_places > MAX_DECIMAL_PLACES {
            log::warn!(
                "BusConfig: decimal_places {} exceeds {}, clamping",
                self.decimal_places,
                MAX_DECIMAL_PLACES
            );
            MAX_DECIMAL_PLACES
        } else {
            self.decimal_places
        }
    }
}

/// Read and parse a bus config file
pub fn read_bus_config(path: &Path) -> anyhow::Result<BusConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading bus config {:?}", path))?;
    let config = serde_yaml::from_str::<BusConfig>(&contents)
        .with_context(|| format!("parsing bus config {:?}", path))?;
    Ok(config)
}

/// Load bus configuration from a YAML file
///
/// If the file doesn't exist, returns the default config.
/// If the file exists but is invalid, logs a warning and returns the default.
pub fn load_bus_config(path: &Path) -> BusConfig {
    log::info!("load_bus_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_bus_config: Config file doesn't exist, using defaults");
        return BusConfig::default();
    }

    match read_bus_config(path) {
        Ok(config) => {
            log::info!(
                "load_bus_config: decimal_places = {}",
                config.decimal_places
            );
            config
        }
        Err(e) => {
            log::warn!("load_bus_config: {:#}", e);
            BusConfig::default()
        }
    }
}
