//! Service configuration.

use crate::{DemError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// USGS 3DEP elevation ImageServer export endpoint.
pub const DEFAULT_ENDPOINT: &str =
    "https://elevation.nationalmap.gov/arcgis/rest/services/3DEPElevation/ImageServer/exportImage";

/// Default nodata sentinel written into mosaics.
pub const DEFAULT_NODATA: f32 = -9999.0;

/// Configuration for planning and fetching tiles from a coverage service.
///
/// Passed explicitly to [`GridPlanner`](crate::GridPlanner) and
/// [`TileFetcher`](crate::TileFetcher).
///
/// # Example
///
/// ```
/// use terrafetch_dem::ServiceConfig;
///
/// let config = ServiceConfig::from_yaml_str("max_pixels_per_request: 1000000\nworkers: 8\n")?;
/// assert_eq!(config.workers, 8);
/// assert_eq!(config.max_retries, 3);
/// # Ok::<(), terrafetch_dem::DemError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Coverage service endpoint.
    pub endpoint: String,
    /// Largest pixel count the service accepts in one request.
    pub max_pixels_per_request: usize,
    /// Absolute ceiling on the pixel count of a planned grid.
    pub max_grid_pixels: usize,
    /// Number of concurrent tile fetches.
    pub workers: usize,
    /// Retries per tile after the first attempt (transient failures only).
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_backoff_ms: u64,
    /// Timeout for one HTTP request.
    pub attempt_timeout_secs: u64,
    /// Wall-clock budget across all fetches and retries of one request.
    pub request_timeout_secs: u64,
    /// Nodata sentinel for assembled rasters.
    pub nodata: f32,
    /// User agent sent with requests.
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_pixels_per_request: 8_000_000,
            max_grid_pixels: 400_000_000,
            workers: 4,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            attempt_timeout_secs: 120,
            request_timeout_secs: 900,
            nodata: DEFAULT_NODATA,
            user_agent: concat!("terrafetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ServiceConfig {
    /// Parse a configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(DemError::Config("endpoint must not be empty".to_string()));
        }
        if self.max_pixels_per_request == 0 {
            return Err(DemError::Config("max_pixels_per_request must be > 0".to_string()));
        }
        if self.max_grid_pixels == 0 {
            return Err(DemError::Config("max_grid_pixels must be > 0".to_string()));
        }
        if self.workers == 0 {
            return Err(DemError::Config("workers must be > 0".to_string()));
        }
        if self.nodata.is_nan() {
            return Err(DemError::Config("nodata must be a number".to_string()));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (0-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Timeout for one request.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Overall request budget.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ServiceConfig::default().validate().unwrap();
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ServiceConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            ..Default::default()
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(800));
        assert_eq!(config.backoff(4), Duration::from_millis(1000));
        assert_eq!(config.backoff(80), Duration::from_millis(1000));
    }

    #[test]
    fn test_yaml_rejects_invalid() {
        assert!(ServiceConfig::from_yaml_str("workers: 0").is_err());
        assert!(ServiceConfig::from_yaml_str("no_such_field: 1").is_err());
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.yaml");
        std::fs::write(&path, "endpoint: http://localhost:9000/export\nmax_retries: 0\n").unwrap();
        let config = ServiceConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.endpoint, "http://localhost:9000/export");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.workers, 4);
    }
}
