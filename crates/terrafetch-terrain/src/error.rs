//! Error types for terrain derivation and statistics.

use crate::derived::Product;
use terrafetch_dem::DemError;
use thiserror::Error;

/// Errors that can occur when deriving terrain products or summarising elevation.
#[derive(Debug, Error)]
pub enum TerrainError {
    /// The raster (or a zone of it) holds only nodata.
    #[error("No valid elevation data{}", .zone.map(|z| format!(" in zone {}", z)).unwrap_or_default())]
    NoValidData {
        /// Index of the zone, `None` for the whole raster.
        zone: Option<usize>,
    },

    /// The flow-routing subsystem is not compiled in.
    #[error("Derivative unavailable: {0}")]
    DerivativeUnavailable(String),

    /// A raster was passed where a different product was expected.
    #[error("Expected a {expected} raster, found {found}")]
    UnexpectedProduct {
        /// The product the operation needs.
        expected: &'static str,
        /// The product it was given.
        found: Product,
    },

    /// Two rasters do not share a grid.
    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    /// Error from the DEM layer (CRS transforms, invalid zone geometry).
    #[error(transparent)]
    Dem(#[from] DemError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_valid_data_message() {
        assert_eq!(
            TerrainError::NoValidData { zone: None }.to_string(),
            "No valid elevation data"
        );
        assert_eq!(
            TerrainError::NoValidData { zone: Some(2) }.to_string(),
            "No valid elevation data in zone 2"
        );
    }
}
