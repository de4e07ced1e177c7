//! Error types for the DEM crate.

use std::fmt;
use thiserror::Error;

/// Errors that can occur when planning, fetching or assembling elevation data.
#[derive(Debug, Error)]
pub enum DemError {
    /// The query geometry is empty or its bounding box has zero area.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The resolution is non-positive or would produce an oversized grid.
    #[error("Invalid resolution: {0}")]
    Resolution(String),

    /// Every tile of a request failed; nothing usable came back from the service.
    #[error("Coverage service unavailable: all {failed} tiles failed (last error: {reason})")]
    ServiceUnavailable {
        /// Number of tiles that failed.
        failed: usize,
        /// The last failure recorded.
        reason: String,
    },

    /// Unsupported CRS or a failed coordinate transformation.
    #[error("CRS error: {0}")]
    Crs(String),

    /// Invalid service configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failed to parse a YAML configuration file.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The fetch worker pool could not be created.
    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Coordinate is outside the raster extent.
    #[error("Coordinate ({x}, {y}) is outside raster bounds ({min_x}-{max_x}, {min_y}-{max_y})")]
    OutOfBounds {
        /// Requested x coordinate.
        x: f64,
        /// Requested y coordinate.
        y: f64,
        /// Raster west edge.
        min_x: f64,
        /// Raster east edge.
        max_x: f64,
        /// Raster south edge.
        min_y: f64,
        /// Raster north edge.
        max_y: f64,
    },

    /// Two rasters or a raster and a grid do not line up.
    #[error("Grid mismatch: {0}")]
    GridMismatch(String),
}

/// A failure reported by the network-query collaborator for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The request did not complete in time.
    Timeout,
    /// The service answered with a non-success status.
    Http {
        /// HTTP status code.
        status: u16,
    },
    /// Connection-level failure (DNS, reset, TLS, ...).
    Transport(String),
    /// The service answered but the body is not a usable raster.
    Malformed(String),
}

impl FetchFailure {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::Timeout | FetchFailure::Transport(_) => true,
            FetchFailure::Http { status } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            FetchFailure::Malformed(_) => false,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Timeout => write!(f, "request timed out"),
            FetchFailure::Http { status } => write!(f, "HTTP {}", status),
            FetchFailure::Transport(msg) => write!(f, "transport error: {}", msg),
            FetchFailure::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

/// Why a tile ended up permanently failed.
#[derive(Debug, Clone, PartialEq)]
pub enum TileFailure {
    /// The service failed (after retries, if the failure was transient).
    Service(FetchFailure),
    /// The returned raster does not have the requested pixel dimensions.
    ShapeMismatch {
        /// Requested (columns, rows).
        expected: (usize, usize),
        /// Returned (columns, rows).
        actual: (usize, usize),
    },
    /// The returned raster is georeferenced away from the requested window.
    Misaligned {
        /// Requested (west, north) corner.
        expected: (f64, f64),
        /// Returned (west, north) corner.
        actual: (f64, f64),
    },
    /// The response could not be decoded as a raster.
    Decode(String),
    /// The overall request budget ran out before the tile completed.
    DeadlineExceeded,
    /// No result was produced for the tile.
    NotFetched,
}

impl fmt::Display for TileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileFailure::Service(failure) => write!(f, "{}", failure),
            TileFailure::ShapeMismatch { expected, actual } => write!(
                f,
                "shape mismatch: requested {}x{}, received {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            TileFailure::Misaligned { expected, actual } => write!(
                f,
                "misaligned tile: requested corner ({}, {}), received ({}, {})",
                expected.0, expected.1, actual.0, actual.1
            ),
            TileFailure::Decode(msg) => write!(f, "decode error: {}", msg),
            TileFailure::DeadlineExceeded => write!(f, "request deadline exceeded"),
            TileFailure::NotFetched => write!(f, "tile was never fetched"),
        }
    }
}

/// A permanently failed tile. Recorded in the mosaic's coverage summary, never raised.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Tile {tile} failed after {attempts} attempt(s): {reason}")]
pub struct TileFetchError {
    /// Index of the tile within its plan.
    pub tile: usize,
    /// Number of requests made for this tile.
    pub attempts: u32,
    /// Final failure reason.
    pub reason: TileFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchFailure::Timeout.is_transient());
        assert!(FetchFailure::Transport("reset".into()).is_transient());
        assert!(FetchFailure::Http { status: 503 }.is_transient());
        assert!(FetchFailure::Http { status: 429 }.is_transient());
        assert!(!FetchFailure::Http { status: 404 }.is_transient());
        assert!(!FetchFailure::Malformed("html".into()).is_transient());
    }

    #[test]
    fn test_tile_error_display() {
        let err = TileFetchError {
            tile: 3,
            attempts: 4,
            reason: TileFailure::Service(FetchFailure::Http { status: 502 }),
        };
        assert_eq!(err.to_string(), "Tile 3 failed after 4 attempt(s): HTTP 502");
    }
}
