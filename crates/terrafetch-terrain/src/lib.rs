//! # terrafetch-terrain
//!
//! Terrain and hydrologic derivatives of elevation rasters retrieved with
//! `terrafetch-dem`, plus summary statistics.
//!
//! ## Features
//!
//! - **Surface derivatives**: slope (degrees, percent or m/m), aspect and
//!   hillshade from a Horn 3x3 kernel
//! - **Hydrology** (`hydrology` feature, on by default): priority-flood
//!   depression filling, D8 flow direction and flow accumulation
//! - **Statistics**: min/max/mean/count, for the whole raster or per zone
//!
//! Every derivative keeps the grid of its source. Missing data is never an
//! error: it propagates as nodata.
//!
//! ## Example
//!
//! ```
//! use ndarray::Array2;
//! use terrafetch_dem::{Crs, GeoTransform, Raster};
//! use terrafetch_terrain::{elevation_stats, hillshade, slope_aspect};
//!
//! let dem = Raster::new(
//!     Array2::from_shape_fn((4, 4), |(r, c)| (r + c) as f32),
//!     GeoTransform { origin_x: 0.0, origin_y: 40.0, pixel_width: 10.0, pixel_height: 10.0 },
//!     Crs::WEB_MERCATOR,
//!     -9999.0,
//! );
//! let (slope, aspect) = slope_aspect(&dem);
//! let shade = hillshade(&dem, 315.0, 45.0);
//! let summary = elevation_stats(slope.raster(), None)?;
//! assert_eq!(summary[0].count, 4);
//! # let _ = (aspect, shade);
//! # Ok::<(), terrafetch_terrain::TerrainError>(())
//! ```

mod derived;
mod error;
mod hydro;
mod stats;
mod surface;

pub use derived::{DerivedRaster, Product, SlopeUnits};
pub use error::TerrainError;
pub use hydro::{
    fill_depressions, flow_accumulation, flow_direction, Outlets, D8_EAST, D8_NORTH, D8_NORTH_EAST,
    D8_NORTH_WEST, D8_SOUTH, D8_SOUTH_EAST, D8_SOUTH_WEST, D8_UNRESOLVED, D8_WEST,
};
pub use stats::{elevation_stats, ElevationSummary};
pub use surface::{aspect, hillshade, slope, slope_aspect, slope_to_meters_per_meter, FLAT_ASPECT};

/// Result type for terrain operations.
pub type Result<T> = std::result::Result<T, TerrainError>;
