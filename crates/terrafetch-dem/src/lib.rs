//! # terrafetch-dem
//!
//! Tiled retrieval of gridded elevation data from coverage services that cap
//! the number of pixels per request.
//!
//! ## Overview
//!
//! A request flows through three stages:
//!
//! 1. [`GridPlanner`] snaps the query geometry onto a regular grid at the
//!    requested resolution and splits it into [`TileSpec`]s that each respect
//!    the service's pixel ceiling.
//! 2. [`TileFetcher`] retrieves every tile on a bounded worker pool, retrying
//!    transient failures with exponential backoff.
//! 3. [`MosaicAssembler`] places the tiles back onto the grid. Tiles that could
//!    not be retrieved stay nodata and are listed in the mosaic's
//!    [`CoverageSummary`].
//!
//! The default service is the USGS 3DEP ImageServer, which also renders
//! derived products server-side (see [`Layer`]).
//!
//! ## Examples
//!
//! ```no_run
//! use terrafetch_dem::{Crs, Geometry};
//!
//! // A 2 km square in CONUS Albers at 10 m resolution
//! let crs: Crs = "EPSG:5070".parse()?;
//! let area = Geometry::bbox(-2_000_000.0, 1_900_000.0, -1_998_000.0, 1_902_000.0, crs);
//! let mosaic = terrafetch_dem::get_elevation(&area, 10.0, None, None)?;
//!
//! if !mosaic.is_complete() {
//!     println!("{} tiles failed", mosaic.coverage().failed.len());
//! }
//! terrafetch_dem::write_geotiff(mosaic.raster(), "dem.tif")?;
//! # Ok::<(), terrafetch_dem::DemError>(())
//! ```
//!
//! Any [`CoverageClient`] can stand in for the HTTP client, including a closure:
//!
//! ```
//! use terrafetch_dem::{CoverageRequest, ElevationService, FetchFailure, Geometry, Crs, ServiceConfig};
//!
//! let offline = |_: &CoverageRequest| -> Result<Vec<u8>, FetchFailure> {
//!     Err(FetchFailure::Http { status: 503 })
//! };
//! let config = ServiceConfig { max_retries: 0, ..Default::default() };
//! let service = ElevationService::with_client(offline, config)?;
//! let area = Geometry::bbox(0.0, 0.0, 1000.0, 1000.0, Crs::WEB_MERCATOR);
//! assert!(service.get_elevation(&area, 100.0, None, None).is_err());
//! # Ok::<(), terrafetch_dem::DemError>(())
//! ```

mod config;
mod coverage;
mod crs;
mod error;
mod fetcher;
mod geometry;
mod geotiff;
mod grid;
mod mosaic;
mod raster;
mod telemetry;

pub use config::{ServiceConfig, DEFAULT_ENDPOINT, DEFAULT_NODATA};
pub use coverage::{CoverageClient, CoverageRequest, ImageServerClient, Layer};
pub use crs::{Crs, CrsTransformer, EPSG_CONUS_ALBERS, EPSG_NAD83, EPSG_WEB_MERCATOR, EPSG_WGS84};
pub use error::{DemError, FetchFailure, TileFailure, TileFetchError};
pub use fetcher::{DownloadStats, TileData, TileFetcher, TileResult};
pub use geometry::{Geometry, Shape};
pub use geotiff::{decode, encode, read_geotiff, write_geotiff, DecodedRaster};
pub use grid::{GridPlanner, GridSpec, TileSpec};
pub use mosaic::{CoverageSummary, FailedRegion, Mosaic, MosaicAssembler};
pub use raster::{GeoTransform, Raster};
pub use telemetry::{
    describe_metrics, BYTES_DOWNLOADED, REQUEST_DURATION, TILES_FAILED, TILE_REQUESTS, TILE_RETRIES,
};

use tracing::info;

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;

/// Plans, fetches and assembles coverage requests against one service.
#[derive(Debug)]
pub struct ElevationService<C> {
    planner: GridPlanner,
    fetcher: TileFetcher<C>,
    assembler: MosaicAssembler,
}

impl ElevationService<ImageServerClient> {
    /// A service talking HTTP to the configured endpoint.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let client = ImageServerClient::new(&config)?;
        Self::with_client(client, config)
    }
}

impl<C: CoverageClient> ElevationService<C> {
    /// A service using `client` for every tile request.
    pub fn with_client(client: C, config: ServiceConfig) -> Result<Self> {
        let planner = GridPlanner::new(&config);
        let assembler = MosaicAssembler::new(config.nodata);
        let fetcher = TileFetcher::new(client, config)?;
        Ok(Self {
            planner,
            fetcher,
            assembler,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &ServiceConfig {
        self.fetcher.config()
    }

    /// Download statistics for this service's session.
    pub fn download_stats(&self) -> DownloadStats {
        self.fetcher.download_stats()
    }

    /// Plan the grid and tiles for a request without fetching anything.
    pub fn plan(
        &self,
        geometry: &Geometry,
        resolution: f64,
        crs: Option<Crs>,
        buffer: Option<f64>,
    ) -> Result<(GridSpec, Vec<TileSpec>)> {
        let grid = self.planner.plan(geometry, resolution, crs, buffer)?;
        let tiles = self.planner.partition(&grid);
        Ok((grid, tiles))
    }

    /// Retrieve `layer` over `geometry` at `resolution`.
    ///
    /// `resolution` and `buffer` are in units of the working CRS, which is
    /// `crs` when given and the geometry's CRS otherwise. The request succeeds
    /// as long as one tile was retrieved; check [`Mosaic::is_complete`] for
    /// gaps. Fails with [`DemError::ServiceUnavailable`] when no tile was.
    pub fn get_map(
        &self,
        layer: Layer,
        geometry: &Geometry,
        resolution: f64,
        crs: Option<Crs>,
        buffer: Option<f64>,
    ) -> Result<Mosaic> {
        let (grid, tiles) = self.plan(geometry, resolution, crs, buffer)?;
        info!(
            layer = %layer,
            cols = grid.cols,
            rows = grid.rows,
            tiles = tiles.len(),
            "Requesting coverage"
        );

        let results = self.fetcher.fetch_all(&grid, layer, &tiles);
        let mosaic = self.assembler.assemble(&grid, &tiles, results)?;

        let coverage = mosaic.coverage();
        if coverage.succeeded() == 0 {
            let reason = coverage
                .failed
                .last()
                .map(|region| region.error.to_string())
                .unwrap_or_else(|| "no tiles were planned".to_string());
            return Err(DemError::ServiceUnavailable {
                failed: coverage.failed.len(),
                reason,
            });
        }
        Ok(mosaic)
    }

    /// Retrieve bare-earth elevation; `get_map` with [`Layer::Dem`].
    pub fn get_elevation(
        &self,
        geometry: &Geometry,
        resolution: f64,
        crs: Option<Crs>,
        buffer: Option<f64>,
    ) -> Result<Mosaic> {
        self.get_map(Layer::Dem, geometry, resolution, crs, buffer)
    }
}

/// Retrieve `layer` from the default service with the default configuration.
pub fn get_map(
    layer: Layer,
    geometry: &Geometry,
    resolution: f64,
    crs: Option<Crs>,
    buffer: Option<f64>,
) -> Result<Mosaic> {
    ElevationService::new(ServiceConfig::default())?.get_map(layer, geometry, resolution, crs, buffer)
}

/// Retrieve elevation from the default service with the default configuration.
pub fn get_elevation(
    geometry: &Geometry,
    resolution: f64,
    crs: Option<Crs>,
    buffer: Option<f64>,
) -> Result<Mosaic> {
    get_map(Layer::Dem, geometry, resolution, crs, buffer)
}

/// Bilinear samples of `mosaic` at `points` given in `crs`.
pub fn elevation_at_points(mosaic: &Mosaic, points: &[(f64, f64)], crs: Crs) -> Result<Vec<Option<f32>>> {
    mosaic.elevation_at_points(points, crs)
}
