//! Reassembly of fetched tiles into one full-extent raster.

use crate::crs::{Crs, CrsTransformer};
use crate::error::{TileFailure, TileFetchError};
use crate::fetcher::{TileData, TileResult};
use crate::grid::{GridSpec, TileSpec};
use crate::raster::Raster;
use crate::{DemError, Result};
use ndarray::{s, Zip};
use tracing::{debug, info, warn};

/// A tile region that holds nodata because the tile could not be retrieved.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRegion {
    /// The tile that failed.
    pub tile: TileSpec,
    /// Why it failed.
    pub error: TileFetchError,
}

/// Which parts of a mosaic were actually retrieved.
///
/// Nodata inside a failed region means "not retrieved"; nodata anywhere else
/// is nodata reported by the service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoverageSummary {
    /// Number of tiles in the plan.
    pub total_tiles: usize,
    /// Regions whose tile failed.
    pub failed: Vec<FailedRegion>,
}

impl CoverageSummary {
    /// Whether every tile was retrieved.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of tiles retrieved.
    pub fn succeeded(&self) -> usize {
        self.total_tiles - self.failed.len()
    }

    /// Whether pixel (row, col) lies in a failed region.
    pub fn is_missing(&self, row: usize, col: usize) -> bool {
        self.failed.iter().any(|region| {
            let t = &region.tile;
            row >= t.row_off && row < t.row_off + t.rows && col >= t.col_off && col < t.col_off + t.cols
        })
    }

    /// Fraction of the grid's pixels that were retrieved.
    pub fn retrieved_fraction(&self, grid: &GridSpec) -> f64 {
        let total = grid.pixel_count();
        if total == 0 {
            return 0.0;
        }
        let missing: usize = self.failed.iter().map(|r| r.tile.pixel_count()).sum();
        (total - missing.min(total)) as f64 / total as f64
    }
}

/// The reassembled raster and its coverage summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Mosaic {
    raster: Raster,
    coverage: CoverageSummary,
}

impl Mosaic {
    /// Create a mosaic from its parts.
    pub fn new(raster: Raster, coverage: CoverageSummary) -> Self {
        Self { raster, coverage }
    }

    /// The assembled raster.
    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Consume the mosaic, returning the raster.
    pub fn into_raster(self) -> Raster {
        self.raster
    }

    /// The coverage summary.
    pub fn coverage(&self) -> &CoverageSummary {
        &self.coverage
    }

    /// Whether every tile was retrieved.
    pub fn is_complete(&self) -> bool {
        self.coverage.is_complete()
    }

    /// Sample the mosaic at `points` given in `crs`, by bilinear interpolation.
    ///
    /// Points outside the grid, or next to nodata, give `None`.
    pub fn elevation_at_points(&self, points: &[(f64, f64)], crs: Crs) -> Result<Vec<Option<f32>>> {
        self.sample_points(points, crs, Raster::sample_bilinear)
    }

    /// Like [`Mosaic::elevation_at_points`], using the value of the containing pixel.
    pub fn nearest_at_points(&self, points: &[(f64, f64)], crs: Crs) -> Result<Vec<Option<f32>>> {
        self.sample_points(points, crs, Raster::sample_nearest)
    }

    fn sample_points(
        &self,
        points: &[(f64, f64)],
        crs: Crs,
        sample: fn(&Raster, f64, f64) -> Result<Option<f32>>,
    ) -> Result<Vec<Option<f32>>> {
        let transformer = CrsTransformer::new(crs, self.raster.crs())?;
        points
            .iter()
            .map(|&(x, y)| {
                let (x, y) = transformer.transform(x, y)?;
                match sample(&self.raster, x, y) {
                    Ok(value) => Ok(value),
                    Err(DemError::OutOfBounds { .. }) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .collect()
    }
}

/// Places tile results onto their grid.
#[derive(Debug, Clone)]
pub struct MosaicAssembler {
    nodata: f32,
}

impl MosaicAssembler {
    /// Create an assembler writing `nodata` into missing pixels.
    pub fn new(nodata: f32) -> Self {
        Self { nodata }
    }

    /// Assemble `results` onto `grid`, which was partitioned into `tiles`.
    ///
    /// `tiles[i]` is the tile with index `i`. Placement is keyed by each
    /// result's tile window, so the order of `results` does not matter. A
    /// tile's own nodata value (and NaN) is rewritten to the mosaic's nodata.
    /// Results for tiles outside the plan, windows outside the grid, data of
    /// the wrong shape and repeated tile indices are rejected. Planned tiles
    /// without a result are recorded as failed.
    pub fn assemble(&self, grid: &GridSpec, tiles: &[TileSpec], results: Vec<TileResult>) -> Result<Mosaic> {
        let mut raster = Raster::filled(grid, self.nodata);
        let mut seen = vec![false; tiles.len()];
        let mut failed = Vec::new();

        for result in results {
            let tile = result.tile;
            if tiles.get(tile.index) != Some(&tile) {
                return Err(DemError::GridMismatch(format!(
                    "tile {} is not part of the plan",
                    tile.index
                )));
            }
            if tile.col_off + tile.cols > grid.cols || tile.row_off + tile.rows > grid.rows {
                return Err(DemError::GridMismatch(format!(
                    "tile {} window ({}x{} at {},{}) exceeds the {}x{} grid",
                    tile.index, tile.cols, tile.rows, tile.col_off, tile.row_off, grid.cols, grid.rows
                )));
            }
            if std::mem::replace(&mut seen[tile.index], true) {
                return Err(DemError::GridMismatch(format!(
                    "tile {} appears more than once",
                    tile.index
                )));
            }

            match result.outcome {
                Ok(data) => self.place(&mut raster, &tile, data)?,
                Err(error) => {
                    warn!(tile = tile.index, error = %error, "Tile region left as nodata");
                    failed.push(FailedRegion { tile, error });
                }
            }
        }

        for (tile, _) in tiles.iter().zip(&seen).filter(|(_, seen)| !**seen) {
            warn!(tile = tile.index, "No result for tile, region left as nodata");
            failed.push(FailedRegion {
                tile: tile.clone(),
                error: TileFetchError {
                    tile: tile.index,
                    attempts: 0,
                    reason: TileFailure::NotFetched,
                },
            });
        }

        failed.sort_by_key(|region| region.tile.index);
        let coverage = CoverageSummary {
            total_tiles: tiles.len(),
            failed,
        };

        info!(
            cols = grid.cols,
            rows = grid.rows,
            tiles = coverage.total_tiles,
            failed = coverage.failed.len(),
            retrieved = coverage.retrieved_fraction(grid),
            "Assembled mosaic"
        );

        Ok(Mosaic::new(raster, coverage))
    }

    fn place(&self, raster: &mut Raster, tile: &TileSpec, data: TileData) -> Result<()> {
        let (rows, cols) = data.values.dim();
        if (cols, rows) != (tile.cols, tile.rows) {
            return Err(DemError::GridMismatch(format!(
                "tile {} holds {}x{} pixels, its window is {}x{}",
                tile.index, cols, rows, tile.cols, tile.rows
            )));
        }

        let nodata = self.nodata;
        let source_nodata = data.nodata;
        let mut window = raster.data_mut().slice_mut(s![
            tile.row_off..tile.row_off + tile.rows,
            tile.col_off..tile.col_off + tile.cols
        ]);
        Zip::from(&mut window).and(&data.values).for_each(|out, &v| {
            *out = if v.is_nan() || source_nodata == Some(v) {
                nodata
            } else {
                v
            };
        });

        debug!(tile = tile.index, col_off = tile.col_off, row_off = tile.row_off, "Placed tile");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridPlanner;
    use crate::config::ServiceConfig;
    use crate::geometry::Geometry;
    use ndarray::Array2;

    fn plan(ceiling: usize) -> (GridSpec, Vec<TileSpec>) {
        let planner = GridPlanner::new(&ServiceConfig {
            max_pixels_per_request: ceiling,
            ..Default::default()
        });
        let geometry = Geometry::bbox(0.0, 0.0, 1000.0, 1000.0, Crs::WEB_MERCATOR);
        let grid = planner.plan(&geometry, 100.0, None, None).unwrap();
        let tiles = planner.partition(&grid);
        (grid, tiles)
    }

    fn tile_values(tile: &TileSpec) -> Array2<f32> {
        Array2::from_shape_fn((tile.rows, tile.cols), |(r, c)| {
            ((tile.row_off + r) * 100 + tile.col_off + c) as f32
        })
    }

    fn success(tile: &TileSpec) -> TileResult {
        TileResult::success(
            tile.clone(),
            TileData {
                values: tile_values(tile),
                nodata: None,
            },
        )
    }

    #[test]
    fn test_assembly_round_trip() {
        let (grid, tiles) = plan(12);
        let mut results: Vec<TileResult> = tiles.iter().map(success).collect();
        results.reverse();

        let mosaic = MosaicAssembler::new(-9999.0).assemble(&grid, &tiles, results).unwrap();
        assert!(mosaic.is_complete());
        assert_eq!(mosaic.coverage().total_tiles, tiles.len());
        for tile in &tiles {
            assert_eq!(mosaic.raster().window(tile).unwrap(), tile_values(tile));
        }
        assert_eq!(mosaic.raster().transform(), grid.transform());
    }

    #[test]
    fn test_failed_tile_left_as_nodata() {
        let (grid, tiles) = plan(40);
        let results = tiles
            .iter()
            .map(|t| {
                if t.index == 1 {
                    TileResult::failure(t.clone(), 4, TileFailure::DeadlineExceeded)
                } else {
                    success(t)
                }
            })
            .collect();

        let mosaic = MosaicAssembler::new(-1.0).assemble(&grid, &tiles, results).unwrap();
        assert!(!mosaic.is_complete());
        assert_eq!(mosaic.coverage().succeeded(), tiles.len() - 1);
        let failed = &tiles[1];
        assert!(mosaic.raster().window(failed).unwrap().iter().all(|v| *v == -1.0));
        assert!(mosaic.coverage().is_missing(failed.row_off, failed.col_off));
        assert!(!mosaic.coverage().is_missing(tiles[0].row_off, tiles[0].col_off));
    }

    #[test]
    fn test_tile_nodata_is_rewritten() {
        let (grid, tiles) = plan(1_000);
        let mut values = tile_values(&tiles[0]);
        values[[0, 0]] = -32768.0;
        values[[0, 1]] = f32::NAN;
        let result = TileResult::success(
            tiles[0].clone(),
            TileData {
                values,
                nodata: Some(-32768.0),
            },
        );
        let mosaic = MosaicAssembler::new(-9999.0).assemble(&grid, &tiles, vec![result]).unwrap();
        assert_eq!(mosaic.raster().data()[[0, 0]], -9999.0);
        assert_eq!(mosaic.raster().data()[[0, 1]], -9999.0);
        assert_eq!(mosaic.raster().data()[[0, 2]], 2.0);
    }

    #[test]
    fn test_duplicate_tile_rejected() {
        let (grid, tiles) = plan(40);
        let results = vec![success(&tiles[0]), success(&tiles[0])];
        let result = MosaicAssembler::new(-9999.0).assemble(&grid, &tiles, results);
        assert!(matches!(result, Err(DemError::GridMismatch(_))));
    }

    #[test]
    fn test_point_sampling() {
        let (grid, tiles) = plan(1_000);
        let mosaic = MosaicAssembler::new(-9999.0)
            .assemble(&grid, &tiles, vec![success(&tiles[0])])
            .unwrap();
        // Row 0 spans y 900..1000, column 1 spans x 100..200.
        let values = mosaic
            .elevation_at_points(&[(150.0, 950.0), (5000.0, 5000.0)], Crs::WEB_MERCATOR)
            .unwrap();
        assert_eq!(values, vec![Some(1.0), None]);
        let nearest = mosaic
            .nearest_at_points(&[(199.0, 901.0)], Crs::WEB_MERCATOR)
            .unwrap();
        assert_eq!(nearest, vec![Some(1.0)]);
    }

    #[test]
    fn test_tile_without_result_counts_as_failed() {
        let (grid, tiles) = plan(40);
        assert!(tiles.len() >= 3);
        let results = tiles.iter().skip(1).map(success).collect();

        let mosaic = MosaicAssembler::new(-9999.0).assemble(&grid, &tiles, results).unwrap();
        let coverage = mosaic.coverage();
        assert_eq!(coverage.total_tiles, tiles.len());
        assert_eq!(coverage.succeeded(), tiles.len() - 1);
        assert_eq!(coverage.failed.len(), 1);
        assert_eq!(coverage.failed[0].tile, tiles[0]);
        assert_eq!(coverage.failed[0].error.reason, TileFailure::NotFetched);
        assert!(coverage.is_missing(0, 0));
        let expected = 1.0 - tiles[0].pixel_count() as f64 / grid.pixel_count() as f64;
        assert!((coverage.retrieved_fraction(&grid) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_result_outside_plan_rejected() {
        let (grid, tiles) = plan(40);
        let mut stray = tiles[0].clone();
        stray.index = tiles.len();
        let result = MosaicAssembler::new(-9999.0).assemble(&grid, &tiles, vec![success(&stray)]);
        assert!(matches!(result, Err(DemError::GridMismatch(_))));
    }
}
