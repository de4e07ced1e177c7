//! Grid planning: mapping a geometry and resolution onto a regular pixel grid
//! and splitting that grid into service-sized tiles.

use crate::config::ServiceConfig;
use crate::crs::Crs;
use crate::geometry::Geometry;
use crate::raster::GeoTransform;
use crate::{DemError, Result};
use geo::{Coord, Rect};
use tracing::debug;

/// Distance in pixels under which a coordinate is treated as lying exactly on
/// a grid line.
const SNAP_TOLERANCE: f64 = 1e-6;

/// A regular, north-up pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    /// X coordinate of the west edge.
    pub origin_x: f64,
    /// Y coordinate of the north edge.
    pub origin_y: f64,
    /// Pixel width in CRS units.
    pub pixel_width: f64,
    /// Pixel height in CRS units (positive; rows run north to south).
    pub pixel_height: f64,
    /// Number of columns.
    pub cols: usize,
    /// Number of rows.
    pub rows: usize,
    /// CRS of the grid.
    pub crs: Crs,
}

impl GridSpec {
    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.cols * self.rows
    }

    /// Geographic extent of the grid.
    pub fn bounds(&self) -> Rect<f64> {
        self.window_bounds(0, 0, self.cols, self.rows)
    }

    /// Geographic extent of a pixel window.
    pub fn window_bounds(&self, col_off: usize, row_off: usize, cols: usize, rows: usize) -> Rect<f64> {
        let min_x = self.origin_x + col_off as f64 * self.pixel_width;
        let max_x = self.origin_x + (col_off + cols) as f64 * self.pixel_width;
        let max_y = self.origin_y - row_off as f64 * self.pixel_height;
        let min_y = self.origin_y - (row_off + rows) as f64 * self.pixel_height;
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }

    /// Affine transform of the grid.
    pub fn transform(&self) -> GeoTransform {
        GeoTransform {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            pixel_width: self.pixel_width,
            pixel_height: self.pixel_height,
        }
    }
}

/// A sub-rectangle of a [`GridSpec`], sized for a single service request.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSpec {
    /// Position of this tile in its plan.
    pub index: usize,
    /// First column of the tile within the grid.
    pub col_off: usize,
    /// First row of the tile within the grid.
    pub row_off: usize,
    /// Tile width in pixels.
    pub cols: usize,
    /// Tile height in pixels.
    pub rows: usize,
    /// Geographic extent of the tile.
    pub bounds: Rect<f64>,
}

impl TileSpec {
    /// Number of pixels in the tile.
    pub fn pixel_count(&self) -> usize {
        self.cols * self.rows
    }
}

/// Converts geometries into grids and grids into tiles.
#[derive(Debug, Clone)]
pub struct GridPlanner {
    max_pixels_per_request: usize,
    max_grid_pixels: usize,
}

impl GridPlanner {
    /// Create a planner using the pixel limits of `config`.
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            max_pixels_per_request: config.max_pixels_per_request.max(1),
            max_grid_pixels: config.max_grid_pixels,
        }
    }

    /// Plan the grid for `geometry` at `resolution`.
    ///
    /// The working CRS is `crs` when given, otherwise the geometry's own CRS;
    /// `resolution` and `buffer` are in its linear units. Grid lines fall on
    /// multiples of the resolution, and the grid contains the buffered
    /// bounding box.
    pub fn plan(
        &self,
        geometry: &Geometry,
        resolution: f64,
        crs: Option<Crs>,
        buffer: Option<f64>,
    ) -> Result<GridSpec> {
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(DemError::Resolution(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }

        let working_crs = crs.unwrap_or_else(|| geometry.crs());
        let geometry = geometry.to_crs(working_crs)?;
        let bounds = geometry.buffered_bounds(buffer.unwrap_or(0.0))?;

        let col_start = snap_floor(bounds.min().x / resolution);
        let row_start = snap_ceil(bounds.max().y / resolution);
        // At least one pixel per axis, however thin the box.
        let col_end = snap_ceil(bounds.max().x / resolution).max(col_start + 1.0);
        let row_end = snap_floor(bounds.min().y / resolution).min(row_start - 1.0);

        let cols = col_end - col_start;
        let rows = row_start - row_end;
        let pixels = cols * rows;
        let finite = col_start.is_finite() && row_start.is_finite() && pixels.is_finite();
        if !finite || cols < 1.0 || rows < 1.0 {
            return Err(DemError::Resolution(format!(
                "resolution {} does not yield a usable grid over the requested area",
                resolution
            )));
        }
        if pixels > self.max_grid_pixels as f64 {
            return Err(DemError::Resolution(format!(
                "resolution {} yields a {}x{} grid, above the {} pixel ceiling",
                resolution, cols, rows, self.max_grid_pixels
            )));
        }

        let grid = GridSpec {
            origin_x: col_start * resolution,
            origin_y: row_start * resolution,
            pixel_width: resolution,
            pixel_height: resolution,
            cols: cols as usize,
            rows: rows as usize,
            crs: working_crs,
        };

        debug!(
            cols = grid.cols,
            rows = grid.rows,
            resolution,
            crs = %working_crs,
            "Planned grid"
        );

        Ok(grid)
    }

    /// Split `grid` into tiles of at most the per-request pixel ceiling.
    ///
    /// Tiles are uniform blocks in row-major order; only the last column and
    /// row of blocks may be smaller. The block shape is the one that needs the
    /// fewest requests.
    pub fn partition(&self, grid: &GridSpec) -> Vec<TileSpec> {
        let (block_cols, block_rows) = self.block_shape(grid.cols, grid.rows);

        let mut tiles = Vec::new();
        let mut row_off = 0;
        while row_off < grid.rows {
            let rows = block_rows.min(grid.rows - row_off);
            let mut col_off = 0;
            while col_off < grid.cols {
                let cols = block_cols.min(grid.cols - col_off);
                tiles.push(TileSpec {
                    index: tiles.len(),
                    col_off,
                    row_off,
                    cols,
                    rows,
                    bounds: grid.window_bounds(col_off, row_off, cols, rows),
                });
                col_off += cols;
            }
            row_off += rows;
        }

        debug!(
            tiles = tiles.len(),
            block_cols,
            block_rows,
            ceiling = self.max_pixels_per_request,
            "Partitioned grid"
        );

        tiles
    }

    fn block_shape(&self, cols: usize, rows: usize) -> (usize, usize) {
        let ceiling = self.max_pixels_per_request;
        if cols * rows <= ceiling {
            return (cols, rows);
        }

        let mut best = (1, ceiling.min(rows).max(1));
        let mut best_count = usize::MAX;
        // Visit each distinct block width once, narrowest splits first.
        let mut col_splits = cols.div_ceil(ceiling).max(1);
        while col_splits <= cols {
            let width = cols.div_ceil(col_splits);
            let height = (ceiling / width).min(rows);
            if height > 0 {
                let count = cols.div_ceil(width) * rows.div_ceil(height);
                if count < best_count {
                    best = (width, height);
                    best_count = count;
                }
            }
            if width == 1 {
                break;
            }
            col_splits = cols.div_ceil(width - 1);
        }
        best
    }
}

fn snap_floor(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() <= SNAP_TOLERANCE {
        nearest
    } else {
        value.floor()
    }
}

fn snap_ceil(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() <= SNAP_TOLERANCE {
        nearest
    } else {
        value.ceil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(ceiling: usize) -> GridPlanner {
        GridPlanner::new(&ServiceConfig {
            max_pixels_per_request: ceiling,
            ..Default::default()
        })
    }

    fn square(min: f64, size: f64) -> Geometry {
        Geometry::bbox(min, min, min + size, min + size, Crs::WEB_MERCATOR)
    }

    #[test]
    fn test_plan_exact_square() {
        let grid = planner(1_000)
            .plan(&square(5000.0, 1000.0), 100.0, None, None)
            .unwrap();
        assert_eq!((grid.cols, grid.rows), (10, 10));
        assert_eq!(grid.origin_x, 5000.0);
        assert_eq!(grid.origin_y, 6000.0);
        assert_eq!(grid.crs, Crs::WEB_MERCATOR);
    }

    #[test]
    fn test_plan_expands_to_contain() {
        let g = Geometry::bbox(12.5, 7.0, 251.0, 99.9, Crs::WEB_MERCATOR);
        let grid = planner(1_000).plan(&g, 10.0, None, Some(3.0)).unwrap();
        let b = grid.bounds();
        assert!(b.min().x <= 9.5 && b.max().x >= 254.0);
        assert!(b.min().y <= 4.0 && b.max().y >= 102.9);
        assert_eq!(grid.origin_x, 0.0);
        assert_eq!(grid.origin_y, 110.0);
        assert_eq!(grid.cols, 26);
        assert_eq!(grid.rows, 11);
    }

    #[test]
    fn test_plan_rejects_bad_resolution() {
        let g = square(0.0, 1000.0);
        assert!(matches!(planner(10).plan(&g, 0.0, None, None), Err(DemError::Resolution(_))));
        assert!(matches!(planner(10).plan(&g, -5.0, None, None), Err(DemError::Resolution(_))));
        assert!(matches!(planner(10).plan(&g, f64::NAN, None, None), Err(DemError::Resolution(_))));
    }

    #[test]
    fn test_plan_rejects_oversized_grid() {
        let planner = GridPlanner::new(&ServiceConfig {
            max_grid_pixels: 10_000,
            ..Default::default()
        });
        let result = planner.plan(&square(0.0, 1000.0), 1.0, None, None);
        assert!(matches!(result, Err(DemError::Resolution(_))));
    }

    #[test]
    fn test_single_tile_when_under_ceiling() {
        let grid = planner(100).plan(&square(0.0, 1000.0), 100.0, None, None).unwrap();
        let tiles = planner(100).partition(&grid);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].bounds, grid.bounds());
    }

    #[test]
    fn test_partition_ceiling_forty() {
        let p = planner(40);
        let grid = p.plan(&square(0.0, 1000.0), 100.0, None, None).unwrap();
        let tiles = p.partition(&grid);
        assert_eq!(tiles.len(), 3);
        assert!(tiles.iter().all(|t| t.pixel_count() <= 40));
        assert_eq!(tiles.iter().map(TileSpec::pixel_count).sum::<usize>(), 100);
    }

    #[test]
    fn test_partition_splits_wide_rows() {
        let grid = GridSpec {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_width: 1.0,
            pixel_height: 1.0,
            cols: 25,
            rows: 3,
            crs: Crs::WEB_MERCATOR,
        };
        let tiles = planner(10).partition(&grid);
        assert!(tiles.iter().all(|t| t.pixel_count() <= 10));
        assert_eq!(tiles.iter().map(TileSpec::pixel_count).sum::<usize>(), 75);
        // 25 columns need at least 3 blocks per row at 10 pixels each.
        assert_eq!(tiles.len(), 9);
    }

    #[test]
    fn test_plan_sliver_gets_one_column() {
        let sliver = Geometry::bbox(1_000_000.0001, 0.0, 1_000_000.0006, 100.0, Crs::WEB_MERCATOR);
        let grid = planner(1_000).plan(&sliver, 1.0, None, None).unwrap();
        assert_eq!((grid.cols, grid.rows), (1, 100));
        assert_eq!(grid.origin_x, 1_000_000.0);
        assert!(grid.bounds().max().x >= 1_000_000.0006);
        assert_eq!(planner(1_000).partition(&grid).len(), 1);

        // Thinner than the snap tolerance, on a grid line.
        let line = Geometry::bbox(500.0, 0.0, 500.0 + 1e-8, 10.0, Crs::WEB_MERCATOR);
        let grid = planner(1_000).plan(&line, 1.0, None, None).unwrap();
        assert_eq!((grid.cols, grid.rows), (1, 10));
    }

    #[test]
    fn test_plan_rejects_subnormal_resolution() {
        let g = Geometry::bbox(10.0, 10.0, 20.0, 20.0, Crs::WEB_MERCATOR);
        assert!(matches!(planner(10).plan(&g, 1e-310, None, None), Err(DemError::Resolution(_))));
    }

    #[test]
    fn test_plan_contains_box_at_projected_magnitudes() {
        for &(origin, resolution) in &[(1.0e6, 1.0), (3.3e6, 0.5), (1.2e7, 30.0), (2.0e7, 0.5)] {
            let (min_x, min_y) = (origin + 0.37, origin * 0.5 + 0.11);
            let (max_x, max_y) = (min_x + 123.4567, min_y + 98.7654);
            let g = Geometry::bbox(min_x, min_y, max_x, max_y, Crs::WEB_MERCATOR);
            let b = planner(1_000).plan(&g, resolution, None, None).unwrap().bounds();
            assert!(b.min().x <= min_x && b.max().x >= max_x, "x at {}", origin);
            assert!(b.min().y <= min_y && b.max().y >= max_y, "y at {}", origin);
        }
    }

    #[test]
    fn test_block_shape_needs_fewest_requests() {
        for ceiling in [1, 3, 7, 10, 16] {
            let p = planner(ceiling);
            for cols in 1..40 {
                for rows in 1..6 {
                    let (width, height) = p.block_shape(cols, rows);
                    assert!(width * height <= ceiling || cols * rows <= ceiling);
                    let count = cols.div_ceil(width) * rows.div_ceil(height);
                    let fewest = (1..=cols)
                        .filter_map(|w| {
                            let h = (ceiling / w).min(rows);
                            (h > 0).then(|| cols.div_ceil(w) * rows.div_ceil(h))
                        })
                        .min()
                        .unwrap();
                    assert_eq!(count, fewest, "{}x{} at ceiling {}", cols, rows, ceiling);
                }
            }
        }
    }

    #[test]
    fn test_block_shape_for_wide_single_row() {
        let (width, height) = planner(8_000_000).block_shape(400_000_000, 1);
        assert_eq!((width, height), (8_000_000, 1));
    }

    #[test]
    fn test_tile_bounds_match_offsets() {
        let p = planner(12);
        let grid = p.plan(&square(0.0, 1000.0), 100.0, None, None).unwrap();
        for tile in p.partition(&grid) {
            let expected = grid.window_bounds(tile.col_off, tile.row_off, tile.cols, tile.rows);
            assert_eq!(tile.bounds, expected);
        }
    }
}
