//! Georeferenced single-band raster.

use crate::crs::Crs;
use crate::grid::{GridSpec, TileSpec};
use crate::{DemError, Result};
use geo::{Coord, Rect};
use ndarray::{s, Array2, ArrayView2};

/// North-up affine transform: origin at the north-west corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X coordinate of the west edge.
    pub origin_x: f64,
    /// Y coordinate of the north edge.
    pub origin_y: f64,
    /// Pixel width (positive).
    pub pixel_width: f64,
    /// Pixel height (positive; y decreases with row).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Coordinates of the centre of pixel (row, col).
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (col, row) position of a coordinate, measured from the
    /// raster's north-west corner.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// GDAL-style six coefficient form.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            -self.pixel_height,
        ]
    }
}

/// A single-band raster with georeferencing and a nodata sentinel.
///
/// Data is stored row-major, north to south and west to east. NaN values
/// count as nodata in addition to the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    data: Array2<f32>,
    transform: GeoTransform,
    crs: Crs,
    nodata: f32,
}

impl Raster {
    /// Create a raster from its parts.
    pub fn new(data: Array2<f32>, transform: GeoTransform, crs: Crs, nodata: f32) -> Self {
        Self {
            data,
            transform,
            crs,
            nodata,
        }
    }

    /// A raster covering `grid`, filled with `nodata`.
    pub fn filled(grid: &GridSpec, nodata: f32) -> Self {
        Self::new(
            Array2::from_elem((grid.rows, grid.cols), nodata),
            grid.transform(),
            grid.crs,
            nodata,
        )
    }

    /// The pixel values.
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Mutable pixel values.
    pub fn data_mut(&mut self) -> &mut Array2<f32> {
        &mut self.data
    }

    /// Consume the raster, returning its pixel values.
    pub fn into_data(self) -> Array2<f32> {
        self.data
    }

    /// The affine transform.
    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    /// The CRS.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// The nodata sentinel.
    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    /// (columns, rows).
    pub fn dimensions(&self) -> (usize, usize) {
        let (rows, cols) = self.data.dim();
        (cols, rows)
    }

    /// Whether `value` represents missing data in this raster.
    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || value == self.nodata
    }

    /// Value at (row, col), or `None` when outside the raster or nodata.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.data
            .get((row, col))
            .copied()
            .filter(|v| !self.is_nodata(*v))
    }

    /// Number of pixels holding valid data.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !self.is_nodata(**v)).count()
    }

    /// Geographic extent.
    pub fn bounds(&self) -> Rect<f64> {
        let (cols, rows) = self.dimensions();
        Rect::new(
            Coord {
                x: self.transform.origin_x,
                y: self.transform.origin_y - rows as f64 * self.transform.pixel_height,
            },
            Coord {
                x: self.transform.origin_x + cols as f64 * self.transform.pixel_width,
                y: self.transform.origin_y,
            },
        )
    }

    /// The grid this raster is laid out on.
    pub fn grid(&self) -> GridSpec {
        let (cols, rows) = self.dimensions();
        GridSpec {
            origin_x: self.transform.origin_x,
            origin_y: self.transform.origin_y,
            pixel_width: self.transform.pixel_width,
            pixel_height: self.transform.pixel_height,
            cols,
            rows,
            crs: self.crs,
        }
    }

    /// Pixel values within a tile's window.
    pub fn window(&self, tile: &TileSpec) -> Result<ArrayView2<'_, f32>> {
        let (cols, rows) = self.dimensions();
        if tile.col_off + tile.cols > cols || tile.row_off + tile.rows > rows {
            return Err(DemError::GridMismatch(format!(
                "tile {} ({}x{} at {},{}) exceeds raster {}x{}",
                tile.index, tile.cols, tile.rows, tile.col_off, tile.row_off, cols, rows
            )));
        }
        Ok(self.data.slice(s![
            tile.row_off..tile.row_off + tile.rows,
            tile.col_off..tile.col_off + tile.cols
        ]))
    }

    /// Pixel size in metres: geographic rasters are converted at their centre
    /// latitude.
    pub fn pixel_size_meters(&self) -> (f64, f64) {
        let (w, h) = (self.transform.pixel_width, self.transform.pixel_height);
        if !self.crs.is_geographic() {
            return (w, h);
        }

        let bounds = self.bounds();
        let center_lat = (bounds.min().y + bounds.max().y) / 2.0;

        // At the equator, 1 degree ≈ 111,320 meters
        // Longitude shrinks by cos(latitude)
        let meters_per_deg_lat = 111_320.0;
        let meters_per_deg_lon = 111_320.0 * center_lat.to_radians().cos();

        (w * meters_per_deg_lon, h * meters_per_deg_lat)
    }

    /// Value at a coordinate in the raster's CRS, by bilinear interpolation
    /// between the four surrounding pixel centres.
    ///
    /// Returns `Ok(None)` when any of those pixels is nodata.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Result<Option<f32>> {
        self.check_bounds(x, y)?;
        let (cols, rows) = self.dimensions();

        // Pixel-centre coordinates; clamp so edge half-pixels reuse the edge values.
        let (px, py) = self.transform.to_pixel(x, y);
        let fx_pos = (px - 0.5).clamp(0.0, (cols - 1) as f64);
        let fy_pos = (py - 0.5).clamp(0.0, (rows - 1) as f64);

        let x0 = fx_pos.floor() as usize;
        let y0 = fy_pos.floor() as usize;
        let x1 = (x0 + 1).min(cols - 1);
        let y1 = (y0 + 1).min(rows - 1);

        let fx = fx_pos - x0 as f64;
        let fy = fy_pos - y0 as f64;

        let (Some(v00), Some(v10), Some(v01), Some(v11)) = (
            self.get(y0, x0),
            self.get(y0, x1),
            self.get(y1, x0),
            self.get(y1, x1),
        ) else {
            return Ok(None);
        };

        let elevation = v00 as f64 * (1.0 - fx) * (1.0 - fy)
            + v10 as f64 * fx * (1.0 - fy)
            + v01 as f64 * (1.0 - fx) * fy
            + v11 as f64 * fx * fy;

        Ok(Some(elevation as f32))
    }

    /// Value of the pixel containing a coordinate (no interpolation).
    pub fn sample_nearest(&self, x: f64, y: f64) -> Result<Option<f32>> {
        self.check_bounds(x, y)?;
        let (cols, rows) = self.dimensions();
        let (px, py) = self.transform.to_pixel(x, y);
        let col = (px.floor() as usize).min(cols - 1);
        let row = (py.floor() as usize).min(rows - 1);
        Ok(self.get(row, col))
    }

    fn check_bounds(&self, x: f64, y: f64) -> Result<()> {
        let b = self.bounds();
        let (cols, rows) = self.dimensions();
        let inside = x >= b.min().x && x <= b.max().x && y >= b.min().y && y <= b.max().y;
        if !inside || cols == 0 || rows == 0 {
            return Err(DemError::OutOfBounds {
                x,
                y,
                min_x: b.min().x,
                max_x: b.max().x,
                min_y: b.min().y,
                max_y: b.max().y,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn sample_raster() -> Raster {
        Raster::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            GeoTransform {
                origin_x: 100.0,
                origin_y: 50.0,
                pixel_width: 10.0,
                pixel_height: 10.0,
            },
            Crs::WEB_MERCATOR,
            -9999.0,
        )
    }

    #[test]
    fn test_bounds_and_centers() {
        let r = sample_raster();
        let b = r.bounds();
        assert_eq!(b.min(), Coord { x: 100.0, y: 30.0 });
        assert_eq!(b.max(), Coord { x: 130.0, y: 50.0 });
        assert_eq!(r.transform().pixel_center(1, 2), (125.0, 35.0));
    }

    #[test]
    fn test_bilinear_at_centers_and_midpoints() {
        let r = sample_raster();
        assert_relative_eq!(r.sample_bilinear(105.0, 45.0).unwrap().unwrap(), 1.0);
        assert_relative_eq!(r.sample_bilinear(110.0, 45.0).unwrap().unwrap(), 1.5);
        assert_relative_eq!(r.sample_bilinear(110.0, 40.0).unwrap().unwrap(), 3.0);
    }

    #[test]
    fn test_nearest_and_out_of_bounds() {
        let r = sample_raster();
        assert_eq!(r.sample_nearest(129.0, 31.0).unwrap(), Some(6.0));
        assert!(matches!(r.sample_nearest(131.0, 40.0), Err(DemError::OutOfBounds { .. })));
    }

    #[test]
    fn test_nodata_handling() {
        let mut r = sample_raster();
        r.data_mut()[[0, 0]] = -9999.0;
        r.data_mut()[[1, 2]] = f32::NAN;
        assert_eq!(r.valid_count(), 4);
        assert_eq!(r.get(0, 0), None);
        assert_eq!(r.get(0, 1), Some(2.0));
        assert_eq!(r.sample_bilinear(110.0, 45.0).unwrap(), None);
    }

    #[test]
    fn test_geographic_pixel_size() {
        let r = Raster::new(
            Array2::zeros((10, 10)),
            GeoTransform {
                origin_x: 0.0,
                origin_y: 60.5,
                pixel_width: 0.1,
                pixel_height: 0.1,
            },
            Crs::WGS84,
            -9999.0,
        );
        let (dx, dy) = r.pixel_size_meters();
        assert_relative_eq!(dy, 11_132.0, epsilon = 1e-6);
        assert_relative_eq!(dx, 11_132.0 * 60f64.to_radians().cos(), epsilon = 1e-6);
    }
}
