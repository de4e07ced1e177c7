//! Slope, aspect and hillshade from a 3x3 Horn kernel.
//!
//! For the neighbourhood
//!
//! ```text
//! a b c
//! d e f
//! g h i
//! ```
//!
//! the gradients are `dz/dx = ((c + 2f + i) - (a + 2d + g)) / 8dx` (positive
//! uphill to the east) and `dz/dy = ((g + 2h + i) - (a + 2b + c)) / 8dy`
//! (positive uphill to the south). Border cells and cells with any nodata
//! neighbour are nodata in every output.

use crate::derived::{DerivedRaster, Product, SlopeUnits};
use crate::{Result, TerrainError};
use ndarray::Array2;
use std::f64::consts::PI;
use terrafetch_dem::Raster;
use tracing::debug;

/// Aspect value for cells without a downslope direction.
pub const FLAT_ASPECT: f32 = -1.0;

/// Gradient magnitude under which a cell counts as flat.
const FLAT_EPSILON: f64 = 1e-9;

/// The 3x3 neighbourhood of (row, col), row-major, or `None` when the cell is
/// on the border or any neighbour is nodata.
pub(crate) fn neighbourhood(raster: &Raster, row: usize, col: usize) -> Option<[f64; 9]> {
    let (cols, rows) = raster.dimensions();
    if row == 0 || col == 0 || row + 1 >= rows || col + 1 >= cols {
        return None;
    }
    let mut window = [0.0; 9];
    for (i, value) in window.iter_mut().enumerate() {
        *value = f64::from(raster.get(row + i / 3 - 1, col + i % 3 - 1)?);
    }
    Some(window)
}

fn horn(w: &[f64; 9], dx: f64, dy: f64) -> (f64, f64) {
    let dzdx = ((w[2] + 2.0 * w[5] + w[8]) - (w[0] + 2.0 * w[3] + w[6])) / (8.0 * dx);
    let dzdy = ((w[6] + 2.0 * w[7] + w[8]) - (w[0] + 2.0 * w[1] + w[2])) / (8.0 * dy);
    (dzdx, dzdy)
}

/// Apply `f(dzdx, dzdy)` to every cell with a full neighbourhood.
fn map_gradients<F>(elevation: &Raster, f: F) -> Raster
where
    F: Fn(f64, f64) -> f32,
{
    let (dx, dy) = elevation.pixel_size_meters();
    let (cols, rows) = elevation.dimensions();
    let nodata = elevation.nodata();

    let data = Array2::from_shape_fn((rows, cols), |(row, col)| {
        match neighbourhood(elevation, row, col) {
            Some(window) => {
                let (dzdx, dzdy) = horn(&window, dx, dy);
                f(dzdx, dzdy)
            }
            None => nodata,
        }
    });
    Raster::new(data, elevation.transform(), elevation.crs(), nodata)
}

fn rise(dzdx: f64, dzdy: f64) -> f64 {
    dzdx.hypot(dzdy)
}

fn slope_value(dzdx: f64, dzdy: f64, units: SlopeUnits) -> f32 {
    let rise = rise(dzdx, dzdy);
    let value = match units {
        SlopeUnits::Degrees => rise.atan().to_degrees(),
        SlopeUnits::Percent => rise * 100.0,
        SlopeUnits::MeterPerMeter => rise,
    };
    value as f32
}

/// Compass bearing (0 = north, clockwise) of steepest descent.
fn aspect_value(dzdx: f64, dzdy: f64) -> f32 {
    if dzdx.abs() < FLAT_EPSILON && dzdy.abs() < FLAT_EPSILON {
        return FLAT_ASPECT;
    }
    let angle = dzdy.atan2(-dzdx).to_degrees();
    let bearing = if angle > 90.0 {
        450.0 - angle
    } else {
        90.0 - angle
    };
    (bearing % 360.0) as f32
}

/// Slope in `units`.
pub fn slope(elevation: &Raster, units: SlopeUnits) -> DerivedRaster {
    let raster = map_gradients(elevation, |dzdx, dzdy| slope_value(dzdx, dzdy, units));
    debug!(?units, valid = raster.valid_count(), "Derived slope");
    DerivedRaster::new(Product::Slope(units), raster)
}

/// Aspect in degrees clockwise from north, [`FLAT_ASPECT`] on flat cells.
pub fn aspect(elevation: &Raster) -> DerivedRaster {
    let raster = map_gradients(elevation, aspect_value);
    debug!(valid = raster.valid_count(), "Derived aspect");
    DerivedRaster::new(Product::Aspect, raster)
}

/// Slope in degrees and aspect, in one call.
pub fn slope_aspect(elevation: &Raster) -> (DerivedRaster, DerivedRaster) {
    (slope(elevation, SlopeUnits::Degrees), aspect(elevation))
}

/// Illumination from a sun at `azimuth` (degrees clockwise from north) and
/// `altitude` (degrees above the horizon), as whole 8-bit levels 0..=255.
pub fn hillshade(elevation: &Raster, azimuth: f64, altitude: f64) -> DerivedRaster {
    let zenith = (90.0 - altitude).to_radians();
    let sun = ((450.0 - azimuth).rem_euclid(360.0)).to_radians();

    let raster = map_gradients(elevation, |dzdx, dzdy| {
        let slope = rise(dzdx, dzdy).atan();
        let facing = if dzdx.abs() < FLAT_EPSILON && dzdy.abs() < FLAT_EPSILON {
            0.0
        } else {
            dzdy.atan2(-dzdx).rem_euclid(2.0 * PI)
        };
        let shade = zenith.cos() * slope.cos() + zenith.sin() * slope.sin() * (sun - facing).cos();
        (255.0 * shade).round().clamp(0.0, 255.0) as f32
    });
    debug!(azimuth, altitude, "Derived hillshade");
    DerivedRaster::new(Product::Hillshade, raster)
}

/// Convert a slope raster to rise over run, keeping nodata.
pub fn slope_to_meters_per_meter(slope: &DerivedRaster) -> Result<DerivedRaster> {
    let convert: fn(f32) -> f32 = match slope.product() {
        Product::Slope(SlopeUnits::Degrees) => |v| f64::from(v).to_radians().tan() as f32,
        Product::Slope(SlopeUnits::Percent) => |v| v / 100.0,
        Product::Slope(SlopeUnits::MeterPerMeter) => |v| v,
        other => {
            return Err(TerrainError::UnexpectedProduct {
                expected: "slope",
                found: other,
            })
        }
    };

    let source = slope.raster();
    let data = source
        .data()
        .mapv(|v| if source.is_nodata(v) { v } else { convert(v) });
    let raster = Raster::new(data, source.transform(), source.crs(), source.nodata());
    Ok(DerivedRaster::new(Product::Slope(SlopeUnits::MeterPerMeter), raster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use terrafetch_dem::{Crs, GeoTransform};

    fn raster_from(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f32) -> Raster {
        Raster::new(
            Array2::from_shape_fn((rows, cols), |(r, c)| f(r, c)),
            GeoTransform {
                origin_x: 0.0,
                origin_y: 0.0,
                pixel_width: 10.0,
                pixel_height: 10.0,
            },
            Crs::WEB_MERCATOR,
            -9999.0,
        )
    }

    #[test]
    fn test_flat_surface() {
        let dem = raster_from(5, 5, |_, _| 100.0);
        let (slope, aspect) = slope_aspect(&dem);
        for row in 1..4 {
            for col in 1..4 {
                assert_eq!(slope.raster().get(row, col), Some(0.0));
                assert_eq!(aspect.raster().get(row, col), Some(FLAT_ASPECT));
            }
        }
        assert_eq!(slope.raster().get(0, 2), None);
        assert_eq!(aspect.raster().get(4, 4), None);
    }

    #[test]
    fn test_aspect_cardinal_directions() {
        // Downhill to the east
        let east = raster_from(3, 3, |_, c| 100.0 - c as f32);
        assert_relative_eq!(aspect(&east).raster().get(1, 1).unwrap(), 90.0);
        // Downhill to the north (row 0 is north)
        let north = raster_from(3, 3, |r, _| 100.0 + r as f32);
        assert_relative_eq!(aspect(&north).raster().get(1, 1).unwrap(), 0.0);
        // Downhill to the south-west
        let south_west = raster_from(3, 3, |r, c| 100.0 - r as f32 + c as f32);
        assert_relative_eq!(aspect(&south_west).raster().get(1, 1).unwrap(), 225.0);
    }

    #[test]
    fn test_slope_units() {
        // 10 m rise per 10 m pixel: 45 degrees
        let ramp = raster_from(3, 3, |_, c| 10.0 * c as f32);
        assert_relative_eq!(slope(&ramp, SlopeUnits::Degrees).raster().get(1, 1).unwrap(), 45.0, epsilon = 1e-4);
        assert_relative_eq!(slope(&ramp, SlopeUnits::Percent).raster().get(1, 1).unwrap(), 100.0, epsilon = 1e-4);
        assert_relative_eq!(slope(&ramp, SlopeUnits::MeterPerMeter).raster().get(1, 1).unwrap(), 1.0, epsilon = 1e-6);

        let degrees = slope(&ramp, SlopeUnits::Degrees);
        let converted = slope_to_meters_per_meter(&degrees).unwrap();
        assert_eq!(converted.product(), Product::Slope(SlopeUnits::MeterPerMeter));
        assert_relative_eq!(converted.raster().get(1, 1).unwrap(), 1.0, epsilon = 1e-5);
        assert_eq!(converted.raster().get(0, 0), None);
    }

    #[test]
    fn test_nodata_neighbour_propagates() {
        let mut dem = raster_from(5, 5, |r, c| (r * 5 + c) as f32);
        dem.data_mut()[[2, 2]] = -9999.0;
        let slope = slope(&dem, SlopeUnits::Degrees);
        for row in 1..4 {
            for col in 1..4 {
                assert_eq!(slope.raster().get(row, col), None);
            }
        }
    }

    #[test]
    fn test_hillshade() {
        let flat = raster_from(3, 3, |_, _| 0.0);
        let shade = hillshade(&flat, 315.0, 45.0);
        // 255 * cos(45 degrees) = 180.3
        assert_eq!(shade.raster().get(1, 1), Some(180.0));

        // A 45 degree slope facing the sun, with the sun 45 degrees up, is fully lit.
        let facing_east = raster_from(3, 3, |_, c| 100.0 - 10.0 * c as f32);
        let lit = hillshade(&facing_east, 90.0, 45.0);
        assert_relative_eq!(lit.raster().get(1, 1).unwrap(), 255.0, epsilon = 1e-3);
        let dark = hillshade(&facing_east, 270.0, 45.0);
        assert_relative_eq!(dark.raster().get(1, 1).unwrap(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_hillshade_holds_whole_levels() {
        let dem = raster_from(5, 5, |r, c| (r * r) as f32 * 3.7 + c as f32 * 1.3);
        let shade = hillshade(&dem, 135.0, 30.0);
        let raster = shade.raster();
        let valid: Vec<f32> = raster.data().iter().copied().filter(|v| !raster.is_nodata(*v)).collect();
        assert_eq!(valid.len(), 9);
        assert!(valid.iter().all(|v| v.fract() == 0.0 && (0.0..=255.0).contains(v)));
    }

    #[test]
    fn test_wrong_product_rejected() {
        let dem = DerivedRaster::elevation(raster_from(3, 3, |_, _| 1.0));
        assert!(matches!(
            slope_to_meters_per_meter(&dem),
            Err(TerrainError::UnexpectedProduct { .. })
        ));
    }
}
