//! Summary statistics over valid elevation pixels.

use crate::{Result, TerrainError};
use terrafetch_dem::{Geometry, Raster};
use tracing::debug;

/// Min/max/mean/count over the valid pixels of a region.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElevationSummary {
    /// Lowest value.
    pub min: f64,
    /// Highest value.
    pub max: f64,
    /// Mean value.
    pub mean: f64,
    /// Number of valid pixels.
    pub count: usize,
}

#[derive(Default)]
struct Accumulator {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn push(&mut self, value: f32) {
        let v = f64::from(value);
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.sum += v;
        self.count += 1;
    }

    fn finish(self, zone: Option<usize>) -> Result<ElevationSummary> {
        if self.count == 0 {
            return Err(TerrainError::NoValidData { zone });
        }
        Ok(ElevationSummary {
            min: self.min,
            max: self.max,
            mean: self.sum / self.count as f64,
            count: self.count,
        })
    }
}

/// Summarise `raster` as a whole, or each of `zones` separately.
///
/// A pixel belongs to a zone when its centre lies inside or on the zone's
/// boundary; zones are reprojected to the raster's CRS first. Fails with
/// [`TerrainError::NoValidData`] when the raster, or any zone, holds no
/// valid pixel.
pub fn elevation_stats(raster: &Raster, zones: Option<&[Geometry]>) -> Result<Vec<ElevationSummary>> {
    let Some(zones) = zones else {
        let mut acc = Accumulator::default();
        raster
            .data()
            .iter()
            .filter(|v| !raster.is_nodata(**v))
            .for_each(|v| acc.push(*v));
        let summary = acc.finish(None)?;
        debug!(count = summary.count, "Summarised raster");
        return Ok(vec![summary]);
    };

    zones
        .iter()
        .enumerate()
        .map(|(i, zone)| zone_stats(raster, zone, i))
        .collect()
}

fn zone_stats(raster: &Raster, zone: &Geometry, index: usize) -> Result<ElevationSummary> {
    let zone = zone.to_crs(raster.crs())?;
    let bbox = zone.bounding_box()?;
    let transform = raster.transform();
    let (cols, rows) = raster.dimensions();

    // Pixel window covering the zone's bounding box.
    let (x0, y0) = transform.to_pixel(bbox.min().x, bbox.max().y);
    let (x1, y1) = transform.to_pixel(bbox.max().x, bbox.min().y);
    let col_start = x0.floor().clamp(0.0, cols as f64) as usize;
    let col_end = x1.ceil().clamp(0.0, cols as f64) as usize;
    let row_start = y0.floor().clamp(0.0, rows as f64) as usize;
    let row_end = y1.ceil().clamp(0.0, rows as f64) as usize;

    let mut acc = Accumulator::default();
    for row in row_start..row_end {
        for col in col_start..col_end {
            let Some(value) = raster.get(row, col) else {
                continue;
            };
            let (x, y) = transform.pixel_center(row, col);
            if zone.contains_point(x, y) {
                acc.push(value);
            }
        }
    }

    let summary = acc.finish(Some(index))?;
    debug!(zone = index, count = summary.count, "Summarised zone");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use terrafetch_dem::{Crs, GeoTransform};

    fn ramp() -> Raster {
        // 4x4 pixels of 10 m, values 0..16, covering x 0..40 and y 0..40.
        Raster::new(
            Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32),
            GeoTransform {
                origin_x: 0.0,
                origin_y: 40.0,
                pixel_width: 10.0,
                pixel_height: 10.0,
            },
            Crs::WEB_MERCATOR,
            -9999.0,
        )
    }

    #[test]
    fn test_whole_raster() {
        let mut raster = ramp();
        raster.data_mut()[[0, 0]] = -9999.0;
        let stats = elevation_stats(&raster, None).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 15);
        assert_eq!(stats[0].min, 1.0);
        assert_eq!(stats[0].max, 15.0);
        assert_relative_eq!(stats[0].mean, 8.0);
    }

    #[test]
    fn test_zones() {
        let raster = ramp();
        // North-west 2x2 block: values 0, 1, 4, 5.
        let north_west = Geometry::bbox(0.0, 20.0, 20.0, 40.0, Crs::WEB_MERCATOR);
        // Single pixel centre at (35, 5): value 15.
        let corner = Geometry::bbox(31.0, 1.0, 39.0, 9.0, Crs::WEB_MERCATOR);
        let stats = elevation_stats(&raster, Some(&[north_west, corner][..])).unwrap();
        assert_eq!(stats[0].count, 4);
        assert_relative_eq!(stats[0].mean, 2.5);
        assert_eq!(stats[1].count, 1);
        assert_eq!(stats[1].max, 15.0);
    }

    #[test]
    fn test_empty_zone_reports_index() {
        let raster = ramp();
        let inside = Geometry::bbox(0.0, 0.0, 40.0, 40.0, Crs::WEB_MERCATOR);
        let outside = Geometry::bbox(100.0, 100.0, 200.0, 200.0, Crs::WEB_MERCATOR);
        let result = elevation_stats(&raster, Some(&[inside, outside][..]));
        assert!(matches!(result, Err(TerrainError::NoValidData { zone: Some(1) })));
    }

    #[test]
    fn test_all_nodata() {
        let mut raster = ramp();
        raster.data_mut().fill(-9999.0);
        assert!(matches!(
            elevation_stats(&raster, None),
            Err(TerrainError::NoValidData { zone: None })
        ));
    }
}
