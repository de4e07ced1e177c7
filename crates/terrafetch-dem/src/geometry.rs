//! Query geometries.

use crate::crs::{Crs, CrsTransformer};
use crate::{DemError, Result};
use geo::{BoundingRect, Coord, Intersects, LineString, MultiPolygon, Point, Polygon, Rect};

/// Number of points each polygon edge is split into before reprojection, so
/// the reprojected outline still encloses curved edges.
const DENSIFY_STEPS: usize = 16;

/// The shape of a query geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// An axis-aligned bounding box.
    BoundingBox(Rect<f64>),
    /// A single polygon.
    Polygon(Polygon<f64>),
    /// Several polygons treated as one area.
    MultiPolygon(MultiPolygon<f64>),
}

/// A shape together with the CRS its coordinates are expressed in.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    shape: Shape,
    crs: Crs,
}

impl Geometry {
    /// Create a geometry from a shape.
    pub fn new(shape: Shape, crs: Crs) -> Self {
        Self { shape, crs }
    }

    /// A bounding box given as (min_x, min_y, max_x, max_y).
    pub fn bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: Crs) -> Self {
        let rect = Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y });
        Self::new(Shape::BoundingBox(rect), crs)
    }

    /// A polygon.
    pub fn polygon(polygon: Polygon<f64>, crs: Crs) -> Self {
        Self::new(Shape::Polygon(polygon), crs)
    }

    /// The shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// The CRS of the coordinates.
    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// Bounding box of the geometry.
    ///
    /// Fails with [`DemError::InvalidGeometry`] for empty geometries, non-finite
    /// coordinates, and boxes without area.
    pub fn bounding_box(&self) -> Result<Rect<f64>> {
        let rect = match &self.shape {
            Shape::BoundingBox(rect) => Some(*rect),
            Shape::Polygon(polygon) => polygon.bounding_rect(),
            Shape::MultiPolygon(multi) => multi.bounding_rect(),
        }
        .ok_or_else(|| DemError::InvalidGeometry("geometry is empty".to_string()))?;

        let (min, max) = (rect.min(), rect.max());
        if ![min.x, min.y, max.x, max.y].iter().all(|v| v.is_finite()) {
            return Err(DemError::InvalidGeometry(
                "geometry has non-finite coordinates".to_string(),
            ));
        }
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return Err(DemError::InvalidGeometry(format!(
                "bounding box ({}, {}, {}, {}) has zero area",
                min.x, min.y, max.x, max.y
            )));
        }
        Ok(rect)
    }

    /// Bounding box expanded by `buffer` (in CRS units) on every side.
    pub fn buffered_bounds(&self, buffer: f64) -> Result<Rect<f64>> {
        if !buffer.is_finite() || buffer < 0.0 {
            return Err(DemError::InvalidGeometry(format!(
                "buffer must be a non-negative finite distance, got {}",
                buffer
            )));
        }
        let rect = self.bounding_box()?;
        Ok(Rect::new(
            Coord {
                x: rect.min().x - buffer,
                y: rect.min().y - buffer,
            },
            Coord {
                x: rect.max().x + buffer,
                y: rect.max().y + buffer,
            },
        ))
    }

    /// Whether the point lies inside or on the boundary of the geometry.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        let point = Point::new(x, y);
        match &self.shape {
            Shape::BoundingBox(rect) => rect.intersects(&point),
            Shape::Polygon(polygon) => polygon.intersects(&point),
            Shape::MultiPolygon(multi) => multi.intersects(&point),
        }
    }

    /// Reproject into `target`. Edges are densified first; bounding boxes
    /// become polygons unless the CRS is unchanged.
    pub fn to_crs(&self, target: Crs) -> Result<Geometry> {
        if target == self.crs {
            return Ok(self.clone());
        }
        let transformer = CrsTransformer::new(self.crs, target)?;

        let shape = match &self.shape {
            Shape::BoundingBox(rect) => {
                Shape::Polygon(reproject_polygon(&rect.to_polygon(), &transformer)?)
            }
            Shape::Polygon(polygon) => Shape::Polygon(reproject_polygon(polygon, &transformer)?),
            Shape::MultiPolygon(multi) => Shape::MultiPolygon(MultiPolygon::new(
                multi
                    .iter()
                    .map(|p| reproject_polygon(p, &transformer))
                    .collect::<Result<Vec<_>>>()?,
            )),
        };

        Ok(Geometry::new(shape, target))
    }
}

fn reproject_polygon(polygon: &Polygon<f64>, transformer: &CrsTransformer) -> Result<Polygon<f64>> {
    let exterior = reproject_ring(polygon.exterior(), transformer)?;
    let interiors = polygon
        .interiors()
        .iter()
        .map(|ring| reproject_ring(ring, transformer))
        .collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn reproject_ring(ring: &LineString<f64>, transformer: &CrsTransformer) -> Result<LineString<f64>> {
    let mut coords = Vec::with_capacity(ring.0.len() * DENSIFY_STEPS);
    for line in ring.lines() {
        for step in 0..DENSIFY_STEPS {
            let t = step as f64 / DENSIFY_STEPS as f64;
            let x = line.start.x + (line.end.x - line.start.x) * t;
            let y = line.start.y + (line.end.y - line.start.y) * t;
            let (tx, ty) = transformer.transform(x, y)?;
            coords.push(Coord { x: tx, y: ty });
        }
    }
    if let Some(last) = ring.0.last() {
        let (tx, ty) = transformer.transform(last.x, last.y)?;
        coords.push(Coord { x: tx, y: ty });
    }
    Ok(LineString::new(coords))
}
