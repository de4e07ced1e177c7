//! Tagged derived rasters.

use std::fmt;
use terrafetch_dem::Raster;

/// Unit of a slope raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SlopeUnits {
    /// Degrees from horizontal.
    #[default]
    Degrees,
    /// Rise over run, times 100.
    Percent,
    /// Rise over run.
    MeterPerMeter,
}

/// The kind of values a [`DerivedRaster`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Product {
    /// Elevation as retrieved.
    Elevation,
    /// Terrain slope.
    Slope(SlopeUnits),
    /// Compass bearing of steepest descent in degrees; -1 on flat cells.
    Aspect,
    /// 8-bit illumination (0 to 255).
    Hillshade,
    /// D8 flow direction codes.
    FlowDirection,
    /// Number of cells draining through each cell, itself included.
    FlowAccumulation,
    /// Elevation with depressions filled.
    FilledElevation,
}

impl Product {
    /// Variable name for the product, e.g. `slope_percent`.
    pub fn name(&self) -> &'static str {
        match self {
            Product::Elevation => "elevation",
            Product::Slope(SlopeUnits::Degrees) => "slope_degrees",
            Product::Slope(SlopeUnits::Percent) => "slope_percent",
            Product::Slope(SlopeUnits::MeterPerMeter) => "slope_m_per_m",
            Product::Aspect => "aspect",
            Product::Hillshade => "hillshade",
            Product::FlowDirection => "flow_direction",
            Product::FlowAccumulation => "flow_accumulation",
            Product::FilledElevation => "filled_elevation",
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raster on the grid of its source, tagged with what it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRaster {
    product: Product,
    raster: Raster,
}

impl DerivedRaster {
    /// Tag `raster` as `product`.
    pub fn new(product: Product, raster: Raster) -> Self {
        Self { product, raster }
    }

    /// Tag `raster` as plain elevation.
    pub fn elevation(raster: Raster) -> Self {
        Self::new(Product::Elevation, raster)
    }

    /// What the raster holds.
    pub fn product(&self) -> Product {
        self.product
    }

    /// The values.
    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Consume, returning the raster.
    pub fn into_raster(self) -> Raster {
        self.raster
    }
}
