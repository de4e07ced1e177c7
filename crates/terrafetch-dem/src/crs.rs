//! Coordinate reference systems and reprojection.
//!
//! A [`Crs`] is identified by its EPSG code. Reprojection goes through
//! `proj4rs` using a small table of proj strings; codes outside the table are
//! reported as [`DemError::Crs`].

use crate::{DemError, Result};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EPSG code of WGS84 geographic coordinates (longitude/latitude in degrees).
pub const EPSG_WGS84: u32 = 4326;

/// EPSG code of NAD83 geographic coordinates.
pub const EPSG_NAD83: u32 = 4269;

/// EPSG code of Web Mercator.
pub const EPSG_WEB_MERCATOR: u32 = 3857;

/// EPSG code of CONUS Albers Equal Area (NAD83).
pub const EPSG_CONUS_ALBERS: u32 = 5070;

/// A coordinate reference system identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs(u32);

impl Crs {
    /// WGS84 longitude/latitude.
    pub const WGS84: Crs = Crs(EPSG_WGS84);

    /// Web Mercator.
    pub const WEB_MERCATOR: Crs = Crs(EPSG_WEB_MERCATOR);

    /// Create a CRS from an EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self> {
        if proj_string(code).is_none() {
            return Err(DemError::Crs(format!("EPSG:{} is not supported", code)));
        }
        Ok(Self(code))
    }

    /// The EPSG code.
    pub fn epsg(&self) -> u32 {
        self.0
    }

    /// Whether coordinates are in degrees rather than linear units.
    pub fn is_geographic(&self) -> bool {
        matches!(self.0, EPSG_WGS84 | EPSG_NAD83)
    }

    fn proj(&self) -> Result<Proj> {
        let definition = proj_string(self.0)
            .ok_or_else(|| DemError::Crs(format!("EPSG:{} is not supported", self.0)))?;
        Proj::from_proj_string(&definition)
            .map_err(|e| DemError::Crs(format!("invalid projection EPSG:{}: {:?}", self.0, e)))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = DemError;

    /// Parses `EPSG:4326`, `epsg:4326` or a bare `4326`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let code: u32 = code
            .parse()
            .map_err(|_| DemError::Crs(format!("cannot parse CRS '{}'", s)))?;
        Self::from_epsg(code)
    }
}

impl TryFrom<String> for Crs {
    type Error = DemError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

/// Proj definition for the supported EPSG codes.
fn proj_string(code: u32) -> Option<String> {
    match code {
        EPSG_WGS84 => Some("+proj=longlat +datum=WGS84 +no_defs".to_string()),
        EPSG_NAD83 => Some("+proj=longlat +ellps=GRS80 +towgs84=0,0,0 +no_defs".to_string()),
        EPSG_WEB_MERCATOR => Some(
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                .to_string(),
        ),
        EPSG_CONUS_ALBERS => Some(
            "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 +x_0=0 +y_0=0 \
             +ellps=GRS80 +towgs84=0,0,0 +units=m +no_defs"
                .to_string(),
        ),
        // WGS84 / UTM north
        32601..=32660 => Some(format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
            code - 32600
        )),
        // WGS84 / UTM south
        32701..=32760 => Some(format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            code - 32700
        )),
        _ => None,
    }
}

/// Reusable transformation between two CRSs.
pub struct CrsTransformer {
    source: Crs,
    target: Crs,
    projections: Option<(Proj, Proj)>,
}

impl fmt::Debug for CrsTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrsTransformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl CrsTransformer {
    /// Build a transformer from `source` to `target`.
    pub fn new(source: Crs, target: Crs) -> Result<Self> {
        let projections = if source == target {
            None
        } else {
            Some((source.proj()?, target.proj()?))
        };
        Ok(Self {
            source,
            target,
            projections,
        })
    }

    /// Source CRS.
    pub fn source(&self) -> Crs {
        self.source
    }

    /// Target CRS.
    pub fn target(&self) -> Crs {
        self.target
    }

    /// Transform one coordinate. Geographic coordinates are in degrees.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((src, dst)) = &self.projections else {
            return Ok((x, y));
        };

        let mut point = if self.source.is_geographic() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(src, dst, &mut point).map_err(|e| {
            DemError::Crs(format!(
                "failed to transform ({}, {}) from {} to {}: {:?}",
                x, y, self.source, self.target, e
            ))
        })?;

        if self.target.is_geographic() {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_crs() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("epsg:3857".parse::<Crs>().unwrap(), Crs::WEB_MERCATOR);
        assert_eq!("32610".parse::<Crs>().unwrap().epsg(), 32610);
        assert!("EPSG:1234".parse::<Crs>().is_err());
        assert!("wgs84".parse::<Crs>().is_err());
    }

    #[test]
    fn test_identity_transform() {
        let t = CrsTransformer::new(Crs::WGS84, Crs::WGS84).unwrap();
        assert_eq!(t.transform(-122.5, 47.5).unwrap(), (-122.5, 47.5));
    }

    #[test]
    fn test_mercator_roundtrip() {
        let forward = CrsTransformer::new(Crs::WGS84, Crs::WEB_MERCATOR).unwrap();
        let inverse = CrsTransformer::new(Crs::WEB_MERCATOR, Crs::WGS84).unwrap();

        let (x, y) = forward.transform(-122.3321, 47.6062).unwrap();
        // x = R * lon in radians
        assert_relative_eq!(x, 6378137.0 * (-122.3321f64).to_radians(), epsilon = 1e-3);
        assert!(y > 6.0e6 && y < 6.1e6);

        let (lon, lat) = inverse.transform(x, y).unwrap();
        assert_relative_eq!(lon, -122.3321, epsilon = 1e-7);
        assert_relative_eq!(lat, 47.6062, epsilon = 1e-7);
    }
}
