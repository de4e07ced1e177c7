//! Coverage service requests and the HTTP client that performs them.
//!
//! The engine talks to the service only through [`CoverageClient`], so any
//! transport (or a closure, in tests) can stand in for [`ImageServerClient`].
//!
//! ## Layers
//!
//! The 3DEP ImageServer renders derived products server-side through raster
//! functions. [`Layer`] is the closed set it offers; [`Layer::Dem`] is raw
//! elevation.

use crate::config::ServiceConfig;
use crate::crs::Crs;
use crate::error::FetchFailure;
use crate::{DemError, Result};
use geo::Rect;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A server-side product of the elevation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Bare-earth elevation.
    Dem,
    /// Grey hillshade.
    HillshadeGray,
    /// Aspect in degrees.
    AspectDegrees,
    /// Colour-mapped aspect.
    AspectMap,
    /// Grey hillshade with gaps filled from elevation.
    GreyHillshadeElevationFill,
    /// Multidirectional hillshade.
    HillshadeMultidirectional,
    /// Colour-mapped slope.
    SlopeMap,
    /// Slope in degrees.
    SlopeDegrees,
    /// Hillshade tinted by elevation.
    HillshadeElevationTinted,
    /// Height above the ellipsoid.
    HeightEllipsoidal,
    /// 25 m contours.
    Contour25,
    /// Smoothed 25 m contours.
    ContourSmoothed25,
}

impl Layer {
    /// Every layer the service offers.
    pub const ALL: [Layer; 12] = [
        Layer::Dem,
        Layer::HillshadeGray,
        Layer::AspectDegrees,
        Layer::AspectMap,
        Layer::GreyHillshadeElevationFill,
        Layer::HillshadeMultidirectional,
        Layer::SlopeMap,
        Layer::SlopeDegrees,
        Layer::HillshadeElevationTinted,
        Layer::HeightEllipsoidal,
        Layer::Contour25,
        Layer::ContourSmoothed25,
    ];

    /// Name the service uses for this layer.
    pub fn service_name(&self) -> &'static str {
        match self {
            Layer::Dem => "DEM",
            Layer::HillshadeGray => "Hillshade Gray",
            Layer::AspectDegrees => "Aspect Degrees",
            Layer::AspectMap => "Aspect Map",
            Layer::GreyHillshadeElevationFill => "GreyHillshade_elevationFill",
            Layer::HillshadeMultidirectional => "Hillshade Multidirectional",
            Layer::SlopeMap => "Slope Map",
            Layer::SlopeDegrees => "Slope Degrees",
            Layer::HillshadeElevationTinted => "Hillshade Elevation Tinted",
            Layer::HeightEllipsoidal => "Height Ellipsoidal",
            Layer::Contour25 => "Contour 25",
            Layer::ContourSmoothed25 => "Contour Smoothed 25",
        }
    }

    /// Variable name for the layer's data, e.g. `slope_degrees`.
    pub fn var_name(&self) -> String {
        match self {
            Layer::Dem => "elevation".to_string(),
            other => other.service_name().replace(' ', "_").to_lowercase(),
        }
    }

    /// Raster function to request, `None` for plain elevation.
    fn raster_function(&self) -> Option<&'static str> {
        match self {
            Layer::Dem => None,
            other => Some(other.service_name()),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

impl FromStr for Layer {
    type Err = DemError;

    fn from_str(s: &str) -> Result<Self> {
        Layer::ALL
            .iter()
            .copied()
            .find(|layer| layer.service_name() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Layer::ALL.iter().map(Layer::service_name).collect();
                DemError::Config(format!(
                    "unknown layer '{}', valid layers are: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// One request to the coverage service.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRequest {
    /// Service endpoint.
    pub endpoint: String,
    /// Layer to render.
    pub layer: Layer,
    /// Requested extent in `crs`.
    pub bbox: Rect<f64>,
    /// Requested width in pixels.
    pub width: usize,
    /// Requested height in pixels.
    pub height: usize,
    /// CRS of `bbox` and of the returned raster.
    pub crs: Crs,
    /// Time allowed for this request.
    pub timeout: Duration,
}

impl CoverageRequest {
    /// Query parameters for an ArcGIS ImageServer `exportImage` call.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let (min, max) = (self.bbox.min(), self.bbox.max());
        let mut params = vec![
            ("bbox", format!("{},{},{},{}", min.x, min.y, max.x, max.y)),
            ("bboxSR", self.crs.epsg().to_string()),
            ("imageSR", self.crs.epsg().to_string()),
            ("size", format!("{},{}", self.width, self.height)),
            ("format", "tiff".to_string()),
            ("pixelType", "F32".to_string()),
            ("noDataInterpretation", "esriNoDataMatchAny".to_string()),
            ("interpolation", "RSP_BilinearInterpolation".to_string()),
            ("f", "image".to_string()),
        ];
        if let Some(function) = self.layer.raster_function() {
            params.push((
                "renderingRule",
                serde_json::json!({ "rasterFunction": function }).to_string(),
            ));
        }
        params
    }
}

/// The network-query collaborator: turns a request into raw raster bytes.
pub trait CoverageClient: Send + Sync {
    /// Perform one request. Retrying is the caller's job.
    fn fetch(&self, request: &CoverageRequest) -> std::result::Result<Vec<u8>, FetchFailure>;
}

impl<F> CoverageClient for F
where
    F: Fn(&CoverageRequest) -> std::result::Result<Vec<u8>, FetchFailure> + Send + Sync,
{
    fn fetch(&self, request: &CoverageRequest) -> std::result::Result<Vec<u8>, FetchFailure> {
        self(request)
    }
}

/// Blocking HTTP client for ArcGIS ImageServer `exportImage` endpoints.
pub struct ImageServerClient {
    client: reqwest::blocking::Client,
}

impl fmt::Debug for ImageServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageServerClient").finish_non_exhaustive()
    }
}

impl ImageServerClient {
    /// Build a client with the user agent and request timeout of `config`.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.attempt_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

impl CoverageClient for ImageServerClient {
    fn fetch(&self, request: &CoverageRequest) -> std::result::Result<Vec<u8>, FetchFailure> {
        let response = self
            .client
            .get(&request.endpoint)
            .query(&request.query_params())
            .timeout(request.timeout)
            .send()
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Http {
                status: status.as_u16(),
            });
        }

        // The service reports some errors as 200 with a JSON or HTML body
        let is_text = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/") || ct.contains("json"));

        let bytes = response.bytes().map_err(classify)?;
        if is_text {
            let preview: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
            return Err(FetchFailure::Malformed(preview));
        }
        Ok(bytes.to_vec())
    }
}

fn classify(err: reqwest::Error) -> FetchFailure {
    if err.is_timeout() {
        FetchFailure::Timeout
    } else if let Some(status) = err.status() {
        FetchFailure::Http {
            status: status.as_u16(),
        }
    } else {
        FetchFailure::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Coord;

    #[test]
    fn test_layer_names() {
        assert_eq!(Layer::Dem.var_name(), "elevation");
        assert_eq!(Layer::SlopeDegrees.var_name(), "slope_degrees");
        assert_eq!(
            Layer::GreyHillshadeElevationFill.var_name(),
            "greyhillshade_elevationfill"
        );
        assert_eq!("Aspect Degrees".parse::<Layer>().unwrap(), Layer::AspectDegrees);
        assert!("slope".parse::<Layer>().is_err());
    }

    #[test]
    fn test_query_params() {
        let request = CoverageRequest {
            endpoint: "http://example.test/exportImage".to_string(),
            layer: Layer::SlopeDegrees,
            bbox: Rect::new(Coord { x: 0.0, y: 10.0 }, Coord { x: 100.0, y: 60.0 }),
            width: 10,
            height: 5,
            crs: Crs::WEB_MERCATOR,
            timeout: Duration::from_secs(5),
        };
        let params = request.query_params();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("bbox"), Some("0,10,100,60"));
        assert_eq!(get("size"), Some("10,5"));
        assert_eq!(get("bboxSR"), Some("3857"));
        assert_eq!(get("renderingRule"), Some(r#"{"rasterFunction":"Slope Degrees"}"#));

        let dem = CoverageRequest {
            layer: Layer::Dem,
            ..request
        };
        assert!(dem.query_params().iter().all(|(k, _)| *k != "renderingRule"));
    }
}
