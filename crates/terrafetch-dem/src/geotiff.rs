//! GeoTIFF decoding of service responses and encoding of output rasters.

use crate::crs::{Crs, EPSG_NAD83, EPSG_WGS84};
use crate::raster::{GeoTransform, Raster};
use crate::{DemError, Result};
use ndarray::Array2;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

/// A raster decoded from GeoTIFF bytes, before it is placed on a grid.
#[derive(Debug, Clone)]
pub struct DecodedRaster {
    /// Pixel values, row-major.
    pub data: Array2<f32>,
    /// Nodata value from the GDAL_NODATA tag, if present.
    pub nodata: Option<f32>,
    /// Transform from ModelTiepoint/ModelPixelScale, if present.
    pub transform: Option<GeoTransform>,
    /// EPSG code from the GeoKey directory, if present.
    pub epsg: Option<u32>,
}

impl DecodedRaster {
    /// (columns, rows).
    pub fn dimensions(&self) -> (usize, usize) {
        let (rows, cols) = self.data.dim();
        (cols, rows)
    }
}

/// Decode a single-band GeoTIFF held in memory.
pub fn decode(bytes: &[u8]) -> Result<DecodedRaster> {
    decode_from(Cursor::new(bytes))
}

/// Read a single-band GeoTIFF file into a [`Raster`].
///
/// Files without georeferencing or a supported EPSG code are rejected.
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let path = path.as_ref();
    let decoded = decode_from(std::fs::File::open(path)?)?;
    let transform = decoded.transform.ok_or_else(|| {
        DemError::GridMismatch(format!("{} has no georeferencing tags", path.display()))
    })?;
    let crs = match decoded.epsg {
        Some(code) => Crs::from_epsg(code)?,
        None => {
            return Err(DemError::Crs(format!("{} has no EPSG code", path.display())));
        }
    };
    let nodata = decoded.nodata.unwrap_or(f32::NAN);
    Ok(Raster::new(decoded.data, transform, crs, nodata))
}

fn decode_from<R: Read + Seek>(reader: R) -> Result<DecodedRaster> {
    let mut decoder = Decoder::new(reader)?;

    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.ifd_value_size = 1024 * 1024 * 1024;
    decoder = decoder.with_limits(limits);

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let transform = read_transform(&mut decoder);
    let nodata = read_nodata_value(&mut decoder);
    let epsg = read_epsg(&mut decoder);

    let values = decode_samples(&mut decoder)?;
    if values.len() != width * height {
        return Err(DemError::GridMismatch(format!(
            "expected a single band of {}x{} samples, found {} samples",
            width,
            height,
            values.len()
        )));
    }
    let data = Array2::from_shape_vec((height, width), values)
        .map_err(|e| DemError::GridMismatch(e.to_string()))?;

    Ok(DecodedRaster {
        data,
        nodata,
        transform,
        epsg,
    })
}

fn decode_samples<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
    let result = decoder.read_image()?;

    match result {
        DecodingResult::F32(data) => Ok(data),
        DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
    }
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT)).ok()?;
    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE)).ok()?;
    if tiepoint.len() < 6 || scale.len() < 2 {
        return None;
    }

    // Tiepoint format: [i, j, k, x, y, z] where (i,j) is pixel coords and (x,y) is geo coords
    let (i, j, tie_x, tie_y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    let (scale_x, scale_y) = (scale[0], scale[1]);

    Some(GeoTransform {
        origin_x: tie_x - i * scale_x,
        origin_y: tie_y + j * scale_y,
        pixel_width: scale_x,
        pixel_height: scale_y,
    })
}

fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    // GDAL_NODATA is stored as an ASCII string
    let text = decoder.get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA)).ok()?;
    let text = text.trim_matches(char::from(0)).trim();
    match text {
        "nan" | "NaN" | "-nan" => Some(f32::NAN),
        other => other.parse().ok(),
    }
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY)).ok()?;
    // Header is 4 shorts, followed by (key, location, count, value) entries.
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| {
            (entry[0] == KEY_PROJECTED_CS_TYPE || entry[0] == KEY_GEOGRAPHIC_TYPE) && entry[1] == 0
        })
        .map(|entry| u32::from(entry[3]))
}

/// Encode a raster as a Float32 GeoTIFF in memory.
pub fn encode(raster: &Raster) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    encode_into(raster, &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Write a raster to disk as a Float32 GeoTIFF.
pub fn write_geotiff<P: AsRef<Path>>(raster: &Raster, path: P) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    encode_into(raster, &mut file)
}

fn encode_into<W: Write + Seek>(raster: &Raster, writer: &mut W) -> Result<()> {
    let (cols, rows) = raster.dimensions();
    let transform = raster.transform();
    let geo_keys = geo_key_directory(raster.crs());
    let nodata = if raster.nodata().is_nan() {
        "nan".to_string()
    } else {
        raster.nodata().to_string()
    };

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(cols as u32, rows as u32)?;
    image.encoder().write_tag(
        Tag::Unknown(TAG_MODEL_PIXEL_SCALE),
        &[transform.pixel_width, transform.pixel_height, 0.0][..],
    )?;
    image.encoder().write_tag(
        Tag::Unknown(TAG_MODEL_TIEPOINT),
        &[0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0][..],
    )?;
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &geo_keys[..])?;
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_GDAL_NODATA), nodata.as_str())?;

    let samples: Vec<f32> = raster.data().iter().copied().collect();
    image.write_data(&samples)?;
    Ok(())
}

fn geo_key_directory(crs: Crs) -> Vec<u16> {
    let geographic = matches!(crs.epsg(), EPSG_WGS84 | EPSG_NAD83);
    let (model_type, cs_key) = if geographic {
        (2, KEY_GEOGRAPHIC_TYPE)
    } else {
        (1, KEY_PROJECTED_CS_TYPE)
    };
    // EPSG codes in the supported table all fit in u16
    let code = u16::try_from(crs.epsg()).unwrap_or(u16::MAX);
    vec![
        1, 1, 0, 3, // version 1.1.0, three keys
        KEY_MODEL_TYPE, 0, 1, model_type,
        KEY_RASTER_TYPE, 0, 1, 1, // PixelIsArea
        cs_key, 0, 1, code,
    ]
}
