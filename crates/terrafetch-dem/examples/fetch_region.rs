//! Example: fetch elevation for a lon/lat box from the USGS 3DEP service.
//!
//! Usage: cargo run --example fetch_region -- <min_lon> <min_lat> <max_lon> <max_lat> <resolution_m> [out.tif]
//!
//! The box is reprojected to CONUS Albers and fetched at the given resolution.
//! Set `RUST_LOG=terrafetch_dem=debug` to see per-tile progress.

use std::env;
use std::time::Instant;
use terrafetch_dem::{describe_metrics, Crs, ElevationService, Geometry, ServiceConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    describe_metrics();

    let args: Vec<String> = env::args().collect();
    if args.len() < 6 {
        eprintln!("Usage: {} <min_lon> <min_lat> <max_lon> <max_lat> <resolution_m> [out.tif]", args[0]);
        eprintln!("Example: {} -122.35 47.60 -122.30 47.63 10 seattle.tif", args[0]);
        std::process::exit(1);
    }

    let coords: Vec<f64> = args[1..5]
        .iter()
        .map(|a| a.parse().expect("Invalid coordinate"))
        .collect();
    let resolution: f64 = args[5].parse().expect("Invalid resolution");
    let output = args.get(6).map(|s| s.as_str()).unwrap_or("elevation.tif");

    let area = Geometry::bbox(coords[0], coords[1], coords[2], coords[3], Crs::WGS84);
    let albers: Crs = "EPSG:5070".parse().expect("CONUS Albers is supported");

    let service = ElevationService::new(ServiceConfig::default()).expect("Failed to create service");
    let (grid, tiles) = service
        .plan(&area, resolution, Some(albers), None)
        .expect("Failed to plan request");
    println!("Grid: {}x{} pixels in {} tile(s)", grid.cols, grid.rows, tiles.len());

    let start = Instant::now();
    let mosaic = match service.get_elevation(&area, resolution, Some(albers), None) {
        Ok(mosaic) => mosaic,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stats = service.download_stats();
    println!(
        "Fetched {} tile(s), {:.1} MB in {:.2}s ({} retries)",
        stats.tiles_downloaded,
        stats.bytes_downloaded as f64 / 1_048_576.0,
        start.elapsed().as_secs_f64(),
        stats.retries
    );

    if !mosaic.is_complete() {
        for region in &mosaic.coverage().failed {
            eprintln!("Missing: {}", region.error);
        }
    }

    let raster = mosaic.raster();
    println!("Valid pixels: {} of {}", raster.valid_count(), grid.pixel_count());
    terrafetch_dem::write_geotiff(raster, output).expect("Failed to write GeoTIFF");
    println!("Wrote {}", output);
}
