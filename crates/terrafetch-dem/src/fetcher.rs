//! Concurrent tile fetching with retry and an overall deadline.
//!
//! ## Concurrency
//!
//! Tiles are fetched on a dedicated rayon pool of `workers` threads. Each
//! worker produces exactly one [`TileResult`], stored at its tile's index, so
//! no shared state is written during the fetch apart from the session
//! counters.
//!
//! ## Failure handling
//!
//! Transient failures are retried up to `max_retries` times with exponential
//! backoff. Permanent failures, exhausted retries, undecodable bodies and
//! shape mismatches are recorded on the tile instead of aborting the request,
//! and so is running out of the request's overall time budget.

use crate::config::ServiceConfig;
use crate::coverage::{CoverageClient, CoverageRequest, Layer};
use crate::error::{TileFailure, TileFetchError};
use crate::geotiff;
use crate::grid::{GridSpec, TileSpec};
use crate::telemetry;
use crate::Result;
use metrics::{counter, histogram};
use ndarray::Array2;
use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Pixels of one successfully fetched tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    /// Values with the tile's shape (rows, columns).
    pub values: Array2<f32>,
    /// The nodata value the service used for this tile, if it declared one.
    pub nodata: Option<f32>,
}

/// The outcome for one tile, tagged with the tile it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TileResult {
    /// The tile that was requested.
    pub tile: TileSpec,
    /// Fetched pixels or the reason the tile failed.
    pub outcome: std::result::Result<TileData, TileFetchError>,
}

impl TileResult {
    /// A successful result.
    pub fn success(tile: TileSpec, data: TileData) -> Self {
        Self {
            tile,
            outcome: Ok(data),
        }
    }

    /// A failed result.
    pub fn failure(tile: TileSpec, attempts: u32, reason: TileFailure) -> Self {
        let error = TileFetchError {
            tile: tile.index,
            attempts,
            reason,
        };
        Self {
            tile,
            outcome: Err(error),
        }
    }

    /// Whether the tile was fetched.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Download statistics for the fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of tiles downloaded this session.
    pub tiles_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
    /// Number of retries issued this session.
    pub retries: u64,
}

/// Fetches tiles from a coverage service.
pub struct TileFetcher<C> {
    client: C,
    config: ServiceConfig,
    pool: rayon::ThreadPool,
    /// Number of tiles downloaded this session (atomic for thread safety).
    tiles_downloaded: AtomicUsize,
    /// Total bytes downloaded this session (atomic for thread safety).
    bytes_downloaded: AtomicU64,
    retries: AtomicU64,
}

impl<C> fmt::Debug for TileFetcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileFetcher")
            .field("endpoint", &self.config.endpoint)
            .field("workers", &self.config.workers)
            .finish()
    }
}

impl<C: CoverageClient> TileFetcher<C> {
    /// Create a fetcher with a pool of `config.workers` threads.
    pub fn new(client: C, config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("tile-fetch-{}", i))
            .build()?;
        Ok(Self {
            client,
            config,
            pool,
            tiles_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Get download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Reset download statistics.
    pub fn reset_download_stats(&self) {
        self.tiles_downloaded.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }

    /// Fetch every tile of `grid`. The result at position `i` belongs to
    /// `tiles[i]`, whatever order the fetches completed in.
    pub fn fetch_all(&self, grid: &GridSpec, layer: Layer, tiles: &[TileSpec]) -> Vec<TileResult> {
        let deadline = Instant::now() + self.config.request_timeout();
        let started = Instant::now();

        let results: Vec<TileResult> = self.pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| self.fetch_tile(grid, layer, tile, deadline))
                .collect()
        });

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            tiles = tiles.len(),
            failed,
            layer = %layer,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched tiles"
        );
        results
    }

    /// Fetch one tile, retrying transient failures until `deadline`.
    pub fn fetch_tile(
        &self,
        grid: &GridSpec,
        layer: Layer,
        tile: &TileSpec,
        deadline: Instant,
    ) -> TileResult {
        let mut attempts = 0u32;
        let mut retry = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return self.record_failure(tile, attempts, TileFailure::DeadlineExceeded);
            }

            let request = CoverageRequest {
                endpoint: self.config.endpoint.clone(),
                layer,
                bbox: tile.bounds,
                width: tile.cols,
                height: tile.rows,
                crs: grid.crs,
                timeout: (deadline - now).min(self.config.attempt_timeout()),
            };

            attempts += 1;
            counter!(telemetry::TILE_REQUESTS).increment(1);
            let request_started = Instant::now();
            let response = self.client.fetch(&request);
            histogram!(telemetry::REQUEST_DURATION).record(request_started.elapsed().as_secs_f64());

            match response {
                Ok(bytes) => {
                    self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
                    self.bytes_downloaded.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    counter!(telemetry::BYTES_DOWNLOADED).increment(bytes.len() as u64);

                    return match decode_tile(tile, &bytes) {
                        Ok(data) => {
                            debug!(tile = tile.index, attempts, bytes = bytes.len(), "Tile fetched");
                            TileResult::success(tile.clone(), data)
                        }
                        Err(reason) => self.record_failure(tile, attempts, reason),
                    };
                }
                Err(failure) if failure.is_transient() && retry < self.config.max_retries => {
                    let delay = self.config.backoff(retry);
                    retry += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    counter!(telemetry::TILE_RETRIES).increment(1);
                    warn!(
                        tile = tile.index,
                        attempt = attempts,
                        error = %failure,
                        delay_ms = delay.as_millis() as u64,
                        "Transient tile failure, retrying"
                    );
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(delay.min(remaining));
                }
                Err(failure) => {
                    return self.record_failure(tile, attempts, TileFailure::Service(failure));
                }
            }
        }
    }

    fn record_failure(&self, tile: &TileSpec, attempts: u32, reason: TileFailure) -> TileResult {
        counter!(telemetry::TILES_FAILED).increment(1);
        warn!(tile = tile.index, attempts, error = %reason, "Tile permanently failed");
        TileResult::failure(tile.clone(), attempts, reason)
    }
}

/// Decode a response body and check it has the tile's pixel dimensions.
///
/// A tile carrying georeferencing must place its corners within half a pixel
/// of the requested window; one without is placed on the requested window.
fn decode_tile(tile: &TileSpec, bytes: &[u8]) -> std::result::Result<TileData, TileFailure> {
    let decoded = geotiff::decode(bytes).map_err(|e| TileFailure::Decode(e.to_string()))?;
    let actual = decoded.dimensions();
    let expected = (tile.cols, tile.rows);
    if actual != expected {
        return Err(TileFailure::ShapeMismatch { expected, actual });
    }

    if let Some(transform) = decoded.transform {
        let (min, max) = (tile.bounds.min(), tile.bounds.max());
        let half_x = (max.x - min.x) / tile.cols as f64 / 2.0;
        let half_y = (max.y - min.y) / tile.rows as f64 / 2.0;
        let east = transform.origin_x + tile.cols as f64 * transform.pixel_width;
        let south = transform.origin_y - tile.rows as f64 * transform.pixel_height;
        let aligned = (transform.origin_x - min.x).abs() <= half_x
            && (east - max.x).abs() <= half_x
            && (transform.origin_y - max.y).abs() <= half_y
            && (south - min.y).abs() <= half_y;
        if !aligned {
            return Err(TileFailure::Misaligned {
                expected: (min.x, max.y),
                actual: (transform.origin_x, transform.origin_y),
            });
        }
    }

    Ok(TileData {
        values: decoded.data,
        nodata: decoded.nodata,
    })
}
