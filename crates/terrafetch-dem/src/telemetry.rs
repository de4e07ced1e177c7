//! Metric names recorded through the `metrics` facade.
//!
//! Nothing is exported unless the application installs a recorder.

use metrics::{describe_counter, describe_histogram, Unit};

/// Tile requests issued (first attempts and retries).
pub const TILE_REQUESTS: &str = "terrafetch.fetch.requests";

/// Retries after a transient failure.
pub const TILE_RETRIES: &str = "terrafetch.fetch.retries";

/// Tiles that ended up permanently failed.
pub const TILES_FAILED: &str = "terrafetch.fetch.tiles_failed";

/// Bytes received from the coverage service.
pub const BYTES_DOWNLOADED: &str = "terrafetch.fetch.bytes_downloaded";

/// Duration of a single request.
pub const REQUEST_DURATION: &str = "terrafetch.fetch.request_duration";

/// Register descriptions for every metric. Call once at startup.
pub fn describe_metrics() {
    describe_counter!(TILE_REQUESTS, Unit::Count, "Tile requests issued to the coverage service");
    describe_counter!(TILE_RETRIES, Unit::Count, "Tile requests retried after a transient failure");
    describe_counter!(TILES_FAILED, Unit::Count, "Tiles recorded as permanently failed");
    describe_counter!(BYTES_DOWNLOADED, Unit::Bytes, "Bytes received from the coverage service");
    describe_histogram!(REQUEST_DURATION, Unit::Seconds, "Duration of a single tile request");
}
