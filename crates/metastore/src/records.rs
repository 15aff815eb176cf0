use raster::Bounds;

/// Everything `compute_metadata` derives from a raster file: lat/lon bounds,
/// the nodata sentinel and the value statistics, plus the caller supplied
/// opaque metadata blob.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    /// `(west, south, east, north)` in EPSG:4326.
    pub bounds: Bounds,
    pub nodata: f64,
    /// Valid-value range `(min, max)`.
    pub range: (f64, f64),
    pub mean: f64,
    pub stdev: f64,
    /// Quantiles at 0.01..0.99, non-decreasing, 99 entries.
    pub percentiles: Vec<f64>,
    pub metadata: serde_json::Value,
}

/// A stored dataset row. `raster` is absent for rows ingested with
/// `skip_metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub keys: Vec<String>,
    pub path: String,
    pub raster: Option<RasterMetadata>,
}
