use std::path::Path;

use raster::stats::{self, StreamingStats};
use raster::{RasterDataset, Window, spatial_ref_from_epsg};

use crate::records::RasterMetadata;
use crate::{Error, Result, Settings};

/// Edge sample count when reprojecting source bounds to lat/lon; handles
/// source projections whose edges curve in EPSG:4326.
const BOUNDS_DENSIFY_POINTS: i32 = 21;

/// Drop nodata and non-finite pixels in place, returning how many invalid
/// (non-finite, not-nodata) values were encountered so callers can surface
/// them. A NaN nodata sentinel is covered by the finiteness filter, so NaNs
/// count as nodata rather than invalid there.
fn retain_valid(values: &mut Vec<f64>, nodata: f64) -> usize {
    let invalid = if nodata.is_nan() {
        values.iter().filter(|v| v.is_infinite()).count()
    } else {
        values.iter().filter(|v| !v.is_finite()).count()
    };

    if nodata.is_nan() {
        values.retain(|v| v.is_finite());
    } else {
        values.retain(|v| v.is_finite() && *v != nodata);
    }

    invalid
}

/// Compute the stored metadata for a raster file: bounds in EPSG:4326, the
/// nodata sentinel (0 when the file declares none) and statistics over all
/// valid pixels of band 1.
///
/// Rasters above `settings.large_raster_threshold` pixels stream block by
/// block through a summary and a quantile sketch instead of loading the band
/// into memory; `use_chunks` overrides that choice.
pub fn compute_metadata(
    raster_path: &Path,
    extra_metadata: Option<serde_json::Value>,
    use_chunks: Option<bool>,
    settings: &Settings,
) -> Result<RasterMetadata> {
    let src = RasterDataset::open(raster_path)?;
    let nodata = src.nodata()?.unwrap_or(0.0);

    let wgs84 = spatial_ref_from_epsg(4326)?;
    let bounds = src.bounds_in(&wgs84, BOUNDS_DENSIFY_POINTS)?;

    let use_chunks = use_chunks.unwrap_or_else(|| src.pixel_count() > settings.large_raster_threshold);
    let quantiles = stats::percentile_steps();

    let mut invalid_pixels = 0;
    let value_stats = if use_chunks {
        log::warn!(
            "Processing a large raster file, streaming statistics block by block: {}",
            raster_path.to_string_lossy()
        );

        let mut streaming = StreamingStats::new();
        for window in src.block_windows()? {
            let mut block = src.read_window(1, window, None, None)?;
            invalid_pixels += retain_valid(&mut block, nodata);
            streaming.update(&block);
        }
        streaming.finish(&quantiles)
    } else {
        let window = Window::new(0, 0, src.width(), src.height());
        let mut values = src.read_window(1, window, None, None)?;
        invalid_pixels += retain_valid(&mut values, nodata);
        stats::exact_stats(values, &quantiles)?
    };

    if invalid_pixels > 0 {
        log::warn!(
            "Encountered {} invalid pixel values while reading {}",
            invalid_pixels,
            raster_path.to_string_lossy()
        );
    }

    let value_stats = value_stats.ok_or_else(|| Error::InvalidRaster(raster_path.to_string_lossy().to_string()))?;

    Ok(RasterMetadata {
        bounds,
        nodata,
        range: (value_stats.min, value_stats.max),
        mean: value_stats.mean,
        stdev: value_stats.stdev,
        percentiles: value_stats.percentiles,
        metadata: extra_metadata.unwrap_or(serde_json::Value::Null),
    })
}
