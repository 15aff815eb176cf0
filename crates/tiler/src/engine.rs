use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use metastore::{KeySelection, MetadataDriver, Settings, normalize_keys};
use raster::{Affine, Bounds, RasterDataset, Resampling, VrtOptions, WarpedVrt, spatial_ref_from_epsg, suggested_warp_output};

use crate::tilecache::{CacheKey, TileCache};
use crate::{Error, Result, TileGrid};

const WEB_MERCATOR_EPSG: u32 = 3857;

/// Requests covering less than this share of the source raster are rejected
/// instead of warping an almost empty tile.
const MIN_WINDOW_RATIO: f64 = 0.001;

/// Below this share the configured kernel aliases badly at far-out zoom
/// levels; reads drop to average resampling instead.
const AVERAGE_RESAMPLING_RATIO: f64 = 0.1;

/// Resampling actually used for a read, given the configured method and the
/// share of the tile covered by source pixels.
pub fn effective_resampling(configured: Resampling, window_ratio: f64) -> Resampling {
    if window_ratio < AVERAGE_RESAMPLING_RATIO && configured != Resampling::Nearest {
        Resampling::Average
    } else {
        configured
    }
}

/// Options for [`TileEngine::get_raster_tile`].
#[derive(Debug, Clone, Copy)]
pub struct TileOptions {
    /// `(west, south, east, north)` in EPSG:3857. The whole raster footprint
    /// when absent.
    pub bounds: Option<Bounds>,
    /// Output shape `(width, height)`.
    pub tilesize: (usize, usize),
    /// Nodata sentinel applied to the source and the warped output.
    pub nodata: f64,
}

impl Default for TileOptions {
    fn default() -> Self {
        TileOptions {
            bounds: None,
            tilesize: (256, 256),
            nodata: 0.0,
        }
    }
}

/// Produces Web Mercator pixel tiles for datasets resolved through a
/// metadata driver, memoizing decoded tiles in a byte-budgeted LRU.
pub struct TileEngine {
    driver: Arc<dyn MetadataDriver>,
    cache: TileCache,
    settings: Settings,
}

impl TileEngine {
    pub fn new(driver: Arc<dyn MetadataDriver>, settings: Settings) -> Self {
        TileEngine {
            cache: TileCache::new(settings.raster_cache_size),
            driver,
            settings,
        }
    }

    pub fn driver(&self) -> &Arc<dyn MetadataDriver> {
        &self.driver
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Load the tile for a dataset key selection. Identical requests are
    /// served from the cache without touching the raster again; the returned
    /// buffer is shared and must not be mutated.
    pub fn get_raster_tile(&self, keys: &KeySelection, options: &TileOptions) -> Result<Arc<TileGrid>> {
        let schema = self.driver.available_keys()?;
        let keys = normalize_keys(&schema, keys)?;
        if keys.len() != schema.len() {
            return Err(Error::InvalidArgument(format!(
                "Got {} keys, expected {}",
                keys.len(),
                schema.len()
            )));
        }

        let cache_key = CacheKey::new(&keys, options.bounds, options.tilesize, options.nodata);
        if let Some(hit) = self.cache.get(&cache_key) {
            log::debug!("Tile cache hit for {}", keys.join("/"));
            return Ok(hit);
        }

        let grid = Arc::new(self.read_tile(&schema, &keys, options)?);
        self.cache.insert(cache_key, Arc::clone(&grid));

        Ok(grid)
    }

    fn resolve_path(&self, schema: &[String], keys: &[String]) -> Result<String> {
        let filter: HashMap<String, String> = schema.iter().cloned().zip(keys.iter().cloned()).collect();
        let mut datasets = self.driver.get_datasets(Some(&filter), 0, None)?;

        match datasets.pop() {
            Some((_, path)) => Ok(path),
            None => Err(Error::Metadata(metastore::Error::UnknownDataset(keys.join("/")))),
        }
    }

    fn read_tile(&self, schema: &[String], keys: &[String], options: &TileOptions) -> Result<TileGrid> {
        let start = Instant::now();

        let _scope = self.driver.connect()?;
        let path = self.resolve_path(schema, keys)?;

        let src = RasterDataset::open(Path::new(&path))?;
        let web_mercator = spatial_ref_from_epsg(WEB_MERCATOR_EPSG)?;

        // default warp target covering exactly the source footprint
        let default_output = suggested_warp_output(&src, &web_mercator)?;
        let default_bounds = default_output.bounds();

        // grow the footprint to cover the requested tile, preserving the
        // default pixel size
        let (vrt_transform, vrt_width, vrt_height) = match &options.bounds {
            Some(bounds) => {
                let union = default_bounds.union(bounds);
                let width = (union.width() / default_output.transform.a).ceil() as usize;
                let height = ((union.south - union.north) / default_output.transform.e).ceil() as usize;
                (Affine::from_bounds(&union, width, height), width, height)
            }
            None => (default_output.transform, default_output.width, default_output.height),
        };

        let vrt = WarpedVrt::new(
            src,
            &web_mercator,
            &VrtOptions {
                resampling: self.settings.resampling_method,
                transform: vrt_transform,
                width: vrt_width,
                height: vrt_height,
                src_nodata: options.nodata,
                dst_nodata: options.nodata,
                init_dest_nodata: true,
            },
        )?;

        let window_bounds = options.bounds.unwrap_or(default_bounds);
        let out_window = vrt_transform.window(&window_bounds);

        // share of the tile covered by source pixels
        let window_ratio =
            (default_output.width as f64 / out_window.width) * (default_output.height as f64 / out_window.height);
        if window_ratio < MIN_WINDOW_RATIO {
            return Err(Error::TileOutOfBounds(format!(
                "data covers less than 0.1% of the tile for {}",
                keys.join("/")
            )));
        }

        let resampling = effective_resampling(self.settings.resampling_method, window_ratio);
        if resampling != self.settings.resampling_method {
            log::warn!(
                "Source covers only {:.1}% of the tile for {}, reading with average resampling instead of {}",
                window_ratio * 100.0,
                keys.join("/"),
                self.settings.resampling_method,
            );
        }

        let (width, height) = options.tilesize;
        let data = vrt.read_window(1, out_window.round(), Some((width, height)), Some(resampling))?;
        // the read contract guarantees the requested output shape
        assert_eq!(data.len(), width * height);

        log::debug!(
            "Tile {} ({}x{}, {}) took {}ms",
            keys.join("/"),
            width,
            height,
            resampling,
            start.elapsed().as_millis(),
        );

        TileGrid::new(width, height, data)
    }
}

#[cfg(test)]
mod tests {
    use metastore::{InsertOptions, KeyDescription, SqliteDriver};
    use raster::testutils::TestRaster;
    use test_log::test;

    use super::*;

    const NODATA: f64 = -9999.0;

    // fixture raster footprint under the testutils transform: 100 m pixels
    // starting at (0, 1_000_000)
    fn fixture_bounds(width: usize, height: usize) -> Bounds {
        Bounds::new(0.0, 1_000_000.0 - 100.0 * height as f64, 100.0 * width as f64, 1_000_000.0)
    }

    fn engine_with_dataset(dir: &std::path::Path, values: Vec<f64>, width: usize, height: usize) -> TileEngine {
        let raster_path = dir.join("img.tif");
        TestRaster::with_values(width, height, values)
            .nodata(NODATA)
            .write(&raster_path)
            .expect("write raster");

        let driver = SqliteDriver::open(dir.join("tc.sqlite"), &Settings::default());
        driver.create(&[KeyDescription::new("name")]).expect("create");
        {
            let _scope = driver.connect().expect("connect");
            driver
                .insert(
                    &["img".to_string()],
                    raster_path.to_str().expect("utf-8 path"),
                    &InsertOptions {
                        skip_metadata: true,
                        ..Default::default()
                    },
                )
                .expect("insert");
        }

        TileEngine::new(Arc::new(driver), Settings::default())
    }

    #[test]
    fn tile_has_requested_shape() -> Result {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_dataset(dir.path(), vec![5.0; 64 * 64], 64, 64);

        for tilesize in [(256, 256), (64, 64), (100, 30)] {
            let tile = engine.get_raster_tile(
                &KeySelection::ordered(["img"]),
                &TileOptions {
                    bounds: Some(fixture_bounds(64, 64)),
                    tilesize,
                    nodata: NODATA,
                },
            )?;
            assert_eq!(tile.shape(), tilesize);
            assert!(tile.data().iter().all(|&v| v == 5.0));
        }

        Ok(())
    }

    #[test]
    fn whole_raster_without_bounds() -> Result {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_dataset(dir.path(), vec![2.0; 32 * 32], 32, 32);

        let tile = engine.get_raster_tile(&KeySelection::ordered(["img"]), &TileOptions::default())?;
        assert_eq!(tile.shape(), (256, 256));
        assert!(tile.data().iter().all(|&v| v == 2.0));

        Ok(())
    }

    #[test]
    fn identical_requests_are_served_from_cache() -> Result {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_dataset(dir.path(), vec![1.0; 32 * 32], 32, 32);

        let options = TileOptions {
            bounds: Some(fixture_bounds(32, 32)),
            tilesize: (64, 64),
            nodata: NODATA,
        };

        let first = engine.get_raster_tile(&KeySelection::ordered(["img"]), &options)?;

        // removing the file proves the second request never touches the
        // raster layer
        std::fs::remove_file(dir.path().join("img.tif")).expect("remove raster");

        let second = engine.get_raster_tile(&KeySelection::ordered(["img"]), &options)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cache().len(), 1);

        // a different tilesize is a different cache entry and must fail now
        let miss = engine.get_raster_tile(
            &KeySelection::ordered(["img"]),
            &TileOptions {
                tilesize: (32, 32),
                ..options
            },
        );
        assert!(miss.is_err());

        Ok(())
    }

    #[test]
    fn far_away_bounds_are_out_of_bounds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_dataset(dir.path(), vec![1.0; 32 * 32], 32, 32);

        let result = engine.get_raster_tile(
            &KeySelection::ordered(["img"]),
            &TileOptions {
                bounds: Some(Bounds::new(-10_000_000.0, -10_000_000.0, 10_000_000.0, 10_000_000.0)),
                tilesize: (256, 256),
                nodata: NODATA,
            },
        );

        assert!(matches!(result, Err(Error::TileOutOfBounds(_))));
    }

    #[test]
    fn bounds_outside_footprint_fill_with_nodata() -> Result {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_dataset(dir.path(), vec![7.0; 64 * 64], 64, 64);

        // western half of the request lies outside the raster
        let raster_bounds = fixture_bounds(64, 64);
        let request = Bounds::new(
            raster_bounds.west - raster_bounds.width(),
            raster_bounds.south,
            raster_bounds.east,
            raster_bounds.north,
        );

        let tile = engine.get_raster_tile(
            &KeySelection::ordered(["img"]),
            &TileOptions {
                bounds: Some(request),
                tilesize: (64, 64),
                nodata: NODATA,
            },
        )?;

        for row in tile.rows() {
            assert!(row[..32].iter().all(|&v| v == NODATA));
            assert!(row[32..].iter().all(|&v| v == 7.0));
        }

        Ok(())
    }

    #[test]
    fn unknown_key_name_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_dataset(dir.path(), vec![1.0; 16 * 16], 16, 16);

        let selection = KeySelection::Named(HashMap::from([("layer".to_string(), "img".to_string())]));
        let result = engine.get_raster_tile(&selection, &TileOptions::default());
        assert!(matches!(result, Err(Error::Metadata(metastore::Error::UnknownKey(_)))));
    }

    #[test]
    fn missing_dataset_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_dataset(dir.path(), vec![1.0; 16 * 16], 16, 16);

        let result = engine.get_raster_tile(&KeySelection::ordered(["nope"]), &TileOptions::default());
        assert!(matches!(result, Err(Error::Metadata(metastore::Error::UnknownDataset(_)))));
    }

    #[test]
    fn resampling_downgrades_only_at_low_coverage() {
        assert_eq!(effective_resampling(Resampling::Linear, 0.05), Resampling::Average);
        assert_eq!(effective_resampling(Resampling::Linear, 0.5), Resampling::Linear);
        assert_eq!(effective_resampling(Resampling::Cubic, 0.09), Resampling::Average);
        assert_eq!(effective_resampling(Resampling::Nearest, 0.05), Resampling::Nearest);
        assert_eq!(effective_resampling(Resampling::Average, 0.5), Resampling::Average);
    }
}
