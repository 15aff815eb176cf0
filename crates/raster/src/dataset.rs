use std::path::{Path, PathBuf};

use gdal::errors::GdalError;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};

use crate::{Affine, Bounds, Error, Resampling, Result, Window};

/// Spatial reference for an EPSG code with lon/lat axis order, so bounds
/// arrays keep the (west, south, east, north) layout regardless of the
/// authority definition.
pub fn spatial_ref_from_epsg(epsg: u32) -> Result<SpatialRef> {
    let srs = SpatialRef::from_epsg(epsg)?;
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

/// Read-only handle to a single raster file.
///
/// All statistics and tile reads operate on band 1, the single band contract
/// of the metadata index.
pub struct RasterDataset {
    ds: gdal::Dataset,
    path: PathBuf,
}

impl RasterDataset {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = gdal::DatasetOptions {
            open_flags: gdal::GdalOpenFlags::GDAL_OF_READONLY | gdal::GdalOpenFlags::GDAL_OF_RASTER,
            ..Default::default()
        };

        let ds = gdal::Dataset::open_ex(path, options).map_err(|err| match err {
            // Cleaner error message when the file simply is not there
            GdalError::NullPointer { .. } if !path.exists() => Error::InvalidPath(PathBuf::from(path)),
            _ => Error::Runtime(format!("Failed to open raster dataset: {} ({})", path.to_string_lossy(), err)),
        })?;

        Ok(RasterDataset {
            ds,
            path: PathBuf::from(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> usize {
        self.ds.raster_size().0
    }

    pub fn height(&self) -> usize {
        self.ds.raster_size().1
    }

    pub fn pixel_count(&self) -> usize {
        self.width() * self.height()
    }

    pub fn affine(&self) -> Result<Affine> {
        Ok(Affine::from_gdal(&self.ds.geo_transform()?))
    }

    pub fn spatial_ref(&self) -> Result<SpatialRef> {
        let srs = self.ds.spatial_ref()?;
        srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        Ok(srs)
    }

    /// Nodata sentinel of band 1, if the file declares one.
    pub fn nodata(&self) -> Result<Option<f64>> {
        Ok(self.ds.rasterband(1)?.no_data_value())
    }

    /// Bounds in the raster's native CRS.
    pub fn native_bounds(&self) -> Result<Bounds> {
        Ok(self.affine()?.bounds(self.width(), self.height()))
    }

    /// Native bounds reprojected to the target CRS, densifying each edge so
    /// rotated or strongly curved source projections keep their full extent.
    pub fn bounds_in(&self, target: &SpatialRef, densify_pts: i32) -> Result<Bounds> {
        let bounds = self.native_bounds()?;
        let transform = CoordTransform::new(&self.spatial_ref()?, target)?;
        let out = transform.transform_bounds(&bounds.array(), densify_pts)?;
        Ok(Bounds::from(out))
    }

    /// Block windows of band 1, aligned to the file's internal tiling.
    pub fn block_windows(&self) -> Result<Vec<Window>> {
        let band = self.ds.rasterband(1)?;
        let (block_width, block_height) = band.block_size();
        let (width, height) = (band.x_size(), band.y_size());

        let mut windows = Vec::new();
        let mut y = 0;
        while y < height {
            let window_height = block_height.min(height - y);
            let mut x = 0;
            while x < width {
                let window_width = block_width.min(width - x);
                windows.push(Window::new(x as isize, y as isize, window_width, window_height));
                x += block_width;
            }
            y += block_height;
        }

        Ok(windows)
    }

    /// Read a pixel window from the given band, optionally resampled to
    /// `out_shape` (width, height). Values are widened to f64.
    pub fn read_window(
        &self,
        band: usize,
        window: Window,
        out_shape: Option<(usize, usize)>,
        resampling: Option<Resampling>,
    ) -> Result<Vec<f64>> {
        read_band_window(&self.ds, band, window, out_shape, resampling)
    }

    pub(crate) fn gdal_dataset(&self) -> &gdal::Dataset {
        &self.ds
    }
}

pub(crate) fn read_band_window(
    ds: &gdal::Dataset,
    band: usize,
    window: Window,
    out_shape: Option<(usize, usize)>,
    resampling: Option<Resampling>,
) -> Result<Vec<f64>> {
    let (out_width, out_height) = out_shape.unwrap_or((window.width, window.height));
    let mut data = vec![0.0_f64; out_width * out_height];

    ds.rasterband(band)?.read_into_slice(
        (window.x_off, window.y_off),
        (window.width, window.height),
        (out_width, out_height),
        &mut data,
        resampling.map(Resampling::to_read_alg),
    )?;

    Ok(data)
}
