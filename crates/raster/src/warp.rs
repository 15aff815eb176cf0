use std::ffi::{CString, c_double, c_int};

use gdal::cpl::CslStringList;
use gdal::spatial_ref::SpatialRef;

use crate::dataset::read_band_window;
use crate::interop::{FALSE, check_pointer, check_rc};
use crate::{Affine, Bounds, Error, RasterDataset, Resampling, Result, Window};

/// Minimum enclosing raster of a source dataset in a target CRS.
#[derive(Debug, Clone, Copy)]
pub struct WarpOutput {
    pub transform: Affine,
    pub width: usize,
    pub height: usize,
}

impl WarpOutput {
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }
}

/// Computes the transform and shape of the minimum raster enclosing `src`
/// after reprojection to `target`, using GDAL's warp output estimation.
pub fn suggested_warp_output(src: &RasterDataset, target: &SpatialRef) -> Result<WarpOutput> {
    let target_wkt = CString::new(target.to_wkt()?)?;
    let ds = src.gdal_dataset();

    unsafe {
        // Transformer from source pixel/line space to target georeferenced
        // coordinates; the destination dataset handle stays null on purpose.
        let transformer_arg = check_pointer(
            gdal_sys::GDALCreateGenImgProjTransformer(
                ds.c_dataset(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                target_wkt.as_ptr(),
                FALSE,
                0.0,
                0,
            ),
            "Failed to create projection transformer",
        )?;

        let mut transform: gdal::GeoTransform = [0.0; 6];
        let mut width: c_int = 0;
        let mut height: c_int = 0;

        let rc = gdal_sys::GDALSuggestedWarpOutput(
            ds.c_dataset(),
            Some(gdal_sys::GDALGenImgProjTransform),
            transformer_arg,
            transform.as_mut_ptr(),
            &mut width,
            &mut height,
        );

        gdal_sys::GDALDestroyGenImgProjTransformer(transformer_arg);
        check_rc(rc)?;

        Ok(WarpOutput {
            transform: Affine::from_gdal(&transform),
            width: width as usize,
            height: height as usize,
        })
    }
}

/// Options for constructing a [`WarpedVrt`].
#[derive(Debug, Clone, Copy)]
pub struct VrtOptions {
    pub resampling: Resampling,
    pub transform: Affine,
    pub width: usize,
    pub height: usize,
    pub src_nodata: f64,
    pub dst_nodata: f64,
    /// Initialize destination pixels with the nodata value before warping,
    /// so regions outside the source footprint read back as nodata.
    pub init_dest_nodata: bool,
}

/// Lazy reprojected view of a source raster at a fixed target CRS, transform
/// and shape. Reads resample on the fly to any requested output shape; no
/// pixel is warped until a read touches it.
pub struct WarpedVrt {
    // field order matters: the VRT references the source dataset and has to
    // be closed first
    vrt: gdal::Dataset,
    _src: RasterDataset,
}

impl WarpedVrt {
    pub fn new(src: RasterDataset, target: &SpatialRef, opts: &VrtOptions) -> Result<Self> {
        let target_wkt = target.to_wkt()?;
        let target_wkt_c = CString::new(target_wkt.as_str())?;
        let src_c = src.gdal_dataset().c_dataset();
        let mut transform = opts.transform.to_gdal();

        let mut warp_options = CslStringList::new();
        if opts.init_dest_nodata {
            warp_options.add_string("INIT_DEST=NO_DATA")?;
        }
        warp_options.add_string("NUM_THREADS=ALL_CPUS")?;

        unsafe {
            let transformer_arg = check_pointer(
                gdal_sys::GDALCreateGenImgProjTransformer(
                    src_c,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    target_wkt_c.as_ptr(),
                    FALSE,
                    0.0,
                    0,
                ),
                "Failed to create projection transformer",
            )?;
            gdal_sys::GDALSetGenImgProjTransformerDstGeoTransform(transformer_arg, transform.as_ptr());

            let options = gdal_sys::GDALCreateWarpOptions();
            (*options).papszWarpOptions = gdal_sys::CSLDuplicate(warp_options.as_ptr());
            (*options).hSrcDS = src_c;
            (*options).eResampleAlg = opts.resampling.to_warp_alg();
            (*options).eWorkingDataType = gdal_sys::GDALDataType::GDT_Float64;
            (*options).pfnTransformer = Some(gdal_sys::GDALGenImgProjTransform);
            (*options).pTransformerArg = transformer_arg;

            (*options).nBandCount = 1;
            let band_bytes = std::mem::size_of::<c_int>();
            (*options).panSrcBands = gdal_sys::CPLMalloc(band_bytes).cast::<c_int>();
            (*options).panSrcBands.write(1);
            (*options).panDstBands = gdal_sys::CPLMalloc(band_bytes).cast::<c_int>();
            (*options).panDstBands.write(1);

            // freed by GDALDestroyWarpOptions
            let nodata_bytes = std::mem::size_of::<c_double>();
            (*options).padfSrcNoDataReal = gdal_sys::CPLMalloc(nodata_bytes).cast::<c_double>();
            (*options).padfSrcNoDataReal.write(opts.src_nodata);
            (*options).padfDstNoDataReal = gdal_sys::CPLMalloc(nodata_bytes).cast::<c_double>();
            (*options).padfDstNoDataReal.write(opts.dst_nodata);

            let vrt_handle = gdal_sys::GDALCreateWarpedVRT(
                src_c,
                opts.width as c_int,
                opts.height as c_int,
                transform.as_mut_ptr(),
                options,
            );

            if vrt_handle.is_null() {
                // a successfully created VRT owns the transformer; here it
                // has to be cleaned up manually
                gdal_sys::GDALDestroyGenImgProjTransformer(transformer_arg);
                (*options).pTransformerArg = std::ptr::null_mut();
                gdal_sys::GDALDestroyWarpOptions(options);
                return Err(Error::Runtime("Failed to create warped VRT".to_string()));
            }

            gdal_sys::GDALDestroyWarpOptions(options);

            let mut vrt = gdal::Dataset::from_c_dataset(vrt_handle);
            vrt.set_projection(&target_wkt)?;
            vrt.rasterband(1)?.set_no_data_value(Some(opts.dst_nodata))?;

            Ok(WarpedVrt { vrt, _src: src })
        }
    }

    pub fn width(&self) -> usize {
        self.vrt.raster_size().0
    }

    pub fn height(&self) -> usize {
        self.vrt.raster_size().1
    }

    pub fn affine(&self) -> Result<Affine> {
        Ok(Affine::from_gdal(&self.vrt.geo_transform()?))
    }

    /// Read a pixel window of the warped view, resampled to `out_shape`.
    pub fn read_window(
        &self,
        band: usize,
        window: Window,
        out_shape: Option<(usize, usize)>,
        resampling: Option<Resampling>,
    ) -> Result<Vec<f64>> {
        read_band_window(&self.vrt, band, window, out_shape, resampling)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;
    use crate::dataset::spatial_ref_from_epsg;
    use crate::testutils::TestRaster;

    #[test]
    fn suggested_output_is_identity_for_native_crs() -> Result {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("img.tif");
        TestRaster::filled(64, 32, 5.0).write(&path)?;

        let raster = RasterDataset::open(&path)?;
        let target = spatial_ref_from_epsg(3857)?;
        let output = suggested_warp_output(&raster, &target)?;

        assert_eq!(output.width, 64);
        assert_eq!(output.height, 32);

        let native = raster.native_bounds()?;
        let warped = output.bounds();
        assert_relative_eq!(warped.west, native.west, epsilon = 1e-6);
        assert_relative_eq!(warped.north, native.north, epsilon = 1e-6);

        Ok(())
    }

    #[test]
    fn warped_vrt_reads_source_pixels() -> Result {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("img.tif");
        let values: Vec<f64> = (0..256).map(f64::from).collect();
        TestRaster::with_values(16, 16, values.clone()).nodata(-9999.0).write(&path)?;

        let raster = RasterDataset::open(&path)?;
        let target = spatial_ref_from_epsg(3857)?;
        let output = suggested_warp_output(&raster, &target)?;

        let src = RasterDataset::open(&path)?;
        let vrt = WarpedVrt::new(
            src,
            &target,
            &VrtOptions {
                resampling: Resampling::Nearest,
                transform: output.transform,
                width: output.width,
                height: output.height,
                src_nodata: -9999.0,
                dst_nodata: -9999.0,
                init_dest_nodata: true,
            },
        )?;

        let data = vrt.read_window(1, Window::new(0, 0, 16, 16), None, None)?;
        assert_eq!(data, values);

        // reading at a smaller output shape resamples instead of cropping
        let shrunk = vrt.read_window(1, Window::new(0, 0, 16, 16), Some((4, 4)), Some(Resampling::Nearest))?;
        assert_eq!(shrunk.len(), 16);

        Ok(())
    }

    #[test]
    fn warped_vrt_fills_outside_with_nodata() -> Result {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("img.tif");
        TestRaster::filled(8, 8, 7.0).nodata(0.0).write(&path)?;

        let raster = RasterDataset::open(&path)?;
        let target = spatial_ref_from_epsg(3857)?;
        let output = suggested_warp_output(&raster, &target)?;

        // double the footprint; the extra half has no source data
        let vrt = WarpedVrt::new(
            RasterDataset::open(&path)?,
            &target,
            &VrtOptions {
                resampling: Resampling::Nearest,
                transform: output.transform,
                width: output.width * 2,
                height: output.height,
                src_nodata: 0.0,
                dst_nodata: 0.0,
                init_dest_nodata: true,
            },
        )?;
        drop(raster);

        let data = vrt.read_window(1, Window::new(0, 0, 16, 8), None, None)?;
        for row in data.chunks(16) {
            assert!(row[..8].iter().all(|&v| v == 7.0));
            assert!(row[8..].iter().all(|&v| v == 0.0));
        }

        Ok(())
    }
}
