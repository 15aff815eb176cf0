//! Fixture rasters for tests. Files are written through GDAL so every test
//! exercises the same I/O stack as production reads.

use std::path::Path;

use gdal::DriverManager;
use gdal::raster::{Buffer, RasterCreationOptions};

use crate::dataset::spatial_ref_from_epsg;
use crate::{Affine, Result};

/// Default fixture transform: 100 m pixels just north-east of the Web
/// Mercator origin.
pub fn web_mercator_affine() -> Affine {
    Affine::from_gdal(&[0.0, 100.0, 0.0, 1_000_000.0, 0.0, -100.0])
}

pub struct TestRaster {
    width: usize,
    height: usize,
    values: Vec<f64>,
    nodata: Option<f64>,
    epsg: u32,
    affine: Affine,
    block_size: Option<usize>,
}

impl TestRaster {
    pub fn with_values(width: usize, height: usize, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), width * height);
        TestRaster {
            width,
            height,
            values,
            nodata: None,
            epsg: 3857,
            affine: web_mercator_affine(),
            block_size: None,
        }
    }

    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self::with_values(width, height, vec![value; width * height])
    }

    pub fn nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn epsg(mut self, epsg: u32) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn affine(mut self, affine: Affine) -> Self {
        self.affine = affine;
        self
    }

    pub fn tiled(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn write(&self, path: &Path) -> Result {
        let driver = DriverManager::get_driver_by_name("GTiff")?;

        let mut option_strings = Vec::new();
        if let Some(block) = self.block_size {
            option_strings.push("TILED=YES".to_string());
            option_strings.push(format!("BLOCKXSIZE={block}"));
            option_strings.push(format!("BLOCKYSIZE={block}"));
        }
        let options = RasterCreationOptions::from_iter(option_strings);

        let mut ds = driver.create_with_band_type_with_options::<f64, _>(path, self.width, self.height, 1, &options)?;
        ds.set_geo_transform(&self.affine.to_gdal())?;
        ds.set_spatial_ref(&spatial_ref_from_epsg(self.epsg)?)?;

        let mut band = ds.rasterband(1)?;
        if let Some(nodata) = self.nodata {
            band.set_no_data_value(Some(nodata))?;
        }

        let mut buffer = Buffer::new((self.width, self.height), self.values.clone());
        band.write((0, 0), (self.width, self.height), &mut buffer)?;

        Ok(())
    }
}
