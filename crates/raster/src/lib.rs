//! GDAL backed raster access for the tile pipeline and the metadata
//! ingestion path: read-only dataset handles, windowed band reads at an
//! arbitrary output shape, warp target calculation and lazy warped views.

#![warn(clippy::unwrap_used)]

mod affine;
mod dataset;
mod interop;
mod resampling;
pub mod stats;
pub mod testutils;
mod warp;

pub use affine::{Affine, Bounds, Window, WindowF};
pub use dataset::{RasterDataset, spatial_ref_from_epsg};
pub use resampling::Resampling;
pub use warp::{VrtOptions, WarpOutput, WarpedVrt, suggested_warp_output};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
    #[error("Invalid raster path: {0}")]
    InvalidPath(PathBuf),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported resampling method: {0}")]
    UnsupportedResampling(String),
    #[error("Invalid string: {0}")]
    InvalidString(#[from] std::ffi::NulError),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T = ()> = std::result::Result<T, Error>;
