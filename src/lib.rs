//! Umbrella crate for the XYZ raster tile server core: raster access,
//! metadata index drivers and the Web Mercator tile engine.

pub use metastore;
pub use raster;
#[cfg(feature = "sqlite")]
pub use sqlite;
#[cfg(feature = "tiler")]
pub use tiler;
