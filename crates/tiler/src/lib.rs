//! Web Mercator tile engine: turns a dataset key tuple plus a tile bounding
//! box into a fixed-size pixel array, with a byte-budgeted LRU cache in
//! front of the raster reads.

#![warn(clippy::unwrap_used)]

mod engine;
mod tilecache;
mod tilegrid;

pub use engine::{TileEngine, TileOptions, effective_resampling};
pub use tilecache::TileCache;
pub use tilegrid::TileGrid;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tile out of bounds: {0}")]
    TileOutOfBounds(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Metadata error: {0}")]
    Metadata(#[from] metastore::Error),
    #[error("Raster error: {0}")]
    Raster(#[from] raster::Error),
}

pub type Result<T = ()> = std::result::Result<T, Error>;
