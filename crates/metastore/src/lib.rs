//! Metadata index for the tile pipeline: maps user defined key tuples to
//! raster locations and their precomputed statistics. Two drivers share one
//! interface, an embedded sqlite store and a read-only remote variant that
//! syncs the sqlite file from an object store with conditional GETs.

#![warn(clippy::unwrap_used)]

mod driver;
mod factory;
mod keys;
mod local;
mod metadata;
mod records;
mod remote;
mod settings;

pub use driver::{InsertOptions, MetadataDriver};
pub use factory::driver_for;
pub use keys::{KeyDescription, KeySelection, normalize_keys, valid_key_component};
pub use local::{ConnectionScope, SqliteDriver};
pub use metadata::compute_metadata;
pub use records::{DatasetRecord, RasterMetadata};
pub use remote::RemoteSqliteDriver;
pub use settings::Settings;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown key: {0}")]
    UnknownKey(String),
    #[error("No dataset matching keys: {0}")]
    UnknownDataset(String),
    #[error("Raster contains no valid data: {0}")]
    InvalidRaster(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Store already contains a key schema")]
    AlreadyExists,
    #[error("Operation requires an open connection scope")]
    NotConnected,
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("Remote database error: {0}")]
    RemoteDbError(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlite::Error),
    #[error("Raster error: {0}")]
    Raster(#[from] raster::Error),
    #[error("Invalid metadata blob: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T = ()> = std::result::Result<T, Error>;
