//! Minimal sqlite wrapper on top of the libsqlite3-sys crate, covering what
//! an embedded metadata table store needs: parameterized statements, typed
//! column access and batch execution. Anything fancier belongs in rusqlite
//! or sqlx.

mod connection;
mod statement;

use thiserror::Error;

#[derive(Debug, Copy, Clone)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    Create,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid string: {0}")]
    InvalidString(#[from] std::ffi::NulError),
}

pub type Result<T = ()> = std::result::Result<T, Error>;

pub use connection::Connection;
pub use statement::{Statement, Value};
