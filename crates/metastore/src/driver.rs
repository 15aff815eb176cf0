use std::collections::HashMap;

use crate::keys::KeyDescription;
use crate::local::ConnectionScope;
use crate::records::DatasetRecord;
use crate::Result;

/// Options for [`MetadataDriver::insert`].
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Opaque blob stored with the dataset row.
    pub metadata: Option<serde_json::Value>,
    /// Store this locator instead of the path the statistics were read from.
    pub override_path: Option<String>,
    /// Persist the row without computing statistics; the stats columns stay
    /// NULL.
    pub skip_metadata: bool,
    /// Force or forbid chunked statistics, overriding the size heuristic.
    pub use_chunks: Option<bool>,
}

/// Common interface of the metadata drivers.
///
/// Operations on stored datasets require an open [`ConnectionScope`] and
/// report `NotConnected` outside one. Scopes are re-entrant per driver
/// instance; nested scopes share the physical connection which closes when
/// the outermost scope ends.
///
/// The mutating operations (`create`, `insert`, `delete`) are part of the
/// interface even for drivers that cannot support them; the remote driver
/// answers them with `NotImplemented`.
pub trait MetadataDriver: Send + Sync {
    /// Initialize a fresh store with the given key schema. Fails with
    /// `AlreadyExists` when the store already holds one.
    fn create(&self, keys: &[KeyDescription]) -> Result;

    /// Enter a connection scope.
    fn connect(&self) -> Result<ConnectionScope>;

    /// The key schema, in order.
    fn available_keys(&self) -> Result<Vec<String>>;

    /// The key schema with the descriptions given at `create` time.
    fn key_descriptions(&self) -> Result<Vec<KeyDescription>>;

    /// Key tuples and their raster locations, in insertion order, optionally
    /// filtered by equality on a subset of key names and paginated by
    /// `page` x `limit`. Requires a connection.
    fn get_datasets(
        &self,
        filter: Option<&HashMap<String, String>>,
        page: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<String>, String)>>;

    /// The stored record for a key tuple; `UnknownDataset` when absent.
    /// Requires a connection.
    fn get_metadata(&self, keys: &[String]) -> Result<DatasetRecord>;

    /// Upsert a dataset row; statistics are computed from the raster unless
    /// skipped. Requires a connection.
    fn insert(&self, keys: &[String], path: &str, options: &InsertOptions) -> Result;

    /// Remove a dataset row; `UnknownDataset` when absent. Requires a
    /// connection.
    fn delete(&self, keys: &[String]) -> Result;

    /// Content hash of the backing store, if it exists yet. Doubles as the
    /// `If-None-Match` token for remote syncs.
    fn db_hash(&self) -> Result<Option<String>>;
}
