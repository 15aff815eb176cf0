use std::collections::HashMap;
use std::ffi::c_int;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use md5::{Digest, Md5};
use sqlite::{AccessMode, Connection, Value};

use crate::driver::{InsertOptions, MetadataDriver};
use crate::keys::{KeyDescription, valid_key_component};
use crate::metadata::compute_metadata;
use crate::records::{DatasetRecord, RasterMetadata};
use crate::{Error, Result, Settings};

const DB_VERSION: &str = "1";

/// Scoped handle to an open driver connection.
///
/// Scopes are re-entrant: nested scopes on the same driver share the
/// physical connection, which closes when the outermost scope drops.
pub struct ConnectionScope {
    state: Arc<ConnState>,
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        let mut inner = self.state.lock();
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.conn = None;
        }
    }
}

#[derive(Default)]
struct ConnInner {
    conn: Option<Connection>,
    depth: usize,
    schema: Option<Vec<KeyDescription>>,
    hash: Option<String>,
}

impl ConnInner {
    fn connection(&self) -> Result<&Connection> {
        if self.depth == 0 {
            return Err(Error::NotConnected);
        }
        self.conn.as_ref().ok_or(Error::NotConnected)
    }
}

struct ConnState {
    path: PathBuf,
    mode: AccessMode,
    inner: Mutex<ConnInner>,
}

impl ConnState {
    fn lock(&self) -> MutexGuard<'_, ConnInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schema_of(&self, inner: &mut ConnInner) -> Result<Vec<KeyDescription>> {
        if let Some(schema) = &inner.schema {
            return Ok(schema.clone());
        }

        let schema = match &inner.conn {
            Some(conn) => load_schema(conn)?,
            None => load_schema(&Connection::open(&self.path, AccessMode::ReadOnly)?)?,
        };

        inner.schema = Some(schema.clone());
        Ok(schema)
    }
}

fn load_schema(conn: &Connection) -> Result<Vec<KeyDescription>> {
    let mut stmt = conn.prepare("SELECT name, description FROM keys ORDER BY idx")?;
    let mut schema = Vec::new();
    while stmt.step()? {
        schema.push(KeyDescription {
            name: stmt.column_text(0)?.unwrap_or_default(),
            description: stmt.column_text(1)?,
        });
    }

    Ok(schema)
}

fn key_columns(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("key_{i}")).collect()
}

fn key_predicate(count: usize) -> String {
    key_columns(count)
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_params(keys: &[String]) -> Vec<Value> {
    keys.iter().map(|k| Value::Text(k.clone())).collect()
}

fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Metadata driver backed by a single sqlite file.
///
/// Storage layout: a `keys` table holding the schema, a `datasets` table with
/// one TEXT column per key plus the location and statistics columns, and a
/// `terracotta` singleton row with the schema version and a revision digest
/// that changes on every mutation.
pub struct SqliteDriver {
    state: Arc<ConnState>,
    settings: Settings,
}

impl SqliteDriver {
    pub fn open(path: impl AsRef<Path>, settings: &Settings) -> Self {
        Self::open_with_mode(path, settings, AccessMode::ReadWrite)
    }

    pub(crate) fn open_with_mode(path: impl AsRef<Path>, settings: &Settings, mode: AccessMode) -> Self {
        SqliteDriver {
            state: Arc::new(ConnState {
                path: path.as_ref().to_path_buf(),
                mode,
                inner: Mutex::new(ConnInner::default()),
            }),
            settings: settings.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    pub fn db_version(&self) -> Result<String> {
        let inner = self.state.lock();
        let conn = inner.connection()?;
        let mut stmt = conn.prepare("SELECT version FROM terracotta")?;
        if stmt.step()? {
            return Ok(stmt.column_text(0)?.unwrap_or_default());
        }

        Err(Error::InvalidArgument("Store has no version row".to_string()))
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().depth > 0
    }

    /// Forget cached schema and content hash, e.g. after the backing file
    /// was swapped out underneath the driver.
    pub(crate) fn invalidate_caches(&self) {
        let mut inner = self.state.lock();
        inner.schema = None;
        inner.hash = None;
    }

    fn has_schema(path: &Path) -> Result<bool> {
        let conn = Connection::open(path, AccessMode::ReadOnly)?;
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'keys'")?;
        stmt.step().map_err(Error::from)
    }

    fn validate_arity(&self, schema: &[KeyDescription], keys: &[String]) -> Result {
        if keys.len() != schema.len() {
            return Err(Error::InvalidArgument(format!(
                "Got {} keys, expected {}",
                keys.len(),
                schema.len()
            )));
        }

        Ok(())
    }

    fn bump_revision(conn: &Connection, change: &str) -> Result {
        let mut stmt = conn.prepare("SELECT revision FROM terracotta")?;
        let revision = if stmt.step()? {
            stmt.column_text(0)?.unwrap_or_default()
        } else {
            String::new()
        };
        drop(stmt);

        let next = md5_hex(format!("{revision}:{change}").as_bytes());
        conn.execute("UPDATE terracotta SET revision = ?1", &[Value::Text(next)])?;

        Ok(())
    }

    fn dataset_ord(conn: &Connection, schema_len: usize, keys: &[String]) -> Result<i64> {
        let sql = format!("SELECT ord FROM datasets WHERE {}", key_predicate(schema_len));
        let mut stmt = conn.prepare(&sql)?;
        stmt.bind_all(&key_params(keys))?;
        if stmt.step()? {
            return Ok(stmt.column_i64(0));
        }
        drop(stmt);

        let mut stmt = conn.prepare("SELECT IFNULL(MAX(ord), 0) + 1 FROM datasets")?;
        stmt.step()?;
        Ok(stmt.column_i64(0))
    }
}

impl MetadataDriver for SqliteDriver {
    fn create(&self, keys: &[KeyDescription]) -> Result {
        if keys.is_empty() {
            return Err(Error::InvalidArgument("Key schema must contain at least one key".to_string()));
        }

        for key in keys {
            if !valid_key_component(&key.name) {
                return Err(Error::InvalidArgument(format!("Invalid key name: '{}'", key.name)));
            }
        }

        if self.state.path.exists() && Self::has_schema(&self.state.path)? {
            return Err(Error::AlreadyExists);
        }

        let conn = Connection::open(&self.state.path, AccessMode::Create)?;

        let columns = key_columns(keys.len())
            .iter()
            .map(|c| format!("{c} TEXT NOT NULL"))
            .collect::<Vec<_>>()
            .join(", ");
        let primary_key = key_columns(keys.len()).join(", ");

        conn.execute_batch(&format!(
            "CREATE TABLE terracotta (version TEXT NOT NULL, revision TEXT NOT NULL);
             CREATE TABLE keys (idx INTEGER PRIMARY KEY, name TEXT UNIQUE NOT NULL, description TEXT);
             CREATE TABLE datasets ({columns}, ord INTEGER NOT NULL, filepath TEXT NOT NULL,
                                    bounds BLOB, nodata REAL, value_range BLOB, mean REAL, stdev REAL,
                                    percentiles BLOB, metadata BLOB,
                                    PRIMARY KEY ({primary_key}))"
        ))?;

        let names = keys.iter().map(|k| k.name.as_str()).collect::<Vec<_>>().join(",");
        conn.execute(
            "INSERT INTO terracotta (version, revision) VALUES (?1, ?2)",
            &[Value::Text(DB_VERSION.to_string()), Value::Text(md5_hex(names.as_bytes()))],
        )?;

        for (idx, key) in keys.iter().enumerate() {
            conn.execute(
                "INSERT INTO keys (idx, name, description) VALUES (?1, ?2, ?3)",
                &[
                    Value::Integer(idx as i64),
                    Value::Text(key.name.clone()),
                    key.description.clone().map_or(Value::Null, Value::Text),
                ],
            )?;
        }

        let mut inner = self.state.lock();
        inner.schema = Some(keys.to_vec());
        inner.hash = None;

        Ok(())
    }

    fn connect(&self) -> Result<ConnectionScope> {
        let mut inner = self.state.lock();
        if inner.depth == 0 {
            inner.conn = Some(Connection::open(&self.state.path, self.state.mode)?);
        }
        inner.depth += 1;

        Ok(ConnectionScope {
            state: Arc::clone(&self.state),
        })
    }

    fn available_keys(&self) -> Result<Vec<String>> {
        Ok(self.key_descriptions()?.into_iter().map(|k| k.name).collect())
    }

    fn key_descriptions(&self) -> Result<Vec<KeyDescription>> {
        let mut inner = self.state.lock();
        self.state.schema_of(&mut inner)
    }

    fn get_datasets(
        &self,
        filter: Option<&HashMap<String, String>>,
        page: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<String>, String)>> {
        let mut inner = self.state.lock();
        inner.connection()?;
        let schema = self.state.schema_of(&mut inner)?;
        let conn = inner.connection()?;

        if let Some(filter) = filter {
            for name in filter.keys() {
                if !schema.iter().any(|key| &key.name == name) {
                    return Err(Error::UnknownKey(name.clone()));
                }
            }
        }

        let columns = key_columns(schema.len()).join(", ");
        let mut sql = format!("SELECT {columns}, filepath FROM datasets");
        let mut params = Vec::new();

        if let Some(filter) = filter {
            let mut clauses = Vec::new();
            for (i, key) in schema.iter().enumerate() {
                if let Some(value) = filter.get(&key.name) {
                    clauses.push(format!("key_{} = ?{}", i + 1, params.len() + 1));
                    params.push(Value::Text(value.clone()));
                }
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
        }

        sql.push_str(" ORDER BY ord");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, page * limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        stmt.bind_all(&params)?;

        let mut datasets = Vec::new();
        while stmt.step()? {
            let mut keys = Vec::with_capacity(schema.len());
            for i in 0..schema.len() {
                keys.push(stmt.column_text(i as c_int)?.unwrap_or_default());
            }
            let path = stmt.column_text(schema.len() as c_int)?.unwrap_or_default();
            datasets.push((keys, path));
        }

        Ok(datasets)
    }

    fn get_metadata(&self, keys: &[String]) -> Result<DatasetRecord> {
        let mut inner = self.state.lock();
        inner.connection()?;
        let schema = self.state.schema_of(&mut inner)?;
        self.validate_arity(&schema, keys)?;
        let conn = inner.connection()?;

        let sql = format!(
            "SELECT filepath, bounds, nodata, value_range, mean, stdev, percentiles, metadata
             FROM datasets WHERE {}",
            key_predicate(schema.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        stmt.bind_all(&key_params(keys))?;

        if !stmt.step()? {
            return Err(Error::UnknownDataset(keys.join("/")));
        }

        let path = stmt.column_text(0)?.unwrap_or_default();

        let raster = if stmt.column_is_null(1) {
            None
        } else {
            let bounds: [f64; 4] = blob_value(&stmt, 1, "bounds")?;
            let range: [f64; 2] = blob_value(&stmt, 3, "value_range")?;
            let percentiles: Vec<f64> = blob_value(&stmt, 6, "percentiles")?;
            let metadata = match stmt.column_blob(7) {
                Some(blob) => serde_json::from_slice(&blob)?,
                None => serde_json::Value::Null,
            };

            Some(RasterMetadata {
                bounds: bounds.into(),
                nodata: stmt.column_f64(2),
                range: (range[0], range[1]),
                mean: stmt.column_f64(4),
                stdev: stmt.column_f64(5),
                percentiles,
                metadata,
            })
        };

        Ok(DatasetRecord {
            keys: keys.to_vec(),
            path,
            raster,
        })
    }

    fn insert(&self, keys: &[String], path: &str, options: &InsertOptions) -> Result {
        let mut inner = self.state.lock();
        inner.connection()?;
        let schema = self.state.schema_of(&mut inner)?;
        self.validate_arity(&schema, keys)?;

        for value in keys {
            if !valid_key_component(value) {
                return Err(Error::InvalidArgument(format!("Invalid key value: '{value}'")));
            }
        }

        let raster = if options.skip_metadata {
            None
        } else {
            Some(compute_metadata(
                Path::new(path),
                options.metadata.clone(),
                options.use_chunks,
                &self.settings,
            )?)
        };

        let stored_path = options.override_path.as_deref().unwrap_or(path);
        let conn = inner.connection()?;
        let ord = Self::dataset_ord(conn, schema.len(), keys)?;

        let mut params = key_params(keys);
        params.push(Value::Integer(ord));
        params.push(Value::Text(stored_path.to_string()));
        match &raster {
            Some(meta) => {
                params.push(Value::Blob(serde_json::to_vec(&meta.bounds.array())?));
                params.push(Value::Real(meta.nodata));
                params.push(Value::Blob(serde_json::to_vec(&[meta.range.0, meta.range.1])?));
                params.push(Value::Real(meta.mean));
                params.push(Value::Real(meta.stdev));
                params.push(Value::Blob(serde_json::to_vec(&meta.percentiles)?));
                match &meta.metadata {
                    serde_json::Value::Null => params.push(Value::Null),
                    blob => params.push(Value::Blob(serde_json::to_vec(blob)?)),
                }
            }
            None => {
                // bounds, nodata, value_range, mean, stdev, percentiles
                for _ in 0..6 {
                    params.push(Value::Null);
                }
                match &options.metadata {
                    Some(blob) => params.push(Value::Blob(serde_json::to_vec(blob)?)),
                    None => params.push(Value::Null),
                }
            }
        }

        let placeholders = (1..=params.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO datasets ({}, ord, filepath, bounds, nodata, value_range, mean, stdev, percentiles, metadata)
             VALUES ({placeholders})",
            key_columns(schema.len()).join(", ")
        );
        conn.execute(&sql, &params)?;

        Self::bump_revision(conn, &format!("insert:{}:{}", keys.join("/"), stored_path))?;
        inner.hash = None;

        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result {
        let mut inner = self.state.lock();
        inner.connection()?;
        let schema = self.state.schema_of(&mut inner)?;
        self.validate_arity(&schema, keys)?;
        let conn = inner.connection()?;

        let sql = format!("DELETE FROM datasets WHERE {}", key_predicate(schema.len()));
        conn.execute(&sql, &key_params(keys))?;
        if conn.changes() == 0 {
            return Err(Error::UnknownDataset(keys.join("/")));
        }

        Self::bump_revision(conn, &format!("delete:{}", keys.join("/")))?;
        inner.hash = None;

        Ok(())
    }

    fn db_hash(&self) -> Result<Option<String>> {
        let mut inner = self.state.lock();
        if let Some(hash) = &inner.hash {
            return Ok(Some(hash.clone()));
        }

        if !self.state.path.exists() {
            return Ok(None);
        }

        let digest = md5_hex(&std::fs::read(&self.state.path)?);
        inner.hash = Some(digest.clone());
        Ok(Some(digest))
    }
}

fn blob_value<T: serde::de::DeserializeOwned>(stmt: &sqlite::Statement<'_>, index: c_int, column: &str) -> Result<T> {
    let blob = stmt
        .column_blob(index)
        .ok_or_else(|| Error::InvalidArgument(format!("Missing {column} column")))?;
    Ok(serde_json::from_slice(&blob)?)
}
