use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use object_store::{GetOptions, ObjectStore, path::Path as ObjectPath};
use url::Url;

use crate::driver::{InsertOptions, MetadataDriver};
use crate::keys::KeyDescription;
use crate::local::{ConnectionScope, SqliteDriver};
use crate::records::DatasetRecord;
use crate::{Error, Result, Settings};

const READ_ONLY_MESSAGE: &str = "Remote metadata stores are read-only";

fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Read-only driver whose sqlite file lives in an object store.
///
/// A local copy is kept under the remote DB cache directory and refreshed
/// with a conditional GET (`If-None-Match` carrying the local content hash)
/// whenever a connection scope opens and the last check is older than the
/// configured TTL. All mutating operations answer `NotImplemented`.
pub struct RemoteSqliteDriver {
    remote: String,
    store: Arc<dyn ObjectStore>,
    object_path: ObjectPath,
    local: SqliteDriver,
    local_path: PathBuf,
    cache_dir: PathBuf,
    ttl: Duration,
    last_check: Mutex<Option<Instant>>,
    runtime: tokio::runtime::Runtime,
}

impl RemoteSqliteDriver {
    pub fn open(remote_url: &str, settings: &Settings) -> Result<Self> {
        let url = Url::parse(remote_url)
            .map_err(|e| Error::RemoteDbError(format!("Invalid remote database URL '{remote_url}': {e}")))?;
        let (store, object_path) =
            object_store::parse_url(&url).map_err(|e| Error::RemoteDbError(e.to_string()))?;

        Self::with_store(Arc::from(store), object_path, remote_url, settings)
    }

    fn with_store(
        store: Arc<dyn ObjectStore>,
        object_path: ObjectPath,
        remote_url: &str,
        settings: &Settings,
    ) -> Result<Self> {
        let cache_dir = settings.remote_db_cache_dir.clone();
        std::fs::create_dir_all(&cache_dir)?;
        let local_path = cache_dir.join(format!("{}.sqlite", md5_hex(remote_url.as_bytes())));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(RemoteSqliteDriver {
            remote: remote_url.to_string(),
            store,
            object_path,
            local: SqliteDriver::open_with_mode(&local_path, settings, sqlite::AccessMode::ReadOnly),
            local_path,
            cache_dir,
            ttl: settings.remote_db_cache_ttl,
            last_check: Mutex::new(None),
            runtime,
        })
    }

    pub fn remote_url(&self) -> &str {
        &self.remote
    }

    /// Local copy of the remote database file.
    pub fn path(&self) -> &std::path::Path {
        &self.local_path
    }

    fn lock_check(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_check.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the freshness check unless one completed within the TTL. The lock
    /// is held for the duration of the check, so concurrent callers wait and
    /// then observe its outcome.
    fn ensure_fresh(&self) -> Result {
        let mut last_check = self.lock_check();
        if let Some(at) = *last_check {
            if at.elapsed() < self.ttl {
                return Ok(());
            }
        }

        self.sync()?;
        *last_check = Some(Instant::now());

        Ok(())
    }

    fn sync(&self) -> Result {
        let local_hash = self.local.db_hash()?;
        let mut options = GetOptions::default();
        options.if_none_match = local_hash.clone();

        let fetched = self.runtime.block_on(async {
            let response = self.store.get_opts(&self.object_path, options).await?;
            response.bytes().await
        });

        match fetched {
            Ok(bytes) => {
                // Stores whose ETags are not content hashes return a body
                // even for unchanged data; leave the local file untouched
                // when the content matches.
                if local_hash.as_deref() == Some(md5_hex(&bytes).as_str()) {
                    log::debug!("Remote metadata database unchanged: {}", self.remote);
                    return Ok(());
                }

                let mut staged = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
                staged.write_all(&bytes)?;
                staged.persist(&self.local_path).map_err(|e| Error::IOError(e.error))?;
                self.local.invalidate_caches();

                log::info!("Synced metadata database from {}", self.remote);
                Ok(())
            }
            Err(object_store::Error::NotModified { .. }) => {
                log::debug!("Remote metadata database not modified: {}", self.remote);
                Ok(())
            }
            Err(err) => Err(Error::RemoteDbError(err.to_string())),
        }
    }

    #[cfg(test)]
    fn expire_check_cache(&self) {
        *self.lock_check() = None;
    }
}

impl MetadataDriver for RemoteSqliteDriver {
    fn create(&self, _keys: &[KeyDescription]) -> Result {
        Err(Error::NotImplemented(READ_ONLY_MESSAGE))
    }

    fn connect(&self) -> Result<ConnectionScope> {
        // the check runs on the transition to an active connection only;
        // nested scopes reuse it
        if !self.local.is_connected() {
            self.ensure_fresh()?;
        }
        self.local.connect()
    }

    fn available_keys(&self) -> Result<Vec<String>> {
        if !self.local.is_connected() {
            self.ensure_fresh()?;
        }
        self.local.available_keys()
    }

    fn key_descriptions(&self) -> Result<Vec<KeyDescription>> {
        if !self.local.is_connected() {
            self.ensure_fresh()?;
        }
        self.local.key_descriptions()
    }

    fn get_datasets(
        &self,
        filter: Option<&HashMap<String, String>>,
        page: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<String>, String)>> {
        self.local.get_datasets(filter, page, limit)
    }

    fn get_metadata(&self, keys: &[String]) -> Result<DatasetRecord> {
        self.local.get_metadata(keys)
    }

    fn insert(&self, _keys: &[String], _path: &str, _options: &InsertOptions) -> Result {
        Err(Error::NotImplemented(READ_ONLY_MESSAGE))
    }

    fn delete(&self, _keys: &[String]) -> Result {
        Err(Error::NotImplemented(READ_ONLY_MESSAGE))
    }

    fn db_hash(&self) -> Result<Option<String>> {
        self.local.db_hash()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use object_store::memory::InMemory;

    use super::*;

    fn upload_db(
        store: &dyn ObjectStore,
        object_path: &ObjectPath,
        keys: &[&str],
        datasets: &[(&[&str], &str)],
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("upload.sqlite");

        let driver = SqliteDriver::open(&db_path, &Settings::default());
        driver
            .create(&keys.iter().map(|k| KeyDescription::new(k)).collect::<Vec<_>>())
            .expect("create");

        if !datasets.is_empty() {
            let _scope = driver.connect().expect("connect");
            for (dataset_keys, path) in datasets {
                let keys: Vec<String> = dataset_keys.iter().map(|k| k.to_string()).collect();
                driver
                    .insert(
                        &keys,
                        path,
                        &InsertOptions {
                            skip_metadata: true,
                            ..Default::default()
                        },
                    )
                    .expect("insert");
            }
        }

        let bytes = std::fs::read(&db_path).expect("read db file");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(store.put(object_path, bytes.into())).expect("upload");
    }

    fn memory_store() -> Arc<dyn ObjectStore> {
        Arc::new(InMemory::new())
    }

    fn remote_driver(
        store: Arc<dyn ObjectStore>,
        object_path: ObjectPath,
        ttl: Duration,
    ) -> (tempfile::TempDir, RemoteSqliteDriver) {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            remote_db_cache_dir: dir.path().join("remote-cache"),
            remote_db_cache_ttl: ttl,
            ..Default::default()
        };

        let driver = RemoteSqliteDriver::with_store(store, object_path, "s3://tctest/tc.sqlite", &settings).expect("driver");
        (dir, driver)
    }

    fn mtime(path: &std::path::Path) -> SystemTime {
        std::fs::metadata(path).expect("metadata").modified().expect("mtime")
    }

    #[test]
    fn reads_schema_from_remote() {
        let store = memory_store();
        let object_path = ObjectPath::from("tc.sqlite");
        upload_db(store.as_ref(), &object_path, &["some", "keys"], &[]);

        let (_cache_dir, driver) = remote_driver(store, object_path, Duration::from_secs(60));
        assert_eq!(driver.available_keys().expect("keys"), vec!["some", "keys"]);

        let _scope = driver.connect().expect("connect");
        assert!(driver.get_datasets(None, 0, None).expect("datasets").is_empty());
    }

    #[test]
    fn remote_update_visible_after_ttl_expiry() {
        let store = memory_store();
        let object_path = ObjectPath::from("tc.sqlite");
        upload_db(store.as_ref(), &object_path, &["some", "keys"], &[]);

        let (_cache_dir, driver) = remote_driver(Arc::clone(&store), object_path.clone(), Duration::from_secs(3600));

        {
            let _scope = driver.connect().expect("connect");
            assert!(driver.get_datasets(None, 0, None).expect("datasets").is_empty());
        }
        let unchanged_mtime = mtime(driver.path());

        std::thread::sleep(Duration::from_millis(20));
        upload_db(store.as_ref(), &object_path, &["some", "keys"], &[(&["some", "value"], "/tmp/img.tif")]);

        {
            // within the TTL no check happens, the update stays invisible
            let _scope = driver.connect().expect("connect");
            assert!(driver.get_datasets(None, 0, None).expect("datasets").is_empty());
        }
        assert_eq!(mtime(driver.path()), unchanged_mtime);

        driver.expire_check_cache();

        {
            let _scope = driver.connect().expect("connect");
            let datasets = driver.get_datasets(None, 0, None).expect("datasets");
            assert_eq!(
                datasets,
                vec![(vec!["some".to_string(), "value".to_string()], "/tmp/img.tif".to_string())]
            );
        }
        assert_ne!(mtime(driver.path()), unchanged_mtime);
    }

    #[test]
    fn unchanged_remote_leaves_local_file_alone() {
        let store = memory_store();
        let object_path = ObjectPath::from("tc.sqlite");
        upload_db(store.as_ref(), &object_path, &["some", "keys"], &[(&["some", "value"], "/tmp/img.tif")]);

        let (_cache_dir, driver) = remote_driver(store, object_path, Duration::ZERO);

        {
            let _scope = driver.connect().expect("connect");
            assert_eq!(driver.get_datasets(None, 0, None).expect("datasets").len(), 1);
        }
        let synced_mtime = mtime(driver.path());

        // every new scope re-checks (zero TTL) but the content is unchanged
        for _ in 0..3 {
            let _scope = driver.connect().expect("connect");
            assert_eq!(driver.get_datasets(None, 0, None).expect("datasets").len(), 1);
        }
        assert_eq!(mtime(driver.path()), synced_mtime);
    }

    #[test]
    fn mutations_are_not_implemented() {
        let store = memory_store();
        let object_path = ObjectPath::from("tc.sqlite");
        upload_db(store.as_ref(), &object_path, &["some", "keys"], &[]);

        let (_cache_dir, driver) = remote_driver(store, object_path, Duration::from_secs(60));

        let keys = vec!["some".to_string(), "value".to_string()];
        assert!(matches!(
            driver.create(&[KeyDescription::new("some")]),
            Err(Error::NotImplemented(_))
        ));
        assert!(matches!(
            driver.insert(&keys, "/tmp/img.tif", &Default::default()),
            Err(Error::NotImplemented(_))
        ));
        assert!(matches!(driver.delete(&keys), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn reads_require_connection_scope() {
        let store = memory_store();
        let object_path = ObjectPath::from("tc.sqlite");
        upload_db(store.as_ref(), &object_path, &["some", "keys"], &[]);

        let (_cache_dir, driver) = remote_driver(store, object_path, Duration::from_secs(60));
        assert!(matches!(driver.get_datasets(None, 0, None), Err(Error::NotConnected)));
    }
}
