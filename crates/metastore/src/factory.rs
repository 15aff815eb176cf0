use std::path::Path;

use url::Url;

use crate::driver::MetadataDriver;
use crate::local::SqliteDriver;
use crate::remote::RemoteSqliteDriver;
use crate::{Result, Settings};

/// Create the matching metadata driver for a locator: object store URLs get
/// the remote read-only driver, everything else is treated as a local sqlite
/// file path.
pub fn driver_for(locator: &str, settings: &Settings) -> Result<Box<dyn MetadataDriver>> {
    if let Ok(url) = Url::parse(locator) {
        match url.scheme() {
            "file" => {
                if let Ok(path) = url.to_file_path() {
                    return Ok(Box::new(SqliteDriver::open(path, settings)));
                }
            }
            "s3" | "http" | "https" => {
                return Ok(Box::new(RemoteSqliteDriver::open(locator, settings)?));
            }
            _ => {}
        }
    }

    Ok(Box::new(SqliteDriver::open(Path::new(locator), settings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyDescription;

    #[test]
    fn plain_path_gets_local_driver() -> Result {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("tc.sqlite");

        let driver = driver_for(db_path.to_str().expect("utf-8 path"), &Settings::default())?;
        driver.create(&[KeyDescription::new("name")])?;
        assert_eq!(driver.available_keys()?, vec!["name"]);

        Ok(())
    }

    #[test]
    fn s3_url_gets_read_only_driver() -> Result {
        // fake credentials so the object store client can be constructed
        unsafe {
            std::env::set_var("AWS_ACCESS_KEY_ID", "testing");
            std::env::set_var("AWS_SECRET_ACCESS_KEY", "testing");
            std::env::set_var("AWS_REGION", "us-east-1");
        }

        let dir = tempfile::tempdir()?;
        let settings = Settings {
            remote_db_cache_dir: dir.path().join("cache"),
            ..Default::default()
        };

        let driver = driver_for("s3://bucket/tc.sqlite", &settings)?;
        assert!(matches!(
            driver.create(&[KeyDescription::new("name")]),
            Err(crate::Error::NotImplemented(_))
        ));

        Ok(())
    }
}
