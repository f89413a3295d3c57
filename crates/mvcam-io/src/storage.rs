use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// A directory of pretty-printed JSON records, one `<serial>.json` per camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    /// Create a store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `serial`.
    pub fn path(&self, serial: &str) -> PathBuf {
        self.root.join(format!("{serial}.json"))
    }

    /// Whether a record exists for `serial`.
    pub fn exists(&self, serial: &str) -> bool {
        self.path(serial).is_file()
    }

    /// Write the record for `serial`, replacing any previous one atomically.
    pub fn save<T: Serialize>(&self, serial: &str, record: &T) -> Result<PathBuf, StorageError> {
        let path = self.path(serial);
        fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            path: self.root.clone(),
            source,
        })?;

        let json = serde_json::to_vec_pretty(record).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;

        // write next to the target and rename so readers never see a partial file
        let tmp = self.root.join(format!(".{serial}.json.tmp"));
        fs::write(&tmp, json).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;

        log::debug!("saved {}", path.display());
        Ok(path)
    }

    /// Read the record for `serial`.
    pub fn load<T: DeserializeOwned>(&self, serial: &str) -> Result<T, StorageError> {
        let path = self.path(serial);
        if !path.exists() {
            return Err(StorageError::NotFound(path));
        }
        let bytes = fs::read(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Json { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        #[serde(rename = "Value")]
        value: f64,
    }

    #[test]
    fn test_save_load() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = JsonStore::new(dir.path().join("records"));
        assert!(!store.exists("A1"));

        let path = store.save("A1", &Record { value: 1.5 })?;
        assert_eq!(path, dir.path().join("records").join("A1.json"));
        assert!(store.exists("A1"));
        assert_eq!(store.load::<Record>("A1")?, Record { value: 1.5 });

        store.save("A1", &Record { value: 2.0 })?;
        assert_eq!(store.load::<Record>("A1")?, Record { value: 2.0 });
        Ok(())
    }

    #[test]
    fn test_missing_and_malformed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = JsonStore::new(dir.path());
        assert!(matches!(
            store.load::<Record>("nope"),
            Err(StorageError::NotFound(_))
        ));

        fs::write(store.path("bad"), b"{\"Value\": ")?;
        assert!(matches!(
            store.load::<Record>("bad"),
            Err(StorageError::Json { .. })
        ));
        Ok(())
    }
}
