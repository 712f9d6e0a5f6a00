use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lnsync_core::persist::{FundingCacheMap, FundingCachePersist, PersistError};
#[allow(unused_imports)]
use log::{debug, info};

/// The cache file name inside the data directory
pub const CACHE_FILE: &str = "ln-funding-txs-cache.json";

/// Persists the funding transaction cache as a single JSON object.
///
/// Writes go to a temporary file that is then renamed over the cache file, so
/// a crash mid-write leaves the previous cache in place.
pub struct JsonFileCache {
    path: PathBuf,
}

impl JsonFileCache {
    /// A cache file named [`CACHE_FILE`] in `datadir`
    pub fn new<P: AsRef<Path>>(datadir: P) -> Self {
        Self { path: datadir.as_ref().join(CACHE_FILE) }
    }

    /// The cache file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

fn io_error(path: &Path, e: std::io::Error) -> PersistError {
    PersistError::Io(format!("{}: {}", path.display(), e))
}

impl FundingCachePersist for JsonFileCache {
    fn load(&self) -> Result<FundingCacheMap, PersistError> {
        if !self.path.exists() {
            debug!("no funding txs cache at {}", self.path.display());
            return Ok(FundingCacheMap::new());
        }
        let contents = fs::read_to_string(&self.path).map_err(|e| io_error(&self.path, e))?;
        let cache: FundingCacheMap = serde_json::from_str(&contents)
            .map_err(|e| PersistError::Corrupt(format!("{}: {}", self.path.display(), e)))?;
        info!("loaded {} funding txs from {}", cache.len(), self.path.display());
        Ok(cache)
    }

    fn save(&self, cache: &FundingCacheMap) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let temp_path = self.temp_path();
        let contents =
            serde_json::to_vec(cache).map_err(|e| PersistError::Corrupt(e.to_string()))?;
        let mut file = fs::File::create(&temp_path).map_err(|e| io_error(&temp_path, e))?;
        file.write_all(&contents).map_err(|e| io_error(&temp_path, e))?;
        file.sync_all().map_err(|e| io_error(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnsync_core::funding::FundingTx;
    use lnsync_core::util::test_utils::txid;

    fn sample() -> FundingCacheMap {
        let mut cache = FundingCacheMap::new();
        cache.insert(
            "700000x3x1".to_string(),
            FundingTx { timestamp: 1_650_000_000, txid: txid(0xab), value: 500_000 },
        );
        cache
    }

    #[test]
    fn round_trip_test() {
        let tempdir = tempfile::tempdir().unwrap();
        let persister = JsonFileCache::new(tempdir.path());
        assert!(persister.load().unwrap().is_empty());
        persister.save(&sample()).unwrap();
        assert_eq!(persister.load().unwrap(), sample());
        assert!(!persister.temp_path().exists());
        assert_eq!(persister.path(), tempdir.path().join(CACHE_FILE));
    }

    #[test]
    fn file_format_test() {
        let tempdir = tempfile::tempdir().unwrap();
        let persister = JsonFileCache::new(tempdir.path());
        persister.save(&sample()).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(persister.path()).unwrap()).unwrap();
        let entry = &value["700000x3x1"];
        assert_eq!(entry["timestamp"], 1_650_000_000);
        assert_eq!(entry["value"], 500_000);
        assert_eq!(entry["txid"], txid(0xab).to_string());
    }

    #[test]
    fn corrupt_test() {
        let tempdir = tempfile::tempdir().unwrap();
        let persister = JsonFileCache::new(tempdir.path());
        fs::write(persister.path(), b"{\"700000x3x1\": ").unwrap();
        match persister.load() {
            Err(PersistError::Corrupt(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_datadir_test() {
        let tempdir = tempfile::tempdir().unwrap();
        let persister = JsonFileCache::new(tempdir.path().join("nested").join("dir"));
        persister.save(&sample()).unwrap();
        assert_eq!(persister.load().unwrap().len(), 1);
    }
}
