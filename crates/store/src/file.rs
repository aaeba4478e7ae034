//! On-disk storage: each key is one JSON document in a directory, written
//! atomically through a `.tmp` file and a rename.

use splitlane_core::{SplitlaneError, SplitlaneResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::StorageBackend;

pub struct FileStorage {
    dir: PathBuf,
    retention: Option<Duration>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> SplitlaneResult<Self> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(SplitlaneError::Storage(format!(
                "{} exists and is not a directory",
                dir.display()
            )));
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retention: None,
        })
    }

    /// Documents older than `retention_secs` read as absent; 0 disables.
    pub fn with_retention(mut self, retention_secs: u64) -> Self {
        self.retention = (retention_secs > 0).then(|| Duration::from_secs(retention_secs));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    fn is_expired(&self, path: &Path) -> SplitlaneResult<bool> {
        let Some(ttl) = self.retention else {
            return Ok(false);
        };
        let modified = std::fs::metadata(path)?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(age > ttl)
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, key: &str) -> SplitlaneResult<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        if self.is_expired(&path)? {
            std::fs::remove_file(&path)?;
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&path)?))
    }

    fn set(&self, key: &str, value: &str) -> SplitlaneResult<()> {
        let final_path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{}.json.tmp", encode_key(key)));
        std::fs::write(&tmp_path, value)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> SplitlaneResult<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn keys(&self, prefix: &str) -> SplitlaneResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(stem) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            let Some(key) = decode_key(stem) else {
                continue;
            };
            if key.starts_with(prefix) && !self.is_expired(&path)? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Percent-encode the key so any key is a safe file name.
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

fn decode_key(name: &str) -> Option<String> {
    urlencoding::decode(name).ok().map(|key| key.into_owned())
}
