//! Namespaced key-value store persisted as a single JSON document.
//!
//! One namespace = one file. Writes replace the whole file through a
//! write-then-rename so concurrent readers never observe a truncated
//! document. Namespaces are small (thousands of entries), so whole-file
//! rewrites are fine.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A stored value plus its write timestamp (RFC 3339).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvEntry {
    pub value: Value,
    pub stored_at: String,
}

impl KvEntry {
    /// Stamp a value with the current time.
    pub fn now(value: Value) -> Self {
        Self {
            value,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A durable map `key -> KvEntry` backed by `<dir>/<namespace>.json`.
#[derive(Debug, Clone)]
pub struct KvStore {
    dir: PathBuf,
    namespace: String,
}

impl KvStore {
    pub fn new(dir: impl AsRef<Path>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            namespace: namespace.into(),
        }
    }

    /// Path of the backing file.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.namespace))
    }

    /// Read the whole namespace. A missing file is an empty map.
    pub fn read(&self) -> Result<BTreeMap<String, KvEntry>> {
        let path = self.file_path();
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the whole namespace atomically.
    ///
    /// The document is serialized to a sibling `.tmp` file first and then
    /// renamed over the target, so readers see either the old or the new
    /// content in full.
    pub fn write(&self, entries: &BTreeMap<String, KvEntry>) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read, merge the given pairs in, write back.
    pub fn merge(&self, pairs: impl IntoIterator<Item = (String, Value)>) -> Result<()> {
        let mut entries = self.read()?;
        for (key, value) in pairs {
            entries.insert(key, KvEntry::now(value));
        }
        self.write(&entries)
    }
}
