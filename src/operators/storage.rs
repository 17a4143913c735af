//! KV-store operator wrappers: the durable bus between pipeline runs.
//!
//! A writer at the tail of one pipeline records items keyed by id; a reader
//! at the head of the next pipeline replays them. Neither touches the
//! state store - resumability is layered on separately.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{expect_list, KeyValueExtractor, ValueReader};
use crate::dag::Operator;
use crate::error::Result;
use crate::store::KvStore;

/// Merges `(key, value)` pairs extracted from its input into a namespace,
/// then passes the input through unchanged.
pub struct KvWriter {
    store: KvStore,
    key_value_of: KeyValueExtractor,
    /// When set, pairs whose value is null are not recorded. Off by
    /// default: the filter pipeline stores rejected ids as null on purpose.
    skip_null_values: bool,
}

impl KvWriter {
    pub fn new(
        dir: impl AsRef<Path>,
        namespace: &str,
        key_value_of: KeyValueExtractor,
    ) -> Self {
        Self {
            store: KvStore::new(dir, namespace),
            key_value_of,
            skip_null_values: false,
        }
    }

    pub fn skip_null_values(mut self, skip: bool) -> Self {
        self.skip_null_values = skip;
        self
    }
}

#[async_trait]
impl Operator for KvWriter {
    fn name(&self) -> &str {
        "KvWriter"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let items = expect_list(input)?;

        let mut pairs = Vec::with_capacity(items.len());
        for item in &items {
            let (key, value) = (self.key_value_of)(item)?;
            if self.skip_null_values && value.is_null() {
                continue;
            }
            pairs.push((key, value));
        }

        let written = pairs.len();
        self.store.merge(pairs)?;
        info!("stored {written} entries in {}", self.store.file_path().display());

        Ok(Value::Array(items))
    }
}

/// Reads a whole namespace and emits one payload per entry, ignoring input.
///
/// Entries the `value_reader` maps to null are dropped; that is how a
/// downstream pipeline skips ids that were recorded but carry no payload
/// (e.g. papers the LLM filter rejected).
pub struct KvReader {
    store: KvStore,
    value_reader: ValueReader,
}

impl KvReader {
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            store: KvStore::new(dir, namespace),
            value_reader: std::sync::Arc::new(|_key, value| Ok(value.clone())),
        }
    }

    pub fn with_value_reader(mut self, value_reader: ValueReader) -> Self {
        self.value_reader = value_reader;
        self
    }
}

#[async_trait]
impl Operator for KvReader {
    fn name(&self) -> &str {
        "KvReader"
    }

    async fn process(&self, _input: Value) -> Result<Value> {
        let entries = self.store.read()?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, entry) in &entries {
            let mapped = (self.value_reader)(key, &entry.value)?;
            if !mapped.is_null() {
                out.push(mapped);
            }
        }
        info!("read {} entries from {}", out.len(), self.store.file_path().display());
        Ok(Value::Array(out))
    }
}
