//! State-store operator wrappers.
//!
//! [`FilterFinishedIds`] is how every stage gets its at-most-once property:
//! it drops items whose id the stage has already finished.
//! [`MarkIdsAsFinished`] runs after the stage's side effect succeeded, so a
//! crash in between leaves the item pending and a later run retries it.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{expect_list, identity_id, IdExtractor};
use crate::dag::Operator;
use crate::error::Result;
use crate::store::StateStore;

/// Records incoming ids as pending and passes them through.
pub struct InsertPendingIds {
    store: StateStore,
}

impl InsertPendingIds {
    pub fn new(base_dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            store: StateStore::new(base_dir, namespace),
        }
    }
}

#[async_trait]
impl Operator for InsertPendingIds {
    fn name(&self) -> &str {
        "InsertPendingIds"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let items = expect_list(input)?;
        let id_of = identity_id();
        let ids: Vec<String> = items.iter().map(|item| id_of(item)).collect::<Result<_>>()?;
        self.store.store_pending(&ids)?;
        Ok(Value::Array(items))
    }
}

/// Emits every id currently pending in the namespace, ignoring its input.
pub struct GetAllPendingIds {
    store: StateStore,
}

impl GetAllPendingIds {
    pub fn new(base_dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            store: StateStore::new(base_dir, namespace),
        }
    }
}

#[async_trait]
impl Operator for GetAllPendingIds {
    fn name(&self) -> &str {
        "GetAllPendingIds"
    }

    async fn process(&self, _input: Value) -> Result<Value> {
        let pending = self.store.get_pending()?;
        Ok(Value::Array(pending.into_iter().map(Value::String).collect()))
    }
}

/// Marks the ids of incoming items as finished and passes the items through.
pub struct MarkIdsAsFinished {
    store: StateStore,
    id_of: IdExtractor,
}

impl MarkIdsAsFinished {
    pub fn new(base_dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            store: StateStore::new(base_dir, namespace),
            id_of: identity_id(),
        }
    }

    pub fn with_id_extractor(mut self, id_of: IdExtractor) -> Self {
        self.id_of = id_of;
        self
    }
}

#[async_trait]
impl Operator for MarkIdsAsFinished {
    fn name(&self) -> &str {
        "MarkIdsAsFinished"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let items = expect_list(input)?;
        let ids: Vec<String> = items.iter().map(|item| (self.id_of)(item)).collect::<Result<_>>()?;
        if !ids.is_empty() {
            self.store.mark_finished(&ids)?;
            info!("marked {} ids as finished", ids.len());
        }
        Ok(Value::Array(items))
    }
}

/// Drops items whose id is already finished in the namespace.
///
/// Input order is preserved for the survivors.
pub struct FilterFinishedIds {
    store: StateStore,
    id_of: IdExtractor,
}

impl FilterFinishedIds {
    pub fn new(base_dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            store: StateStore::new(base_dir, namespace),
            id_of: identity_id(),
        }
    }

    pub fn with_id_extractor(mut self, id_of: IdExtractor) -> Self {
        self.id_of = id_of;
        self
    }
}

#[async_trait]
impl Operator for FilterFinishedIds {
    fn name(&self) -> &str {
        "FilterFinishedIds"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let items = expect_list(input)?;
        let total = items.len();
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if !self.store.is_finished(&(self.id_of)(&item)?)? {
                kept.push(item);
            }
        }
        info!("kept {}/{} unfinished items", kept.len(), total);
        Ok(Value::Array(kept))
    }
}
