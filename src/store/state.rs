//! Per-namespace pending/finished tracking.
//!
//! Each stage owns a namespace; the store records which item ids the stage
//! has completed. The one invariant that matters: a finished id never goes
//! back to pending. That property is what makes re-running a pipeline
//! against a live upstream safe.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Processing state of a single id within a namespace.
///
/// Absence from the map means "never seen", which filters treat the same
/// as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdState {
    Pending,
    Finished,
}

/// Durable `id -> IdState` map backed by
/// `<base_dir>/pending_states/<namespace>_states.json`.
#[derive(Debug, Clone)]
pub struct StateStore {
    file: PathBuf,
}

impl StateStore {
    pub fn new(base_dir: impl AsRef<Path>, namespace: &str) -> Self {
        let file = base_dir
            .as_ref()
            .join("pending_states")
            .join(format!("{namespace}_states.json"));
        Self { file }
    }

    fn load(&self) -> Result<BTreeMap<String, IdState>> {
        match fs::read_to_string(&self.file) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, states: &BTreeMap<String, IdState>) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.file.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(states)?)?;
        fs::rename(&tmp, &self.file)?;
        Ok(())
    }

    /// Ids currently in the pending state.
    pub fn get_pending(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|(_, state)| *state == IdState::Pending)
            .map(|(id, _)| id)
            .collect())
    }

    pub fn is_finished(&self, id: &str) -> Result<bool> {
        Ok(self.load()?.get(id) == Some(&IdState::Finished))
    }

    /// Record ids as pending. Finished ids are never demoted.
    pub fn store_pending<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut states = self.load()?;
        for id in ids {
            let id = id.as_ref();
            if states.get(id) != Some(&IdState::Finished) {
                states.insert(id.to_string(), IdState::Pending);
            }
        }
        self.save(&states)
    }

    /// Mark ids as finished, unconditionally.
    pub fn mark_finished<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut states = self.load()?;
        let mut count = 0usize;
        for id in ids {
            states.insert(id.as_ref().to_string(), IdState::Finished);
            count += 1;
        }
        debug!("marked {count} ids finished in {}", self.file.display());
        self.save(&states)
    }
}
