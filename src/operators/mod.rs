//! The standard operator library.
//!
//! Everything a pipeline is assembled from: the catalog source, the
//! PDF reader, the LLM processors, the webhook sink, KV and state wrappers,
//! and the small stateless transforms. Each operator implements
//! [`crate::dag::Operator`] over `serde_json::Value` payloads.

pub mod feishu;
pub mod llm;
pub mod reader;
pub mod source;
pub mod state;
pub mod storage;
pub mod transform;

use std::sync::Arc;

use serde_json::Value;

use crate::error::{PipelineError, Result};

pub use feishu::FeishuPusher;
pub use llm::{AbstractLlmFilter, ChatCompletion, LlmClient, LlmSummarizer};
pub use reader::PaperReader;
pub use source::ArxivSource;
pub use state::{FilterFinishedIds, GetAllPendingIds, InsertPendingIds, MarkIdsAsFinished};
pub use storage::{KvReader, KvWriter};
pub use transform::{CustomProcessor, Limit};

/// Extracts the join key out of an item payload.
pub type IdExtractor = Arc<dyn Fn(&Value) -> Result<String> + Send + Sync>;

/// Extracts a `(key, value)` pair out of an item payload.
pub type KeyValueExtractor = Arc<dyn Fn(&Value) -> Result<(String, Value)> + Send + Sync>;

/// Maps a stored `(key, value)` pair to an emitted payload.
pub type ValueReader = Arc<dyn Fn(&str, &Value) -> Result<Value> + Send + Sync>;

/// The default id extractor: the item itself is the id string.
pub fn identity_id() -> IdExtractor {
    Arc::new(|item| {
        item.as_str()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::data(format!("expected string id, got {item}")))
    })
}

/// Id extractor reading a string field of an object payload.
pub fn field_id(field: &'static str) -> IdExtractor {
    Arc::new(move |item| {
        item.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::data(format!("item has no string field '{field}'")))
    })
}

/// Interpret an operator input as a list of items.
///
/// Null counts as the empty list so operators at the head of a chain can be
/// fed the absent initial value.
pub(crate) fn expect_list(input: Value) -> Result<Vec<Value>> {
    match input {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(PipelineError::data(format!("expected a list payload, got {other}"))),
    }
}
