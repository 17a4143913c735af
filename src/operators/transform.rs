//! Stateless list transforms.

use async_trait::async_trait;
use serde_json::Value;

use super::expect_list;
use crate::dag::Operator;
use crate::error::Result;

type TransformFn = Box<dyn Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync>;

/// A named list-to-list transform built from a closure (sorting,
/// projection, per-item filtering).
pub struct CustomProcessor {
    label: String,
    transform: TransformFn,
}

impl CustomProcessor {
    pub fn new(
        label: impl Into<String>,
        transform: impl Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            transform: Box::new(transform),
        }
    }
}

#[async_trait]
impl Operator for CustomProcessor {
    fn name(&self) -> &str {
        &self.label
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let items = expect_list(input)?;
        Ok(Value::Array((self.transform)(items)?))
    }
}

/// Truncates the input list to at most `n` items.
pub struct Limit {
    n: usize,
}

impl Limit {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

#[async_trait]
impl Operator for Limit {
    fn name(&self) -> &str {
        "Limit"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let mut items = expect_list(input)?;
        items.truncate(self.n);
        Ok(Value::Array(items))
    }
}
