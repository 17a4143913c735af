//! Webhook sink: pushes items to a Feishu group as interactive cards.
//!
//! Pushes run strictly one at a time so messages land in the order the
//! pipeline sorted them. A push that still fails after retries is reported
//! in the result, not raised - downstream keeps the successes and the
//! failed item stays unfinished for the next run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info};

use super::expect_list;
use crate::dag::Operator;
use crate::error::Result;
use crate::retry::{with_retry, RetryPolicy};

/// Webhook request timeout.
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Extracts the card title and body out of an item payload.
pub type TitleContentExtractor = Arc<dyn Fn(&Value) -> Result<(String, String)> + Send + Sync>;

/// Posts one interactive card per item, sequentially, with retry.
pub struct FeishuPusher {
    client: reqwest::Client,
    webhook_url: String,
    title_and_content_of: TitleContentExtractor,
}

impl FeishuPusher {
    pub fn new(webhook_url: impl Into<String>, title_and_content_of: TitleContentExtractor) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            title_and_content_of,
        })
    }

    async fn push_one(&self, item: &Value) -> Result<bool> {
        let (title, content) = (self.title_and_content_of)(item)?;
        let message = build_card(&title, &content);

        let outcome = with_retry(RetryPolicy::webhook(), "feishu push", || async {
            self.client
                .post(&self.webhook_url)
                .json(&message)
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, crate::error::PipelineError>(())
        })
        .await;

        match outcome {
            Ok(()) => {
                info!("pushed '{title}'");
                Ok(true)
            }
            Err(e) => {
                error!("push of '{title}' failed: {e}");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Operator for FeishuPusher {
    fn name(&self) -> &str {
        "FeishuPusher"
    }

    async fn process(&self, input: Value) -> Result<Value> {
        let items = expect_list(input)?;
        info!("pushing {} items to feishu", items.len());

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let ok = self.push_one(&item).await?;
            results.push(Value::Array(vec![item, Value::Bool(ok)]));
        }
        Ok(Value::Array(results))
    }
}

/// The interactive-card wire shape the webhook accepts.
fn build_card(title: &str, content: &str) -> Value {
    json!({
        "msg_type": "interactive",
        "card": {
            "elements": [
                { "tag": "div", "text": { "content": content, "tag": "lark_md" } }
            ],
            "header": { "title": { "content": title, "tag": "plain_text" } }
        }
    })
}
